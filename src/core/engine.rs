use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::error::SimulationError;
use super::periods::{self, MarketPeriodSpec};
use super::rmd::{self, RmdOwner};
use super::tax::{self, FilingStatus, MEDICARE_AGE};
use super::types::{
    FinancialProfile, GuardrailRules, IncomeKind, MarketAssumptions, Percentiles,
    ReturnDistribution, SimulationResult, SpendingModel, SpendingPlan, Timeline,
};

/// Paths handled by one worker task.
pub const SHARD_SIZE: usize = 1_024;
/// Balances saturate here instead of overflowing.
pub const MAX_BALANCE: f64 = 1e15;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_EFFECTIVE_TAX_RATE: f64 = 0.22;

const SHORTFALL_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub years: u32,
    pub simulations: u32,
    pub seed: u64,
    /// Calendar year of simulation year 0.
    pub start_year: i32,
    pub assumptions: MarketAssumptions,
    pub market_periods: Option<MarketPeriodSpec>,
    pub spending_model: SpendingModel,
    pub return_distribution: ReturnDistribution,
    pub return_correlation: f64,
    /// Withholding rate used to gross up traditional withdrawals.
    pub effective_tax_rate: f64,
    pub state_tax_rate: f64,
}

impl SimulationConfig {
    pub fn new(years: u32, simulations: u32, start_year: i32) -> Self {
        Self {
            years,
            simulations,
            seed: DEFAULT_SEED,
            start_year,
            assumptions: MarketAssumptions::default(),
            market_periods: None,
            spending_model: SpendingModel::default(),
            return_distribution: ReturnDistribution::default(),
            return_correlation: 0.0,
            effective_tax_rate: DEFAULT_EFFECTIVE_TAX_RATE,
            state_tax_rate: 0.0,
        }
    }

    fn validate(&self) -> Result<(), SimulationError> {
        if self.years == 0 {
            return Err(SimulationError::ZeroYears);
        }
        if self.simulations == 0 {
            return Err(SimulationError::ZeroSimulations);
        }
        if !(0.0..1.0).contains(&self.effective_tax_rate) {
            return Err(SimulationError::EffectiveTaxRate(self.effective_tax_rate));
        }
        if !(0.0..1.0).contains(&self.state_tax_rate) {
            return Err(SimulationError::StateTaxRate(self.state_tax_rate));
        }
        if !(-1.0..=1.0).contains(&self.return_correlation) {
            return Err(SimulationError::Correlation(self.return_correlation));
        }
        periods::check_assumptions("default assumptions", &self.assumptions)
            .map_err(|err| SimulationError::DefaultAssumptions(err.to_string()))?;
        if let Some(spec) = &self.market_periods {
            periods::check(spec)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MarketSample {
    stock_return: f64,
    bond_return: f64,
    inflation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MedicareCoverage {
    Nobody,
    One,
    Both,
}

/// Everything about a year that does not depend on the market path.
#[derive(Debug, Clone)]
struct YearPlan {
    retired: bool,
    social_security_real: f64,
    pension_nominal: f64,
    income_real: f64,
    income_nominal: f64,
    wages_real: f64,
    wages_nominal: f64,
    extra_spending_real: f64,
    extra_spending_nominal: f64,
    rmd_owners: Vec<RmdOwner>,
    medicare: MedicareCoverage,
}

/// Read-only inputs shared by every shard.
struct SimulationContext<'a> {
    config: &'a SimulationConfig,
    lookup: Vec<MarketAssumptions>,
    year_plans: Vec<YearPlan>,
    spending_plan: SpendingPlan,
    status: FilingStatus,
    stock_weight: f64,
    bond_weight: f64,
    liquid_start: f64,
    liquid_basis_start: f64,
    traditional_start: f64,
    roth_start: f64,
}

/// Per-year outputs of one shard, year-major.
#[derive(Debug, Default)]
struct ShardOutcome {
    balances: Vec<Vec<f64>>,
    withdrawals: Vec<Vec<f64>>,
    taxes: Vec<Vec<f64>>,
    spending: Vec<Vec<f64>>,
    survivors: Vec<u32>,
    successes: u32,
}

/// Cash movements of one path in one year, nominal.
#[derive(Debug, Clone, Copy, Default)]
struct YearFlow {
    spending: f64,
    withdrawn: f64,
    ordinary_income: f64,
    social_security: f64,
    realized_gains: f64,
    wages: f64,
    withheld: f64,
    surplus: f64,
    shortfall: bool,
}

/// Path-indexed account state for one shard.
struct ShardState {
    liquid: Vec<f64>,
    liquid_basis: Vec<f64>,
    traditional: Vec<f64>,
    roth: Vec<f64>,
    price_index: Vec<f64>,
    spending_multiplier: Vec<f64>,
    failed: Vec<bool>,
    rngs: Vec<ChaCha8Rng>,
}

pub fn simulate(
    profile: &FinancialProfile,
    config: &SimulationConfig,
) -> Result<SimulationResult, SimulationError> {
    simulate_sharded(profile, config, SHARD_SIZE)
}

fn simulate_sharded(
    profile: &FinancialProfile,
    config: &SimulationConfig,
    shard_size: usize,
) -> Result<SimulationResult, SimulationError> {
    config.validate()?;

    let warnings = config
        .market_periods
        .as_ref()
        .map(|spec| periods::validate(config.years, spec))
        .unwrap_or_default();
    for warning in &warnings {
        warn!(%warning, "market period warning");
    }

    let context = SimulationContext::new(profile, config);
    let simulations = config.simulations as usize;
    let shard_size = shard_size.max(1);
    let shards: Vec<(usize, usize)> = (0..simulations)
        .step_by(shard_size)
        .map(|first| (first, shard_size.min(simulations - first)))
        .collect();

    info!(
        simulations,
        years = config.years,
        shards = shards.len(),
        seed = config.seed,
        "starting monte carlo simulation"
    );

    let outcomes: Vec<ShardOutcome> = shards
        .par_iter()
        .map(|&(first, paths)| context.run_shard(first, paths))
        .collect();

    let result = aggregate(profile, config, outcomes, warnings);
    info!(
        success_rate = result.success_rate,
        median_final_balance = result.median_final_balance,
        "monte carlo simulation finished"
    );
    Ok(result)
}

impl<'a> SimulationContext<'a> {
    fn new(profile: &FinancialProfile, config: &'a SimulationConfig) -> Self {
        let allocation = profile.asset_allocation;
        Self {
            config,
            lookup: periods::build_lookup(
                config.years,
                config.market_periods.as_ref(),
                &config.assumptions,
            ),
            year_plans: build_year_plans(profile, config),
            spending_plan: profile.spending_plan(),
            status: FilingStatus::for_household(profile.is_couple()),
            stock_weight: allocation.stocks,
            bond_weight: allocation.bonds,
            liquid_start: profile.liquid_assets,
            liquid_basis_start: profile.liquid_cost_basis(),
            traditional_start: profile.pre_tax_balance(),
            roth_start: profile.roth_ira,
        }
    }

    fn run_shard(&self, first_path: usize, paths: usize) -> ShardOutcome {
        let years = self.config.years as usize;
        let mut state = ShardState {
            liquid: vec![self.liquid_start; paths],
            liquid_basis: vec![self.liquid_basis_start.min(self.liquid_start); paths],
            traditional: vec![self.traditional_start; paths],
            roth: vec![self.roth_start; paths],
            price_index: vec![1.0; paths],
            spending_multiplier: vec![1.0; paths],
            failed: vec![false; paths],
            rngs: (first_path..first_path + paths)
                .map(|path| ChaCha8Rng::seed_from_u64(derive_seed(self.config.seed, path as u64)))
                .collect(),
        };
        let mut outcome = ShardOutcome {
            balances: Vec::with_capacity(years),
            withdrawals: Vec::with_capacity(years),
            taxes: Vec::with_capacity(years),
            spending: Vec::with_capacity(years),
            survivors: Vec::with_capacity(years),
            successes: 0,
        };

        for (assumptions, plan) in self.lookup.iter().zip(&self.year_plans) {
            let samples: Vec<MarketSample> = state
                .rngs
                .iter_mut()
                .map(|rng| {
                    sample_market(
                        assumptions,
                        draw_normals(rng),
                        self.config.return_correlation,
                        self.config.return_distribution,
                    )
                })
                .collect();

            let rmds: Vec<f64> = state
                .traditional
                .iter()
                .map(|&balance| rmd::household_rmd(&plan.rmd_owners, balance))
                .collect();

            state.grow(&samples, self.stock_weight, self.bond_weight);

            let flows: Vec<YearFlow> = (0..paths)
                .map(|i| {
                    if state.failed[i] {
                        return YearFlow::default();
                    }
                    let spending = self.spending_for(&state, i, plan);
                    state.fund_year(i, spending, plan, rmds[i], self.config.effective_tax_rate)
                })
                .collect();

            let taxes = self.assess_taxes(&flows, &state.price_index, plan);

            let mut withdrawals = Vec::with_capacity(paths);
            for (i, flow) in flows.iter().enumerate() {
                if state.failed[i] {
                    withdrawals.push(0.0);
                    continue;
                }
                let mut withdrawn = flow.withdrawn;
                let mut surplus = flow.surplus;
                let mut due = taxes[i] - flow.withheld;
                let mut shortfall = flow.shortfall;
                if due > 0.0 {
                    let covered = due.min(surplus);
                    surplus -= covered;
                    due -= covered;
                }
                if due > 0.0 {
                    let (drawn, unpaid) = state.draw_for_tax(i, due);
                    withdrawn += drawn;
                    shortfall |= unpaid > SHORTFALL_TOLERANCE;
                } else {
                    surplus -= due;
                }

                if shortfall {
                    state.fail(i);
                } else if surplus > 0.0 {
                    state.liquid[i] += surplus;
                    state.liquid_basis[i] += surplus;
                }
                withdrawals.push(withdrawn);
            }

            if let SpendingModel::Guardrails(rules) = self.config.spending_model {
                state.adjust_guardrails(&samples, self.stock_weight, self.bond_weight, &rules);
            }
            state.close_year(&samples);

            outcome.balances.push(state.totals());
            outcome.withdrawals.push(withdrawals);
            outcome.taxes.push(
                taxes
                    .iter()
                    .zip(&state.failed)
                    .map(|(tax, failed)| if *failed { 0.0 } else { *tax })
                    .collect(),
            );
            outcome.spending.push(
                flows
                    .iter()
                    .zip(&state.failed)
                    .map(|(flow, failed)| if *failed { 0.0 } else { flow.spending })
                    .collect(),
            );
            outcome
                .survivors
                .push(state.failed.iter().filter(|failed| !**failed).count() as u32);
        }

        outcome.successes = state.failed.iter().filter(|failed| !**failed).count() as u32;
        debug!(
            first_path,
            paths,
            successes = outcome.successes,
            "shard finished"
        );
        outcome
    }

    fn spending_for(&self, state: &ShardState, i: usize, plan: &YearPlan) -> f64 {
        let price_index = state.price_index[i];
        let extras = plan.extra_spending_real * price_index + plan.extra_spending_nominal;
        match self.config.spending_model {
            SpendingModel::ConstantReal => {
                self.spending_plan.nominal_for(plan.retired, price_index) + extras
            }
            SpendingModel::ConstantNominal => {
                self.spending_plan.base_for(plan.retired)
                    + plan.extra_spending_real
                    + plan.extra_spending_nominal
            }
            SpendingModel::Guardrails(_) => {
                self.spending_plan.nominal_for(plan.retired, price_index)
                    * state.spending_multiplier[i]
                    + extras
            }
        }
    }

    /// Actual tax for every path. Brackets are indexed by deflating income to
    /// today's dollars, applying the tables, then re-inflating.
    fn assess_taxes(&self, flows: &[YearFlow], price_index: &[f64], plan: &YearPlan) -> Vec<f64> {
        let real = |pick: fn(&YearFlow) -> f64| -> Vec<f64> {
            flows
                .iter()
                .zip(price_index)
                .map(|(flow, index)| pick(flow) / index)
                .collect()
        };
        let ordinary = real(|flow| flow.ordinary_income);
        let benefits = real(|flow| flow.social_security);
        let gains = real(|flow| flow.realized_gains);
        let wages = real(|flow| flow.wages);

        let other_income: Vec<f64> = ordinary.iter().zip(&gains).map(|(o, g)| o + g).collect();
        let taxable_ss = tax::taxable_social_security(&other_income, &benefits, self.status);

        let deduction = tax::standard_deduction(self.status);
        let taxable_ordinary: Vec<f64> = ordinary
            .iter()
            .zip(&taxable_ss)
            .map(|(o, ss)| (o + ss - deduction).max(0.0))
            .collect();
        let magi: Vec<f64> = ordinary
            .iter()
            .zip(&taxable_ss)
            .zip(&gains)
            .map(|((o, ss), g)| o + ss + g)
            .collect();

        let (federal, _) = tax::federal_tax(&taxable_ordinary, self.status);
        let ltcg = tax::ltcg_tax(&gains, &taxable_ordinary, self.status);
        let irmaa = match plan.medicare {
            MedicareCoverage::Nobody => vec![0.0; flows.len()],
            MedicareCoverage::One => tax::irmaa_surcharge(&magi, self.status, false),
            MedicareCoverage::Both => tax::irmaa_surcharge(&magi, self.status, true),
        };
        let fica = tax::fica_tax(&wages);
        let state_rate = self.config.state_tax_rate;

        (0..flows.len())
            .map(|i| {
                let real_total = federal[i] + ltcg[i] + irmaa[i] + fica[i] + magi[i] * state_rate;
                saturate(real_total * price_index[i])
            })
            .collect()
    }
}

impl ShardState {
    fn grow(&mut self, samples: &[MarketSample], stock_weight: f64, bond_weight: f64) {
        for (i, sample) in samples.iter().enumerate() {
            if self.failed[i] {
                continue;
            }
            let growth = 1.0 + blended_return(sample, stock_weight, bond_weight);
            self.liquid[i] = saturate(self.liquid[i] * growth);
            self.traditional[i] = saturate(self.traditional[i] * growth);
            self.roth[i] = saturate(self.roth[i] * growth);
        }
    }

    /// Covers `spending` from income, the forced RMD, then liquid, traditional
    /// and Roth balances in that order.
    fn fund_year(
        &mut self,
        i: usize,
        spending: f64,
        plan: &YearPlan,
        rmd: f64,
        effective_tax_rate: f64,
    ) -> YearFlow {
        let price_index = self.price_index[i];
        let social_security = plan.social_security_real * price_index;
        let wages = plan.wages_real * price_index + plan.wages_nominal;
        let other_income =
            plan.income_real * price_index + plan.income_nominal + plan.pension_nominal;

        let rmd = rmd.min(self.traditional[i]);
        self.traditional[i] -= rmd;
        let mut withheld = rmd * effective_tax_rate;
        let mut withdrawn = rmd;
        let mut from_traditional = rmd;
        let mut realized_gains = 0.0;
        let mut surplus = 0.0;

        let mut remaining = spending - (social_security + other_income + rmd - withheld);
        if remaining < 0.0 {
            surplus = -remaining;
            remaining = 0.0;
        }

        if remaining > 0.0 && self.liquid[i] > 0.0 {
            let take = remaining.min(self.liquid[i]);
            let basis_used = self.liquid_basis[i] * (take / self.liquid[i]);
            realized_gains = (take - basis_used).max(0.0);
            self.liquid[i] -= take;
            self.liquid_basis[i] = (self.liquid_basis[i] - basis_used).max(0.0);
            withdrawn += take;
            remaining -= take;
        }

        if remaining > 0.0 && self.traditional[i] > 0.0 {
            let gross = (remaining / (1.0 - effective_tax_rate)).min(self.traditional[i]);
            self.traditional[i] -= gross;
            withheld += gross * effective_tax_rate;
            from_traditional += gross;
            withdrawn += gross;
            remaining = (remaining - gross * (1.0 - effective_tax_rate)).max(0.0);
        }

        if remaining > 0.0 && self.roth[i] > 0.0 {
            let take = remaining.min(self.roth[i]);
            self.roth[i] -= take;
            withdrawn += take;
            remaining -= take;
        }

        YearFlow {
            spending,
            withdrawn,
            ordinary_income: other_income + from_traditional,
            social_security,
            realized_gains,
            wages,
            withheld,
            surplus,
            shortfall: remaining > SHORTFALL_TOLERANCE,
        }
    }

    /// Pays tax not covered by withholding. Returns `(withdrawn, unpaid)`.
    ///
    /// Exactly `due` leaves the household. The tax bill is not reassessed on
    /// this top-up, so gains realized on the liquid sale and the extra
    /// traditional distribution go untaxed until the following year's draw.
    fn draw_for_tax(&mut self, i: usize, due: f64) -> (f64, f64) {
        let mut remaining = due;
        let mut withdrawn = 0.0;

        let take = remaining.min(self.liquid[i]);
        if take > 0.0 {
            let basis_used = self.liquid_basis[i] * (take / self.liquid[i]);
            self.liquid[i] -= take;
            self.liquid_basis[i] = (self.liquid_basis[i] - basis_used).max(0.0);
            withdrawn += take;
            remaining -= take;
        }

        let take = remaining.min(self.traditional[i]);
        if take > 0.0 {
            self.traditional[i] -= take;
            withdrawn += take;
            remaining -= take;
        }

        let take = remaining.min(self.roth[i]);
        if take > 0.0 {
            self.roth[i] -= take;
            withdrawn += take;
            remaining -= take;
        }

        (withdrawn, remaining.max(0.0))
    }

    fn fail(&mut self, i: usize) {
        self.failed[i] = true;
        self.liquid[i] = 0.0;
        self.liquid_basis[i] = 0.0;
        self.traditional[i] = 0.0;
        self.roth[i] = 0.0;
    }

    fn adjust_guardrails(
        &mut self,
        samples: &[MarketSample],
        stock_weight: f64,
        bond_weight: f64,
        rules: &GuardrailRules,
    ) {
        for (i, sample) in samples.iter().enumerate() {
            let nominal = blended_return(sample, stock_weight, bond_weight);
            let real_return = (1.0 + nominal) / (1.0 + sample.inflation) - 1.0;
            self.spending_multiplier[i] =
                plan_spending_multiplier(self.spending_multiplier[i], real_return, rules);
        }
    }

    fn close_year(&mut self, samples: &[MarketSample]) {
        for (i, sample) in samples.iter().enumerate() {
            self.price_index[i] *= 1.0 + sample.inflation;
            self.liquid[i] = saturate(self.liquid[i]);
            self.liquid_basis[i] = saturate(self.liquid_basis[i]).min(self.liquid[i]);
            self.traditional[i] = saturate(self.traditional[i]);
            self.roth[i] = saturate(self.roth[i]);
        }
    }

    fn totals(&self) -> Vec<f64> {
        (0..self.liquid.len())
            .map(|i| saturate(self.liquid[i] + self.traditional[i] + self.roth[i]))
            .collect()
    }
}

fn build_year_plans(profile: &FinancialProfile, config: &SimulationConfig) -> Vec<YearPlan> {
    let members: Vec<_> = profile.members().collect();
    let share = 1.0 / members.len() as f64;

    (0..config.years)
        .map(|year| {
            let calendar_year = config.start_year + year as i32;
            let retired = profile.person1.is_retired_in(calendar_year);

            let social_security_real = members
                .iter()
                .filter(|person| person.age_in_year(calendar_year) >= person.claiming_age())
                .map(|person| person.claimed_benefit())
                .sum();

            let mut plan = YearPlan {
                retired,
                social_security_real,
                pension_nominal: if retired { profile.pension_annual } else { 0.0 },
                income_real: 0.0,
                income_nominal: 0.0,
                wages_real: 0.0,
                wages_nominal: 0.0,
                extra_spending_real: 0.0,
                extra_spending_nominal: 0.0,
                rmd_owners: members
                    .iter()
                    .map(|person| {
                        RmdOwner::new(
                            person.age_in_year(calendar_year),
                            person.birth_year(),
                            share,
                        )
                    })
                    .collect(),
                medicare: MedicareCoverage::Nobody,
            };

            for stream in profile.income_streams.iter().filter(|s| s.applies_in(year)) {
                let amount = stream.annual_amount.max(0.0);
                let is_wages = stream.kind == IncomeKind::Wages;
                match (stream.inflation_adjusted, is_wages) {
                    (true, true) => {
                        plan.income_real += amount;
                        plan.wages_real += amount;
                    }
                    (true, false) => plan.income_real += amount,
                    (false, true) => {
                        plan.income_nominal += amount;
                        plan.wages_nominal += amount;
                    }
                    (false, false) => plan.income_nominal += amount,
                }
            }

            for expense in profile.future_expenses.iter().filter(|e| e.applies_in(year)) {
                if expense.inflation_adjusted {
                    plan.extra_spending_real += expense.amount.max(0.0);
                } else {
                    plan.extra_spending_nominal += expense.amount.max(0.0);
                }
            }

            let on_medicare = members
                .iter()
                .filter(|person| person.age_in_year(calendar_year) >= MEDICARE_AGE)
                .count();
            plan.medicare = match on_medicare {
                0 => MedicareCoverage::Nobody,
                n if n > 1 && n == members.len() => MedicareCoverage::Both,
                _ => MedicareCoverage::One,
            };

            plan
        })
        .collect()
}

fn aggregate(
    profile: &FinancialProfile,
    config: &SimulationConfig,
    outcomes: Vec<ShardOutcome>,
    warnings: Vec<String>,
) -> SimulationResult {
    let years = config.years as usize;
    let simulations = config.simulations as usize;
    let mut timeline = Timeline::default();
    let successes: u32 = outcomes.iter().map(|outcome| outcome.successes).sum();
    let mut final_balances = Vec::new();

    for year in 0..years {
        let gather = |pick: fn(&ShardOutcome) -> &Vec<Vec<f64>>| -> Vec<f64> {
            let mut values = Vec::with_capacity(simulations);
            for outcome in &outcomes {
                values.extend_from_slice(&pick(outcome)[year]);
            }
            values
        };

        let mut balances = gather(|outcome| &outcome.balances);
        let balance_percentiles = percentiles(&mut balances);
        timeline.years.push(config.start_year + year as i32);
        timeline.p10.push(balance_percentiles.p10);
        timeline.p25.push(balance_percentiles.p25);
        timeline.median.push(balance_percentiles.p50);
        timeline.p75.push(balance_percentiles.p75);
        timeline.p90.push(balance_percentiles.p90);
        timeline
            .median_withdrawal
            .push(percentile(&mut gather(|outcome| &outcome.withdrawals), 50.0));
        timeline
            .median_tax
            .push(percentile(&mut gather(|outcome| &outcome.taxes), 50.0));
        timeline
            .median_spending
            .push(percentile(&mut gather(|outcome| &outcome.spending), 50.0));

        let survivors: u32 = outcomes.iter().map(|outcome| outcome.survivors[year]).sum();
        timeline
            .survival_rate
            .push(survivors as f64 / simulations as f64);

        if year + 1 == years {
            final_balances = balances;
        }
    }

    let final_balance_percentiles = percentiles(&mut final_balances);
    SimulationResult {
        success_rate: successes as f64 / simulations as f64,
        starting_portfolio: profile.starting_portfolio(),
        median_final_balance: final_balance_percentiles.p50,
        final_balance_percentiles,
        timeline,
        warnings,
        simulations: config.simulations,
        years: config.years,
        seed: config.seed,
    }
}

fn blended_return(sample: &MarketSample, stock_weight: f64, bond_weight: f64) -> f64 {
    stock_weight * sample.stock_return + bond_weight * sample.bond_return
}

fn plan_spending_multiplier(current: f64, real_return: f64, rules: &GuardrailRules) -> f64 {
    let mut multiplier = current;
    if real_return < rules.bad_year_threshold {
        multiplier *= 1.0 - rules.bad_year_cut;
    } else if real_return > rules.good_year_threshold {
        multiplier *= 1.0 + rules.good_year_raise;
    }
    multiplier.clamp(rules.min_spending_floor, rules.max_spending_ceiling)
}

fn saturate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_BALANCE)
    }
}

fn draw_normals(rng: &mut ChaCha8Rng) -> [f64; 3] {
    [
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
    ]
}

fn sample_market(
    assumptions: &MarketAssumptions,
    z: [f64; 3],
    correlation: f64,
    distribution: ReturnDistribution,
) -> MarketSample {
    let orth = (1.0 - correlation * correlation).max(0.0).sqrt();
    let stock_z = z[0];
    let bond_z = correlation * z[0] + orth * z[1];

    let stock_return = draw_return(
        assumptions.stock_return_mean,
        assumptions.stock_return_std,
        stock_z,
        distribution,
    )
    .clamp(-0.95, 2.5);
    let bond_return = draw_return(
        assumptions.bond_return_mean,
        assumptions.bond_return_std,
        bond_z,
        distribution,
    )
    .clamp(-0.95, 2.5);
    let inflation =
        (assumptions.inflation_mean + assumptions.inflation_std * z[2]).clamp(-0.03, 0.20);

    MarketSample {
        stock_return,
        bond_return,
        inflation,
    }
}

/// Log-normal draws keep the arithmetic mean and standard deviation of the
/// gross return.
fn draw_return(mean: f64, std: f64, z: f64, distribution: ReturnDistribution) -> f64 {
    match distribution {
        ReturnDistribution::Normal => mean + std * z,
        ReturnDistribution::LogNormal => {
            let gross = (1.0 + mean).max(1e-6);
            let sigma_sq = (1.0 + (std * std) / (gross * gross)).ln();
            let mu = gross.ln() - 0.5 * sigma_sq;
            (mu + sigma_sq.sqrt() * z).exp() - 1.0
        }
    }
}

fn derive_seed(base_seed: u64, path: u64) -> u64 {
    splitmix64(base_seed ^ path.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn percentiles(values: &mut [f64]) -> Percentiles {
    values.sort_by(|a, b| a.total_cmp(b));
    Percentiles {
        p10: percentile_sorted(values, 10.0),
        p25: percentile_sorted(values, 25.0),
        p50: percentile_sorted(values, 50.0),
        p75: percentile_sorted(values, 75.0),
        p90: percentile_sorted(values, 90.0),
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
