use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::engine::{self, DEFAULT_EFFECTIVE_TAX_RATE, DEFAULT_SEED, SimulationConfig};
use super::error::{ProfileError, RmdError, SimulationError};
use super::periods::MarketPeriodSpec;
use super::rmd::{self, RmdOwner};
use super::solver::{self, SpendingSolveConfig, SpendingSolveResult};
use super::tax::{self, FilingStatus, MEDICARE_AGE};
use super::types::{
    FULL_RETIREMENT_AGE, FinancialProfile, MarketAssumptions, Person, ReturnDistribution,
    SimulationResult, SpendingModel, claiming_factor,
};

/// Claiming ages compared by the Social Security analysis.
pub const CLAIMING_AGES: [u32; 3] = [62, FULL_RETIREMENT_AGE, 70];
pub const DEFAULT_SIMULATIONS: u32 = 10_000;

/// Options for one Monte Carlo run. Anything left unset falls back to the
/// model's defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationRequest {
    /// Horizon in years; defaults to the longest remaining planning horizon in
    /// the household.
    pub years: Option<u32>,
    pub simulations: u32,
    pub seed: u64,
    pub assumptions: Option<MarketAssumptions>,
    pub market_periods: Option<MarketPeriodSpec>,
    pub spending_model: SpendingModel,
    pub return_distribution: ReturnDistribution,
    pub return_correlation: f64,
    pub effective_tax_rate: f64,
    pub state_tax_rate: f64,
}

impl Default for SimulationRequest {
    fn default() -> Self {
        Self {
            years: None,
            simulations: DEFAULT_SIMULATIONS,
            seed: DEFAULT_SEED,
            assumptions: None,
            market_periods: None,
            spending_model: SpendingModel::default(),
            return_distribution: ReturnDistribution::default(),
            return_correlation: 0.0,
            effective_tax_rate: DEFAULT_EFFECTIVE_TAX_RATE,
            state_tax_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimingStrategy {
    pub claiming_age: u32,
    pub benefit_factor: f64,
    pub annual_benefit: f64,
    pub years_collecting: u32,
    pub lifetime_benefits: f64,
    pub present_value: f64,
    /// Age at which cumulative benefits overtake claiming at 62.
    pub break_even_age: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocialSecurityAnalysis {
    pub name: String,
    pub current_age: u32,
    pub planning_age: u32,
    pub full_retirement_benefit: f64,
    pub discount_rate: f64,
    pub strategies: BTreeMap<String, ClaimingStrategy>,
    pub recommended_claiming_age: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RothConversionAnalysis {
    pub conversion_amount: f64,
    pub filing_status: FilingStatus,
    pub baseline_ordinary_income: f64,
    pub taxable_income_before: f64,
    pub taxable_income_after: f64,
    pub federal_tax_before: f64,
    pub federal_tax_after: f64,
    pub marginal_rate_before: f64,
    pub marginal_rate_after: f64,
    pub incremental_federal_tax: f64,
    pub incremental_state_tax: f64,
    pub total_incremental_tax: f64,
    pub effective_rate_on_conversion: f64,
    pub irmaa_before: f64,
    pub irmaa_after: f64,
    pub crosses_bracket: bool,
    pub years_of_growth: u32,
    pub projected_tax_free_value: f64,
}

/// Binds one household to a set of default market assumptions.
#[derive(Debug, Clone)]
pub struct RetirementModel {
    profile: FinancialProfile,
    assumptions: MarketAssumptions,
    as_of: NaiveDate,
    state_tax_rate: f64,
}

impl RetirementModel {
    pub fn new(profile: FinancialProfile, assumptions: MarketAssumptions) -> Self {
        Self {
            profile,
            assumptions,
            as_of: Utc::now().date_naive(),
            state_tax_rate: 0.0,
        }
    }

    /// Pins the reference date so results do not depend on the clock.
    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn with_state_tax_rate(mut self, state_tax_rate: f64) -> Self {
        self.state_tax_rate = state_tax_rate;
        self
    }

    pub fn profile(&self) -> &FinancialProfile {
        &self.profile
    }

    pub fn assumptions(&self) -> &MarketAssumptions {
        &self.assumptions
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn current_year(&self) -> i32 {
        self.as_of.year()
    }

    pub fn filing_status(&self) -> FilingStatus {
        FilingStatus::for_household(self.profile.is_couple())
    }

    pub fn calculate_life_expectancy_years(&self, person: &Person) -> u32 {
        person
            .life_expectancy()
            .saturating_sub(person.age_on(self.as_of))
    }

    /// Longest remaining planning horizon across the household, at least one
    /// year.
    pub fn default_horizon_years(&self) -> u32 {
        self.profile
            .members()
            .map(|person| self.calculate_life_expectancy_years(person))
            .max()
            .unwrap_or(0)
            .max(1)
    }

    pub fn simulation_config(
        &self,
        request: &SimulationRequest,
    ) -> Result<SimulationConfig, SimulationError> {
        self.profile.validate(self.as_of)?;
        let market_periods = request
            .market_periods
            .as_ref()
            .map(|spec| spec.rebased(self.current_year()))
            .transpose()?;
        Ok(SimulationConfig {
            years: request.years.unwrap_or_else(|| self.default_horizon_years()),
            simulations: request.simulations,
            seed: request.seed,
            start_year: self.current_year(),
            assumptions: request.assumptions.unwrap_or(self.assumptions),
            market_periods,
            spending_model: request.spending_model,
            return_distribution: request.return_distribution,
            return_correlation: request.return_correlation,
            effective_tax_rate: request.effective_tax_rate,
            state_tax_rate: request.state_tax_rate,
        })
    }

    pub fn monte_carlo_simulation(
        &self,
        request: &SimulationRequest,
    ) -> Result<SimulationResult, SimulationError> {
        let config = self.simulation_config(request)?;
        info!(
            person = %self.profile.person1.name,
            couple = self.profile.is_couple(),
            years = config.years,
            "running retirement simulation"
        );
        engine::simulate(&self.profile, &config)
    }

    pub fn solve_sustainable_spending(
        &self,
        request: &SimulationRequest,
        solve: SpendingSolveConfig,
    ) -> Result<SpendingSolveResult, SimulationError> {
        let config = self.simulation_config(request)?;
        solver::solve_sustainable_spending(&self.profile, &config, solve)
    }

    /// Household RMD on `balance` for an owner of `age`. A couple's balance is
    /// split into notional halves, each divided against the original balance.
    pub fn calculate_rmd(&self, age: u32, balance: f64) -> Result<f64, RmdError> {
        if !self.profile.is_couple() {
            return rmd::calculate_rmd(age, balance);
        }
        let half = balance * 0.5;
        Ok(rmd::calculate_rmd(age, half)? + rmd::calculate_rmd(age, half)?)
    }

    pub fn analyze_social_security_strategies(&self) -> BTreeMap<String, SocialSecurityAnalysis> {
        let discount_rate = self.assumptions.expected_real_return().max(-0.99);
        self.profile
            .members()
            .enumerate()
            .map(|(index, person)| {
                let key = format!("person{}", index + 1);
                (key, self.social_security_for(person, discount_rate))
            })
            .collect()
    }

    fn social_security_for(&self, person: &Person, discount_rate: f64) -> SocialSecurityAnalysis {
        let current_age = person.age_on(self.as_of);
        let planning_age = person.life_expectancy();
        let base = person.social_security.max(0.0);
        let earliest = CLAIMING_AGES[0];
        let earliest_benefit = base * claiming_factor(earliest);

        let strategies: BTreeMap<String, ClaimingStrategy> = CLAIMING_AGES
            .iter()
            .filter(|&&age| age >= current_age)
            .map(|&claiming_age| {
                let benefit_factor = claiming_factor(claiming_age);
                let annual_benefit = base * benefit_factor;
                let years_collecting = planning_age.saturating_sub(claiming_age);
                let present_value = (0..years_collecting)
                    .map(|k| {
                        let t = (claiming_age + k - current_age) as i32;
                        annual_benefit / (1.0 + discount_rate).powi(t)
                    })
                    .sum();
                let break_even_age = if claiming_age == earliest {
                    None
                } else {
                    break_even(earliest, earliest_benefit, claiming_age, annual_benefit)
                };
                let strategy = ClaimingStrategy {
                    claiming_age,
                    benefit_factor,
                    annual_benefit,
                    years_collecting,
                    lifetime_benefits: annual_benefit * years_collecting as f64,
                    present_value,
                    break_even_age,
                };
                (format!("claim_at_{claiming_age}"), strategy)
            })
            .collect();

        let recommended_claiming_age = strategies
            .values()
            .max_by(|a, b| a.present_value.total_cmp(&b.present_value))
            .map(|strategy| strategy.claiming_age);

        SocialSecurityAnalysis {
            name: person.name.clone(),
            current_age,
            planning_age,
            full_retirement_benefit: base,
            discount_rate,
            strategies,
            recommended_claiming_age,
        }
    }

    /// Tax impact of converting `amount` from traditional to Roth this year.
    pub fn analyze_roth_conversion(
        &self,
        amount: f64,
    ) -> Result<RothConversionAnalysis, ProfileError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(ProfileError::NegativeAmount {
                field: "conversion_amount".to_string(),
                value: amount,
            });
        }
        let status = self.filing_status();
        let year = self.current_year();
        let deduction = tax::standard_deduction(status);
        let members: Vec<&Person> = self.profile.members().collect();

        let benefits: f64 = members
            .iter()
            .filter(|person| person.age_in_year(year) >= person.claiming_age())
            .map(|person| person.claimed_benefit())
            .sum();
        let pension = if self.profile.person1.is_retired_in(year) {
            self.profile.pension_annual
        } else {
            0.0
        };
        let streams: f64 = self
            .profile
            .income_streams
            .iter()
            .filter(|stream| stream.applies_in(0))
            .map(|stream| stream.annual_amount.max(0.0))
            .sum();
        let owners: Vec<RmdOwner> = members
            .iter()
            .map(|person| {
                RmdOwner::new(
                    person.age_in_year(year),
                    person.birth_year(),
                    1.0 / members.len() as f64,
                )
            })
            .collect();
        let required = rmd::household_rmd(&owners, self.profile.pre_tax_balance());
        let baseline = pension + streams + required;

        let taxable_income = |ordinary: f64| {
            let taxable_ss = tax::taxable_social_security_on(ordinary, benefits, status);
            let magi = ordinary + taxable_ss;
            ((magi - deduction).max(0.0), magi)
        };
        let (taxable_before, magi_before) = taxable_income(baseline);
        let (taxable_after, magi_after) = taxable_income(baseline + amount);
        let (federal_before, marginal_before) = tax::federal_tax_on(taxable_before, status);
        let (federal_after, marginal_after) = tax::federal_tax_on(taxable_after, status);

        let on_medicare = members
            .iter()
            .filter(|person| person.age_in_year(year) >= MEDICARE_AGE)
            .count();
        let irmaa = |magi: f64| match on_medicare {
            0 => 0.0,
            n => tax::irmaa_surcharge_on(magi, status, n > 1 && n == members.len()),
        };

        let incremental_federal_tax = (federal_after - federal_before).max(0.0);
        let incremental_state_tax = amount * self.state_tax_rate.max(0.0);
        let total_incremental_tax = incremental_federal_tax + incremental_state_tax;
        let years_of_growth = self.calculate_life_expectancy_years(&self.profile.person1);
        let growth = 1.0 + self.assumptions.expected_nominal_return();

        Ok(RothConversionAnalysis {
            conversion_amount: amount,
            filing_status: status,
            baseline_ordinary_income: baseline,
            taxable_income_before: taxable_before,
            taxable_income_after: taxable_after,
            federal_tax_before: federal_before,
            federal_tax_after: federal_after,
            marginal_rate_before: marginal_before,
            marginal_rate_after: marginal_after,
            incremental_federal_tax,
            incremental_state_tax,
            total_incremental_tax,
            effective_rate_on_conversion: if amount > 0.0 {
                total_incremental_tax / amount
            } else {
                0.0
            },
            irmaa_before: irmaa(magi_before),
            irmaa_after: irmaa(magi_after),
            crosses_bracket: marginal_after > marginal_before,
            years_of_growth,
            projected_tax_free_value: amount * growth.max(0.0).powi(years_of_growth as i32),
        })
    }
}

fn break_even(
    early_age: u32,
    early_benefit: f64,
    late_age: u32,
    late_benefit: f64,
) -> Option<f64> {
    if late_benefit <= early_benefit {
        return None;
    }
    let age = (late_benefit * late_age as f64 - early_benefit * early_age as f64)
        / (late_benefit - early_benefit);
    Some((age * 10.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PeriodSpecError;
    use crate::core::periods::MarketPeriod;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn basic_profile() -> FinancialProfile {
        serde_json::from_value(serde_json::json!({
            "person1": {
                "name": "P1",
                "birth_date": "1960-01-01",
                "retirement_date": "2025-01-01",
                "social_security": 24000
            },
            "person2": {
                "name": "P2",
                "birth_date": "1962-01-01",
                "retirement_date": "2027-01-01",
                "social_security": 21600
            },
            "liquid_assets": 50000,
            "traditional_ira": 500000,
            "roth_ira": 100000,
            "annual_expenses": 60000,
            "target_annual_income": 60000,
            "asset_allocation": {"stocks": 0.6, "bonds": 0.4}
        }))
        .expect("profile should parse")
    }

    fn basic_model() -> RetirementModel {
        RetirementModel::new(basic_profile(), MarketAssumptions::default())
            .with_as_of(date(2026, 1, 1))
    }

    fn single_model() -> RetirementModel {
        let mut profile = basic_profile();
        profile.person2 = None;
        RetirementModel::new(profile, MarketAssumptions::default()).with_as_of(date(2026, 1, 1))
    }

    #[test]
    fn rmd_is_identical_for_single_and_couple() {
        let couple = basic_model().calculate_rmd(76, 1_000_000.0).expect("in table");
        let single = single_model().calculate_rmd(76, 1_000_000.0).expect("in table");
        assert!((couple - 42_194.09).abs() < 0.01);
        assert_approx(couple, single);
        assert_eq!(
            basic_model().calculate_rmd(60, 1_000_000.0),
            Err(RmdError::AgeOutsideTable { age: 60 })
        );
    }

    #[test]
    fn life_expectancy_and_horizon_follow_the_reference_date() {
        let model = basic_model();
        let profile = model.profile();
        assert_eq!(model.calculate_life_expectancy_years(&profile.person1), 29);
        let p2 = profile.person2.as_ref().expect("spouse present");
        assert_eq!(model.calculate_life_expectancy_years(p2), 31);
        assert_eq!(model.default_horizon_years(), 31);
    }

    #[test]
    fn simulation_returns_requested_horizon() {
        let model = basic_model();
        let request = SimulationRequest {
            years: Some(20),
            simulations: 100,
            ..SimulationRequest::default()
        };
        let result = model.monte_carlo_simulation(&request).expect("simulation runs");
        assert!((0.0..=1.0).contains(&result.success_rate));
        assert!(result.starting_portfolio > 0.0);
        assert_eq!(result.timeline.years.len(), 20);
        assert_eq!(result.timeline.years[0], 2026);
        assert_eq!(result.simulations, 100);
    }

    #[test]
    fn calendar_year_periods_are_accepted() {
        let model = basic_model();
        let crash = MarketAssumptions {
            stock_return_mean: -0.30,
            stock_return_std: 0.38,
            bond_return_mean: 0.055,
            bond_return_std: 0.08,
            inflation_mean: -0.004,
            inflation_std: 0.01,
            equity_allocation: 0.7,
        };
        let request = SimulationRequest {
            years: Some(20),
            simulations: 100,
            market_periods: Some(MarketPeriodSpec::Timeline {
                periods: vec![
                    MarketPeriod {
                        start_year: 2026,
                        end_year: 2030,
                        assumptions: crash,
                    },
                    MarketPeriod {
                        start_year: 2031,
                        end_year: 2045,
                        assumptions: MarketAssumptions::default(),
                    },
                ],
            }),
            ..SimulationRequest::default()
        };
        let config = model.simulation_config(&request).expect("valid request");
        let Some(MarketPeriodSpec::Timeline { periods }) = &config.market_periods else {
            panic!("timeline expected");
        };
        assert_eq!((periods[0].start_year, periods[0].end_year), (0, 4));
        assert_eq!((periods[1].start_year, periods[1].end_year), (5, 19));

        let result = model.monte_carlo_simulation(&request).expect("simulation runs");
        assert_eq!(result.timeline.len(), 20);
    }

    #[test]
    fn inverted_calendar_period_fails_the_simulation() {
        let model = basic_model();
        let request = SimulationRequest {
            years: Some(20),
            simulations: 100,
            market_periods: Some(MarketPeriodSpec::Timeline {
                periods: vec![
                    MarketPeriod {
                        start_year: 2030,
                        end_year: 2000,
                        assumptions: MarketAssumptions::default(),
                    },
                    MarketPeriod {
                        start_year: 2031,
                        end_year: 2045,
                        assumptions: MarketAssumptions::default(),
                    },
                ],
            }),
            ..SimulationRequest::default()
        };
        assert!(matches!(
            model.monte_carlo_simulation(&request),
            Err(SimulationError::Periods(PeriodSpecError::InvertedPeriod { index: 0, .. }))
        ));
    }

    #[test]
    fn invalid_profile_is_rejected_before_simulating() {
        let mut profile = basic_profile();
        profile.liquid_assets = -10.0;
        let model = RetirementModel::new(profile, MarketAssumptions::default())
            .with_as_of(date(2026, 1, 1));
        assert!(matches!(
            model.monte_carlo_simulation(&SimulationRequest::default()),
            Err(SimulationError::Profile(ProfileError::NegativeAmount { .. }))
        ));
    }

    #[test]
    fn social_security_strategies_cover_each_person() {
        let analysis = basic_model().analyze_social_security_strategies();
        assert_eq!(analysis.len(), 2);

        // P1 is 66, so claiming at 62 is no longer available.
        let p1 = &analysis["person1"];
        assert_eq!(p1.current_age, 66);
        assert!(!p1.strategies.contains_key("claim_at_62"));
        assert!(p1.strategies.contains_key("claim_at_67"));
        assert!(p1.strategies.contains_key("claim_at_70"));

        let p2 = &analysis["person2"];
        assert_eq!(p2.current_age, 64);
        assert!(!p2.strategies.contains_key("claim_at_62"));
        let at_70 = &p2.strategies["claim_at_70"];
        assert_approx(at_70.annual_benefit, 21_600.0 * 1.24);
        assert_eq!(at_70.years_collecting, 25);
        assert!(p2.recommended_claiming_age.is_some());
    }

    #[test]
    fn break_even_against_early_claiming() {
        let mut profile = basic_profile();
        profile.person1.birth_date = date(1970, 1, 1);
        profile.person2 = None;
        let model = RetirementModel::new(profile, MarketAssumptions::default())
            .with_as_of(date(2026, 1, 1));
        let analysis = model.analyze_social_security_strategies();
        let person = &analysis["person1"];
        assert_eq!(person.strategies.len(), 3);

        let early = &person.strategies["claim_at_62"];
        assert_approx(early.annual_benefit, 24_000.0 * 0.70);
        assert_eq!(early.break_even_age, None);

        // 16,800 * (x - 62) = 24,000 * (x - 67)  =>  x = 78.7
        let full = &person.strategies["claim_at_67"];
        assert_eq!(full.break_even_age, Some(78.7));
        assert!(person.strategies["claim_at_70"].lifetime_benefits > early.lifetime_benefits);
    }

    #[test]
    fn roth_conversion_reports_incremental_tax() {
        let model = single_model().with_state_tax_rate(0.05);
        let analysis = model.analyze_roth_conversion(50_000.0).expect("valid amount");
        assert_eq!(analysis.filing_status, FilingStatus::Single);
        assert!(analysis.federal_tax_after > analysis.federal_tax_before);
        assert_approx(
            analysis.incremental_federal_tax,
            analysis.federal_tax_after - analysis.federal_tax_before,
        );
        assert_approx(analysis.incremental_state_tax, 2_500.0);
        assert!(analysis.effective_rate_on_conversion > 0.05);
        assert!(analysis.marginal_rate_after >= analysis.marginal_rate_before);
        assert!(analysis.projected_tax_free_value > 50_000.0);
        assert!(analysis.irmaa_after >= analysis.irmaa_before);
    }

    #[test]
    fn roth_conversion_crossing_into_higher_bracket() {
        let model = basic_model();
        let small = model.analyze_roth_conversion(1_000.0).expect("valid amount");
        let large = model.analyze_roth_conversion(400_000.0).expect("valid amount");
        assert!(large.crosses_bracket);
        assert!(large.marginal_rate_after > small.marginal_rate_after);
        assert!(large.irmaa_after > 0.0);
        assert!(model.analyze_roth_conversion(-1.0).is_err());
    }

    #[test]
    fn sustainable_spending_is_exposed_through_the_model() {
        let model = single_model();
        let request = SimulationRequest {
            years: Some(10),
            simulations: 100,
            ..SimulationRequest::default()
        };
        let solve = SpendingSolveConfig {
            target_success_rate: 0.8,
            search_max: 200_000.0,
            tolerance: 1_000.0,
            simulations_per_iteration: 100,
            final_simulations: 200,
            ..SpendingSolveConfig::default()
        };
        let result = model
            .solve_sustainable_spending(&request, solve)
            .expect("solver runs");
        assert!(result.feasible);
        let spending = result.solved_spending.expect("solution expected");
        assert!(spending > 0.0 && spending < 200_000.0, "spending {spending}");
    }

    #[test]
    fn request_json_merges_onto_defaults() {
        let request: SimulationRequest =
            serde_json::from_str(r#"{"simulations": 500, "spending_model": {"model": "constant_nominal"}}"#)
                .expect("request should parse");
        assert_eq!(request.simulations, 500);
        assert_eq!(request.spending_model, SpendingModel::ConstantNominal);
        assert_eq!(request.seed, DEFAULT_SEED);
        assert_eq!(request.effective_tax_rate, DEFAULT_EFFECTIVE_TAX_RATE);
    }
}
