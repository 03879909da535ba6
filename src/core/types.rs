use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::error::ProfileError;

/// Social Security full retirement age for everyone born 1960 or later.
pub const FULL_RETIREMENT_AGE: u32 = 67;
/// Planning age used when a person carries no explicit life expectancy.
pub const DEFAULT_PLANNING_AGE: u32 = 95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub birth_date: NaiveDate,
    pub retirement_date: NaiveDate,
    /// Annual benefit payable at full retirement age, in today's dollars.
    #[serde(default)]
    pub social_security: f64,
    #[serde(default)]
    pub social_security_claiming_age: Option<u32>,
    #[serde(default)]
    pub life_expectancy: Option<u32>,
}

impl Person {
    pub fn new(
        name: impl Into<String>,
        birth_date: NaiveDate,
        retirement_date: NaiveDate,
        social_security: f64,
    ) -> Self {
        Self {
            name: name.into(),
            birth_date,
            retirement_date,
            social_security,
            social_security_claiming_age: None,
            life_expectancy: None,
        }
    }

    pub fn birth_year(&self) -> i32 {
        self.birth_date.year()
    }

    pub fn retirement_year(&self) -> i32 {
        self.retirement_date.year()
    }

    /// Completed years of age on `date`.
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        let mut age = date.year() - self.birth_date.year();
        if (date.month(), date.day()) < (self.birth_date.month(), self.birth_date.day()) {
            age -= 1;
        }
        age.max(0) as u32
    }

    /// Age attained during calendar `year`; this is the age the IRS uses for
    /// RMDs and the age the simulator uses for every per-year rule.
    pub fn age_in_year(&self, year: i32) -> u32 {
        (year - self.birth_year()).max(0) as u32
    }

    pub fn is_retired_in(&self, year: i32) -> bool {
        year >= self.retirement_year()
    }

    pub fn years_to_retirement(&self, as_of: NaiveDate) -> u32 {
        (self.retirement_year() - as_of.year()).max(0) as u32
    }

    pub fn life_expectancy(&self) -> u32 {
        self.life_expectancy.unwrap_or(DEFAULT_PLANNING_AGE)
    }

    pub fn years_in_retirement(&self, as_of: NaiveDate) -> u32 {
        let final_year = self.birth_year() + self.life_expectancy() as i32;
        let start = self.retirement_year().max(as_of.year());
        (final_year - start).max(0) as u32
    }

    pub fn claiming_age(&self) -> u32 {
        self.social_security_claiming_age
            .unwrap_or(FULL_RETIREMENT_AGE)
    }

    /// Annual benefit in today's dollars once claimed.
    pub fn claimed_benefit(&self) -> f64 {
        self.social_security * claiming_factor(self.claiming_age())
    }
}

/// Benefit multiplier for claiming at `claiming_age` relative to full
/// retirement age: 5/9% per month for the first 36 months early, 5/12% per
/// month beyond that, and 8% per year of delay up to age 70.
pub fn claiming_factor(claiming_age: u32) -> f64 {
    let months = (claiming_age as i64 - FULL_RETIREMENT_AGE as i64) * 12;
    if months < 0 {
        let early = -months;
        let first = early.min(36) as f64;
        let beyond = (early - 36).max(0) as f64;
        (1.0 - first * 5.0 / 900.0 - beyond * 5.0 / 1200.0).max(0.0)
    } else {
        let delayed = months.min(36) as f64;
        1.0 + delayed / 12.0 * 0.08
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetAllocation {
    #[serde(default)]
    pub stocks: f64,
    #[serde(default)]
    pub bonds: f64,
}

impl Default for AssetAllocation {
    fn default() -> Self {
        Self {
            stocks: 0.6,
            bonds: 0.4,
        }
    }
}

impl AssetAllocation {
    /// Share left uninvested as cash.
    pub fn cash(&self) -> f64 {
        (1.0 - self.stocks - self.bonds).max(0.0)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    #[default]
    #[serde(alias = "yearly")]
    Annual,
}

impl Frequency {
    pub fn periods_per_year(self) -> f64 {
        match self {
            Frequency::Weekly => 52.0,
            Frequency::Monthly => 12.0,
            Frequency::Quarterly => 4.0,
            Frequency::Annual => 1.0,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetItem {
    pub amount: f64,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default = "default_true")]
    pub inflation_adjusted: bool,
}

impl BudgetItem {
    pub fn annual_amount(&self) -> f64 {
        self.amount * self.frequency.periods_per_year()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetExpenses {
    #[serde(default)]
    pub current: BTreeMap<String, BudgetItem>,
    #[serde(default)]
    pub future: BTreeMap<String, BudgetItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default)]
    pub expenses: BudgetExpenses,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureExpense {
    pub name: String,
    pub amount: f64,
    /// Simulation year (0 = the reference year).
    pub start_year: u32,
    #[serde(default)]
    pub end_year: Option<u32>,
    #[serde(default = "default_true")]
    pub inflation_adjusted: bool,
}

impl FutureExpense {
    pub fn applies_in(&self, year: u32) -> bool {
        year >= self.start_year && year <= self.end_year.unwrap_or(self.start_year)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeKind {
    Wages,
    Pension,
    Rental,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeStream {
    pub name: String,
    pub annual_amount: f64,
    #[serde(default)]
    pub start_year: u32,
    #[serde(default)]
    pub end_year: Option<u32>,
    #[serde(default)]
    pub kind: IncomeKind,
    #[serde(default = "default_true")]
    pub inflation_adjusted: bool,
}

impl IncomeStream {
    pub fn applies_in(&self, year: u32) -> bool {
        year >= self.start_year && self.end_year.is_none_or(|end| year <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentHolding {
    pub account: String,
    pub value: f64,
    #[serde(default)]
    pub cost_basis: Option<f64>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl InvestmentHolding {
    fn is_tax_advantaged(&self) -> bool {
        let label = format!(
            "{} {}",
            self.account.to_lowercase(),
            self.kind.as_deref().unwrap_or("").to_lowercase()
        );
        ["ira", "roth", "401", "403", "457", "pension", "traditional"]
            .iter()
            .any(|marker| label.contains(marker))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    pub name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeProperty {
    pub name: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub mortgage_balance: f64,
}

/// A fully materialized, decrypted household profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialProfile {
    pub person1: Person,
    #[serde(default)]
    pub person2: Option<Person>,
    #[serde(default)]
    pub children: Vec<Child>,
    #[serde(default)]
    pub liquid_assets: f64,
    #[serde(default)]
    pub traditional_ira: f64,
    #[serde(default)]
    pub roth_ira: f64,
    #[serde(default)]
    pub pension_lump_sum: f64,
    #[serde(default)]
    pub pension_annual: f64,
    #[serde(default)]
    pub annual_expenses: f64,
    #[serde(default)]
    pub target_annual_income: f64,
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
    #[serde(default)]
    pub asset_allocation: AssetAllocation,
    #[serde(default)]
    pub future_expenses: Vec<FutureExpense>,
    #[serde(default)]
    pub investment_types: Vec<InvestmentHolding>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub income_streams: Vec<IncomeStream>,
    #[serde(default)]
    pub home_properties: Vec<HomeProperty>,
    #[serde(default)]
    pub budget: Option<Budget>,
}

/// One line of resolved spending, in today's dollars per year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendingLine {
    pub annual: f64,
    pub inflation_adjusted: bool,
}

/// Where the year's required spending comes from. Resolved once per
/// simulation so the per-year loop never re-checks the budget override.
#[derive(Debug, Clone, PartialEq)]
pub enum SpendingPlan {
    Flat {
        annual: f64,
    },
    Budget {
        current: Vec<SpendingLine>,
        future: Vec<SpendingLine>,
    },
}

impl SpendingPlan {
    /// Spending for the year in nominal dollars, given whether the household
    /// has reached retirement and the path's cumulative price index.
    pub fn nominal_for(&self, retired: bool, price_index: f64) -> f64 {
        match self {
            SpendingPlan::Flat { annual } => annual * price_index,
            SpendingPlan::Budget { current, future } => {
                let lines = if retired && !future.is_empty() {
                    future
                } else {
                    current
                };
                lines
                    .iter()
                    .map(|line| {
                        if line.inflation_adjusted {
                            line.annual * price_index
                        } else {
                            line.annual
                        }
                    })
                    .sum()
            }
        }
    }

    /// Spending in today's dollars for the phase.
    pub fn base_for(&self, retired: bool) -> f64 {
        self.nominal_for(retired, 1.0)
    }
}

impl FinancialProfile {
    pub fn members(&self) -> impl Iterator<Item = &Person> {
        std::iter::once(&self.person1).chain(self.person2.iter())
    }

    pub fn is_couple(&self) -> bool {
        self.person2.is_some()
    }

    /// Total investable balance at the start of the simulation.
    pub fn starting_portfolio(&self) -> f64 {
        self.liquid_assets + self.traditional_ira + self.roth_ira + self.pension_lump_sum
    }

    /// Pre-tax balance; the pension lump sum is treated as rolled over.
    pub fn pre_tax_balance(&self) -> f64 {
        self.traditional_ira + self.pension_lump_sum
    }

    /// Cost basis of the liquid pool, scaled from the taxable holdings listed in
    /// `investment_types`. Without any taxable holdings the pool carries no
    /// embedded gain.
    pub fn liquid_cost_basis(&self) -> f64 {
        let (value, basis) = self
            .investment_types
            .iter()
            .filter(|holding| !holding.is_tax_advantaged())
            .fold((0.0, 0.0), |(value, basis), holding| {
                let v = holding.value.max(0.0);
                (value + v, basis + holding.cost_basis.unwrap_or(v).max(0.0))
            });
        if value <= 0.0 {
            return self.liquid_assets;
        }
        self.liquid_assets * (basis / value).clamp(0.0, 1.0)
    }

    pub fn spending_plan(&self) -> SpendingPlan {
        let to_lines = |items: &BTreeMap<String, BudgetItem>| {
            items
                .values()
                .map(|item| SpendingLine {
                    annual: item.annual_amount().max(0.0),
                    inflation_adjusted: item.inflation_adjusted,
                })
                .collect::<Vec<_>>()
        };

        match &self.budget {
            Some(budget) => SpendingPlan::Budget {
                current: to_lines(&budget.expenses.current),
                future: to_lines(&budget.expenses.future),
            },
            None => {
                let annual = if self.target_annual_income > 0.0 {
                    self.target_annual_income
                } else {
                    self.annual_expenses
                };
                SpendingPlan::Flat {
                    annual: annual.max(0.0),
                }
            }
        }
    }

    pub fn validate(&self, as_of: NaiveDate) -> Result<(), ProfileError> {
        for (field, value) in [
            ("liquid_assets", self.liquid_assets),
            ("traditional_ira", self.traditional_ira),
            ("roth_ira", self.roth_ira),
            ("pension_lump_sum", self.pension_lump_sum),
            ("pension_annual", self.pension_annual),
            ("annual_expenses", self.annual_expenses),
            ("target_annual_income", self.target_annual_income),
        ] {
            check_amount(field, value)?;
        }

        for person in self.members() {
            check_amount(&format!("{}.social_security", person.name), person.social_security)?;
            if person.birth_date > as_of {
                return Err(ProfileError::BornInFuture {
                    name: person.name.clone(),
                    birth_date: person.birth_date,
                    as_of,
                });
            }
        }

        let allocation = self.asset_allocation;
        if !(0.0..=1.0).contains(&allocation.stocks) || !(0.0..=1.0).contains(&allocation.bonds) {
            return Err(ProfileError::AllocationOutOfRange);
        }
        let sum = allocation.stocks + allocation.bonds;
        if sum > 1.0 + 1e-9 {
            return Err(ProfileError::AllocationOverweight { sum });
        }

        if let Some(budget) = &self.budget {
            for (category, item) in budget
                .expenses
                .current
                .iter()
                .chain(budget.expenses.future.iter())
            {
                check_amount(&format!("budget.{category}.amount"), item.amount)?;
            }
        }

        for expense in &self.future_expenses {
            check_amount(&format!("future_expenses.{}.amount", expense.name), expense.amount)?;
            match expense.end_year {
                Some(end_year) if end_year < expense.start_year => {
                    return Err(ProfileError::InvertedWindow {
                        what: "future expense",
                        name: expense.name.clone(),
                        start_year: expense.start_year,
                        end_year,
                    });
                }
                _ => {}
            }
        }

        for stream in &self.income_streams {
            check_amount(
                &format!("income_streams.{}.annual_amount", stream.name),
                stream.annual_amount,
            )?;
            match stream.end_year {
                Some(end_year) if end_year < stream.start_year => {
                    return Err(ProfileError::InvertedWindow {
                        what: "income stream",
                        name: stream.name.clone(),
                        start_year: stream.start_year,
                        end_year,
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn check_amount(field: &str, value: f64) -> Result<(), ProfileError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ProfileError::NegativeAmount {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

fn default_equity_allocation() -> f64 {
    0.70
}

/// Annual arithmetic-mean return and inflation parameters for one regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketAssumptions {
    pub stock_return_mean: f64,
    pub stock_return_std: f64,
    pub bond_return_mean: f64,
    pub bond_return_std: f64,
    pub inflation_mean: f64,
    pub inflation_std: f64,
    #[serde(default = "default_equity_allocation")]
    pub equity_allocation: f64,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            stock_return_mean: 0.10,
            stock_return_std: 0.18,
            bond_return_mean: 0.04,
            bond_return_std: 0.06,
            inflation_mean: 0.03,
            inflation_std: 0.02,
            equity_allocation: default_equity_allocation(),
        }
    }
}

impl MarketAssumptions {
    pub fn expected_nominal_return(&self) -> f64 {
        let equity = self.equity_allocation.clamp(0.0, 1.0);
        equity * self.stock_return_mean + (1.0 - equity) * self.bond_return_mean
    }

    pub fn expected_real_return(&self) -> f64 {
        (1.0 + self.expected_nominal_return()) / (1.0 + self.inflation_mean) - 1.0
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnDistribution {
    #[default]
    Normal,
    LogNormal,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardrailRules {
    pub bad_year_threshold: f64,
    pub good_year_threshold: f64,
    pub bad_year_cut: f64,
    pub good_year_raise: f64,
    pub min_spending_floor: f64,
    pub max_spending_ceiling: f64,
}

impl Default for GuardrailRules {
    fn default() -> Self {
        Self {
            bad_year_threshold: -0.05,
            good_year_threshold: 0.10,
            bad_year_cut: 0.10,
            good_year_raise: 0.05,
            min_spending_floor: 0.80,
            max_spending_ceiling: 1.50,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "model")]
pub enum SpendingModel {
    #[default]
    ConstantReal,
    ConstantNominal,
    Guardrails(GuardrailRules),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub years: Vec<i32>,
    pub p10: Vec<f64>,
    pub p25: Vec<f64>,
    pub median: Vec<f64>,
    pub p75: Vec<f64>,
    pub p90: Vec<f64>,
    pub median_withdrawal: Vec<f64>,
    pub median_tax: Vec<f64>,
    pub median_spending: Vec<f64>,
    pub survival_rate: Vec<f64>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub success_rate: f64,
    pub starting_portfolio: f64,
    pub median_final_balance: f64,
    pub final_balance_percentiles: Percentiles,
    pub timeline: Timeline,
    pub warnings: Vec<String>,
    pub simulations: u32,
    pub years: u32,
    pub seed: u64,
}
