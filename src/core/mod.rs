mod engine;
mod error;
mod model;
mod periods;
mod rmd;
mod solver;
mod tax;
mod types;

pub use engine::{DEFAULT_EFFECTIVE_TAX_RATE, DEFAULT_SEED, SimulationConfig, simulate};
pub use error::{PeriodSpecError, ProfileError, RmdError, SimulationError};
pub use model::{
    CLAIMING_AGES, ClaimingStrategy, RetirementModel, RothConversionAnalysis, SimulationRequest,
    SocialSecurityAnalysis,
};
pub use periods::{CycleEntry, MarketPeriod, MarketPeriodSpec};
pub use rmd::{RmdOwner, calculate_rmd, household_rmd, rmd_start_age};
pub use solver::{
    SpendingSolveConfig, SpendingSolveIteration, SpendingSolveResult, solve_sustainable_spending,
};
pub use tax::{
    FilingStatus, employment_tax, federal_tax, fica_tax, irmaa_surcharge, ltcg_tax,
    standard_deduction, taxable_social_security,
};
pub use types::{
    Account, AssetAllocation, Budget, BudgetExpenses, BudgetItem, Child, FinancialProfile,
    Frequency, FutureExpense, GuardrailRules, HomeProperty, IncomeKind, IncomeStream,
    InvestmentHolding, MarketAssumptions, Percentiles, Person, ReturnDistribution, RiskTolerance,
    SimulationResult, SpendingModel, Timeline,
};
pub use periods::validate as validate_market_periods;
