use thiserror::Error;

/// Structural problems in a market period spec. These abort before any lookup
/// table is built; advisory problems are reported by `periods::validate`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeriodSpecError {
    #[error("timeline must contain at least one period")]
    EmptyTimeline,
    #[error("cycle pattern must contain at least one entry")]
    EmptyPattern,
    #[error("period {index}: end_year {end_year} is before start_year {start_year}")]
    InvertedPeriod {
        index: usize,
        start_year: u32,
        end_year: u32,
    },
    #[error("periods {first} and {second} overlap in year {year}")]
    OverlappingPeriods {
        first: usize,
        second: usize,
        year: u32,
    },
    #[error(
        "period {index}: start_year {start_year} and end_year {end_year} mix offsets with calendar years"
    )]
    MixedYearConvention {
        index: usize,
        start_year: u32,
        end_year: u32,
    },
    #[error("every timeline period ended before {base_year}")]
    AllPeriodsEnded { base_year: i32 },
    #[error("pattern entry {index}: duration must be >= 1 year")]
    ZeroDuration { index: usize },
    #[error("{location}: {field} must be {requirement}, got {value}")]
    InvalidAssumption {
        location: String,
        field: &'static str,
        requirement: &'static str,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RmdError {
    #[error("age {age} is outside the Uniform Lifetime Table (72 and over)")]
    AgeOutsideTable { age: u32 },
    #[error("pre-tax balance must be finite and >= 0, got {balance}")]
    InvalidBalance { balance: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("{field} must be finite and >= 0, got {value}")]
    NegativeAmount { field: String, value: f64 },
    #[error("asset allocation weights must each be between 0 and 1")]
    AllocationOutOfRange,
    #[error("asset allocation weights sum to {sum}, which exceeds 1.0")]
    AllocationOverweight { sum: f64 },
    #[error("{what} '{name}': end_year {end_year} is before start_year {start_year}")]
    InvertedWindow {
        what: &'static str,
        name: String,
        start_year: u32,
        end_year: u32,
    },
    #[error("birth date {birth_date} of {name} is after the reference date {as_of}")]
    BornInFuture {
        name: String,
        birth_date: chrono::NaiveDate,
        as_of: chrono::NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("years must be > 0")]
    ZeroYears,
    #[error("simulations must be > 0")]
    ZeroSimulations,
    #[error("effective tax rate must be in [0, 1), got {0}")]
    EffectiveTaxRate(f64),
    #[error("state tax rate must be in [0, 1), got {0}")]
    StateTaxRate(f64),
    #[error("return correlation must be between -1 and 1, got {0}")]
    Correlation(f64),
    #[error("default market assumptions: {0}")]
    DefaultAssumptions(String),
    #[error("spending solver: {0}")]
    Solver(String),
    #[error(transparent)]
    Periods(#[from] PeriodSpecError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Rmd(#[from] RmdError),
}
