use serde::{Deserialize, Serialize};

use super::error::PeriodSpecError;
use super::types::MarketAssumptions;

/// Stock mean below which a year counts toward a recession stretch.
pub const RECESSION_STOCK_MEAN: f64 = 0.05;
/// Stock mean above which a year counts toward a bull-market stretch.
pub const BULL_STOCK_MEAN: f64 = 0.15;
const MAX_RECESSION_YEARS: usize = 5;
const MAX_BULL_YEARS: usize = 15;
const SINGLE_CONDITION_SHARE: f64 = 0.80;
const MIN_AVERAGE_CYCLE_YEARS: f64 = 2.0;
/// Period years at or above this value are calendar years, not offsets.
const CALENDAR_YEAR_FLOOR: u32 = 1900;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPeriod {
    pub start_year: u32,
    pub end_year: u32,
    pub assumptions: MarketAssumptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEntry {
    pub duration: u32,
    pub assumptions: MarketAssumptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketPeriodSpec {
    Timeline {
        periods: Vec<MarketPeriod>,
    },
    Cycle {
        pattern: Vec<CycleEntry>,
        #[serde(default)]
        repeat: bool,
    },
}

impl MarketPeriodSpec {
    /// Converts calendar-year timeline periods into offsets from `base_year`.
    /// Periods that ended before `base_year` are dropped and ones straddling it
    /// are clipped to start at year 0. Offsets are left untouched.
    ///
    /// Inverted periods and periods mixing offsets with calendar years are
    /// rejected here, before dropping could hide them.
    pub fn rebased(&self, base_year: i32) -> Result<MarketPeriodSpec, PeriodSpecError> {
        let MarketPeriodSpec::Timeline { periods } = self else {
            return Ok(self.clone());
        };
        let base = base_year.max(0) as u32;
        let mut rebased = Vec::with_capacity(periods.len());
        for (index, period) in periods.iter().enumerate() {
            if period.end_year < period.start_year {
                return Err(PeriodSpecError::InvertedPeriod {
                    index,
                    start_year: period.start_year,
                    end_year: period.end_year,
                });
            }
            let calendar_start = period.start_year >= CALENDAR_YEAR_FLOOR;
            let calendar_end = period.end_year >= CALENDAR_YEAR_FLOOR;
            if calendar_start != calendar_end {
                return Err(PeriodSpecError::MixedYearConvention {
                    index,
                    start_year: period.start_year,
                    end_year: period.end_year,
                });
            }
            if !calendar_start {
                rebased.push(period.clone());
            } else if period.end_year >= base {
                rebased.push(MarketPeriod {
                    start_year: period.start_year.saturating_sub(base),
                    end_year: period.end_year - base,
                    assumptions: period.assumptions,
                });
            }
        }
        if rebased.is_empty() && !periods.is_empty() {
            return Err(PeriodSpecError::AllPeriodsEnded { base_year });
        }
        Ok(MarketPeriodSpec::Timeline { periods: rebased })
    }
}

/// Rejects structurally malformed specs before any lookup is built.
pub fn check(spec: &MarketPeriodSpec) -> Result<(), PeriodSpecError> {
    match spec {
        MarketPeriodSpec::Timeline { periods } => {
            if periods.is_empty() {
                return Err(PeriodSpecError::EmptyTimeline);
            }
            for (index, period) in periods.iter().enumerate() {
                if period.end_year < period.start_year {
                    return Err(PeriodSpecError::InvertedPeriod {
                        index,
                        start_year: period.start_year,
                        end_year: period.end_year,
                    });
                }
                check_assumptions(&format!("period {index}"), &period.assumptions)?;
            }

            let order = sorted_period_indices(periods);
            for pair in order.windows(2) {
                let (first, second) = (pair[0], pair[1]);
                if periods[second].start_year <= periods[first].end_year {
                    return Err(PeriodSpecError::OverlappingPeriods {
                        first,
                        second,
                        year: periods[second].start_year,
                    });
                }
            }
        }
        MarketPeriodSpec::Cycle { pattern, .. } => {
            if pattern.is_empty() {
                return Err(PeriodSpecError::EmptyPattern);
            }
            for (index, entry) in pattern.iter().enumerate() {
                if entry.duration == 0 {
                    return Err(PeriodSpecError::ZeroDuration { index });
                }
                check_assumptions(&format!("pattern entry {index}"), &entry.assumptions)?;
            }
        }
    }
    Ok(())
}

/// Validates a single set of assumptions; also used for the run-wide defaults.
pub fn check_assumptions(
    location: &str,
    assumptions: &MarketAssumptions,
) -> Result<(), PeriodSpecError> {
    let invalid = |field: &'static str, requirement: &'static str, value: f64| {
        PeriodSpecError::InvalidAssumption {
            location: location.to_string(),
            field,
            requirement,
            value,
        }
    };

    for (field, value) in [
        ("stock_return_mean", assumptions.stock_return_mean),
        ("bond_return_mean", assumptions.bond_return_mean),
        ("inflation_mean", assumptions.inflation_mean),
    ] {
        if !value.is_finite() || value <= -1.0 {
            return Err(invalid(field, "finite and greater than -1", value));
        }
    }

    for (field, value) in [
        ("stock_return_std", assumptions.stock_return_std),
        ("bond_return_std", assumptions.bond_return_std),
        ("inflation_std", assumptions.inflation_std),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(invalid(field, "finite and >= 0", value));
        }
    }

    if !(0.0..=1.0).contains(&assumptions.equity_allocation) {
        return Err(invalid(
            "equity_allocation",
            "between 0 and 1",
            assumptions.equity_allocation,
        ));
    }
    Ok(())
}

/// Expands `spec` into one set of assumptions per simulation year.
pub fn build_lookup(
    years: u32,
    spec: Option<&MarketPeriodSpec>,
    default_assumptions: &MarketAssumptions,
) -> Vec<MarketAssumptions> {
    layout(years, spec)
        .into_iter()
        .map(|slot| match (slot, spec) {
            (Some(index), Some(MarketPeriodSpec::Timeline { periods })) => {
                periods[index].assumptions
            }
            (Some(index), Some(MarketPeriodSpec::Cycle { pattern, .. })) => {
                pattern[index].assumptions
            }
            _ => *default_assumptions,
        })
        .collect()
}

/// Advisory checks for unrealistic regimes. Never fails.
pub fn validate(years: u32, spec: &MarketPeriodSpec) -> Vec<String> {
    let mut warnings = Vec::new();
    if years == 0 {
        return warnings;
    }

    let slots = layout(years, Some(spec));
    let stock_means: Vec<Option<f64>> = slots
        .iter()
        .map(|slot| {
            slot.map(|index| match spec {
                MarketPeriodSpec::Timeline { periods } => periods[index].assumptions,
                MarketPeriodSpec::Cycle { pattern, .. } => pattern[index].assumptions,
            })
            .map(|assumptions| assumptions.stock_return_mean)
        })
        .collect();

    for (start, len) in stretches(&stock_means, |mean| mean < RECESSION_STOCK_MEAN) {
        if len > MAX_RECESSION_YEARS {
            warnings.push(format!(
                "Prolonged recession: {len} consecutive years (years {start}-{}) with stock returns below {:.0}%; historical recessions rarely last more than {MAX_RECESSION_YEARS} years",
                start + len - 1,
                RECESSION_STOCK_MEAN * 100.0
            ));
        }
    }

    for (start, len) in stretches(&stock_means, |mean| mean > BULL_STOCK_MEAN) {
        if len > MAX_BULL_YEARS {
            warnings.push(format!(
                "Extended bull market: {len} consecutive years (years {start}-{}) with stock returns above {:.0}%; sustained bull markets rarely exceed {MAX_BULL_YEARS} years",
                start + len - 1,
                BULL_STOCK_MEAN * 100.0
            ));
        }
    }

    let entries = match spec {
        MarketPeriodSpec::Timeline { periods } => periods.len(),
        MarketPeriodSpec::Cycle { pattern, .. } => pattern.len(),
    };
    let mut covered = vec![0_usize; entries];
    for index in slots.iter().flatten() {
        covered[*index] += 1;
    }
    for (index, count) in covered.iter().enumerate() {
        let share = *count as f64 / years as f64;
        if share >= SINGLE_CONDITION_SHARE {
            warnings.push(format!(
                "Single market condition covers {:.0}% of the {years}-year horizon (entry {index}); real markets move between regimes",
                share * 100.0
            ));
        }
    }

    match spec {
        MarketPeriodSpec::Timeline { periods } => {
            let order = sorted_period_indices(periods);
            for pair in order.windows(2) {
                let (before, after) = (&periods[pair[0]], &periods[pair[1]]);
                if after.start_year > before.end_year.saturating_add(1) {
                    warnings.push(format!(
                        "Timeline gap: years {}-{} are not covered by any period; default assumptions apply",
                        before.end_year + 1,
                        after.start_year - 1
                    ));
                }
            }
        }
        MarketPeriodSpec::Cycle { pattern, .. } => {
            let total: u32 = pattern.iter().map(|entry| entry.duration).sum();
            let average = total as f64 / pattern.len().max(1) as f64;
            if average < MIN_AVERAGE_CYCLE_YEARS {
                warnings.push(format!(
                    "Very short cycle: phases average {average:.1} years; market regimes usually persist for several years"
                ));
            }
        }
    }

    warnings
}

/// For each year, the index of the period or pattern entry that governs it.
fn layout(years: u32, spec: Option<&MarketPeriodSpec>) -> Vec<Option<usize>> {
    let mut slots = vec![None; years as usize];
    match spec {
        None => {}
        Some(MarketPeriodSpec::Timeline { periods }) => {
            for (index, period) in periods.iter().enumerate() {
                if period.start_year >= years {
                    continue;
                }
                let end = period.end_year.min(years - 1);
                for year in period.start_year..=end {
                    slots[year as usize] = Some(index);
                }
            }
        }
        Some(MarketPeriodSpec::Cycle { pattern, repeat }) => {
            let cycle_length: u32 = pattern.iter().map(|entry| entry.duration).sum();
            if cycle_length == 0 {
                return slots;
            }
            let mut year = 0_u32;
            'outer: loop {
                for (index, entry) in pattern.iter().enumerate() {
                    for _ in 0..entry.duration {
                        if year >= years {
                            break 'outer;
                        }
                        slots[year as usize] = Some(index);
                        year += 1;
                    }
                }
                if !repeat {
                    break;
                }
            }
        }
    }
    slots
}

fn sorted_period_indices(periods: &[MarketPeriod]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..periods.len()).collect();
    order.sort_by_key(|&index| (periods[index].start_year, periods[index].end_year));
    order
}

/// Maximal runs of consecutive covered years whose stock mean satisfies `pred`,
/// as `(start_year, length)`.
fn stretches(stock_means: &[Option<f64>], pred: impl Fn(f64) -> bool) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (year, mean) in stock_means.iter().enumerate() {
        if mean.is_some_and(&pred) {
            current = match current {
                Some((start, len)) => Some((start, len + 1)),
                None => Some((year, 1)),
            };
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}
