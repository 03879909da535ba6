use serde::{Deserialize, Serialize};

// 2024 tables. Every calculator works on one value per simulation path and
// returns a freshly allocated vector; nothing here holds state.

const MFJ_BRACKETS: [(f64, f64); 7] = [
    (23_200.0, 0.10),
    (94_300.0, 0.12),
    (201_050.0, 0.22),
    (383_900.0, 0.24),
    (487_450.0, 0.32),
    (731_200.0, 0.35),
    (f64::INFINITY, 0.37),
];

const SINGLE_BRACKETS: [(f64, f64); 7] = [
    (11_600.0, 0.10),
    (47_150.0, 0.12),
    (100_525.0, 0.22),
    (191_950.0, 0.24),
    (243_725.0, 0.32),
    (609_350.0, 0.35),
    (f64::INFINITY, 0.37),
];

const IRMAA_TIERS: [f64; 5] = [839.40, 2_097.60, 3_355.20, 4_612.80, 5_030.40];
const MFJ_IRMAA_THRESHOLDS: [f64; 5] = [206_000.0, 258_000.0, 322_000.0, 386_000.0, 750_000.0];
const SINGLE_IRMAA_THRESHOLDS: [f64; 5] = [103_000.0, 129_000.0, 161_000.0, 193_000.0, 500_000.0];

pub const SOCIAL_SECURITY_TAX_RATE: f64 = 0.062;
pub const MEDICARE_TAX_RATE: f64 = 0.0145;
pub const SOCIAL_SECURITY_WAGE_BASE: f64 = 168_600.0;
/// Age at which Medicare (and therefore IRMAA) begins.
pub const MEDICARE_AGE: u32 = 65;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    #[default]
    Single,
    MarriedFilingJointly,
}

impl FilingStatus {
    pub fn for_household(has_spouse: bool) -> Self {
        if has_spouse {
            FilingStatus::MarriedFilingJointly
        } else {
            FilingStatus::Single
        }
    }

    fn brackets(self) -> &'static [(f64, f64)] {
        match self {
            FilingStatus::Single => &SINGLE_BRACKETS,
            FilingStatus::MarriedFilingJointly => &MFJ_BRACKETS,
        }
    }

    fn social_security_thresholds(self) -> (f64, f64) {
        match self {
            FilingStatus::Single => (25_000.0, 34_000.0),
            FilingStatus::MarriedFilingJointly => (32_000.0, 44_000.0),
        }
    }

    fn ltcg_thresholds(self) -> (f64, f64) {
        match self {
            FilingStatus::Single => (47_025.0, 518_900.0),
            FilingStatus::MarriedFilingJointly => (94_050.0, 583_750.0),
        }
    }

    fn irmaa_thresholds(self) -> &'static [f64; 5] {
        match self {
            FilingStatus::Single => &SINGLE_IRMAA_THRESHOLDS,
            FilingStatus::MarriedFilingJointly => &MFJ_IRMAA_THRESHOLDS,
        }
    }
}

pub fn standard_deduction(status: FilingStatus) -> f64 {
    match status {
        FilingStatus::Single => 14_600.0,
        FilingStatus::MarriedFilingJointly => 29_200.0,
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

/// Tax and marginal rate on one taxable income.
pub fn federal_tax_on(income: f64, status: FilingStatus) -> (f64, f64) {
    let income = sanitize(income);
    let mut tax = 0.0;
    let mut lower = 0.0;
    for &(upper, rate) in status.brackets() {
        if income <= upper {
            tax += (income - lower) * rate;
            return (tax.max(0.0), rate);
        }
        tax += (upper - lower) * rate;
        lower = upper;
    }
    (tax.max(0.0), 0.37)
}

pub fn federal_tax(income: &[f64], status: FilingStatus) -> (Vec<f64>, Vec<f64>) {
    income
        .iter()
        .map(|&value| federal_tax_on(value, status))
        .unzip()
}

pub fn taxable_social_security_on(other_income: f64, ss_benefit: f64, status: FilingStatus) -> f64 {
    let benefit = sanitize(ss_benefit);
    if benefit <= 0.0 {
        return 0.0;
    }
    let provisional = sanitize(other_income) + 0.5 * benefit;
    let (first, second) = status.social_security_thresholds();

    let taxable = if provisional <= first {
        0.0
    } else if provisional <= second {
        (0.5 * (provisional - first)).min(0.5 * benefit)
    } else {
        let phase_in = (0.5 * (second - first)).min(0.5 * benefit);
        (0.85 * (provisional - second) + phase_in).min(0.85 * benefit)
    };
    taxable.max(0.0)
}

pub fn taxable_social_security(
    other_income: &[f64],
    ss_benefit: &[f64],
    status: FilingStatus,
) -> Vec<f64> {
    other_income
        .iter()
        .zip(ss_benefit)
        .map(|(&other, &benefit)| taxable_social_security_on(other, benefit, status))
        .collect()
}

/// Gains sit on top of `ordinary_income`; only the slice of each band the
/// gains occupy is taxed at that band's rate.
pub fn ltcg_tax_on(gains: f64, ordinary_income: f64, status: FilingStatus) -> f64 {
    let gains = sanitize(gains);
    if gains <= 0.0 {
        return 0.0;
    }
    let floor = sanitize(ordinary_income);
    let top = floor + gains;
    let (zero_top, fifteen_top) = status.ltcg_thresholds();

    let band = |lower: f64, upper: f64| (top.min(upper) - floor.max(lower)).max(0.0);
    let at_fifteen = band(zero_top, fifteen_top);
    let at_twenty = band(fifteen_top, f64::INFINITY);
    (0.15 * at_fifteen + 0.20 * at_twenty).max(0.0)
}

pub fn ltcg_tax(gains: &[f64], ordinary_income: &[f64], status: FilingStatus) -> Vec<f64> {
    gains
        .iter()
        .zip(ordinary_income)
        .map(|(&gain, &ordinary)| ltcg_tax_on(gain, ordinary, status))
        .collect()
}

pub fn irmaa_surcharge_on(magi: f64, status: FilingStatus, both_on_medicare: bool) -> f64 {
    let magi = sanitize(magi);
    let tier = status
        .irmaa_thresholds()
        .iter()
        .zip(IRMAA_TIERS)
        .filter(|(threshold, _)| magi > **threshold)
        .map(|(_, amount)| amount)
        .last()
        .unwrap_or(0.0);
    if both_on_medicare { tier * 2.0 } else { tier }
}

pub fn irmaa_surcharge(magi: &[f64], status: FilingStatus, both_on_medicare: bool) -> Vec<f64> {
    magi.iter()
        .map(|&value| irmaa_surcharge_on(value, status, both_on_medicare))
        .collect()
}

pub fn fica_tax_on(wages: f64) -> f64 {
    let wages = sanitize(wages);
    wages.min(SOCIAL_SECURITY_WAGE_BASE) * SOCIAL_SECURITY_TAX_RATE + wages * MEDICARE_TAX_RATE
}

pub fn fica_tax(wages: &[f64]) -> Vec<f64> {
    wages.iter().map(|&value| fica_tax_on(value)).collect()
}

/// FICA plus federal tax after the standard deduction plus flat state tax.
pub fn employment_tax(income: &[f64], status: FilingStatus, state_rate: f64) -> Vec<f64> {
    let deduction = standard_deduction(status);
    let state_rate = sanitize(state_rate);
    income
        .iter()
        .map(|&value| {
            let value = sanitize(value);
            let (federal, _) = federal_tax_on(value - deduction, status);
            fica_tax_on(value) + federal + value * state_rate
        })
        .collect()
}
