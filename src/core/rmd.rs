use super::error::RmdError;

/// First age listed in the IRS Uniform Lifetime Table.
pub const TABLE_START_AGE: u32 = 72;

// IRS Uniform Lifetime Table (2022+), ages 72 through 120. The last entry
// covers 120 and over.
const UNIFORM_LIFETIME_DIVISORS: [f64; 49] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, // 72-81
    18.5, 17.7, 16.8, 16.0, 15.2, 14.4, 13.7, 12.9, 12.2, 11.5, // 82-91
    10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, // 92-101
    5.6, 5.2, 4.9, 4.6, 4.3, 4.1, 3.9, 3.7, 3.5, 3.4, // 102-111
    3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0, // 112-120
];

/// One owner's stake in a pre-tax balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmdOwner {
    pub age: u32,
    pub birth_year: i32,
    pub share: f64,
}

impl RmdOwner {
    pub fn new(age: u32, birth_year: i32, share: f64) -> Self {
        Self {
            age,
            birth_year,
            share,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.age >= rmd_start_age(self.birth_year)
    }
}

pub fn divisor(age: u32) -> Result<f64, RmdError> {
    if age < TABLE_START_AGE {
        return Err(RmdError::AgeOutsideTable { age });
    }
    let index = ((age - TABLE_START_AGE) as usize).min(UNIFORM_LIFETIME_DIVISORS.len() - 1);
    Ok(UNIFORM_LIFETIME_DIVISORS[index])
}

/// SECURE 2.0 start age: 73, or 75 for anyone born in 1960 or later.
pub fn rmd_start_age(birth_year: i32) -> u32 {
    if birth_year >= 1960 { 75 } else { 73 }
}

pub fn calculate_rmd(age: u32, pre_tax_balance: f64) -> Result<f64, RmdError> {
    if !pre_tax_balance.is_finite() || pre_tax_balance < 0.0 {
        return Err(RmdError::InvalidBalance {
            balance: pre_tax_balance,
        });
    }
    Ok(pre_tax_balance / divisor(age)?)
}

/// Total RMD across owners. Every owner's share is divided against the same
/// pre-withdrawal balance; owners below their start age contribute nothing.
pub fn household_rmd(owners: &[RmdOwner], pre_tax_balance: f64) -> f64 {
    if !pre_tax_balance.is_finite() || pre_tax_balance <= 0.0 {
        return 0.0;
    }
    owners
        .iter()
        .filter(|owner| owner.is_eligible())
        .filter_map(|owner| {
            divisor(owner.age)
                .ok()
                .map(|d| pre_tax_balance * owner.share.clamp(0.0, 1.0) / d)
        })
        .sum::<f64>()
        .min(pre_tax_balance)
}
