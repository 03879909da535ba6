use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{SimulationConfig, simulate};
use super::error::SimulationError;
use super::types::FinancialProfile;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpendingSolveConfig {
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub simulations_per_iteration: u32,
    pub final_simulations: u32,
}

impl Default for SpendingSolveConfig {
    fn default() -> Self {
        Self {
            target_success_rate: 0.90,
            search_min: 0.0,
            search_max: 500_000.0,
            tolerance: 250.0,
            max_iterations: 24,
            simulations_per_iteration: 1_000,
            final_simulations: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpendingSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_spending: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendingSolveResult {
    pub config: SpendingSolveConfig,
    pub solved_spending: Option<f64>,
    pub achieved_success_rate: Option<f64>,
    pub achieved_success_ci_half_width: Option<f64>,
    pub iterations: Vec<SpendingSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

/// Highest flat annual spending (today's dollars) whose success rate still
/// meets the target. Success is non-increasing in spending, so bisection on
/// the feasible/infeasible boundary converges.
pub fn solve_sustainable_spending(
    profile: &FinancialProfile,
    base: &SimulationConfig,
    config: SpendingSolveConfig,
) -> Result<SpendingSolveResult, SimulationError> {
    validate_config(config)?;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate_candidate(
        profile,
        base,
        config.simulations_per_iteration,
        config.search_min,
    )?;
    let high_eval = evaluate_candidate(
        profile,
        base,
        config.simulations_per_iteration,
        config.search_max,
    )?;

    let mut solved_spending = None;
    let mut converged = false;
    let feasible;
    let message;

    if low_eval.success_rate + 1e-12 < config.target_success_rate {
        feasible = false;
        message = "No feasible spending found within the search bounds.".to_string();
    } else if high_eval.success_rate + 1e-12 >= config.target_success_rate {
        solved_spending = Some(config.search_max);
        converged = true;
        feasible = true;
        message = "Upper spending bound is still feasible; increase search max for a higher target."
            .to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let eval = evaluate_candidate(profile, base, config.simulations_per_iteration, mid)?;
            iterations.push(SpendingSolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_spending: mid,
                success_rate: eval.success_rate,
                success_ci_half_width: eval.success_ci_half_width,
            });
            debug!(
                iteration = it,
                candidate = mid,
                success_rate = eval.success_rate,
                "spending solver step"
            );

            if eval.success_rate + 1e-12 >= config.target_success_rate {
                lo = mid;
            } else {
                hi = mid;
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_spending = Some(lo);
        feasible = true;
        message = if converged {
            "Solved maximum sustainable spending.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let mut achieved_success_rate = None;
    let mut achieved_success_ci_half_width = None;
    if let Some(spending) = solved_spending {
        let final_eval = evaluate_candidate(profile, base, config.final_simulations, spending)?;
        achieved_success_rate = Some(final_eval.success_rate);
        achieved_success_ci_half_width = Some(final_eval.success_ci_half_width);
    }

    Ok(SpendingSolveResult {
        config,
        solved_spending,
        achieved_success_rate,
        achieved_success_ci_half_width,
        iterations,
        converged,
        feasible,
        message,
    })
}

fn evaluate_candidate(
    base_profile: &FinancialProfile,
    base: &SimulationConfig,
    simulations: u32,
    spending: f64,
) -> Result<CandidateEval, SimulationError> {
    let mut profile = base_profile.clone();
    profile.budget = None;
    profile.target_annual_income = spending.max(0.0);
    profile.annual_expenses = spending.max(0.0);

    let mut config = base.clone();
    config.simulations = simulations.max(1);

    let result = simulate(&profile, &config)?;
    Ok(CandidateEval {
        success_rate: result.success_rate,
        success_ci_half_width: binomial_ci_half_width(result.success_rate, config.simulations),
    })
}

fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn validate_config(config: SpendingSolveConfig) -> Result<(), SimulationError> {
    let invalid = |message: &str| Err(SimulationError::Solver(message.to_string()));
    if !(0.0..=1.0).contains(&config.target_success_rate) {
        return invalid("target_success_rate must be between 0 and 1");
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return invalid("search bounds must be finite");
    }
    if config.search_min < 0.0 {
        return invalid("search_min must be >= 0");
    }
    if config.search_max <= config.search_min {
        return invalid("search_max must be greater than search_min");
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return invalid("tolerance must be > 0");
    }
    if config.max_iterations == 0 {
        return invalid("max_iterations must be > 0");
    }
    if config.simulations_per_iteration == 0 {
        return invalid("simulations_per_iteration must be > 0");
    }
    if config.final_simulations == 0 {
        return invalid("final_simulations must be > 0");
    }
    Ok(())
}
