use serde::Serialize;
use tracing::debug;

use super::allowance::AllowanceLedger;
use super::error::ConfigError;
use super::tax::{TaxConfig, realize_gain};

pub const HORIZON_CANDIDATES: [i32; 3] = [5, 10, 20];

pub const MAX_HORIZON_YEARS: i32 = 100;

/// Total-tax differences below this count as ties.
pub const TAX_TIE_TOLERANCE: f64 = 1e-9;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleStrategy {
    Naive,
    AllowancePaced,
    EvenSplit,
    Custom,
}

#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub capital_gains_pool: f64,
    pub horizon_years: i32,
    pub current_portfolio_value: f64,
    pub expected_return: f64,
    pub start_year: i32,
    pub tax: TaxConfig,
    pub allowance: AllowanceLedger,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleYear {
    pub year: i32,
    pub realization: f64,
    pub taxable_gain: f64,
    pub allowance_available: f64,
    pub allowance_used: f64,
    pub tax: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSchedule {
    pub horizon_years: i32,
    pub strategy: ScheduleStrategy,
    pub years: Vec<ScheduleYear>,
    pub total_realized: f64,
    pub total_tax: f64,
    pub total_allowance_used: f64,
    pub total_allowance_available: f64,
    pub allowance_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub capital_gains_pool: f64,
    pub horizon_years: i32,
    pub naive: OptimizationSchedule,
    pub optimized: OptimizationSchedule,
    pub tax_saving: f64,
    /// Tax saving reinvested at the expected return until the horizon ends.
    pub compounded_saving: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizonCandidate {
    pub horizon_years: i32,
    pub recommended: bool,
    pub report: OptimizationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizonRecommendation {
    pub recommended_horizon: i32,
    pub candidates: Vec<HorizonCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleComparison {
    pub candidate_tax: f64,
    pub reference_tax: f64,
    pub extra_tax: f64,
    pub inferior: bool,
}

pub fn evaluate_realizations(
    realizations: &[f64],
    start_year: i32,
    tax: &TaxConfig,
    allowance: &AllowanceLedger,
    strategy: ScheduleStrategy,
) -> OptimizationSchedule {
    let mut ledger = allowance.fresh();
    let years = realizations
        .iter()
        .enumerate()
        .map(|(i, &planned)| {
            let year = start_year.saturating_add(i32::try_from(i).unwrap_or(i32::MAX));
            let allowance_available = ledger.remaining(year);
            let realization = planned.max(0.0);
            let outcome = realize_gain(realization, year, &mut ledger, tax);
            ScheduleYear {
                year,
                realization,
                taxable_gain: outcome.taxable_gain,
                allowance_available,
                allowance_used: outcome.allowance_used,
                tax: outcome.tax,
            }
        })
        .collect::<Vec<_>>();

    let total_allowance_used: f64 = years.iter().map(|y| y.allowance_used).sum();
    let total_allowance_available: f64 = years.iter().map(|y| y.allowance_available).sum();
    OptimizationSchedule {
        horizon_years: realizations.len() as i32,
        strategy,
        total_realized: years.iter().map(|y| y.realization).sum(),
        total_tax: years.iter().map(|y| y.tax).sum(),
        total_allowance_used,
        total_allowance_available,
        allowance_utilization: if total_allowance_available > 0.0 {
            total_allowance_used / total_allowance_available
        } else {
            0.0
        },
        years,
    }
}

pub fn naive_realizations(pool: f64, horizon_years: i32) -> Vec<f64> {
    let mut plan = vec![0.0; horizon_years.max(0) as usize];
    if let Some(first) = plan.first_mut() {
        *first = pool.max(0.0);
    }
    plan
}

pub fn even_split(pool: f64, horizon_years: i32) -> Vec<f64> {
    if horizon_years <= 0 {
        return Vec::new();
    }
    vec![pool.max(0.0) / horizon_years as f64; horizon_years as usize]
}

/// Each year realizes the smaller of an even share of what is left and the
/// gain that exactly fills that year's allowance, grown at the expected
/// return for the years deferred. The last year realizes everything left.
pub fn allowance_paced_realizations(
    pool: f64,
    horizon_years: i32,
    expected_return: f64,
    start_year: i32,
    tax: &TaxConfig,
    allowance: &AllowanceLedger,
) -> Vec<f64> {
    let horizon = horizon_years.max(0);
    let growth = (1.0 + expected_return).max(0.0);
    let share = tax.taxable_share();
    let mut remaining = pool.max(0.0);
    let mut plan = Vec::with_capacity(horizon as usize);

    for i in 0..horizon {
        let remaining_years = horizon - i;
        let realization = if remaining_years == 1 {
            remaining
        } else {
            let even = remaining / remaining_years as f64;
            let capacity = if share > 0.0 {
                allowance.available(start_year.saturating_add(i)) / share * growth.powi(i)
            } else {
                f64::INFINITY
            };
            even.min(capacity).max(0.0)
        };
        remaining = (remaining - realization).max(0.0);
        plan.push(realization);
    }
    plan
}

pub fn compare_schedules(
    candidate: &OptimizationSchedule,
    reference: &OptimizationSchedule,
) -> ScheduleComparison {
    let extra_tax = candidate.total_tax - reference.total_tax;
    ScheduleComparison {
        candidate_tax: candidate.total_tax,
        reference_tax: reference.total_tax,
        extra_tax,
        inferior: extra_tax > TAX_TIE_TOLERANCE,
    }
}

pub fn optimize(request: &OptimizationRequest) -> Result<OptimizationReport, ConfigError> {
    validate_request(request)?;

    let horizon = request.horizon_years;
    let mut pool = request.capital_gains_pool;
    if request.current_portfolio_value > 0.0 {
        pool = pool.min(request.current_portfolio_value);
    }

    let evaluate = |plan: &[f64], strategy: ScheduleStrategy| {
        evaluate_realizations(
            plan,
            request.start_year,
            &request.tax,
            &request.allowance,
            strategy,
        )
    };

    if pool <= 0.0 || horizon <= 0 {
        let zero = vec![0.0; horizon.max(0) as usize];
        return Ok(OptimizationReport {
            capital_gains_pool: pool.max(0.0),
            horizon_years: horizon.max(0),
            naive: evaluate(zero.as_slice(), ScheduleStrategy::Naive),
            optimized: evaluate(zero.as_slice(), ScheduleStrategy::Naive),
            tax_saving: 0.0,
            compounded_saving: 0.0,
            message: "No gains to realize or no horizon; nothing to optimize.".to_string(),
        });
    }

    let paced = allowance_paced_realizations(
        pool,
        horizon,
        request.expected_return,
        request.start_year,
        &request.tax,
        &request.allowance,
    );
    let even = even_split(pool, horizon);
    let naive = evaluate(
        naive_realizations(pool, horizon).as_slice(),
        ScheduleStrategy::Naive,
    );
    let candidates = [
        evaluate(paced.as_slice(), ScheduleStrategy::AllowancePaced),
        evaluate(even.as_slice(), ScheduleStrategy::EvenSplit),
        naive.clone(),
    ];

    let mut optimized = candidates[0].clone();
    for candidate in &candidates[1..] {
        if candidate.total_tax + TAX_TIE_TOLERANCE < optimized.total_tax {
            optimized = candidate.clone();
        }
    }

    let tax_saving = (naive.total_tax - optimized.total_tax).max(0.0);
    let compounded_saving =
        tax_saving * (1.0 + request.expected_return).max(0.0).powi(horizon);
    debug!(
        horizon,
        pool,
        naive_tax = naive.total_tax,
        optimized_tax = optimized.total_tax,
        strategy = ?optimized.strategy,
        "optimized realization schedule"
    );

    let message = if tax_saving > TAX_TIE_TOLERANCE {
        format!(
            "Spreading realization over {horizon} years saves {tax_saving:.2} in tax."
        )
    } else {
        "Realizing in a single year is already optimal.".to_string()
    };

    Ok(OptimizationReport {
        capital_gains_pool: pool,
        horizon_years: horizon,
        naive,
        optimized,
        tax_saving,
        compounded_saving,
        message,
    })
}

/// Optimizes every candidate horizon and flags the one with the lowest
/// optimized tax; ties go to the shorter horizon.
pub fn recommend_horizon(
    request: &OptimizationRequest,
) -> Result<HorizonRecommendation, ConfigError> {
    let mut candidates = Vec::with_capacity(HORIZON_CANDIDATES.len());
    let mut best: Option<(usize, f64)> = None;

    for (idx, horizon_years) in HORIZON_CANDIDATES.into_iter().enumerate() {
        let report = optimize(&OptimizationRequest {
            horizon_years,
            ..request.clone()
        })?;
        let total = report.optimized.total_tax;
        if best.is_none_or(|(_, best_tax)| total + TAX_TIE_TOLERANCE < best_tax) {
            best = Some((idx, total));
        }
        candidates.push(HorizonCandidate {
            horizon_years,
            recommended: false,
            report,
        });
    }

    let best_idx = best.map_or(0, |(idx, _)| idx);
    if let Some(candidate) = candidates.get_mut(best_idx) {
        candidate.recommended = true;
    }

    Ok(HorizonRecommendation {
        recommended_horizon: HORIZON_CANDIDATES[best_idx],
        candidates,
    })
}

fn validate_request(request: &OptimizationRequest) -> Result<(), ConfigError> {
    request.tax.validate()?;
    let horizon = request.horizon_years;
    if horizon > MAX_HORIZON_YEARS {
        return Err(ConfigError::HorizonTooLong {
            horizon,
            max: MAX_HORIZON_YEARS,
        });
    }
    if horizon > 0 && request.start_year.checked_add(horizon - 1).is_none() {
        return Err(ConfigError::YearOverflow {
            start_year: request.start_year,
            horizon,
        });
    }
    for (name, value) in [
        ("capitalGainsPool", request.capital_gains_pool),
        ("currentPortfolioValue", request.current_portfolio_value),
        ("expectedReturn", request.expected_return),
    ] {
        if !value.is_finite() {
            return Err(ConfigError::NotFinite { name });
        }
    }
    Ok(())
}
