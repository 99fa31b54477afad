use serde::Serialize;
use tracing::{debug, info};

use super::allowance::AllowanceLedger;
use super::error::ConfigError;
use super::historical::HistoricalIndexData;
use super::lots::LotBook;
use super::returns::{
    CoverageReport, ReturnConfiguration, ReturnGenerator, ReturnSequence, blend, check_year_span,
};
use super::tax::{TaxConfig, YearStep, apply_year, dispose};
use super::types::{Granularity, ProjectionInput, ProjectionTrace, YearSummary};

#[derive(Debug, Clone, Copy)]
pub struct RunConfig<'a> {
    pub start_year: i32,
    pub end_year: i32,
    pub returns: &'a ReturnConfiguration,
    pub tax: &'a TaxConfig,
    pub granularity: Granularity,
    pub tax_reduces_capital: bool,
}

impl<'a> From<&'a ProjectionInput> for RunConfig<'a> {
    fn from(input: &'a ProjectionInput) -> Self {
        Self {
            start_year: input.start_year,
            end_year: input.end_year,
            returns: &input.returns,
            tax: &input.tax,
            granularity: input.granularity,
            tax_reduces_capital: input.tax_reduces_capital,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRun {
    pub years: Vec<YearSummary>,
    pub coverage: CoverageReport,
}

#[derive(Debug, Clone, Copy)]
struct LotState {
    value: f64,
    cumulative_vorabpauschale: f64,
}

pub fn run(
    book: &mut LotBook,
    ledger: &mut AllowanceLedger,
    config: &RunConfig<'_>,
    data: &dyn HistoricalIndexData,
) -> Result<ProjectionRun, ConfigError> {
    check_year_span(config.start_year, config.end_year)?;
    config.tax.validate()?;
    book.validate(config.returns.asset_count())?;

    let mut generator = ReturnGenerator::new(config.returns, data)?;
    let sequence = generator.sequence(config.start_year, config.end_year)?;

    // every run starts from the configured balances
    ledger.reset();
    let years = simulate_years(book, ledger, config, &sequence);
    info!(
        lots = book.len(),
        years = years.len(),
        partial_coverage = sequence.coverage.partial,
        "projection finished"
    );

    Ok(ProjectionRun {
        years,
        coverage: sequence.coverage,
    })
}

fn simulate_years(
    book: &mut LotBook,
    ledger: &mut AllowanceLedger,
    config: &RunConfig<'_>,
    sequence: &ReturnSequence,
) -> Vec<YearSummary> {
    book.clear_results();
    let order = book.ordered_ids();
    let mut states: Vec<Option<LotState>> = vec![None; book.len()];
    let span = i64::from(config.end_year) - i64::from(config.start_year) + 1;
    let mut summaries = Vec::with_capacity(usize::try_from(span).unwrap_or_default());

    for year in config.start_year..=config.end_year {
        let Some(year_return) = sequence.get(year) else {
            continue;
        };
        let mut summary = YearSummary {
            year,
            growth_rate: year_return.rate,
            allowance_available: ledger.remaining(year),
            ..YearSummary::default()
        };

        for &id in &order {
            let Some(lot) = book.get_mut(id) else {
                continue;
            };
            if !lot.is_active(year) {
                continue;
            }

            let state = states[id].unwrap_or_else(|| {
                summary.contributions += lot.amount;
                LotState {
                    value: lot.amount,
                    cumulative_vorabpauschale: 0.0,
                }
            });

            let growth_rate = match &lot.weights {
                Some(weights) if !year_return.asset_rates.is_empty() => {
                    blend(weights, &year_return.asset_rates)
                }
                _ => year_return.rate,
            };

            let step = YearStep {
                year,
                opening_value: state.value,
                growth_rate,
                months_held: lot.months_held(year, config.granularity),
                months_before_purchase: lot.months_before_purchase(year, config.granularity),
                cumulative_vorabpauschale: state.cumulative_vorabpauschale,
            };

            let result = if lot.is_disposed_in(year) {
                dispose(
                    step,
                    lot.amount,
                    ledger,
                    config.tax,
                    config.tax_reduces_capital,
                )
            } else {
                apply_year(step, ledger, config.tax, config.tax_reduces_capital)
            };

            summary.opening_value += result.opening_value;
            summary.growth += result.growth;
            summary.tax_paid += result.tax_paid;
            summary.allowance_used += result.allowance_used;
            summary.vorabpauschale += result.vorabpauschale;
            summary.realized_gain += result.realized_gain;
            summary.closing_value += result.closing_value;
            summary.active_lots += 1;

            states[id] = Some(LotState {
                value: result.closing_value,
                cumulative_vorabpauschale: result.cumulative_vorabpauschale,
            });
            lot.results.insert(year, result);
        }

        debug!(
            year,
            rate = summary.growth_rate,
            lots = summary.active_lots,
            tax = summary.tax_paid,
            "simulated year"
        );
        summaries.push(summary);
    }

    summaries
}

pub fn project(
    input: &ProjectionInput,
    data: &dyn HistoricalIndexData,
) -> Result<ProjectionTrace, ConfigError> {
    // savings plans expand up to end_year, so bound it first
    check_year_span(input.start_year, input.end_year)?;
    let mut book = LotBook::from_specs(&input.lots, &input.savings_plans, input.end_year);
    let mut ledger = AllowanceLedger::new(input.allowance.clone(), input.default_allowance);
    let run = run(&mut book, &mut ledger, &RunConfig::from(input), data)?;

    let total_tax = run.years.iter().map(|y| y.tax_paid).sum();
    let final_value = run.years.last().map_or(0.0, |y| y.closing_value);

    Ok(ProjectionTrace {
        start_year: input.start_year,
        end_year: input.end_year,
        lots: book.into_lots(),
        years: run.years,
        coverage: run.coverage,
        total_tax,
        final_value,
    })
}
