use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::lots::{ContributionLot, LotSpec, SavingsPlan};
use super::returns::{CoverageReport, ReturnConfiguration};
use super::tax::TaxConfig;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Yearly,
    Monthly,
}

/// One lot's outcome for one calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub year: i32,
    pub opening_value: f64,
    pub growth: f64,
    pub closing_value: f64,
    pub tax_paid: f64,
    pub allowance_used: f64,
    pub vorabpauschale: f64,
    pub cumulative_vorabpauschale: f64,
    pub realized_gain: f64,
    pub months_held: u32,
}

/// Everything a projection run depends on. Rates and quotas are fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionInput {
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default)]
    pub lots: Vec<LotSpec>,
    #[serde(default)]
    pub savings_plans: Vec<SavingsPlan>,
    pub returns: ReturnConfiguration,
    #[serde(default)]
    pub tax: TaxConfig,
    #[serde(default)]
    pub allowance: BTreeMap<i32, f64>,
    pub default_allowance: f64,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default = "default_tax_reduces_capital")]
    pub tax_reduces_capital: bool,
}

fn default_tax_reduces_capital() -> bool {
    true
}

/// Portfolio totals across all lots for one year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    pub year: i32,
    pub growth_rate: f64,
    pub contributions: f64,
    pub opening_value: f64,
    pub growth: f64,
    pub tax_paid: f64,
    pub allowance_available: f64,
    pub allowance_used: f64,
    pub vorabpauschale: f64,
    pub realized_gain: f64,
    pub closing_value: f64,
    pub active_lots: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionTrace {
    pub start_year: i32,
    pub end_year: i32,
    pub lots: Vec<ContributionLot>,
    pub years: Vec<YearSummary>,
    pub coverage: CoverageReport,
    pub total_tax: f64,
    pub final_value: f64,
}
