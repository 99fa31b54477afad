use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::allowance::AllowanceLedger;
use super::error::ConfigError;
use super::returns::growth_factor;
use super::types::YearResult;

/// Share of the base-rate yield that counts as Basisertrag (§18 InvStG).
pub const BASISERTRAG_FACTOR: f64 = 0.7;

/// Basiszins applied to years the table does not list.
pub const DEFAULT_BASE_RATE: f64 = 0.0253;

/// Abgeltungsteuer 25% plus 5.5% solidarity surcharge on it.
pub const DEFAULT_TAX_RATE: f64 = 0.26375;

/// Teilfreistellung for equity funds.
pub const EQUITY_FUND_EXEMPTION: f64 = 0.30;

const STATUTORY_BASE_RATES: &[(i32, f64)] = &[
    (2018, 0.0087),
    (2019, 0.0052),
    (2020, 0.0007),
    (2021, -0.0045),
    (2022, -0.0005),
    (2023, 0.0255),
    (2024, 0.0229),
    (2025, 0.0253),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRateTable {
    pub rates: BTreeMap<i32, f64>,
    pub default_rate: f64,
}

impl Default for BaseRateTable {
    fn default() -> Self {
        Self {
            rates: STATUTORY_BASE_RATES.iter().copied().collect(),
            default_rate: DEFAULT_BASE_RATE,
        }
    }
}

impl BaseRateTable {
    pub fn flat(rate: f64) -> Self {
        Self {
            rates: BTreeMap::new(),
            default_rate: rate,
        }
    }

    pub fn rate(&self, year: i32) -> f64 {
        self.rates.get(&year).copied().unwrap_or(self.default_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxConfig {
    pub tax_rate: f64,
    #[serde(default)]
    pub surcharge: f64,
    pub partial_exemption: f64,
    #[serde(default)]
    pub base_rates: BaseRateTable,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            tax_rate: DEFAULT_TAX_RATE,
            surcharge: 0.0,
            partial_exemption: EQUITY_FUND_EXEMPTION,
            base_rates: BaseRateTable::default(),
        }
    }
}

impl TaxConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tax_rate.is_finite() || self.tax_rate <= 0.0 {
            return Err(ConfigError::NonPositiveTaxRate {
                rate: self.tax_rate,
            });
        }
        for (name, value) in [
            ("tax rate", self.tax_rate),
            ("surcharge", self.surcharge),
            ("partial exemption", self.partial_exemption),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }
        if !self.base_rates.default_rate.is_finite()
            || self.base_rates.rates.values().any(|r| !r.is_finite())
        {
            return Err(ConfigError::NotFinite { name: "base rate" });
        }
        Ok(())
    }

    pub fn effective_rate(&self) -> f64 {
        (self.tax_rate + self.surcharge).max(0.0)
    }

    pub fn taxable_share(&self) -> f64 {
        (1.0 - self.partial_exemption).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearStep {
    pub year: i32,
    pub opening_value: f64,
    pub growth_rate: f64,
    /// Months the lot is invested this year, 1..=12.
    pub months_held: u32,
    /// Full months of the year that passed before the lot was bought.
    pub months_before_purchase: u32,
    pub cumulative_vorabpauschale: f64,
}

impl YearStep {
    pub fn full_year(year: i32, opening_value: f64, growth_rate: f64) -> Self {
        Self {
            year,
            opening_value,
            growth_rate,
            months_held: 12,
            months_before_purchase: 0,
            cumulative_vorabpauschale: 0.0,
        }
    }

    fn growth(&self) -> f64 {
        let months = self.months_held.min(12);
        self.opening_value * (growth_factor(self.growth_rate, months) - 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Realization {
    pub gain: f64,
    pub taxable_gain: f64,
    pub allowance_used: f64,
    pub tax: f64,
}

/// Deemed-interest advance tax base for one year.
///
/// Basisertrag is the opening value times Basiszins times 0.7, shortened by a
/// twelfth per full month before purchase, and never more than the actual
/// growth. Negative values are clamped to zero.
pub fn vorabpauschale(
    opening_value: f64,
    growth: f64,
    base_rate: f64,
    months_before_purchase: u32,
) -> f64 {
    if opening_value <= 0.0 || growth <= 0.0 || base_rate <= 0.0 {
        return 0.0;
    }
    let held_share = (12 - months_before_purchase.min(12)) as f64 / 12.0;
    let basisertrag = opening_value * base_rate * BASISERTRAG_FACTOR * held_share;
    basisertrag.min(growth).max(0.0)
}

pub fn realize_gain(
    gain: f64,
    year: i32,
    ledger: &mut AllowanceLedger,
    tax: &TaxConfig,
) -> Realization {
    if gain <= 0.0 || !gain.is_finite() {
        return Realization {
            gain: 0.0,
            taxable_gain: 0.0,
            allowance_used: 0.0,
            tax: 0.0,
        };
    }

    let taxable_gain = gain * tax.taxable_share();
    let allowance_used = ledger.withdraw(year, taxable_gain);
    let due = ((taxable_gain - allowance_used).max(0.0) * tax.effective_rate()).max(0.0);
    Realization {
        gain,
        taxable_gain,
        allowance_used,
        tax: due,
    }
}

pub fn apply_year(
    step: YearStep,
    ledger: &mut AllowanceLedger,
    tax: &TaxConfig,
    reduces_capital: bool,
) -> YearResult {
    let growth = step.growth();
    let base = vorabpauschale(
        step.opening_value,
        growth,
        tax.base_rates.rate(step.year),
        step.months_before_purchase,
    );
    let realization = realize_gain(base, step.year, ledger, tax);

    let gross_closing = step.opening_value + growth;
    let closing_value = if reduces_capital {
        gross_closing - realization.tax
    } else {
        gross_closing
    };

    YearResult {
        year: step.year,
        opening_value: step.opening_value,
        growth,
        closing_value,
        tax_paid: realization.tax,
        allowance_used: realization.allowance_used,
        vorabpauschale: base,
        cumulative_vorabpauschale: step.cumulative_vorabpauschale + base,
        realized_gain: 0.0,
        months_held: step.months_held,
    }
}

/// Grows a lot through its final year and sells it at the end.
///
/// `step.months_held` decides how much of that year the lot grows. Yearly
/// granularity passes 12, so a lot sold mid-year still earns the whole
/// year's return; monthly granularity counts through the sale month.
/// The realized gain is value minus cost basis minus every Vorabpauschale
/// already taxed on the lot.
pub fn dispose(
    step: YearStep,
    cost_basis: f64,
    ledger: &mut AllowanceLedger,
    tax: &TaxConfig,
    reduces_capital: bool,
) -> YearResult {
    let growth = step.growth();
    let value = step.opening_value + growth;
    let gain = if value > 0.0 {
        (value - cost_basis - step.cumulative_vorabpauschale).max(0.0)
    } else {
        0.0
    };
    let realization = realize_gain(gain, step.year, ledger, tax);

    YearResult {
        year: step.year,
        opening_value: step.opening_value,
        growth,
        closing_value: if reduces_capital {
            value - realization.tax
        } else {
            value
        },
        tax_paid: realization.tax,
        allowance_used: realization.allowance_used,
        vorabpauschale: 0.0,
        cumulative_vorabpauschale: step.cumulative_vorabpauschale,
        realized_gain: gain,
        months_held: step.months_held,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn config(quota: f64, base_rate: f64) -> TaxConfig {
        TaxConfig {
            tax_rate: DEFAULT_TAX_RATE,
            surcharge: 0.0,
            partial_exemption: quota,
            base_rates: BaseRateTable::flat(base_rate),
        }
    }

    #[test]
    fn gain_below_allowance_is_tax_free() {
        let mut ledger = AllowanceLedger::flat(4_000.0);
        let result = realize_gain(3_000.0, 2024, &mut ledger, &config(0.0, 0.0));
        assert_eq!(result.tax, 0.0);
        assert_approx(result.allowance_used, 3_000.0);
        assert_approx(ledger.remaining(2024), 1_000.0);
    }

    #[test]
    fn partial_exemption_then_allowance_then_rate() {
        let mut ledger = AllowanceLedger::flat(2_000.0);
        let result = realize_gain(10_000.0, 2024, &mut ledger, &config(0.30, 0.0));
        assert_approx(result.taxable_gain, 7_000.0);
        assert_approx(result.allowance_used, 2_000.0);
        assert_approx(result.tax, 1_318.75);
    }

    #[test]
    fn surcharge_adds_to_flat_rate() {
        let mut tax = config(0.0, 0.0);
        tax.surcharge = 0.02;
        let mut ledger = AllowanceLedger::flat(0.0);
        let result = realize_gain(1_000.0, 2024, &mut ledger, &tax);
        assert_approx(result.tax, 1_000.0 * (DEFAULT_TAX_RATE + 0.02));
    }

    #[test]
    fn vorabpauschale_is_capped_by_growth() {
        // Basisertrag 100_000 * 2.55% * 0.7 = 1_785
        assert_approx(vorabpauschale(100_000.0, 5_000.0, 0.0255, 0), 1_785.0);
        assert_approx(vorabpauschale(100_000.0, 1_000.0, 0.0255, 0), 1_000.0);
        assert_eq!(vorabpauschale(100_000.0, -3_000.0, 0.0255, 0), 0.0);
        assert_eq!(vorabpauschale(100_000.0, 5_000.0, -0.0045, 0), 0.0);
    }

    #[test]
    fn vorabpauschale_drops_a_twelfth_per_month_before_purchase() {
        // bought in April: three full months before purchase
        assert_approx(
            vorabpauschale(12_000.0, 5_000.0, 0.02, 3),
            12_000.0 * 0.02 * 0.7 * 9.0 / 12.0,
        );
    }

    #[test]
    fn apply_year_hand_calculation() {
        // growth 5_000, Basisertrag 1_785, taxable 1_249.5, allowance 1_000
        let mut ledger = AllowanceLedger::flat(1_000.0);
        let result = apply_year(
            YearStep::full_year(2023, 100_000.0, 0.05),
            &mut ledger,
            &config(0.30, 0.0255),
            true,
        );
        assert_approx(result.growth, 5_000.0);
        assert_approx(result.vorabpauschale, 1_785.0);
        assert_approx(result.allowance_used, 1_000.0);
        assert_approx(result.tax_paid, 249.5 * DEFAULT_TAX_RATE);
        assert_approx(result.closing_value, 105_000.0 - result.tax_paid);
        assert_approx(result.cumulative_vorabpauschale, 1_785.0);
    }

    #[test]
    fn tax_not_deducted_when_flag_is_off() {
        let mut ledger = AllowanceLedger::flat(0.0);
        let result = apply_year(
            YearStep::full_year(2024, 50_000.0, 0.10),
            &mut ledger,
            &config(0.0, 0.03),
            false,
        );
        assert!(result.tax_paid > 0.0);
        assert_approx(result.closing_value, 55_000.0);
    }

    #[test]
    fn negative_growth_has_no_tax_and_no_allowance_use() {
        let mut ledger = AllowanceLedger::flat(1_000.0);
        let result = apply_year(
            YearStep::full_year(2024, 10_000.0, -0.2),
            &mut ledger,
            &config(0.3, 0.03),
            true,
        );
        assert_eq!(result.tax_paid, 0.0);
        assert_eq!(result.allowance_used, 0.0);
        assert_approx(result.closing_value, 8_000.0);
        assert_approx(ledger.remaining(2024), 1_000.0);
    }

    #[test]
    fn disposal_credits_previous_vorabpauschale() {
        let mut ledger = AllowanceLedger::flat(0.0);
        let step = YearStep {
            cumulative_vorabpauschale: 500.0,
            ..YearStep::full_year(2024, 11_000.0, 0.0)
        };
        let result = dispose(step, 10_000.0, &mut ledger, &config(0.0, 0.03), true);
        assert_approx(result.realized_gain, 500.0);
        assert_approx(result.tax_paid, 500.0 * DEFAULT_TAX_RATE);
        assert_eq!(result.vorabpauschale, 0.0);
        assert_approx(result.closing_value, 11_000.0 - result.tax_paid);
    }

    #[test]
    fn partial_year_growth_compounds_monthly() {
        let mut ledger = AllowanceLedger::flat(10_000.0);
        let step = YearStep {
            months_held: 6,
            months_before_purchase: 6,
            ..YearStep::full_year(2024, 1_000.0, 0.21)
        };
        let result = apply_year(step, &mut ledger, &config(0.0, 0.03), true);
        assert_approx(result.growth, 1_000.0 * (1.21_f64.sqrt() - 1.0));
    }

    #[test]
    fn non_positive_tax_rate_is_rejected() {
        let mut tax = TaxConfig::default();
        tax.tax_rate = 0.0;
        assert!(matches!(
            tax.validate(),
            Err(ConfigError::NonPositiveTaxRate { .. })
        ));
        assert!(TaxConfig::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_year_results_respect_invariants(
            opening in 0u32..2_000_000,
            rate_bp in -5000i32..5000,
            allowance in 0u32..5_000,
            quota_pct in 0u32..=100,
            reduces in proptest::bool::ANY
        ) {
            let mut ledger = AllowanceLedger::flat(allowance as f64);
            let tax = config(quota_pct as f64 / 100.0, 0.0255);
            let result = apply_year(
                YearStep::full_year(2024, opening as f64, rate_bp as f64 / 10_000.0),
                &mut ledger,
                &tax,
                reduces,
            );
            prop_assert!(result.tax_paid >= 0.0);
            prop_assert!(result.allowance_used <= allowance as f64 + 1e-9);
            prop_assert!(result.vorabpauschale <= result.growth.max(0.0) + 1e-9);
            let expected_closing = if reduces {
                result.opening_value + result.growth - result.tax_paid
            } else {
                result.opening_value + result.growth
            };
            prop_assert!((result.closing_value - expected_closing).abs() < 1e-6);
        }
    }
}
