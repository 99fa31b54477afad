use std::collections::BTreeMap;

use serde::Serialize;

/// Annual tax-free allowance (Sparerpauschbetrag) shared by every lot of one
/// tax unit. Balances only ever decrease within a year.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceLedger {
    configured: BTreeMap<i32, f64>,
    default_allowance: f64,
    remaining: BTreeMap<i32, f64>,
}

impl AllowanceLedger {
    pub fn new(per_year: BTreeMap<i32, f64>, default_allowance: f64) -> Self {
        let configured = per_year
            .into_iter()
            .map(|(year, amount)| (year, amount.max(0.0)))
            .collect();
        Self {
            configured,
            default_allowance: default_allowance.max(0.0),
            remaining: BTreeMap::new(),
        }
    }

    pub fn flat(amount: f64) -> Self {
        Self::new(BTreeMap::new(), amount)
    }

    pub fn available(&self, year: i32) -> f64 {
        self.configured
            .get(&year)
            .copied()
            .unwrap_or(self.default_allowance)
    }

    pub fn remaining(&self, year: i32) -> f64 {
        self.remaining
            .get(&year)
            .copied()
            .unwrap_or_else(|| self.available(year))
    }

    pub fn used(&self, year: i32) -> f64 {
        self.available(year) - self.remaining(year)
    }

    /// Takes up to `amount` from the year's balance and returns what was taken.
    pub fn withdraw(&mut self, year: i32, amount: f64) -> f64 {
        if amount <= 0.0 || !amount.is_finite() {
            return 0.0;
        }
        let remaining = self.remaining(year);
        let taken = remaining.min(amount).max(0.0);
        self.remaining.insert(year, (remaining - taken).max(0.0));
        taken
    }

    pub fn reset(&mut self) {
        self.remaining.clear();
    }

    pub fn fresh(&self) -> Self {
        Self {
            configured: self.configured.clone(),
            default_allowance: self.default_allowance,
            remaining: BTreeMap::new(),
        }
    }
}
