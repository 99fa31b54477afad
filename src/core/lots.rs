use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::returns::validate_weights;
use super::types::{Granularity, YearResult};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotKind {
    #[default]
    Deposit,
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSpec {
    #[serde(default)]
    pub kind: LotKind,
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    pub amount: f64,
    /// Per-lot multi-asset weights overriding the configured ones.
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanPeriod {
    #[default]
    Yearly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsPlan {
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    pub amount: f64,
    #[serde(default)]
    pub period: PlanPeriod,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
}

impl SavingsPlan {
    /// Lots for every period from the plan start up to the plan end or the
    /// last day of `until_year`, whichever is earlier.
    pub fn expand(&self, until_year: i32) -> Vec<LotSpec> {
        let Some(horizon_end) = NaiveDate::from_ymd_opt(until_year, 12, 31) else {
            return Vec::new();
        };
        let last = self.end.map_or(horizon_end, |end| end.min(horizon_end));
        if self.start > last {
            return Vec::new();
        }

        let kind = if self.amount < 0.0 {
            LotKind::Withdrawal
        } else {
            LotKind::Deposit
        };
        let lot = |start: NaiveDate| LotSpec {
            kind,
            start,
            end: self.end,
            amount: self.amount,
            weights: self.weights.clone(),
        };

        let mut specs = vec![lot(self.start)];
        match self.period {
            PlanPeriod::Yearly => {
                for year in (self.start.year() + 1)..=last.year() {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
                        specs.push(lot(date));
                    }
                }
            }
            PlanPeriod::Monthly => {
                let (mut year, mut month) = next_month(self.start.year(), self.start.month());
                while let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
                    if date > last {
                        break;
                    }
                    specs.push(lot(date));
                    (year, month) = next_month(year, month);
                }
            }
        }
        specs
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionLot {
    pub id: usize,
    pub kind: LotKind,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    pub results: BTreeMap<i32, YearResult>,
}

impl ContributionLot {
    pub fn is_active(&self, year: i32) -> bool {
        self.start.year() <= year && self.end.is_none_or(|end| year <= end.year())
    }

    pub fn is_disposed_in(&self, year: i32) -> bool {
        self.end.is_some_and(|end| end.year() == year)
    }

    pub fn months_held(&self, year: i32, granularity: Granularity) -> u32 {
        if granularity == Granularity::Yearly {
            return 12;
        }
        let first = if year == self.start.year() {
            self.start.month()
        } else {
            1
        };
        let last = match self.end {
            Some(end) if end.year() == year => end.month(),
            _ => 12,
        };
        (last + 1).saturating_sub(first).clamp(1, 12)
    }

    pub fn months_before_purchase(&self, year: i32, granularity: Granularity) -> u32 {
        if granularity == Granularity::Monthly && year == self.start.year() {
            self.start.month() - 1
        } else {
            0
        }
    }

    fn validate(&self, asset_count: usize) -> Result<(), ConfigError> {
        if !self.amount.is_finite() {
            return Err(ConfigError::NotFinite { name: "amount" });
        }
        if self.end.is_some_and(|end| end < self.start) {
            return Err(ConfigError::LotEndsBeforeStart { lot_id: self.id });
        }
        if self.amount < 0.0 && self.kind != LotKind::Withdrawal {
            return Err(ConfigError::NegativeDeposit { lot_id: self.id });
        }
        if let Some(weights) = &self.weights {
            if weights.len() != asset_count {
                return Err(ConfigError::LotWeightMismatch {
                    lot_id: self.id,
                    expected: asset_count,
                    got: weights.len(),
                });
            }
            validate_weights(weights)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LotBook {
    lots: Vec<ContributionLot>,
}

impl LotBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(
        specs: &[LotSpec],
        plans: &[SavingsPlan],
        until_year: i32,
    ) -> Self {
        let mut book = Self::new();
        for spec in specs {
            book.push(spec.clone());
        }
        for plan in plans {
            book.add_plan(plan, until_year);
        }
        book
    }

    pub fn push(&mut self, spec: LotSpec) -> usize {
        let id = self.lots.len();
        self.lots.push(ContributionLot {
            id,
            kind: spec.kind,
            start: spec.start,
            end: spec.end,
            amount: spec.amount,
            weights: spec.weights,
            results: BTreeMap::new(),
        });
        id
    }

    pub fn add_plan(&mut self, plan: &SavingsPlan, until_year: i32) -> Vec<usize> {
        plan.expand(until_year)
            .into_iter()
            .map(|spec| self.push(spec))
            .collect()
    }

    pub fn validate(&self, asset_count: usize) -> Result<(), ConfigError> {
        self.lots.iter().try_for_each(|lot| lot.validate(asset_count))
    }

    /// Lot ids by start date, ties in insertion order.
    pub fn ordered_ids(&self) -> Vec<usize> {
        let mut ids = (0..self.lots.len()).collect::<Vec<_>>();
        ids.sort_by_key(|&id| self.lots[id].start);
        ids
    }

    pub fn ordered(&self) -> impl Iterator<Item = &ContributionLot> {
        self.ordered_ids().into_iter().map(|id| &self.lots[id])
    }

    pub fn get(&self, id: usize) -> Option<&ContributionLot> {
        self.lots.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: usize) -> Option<&mut ContributionLot> {
        self.lots.get_mut(id)
    }

    pub fn clear_results(&mut self) {
        for lot in &mut self.lots {
            lot.results.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.lots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn into_lots(self) -> Vec<ContributionLot> {
        self.lots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn deposit(start: NaiveDate, amount: f64) -> LotSpec {
        LotSpec {
            kind: LotKind::Deposit,
            start,
            end: None,
            amount,
            weights: None,
        }
    }

    #[test]
    fn ordered_is_chronological_with_insertion_tiebreak() {
        let mut book = LotBook::new();
        let late = book.push(deposit(date(2025, 1, 1), 100.0));
        let early_a = book.push(deposit(date(2024, 3, 1), 200.0));
        let early_b = book.push(deposit(date(2024, 3, 1), 300.0));
        assert_eq!(book.ordered_ids(), vec![early_a, early_b, late]);
        let amounts = book.ordered().map(|l| l.amount).collect::<Vec<_>>();
        assert_eq!(amounts, vec![200.0, 300.0, 100.0]);
    }

    #[test]
    fn validation_rejects_reversed_dates_and_untagged_negative_amounts() {
        let mut book = LotBook::new();
        book.push(LotSpec {
            end: Some(date(2023, 1, 1)),
            ..deposit(date(2024, 1, 1), 100.0)
        });
        assert_eq!(
            book.validate(0),
            Err(ConfigError::LotEndsBeforeStart { lot_id: 0 })
        );

        let mut book = LotBook::new();
        book.push(deposit(date(2024, 1, 1), -100.0));
        assert_eq!(book.validate(0), Err(ConfigError::NegativeDeposit { lot_id: 0 }));

        let mut book = LotBook::new();
        book.push(LotSpec {
            kind: LotKind::Withdrawal,
            ..deposit(date(2024, 1, 1), -100.0)
        });
        assert!(book.validate(0).is_ok());
    }

    #[test]
    fn lot_weights_must_match_asset_count() {
        let mut book = LotBook::new();
        book.push(LotSpec {
            weights: Some(vec![0.5, 0.5]),
            ..deposit(date(2024, 1, 1), 100.0)
        });
        assert!(book.validate(2).is_ok());
        assert!(matches!(
            book.validate(3),
            Err(ConfigError::LotWeightMismatch { .. })
        ));
    }

    #[test]
    fn activity_and_months_held() {
        let mut book = LotBook::new();
        let id = book.push(LotSpec {
            end: Some(date(2026, 8, 15)),
            ..deposit(date(2024, 4, 10), 1_000.0)
        });
        let lot = book.get(id).expect("lot");
        assert!(!lot.is_active(2023));
        assert!(lot.is_active(2024));
        assert!(lot.is_active(2026));
        assert!(!lot.is_active(2027));
        assert!(lot.is_disposed_in(2026));

        assert_eq!(lot.months_held(2024, Granularity::Monthly), 9);
        assert_eq!(lot.months_held(2025, Granularity::Monthly), 12);
        assert_eq!(lot.months_held(2026, Granularity::Monthly), 8);
        assert_eq!(lot.months_held(2026, Granularity::Yearly), 12);
        assert_eq!(lot.months_before_purchase(2024, Granularity::Monthly), 3);
        assert_eq!(lot.months_before_purchase(2024, Granularity::Yearly), 0);
    }

    #[test]
    fn yearly_plan_expands_to_one_lot_per_year() {
        let plan = SavingsPlan {
            start: date(2024, 6, 1),
            end: None,
            amount: 1_200.0,
            period: PlanPeriod::Yearly,
            weights: None,
        };
        let specs = plan.expand(2027);
        let starts = specs.iter().map(|s| s.start).collect::<Vec<_>>();
        assert_eq!(
            starts,
            vec![
                date(2024, 6, 1),
                date(2025, 1, 1),
                date(2026, 1, 1),
                date(2027, 1, 1)
            ]
        );
    }

    #[test]
    fn monthly_plan_stops_at_plan_end() {
        let plan = SavingsPlan {
            start: date(2024, 11, 15),
            end: Some(date(2025, 2, 10)),
            amount: 100.0,
            period: PlanPeriod::Monthly,
            weights: None,
        };
        let mut book = LotBook::new();
        let ids = book.add_plan(&plan, 2030);
        assert_eq!(ids.len(), 4);
        let lot = book.get(ids[3]).expect("lot");
        assert_eq!(lot.start, date(2025, 2, 1));
        assert_eq!(lot.end, Some(date(2025, 2, 10)));
    }

    #[test]
    fn lot_spec_parses_from_json() {
        let spec: LotSpec = serde_json::from_str(
            r#"{"start":"2024-01-15","end":"2030-12-31","amount":5000.0}"#,
        )
        .expect("valid json");
        assert_eq!(spec.kind, LotKind::Deposit);
        assert_eq!(spec.end, Some(date(2030, 12, 31)));
    }
}
