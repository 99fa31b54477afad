use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::engine::project;
use super::error::ConfigError;
use super::historical::HistoricalIndexData;
use super::types::{ProjectionInput, ProjectionTrace};

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Hex SHA-256 of the canonical JSON encoding of every projection input.
pub fn input_digest(input: &ProjectionInput) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(input)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Memoizes projection traces by input digest.
///
/// Entries are evicted oldest-first once `capacity` is reached. Results from
/// a different historical data source are not distinguished, so callers
/// swapping sources must `clear` first.
#[derive(Debug, Clone)]
pub struct ProjectionCache {
    entries: HashMap<String, ProjectionTrace>,
    insertion_order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl Default for ProjectionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl ProjectionCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached trace for `input` or projects and stores it.
    /// Unseeded stochastic inputs bypass the cache.
    pub fn get_or_project(
        &mut self,
        input: &ProjectionInput,
        data: &dyn HistoricalIndexData,
    ) -> Result<ProjectionTrace, ConfigError> {
        if input.returns.is_unseeded_stochastic() {
            debug!("unseeded stochastic returns, bypassing cache");
            return project(input, data);
        }

        let key = match input_digest(input) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "input not hashable, bypassing cache");
                return project(input, data);
            }
        };

        if let Some(trace) = self.entries.get(&key) {
            self.hits += 1;
            debug!(key = %key, "projection cache hit");
            return Ok(trace.clone());
        }

        self.misses += 1;
        debug!(key = %key, "projection cache miss");
        let trace = project(input, data)?;
        self.insert(key, trace.clone());
        Ok(trace)
    }

    fn insert(&mut self, key: String, trace: ProjectionTrace) {
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.insertion_order.push_back(key.clone());
        self.entries.insert(key, trace);
    }

    pub fn contains(&self, input: &ProjectionInput) -> bool {
        input_digest(input).is_ok_and(|key| self.entries.contains_key(&key))
    }

    /// Drops the entry for `input`; returns whether one existed.
    pub fn invalidate(&mut self, input: &ProjectionInput) -> bool {
        let Ok(key) = input_digest(input) else {
            return false;
        };
        self.insertion_order.retain(|k| k != &key);
        self.entries.remove(&key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::historical::BuiltinIndices;
    use crate::core::lots::{LotKind, LotSpec};
    use crate::core::returns::ReturnConfiguration;
    use crate::core::tax::TaxConfig;
    use crate::core::types::Granularity;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn input(rate: f64) -> ProjectionInput {
        ProjectionInput {
            start_year: 2024,
            end_year: 2030,
            lots: vec![LotSpec {
                kind: LotKind::Deposit,
                start: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
                end: None,
                amount: 5_000.0,
                weights: None,
            }],
            savings_plans: Vec::new(),
            returns: ReturnConfiguration::Fixed { rate },
            tax: TaxConfig::default(),
            allowance: BTreeMap::new(),
            default_allowance: 1_000.0,
            granularity: Granularity::Yearly,
            tax_reduces_capital: true,
        }
    }

    #[test]
    fn digest_is_stable_and_input_sensitive() {
        let a = input_digest(&input(0.05)).expect("hashable");
        let b = input_digest(&input(0.05)).expect("hashable");
        let c = input_digest(&input(0.06)).expect("hashable");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn identical_inputs_hit_and_changed_inputs_miss() {
        let mut cache = ProjectionCache::default();
        let first = cache.get_or_project(&input(0.05), &BuiltinIndices).expect("valid");
        let second = cache.get_or_project(&input(0.05), &BuiltinIndices).expect("valid");
        assert_eq!(first, second);
        cache.get_or_project(&input(0.07), &BuiltinIndices).expect("valid");
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 2,
                hits: 1,
                misses: 2
            }
        );
    }

    #[test]
    fn invalidate_and_clear_remove_entries() {
        let mut cache = ProjectionCache::default();
        cache.get_or_project(&input(0.05), &BuiltinIndices).expect("valid");
        assert!(cache.contains(&input(0.05)));
        assert!(cache.invalidate(&input(0.05)));
        assert!(!cache.invalidate(&input(0.05)));
        assert!(!cache.contains(&input(0.05)));

        cache.get_or_project(&input(0.05), &BuiltinIndices).expect("valid");
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn unseeded_random_inputs_are_not_stored() {
        let mut cache = ProjectionCache::default();
        let mut unseeded = input(0.05);
        unseeded.returns = ReturnConfiguration::Random {
            mean: 0.05,
            std_dev: 0.1,
            seed: None,
        };
        cache.get_or_project(&unseeded, &BuiltinIndices).expect("valid");
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let mut cache = ProjectionCache::with_capacity(2);
        for rate in [0.01, 0.02, 0.03] {
            cache.get_or_project(&input(rate), &BuiltinIndices).expect("valid");
        }
        assert!(!cache.contains(&input(0.01)));
        assert!(cache.contains(&input(0.02)));
        assert!(cache.contains(&input(0.03)));
    }

    #[test]
    fn errors_are_not_cached() {
        let mut cache = ProjectionCache::default();
        let mut bad = input(0.05);
        bad.tax.tax_rate = 0.0;
        assert!(cache.get_or_project(&bad, &BuiltinIndices).is_err());
        assert_eq!(cache.stats().entries, 0);
    }
}
