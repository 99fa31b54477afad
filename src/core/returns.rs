use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::ConfigError;
use super::historical::HistoricalIndexData;
use super::rng::SeededRng;

pub const WEIGHT_EPSILON: f64 = 1e-6;

const MIN_SAMPLED_RETURN: f64 = -0.95;
const MAX_SAMPLED_RETURN: f64 = 2.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetClass {
    pub name: String,
    pub weight: f64,
    pub expected_return: f64,
    #[serde(default)]
    pub volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ReturnConfiguration {
    Fixed {
        rate: f64,
    },
    Random {
        mean: f64,
        std_dev: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Variable {
        rates: BTreeMap<i32, f64>,
    },
    Historical {
        index: String,
    },
    MultiAsset {
        assets: Vec<AssetClass>,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl ReturnConfiguration {
    pub fn validate(&self, data: &dyn HistoricalIndexData) -> Result<(), ConfigError> {
        match self {
            ReturnConfiguration::Fixed { rate } => ensure_finite("rate", *rate),
            ReturnConfiguration::Random { mean, std_dev, .. } => {
                ensure_finite("mean", *mean)?;
                ensure_finite("stdDev", *std_dev)?;
                if *std_dev < 0.0 {
                    return Err(ConfigError::OutOfRange {
                        name: "stdDev",
                        value: *std_dev,
                    });
                }
                Ok(())
            }
            ReturnConfiguration::Variable { rates } => rates
                .values()
                .try_for_each(|rate| ensure_finite("variable rate", *rate)),
            ReturnConfiguration::Historical { index } => {
                if data.coverage(index).is_none() {
                    return Err(ConfigError::UnknownIndex {
                        index: index.clone(),
                    });
                }
                Ok(())
            }
            ReturnConfiguration::MultiAsset { assets, .. } => {
                if assets.is_empty() {
                    return Err(ConfigError::NoAssetClasses);
                }
                for asset in assets {
                    ensure_finite("expectedReturn", asset.expected_return)?;
                    ensure_finite("weight", asset.weight)?;
                    if !asset.volatility.is_finite() || asset.volatility < 0.0 {
                        return Err(ConfigError::OutOfRange {
                            name: "volatility",
                            value: asset.volatility,
                        });
                    }
                }
                let weights = assets.iter().map(|a| a.weight).collect::<Vec<_>>();
                validate_weights(&weights)
            }
        }
    }

    pub fn is_unseeded_stochastic(&self) -> bool {
        match self {
            ReturnConfiguration::Random { std_dev, seed, .. } => seed.is_none() && *std_dev > 0.0,
            ReturnConfiguration::MultiAsset { assets, seed } => {
                seed.is_none() && assets.iter().any(|a| a.volatility > 0.0)
            }
            _ => false,
        }
    }

    pub fn asset_count(&self) -> usize {
        match self {
            ReturnConfiguration::MultiAsset { assets, .. } => assets.len(),
            _ => 0,
        }
    }

    fn seed(&self) -> Option<Option<u64>> {
        match self {
            ReturnConfiguration::Random { seed, .. } | ReturnConfiguration::MultiAsset { seed, .. } => {
                Some(*seed)
            }
            _ => None,
        }
    }
}

pub fn validate_weights(weights: &[f64]) -> Result<(), ConfigError> {
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_EPSILON || weights.iter().any(|w| *w < 0.0) {
        return Err(ConfigError::WeightsNotNormalized { sum });
    }
    Ok(())
}

fn ensure_finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { name })
    }
}

pub fn monthly_rate(annual: f64) -> f64 {
    (1.0 + annual).max(0.0).powf(1.0 / 12.0) - 1.0
}

/// Growth factor over `months` at a given annual rate.
pub fn growth_factor(annual: f64, months: u32) -> f64 {
    if months >= 12 {
        return 1.0 + annual;
    }
    (1.0 + monthly_rate(annual)).powi(months as i32)
}

/// Longest `end_year - start_year` a projection may cover.
pub const MAX_PROJECTION_SPAN: i64 = 200;

pub fn check_year_span(start_year: i32, end_year: i32) -> Result<(), ConfigError> {
    if end_year < start_year {
        return Err(ConfigError::YearRangeReversed {
            start_year,
            end_year,
        });
    }
    if i64::from(end_year) - i64::from(start_year) > MAX_PROJECTION_SPAN {
        return Err(ConfigError::YearSpanTooLong {
            start_year,
            end_year,
            max: MAX_PROJECTION_SPAN,
        });
    }
    Ok(())
}

pub fn blend(weights: &[f64], asset_rates: &[f64]) -> f64 {
    weights
        .iter()
        .zip(asset_rates.iter())
        .map(|(w, r)| w * r)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearReturn {
    pub year: i32,
    pub rate: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asset_rates: Vec<f64>,
    pub from_fallback: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub partial: bool,
    pub fallback_years: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnSequence {
    pub years: BTreeMap<i32, YearReturn>,
    pub coverage: CoverageReport,
}

impl ReturnSequence {
    pub fn rate(&self, year: i32) -> Option<f64> {
        self.years.get(&year).map(|r| r.rate)
    }

    pub fn get(&self, year: i32) -> Option<&YearReturn> {
        self.years.get(&year)
    }
}

/// Produces growth rates for consecutive years from a [`ReturnConfiguration`].
///
/// Stochastic variants consume the generator's RNG in call order, so years
/// must be requested in ascending order for reproducible sequences.
pub struct ReturnGenerator<'a> {
    config: &'a ReturnConfiguration,
    data: &'a dyn HistoricalIndexData,
    rng: SeededRng,
}

impl<'a> ReturnGenerator<'a> {
    pub fn new(
        config: &'a ReturnConfiguration,
        data: &'a dyn HistoricalIndexData,
    ) -> Result<Self, ConfigError> {
        let rng = match config.seed() {
            Some(Some(seed)) => SeededRng::new(seed),
            Some(None) => SeededRng::from_entropy(),
            None => SeededRng::new(0),
        };
        Self::with_rng(config, data, rng)
    }

    pub fn with_rng(
        config: &'a ReturnConfiguration,
        data: &'a dyn HistoricalIndexData,
        rng: SeededRng,
    ) -> Result<Self, ConfigError> {
        config.validate(data)?;
        Ok(Self { config, data, rng })
    }

    pub fn rate_for_year(&mut self, year: i32) -> Result<YearReturn, ConfigError> {
        let mut from_fallback = false;
        let mut asset_rates = Vec::new();

        let rate = match self.config {
            ReturnConfiguration::Fixed { rate } => *rate,
            ReturnConfiguration::Random { mean, std_dev, .. } => self
                .rng
                .normal(*mean, *std_dev)
                .clamp(MIN_SAMPLED_RETURN, MAX_SAMPLED_RETURN),
            ReturnConfiguration::Variable { rates } => *rates
                .get(&year)
                .ok_or(ConfigError::MissingVariableReturn { year })?,
            ReturnConfiguration::Historical { index } => {
                match self.data.annual_return(index, year) {
                    Some(rate) => rate,
                    None => {
                        let coverage = self.data.coverage(index).ok_or_else(|| {
                            ConfigError::UnknownIndex {
                                index: index.clone(),
                            }
                        })?;
                        from_fallback = true;
                        coverage.average_return
                    }
                }
            }
            ReturnConfiguration::MultiAsset { assets, .. } => {
                asset_rates = assets
                    .iter()
                    .map(|asset| {
                        if asset.volatility > 0.0 {
                            self.rng
                                .normal(asset.expected_return, asset.volatility)
                                .clamp(MIN_SAMPLED_RETURN, MAX_SAMPLED_RETURN)
                        } else {
                            asset.expected_return
                        }
                    })
                    .collect();
                let weights = assets.iter().map(|a| a.weight).collect::<Vec<_>>();
                blend(&weights, &asset_rates)
            }
        };

        Ok(YearReturn {
            year,
            rate,
            asset_rates,
            from_fallback,
        })
    }

    pub fn sequence(&mut self, start_year: i32, end_year: i32) -> Result<ReturnSequence, ConfigError> {
        check_year_span(start_year, end_year)?;

        let mut years = BTreeMap::new();
        let mut coverage = CoverageReport::default();
        for year in start_year..=end_year {
            let year_return = self.rate_for_year(year)?;
            if year_return.from_fallback {
                coverage.partial = true;
                coverage.fallback_years.push(year);
            }
            years.insert(year, year_return);
        }

        if coverage.partial {
            warn!(
                fallback_years = ?coverage.fallback_years,
                "historical index has no record for some years, using long-run average"
            );
        }
        debug!(start_year, end_year, "generated return sequence");

        Ok(ReturnSequence { years, coverage })
    }
}
