use thiserror::Error;

/// Invalid input detected before a projection touches any lot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no return configured for year {year} in variable return map")]
    MissingVariableReturn { year: i32 },

    #[error("asset weights must sum to 1, got {sum}")]
    WeightsNotNormalized { sum: f64 },

    #[error("lot {lot_id} has {got} asset weights but {expected} asset classes are configured")]
    LotWeightMismatch {
        lot_id: usize,
        expected: usize,
        got: usize,
    },

    #[error("multi-asset configuration needs at least one asset class")]
    NoAssetClasses,

    #[error("tax rate must be > 0, got {rate}")]
    NonPositiveTaxRate { rate: f64 },

    #[error("{name} must be between 0 and 1, got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be finite")]
    NotFinite { name: &'static str },

    #[error("unknown historical index '{index}'")]
    UnknownIndex { index: String },

    #[error("lot {lot_id} ends before it starts")]
    LotEndsBeforeStart { lot_id: usize },

    #[error("lot {lot_id} has negative amount but is not a withdrawal")]
    NegativeDeposit { lot_id: usize },

    #[error("end year {end_year} is before start year {start_year}")]
    YearRangeReversed { start_year: i32, end_year: i32 },

    #[error("years {start_year}..={end_year} span more than {max} years")]
    YearSpanTooLong {
        start_year: i32,
        end_year: i32,
        max: i64,
    },

    #[error("horizon of {horizon} years exceeds the maximum of {max}")]
    HorizonTooLong { horizon: i32, max: i32 },

    #[error("a {horizon}-year horizon from {start_year} runs past the last representable year")]
    YearOverflow { start_year: i32, horizon: i32 },
}
