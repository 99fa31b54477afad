mod allowance;
mod cache;
mod engine;
mod error;
mod historical;
mod lots;
mod optimizer;
mod returns;
mod rng;
mod tax;
mod types;

pub use allowance::AllowanceLedger;
pub use cache::{CacheStats, ProjectionCache, input_digest};
pub use engine::{ProjectionRun, RunConfig, project, run};
pub use error::ConfigError;
pub use historical::{BuiltinIndices, HistoricalIndexData, IndexCoverage, IndexSummary};
pub use lots::{ContributionLot, LotBook, LotKind, LotSpec, PlanPeriod, SavingsPlan};
pub use optimizer::{
    HORIZON_CANDIDATES, HorizonCandidate, HorizonRecommendation, MAX_HORIZON_YEARS,
    OptimizationReport, OptimizationRequest, OptimizationSchedule, ScheduleComparison,
    ScheduleStrategy, ScheduleYear,
    compare_schedules, evaluate_realizations, even_split, optimize, recommend_horizon,
};
pub use returns::{
    AssetClass, CoverageReport, MAX_PROJECTION_SPAN, ReturnConfiguration, ReturnGenerator,
    ReturnSequence, YearReturn, check_year_span,
};
pub use rng::SeededRng;
pub use tax::{
    BaseRateTable, DEFAULT_BASE_RATE, DEFAULT_TAX_RATE, EQUITY_FUND_EXEMPTION, Realization,
    TaxConfig, YearStep, apply_year, realize_gain, vorabpauschale,
};
pub use types::{Granularity, ProjectionInput, ProjectionTrace, YearResult, YearSummary};
