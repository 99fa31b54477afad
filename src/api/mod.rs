use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Datelike;
use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::{
    AllowanceLedger, AssetClass, BaseRateTable, BuiltinIndices, CacheStats, Granularity,
    HorizonRecommendation, IndexSummary, LotSpec, MAX_HORIZON_YEARS, MAX_PROJECTION_SPAN,
    OptimizationReport, OptimizationRequest,
    ProjectionCache, ProjectionInput, ProjectionTrace, ReturnConfiguration, SavingsPlan,
    TaxConfig, optimize, recommend_horizon,
};

const DEFAULT_TAX_RATE_PCT: f64 = 26.375;
const DEFAULT_PARTIAL_EXEMPTION_PCT: f64 = 30.0;
const DEFAULT_ALLOWANCE: f64 = 2_000.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ApiReturnConfig {
    #[serde(alias = "fixed-rate")]
    Fixed { rate: f64 },
    Random {
        mean: f64,
        #[serde(alias = "volatility")]
        std_dev: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Variable { rates: BTreeMap<i32, f64> },
    Historical {
        #[serde(alias = "indexId")]
        index: String,
    },
    MultiAsset {
        assets: Vec<ApiAssetClass>,
        #[serde(default)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAssetClass {
    name: String,
    weight: f64,
    expected_return: f64,
    #[serde(default)]
    volatility: f64,
}

impl From<ApiReturnConfig> for ReturnConfiguration {
    fn from(value: ApiReturnConfig) -> Self {
        match value {
            ApiReturnConfig::Fixed { rate } => ReturnConfiguration::Fixed { rate: rate / 100.0 },
            ApiReturnConfig::Random {
                mean,
                std_dev,
                seed,
            } => ReturnConfiguration::Random {
                mean: mean / 100.0,
                std_dev: std_dev / 100.0,
                seed,
            },
            ApiReturnConfig::Variable { rates } => ReturnConfiguration::Variable {
                rates: rates
                    .into_iter()
                    .map(|(year, rate)| (year, rate / 100.0))
                    .collect(),
            },
            ApiReturnConfig::Historical { index } => ReturnConfiguration::Historical { index },
            ApiReturnConfig::MultiAsset { assets, seed } => ReturnConfiguration::MultiAsset {
                assets: assets
                    .into_iter()
                    .map(|a| AssetClass {
                        name: a.name,
                        weight: a.weight / 100.0,
                        expected_return: a.expected_return / 100.0,
                        volatility: a.volatility / 100.0,
                    })
                    .collect(),
                seed,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPayload {
    start_year: i32,
    end_year: i32,
    #[serde(default)]
    lots: Vec<LotSpec>,
    #[serde(default)]
    savings_plans: Vec<SavingsPlan>,
    returns: ApiReturnConfig,
    tax_rate: Option<f64>,
    surcharge: Option<f64>,
    partial_exemption: Option<f64>,
    base_rates: Option<BTreeMap<i32, f64>>,
    default_base_rate: Option<f64>,
    #[serde(default)]
    allowance: BTreeMap<i32, f64>,
    default_allowance: Option<f64>,
    granularity: Option<Granularity>,
    tax_reduces_capital: Option<bool>,
    #[serde(default)]
    weights_in_percent: bool,
}

#[derive(Args, Debug, Clone)]
pub struct OptimizeArgs {
    #[arg(long, help = "Unrealized capital gains to realize")]
    pub pool: f64,
    #[arg(long, default_value_t = 10, help = "Years to spread realization over")]
    pub horizon: i32,
    #[arg(long, default_value_t = 0.0, help = "Current portfolio value; caps the pool when > 0")]
    pub portfolio_value: f64,
    #[arg(long, default_value_t = 5.0, help = "Expected annual return in percent")]
    pub expected_return: f64,
    #[arg(long, default_value_t = DEFAULT_TAX_RATE_PCT, help = "Flat capital gains tax rate in percent")]
    pub tax_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Surcharge in percentage points, e.g. church tax")]
    pub surcharge: f64,
    #[arg(long, default_value_t = DEFAULT_PARTIAL_EXEMPTION_PCT, help = "Teilfreistellung in percent")]
    pub partial_exemption: f64,
    #[arg(long, default_value_t = DEFAULT_ALLOWANCE, help = "Annual tax-free allowance")]
    pub allowance: f64,
    #[arg(long, help = "First realization year, defaults to the current year")]
    pub start_year: Option<i32>,
    #[arg(skip)]
    pub allowance_per_year: BTreeMap<i32, f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct OptimizePayload {
    pool: Option<f64>,
    #[serde(alias = "capitalGainsPool")]
    capital_gains_pool: Option<f64>,
    #[serde(alias = "horizon")]
    horizon_years: Option<i32>,
    current_portfolio_value: Option<f64>,
    expected_return: Option<f64>,
    tax_rate: Option<f64>,
    surcharge: Option<f64>,
    partial_exemption: Option<f64>,
    allowance: Option<f64>,
    start_year: Option<i32>,
    allowance_per_year: Option<BTreeMap<i32, f64>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    #[serde(flatten)]
    pub trace: ProjectionTrace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_note: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub report: OptimizationReport,
    pub horizons: HorizonRecommendation,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone, Default)]
struct AppState {
    cache: Arc<Mutex<ProjectionCache>>,
}

fn check_percent(name: &str, value: f64) -> Result<(), String> {
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{name} must be between 0 and 100"));
    }
    Ok(())
}

pub fn build_projection_input(payload: ProjectPayload) -> Result<ProjectionInput, String> {
    if payload.end_year < payload.start_year {
        return Err("endYear must be >= startYear".to_string());
    }
    if i64::from(payload.end_year) - i64::from(payload.start_year) > MAX_PROJECTION_SPAN {
        return Err(format!(
            "projection may span at most {MAX_PROJECTION_SPAN} years"
        ));
    }

    let tax_rate = payload.tax_rate.unwrap_or(DEFAULT_TAX_RATE_PCT);
    let surcharge = payload.surcharge.unwrap_or(0.0);
    let partial_exemption = payload
        .partial_exemption
        .unwrap_or(DEFAULT_PARTIAL_EXEMPTION_PCT);
    if !tax_rate.is_finite() || tax_rate <= 0.0 {
        return Err("taxRate must be > 0".to_string());
    }
    check_percent("taxRate", tax_rate)?;
    check_percent("surcharge", surcharge)?;
    check_percent("partialExemption", partial_exemption)?;

    let default_allowance = payload.default_allowance.unwrap_or(DEFAULT_ALLOWANCE);
    if !default_allowance.is_finite() || default_allowance < 0.0 {
        return Err("defaultAllowance must be >= 0".to_string());
    }
    if payload.allowance.values().any(|a| !a.is_finite() || *a < 0.0) {
        return Err("allowance amounts must be >= 0".to_string());
    }

    let mut base_rates = BaseRateTable::default();
    if let Some(rate) = payload.default_base_rate {
        base_rates.default_rate = rate / 100.0;
    }
    for (year, rate) in payload.base_rates.unwrap_or_default() {
        base_rates.rates.insert(year, rate / 100.0);
    }

    let mut lots = payload.lots;
    let mut savings_plans = payload.savings_plans;
    if payload.weights_in_percent {
        let to_fraction = |weights: &mut Option<Vec<f64>>| {
            if let Some(weights) = weights {
                weights.iter_mut().for_each(|w| *w /= 100.0);
            }
        };
        lots.iter_mut().for_each(|lot| to_fraction(&mut lot.weights));
        savings_plans
            .iter_mut()
            .for_each(|plan| to_fraction(&mut plan.weights));
    }

    Ok(ProjectionInput {
        start_year: payload.start_year,
        end_year: payload.end_year,
        lots,
        savings_plans,
        returns: payload.returns.into(),
        tax: TaxConfig {
            tax_rate: tax_rate / 100.0,
            surcharge: surcharge / 100.0,
            partial_exemption: partial_exemption / 100.0,
            base_rates,
        },
        allowance: payload.allowance,
        default_allowance,
        granularity: payload.granularity.unwrap_or_default(),
        tax_reduces_capital: payload.tax_reduces_capital.unwrap_or(true),
    })
}

pub fn build_optimization_request(args: OptimizeArgs) -> Result<OptimizationRequest, String> {
    if !args.pool.is_finite() {
        return Err("--pool must be finite".to_string());
    }
    if args.horizon > MAX_HORIZON_YEARS {
        return Err(format!("--horizon must be <= {MAX_HORIZON_YEARS}"));
    }
    if !args.portfolio_value.is_finite() || args.portfolio_value < 0.0 {
        return Err("--portfolio-value must be >= 0".to_string());
    }
    if !args.expected_return.is_finite() || args.expected_return <= -100.0 {
        return Err("--expected-return must be > -100".to_string());
    }
    if !args.tax_rate.is_finite() || args.tax_rate <= 0.0 {
        return Err("--tax-rate must be > 0".to_string());
    }
    check_percent("--tax-rate", args.tax_rate)?;
    check_percent("--surcharge", args.surcharge)?;
    check_percent("--partial-exemption", args.partial_exemption)?;
    if !args.allowance.is_finite() || args.allowance < 0.0 {
        return Err("--allowance must be >= 0".to_string());
    }
    if args
        .allowance_per_year
        .values()
        .any(|a| !a.is_finite() || *a < 0.0)
    {
        return Err("allowancePerYear amounts must be >= 0".to_string());
    }

    Ok(OptimizationRequest {
        capital_gains_pool: args.pool,
        horizon_years: args.horizon,
        current_portfolio_value: args.portfolio_value,
        expected_return: args.expected_return / 100.0,
        start_year: args
            .start_year
            .unwrap_or_else(|| chrono::Local::now().year()),
        tax: TaxConfig {
            tax_rate: args.tax_rate / 100.0,
            surcharge: args.surcharge / 100.0,
            partial_exemption: args.partial_exemption / 100.0,
            base_rates: BaseRateTable::default(),
        },
        allowance: AllowanceLedger::new(args.allowance_per_year, args.allowance),
    })
}

fn default_optimize_args() -> OptimizeArgs {
    OptimizeArgs {
        pool: 0.0,
        horizon: 10,
        portfolio_value: 0.0,
        expected_return: 5.0,
        tax_rate: DEFAULT_TAX_RATE_PCT,
        surcharge: 0.0,
        partial_exemption: DEFAULT_PARTIAL_EXEMPTION_PCT,
        allowance: DEFAULT_ALLOWANCE,
        start_year: None,
        allowance_per_year: BTreeMap::new(),
    }
}

fn optimize_args_from_payload(payload: OptimizePayload) -> OptimizeArgs {
    let mut args = default_optimize_args();
    if let Some(v) = payload.capital_gains_pool.or(payload.pool) {
        args.pool = v;
    }
    if let Some(v) = payload.horizon_years {
        args.horizon = v;
    }
    if let Some(v) = payload.current_portfolio_value {
        args.portfolio_value = v;
    }
    if let Some(v) = payload.expected_return {
        args.expected_return = v;
    }
    if let Some(v) = payload.tax_rate {
        args.tax_rate = v;
    }
    if let Some(v) = payload.surcharge {
        args.surcharge = v;
    }
    if let Some(v) = payload.partial_exemption {
        args.partial_exemption = v;
    }
    if let Some(v) = payload.allowance {
        args.allowance = v;
    }
    if let Some(v) = payload.start_year {
        args.start_year = Some(v);
    }
    if let Some(v) = payload.allowance_per_year {
        args.allowance_per_year = v;
    }
    args
}

pub fn run_projection(
    input: &ProjectionInput,
    cache: &mut ProjectionCache,
) -> Result<ProjectResponse, String> {
    let trace = cache
        .get_or_project(input, &BuiltinIndices)
        .map_err(|e| e.to_string())?;
    let coverage_note = trace.coverage.partial.then(|| {
        format!(
            "No index data for {:?}; the index's long-run average return was used.",
            trace.coverage.fallback_years
        )
    });
    Ok(ProjectResponse {
        trace,
        coverage_note,
    })
}

pub fn run_optimization(args: OptimizeArgs) -> Result<OptimizeResponse, String> {
    let request = build_optimization_request(args)?;
    let report = optimize(&request).map_err(|e| e.to_string())?;
    let horizons = recommend_horizon(&request).map_err(|e| e.to_string())?;
    Ok(OptimizeResponse { report, horizons })
}

pub fn project_from_json(json: &str) -> Result<ProjectResponse, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid projection JSON: {e}"))?;
    let input = build_projection_input(payload)?;
    run_projection(&input, &mut ProjectionCache::with_capacity(1))
}

pub fn router() -> Router {
    Router::new()
        .route("/api/project", post(project_handler))
        .route(
            "/api/optimize",
            get(optimize_get_handler).post(optimize_post_handler),
        )
        .route("/api/indices", get(indices_handler))
        .route("/api/cache", get(cache_stats_handler).delete(cache_clear_handler))
        .fallback(not_found_handler)
        .with_state(AppState::default())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("depotplan HTTP API listening on http://{addr}");

    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProjectPayload>,
) -> Response {
    project_handler_impl(&state, payload).await
}

async fn project_handler_impl(state: &AppState, payload: ProjectPayload) -> Response {
    let input = match build_projection_input(payload) {
        Ok(input) => input,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let mut cache = state.cache.lock().await;
    match run_projection(&input, &mut cache) {
        Ok(response) => {
            if response.trace.coverage.partial {
                warn!(
                    fallback_years = ?response.trace.coverage.fallback_years,
                    "projection used index average for uncovered years"
                );
            }
            json_response(StatusCode::OK, response)
        }
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn optimize_get_handler(Query(payload): Query<OptimizePayload>) -> Response {
    optimize_handler_impl(payload).await
}

async fn optimize_post_handler(Json(payload): Json<OptimizePayload>) -> Response {
    optimize_handler_impl(payload).await
}

async fn optimize_handler_impl(payload: OptimizePayload) -> Response {
    match run_optimization(optimize_args_from_payload(payload)) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn indices_handler() -> Response {
    json_response(StatusCode::OK, BuiltinIndices::list())
}

async fn cache_stats_handler(State(state): State<AppState>) -> Response {
    let stats: CacheStats = state.cache.lock().await.stats();
    json_response(StatusCode::OK, stats)
}

async fn cache_clear_handler(State(state): State<AppState>) -> Response {
    state.cache.lock().await.clear();
    info!("projection cache cleared");
    StatusCode::NO_CONTENT.into_response()
}

pub fn indices() -> Vec<IndexSummary> {
    BuiltinIndices::list()
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
