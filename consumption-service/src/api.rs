use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use consumption_client::{
    accumulator,
    domain::{BucketKeys, LoadClass, PeriodKind, PowerReading},
    reset::ResetReport,
    rollup, Error, TenantId,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    pipeline::{Envelope, PipelineError},
    state::AppState,
    transform,
};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::UnknownSocket { .. } => StatusCode::NOT_FOUND,
            Error::InvalidTenant(_) | Error::UnknownLoadClass(_) | Error::InvalidInterval(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::ConnectionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_) | Error::ResetPartialFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Transform(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            other => Self::new(StatusCode::SERVICE_UNAVAILABLE, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        let body = serde_json::json!({ "success": false, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Successful response body: `success: true` plus the payload's fields.
#[derive(Serialize)]
pub struct ApiOk<T> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

impl<T> ApiOk<T> {
    fn json(body: T) -> Json<Self> {
        Json(Self { success: true, body })
    }
}

fn default_duration_seconds() -> f64 {
    60.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadingRequest {
    #[serde(alias = "load_type")]
    pub load_class: LoadClass,
    pub socket_id: String,
    #[serde(default, alias = "power")]
    pub power_watts: f64,
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: f64,
}

impl ReadingRequest {
    fn into_reading(self, tenant: TenantId) -> PowerReading {
        PowerReading {
            tenant,
            load_class: self.load_class,
            socket_id: self.socket_id,
            power_watts: self.power_watts,
            duration_seconds: self.duration_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReceiptBody {
    message: &'static str,
    watt_hours: f64,
    delta_mwh: i64,
    buckets: BucketKeys,
}

#[derive(Debug, Deserialize)]
pub struct IntervalQuery {
    interval: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetCheckBody {
    success: bool,
    resets_performed: Vec<PeriodKind>,
    errors: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

impl From<ResetReport> for ResetCheckBody {
    fn from(report: ResetReport) -> Self {
        Self {
            success: report.is_clean(),
            errors: report
                .failures
                .iter()
                .map(|(period, e)| format!("{period}: {e}"))
                .collect(),
            resets_performed: report.performed,
            timestamp: report.checked_at,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tenants/:tenant/readings", post(ingest_reading))
        .route("/tenants/:tenant/readings/batch", post(ingest_batch))
        .route("/tenants/:tenant/consumption", get(consumption_summary))
        .route("/tenants/:tenant/consumption/history", get(consumption_history))
        .route("/tenants/:tenant/resets/check", post(reset_check))
        .route("/tenants/:tenant/sockets/:load_class/:socket_id", get(socket_counters))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid http bind address '{bind_addr}'"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "http api listening");
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ingest_reading(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<ReadingRequest>,
) -> ApiResult<Json<ApiOk<ReceiptBody>>> {
    metrics::counter!("http_ingest_requests_total").increment(1);

    let res = ingest_one(&state, &tenant, req).await;
    if res.is_err() {
        metrics::counter!("http_ingest_failed_total").increment(1);
    }
    res.map(ApiOk::json)
}

async fn ingest_one(state: &AppState, tenant: &str, req: ReadingRequest) -> ApiResult<ReceiptBody> {
    let tenant = TenantId::parse(tenant)?;
    let env = Envelope::new(req.into_reading(tenant), state.clock.now());
    let env = transform::validate_reading(env, &state.validation)?;

    let store = state.resolver.resolve(&env.payload.tenant).await?;
    let receipt = accumulator::ingest(store.as_ref(), &env.payload, env.received_at).await?;

    Ok(ReceiptBody {
        message: "Consumption recorded",
        watt_hours: receipt.watt_hours(),
        delta_mwh: receipt.delta.get(),
        buckets: receipt.buckets,
    })
}

#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    accepted: usize,
}

async fn ingest_batch(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(batch): Json<Vec<ReadingRequest>>,
) -> ApiResult<(StatusCode, Json<ApiOk<BatchAccepted>>)> {
    metrics::counter!("http_ingest_requests_total").increment(1);

    let tenant = TenantId::parse(&tenant)?;
    // Reject unknown tenants here; the sink would only retry them.
    state.resolver.resolve(&tenant).await?;
    let received_at = state.clock.now();
    let accepted = batch.len();

    for req in batch {
        let env = Envelope::new(req.into_reading(tenant.clone()), received_at);
        if state.ingest_tx.send(env).await.is_err() {
            metrics::counter!("http_ingest_failed_total").increment(1);
            return Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "ingest pipeline closed"));
        }
    }

    Ok((StatusCode::ACCEPTED, ApiOk::json(BatchAccepted { accepted })))
}

async fn consumption_summary(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(q): Query<IntervalQuery>,
) -> ApiResult<Json<ApiOk<rollup::ConsumptionSummary>>> {
    let tenant = TenantId::parse(&tenant)?;
    let interval = PeriodKind::interval_or_default(q.interval.as_deref());
    let store = state.resolver.resolve(&tenant).await?;
    Ok(ApiOk::json(rollup::summary(store.as_ref(), interval).await?))
}

async fn consumption_history(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(q): Query<IntervalQuery>,
) -> ApiResult<Json<ApiOk<rollup::ConsumptionHistory>>> {
    let tenant = TenantId::parse(&tenant)?;
    let interval = PeriodKind::interval_or_default(q.interval.as_deref());
    let store = state.resolver.resolve(&tenant).await?;
    Ok(ApiOk::json(rollup::history(store.as_ref(), interval).await?))
}

async fn reset_check(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> ApiResult<(StatusCode, Json<ResetCheckBody>)> {
    let tenant = TenantId::parse(&tenant)?;
    let report = state.sweeper.run_tenant(&tenant).await?;
    let status = if report.is_clean() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report.into())))
}

async fn socket_counters(
    State(state): State<AppState>,
    Path((tenant, load_class, socket_id)): Path<(String, String, String)>,
) -> ApiResult<Json<ApiOk<consumption_client::domain::CounterRow>>> {
    let tenant = TenantId::parse(&tenant)?;
    let load_class = LoadClass::from_str(&load_class)?;
    let store = state.resolver.resolve(&tenant).await?;

    match store.counter_row(load_class, &socket_id).await? {
        Some(row) => Ok(ApiOk::json(row)),
        None => Err(Error::UnknownSocket { load_class, socket_id }.into()),
    }
}
