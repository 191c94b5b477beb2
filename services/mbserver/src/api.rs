//! REST gateway over the Modbus data store
//!
//! | Method | Path | Container |
//! |--------|------|-----------|
//! | GET/POST | `/coils` | coils |
//! | GET | `/d_in` | discrete inputs |
//! | GET/POST | `/hold_reg` | holding registers |
//! | GET | `/in_reg` | input registers |
//! | GET | `/health` | server status and counters |
//!
//! Reads take `?addr=&cnt=` and answer `{"data": [...]}`. Writes take
//! `{"addr": n, "data": [...]}` and answer with the values read back.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use common::logging::http_request_logger;
use modbus_core::{ModbusData, ServerStats, ServerStatsSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub data: Arc<ModbusData>,
    pub stats: Arc<ServerStats>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(data: Arc<ModbusData>, stats: Arc<ServerStats>) -> Self {
        Self {
            data,
            stats,
            started_at: Instant::now(),
        }
    }
}

/// `?addr=&cnt=`; both default when omitted
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub addr: u16,
    #[serde(default = "default_count")]
    pub cnt: u16,
}

fn default_count() -> u16 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest<T> {
    pub addr: u16,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub stats: ServerStatsSnapshot,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/coils", get(read_coils).post(write_coils))
        .route("/d_in", get(read_discrete_inputs))
        .route("/hold_reg", get(read_holding_registers).post(write_holding_registers))
        .route("/in_reg", get(read_input_registers))
        .route("/health", get(health))
        .layer(middleware::from_fn(http_request_logger))
        .with_state(state)
}

fn range(query: Result<Query<RangeQuery>, QueryRejection>) -> ApiResult<RangeQuery> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn write_request<T>(body: Result<Json<WriteRequest<T>>, JsonRejection>) -> ApiResult<WriteRequest<T>> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.data.len() > u16::MAX as usize {
        return Err(ApiError::BadRequest(format!(
            "{} values in one write",
            request.data.len()
        )));
    }
    Ok(request)
}

async fn read_coils(
    State(state): State<AppState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<DataResponse<bool>>> {
    let q = range(query)?;
    let data = state.data.read_coils(q.addr, q.cnt)?;
    Ok(Json(DataResponse { data }))
}

async fn write_coils(
    State(state): State<AppState>,
    body: Result<Json<WriteRequest<bool>>, JsonRejection>,
) -> ApiResult<Json<DataResponse<bool>>> {
    let request = write_request(body)?;
    state.data.force_multiple_coils(request.addr, &request.data)?;
    let data = state
        .data
        .read_coils(request.addr, request.data.len() as u16)?;
    Ok(Json(DataResponse { data }))
}

async fn read_discrete_inputs(
    State(state): State<AppState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<DataResponse<bool>>> {
    let q = range(query)?;
    let data = state.data.read_discrete_inputs(q.addr, q.cnt)?;
    Ok(Json(DataResponse { data }))
}

async fn read_holding_registers(
    State(state): State<AppState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<DataResponse<u16>>> {
    let q = range(query)?;
    let data = state.data.read_holding_registers(q.addr, q.cnt)?;
    Ok(Json(DataResponse { data }))
}

async fn write_holding_registers(
    State(state): State<AppState>,
    body: Result<Json<WriteRequest<u16>>, JsonRejection>,
) -> ApiResult<Json<DataResponse<u16>>> {
    let request = write_request(body)?;
    state
        .data
        .preset_multiple_registers(request.addr, &request.data)?;
    let data = state
        .data
        .read_holding_registers(request.addr, request.data.len() as u16)?;
    Ok(Json(DataResponse { data }))
}

async fn read_input_registers(
    State(state): State<AppState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<DataResponse<u16>>> {
    let q = range(query)?;
    let data = state.data.read_input_registers(q.addr, q.cnt)?;
    Ok(Json(DataResponse { data }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::SERVICE_VERSION,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        stats: state.stats.snapshot(),
    })
}
