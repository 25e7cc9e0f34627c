//! HTTP API
//!
//! - `POST /compile`: compile an algebra plan, optionally binding parameter batches
//! - `GET /entities`: catalog entity names
//! - `GET /health`
//! - `GET /metrics`: Prometheus text format

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docpush_compiler::dynamic::{self, ParameterBatch};
use docpush_compiler::{CompileError, CompiledQuery, Compiler, InlineBlobResolver};
use docpush_ir::{AlgebraNode, MemoryCatalog};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::Metrics;

/// Compiled plans keyed by fingerprint, evicted oldest-first
#[derive(Debug)]
pub struct PlanCache {
    capacity: usize,
    entries: HashMap<String, CompiledQuery>,
    order: VecDeque<String>,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<CompiledQuery> {
        self.entries.get(fingerprint).cloned()
    }

    pub fn insert(&mut self, fingerprint: String, query: CompiledQuery) {
        if self.capacity == 0 || self.entries.contains_key(&fingerprint) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(fingerprint.clone());
        self.entries.insert(fingerprint, query);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<MemoryCatalog>,
    pub cache: Arc<Mutex<PlanCache>>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(catalog: MemoryCatalog, cache_capacity: usize, metrics: Metrics) -> Self {
        Self {
            catalog: Arc::new(catalog),
            cache: Arc::new(Mutex::new(PlanCache::new(cache_capacity))),
            metrics,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub plan: AlgebraNode,
    /// One binding per batch; each yields a bound copy of the query
    #[serde(default)]
    pub parameters: Vec<ParameterBatch>,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub request_id: String,
    pub fingerprint: String,
    pub cached: bool,
    pub query: CompiledQuery,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bound: Vec<JsonValue>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Compile(err) => error_kind(err),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Compile(CompileError::MissingParameter(_) | CompileError::InvalidLiteral(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Compile(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Metric label for a compile error
fn error_kind(err: &CompileError) -> &'static str {
    match err {
        CompileError::UnsupportedExpression(_) => "unsupported_expression",
        CompileError::UnsupportedAggregateModifier(_) => "unsupported_aggregate_modifier",
        CompileError::UnsupportedAggregate(_) => "unsupported_aggregate",
        CompileError::UnsupportedOperation(_) => "unsupported_operation",
        CompileError::UnsupportedNullOrdering(_) => "unsupported_null_ordering",
        CompileError::InvalidFieldReference(_) => "invalid_field_reference",
        CompileError::Catalog(_) => "catalog",
        CompileError::MissingParameter(_) => "missing_parameter",
        CompileError::InvalidLiteral(_) => "invalid_literal",
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/compile", post(compile_plan))
        .route("/entities", get(list_entities))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn compile_plan(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> Result<Json<CompileResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let fingerprint = request.plan.fingerprint();

    let cached = lock_cache(&state)?.get(&fingerprint);
    let (query, cached) = match cached {
        Some(query) => {
            state.metrics.record_cache_hit();
            (query, true)
        }
        None => {
            let started = Instant::now();
            let query = Compiler::new(state.catalog.as_ref())
                .compile(&request.plan)
                .map_err(|err| {
                    warn!(%request_id, %fingerprint, error = %err, "compile failed");
                    state.metrics.record_failure(error_kind(&err));
                    err
                })?;
            state
                .metrics
                .record_compilation(query.form(), started.elapsed().as_secs_f64());
            lock_cache(&state)?.insert(fingerprint.clone(), query.clone());
            (query, false)
        }
    };

    let bound = if request.parameters.is_empty() {
        Vec::new()
    } else {
        let template = serde_json::to_value(&query).map_err(|e| ApiError::Internal(e.to_string()))?;
        if !dynamic::contains_placeholders(&template) {
            return Err(ApiError::BadRequest(
                "parameters supplied for a plan without dynamic parameters".to_string(),
            ));
        }
        dynamic::instantiate(&template, &request.parameters, &InlineBlobResolver)?
    };

    info!(
        %request_id,
        %fingerprint,
        cached,
        form = query.form(),
        batches = bound.len(),
        "compile request served"
    );

    Ok(Json(CompileResponse {
        request_id,
        fingerprint,
        cached,
        query,
        bound,
    }))
}

fn lock_cache(state: &AppState) -> Result<std::sync::MutexGuard<'_, PlanCache>, ApiError> {
    state
        .cache
        .lock()
        .map_err(|_| ApiError::Internal("plan cache lock poisoned".to_string()))
}

pub async fn list_entities(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.entity_names().into_iter().map(String::from).collect())
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render_prometheus()
}
