//! # Gateway HTTP API
//!
//! | method | path | response |
//! |--------|------|----------|
//! | POST | `/record`, `/api/records` | `SubmissionResponse` |
//! | GET | `/verify/:record_id`, `/api/records/:record_id/verify` | `VerificationResponse` / 404 |
//! | GET | `/api/conflicts?since&status&limit` | `[ConflictTicket]` |
//! | GET | `/admin/conflicts/:id` | `ConflictTicket` / 404 |
//! | POST | `/admin/conflicts/:id/resolve` | `ConflictTicket` / 404 / 409 |
//! | POST | `/admin/conflicts/:id/escalate` | `ConflictTicket` / 404 / 409 |
//! | GET | `/api/witnesses/status` | `[WitnessStatus]` |
//! | GET | `/admin/witnesses/info` | `[WitnessInfo]` |
//! | GET | `/admin/witnesses/:id/ledger?since&limit` | `LedgerPage` |
//! | GET | `/health` | status gateway |
//! | GET | `/metrics` | Prometheus text |
//! | GET | `/admin/metrics` | JSON |
//! | GET | `/ws` | WebSocket conflict events |
//!
//! ## Submission Flow
//!
//! ```text
//! body ──► claim(Idempotency-Key) ──cached──► bytes (Idempotency-Replayed: true)
//!               │ ──pending──► tunggu pemilik key, lalu replay
//!               │ owner / tanpa key
//!               ▼
//!          validate_submission ──err──► 400
//!               │
//!               ▼
//!          fan-out ke witness ──kosong──► 503
//!               │
//!               ▼
//!          QuorumManager::verify ──ticket──► broadcast /ws
//!               │
//!               ▼
//!          serialize ──► cache (jika ada key) ──► 200
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};

use fabric_common::{
    validate_submission, ConflictQuery, ConflictTicket, ErrorBody, FabricConfig, QuorumResult,
    RecordSubmission, ResolutionMethod, SubmissionResponse, VerificationResponse, WitnessState,
    WitnessStatus,
};

use crate::events::ConflictBroadcaster;
use crate::idempotency::{Claim, IdempotencyCache, PendingResponse};
use crate::metrics::GatewayMetrics;
use crate::quorum::{ConflictStats, QuorumError, QuorumManager};
use crate::witness_client::{WitnessCallError, WitnessClient, WitnessClientOptions};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "idempotency-replayed";

// ════════════════════════════════════════════════════════════════════════════
// APP STATE
// ════════════════════════════════════════════════════════════════════════════

/// Shared state untuk semua handler gateway.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FabricConfig>,
    pub witnesses: Arc<WitnessClient>,
    pub quorum: Arc<QuorumManager>,
    pub idempotency: Arc<IdempotencyCache>,
    pub events: ConflictBroadcaster,
    pub metrics: Arc<GatewayMetrics>,
    pub started_at: Instant,
}

impl AppState {
    /// Membuat AppState baru. Metrics dibagi antara handler dan witness client.
    #[must_use]
    pub fn new(
        config: FabricConfig,
        http: reqwest::Client,
        options: WitnessClientOptions,
        idempotency_ttl: Duration,
    ) -> Self {
        let metrics = Arc::new(GatewayMetrics::new());
        let witnesses = WitnessClient::new(&config, http, options).with_metrics(metrics.clone());
        Self {
            quorum: Arc::new(QuorumManager::from_config(&config)),
            witnesses: Arc::new(witnesses),
            idempotency: Arc::new(IdempotencyCache::new(idempotency_ttl)),
            events: ConflictBroadcaster::default(),
            metrics,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Catat hasil satu ronde: metrics, broadcast ticket, gauge conflict.
    fn record_round(&self, result: &QuorumResult) {
        self.metrics.record_quorum(result.ok);
        if let Some(ticket) = &result.conflict_ticket {
            self.metrics.conflicts_opened.inc();
            let delivered = self.events.publish(ticket);
            debug!(conflict_id = %ticket.conflict_id, delivered, "conflict event published");
        }
        self.metrics.conflicts_open.set(self.quorum.open_count() as u64);
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/record", post(submit_record))
        .route("/api/records", post(submit_record))
        .route("/verify/:record_id", get(verify_record))
        .route("/api/records/:record_id/verify", get(verify_record))
        .route("/api/conflicts", get(list_conflicts))
        .route("/admin/conflicts/:conflict_id", get(get_conflict))
        .route("/admin/conflicts/:conflict_id/resolve", post(resolve_conflict))
        .route("/admin/conflicts/:conflict_id/escalate", post(escalate_conflict))
        .route("/api/witnesses/status", get(witness_status))
        .route("/admin/witnesses/info", get(witness_info))
        .route("/admin/witnesses/:witness_id/ledger", get(witness_ledger))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/admin/metrics", get(admin_metrics))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, error: &str, message: impl ToString) -> ApiError {
    (status, Json(ErrorBody::with_message(error, message.to_string())))
}

fn quorum_error(e: QuorumError) -> ApiError {
    let status = match &e {
        QuorumError::ConflictNotFound(_) | QuorumError::AttestationNotInTicket { .. } => {
            StatusCode::NOT_FOUND
        }
        QuorumError::AlreadyResolved(_) => StatusCode::CONFLICT,
    };
    api_error(status, "Conflict operation failed", e)
}

fn json_bytes(body: Bytes, replayed: bool) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if replayed {
        headers.insert(IDEMPOTENCY_REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    (StatusCode::OK, headers, body).into_response()
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

// ════════════════════════════════════════════════════════════════════════════
// RECORDS
// ════════════════════════════════════════════════════════════════════════════

/// POST /record
#[instrument(skip(state, headers, body))]
async fn submit_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RecordSubmission>, JsonRejection>,
) -> Response {
    state.metrics.submissions_total.inc();

    let submission = match body {
        Ok(Json(s)) => s,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed record submission");
            return api_error(StatusCode::BAD_REQUEST, "Invalid record submission", rejection.body_text())
                .into_response();
        }
    };

    let mut reservation: Option<PendingResponse> = None;
    if let Some(key) = idempotency_key(&headers) {
        loop {
            let cached = match state.idempotency.claim(&key) {
                Claim::Cached(bytes) => Some(bytes),
                Claim::Pending(rx) => {
                    debug!(idempotency_key = %key, "waiting for in-flight submission");
                    IdempotencyCache::wait(rx).await
                }
                Claim::Owner(owner) => {
                    reservation = Some(owner);
                    break;
                }
            };
            if let Some(bytes) = cached {
                state.metrics.idempotency_hits.inc();
                info!(idempotency_key = %key, record_id = %submission.record_id, "idempotent replay");
                return json_bytes(bytes, true);
            }
        }
    }

    if let Err(e) = validate_submission(&submission) {
        warn!(record_id = %submission.record_id, error = %e, "submission rejected by validation");
        return api_error(StatusCode::BAD_REQUEST, "Invalid record submission", e).into_response();
    }

    let attestations = state.witnesses.submit_to_all(&submission).await;
    if attestations.is_empty() {
        error!(record_id = %submission.record_id, "no witness attestations");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody::new("no witness attestations")),
        )
            .into_response();
    }

    let quorum_result = state.quorum.verify(&submission.record_id, &attestations);
    state.record_round(&quorum_result);

    info!(
        record_id = %submission.record_id,
        ok = quorum_result.ok,
        quorum_count = quorum_result.quorum_count,
        total = quorum_result.total_witnesses,
        skew_ms = quorum_result.max_skew_ms,
        "record submitted"
    );

    let response = SubmissionResponse {
        success: quorum_result.ok,
        record_id: submission.record_id,
        attestations,
        quorum_result,
    };
    let body = match serde_json::to_vec(&response) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            error!(error = %e, "failed to encode submission response");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to submit record", e)
                .into_response();
        }
    };

    if let Some(owner) = reservation {
        owner.complete(body.clone());
        state.metrics.idempotency_entries.set(state.idempotency.len() as u64);
    }

    json_bytes(body, false)
}

/// GET /verify/:record_id
#[instrument(skip(state))]
async fn verify_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> Result<Json<VerificationResponse>, ApiError> {
    state.metrics.verifications_total.inc();

    let attestations = state.witnesses.verify_fanout(&record_id).await;
    if attestations.is_empty() {
        return Err((StatusCode::NOT_FOUND, Json(ErrorBody::new("Record not found"))));
    }

    let quorum_result = state.quorum.verify(&record_id, &attestations);
    state.record_round(&quorum_result);

    Ok(Json(VerificationResponse {
        verified: quorum_result.ok,
        record_id,
        attestations,
        quorum_result,
    }))
}

// ════════════════════════════════════════════════════════════════════════════
// CONFLICTS
// ════════════════════════════════════════════════════════════════════════════

/// GET /api/conflicts
async fn list_conflicts(
    State(state): State<AppState>,
    Query(query): Query<ConflictQuery>,
) -> Json<Vec<ConflictTicket>> {
    Json(state.quorum.get_conflicts(&query))
}

/// GET /admin/conflicts/:conflict_id
async fn get_conflict(
    State(state): State<AppState>,
    Path(conflict_id): Path<String>,
) -> Result<Json<ConflictTicket>, ApiError> {
    state
        .quorum
        .get_conflict(&conflict_id)
        .map(Json)
        .ok_or_else(|| quorum_error(QuorumError::ConflictNotFound(conflict_id)))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    method: ResolutionMethod,
    /// Witness id pemilik attestation yang dipilih.
    chosen_attestation_id: String,
    #[serde(default)]
    reason: String,
}

/// POST /admin/conflicts/:conflict_id/resolve
#[instrument(skip(state, body))]
async fn resolve_conflict(
    State(state): State<AppState>,
    Path(conflict_id): Path<String>,
    body: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Json<ConflictTicket>, ApiError> {
    let Json(req) = body.map_err(|rejection| {
        api_error(StatusCode::BAD_REQUEST, "Invalid resolution request", rejection.body_text())
    })?;

    let ticket = state
        .quorum
        .resolve_conflict(&conflict_id, req.method, &req.chosen_attestation_id, req.reason)
        .map_err(quorum_error)?;
    state.metrics.conflicts_open.set(state.quorum.open_count() as u64);
    Ok(Json(ticket))
}

/// POST /admin/conflicts/:conflict_id/escalate
#[instrument(skip(state))]
async fn escalate_conflict(
    State(state): State<AppState>,
    Path(conflict_id): Path<String>,
) -> Result<Json<ConflictTicket>, ApiError> {
    let ticket = state.quorum.escalate_conflict(&conflict_id).map_err(quorum_error)?;
    state.metrics.conflicts_open.set(state.quorum.open_count() as u64);
    Ok(Json(ticket))
}

// ════════════════════════════════════════════════════════════════════════════
// WITNESSES
// ════════════════════════════════════════════════════════════════════════════

/// GET /api/witnesses/status
async fn witness_status(State(state): State<AppState>) -> Json<Vec<WitnessStatus>> {
    Json(state.witnesses.health().await)
}

/// GET /admin/witnesses/info
async fn witness_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.witnesses.info_all().await)
}

#[derive(Debug, Default, Deserialize)]
struct WitnessLedgerQuery {
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

/// GET /admin/witnesses/:witness_id/ledger
#[instrument(skip(state))]
async fn witness_ledger(
    State(state): State<AppState>,
    Path(witness_id): Path<String>,
    Query(query): Query<WitnessLedgerQuery>,
) -> Result<Response, ApiError> {
    match state.witnesses.ledger(&witness_id, query.since, query.limit).await {
        Ok(page) => Ok(Json(page).into_response()),
        Err(e @ WitnessCallError::UnknownWitness(_)) => {
            Err(api_error(StatusCode::NOT_FOUND, "Unknown witness", e))
        }
        Err(e) => {
            warn!(witness_id = %witness_id, error = %e, "ledger fetch failed");
            Err(api_error(StatusCode::BAD_GATEWAY, "Failed to fetch witness ledger", e))
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// OPERATIONAL
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    pub uptime_ms: u64,
    pub witnesses: usize,
    pub quorum_size: usize,
    pub open_conflicts: usize,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<GatewayHealth> {
    Json(GatewayHealth {
        status: "healthy".to_string(),
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        witnesses: state.config.witnesses.len(),
        quorum_size: state.config.quorum_size,
        open_conflicts: state.quorum.open_count(),
    })
}

/// GET /metrics
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.idempotency_entries.set(state.idempotency.len() as u64);
    state.metrics.conflicts_open.set(state.quorum.open_count() as u64);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminMetrics {
    pub conflicts: ConflictStats,
    /// witness_id → status.
    pub witness_health: std::collections::BTreeMap<String, WitnessState>,
    pub quorum_success_rate: f64,
    pub submissions_total: u64,
    pub idempotency_entries: usize,
    pub uptime_ms: u64,
}

/// GET /admin/metrics
async fn admin_metrics(State(state): State<AppState>) -> Json<AdminMetrics> {
    let witness_health = state
        .witnesses
        .health()
        .await
        .into_iter()
        .map(|s| (s.witness_id, s.status))
        .collect();

    Json(AdminMetrics {
        conflicts: state.quorum.stats(),
        witness_health,
        quorum_success_rate: state.metrics.quorum_success_rate(),
        submissions_total: state.metrics.submissions_total.get(),
        idempotency_entries: state.idempotency.len(),
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
    })
}

// ════════════════════════════════════════════════════════════════════════════
// WEBSOCKET
// ════════════════════════════════════════════════════════════════════════════

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.events.subscribe();
    debug!(subscribers = state.events.subscriber_count(), "websocket subscriber connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagging");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("websocket subscriber disconnected");
}
