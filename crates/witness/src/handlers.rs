//! # Witness HTTP API
//!
//! | method | path | response |
//! |--------|------|----------|
//! | POST | `/witness/record` | `WitnessAttestation` |
//! | GET | `/witness/ledger?since&limit&offset` | `LedgerPage` |
//! | GET | `/witness/records/:record_id` | `RecordLookup` / 404 |
//! | GET | `/ledger.ndjson?since` | NDJSON export |
//! | GET | `/witness/health` | `WitnessHealth` |
//! | GET | `/witness/info` | `WitnessInfo` |
//! | GET | `/witness/stats` | `LedgerStats` |
//! | GET | `/witness/validate` | `IntegrityReport` |
//!
//! Semua akses ledger berjalan di `spawn_blocking`. Error selalu berupa
//! `(StatusCode, Json<ErrorBody>)`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, instrument, warn};

use fabric_common::{ErrorBody, LedgerPage, RecordLookup, RecordSubmission};

use crate::ledger::LedgerFilter;
use crate::witness::WitnessNode;

/// Shared state untuk handler witness.
#[derive(Clone)]
pub struct WitnessAppState {
    pub node: Arc<WitnessNode>,
}

impl WitnessAppState {
    #[must_use]
    pub fn new(node: Arc<WitnessNode>) -> Self {
        Self { node }
    }
}

pub fn build_router(state: WitnessAppState) -> Router {
    Router::new()
        .route("/witness/record", post(submit_record))
        .route("/witness/ledger", get(get_ledger))
        .route("/witness/records/:record_id", get(get_record))
        .route("/ledger.ndjson", get(ledger_ndjson))
        .route("/witness/health", get(health))
        .route("/witness/info", get(info))
        .route("/witness/stats", get(stats))
        .route("/witness/validate", get(validate))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, error: &str, message: impl ToString) -> ApiError {
    (status, Json(ErrorBody::with_message(error, message.to_string())))
}

/// Jalankan `f` di thread blocking dengan akses ke node.
async fn blocking<T, F>(state: &WitnessAppState, context: &'static str, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&WitnessNode) -> Result<T, String> + Send + 'static,
{
    let node = state.node.clone();
    match tokio::task::spawn_blocking(move || f(&node)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => {
            error!(error = %message, "{}", context);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, context, message))
        }
        Err(e) => {
            error!(error = %e, "{}", context);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, context, e))
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ════════════════════════════════════════════════════════════════════════════

/// POST /witness/record
#[instrument(skip(state, body))]
async fn submit_record(
    State(state): State<WitnessAppState>,
    body: Result<Json<RecordSubmission>, JsonRejection>,
) -> Response {
    let submission = match body {
        Ok(Json(s)) => s,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed record submission");
            return api_error(StatusCode::BAD_REQUEST, "Invalid record submission", rejection.body_text())
                .into_response();
        }
    };

    match blocking(&state, "Failed to process record", move |node| {
        Ok(node.process_record(submission))
    })
    .await
    {
        Ok(attestation) => (StatusCode::OK, Json(attestation)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct LedgerQuery {
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl LedgerQuery {
    fn filter(&self) -> LedgerFilter {
        LedgerFilter {
            since: self.since,
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
            ..LedgerFilter::default()
        }
    }
}

/// GET /witness/ledger
#[instrument(skip(state))]
async fn get_ledger(
    State(state): State<WitnessAppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerPage>, ApiError> {
    let filter = query.filter();
    let page = blocking(&state, "Failed to read ledger", move |node| {
        let entries: Vec<_> = node.ledger().read(filter).map_err(|e| e.to_string())?.collect();
        Ok(LedgerPage {
            total: entries.len(),
            entries,
            witness_id: node.witness_id().to_string(),
        })
    })
    .await?;
    Ok(Json(page))
}

/// GET /witness/records/:record_id
#[instrument(skip(state))]
async fn get_record(
    State(state): State<WitnessAppState>,
    Path(record_id): Path<String>,
) -> Result<Json<RecordLookup>, ApiError> {
    let entry = blocking(&state, "Failed to get record", move |node| {
        node.ledger().get_record(&record_id).map_err(|e| e.to_string())
    })
    .await?;

    match entry {
        Some(e) => Ok(Json(RecordLookup {
            record: e.record,
            attestation: e.attestation,
        })),
        None => Err((StatusCode::NOT_FOUND, Json(ErrorBody::new("Record not found")))),
    }
}

/// GET /ledger.ndjson
///
/// Tanpa `since`: seluruh file apa adanya. Dengan `since`: entry dengan
/// `record.ts >= since`, diserialisasi ulang per baris.
async fn ledger_ndjson(
    State(state): State<WitnessAppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Response, ApiError> {
    let since = query.since;
    let body = blocking(&state, "Failed to export ledger", move |node| match since {
        None => node.ledger().export_as_text().map_err(|e| e.to_string()),
        Some(since) => {
            let lines = node
                .ledger()
                .read(LedgerFilter::new().since(since))
                .map_err(|e| e.to_string())?
                .map(|entry| serde_json::to_string(&entry).map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(lines.join("\n"))
        }
    })
    .await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok((StatusCode::OK, headers, body).into_response())
}

/// GET /witness/health
async fn health(State(state): State<WitnessAppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.node.health()))
}

/// GET /witness/info
async fn info(State(state): State<WitnessAppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.node.info()))
}

/// GET /witness/stats
async fn stats(State(state): State<WitnessAppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.node.ledger().stats()))
}

/// GET /witness/validate
async fn validate(State(state): State<WitnessAppState>) -> Result<Response, ApiError> {
    let report = blocking(&state, "Failed to validate ledger", |node| {
        Ok(node.ledger().validate_integrity())
    })
    .await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
