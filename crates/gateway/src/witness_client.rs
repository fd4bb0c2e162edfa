//! # Witness Client
//!
//! Fan-out HTTP ke seluruh witness aktif.
//!
//! ## Parallelism Model
//!
//! Setiap witness dipanggil bersamaan (`FuturesUnordered`), masing-masing
//! dengan timeout sendiri. Hasil dikumpulkan sampai semua future selesai
//! atau timeout; witness yang gagal hanya di-log dan tidak ikut di hasil.
//!
//! ## Ordering
//!
//! Hasil fan-out dikembalikan dalam urutan konfigurasi witness, bukan
//! urutan selesai, sehingga tie-break quorum (first-seen) tidak bergantung
//! pada latency jaringan.
//!
//! ## Timeouts
//!
//! | call | default |
//! |------|---------|
//! | submit / record lookup | 5000 ms |
//! | health / info | 5000 ms |
//! | ledger | 10000 ms |

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use fabric_common::{
    FabricConfig, LedgerPage, RecordLookup, RecordSubmission, WitnessAttestation, WitnessConfig,
    WitnessHealth, WitnessInfo, WitnessState, WitnessStatus,
};

use crate::metrics::GatewayMetrics;

// ════════════════════════════════════════════════════════════════════════════
// ERRORS & OPTIONS
// ════════════════════════════════════════════════════════════════════════════

/// Kegagalan satu panggilan ke satu witness.
#[derive(Debug, Error)]
pub enum WitnessCallError {
    #[error("unknown witness {0}")]
    UnknownWitness(String),

    #[error("timeout calling witness {0}")]
    Timeout(String),

    #[error("witness {witness_id} returned HTTP {status}")]
    Http { witness_id: String, status: u16 },

    #[error("witness {witness_id} has no such resource")]
    NotFound { witness_id: String },

    #[error("network error for witness {witness_id}: {message}")]
    Network { witness_id: String, message: String },

    #[error("invalid response from witness {witness_id}: {message}")]
    InvalidResponse { witness_id: String, message: String },

    #[error("invalid endpoint for witness {witness_id}: {message}")]
    InvalidEndpoint { witness_id: String, message: String },
}

impl WitnessCallError {
    /// Label `outcome` untuk metrics.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            WitnessCallError::UnknownWitness(_) => "unknown_witness",
            WitnessCallError::Timeout(_) => "timeout",
            WitnessCallError::Http { .. } => "http_error",
            WitnessCallError::NotFound { .. } => "not_found",
            WitnessCallError::Network { .. } => "network_error",
            WitnessCallError::InvalidResponse { .. } => "invalid_response",
            WitnessCallError::InvalidEndpoint { .. } => "invalid_endpoint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WitnessClientOptions {
    pub request_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub ledger_timeout_ms: u64,
}

impl Default for WitnessClientOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            health_timeout_ms: 5_000,
            ledger_timeout_ms: 10_000,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// WITNESS CLIENT
// ════════════════════════════════════════════════════════════════════════════

pub struct WitnessClient {
    witnesses: Vec<WitnessConfig>,
    client: reqwest::Client,
    options: WitnessClientOptions,
    metrics: Option<Arc<GatewayMetrics>>,
    /// Waktu kontak sukses terakhir per witness.
    last_seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl std::fmt::Debug for WitnessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WitnessClient")
            .field("witnesses", &self.witnesses.len())
            .field("options", &self.options)
            .finish()
    }
}

impl WitnessClient {
    /// Membuat WitnessClient baru dari daftar witness di config.
    ///
    /// `client` di-inject agar bisa dipakai bersama dan diganti di test.
    #[must_use]
    pub fn new(config: &FabricConfig, client: reqwest::Client, options: WitnessClientOptions) -> Self {
        Self {
            witnesses: config.witnesses.clone(),
            client,
            options,
            metrics: None,
            last_seen: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn witnesses(&self) -> &[WitnessConfig] {
        &self.witnesses
    }

    fn active(&self) -> impl Iterator<Item = &WitnessConfig> {
        self.witnesses.iter().filter(|w| w.active)
    }

    fn find(&self, witness_id: &str) -> Result<&WitnessConfig, WitnessCallError> {
        self.witnesses
            .iter()
            .find(|w| w.witness_id == witness_id)
            .ok_or_else(|| WitnessCallError::UnknownWitness(witness_id.to_string()))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Fan-out
    // ────────────────────────────────────────────────────────────────────────

    /// Kirim submission ke semua witness aktif.
    ///
    /// Witness yang timeout / error tidak ikut di hasil. Hasil bisa lebih
    /// sedikit dari jumlah witness, termasuk kosong.
    pub async fn submit_to_all(&self, submission: &RecordSubmission) -> Vec<WitnessAttestation> {
        let timeout = Duration::from_millis(self.options.request_timeout_ms);
        let started = Instant::now();

        let results = self
            .fan_out(|w| {
                let req = self
                    .client
                    .post(format!("{}/witness/record", w.base_url()))
                    .json(submission)
                    .timeout(timeout);
                self.send::<WitnessAttestation>(w, req)
            })
            .await;

        if let Some(m) = &self.metrics {
            m.fanout_latency.observe(started.elapsed().as_millis() as u64);
        }

        results
            .into_iter()
            .filter_map(|(w, result)| match result {
                Ok(att) => Some(att),
                Err(e) => {
                    warn!(witness_id = %w.witness_id, record_id = %submission.record_id, error = %e, "witness submission failed");
                    None
                }
            })
            .collect()
    }

    /// Ambil attestation `record_id` dari semua witness aktif.
    ///
    /// Witness yang tidak punya record (404) atau gagal tidak ikut di hasil.
    pub async fn verify_fanout(&self, record_id: &str) -> Vec<WitnessAttestation> {
        let results = self.fan_out(|w| self.fetch_record(w, record_id)).await;

        results
            .into_iter()
            .filter_map(|(w, result)| match result {
                Ok(lookup) => Some(lookup.attestation),
                Err(WitnessCallError::NotFound { .. }) => {
                    debug!(witness_id = %w.witness_id, record_id, "record not held by witness");
                    None
                }
                Err(e) => {
                    warn!(witness_id = %w.witness_id, record_id, error = %e, "record lookup failed");
                    None
                }
            })
            .collect()
    }

    /// Probe `/witness/health` di semua witness.
    ///
    /// Witness non-aktif dilaporkan `inactive` tanpa di-probe; probe yang
    /// gagal atau status selain `healthy` menjadi `error`.
    pub async fn health(&self) -> Vec<WitnessStatus> {
        let timeout = Duration::from_millis(self.options.health_timeout_ms);
        let probed = self
            .fan_out(|w| {
                let req = self
                    .client
                    .get(format!("{}/witness/health", w.base_url()))
                    .timeout(timeout);
                self.send::<WitnessHealth>(w, req)
            })
            .await;

        let mut by_id: HashMap<&str, WitnessState> = HashMap::new();
        for (w, result) in probed {
            let state = match result {
                Ok(h) if h.is_healthy() => WitnessState::Active,
                Ok(h) => {
                    warn!(witness_id = %w.witness_id, status = %h.status, "witness reports unhealthy status");
                    WitnessState::Error
                }
                Err(e) => {
                    warn!(witness_id = %w.witness_id, error = %e, "health probe failed");
                    WitnessState::Error
                }
            };
            by_id.insert(w.witness_id.as_str(), state);
        }

        let last_seen = self.last_seen.read();
        self.witnesses
            .iter()
            .map(|w| WitnessStatus {
                witness_id: w.witness_id.clone(),
                status: by_id.get(w.witness_id.as_str()).copied().unwrap_or(WitnessState::Inactive),
                last_seen: last_seen.get(&w.witness_id).copied(),
                region: w.region.clone(),
            })
            .collect()
    }

    /// `/witness/info` dari semua witness aktif yang merespons.
    pub async fn info_all(&self) -> Vec<WitnessInfo> {
        let timeout = Duration::from_millis(self.options.health_timeout_ms);
        self.fan_out(|w| {
            let req = self
                .client
                .get(format!("{}/witness/info", w.base_url()))
                .timeout(timeout);
            self.send::<WitnessInfo>(w, req)
        })
        .await
        .into_iter()
        .filter_map(|(w, result)| match result {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(witness_id = %w.witness_id, error = %e, "failed to get witness info");
                None
            }
        })
        .collect()
    }

    // ────────────────────────────────────────────────────────────────────────
    // Single witness
    // ────────────────────────────────────────────────────────────────────────

    /// Record `record_id` di satu witness. 404 menjadi `Ok(None)`.
    pub async fn get_record(
        &self,
        witness_id: &str,
        record_id: &str,
    ) -> Result<Option<RecordLookup>, WitnessCallError> {
        let witness = self.find(witness_id)?;
        match self.fetch_record(witness, record_id).await {
            Ok(lookup) => Ok(Some(lookup)),
            Err(WitnessCallError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Halaman ledger satu witness.
    pub async fn ledger(
        &self,
        witness_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<LedgerPage, WitnessCallError> {
        let witness = self.find(witness_id)?;
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(since) = since {
            params.push(("since", since.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }

        let req = self
            .client
            .get(format!("{}/witness/ledger", witness.base_url()))
            .query(&params)
            .timeout(Duration::from_millis(self.options.ledger_timeout_ms));
        self.send(witness, req).await
    }

    async fn fetch_record(
        &self,
        witness: &WitnessConfig,
        record_id: &str,
    ) -> Result<RecordLookup, WitnessCallError> {
        let url = match record_url(witness, record_id) {
            Ok(url) => url,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.witness_requests.inc(e.outcome());
                }
                return Err(e);
            }
        };
        let req = self
            .client
            .get(url)
            .timeout(Duration::from_millis(self.options.request_timeout_ms));
        self.send(witness, req).await
    }

    // ────────────────────────────────────────────────────────────────────────
    // Plumbing
    // ────────────────────────────────────────────────────────────────────────

    /// Jalankan `call` untuk semua witness aktif secara bersamaan.
    async fn fan_out<'a, T, F, Fut>(
        &'a self,
        call: F,
    ) -> Vec<(&'a WitnessConfig, Result<T, WitnessCallError>)>
    where
        F: Fn(&'a WitnessConfig) -> Fut,
        Fut: Future<Output = Result<T, WitnessCallError>> + 'a,
    {
        let mut pending: FuturesUnordered<_> = self
            .active()
            .enumerate()
            .map(|(idx, w)| {
                let fut = call(w);
                async move { (idx, w, fut.await) }
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        while let Some(item) = pending.next().await {
            results.push(item);
        }
        results.sort_by_key(|(idx, _, _)| *idx);
        results.into_iter().map(|(_, w, r)| (w, r)).collect()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        witness: &WitnessConfig,
        req: reqwest::RequestBuilder,
    ) -> Result<T, WitnessCallError> {
        let result = Self::execute(&witness.witness_id, req).await;

        match &result {
            Ok(_) => {
                self.last_seen.write().insert(witness.witness_id.clone(), Utc::now());
                if let Some(m) = &self.metrics {
                    m.witness_requests.inc("success");
                }
            }
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.witness_requests.inc(e.outcome());
                }
            }
        }
        result
    }

    async fn execute<T: DeserializeOwned>(
        witness_id: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T, WitnessCallError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                WitnessCallError::Timeout(witness_id.to_string())
            } else if e.is_decode() {
                WitnessCallError::InvalidResponse {
                    witness_id: witness_id.to_string(),
                    message: e.to_string(),
                }
            } else {
                WitnessCallError::Network {
                    witness_id: witness_id.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = req.send().await.map_err(classify)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WitnessCallError::NotFound {
                witness_id: witness_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(WitnessCallError::Http {
                witness_id: witness_id.to_string(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(classify)
    }
}

/// `<endpoint>/witness/records/<record_id>` dengan `record_id` di-encode
/// sebagai satu path segment (`?`, `#`, `/`, `%` tidak bocor ke URL).
fn record_url(witness: &WitnessConfig, record_id: &str) -> Result<reqwest::Url, WitnessCallError> {
    let invalid = |message: String| WitnessCallError::InvalidEndpoint {
        witness_id: witness.witness_id.clone(),
        message,
    };
    let mut url = reqwest::Url::parse(witness.base_url()).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("endpoint cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(["witness", "records", record_id]);
    Ok(url)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_common::{App, RecordMeta, StateView};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn attestation(witness_id: &str) -> WitnessAttestation {
        WitnessAttestation {
            witness_id: witness_id.to_string(),
            accept: true,
            ts: Utc::now(),
            state_view: StateView {
                record_id: "r1".to_string(),
                order: 1,
                size: 23,
                state_hash: None,
                prev_record_id: None,
            },
            signature: None,
            conflict_ref: None,
        }
    }

    fn config_for(servers: &[(&str, &MockServer)]) -> FabricConfig {
        let witnesses = servers
            .iter()
            .map(|(id, s)| WitnessConfig::new(*id, s.uri(), "local"))
            .collect::<Vec<_>>();
        FabricConfig {
            total_witnesses: witnesses.len(),
            quorum_size: 1,
            witnesses,
            ..FabricConfig::default()
        }
    }

    fn fast_options() -> WitnessClientOptions {
        WitnessClientOptions {
            request_timeout_ms: 300,
            health_timeout_ms: 300,
            ledger_timeout_ms: 300,
        }
    }

    fn submission() -> RecordSubmission {
        RecordSubmission::new(App::Chat, "r1", "hi", RecordMeta::chat("general"))
    }

    // ── 1. submit_to_all ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_submit_collects_in_config_order() {
        let a = MockServer::start().await;
        let b = MockServer::start().await;
        for (server, id) in [(&a, "w1"), (&b, "w2")] {
            Mock::given(method("POST"))
                .and(path("/witness/record"))
                .respond_with(ResponseTemplate::new(200).set_body_json(attestation(id)))
                .mount(server)
                .await;
        }

        let metrics = Arc::new(GatewayMetrics::new());
        let client = WitnessClient::new(&config_for(&[("w1", &a), ("w2", &b)]), reqwest::Client::new(), fast_options())
            .with_metrics(metrics.clone());
        let atts = client.submit_to_all(&submission()).await;

        let ids: Vec<_> = atts.iter().map(|a| a.witness_id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "w2"]);
        assert_eq!(metrics.witness_requests.get("success"), 2);
        assert_eq!(metrics.fanout_latency.get_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_omitted_not_fatal() {
        let ok = MockServer::start().await;
        let broken = MockServer::start().await;
        let slow = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(attestation("w1")))
            .mount(&ok)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&broken)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(attestation("w3"))
                    .set_delay(Duration::from_millis(2_000)),
            )
            .mount(&slow)
            .await;

        let metrics = Arc::new(GatewayMetrics::new());
        let client = WitnessClient::new(
            &config_for(&[("w1", &ok), ("w2", &broken), ("w3", &slow)]),
            reqwest::Client::new(),
            fast_options(),
        )
        .with_metrics(metrics.clone());

        let atts = client.submit_to_all(&submission()).await;
        assert_eq!(atts.len(), 1);
        assert_eq!(atts[0].witness_id, "w1");
        assert_eq!(metrics.witness_requests.get("http_error"), 1);
        assert_eq!(metrics.witness_requests.get("timeout"), 1);
    }

    #[tokio::test]
    async fn test_inactive_witness_not_contacted() {
        let a = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(attestation("w1")))
            .expect(0)
            .mount(&a)
            .await;

        let mut cfg = config_for(&[("w1", &a)]);
        cfg.witnesses[0].active = false;
        let client = WitnessClient::new(&cfg, reqwest::Client::new(), fast_options());
        assert!(client.submit_to_all(&submission()).await.is_empty());

        let status = client.health().await;
        assert_eq!(status[0].status, WitnessState::Inactive);
        assert_eq!(status[0].last_seen, None);
    }

    // ── 2. lookups ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_record_not_found_is_none() {
        let a = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/witness/records/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "Record not found"})))
            .mount(&a)
            .await;

        let client = WitnessClient::new(&config_for(&[("w1", &a)]), reqwest::Client::new(), fast_options());
        assert!(client.get_record("w1", "missing").await.expect("call").is_none());
        assert!(matches!(
            client.get_record("w9", "missing").await,
            Err(WitnessCallError::UnknownWitness(_))
        ));
        assert!(client.verify_fanout("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_record_id_is_a_single_path_segment() {
        let a = MockServer::start().await;
        let body = serde_json::json!({
            "record": {
                "record_id": "msg?1/#%",
                "ts": Utc::now(),
                "app": "chat",
                "payload": "hi",
                "meta": {"room_id": "general"},
                "state_view": attestation("w1").state_view,
            },
            "attestation": attestation("w1"),
        });
        Mock::given(method("GET"))
            .and(path("/witness/records/msg%3F1%2F%23%25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&a)
            .await;

        let client = WitnessClient::new(&config_for(&[("w1", &a)]), reqwest::Client::new(), fast_options());
        assert!(client.get_record("w1", "msg?1/#%").await.expect("call").is_some());
    }

    #[test]
    fn test_record_url_keeps_endpoint_prefix() {
        let w = WitnessConfig::new("w1", "http://witness-1:8091/fabric/", "local");
        let url = record_url(&w, "a b?").expect("url");
        assert_eq!(url.as_str(), "http://witness-1:8091/fabric/witness/records/a%20b%3F");

        let bad = WitnessConfig::new("w2", "not a url", "local");
        assert!(matches!(record_url(&bad, "r1"), Err(WitnessCallError::InvalidEndpoint { .. })));
    }

    #[tokio::test]
    async fn test_invalid_body_is_invalid_response() {
        let a = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/witness/records/r1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&a)
            .await;

        let client = WitnessClient::new(&config_for(&[("w1", &a)]), reqwest::Client::new(), fast_options());
        assert!(matches!(
            client.get_record("w1", "r1").await,
            Err(WitnessCallError::InvalidResponse { .. })
        ));
    }

    // ── 3. health ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_health_maps_probe_results() {
        let healthy = MockServer::start().await;
        let sick = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/witness/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(WitnessHealth {
                status: "healthy".to_string(),
                witness_id: "w1".to_string(),
                uptime_ms: 10,
                ledger_size: 0,
                last_record_ts: None,
            }))
            .mount(&healthy)
            .await;
        Mock::given(method("GET"))
            .and(path("/witness/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&sick)
            .await;

        let client = WitnessClient::new(
            &config_for(&[("w1", &healthy), ("w2", &sick)]),
            reqwest::Client::new(),
            fast_options(),
        );
        let status = client.health().await;
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].status, WitnessState::Active);
        assert_eq!(status[1].status, WitnessState::Error);
        assert_eq!(status[1].region, "local");
        assert!(status[0].last_seen.is_some());
        assert_eq!(status[1].last_seen, None);
    }
}
