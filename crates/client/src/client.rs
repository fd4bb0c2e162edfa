//! # Fabric Client
//!
//! SDK sisi pemanggil untuk gateway dan witness.
//!
//! ## Submission
//!
//! ```text
//! submit_record(sub, key)
//!   ├── cache hit (key) ──────────────► response tersimpan
//!   ├── validate_submission ──err────► ClientError::Validation
//!   └── retry_with_backoff {
//!         POST /record  (Idempotency-Key, timeout per attempt)
//!       } ──► cache (key) ──► SubmissionResponse
//! ```
//!
//! ## Verification
//!
//! [`FabricClient::verify_record`] mengambil attestation langsung dari
//! witness dan menjalankan [`verify_quorum`] yang sama dengan gateway,
//! sehingga hasilnya tidak bergantung pada kejujuran gateway.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use fabric_common::{
    validate_submission, verify_quorum, ConflictQuery, ConflictTicket, ErrorBody, FabricConfig,
    LedgerEntry, LedgerPage, QuorumResult, RecordLookup, RecordSubmission, SubmissionResponse,
    VerificationResponse, WitnessAttestation, WitnessStatus,
};

use crate::cache::{ResponseCache, DEFAULT_CACHE_CAPACITY};
use crate::error::ClientError;
use crate::retry::{retry_with_backoff, RetryConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Timeout per attempt / per request.
    pub timeout_ms: u64,
    pub retry: RetryConfig,
    pub cache_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry: RetryConfig::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct FabricClient {
    gateway_url: String,
    config: FabricConfig,
    options: ClientOptions,
    http: reqwest::Client,
    cache: ResponseCache,
}

impl FabricClient {
    /// Membuat FabricClient baru untuk gateway di `gateway_url`.
    #[must_use]
    pub fn new(gateway_url: impl Into<String>, config: FabricConfig, options: ClientOptions) -> Self {
        Self::with_http_client(gateway_url, config, options, reqwest::Client::new())
    }

    #[must_use]
    pub fn with_http_client(
        gateway_url: impl Into<String>,
        config: FabricConfig,
        options: ClientOptions,
        http: reqwest::Client,
    ) -> Self {
        let gateway_url = gateway_url.into().trim_end_matches('/').to_string();
        Self {
            cache: ResponseCache::new(options.cache_capacity),
            gateway_url,
            config,
            options,
            http,
        }
    }

    #[must_use]
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_ms)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Submission
    // ────────────────────────────────────────────────────────────────────────

    /// Submit record lewat gateway.
    ///
    /// Dengan `idempotency_key`, response pertama di-cache lokal dan request
    /// berikutnya dengan key yang sama tidak menyentuh jaringan.
    pub async fn submit_record(
        &self,
        submission: &RecordSubmission,
        idempotency_key: Option<&str>,
    ) -> Result<SubmissionResponse, ClientError> {
        if let Some(key) = idempotency_key {
            if let Some(cached) = self.cache.get(key) {
                debug!(idempotency_key = key, record_id = %submission.record_id, "client cache hit");
                return Ok(cached);
            }
        }

        validate_submission(submission)?;

        let url = format!("{}/record", self.gateway_url);
        let outcome = retry_with_backoff(&self.options.retry, || {
            let mut req = self.http.post(&url).json(submission);
            if let Some(key) = idempotency_key {
                req = req.header("Idempotency-Key", key);
            }
            self.send_json::<SubmissionResponse>(req)
        })
        .await;

        let attempts = outcome.attempts();
        let response = outcome.into_result().map_err(|e| {
            warn!(record_id = %submission.record_id, attempts, error = %e, "submission failed");
            e
        })?;

        if let Some(key) = idempotency_key {
            self.cache.insert(key, response.clone());
        }
        Ok(response)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Verification
    // ────────────────────────────────────────────────────────────────────────

    /// Verifikasi independen langsung ke witness.
    ///
    /// Default: witness aktif di config, `quorum_size`, dan
    /// `max_timestamp_skew_ms` dari config. Witness yang gagal dilewati.
    pub async fn verify_record(
        &self,
        record_id: &str,
        witness_urls: Option<&[String]>,
        quorum: Option<usize>,
        delta_ms: Option<u64>,
    ) -> Result<QuorumResult, ClientError> {
        let urls: Vec<String> = match witness_urls {
            Some(urls) => urls.to_vec(),
            None => self
                .config
                .active_witnesses()
                .map(|w| w.base_url().to_string())
                .collect(),
        };

        let fetches = urls.iter().map(|url| self.fetch_attestation(url, record_id));
        let attestations: Vec<WitnessAttestation> = join_all(fetches).await.into_iter().flatten().collect();

        if attestations.is_empty() {
            return Err(ClientError::NoAttestations(record_id.to_string()));
        }

        Ok(verify_quorum(
            &attestations,
            quorum.unwrap_or(self.config.quorum_size),
            delta_ms.unwrap_or(self.config.max_timestamp_skew_ms),
        ))
    }

    async fn fetch_attestation(&self, base_url: &str, record_id: &str) -> Option<WitnessAttestation> {
        let url = match segment_url(base_url, &["witness", "records", record_id]) {
            Ok(url) => url,
            Err(e) => {
                warn!(witness = base_url, record_id, error = %e, "invalid witness url");
                return None;
            }
        };
        match self.send_json::<RecordLookup>(self.http.get(url)).await {
            Ok(lookup) => Some(lookup.attestation),
            Err(ClientError::Http { status: 404, .. }) => None,
            Err(e) => {
                warn!(witness = base_url, record_id, error = %e, "failed to fetch attestation");
                None
            }
        }
    }

    /// Verifikasi lewat gateway, lalu hitung ulang quorum secara lokal dari
    /// attestation yang dikembalikan.
    pub async fn verify_record_via_gateway(&self, record_id: &str) -> Result<VerificationResponse, ClientError> {
        let url = segment_url(&self.gateway_url, &["verify", record_id])?;
        let mut response = self.send_json::<VerificationResponse>(self.http.get(url)).await?;

        let ticket = response.quorum_result.conflict_ticket.take();
        let mut local = verify_quorum(
            &response.attestations,
            self.config.quorum_size,
            self.config.max_timestamp_skew_ms,
        );
        local.conflict_ticket = ticket;

        response.verified = local.ok;
        response.quorum_result = local;
        Ok(response)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────────

    pub async fn get_conflicts(&self, filter: &ConflictQuery) -> Result<Vec<ConflictTicket>, ClientError> {
        let req = self
            .http
            .get(format!("{}/api/conflicts", self.gateway_url))
            .query(filter);
        self.send_json(req).await
    }

    pub async fn get_witness_status(&self) -> Result<Vec<WitnessStatus>, ClientError> {
        let req = self.http.get(format!("{}/api/witnesses/status", self.gateway_url));
        self.send_json(req).await
    }

    /// Ledger langsung dari witness `witness_id` (harus ada di config).
    pub async fn fetch_witness_ledger(
        &self,
        witness_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>, ClientError> {
        let witness = self
            .config
            .witness(witness_id)
            .ok_or_else(|| ClientError::UnknownWitness(witness_id.to_string()))?;

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(since) = since {
            params.push(("since", since.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }

        let req = self
            .http
            .get(format!("{}/witness/ledger", witness.base_url()))
            .query(&params);
        let page: LedgerPage = self.send_json(req).await?;
        Ok(page.entries)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Transport
    // ────────────────────────────────────────────────────────────────────────

    /// Kirim request dengan timeout race dan decode body JSON.
    fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> impl Future<Output = Result<T, ClientError>> {
        let timeout = self.timeout();
        let timeout_ms = self.options.timeout_ms;
        async move {
            let exchange = async {
                let resp = req.send().await.map_err(ClientError::from)?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    let message = serde_json::from_str::<ErrorBody>(&text)
                        .map(|b| b.message.unwrap_or(b.error))
                        .unwrap_or(text);
                    return Err(ClientError::Http {
                        status: status.as_u16(),
                        message,
                    });
                }
                resp.json::<T>().await.map_err(ClientError::from)
            };

            match tokio::time::timeout(timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(timeout_ms)),
            }
        }
    }
}

/// Tambahkan `segments` ke path `base`. Tiap segment di-percent-encode utuh,
/// jadi record id berisi `?`, `#`, `/` atau `%` tetap satu segment.
fn segment_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, ClientError> {
    let mut url = reqwest::Url::parse(base.trim_end_matches('/'))
        .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|()| ClientError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fabric_common::{App, RecordMeta, StateView, WitnessConfig};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_options() -> ClientOptions {
        ClientOptions {
            timeout_ms: 500,
            retry: RetryConfig {
                max_retries: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            cache_capacity: 16,
        }
    }

    fn attestation(witness: &str, order: u64) -> WitnessAttestation {
        WitnessAttestation {
            witness_id: witness.to_string(),
            accept: true,
            ts: Utc::now(),
            state_view: StateView {
                record_id: "r1".to_string(),
                order,
                size: 23,
                state_hash: None,
                prev_record_id: None,
            },
            signature: None,
            conflict_ref: None,
        }
    }

    fn submission_response(attestations: Vec<WitnessAttestation>) -> SubmissionResponse {
        let quorum_result = verify_quorum(&attestations, 2, 2000);
        SubmissionResponse {
            success: quorum_result.ok,
            record_id: "r1".to_string(),
            attestations,
            quorum_result,
        }
    }

    fn chat() -> RecordSubmission {
        RecordSubmission::new(App::Chat, "r1", "hi", RecordMeta::chat("general"))
    }

    fn lookup_body(att: WitnessAttestation) -> serde_json::Value {
        serde_json::json!({
            "record": {
                "record_id": "r1",
                "ts": att.ts,
                "app": "chat",
                "payload": "hi",
                "meta": {"room_id": "general"},
                "state_view": att.state_view.clone(),
            },
            "attestation": att,
        })
    }

    // ── 1. submit_record ─────────────────────────────────────────────────

    #[tokio::test]
    async fn submit_sends_key_and_caches_response() {
        let gateway = MockServer::start().await;
        let body = submission_response(vec![attestation("w1", 1), attestation("w2", 1)]);
        Mock::given(method("POST"))
            .and(path("/record"))
            .and(header("Idempotency-Key", "k1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&gateway)
            .await;

        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), fast_options());
        let first = client.submit_record(&chat(), Some("k1")).await.expect("submit");
        assert!(first.success);
        let second = client.submit_record(&chat(), Some("k1")).await.expect("cached");
        assert_eq!(first, second);
        assert_eq!(client.cache().len(), 1);
    }

    #[tokio::test]
    async fn submit_retries_server_errors() {
        let gateway = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/record"))
            .respond_with(ResponseTemplate::new(503).set_body_json(ErrorBody::new("no witness attestations")))
            .up_to_n_times(2)
            .mount(&gateway)
            .await;
        Mock::given(method("POST"))
            .and(path("/record"))
            .respond_with(ResponseTemplate::new(200).set_body_json(submission_response(vec![attestation("w1", 1)])))
            .mount(&gateway)
            .await;

        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), fast_options());
        let resp = client.submit_record(&chat(), None).await.expect("third attempt succeeds");
        assert_eq!(resp.record_id, "r1");
        assert!(client.cache().is_empty());
    }

    #[tokio::test]
    async fn submit_does_not_retry_client_errors() {
        let gateway = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/record"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(ErrorBody::with_message("Invalid record submission", "room_id required")),
            )
            .expect(1)
            .mount(&gateway)
            .await;

        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), fast_options());
        let err = client.submit_record(&chat(), None).await.unwrap_err();
        match err {
            ClientError::Http { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "room_id required");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn submit_times_out_each_attempt() {
        let gateway = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/record"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&gateway)
            .await;

        let mut options = fast_options();
        options.timeout_ms = 100;
        options.retry.max_retries = 2;
        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), options);

        let err = client.submit_record(&chat(), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(100)));
        assert_eq!(gateway.received_requests().await.map(|r| r.len()), Some(2));
    }

    #[tokio::test]
    async fn invalid_submission_never_hits_network() {
        let gateway = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&gateway).await;

        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), fast_options());
        let sub = RecordSubmission::new(App::Chat, "r1", "hi", RecordMeta::default());
        assert!(matches!(
            client.submit_record(&sub, Some("k")).await,
            Err(ClientError::Validation(_))
        ));
    }

    // ── 2. verify_record ─────────────────────────────────────────────────

    #[tokio::test]
    async fn verify_record_runs_local_quorum() {
        let mut urls = Vec::new();
        let mut servers = Vec::new();
        for (id, order) in [("w1", 1), ("w2", 1), ("w3", 7)] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/witness/records/r1"))
                .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(attestation(id, order))))
                .mount(&server)
                .await;
            urls.push(server.uri());
            servers.push(server);
        }
        let missing = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&missing)
            .await;
        urls.push(missing.uri());

        let client = FabricClient::new("http://unused", FabricConfig::default(), fast_options());
        let result = client
            .verify_record("r1", Some(urls.as_slice()), Some(2), Some(2000))
            .await
            .expect("verify");
        assert!(result.ok);
        assert_eq!(result.total_witnesses, 3);
        assert_eq!(result.quorum_count, 2);
        assert_eq!(result.conflicting_attestations[0].witness_id, "w3");
        assert!(result.conflict_ticket.is_none());

        let strict = client
            .verify_record("r1", Some(urls.as_slice()), Some(3), None)
            .await
            .expect("verify");
        assert!(!strict.ok);
    }

    #[tokio::test]
    async fn verify_record_without_attestations_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let client = FabricClient::new("http://unused", FabricConfig::default(), fast_options());
        let err = client
            .verify_record("r1", Some(&[server.uri()][..]), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoAttestations(ref id) if id == "r1"));
    }

    #[tokio::test]
    async fn verify_via_gateway_recomputes_quorum() {
        let gateway = MockServer::start().await;
        let attestations = vec![attestation("w1", 1), attestation("w2", 1)];
        let claimed = VerificationResponse {
            record_id: "r1".to_string(),
            verified: true,
            quorum_result: verify_quorum(&attestations, 1, 2000),
            attestations,
        };
        Mock::given(method("GET"))
            .and(path("/verify/r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&claimed))
            .mount(&gateway)
            .await;

        // Q = 4 from the default config: two attestations are not enough.
        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), fast_options());
        let resp = client.verify_record_via_gateway("r1").await.expect("verify");
        assert!(!resp.verified);
        assert_eq!(resp.quorum_result.required_quorum, 4);
        assert_eq!(resp.quorum_result.quorum_count, 2);
    }

    #[tokio::test]
    async fn record_ids_are_encoded_as_one_segment() {
        let witness = MockServer::start().await;
        let mut att = attestation("w1", 1);
        att.state_view.record_id = "msg?1".to_string();
        Mock::given(method("GET"))
            .and(path("/witness/records/msg%3F1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(att.clone())))
            .expect(1)
            .mount(&witness)
            .await;

        let gateway = MockServer::start().await;
        let claimed = VerificationResponse {
            record_id: "msg?1".to_string(),
            verified: true,
            quorum_result: verify_quorum(std::slice::from_ref(&att), 1, 2000),
            attestations: vec![att],
        };
        Mock::given(method("GET"))
            .and(path("/verify/msg%3F1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&claimed))
            .expect(1)
            .mount(&gateway)
            .await;

        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), fast_options());
        let local = client
            .verify_record("msg?1", Some(&[witness.uri()][..]), Some(1), None)
            .await
            .expect("verify");
        assert!(local.ok);
        let via_gateway = client.verify_record_via_gateway("msg?1").await.expect("verify");
        assert_eq!(via_gateway.record_id, "msg?1");
    }

    #[test]
    fn segment_url_rejects_garbage_base() {
        assert!(matches!(
            segment_url("not a url", &["verify", "r1"]),
            Err(ClientError::InvalidUrl(_))
        ));
        let url = segment_url("http://gw:8080/", &["verify", "a/b"]).expect("url");
        assert_eq!(url.as_str(), "http://gw:8080/verify/a%2Fb");
    }

    // ── 3. queries ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn fetch_witness_ledger_uses_configured_endpoint() {
        let witness = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/witness/ledger"))
            .and(wiremock::matchers::query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "entries": [],
                "total": 0,
                "witness_id": "w1",
            })))
            .expect(1)
            .mount(&witness)
            .await;

        let config = FabricConfig {
            total_witnesses: 1,
            quorum_size: 1,
            witnesses: vec![WitnessConfig::new("w1", witness.uri(), "local")],
            ..FabricConfig::default()
        };
        let client = FabricClient::new("http://unused", config, fast_options());
        let entries = client.fetch_witness_ledger("w1", None, Some(5)).await.expect("ledger");
        assert!(entries.is_empty());

        assert!(matches!(
            client.fetch_witness_ledger("w9", None, None).await,
            Err(ClientError::UnknownWitness(_))
        ));
    }

    #[tokio::test]
    async fn get_conflicts_passes_filter() {
        let gateway = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/conflicts"))
            .and(wiremock::matchers::query_param("status", "open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<ConflictTicket>::new()))
            .expect(1)
            .mount(&gateway)
            .await;

        let client = FabricClient::new(gateway.uri(), FabricConfig::default(), fast_options());
        let filter = ConflictQuery {
            status: Some(fabric_common::ConflictStatus::Open),
            ..ConflictQuery::default()
        };
        assert!(client.get_conflicts(&filter).await.expect("conflicts").is_empty());
    }
}
