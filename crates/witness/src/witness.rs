//! # Witness Node
//!
//! `WitnessNode` memvalidasi submission, memberi `order`, menyusun
//! attestation, lalu meng-append ke [`Ledger`].
//!
//! ## Flow `process_record`
//!
//! ```text
//! submission
//!   │
//!   ├── validate_submission ──✗──► rejection attestation
//!   │
//!   ├── [process lock]
//!   │     ├── record_id sudah ada?
//!   │     │     ├── konten sama  ──► attestation tersimpan (replay)
//!   │     │     └── konten beda  ──► rejection "duplicate record_id"
//!   │     ├── skew ts vs clock   ──✗──► rejection
//!   │     ├── order = ledger.next_order()
//!   │     ├── track L: state_hash + prev_record_id + signature
//!   │     └── ledger.append ──✗──► release order, rejection "processing error"
//!   │
//!   └── accept attestation
//! ```
//!
//! `process_record` tidak pernah return error: setiap kegagalan menjadi
//! rejection attestation yang well-formed.
//!
//! ## Blocking
//!
//! Append melakukan `sync_all`, jadi handler async memanggil
//! `process_record` lewat `spawn_blocking`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use fabric_common::crypto::record_state_hash;
use fabric_common::validation::rejection_ref;
use fabric_common::{
    now_millis, validate_submission, AttestationSigner, Ed25519Signer, FabricConfig,
    FabricRecord, Hasher, RecordSubmission, SecurityTrack, Sha256Hasher, StateView,
    ValidationError, WitnessAttestation, WitnessHealth, WitnessInfo,
};

use crate::ledger::Ledger;

pub const WITNESS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Satu witness: identitas, ledger, dan capability crypto.
pub struct WitnessNode {
    witness_id: String,
    region: String,
    security_track: SecurityTrack,
    fabric: FabricConfig,
    ledger: Ledger,
    hasher: Box<dyn Hasher>,
    signer: Option<Box<dyn AttestationSigner>>,
    /// Menyerialisasi duplicate lookup → order → append.
    process_lock: Mutex<()>,
    observed_skew_ms: AtomicU64,
    started_at: Instant,
}

impl std::fmt::Debug for WitnessNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WitnessNode")
            .field("witness_id", &self.witness_id)
            .field("region", &self.region)
            .field("security_track", &self.security_track)
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl WitnessNode {
    /// Membuat WitnessNode baru dengan track Z dan hasher SHA-256.
    #[must_use]
    pub fn new(
        witness_id: impl Into<String>,
        region: impl Into<String>,
        ledger: Ledger,
        fabric: FabricConfig,
    ) -> Self {
        Self {
            witness_id: witness_id.into(),
            region: region.into(),
            security_track: SecurityTrack::Z,
            fabric,
            ledger,
            hasher: Box::new(Sha256Hasher),
            signer: None,
            process_lock: Mutex::new(()),
            observed_skew_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Set security track. Track L tanpa signer mendapat key ed25519 baru.
    #[must_use]
    pub fn with_security_track(mut self, track: SecurityTrack) -> Self {
        self.security_track = track;
        if track.is_strict() && self.signer.is_none() {
            self.signer = Some(Box::new(Ed25519Signer::generate()));
        }
        self
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: Box<dyn Hasher>) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Box<dyn AttestationSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn witness_id(&self) -> &str {
        &self.witness_id
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub fn security_track(&self) -> SecurityTrack {
        self.security_track
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn observed_skew_ms(&self) -> u64 {
        self.observed_skew_ms.load(Ordering::Relaxed)
    }

    fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    // ════════════════════════════════════════════════════════════════════
    // PROCESS
    // ════════════════════════════════════════════════════════════════════

    /// Proses satu submission menjadi attestation.
    pub fn process_record(&self, submission: RecordSubmission) -> WitnessAttestation {
        let started = Instant::now();
        let record_id = submission.record_id.clone();

        info!(
            record_id = %record_id,
            app = %submission.app,
            payload_size = submission.payload.len(),
            witness_id = %self.witness_id,
            "processing record"
        );

        if let Err(e) = validate_submission(&submission) {
            warn!(record_id = %record_id, reason = %e, witness_id = %self.witness_id, "record validation failed");
            return self.rejection(&record_id, &e.to_string());
        }

        let _guard = self.process_lock.lock();

        match self.ledger.get_record(&record_id) {
            Ok(Some(existing)) => {
                if existing.record.same_content(&submission) {
                    info!(record_id = %record_id, witness_id = %self.witness_id, "replaying stored attestation");
                    return existing.attestation;
                }
                warn!(record_id = %record_id, witness_id = %self.witness_id, "record_id reused with different content");
                return self.rejection(&record_id, &ValidationError::DuplicateRecordId.to_string());
            }
            Ok(None) => {}
            Err(e) => {
                error!(record_id = %record_id, error = %e, "ledger lookup failed");
                return self.rejection(&record_id, &format!("processing error: {}", e));
            }
        }

        let now = Utc::now();
        let record_ts = submission.ts.unwrap_or(now);
        let skew = (now - record_ts).num_milliseconds().unsigned_abs();
        let max_skew = self.fabric.max_timestamp_skew_ms;
        if skew > max_skew {
            warn!(record_id = %record_id, skew, max_skew, witness_id = %self.witness_id, "timestamp skew exceeds threshold");
            let reason = ValidationError::TimestampSkew { skew_ms: skew, max_ms: max_skew };
            return self.rejection(&record_id, &reason.to_string());
        }
        self.observed_skew_ms.fetch_max(skew, Ordering::Relaxed);

        let size = submission.record_size();
        let strict = self.security_track.is_strict();
        let order = self.ledger.next_order();

        let mut record = FabricRecord {
            record_id: record_id.clone(),
            ts: record_ts,
            app: submission.app,
            payload: submission.payload,
            meta: submission.meta,
            state_view: StateView {
                record_id: record_id.clone(),
                order,
                size,
                state_hash: None,
                prev_record_id: if strict { self.ledger.last_record_id() } else { None },
            },
        };
        if strict {
            record.state_view.state_hash = Some(record_state_hash(self.hasher.as_ref(), &record));
        }

        let mut attestation = WitnessAttestation {
            witness_id: self.witness_id.clone(),
            accept: true,
            ts: now,
            state_view: record.state_view.clone(),
            signature: None,
            conflict_ref: None,
        };

        if strict {
            match self.sign(&attestation) {
                Ok(sig) => attestation.signature = sig,
                Err(reason) => {
                    self.ledger.release_order(order);
                    error!(record_id = %record_id, error = %reason, "attestation signing failed");
                    return self.rejection(&record_id, &format!("processing error: {}", reason));
                }
            }
        }

        match self.ledger.append(record, attestation.clone()) {
            Ok(_) => {
                info!(
                    record_id = %record_id,
                    order,
                    skew,
                    duration_ms = started.elapsed().as_millis() as u64,
                    witness_id = %self.witness_id,
                    "record processed"
                );
                attestation
            }
            Err(e) => {
                self.ledger.release_order(order);
                error!(record_id = %record_id, error = %e, witness_id = %self.witness_id, "failed to append record");
                self.rejection(&record_id, &format!("processing error: {}", e))
            }
        }
    }

    fn sign(&self, attestation: &WitnessAttestation) -> Result<Option<String>, String> {
        match &self.signer {
            Some(signer) => signer
                .sign(&attestation.signable_bytes())
                .map(Some)
                .map_err(|e| e.to_string()),
            None => Ok(None),
        }
    }

    /// Rejection attestation: `accept=false`, state view nol, `conflict_ref` berisi alasan.
    fn rejection(&self, record_id: &str, reason: &str) -> WitnessAttestation {
        let mut attestation = WitnessAttestation {
            witness_id: self.witness_id.clone(),
            accept: false,
            ts: Utc::now(),
            state_view: StateView::zero(record_id),
            signature: None,
            conflict_ref: Some(rejection_ref(reason, now_millis())),
        };
        if self.security_track.is_strict() {
            attestation.signature = self.sign(&attestation).ok().flatten();
        }
        attestation
    }

    // ════════════════════════════════════════════════════════════════════
    // INFO & HEALTH
    // ════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn info(&self) -> WitnessInfo {
        WitnessInfo {
            witness_id: self.witness_id.clone(),
            region: self.region.clone(),
            version: WITNESS_VERSION.to_string(),
            security_track: self.security_track,
            uptime_ms: self.uptime_ms(),
            observed_skew_ms: self.observed_skew_ms(),
            public_key: self.signer.as_ref().map(|s| s.key_id()),
            quorum_config: self.fabric.quorum_view(),
        }
    }

    #[must_use]
    pub fn health(&self) -> WitnessHealth {
        let stats = self.ledger.stats();
        WitnessHealth {
            status: "healthy".to_string(),
            witness_id: self.witness_id.clone(),
            uptime_ms: self.uptime_ms(),
            ledger_size: stats.total_entries,
            last_record_ts: stats.last_entry_ts,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
