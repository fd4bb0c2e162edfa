//! # Fabric Common Crate
//!
//! Shared model dan algoritma untuk witness quorum fabric.
//!
//! ## Modules
//! - `types`: Record, StateView, WitnessAttestation, ConflictTicket, QuorumResult
//! - `validation`: Validasi submission per app
//! - `quorum`: Majority-consistency grouping + skew check
//! - `crypto`: Capability `Hasher` / `AttestationSigner` / `AttestationVerifier`
//! - `config`: `FabricConfig` (default, TOML, env)
//!
//! ## Architecture
//! ```text
//!  client SDK ──► gateway ──► witness × N
//!      │             │            │
//!      └── quorum ◄──┘            └── validation, crypto
//! ```
//!
//! Gateway dan SDK memanggil [`quorum::verify_quorum`] yang sama sehingga
//! hasil verifikasi sisi klien identik dengan sisi gateway.

pub mod config;
pub mod crypto;
pub mod quorum;
pub mod types;
pub mod validation;

pub use config::{ConfigError, FabricConfig, WitnessConfig, load_env_file};
pub use crypto::{
    AttestationSigner, AttestationVerifier, CryptoError, Ed25519Signer, Ed25519Verifier,
    Hasher, Sha256Hasher, Sha3Hasher, verify_attestation,
};
pub use quorum::{requires_ticket, verify_quorum};
pub use types::{
    App, AppMeta, ConflictQuery, ConflictResolution, ConflictStatus, ConflictTicket, ErrorBody,
    FabricEvent, FabricRecord, LedgerEntry, LedgerPage, MessageType, QuorumConfigView,
    QuorumResult, RecordLookup, RecordMeta, RecordSubmission, ResolutionMethod, SecurityTrack,
    StateView, SubmissionResponse, VerificationResponse, WitnessAttestation, WitnessHealth,
    WitnessInfo, WitnessState, WitnessStatus,
};
pub use validation::{ValidationError, validate_submission};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
