//! # Fabric Client SDK
//!
//! Klien untuk gateway quorum fabric: submit dengan retry dan cache
//! idempotency lokal, verifikasi independen langsung ke witness, dan utilitas
//! ledger.
//!
//! ## Modules
//! - `client`: `FabricClient`
//! - `retry`: backoff eksponensial dengan jitter deterministik
//! - `cache`: LRU response cache
//! - `error`: `ClientError`
//! - `utils`: format hasil quorum, cek signature, parse / filter / statistik ledger

pub mod cache;
pub mod client;
pub mod error;
pub mod retry;
pub mod utils;

pub use cache::ResponseCache;
pub use client::{ClientOptions, FabricClient};
pub use error::ClientError;
pub use retry::{compute_delay, retry_with_backoff, RetryConfig, RetryResult, Retryable};
pub use utils::{
    calculate_ledger_stats, check_attestation_signatures, filter_ledger_entries, format_quorum_result, is_record_verified,
    parse_ledger, LedgerEntryFilter, LedgerSummary,
};
