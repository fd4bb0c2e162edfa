//! # Fabric Witness
//!
//! Witness node: memvalidasi record secara independen, memberi urutan lokal,
//! dan menyimpan attestation ke ledger append-only.
//!
//! ## Modules
//! - `ledger`: NDJSON ledger, order counter, integrity check
//! - `witness`: `WitnessNode::process_record`, info, health
//! - `handlers`: axum router `/witness/*` dan `/ledger.ndjson`
//! - `settings`: env untuk binary

pub mod handlers;
pub mod ledger;
pub mod settings;
pub mod witness;

pub use handlers::{build_router, WitnessAppState};
pub use ledger::{IntegrityReport, Ledger, LedgerError, LedgerFilter, LedgerStats};
pub use settings::{HashAlgorithm, WitnessSettings};
pub use witness::WitnessNode;
