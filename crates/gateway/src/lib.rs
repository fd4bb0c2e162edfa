//! # Fabric Gateway
//!
//! Stateless orchestrator di depan witness: fan-out submission, verifikasi
//! quorum, conflict ticket, idempotency, dan notifikasi WebSocket.
//!
//! ## Modules
//! - `witness_client`: fan-out HTTP paralel dengan timeout per witness
//! - `quorum`: `QuorumManager` + conflict store
//! - `idempotency`: cache response per `Idempotency-Key` dengan TTL
//! - `events`: broadcast `conflict_detected`
//! - `metrics`: counter / gauge / histogram + Prometheus text
//! - `handlers`: axum router
//! - `settings`: env untuk binary

pub mod events;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod quorum;
pub mod settings;
pub mod witness_client;

pub use events::ConflictBroadcaster;
pub use handlers::{build_router, AppState};
pub use idempotency::{spawn_sweeper, Claim, IdempotencyCache, PendingResponse};
pub use metrics::GatewayMetrics;
pub use quorum::{ConflictStats, QuorumError, QuorumManager};
pub use settings::GatewaySettings;
pub use witness_client::{WitnessCallError, WitnessClient, WitnessClientOptions};
