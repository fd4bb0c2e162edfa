//! # Fabric Data Model
//!
//! Tipe-tipe yang dipertukarkan antara witness, gateway, dan SDK.
//!
//! ## Ownership
//!
//! - `FabricRecord` dan `WitnessAttestation` dibuat oleh witness dan
//!   immutable setelah masuk ledger.
//! - `ConflictTicket` dibuat oleh gateway; hanya `status` dan `resolution`
//!   yang boleh berubah, dan hanya lewat resolve/escalate.
//!
//! ## Wire Format
//!
//! Semua timestamp diserialisasi sebagai RFC 3339 UTC. Field opsional yang
//! `None` tidak ikut diserialisasi, sehingga dua attestation dengan state view
//! yang sama menghasilkan JSON yang sama.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ════════════════════════════════════════════════════════════════════════════
// APP & METADATA
// ════════════════════════════════════════════════════════════════════════════

/// Domain discriminator untuk sebuah record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum App {
    /// Conversational record (pesan dalam room).
    Chat,
    /// Bulk record (chunk file).
    Drive,
}

impl App {
    /// Nama wire dari app.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            App::Chat => "chat",
            App::Drive => "drive",
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for App {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(App::Chat),
            "drive" => Ok(App::Drive),
            other => Err(format!("unknown app: {}", other)),
        }
    }
}

/// Jenis pesan untuk record chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    File,
    System,
}

/// Metadata record.
///
/// Field yang dikenal bersifat opsional di level wire; kewajiban per-app
/// dicek oleh [`crate::validation::validate_submission`] yang menghasilkan
/// [`AppMeta`]. Key yang tidak dikenal disimpan apa adanya di `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Forward-compatible metadata tambahan.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RecordMeta {
    /// Metadata chat dengan `room_id`.
    #[must_use]
    pub fn chat(room_id: impl Into<String>) -> Self {
        Self {
            room_id: Some(room_id.into()),
            ..Self::default()
        }
    }

    /// Metadata drive dengan `chunk_id`.
    #[must_use]
    pub fn drive_chunk(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: Some(chunk_id.into()),
            ..Self::default()
        }
    }

    /// Panjang serialisasi JSON dari metadata (bytes).
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        serde_json::to_vec(self).map(|v| v.len() as u64).unwrap_or(0)
    }
}

/// Metadata yang sudah divalidasi per app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMeta {
    Chat {
        room_id: String,
    },
    /// Minimal salah satu dari `chunk_id` / `filename` terisi.
    Drive {
        chunk_id: Option<String>,
        filename: Option<String>,
    },
}

impl AppMeta {
    #[must_use]
    pub fn app(&self) -> App {
        match self {
            AppMeta::Chat { .. } => App::Chat,
            AppMeta::Drive { .. } => App::Drive,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SECURITY TRACK
// ════════════════════════════════════════════════════════════════════════════

/// Security track witness.
///
/// - `Z`: tanpa state hash dan tanpa signature.
/// - `L`: state hash + signature lewat capability `Hasher` / `AttestationSigner`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityTrack {
    #[default]
    Z,
    L,
}

impl SecurityTrack {
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        matches!(self, SecurityTrack::L)
    }
}

impl fmt::Display for SecurityTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityTrack::Z => f.write_str("Z"),
            SecurityTrack::L => f.write_str("L"),
        }
    }
}

impl FromStr for SecurityTrack {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Z" | "z" => Ok(SecurityTrack::Z),
            "L" | "l" => Ok(SecurityTrack::L),
            other => Err(format!("unknown security track: {}", other)),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STATE VIEW & ATTESTATION
// ════════════════════════════════════════════════════════════════════════════

/// Pandangan satu witness terhadap satu record.
///
/// Dua attestation konsisten jika dan hanya jika `StateView` keduanya sama
/// secara struktural; `Eq + Hash` dipakai langsung sebagai grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateView {
    pub record_id: String,
    /// Logical clock privat witness; strictly increasing dalam satu ledger.
    pub order: u64,
    /// `payload bytes + len(JSON(meta))`.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_record_id: Option<String>,
}

impl StateView {
    /// State view kosong untuk rejection attestation.
    #[must_use]
    pub fn zero(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            order: 0,
            size: 0,
            state_hash: None,
            prev_record_id: None,
        }
    }
}

/// Klaim satu witness atas satu record (accept atau reject).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessAttestation {
    pub witness_id: String,
    pub accept: bool,
    /// Clock milik witness saat attestation dibuat.
    pub ts: DateTime<Utc>,
    pub state_view: StateView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Tag alasan penolakan, hanya terisi saat `accept == false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_ref: Option<String>,
}

#[derive(Serialize)]
struct SignableAttestation<'a> {
    witness_id: &'a str,
    accept: bool,
    ts: &'a DateTime<Utc>,
    state_view: &'a StateView,
}

impl WitnessAttestation {
    /// Canonical bytes yang ditandatangani: `{witness_id, accept, ts, state_view}`.
    ///
    /// `signature` dan `conflict_ref` tidak ikut, sehingga signature tidak
    /// pernah bergantung pada dirinya sendiri.
    #[must_use]
    pub fn signable_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&SignableAttestation {
            witness_id: &self.witness_id,
            accept: self.accept,
            ts: &self.ts,
            state_view: &self.state_view,
        })
        .unwrap_or_default()
    }

    /// Timestamp dalam unix milliseconds.
    #[must_use]
    pub fn ts_millis(&self) -> i64 {
        self.ts.timestamp_millis()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RECORD & LEDGER ENTRY
// ════════════════════════════════════════════════════════════════════════════

/// Record yang diterima dan disimpan witness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricRecord {
    pub record_id: String,
    pub ts: DateTime<Utc>,
    pub app: App,
    pub payload: String,
    pub meta: RecordMeta,
    pub state_view: StateView,
}

#[derive(Serialize)]
struct RecordContent<'a> {
    record_id: &'a str,
    ts: &'a DateTime<Utc>,
    app: App,
    payload: &'a str,
    meta: &'a RecordMeta,
}

impl FabricRecord {
    /// Canonical bytes untuk state hash: `{record_id, ts, app, payload, meta}`.
    #[must_use]
    pub fn content_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&RecordContent {
            record_id: &self.record_id,
            ts: &self.ts,
            app: self.app,
            payload: &self.payload,
            meta: &self.meta,
        })
        .unwrap_or_default()
    }

    /// Apakah konten record sama dengan submission (tanpa melihat ts / state view).
    #[must_use]
    pub fn same_content(&self, submission: &RecordSubmission) -> bool {
        self.app == submission.app
            && self.payload == submission.payload
            && self.meta == submission.meta
    }
}

/// Unit durable yang di-append ke ledger witness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub record: FabricRecord,
    pub attestation: WitnessAttestation,
    pub ledger_ts: DateTime<Utc>,
}

// ════════════════════════════════════════════════════════════════════════════
// CONFLICT TICKET
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Open,
    Resolved,
    Escalated,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStatus::Open => f.write_str("open"),
            ConflictStatus::Resolved => f.write_str("resolved"),
            ConflictStatus::Escalated => f.write_str("escalated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    QuorumOverride,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub method: ResolutionMethod,
    pub resolved_at: DateTime<Utc>,
    pub chosen_attestation: WitnessAttestation,
    pub reason: String,
}

/// Disagreement antar witness yang menunggu resolusi.
///
/// `attestations` selalu berisi seluruh attestation yang diperiksa pada
/// ronde verifikasi tersebut; resolusi tidak pernah menghapusnya.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictTicket {
    pub conflict_id: String,
    pub record_id: String,
    pub detected_at: DateTime<Utc>,
    pub disagreeing_witnesses: Vec<String>,
    pub attestations: Vec<WitnessAttestation>,
    pub status: ConflictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

/// Filter daftar conflict (`GET /api/conflicts`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictQuery {
    /// Hanya ticket dengan `detected_at >= since`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConflictStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Event yang di-push ke subscriber WebSocket gateway.
///
/// Wire: `{"type":"conflict_detected","data":{"conflict_ticket":{...}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FabricEvent {
    ConflictDetected { conflict_ticket: ConflictTicket },
}

// ════════════════════════════════════════════════════════════════════════════
// QUORUM RESULT
// ════════════════════════════════════════════════════════════════════════════

/// Hasil satu ronde verifikasi quorum.
///
/// `ok == false` dan `skew_ok == false` adalah nilai, bukan error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumResult {
    pub ok: bool,
    pub quorum_count: usize,
    pub required_quorum: usize,
    pub total_witnesses: usize,
    pub max_skew_ms: u64,
    pub skew_ok: bool,
    pub consistent_attestations: Vec<WitnessAttestation>,
    pub conflicting_attestations: Vec<WitnessAttestation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_ticket: Option<ConflictTicket>,
}

// ════════════════════════════════════════════════════════════════════════════
// API BODIES
// ════════════════════════════════════════════════════════════════════════════

/// Body `POST /record` (gateway) dan `POST /witness/record` (witness).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSubmission {
    pub app: App,
    pub record_id: String,
    pub payload: String,
    #[serde(default)]
    pub meta: RecordMeta,
    /// Timestamp klien; witness memakai clock sendiri jika kosong.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
}

impl RecordSubmission {
    #[must_use]
    pub fn new(app: App, record_id: impl Into<String>, payload: impl Into<String>, meta: RecordMeta) -> Self {
        Self {
            app,
            record_id: record_id.into(),
            payload: payload.into(),
            meta,
            ts: None,
        }
    }

    /// `payload bytes + len(JSON(meta))`.
    #[must_use]
    pub fn record_size(&self) -> u64 {
        (self.payload.len() as u64).saturating_add(self.meta.encoded_len())
    }
}

/// Response submission dari gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub success: bool,
    pub record_id: String,
    pub attestations: Vec<WitnessAttestation>,
    pub quorum_result: QuorumResult,
}

/// Response verifikasi record dari gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub record_id: String,
    pub verified: bool,
    pub attestations: Vec<WitnessAttestation>,
    pub quorum_result: QuorumResult,
}

/// Response `GET /witness/records/:record_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordLookup {
    pub record: FabricRecord,
    pub attestation: WitnessAttestation,
}

/// Response `GET /witness/ledger`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub total: usize,
    pub witness_id: String,
}

/// Parameter quorum yang dipakai witness, dilaporkan lewat `/witness/info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfigView {
    pub quorum_size: usize,
    pub total_witnesses: usize,
    pub max_timestamp_skew_ms: u64,
}

/// Response `GET /witness/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessInfo {
    pub witness_id: String,
    pub region: String,
    pub version: String,
    pub security_track: SecurityTrack,
    pub uptime_ms: u64,
    /// Skew terbesar antara `ts` submission dan clock witness yang pernah diterima.
    pub observed_skew_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub quorum_config: QuorumConfigView,
}

/// Response `GET /witness/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessHealth {
    /// `"healthy"` saat witness bisa melayani request.
    pub status: String,
    pub witness_id: String,
    pub uptime_ms: u64,
    pub ledger_size: u64,
    pub last_record_ts: Option<DateTime<Utc>>,
}

impl WitnessHealth {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Status witness dari sudut pandang gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WitnessState {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessStatus {
    pub witness_id: String,
    pub status: WitnessState,
    /// Kontak sukses terakhir; `null` jika witness belum pernah merespons.
    pub last_seen: Option<DateTime<Utc>>,
    pub region: String,
}

/// Body error standar untuk semua endpoint HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
        }
    }
}
