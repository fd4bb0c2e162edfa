//! # Record Validation
//!
//! Validasi submission yang dipakai bersama oleh witness (sebelum ordering)
//! dan gateway (sebelum fan-out). Gateway dan witness wajib memakai fungsi
//! yang sama agar submission yang lolos di gateway tidak ditolak witness
//! karena aturan yang berbeda.
//!
//! ## Aturan
//!
//! 1. `record_id` dan `payload` tidak boleh kosong
//! 2. `payload` ≤ batas per app (chat 1 MiB, drive 100 MiB)
//! 3. chat wajib `room_id`; drive wajib `chunk_id` atau `filename`

use thiserror::Error;

use crate::types::{App, AppMeta, RecordMeta, RecordSubmission};

/// Batas payload untuk record chat (1 MiB).
pub const MAX_CHAT_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Batas payload untuk record drive (100 MiB).
pub const MAX_DRIVE_PAYLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Error validasi record.
///
/// Di witness, error ini menjadi rejection attestation; di gateway menjadi
/// HTTP 400 sebelum witness mana pun dihubungi.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid record id")]
    EmptyRecordId,

    #[error("invalid payload")]
    EmptyPayload,

    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("chat records require room_id")]
    MissingRoomId,

    #[error("drive records require chunk_id or filename")]
    MissingDriveTarget,

    #[error("timestamp skew too large: {skew_ms}ms > {max_ms}ms")]
    TimestampSkew { skew_ms: u64, max_ms: u64 },

    #[error("duplicate record_id")]
    DuplicateRecordId,
}

/// Batas payload untuk app tertentu.
#[must_use]
pub const fn max_payload_bytes(app: App) -> usize {
    match app {
        App::Chat => MAX_CHAT_PAYLOAD_BYTES,
        App::Drive => MAX_DRIVE_PAYLOAD_BYTES,
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

impl RecordMeta {
    /// Cek field wajib untuk `app` dan kembalikan bentuk typed-nya.
    pub fn require(&self, app: App) -> Result<AppMeta, ValidationError> {
        match app {
            App::Chat => non_empty(&self.room_id)
                .map(|room_id| AppMeta::Chat { room_id })
                .ok_or(ValidationError::MissingRoomId),
            App::Drive => {
                let chunk_id = non_empty(&self.chunk_id);
                let filename = non_empty(&self.filename);
                if chunk_id.is_none() && filename.is_none() {
                    return Err(ValidationError::MissingDriveTarget);
                }
                Ok(AppMeta::Drive { chunk_id, filename })
            }
        }
    }
}

/// Validasi satu submission.
///
/// Tidak melakukan I/O dan tidak melihat clock; skew dan duplikasi dicek
/// oleh witness karena keduanya butuh state lokal.
pub fn validate_submission(submission: &RecordSubmission) -> Result<AppMeta, ValidationError> {
    if submission.record_id.trim().is_empty() {
        return Err(ValidationError::EmptyRecordId);
    }
    if submission.payload.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }

    let max = max_payload_bytes(submission.app);
    let size = submission.payload.len();
    if size > max {
        return Err(ValidationError::PayloadTooLarge { size, max });
    }

    submission.meta.require(submission.app)
}

/// Tag `conflict_ref` untuk rejection attestation.
///
/// Format: `rejection_<unix_ms>_<reason>` dengan whitespace diganti `_`.
#[must_use]
pub fn rejection_ref(reason: &str, now_ms: u64) -> String {
    let tag = reason.split_whitespace().collect::<Vec<_>>().join("_");
    format!("rejection_{}_{}", now_ms, tag)
}
