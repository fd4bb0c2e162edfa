//! Helper untuk menampilkan hasil quorum dan mengolah export ledger.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use fabric_common::{
    verify_attestation, App, Ed25519Verifier, LedgerEntry, QuorumResult, WitnessAttestation,
    WitnessConfig,
};

/// `"Integrity: VERIFIED q=4/5 Δ=12ms"`; skew di atas batas diberi `(EXCEEDED)`.
#[must_use]
pub fn format_quorum_result(result: &QuorumResult) -> String {
    let status = if result.ok { "VERIFIED" } else { "FAILED" };
    let skew = if result.skew_ok {
        format!("{}ms", result.max_skew_ms)
    } else {
        format!("{}ms (EXCEEDED)", result.max_skew_ms)
    };
    format!(
        "Integrity: {} q={}/{} Δ={}",
        status, result.quorum_count, result.total_witnesses, skew
    )
}

#[must_use]
pub fn is_record_verified(result: &QuorumResult) -> bool {
    result.ok && result.skew_ok && result.quorum_count >= result.required_quorum
}

/// Cek signature ed25519 tiap attestation terhadap `public_key` witness di config.
///
/// Hanya witness dengan `public_key` yang masuk hasil. Key atau signature yang
/// tidak bisa di-decode dihitung `false`.
#[must_use]
pub fn check_attestation_signatures(
    witnesses: &[WitnessConfig],
    attestations: &[WitnessAttestation],
) -> BTreeMap<String, bool> {
    let mut out = BTreeMap::new();
    for att in attestations {
        let Some(key) = witnesses
            .iter()
            .find(|w| w.witness_id == att.witness_id)
            .and_then(|w| w.public_key.as_deref())
        else {
            continue;
        };
        let valid = Ed25519Verifier::from_public_key_hex(key)
            .and_then(|verifier| verify_attestation(&verifier, att))
            .unwrap_or_else(|e| {
                warn!(witness_id = %att.witness_id, error = %e, "signature check failed");
                false
            });
        out.insert(att.witness_id.clone(), valid);
    }
    out
}

/// Parse export NDJSON. Baris kosong dilewati, baris rusak di-log lalu dilewati.
#[must_use]
pub fn parse_ledger(ndjson: &str) -> Vec<LedgerEntry> {
    ndjson
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str::<LedgerEntry>(line.trim()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(line = i + 1, error = %e, "skipping malformed ledger line");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerEntryFilter {
    pub app: Option<App>,
    /// Inklusif, atas `record.ts`.
    pub since: Option<DateTime<Utc>>,
    /// Inklusif, atas `record.ts`.
    pub until: Option<DateTime<Utc>>,
    pub record_id: Option<String>,
    pub witness_id: Option<String>,
}

impl LedgerEntryFilter {
    fn matches(&self, entry: &LedgerEntry) -> bool {
        self.app.map_or(true, |app| entry.record.app == app)
            && self.since.map_or(true, |since| entry.record.ts >= since)
            && self.until.map_or(true, |until| entry.record.ts <= until)
            && self
                .record_id
                .as_deref()
                .map_or(true, |id| entry.record.record_id == id)
            && self
                .witness_id
                .as_deref()
                .map_or(true, |id| entry.attestation.witness_id == id)
    }
}

#[must_use]
pub fn filter_ledger_entries<'a>(entries: &'a [LedgerEntry], filter: &LedgerEntryFilter) -> Vec<&'a LedgerEntry> {
    entries.iter().filter(|e| filter.matches(e)).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub unique_records: usize,
    /// app → jumlah entry.
    pub apps: BTreeMap<String, usize>,
    /// witness_id → jumlah entry.
    pub witnesses: BTreeMap<String, usize>,
    /// Selisih `record.ts` terbesar dan terkecil. 0 jika kosong.
    pub time_span_ms: u64,
}

#[must_use]
pub fn calculate_ledger_stats(entries: &[LedgerEntry]) -> LedgerSummary {
    let mut summary = LedgerSummary {
        total: entries.len(),
        ..LedgerSummary::default()
    };
    let mut records = BTreeSet::new();
    let mut bounds: Option<(i64, i64)> = None;

    for entry in entries {
        if entry.attestation.accept {
            summary.accepted += 1;
        } else {
            summary.rejected += 1;
        }
        records.insert(entry.record.record_id.as_str());
        *summary.apps.entry(entry.record.app.to_string()).or_default() += 1;
        *summary
            .witnesses
            .entry(entry.attestation.witness_id.clone())
            .or_default() += 1;

        let ts = entry.record.ts.timestamp_millis();
        bounds = Some(match bounds {
            None => (ts, ts),
            Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
        });
    }

    summary.unique_records = records.len();
    summary.time_span_ms = bounds
        .map(|(lo, hi)| u64::try_from(hi.saturating_sub(lo)).unwrap_or(0))
        .unwrap_or(0);
    summary
}
