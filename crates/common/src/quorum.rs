//! # Quorum Verification
//!
//! Algoritma konsensus atas kumpulan [`WitnessAttestation`]. Dipakai oleh
//! gateway (`QuorumManager`) dan oleh SDK klien untuk verifikasi ulang;
//! keduanya wajib memanggil fungsi yang sama.
//!
//! ## Algoritma
//!
//! ```text
//! attestations
//!   ├── accepted (accept = true)
//!   │     └── group by StateView ──► largest group = consistent
//!   │                                 sisanya      = conflicting
//!   └── rejected ─────────────────────────────────► conflicting
//!
//! skew  = max(ts) - min(ts) atas accepted saja (0 jika kosong)
//! ok    = |consistent| >= required_quorum && skew <= max_skew_ms
//! ```
//!
//! ## Tie-break
//!
//! Jika ada beberapa grup dengan ukuran terbesar yang sama, grup yang
//! pertama kali muncul (urutan input) yang dipilih. Deterministik untuk
//! input yang sama, tetapi arbitrary.
//!
//! Fungsi di modul ini tidak membuat `ConflictTicket`; `conflict_ticket`
//! pada hasil selalu `None`.

use std::collections::HashMap;

use crate::types::{QuorumResult, StateView, WitnessAttestation};

/// Kelompokkan attestation (index) berdasarkan state view, urutan first-seen.
fn group_by_state_view(attestations: &[&WitnessAttestation]) -> Vec<Vec<usize>> {
    let mut index: HashMap<&StateView, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, att) in attestations.iter().enumerate() {
        match index.get(&att.state_view) {
            Some(&g) => groups[g].push(i),
            None => {
                index.insert(&att.state_view, groups.len());
                groups.push(vec![i]);
            }
        }
    }

    groups
}

/// Selisih timestamp terbesar (ms) di antara attestation. 0 jika kosong.
#[must_use]
pub fn timestamp_skew_ms(attestations: &[&WitnessAttestation]) -> u64 {
    let mut iter = attestations.iter().map(|a| a.ts_millis());
    let first = match iter.next() {
        Some(ts) => ts,
        None => return 0,
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
    u64::try_from(max.saturating_sub(min)).unwrap_or(0)
}

/// Jalankan verifikasi quorum.
///
/// ## Parameters
///
/// - `attestations`: seluruh attestation yang terkumpul pada ronde ini
/// - `required_quorum`: Q
/// - `max_skew_ms`: Δ
///
/// `total_witnesses` pada hasil adalah `attestations.len()`, bukan N dari
/// config; witness yang tidak merespons tidak dihitung.
#[must_use]
pub fn verify_quorum(
    attestations: &[WitnessAttestation],
    required_quorum: usize,
    max_skew_ms: u64,
) -> QuorumResult {
    let (accepted, rejected): (Vec<&WitnessAttestation>, Vec<&WitnessAttestation>) =
        attestations.iter().partition(|a| a.accept);

    let groups = group_by_state_view(&accepted);
    let mut largest: &[usize] = &[];
    for group in &groups {
        if group.len() > largest.len() {
            largest = group.as_slice();
        }
    }

    let mut in_consensus = vec![false; accepted.len()];
    for &i in largest {
        in_consensus[i] = true;
    }

    let consistent: Vec<WitnessAttestation> =
        largest.iter().map(|&i| accepted[i].clone()).collect();

    let mut conflicting: Vec<WitnessAttestation> = accepted
        .iter()
        .enumerate()
        .filter(|(i, _)| !in_consensus[*i])
        .map(|(_, a)| (*a).clone())
        .collect();
    conflicting.extend(rejected.iter().map(|a| (*a).clone()));

    let skew = timestamp_skew_ms(&accepted);
    let skew_ok = skew <= max_skew_ms;
    let ok = consistent.len() >= required_quorum && skew_ok;

    QuorumResult {
        ok,
        quorum_count: consistent.len(),
        required_quorum,
        total_witnesses: attestations.len(),
        max_skew_ms: skew,
        skew_ok,
        consistent_attestations: consistent,
        conflicting_attestations: conflicting,
        conflict_ticket: None,
    }
}

/// Apakah hasil verifikasi harus membuka conflict ticket.
#[must_use]
pub fn requires_ticket(result: &QuorumResult) -> bool {
    !result.conflicting_attestations.is_empty() || !result.ok
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
