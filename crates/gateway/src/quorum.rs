//! # Quorum Manager
//!
//! Membungkus [`fabric_common::verify_quorum`] dengan conflict store.
//!
//! ## Conflict Lifecycle
//!
//! ```text
//!            verify (tidak konsisten)
//!                     │
//!                     ▼
//!                  ┌──────┐  escalate   ┌───────────┐
//!                  │ open │ ──────────► │ escalated │
//!                  └──────┘             └───────────┘
//!                     │ resolve               │ resolve
//!                     ▼                       ▼
//!                  ┌──────────┐ ◄─────────────┘
//!                  │ resolved │   (terminal)
//!                  └──────────┘
//! ```
//!
//! Satu ticket dibuat per ronde verifikasi yang tidak konsisten; ticket
//! untuk record_id yang sama tidak di-deduplikasi. Ticket tidak pernah
//! dihapus.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use fabric_common::{
    now_millis, requires_ticket, verify_quorum, ConflictQuery, ConflictResolution,
    ConflictStatus, ConflictTicket, FabricConfig, QuorumResult, ResolutionMethod,
    WitnessAttestation,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("conflict {0} not found")]
    ConflictNotFound(String),

    #[error("witness {witness_id} has no attestation in conflict {conflict_id}")]
    AttestationNotInTicket {
        conflict_id: String,
        witness_id: String,
    },

    #[error("conflict {0} already resolved")]
    AlreadyResolved(String),
}

/// Ringkasan conflict store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total: usize,
    pub open: usize,
    pub resolved: usize,
    pub escalated: usize,
    /// Ticket dengan `detected_at` dalam 60 menit terakhir.
    pub conflicts_last_hour: usize,
}

#[derive(Debug)]
pub struct QuorumManager {
    required_quorum: usize,
    max_skew_ms: u64,
    conflicts: RwLock<HashMap<String, ConflictTicket>>,
}

impl QuorumManager {
    #[must_use]
    pub fn new(required_quorum: usize, max_skew_ms: u64) -> Self {
        Self {
            required_quorum,
            max_skew_ms,
            conflicts: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &FabricConfig) -> Self {
        Self::new(config.quorum_size, config.max_timestamp_skew_ms)
    }

    #[must_use]
    pub fn required_quorum(&self) -> usize {
        self.required_quorum
    }

    /// Verifikasi satu ronde dan buka ticket jika hasilnya tidak konsisten.
    ///
    /// Ticket (jika ada) tersimpan di store dan juga dilampirkan pada
    /// `QuorumResult::conflict_ticket`.
    pub fn verify(&self, record_id: &str, attestations: &[WitnessAttestation]) -> QuorumResult {
        let mut result = verify_quorum(attestations, self.required_quorum, self.max_skew_ms);

        if requires_ticket(&result) {
            let ticket = ConflictTicket {
                conflict_id: new_conflict_id(),
                record_id: record_id.to_string(),
                detected_at: Utc::now(),
                disagreeing_witnesses: result
                    .conflicting_attestations
                    .iter()
                    .map(|a| a.witness_id.clone())
                    .collect(),
                attestations: attestations.to_vec(),
                status: ConflictStatus::Open,
                resolution: None,
            };

            warn!(
                conflict_id = %ticket.conflict_id,
                record_id,
                quorum_count = result.quorum_count,
                required = self.required_quorum,
                skew_ms = result.max_skew_ms,
                disagreeing = ?ticket.disagreeing_witnesses,
                "conflict detected"
            );

            self.conflicts
                .write()
                .insert(ticket.conflict_id.clone(), ticket.clone());
            result.conflict_ticket = Some(ticket);
        }

        result
    }

    /// Daftar ticket sesuai filter, terbaru dulu.
    #[must_use]
    pub fn get_conflicts(&self, query: &ConflictQuery) -> Vec<ConflictTicket> {
        let mut tickets: Vec<ConflictTicket> = self
            .conflicts
            .read()
            .values()
            .filter(|t| query.since.map_or(true, |since| t.detected_at >= since))
            .filter(|t| query.status.map_or(true, |status| t.status == status))
            .cloned()
            .collect();

        tickets.sort_by(|a, b| {
            b.detected_at
                .cmp(&a.detected_at)
                .then_with(|| b.conflict_id.cmp(&a.conflict_id))
        });
        if let Some(limit) = query.limit {
            tickets.truncate(limit);
        }
        tickets
    }

    #[must_use]
    pub fn get_conflict(&self, conflict_id: &str) -> Option<ConflictTicket> {
        self.conflicts.read().get(conflict_id).cloned()
    }

    /// Resolve ticket dengan attestation milik `chosen_witness_id`.
    ///
    /// Gagal tanpa mengubah ticket jika ticket tidak ada, sudah resolved,
    /// atau witness tidak punya attestation di ticket.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        method: ResolutionMethod,
        chosen_witness_id: &str,
        reason: impl Into<String>,
    ) -> Result<ConflictTicket, QuorumError> {
        let mut conflicts = self.conflicts.write();
        let ticket = conflicts
            .get_mut(conflict_id)
            .ok_or_else(|| QuorumError::ConflictNotFound(conflict_id.to_string()))?;

        if ticket.status == ConflictStatus::Resolved {
            return Err(QuorumError::AlreadyResolved(conflict_id.to_string()));
        }

        let chosen = ticket
            .attestations
            .iter()
            .find(|a| a.witness_id == chosen_witness_id)
            .cloned()
            .ok_or_else(|| QuorumError::AttestationNotInTicket {
                conflict_id: conflict_id.to_string(),
                witness_id: chosen_witness_id.to_string(),
            })?;

        ticket.status = ConflictStatus::Resolved;
        ticket.resolution = Some(ConflictResolution {
            method,
            resolved_at: Utc::now(),
            chosen_attestation: chosen,
            reason: reason.into(),
        });

        info!(conflict_id, chosen_witness_id, method = ?method, "conflict resolved");
        Ok(ticket.clone())
    }

    /// Tandai ticket open sebagai escalated. Ticket yang sudah escalated
    /// dikembalikan apa adanya.
    pub fn escalate_conflict(&self, conflict_id: &str) -> Result<ConflictTicket, QuorumError> {
        let mut conflicts = self.conflicts.write();
        let ticket = conflicts
            .get_mut(conflict_id)
            .ok_or_else(|| QuorumError::ConflictNotFound(conflict_id.to_string()))?;

        match ticket.status {
            ConflictStatus::Resolved => Err(QuorumError::AlreadyResolved(conflict_id.to_string())),
            ConflictStatus::Escalated => Ok(ticket.clone()),
            ConflictStatus::Open => {
                ticket.status = ConflictStatus::Escalated;
                info!(conflict_id, "conflict escalated");
                Ok(ticket.clone())
            }
        }
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.conflicts
            .read()
            .values()
            .filter(|t| t.status == ConflictStatus::Open)
            .count()
    }

    #[must_use]
    pub fn stats(&self) -> ConflictStats {
        let hour_ago: DateTime<Utc> = Utc::now() - Duration::hours(1);
        let conflicts = self.conflicts.read();

        let mut stats = ConflictStats {
            total: conflicts.len(),
            ..ConflictStats::default()
        };
        for t in conflicts.values() {
            match t.status {
                ConflictStatus::Open => stats.open += 1,
                ConflictStatus::Resolved => stats.resolved += 1,
                ConflictStatus::Escalated => stats.escalated += 1,
            }
            if t.detected_at >= hour_ago {
                stats.conflicts_last_hour += 1;
            }
        }
        stats
    }
}

/// `conflict_<unix_ms>_<8 hex>`
fn new_conflict_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("conflict_{}_{}", now_millis(), &suffix[..8])
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_common::StateView;

    fn att(witness: &str, order: u64) -> WitnessAttestation {
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

    fn five_with_dissenter() -> Vec<WitnessAttestation> {
        vec![att("w1", 1), att("w2", 1), att("w3", 9), att("w4", 1), att("w5", 1)]
    }

    // ── 1. verify ────────────────────────────────────────────────────────

    #[test]
    fn consistent_round_opens_no_ticket() {
        let qm = QuorumManager::new(4, 2000);
        let atts: Vec<_> = ["w1", "w2", "w3", "w4", "w5"].iter().map(|w| att(w, 1)).collect();
        let r = qm.verify("r1", &atts);
        assert!(r.ok);
        assert!(r.conflict_ticket.is_none());
        assert_eq!(qm.stats().total, 0);
    }

    #[test]
    fn dissent_opens_ticket_with_full_attestation_set() {
        let qm = QuorumManager::new(4, 2000);
        let r = qm.verify("r1", &five_with_dissenter());
        assert!(r.ok);

        let ticket = r.conflict_ticket.expect("ticket");
        assert!(ticket.conflict_id.starts_with("conflict_"));
        assert_eq!(ticket.disagreeing_witnesses, vec!["w3"]);
        assert_eq!(ticket.attestations.len(), 5);
        assert_eq!(ticket.status, ConflictStatus::Open);
        assert_eq!(qm.get_conflict(&ticket.conflict_id), Some(ticket));
    }

    #[test]
    fn repeated_rounds_are_not_deduplicated() {
        let qm = QuorumManager::new(4, 2000);
        let a = qm.verify("r1", &five_with_dissenter()).conflict_ticket.expect("ticket");
        let b = qm.verify("r1", &five_with_dissenter()).conflict_ticket.expect("ticket");
        assert_ne!(a.conflict_id, b.conflict_id);
        assert_eq!(qm.stats().open, 2);
    }

    #[test]
    fn partition_opens_ticket_without_dissenters() {
        let qm = QuorumManager::new(4, 2000);
        let r = qm.verify("r1", &[att("w1", 1), att("w2", 1), att("w3", 1)]);
        assert!(!r.ok);
        assert_eq!(r.total_witnesses, 3);
        let ticket = r.conflict_ticket.expect("ticket");
        assert!(ticket.disagreeing_witnesses.is_empty());
    }

    // ── 2. resolve ───────────────────────────────────────────────────────

    #[test]
    fn resolve_sets_terminal_status() {
        let qm = QuorumManager::new(4, 2000);
        let id = qm.verify("r1", &five_with_dissenter()).conflict_ticket.expect("ticket").conflict_id;

        let resolved = qm
            .resolve_conflict(&id, ResolutionMethod::Manual, "w1", "majority view")
            .expect("resolve");
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        let resolution = resolved.resolution.expect("resolution");
        assert_eq!(resolution.chosen_attestation.witness_id, "w1");
        assert_eq!(resolution.reason, "majority view");
        assert_eq!(resolved.attestations.len(), 5);

        assert_eq!(
            qm.resolve_conflict(&id, ResolutionMethod::Manual, "w2", "again"),
            Err(QuorumError::AlreadyResolved(id.clone()))
        );
        assert_eq!(qm.escalate_conflict(&id), Err(QuorumError::AlreadyResolved(id)));
    }

    #[test]
    fn resolve_with_absent_witness_leaves_ticket_open() {
        let qm = QuorumManager::new(4, 2000);
        let id = qm.verify("r1", &five_with_dissenter()).conflict_ticket.expect("ticket").conflict_id;

        let err = qm
            .resolve_conflict(&id, ResolutionMethod::QuorumOverride, "w9", "nope")
            .unwrap_err();
        assert!(matches!(err, QuorumError::AttestationNotInTicket { .. }));
        assert_eq!(qm.get_conflict(&id).expect("ticket").status, ConflictStatus::Open);

        assert!(matches!(
            qm.resolve_conflict("conflict_0_missing", ResolutionMethod::Manual, "w1", "x"),
            Err(QuorumError::ConflictNotFound(_))
        ));
    }

    #[test]
    fn escalated_can_still_be_resolved() {
        let qm = QuorumManager::new(4, 2000);
        let id = qm.verify("r1", &five_with_dissenter()).conflict_ticket.expect("ticket").conflict_id;

        assert_eq!(qm.escalate_conflict(&id).expect("escalate").status, ConflictStatus::Escalated);
        assert_eq!(qm.escalate_conflict(&id).expect("again").status, ConflictStatus::Escalated);
        assert_eq!(qm.stats().escalated, 1);
        assert_eq!(qm.open_count(), 0);

        qm.resolve_conflict(&id, ResolutionMethod::Manual, "w3", "operator decision")
            .expect("resolve");
        assert_eq!(qm.stats().resolved, 1);
    }

    // ── 3. listing ───────────────────────────────────────────────────────

    #[test]
    fn get_conflicts_filters_and_limits() {
        let qm = QuorumManager::new(4, 2000);
        let first = qm.verify("r1", &five_with_dissenter()).conflict_ticket.expect("ticket");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = qm.verify("r2", &five_with_dissenter()).conflict_ticket.expect("ticket");
        qm.resolve_conflict(&first.conflict_id, ResolutionMethod::Manual, "w1", "ok")
            .expect("resolve");

        let all = qm.get_conflicts(&ConflictQuery::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].conflict_id, second.conflict_id);

        let open = qm.get_conflicts(&ConflictQuery {
            status: Some(ConflictStatus::Open),
            ..ConflictQuery::default()
        });
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].record_id, "r2");

        let limited = qm.get_conflicts(&ConflictQuery {
            limit: Some(1),
            ..ConflictQuery::default()
        });
        assert_eq!(limited.len(), 1);

        let future = qm.get_conflicts(&ConflictQuery {
            since: Some(Utc::now() + Duration::hours(1)),
            ..ConflictQuery::default()
        });
        assert!(future.is_empty());

        let stats = qm.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.conflicts_last_hour, 2);
    }
}
