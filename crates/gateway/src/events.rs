//! Menyiarkan event konflik ke subscriber WebSocket.
//!
//! Subscriber yang tertinggal melewatkan event lama; publish tanpa
//! subscriber bukan error.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use fabric_common::{ConflictTicket, FabricEvent};

#[derive(Debug, Clone)]
pub struct ConflictBroadcaster {
    tx: broadcast::Sender<String>,
}

impl ConflictBroadcaster {
    /// `capacity` adalah jumlah event yang di-buffer per subscriber sebelum
    /// subscriber lambat mulai tertinggal.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Kirim `conflict_detected`. Mengembalikan jumlah subscriber penerima.
    pub fn publish(&self, ticket: &ConflictTicket) -> usize {
        let event = FabricEvent::ConflictDetected {
            conflict_ticket: ticket.clone(),
        };
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!(conflict_id = %ticket.conflict_id, error = %e, "failed to encode conflict event");
                return 0;
            }
        };

        match self.tx.send(text) {
            Ok(n) => n,
            Err(_) => {
                debug!(conflict_id = %ticket.conflict_id, "no event subscribers");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ConflictBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
