//! # Idempotency Cache
//!
//! Menyimpan body response submission per header `Idempotency-Key` selama
//! TTL. Request ulang dengan key yang sama dalam TTL mendapat bytes yang
//! identik tanpa fan-out baru.
//!
//! Entry kedaluwarsa diabaikan oleh [`IdempotencyCache::get`] dan dibuang
//! oleh sweeper periodik ([`spawn_sweeper`]).
//!
//! ## Concurrency
//!
//! ```text
//! claim(key)
//!   ├── Ready, belum lewat TTL ──► Claim::Cached(bytes)
//!   ├── Pending ─────────────────► Claim::Pending(rx)   tunggu pemilik
//!   └── kosong / kedaluwarsa ────► Claim::Owner(guard)  key direservasi
//! ```
//!
//! Hanya pemilik reservasi yang melakukan fan-out. `guard.complete(bytes)`
//! menyimpan response dan membangunkan semua penunggu; guard yang di-drop
//! tanpa `complete` (error, request dibatalkan) melepas reservasi dan
//! penunggu mencoba `claim` lagi.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedResponse {
    body: Bytes,
    stored_at: Instant,
}

#[derive(Debug)]
enum Slot {
    Ready(CachedResponse),
    Pending(watch::Receiver<Option<Bytes>>),
}

/// Hasil [`IdempotencyCache::claim`].
#[derive(Debug)]
pub enum Claim {
    /// Response tersimpan, kirim ulang apa adanya.
    Cached(Bytes),
    /// Request lain dengan key yang sama sedang berjalan.
    Pending(watch::Receiver<Option<Bytes>>),
    /// Key direservasi untuk pemanggil ini.
    Owner(PendingResponse),
}

/// Reservasi satu key. Lihat [`IdempotencyCache::claim`].
#[derive(Debug)]
pub struct PendingResponse {
    cache: Arc<IdempotencyCache>,
    key: String,
    tx: watch::Sender<Option<Bytes>>,
    completed: bool,
}

impl PendingResponse {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Simpan `body` untuk key ini dan bangunkan semua penunggu.
    pub fn complete(mut self, body: Bytes) {
        self.cache.store(&self.key, body.clone());
        self.tx.send_replace(Some(body));
        self.completed = true;
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut entries = self.cache.entries.lock();
        if matches!(entries.get(&self.key), Some(Slot::Pending(_))) {
            entries.remove(&self.key);
        }
    }
}

#[derive(Debug)]
pub struct IdempotencyCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Slot>>,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Body tersimpan untuk `key`, `None` jika tidak ada, masih pending, atau
    /// sudah lewat TTL.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Bytes> {
        match self.entries.lock().get(key) {
            Some(Slot::Ready(e)) if e.stored_at.elapsed() < self.ttl => Some(e.body.clone()),
            _ => None,
        }
    }

    /// Lookup dan reservasi dalam satu lock.
    pub fn claim(self: &Arc<Self>, key: &str) -> Claim {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(Slot::Ready(e)) if e.stored_at.elapsed() < self.ttl => {
                return Claim::Cached(e.body.clone());
            }
            Some(Slot::Pending(rx)) => return Claim::Pending(rx.clone()),
            _ => {}
        }

        let (tx, rx) = watch::channel(None);
        entries.insert(key.to_string(), Slot::Pending(rx));
        Claim::Owner(PendingResponse {
            cache: Arc::clone(self),
            key: key.to_string(),
            tx,
            completed: false,
        })
    }

    /// Tunggu response pemilik reservasi. `None` jika pemilik selesai tanpa
    /// menyimpan response.
    pub async fn wait(mut rx: watch::Receiver<Option<Bytes>>) -> Option<Bytes> {
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Simpan `body` jika `key` belum punya response yang masih berlaku.
    /// Response pertama dalam TTL tidak pernah ditimpa.
    pub fn insert(&self, key: impl Into<String>, body: Bytes) -> bool {
        self.store(&key.into(), body)
    }

    fn store(&self, key: &str, body: Bytes) -> bool {
        let mut entries = self.entries.lock();
        if let Some(Slot::Ready(e)) = entries.get(key) {
            if e.stored_at.elapsed() < self.ttl {
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            Slot::Ready(CachedResponse {
                body,
                stored_at: Instant::now(),
            }),
        );
        true
    }

    /// Buang semua entry kedaluwarsa. Reservasi yang berjalan tidak disentuh.
    /// Mengembalikan jumlah yang dibuang.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, slot| match slot {
            Slot::Ready(e) => e.stored_at.elapsed() < ttl,
            Slot::Pending(_) => true,
        });
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Jalankan sweep setiap `interval` sampai `shutdown` bernilai `true`.
pub fn spawn_sweeper(
    cache: Arc<IdempotencyCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = cache.len(), "idempotency sweep");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl_returns_same_bytes() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        cache.insert("k1", Bytes::from_static(b"{\"success\":true}"));
        assert_eq!(cache.get("k1"), Some(Bytes::from_static(b"{\"success\":true}")));
        assert_eq!(cache.get("k2"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_ignored_then_swept() {
        let cache = IdempotencyCache::new(Duration::from_millis(20));
        cache.insert("k1", Bytes::from_static(b"a"));
        std::thread::sleep(Duration::from_millis(40));
        cache.insert("k2", Bytes::from_static(b"b"));

        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k2").is_some());
    }

    #[test]
    fn test_insert_keeps_first_response() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        assert!(cache.insert("k1", Bytes::from_static(b"a")));
        assert!(!cache.insert("k1", Bytes::from_static(b"b")));
        assert_eq!(cache.get("k1"), Some(Bytes::from_static(b"a")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_can_be_replaced() {
        let cache = IdempotencyCache::new(Duration::from_millis(20));
        cache.insert("k1", Bytes::from_static(b"a"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.insert("k1", Bytes::from_static(b"b")));
        assert_eq!(cache.get("k1"), Some(Bytes::from_static(b"b")));
    }

    #[tokio::test]
    async fn test_claim_reserves_key_for_one_owner() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_secs(60)));
        let owner = match cache.claim("k1") {
            Claim::Owner(owner) => owner,
            other => panic!("expected owner, got {:?}", other),
        };
        let rx = match cache.claim("k1") {
            Claim::Pending(rx) => rx,
            other => panic!("expected pending, got {:?}", other),
        };
        assert_eq!(cache.get("k1"), None);

        let waiter = tokio::spawn(IdempotencyCache::wait(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        owner.complete(Bytes::from_static(b"first"));

        assert_eq!(waiter.await.expect("join"), Some(Bytes::from_static(b"first")));
        assert!(matches!(cache.claim("k1"), Claim::Cached(ref b) if b == &Bytes::from_static(b"first")));
    }

    #[tokio::test]
    async fn test_dropped_owner_releases_key() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_secs(60)));
        let owner = match cache.claim("k1") {
            Claim::Owner(owner) => owner,
            other => panic!("expected owner, got {:?}", other),
        };
        let rx = match cache.claim("k1") {
            Claim::Pending(rx) => rx,
            other => panic!("expected pending, got {:?}", other),
        };
        assert_eq!(cache.sweep(), 0);

        drop(owner);
        assert_eq!(IdempotencyCache::wait(rx).await, None);
        assert!(cache.is_empty());
        assert!(matches!(cache.claim("k1"), Claim::Owner(_)));
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_stops() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_millis(10)));
        cache.insert("k1", Bytes::from_static(b"a"));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(cache.clone(), Duration::from_millis(20), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        tx.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper stops")
            .expect("join");
    }
}
