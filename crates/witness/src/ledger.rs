//! # Witness Ledger
//!
//! Append-only NDJSON log per witness. Satu baris = satu [`LedgerEntry`].
//!
//! ## Invariants
//!
//! - `order` strictly increasing dan tidak pernah dipakai ulang, termasuk
//!   setelah restart (counter di-seed dari entry valid terakhir saat `open`)
//! - `record_id` tidak pernah muncul dua kali; `append` menolak duplikat
//! - `append` baru return setelah `sync_all` selesai
//! - Mirror bersifat best-effort: kegagalan mirror hanya di-log
//!
//! ## Concurrency
//!
//! `next_order()` memakai `AtomicU64` sehingga aman dipanggil bersamaan.
//! Penulisan file diserialisasi oleh satu `Mutex` milik ledger.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/<witness_id>_ledger.ndjson
//! {"record":{...},"attestation":{...},"ledger_ts":"..."}\n
//! {"record":{...},"attestation":{...},"ledger_ts":"..."}\n
//! ```

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use fabric_common::{FabricRecord, LedgerEntry, WitnessAttestation};

// ════════════════════════════════════════════════════════════════════════════
// ERRORS & REPORTS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] io::Error),

    #[error("ledger encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record {0} already in ledger")]
    Duplicate(String),
}

/// Hasil `validate_integrity`. Temuan dikembalikan sebagai data, bukan error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub entries_checked: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_entries: u64,
    pub last_entry_ts: Option<DateTime<Utc>>,
    pub ledger_size_bytes: u64,
    pub order_counter: u64,
}

/// Filter untuk [`Ledger::read`].
///
/// Urutan penerapan: predicate (`since`, `record_id`, `witness_id`),
/// lalu `offset`, lalu `limit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    /// Hanya entry dengan `record.ts >= since`.
    pub since: Option<DateTime<Utc>>,
    pub record_id: Option<String>,
    pub witness_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl LedgerFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    #[must_use]
    pub fn witness_id(mut self, witness_id: impl Into<String>) -> Self {
        self.witness_id = Some(witness_id.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(since) = self.since {
            if entry.record.ts < since {
                return false;
            }
        }
        if let Some(id) = &self.record_id {
            if &entry.record.record_id != id {
                return false;
            }
        }
        if let Some(w) = &self.witness_id {
            if &entry.attestation.witness_id != w {
                return false;
            }
        }
        true
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LEDGER
// ════════════════════════════════════════════════════════════════════════════

struct LedgerState {
    file: File,
    /// Ukuran file = offset baris berikutnya.
    len: u64,
    /// record_id → byte offset baris.
    index: HashMap<String, u64>,
    entries: u64,
    last_record_id: Option<String>,
    last_entry_ts: Option<DateTime<Utc>>,
}

/// Append-only ledger satu witness.
pub struct Ledger {
    path: PathBuf,
    mirror_path: Option<PathBuf>,
    state: Mutex<LedgerState>,
    order_counter: AtomicU64,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.path)
            .field("mirror_path", &self.mirror_path)
            .field("order_counter", &self.current_order())
            .finish()
    }
}

impl Ledger {
    /// Buka (atau buat) ledger di `path`.
    ///
    /// Seluruh file di-scan sekali untuk membangun index record_id dan
    /// memulihkan order counter dari entry valid terakhir. Baris rusak
    /// di-skip dengan warning; baris terakhir yang terpotong ditutup dengan
    /// newline agar append berikutnya tidak menempel.
    pub fn open(path: impl AsRef<Path>, mirror_path: Option<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let mut index = HashMap::new();
        let mut entries = 0u64;
        let mut last_order = 0u64;
        let mut last_record_id = None;
        let mut last_entry_ts = None;
        let mut offset = 0u64;
        let mut ends_with_newline = true;

        let mut reader = BufReader::new(File::open(&path)?);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            ends_with_newline = buf.last() == Some(&b'\n');
            let line_offset = offset;
            offset += n as u64;

            let text = String::from_utf8_lossy(&buf);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str::<LedgerEntry>(text) {
                Ok(entry) => {
                    last_order = entry.attestation.state_view.order;
                    last_entry_ts = Some(entry.ledger_ts);
                    index
                        .entry(entry.record.record_id.clone())
                        .or_insert(line_offset);
                    last_record_id = Some(entry.record.record_id);
                    entries += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), offset = line_offset, error = %e, "skipping malformed ledger line");
                }
            }
        }

        if !ends_with_newline {
            file.write_all(b"\n")?;
            offset += 1;
        }

        debug!(path = %path.display(), entries, last_order, "ledger opened");

        Ok(Self {
            path,
            mirror_path,
            state: Mutex::new(LedgerState {
                file,
                len: offset,
                index,
                entries,
                last_record_id,
                last_entry_ts,
            }),
            order_counter: AtomicU64::new(last_order),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ────────────────────────────────────────────────────────────────────────
    // Ordering
    // ────────────────────────────────────────────────────────────────────────

    /// Ambil order berikutnya. Aman untuk pemanggil concurrent.
    pub fn next_order(&self) -> u64 {
        self.order_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Kembalikan `order` yang belum sempat di-append.
    ///
    /// Hanya berhasil jika `order` masih merupakan nilai terakhir yang
    /// dibagikan; selain itu counter dibiarkan (gap hanya menjadi warning).
    pub fn release_order(&self, order: u64) -> bool {
        order > 0
            && self
                .order_counter
                .compare_exchange(order, order - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    #[must_use]
    pub fn current_order(&self) -> u64 {
        self.order_counter.load(Ordering::SeqCst)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Write path
    // ────────────────────────────────────────────────────────────────────────

    /// Append satu entry secara durable.
    ///
    /// Return setelah data di-`sync_all`. Mirror ditulis sesudahnya dan
    /// kegagalannya tidak mempengaruhi hasil.
    pub fn append(
        &self,
        record: FabricRecord,
        attestation: WitnessAttestation,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry {
            record,
            attestation,
            ledger_ts: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        {
            let mut state = self.state.lock();
            if state.index.contains_key(&entry.record.record_id) {
                return Err(LedgerError::Duplicate(entry.record.record_id.clone()));
            }

            let write_result = state
                .file
                .write_all(line.as_bytes())
                .and_then(|_| state.file.sync_all());
            if let Err(e) = write_result {
                // resync length with whatever reached the disk
                if let Ok(meta) = state.file.metadata() {
                    state.len = meta.len();
                }
                return Err(LedgerError::Io(e));
            }

            let offset = state.len;
            state.len += line.len() as u64;
            state.index.insert(entry.record.record_id.clone(), offset);
            state.entries += 1;
            state.last_record_id = Some(entry.record.record_id.clone());
            state.last_entry_ts = Some(entry.ledger_ts);
        }

        self.mirror(&line);
        Ok(entry)
    }

    fn mirror(&self, line: &str) {
        let Some(mirror) = &self.mirror_path else {
            return;
        };

        let result = (|| -> io::Result<()> {
            if let Some(parent) = mirror.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut f = OpenOptions::new().create(true).append(true).open(mirror)?;
            f.write_all(line.as_bytes())
        })();

        if let Err(e) = result {
            warn!(mirror = %mirror.display(), error = %e, "ledger mirror write failed");
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Read path
    // ────────────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn contains(&self, record_id: &str) -> bool {
        self.state.lock().index.contains_key(record_id)
    }

    /// record_id dari entry terakhir yang di-append.
    #[must_use]
    pub fn last_record_id(&self) -> Option<String> {
        self.state.lock().last_record_id.clone()
    }

    /// Ambil entry untuk `record_id` lewat index offset.
    pub fn get_record(&self, record_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let offset = match self.state.lock().index.get(record_id) {
            Some(o) => *o,
            None => return Ok(None),
        };

        let mut f = File::open(&self.path)?;
        f.seek(SeekFrom::Start(offset))?;
        let mut line = String::new();
        BufReader::new(f).read_line(&mut line)?;
        let entry: LedgerEntry = serde_json::from_str(line.trim_end())?;
        Ok(Some(entry))
    }

    /// Iterator lazy atas entry dalam urutan file.
    ///
    /// Setiap panggilan membuka file baru, jadi iterator bisa dimulai ulang
    /// dengan memanggil `read` lagi. Baris rusak di-skip.
    pub fn read(&self, filter: LedgerFilter) -> Result<LedgerEntries, LedgerError> {
        let f = File::open(&self.path)?;
        Ok(LedgerEntries {
            reader: BufReader::new(f),
            filter,
            skipped: 0,
            yielded: 0,
        })
    }

    /// Seluruh ledger sebagai NDJSON tanpa trailing newline.
    pub fn export_as_text(&self) -> Result<String, LedgerError> {
        let mut content = String::new();
        File::open(&self.path)?.read_to_string(&mut content)?;
        Ok(content.trim().to_string())
    }

    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        let state = self.state.lock();
        LedgerStats {
            total_entries: state.entries,
            last_entry_ts: state.last_entry_ts,
            ledger_size_bytes: state.len,
            order_counter: self.current_order(),
        }
    }

    /// Jalankan tiga pemeriksaan integritas:
    ///
    /// 1. record_id duplikat → error
    /// 2. order tidak kontigu (`order[i] != order[i-1] + 1`, mulai dari 1) → warning
    /// 3. `record.ts` mundur dibanding entry sebelumnya → warning
    ///
    /// Baris yang tidak bisa di-parse juga dilaporkan sebagai error.
    #[must_use]
    pub fn validate_integrity(&self) -> IntegrityReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut checked = 0usize;

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                errors.push(format!("failed to read ledger: {}", e));
                return IntegrityReport {
                    valid: false,
                    errors,
                    warnings,
                    entries_checked: 0,
                };
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut prev: Option<(u64, DateTime<Utc>)> = None;

        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    errors.push(format!("failed to read ledger at line {}: {}", i + 1, e));
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let entry: LedgerEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => {
                    errors.push(format!("malformed entry at line {}: {}", i + 1, e));
                    continue;
                }
            };
            checked += 1;

            let id = &entry.record.record_id;
            if !seen.insert(id.clone()) {
                errors.push(format!("duplicate record id: {}", id));
            }

            let order = entry.attestation.state_view.order;
            let expected = prev.map(|(o, _)| o + 1).unwrap_or(1);
            if order != expected {
                warnings.push(format!(
                    "order sequence gap at {}: expected {}, got {}",
                    id, expected, order
                ));
            }

            if let Some((_, prev_ts)) = prev {
                if entry.record.ts < prev_ts {
                    warnings.push(format!("timestamp out of order at {}", id));
                }
            }

            prev = Some((order, entry.record.ts));
        }

        IntegrityReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            entries_checked: checked,
        }
    }
}

/// Iterator hasil [`Ledger::read`].
pub struct LedgerEntries {
    reader: BufReader<File>,
    filter: LedgerFilter,
    skipped: usize,
    yielded: usize,
}

impl Iterator for LedgerEntries {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<LedgerEntry> {
        if let Some(limit) = self.filter.limit {
            if self.yielded >= limit {
                return None;
            }
        }

        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "ledger read stopped");
                    return None;
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: LedgerEntry = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !self.filter.matches(&entry) {
                continue;
            }
            if self.skipped < self.filter.offset {
                self.skipped += 1;
                continue;
            }

            self.yielded += 1;
            return Some(entry);
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fabric_common::{App, RecordMeta, StateView};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry_parts(id: &str, order: u64, ts: DateTime<Utc>) -> (FabricRecord, WitnessAttestation) {
        let sv = StateView {
            record_id: id.to_string(),
            order,
            size: 10,
            state_hash: None,
            prev_record_id: None,
        };
        let record = FabricRecord {
            record_id: id.to_string(),
            ts,
            app: App::Chat,
            payload: "hello".to_string(),
            meta: RecordMeta::chat("general"),
            state_view: sv.clone(),
        };
        let att = WitnessAttestation {
            witness_id: "w1".to_string(),
            accept: true,
            ts,
            state_view: sv,
            signature: None,
            conflict_ref: None,
        };
        (record, att)
    }

    fn raw_line(id: &str, order: u64, ts: DateTime<Utc>) -> String {
        let (record, attestation) = entry_parts(id, order, ts);
        let entry = LedgerEntry { record, attestation, ledger_ts: ts };
        serde_json::to_string(&entry).expect("encode")
    }

    fn append_n(ledger: &Ledger, n: usize) {
        for i in 0..n {
            let order = ledger.next_order();
            let (r, a) = entry_parts(&format!("r{}", i + 1), order, Utc::now());
            ledger.append(r, a).expect("append");
        }
    }

    // ── 1. open_and_recover ──────────────────────────────────────────────

    #[test]
    fn empty_ledger_starts_at_zero() {
        let tmp = TempDir::new().expect("tmpdir");
        let ledger = Ledger::open(tmp.path().join("w1_ledger.ndjson"), None).expect("open");
        assert_eq!(ledger.current_order(), 0);
        assert_eq!(ledger.next_order(), 1);
        assert_eq!(ledger.stats().total_entries, 0);
    }

    #[test]
    fn order_counter_recovered_after_restart() {
        let tmp = TempDir::new().expect("tmpdir");
        let path = tmp.path().join("data").join("w1_ledger.ndjson");
        {
            let ledger = Ledger::open(&path, None).expect("open");
            append_n(&ledger, 3);
        }
        let ledger = Ledger::open(&path, None).expect("reopen");
        assert_eq!(ledger.current_order(), 3);
        assert_eq!(ledger.next_order(), 4);
        assert_eq!(ledger.last_record_id().as_deref(), Some("r3"));
        assert!(ledger.contains("r2"));
        let entry = ledger.get_record("r2").expect("get").expect("present");
        assert_eq!(entry.attestation.state_view.order, 2);
    }

    #[test]
    fn torn_tail_is_skipped_and_closed() {
        let tmp = TempDir::new().expect("tmpdir");
        let path = tmp.path().join("w1_ledger.ndjson");
        let now = Utc::now();
        fs::write(&path, format!("{}\n{{\"record\":", raw_line("a", 1, now))).expect("seed");

        let ledger = Ledger::open(&path, None).expect("open");
        assert_eq!(ledger.current_order(), 1);

        let order = ledger.next_order();
        let (r, a) = entry_parts("b", order, now);
        ledger.append(r, a).expect("append");

        let ids: Vec<String> = ledger
            .read(LedgerFilter::new())
            .expect("read")
            .map(|e| e.record.record_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(ledger.get_record("b").expect("get").is_some());
    }

    // ── 2. append ────────────────────────────────────────────────────────

    #[test]
    fn duplicate_append_rejected() {
        let tmp = TempDir::new().expect("tmpdir");
        let ledger = Ledger::open(tmp.path().join("l.ndjson"), None).expect("open");
        let (r, a) = entry_parts("r1", ledger.next_order(), Utc::now());
        ledger.append(r.clone(), a.clone()).expect("first");
        assert!(matches!(ledger.append(r, a), Err(LedgerError::Duplicate(id)) if id == "r1"));
        assert_eq!(ledger.stats().total_entries, 1);
    }

    #[test]
    fn mirror_failure_does_not_fail_append() {
        let tmp = TempDir::new().expect("tmpdir");
        // a directory cannot be opened for append
        let mirror = tmp.path().join("mirror_is_dir");
        fs::create_dir_all(&mirror).expect("mkdir");

        let ledger = Ledger::open(tmp.path().join("l.ndjson"), Some(mirror)).expect("open");
        let (r, a) = entry_parts("r1", ledger.next_order(), Utc::now());
        assert!(ledger.append(r, a).is_ok());
        assert!(ledger.contains("r1"));
    }

    #[test]
    fn mirror_receives_same_lines() {
        let tmp = TempDir::new().expect("tmpdir");
        let mirror = tmp.path().join("public").join("mirror.ndjson");
        let ledger = Ledger::open(tmp.path().join("l.ndjson"), Some(mirror.clone())).expect("open");
        append_n(&ledger, 2);

        let mirrored = fs::read_to_string(&mirror).expect("mirror");
        assert_eq!(mirrored.trim(), ledger.export_as_text().expect("export"));
    }

    #[test]
    fn concurrent_next_order_is_unique() {
        let tmp = TempDir::new().expect("tmpdir");
        let ledger = Arc::new(Ledger::open(tmp.path().join("l.ndjson"), None).expect("open"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = ledger.clone();
                std::thread::spawn(move || (0..50).map(|_| l.next_order()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("join"))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=400).collect::<Vec<u64>>());
    }

    #[test]
    fn release_order_only_rewinds_latest() {
        let tmp = TempDir::new().expect("tmpdir");
        let ledger = Ledger::open(tmp.path().join("l.ndjson"), None).expect("open");
        let a = ledger.next_order();
        let b = ledger.next_order();
        assert!(!ledger.release_order(a));
        assert!(ledger.release_order(b));
        assert_eq!(ledger.next_order(), 2);
    }

    // ── 3. read_filter ───────────────────────────────────────────────────

    #[test]
    fn read_applies_since_then_offset_then_limit() {
        let tmp = TempDir::new().expect("tmpdir");
        let ledger = Ledger::open(tmp.path().join("l.ndjson"), None).expect("open");
        let base = Utc::now();
        for i in 0..6 {
            let (r, a) = entry_parts(&format!("r{}", i), ledger.next_order(), base + Duration::seconds(i));
            ledger.append(r, a).expect("append");
        }

        let ids: Vec<String> = ledger
            .read(LedgerFilter::new().since(base + Duration::seconds(2)).offset(1).limit(2))
            .expect("read")
            .map(|e| e.record.record_id)
            .collect();
        assert_eq!(ids, vec!["r3", "r4"]);

        let one: Vec<_> = ledger
            .read(LedgerFilter::new().record_id("r5"))
            .expect("read")
            .collect();
        assert_eq!(one.len(), 1);

        let none: Vec<_> = ledger
            .read(LedgerFilter::new().witness_id("w9"))
            .expect("read")
            .collect();
        assert!(none.is_empty());
    }

    #[test]
    fn export_has_no_trailing_newline() {
        let tmp = TempDir::new().expect("tmpdir");
        let ledger = Ledger::open(tmp.path().join("l.ndjson"), None).expect("open");
        append_n(&ledger, 3);
        let text = ledger.export_as_text().expect("export");
        assert_eq!(text.lines().count(), 3);
        assert!(!text.ends_with('\n'));
    }

    // ── 4. integrity ─────────────────────────────────────────────────────

    #[test]
    fn clean_ledger_is_valid() {
        let tmp = TempDir::new().expect("tmpdir");
        let ledger = Ledger::open(tmp.path().join("l.ndjson"), None).expect("open");
        append_n(&ledger, 5);
        let report = ledger.validate_integrity();
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.entries_checked, 5);
    }

    #[test]
    fn integrity_findings_are_classified() {
        let tmp = TempDir::new().expect("tmpdir");
        let path = tmp.path().join("l.ndjson");
        let t0 = Utc::now();
        let lines = [
            raw_line("a", 1, t0),
            raw_line("b", 2, t0 + Duration::seconds(5)),
            raw_line("c", 4, t0 + Duration::seconds(1)), // gap + ts regression
            raw_line("a", 5, t0 + Duration::seconds(6)), // duplicate
            "not json".to_string(),
        ];
        fs::write(&path, lines.join("\n") + "\n").expect("seed");

        let ledger = Ledger::open(&path, None).expect("open");
        let report = ledger.validate_integrity();
        assert!(!report.valid);
        assert_eq!(report.entries_checked, 4);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.contains("duplicate record id: a")));
        assert!(report.errors.iter().any(|e| e.contains("malformed entry at line 5")));
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("expected 3, got 4")));
        assert!(report.warnings.iter().any(|w| w.contains("timestamp out of order at c")));
    }
}
