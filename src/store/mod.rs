//! Transactional key-value store facade.
//!
//! The data-structure layer only needs ordered point reads, bounded range
//! scans, snapshots and optimistic transactions. [`Backend`] is that contract;
//! [`Store`] adds one-shot helpers and the retry loop around transactions.

pub mod memory;
pub mod txn;

use crate::codec::prefix_next;
use crate::error::{KvdisError, KvdisResult};
use rand::Rng;
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub use txn::Transaction;

pub type KvPair = (Vec<u8>, Vec<u8>);

/// Bits reserved for the logical counter in a store timestamp.
pub const PHYSICAL_SHIFT: u32 = 18;

const MAX_BACKOFF_MS: u64 = 100;

/// A contiguous interval of raw keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    pub fn new(start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Self {
        KeyRange { start, end }
    }

    /// Every key beginning with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        let end = match prefix_next(prefix) {
            Some(next) => Bound::Excluded(next),
            None => Bound::Unbounded,
        };
        KeyRange {
            start: Bound::Included(prefix.to_vec()),
            end,
        }
    }

    /// `[start, end)`
    pub fn half_open(start: Vec<u8>, end: Vec<u8>) -> Self {
        KeyRange {
            start: Bound::Included(start),
            end: Bound::Excluded(end),
        }
    }

    pub fn as_bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        (as_slice_bound(&self.start), as_slice_bound(&self.end))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = match &self.start {
            Bound::Included(s) => key >= s.as_slice(),
            Bound::Excluded(s) => key > s.as_slice(),
            Bound::Unbounded => true,
        };
        let below_end = match &self.end {
            Bound::Included(e) => key <= e.as_slice(),
            Bound::Excluded(e) => key < e.as_slice(),
            Bound::Unbounded => true,
        };
        above_start && below_end
    }

    /// True when no key can fall inside the range. Ordered maps panic on
    /// inverted bounds, so scans check this first.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e))
            | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
            _ => false,
        }
    }
}

fn as_slice_bound(b: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match b {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Read access shared by snapshots and transactions.
pub trait KvRead {
    fn get(&self, key: &[u8]) -> KvdisResult<Option<Vec<u8>>>;

    /// Forward scan over `range`, skipping `offset` live entries and returning
    /// at most `limit`.
    fn scan(&self, range: &KeyRange, offset: usize, limit: usize) -> KvdisResult<Vec<KvPair>>;

    /// Point reads for many keys; absent keys are missing from the map.
    fn batch_get(&self, keys: &[Vec<u8>]) -> KvdisResult<HashMap<Vec<u8>, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn scan_keys(&self, range: &KeyRange, offset: usize, limit: usize) -> KvdisResult<Vec<Vec<u8>>> {
        Ok(self
            .scan(range, offset, limit)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    fn scan_values(&self, range: &KeyRange, offset: usize, limit: usize) -> KvdisResult<Vec<Vec<u8>>> {
        Ok(self
            .scan(range, offset, limit)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }
}

pub type Snapshot = Box<dyn KvRead + Send + Sync>;

/// What the data-structure layer requires from a transactional KV store.
pub trait Backend: Send + Sync {
    /// A read view at the newest committed version.
    fn snapshot(&self) -> KvdisResult<Snapshot>;

    fn begin(&self) -> KvdisResult<Transaction>;

    /// Atomically apply the transaction's buffered writes. Fails with
    /// [`KvdisError::WriteConflict`] if another transaction committed a
    /// write to one of the same keys after this one started.
    fn commit(&self, txn: Transaction) -> KvdisResult<()>;

    /// A fresh timestamp from the store's oracle.
    fn current_ts(&self) -> KvdisResult<u64>;

    /// Physically remove every version of every key in `range`, bypassing
    /// transactions.
    fn unsafe_delete_range(&self, range: &KeyRange) -> KvdisResult<()>;

    /// Discard versions no snapshot at or after `safe_point` can observe.
    /// Returns the number of versions removed.
    fn run_gc(&self, safe_point: u64, concurrency: usize) -> KvdisResult<usize>;
}

/// Backend handle shared by every engine and background task.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    txn_retry: usize,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>, txn_retry: usize) -> Self {
        Store { backend, txn_retry }
    }

    pub fn snapshot(&self) -> KvdisResult<Snapshot> {
        self.backend.snapshot()
    }

    pub fn get(&self, key: &[u8]) -> KvdisResult<Option<Vec<u8>>> {
        self.snapshot()?.get(key)
    }

    pub fn batch_get(&self, keys: &[Vec<u8>]) -> KvdisResult<HashMap<Vec<u8>, Vec<u8>>> {
        self.snapshot()?.batch_get(keys)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> KvdisResult<()> {
        self.run_in_txn(|txn| {
            txn.set(key.to_vec(), value.to_vec());
            Ok(())
        })
    }

    pub fn delete(&self, keys: &[Vec<u8>]) -> KvdisResult<()> {
        self.run_in_txn(|txn| {
            for key in keys {
                txn.delete(key.clone());
            }
            Ok(())
        })
    }

    pub fn scan_keys(&self, range: &KeyRange, offset: usize, limit: usize) -> KvdisResult<Vec<Vec<u8>>> {
        self.snapshot()?.scan_keys(range, offset, limit)
    }

    pub fn scan_values(&self, range: &KeyRange, offset: usize, limit: usize) -> KvdisResult<Vec<Vec<u8>>> {
        self.snapshot()?.scan_values(range, offset, limit)
    }

    /// Transactionally delete up to `limit` keys of `range`.
    pub fn delete_range(&self, range: &KeyRange, limit: usize) -> KvdisResult<usize> {
        self.run_in_txn(|txn| txn.delete_range(range, limit))
    }

    pub fn begin(&self) -> KvdisResult<Transaction> {
        self.backend.begin()
    }

    pub fn commit(&self, txn: Transaction) -> KvdisResult<()> {
        self.backend.commit(txn)
    }

    pub fn current_ts(&self) -> KvdisResult<u64> {
        self.backend.current_ts()
    }

    pub fn unsafe_delete_range(&self, range: &KeyRange) -> KvdisResult<()> {
        self.backend.unsafe_delete_range(range)
    }

    pub fn run_gc(&self, safe_point: u64, concurrency: usize) -> KvdisResult<usize> {
        self.backend.run_gc(safe_point, concurrency)
    }

    pub fn txn_retry(&self) -> usize {
        self.txn_retry
    }

    /// Run `f` inside a fresh transaction and commit it. On a write conflict
    /// the whole body is re-run against a new snapshot, up to `txn_retry`
    /// times. An error returned by `f` aborts without committing.
    pub fn run_in_txn<T, F>(&self, mut f: F) -> KvdisResult<T>
    where
        F: FnMut(&mut Transaction) -> KvdisResult<T>,
    {
        let mut attempt = 0;
        loop {
            let mut txn = self.backend.begin()?;
            let out = f(&mut txn)?;
            match self.backend.commit(txn) {
                Ok(()) => return Ok(out),
                Err(e) if e.is_retryable() => {
                    if attempt >= self.txn_retry {
                        warn!("transaction gave up after {attempt} retries");
                        return Err(KvdisError::CommitConflict(attempt));
                    }
                    let wait = backoff(attempt);
                    debug!("write conflict, retry {} in {:?}", attempt + 1, wait);
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Randomized exponential backoff, capped at 100ms.
pub fn backoff(attempt: usize) -> Duration {
    let cap = MAX_BACKOFF_MS.min(1u64 << attempt.min(16));
    let ms = rand::thread_rng().gen_range(cap / 2..=cap);
    Duration::from_millis(ms)
}

pub fn compose_ts(physical_ms: u64, logical: u64) -> u64 {
    (physical_ms << PHYSICAL_SHIFT) | logical
}

pub fn extract_physical(ts: u64) -> u64 {
    ts >> PHYSICAL_SHIFT
}

/// Get current time in milliseconds since UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;

    fn store() -> Store {
        Store::new(Arc::new(MemoryBackend::new()), 3)
    }

    #[test]
    fn test_key_range_prefix() {
        let range = KeyRange::prefix(b"ab");
        assert!(range.contains(b"ab"));
        assert!(range.contains(b"ab\xff\xff"));
        assert!(!range.contains(b"ac"));
        assert!(!range.contains(b"aa"));
    }

    #[test]
    fn test_key_range_empty() {
        assert!(KeyRange::half_open(b"b".to_vec(), b"a".to_vec()).is_empty());
        assert!(KeyRange::half_open(b"a".to_vec(), b"a".to_vec()).is_empty());
        let point = KeyRange::new(Bound::Included(b"a".to_vec()), Bound::Included(b"a".to_vec()));
        assert!(!point.is_empty());
    }

    #[test]
    fn test_set_get_delete() {
        let store = store();
        store.set(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        store.delete(&[b"k".to_vec()]).unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_run_in_txn_error_discards_writes() {
        let store = store();
        let res: KvdisResult<()> = store.run_in_txn(|txn| {
            txn.set(b"k".to_vec(), b"v".to_vec());
            Err(KvdisError::CmdParams)
        });
        assert!(res.is_err());
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_run_in_txn_retries_on_conflict() {
        let store = store();
        store.set(b"counter", b"0").unwrap();
        let mut attempts = 0;
        store
            .run_in_txn(|txn| {
                attempts += 1;
                let current = txn.get(b"counter")?.unwrap_or_default();
                if attempts == 1 {
                    // A competing writer commits after our snapshot was taken.
                    store.set(b"counter", b"10").unwrap();
                }
                let n: i64 = std::str::from_utf8(&current).unwrap().parse().unwrap();
                txn.set(b"counter".to_vec(), (n + 1).to_string().into_bytes());
                Ok(())
            })
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(store.get(b"counter").unwrap(), Some(b"11".to_vec()));
    }

    #[test]
    fn test_run_in_txn_gives_up() {
        let store = Store::new(Arc::new(MemoryBackend::new()), 1);
        let res = store.run_in_txn(|txn| {
            store.set(b"hot", b"x").unwrap();
            txn.set(b"hot".to_vec(), b"y".to_vec());
            Ok(())
        });
        assert!(matches!(res, Err(KvdisError::CommitConflict(1))));
    }

    #[test]
    fn test_scan_pagination() {
        let store = store();
        for i in 0..10u8 {
            store.set(&[b'k', i], &[i]).unwrap();
        }
        let range = KeyRange::prefix(b"k");
        let vals = store.scan_values(&range, 2, 3).unwrap();
        assert_eq!(vals, vec![vec![2], vec![3], vec![4]]);
        let keys = store.scan_keys(&range, 8, 100).unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_backoff_capped() {
        for attempt in 0..40 {
            assert!(backoff(attempt) <= Duration::from_millis(MAX_BACKOFF_MS));
        }
    }

    #[test]
    fn test_ts_compose() {
        let ts = compose_ts(1_700_000_000_000, 5);
        assert_eq!(extract_physical(ts), 1_700_000_000_000);
    }
}
