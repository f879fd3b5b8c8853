//! In-process multi-version backend.
//!
//! Keeps every committed version of every key in an ordered map, hands out
//! timestamps from a monotonic oracle, and detects write-write conflicts at
//! commit time (first committer wins). Used by the test suite and by the
//! server binary when no remote cluster is configured.

use super::{Backend, KeyRange, KvPair, KvRead, Snapshot, Transaction, compose_ts, now_millis};
use crate::error::{KvdisError, KvdisResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// Committed versions of one key, oldest first. `None` is a delete marker.
type VersionChain = Vec<(u64, Option<Vec<u8>>)>;

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<Vec<u8>, VersionChain>,
    safe_point: u64,
}

pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
    last_ts: Mutex<u64>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            inner: Arc::new(RwLock::new(Inner::default())),
            last_ts: Mutex::new(0),
        }
    }

    fn next_ts(&self) -> KvdisResult<u64> {
        let mut last = self.last_ts.lock().map_err(poisoned)?;
        let ts = compose_ts(now_millis(), 0).max(*last + 1);
        *last = ts;
        Ok(ts)
    }

    /// Total number of stored versions, including delete markers.
    pub fn version_count(&self) -> KvdisResult<usize> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.data.values().map(Vec::len).sum())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> KvdisError {
    KvdisError::Storage("memory backend lock poisoned".into())
}

fn visible(chain: &VersionChain, read_ts: u64) -> Option<&Vec<u8>> {
    chain
        .iter()
        .rev()
        .find(|(ts, _)| *ts <= read_ts)
        .and_then(|(_, value)| value.as_ref())
}

struct MemorySnapshot {
    inner: Arc<RwLock<Inner>>,
    read_ts: u64,
}

impl MemorySnapshot {
    fn check_safe_point(&self, inner: &Inner) -> KvdisResult<()> {
        if self.read_ts < inner.safe_point {
            return Err(KvdisError::SnapshotTooOld {
                read_ts: self.read_ts,
                safe_point: inner.safe_point,
            });
        }
        Ok(())
    }
}

impl KvRead for MemorySnapshot {
    fn get(&self, key: &[u8]) -> KvdisResult<Option<Vec<u8>>> {
        let inner = self.inner.read().map_err(poisoned)?;
        self.check_safe_point(&inner)?;
        Ok(inner
            .data
            .get(key)
            .and_then(|chain| visible(chain, self.read_ts))
            .cloned())
    }

    fn scan(&self, range: &KeyRange, offset: usize, limit: usize) -> KvdisResult<Vec<KvPair>> {
        if range.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().map_err(poisoned)?;
        self.check_safe_point(&inner)?;
        let mut out = Vec::new();
        let mut skipped = 0;
        for (key, chain) in inner.data.range::<[u8], _>(range.as_bounds()) {
            let Some(value) = visible(chain, self.read_ts) else {
                continue;
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push((key.clone(), value.clone()));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}

impl Backend for MemoryBackend {
    fn snapshot(&self) -> KvdisResult<Snapshot> {
        let read_ts = self.next_ts()?;
        Ok(Box::new(MemorySnapshot {
            inner: self.inner.clone(),
            read_ts,
        }))
    }

    fn begin(&self) -> KvdisResult<Transaction> {
        let start_ts = self.next_ts()?;
        let snapshot = Box::new(MemorySnapshot {
            inner: self.inner.clone(),
            read_ts: start_ts,
        });
        Ok(Transaction::new(start_ts, snapshot))
    }

    fn commit(&self, txn: Transaction) -> KvdisResult<()> {
        let (start_ts, writes) = txn.into_writes();
        if writes.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().map_err(poisoned)?;
        for key in writes.keys() {
            if let Some(chain) = inner.data.get(key)
                && let Some((ts, _)) = chain.last()
                && *ts > start_ts
            {
                debug!("write conflict: committed at {ts}, txn started at {start_ts}");
                return Err(KvdisError::WriteConflict);
            }
        }
        let commit_ts = self.next_ts()?;
        for (key, value) in writes {
            inner.data.entry(key).or_default().push((commit_ts, value));
        }
        Ok(())
    }

    fn current_ts(&self) -> KvdisResult<u64> {
        self.next_ts()
    }

    fn unsafe_delete_range(&self, range: &KeyRange) -> KvdisResult<()> {
        if range.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().map_err(poisoned)?;
        let doomed: Vec<Vec<u8>> = inner
            .data
            .range::<[u8], _>(range.as_bounds())
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            inner.data.remove(&key);
        }
        Ok(())
    }

    fn run_gc(&self, safe_point: u64, concurrency: usize) -> KvdisResult<usize> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        debug!("gc to safe point {safe_point} (concurrency hint {concurrency})");
        let mut removed = 0;
        inner.data.retain(|_, chain| {
            // Keep the newest version at or below the safe point and
            // everything after it; drop it too if it is a delete marker.
            if let Some(pos) = chain.iter().rposition(|(ts, _)| *ts <= safe_point) {
                let keep_from = if chain[pos].1.is_none() { pos + 1 } else { pos };
                removed += keep_from;
                chain.drain(..keep_from);
            }
            !chain.is_empty()
        });
        inner.safe_point = inner.safe_point.max(safe_point);
        Ok(removed)
    }
}
