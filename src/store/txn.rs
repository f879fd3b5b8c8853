use super::{KeyRange, KvPair, KvRead, Snapshot};
use crate::error::KvdisResult;
use std::collections::BTreeMap;

/// An optimistic transaction: a snapshot taken at `start_ts` plus a buffer of
/// pending writes. Reads see the buffer layered over the snapshot; nothing is
/// visible to other readers until the backend commits it.
pub struct Transaction {
    start_ts: u64,
    snapshot: Snapshot,
    /// `None` marks a pending delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Transaction {
    pub fn new(start_ts: u64, snapshot: Snapshot) -> Self {
        Transaction {
            start_ts,
            snapshot,
            writes: BTreeMap::new(),
        }
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Delete up to `limit` live keys of `range`, returning how many were
    /// removed.
    pub fn delete_range(&mut self, range: &KeyRange, limit: usize) -> KvdisResult<usize> {
        let keys = self.scan_keys(range, 0, limit)?;
        let n = keys.len();
        for key in keys {
            self.delete(key);
        }
        Ok(n)
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn into_writes(self) -> (u64, BTreeMap<Vec<u8>, Option<Vec<u8>>>) {
        (self.start_ts, self.writes)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("start_ts", &self.start_ts)
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl KvRead for Transaction {
    fn get(&self, key: &[u8]) -> KvdisResult<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.snapshot.get(key),
        }
    }

    fn scan(&self, range: &KeyRange, offset: usize, limit: usize) -> KvdisResult<Vec<KvPair>> {
        if range.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let pending: Vec<(&Vec<u8>, &Option<Vec<u8>>)> =
            self.writes.range::<[u8], _>(range.as_bounds()).collect();
        // Each buffered delete can hide at most one snapshot entry, so this
        // many snapshot entries always cover the first `offset + limit`
        // entries of the merged view.
        let want = offset.saturating_add(limit);
        let base = self
            .snapshot
            .scan(range, 0, want.saturating_add(pending.len()))?;

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = base.into_iter().collect();
        for (key, value) in pending {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::memory::MemoryBackend;
    use crate::store::{Backend, KeyRange, KvRead};

    #[test]
    fn test_reads_see_own_writes() {
        let backend = MemoryBackend::new();
        let mut txn = backend.begin().unwrap();
        txn.set(b"a".to_vec(), b"1".to_vec());
        assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
        txn.delete(b"a".to_vec());
        assert_eq!(txn.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_scan_merges_buffer_over_snapshot() {
        let backend = MemoryBackend::new();
        let mut setup = backend.begin().unwrap();
        for k in [b"k1", b"k2", b"k3", b"k4"] {
            setup.set(k.to_vec(), b"old".to_vec());
        }
        backend.commit(setup).unwrap();

        let mut txn = backend.begin().unwrap();
        txn.delete(b"k1".to_vec());
        txn.delete(b"k2".to_vec());
        txn.set(b"k25".to_vec(), b"new".to_vec());
        let got = txn.scan(&KeyRange::prefix(b"k"), 0, 2).unwrap();
        assert_eq!(
            got,
            vec![
                (b"k25".to_vec(), b"new".to_vec()),
                (b"k3".to_vec(), b"old".to_vec()),
            ]
        );
        let rest = txn.scan(&KeyRange::prefix(b"k"), 2, 10).unwrap();
        assert_eq!(rest, vec![(b"k4".to_vec(), b"old".to_vec())]);
    }

    #[test]
    fn test_delete_range_limit() {
        let backend = MemoryBackend::new();
        let mut txn = backend.begin().unwrap();
        for i in 0..5u8 {
            txn.set(vec![b'x', i], vec![i]);
        }
        let removed = txn.delete_range(&KeyRange::prefix(b"x"), 3).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(txn.scan_keys(&KeyRange::prefix(b"x"), 0, 10).unwrap().len(), 2);
    }
}
