//! Key expiration.
//!
//! Every key with an expiration has one entry in its kind's expiration index,
//! ordered by timestamp. Reads already treat expired keys as absent; the
//! sweepers walk the index and reclaim the storage.

use super::{Engine, SharedEngine, check_key};
use crate::codec::prefix_next;
use crate::error::{KvdisError, KvdisResult};
use crate::store::{KeyRange, KvRead, Transaction, now_millis};
use crate::types::{Object, ObjectKind};
use std::ops::Bound;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn check_kind(obj: &Object, kind: Option<ObjectKind>) -> KvdisResult<()> {
    match kind {
        Some(kind) if obj.kind() != kind => Err(KvdisError::WrongType),
        _ => Ok(()),
    }
}

impl Engine {
    /// Set the absolute expiration of `key` in unix milliseconds. When
    /// `kind` is given the key must hold that kind. A timestamp already in
    /// the past deletes the key. Returns false if the key does not exist.
    pub fn pexpire_at(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        kind: Option<ObjectKind>,
        at_ms: u64,
    ) -> KvdisResult<bool> {
        check_key(key)?;
        let allow_async = txn.is_none();
        let (found, deferred) = self.write(txn, |txn| {
            let Some(mut obj) = self.load_for_write(txn, db, key)? else {
                return Ok((false, None));
            };
            check_kind(&obj, kind)?;
            if at_ms <= now_millis() {
                let task = self.unlink(txn, db, key, obj, allow_async)?;
                return Ok((true, task));
            }
            self.drop_ttl_entry(txn, db, key, &obj);
            obj.set_expire_at(at_ms);
            self.save(txn, db, key, &obj);
            self.put_ttl_entry(txn, db, key, &obj);
            Ok((true, None))
        })?;
        self.hand_off(deferred.into_iter().collect());
        Ok(found)
    }

    /// Expiration relative to now, in milliseconds.
    pub fn pexpire(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        kind: Option<ObjectKind>,
        ms: i64,
    ) -> KvdisResult<bool> {
        let at = if ms <= 0 {
            0
        } else {
            now_millis().saturating_add(ms as u64)
        };
        self.pexpire_at(txn, db, key, kind, at)
    }

    /// Remaining lifetime in milliseconds, -1 without expiration, -2 for a
    /// missing key.
    pub fn pttl(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], kind: Option<ObjectKind>) -> KvdisResult<i64> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(obj) = self.load(view, db, key)? else {
                return Ok(-2);
            };
            check_kind(&obj, kind)?;
            if !obj.has_expire() {
                return Ok(-1);
            }
            Ok(i64::try_from(obj.ttl_ms(now_millis())).unwrap_or(i64::MAX))
        })
    }

    /// Remaining lifetime in whole seconds, rounded the way Redis does.
    pub fn ttl(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], kind: Option<ObjectKind>) -> KvdisResult<i64> {
        let ms = self.pttl(txn, db, key, kind)?;
        if ms < 0 {
            return Ok(ms);
        }
        Ok((ms + 500) / 1000)
    }

    /// Remove the expiration of `key`. Returns false if the key is missing
    /// or had none.
    pub fn persist(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], kind: Option<ObjectKind>) -> KvdisResult<bool> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(mut obj) = self.load_for_write(txn, db, key)? else {
                return Ok(false);
            };
            check_kind(&obj, kind)?;
            if !obj.has_expire() {
                return Ok(false);
            }
            self.drop_ttl_entry(txn, db, key, &obj);
            obj.set_expire_at(0);
            self.save(txn, db, key, &obj);
            Ok(true)
        })
    }

    /// Reclaim up to `limit` expired keys of `kind` across all databases in
    /// one transaction. Index entries whose metadata no longer agrees are
    /// dropped as stale. Returns the number of keys removed.
    pub fn sweep(&self, kind: ObjectKind, limit: usize) -> KvdisResult<usize> {
        let (removed, deferred) = self.store.run_in_txn(|txn| {
            let now = now_millis();
            let mut removed = 0;
            let mut deferred = Vec::new();
            for db in 0..self.options.databases {
                if removed >= limit {
                    break;
                }
                let prefix = self.codec.ttl_prefix(db, kind);
                let mut upper = prefix.clone();
                upper.extend_from_slice(&now.to_be_bytes());
                let end = match prefix_next(&upper) {
                    Some(next) => Bound::Excluded(next),
                    None => Bound::Unbounded,
                };
                let range = KeyRange::new(Bound::Included(prefix), end);
                for raw in txn.scan_keys(&range, 0, limit - removed)? {
                    let (expire_at, key) = self.codec.decode_ttl_key(&raw, db, kind)?;
                    match self.load_raw(&*txn, db, &key)? {
                        Some(obj)
                            if obj.kind() == kind && obj.expire_at() == expire_at && !obj.is_tomb() =>
                        {
                            if let Some(task) = self.unlink(txn, db, &key, obj, true)? {
                                deferred.push(task);
                            }
                            removed += 1;
                        }
                        _ => {
                            debug!("dropping stale expiration entry in db {db}");
                            txn.delete(raw);
                        }
                    }
                }
            }
            Ok((removed, deferred))
        })?;
        self.hand_off(deferred);
        Ok(removed)
    }
}

/// Periodically sweep expired keys of one kind until cancelled. Errors skip
/// the cycle.
pub async fn run_sweeper(
    engine: SharedEngine,
    kind: ObjectKind,
    interval: Duration,
    limit: usize,
    cancel: CancellationToken,
) {
    info!("{} expiration sweeper started", kind.type_name());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || engine.sweep(kind, limit)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => debug!("{} sweeper removed {n} expired keys", kind.type_name()),
            Ok(Err(e)) => warn!("{} sweeper skipped a cycle: {e}", kind.type_name()),
            Err(e) => warn!("{} sweeper task failed: {e}", kind.type_name()),
        }
    }
    info!("{} expiration sweeper stopped", kind.type_name());
}
