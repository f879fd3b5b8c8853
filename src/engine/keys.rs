use super::deleter::DeleteTask;
use super::{Engine, check_key};
use crate::error::{KvdisError, KvdisResult};
use crate::store::{KeyRange, Transaction, now_millis};
use crate::types::{Object, ObjectKind};
use tracing::{debug, info, warn};

impl Engine {
    /// Delete keys, returning how many existed. Without a caller
    /// transaction, composites larger than the async threshold are only
    /// tombstoned here and finished by the background deleter.
    pub fn delete(&self, txn: Option<&mut Transaction>, db: u8, keys: &[Vec<u8>]) -> KvdisResult<u64> {
        self.delete_keys(txn, db, keys, None)
    }

    /// Delete `key` only if it holds a value of `kind`.
    pub(crate) fn clear_kind(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        kind: ObjectKind,
    ) -> KvdisResult<bool> {
        let n = self.delete_keys(txn, db, &[key.to_vec()], Some(kind))?;
        Ok(n > 0)
    }

    fn delete_keys(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        keys: &[Vec<u8>],
        kind: Option<ObjectKind>,
    ) -> KvdisResult<u64> {
        for key in keys {
            check_key(key)?;
        }
        let allow_async = txn.is_none();
        let (deleted, deferred) = self.write(txn, |txn| {
            let mut deleted = 0;
            let mut deferred = Vec::new();
            for key in keys {
                let Some(obj) = self.load_raw(&*txn, db, key)? else {
                    continue;
                };
                if obj.is_tomb() {
                    // Already gone for readers; hand it over again in case
                    // an earlier purge never finished.
                    if allow_async {
                        deferred.push(DeleteTask {
                            db,
                            kind: obj.kind(),
                            key: key.clone(),
                        });
                    }
                    continue;
                }
                if obj.is_expired(now_millis()) {
                    self.delete_object(txn, db, key, &obj)?;
                    continue;
                }
                if let Some(kind) = kind
                    && obj.kind() != kind
                {
                    return Err(KvdisError::WrongType);
                }
                deleted += 1;
                if let Some(task) = self.unlink(txn, db, key, obj, allow_async)? {
                    deferred.push(task);
                }
            }
            Ok((deleted, deferred))
        })?;
        self.hand_off(deferred);
        Ok(deleted)
    }

    /// Remove a live object inside `txn`. With `allow_async`, a composite
    /// above the async threshold is only tombstoned and the returned task
    /// must be passed to [`Engine::hand_off`] after the commit.
    pub(crate) fn unlink(
        &self,
        txn: &mut Transaction,
        db: u8,
        key: &[u8],
        mut obj: Object,
        allow_async: bool,
    ) -> KvdisResult<Option<DeleteTask>> {
        if allow_async
            && obj.kind() != ObjectKind::String
            && obj.size() > self.options.async_delete_threshold
        {
            self.drop_ttl_entry(txn, db, key, &obj);
            obj.set_expire_at(0);
            obj.set_tomb();
            self.save(txn, db, key, &obj);
            return Ok(Some(DeleteTask {
                db,
                kind: obj.kind(),
                key: key.to_vec(),
            }));
        }
        self.delete_object(txn, db, key, &obj)?;
        Ok(None)
    }

    /// Queue tombstoned keys for the background deleter, purging inline any
    /// the queue cannot take. The tombstones are already committed, so a
    /// failed purge is only logged; deleting the key again retries it.
    pub(crate) fn hand_off(&self, tasks: Vec<DeleteTask>) {
        for task in tasks {
            if self.deleter.enqueue(task.db, task.kind, &task.key) {
                continue;
            }
            if let Err(e) = self.purge(task.db, &task.key) {
                warn!("inline purge of tombstoned key in db {} failed: {e}", task.db);
            }
        }
    }

    /// Number of `keys` that exist, counting repeats.
    pub fn exists(&self, txn: Option<&mut Transaction>, db: u8, keys: &[Vec<u8>]) -> KvdisResult<u64> {
        self.read(txn, |view| {
            let mut n = 0;
            for key in keys {
                if self.load(view, db, key)?.is_some() {
                    n += 1;
                }
            }
            Ok(n)
        })
    }

    pub fn key_type(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Option<ObjectKind>> {
        check_key(key)?;
        self.read(txn, |view| Ok(self.load(view, db, key)?.map(|o| o.kind())))
    }

    /// Remove every key of one database. Inside a caller transaction the
    /// deletes are buffered with its other writes; otherwise the range is
    /// dropped directly from the store.
    pub fn flush_db(&self, txn: Option<&mut Transaction>, db: u8) -> KvdisResult<()> {
        let range = KeyRange::prefix(&self.codec.db_prefix(db));
        match txn {
            Some(txn) => {
                let n = txn.delete_range(&range, usize::MAX)?;
                debug!("buffered flush of db {db}: {n} raw key(s)");
            }
            None => {
                self.store.unsafe_delete_range(&range)?;
                debug!("flushed db {db}");
            }
        }
        Ok(())
    }

    /// Remove every key of every selectable database. System keys survive.
    pub fn flush_all(&self, mut txn: Option<&mut Transaction>) -> KvdisResult<()> {
        for db in 0..self.options.databases {
            self.flush_db(txn.as_deref_mut(), db)?;
        }
        info!("flushed all {} databases", self.options.databases);
        Ok(())
    }
}
