//! Redis data structures mapped onto the transactional store.
//!
//! Every user key owns one metadata record (see [`Object`]) and, for
//! composite kinds, a family of sub-keys sharing a common prefix. Each
//! operation takes an optional caller transaction: with one, reads and writes
//! go through it and the caller commits; without one, reads use a fresh
//! snapshot and writes run in their own retried transaction.

pub mod deleter;
pub mod gc;
pub mod hash;
pub mod keys;
pub mod leader;
pub mod list;
pub mod set;
pub mod string;
pub mod ttl;
pub mod zset;

use crate::codec::{KeyCodec, KeyTag};
use crate::error::{KvdisError, KvdisResult};
use crate::store::{KeyRange, KvRead, Store, Transaction, now_millis};
use crate::types::{ListMeta, Object, ObjectKind, SizedMeta};
use deleter::AsyncDeleter;
use std::sync::Arc;
use tracing::debug;

pub type SharedEngine = Arc<Engine>;

/// Sub-keys removed per transaction when purging a large key.
const PURGE_BATCH: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Number of selectable databases.
    pub databases: u8,
    /// DEL of a composite key with more elements than this is finished in
    /// the background.
    pub async_delete_threshold: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            databases: 16,
            async_delete_threshold: 1024,
        }
    }
}

pub struct Engine {
    store: Store,
    codec: KeyCodec,
    deleter: AsyncDeleter,
    options: EngineOptions,
}

impl Engine {
    pub fn new(store: Store, codec: KeyCodec, deleter: AsyncDeleter, options: EngineOptions) -> Self {
        Engine {
            store,
            codec,
            deleter,
            options,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn deleter(&self) -> &AsyncDeleter {
        &self.deleter
    }

    pub fn databases(&self) -> u8 {
        self.options.databases
    }

    /// Run a read-only body against the caller's transaction or a fresh
    /// snapshot.
    pub(crate) fn read<T>(
        &self,
        txn: Option<&mut Transaction>,
        f: impl FnOnce(&dyn KvRead) -> KvdisResult<T>,
    ) -> KvdisResult<T> {
        match txn {
            Some(txn) => f(&*txn),
            None => {
                let snapshot = self.store.snapshot()?;
                f(snapshot.as_ref())
            }
        }
    }

    /// Run a mutating body inside the caller's transaction, or inside a
    /// retried transaction of its own.
    pub(crate) fn write<T>(
        &self,
        txn: Option<&mut Transaction>,
        mut f: impl FnMut(&mut Transaction) -> KvdisResult<T>,
    ) -> KvdisResult<T> {
        match txn {
            Some(txn) => f(txn),
            None => self.store.run_in_txn(f),
        }
    }

    /// Read and decode the metadata record of `key` without any expiry or
    /// tombstone filtering.
    pub(crate) fn load_raw(&self, view: &dyn KvRead, db: u8, key: &[u8]) -> KvdisResult<Option<Object>> {
        match view.get(&self.codec.meta_key(db, key))? {
            Some(raw) => Ok(Some(Object::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// The live object at `key`. Expired and tombstoned keys read as absent;
    /// an expired one is handed to the background deleter.
    pub(crate) fn load(&self, view: &dyn KvRead, db: u8, key: &[u8]) -> KvdisResult<Option<Object>> {
        let Some(obj) = self.load_raw(view, db, key)? else {
            return Ok(None);
        };
        if obj.is_tomb() {
            return Ok(None);
        }
        if obj.is_expired(now_millis()) {
            self.deleter.enqueue(db, obj.kind(), key);
            return Ok(None);
        }
        Ok(Some(obj))
    }

    /// The live object at `key` for a mutation. An expired key is removed in
    /// the same transaction; a key under background deletion is busy.
    pub(crate) fn load_for_write(
        &self,
        txn: &mut Transaction,
        db: u8,
        key: &[u8],
    ) -> KvdisResult<Option<Object>> {
        let Some(obj) = self.load_raw(&*txn, db, key)? else {
            return Ok(None);
        };
        if obj.is_tomb() {
            return Err(KvdisError::KeyBusy);
        }
        if obj.is_expired(now_millis()) {
            self.delete_object(txn, db, key, &obj)?;
            return Ok(None);
        }
        Ok(Some(obj))
    }

    pub(crate) fn save(&self, txn: &mut Transaction, db: u8, key: &[u8], obj: &Object) {
        txn.set(self.codec.meta_key(db, key), obj.encode());
    }

    /// Sub-key families owned by a key of `kind`.
    pub(crate) fn sub_key_ranges(&self, db: u8, key: &[u8], kind: ObjectKind) -> Vec<KeyRange> {
        let tags: &[KeyTag] = match kind {
            ObjectKind::String => &[],
            ObjectKind::Hash => &[KeyTag::HashField],
            ObjectKind::List => &[KeyTag::ListItem],
            ObjectKind::Set => &[KeyTag::SetMember],
            ObjectKind::ZSet => &[KeyTag::ZSetMember, KeyTag::ZSetScore],
        };
        tags.iter()
            .map(|tag| KeyRange::prefix(&self.codec.key_prefix(db, *tag, key)))
            .collect()
    }

    /// Remove `obj` entirely: sub-keys, metadata and expiration index entry.
    pub(crate) fn delete_object(
        &self,
        txn: &mut Transaction,
        db: u8,
        key: &[u8],
        obj: &Object,
    ) -> KvdisResult<()> {
        match obj {
            Object::String(_) => {}
            Object::List(meta) => {
                for idx in meta.head..meta.tail {
                    txn.delete(self.codec.list_item_key(db, key, idx));
                }
            }
            Object::Hash(meta) | Object::Set(meta) | Object::ZSet(meta) => {
                let limit = usize::try_from(meta.size).unwrap_or(usize::MAX);
                for range in self.sub_key_ranges(db, key, obj.kind()) {
                    txn.delete_range(&range, limit)?;
                }
            }
        }
        self.drop_ttl_entry(txn, db, key, obj);
        txn.delete(self.codec.meta_key(db, key));
        Ok(())
    }

    /// Write updated metadata, or remove it (and its expiration entry) once
    /// the object has no elements left.
    pub(crate) fn save_or_remove(&self, txn: &mut Transaction, db: u8, key: &[u8], obj: &Object) {
        if obj.size() == 0 {
            self.drop_ttl_entry(txn, db, key, obj);
            txn.delete(self.codec.meta_key(db, key));
        } else {
            self.save(txn, db, key, obj);
        }
    }

    pub(crate) fn drop_ttl_entry(&self, txn: &mut Transaction, db: u8, key: &[u8], obj: &Object) {
        if obj.has_expire() {
            txn.delete(self.codec.ttl_key(db, obj.kind(), obj.expire_at(), key));
        }
    }

    pub(crate) fn put_ttl_entry(&self, txn: &mut Transaction, db: u8, key: &[u8], obj: &Object) {
        if obj.has_expire() {
            txn.set(self.codec.ttl_key(db, obj.kind(), obj.expire_at(), key), Vec::new());
        }
    }

    /// Store `obj` at `key`, replacing whatever lived there before along
    /// with its sub-keys and expiration index entry.
    pub(crate) fn replace(&self, txn: &mut Transaction, db: u8, key: &[u8], obj: &Object) -> KvdisResult<()> {
        if let Some(old) = self.load_for_write(txn, db, key)? {
            match old {
                Object::String(_) => self.drop_ttl_entry(txn, db, key, &old),
                _ => self.delete_object(txn, db, key, &old)?,
            }
        }
        self.save(txn, db, key, obj);
        self.put_ttl_entry(txn, db, key, obj);
        Ok(())
    }

    /// Finish deleting a tombstoned or expired key in bounded batches.
    /// Returns false if the key turned out to be live (or already gone).
    pub fn purge(&self, db: u8, key: &[u8]) -> KvdisResult<bool> {
        let mut batches = 0usize;
        loop {
            let done = self.store.run_in_txn(|txn| {
                let Some(obj) = self.load_raw(&*txn, db, key)? else {
                    return Ok(Some(false));
                };
                if !obj.is_tomb() && !obj.is_expired(now_millis()) {
                    return Ok(Some(false));
                }
                let mut budget = PURGE_BATCH;
                for range in self.sub_key_ranges(db, key, obj.kind()) {
                    budget -= txn.delete_range(&range, budget)?;
                    if budget == 0 {
                        return Ok(None);
                    }
                }
                self.drop_ttl_entry(txn, db, key, &obj);
                txn.delete(self.codec.meta_key(db, key));
                Ok(Some(true))
            })?;
            batches += 1;
            if let Some(purged) = done {
                debug!("purged key in db {db} after {batches} batch(es): {purged}");
                return Ok(purged);
            }
        }
    }
}

/// Narrowing of an [`Object`] to the kind an operation expects.
pub(crate) trait ExpectKind: Sized {
    fn expect(obj: Object) -> KvdisResult<Self>;
}

impl ExpectKind for SizedMeta {
    fn expect(obj: Object) -> KvdisResult<Self> {
        match obj {
            Object::Hash(m) | Object::Set(m) | Object::ZSet(m) => Ok(m),
            _ => Err(KvdisError::WrongType),
        }
    }
}

impl ExpectKind for ListMeta {
    fn expect(obj: Object) -> KvdisResult<Self> {
        match obj {
            Object::List(m) => Ok(m),
            _ => Err(KvdisError::WrongType),
        }
    }
}

/// Check that `obj` is of `kind` and unwrap it.
pub(crate) fn expect_kind<T: ExpectKind>(obj: Option<Object>, kind: ObjectKind) -> KvdisResult<Option<T>> {
    match obj {
        None => Ok(None),
        Some(o) if o.kind() == kind => T::expect(o).map(Some),
        Some(_) => Err(KvdisError::WrongType),
    }
}

pub(crate) fn check_key(key: &[u8]) -> KvdisResult<()> {
    if key.is_empty() {
        return Err(KvdisError::KeyEmpty);
    }
    Ok(())
}

pub(crate) fn check_key_field(key: &[u8], field: &[u8]) -> KvdisResult<()> {
    if key.is_empty() || field.is_empty() {
        return Err(KvdisError::KeyOrFieldEmpty);
    }
    Ok(())
}
