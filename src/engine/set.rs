use super::{Engine, check_key, expect_kind};
use crate::codec::KeyTag;
use crate::error::KvdisResult;
use crate::store::{KeyRange, KvRead, Transaction};
use crate::types::{Object, ObjectKind, SizedMeta};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Diff,
    Inter,
    Union,
}

impl Engine {
    fn set_meta(&self, view: &dyn KvRead, db: u8, key: &[u8]) -> KvdisResult<Option<SizedMeta>> {
        expect_kind(self.load(view, db, key)?, ObjectKind::Set)
    }

    fn set_meta_for_write(&self, txn: &mut Transaction, db: u8, key: &[u8]) -> KvdisResult<Option<SizedMeta>> {
        expect_kind(self.load_for_write(txn, db, key)?, ObjectKind::Set)
    }

    fn members_in(&self, view: &dyn KvRead, db: u8, key: &[u8]) -> KvdisResult<BTreeSet<Vec<u8>>> {
        let Some(meta) = self.set_meta(view, db, key)? else {
            return Ok(BTreeSet::new());
        };
        let prefix = self.codec.key_prefix(db, KeyTag::SetMember, key);
        let limit = usize::try_from(meta.size).unwrap_or(usize::MAX);
        view.scan_keys(&KeyRange::prefix(&prefix), 0, limit)?
            .into_iter()
            .map(|raw| Ok(self.codec.decode_tagged(&raw, KeyTag::SetMember)?.sub))
            .collect()
    }

    /// Add members, returning how many were new.
    pub fn sadd(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], members: &[Vec<u8>]) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let mut meta = self.set_meta_for_write(txn, db, key)?.unwrap_or_default();
            let mut added = 0;
            for member in members {
                let member_key = self.codec.set_member_key(db, key, member);
                if txn.get(&member_key)?.is_none() {
                    txn.set(member_key, Vec::new());
                    added += 1;
                }
            }
            meta.size += added;
            self.save_or_remove(txn, db, key, &Object::Set(meta));
            Ok(added)
        })
    }

    /// Remove members, returning how many existed.
    pub fn srem(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], members: &[Vec<u8>]) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(mut meta) = self.set_meta_for_write(txn, db, key)? else {
                return Ok(0);
            };
            let mut removed = 0;
            for member in members {
                let member_key = self.codec.set_member_key(db, key, member);
                if txn.get(&member_key)?.is_some() {
                    txn.delete(member_key);
                    removed += 1;
                }
            }
            if removed > 0 {
                meta.size = meta.size.saturating_sub(removed);
                self.save_or_remove(txn, db, key, &Object::Set(meta));
            }
            Ok(removed)
        })
    }

    pub fn scard(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<u64> {
        check_key(key)?;
        self.read(txn, |view| Ok(self.set_meta(view, db, key)?.map_or(0, |m| m.size)))
    }

    pub fn sismember(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], member: &[u8]) -> KvdisResult<bool> {
        check_key(key)?;
        self.read(txn, |view| {
            if self.set_meta(view, db, key)?.is_none() {
                return Ok(false);
            }
            Ok(view.get(&self.codec.set_member_key(db, key, member))?.is_some())
        })
    }

    /// Members in byte order.
    pub fn smembers(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Vec<Vec<u8>>> {
        check_key(key)?;
        self.read(txn, |view| Ok(self.members_in(view, db, key)?.into_iter().collect()))
    }

    fn combine(&self, view: &dyn KvRead, db: u8, keys: &[Vec<u8>], op: SetOp) -> KvdisResult<BTreeSet<Vec<u8>>> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(BTreeSet::new());
        };
        let mut acc = self.members_in(view, db, first)?;
        for key in rest {
            let other = self.members_in(view, db, key)?;
            match op {
                SetOp::Diff => acc.retain(|m| !other.contains(m)),
                SetOp::Inter => acc.retain(|m| other.contains(m)),
                SetOp::Union => acc.extend(other),
            }
        }
        Ok(acc)
    }

    /// SDIFF / SINTER / SUNION over `keys`, left to right.
    pub fn set_op(&self, txn: Option<&mut Transaction>, db: u8, keys: &[Vec<u8>], op: SetOp) -> KvdisResult<Vec<Vec<u8>>> {
        for key in keys {
            check_key(key)?;
        }
        self.read(txn, |view| Ok(self.combine(view, db, keys, op)?.into_iter().collect()))
    }

    /// Store the result of a set operation at `dest`, replacing it. Returns
    /// the size of the result.
    pub fn set_op_store(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        dest: &[u8],
        keys: &[Vec<u8>],
        op: SetOp,
    ) -> KvdisResult<u64> {
        check_key(dest)?;
        for key in keys {
            check_key(key)?;
        }
        self.write(txn, |txn| {
            let result = self.combine(&*txn, db, keys, op)?;
            if let Some(old) = self.load_for_write(txn, db, dest)? {
                self.delete_object(txn, db, dest, &old)?;
            }
            for member in &result {
                txn.set(self.codec.set_member_key(db, dest, member), Vec::new());
            }
            let meta = SizedMeta {
                size: result.len() as u64,
                ..Default::default()
            };
            self.save_or_remove(txn, db, dest, &Object::Set(meta));
            Ok(meta.size)
        })
    }

    /// Drop the whole set. Returns false if it did not exist.
    pub fn sclear(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<bool> {
        self.clear_kind(txn, db, key, ObjectKind::Set)
    }
}
