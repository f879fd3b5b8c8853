use super::{Engine, check_key, check_key_field, expect_kind};
use crate::codec::KeyTag;
use crate::error::KvdisResult;
use crate::store::{KeyRange, KvPair, KvRead, Transaction};
use crate::types::{Object, ObjectKind, SizedMeta};

impl Engine {
    fn hash_meta(&self, view: &dyn KvRead, db: u8, key: &[u8]) -> KvdisResult<Option<SizedMeta>> {
        expect_kind(self.load(view, db, key)?, ObjectKind::Hash)
    }

    fn hash_meta_for_write(&self, txn: &mut Transaction, db: u8, key: &[u8]) -> KvdisResult<Option<SizedMeta>> {
        expect_kind(self.load_for_write(txn, db, key)?, ObjectKind::Hash)
    }

    /// Set fields, returning how many of them are new.
    pub fn hset(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) -> KvdisResult<u64> {
        for (field, _) in pairs {
            check_key_field(key, field)?;
        }
        self.write(txn, |txn| {
            let mut meta = self.hash_meta_for_write(txn, db, key)?.unwrap_or_default();
            let mut added = 0;
            for (field, value) in pairs {
                let field_key = self.codec.hash_field_key(db, key, field);
                if txn.get(&field_key)?.is_none() {
                    added += 1;
                }
                txn.set(field_key, value.clone());
            }
            meta.size += added;
            self.save(txn, db, key, &Object::Hash(meta));
            Ok(added)
        })
    }

    /// Set a field only if it does not exist yet.
    pub fn hsetnx(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        field: &[u8],
        value: &[u8],
    ) -> KvdisResult<bool> {
        check_key_field(key, field)?;
        self.write(txn, |txn| {
            let mut meta = self.hash_meta_for_write(txn, db, key)?.unwrap_or_default();
            let field_key = self.codec.hash_field_key(db, key, field);
            if txn.get(&field_key)?.is_some() {
                return Ok(false);
            }
            txn.set(field_key, value.to_vec());
            meta.size += 1;
            self.save(txn, db, key, &Object::Hash(meta));
            Ok(true)
        })
    }

    pub fn hmset(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) -> KvdisResult<()> {
        self.hset(txn, db, key, pairs).map(|_| ())
    }

    pub fn hget(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], field: &[u8]) -> KvdisResult<Option<Vec<u8>>> {
        check_key_field(key, field)?;
        self.read(txn, |view| {
            if self.hash_meta(view, db, key)?.is_none() {
                return Ok(None);
            }
            view.get(&self.codec.hash_field_key(db, key, field))
        })
    }

    pub fn hmget(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        fields: &[Vec<u8>],
    ) -> KvdisResult<Vec<Option<Vec<u8>>>> {
        check_key(key)?;
        self.read(txn, |view| {
            if self.hash_meta(view, db, key)?.is_none() {
                return Ok(vec![None; fields.len()]);
            }
            let raw: Vec<Vec<u8>> = fields
                .iter()
                .map(|f| self.codec.hash_field_key(db, key, f))
                .collect();
            let mut found = view.batch_get(&raw)?;
            Ok(raw.iter().map(|k| found.remove(k)).collect())
        })
    }

    pub fn hstrlen(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], field: &[u8]) -> KvdisResult<u64> {
        Ok(self.hget(txn, db, key, field)?.map_or(0, |v| v.len() as u64))
    }

    /// True when `field` is present in the hash.
    pub fn hexists(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], field: &[u8]) -> KvdisResult<bool> {
        Ok(self.hget(txn, db, key, field)?.is_some())
    }

    pub fn hlen(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<u64> {
        check_key(key)?;
        self.read(txn, |view| Ok(self.hash_meta(view, db, key)?.map_or(0, |m| m.size)))
    }

    /// Remove fields, returning how many existed.
    pub fn hdel(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], fields: &[Vec<u8>]) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(mut meta) = self.hash_meta_for_write(txn, db, key)? else {
                return Ok(0);
            };
            let mut removed = 0;
            for field in fields {
                let field_key = self.codec.hash_field_key(db, key, field);
                if txn.get(&field_key)?.is_some() {
                    txn.delete(field_key);
                    removed += 1;
                }
            }
            if removed > 0 {
                meta.size = meta.size.saturating_sub(removed);
                self.save_or_remove(txn, db, key, &Object::Hash(meta));
            }
            Ok(removed)
        })
    }

    /// All `(field, value)` pairs, in field order.
    pub fn hgetall(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Vec<KvPair>> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.hash_meta(view, db, key)? else {
                return Ok(Vec::new());
            };
            let prefix = self.codec.key_prefix(db, KeyTag::HashField, key);
            let limit = usize::try_from(meta.size).unwrap_or(usize::MAX);
            view.scan(&KeyRange::prefix(&prefix), 0, limit)?
                .into_iter()
                .map(|(raw, value)| {
                    let decoded = self.codec.decode_tagged(&raw, KeyTag::HashField)?;
                    Ok((decoded.sub, value))
                })
                .collect()
        })
    }

    pub fn hkeys(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(txn, db, key)?.into_iter().map(|(f, _)| f).collect())
    }

    pub fn hvals(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Vec<Vec<u8>>> {
        Ok(self.hgetall(txn, db, key)?.into_iter().map(|(_, v)| v).collect())
    }

    /// Drop the whole hash. Returns false if it did not exist.
    pub fn hclear(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<bool> {
        self.clear_kind(txn, db, key, ObjectKind::Hash)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::EngineOptions;
    use crate::engine::testutil::{engine, engine_with};
    use crate::error::KvdisError;

    fn pair(f: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
        (f.as_bytes().to_vec(), v.as_bytes().to_vec())
    }

    #[test]
    fn test_hset_counts_new_fields() {
        let (engine, _q) = engine();
        assert_eq!(engine.hset(None, 0, b"h", &[pair("f1", "v1")]).unwrap(), 1);
        assert_eq!(engine.hset(None, 0, b"h", &[pair("f1", "v2")]).unwrap(), 0);
        assert_eq!(engine.hget(None, 0, b"h", b"f1").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(engine.hlen(None, 0, b"h").unwrap(), 1);
    }

    #[test]
    fn test_hset_duplicate_fields_in_one_call() {
        let (engine, _q) = engine();
        let added = engine
            .hset(None, 0, b"h", &[pair("a", "1"), pair("a", "2"), pair("b", "3")])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(engine.hlen(None, 0, b"h").unwrap(), 2);
        assert_eq!(engine.hget(None, 0, b"h", b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_hsetnx() {
        let (engine, _q) = engine();
        assert!(engine.hsetnx(None, 0, b"h", b"f", b"first").unwrap());
        assert_eq!(engine.hlen(None, 0, b"h").unwrap(), 1);
        assert!(!engine.hsetnx(None, 0, b"h", b"f", b"second").unwrap());
        assert_eq!(engine.hget(None, 0, b"h", b"f").unwrap(), Some(b"first".to_vec()));
        assert_eq!(engine.hlen(None, 0, b"h").unwrap(), 1);
    }

    #[test]
    fn test_hexists_true_for_present_field() {
        let (engine, _q) = engine();
        engine.hset(None, 0, b"h", &[pair("present", "x")]).unwrap();
        assert!(engine.hexists(None, 0, b"h", b"present").unwrap());
        assert!(!engine.hexists(None, 0, b"h", b"absent").unwrap());
        assert!(!engine.hexists(None, 0, b"nohash", b"present").unwrap());
    }

    #[test]
    fn test_hdel_removes_meta_at_zero() {
        let (engine, _q) = engine();
        engine.hset(None, 0, b"h", &[pair("a", "1"), pair("b", "2")]).unwrap();
        let removed = engine
            .hdel(None, 0, b"h", &[b"a".to_vec(), b"zz".to_vec()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(engine.hlen(None, 0, b"h").unwrap(), 1);
        assert_eq!(engine.hdel(None, 0, b"h", &[b"b".to_vec()]).unwrap(), 1);
        assert_eq!(engine.exists(None, 0, &[b"h".to_vec()]).unwrap(), 0);
        assert_eq!(engine.hdel(None, 0, b"h", &[b"b".to_vec()]).unwrap(), 0);
    }

    #[test]
    fn test_hgetall_keys_vals() {
        let (engine, _q) = engine();
        engine
            .hset(None, 0, b"h", &[pair("b", "2"), pair("a", "1"), pair("c", "3")])
            .unwrap();
        let all = engine.hgetall(None, 0, b"h").unwrap();
        assert_eq!(all, vec![pair("a", "1"), pair("b", "2"), pair("c", "3")]);
        assert_eq!(engine.hkeys(None, 0, b"h").unwrap(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(engine.hvals(None, 0, b"h").unwrap(), vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
        assert!(engine.hgetall(None, 0, b"none").unwrap().is_empty());
    }

    #[test]
    fn test_hmget_and_hstrlen() {
        let (engine, _q) = engine();
        engine.hmset(None, 0, b"h", &[pair("a", "hello")]).unwrap();
        let got = engine
            .hmget(None, 0, b"h", &[b"a".to_vec(), b"b".to_vec()])
            .unwrap();
        assert_eq!(got, vec![Some(b"hello".to_vec()), None]);
        assert_eq!(engine.hstrlen(None, 0, b"h", b"a").unwrap(), 5);
        assert_eq!(engine.hmget(None, 0, b"x", &[b"a".to_vec()]).unwrap(), vec![None]);
    }

    #[test]
    fn test_empty_field_rejected() {
        let (engine, _q) = engine();
        assert!(matches!(
            engine.hset(None, 0, b"h", &[pair("", "v")]),
            Err(KvdisError::KeyOrFieldEmpty)
        ));
    }

    #[test]
    fn test_wrong_type() {
        let (engine, _q) = engine();
        engine.set(None, 0, b"s", b"v").unwrap();
        assert!(matches!(engine.hset(None, 0, b"s", &[pair("f", "v")]), Err(KvdisError::WrongType)));
        assert!(matches!(engine.hlen(None, 0, b"s"), Err(KvdisError::WrongType)));
    }

    #[test]
    fn test_hclear() {
        let (engine, _q) = engine_with(EngineOptions { async_delete_threshold: 100, ..Default::default() });
        engine.hset(None, 0, b"h", &[pair("a", "1"), pair("b", "2")]).unwrap();
        assert!(engine.hclear(None, 0, b"h").unwrap());
        assert_eq!(engine.hlen(None, 0, b"h").unwrap(), 0);
        assert!(!engine.hclear(None, 0, b"h").unwrap());
    }
}
