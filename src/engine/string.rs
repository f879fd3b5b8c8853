use super::{Engine, check_key};
use crate::error::{KvdisError, KvdisResult};
use crate::store::{Transaction, now_millis};
use crate::types::{Object, StringObject};

/// Conditions and expiration accepted by `SET`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Relative expiration in milliseconds.
    pub expire_ms: Option<u64>,
    pub nx: bool,
    pub xx: bool,
}

impl Engine {
    pub fn get(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Option<Vec<u8>>> {
        check_key(key)?;
        self.read(txn, |view| match self.load(view, db, key)? {
            None => Ok(None),
            Some(Object::String(s)) => Ok(Some(s.value)),
            Some(_) => Err(KvdisError::WrongType),
        })
    }

    /// Values of many keys; missing keys and keys of other kinds yield `None`.
    pub fn mget(&self, txn: Option<&mut Transaction>, db: u8, keys: &[Vec<u8>]) -> KvdisResult<Vec<Option<Vec<u8>>>> {
        self.read(txn, |view| {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let value = match self.load(view, db, key)? {
                    Some(Object::String(s)) => Some(s.value),
                    _ => None,
                };
                out.push(value);
            }
            Ok(out)
        })
    }

    pub fn set(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], value: &[u8]) -> KvdisResult<()> {
        self.set_with_param(txn, db, key, value, SetOptions::default())
            .map(|_| ())
    }

    /// SET with NX/XX conditions and an optional expiration, evaluated
    /// atomically against the current value. Returns false when a
    /// condition prevented the write.
    pub fn set_with_param(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        value: &[u8],
        opts: SetOptions,
    ) -> KvdisResult<bool> {
        check_key(key)?;
        if opts.nx && opts.xx {
            return Err(KvdisError::CmdParams);
        }
        self.write(txn, |txn| {
            if opts.nx || opts.xx {
                let exists = self.load_for_write(txn, db, key)?.is_some();
                if (opts.nx && exists) || (opts.xx && !exists) {
                    return Ok(false);
                }
            }
            let expire_at = match opts.expire_ms {
                Some(ms) => now_millis().saturating_add(ms),
                None => 0,
            };
            let obj = Object::String(StringObject::with_expire(value.to_vec(), expire_at));
            self.replace(txn, db, key, &obj)?;
            Ok(true)
        })
    }

    pub fn mset(&self, txn: Option<&mut Transaction>, db: u8, pairs: &[(Vec<u8>, Vec<u8>)]) -> KvdisResult<()> {
        for (key, _) in pairs {
            check_key(key)?;
        }
        self.write(txn, |txn| {
            for (key, value) in pairs {
                let obj = Object::String(StringObject::new(value.clone()));
                self.replace(txn, db, key, &obj)?;
            }
            Ok(())
        })
    }

    pub fn strlen(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<u64> {
        Ok(self.get(txn, db, key)?.map_or(0, |v| v.len() as u64))
    }

    /// Add `step` to the integer at `key`, creating it from 0. Keeps any
    /// expiration already set.
    pub fn incr_by(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], step: i64) -> KvdisResult<i64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let mut current = match self.load_for_write(txn, db, key)? {
                None => StringObject::default(),
                Some(Object::String(s)) => s,
                Some(_) => return Err(KvdisError::WrongType),
            };
            let next = current.incr_by(step)?;
            self.save(txn, db, key, &Object::String(current));
            Ok(next)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine;

    #[test]
    fn test_set_get_roundtrip() {
        let (engine, _q) = engine();
        engine.set(None, 0, b"k", b"\x00bin\xff").unwrap();
        assert_eq!(engine.get(None, 0, b"k").unwrap(), Some(b"\x00bin\xff".to_vec()));
        assert_eq!(engine.get(None, 1, b"k").unwrap(), None);
        assert_eq!(engine.strlen(None, 0, b"k").unwrap(), 5);
    }

    #[test]
    fn test_empty_key_rejected() {
        let (engine, _q) = engine();
        assert!(matches!(engine.set(None, 0, b"", b"v"), Err(KvdisError::KeyEmpty)));
    }

    #[test]
    fn test_set_nx_xx() {
        let (engine, _q) = engine();
        let nx = SetOptions { nx: true, ..Default::default() };
        let xx = SetOptions { xx: true, ..Default::default() };
        assert!(!engine.set_with_param(None, 0, b"k", b"1", xx).unwrap());
        assert_eq!(engine.get(None, 0, b"k").unwrap(), None);
        assert!(engine.set_with_param(None, 0, b"k", b"1", nx).unwrap());
        assert!(!engine.set_with_param(None, 0, b"k", b"2", nx).unwrap());
        assert!(engine.set_with_param(None, 0, b"k", b"3", xx).unwrap());
        assert_eq!(engine.get(None, 0, b"k").unwrap(), Some(b"3".to_vec()));

        let both = SetOptions { nx: true, xx: true, expire_ms: None };
        assert!(matches!(
            engine.set_with_param(None, 0, b"k", b"4", both),
            Err(KvdisError::CmdParams)
        ));
    }

    #[test]
    fn test_set_with_expire_then_plain_set_clears_it() {
        let (engine, _q) = engine();
        let opts = SetOptions { expire_ms: Some(60_000), ..Default::default() };
        engine.set_with_param(None, 0, b"k", b"v", opts).unwrap();
        let ttl = engine.pttl(None, 0, b"k", None).unwrap();
        assert!(ttl > 59_000 && ttl <= 60_000);

        engine.set(None, 0, b"k", b"w").unwrap();
        assert_eq!(engine.pttl(None, 0, b"k", None).unwrap(), -1);
        let ttl_prefix = engine.codec().ttl_prefix(0, crate::types::ObjectKind::String);
        let entries = engine
            .store()
            .scan_keys(&crate::store::KeyRange::prefix(&ttl_prefix), 0, 10)
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_set_overwrites_other_kind() {
        let (engine, _q) = engine();
        engine.hset(None, 0, b"k", &[(b"f".to_vec(), b"v".to_vec())]).unwrap();
        engine.set(None, 0, b"k", b"s").unwrap();
        assert_eq!(engine.get(None, 0, b"k").unwrap(), Some(b"s".to_vec()));
        assert!(matches!(engine.hget(None, 0, b"k", b"f"), Err(KvdisError::WrongType)));
        let field_prefix = engine.codec().key_prefix(0, crate::codec::KeyTag::HashField, b"k");
        let left = engine
            .store()
            .scan_keys(&crate::store::KeyRange::prefix(&field_prefix), 0, 10)
            .unwrap();
        assert!(left.is_empty());
    }

    #[test]
    fn test_mget_mset() {
        let (engine, _q) = engine();
        engine
            .mset(None, 0, &[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
            .unwrap();
        engine.sadd(None, 0, b"s", &[b"m".to_vec()]).unwrap();
        let got = engine
            .mget(None, 0, &[b"a".to_vec(), b"missing".to_vec(), b"s".to_vec(), b"b".to_vec()])
            .unwrap();
        assert_eq!(got, vec![Some(b"1".to_vec()), None, None, Some(b"2".to_vec())]);
    }

    #[test]
    fn test_incr_by() {
        let (engine, _q) = engine();
        assert_eq!(engine.incr_by(None, 0, b"n", 1).unwrap(), 1);
        assert_eq!(engine.incr_by(None, 0, b"n", 10).unwrap(), 11);
        assert_eq!(engine.incr_by(None, 0, b"n", -12).unwrap(), -1);
        engine.set(None, 0, b"s", b"abc").unwrap();
        assert!(matches!(engine.incr_by(None, 0, b"s", 1), Err(KvdisError::NotInteger)));
        engine.rpush(None, 0, b"l", &[b"x".to_vec()]).unwrap();
        assert!(matches!(engine.incr_by(None, 0, b"l", 1), Err(KvdisError::WrongType)));
    }

    #[test]
    fn test_writes_in_caller_txn_are_atomic() {
        let (engine, _q) = engine();
        let mut txn = engine.store().begin().unwrap();
        engine.set(Some(&mut txn), 0, b"a", b"1").unwrap();
        engine.incr_by(Some(&mut txn), 0, b"a", 1).unwrap();
        assert_eq!(engine.get(None, 0, b"a").unwrap(), None);
        assert_eq!(engine.get(Some(&mut txn), 0, b"a").unwrap(), Some(b"2".to_vec()));
        engine.store().commit(txn).unwrap();
        assert_eq!(engine.get(None, 0, b"a").unwrap(), Some(b"2".to_vec()));
    }
}
