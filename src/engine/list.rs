use super::{Engine, check_key, expect_kind};
use crate::error::{KvdisError, KvdisResult};
use crate::store::{KeyRange, KvRead, Transaction};
use crate::types::{ListMeta, Object, ObjectKind};

/// The end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Engine {
    fn list_meta(&self, view: &dyn KvRead, db: u8, key: &[u8]) -> KvdisResult<Option<ListMeta>> {
        expect_kind(self.load(view, db, key)?, ObjectKind::List)
    }

    fn list_meta_for_write(&self, txn: &mut Transaction, db: u8, key: &[u8]) -> KvdisResult<Option<ListMeta>> {
        expect_kind(self.load_for_write(txn, db, key)?, ObjectKind::List)
    }

    /// Push items one at a time onto `side`, returning the new length.
    pub fn push(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        items: &[Vec<u8>],
        side: Side,
    ) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let mut meta = self.list_meta_for_write(txn, db, key)?.unwrap_or_default();
            let n = items.len() as u64;
            match side {
                Side::Left => {
                    let old_head = meta.reserve_front(n)?;
                    for (i, item) in items.iter().enumerate() {
                        let idx = old_head - 1 - i as u64;
                        txn.set(self.codec.list_item_key(db, key, idx), item.clone());
                    }
                }
                Side::Right => {
                    let old_tail = meta.reserve_back(n)?;
                    for (i, item) in items.iter().enumerate() {
                        let idx = old_tail + i as u64;
                        txn.set(self.codec.list_item_key(db, key, idx), item.clone());
                    }
                }
            }
            self.save_or_remove(txn, db, key, &Object::List(meta));
            Ok(meta.size())
        })
    }

    pub fn lpush(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], items: &[Vec<u8>]) -> KvdisResult<u64> {
        self.push(txn, db, key, items, Side::Left)
    }

    pub fn rpush(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], items: &[Vec<u8>]) -> KvdisResult<u64> {
        self.push(txn, db, key, items, Side::Right)
    }

    pub fn pop(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], side: Side) -> KvdisResult<Option<Vec<u8>>> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(mut meta) = self.list_meta_for_write(txn, db, key)? else {
                return Ok(None);
            };
            let idx = match side {
                Side::Left => meta.pop_front(),
                Side::Right => meta.pop_back(),
            };
            let Some(idx) = idx else {
                return Ok(None);
            };
            let item_key = self.codec.list_item_key(db, key, idx);
            let value = txn.get(&item_key)?.ok_or(KvdisError::InvalidMeta)?;
            txn.delete(item_key);
            self.save_or_remove(txn, db, key, &Object::List(meta));
            Ok(Some(value))
        })
    }

    pub fn lpop(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Option<Vec<u8>>> {
        self.pop(txn, db, key, Side::Left)
    }

    pub fn rpop(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<Option<Vec<u8>>> {
        self.pop(txn, db, key, Side::Right)
    }

    pub fn llen(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<u64> {
        check_key(key)?;
        self.read(txn, |view| Ok(self.list_meta(view, db, key)?.map_or(0, |m| m.size())))
    }

    pub fn lindex(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], index: i64) -> KvdisResult<Option<Vec<u8>>> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.list_meta(view, db, key)? else {
                return Ok(None);
            };
            match meta.resolve_index(index) {
                Some(idx) => view.get(&self.codec.list_item_key(db, key, idx)),
                None => Ok(None),
            }
        })
    }

    /// Items between `start` and `stop` inclusive, Redis index rules.
    pub fn lrange(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> KvdisResult<Vec<Vec<u8>>> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.list_meta(view, db, key)? else {
                return Ok(Vec::new());
            };
            let Some((first, last)) = meta.normalize_range(start, stop) else {
                return Ok(Vec::new());
            };
            let range = KeyRange::half_open(
                self.codec.list_item_key(db, key, meta.head + first),
                self.codec.list_item_key(db, key, meta.head + last + 1),
            );
            let count = (last - first + 1) as usize;
            view.scan_values(&range, 0, count)
        })
    }

    pub fn lset(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        index: i64,
        value: &[u8],
    ) -> KvdisResult<()> {
        check_key(key)?;
        self.write(txn, |txn| {
            let meta = self
                .list_meta_for_write(txn, db, key)?
                .ok_or(KvdisError::NoSuchKey)?;
            let idx = meta.resolve_index(index).ok_or(KvdisError::IndexOutOfRange)?;
            txn.set(self.codec.list_item_key(db, key, idx), value.to_vec());
            Ok(())
        })
    }

    /// Keep only the items between `start` and `stop` inclusive.
    pub fn ltrim(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], start: i64, stop: i64) -> KvdisResult<()> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(mut meta) = self.list_meta_for_write(txn, db, key)? else {
                return Ok(());
            };
            let Some((first, last)) = meta.normalize_range(start, stop) else {
                return self.delete_object(txn, db, key, &Object::List(meta));
            };
            let new_head = meta.head + first;
            let new_tail = meta.head + last + 1;
            for idx in (meta.head..new_head).chain(new_tail..meta.tail) {
                txn.delete(self.codec.list_item_key(db, key, idx));
            }
            meta.head = new_head;
            meta.tail = new_tail;
            self.save(txn, db, key, &Object::List(meta));
            Ok(())
        })
    }

    /// Drop the whole list. Returns false if it did not exist.
    pub fn ldel(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<bool> {
        self.clear_kind(txn, db, key, ObjectKind::List)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine;
    use rand::Rng;
    use std::collections::VecDeque;

    fn items(xs: &[&str]) -> Vec<Vec<u8>> {
        xs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_rpush_lrange_lpop() {
        let (engine, _q) = engine();
        assert_eq!(engine.rpush(None, 0, b"l", &items(&["a", "b", "c"])).unwrap(), 3);
        assert_eq!(engine.lrange(None, 0, b"l", 0, -1).unwrap(), items(&["a", "b", "c"]));
        assert_eq!(engine.lpop(None, 0, b"l").unwrap(), Some(b"a".to_vec()));
        assert_eq!(engine.llen(None, 0, b"l").unwrap(), 2);
    }

    #[test]
    fn test_lpush_order() {
        let (engine, _q) = engine();
        engine.lpush(None, 0, b"l", &items(&["a", "b", "c"])).unwrap();
        assert_eq!(engine.lrange(None, 0, b"l", 0, -1).unwrap(), items(&["c", "b", "a"]));
        assert_eq!(engine.rpop(None, 0, b"l").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_matches_reference_deque() {
        let (engine, _q) = engine();
        let mut model: VecDeque<Vec<u8>> = VecDeque::new();
        let mut rng = rand::thread_rng();
        for i in 0..300 {
            let item = format!("v{i}").into_bytes();
            match rng.gen_range(0..4) {
                0 => {
                    engine.lpush(None, 0, b"l", &[item.clone()]).unwrap();
                    model.push_front(item);
                }
                1 => {
                    engine.rpush(None, 0, b"l", &[item.clone()]).unwrap();
                    model.push_back(item);
                }
                2 => assert_eq!(engine.lpop(None, 0, b"l").unwrap(), model.pop_front()),
                _ => assert_eq!(engine.rpop(None, 0, b"l").unwrap(), model.pop_back()),
            }
            assert_eq!(engine.llen(None, 0, b"l").unwrap(), model.len() as u64);
        }
        let expected: Vec<Vec<u8>> = model.into_iter().collect();
        assert_eq!(engine.lrange(None, 0, b"l", 0, -1).unwrap(), expected);
    }

    #[test]
    fn test_pop_last_removes_key() {
        let (engine, _q) = engine();
        engine.rpush(None, 0, b"l", &items(&["x"])).unwrap();
        assert_eq!(engine.rpop(None, 0, b"l").unwrap(), Some(b"x".to_vec()));
        assert_eq!(engine.exists(None, 0, &[b"l".to_vec()]).unwrap(), 0);
        assert_eq!(engine.lpop(None, 0, b"l").unwrap(), None);
    }

    #[test]
    fn test_lindex() {
        let (engine, _q) = engine();
        engine.rpush(None, 0, b"l", &items(&["a", "b", "c"])).unwrap();
        assert_eq!(engine.lindex(None, 0, b"l", 0).unwrap(), Some(b"a".to_vec()));
        assert_eq!(engine.lindex(None, 0, b"l", -1).unwrap(), Some(b"c".to_vec()));
        assert_eq!(engine.lindex(None, 0, b"l", 3).unwrap(), None);
        assert_eq!(engine.lindex(None, 0, b"l", -4).unwrap(), None);
    }

    #[test]
    fn test_lrange_edges() {
        let (engine, _q) = engine();
        engine.rpush(None, 0, b"l", &items(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(engine.lrange(None, 0, b"l", 1, 2).unwrap(), items(&["b", "c"]));
        assert_eq!(engine.lrange(None, 0, b"l", -2, 100).unwrap(), items(&["c", "d"]));
        assert!(engine.lrange(None, 0, b"l", 3, 1).unwrap().is_empty());
        assert!(engine.lrange(None, 0, b"l", 0, -10).unwrap().is_empty());
        assert!(engine.lrange(None, 0, b"missing", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_lset() {
        let (engine, _q) = engine();
        assert!(matches!(engine.lset(None, 0, b"l", 0, b"x"), Err(KvdisError::NoSuchKey)));
        engine.rpush(None, 0, b"l", &items(&["a", "b"])).unwrap();
        engine.lset(None, 0, b"l", -1, b"z").unwrap();
        assert_eq!(engine.lrange(None, 0, b"l", 0, -1).unwrap(), items(&["a", "z"]));
        assert!(matches!(engine.lset(None, 0, b"l", 2, b"x"), Err(KvdisError::IndexOutOfRange)));
    }

    #[test]
    fn test_ltrim() {
        let (engine, _q) = engine();
        engine.rpush(None, 0, b"l", &items(&["a", "b", "c", "d", "e"])).unwrap();
        engine.ltrim(None, 0, b"l", 1, -2).unwrap();
        assert_eq!(engine.lrange(None, 0, b"l", 0, -1).unwrap(), items(&["b", "c", "d"]));
        assert_eq!(engine.llen(None, 0, b"l").unwrap(), 3);

        let prefix = engine.codec().key_prefix(0, crate::codec::KeyTag::ListItem, b"l");
        let stored = engine.store().scan_keys(&KeyRange::prefix(&prefix), 0, 100).unwrap();
        assert_eq!(stored.len(), 3);

        engine.ltrim(None, 0, b"l", 5, 10).unwrap();
        assert_eq!(engine.llen(None, 0, b"l").unwrap(), 0);
        let stored = engine.store().scan_keys(&KeyRange::prefix(&prefix), 0, 100).unwrap();
        assert!(stored.is_empty());
    }

    #[test]
    fn test_ldel() {
        let (engine, _q) = engine();
        engine.rpush(None, 0, b"l", &items(&["a", "b"])).unwrap();
        assert!(engine.ldel(None, 0, b"l").unwrap());
        assert_eq!(engine.llen(None, 0, b"l").unwrap(), 0);
        assert!(!engine.ldel(None, 0, b"l").unwrap());
    }
}
