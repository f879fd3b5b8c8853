use super::{Engine, check_key, expect_kind};
use crate::codec::{KeyTag, decode_score, decode_score_sub, encode_score, prefix_next};
use crate::error::{KvdisError, KvdisResult};
use crate::store::{KeyRange, KvRead, Transaction};
use crate::types::list::normalize_range;
use crate::types::sorted_set::{LexBound, SCORE_MAX, SCORE_MIN, ScoreRange};
use crate::types::{Object, ObjectKind, SizedMeta};
use std::ops::Bound;

/// A member with its score.
pub type ScoredMember = (Vec<u8>, i64);

/// Offset and count of a `LIMIT` clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limit {
    pub offset: usize,
    pub count: Option<usize>,
}

impl Limit {
    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let it = items.into_iter().skip(self.offset);
        match self.count {
            Some(n) => it.take(n).collect(),
            None => it.collect(),
        }
    }
}

fn stored_score(raw: &[u8]) -> KvdisResult<i64> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| KvdisError::InvalidMeta)?;
    Ok(decode_score(bytes))
}

fn size_limit(meta: &SizedMeta) -> usize {
    usize::try_from(meta.size).unwrap_or(usize::MAX)
}

impl Engine {
    fn zset_meta(&self, view: &dyn KvRead, db: u8, key: &[u8]) -> KvdisResult<Option<SizedMeta>> {
        expect_kind(self.load(view, db, key)?, ObjectKind::ZSet)
    }

    fn zset_meta_for_write(&self, txn: &mut Transaction, db: u8, key: &[u8]) -> KvdisResult<Option<SizedMeta>> {
        expect_kind(self.load_for_write(txn, db, key)?, ObjectKind::ZSet)
    }

    fn member_score(&self, view: &dyn KvRead, db: u8, key: &[u8], member: &[u8]) -> KvdisResult<Option<i64>> {
        match view.get(&self.codec.zset_member_key(db, key, member))? {
            Some(raw) => Ok(Some(stored_score(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write both index entries of a member.
    fn zset_put(&self, txn: &mut Transaction, db: u8, key: &[u8], member: &[u8], score: i64) {
        txn.set(
            self.codec.zset_member_key(db, key, member),
            encode_score(score).to_vec(),
        );
        txn.set(self.codec.zset_score_key(db, key, score, member), Vec::new());
    }

    fn zset_remove(&self, txn: &mut Transaction, db: u8, key: &[u8], member: &[u8], score: i64) {
        txn.delete(self.codec.zset_member_key(db, key, member));
        txn.delete(self.codec.zset_score_key(db, key, score, member));
    }

    fn score_prefix(&self, db: u8, key: &[u8]) -> Vec<u8> {
        self.codec.key_prefix(db, KeyTag::ZSetScore, key)
    }

    /// Raw key interval covering every score key with a score in `range`.
    fn score_key_range(&self, db: u8, key: &[u8], range: &ScoreRange) -> KeyRange {
        let start = self.codec.zset_score_key(db, key, range.min, b"");
        let max_prefix = self.codec.zset_score_key(db, key, range.max, b"");
        let end = match prefix_next(&max_prefix) {
            Some(next) => Bound::Excluded(next),
            None => Bound::Unbounded,
        };
        KeyRange::new(Bound::Included(start), end)
    }

    /// Raw key interval over member keys between two lex bounds.
    fn lex_key_range(&self, db: u8, key: &[u8], min: &LexBound, max: &LexBound) -> KeyRange {
        let prefix = self.codec.key_prefix(db, KeyTag::ZSetMember, key);
        let with = |m: &[u8]| {
            let mut k = prefix.clone();
            k.extend_from_slice(m);
            k
        };
        let start = match min {
            LexBound::NegInf => Bound::Included(prefix.clone()),
            LexBound::Inclusive(m) => Bound::Included(with(m)),
            LexBound::Exclusive(m) => Bound::Excluded(with(m)),
            // "+" as a minimum matches nothing
            LexBound::PosInf => return KeyRange::half_open(prefix.clone(), prefix.clone()),
        };
        let end = match max {
            LexBound::PosInf => match prefix_next(&prefix) {
                Some(next) => Bound::Excluded(next),
                None => Bound::Unbounded,
            },
            LexBound::Inclusive(m) => Bound::Included(with(m)),
            LexBound::Exclusive(m) => Bound::Excluded(with(m)),
            LexBound::NegInf => Bound::Excluded(prefix.clone()),
        };
        KeyRange::new(start, end)
    }

    fn decode_score_entries(&self, raw_keys: Vec<Vec<u8>>) -> KvdisResult<Vec<ScoredMember>> {
        raw_keys
            .into_iter()
            .map(|raw| {
                let decoded = self.codec.decode_tagged(&raw, KeyTag::ZSetScore)?;
                let (score, member) = decode_score_sub(&decoded.sub)?;
                Ok((member.to_vec(), score))
            })
            .collect()
    }

    fn decode_member_entries(&self, pairs: Vec<(Vec<u8>, Vec<u8>)>) -> KvdisResult<Vec<ScoredMember>> {
        pairs
            .into_iter()
            .map(|(raw, value)| {
                let decoded = self.codec.decode_tagged(&raw, KeyTag::ZSetMember)?;
                Ok((decoded.sub, stored_score(&value)?))
            })
            .collect()
    }

    fn scan_by_score(
        &self,
        view: &dyn KvRead,
        db: u8,
        key: &[u8],
        meta: &SizedMeta,
        range: &ScoreRange,
    ) -> KvdisResult<Vec<ScoredMember>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let keys = view.scan_keys(&self.score_key_range(db, key, range), 0, size_limit(meta))?;
        self.decode_score_entries(keys)
    }

    fn scan_by_lex(
        &self,
        view: &dyn KvRead,
        db: u8,
        key: &[u8],
        meta: &SizedMeta,
        min: &LexBound,
        max: &LexBound,
    ) -> KvdisResult<Vec<ScoredMember>> {
        let range = self.lex_key_range(db, key, min, max);
        let pairs = view.scan(&range, 0, size_limit(meta))?;
        self.decode_member_entries(pairs)
    }

    /// Add or update members, returning how many were new.
    pub fn zadd(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], entries: &[(i64, Vec<u8>)]) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let mut meta = self.zset_meta_for_write(txn, db, key)?.unwrap_or_default();
            let mut added = 0;
            for (score, member) in entries {
                match self.member_score(&*txn, db, key, member)? {
                    Some(old) if old == *score => continue,
                    Some(old) => {
                        txn.delete(self.codec.zset_score_key(db, key, old, member));
                    }
                    None => added += 1,
                }
                self.zset_put(txn, db, key, member, *score);
            }
            meta.size += added;
            self.save_or_remove(txn, db, key, &Object::ZSet(meta));
            Ok(added)
        })
    }

    pub fn zcard(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<u64> {
        check_key(key)?;
        self.read(txn, |view| Ok(self.zset_meta(view, db, key)?.map_or(0, |m| m.size)))
    }

    pub fn zscore(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], member: &[u8]) -> KvdisResult<Option<i64>> {
        check_key(key)?;
        self.read(txn, |view| {
            if self.zset_meta(view, db, key)?.is_none() {
                return Ok(None);
            }
            self.member_score(view, db, key, member)
        })
    }

    /// Zero-based position of `member` by ascending score, or descending
    /// when `rev`.
    pub fn zrank(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], member: &[u8], rev: bool) -> KvdisResult<Option<u64>> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.zset_meta(view, db, key)? else {
                return Ok(None);
            };
            let Some(score) = self.member_score(view, db, key, member)? else {
                return Ok(None);
            };
            let below = KeyRange::half_open(
                self.score_prefix(db, key),
                self.codec.zset_score_key(db, key, score, member),
            );
            let rank = view.scan_keys(&below, 0, size_limit(&meta))?.len() as u64;
            Ok(Some(if rev { meta.size - 1 - rank } else { rank }))
        })
    }

    /// Add `delta` to the score of `member`, creating it at `delta`.
    pub fn zincrby(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], member: &[u8], delta: i64) -> KvdisResult<i64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let mut meta = self.zset_meta_for_write(txn, db, key)?.unwrap_or_default();
            let old = self.member_score(&*txn, db, key, member)?;
            let score = old
                .unwrap_or(0)
                .checked_add(delta)
                .filter(|s| (SCORE_MIN..=SCORE_MAX).contains(s))
                .ok_or(KvdisError::NotInteger)?;
            match old {
                Some(old) => txn.delete(self.codec.zset_score_key(db, key, old, member)),
                None => meta.size += 1,
            }
            self.zset_put(txn, db, key, member, score);
            self.save(txn, db, key, &Object::ZSet(meta));
            Ok(score)
        })
    }

    /// Remove members, returning how many existed.
    pub fn zrem(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], members: &[Vec<u8>]) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(mut meta) = self.zset_meta_for_write(txn, db, key)? else {
                return Ok(0);
            };
            let mut removed = 0;
            for member in members {
                if let Some(score) = self.member_score(&*txn, db, key, member)? {
                    self.zset_remove(txn, db, key, member, score);
                    removed += 1;
                }
            }
            if removed > 0 {
                meta.size = meta.size.saturating_sub(removed);
                self.save_or_remove(txn, db, key, &Object::ZSet(meta));
            }
            Ok(removed)
        })
    }

    /// Members by rank between `start` and `stop` inclusive.
    pub fn zrange(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        start: i64,
        stop: i64,
        rev: bool,
    ) -> KvdisResult<Vec<ScoredMember>> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.zset_meta(view, db, key)? else {
                return Ok(Vec::new());
            };
            let Some((first, last)) = normalize_range(meta.size, start, stop) else {
                return Ok(Vec::new());
            };
            // Reverse ranks count from the highest score.
            let (offset, count) = if rev {
                (meta.size - 1 - last, last - first + 1)
            } else {
                (first, last - first + 1)
            };
            let keys = view.scan_keys(
                &KeyRange::prefix(&self.score_prefix(db, key)),
                offset as usize,
                count as usize,
            )?;
            let mut out = self.decode_score_entries(keys)?;
            if rev {
                out.reverse();
            }
            Ok(out)
        })
    }

    pub fn zrange_by_score(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        range: &ScoreRange,
        rev: bool,
        limit: Limit,
    ) -> KvdisResult<Vec<ScoredMember>> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.zset_meta(view, db, key)? else {
                return Ok(Vec::new());
            };
            let mut found = self.scan_by_score(view, db, key, &meta, range)?;
            if rev {
                found.reverse();
            }
            Ok(limit.apply(found))
        })
    }

    pub fn zrange_by_lex(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        min: &LexBound,
        max: &LexBound,
        rev: bool,
        limit: Limit,
    ) -> KvdisResult<Vec<Vec<u8>>> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.zset_meta(view, db, key)? else {
                return Ok(Vec::new());
            };
            let mut found: Vec<Vec<u8>> = self
                .scan_by_lex(view, db, key, &meta, min, max)?
                .into_iter()
                .map(|(m, _)| m)
                .collect();
            if rev {
                found.reverse();
            }
            Ok(limit.apply(found))
        })
    }

    pub fn zcount(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], range: &ScoreRange) -> KvdisResult<u64> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.zset_meta(view, db, key)? else {
                return Ok(0);
            };
            Ok(self.scan_by_score(view, db, key, &meta, range)?.len() as u64)
        })
    }

    pub fn zlexcount(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], min: &LexBound, max: &LexBound) -> KvdisResult<u64> {
        check_key(key)?;
        self.read(txn, |view| {
            let Some(meta) = self.zset_meta(view, db, key)? else {
                return Ok(0);
            };
            Ok(self.scan_by_lex(view, db, key, &meta, min, max)?.len() as u64)
        })
    }

    fn remove_found(
        &self,
        txn: &mut Transaction,
        db: u8,
        key: &[u8],
        mut meta: SizedMeta,
        found: Vec<ScoredMember>,
    ) -> u64 {
        let removed = found.len() as u64;
        for (member, score) in found {
            self.zset_remove(txn, db, key, &member, score);
        }
        if removed > 0 {
            meta.size = meta.size.saturating_sub(removed);
            self.save_or_remove(txn, db, key, &Object::ZSet(meta));
        }
        removed
    }

    pub fn zrem_range_by_score(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8], range: &ScoreRange) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(meta) = self.zset_meta_for_write(txn, db, key)? else {
                return Ok(0);
            };
            let found = self.scan_by_score(&*txn, db, key, &meta, range)?;
            Ok(self.remove_found(txn, db, key, meta, found))
        })
    }

    pub fn zrem_range_by_lex(
        &self,
        txn: Option<&mut Transaction>,
        db: u8,
        key: &[u8],
        min: &LexBound,
        max: &LexBound,
    ) -> KvdisResult<u64> {
        check_key(key)?;
        self.write(txn, |txn| {
            let Some(meta) = self.zset_meta_for_write(txn, db, key)? else {
                return Ok(0);
            };
            let found = self.scan_by_lex(&*txn, db, key, &meta, min, max)?;
            Ok(self.remove_found(txn, db, key, meta, found))
        })
    }

    /// Drop the whole sorted set. Returns false if it did not exist.
    pub fn zclear(&self, txn: Option<&mut Transaction>, db: u8, key: &[u8]) -> KvdisResult<bool> {
        self.clear_kind(txn, db, key, ObjectKind::ZSet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine;

    fn entries(xs: &[(i64, &str)]) -> Vec<(i64, Vec<u8>)> {
        xs.iter().map(|(s, m)| (*s, m.as_bytes().to_vec())).collect()
    }

    fn scored(xs: &[(&str, i64)]) -> Vec<ScoredMember> {
        xs.iter().map(|(m, s)| (m.as_bytes().to_vec(), *s)).collect()
    }

    fn all() -> ScoreRange {
        ScoreRange::parse(b"-inf", b"+inf").unwrap()
    }

    #[test]
    fn test_zadd_and_range_by_score() {
        let (engine, _q) = engine();
        assert_eq!(engine.zadd(None, 0, b"z", &entries(&[(1, "a"), (2, "b")])).unwrap(), 2);
        let got = engine
            .zrange_by_score(None, 0, b"z", &all(), false, Limit::default())
            .unwrap();
        assert_eq!(got, scored(&[("a", 1), ("b", 2)]));
    }

    #[test]
    fn test_zadd_updates_score() {
        let (engine, _q) = engine();
        engine.zadd(None, 0, b"z", &entries(&[(5, "a"), (3, "b")])).unwrap();
        assert_eq!(engine.zadd(None, 0, b"z", &entries(&[(1, "a")])).unwrap(), 0);
        assert_eq!(engine.zcard(None, 0, b"z").unwrap(), 2);
        assert_eq!(engine.zscore(None, 0, b"z", b"a").unwrap(), Some(1));
        let got = engine.zrange(None, 0, b"z", 0, -1, false).unwrap();
        assert_eq!(got, scored(&[("a", 1), ("b", 3)]));
        // The old score entry is gone.
        let keys = engine
            .store()
            .scan_keys(&KeyRange::prefix(&engine.score_prefix(0, b"z")), 0, 10)
            .unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_negative_scores_order() {
        let (engine, _q) = engine();
        engine
            .zadd(None, 0, b"z", &entries(&[(10, "p"), (-5, "n"), (0, "z"), (-100, "m")]))
            .unwrap();
        let got = engine.zrange(None, 0, b"z", 0, -1, false).unwrap();
        assert_eq!(got, scored(&[("m", -100), ("n", -5), ("z", 0), ("p", 10)]));
    }

    #[test]
    fn test_exclusive_bounds() {
        let (engine, _q) = engine();
        engine
            .zadd(None, 0, b"z", &entries(&[(1, "a"), (2, "b"), (3, "c")]))
            .unwrap();
        let incl = ScoreRange::parse(b"1", b"3").unwrap();
        let excl = ScoreRange::parse(b"1", b"(3").unwrap();
        let got = engine.zrange_by_score(None, 0, b"z", &incl, false, Limit::default()).unwrap();
        assert_eq!(got.len(), 3);
        let got = engine.zrange_by_score(None, 0, b"z", &excl, false, Limit::default()).unwrap();
        assert_eq!(got, scored(&[("a", 1), ("b", 2)]));
        assert_eq!(engine.zcount(None, 0, b"z", &ScoreRange::parse(b"(1", b"(3").unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_reverse_and_limit() {
        let (engine, _q) = engine();
        engine
            .zadd(None, 0, b"z", &entries(&[(1, "a"), (2, "b"), (3, "c"), (4, "d")]))
            .unwrap();
        let got = engine.zrange_by_score(None, 0, b"z", &all(), true, Limit::default()).unwrap();
        let scores: Vec<i64> = got.iter().map(|(_, s)| *s).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));

        let limit = Limit { offset: 1, count: Some(2) };
        let got = engine.zrange_by_score(None, 0, b"z", &all(), false, limit).unwrap();
        assert_eq!(got, scored(&[("b", 2), ("c", 3)]));

        let got = engine.zrange(None, 0, b"z", 0, 1, true).unwrap();
        assert_eq!(got, scored(&[("d", 4), ("c", 3)]));
        let got = engine.zrange(None, 0, b"z", -2, -1, false).unwrap();
        assert_eq!(got, scored(&[("c", 3), ("d", 4)]));
    }

    #[test]
    fn test_zrank() {
        let (engine, _q) = engine();
        engine
            .zadd(None, 0, b"z", &entries(&[(10, "a"), (20, "b"), (30, "c")]))
            .unwrap();
        assert_eq!(engine.zrank(None, 0, b"z", b"a", false).unwrap(), Some(0));
        assert_eq!(engine.zrank(None, 0, b"z", b"c", false).unwrap(), Some(2));
        assert_eq!(engine.zrank(None, 0, b"z", b"c", true).unwrap(), Some(0));
        assert_eq!(engine.zrank(None, 0, b"z", b"x", false).unwrap(), None);
    }

    #[test]
    fn test_zincrby_and_zrem() {
        let (engine, _q) = engine();
        assert_eq!(engine.zincrby(None, 0, b"z", b"a", 5).unwrap(), 5);
        assert_eq!(engine.zincrby(None, 0, b"z", b"a", -7).unwrap(), -2);
        assert_eq!(engine.zcard(None, 0, b"z").unwrap(), 1);
        engine.zadd(None, 0, b"z", &entries(&[(1, "b")])).unwrap();
        assert_eq!(engine.zrem(None, 0, b"z", &[b"a".to_vec(), b"nope".to_vec()]).unwrap(), 1);
        assert_eq!(engine.zrange(None, 0, b"z", 0, -1, false).unwrap(), scored(&[("b", 1)]));
        assert_eq!(engine.zrem(None, 0, b"z", &[b"b".to_vec()]).unwrap(), 1);
        assert_eq!(engine.exists(None, 0, &[b"z".to_vec()]).unwrap(), 0);
    }

    #[test]
    fn test_lex_ranges() {
        let (engine, _q) = engine();
        engine
            .zadd(None, 0, b"z", &entries(&[(0, "a"), (0, "b"), (0, "c"), (0, "d")]))
            .unwrap();
        let lex = |min: &[u8], max: &[u8]| {
            let min = LexBound::parse(min).unwrap();
            let max = LexBound::parse(max).unwrap();
            engine
                .zrange_by_lex(None, 0, b"z", &min, &max, false, Limit::default())
                .unwrap()
        };
        assert_eq!(lex(b"-", b"+").len(), 4);
        assert_eq!(lex(b"[b", b"[c"), vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(lex(b"(b", b"+"), vec![b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(lex(b"-", b"(b"), vec![b"a".to_vec()]);
        assert!(lex(b"+", b"-").is_empty());

        let min = LexBound::parse(b"[b").unwrap();
        let max = LexBound::parse(b"+").unwrap();
        assert_eq!(engine.zlexcount(None, 0, b"z", &min, &max).unwrap(), 3);
        assert_eq!(engine.zrem_range_by_lex(None, 0, b"z", &min, &max).unwrap(), 3);
        assert_eq!(engine.zcard(None, 0, b"z").unwrap(), 1);
    }

    #[test]
    fn test_zrem_range_by_score() {
        let (engine, _q) = engine();
        engine
            .zadd(None, 0, b"z", &entries(&[(1, "a"), (2, "b"), (3, "c")]))
            .unwrap();
        let range = ScoreRange::parse(b"-inf", b"(3").unwrap();
        assert_eq!(engine.zrem_range_by_score(None, 0, b"z", &range).unwrap(), 2);
        assert_eq!(engine.zrange(None, 0, b"z", 0, -1, false).unwrap(), scored(&[("c", 3)]));
        assert_eq!(engine.zscore(None, 0, b"z", b"a").unwrap(), None);
    }

    #[test]
    fn test_zclear_and_wrong_type() {
        let (engine, _q) = engine();
        engine.zadd(None, 0, b"z", &entries(&[(1, "a")])).unwrap();
        assert!(matches!(engine.hlen(None, 0, b"z"), Err(KvdisError::WrongType)));
        assert!(engine.zclear(None, 0, b"z").unwrap());
        assert_eq!(engine.zcard(None, 0, b"z").unwrap(), 0);
    }
}
