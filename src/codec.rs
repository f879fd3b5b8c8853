//! Raw key encoding.
//!
//! Every key written to the store starts with the same prefix:
//!
//! ```text
//! tenant-len(u16 BE) | tenant | db(u8) | tag(u8) | key-len(u32 BE) | key [| sub-key]
//! ```
//!
//! Byte-wise order over raw keys is what range scans rely on: all sub-keys of
//! one user key are contiguous, list indexes sort numerically and sorted-set
//! scores sort by signed value.

use crate::error::{KvdisError, KvdisResult};
use crate::types::ObjectKind;

/// Database byte reserved for process-wide system keys (leader lease, gc point).
pub const SYS_DB: u8 = u8::MAX;

/// Largest database id a client may select.
pub const MAX_DB: u8 = SYS_DB - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyTag {
    Meta = 1,
    HashField = 2,
    ListItem = 3,
    SetMember = 4,
    ZSetMember = 5,
    ZSetScore = 6,
    Ttl = 7,
    Sys = 8,
}

impl KeyTag {
    pub fn from_byte(b: u8) -> KvdisResult<Self> {
        Ok(match b {
            1 => KeyTag::Meta,
            2 => KeyTag::HashField,
            3 => KeyTag::ListItem,
            4 => KeyTag::SetMember,
            5 => KeyTag::ZSetMember,
            6 => KeyTag::ZSetScore,
            7 => KeyTag::Ttl,
            8 => KeyTag::Sys,
            _ => return Err(KvdisError::TypeNotMatch),
        })
    }
}

/// The components recovered from a raw key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub db: u8,
    pub tag: KeyTag,
    pub key: Vec<u8>,
    pub sub: Vec<u8>,
}

/// Builds and parses raw keys for one tenant.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    tenant: Vec<u8>,
}

impl KeyCodec {
    pub fn new(tenant: impl Into<Vec<u8>>) -> KvdisResult<Self> {
        let tenant = tenant.into();
        if tenant.len() > u16::MAX as usize {
            return Err(KvdisError::Generic("tenant id too long".into()));
        }
        Ok(KeyCodec { tenant })
    }

    pub fn tenant(&self) -> &[u8] {
        &self.tenant
    }

    pub fn tenant_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.tenant.len() + 1);
        buf.extend_from_slice(&(self.tenant.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.tenant);
        buf
    }

    pub fn db_prefix(&self, db: u8) -> Vec<u8> {
        let mut buf = self.tenant_prefix();
        buf.push(db);
        buf
    }

    /// `tenant | db | tag | key-len | key`, the common prefix of every
    /// sub-key belonging to `key`.
    pub fn key_prefix(&self, db: u8, tag: KeyTag, key: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.tenant.len() + 6 + key.len() + 16);
        buf.extend_from_slice(&(self.tenant.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.tenant);
        buf.push(db);
        buf.push(tag as u8);
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf
    }

    pub fn meta_key(&self, db: u8, key: &[u8]) -> Vec<u8> {
        self.key_prefix(db, KeyTag::Meta, key)
    }

    pub fn hash_field_key(&self, db: u8, key: &[u8], field: &[u8]) -> Vec<u8> {
        let mut buf = self.key_prefix(db, KeyTag::HashField, key);
        buf.extend_from_slice(field);
        buf
    }

    pub fn list_item_key(&self, db: u8, key: &[u8], index: u64) -> Vec<u8> {
        let mut buf = self.key_prefix(db, KeyTag::ListItem, key);
        buf.extend_from_slice(&index.to_be_bytes());
        buf
    }

    pub fn set_member_key(&self, db: u8, key: &[u8], member: &[u8]) -> Vec<u8> {
        let mut buf = self.key_prefix(db, KeyTag::SetMember, key);
        buf.extend_from_slice(member);
        buf
    }

    pub fn zset_member_key(&self, db: u8, key: &[u8], member: &[u8]) -> Vec<u8> {
        let mut buf = self.key_prefix(db, KeyTag::ZSetMember, key);
        buf.extend_from_slice(member);
        buf
    }

    pub fn zset_score_key(&self, db: u8, key: &[u8], score: i64, member: &[u8]) -> Vec<u8> {
        let mut buf = self.key_prefix(db, KeyTag::ZSetScore, key);
        buf.extend_from_slice(&encode_score(score));
        buf.extend_from_slice(member);
        buf
    }

    /// `tenant | db | Ttl | kind`, the prefix of one kind's expiration index.
    pub fn ttl_prefix(&self, db: u8, kind: ObjectKind) -> Vec<u8> {
        let mut buf = self.db_prefix(db);
        buf.push(KeyTag::Ttl as u8);
        buf.push(kind as u8);
        buf
    }

    /// Expiration index entry: `ttl-prefix | expire-at(u64 BE) | key-len | key`.
    pub fn ttl_key(&self, db: u8, kind: ObjectKind, expire_at: u64, key: &[u8]) -> Vec<u8> {
        let mut buf = self.ttl_prefix(db, kind);
        buf.extend_from_slice(&expire_at.to_be_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf
    }

    pub fn sys_key(&self, name: &[u8]) -> Vec<u8> {
        self.key_prefix(SYS_DB, KeyTag::Sys, name)
    }

    /// Split a raw key back into its components.
    pub fn decode(&self, raw: &[u8]) -> KvdisResult<DecodedKey> {
        let rest = self.strip_tenant(raw)?;
        if rest.len() < 2 {
            return Err(KvdisError::TypeNotMatch);
        }
        let db = rest[0];
        let tag = KeyTag::from_byte(rest[1])?;
        let (key, sub) = split_len_prefixed(&rest[2..])?;
        Ok(DecodedKey {
            db,
            tag,
            key: key.to_vec(),
            sub: sub.to_vec(),
        })
    }

    /// Decode a raw key and check that it carries the expected tag.
    pub fn decode_tagged(&self, raw: &[u8], tag: KeyTag) -> KvdisResult<DecodedKey> {
        let decoded = self.decode(raw)?;
        if decoded.tag != tag {
            return Err(KvdisError::TypeNotMatch);
        }
        Ok(decoded)
    }

    /// Returns `(expire_at, user_key)` of an expiration index entry.
    pub fn decode_ttl_key(&self, raw: &[u8], db: u8, kind: ObjectKind) -> KvdisResult<(u64, Vec<u8>)> {
        let prefix = self.ttl_prefix(db, kind);
        let rest = raw.strip_prefix(prefix.as_slice()).ok_or(KvdisError::TypeNotMatch)?;
        if rest.len() < 8 {
            return Err(KvdisError::TypeNotMatch);
        }
        let expire_at = read_u64(&rest[..8])?;
        let (key, trailing) = split_len_prefixed(&rest[8..])?;
        if !trailing.is_empty() {
            return Err(KvdisError::TypeNotMatch);
        }
        Ok((expire_at, key.to_vec()))
    }

    fn strip_tenant<'a>(&self, raw: &'a [u8]) -> KvdisResult<&'a [u8]> {
        if raw.len() < 2 {
            return Err(KvdisError::TypeNotMatch);
        }
        let len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        if raw.len() < 2 + len || raw[2..2 + len] != self.tenant[..] {
            return Err(KvdisError::TypeNotMatch);
        }
        Ok(&raw[2 + len..])
    }
}

/// Decode the sub-key of a list item key into its index.
pub fn decode_list_index(sub: &[u8]) -> KvdisResult<u64> {
    read_u64(sub)
}

/// Decode the sub-key of a sorted-set score key into `(score, member)`.
pub fn decode_score_sub(sub: &[u8]) -> KvdisResult<(i64, &[u8])> {
    if sub.len() < 8 {
        return Err(KvdisError::TypeNotMatch);
    }
    let shifted = read_u64(&sub[..8])?;
    Ok((decode_score(shifted.to_be_bytes()), &sub[8..]))
}

/// Shift a signed score so unsigned big-endian order matches numeric order.
pub fn encode_score(score: i64) -> [u8; 8] {
    ((score as u64) ^ (1 << 63)).to_be_bytes()
}

pub fn decode_score(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

/// The smallest key greater than every key starting with `prefix`, or `None`
/// when no such key exists (prefix is empty or all `0xff`).
pub fn prefix_next(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

fn split_len_prefixed(buf: &[u8]) -> KvdisResult<(&[u8], &[u8])> {
    if buf.len() < 4 {
        return Err(KvdisError::TypeNotMatch);
    }
    let len = read_u32(&buf[..4])? as usize;
    if buf.len() < 4 + len {
        return Err(KvdisError::TypeNotMatch);
    }
    Ok((&buf[4..4 + len], &buf[4 + len..]))
}

fn read_u64(bytes: &[u8]) -> KvdisResult<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| KvdisError::TypeNotMatch)?;
    Ok(u64::from_be_bytes(arr))
}

fn read_u32(bytes: &[u8]) -> KvdisResult<u32> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| KvdisError::TypeNotMatch)?;
    Ok(u32::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_key_roundtrip() {
        let codec = KeyCodec::new("tenant-a").unwrap();
        let raw = codec.meta_key(3, b"user:1");
        let decoded = codec.decode(&raw).unwrap();
        assert_eq!(decoded.db, 3);
        assert_eq!(decoded.tag, KeyTag::Meta);
        assert_eq!(decoded.key, b"user:1");
        assert!(decoded.sub.is_empty());
    }

    #[test]
    fn test_sub_key_roundtrip() {
        let codec = KeyCodec::new("").unwrap();
        let raw = codec.hash_field_key(0, b"h", b"field");
        let decoded = codec.decode_tagged(&raw, KeyTag::HashField).unwrap();
        assert_eq!(decoded.key, b"h");
        assert_eq!(decoded.sub, b"field");

        let raw = codec.list_item_key(0, b"l", 42);
        let decoded = codec.decode_tagged(&raw, KeyTag::ListItem).unwrap();
        assert_eq!(decode_list_index(&decoded.sub).unwrap(), 42);
    }

    #[test]
    fn test_decode_rejects_wrong_tag() {
        let codec = KeyCodec::new("t").unwrap();
        let raw = codec.set_member_key(1, b"s", b"m");
        assert!(matches!(
            codec.decode_tagged(&raw, KeyTag::HashField),
            Err(KvdisError::TypeNotMatch)
        ));
    }

    #[test]
    fn test_decode_rejects_other_tenant() {
        let a = KeyCodec::new("a").unwrap();
        let b = KeyCodec::new("b").unwrap();
        let raw = a.meta_key(0, b"k");
        assert!(b.decode(&raw).is_err());
    }

    #[test]
    fn test_distinct_tuples_never_collide() {
        let codec = KeyCodec::new("t").unwrap();
        // Same concatenated bytes, split differently between key and field.
        let a = codec.hash_field_key(0, b"ab", b"c");
        let b = codec.hash_field_key(0, b"a", b"bc");
        assert_ne!(a, b);
        assert_ne!(codec.meta_key(0, b"k"), codec.meta_key(1, b"k"));
        assert_ne!(
            codec.hash_field_key(0, b"k", b""),
            codec.set_member_key(0, b"k", b"")
        );
        let other = KeyCodec::new(b"t\x01".to_vec()).unwrap();
        assert_ne!(codec.meta_key(1, b"k"), other.meta_key(1, b"k"));
    }

    #[test]
    fn test_list_index_order() {
        let codec = KeyCodec::new("").unwrap();
        let lo = codec.list_item_key(0, b"l", 255);
        let hi = codec.list_item_key(0, b"l", 256);
        assert!(lo < hi);
    }

    #[test]
    fn test_score_order_matches_numeric_order() {
        let scores = [i64::MIN + 2, -1000, -1, 0, 1, 7, 1000, i64::MAX - 1];
        for pair in scores.windows(2) {
            assert!(encode_score(pair[0]) < encode_score(pair[1]));
        }
        for s in scores {
            assert_eq!(decode_score(encode_score(s)), s);
        }
    }

    #[test]
    fn test_score_key_decodes_member() {
        let codec = KeyCodec::new("").unwrap();
        let raw = codec.zset_score_key(2, b"z", -5, b"alice");
        let decoded = codec.decode_tagged(&raw, KeyTag::ZSetScore).unwrap();
        let (score, member) = decode_score_sub(&decoded.sub).unwrap();
        assert_eq!(score, -5);
        assert_eq!(member, b"alice");
    }

    #[test]
    fn test_ttl_key_roundtrip_and_order() {
        let codec = KeyCodec::new("t").unwrap();
        let early = codec.ttl_key(0, ObjectKind::Hash, 1_000, b"zzz");
        let late = codec.ttl_key(0, ObjectKind::Hash, 2_000, b"aaa");
        assert!(early < late);
        let (ts, key) = codec.decode_ttl_key(&late, 0, ObjectKind::Hash).unwrap();
        assert_eq!(ts, 2_000);
        assert_eq!(key, b"aaa");
        assert!(codec.decode_ttl_key(&late, 0, ObjectKind::List).is_err());
    }

    #[test]
    fn test_prefix_next() {
        assert_eq!(prefix_next(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_next(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_next(&[0xff, 0xff]), None);
        assert_eq!(prefix_next(b""), None);
    }
}
