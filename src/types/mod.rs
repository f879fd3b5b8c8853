pub mod list;
pub mod rstring;
pub mod sorted_set;

use crate::error::{KvdisError, KvdisResult};

pub use list::ListMeta;
pub use rstring::StringObject;

/// The kind of value stored under a user key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ObjectKind {
    String = 0,
    Hash = 1,
    List = 2,
    Set = 3,
    ZSet = 4,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::String,
        ObjectKind::Hash,
        ObjectKind::List,
        ObjectKind::Set,
        ObjectKind::ZSet,
    ];

    pub fn from_byte(b: u8) -> KvdisResult<Self> {
        Ok(match b {
            0 => ObjectKind::String,
            1 => ObjectKind::Hash,
            2 => ObjectKind::List,
            3 => ObjectKind::Set,
            4 => ObjectKind::ZSet,
            _ => return Err(KvdisError::InvalidMeta),
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::String => "string",
            ObjectKind::Hash => "hash",
            ObjectKind::List => "list",
            ObjectKind::Set => "set",
            ObjectKind::ZSet => "zset",
        }
    }
}

/// Accounting record shared by hashes, sets and sorted sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizedMeta {
    pub expire_at: u64,
    pub tomb: bool,
    pub size: u64,
}

/// Decoded metadata record of one user key.
///
/// Layout: `kind(1) | tomb(1) | expire_at(u64 BE) | body`, where the body is
/// the raw string value, `size(u64)` for hash/set/zset, or
/// `head(u64) | tail(u64) | size(u64)` for lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    String(StringObject),
    Hash(SizedMeta),
    List(ListMeta),
    Set(SizedMeta),
    ZSet(SizedMeta),
}

const HEADER_LEN: usize = 10;
const SIZED_LEN: usize = HEADER_LEN + 8;
const LIST_LEN: usize = HEADER_LEN + 24;

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::String(_) => ObjectKind::String,
            Object::Hash(_) => ObjectKind::Hash,
            Object::List(_) => ObjectKind::List,
            Object::Set(_) => ObjectKind::Set,
            Object::ZSet(_) => ObjectKind::ZSet,
        }
    }

    pub fn expire_at(&self) -> u64 {
        match self {
            Object::String(s) => s.expire_at,
            Object::List(l) => l.expire_at,
            Object::Hash(m) | Object::Set(m) | Object::ZSet(m) => m.expire_at,
        }
    }

    pub fn set_expire_at(&mut self, ts: u64) {
        match self {
            Object::String(s) => s.expire_at = ts,
            Object::List(l) => l.expire_at = ts,
            Object::Hash(m) | Object::Set(m) | Object::ZSet(m) => m.expire_at = ts,
        }
    }

    pub fn is_tomb(&self) -> bool {
        match self {
            Object::String(_) => false,
            Object::List(l) => l.tomb,
            Object::Hash(m) | Object::Set(m) | Object::ZSet(m) => m.tomb,
        }
    }

    pub fn set_tomb(&mut self) {
        match self {
            Object::String(_) => {}
            Object::List(l) => l.tomb = true,
            Object::Hash(m) | Object::Set(m) | Object::ZSet(m) => m.tomb = true,
        }
    }

    /// Number of elements; strings count as one.
    pub fn size(&self) -> u64 {
        match self {
            Object::String(_) => 1,
            Object::List(l) => l.size(),
            Object::Hash(m) | Object::Set(m) | Object::ZSet(m) => m.size,
        }
    }

    pub fn has_expire(&self) -> bool {
        self.expire_at() != 0
    }

    pub fn is_expired(&self, now: u64) -> bool {
        let at = self.expire_at();
        at != 0 && at <= now
    }

    /// Remaining lifetime in milliseconds, clamped at zero.
    pub fn ttl_ms(&self, now: u64) -> u64 {
        self.expire_at().saturating_sub(now)
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = match self {
            Object::String(s) => s.value.len(),
            Object::List(_) => 24,
            _ => 8,
        };
        let mut buf = Vec::with_capacity(HEADER_LEN + body_len);
        buf.push(self.kind() as u8);
        buf.push(self.is_tomb() as u8);
        buf.extend_from_slice(&self.expire_at().to_be_bytes());
        match self {
            Object::String(s) => buf.extend_from_slice(&s.value),
            Object::List(l) => {
                buf.extend_from_slice(&l.head.to_be_bytes());
                buf.extend_from_slice(&l.tail.to_be_bytes());
                buf.extend_from_slice(&l.size().to_be_bytes());
            }
            Object::Hash(m) | Object::Set(m) | Object::ZSet(m) => {
                buf.extend_from_slice(&m.size.to_be_bytes());
            }
        }
        buf
    }

    pub fn decode(raw: &[u8]) -> KvdisResult<Self> {
        if raw.len() < HEADER_LEN {
            return Err(KvdisError::InvalidMeta);
        }
        let kind = ObjectKind::from_byte(raw[0])?;
        let tomb = match raw[1] {
            0 => false,
            1 => true,
            _ => return Err(KvdisError::InvalidMeta),
        };
        let expire_at = read_u64(&raw[2..10])?;
        let body = &raw[HEADER_LEN..];

        let sized = || -> KvdisResult<SizedMeta> {
            if raw.len() != SIZED_LEN {
                return Err(KvdisError::InvalidMeta);
            }
            Ok(SizedMeta {
                expire_at,
                tomb,
                size: read_u64(body)?,
            })
        };

        Ok(match kind {
            ObjectKind::String => {
                if tomb {
                    return Err(KvdisError::InvalidMeta);
                }
                Object::String(StringObject {
                    expire_at,
                    value: body.to_vec(),
                })
            }
            ObjectKind::Hash => Object::Hash(sized()?),
            ObjectKind::Set => Object::Set(sized()?),
            ObjectKind::ZSet => Object::ZSet(sized()?),
            ObjectKind::List => {
                if raw.len() != LIST_LEN {
                    return Err(KvdisError::InvalidMeta);
                }
                let head = read_u64(&body[..8])?;
                let tail = read_u64(&body[8..16])?;
                let size = read_u64(&body[16..24])?;
                if tail < head || tail - head != size {
                    return Err(KvdisError::InvalidMeta);
                }
                Object::List(ListMeta {
                    expire_at,
                    tomb,
                    head,
                    tail,
                })
            }
        })
    }
}

fn read_u64(bytes: &[u8]) -> KvdisResult<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| KvdisError::InvalidMeta)?;
    Ok(u64::from_be_bytes(arr))
}
