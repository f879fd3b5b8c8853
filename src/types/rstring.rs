use crate::error::{KvdisError, KvdisResult};

/// A string value stored inline in its metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringObject {
    pub expire_at: u64,
    pub value: Vec<u8>,
}

impl StringObject {
    pub fn new(value: Vec<u8>) -> Self {
        StringObject {
            expire_at: 0,
            value,
        }
    }

    pub fn with_expire(value: Vec<u8>, expire_at: u64) -> Self {
        StringObject { expire_at, value }
    }

    /// Interpret the value as a signed decimal; an empty value reads as 0.
    pub fn as_i64(&self) -> KvdisResult<i64> {
        parse_i64(&self.value)
    }

    /// Add `step` to the numeric value and store the result back.
    pub fn incr_by(&mut self, step: i64) -> KvdisResult<i64> {
        let current = self.as_i64()?;
        let next = current.checked_add(step).ok_or(KvdisError::NotInteger)?;
        self.value = next.to_string().into_bytes();
        Ok(next)
    }
}

/// Parse a canonical decimal integer. An empty value reads as 0; a sign
/// other than a leading `-`, leading zeros and `-0` are rejected.
pub fn parse_i64(bytes: &[u8]) -> KvdisResult<i64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let digits = bytes.strip_prefix(b"-").unwrap_or(bytes);
    let canonical = match digits {
        [b'0'] => digits.len() == bytes.len(),
        [b'1'..=b'9', rest @ ..] => rest.iter().all(u8::is_ascii_digit),
        _ => false,
    };
    if !canonical {
        return Err(KvdisError::NotInteger);
    }
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(KvdisError::NotInteger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_by() {
        let mut s = StringObject::new(b"10".to_vec());
        assert_eq!(s.incr_by(5).unwrap(), 15);
        assert_eq!(s.value, b"15");
        assert_eq!(s.incr_by(-20).unwrap(), -5);
    }

    #[test]
    fn test_empty_value_counts_as_zero() {
        let mut s = StringObject::new(Vec::new());
        assert_eq!(s.incr_by(1).unwrap(), 1);
    }

    #[test]
    fn test_non_numeric_rejected() {
        let mut s = StringObject::new(b"abc".to_vec());
        assert!(matches!(s.incr_by(1), Err(KvdisError::NotInteger)));
        assert_eq!(s.value, b"abc");
    }

    #[test]
    fn test_only_canonical_integers_parse() {
        assert_eq!(parse_i64(b"0").unwrap(), 0);
        assert_eq!(parse_i64(b"-42").unwrap(), -42);
        assert_eq!(parse_i64(i64::MIN.to_string().as_bytes()).unwrap(), i64::MIN);
        for bad in [&b"+5"[..], b"05", b"-0", b" 5", b"5 ", b"-", b"1e3"] {
            assert!(matches!(parse_i64(bad), Err(KvdisError::NotInteger)), "{bad:?}");
        }
        let mut s = StringObject::new(b"+5".to_vec());
        assert!(s.incr_by(1).is_err());
        assert_eq!(s.value, b"+5");
    }

    #[test]
    fn test_overflow_rejected() {
        let mut s = StringObject::new(i64::MAX.to_string().into_bytes());
        assert!(matches!(s.incr_by(1), Err(KvdisError::NotInteger)));
    }
}
