//! Score and lexicographic range bounds for sorted sets.
//!
//! Scores are signed 64-bit integers. The two values at each extreme of the
//! `i64` domain are reserved so that `-inf`/`+inf` and exclusive bounds never
//! overflow.

use crate::error::{KvdisError, KvdisResult};

pub const SCORE_MIN: i64 = i64::MIN + 2;
pub const SCORE_MAX: i64 = i64::MAX - 1;

/// Parse a member score given to ZADD or ZINCRBY.
pub fn parse_score(arg: &[u8]) -> KvdisResult<i64> {
    let score = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(KvdisError::NotInteger)?;
    if !(SCORE_MIN..=SCORE_MAX).contains(&score) {
        return Err(KvdisError::NotInteger);
    }
    Ok(score)
}

/// Inclusive score interval resolved from a `min max` argument pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: i64,
    pub max: i64,
}

impl ScoreRange {
    /// Parse bounds such as `-inf`, `(5`, `10`, `+inf`.
    pub fn parse(min: &[u8], max: &[u8]) -> KvdisResult<Self> {
        Ok(ScoreRange {
            min: parse_bound(min, true)?,
            max: parse_bound(max, false)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn contains(&self, score: i64) -> bool {
        self.min <= score && score <= self.max
    }
}

fn parse_bound(arg: &[u8], is_min: bool) -> KvdisResult<i64> {
    let text = std::str::from_utf8(arg).map_err(|_| KvdisError::NotInteger)?;
    let (exclusive, body) = match text.strip_prefix('(') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let infinity = match body.to_ascii_lowercase().as_str() {
        "-inf" => Some(false),
        "+inf" | "inf" => Some(true),
        _ => None,
    };
    if let Some(positive) = infinity {
        // Nothing lies below `(-inf` or above `(+inf`; the out-of-domain
        // values make the range empty.
        return Ok(match (positive, exclusive, is_min) {
            (false, true, false) => SCORE_MIN - 1,
            (true, true, true) => SCORE_MAX + 1,
            (false, _, _) => SCORE_MIN,
            (true, _, _) => SCORE_MAX,
        });
    }
    let value: i64 = body.parse().map_err(|_| KvdisError::NotInteger)?;
    let value = match (exclusive, is_min) {
        (true, true) => value.saturating_add(1),
        (true, false) => value.saturating_sub(1),
        (false, _) => value,
    };
    Ok(value.clamp(SCORE_MIN, SCORE_MAX))
}

/// One end of a ZRANGEBYLEX interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    NegInf,
    PosInf,
    Inclusive(Vec<u8>),
    Exclusive(Vec<u8>),
}

impl LexBound {
    pub fn parse(arg: &[u8]) -> KvdisResult<Self> {
        match arg.first() {
            Some(b'-') if arg.len() == 1 => Ok(LexBound::NegInf),
            Some(b'+') if arg.len() == 1 => Ok(LexBound::PosInf),
            Some(b'[') => Ok(LexBound::Inclusive(arg[1..].to_vec())),
            Some(b'(') => Ok(LexBound::Exclusive(arg[1..].to_vec())),
            _ => Err(KvdisError::Generic(
                "min or max not valid string range item".into(),
            )),
        }
    }
}
