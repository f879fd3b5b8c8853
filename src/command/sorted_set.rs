use super::{CommandContext, arg_to_i64, bool_reply, bulk_array, count_reply, is_keyword};
use crate::engine::zset::{Limit, ScoredMember};
use crate::error::{KvdisError, KvdisResult};
use crate::resp::RespValue;
use crate::types::sorted_set::{LexBound, ScoreRange, parse_score};

/// Trailing options of the range commands.
#[derive(Debug, Default, PartialEq, Eq)]
struct RangeOptions {
    with_scores: bool,
    limit: Limit,
    /// A negative LIMIT offset selects nothing.
    empty: bool,
}

fn parse_range_options(args: &[Vec<u8>], allow_scores: bool, allow_limit: bool) -> KvdisResult<RangeOptions> {
    let mut opts = RangeOptions::default();
    let mut i = 0;
    while i < args.len() {
        if allow_scores && is_keyword(&args[i], "WITHSCORES") {
            opts.with_scores = true;
            i += 1;
        } else if allow_limit && is_keyword(&args[i], "LIMIT") {
            let (Some(offset), Some(count)) = (args.get(i + 1), args.get(i + 2)) else {
                return Err(KvdisError::SyntaxError);
            };
            let offset = arg_to_i64(offset)?;
            let count = arg_to_i64(count)?;
            opts.empty = offset < 0;
            opts.limit = Limit {
                offset: usize::try_from(offset).unwrap_or(0),
                count: usize::try_from(count).ok(),
            };
            i += 3;
        } else {
            return Err(KvdisError::SyntaxError);
        }
    }
    Ok(opts)
}

fn scored_reply(items: Vec<ScoredMember>, with_scores: bool) -> RespValue {
    let mut out = Vec::with_capacity(if with_scores { items.len() * 2 } else { items.len() });
    for (member, score) in items {
        out.push(RespValue::bulk_string(member));
        if with_scores {
            out.push(RespValue::bulk_string(score.to_string()));
        }
    }
    RespValue::array(out)
}

pub fn zadd(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let rest = &args[1..];
    if rest.len() % 2 != 0 {
        return Err(KvdisError::SyntaxError);
    }
    let entries = rest
        .chunks(2)
        .map(|pair| Ok((parse_score(&pair[0])?, pair[1].clone())))
        .collect::<KvdisResult<Vec<_>>>()?;
    let db = ctx.db();
    Ok(count_reply(ctx.engine.zadd(ctx.txn(), db, &args[0], &entries)?))
}

pub fn zcard(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.zcard(ctx.txn(), db, &args[0])?))
}

pub fn zscore(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(match ctx.engine.zscore(ctx.txn(), db, &args[0], &args[1])? {
        Some(score) => RespValue::bulk_string(score.to_string()),
        None => RespValue::null_bulk_string(),
    })
}

pub fn zrank(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], rev: bool) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(match ctx.engine.zrank(ctx.txn(), db, &args[0], &args[1], rev)? {
        Some(rank) => count_reply(rank),
        None => RespValue::null_bulk_string(),
    })
}

pub fn zincrby(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let delta = parse_score(&args[1])?;
    let db = ctx.db();
    let score = ctx.engine.zincrby(ctx.txn(), db, &args[0], &args[2], delta)?;
    Ok(RespValue::bulk_string(score.to_string()))
}

pub fn zrem(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.zrem(ctx.txn(), db, &args[0], &args[1..])?))
}

/// ZRANGE / ZREVRANGE key start stop [WITHSCORES]
pub fn zrange(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], rev: bool) -> KvdisResult<RespValue> {
    let start = arg_to_i64(&args[1])?;
    let stop = arg_to_i64(&args[2])?;
    let opts = parse_range_options(&args[3..], true, false)?;
    let db = ctx.db();
    let items = ctx.engine.zrange(ctx.txn(), db, &args[0], start, stop, rev)?;
    Ok(scored_reply(items, opts.with_scores))
}

/// ZRANGEBYSCORE key min max / ZREVRANGEBYSCORE key max min, followed by
/// [WITHSCORES] [LIMIT offset count].
pub fn zrange_by_score(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], rev: bool) -> KvdisResult<RespValue> {
    let range = if rev {
        ScoreRange::parse(&args[2], &args[1])?
    } else {
        ScoreRange::parse(&args[1], &args[2])?
    };
    let opts = parse_range_options(&args[3..], true, true)?;
    if opts.empty {
        return Ok(RespValue::array(Vec::new()));
    }
    let db = ctx.db();
    let items = ctx.engine.zrange_by_score(ctx.txn(), db, &args[0], &range, rev, opts.limit)?;
    Ok(scored_reply(items, opts.with_scores))
}

/// ZRANGEBYLEX key min max / ZREVRANGEBYLEX key max min, followed by
/// [LIMIT offset count].
pub fn zrange_by_lex(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], rev: bool) -> KvdisResult<RespValue> {
    let (min, max) = if rev { (&args[2], &args[1]) } else { (&args[1], &args[2]) };
    let min = LexBound::parse(min)?;
    let max = LexBound::parse(max)?;
    let opts = parse_range_options(&args[3..], false, true)?;
    if opts.empty {
        return Ok(RespValue::array(Vec::new()));
    }
    let db = ctx.db();
    let members = ctx.engine.zrange_by_lex(ctx.txn(), db, &args[0], &min, &max, rev, opts.limit)?;
    Ok(bulk_array(members))
}

pub fn zcount(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let range = ScoreRange::parse(&args[1], &args[2])?;
    let db = ctx.db();
    Ok(count_reply(ctx.engine.zcount(ctx.txn(), db, &args[0], &range)?))
}

pub fn zlexcount(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let min = LexBound::parse(&args[1])?;
    let max = LexBound::parse(&args[2])?;
    let db = ctx.db();
    Ok(count_reply(ctx.engine.zlexcount(ctx.txn(), db, &args[0], &min, &max)?))
}

pub fn zremrangebyscore(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let range = ScoreRange::parse(&args[1], &args[2])?;
    let db = ctx.db();
    Ok(count_reply(ctx.engine.zrem_range_by_score(ctx.txn(), db, &args[0], &range)?))
}

pub fn zremrangebylex(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let min = LexBound::parse(&args[1])?;
    let max = LexBound::parse(&args[2])?;
    let db = ctx.db();
    Ok(count_reply(ctx.engine.zrem_range_by_lex(ctx.txn(), db, &args[0], &min, &max)?))
}

pub fn zclear(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.zclear(ctx.txn(), db, &args[0])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testutil::*;

    #[test]
    fn test_zadd_range_by_score_scenario() {
        let mut h = Harness::new();
        assert_eq!(h.run("ZADD z 1 a 2 b"), RespValue::integer(2));
        assert_eq!(h.run("ZRANGEBYSCORE z -inf +inf WITHSCORES"), bulks(&["a", "1", "b", "2"]));
    }

    #[test]
    fn test_score_ranges() {
        let mut h = Harness::new();
        h.run("ZADD z 1 a 2 b 3 c 4 d");
        assert_eq!(h.run("ZRANGEBYSCORE z (1 3"), bulks(&["b", "c"]));
        assert_eq!(h.run("ZREVRANGEBYSCORE z 3 1"), bulks(&["c", "b", "a"]));
        assert_eq!(h.run("ZRANGEBYSCORE z -inf +inf LIMIT 1 2"), bulks(&["b", "c"]));
        assert_eq!(h.run("ZRANGEBYSCORE z -inf +inf LIMIT -1 2"), bulks(&[]));
        assert_eq!(h.run("ZRANGEBYSCORE z -inf +inf LIMIT 1"), RespValue::error("ERR syntax error"));
        assert_eq!(h.run("ZCOUNT z 2 +inf"), RespValue::integer(3));
        assert_eq!(h.run("ZREMRANGEBYSCORE z -inf (2"), RespValue::integer(1));
        assert_eq!(h.run("ZCARD z"), RespValue::integer(3));
        assert_eq!(h.run("ZRANGEBYSCORE z (-inf (+inf"), bulks(&["b", "c", "d"]));
        assert_eq!(h.run("ZCOUNT z (+inf +inf"), RespValue::integer(0));
        assert_eq!(h.run("ZREVRANGEBYSCORE z (+inf (3"), bulks(&["d"]));
    }

    #[test]
    fn test_rank_and_score() {
        let mut h = Harness::new();
        h.run("ZADD z 10 a 20 b 30 c");
        assert_eq!(h.run("ZRANK z b"), RespValue::integer(1));
        assert_eq!(h.run("ZREVRANK z a"), RespValue::integer(2));
        assert_eq!(h.run("ZRANK z nope"), RespValue::null_bulk_string());
        assert_eq!(h.run("ZSCORE z c"), bulk("30"));
        assert_eq!(h.run("ZINCRBY z -25 c"), bulk("5"));
        assert_eq!(h.run("ZRANGE z 0 -1"), bulks(&["c", "a", "b"]));
        assert_eq!(h.run("ZREVRANGE z 0 0 WITHSCORES"), bulks(&["b", "20"]));
        assert_eq!(h.run("ZADD z 1.5 x"), RespValue::error("ERR value is not an integer or out of range"));
        assert_eq!(h.run("ZADD z 1 a 2"), RespValue::error("ERR syntax error"));
        assert_eq!(h.run("ZREM z a b nope"), RespValue::integer(2));
    }

    #[test]
    fn test_lex_ranges() {
        let mut h = Harness::new();
        h.run("ZADD z 0 a 0 b 0 c 0 d");
        assert_eq!(h.run("ZRANGEBYLEX z - +"), bulks(&["a", "b", "c", "d"]));
        assert_eq!(h.run("ZRANGEBYLEX z [b (d"), bulks(&["b", "c"]));
        assert_eq!(h.run("ZREVRANGEBYLEX z + [c"), bulks(&["d", "c"]));
        assert_eq!(h.run("ZRANGEBYLEX z - + LIMIT 1 1"), bulks(&["b"]));
        assert_eq!(h.run("ZLEXCOUNT z (a +"), RespValue::integer(3));
        assert_eq!(
            h.run("ZRANGEBYLEX z a c"),
            RespValue::error("ERR min or max not valid string range item")
        );
        assert_eq!(h.run("ZREMRANGEBYLEX z - [b"), RespValue::integer(2));
        assert_eq!(h.run("ZCLEAR z"), RespValue::integer(1));
        assert_eq!(h.run("ZCARD z"), RespValue::integer(0));
    }
}
