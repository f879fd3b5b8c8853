use super::{CommandContext, arg_to_i64, bool_reply, bulk_array, bulk_or_null, count_reply};
use crate::error::KvdisResult;
use crate::resp::RespValue;

pub fn lpush(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.lpush(ctx.txn(), db, &args[0], &args[1..])?))
}

pub fn rpush(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.rpush(ctx.txn(), db, &args[0], &args[1..])?))
}

pub fn lpop(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_or_null(ctx.engine.lpop(ctx.txn(), db, &args[0])?))
}

pub fn rpop(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_or_null(ctx.engine.rpop(ctx.txn(), db, &args[0])?))
}

pub fn llen(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.llen(ctx.txn(), db, &args[0])?))
}

pub fn lindex(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let index = arg_to_i64(&args[1])?;
    let db = ctx.db();
    Ok(bulk_or_null(ctx.engine.lindex(ctx.txn(), db, &args[0], index)?))
}

pub fn lrange(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let start = arg_to_i64(&args[1])?;
    let stop = arg_to_i64(&args[2])?;
    let db = ctx.db();
    Ok(bulk_array(ctx.engine.lrange(ctx.txn(), db, &args[0], start, stop)?))
}

pub fn lset(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let index = arg_to_i64(&args[1])?;
    let db = ctx.db();
    ctx.engine.lset(ctx.txn(), db, &args[0], index, &args[2])?;
    Ok(RespValue::ok())
}

pub fn ltrim(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let start = arg_to_i64(&args[1])?;
    let stop = arg_to_i64(&args[2])?;
    let db = ctx.db();
    ctx.engine.ltrim(ctx.txn(), db, &args[0], start, stop)?;
    Ok(RespValue::ok())
}

pub fn ldel(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.ldel(ctx.txn(), db, &args[0])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testutil::*;

    #[test]
    fn test_rpush_lrange_lpop_scenario() {
        let mut h = Harness::new();
        assert_eq!(h.run("RPUSH l a b c"), RespValue::integer(3));
        assert_eq!(h.run("LRANGE l 0 -1"), bulks(&["a", "b", "c"]));
        assert_eq!(h.run("LPOP l"), bulk("a"));
        assert_eq!(h.run("LLEN l"), RespValue::integer(2));
    }

    #[test]
    fn test_index_set_trim() {
        let mut h = Harness::new();
        h.run("LPUSH l c b a");
        assert_eq!(h.run("LINDEX l -1"), bulk("c"));
        assert_eq!(h.run("LINDEX l 5"), RespValue::null_bulk_string());
        assert_eq!(h.run("LSET l 1 B"), RespValue::ok());
        assert_eq!(h.run("LSET l 7 x"), RespValue::error("ERR index out of range"));
        assert_eq!(h.run("LSET nope 0 x"), RespValue::error("ERR no such key"));
        assert_eq!(h.run("LTRIM l 1 -1"), RespValue::ok());
        assert_eq!(h.run("LRANGE l 0 -1"), bulks(&["B", "c"]));
        assert_eq!(h.run("RPOP l"), bulk("c"));
        assert_eq!(h.run("LDEL l"), RespValue::integer(1));
        assert_eq!(h.run("RPOP l"), RespValue::null_bulk_string());
    }

    #[test]
    fn test_bad_index() {
        let mut h = Harness::new();
        assert_eq!(
            h.run("LRANGE l a 1"),
            RespValue::error("ERR value is not an integer or out of range")
        );
    }
}
