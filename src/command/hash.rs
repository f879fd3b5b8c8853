use super::{CommandContext, bool_reply, bulk_array, bulk_or_null, count_reply};
use crate::error::{KvdisError, KvdisResult};
use crate::resp::RespValue;

fn field_pairs(args: &[Vec<u8>], cmd: &str) -> KvdisResult<Vec<(Vec<u8>, Vec<u8>)>> {
    if args.len() % 2 != 0 {
        return Err(KvdisError::WrongArgCount(cmd.into()));
    }
    Ok(args
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

pub fn hset(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let pairs = field_pairs(&args[1..], "hset")?;
    let db = ctx.db();
    Ok(count_reply(ctx.engine.hset(ctx.txn(), db, &args[0], &pairs)?))
}

pub fn hsetnx(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.hsetnx(ctx.txn(), db, &args[0], &args[1], &args[2])?))
}

pub fn hmset(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let pairs = field_pairs(&args[1..], "hmset")?;
    let db = ctx.db();
    ctx.engine.hmset(ctx.txn(), db, &args[0], &pairs)?;
    Ok(RespValue::ok())
}

pub fn hget(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_or_null(ctx.engine.hget(ctx.txn(), db, &args[0], &args[1])?))
}

pub fn hmget(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    let values = ctx.engine.hmget(ctx.txn(), db, &args[0], &args[1..])?;
    Ok(RespValue::array(values.into_iter().map(bulk_or_null).collect()))
}

pub fn hstrlen(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.hstrlen(ctx.txn(), db, &args[0], &args[1])?))
}

pub fn hexists(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.hexists(ctx.txn(), db, &args[0], &args[1])?))
}

pub fn hlen(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.hlen(ctx.txn(), db, &args[0])?))
}

pub fn hdel(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.hdel(ctx.txn(), db, &args[0], &args[1..])?))
}

pub fn hkeys(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_array(ctx.engine.hkeys(ctx.txn(), db, &args[0])?))
}

pub fn hvals(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_array(ctx.engine.hvals(ctx.txn(), db, &args[0])?))
}

pub fn hgetall(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    let pairs = ctx.engine.hgetall(ctx.txn(), db, &args[0])?;
    let flat = pairs
        .into_iter()
        .flat_map(|(field, value)| [field, value])
        .collect();
    Ok(bulk_array(flat))
}

pub fn hclear(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.hclear(ctx.txn(), db, &args[0])?))
}
