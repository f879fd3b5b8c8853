use super::{CommandContext, bool_reply, bulk_array, count_reply};
use crate::engine::set::SetOp;
use crate::error::KvdisResult;
use crate::resp::RespValue;

pub fn sadd(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.sadd(ctx.txn(), db, &args[0], &args[1..])?))
}

pub fn srem(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.srem(ctx.txn(), db, &args[0], &args[1..])?))
}

pub fn scard(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.scard(ctx.txn(), db, &args[0])?))
}

pub fn sismember(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.sismember(ctx.txn(), db, &args[0], &args[1])?))
}

pub fn smembers(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_array(ctx.engine.smembers(ctx.txn(), db, &args[0])?))
}

/// SDIFF / SINTER / SUNION
pub fn combine(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], op: SetOp) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_array(ctx.engine.set_op(ctx.txn(), db, args, op)?))
}

/// SDIFFSTORE / SINTERSTORE / SUNIONSTORE
pub fn combine_store(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], op: SetOp) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.set_op_store(ctx.txn(), db, &args[0], &args[1..], op)?))
}

pub fn sclear(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.sclear(ctx.txn(), db, &args[0])?))
}
