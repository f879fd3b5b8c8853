use super::key::TimeUnit;
use super::{CommandContext, arg_to_i64, bulk_or_null, count_reply, is_keyword};
use crate::engine::string::SetOptions;
use crate::error::{KvdisError, KvdisResult};
use crate::resp::RespValue;

fn invalid_expire(cmd: &str) -> KvdisError {
    KvdisError::Generic(format!("invalid expire time in '{cmd}' command"))
}

/// Parse the options following `SET key value`. When EX/PX appear more than
/// once the last one wins.
pub fn parse_set_options(args: &[Vec<u8>]) -> KvdisResult<SetOptions> {
    let mut opts = SetOptions::default();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if is_keyword(arg, "NX") {
            opts.nx = true;
        } else if is_keyword(arg, "XX") {
            opts.xx = true;
        } else if is_keyword(arg, "EX") || is_keyword(arg, "PX") {
            let value = args.get(i + 1).ok_or(KvdisError::SyntaxError)?;
            let n = arg_to_i64(value)?;
            if n <= 0 {
                return Err(invalid_expire("set"));
            }
            let unit = if is_keyword(arg, "EX") { TimeUnit::Seconds } else { TimeUnit::Millis };
            opts.expire_ms = Some(unit.to_millis(n as u64));
            i += 1;
        } else {
            return Err(KvdisError::SyntaxError);
        }
        i += 1;
    }
    if opts.nx && opts.xx {
        return Err(KvdisError::SyntaxError);
    }
    Ok(opts)
}

pub fn get(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bulk_or_null(ctx.engine.get(ctx.txn(), db, &args[0])?))
}

pub fn set(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let opts = parse_set_options(&args[2..])?;
    let db = ctx.db();
    if ctx.engine.set_with_param(ctx.txn(), db, &args[0], &args[1], opts)? {
        Ok(RespValue::ok())
    } else {
        Ok(RespValue::null_bulk_string())
    }
}

/// SETEX / PSETEX key ttl value
pub fn setex(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], unit: TimeUnit) -> KvdisResult<RespValue> {
    let n = arg_to_i64(&args[1])?;
    if n <= 0 {
        let name = match unit {
            TimeUnit::Seconds => "setex",
            TimeUnit::Millis => "psetex",
        };
        return Err(invalid_expire(name));
    }
    let opts = SetOptions {
        expire_ms: Some(unit.to_millis(n as u64)),
        ..Default::default()
    };
    let db = ctx.db();
    ctx.engine.set_with_param(ctx.txn(), db, &args[0], &args[2], opts)?;
    Ok(RespValue::ok())
}

pub fn setnx(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let opts = SetOptions {
        nx: true,
        ..Default::default()
    };
    let db = ctx.db();
    let written = ctx.engine.set_with_param(ctx.txn(), db, &args[0], &args[1], opts)?;
    Ok(RespValue::integer(i64::from(written)))
}

pub fn mget(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    let values = ctx.engine.mget(ctx.txn(), db, args)?;
    Ok(RespValue::array(values.into_iter().map(bulk_or_null).collect()))
}

pub fn mset(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    if args.len() % 2 != 0 {
        return Err(KvdisError::WrongArgCount("mset".into()));
    }
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = args
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let db = ctx.db();
    ctx.engine.mset(ctx.txn(), db, &pairs)?;
    Ok(RespValue::ok())
}

pub fn strlen(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.strlen(ctx.txn(), db, &args[0])?))
}

pub fn incr_by(ctx: &mut CommandContext<'_>, key: &[u8], step: i64) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(RespValue::integer(ctx.engine.incr_by(ctx.txn(), db, key, step)?))
}

/// INCRBY / DECRBY key step
pub fn incr_by_arg(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], negate: bool) -> KvdisResult<RespValue> {
    let step = arg_to_i64(&args[1])?;
    let step = if negate {
        step.checked_neg().ok_or(KvdisError::NotInteger)?
    } else {
        step
    };
    incr_by(ctx, &args[0], step)
}
