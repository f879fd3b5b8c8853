use super::{CommandContext, arg_to_i64, bool_reply, count_reply};
use crate::error::KvdisResult;
use crate::resp::RespValue;
use crate::types::ObjectKind;

/// Unit of a time argument or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
}

impl TimeUnit {
    pub fn to_millis(self, n: u64) -> u64 {
        match self {
            TimeUnit::Seconds => n.saturating_mul(1000),
            TimeUnit::Millis => n,
        }
    }

    fn to_millis_signed(self, n: i64) -> i64 {
        match self {
            TimeUnit::Seconds => n.saturating_mul(1000),
            TimeUnit::Millis => n,
        }
    }
}

pub fn del(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.delete(ctx.txn(), db, args)?))
}

pub fn exists(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(count_reply(ctx.engine.exists(ctx.txn(), db, args)?))
}

pub fn key_type(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    let name = ctx
        .engine
        .key_type(ctx.txn(), db, &args[0])?
        .map_or("none", |kind| kind.type_name());
    Ok(RespValue::simple_string(name))
}

/// The EXPIRE family. `absolute` selects the *AT variants; `kind` restricts
/// the type-scoped variants to one kind of value.
pub fn expire(
    ctx: &mut CommandContext<'_>,
    args: &[Vec<u8>],
    kind: Option<ObjectKind>,
    unit: TimeUnit,
    absolute: bool,
) -> KvdisResult<RespValue> {
    let n = unit.to_millis_signed(arg_to_i64(&args[1])?);
    let db = ctx.db();
    let found = if absolute {
        let at = u64::try_from(n).unwrap_or(0);
        ctx.engine.pexpire_at(ctx.txn(), db, &args[0], kind, at)?
    } else {
        ctx.engine.pexpire(ctx.txn(), db, &args[0], kind, n)?
    };
    Ok(bool_reply(found))
}

pub fn ttl(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], kind: Option<ObjectKind>, unit: TimeUnit) -> KvdisResult<RespValue> {
    let db = ctx.db();
    let remaining = match unit {
        TimeUnit::Seconds => ctx.engine.ttl(ctx.txn(), db, &args[0], kind)?,
        TimeUnit::Millis => ctx.engine.pttl(ctx.txn(), db, &args[0], kind)?,
    };
    Ok(RespValue::integer(remaining))
}

pub fn persist(ctx: &mut CommandContext<'_>, args: &[Vec<u8>], kind: Option<ObjectKind>) -> KvdisResult<RespValue> {
    let db = ctx.db();
    Ok(bool_reply(ctx.engine.persist(ctx.txn(), db, &args[0], kind)?))
}
