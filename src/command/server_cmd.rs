use super::{CommandContext, arg_to_i64, is_keyword};
use crate::config::Config;
use crate::error::{KvdisError, KvdisResult};
use crate::resp::RespValue;
use tracing::info;

pub fn ping(_ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    match args {
        [] => Ok(RespValue::simple_string("PONG")),
        [msg] => Ok(RespValue::bulk_string(msg.clone())),
        _ => Err(KvdisError::WrongArgCount("ping".into())),
    }
}

pub fn echo(_ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    Ok(RespValue::bulk_string(args[0].clone()))
}

pub fn quit(ctx: &mut CommandContext<'_>, _args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    ctx.client.should_close = true;
    Ok(RespValue::ok())
}

pub fn auth(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let config = ctx.config.blocking_read();
    let Some(expected) = config.requirepass.as_deref() else {
        return Err(KvdisError::Generic(
            "AUTH <password> called without any password configured for the default user. \
             Are you sure your configuration is correct?"
                .into(),
        ));
    };
    if args[0] != expected.as_bytes() {
        ctx.client.authenticated = false;
        return Err(KvdisError::InvalidPassword);
    }
    ctx.client.authenticated = true;
    Ok(RespValue::ok())
}

pub fn select(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let index = arg_to_i64(&args[0])?;
    let db = u8::try_from(index)
        .ok()
        .filter(|db| *db < ctx.engine.databases())
        .ok_or(KvdisError::InvalidDb)?;
    ctx.client.db = db;
    Ok(RespValue::ok())
}

pub fn flushdb(ctx: &mut CommandContext<'_>, _args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let db = ctx.db();
    ctx.engine.flush_db(ctx.txn(), db)?;
    info!("client {} flushed db {}", ctx.client.id, ctx.db());
    Ok(RespValue::ok())
}

pub fn flushall(ctx: &mut CommandContext<'_>, _args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    ctx.engine.flush_all(ctx.txn())?;
    Ok(RespValue::ok())
}

pub fn client(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let sub = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match (sub.as_str(), &args[1..]) {
        ("ID", []) => Ok(RespValue::integer(ctx.client.id as i64)),
        ("GETNAME", []) => Ok(ctx
            .client
            .name
            .clone()
            .map_or_else(RespValue::null_bulk_string, RespValue::bulk_string)),
        ("SETNAME", [name]) => {
            if name.iter().any(|b| *b == b' ' || *b == b'\n') {
                return Err(KvdisError::Generic(
                    "Client names cannot contain spaces, newlines or special characters.".into(),
                ));
            }
            ctx.client.name = (!name.is_empty()).then(|| name.clone());
            Ok(RespValue::ok())
        }
        // Library metadata sent by client libraries on connect.
        ("SETINFO", [_, _]) => Ok(RespValue::ok()),
        ("ID" | "GETNAME" | "SETNAME" | "SETINFO", _) => {
            Err(KvdisError::WrongArgCount(format!("client|{}", sub.to_ascii_lowercase())))
        }
        _ => Err(KvdisError::Generic(format!(
            "unknown subcommand '{}'. Try CLIENT ID, CLIENT GETNAME or CLIENT SETNAME.",
            String::from_utf8_lossy(&args[0])
        ))),
    }
}

/// CONFIG GET name [name ...]; `*` lists every parameter.
pub fn config(ctx: &mut CommandContext<'_>, args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    if !is_keyword(&args[0], "GET") {
        return Err(KvdisError::Generic(format!(
            "unknown subcommand '{}'. Try CONFIG GET.",
            String::from_utf8_lossy(&args[0])
        )));
    }
    let config = ctx.config.blocking_read();
    let mut out = Vec::new();
    for pattern in &args[1..] {
        let pattern = String::from_utf8_lossy(pattern).to_ascii_lowercase();
        let names: Vec<String> = if pattern == "*" {
            Config::parameter_names()
        } else {
            vec![pattern]
        };
        for name in names {
            if let Some(value) = config.get(&name) {
                out.push(RespValue::bulk_string(name.into_bytes()));
                out.push(RespValue::bulk_string(value.into_bytes()));
            }
        }
    }
    Ok(RespValue::array(out))
}
