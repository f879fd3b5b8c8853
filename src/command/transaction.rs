use super::{CommandContext, dispatch};
use crate::error::{KvdisError, KvdisResult};
use crate::resp::RespValue;
use tracing::debug;

pub fn multi(ctx: &mut CommandContext<'_>, _args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    if ctx.client.in_multi {
        return Err(KvdisError::NestedMulti);
    }
    ctx.client.in_multi = true;
    ctx.client.multi_queue.clear();
    ctx.client.multi_error = false;
    Ok(RespValue::ok())
}

/// Replay the queued commands inside one store transaction. A write
/// conflict at commit re-runs the whole queue against a fresh snapshot.
/// Errors of individual commands become error replies in the result array.
pub fn exec(ctx: &mut CommandContext<'_>, _args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    if !ctx.client.in_multi {
        return Err(KvdisError::ExecWithoutMulti);
    }
    ctx.client.in_multi = false;
    let queue = std::mem::take(&mut ctx.client.multi_queue);
    if std::mem::take(&mut ctx.client.multi_error) {
        return Err(KvdisError::ExecAbort);
    }

    let engine = ctx.engine;
    let config = ctx.config;
    let client = &mut *ctx.client;
    let start_db = client.db;
    let mut attempts = 0;
    let replies = engine.store().run_in_txn(|txn| {
        attempts += 1;
        client.db = start_db;
        let mut inner = CommandContext {
            engine,
            config,
            client: &mut *client,
            txn: Some(txn),
        };
        let replies: Vec<RespValue> = queue
            .iter()
            .map(|argv| dispatch(&mut inner, argv).unwrap_or_else(|e| RespValue::error(e.to_resp_error())))
            .collect();
        Ok(replies)
    })?;
    if attempts > 1 {
        debug!("client {} transaction committed after {attempts} attempts", client.id);
    }
    Ok(RespValue::array(replies))
}

pub fn discard(ctx: &mut CommandContext<'_>, _args: &[Vec<u8>]) -> KvdisResult<RespValue> {
    if !ctx.client.in_multi {
        return Err(KvdisError::DiscardWithoutMulti);
    }
    ctx.client.in_multi = false;
    ctx.client.multi_queue.clear();
    ctx.client.multi_error = false;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testutil::*;

    #[test]
    fn test_multi_exec() {
        let mut h = Harness::new();
        assert_eq!(h.run("MULTI"), RespValue::ok());
        assert_eq!(h.run("SET a 1"), RespValue::simple_string("QUEUED"));
        assert_eq!(h.run("INCR a"), RespValue::simple_string("QUEUED"));
        assert_eq!(h.run("RPUSH a x"), RespValue::simple_string("QUEUED"));
        assert_eq!(h.run("GET a"), RespValue::simple_string("QUEUED"));
        // Nothing is visible before EXEC.
        assert!(h.engine.get(None, 0, b"a").unwrap().is_none());
        assert_eq!(
            h.run("EXEC"),
            RespValue::array(vec![
                RespValue::ok(),
                RespValue::integer(2),
                RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value"),
                bulk("2"),
            ])
        );
        assert_eq!(h.run("GET a"), bulk("2"));
    }

    #[test]
    fn test_exec_sees_select() {
        let mut h = Harness::new();
        h.run("MULTI");
        h.run("SELECT 2");
        h.run("SET k v");
        h.run("EXEC");
        assert_eq!(h.run("GET k"), bulk("v"));
        h.run("SELECT 0");
        assert_eq!(h.run("GET k"), RespValue::null_bulk_string());
    }

    #[test]
    fn test_flushdb_in_exec_orders_with_queued_writes() {
        let mut h = Harness::new();
        h.run("SET old v");
        h.run("MULTI");
        h.run("SET a 1");
        h.run("FLUSHDB");
        h.run("GET old");
        h.run("SET b 2");
        assert_eq!(
            h.run("EXEC"),
            RespValue::array(vec![
                RespValue::ok(),
                RespValue::ok(),
                RespValue::null_bulk_string(),
                RespValue::ok(),
            ])
        );
        assert_eq!(h.run("GET a"), RespValue::null_bulk_string());
        assert_eq!(h.run("GET old"), RespValue::null_bulk_string());
        assert_eq!(h.run("GET b"), bulk("2"));
    }

    #[test]
    fn test_flushall_in_exec_and_discarded_flush() {
        let mut h = Harness::new();
        h.run("SELECT 1");
        h.run("SET x 1");
        h.run("SELECT 0");
        h.run("SET old v");

        h.run("MULTI");
        h.run("FLUSHDB");
        assert_eq!(h.run("DISCARD"), RespValue::ok());
        assert_eq!(h.run("GET old"), bulk("v"));

        h.run("MULTI");
        h.run("HSET h f v");
        h.run("FLUSHALL");
        h.run("SET b 2");
        h.run("EXEC");
        assert_eq!(h.run("EXISTS h old"), RespValue::integer(0));
        assert_eq!(h.run("GET b"), bulk("2"));
        h.run("SELECT 1");
        assert_eq!(h.run("GET x"), RespValue::null_bulk_string());
    }

    #[test]
    fn test_discard_and_errors() {
        let mut h = Harness::new();
        assert_eq!(h.run("EXEC"), RespValue::error("ERR EXEC without MULTI"));
        assert_eq!(h.run("DISCARD"), RespValue::error("ERR DISCARD without MULTI"));
        h.run("MULTI");
        assert_eq!(h.run("MULTI"), RespValue::error("ERR MULTI calls can not be nested"));
        h.run("SET k v");
        assert_eq!(h.run("DISCARD"), RespValue::ok());
        assert_eq!(h.run("GET k"), RespValue::null_bulk_string());
    }

    #[test]
    fn test_exec_abort_after_queue_error() {
        let mut h = Harness::new();
        h.run("MULTI");
        h.run("SET k v");
        assert!(matches!(h.run("GET"), RespValue::Error(_)));
        assert!(matches!(h.run("BOGUS"), RespValue::Error(_)));
        assert_eq!(
            h.run("EXEC"),
            RespValue::error("EXECABORT Transaction discarded because of previous errors.")
        );
        assert_eq!(h.run("GET k"), RespValue::null_bulk_string());
    }
}
