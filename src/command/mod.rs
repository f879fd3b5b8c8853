pub mod hash;
pub mod key;
pub mod list;
pub mod server_cmd;
pub mod set;
pub mod sorted_set;
pub mod string;
pub mod transaction;

use crate::config::SharedConfig;
use crate::connection::ClientState;
use crate::engine::Engine;
use crate::engine::set::SetOp;
use crate::error::{KvdisError, KvdisResult};
use crate::resp::RespValue;
use crate::store::Transaction;
use crate::types::ObjectKind;
use key::TimeUnit;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Everything a handler may touch while running one command.
pub struct CommandContext<'a> {
    pub engine: &'a Engine,
    pub config: &'a SharedConfig,
    pub client: &'a mut ClientState,
    /// Set while EXEC replays a queued transaction.
    pub txn: Option<&'a mut Transaction>,
}

impl<'a> CommandContext<'a> {
    pub fn new(engine: &'a Engine, config: &'a SharedConfig, client: &'a mut ClientState) -> Self {
        CommandContext {
            engine,
            config,
            client,
            txn: None,
        }
    }

    /// Reborrow of the active transaction for one engine call.
    pub fn txn(&mut self) -> Option<&mut Transaction> {
        self.txn.as_deref_mut()
    }

    pub fn db(&self) -> u8 {
        self.client.db
    }
}

/// Handlers receive the arguments after the command name.
pub type Handler = fn(&mut CommandContext<'_>, &[Vec<u8>]) -> KvdisResult<RespValue>;

pub struct CommandEntry {
    pub name: &'static str,
    /// Redis convention: counts the command name, negative means "at least".
    pub arity: i32,
    pub handler: Handler,
    /// Accepted before AUTH.
    pub no_auth: bool,
    /// Runs immediately inside MULTI instead of being queued.
    pub immediate: bool,
}

impl CommandEntry {
    fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i64;
        let arity = self.arity as i64;
        if arity >= 0 { argc == arity } else { argc >= -arity }
    }

    fn no_auth(mut self) -> Self {
        self.no_auth = true;
        self
    }

    fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

fn cmd(name: &'static str, arity: i32, handler: Handler) -> CommandEntry {
    CommandEntry {
        name,
        arity,
        handler,
        no_auth: false,
        immediate: false,
    }
}

fn command_table() -> Vec<CommandEntry> {
    use ObjectKind::{Hash, List, Set, ZSet};
    use TimeUnit::{Millis, Seconds};
    vec![
        // Connection and server
        cmd("PING", -1, server_cmd::ping),
        cmd("ECHO", 2, server_cmd::echo),
        cmd("QUIT", 1, server_cmd::quit).no_auth().immediate(),
        cmd("AUTH", 2, server_cmd::auth).no_auth().immediate(),
        cmd("SELECT", 2, server_cmd::select),
        cmd("FLUSHDB", 1, server_cmd::flushdb),
        cmd("FLUSHALL", 1, server_cmd::flushall),
        cmd("CONFIG", -3, server_cmd::config),
        cmd("CLIENT", -2, server_cmd::client),
        // Transactions
        cmd("MULTI", 1, transaction::multi).immediate(),
        cmd("EXEC", 1, transaction::exec).immediate(),
        cmd("DISCARD", 1, transaction::discard).immediate(),
        // Strings
        cmd("GET", 2, string::get),
        cmd("SET", -3, string::set),
        cmd("SETEX", 4, |c, a| string::setex(c, a, Seconds)),
        cmd("PSETEX", 4, |c, a| string::setex(c, a, Millis)),
        cmd("SETNX", 3, string::setnx),
        cmd("MGET", -2, string::mget),
        cmd("MSET", -3, string::mset),
        cmd("STRLEN", 2, string::strlen),
        cmd("INCR", 2, |c, a| string::incr_by(c, &a[0], 1)),
        cmd("DECR", 2, |c, a| string::incr_by(c, &a[0], -1)),
        cmd("INCRBY", 3, |c, a| string::incr_by_arg(c, a, false)),
        cmd("DECRBY", 3, |c, a| string::incr_by_arg(c, a, true)),
        // Hashes
        cmd("HSET", -4, hash::hset),
        cmd("HSETNX", 4, hash::hsetnx),
        cmd("HMSET", -4, hash::hmset),
        cmd("HGET", 3, hash::hget),
        cmd("HMGET", -3, hash::hmget),
        cmd("HSTRLEN", 3, hash::hstrlen),
        cmd("HEXISTS", 3, hash::hexists),
        cmd("HLEN", 2, hash::hlen),
        cmd("HDEL", -3, hash::hdel),
        cmd("HKEYS", 2, hash::hkeys),
        cmd("HVALS", 2, hash::hvals),
        cmd("HGETALL", 2, hash::hgetall),
        cmd("HCLEAR", 2, hash::hclear),
        // Lists
        cmd("LPUSH", -3, list::lpush),
        cmd("RPUSH", -3, list::rpush),
        cmd("LPOP", 2, list::lpop),
        cmd("RPOP", 2, list::rpop),
        cmd("LLEN", 2, list::llen),
        cmd("LINDEX", 3, list::lindex),
        cmd("LRANGE", 4, list::lrange),
        cmd("LSET", 4, list::lset),
        cmd("LTRIM", 4, list::ltrim),
        cmd("LDEL", 2, list::ldel),
        // Sets
        cmd("SADD", -3, set::sadd),
        cmd("SREM", -3, set::srem),
        cmd("SCARD", 2, set::scard),
        cmd("SISMEMBER", 3, set::sismember),
        cmd("SMEMBERS", 2, set::smembers),
        cmd("SDIFF", -2, |c, a| set::combine(c, a, SetOp::Diff)),
        cmd("SINTER", -2, |c, a| set::combine(c, a, SetOp::Inter)),
        cmd("SUNION", -2, |c, a| set::combine(c, a, SetOp::Union)),
        cmd("SDIFFSTORE", -3, |c, a| set::combine_store(c, a, SetOp::Diff)),
        cmd("SINTERSTORE", -3, |c, a| set::combine_store(c, a, SetOp::Inter)),
        cmd("SUNIONSTORE", -3, |c, a| set::combine_store(c, a, SetOp::Union)),
        cmd("SCLEAR", 2, set::sclear),
        // Sorted sets
        cmd("ZADD", -4, sorted_set::zadd),
        cmd("ZCARD", 2, sorted_set::zcard),
        cmd("ZSCORE", 3, sorted_set::zscore),
        cmd("ZRANK", 3, |c, a| sorted_set::zrank(c, a, false)),
        cmd("ZREVRANK", 3, |c, a| sorted_set::zrank(c, a, true)),
        cmd("ZINCRBY", 4, sorted_set::zincrby),
        cmd("ZREM", -3, sorted_set::zrem),
        cmd("ZRANGE", -4, |c, a| sorted_set::zrange(c, a, false)),
        cmd("ZREVRANGE", -4, |c, a| sorted_set::zrange(c, a, true)),
        cmd("ZRANGEBYSCORE", -4, |c, a| sorted_set::zrange_by_score(c, a, false)),
        cmd("ZREVRANGEBYSCORE", -4, |c, a| sorted_set::zrange_by_score(c, a, true)),
        cmd("ZRANGEBYLEX", -4, |c, a| sorted_set::zrange_by_lex(c, a, false)),
        cmd("ZREVRANGEBYLEX", -4, |c, a| sorted_set::zrange_by_lex(c, a, true)),
        cmd("ZCOUNT", 4, sorted_set::zcount),
        cmd("ZLEXCOUNT", 4, sorted_set::zlexcount),
        cmd("ZREMRANGEBYSCORE", 4, sorted_set::zremrangebyscore),
        cmd("ZREMRANGEBYLEX", 4, sorted_set::zremrangebylex),
        cmd("ZCLEAR", 2, sorted_set::zclear),
        // Keys
        cmd("DEL", -2, key::del),
        cmd("EXISTS", -2, key::exists),
        cmd("TYPE", 2, key::key_type),
        cmd("EXPIRE", 3, |c, a| key::expire(c, a, None, Seconds, false)),
        cmd("PEXPIRE", 3, |c, a| key::expire(c, a, None, Millis, false)),
        cmd("EXPIREAT", 3, |c, a| key::expire(c, a, None, Seconds, true)),
        cmd("PEXPIREAT", 3, |c, a| key::expire(c, a, None, Millis, true)),
        cmd("TTL", 2, |c, a| key::ttl(c, a, None, Seconds)),
        cmd("PTTL", 2, |c, a| key::ttl(c, a, None, Millis)),
        cmd("PERSIST", 2, |c, a| key::persist(c, a, None)),
        // Type-scoped expiration
        cmd("LEXPIRE", 3, |c, a| key::expire(c, a, Some(List), Seconds, false)),
        cmd("LPEXPIRE", 3, |c, a| key::expire(c, a, Some(List), Millis, false)),
        cmd("LEXPIREAT", 3, |c, a| key::expire(c, a, Some(List), Seconds, true)),
        cmd("LPEXPIREAT", 3, |c, a| key::expire(c, a, Some(List), Millis, true)),
        cmd("LTTL", 2, |c, a| key::ttl(c, a, Some(List), Seconds)),
        cmd("LPTTL", 2, |c, a| key::ttl(c, a, Some(List), Millis)),
        cmd("LPERSIST", 2, |c, a| key::persist(c, a, Some(List))),
        cmd("HEXPIRE", 3, |c, a| key::expire(c, a, Some(Hash), Seconds, false)),
        cmd("HPEXPIRE", 3, |c, a| key::expire(c, a, Some(Hash), Millis, false)),
        cmd("HEXPIREAT", 3, |c, a| key::expire(c, a, Some(Hash), Seconds, true)),
        cmd("HPEXPIREAT", 3, |c, a| key::expire(c, a, Some(Hash), Millis, true)),
        cmd("HTTL", 2, |c, a| key::ttl(c, a, Some(Hash), Seconds)),
        cmd("HPTTL", 2, |c, a| key::ttl(c, a, Some(Hash), Millis)),
        cmd("HPERSIST", 2, |c, a| key::persist(c, a, Some(Hash))),
        cmd("SEXPIRE", 3, |c, a| key::expire(c, a, Some(Set), Seconds, false)),
        cmd("SPEXPIRE", 3, |c, a| key::expire(c, a, Some(Set), Millis, false)),
        cmd("SEXPIREAT", 3, |c, a| key::expire(c, a, Some(Set), Seconds, true)),
        cmd("SPEXPIREAT", 3, |c, a| key::expire(c, a, Some(Set), Millis, true)),
        cmd("STTL", 2, |c, a| key::ttl(c, a, Some(Set), Seconds)),
        cmd("SPTTL", 2, |c, a| key::ttl(c, a, Some(Set), Millis)),
        cmd("SPERSIST", 2, |c, a| key::persist(c, a, Some(Set))),
        cmd("ZEXPIRE", 3, |c, a| key::expire(c, a, Some(ZSet), Seconds, false)),
        cmd("ZPEXPIRE", 3, |c, a| key::expire(c, a, Some(ZSet), Millis, false)),
        cmd("ZEXPIREAT", 3, |c, a| key::expire(c, a, Some(ZSet), Seconds, true)),
        cmd("ZPEXPIREAT", 3, |c, a| key::expire(c, a, Some(ZSet), Millis, true)),
        cmd("ZTTL", 2, |c, a| key::ttl(c, a, Some(ZSet), Seconds)),
        cmd("ZPTTL", 2, |c, a| key::ttl(c, a, Some(ZSet), Millis)),
        cmd("ZPERSIST", 2, |c, a| key::persist(c, a, Some(ZSet))),
    ]
}

static COMMANDS: LazyLock<HashMap<&'static str, CommandEntry>> =
    LazyLock::new(|| command_table().into_iter().map(|c| (c.name, c)).collect());

/// Look up a command by its upper-case name.
pub fn lookup(name: &str) -> Option<&'static CommandEntry> {
    COMMANDS.get(name)
}

/// Run one command line for a connection outside any transaction and render
/// the outcome as a reply.
pub fn execute(engine: &Engine, config: &SharedConfig, client: &mut ClientState, argv: &[Vec<u8>]) -> RespValue {
    let mut ctx = CommandContext::new(engine, config, client);
    dispatch(&mut ctx, argv).unwrap_or_else(|e| RespValue::error(e.to_resp_error()))
}

/// Validate `argv` against the table, queue it under MULTI, or run it.
pub fn dispatch(ctx: &mut CommandContext<'_>, argv: &[Vec<u8>]) -> KvdisResult<RespValue> {
    let Some((name, args)) = argv.split_first() else {
        return Err(KvdisError::Protocol("empty command".into()));
    };
    let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
    let Some(entry) = lookup(&upper) else {
        if ctx.client.in_multi {
            ctx.client.multi_error = true;
        }
        return Err(unknown_command(name, args));
    };
    if !ctx.client.authenticated && !entry.no_auth {
        return Err(KvdisError::NoAuth);
    }
    if !entry.arity_ok(argv.len()) {
        if ctx.client.in_multi {
            ctx.client.multi_error = true;
        }
        return Err(KvdisError::WrongArgCount(entry.name.to_ascii_lowercase()));
    }
    if ctx.client.in_multi && !entry.immediate {
        ctx.client.multi_queue.push(argv.to_vec());
        return Ok(RespValue::simple_string("QUEUED"));
    }
    (entry.handler)(ctx, args)
}

fn unknown_command(name: &[u8], args: &[Vec<u8>]) -> KvdisError {
    let preview: Vec<String> = args
        .iter()
        .take(3)
        .map(|a| format!("'{}'", String::from_utf8_lossy(a)))
        .collect();
    KvdisError::UnknownCommand(String::from_utf8_lossy(name).into_owned(), preview.join(" "))
}

/// Parse a signed integer argument.
pub fn arg_to_i64(arg: &[u8]) -> KvdisResult<i64> {
    if arg.is_empty() {
        return Err(KvdisError::NotInteger);
    }
    crate::types::rstring::parse_i64(arg)
}

/// Case-insensitive match of an option keyword.
pub fn is_keyword(arg: &[u8], keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

pub fn bulk_or_null(value: Option<Vec<u8>>) -> RespValue {
    match value {
        Some(v) => RespValue::bulk_string(v),
        None => RespValue::null_bulk_string(),
    }
}

pub fn bulk_array(items: Vec<Vec<u8>>) -> RespValue {
    RespValue::array(items.into_iter().map(RespValue::bulk_string).collect())
}

pub fn bool_reply(b: bool) -> RespValue {
    RespValue::integer(i64::from(b))
}

pub fn count_reply(n: u64) -> RespValue {
    RespValue::integer(i64::try_from(n).unwrap_or(i64::MAX))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::config::Config;
    use crate::engine::deleter::DeleteQueue;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// An engine, its config and one authenticated client.
    pub struct Harness {
        pub engine: Engine,
        pub config: SharedConfig,
        pub client: ClientState,
        pub _queue: DeleteQueue,
    }

    impl Harness {
        pub fn new() -> Self {
            let (engine, queue) = crate::engine::testutil::engine();
            let mut client = ClientState::new();
            client.authenticated = true;
            Harness {
                engine,
                config: Arc::new(RwLock::new(Config::default())),
                client,
                _queue: queue,
            }
        }

        /// Run a command given as whitespace-separated words.
        pub fn run(&mut self, line: &str) -> RespValue {
            let argv: Vec<Vec<u8>> = line.split_whitespace().map(|w| w.as_bytes().to_vec()).collect();
            execute(&self.engine, &self.config, &mut self.client, &argv)
        }
    }

    pub fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(s.as_bytes().to_vec())
    }

    pub fn bulks(items: &[&str]) -> RespValue {
        RespValue::array(items.iter().map(|s| bulk(s)).collect())
    }
}
