use crate::codec::KeyCodec;
use crate::command;
use crate::config::{Config, SharedConfig};
use crate::connection::ClientState;
use crate::engine::deleter::{self, AsyncDeleter, DeleteQueue};
use crate::engine::gc::{GcCoordinator, GcOptions};
use crate::engine::leader::{self, LeaderState};
use crate::engine::{Engine, EngineOptions, SharedEngine, ttl};
use crate::error::KvdisResult;
use crate::resp::{RespParser, RespValue};
use crate::store::Store;
use crate::store::memory::MemoryBackend;
use crate::types::ObjectKind;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Build the store, codec and engine described by `cfg`. The returned queue
/// must be handed to [`deleter::run`].
pub fn open_engine(cfg: &Config) -> KvdisResult<(SharedEngine, DeleteQueue)> {
    let store = Store::new(Arc::new(MemoryBackend::new()), cfg.txn_retry);
    let codec = KeyCodec::new(cfg.tenant_id.as_str())?;
    let (deleter, queue) = AsyncDeleter::new(cfg.async_queue_capacity);
    let engine = Engine::new(
        store,
        codec,
        deleter,
        EngineOptions {
            databases: cfg.databases,
            async_delete_threshold: cfg.async_delete_threshold,
        },
    );
    Ok((Arc::new(engine), queue))
}

/// Start the background tasks: one sweeper per kind, the async deleter, the
/// leader checker and, when enabled, GC.
fn spawn_background(cfg: &Config, engine: &SharedEngine, queue: DeleteQueue, cancel: &CancellationToken) {
    for kind in ObjectKind::ALL {
        let checker = *cfg.checker(kind);
        tokio::spawn(ttl::run_sweeper(
            engine.clone(),
            kind,
            checker.interval(),
            checker.loop_limit,
            cancel.clone(),
        ));
    }

    tokio::spawn(deleter::run(engine.clone(), queue, cancel.clone()));

    let leader = Arc::new(LeaderState::new());
    tokio::spawn(leader::run_leader_checker(
        engine.clone(),
        leader.clone(),
        Duration::from_secs(cfg.leader_check_interval),
        Duration::from_secs(cfg.leader_lease_duration),
        cancel.clone(),
    ));

    if cfg.gc_enabled {
        let gc = GcCoordinator::new(
            engine.clone(),
            leader,
            GcOptions {
                enabled: true,
                interval: Duration::from_secs(cfg.gc_interval),
                lifetime: Duration::from_secs(cfg.gc_lifetime),
                concurrency: cfg.gc_concurrency.max(1),
            },
        );
        tokio::spawn(gc.run(cancel.clone()));
    }
}

pub async fn run_server(config: SharedConfig, cancel: CancellationToken) -> std::io::Result<()> {
    let cfg = config.read().await.clone();
    let (engine, queue) = open_engine(&cfg).map_err(std::io::Error::other)?;

    let addr = format!("{}:{}", cfg.bind, cfg.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("kvdis listening on {addr} with {} databases", cfg.databases);

    spawn_background(&cfg, &engine, queue, &cancel);

    let limiter = (cfg.max_connections > 0).then(|| Arc::new(Semaphore::new(cfg.max_connections)));

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (mut stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let permit = match &limiter {
                    Some(limiter) => match limiter.clone().try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            debug!("rejecting {peer_addr}: too many clients");
                            let reply = RespValue::error("ERR max number of clients reached");
                            let _ = stream.write_all(&reply.serialize()).await;
                            continue;
                        }
                    },
                    None => None,
                };
                debug!("new connection from {peer_addr}");

                let engine = engine.clone();
                let config = config.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, engine, config, cancel).await {
                        debug!("connection error from {peer_addr}: {e}");
                    }
                    drop(permit);
                    debug!("connection closed: {peer_addr}");
                });
            }
            _ = cancel.cancelled() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    engine: SharedEngine,
    config: SharedConfig,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut client = ClientState::new();
    if config.read().await.requirepass.is_none() {
        client.authenticated = true;
    }
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        loop {
            let argv = match RespParser::parse(&mut buf).map(|v| v.map(RespValue::into_argv)) {
                Ok(Some(Ok(argv))) => argv,
                Ok(None) => break,
                Ok(Some(Err(e))) | Err(e) => {
                    let reply = RespValue::error(format!("ERR Protocol error: {e}"));
                    stream.write_all(&reply.serialize()).await?;
                    return Ok(());
                }
            };
            if argv.is_empty() {
                continue;
            }

            // The store is synchronous; the client state travels with the call.
            let engine = engine.clone();
            let config = config.clone();
            let mut moved = client;
            let (reply, returned) = tokio::task::spawn_blocking(move || {
                let reply = command::execute(&engine, &config, &mut moved, &argv);
                (reply, moved)
            })
            .await
            .map_err(std::io::Error::other)?;
            client = returned;
            stream.write_all(&reply.serialize()).await?;

            if client.should_close {
                return Ok(());
            }
        }

        tokio::select! {
            result = stream.read_buf(&mut buf) => {
                if result? == 0 {
                    return Ok(());
                }
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}
