//! Cluster-wide leader lease.
//!
//! Many server processes can share one store; background work that must run
//! once per cluster (gc) is gated on holding the lease. The lease is a
//! system key holding `instance-id | renewed-at(u64 BE ms)`.

use super::SharedEngine;
use crate::codec::KeyCodec;
use crate::error::KvdisResult;
use crate::store::{KvRead, Store, now_millis};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LEADER_KEY: &[u8] = b"leader";

#[derive(Debug)]
pub struct LeaderState {
    id: String,
    is_leader: AtomicBool,
}

impl Default for LeaderState {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderState {
    /// A new follower with a random instance id.
    pub fn new() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().r#gen();
        let id = bytes.iter().map(|b| format!("{b:02x}")).collect();
        LeaderState {
            id,
            is_leader: AtomicBool::new(false),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        LeaderState {
            id: id.into(),
            is_leader: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    /// Take or renew the lease if it is ours or has lapsed. Publishes and
    /// returns the outcome.
    pub fn check(&self, store: &Store, codec: &KeyCodec, lease: Duration) -> KvdisResult<bool> {
        let key = codec.sys_key(LEADER_KEY);
        let lease_ms = lease.as_millis() as u64;
        let result = store.run_in_txn(|txn| {
            let now = now_millis();
            if let Some(raw) = txn.get(&key)?
                && let Some((holder, renewed_at)) = parse_lease(&raw)
                && holder != self.id.as_bytes()
                && now.saturating_sub(renewed_at) < lease_ms
            {
                return Ok(false);
            }
            let mut value = self.id.as_bytes().to_vec();
            value.extend_from_slice(&now.to_be_bytes());
            txn.set(key.clone(), value);
            Ok(true)
        });
        let leader = matches!(result, Ok(true));
        let was = self.is_leader.swap(leader, Ordering::AcqRel);
        if leader != was {
            info!("instance {} leadership changed: is_leader={leader}", self.id);
        }
        result
    }
}

fn parse_lease(raw: &[u8]) -> Option<(&[u8], u64)> {
    let split = raw.len().checked_sub(8)?;
    let (holder, ts) = raw.split_at(split);
    Some((holder, u64::from_be_bytes(ts.try_into().ok()?)))
}

/// Re-check the lease every `interval` until cancelled.
pub async fn run_leader_checker(
    engine: SharedEngine,
    state: Arc<LeaderState>,
    interval: Duration,
    lease: Duration,
    cancel: CancellationToken,
) {
    info!("leader checker started for instance {}", state.id());
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        let engine = engine.clone();
        let state = state.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            state.check(engine.store(), engine.codec(), lease)
        })
        .await;
        match outcome {
            Ok(Ok(leader)) => debug!("leader check done, is_leader={leader}"),
            Ok(Err(e)) => warn!("leader check failed: {e}"),
            Err(e) => warn!("leader check task failed: {e}"),
        }
    }
    info!("leader checker stopped");
}
