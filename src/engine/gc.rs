//! Periodic advance of the store's gc safe point.
//!
//! Only the lease holder runs gc. The last safe point (physical ms) is
//! persisted in a system key so a new leader does not run gc again before
//! the retention window has passed.

use super::SharedEngine;
use super::leader::LeaderState;
use crate::error::{KvdisError, KvdisResult};
use crate::store::{compose_ts, extract_physical};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SAFE_POINT_KEY: &[u8] = b"gc_safe_point";

#[derive(Debug, Clone)]
pub struct GcOptions {
    pub enabled: bool,
    pub interval: Duration,
    /// Versions younger than this are always retained.
    pub lifetime: Duration,
    pub concurrency: usize,
}

impl Default for GcOptions {
    fn default() -> Self {
        GcOptions {
            enabled: true,
            interval: Duration::from_secs(600),
            lifetime: Duration::from_secs(600),
            concurrency: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcOutcome {
    Disabled,
    NotLeader,
    TooEarly { last_ms: u64, candidate_ms: u64 },
    Ran { safe_point: u64, removed: usize },
}

pub struct GcCoordinator {
    engine: SharedEngine,
    leader: Arc<LeaderState>,
    options: GcOptions,
}

impl GcCoordinator {
    pub fn new(engine: SharedEngine, leader: Arc<LeaderState>, options: GcOptions) -> Self {
        GcCoordinator {
            engine,
            leader,
            options,
        }
    }

    /// Physical time (ms) of the last persisted safe point, 0 if none.
    pub fn load_safe_point(&self) -> KvdisResult<u64> {
        let key = self.engine.codec().sys_key(SAFE_POINT_KEY);
        match self.engine.store().get(&key)? {
            None => Ok(0),
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| KvdisError::Storage("malformed gc safe point".into()))?;
                Ok(u64::from_be_bytes(bytes))
            }
        }
    }

    fn save_safe_point(&self, physical_ms: u64) -> KvdisResult<()> {
        let key = self.engine.codec().sys_key(SAFE_POINT_KEY);
        self.engine.store().set(&key, &physical_ms.to_be_bytes())
    }

    /// One gc cycle.
    pub fn run_once(&self) -> KvdisResult<GcOutcome> {
        if !self.options.enabled {
            return Ok(GcOutcome::Disabled);
        }
        if !self.leader.is_leader() {
            return Ok(GcOutcome::NotLeader);
        }
        let lifetime_ms = self.options.lifetime.as_millis() as u64;
        let last_ms = self.load_safe_point()?;
        let now_ms = extract_physical(self.engine.store().current_ts()?);
        let candidate_ms = now_ms.saturating_sub(lifetime_ms);
        if candidate_ms.saturating_sub(last_ms) < lifetime_ms {
            return Ok(GcOutcome::TooEarly { last_ms, candidate_ms });
        }
        let safe_point = compose_ts(candidate_ms, 0);
        let removed = self
            .engine
            .store()
            .run_gc(safe_point, self.options.concurrency)?;
        self.save_safe_point(candidate_ms)?;
        Ok(GcOutcome::Ran { safe_point, removed })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("gc coordinator started with interval {:?}", self.options.interval);
        let this = Arc::new(self);
        let mut ticker = tokio::time::interval(this.options.interval);
        // The first tick fires immediately; skip it so a fresh process does
        // not gc before it could have taken the lease.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }
            let worker = this.clone();
            match tokio::task::spawn_blocking(move || worker.run_once()).await {
                Ok(Ok(GcOutcome::Ran { safe_point, removed })) => {
                    info!("gc done at safe point {safe_point}, removed {removed} versions")
                }
                Ok(Ok(outcome)) => debug!("gc skipped: {outcome:?}"),
                Ok(Err(e)) => warn!("gc cycle failed: {e}"),
                Err(e) => warn!("gc task failed: {e}"),
            }
        }
        info!("gc coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::engine;

    fn coordinator(lifetime: Duration) -> (GcCoordinator, Arc<LeaderState>) {
        let (engine, _q) = engine();
        let engine = Arc::new(engine);
        let leader = Arc::new(LeaderState::with_id("me"));
        let options = GcOptions {
            lifetime,
            ..Default::default()
        };
        (GcCoordinator::new(engine, leader.clone(), options), leader)
    }

    #[test]
    fn test_skips_when_not_leader() {
        let (gc, _leader) = coordinator(Duration::from_millis(1));
        assert_eq!(gc.run_once().unwrap(), GcOutcome::NotLeader);
    }

    #[test]
    fn test_disabled() {
        let (engine, _q) = engine();
        let options = GcOptions {
            enabled: false,
            ..Default::default()
        };
        let gc = GcCoordinator::new(Arc::new(engine), Arc::new(LeaderState::new()), options);
        assert_eq!(gc.run_once().unwrap(), GcOutcome::Disabled);
    }

    #[test]
    fn test_runs_then_waits_for_window() {
        let (gc, leader) = coordinator(Duration::from_secs(1));
        let engine = gc.engine.clone();
        leader.check(engine.store(), engine.codec(), Duration::from_secs(60)).unwrap();
        engine.set(None, 0, b"k", b"v1").unwrap();
        engine.set(None, 0, b"k", b"v2").unwrap();

        let GcOutcome::Ran { safe_point, .. } = gc.run_once().unwrap() else {
            panic!("expected gc to run");
        };
        assert_eq!(gc.load_safe_point().unwrap(), extract_physical(safe_point));
        assert!(matches!(gc.run_once().unwrap(), GcOutcome::TooEarly { .. }));
        assert_eq!(engine.get(None, 0, b"k").unwrap(), Some(b"v2".to_vec()));
    }
}
