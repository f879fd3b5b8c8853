//! Background deletion of large or expired keys.
//!
//! Producers push `(db, key)` onto a bounded queue without blocking; a single
//! consumer task purges each key in bounded transactions. A key is queued at
//! most once at a time: the pending set is checked and updated under one
//! mutex, and the consumer clears the entry when it dequeues the task.

use super::SharedEngine;
use crate::types::ObjectKind;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTask {
    pub db: u8,
    pub kind: ObjectKind,
    pub key: Vec<u8>,
}

/// Producer side, held by the engine.
#[derive(Debug, Clone)]
pub struct AsyncDeleter {
    tx: mpsc::Sender<DeleteTask>,
    pending: Arc<Mutex<HashSet<(u8, Vec<u8>)>>>,
}

/// Consumer side, moved into the background task.
pub struct DeleteQueue {
    rx: mpsc::Receiver<DeleteTask>,
    pending: Arc<Mutex<HashSet<(u8, Vec<u8>)>>>,
}

impl AsyncDeleter {
    pub fn new(capacity: usize) -> (AsyncDeleter, DeleteQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Mutex::new(HashSet::new()));
        (
            AsyncDeleter {
                tx,
                pending: pending.clone(),
            },
            DeleteQueue { rx, pending },
        )
    }

    /// Queue `key` for background deletion. Returns true if the key is now
    /// queued (by this call or an earlier one), false if the queue is full
    /// or its consumer is gone and the caller must delete inline.
    pub fn enqueue(&self, db: u8, kind: ObjectKind, key: &[u8]) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        let id = (db, key.to_vec());
        if pending.contains(&id) {
            return true;
        }
        let task = DeleteTask {
            db,
            kind,
            key: key.to_vec(),
        };
        match self.tx.try_send(task) {
            Ok(()) => {
                pending.insert(id);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("async delete queue full, deleting inline");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("async delete queue closed");
                false
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl DeleteQueue {
    /// Wait for the next task and mark it no longer pending.
    pub async fn recv(&mut self) -> Option<DeleteTask> {
        let task = self.rx.recv().await?;
        self.done(&task);
        Some(task)
    }

    pub fn try_recv(&mut self) -> Option<DeleteTask> {
        let task = self.rx.try_recv().ok()?;
        self.done(&task);
        Some(task)
    }

    fn done(&self, task: &DeleteTask) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&(task.db, task.key.clone()));
        }
    }
}

/// Consume the queue until cancelled.
pub async fn run(engine: SharedEngine, mut queue: DeleteQueue, cancel: CancellationToken) {
    info!("async deletion task started");
    loop {
        let task = tokio::select! {
            task = queue.recv() => match task {
                Some(task) => task,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        let key = String::from_utf8_lossy(&task.key).into_owned();
        let engine = engine.clone();
        let result =
            tokio::task::spawn_blocking(move || engine.purge(task.db, &task.key)).await;
        match result {
            Ok(Ok(purged)) => debug!("async delete {} key {key}: purged={purged}", task.kind.type_name()),
            Ok(Err(e)) => warn!("async delete of key {key} failed: {e}"),
            Err(e) => warn!("async delete task for key {key} panicked: {e}"),
        }
    }
    info!("async deletion task stopped");
}
