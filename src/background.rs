//! Bounded executor for post-admission work.
//!
//! Log appends and usage increments are queued on a bounded channel and run
//! by a single worker task. Enqueueing never waits: when the queue is full the
//! job is dropped and counted, so the request path is never back-pressured.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::chatbot_log::ChatbotLog,
    store::{KeyStore, LogStore},
};

#[derive(Debug)]
enum Job {
    AppendLog(ChatbotLog),
    IncrementUsage { key_id: Uuid, at: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct DropCounters {
    logs: AtomicU64,
    increments: AtomicU64,
}

/// Producer side, cloned into every gateway handle.
#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::Sender<Job>,
    dropped: Arc<DropCounters>,
}

impl BackgroundQueue {
    /// Queue a log append. Dropped and counted if the queue is full.
    pub fn append_log(&self, log: ChatbotLog) {
        if let Err(err) = self.tx.try_send(Job::AppendLog(log)) {
            self.dropped.logs.fetch_add(1, Ordering::Relaxed);
            warn!(reason = %err, "dropping chatbot log");
        }
    }

    /// Queue a usage increment. Dropped and counted if the queue is full.
    pub fn increment_usage(&self, key_id: Uuid, at: DateTime<Utc>) {
        if let Err(err) = self.tx.try_send(Job::IncrementUsage { key_id, at }) {
            self.dropped.increments.fetch_add(1, Ordering::Relaxed);
            warn!(api_key_id = %key_id, reason = %err, "dropping usage increment");
        }
    }

    pub fn dropped_logs_total(&self) -> u64 {
        self.dropped.logs.load(Ordering::Relaxed)
    }

    pub fn dropped_increments_total(&self) -> u64 {
        self.dropped.increments.load(Ordering::Relaxed)
    }
}

/// Consumer side. Finishes once every `BackgroundQueue` clone is dropped and
/// the remaining jobs have run.
pub struct BackgroundWorker {
    handle: JoinHandle<()>,
}

impl BackgroundWorker {
    /// Wait for queued jobs to finish, abandoning them after `grace`.
    ///
    /// Returns `true` if the queue drained in time.
    pub async fn drain(self, grace: Duration) -> bool {
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(())) => {
                info!("background queue drained");
                true
            }
            Ok(Err(err)) => {
                error!(error = %err, "background worker panicked");
                false
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "background drain timed out");
                abort.abort();
                false
            }
        }
    }
}

/// Start the worker with a queue of `depth` slots.
pub fn spawn(
    depth: usize,
    keys: Arc<dyn KeyStore>,
    logs: Arc<dyn LogStore>,
) -> (BackgroundQueue, BackgroundWorker) {
    let (tx, mut rx) = mpsc::channel(depth.max(1));

    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                Job::AppendLog(log) => {
                    if let Err(err) = logs.create(&log).await {
                        error!(
                            api_key_id = %log.api_key_id,
                            error = %err,
                            "failed to append chatbot log"
                        );
                    }
                }
                Job::IncrementUsage { key_id, at } => {
                    if let Err(err) = keys.increment_usage(key_id, at).await {
                        error!(
                            api_key_id = %key_id,
                            error = %err,
                            "failed to increment key usage"
                        );
                    }
                }
            }
        }
    });

    let queue = BackgroundQueue {
        tx,
        dropped: Arc::new(DropCounters::default()),
    };

    (queue, BackgroundWorker { handle })
}
