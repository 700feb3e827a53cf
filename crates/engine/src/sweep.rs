//! Periodic resumption of suspended instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::executor::ExecutionEngine;

pub struct ResumeSweeper {
    engine: Arc<ExecutionEngine>,
    interval: Duration,
}

impl ResumeSweeper {
    pub fn new(engine: Arc<ExecutionEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// One pass; returns how many instances were resumed.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        match self.engine.resume_due(now).await {
            Ok(resumed) => {
                if !resumed.is_empty() {
                    info!(count = resumed.len(), "resumed due instances");
                }
                resumed.len()
            }
            Err(e) => {
                error!("resume sweep failed: {e}");
                0
            }
        }
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "resume sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
            }
        }
        info!("resume sweeper stopped");
    }
}
