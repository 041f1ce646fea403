//! Periodic job runner.
//!
//! Sync and consolidation run on fixed intervals; missed ticks are skipped
//! rather than burst. The full remote reindex runs once a day at a fixed
//! UTC time. Each job runs in its own task, so a slow sync never delays
//! consolidation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::ScheduleConfig;
use crate::jobs::{summarize_consolidation, summarize_reindex, summarize_sync, Pipeline};

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    sync_every: Duration,
    consolidate_every: Duration,
    full_reindex_at: NaiveTime,
}

/// Time from `now` until the next occurrence of `at` (UTC). An `at` equal
/// to `now` is scheduled for the following day.
pub fn until_next(at: NaiveTime, now: DateTime<Utc>) -> Duration {
    let mut next = now.date_naive().and_time(at).and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, schedule: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            pipeline,
            sync_every: Duration::from_secs(schedule.sync_every_secs),
            consolidate_every: Duration::from_secs(schedule.consolidate_every_secs),
            full_reindex_at: schedule.full_reindex_time()?,
        })
    }

    /// Run all jobs until Ctrl-C. A job in flight is allowed to finish.
    pub async fn run(self) -> Result<()> {
        info!(
            sync_every_secs = self.sync_every.as_secs(),
            consolidate_every_secs = self.consolidate_every.as_secs(),
            full_reindex_at = %self.full_reindex_at.format("%H:%M"),
            "scheduler started"
        );
        let (stop, stopped) = watch::channel(false);

        let sync = {
            let pipeline = self.pipeline.clone();
            let mut shutdown = stopped.clone();
            let every = self.sync_every;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            let outcome = pipeline.run_sync().await;
                            debug!("{}", summarize_sync(&outcome));
                        }
                    }
                }
            })
        };

        let consolidation = {
            let pipeline = self.pipeline.clone();
            let mut shutdown = stopped.clone();
            let every = self.consolidate_every;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            let outcome = pipeline.run_consolidation().await;
                            debug!("{}", summarize_consolidation(&outcome));
                        }
                    }
                }
            })
        };

        let reindex = {
            let pipeline = self.pipeline.clone();
            let mut shutdown = stopped.clone();
            let at = self.full_reindex_at;
            tokio::spawn(async move {
                loop {
                    let wait = until_next(at, Utc::now());
                    debug!(wait_secs = wait.as_secs(), "next full remote reindex scheduled");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(wait) => {
                            let outcome = pipeline.run_full_remote_reindex().await;
                            info!("{}", summarize_reindex(&outcome));
                        }
                    }
                }
            })
        };

        tokio::signal::ctrl_c().await?;
        info!("received Ctrl-C, stopping scheduler");
        let _ = stop.send(true);

        for handle in [sync, consolidation, reindex] {
            let _ = handle.await;
        }
        info!("scheduler stopped");
        Ok(())
    }
}
