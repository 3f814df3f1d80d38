use crate::pipeline::{PassReport, PublishPipeline};
use crate::types::{PublisherError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Lifetime of the dedup cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CacheScope {
    /// Kept for the whole process; an orphaned publish is never retried by this process.
    #[default]
    Process,
    /// Cleared before every pass; the ledger alone guards across passes.
    Pass,
}

/// Accepts 5-field crontab lines as well as the 6/7-field form with seconds.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let trimmed = expression.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {}", trimmed),
        6 | 7 => trimmed.to_string(),
        n => {
            return Err(PublisherError::Schedule {
                expression: expression.to_string(),
                reason: format!("expected 5, 6 or 7 fields, got {}", n),
            })
        }
    };

    Schedule::from_str(&normalized).map_err(|e| PublisherError::Schedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub struct Scheduler {
    pipeline: Arc<PublishPipeline>,
    schedule: Schedule,
    cache_scope: CacheScope,
    running: Mutex<()>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<PublishPipeline>, expression: &str, cache_scope: CacheScope) -> Result<Self> {
        Ok(Self {
            pipeline,
            schedule: parse_schedule(expression)?,
            cache_scope,
            running: Mutex::new(()),
        })
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }

    /// Starts a pass unless one is already in flight, in which case nothing runs.
    pub async fn trigger(&self) -> Option<PassReport> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous pass still running, skipping this trigger");
            return None;
        };

        if self.cache_scope == CacheScope::Pass {
            self.pipeline.reset_cache().await;
        }
        Some(self.pipeline.run_pass().await)
    }

    pub async fn run_once(&self) -> Option<PassReport> {
        self.trigger().await
    }

    pub async fn run_forever(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Passes now and on every fire time until `shutdown` completes.
    /// A pass in progress is always finished before returning.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let watcher = tokio::spawn(async move {
            shutdown.await;
            info!("Shutdown requested");
            let _ = stop_tx.send(true);
        });

        info!(cache_scope = ?self.cache_scope, "Scheduler started");
        loop {
            self.trigger().await;
            if *stop_rx.borrow() {
                break;
            }

            let Some(next) = self.next_fire() else {
                warn!("Schedule has no upcoming fire times, stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!("Next pass at {} (in {}s)", next, wait.as_secs());

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.changed() => break,
            }
        }

        watcher.abort();
        info!("Scheduler stopped");
        Ok(())
    }
}
