//! Cron-style job scheduler using tokio-cron-scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use stepwise_core::ports::WindowStore;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Enable scheduler.
    pub enabled: bool,
    /// Cron expression (with seconds) for admission-event pruning.
    pub prune_schedule: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prune_schedule: "0 0 * * * *".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("SCHEDULER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.enabled),
            prune_schedule: std::env::var("PRUNE_SCHEDULE").unwrap_or(defaults.prune_schedule),
        }
    }
}

/// Cron job scheduler wrapper.
pub struct Scheduler {
    inner: JobScheduler,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler.
    pub async fn new(config: SchedulerConfig) -> Result<Self, JobSchedulerError> {
        let inner = JobScheduler::new().await?;
        Ok(Self { inner, config })
    }

    /// Add a cron job.
    pub async fn add_cron<F, Fut>(
        &self,
        schedule: &str,
        task: F,
    ) -> Result<uuid::Uuid, JobSchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let task = task.clone();
            Box::pin(async move {
                task().await;
            })
        })?;

        let id = self.inner.add(job).await?;
        tracing::info!(schedule = %schedule, job_id = %id, "Cron job registered");
        Ok(id)
    }

    /// Periodically drop admission events older than `retention`, which
    /// should be the longest configured window.
    pub async fn add_prune_job(
        &self,
        store: Arc<dyn WindowStore>,
        retention: Duration,
    ) -> Result<uuid::Uuid, JobSchedulerError> {
        let schedule = self.config.prune_schedule.clone();
        self.add_cron(&schedule, move || {
            let store = store.clone();
            async move { prune_once(store.as_ref(), retention).await }
        })
        .await
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        if !self.config.enabled {
            tracing::info!("Scheduler disabled");
            return Ok(());
        }

        self.inner.start().await?;
        tracing::info!("Scheduler started");
        Ok(())
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        self.inner.shutdown().await?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

/// One pruning pass. Failures are logged; the next run retries.
pub async fn prune_once(store: &dyn WindowStore, retention: Duration) {
    let span = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
    let Some(before) = Utc::now().checked_sub_signed(span) else {
        return;
    };

    match store.prune(before).await {
        Ok(removed) => tracing::info!(removed, before = %before, "Pruned admission events"),
        Err(e) => tracing::warn!(error = %e, "Failed to prune admission events"),
    }
}
