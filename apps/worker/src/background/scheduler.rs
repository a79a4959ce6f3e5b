//! Cron-style maintenance scheduler using tokio-cron-scheduler.

use std::sync::Arc;

use mercato_infra::JobQueueService;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use super::maintenance::{purge_settled, run_logged, sweep_stale};
use crate::config::MaintenanceConfig;

/// Cron job scheduler wrapper.
pub struct Scheduler {
    inner: JobScheduler,
    config: MaintenanceConfig,
}

impl Scheduler {
    pub async fn new(config: MaintenanceConfig) -> Result<Self, JobSchedulerError> {
        let inner = JobScheduler::new().await?;
        Ok(Self { inner, config })
    }

    /// Add a cron job.
    ///
    /// # Example
    /// ```ignore
    /// scheduler.add_cron("0 0 * * * *", || async {
    ///     tracing::info!("Running hourly job");
    /// }).await?;
    /// ```
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

    /// Register the settled-job purge and, when a stale timeout is set, the
    /// stale-job sweep.
    pub async fn register_maintenance(
        &self,
        service: Arc<JobQueueService>,
    ) -> Result<(), JobSchedulerError> {
        let days = self.config.cleanup_older_than_days;
        let purge_service = service.clone();
        self.add_cron(&self.config.cleanup_cron, move || {
            run_logged("purge_settled", purge_service.clone(), move |s| async move {
                purge_settled(&s, days).await
            })
        })
        .await?;

        if let Some(timeout) = self.config.stale_timeout {
            self.add_cron(&self.config.stale_sweep_cron, move || {
                run_logged("sweep_stale", service.clone(), move |s| async move {
                    sweep_stale(&s, timeout).await
                })
            })
            .await?;
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        if !self.config.enabled {
            tracing::info!("Scheduler disabled");
            return Ok(());
        }

        self.inner.start().await?;
        tracing::info!("Scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        self.inner.shutdown().await?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mercato_infra::{InMemoryJobStore, QueueServiceConfig};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_maintenance_with_sweep() {
        let config = MaintenanceConfig {
            stale_timeout: Some(Duration::from_secs(300)),
            ..Default::default()
        };
        let service = Arc::new(JobQueueService::new(
            Arc::new(InMemoryJobStore::new()),
            QueueServiceConfig::default(),
        ));

        let mut scheduler = Scheduler::new(config).await.unwrap();
        scheduler.register_maintenance(service).await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_cron_is_rejected() {
        let config = MaintenanceConfig {
            cleanup_cron: "every night".to_string(),
            ..Default::default()
        };
        let service = Arc::new(JobQueueService::new(
            Arc::new(InMemoryJobStore::new()),
            QueueServiceConfig::default(),
        ));

        let scheduler = Scheduler::new(config).await.unwrap();
        assert!(scheduler.register_maintenance(service).await.is_err());
    }
}
