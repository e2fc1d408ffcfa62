use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::config::ScheduleTime;

pub struct TaskScheduler {
    scheduler: JobScheduler,
}

impl TaskScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler })
    }

    /// 每天在本地时间 `time` 执行一次 `job_fn`
    pub async fn add_daily_job<F, Fut>(&self, time: ScheduleTime, job_fn: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job_fn = Arc::new(job_fn);
        let job = Job::new_async_tz(time.cron_expr().as_str(), chrono::Local, move |_uuid, _lock| {
            let job_fn = Arc::clone(&job_fn);
            Box::pin(async move {
                info!("执行定时任务");
                job_fn().await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("已添加每日任务: {}", time);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("任务调度器已启动");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("任务调度器已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn accepts_daily_job_at_configured_time() {
        let scheduler = TaskScheduler::new().await.unwrap();
        let time: ScheduleTime = "23:59".parse().unwrap();

        scheduler.add_daily_job(time, || async {}).await.unwrap();
        scheduler.start().await.unwrap();
        scheduler.shutdown().await.unwrap();
    }
}
