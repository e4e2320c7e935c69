use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Work handed to the background job collaborator. Fire-and-forget,
/// outside the live delivery path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    IndexUser { user_id: Uuid },
    IndexChannel { channel_id: Uuid },
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()>;
}

/// Records jobs in the log instead of running them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingJobQueue;

#[async_trait]
impl JobQueue for TracingJobQueue {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()> {
        info!(?job, "Job enqueued");
        Ok(())
    }
}
