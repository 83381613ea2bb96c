//! Lateral job triggering.
//!
//! A job fires another through a [`SchedulerTrigger`] and gets back a
//! [`TriggerHandle`]. Awaiting the handle waits for the triggered execution;
//! callers that do not want to wait must say so with
//! [`TriggerHandle::detach`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

use super::definitions::JobDescriptor;
use super::job::{JobContext, JobError};
use super::runner::JobSlot;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("triggered job failed: {0}")]
    Job(#[from] JobError),

    #[error("triggered job was dropped before completing")]
    Canceled,
}

/// Completion of a triggered job execution.
#[must_use = "await the handle or call `detach()` to fire and forget"]
#[derive(Debug)]
pub struct TriggerHandle {
    rx: oneshot::Receiver<Result<(), JobError>>,
}

impl TriggerHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), JobError>>) -> Self {
        Self { rx }
    }

    /// Handle that is already resolved with `result`.
    pub fn ready(result: Result<(), JobError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Stop tracking the execution. The triggered job still runs.
    pub fn detach(self) {}
}

impl Future for TriggerHandle {
    type Output = Result<(), TriggerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result.map_err(TriggerError::from)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TriggerError::Canceled)),
        }
    }
}

/// Fires a job asynchronously.
pub trait SchedulerTrigger: Send + Sync {
    /// Enqueue one execution of the bound job and return its completion.
    fn execute(&self, descriptor: Option<JobDescriptor>) -> TriggerHandle;
}

impl<T> SchedulerTrigger for Arc<T>
where
    T: SchedulerTrigger + ?Sized,
{
    fn execute(&self, descriptor: Option<JobDescriptor>) -> TriggerHandle {
        (**self).execute(descriptor)
    }
}

/// Trigger bound to a job registered on a [`Scheduler`](super::Scheduler).
///
/// Triggered runs share the job's execution lock with its periodic runs.
#[derive(Clone)]
pub struct JobTrigger {
    slot: Arc<JobSlot>,
}

impl JobTrigger {
    pub(crate) fn new(slot: Arc<JobSlot>) -> Self {
        Self { slot }
    }
}

impl SchedulerTrigger for JobTrigger {
    fn execute(&self, descriptor: Option<JobDescriptor>) -> TriggerHandle {
        let (tx, rx) = oneshot::channel();
        let slot = self.slot.clone();
        let ctx = JobContext::scheduled(slot.now()).with_descriptor(descriptor);

        slot.runtime().clone().spawn(async move {
            let result = slot.run(ctx).await;
            let _ = tx.send(result);
        });
        TriggerHandle::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_handle_resolves_with_its_result() {
        assert!(TriggerHandle::ready(Ok(())).await.is_ok());

        let err = TriggerHandle::ready(Err(JobError::Failed("boom".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Job(JobError::Failed(_))));
    }

    #[tokio::test]
    async fn dropped_sender_is_reported_as_canceled() {
        let (tx, rx) = oneshot::channel::<Result<(), JobError>>();
        drop(tx);
        let err = TriggerHandle::new(rx).await.unwrap_err();
        assert!(matches!(err, TriggerError::Canceled));
    }
}
