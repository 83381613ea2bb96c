//! Tokio-based periodic runner.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use profhub_core::Clock;

use super::definitions::JobDescriptor;
use super::job::{Job, JobContext, JobError, JobType};
use super::trigger::JobTrigger;

/// Per-job runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Timing of one registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub period: Duration,
    /// Delay before the first periodic run.
    pub initial_delay: Duration,
    /// Handed to every periodic execution.
    pub descriptor: Option<JobDescriptor>,
}

impl ScheduleConfig {
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
            descriptor: None,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_descriptor(mut self, descriptor: Option<JobDescriptor>) -> Self {
        self.descriptor = descriptor;
        self
    }
}

/// A registered job with its execution lock.
pub(crate) struct JobSlot {
    job: Arc<dyn Job>,
    job_type: JobType,
    lock: tokio::sync::Mutex<()>,
    stats: Mutex<JobStats>,
    runtime: Handle,
    clock: Arc<dyn Clock>,
}

impl JobSlot {
    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run one execution on the blocking pool, after any in-flight
    /// execution of the same job has finished.
    pub(crate) async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        let _guard = self.lock.lock().await;
        let started_at = self.clock.now();
        debug!(job = %self.job_type, run_id = ?ctx.run_id, "job execution started");

        let job = self.job.clone();
        let result = match tokio::task::spawn_blocking(move || job.execute(ctx)).await {
            Ok(result) => result,
            Err(join_err) => Err(JobError::Failed(format!("job execution panicked: {join_err}"))),
        };

        if let Ok(mut stats) = self.stats.lock() {
            stats.runs += 1;
            stats.last_started_at = Some(started_at);
            match &result {
                Ok(()) => stats.last_error = None,
                Err(e) => {
                    stats.failures += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        if let Err(e) = &result {
            error!(job = %self.job_type, error = %e, "job execution failed");
        }
        result
    }

    fn stats(&self) -> JobStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Periodic job scheduler.
///
/// Each registered job gets its own task driven by `tokio::time::interval`.
/// A tick runs the job to completion before the next tick of the same job is
/// considered (missed ticks are delayed, not bursted). Different jobs run
/// concurrently.
pub struct Scheduler {
    runtime: Handle,
    clock: Arc<dyn Clock>,
    entries: Vec<(Arc<JobSlot>, ScheduleConfig)>,
}

impl Scheduler {
    pub fn new(runtime: Handle, clock: Arc<dyn Clock>) -> Self {
        Self {
            runtime,
            clock,
            entries: Vec::new(),
        }
    }

    /// Register a job to run every `period`. The returned trigger fires the
    /// same job on demand and can be handed to other jobs before `start`.
    pub fn register(&mut self, job: Arc<dyn Job>, period: Duration) -> JobTrigger {
        self.register_with(job, ScheduleConfig::every(period))
    }

    pub fn register_with(&mut self, job: Arc<dyn Job>, schedule: ScheduleConfig) -> JobTrigger {
        let slot = Arc::new(JobSlot {
            job_type: job.job_type(),
            job,
            lock: tokio::sync::Mutex::new(()),
            stats: Mutex::new(JobStats::default()),
            runtime: self.runtime.clone(),
            clock: self.clock.clone(),
        });
        info!(
            job = %slot.job_type,
            period_secs = schedule.period.as_secs_f64(),
            descriptor = schedule.descriptor.as_ref().map(|d| d.id.as_str()),
            "job registered"
        );
        self.entries.push((slot.clone(), schedule));
        JobTrigger::new(slot)
    }

    /// Spawn one periodic task per registered job.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::with_capacity(self.entries.len());
        let mut slots = Vec::with_capacity(self.entries.len());
        for (slot, schedule) in self.entries {
            slots.push(slot.clone());
            tasks.push(
                self.runtime
                    .spawn(periodic_loop(slot, schedule, shutdown_rx.clone())),
            );
        }

        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks,
            slots,
        }
    }
}

async fn periodic_loop(
    slot: Arc<JobSlot>,
    schedule: ScheduleConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + schedule.initial_delay, schedule.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // Errors are already logged; the next tick runs regardless.
                let ctx = JobContext::scheduled(slot.now())
                    .with_descriptor(schedule.descriptor.clone());
                let _ = slot.run(ctx).await;
            }
        }
    }
    debug!(job = %slot.job_type, "periodic loop stopped");
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    slots: Vec<Arc<JobSlot>>,
}

impl std::fmt::Debug for JobSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSlot").field("job_type", &self.job_type).finish()
    }
}

impl SchedulerHandle {
    /// Statistics per registered job, in registration order.
    pub fn stats(&self) -> Vec<(JobType, JobStats)> {
        self.slots.iter().map(|s| (s.job_type, s.stats())).collect()
    }

    /// Stop issuing ticks and wait for in-flight executions to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerTrigger;
    use profhub_core::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        running: AtomicUsize,
        overlapped: AtomicUsize,
        fail: bool,
    }

    impl CountingJob {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                overlapped: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl Job for CountingJob {
        fn job_type(&self) -> JobType {
            JobType::DataRetention
        }

        fn execute(&self, _ctx: JobContext) -> Result<(), JobError> {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(JobError::Failed("always fails".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn trigger_runs_job_and_reports_completion() {
        let job = CountingJob::new(false);
        let mut scheduler = Scheduler::new(Handle::current(), Arc::new(SystemClock));
        let trigger = scheduler.register(job.clone(), Duration::from_secs(3600));

        trigger.execute(None).await.unwrap();

        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn triggered_runs_of_one_job_never_overlap() {
        let job = CountingJob::new(false);
        let mut scheduler = Scheduler::new(Handle::current(), Arc::new(SystemClock));
        let trigger = scheduler.register(job.clone(), Duration::from_secs(3600));

        let a = trigger.execute(None);
        let b = trigger.execute(None);
        let c = trigger.execute(None);
        let (ra, rb, rc) = tokio::join!(a, b, c);
        assert!(ra.is_ok() && rb.is_ok() && rc.is_ok());

        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
        assert_eq!(job.overlapped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_job_keeps_being_scheduled() {
        let job = CountingJob::new(true);
        let mut scheduler = Scheduler::new(Handle::current(), Arc::new(SystemClock));
        scheduler.register(job.clone(), Duration::from_millis(30));
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = handle.stats();
        handle.shutdown().await;

        assert!(job.runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(stats[0].0, JobType::DataRetention);
        assert!(stats[0].1.failures >= 2);
        assert_eq!(stats[0].1.last_error.as_deref(), Some("job failed: always fails"));
    }

    struct RecordingJob {
        seen: Mutex<Vec<Option<JobDescriptor>>>,
    }

    impl Job for RecordingJob {
        fn job_type(&self) -> JobType {
            JobType::ProjectsSynchronizer
        }

        fn execute(&self, ctx: JobContext) -> Result<(), JobError> {
            self.seen.lock().unwrap().push(ctx.descriptor);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn periodic_runs_carry_registered_descriptor() {
        let job = Arc::new(RecordingJob {
            seen: Mutex::new(Vec::new()),
        });
        let descriptor = JobDescriptor::new("sync-main", JobType::ProjectsSynchronizer)
            .with_param("period_secs", "1");
        let mut scheduler = Scheduler::new(Handle::current(), Arc::new(SystemClock));
        scheduler.register_with(
            job.clone(),
            ScheduleConfig::every(Duration::from_millis(30)).with_descriptor(Some(descriptor.clone())),
        );
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        let seen = job.seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|d| d.as_ref() == Some(&descriptor)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_stops_further_ticks() {
        let job = CountingJob::new(false);
        let mut scheduler = Scheduler::new(Handle::current(), Arc::new(SystemClock));
        scheduler.register(job.clone(), Duration::from_millis(30));
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;
        let after_shutdown = job.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(after_shutdown >= 1);
        assert_eq!(job.runs.load(Ordering::SeqCst), after_shutdown);
    }
}
