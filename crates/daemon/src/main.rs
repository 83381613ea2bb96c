//! Platform daemon: wires the queue, the store and the periodic jobs, then
//! runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tokio::runtime::Handle;

use profhub_core::{Clock, SystemClock, WorkspaceId};
use profhub_infra::config::PlatformConfig;
use profhub_infra::folder_queue::FolderQueue;
use profhub_infra::jobs::{
    DataRetentionJob, EventDispatcher, FolderEventsReplicatorJob, HeartbeatSessionFinisher,
    ProjectsSynchronizerJob, SessionFinishedDetectorJob,
};
use profhub_infra::queue::{
    InMemoryPersistentQueue, PersistentQueue, PostgresPersistentQueue, QueueInspection,
};
use profhub_infra::repository::{InMemoryNoticeStore, InMemoryPlatformRepository, NoticeKind};
use profhub_infra::scheduler::{JobDefinitions, JobType, ScheduleConfig, Scheduler};
use profhub_infra::workspace::{StaticWorkspaceResolver, WorkspaceInfo, WorkspaceResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    profhub_observability::init();

    let config = PlatformConfig::from_env().context("invalid configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (queue, inspection) = build_queue(&config, clock.clone()).await?;
    let repository = Arc::new(InMemoryPlatformRepository::new());
    let messages = Arc::new(InMemoryNoticeStore::new(NoticeKind::Message));
    let alerts = Arc::new(InMemoryNoticeStore::new(NoticeKind::Alert));

    let resolver = Arc::new(StaticWorkspaceResolver::with_workspaces(
        config
            .workspaces
            .iter()
            .map(|id| {
                WorkspaceInfo::local(id.as_str()).with_path(config.workspaces_dir.join(id.as_str()))
            })
            .chain(config.remote_workspaces.iter().map(|id| WorkspaceInfo::remote(id.as_str()))),
    ));
    let definitions = match &config.job_definitions {
        Some(path) => JobDefinitions::load(path)
            .with_context(|| format!("failed to load job definitions from {}", path.display()))?,
        None => JobDefinitions::default(),
    };
    let schedule = |job_type: JobType| -> anyhow::Result<ScheduleConfig> {
        let descriptor = definitions.first_of(job_type);
        let configured: Option<Duration> = descriptor
            .map(|d| d.period())
            .transpose()
            .with_context(|| format!("invalid period for {job_type}"))?
            .flatten();
        Ok(
            ScheduleConfig::every(configured.unwrap_or_else(|| config.periods.for_job(job_type)))
                .with_descriptor(descriptor.cloned()),
        )
    };

    let dispatcher = Arc::new(EventDispatcher::standard(repository.clone(), clock.clone()));
    let folder = Arc::new(
        FolderQueue::open(config.events_dir.clone(), clock.clone())
            .with_context(|| format!("failed to open events folder {}", config.events_dir.display()))?,
    );

    let mut scheduler = Scheduler::new(Handle::current(), clock.clone());

    let synchronizer = scheduler.register_with(
        Arc::new(ProjectsSynchronizerJob::new(
            queue.clone(),
            resolver.clone(),
            dispatcher.clone(),
        )),
        schedule(JobType::ProjectsSynchronizer)?,
    );
    // No network-backed RemoteEntitySource exists yet, so remote topics are
    // drained but never produced into from here.
    tracing::info!(
        remote_workspaces = config.remote_workspaces.len(),
        "no remote entity source configured, workspace events replicator not scheduled"
    );
    scheduler.register_with(
        Arc::new(
            FolderEventsReplicatorJob::new(folder.clone(), resolver.clone(), dispatcher, clock.clone())
                .with_downstream(Arc::new(synchronizer)),
        ),
        schedule(JobType::FolderEventsReplicator)?,
    );
    let finisher = Arc::new(HeartbeatSessionFinisher::new(
        repository.clone(),
        queue.clone(),
        clock.clone(),
    ));
    scheduler.register_with(
        Arc::new(
            SessionFinishedDetectorJob::new(
                repository,
                finisher,
                queue.clone(),
                clock.clone(),
                config.workspaces_dir.clone(),
                config.heartbeat_threshold,
            )
            .with_notices(messages.clone(), alerts.clone()),
        ),
        schedule(JobType::SessionFinishedDetector)?,
    );
    scheduler.register_with(
        Arc::new(
            DataRetentionJob::standard(queue, messages, alerts, config.retention, clock.clone())
                .with_target(folder, config.retention.queue_events),
        ),
        schedule(JobType::DataRetention)?,
    );

    log_queue_state(inspection.as_ref(), resolver.as_ref()).await;

    let handle = scheduler.start();
    tracing::info!(
        workspaces = config.workspaces.len(),
        remote_workspaces = config.remote_workspaces.len(),
        events_dir = %config.events_dir.display(),
        "daemon started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    for (job_type, stats) in handle.stats() {
        tracing::info!(job = %job_type, runs = stats.runs, failures = stats.failures, "job summary");
    }
    handle.shutdown().await;
    Ok(())
}

async fn build_queue(
    config: &PlatformConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<(Arc<dyn PersistentQueue>, Arc<dyn QueueInspection>)> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            let queue = Arc::new(PostgresPersistentQueue::with_clock(pool, clock));
            queue
                .ensure_schema()
                .await
                .context("failed to prepare queue schema")?;
            tracing::info!("using postgres persistent queue");
            let inspection: Arc<dyn QueueInspection> = queue.clone();
            let queue: Arc<dyn PersistentQueue> = queue;
            Ok((queue, inspection))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; queue contents are lost on restart");
            let queue = Arc::new(InMemoryPersistentQueue::with_clock(clock));
            let inspection: Arc<dyn QueueInspection> = queue.clone();
            let queue: Arc<dyn PersistentQueue> = queue;
            Ok((queue, inspection))
        }
    }
}

async fn log_queue_state(inspection: &dyn QueueInspection, resolver: &dyn WorkspaceResolver) {
    let topics = match inspection.topics().await {
        Ok(topics) => topics,
        Err(err) => {
            tracing::warn!(error = %err, "failed to list queue topics");
            return;
        }
    };
    for topic in topics {
        match inspection.topic_stats(&topic).await {
            Ok(stats) => {
                let pending: u64 = stats.consumers.iter().map(|c| c.pending).max().unwrap_or(0);
                let known = resolver
                    .resolve(&WorkspaceId::new(topic.as_str()))
                    .is_some();
                tracing::info!(
                    topic = %topic,
                    entries = stats.entries,
                    head = stats.head,
                    pending,
                    known_workspace = known,
                    "queue topic"
                );
            }
            Err(err) => tracing::warn!(topic = %topic, error = %err, "failed to read topic stats"),
        }
    }
}
