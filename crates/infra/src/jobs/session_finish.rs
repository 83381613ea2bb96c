//! Session and instance finish detection.
//!
//! Sessions are finished from two signals: heartbeat silence longer than a
//! threshold, or a JVM crash log (`hs_err*.log`) in the session directory.
//! Instances are derived afterwards: FINISHED iff every session is.
//!
//! Events are appended before the store is updated. A failed append leaves
//! the session or instance unfinished so the next pass retries it; the
//! dedup key keeps the retried event from being duplicated.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use profhub_core::{Clock, InstanceId};
use profhub_events::{
    EventError, EventProducer, SessionFinishedContent, WorkspaceEvent, WorkspaceEventType,
};

use crate::queue::{PersistentQueue, QueueError, Topic};
use crate::repository::{
    InstanceRecord, InstanceStatus, Notice, NoticeKind, NoticeStore, PlatformRepository,
    ProjectRecord, RepositoryError, SessionRecord,
};
use crate::scheduler::{Job, JobContext, JobError, JobType};

#[derive(Debug, Error)]
pub enum FinishError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Content(#[from] EventError),

    #[error("project {0} not found")]
    MissingProject(String),
}

/// Decides whether a session is finished and records it.
pub trait SessionFinisher: Send + Sync {
    /// Finish the session if its heartbeat is stale. Returns whether it was
    /// finished by this call.
    fn try_finish_from_heartbeat(
        &self,
        session: &SessionRecord,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<bool, FinishError>;

    /// Finish the session unconditionally at `at`.
    fn force_finish(&self, session: &SessionRecord, at: DateTime<Utc>) -> Result<(), FinishError>;
}

/// Default finisher: writes `finished_at` and emits
/// `PROJECT_INSTANCE_SESSION_FINISHED` to the workspace topic.
///
/// | Heartbeat | Condition | Result |
/// |---|---|---|
/// | recorded | older than threshold | finished at the heartbeat instant |
/// | recorded | within threshold | not finished |
/// | none | created more than threshold ago | finished at `now` |
/// | none | created within threshold | not finished |
pub struct HeartbeatSessionFinisher {
    repository: Arc<dyn PlatformRepository>,
    queue: Arc<dyn PersistentQueue>,
    clock: Arc<dyn Clock>,
}

impl HeartbeatSessionFinisher {
    pub fn new(
        repository: Arc<dyn PlatformRepository>,
        queue: Arc<dyn PersistentQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            queue,
            clock,
        }
    }

    fn finish(&self, session: &SessionRecord, at: DateTime<Utc>) -> Result<(), FinishError> {
        let project = self
            .repository
            .find_project(session.project_id)?
            .ok_or_else(|| FinishError::MissingProject(session.project_id.to_string()))?;

        let event = WorkspaceEvent::with_content(
            session.id.as_str(),
            project.origin_project_id.clone(),
            project.workspace_id.clone(),
            WorkspaceEventType::ProjectInstanceSessionFinished,
            &SessionFinishedContent {
                instance_id: session.instance_id.to_string(),
                finished_at: at,
            },
            at,
            self.clock.now(),
            EventProducer::SessionFinisher,
        )?;
        self.queue.append_batch(
            &Topic::for_workspace(&project.workspace_id),
            vec![event],
            &|e| e.dedup_key(),
        )?;

        if self.repository.mark_session_finished(&session.id, at)? {
            debug!(session_id = %session.id, finished_at = %at, "session finished");
        }
        Ok(())
    }
}

impl SessionFinisher for HeartbeatSessionFinisher {
    fn try_finish_from_heartbeat(
        &self,
        session: &SessionRecord,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<bool, FinishError> {
        let finished_at = match session.last_heartbeat_at {
            Some(heartbeat) if now - heartbeat > threshold => heartbeat,
            Some(_) => return Ok(false),
            None if now - session.created_at > threshold => now,
            None => return Ok(false),
        };
        self.finish(session, finished_at)?;
        Ok(true)
    }

    fn force_finish(&self, session: &SessionRecord, at: DateTime<Utc>) -> Result<(), FinishError> {
        self.finish(session, at)
    }
}

/// What one project pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub checked_sessions: usize,
    pub finished_sessions: usize,
    pub crashed_sessions: usize,
    pub finished_instances: usize,
}

/// Advances session/instance lifecycle for every project with a repository.
pub struct SessionFinishedDetectorJob {
    repository: Arc<dyn PlatformRepository>,
    finisher: Arc<dyn SessionFinisher>,
    queue: Arc<dyn PersistentQueue>,
    clock: Arc<dyn Clock>,
    workspaces_dir: PathBuf,
    threshold: Duration,
    messages: Option<Arc<dyn NoticeStore>>,
    alerts: Option<Arc<dyn NoticeStore>>,
}

impl SessionFinishedDetectorJob {
    pub fn new(
        repository: Arc<dyn PlatformRepository>,
        finisher: Arc<dyn SessionFinisher>,
        queue: Arc<dyn PersistentQueue>,
        clock: Arc<dyn Clock>,
        workspaces_dir: impl Into<PathBuf>,
        threshold: Duration,
    ) -> Self {
        Self {
            repository,
            finisher,
            queue,
            clock,
            workspaces_dir: workspaces_dir.into(),
            threshold,
            messages: None,
            alerts: None,
        }
    }

    /// Record an alert for crashed sessions and a message for every
    /// instance the detector finishes.
    pub fn with_notices(
        mut self,
        messages: Arc<dyn NoticeStore>,
        alerts: Arc<dyn NoticeStore>,
    ) -> Self {
        self.messages = Some(messages);
        self.alerts = Some(alerts);
        self
    }

    pub fn detect_project(&self, project: &ProjectRecord) -> Result<DetectionReport, FinishError> {
        let mut report = DetectionReport::default();

        if self.repository.find_repository(project.id)?.is_none() {
            warn!(project_id = %project.id, "project has no repository, skipping finish detection");
            return Ok(report);
        }

        let now = self.clock.now();
        for session in &self.repository.find_unfinished_sessions(project.id)? {
            report.checked_sessions += 1;

            if self
                .finisher
                .try_finish_from_heartbeat(session, now, self.threshold)?
            {
                report.finished_sessions += 1;
            } else if has_crash_marker(&self.workspaces_dir.join(&session.relative_path)) {
                info!(session_id = %session.id, "crash log found, finishing session");
                self.finisher.force_finish(session, now)?;
                report.finished_sessions += 1;
                report.crashed_sessions += 1;
                self.notify(
                    self.alerts.as_deref(),
                    Notice::new(
                        NoticeKind::Alert,
                        project.workspace_id.clone(),
                        "JVM crash detected",
                        format!(
                            "session {} of instance {} left a crash log and was finished",
                            session.id, session.instance_id
                        ),
                        now,
                    )
                    .for_project(project.id),
                );
            }
        }

        // Instances whose sessions were finished on an earlier pass that
        // failed before settling are picked up here as well.
        for instance in self.repository.find_instances_by_project(project.id)? {
            if instance.status != InstanceStatus::Finished
                && self.settle_instance(project, &instance)?
            {
                report.finished_instances += 1;
            }
        }
        Ok(report)
    }

    fn notify(&self, store: Option<&dyn NoticeStore>, notice: Notice) {
        let Some(store) = store else {
            return;
        };
        if let Err(err) = store.insert(notice) {
            warn!(error = %err, "failed to record notice");
        }
    }

    /// Align the stored instance status with its sessions. Returns whether
    /// the instance transitioned to FINISHED.
    fn settle_instance(
        &self,
        project: &ProjectRecord,
        instance: &InstanceRecord,
    ) -> Result<bool, FinishError> {
        let instance_id = &instance.id;
        let sessions = self.repository.find_sessions_by_instance(instance_id)?;

        match InstanceStatus::derive(&sessions) {
            InstanceStatus::Finished if instance.status != InstanceStatus::Finished => {
                let finished_at = sessions
                    .iter()
                    .filter_map(|s| s.finished_at)
                    .max()
                    .unwrap_or_else(|| self.clock.now());
                self.emit_instance_finished(project, instance_id, finished_at)?;
                self.repository.update_instance_status(
                    instance_id,
                    InstanceStatus::Finished,
                    Some(finished_at),
                )?;
                info!(instance_id = %instance_id, "instance finished");
                self.notify(
                    self.messages.as_deref(),
                    Notice::new(
                        NoticeKind::Message,
                        project.workspace_id.clone(),
                        "Instance finished",
                        format!(
                            "instance {instance_id} was finished automatically after {} sessions",
                            sessions.len()
                        ),
                        self.clock.now(),
                    )
                    .for_project(project.id),
                );
                Ok(true)
            }
            InstanceStatus::Active if instance.status == InstanceStatus::Pending => {
                self.repository
                    .update_instance_status(instance_id, InstanceStatus::Active, None)?;
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn emit_instance_finished(
        &self,
        project: &ProjectRecord,
        instance_id: &InstanceId,
        finished_at: DateTime<Utc>,
    ) -> Result<(), FinishError> {
        let event = WorkspaceEvent {
            origin_event_id: instance_id.to_string(),
            origin_project_id: project.origin_project_id.clone(),
            workspace_id: project.workspace_id.clone(),
            event_type: WorkspaceEventType::ProjectInstanceFinished,
            content: serde_json::json!({}),
            origin_created_at: finished_at,
            created_at: self.clock.now(),
            producer: EventProducer::SessionFinisher,
        };
        self.queue.append_batch(
            &Topic::for_workspace(&project.workspace_id),
            vec![event],
            &|e| e.dedup_key(),
        )?;
        Ok(())
    }
}

fn has_crash_marker(session_dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(session_dir) else {
        return false;
    };
    entries.filter_map(Result::ok).any(|entry| {
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("hs_err") && name.ends_with(".log"))
    })
}

impl Job for SessionFinishedDetectorJob {
    fn job_type(&self) -> JobType {
        JobType::SessionFinishedDetector
    }

    fn execute(&self, _ctx: JobContext) -> Result<(), JobError> {
        let mut first_error = None;
        for project in self.repository.list_projects()? {
            match self.detect_project(&project) {
                Ok(report) if report.finished_sessions > 0 => info!(
                    project_id = %project.id,
                    finished_sessions = report.finished_sessions,
                    finished_instances = report.finished_instances,
                    "sessions finished"
                ),
                Ok(_) => {}
                Err(FinishError::Queue(err)) => {
                    warn!(project_id = %project.id, error = %err, "queue failure while detecting finished sessions");
                    first_error.get_or_insert(JobError::Queue(err));
                }
                Err(FinishError::Repository(err)) => {
                    warn!(project_id = %project.id, error = %err, "storage failure while detecting finished sessions");
                    first_error.get_or_insert(JobError::Repository(err));
                }
                Err(err) => {
                    warn!(project_id = %project.id, error = %err, "session finish detection failed");
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
