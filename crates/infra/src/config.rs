//! Platform configuration loaded from `PROFHUB_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use profhub_core::WorkspaceId;

use crate::jobs::RetentionPolicy;
use crate::scheduler::JobType;

pub const DEFAULT_EVENTS_DIR: &str = "./data/events";
pub const DEFAULT_WORKSPACES_DIR: &str = "./data/workspaces";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Default period per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPeriods {
    pub synchronizer: Duration,
    pub replicator: Duration,
    pub session_finish: Duration,
    pub retention: Duration,
}

impl Default for JobPeriods {
    fn default() -> Self {
        Self {
            synchronizer: Duration::from_secs(10),
            replicator: Duration::from_secs(10),
            session_finish: Duration::from_secs(30),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl JobPeriods {
    pub fn for_job(&self, job_type: JobType) -> Duration {
        match job_type {
            JobType::ProjectsSynchronizer => self.synchronizer,
            JobType::WorkspaceEventsReplicator | JobType::FolderEventsReplicator => self.replicator,
            JobType::SessionFinishedDetector => self.session_finish,
            JobType::DataRetention => self.retention,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    /// Postgres queue when set, in-memory queue otherwise.
    pub database_url: Option<String>,
    pub events_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    pub job_definitions: Option<PathBuf>,
    /// Local workspaces known at startup.
    pub workspaces: Vec<WorkspaceId>,
    /// Remote workspaces whose topics are drained like local ones.
    pub remote_workspaces: Vec<WorkspaceId>,
    pub periods: JobPeriods,
    pub retention: RetentionPolicy,
    pub heartbeat_threshold: chrono::Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            events_dir: PathBuf::from(DEFAULT_EVENTS_DIR),
            workspaces_dir: PathBuf::from(DEFAULT_WORKSPACES_DIR),
            job_definitions: None,
            workspaces: Vec::new(),
            remote_workspaces: Vec::new(),
            periods: JobPeriods::default(),
            retention: RetentionPolicy::default(),
            heartbeat_threshold: chrono::Duration::minutes(5),
        }
    }
}

impl PlatformConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let periods = JobPeriods {
            synchronizer: secs(&get, "PROFHUB_SYNC_PERIOD_SECS")?
                .unwrap_or(defaults.periods.synchronizer),
            replicator: secs(&get, "PROFHUB_REPLICATOR_PERIOD_SECS")?
                .unwrap_or(defaults.periods.replicator),
            session_finish: secs(&get, "PROFHUB_SESSION_FINISH_PERIOD_SECS")?
                .unwrap_or(defaults.periods.session_finish),
            retention: secs(&get, "PROFHUB_RETENTION_PERIOD_SECS")?
                .unwrap_or(defaults.periods.retention),
        };

        let retention = RetentionPolicy {
            queue_events: days(&get, "PROFHUB_RETENTION_QUEUE_EVENTS_DAYS")?
                .unwrap_or(defaults.retention.queue_events),
            messages: days(&get, "PROFHUB_RETENTION_MESSAGES_DAYS")?
                .unwrap_or(defaults.retention.messages),
            alerts: days(&get, "PROFHUB_RETENTION_ALERTS_DAYS")?
                .unwrap_or(defaults.retention.alerts),
        };

        let heartbeat_threshold = match secs(&get, "PROFHUB_HEARTBEAT_THRESHOLD_SECS")? {
            Some(d) => chrono::Duration::from_std(d).map_err(|_| ConfigError::Invalid {
                key: "PROFHUB_HEARTBEAT_THRESHOLD_SECS",
                value: d.as_secs().to_string(),
                reason: "out of range",
            })?,
            None => defaults.heartbeat_threshold,
        };

        let workspaces = workspace_ids(&get, "PROFHUB_WORKSPACES")?;
        let remote_workspaces = workspace_ids(&get, "PROFHUB_REMOTE_WORKSPACES")?;
        if let Some(id) = remote_workspaces.iter().find(|id| workspaces.contains(id)) {
            return Err(ConfigError::Invalid {
                key: "PROFHUB_REMOTE_WORKSPACES",
                value: id.to_string(),
                reason: "already configured as a local workspace",
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            events_dir: get("PROFHUB_EVENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.events_dir),
            workspaces_dir: get("PROFHUB_WORKSPACES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspaces_dir),
            job_definitions: get("PROFHUB_JOB_DEFINITIONS").map(PathBuf::from),
            workspaces,
            remote_workspaces,
            periods,
            retention,
            heartbeat_threshold,
        })
    }
}

fn positive_int<G>(get: &G, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be positive",
        }),
        Err(_) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "not an integer",
        }),
    }
}

/// Comma-separated workspace ids; empty items are ignored.
fn workspace_ids<G>(get: &G, key: &'static str) -> Result<Vec<WorkspaceId>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            WorkspaceId::parse(s).map_err(|_| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: "malformed workspace id",
            })
        })
        .collect()
}

fn secs<G>(get: &G, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    Ok(positive_int(get, key)?.map(Duration::from_secs))
}

fn days<G>(get: &G, key: &'static str) -> Result<Option<chrono::Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    positive_int(get, key)?
        .map(|n| {
            i64::try_from(n)
                .ok()
                .and_then(chrono::Duration::try_days)
                .ok_or(ConfigError::Invalid {
                    key,
                    value: n.to_string(),
                    reason: "out of range",
                })
        })
        .transpose()
}
