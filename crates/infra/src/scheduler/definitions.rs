//! Static job definition set, loaded as a JSON array of
//! `{ "id", "jobType", "params" }` records and looked up by id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::JobType;

const PERIOD_PARAM: &str = "periodSeconds";

#[derive(Debug, Error)]
pub enum JobDefinitionError {
    #[error("failed to read job definitions from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse job definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate job definition id '{0}'")]
    DuplicateId(String),

    #[error("job '{id}' has invalid parameter {key}='{value}'")]
    InvalidParam {
        id: String,
        key: String,
        value: String,
    },
}

/// Declares a schedulable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub id: String,
    pub job_type: JobType,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl JobDescriptor {
    pub fn new(id: impl Into<String>, job_type: JobType) -> Self {
        Self {
            id: id.into(),
            job_type,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parameter parsed as whole seconds.
    pub fn param_duration_secs(&self, key: &str) -> Result<Option<Duration>, JobDefinitionError> {
        let Some(raw) = self.param(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| JobDefinitionError::InvalidParam {
                id: self.id.clone(),
                key: key.to_string(),
                value: raw.to_string(),
            })
    }

    /// Period override from the `periodSeconds` parameter.
    pub fn period(&self) -> Result<Option<Duration>, JobDefinitionError> {
        self.param_duration_secs(PERIOD_PARAM)
    }
}

/// Job definitions indexed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDefinitions {
    by_id: BTreeMap<String, JobDescriptor>,
}

impl JobDefinitions {
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = JobDescriptor>,
    ) -> Result<Self, JobDefinitionError> {
        let mut by_id = BTreeMap::new();
        for descriptor in descriptors {
            // Validate eagerly so a bad period fails at startup.
            descriptor.period()?;
            if by_id.contains_key(&descriptor.id) {
                return Err(JobDefinitionError::DuplicateId(descriptor.id));
            }
            by_id.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { by_id })
    }

    pub fn from_json_str(json: &str) -> Result<Self, JobDefinitionError> {
        let descriptors: Vec<JobDescriptor> = serde_json::from_str(json)?;
        Self::from_descriptors(descriptors)
    }

    pub fn load(path: &Path) -> Result<Self, JobDefinitionError> {
        let raw = std::fs::read_to_string(path).map_err(|source| JobDefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, id: &str) -> Option<&JobDescriptor> {
        self.by_id.get(id)
    }

    /// First definition of the given type, by id order.
    pub fn first_of(&self, job_type: JobType) -> Option<&JobDescriptor> {
        self.by_id.values().find(|d| d.job_type == job_type)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_definitions_and_looks_up_by_id() {
        let defs = JobDefinitions::from_json_str(
            r#"[
                {"id": "sync", "jobType": "PROJECTS_SYNCHRONIZER", "params": {"periodSeconds": "15"}},
                {"id": "retention", "jobType": "DATA_RETENTION"}
            ]"#,
        )
        .unwrap();

        assert_eq!(defs.len(), 2);
        let sync = defs.get("sync").unwrap();
        assert_eq!(sync.job_type, JobType::ProjectsSynchronizer);
        assert_eq!(sync.period().unwrap(), Some(Duration::from_secs(15)));
        assert_eq!(defs.get("retention").unwrap().period().unwrap(), None);
        assert!(defs.get("missing").is_none());
        assert_eq!(
            defs.first_of(JobType::DataRetention).map(|d| d.id.as_str()),
            Some("retention")
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = JobDefinitions::from_descriptors([
            JobDescriptor::new("a", JobType::DataRetention),
            JobDescriptor::new("a", JobType::ProjectsSynchronizer),
        ])
        .unwrap_err();
        assert!(matches!(err, JobDefinitionError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn rejects_non_positive_period() {
        let err = JobDefinitions::from_descriptors([
            JobDescriptor::new("a", JobType::DataRetention).with_param("periodSeconds", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, JobDefinitionError::InvalidParam { .. }));
    }
}
