use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use profhub_core::{InstanceId, ProjectId, SessionId, WorkspaceId};

use super::r#trait::{
    InstanceRecord, InstanceStatus, PlatformRepository, ProjectRecord, RepositoryError,
    RepositoryRecord, SessionRecord,
};

#[derive(Debug, Default)]
struct Tables {
    projects: HashMap<ProjectId, ProjectRecord>,
    repositories: HashMap<ProjectId, RepositoryRecord>,
    instances: HashMap<InstanceId, InstanceRecord>,
    sessions: HashMap<SessionId, SessionRecord>,
}

/// In-memory platform store.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPlatformRepository {
    tables: RwLock<Tables>,
}

impl InMemoryPlatformRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.tables
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, RepositoryError> {
        self.tables
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }
}

impl PlatformRepository for InMemoryPlatformRepository {
    fn find_project_by_origin(
        &self,
        workspace_id: &WorkspaceId,
        origin_project_id: &str,
    ) -> Result<Option<ProjectRecord>, RepositoryError> {
        Ok(self
            .read()?
            .projects
            .values()
            .find(|p| &p.workspace_id == workspace_id && p.origin_project_id == origin_project_id)
            .cloned())
    }

    fn find_project(&self, id: ProjectId) -> Result<Option<ProjectRecord>, RepositoryError> {
        Ok(self.read()?.projects.get(&id).cloned())
    }

    fn list_projects(&self) -> Result<Vec<ProjectRecord>, RepositoryError> {
        let mut projects: Vec<_> = self.read()?.projects.values().cloned().collect();
        projects.sort_by_key(|p| p.id);
        Ok(projects)
    }

    fn create_project(&self, project: ProjectRecord) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        let duplicate_origin = tables.projects.values().any(|p| {
            p.workspace_id == project.workspace_id && p.origin_project_id == project.origin_project_id
        });
        if duplicate_origin || tables.projects.contains_key(&project.id) {
            return Err(RepositoryError::Conflict(format!(
                "project {}",
                project.origin_project_id
            )));
        }
        tables.projects.insert(project.id, project);
        Ok(())
    }

    fn find_repository(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<RepositoryRecord>, RepositoryError> {
        Ok(self.read()?.repositories.get(&project_id).cloned())
    }

    fn create_repository(&self, repository: RepositoryRecord) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        if !tables.projects.contains_key(&repository.project_id) {
            return Err(RepositoryError::NotFound(format!(
                "project {}",
                repository.project_id
            )));
        }
        if tables.repositories.contains_key(&repository.project_id) {
            return Err(RepositoryError::Conflict(format!(
                "repository for project {}",
                repository.project_id
            )));
        }
        tables.repositories.insert(repository.project_id, repository);
        Ok(())
    }

    fn find_instance(&self, id: &InstanceId) -> Result<Option<InstanceRecord>, RepositoryError> {
        Ok(self.read()?.instances.get(id).cloned())
    }

    fn create_instance(&self, instance: InstanceRecord) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        if tables.instances.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict(format!("instance {}", instance.id)));
        }
        tables.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    fn find_instances_by_project(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<InstanceRecord>, RepositoryError> {
        let mut instances: Vec<_> = self
            .read()?
            .instances
            .values()
            .filter(|i| i.project_id == project_id)
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    fn update_instance_status(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        let instance = tables
            .instances
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("instance {id}")))?;
        instance.status = status;
        instance.finished_at = finished_at;
        Ok(())
    }

    fn find_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, RepositoryError> {
        Ok(self.read()?.sessions.get(id).cloned())
    }

    fn create_session(&self, session: SessionRecord) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        if !tables.instances.contains_key(&session.instance_id) {
            return Err(RepositoryError::NotFound(format!(
                "instance {}",
                session.instance_id
            )));
        }
        if tables.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Conflict(format!("session {}", session.id)));
        }
        tables.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn find_unfinished_sessions(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<SessionRecord>, RepositoryError> {
        let mut sessions: Vec<_> = self
            .read()?
            .sessions
            .values()
            .filter(|s| s.project_id == project_id && !s.is_finished())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (&a.instance_id, a.order).cmp(&(&b.instance_id, b.order)));
        Ok(sessions)
    }

    fn find_sessions_by_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<SessionRecord>, RepositoryError> {
        let mut sessions: Vec<_> = self
            .read()?
            .sessions
            .values()
            .filter(|s| &s.instance_id == instance_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.order);
        Ok(sessions)
    }

    fn record_heartbeat(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        let session = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("session {session_id}")))?;
        session.last_heartbeat_at = Some(at);
        Ok(())
    }

    fn mark_session_finished(
        &self,
        session_id: &SessionId,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.write()?;
        let session = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("session {session_id}")))?;
        if session.finished_at.is_some() {
            return Ok(false);
        }
        session.finished_at = Some(finished_at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at;

    fn project(origin: &str) -> ProjectRecord {
        ProjectRecord {
            id: ProjectId::new(),
            origin_project_id: origin.to_string(),
            workspace_id: WorkspaceId::new("ws-001"),
            name: origin.to_string(),
            label: None,
            attributes: Default::default(),
            created_at: at("2025-06-15T10:00:00Z"),
        }
    }

    fn instance(project_id: ProjectId, id: &str) -> InstanceRecord {
        InstanceRecord {
            id: InstanceId::new(id),
            project_id,
            relative_path: id.to_string(),
            status: InstanceStatus::Pending,
            started_at: at("2025-06-15T10:00:00Z"),
            finished_at: None,
        }
    }

    fn session(project_id: ProjectId, instance: &str, id: &str, order: u32) -> SessionRecord {
        SessionRecord {
            id: SessionId::new(id),
            instance_id: InstanceId::new(instance),
            project_id,
            order,
            relative_path: format!("{instance}/{id}"),
            profiler_settings: None,
            created_at: at("2025-06-15T10:00:00Z"),
            last_heartbeat_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn project_origin_is_unique_per_workspace() {
        let repo = InMemoryPlatformRepository::new();
        repo.create_project(project("p-1")).unwrap();

        let err = repo.create_project(project("p-1")).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let found = repo
            .find_project_by_origin(&WorkspaceId::new("ws-001"), "p-1")
            .unwrap();
        assert!(found.is_some());
        assert!(repo
            .find_project_by_origin(&WorkspaceId::new("ws-002"), "p-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn session_requires_instance() {
        let repo = InMemoryPlatformRepository::new();
        let p = project("p-1");
        let pid = p.id;
        repo.create_project(p).unwrap();

        let err = repo.create_session(session(pid, "i-1", "s-1", 1)).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[test]
    fn mark_finished_is_one_shot_and_filters_unfinished() {
        let repo = InMemoryPlatformRepository::new();
        let p = project("p-1");
        let pid = p.id;
        repo.create_project(p).unwrap();
        repo.create_instance(instance(pid, "i-1")).unwrap();
        repo.create_session(session(pid, "i-1", "s-1", 1)).unwrap();
        repo.create_session(session(pid, "i-1", "s-2", 2)).unwrap();

        assert!(repo
            .mark_session_finished(&SessionId::new("s-1"), at("2025-06-15T11:00:00Z"))
            .unwrap());
        assert!(!repo
            .mark_session_finished(&SessionId::new("s-1"), at("2025-06-15T12:00:00Z"))
            .unwrap());

        let unfinished = repo.find_unfinished_sessions(pid).unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id.as_str(), "s-2");

        let s1 = repo.find_session(&SessionId::new("s-1")).unwrap().unwrap();
        assert_eq!(s1.finished_at, Some(at("2025-06-15T11:00:00Z")));
    }

    #[test]
    fn instances_are_listed_per_project() {
        let repo = InMemoryPlatformRepository::new();
        let p1 = project("p-1");
        let p2 = project("p-2");
        let (pid1, pid2) = (p1.id, p2.id);
        repo.create_project(p1).unwrap();
        repo.create_project(p2).unwrap();
        repo.create_instance(instance(pid1, "i-b")).unwrap();
        repo.create_instance(instance(pid1, "i-a")).unwrap();
        repo.create_instance(instance(pid2, "i-c")).unwrap();

        let ids: Vec<_> = repo
            .find_instances_by_project(pid1)
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(ids, vec!["i-a", "i-b"]);
    }

    #[test]
    fn heartbeat_is_recorded_on_existing_sessions_only() {
        let repo = InMemoryPlatformRepository::new();
        let p = project("p-1");
        let pid = p.id;
        repo.create_project(p).unwrap();
        repo.create_instance(instance(pid, "i-1")).unwrap();
        repo.create_session(session(pid, "i-1", "s-1", 1)).unwrap();

        repo.record_heartbeat(&SessionId::new("s-1"), at("2025-06-15T11:55:00Z"))
            .unwrap();
        let s1 = repo.find_session(&SessionId::new("s-1")).unwrap().unwrap();
        assert_eq!(s1.last_heartbeat_at, Some(at("2025-06-15T11:55:00Z")));

        let err = repo
            .record_heartbeat(&SessionId::new("s-9"), at("2025-06-15T11:55:00Z"))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[test]
    fn derived_status_requires_all_sessions_finished() {
        let pid = ProjectId::new();
        let mut a = session(pid, "i-1", "s-1", 1);
        let b = session(pid, "i-1", "s-2", 2);
        assert_eq!(InstanceStatus::derive(&[]), InstanceStatus::Pending);

        a.finished_at = Some(at("2025-06-15T11:00:00Z"));
        assert_eq!(InstanceStatus::derive(&[a.clone(), b.clone()]), InstanceStatus::Active);

        let mut b = b;
        b.finished_at = Some(at("2025-06-15T11:30:00Z"));
        assert_eq!(InstanceStatus::derive(&[a, b]), InstanceStatus::Finished);
    }
}
