//! The acting user and name resolution for one CLI invocation

use anyhow::{Context, Result};
use uuid::Uuid;

use reqtrack_core::access::{self, role_can_administer, role_can_edit, role_can_view};
use reqtrack_core::identifier::format_identifier;
use reqtrack_core::{
    DatabaseBackend, MemberRole, Organization, Project, ProjectObjective, Requirement,
    RequirementCategory, TrackerError, User,
};

pub struct Session {
    pub backend: Box<dyn DatabaseBackend>,
    username: Option<String>,
    project: Option<String>,
}

impl Session {
    pub fn new(
        backend: Box<dyn DatabaseBackend>,
        username: Option<String>,
        project: Option<String>,
    ) -> Self {
        Self {
            backend,
            username,
            project,
        }
    }

    /// The user given with `--user`, who must already exist
    pub fn current_user(&self) -> Result<User> {
        let username = self
            .username
            .as_deref()
            .context("No user given; pass --user or set REQTRACK_USER")?;
        self.backend
            .find_user_by_username(username)?
            .ok_or_else(|| TrackerError::not_found("User", username).into())
    }

    pub fn user_by_name(&self, username: &str) -> Result<User> {
        self.backend
            .find_user_by_username(username)?
            .ok_or_else(|| TrackerError::not_found("User", username).into())
    }

    pub fn role_in(&self, user: &User, organization_id: &Uuid) -> Result<Option<MemberRole>> {
        self.backend.role_of(&user.id, organization_id)
    }

    pub fn ensure_view(&self, user: &User, organization_id: &Uuid) -> Result<()> {
        access::ensure(
            role_can_view(self.role_in(user, organization_id)?),
            "not a member of this organization",
        )
    }

    pub fn ensure_edit(&self, user: &User, organization_id: &Uuid) -> Result<()> {
        access::ensure(
            role_can_edit(self.role_in(user, organization_id)?),
            "viewers cannot change data",
        )
    }

    pub fn ensure_admin(&self, user: &User, organization_id: &Uuid) -> Result<()> {
        access::ensure(
            role_can_administer(self.role_in(user, organization_id)?),
            "organization admin required",
        )
    }

    /// Looks an organization up by UUID or exact name
    pub fn resolve_org(&self, key: &str) -> Result<Organization> {
        let found = match Uuid::parse_str(key) {
            Ok(id) => self.backend.get_organization(&id)?,
            Err(_) => self.backend.find_organization_by_name(key)?,
        };
        found.ok_or_else(|| TrackerError::not_found("Organization", key).into())
    }

    /// Resolves a project key among the projects the user can see
    pub fn resolve_project_key(&self, user: &User, key: &str) -> Result<Project> {
        if let Ok(id) = Uuid::parse_str(key) {
            let project = self
                .backend
                .get_project(&id)?
                .ok_or_else(|| TrackerError::not_found("Project", key))?;
            self.ensure_view(user, &project.organization_id)?;
            return Ok(project);
        }

        let mut matches = Vec::new();
        for organization in self.backend.organizations_for_user(&user.id)? {
            matches.extend(
                self.backend
                    .projects_in(&organization.id)?
                    .into_iter()
                    .filter(|p| p.name == key),
            );
        }
        match matches.len() {
            0 => Err(TrackerError::not_found("Project", key).into()),
            1 => Ok(matches.remove(0)),
            n => anyhow::bail!(
                "Project name '{}' matches {} projects; use its UUID instead",
                key,
                n
            ),
        }
    }

    /// The project given with `--project`
    pub fn project(&self, user: &User) -> Result<Project> {
        let key = self
            .project
            .as_deref()
            .context("No project given; pass --project or set REQTRACK_PROJECT")?;
        self.resolve_project_key(user, key)
    }

    /// Accepts a UUID, an identifier such as `REQ-007`, or a bare number
    pub fn resolve_requirement(&self, project: &Project, key: &str) -> Result<Requirement> {
        if let Ok(id) = Uuid::parse_str(key) {
            return match self.backend.get_requirement(&id)? {
                Some(req) if req.project_id == project.id => Ok(req),
                _ => Err(TrackerError::not_found("Requirement", key).into()),
            };
        }

        let identifier = match key.parse::<u64>() {
            Ok(number) => format_identifier(number),
            Err(_) => key.to_string(),
        };
        self.backend
            .find_requirement_by_identifier(&project.id, &identifier)?
            .ok_or_else(|| TrackerError::not_found("Requirement", key).into())
    }

    pub fn resolve_category(&self, project: &Project, key: &str) -> Result<RequirementCategory> {
        let by_id = Uuid::parse_str(key).ok();
        self.backend
            .categories(&project.id)?
            .into_iter()
            .find(|c| Some(c.id) == by_id || c.name == key)
            .ok_or_else(|| TrackerError::not_found("Category", key).into())
    }

    pub fn resolve_objective(&self, project: &Project, key: &str) -> Result<ProjectObjective> {
        let by_id = Uuid::parse_str(key).ok();
        self.backend
            .objectives(&project.id)?
            .into_iter()
            .find(|o| Some(o.id) == by_id || o.title == key)
            .ok_or_else(|| TrackerError::not_found("Objective", key).into())
    }

    /// Whether `user` may delete `requirement`
    pub fn can_delete(&self, user: &User, requirement: &Requirement) -> Result<bool> {
        let store = self.backend.load()?;
        Ok(access::can_delete_requirement(&store, &user.id, requirement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqtrack_core::{create_backend, NewRequirement};
    use tempfile::TempDir;

    fn session(dir: &TempDir, user: Option<&str>, project: Option<&str>) -> Session {
        let backend = create_backend(&dir.path().join("t.yaml"), None).unwrap();
        Session::new(backend, user.map(String::from), project.map(String::from))
    }

    #[test]
    fn test_requirement_lookup_forms() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, Some("alice"), Some("Portal"));
        let alice = s.backend.create_user("alice", "").unwrap();
        let org = s
            .backend
            .create_organization("Acme", "", Some(alice.id))
            .unwrap();
        s.backend
            .create_project(&org.id, "Portal", "", Some(alice.id))
            .unwrap();

        let user = s.current_user().unwrap();
        let project = s.project(&user).unwrap();
        let req = s
            .backend
            .create_requirement(&project.id, NewRequirement::new("Login", ""), None)
            .unwrap();

        assert_eq!(s.resolve_requirement(&project, "REQ-001").unwrap().id, req.id);
        assert_eq!(s.resolve_requirement(&project, "1").unwrap().id, req.id);
        assert_eq!(
            s.resolve_requirement(&project, &req.id.to_string()).unwrap().id,
            req.id
        );
        assert!(s.resolve_requirement(&project, "REQ-002").is_err());
    }

    #[test]
    fn test_project_hidden_from_non_members() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, Some("mallory"), Some("Portal"));
        let alice = s.backend.create_user("alice", "").unwrap();
        s.backend.create_user("mallory", "").unwrap();
        let org = s
            .backend
            .create_organization("Acme", "", Some(alice.id))
            .unwrap();
        let project = s
            .backend
            .create_project(&org.id, "Portal", "", Some(alice.id))
            .unwrap();

        let mallory = s.current_user().unwrap();
        assert!(s.project(&mallory).is_err());
        let err = s
            .resolve_project_key(&mallory, &project.id.to_string())
            .unwrap_err();
        assert!(matches!(
            reqtrack_core::as_tracker_error(&err),
            Some(TrackerError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_viewer_cannot_edit() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, Some("bob"), None);
        let alice = s.backend.create_user("alice", "").unwrap();
        let bob = s.backend.create_user("bob", "").unwrap();
        let org = s
            .backend
            .create_organization("Acme", "", Some(alice.id))
            .unwrap();
        s.backend
            .add_member(&org.id, &bob.id, MemberRole::Viewer)
            .unwrap();

        assert!(s.ensure_view(&bob, &org.id).is_ok());
        assert!(s.ensure_edit(&bob, &org.id).is_err());
        assert!(s.ensure_admin(&alice, &org.id).is_ok());
    }

    #[test]
    fn test_missing_user_flag() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, None, None);
        assert!(s.current_user().is_err());
    }
}
