//! Database abstraction traits
//!
//! Every backend persists a `TrackerStore`. The write rules live on the store
//! itself; a backend only has to provide `load`, `save` and an atomic
//! `modify`, and every operation below falls out of those three. Backends
//! with row-level access override the hot paths.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::export::{export_requirements_csv, CsvExport};
use crate::filter::RequirementFilter;
use crate::models::{
    HistoryEntry, MemberRole, NewRequirement, Organization, OrganizationMember, Project,
    ProjectObjective, Requirement, RequirementCategory, RequirementStatus, User,
};
use crate::report::{self, Dashboard, TraceabilityMatrix};
use crate::store::{RequirementDetail, StatusUpdate, TrackerStore};

/// Types of database backends available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// YAML file storage (single file)
    Yaml,
    /// SQLite database storage
    Sqlite,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Yaml => write!(f, "YAML"),
            BackendType::Sqlite => write!(f, "SQLite"),
        }
    }
}

impl BackendType {
    /// Infers the backend from a file extension; unknown extensions are SQLite
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => BackendType::Yaml,
            _ => BackendType::Sqlite,
        }
    }
}

/// Configuration for database backends
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Backend type
    pub backend_type: BackendType,
    /// Whether to enable write-ahead logging (SQLite only)
    pub wal_mode: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(crate::registry::DEFAULT_DATABASE_FILE),
            backend_type: BackendType::Sqlite,
            wal_mode: true,
        }
    }
}

impl DatabaseConfig {
    pub fn for_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            backend_type: BackendType::from_path(&path),
            path,
            ..Default::default()
        }
    }
}

/// Runs `update_fn` through `backend.modify`, handing its result back.
///
/// Nothing is persisted when `update_fn` fails.
pub fn modify_with<B, T, F>(backend: &B, update_fn: F) -> Result<T>
where
    B: DatabaseBackend + ?Sized,
    F: FnOnce(&mut TrackerStore) -> Result<T>,
{
    let mut update_fn = Some(update_fn);
    let mut output = None;
    backend.modify(&mut |store: &mut TrackerStore| {
        let f = update_fn
            .take()
            .ok_or_else(|| anyhow!("update closure invoked more than once"))?;
        output = Some(f(store)?);
        Ok(())
    })?;
    output.ok_or_else(|| anyhow!("backend did not run the update"))
}

/// Core trait for database backends
pub trait DatabaseBackend: Send + Sync {
    /// Returns the backend type
    fn backend_type(&self) -> BackendType;

    /// Returns the path to the database file
    fn path(&self) -> &Path;

    // =========================================================================
    // Full Store Operations
    // =========================================================================

    /// Loads every record
    fn load(&self) -> Result<TrackerStore>;

    /// Replaces every record with the contents of `store`
    fn save(&self, store: &TrackerStore) -> Result<()>;

    /// Loads, applies `update_fn` and saves as one atomic unit.
    ///
    /// Concurrent writers are serialized; a failing `update_fn` leaves the
    /// stored data untouched.
    fn modify(&self, update_fn: &mut dyn FnMut(&mut TrackerStore) -> Result<()>) -> Result<()>;

    // =========================================================================
    // Users
    // =========================================================================

    fn create_user(&self, username: &str, email: &str) -> Result<User> {
        modify_with(self, |store| store.create_user(username, email))
    }

    fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.load()?.get_user(id).cloned())
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.load()?.find_user_by_username(username).cloned())
    }

    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.load()?.users)
    }

    fn delete_user(&self, id: &Uuid) -> Result<()> {
        modify_with(self, |store| store.delete_user(id))
    }

    // =========================================================================
    // Organizations and membership
    // =========================================================================

    fn create_organization(
        &self,
        name: &str,
        description: &str,
        creator: Option<Uuid>,
    ) -> Result<Organization> {
        modify_with(self, |store| {
            store.create_organization(name, description, creator)
        })
    }

    fn get_organization(&self, id: &Uuid) -> Result<Option<Organization>> {
        Ok(self.load()?.get_organization(id).cloned())
    }

    fn find_organization_by_name(&self, name: &str) -> Result<Option<Organization>> {
        Ok(self.load()?.find_organization_by_name(name).cloned())
    }

    /// Organizations the user belongs to
    fn organizations_for_user(&self, user_id: &Uuid) -> Result<Vec<Organization>> {
        let store = self.load()?;
        Ok(store
            .organizations_for_user(user_id)
            .into_iter()
            .cloned()
            .collect())
    }

    fn delete_organization(&self, id: &Uuid) -> Result<()> {
        modify_with(self, |store| store.delete_organization(id))
    }

    fn add_member(
        &self,
        organization_id: &Uuid,
        user_id: &Uuid,
        role: MemberRole,
    ) -> Result<OrganizationMember> {
        modify_with(self, |store| store.add_member(organization_id, user_id, role))
    }

    fn set_member_role(&self, organization_id: &Uuid, user_id: &Uuid, role: MemberRole) -> Result<()> {
        modify_with(self, |store| {
            store.set_member_role(organization_id, user_id, role)
        })
    }

    fn remove_member(&self, organization_id: &Uuid, user_id: &Uuid) -> Result<()> {
        modify_with(self, |store| store.remove_member(organization_id, user_id))
    }

    fn members_of(&self, organization_id: &Uuid) -> Result<Vec<OrganizationMember>> {
        let store = self.load()?;
        Ok(store
            .members_of(organization_id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The user's role in the organization, `None` for non-members
    fn role_of(&self, user_id: &Uuid, organization_id: &Uuid) -> Result<Option<MemberRole>> {
        Ok(self
            .load()?
            .membership(user_id, organization_id)
            .map(|m| m.role))
    }

    // =========================================================================
    // Projects
    // =========================================================================

    fn create_project(
        &self,
        organization_id: &Uuid,
        name: &str,
        description: &str,
        creator: Option<Uuid>,
    ) -> Result<Project> {
        modify_with(self, |store| {
            store.create_project(organization_id, name, description, creator)
        })
    }

    fn get_project(&self, id: &Uuid) -> Result<Option<Project>> {
        Ok(self.load()?.get_project(id).cloned())
    }

    fn projects_in(&self, organization_id: &Uuid) -> Result<Vec<Project>> {
        let store = self.load()?;
        Ok(store
            .projects_in(organization_id)
            .into_iter()
            .cloned()
            .collect())
    }

    fn delete_project(&self, id: &Uuid) -> Result<()> {
        modify_with(self, |store| store.delete_project(id))
    }

    // =========================================================================
    // Categories and objectives
    // =========================================================================

    fn add_category(
        &self,
        project_id: &Uuid,
        name: &str,
        description: &str,
    ) -> Result<RequirementCategory> {
        modify_with(self, |store| store.add_category(project_id, name, description))
    }

    fn categories(&self, project_id: &Uuid) -> Result<Vec<RequirementCategory>> {
        let store = self.load()?;
        Ok(store.categories(project_id).into_iter().cloned().collect())
    }

    fn delete_category(&self, id: &Uuid) -> Result<()> {
        modify_with(self, |store| store.delete_category(id))
    }

    fn add_objective(
        &self,
        project_id: &Uuid,
        title: &str,
        description: &str,
        creator: Option<Uuid>,
    ) -> Result<ProjectObjective> {
        modify_with(self, |store| {
            store.add_objective(project_id, title, description, creator)
        })
    }

    fn objectives(&self, project_id: &Uuid) -> Result<Vec<ProjectObjective>> {
        let store = self.load()?;
        Ok(store.objectives(project_id).into_iter().cloned().collect())
    }

    fn delete_objective(&self, id: &Uuid) -> Result<()> {
        modify_with(self, |store| store.delete_objective(id))
    }

    // =========================================================================
    // Requirements
    // =========================================================================

    /// Creates a requirement with its identifier and creation history entry
    fn create_requirement(
        &self,
        project_id: &Uuid,
        draft: NewRequirement,
        actor: Option<Uuid>,
    ) -> Result<Requirement> {
        modify_with(self, |store| store.create_requirement(project_id, draft, actor))
    }

    fn get_requirement(&self, id: &Uuid) -> Result<Option<Requirement>> {
        Ok(self.load()?.get_requirement(id).cloned())
    }

    fn find_requirement_by_identifier(
        &self,
        project_id: &Uuid,
        identifier: &str,
    ) -> Result<Option<Requirement>> {
        Ok(self
            .load()?
            .find_requirement_by_identifier(project_id, identifier)
            .cloned())
    }

    /// Requirements of a project in creation order
    fn list_requirements(
        &self,
        project_id: &Uuid,
        filter: &RequirementFilter,
    ) -> Result<Vec<Requirement>> {
        let store = self.load()?;
        Ok(store
            .list_requirements(project_id, filter)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Persists an edit; returns the history entry when the status changed
    fn update_requirement(
        &self,
        requirement: Requirement,
        actor: Option<Uuid>,
    ) -> Result<Option<HistoryEntry>> {
        modify_with(self, |store| store.update_requirement(requirement, actor))
    }

    fn update_status(&self, id: &Uuid, target: &str, actor: Option<Uuid>) -> Result<StatusUpdate> {
        modify_with(self, |store| store.update_status(id, target, actor))
    }

    fn delete_requirement(&self, id: &Uuid) -> Result<Requirement> {
        modify_with(self, |store| store.delete_requirement(id))
    }

    fn add_related(&self, from: &Uuid, to: &Uuid) -> Result<bool> {
        modify_with(self, |store| store.add_related(from, to))
    }

    fn remove_related(&self, from: &Uuid, to: &Uuid) -> Result<bool> {
        modify_with(self, |store| store.remove_related(from, to))
    }

    fn set_parent(&self, child: &Uuid, parent: Option<Uuid>) -> Result<()> {
        modify_with(self, |store| store.set_parent(child, parent))
    }

    fn link_objective(&self, requirement_id: &Uuid, objective_id: &Uuid) -> Result<bool> {
        modify_with(self, |store| store.link_objective(requirement_id, objective_id))
    }

    fn unlink_objective(&self, requirement_id: &Uuid, objective_id: &Uuid) -> Result<bool> {
        modify_with(self, |store| {
            store.unlink_objective(requirement_id, objective_id)
        })
    }

    fn requirement_detail(&self, id: &Uuid) -> Result<RequirementDetail> {
        self.load()?.requirement_detail(id)
    }

    /// History of a requirement, newest first
    fn requirement_history(&self, id: &Uuid) -> Result<Vec<HistoryEntry>> {
        Ok(self.load()?.history_for(id))
    }

    // =========================================================================
    // Reports
    // =========================================================================

    fn status_counts(&self, project_id: &Uuid) -> Result<Vec<(RequirementStatus, usize)>> {
        Ok(report::status_counts(&self.load()?, project_id))
    }

    fn traceability_matrix(&self, project_id: &Uuid) -> Result<TraceabilityMatrix> {
        report::traceability_matrix(&self.load()?, project_id)
    }

    fn dashboard(&self, user_id: &Uuid) -> Result<Dashboard> {
        Ok(report::dashboard(&self.load()?, user_id))
    }

    fn export_csv(&self, project_id: &Uuid) -> Result<CsvExport> {
        export_requirements_csv(&self.load()?, project_id)
    }

    // =========================================================================
    // Utility Operations
    // =========================================================================

    /// Returns true if the database file exists
    fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Creates the database with empty data if it doesn't exist
    fn create_if_not_exists(&self) -> Result<()> {
        if !self.exists() {
            self.save(&TrackerStore::new())?;
        }
        Ok(())
    }

    /// Returns record counts
    fn stats(&self) -> Result<DatabaseStats> {
        let store = self.load()?;
        Ok(DatabaseStats {
            user_count: store.users.len(),
            organization_count: store.organizations.len(),
            project_count: store.projects.len(),
            requirement_count: store.requirements.len(),
            history_count: store.history.len(),
            backend_type: self.backend_type(),
        })
    }
}

/// Statistics about a database
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub user_count: usize,
    pub organization_count: usize,
    pub project_count: usize,
    pub requirement_count: usize,
    pub history_count: usize,
    pub backend_type: BackendType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_from_extension() {
        assert_eq!(BackendType::from_path(Path::new("a.yaml")), BackendType::Yaml);
        assert_eq!(BackendType::from_path(Path::new("a.yml")), BackendType::Yaml);
        assert_eq!(BackendType::from_path(Path::new("a.db")), BackendType::Sqlite);
        assert_eq!(BackendType::from_path(Path::new("a.sqlite3")), BackendType::Sqlite);
        assert_eq!(BackendType::from_path(Path::new("reqtrack")), BackendType::Sqlite);
    }

    #[test]
    fn test_config_for_path() {
        let config = DatabaseConfig::for_path("data/tracker.yaml");
        assert_eq!(config.backend_type, BackendType::Yaml);
        assert!(config.wal_mode);
    }
}
