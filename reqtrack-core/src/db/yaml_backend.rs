//! YAML file storage backend
//!
//! Keeps every record in one YAML document. Writers are serialized through
//! the `Storage` lock file, so `modify` is atomic across processes.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::traits::{BackendType, DatabaseBackend};
use crate::storage::Storage;
use crate::store::TrackerStore;

/// YAML file backend implementation
pub struct YamlBackend {
    storage: Storage,
    path: PathBuf,
}

impl YamlBackend {
    /// Creates a new YAML backend for the given file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            storage: Storage::new(&path),
            path,
        }
    }
}

impl DatabaseBackend for YamlBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Yaml
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<TrackerStore> {
        self.storage.load()
    }

    fn save(&self, store: &TrackerStore) -> Result<()> {
        self.storage.save(store)
    }

    fn modify(&self, update_fn: &mut dyn FnMut(&mut TrackerStore) -> Result<()>) -> Result<()> {
        self.storage.update_atomically(|store| update_fn(store))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewRequirement;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_backend_create_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.yaml");
        let backend = YamlBackend::new(&file_path);

        backend.create_if_not_exists().unwrap();
        assert!(file_path.exists());

        let store = backend.load().unwrap();
        assert!(store.requirements.is_empty());
        assert!(store.users.is_empty());
    }

    #[test]
    fn test_yaml_backend_operations_persist() {
        let temp_dir = TempDir::new().unwrap();
        let backend = YamlBackend::new(temp_dir.path().join("tracker.yaml"));

        let user = backend.create_user("alice", "").unwrap();
        let org = backend
            .create_organization("Acme", "", Some(user.id))
            .unwrap();
        let project = backend
            .create_project(&org.id, "Portal", "", Some(user.id))
            .unwrap();
        let req = backend
            .create_requirement(&project.id, NewRequirement::new("Login", ""), Some(user.id))
            .unwrap();
        assert_eq!(req.identifier, "REQ-001");

        let reopened = YamlBackend::new(temp_dir.path().join("tracker.yaml"));
        let stored = reopened.get_requirement(&req.id).unwrap().unwrap();
        assert_eq!(stored, req);
        assert_eq!(reopened.requirement_history(&req.id).unwrap().len(), 1);
    }
}
