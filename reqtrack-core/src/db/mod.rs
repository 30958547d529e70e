//! Database abstraction layer for reqtrack
//!
//! Storage backends (YAML files, SQLite) sit behind the `DatabaseBackend`
//! trait so the CLI and tests work against either one.

mod migration;
mod sqlite_backend;
mod traits;
mod yaml_backend;

pub use migration::{
    export_backend_to_json, import_json_to_backend, migrate_sqlite_to_yaml,
    migrate_yaml_to_sqlite,
};
pub use sqlite_backend::SqliteBackend;
pub use traits::{modify_with, BackendType, DatabaseBackend, DatabaseConfig, DatabaseStats};
pub use yaml_backend::YamlBackend;

use anyhow::Result;
use log::debug;
use std::path::Path;

/// Creates a database backend based on the file extension or explicit type
pub fn create_backend(
    path: &Path,
    backend_type: Option<BackendType>,
) -> Result<Box<dyn DatabaseBackend>> {
    let mut config = DatabaseConfig::for_path(path);
    if let Some(bt) = backend_type {
        config.backend_type = bt;
    }
    open_with_config(&config)
}

/// Opens the backend described by `config`, creating the file if needed
pub fn open_with_config(config: &DatabaseConfig) -> Result<Box<dyn DatabaseBackend>> {
    debug!("Opening {} database at {:?}", config.backend_type, config.path);
    match config.backend_type {
        BackendType::Yaml => Ok(Box::new(YamlBackend::new(&config.path))),
        BackendType::Sqlite => Ok(Box::new(SqliteBackend::with_config(config)?)),
    }
}

/// Opens an existing database or creates a new one
pub fn open_or_create(
    path: &Path,
    backend_type: Option<BackendType>,
) -> Result<Box<dyn DatabaseBackend>> {
    let backend = create_backend(path, backend_type)?;
    backend.create_if_not_exists()?;
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_backend_by_extension() {
        let dir = TempDir::new().unwrap();
        let yaml = create_backend(&dir.path().join("t.yaml"), None).unwrap();
        assert_eq!(yaml.backend_type(), BackendType::Yaml);
        let sqlite = create_backend(&dir.path().join("t.db"), None).unwrap();
        assert_eq!(sqlite.backend_type(), BackendType::Sqlite);
        let forced = create_backend(&dir.path().join("t.db"), Some(BackendType::Yaml)).unwrap();
        assert_eq!(forced.backend_type(), BackendType::Yaml);
    }

    #[test]
    fn test_open_or_create_makes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("t.yaml");
        let backend = open_or_create(&path, None).unwrap();
        assert!(path.exists());
        assert_eq!(backend.stats().unwrap().requirement_count, 0);
    }
}
