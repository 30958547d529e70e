//! Moving data between storage backends
//!
//! Migrations copy the whole store; identifiers, sequences and history are
//! carried over unchanged.

use anyhow::{Context, Result};
use log::info;
use std::path::Path;

use super::traits::DatabaseBackend;
use super::{SqliteBackend, YamlBackend};
use crate::export::{export_json, import_json};

/// Copies a YAML tracker into a SQLite database.
///
/// Returns the number of requirements migrated.
pub fn migrate_yaml_to_sqlite<P1: AsRef<Path>, P2: AsRef<Path>>(
    yaml_path: P1,
    sqlite_path: P2,
) -> Result<usize> {
    let yaml_backend = YamlBackend::new(yaml_path);
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;
    copy_store(&yaml_backend, &sqlite_backend)
}

/// Copies a SQLite database into a YAML tracker.
///
/// Returns the number of requirements migrated.
pub fn migrate_sqlite_to_yaml<P1: AsRef<Path>, P2: AsRef<Path>>(
    sqlite_path: P1,
    yaml_path: P2,
) -> Result<usize> {
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;
    let yaml_backend = YamlBackend::new(yaml_path);
    copy_store(&sqlite_backend, &yaml_backend)
}

fn copy_store(source: &dyn DatabaseBackend, dest: &dyn DatabaseBackend) -> Result<usize> {
    let store = source
        .load()
        .with_context(|| format!("Failed to load {} database", source.backend_type()))?;
    let count = store.requirements.len();
    dest.save(&store)
        .with_context(|| format!("Failed to save to {} database", dest.backend_type()))?;
    info!(
        "Migrated {} requirement(s) from {:?} to {:?}",
        count,
        source.path(),
        dest.path()
    );
    Ok(count)
}

/// Exports data from any backend to a JSON file
pub fn export_backend_to_json<P: AsRef<Path>>(
    backend: &dyn DatabaseBackend,
    json_path: P,
) -> Result<()> {
    let store = backend.load()?;
    export_json(&store, json_path.as_ref())
}

/// Replaces a backend's contents with a JSON snapshot
pub fn import_json_to_backend<P: AsRef<Path>>(
    json_path: P,
    backend: &dyn DatabaseBackend,
) -> Result<usize> {
    let store = import_json(json_path.as_ref())?;
    backend.save(&store)?;
    Ok(store.requirements.len())
}
