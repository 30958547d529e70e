//! Registry of named tracker databases and database path resolution

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Names a registry entry to use when no `--db`/`--project-db` is given
pub const DATABASE_ENV_VAR: &str = "REQTRACK_DB";

/// Overrides the registry file location
pub const REGISTRY_ENV_VAR: &str = "REQTRACK_REGISTRY_PATH";

/// Database used when nothing else is configured, relative to the working directory
pub const DEFAULT_DATABASE_FILE: &str = "reqtrack.db";

const REGISTRY_FILE_NAME: &str = ".reqtrack.config";

/// A named database in the registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseEntry {
    /// Path to the database file
    pub path: String,
    #[serde(default)]
    pub description: String,
}

/// Registry of all known databases
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registry {
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseEntry>,
    /// Optional default database name
    #[serde(default)]
    pub default_database: Option<String>,
}

impl Registry {
    /// Loads the registry from the provided path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read registry file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse registry file: {:?}", path.as_ref()))
    }

    /// Loads the registry, or an empty one when the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the registry to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write registry to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Registers a database or replaces an existing entry of the same name
    pub fn register_database(&mut self, name: &str, path: &str, description: &str) {
        self.databases.insert(
            name.to_string(),
            DatabaseEntry {
                path: path.to_string(),
                description: description.to_string(),
            },
        );
    }

    /// Removes an entry, clearing the default if it pointed there
    pub fn unregister_database(&mut self, name: &str) -> Result<()> {
        if self.databases.remove(name).is_none() {
            anyhow::bail!("Database '{}' not found in registry", name);
        }
        if self.default_database.as_deref() == Some(name) {
            self.default_database = None;
        }
        Ok(())
    }

    /// Sets a database as the default
    pub fn set_default_database(&mut self, name: &str) -> Result<()> {
        if !self.databases.contains_key(name) {
            anyhow::bail!("Database '{}' not found in registry", name);
        }
        self.default_database = Some(name.to_string());
        Ok(())
    }

    /// Gets the default database if set
    pub fn get_default_database(&self) -> Option<(&str, &DatabaseEntry)> {
        let name = self.default_database.as_deref()?;
        self.databases.get(name).map(|entry| (name, entry))
    }

    fn lookup(&self, name: &str, source: &str) -> Result<PathBuf> {
        match self.databases.get(name) {
            Some(entry) => Ok(PathBuf::from(&entry.path)),
            None => anyhow::bail!("Database '{}'{} not found in registry", name, source),
        }
    }
}

/// Gets the path to the registry file
pub fn get_registry_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(REGISTRY_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }

    let home_dir = dirs::home_dir().context("Failed to determine home directory")?;
    Ok(home_dir.join(REGISTRY_FILE_NAME))
}

/// Resolves the database path from explicit inputs.
///
/// Order: explicit path, named entry, `env_name`, the only registry entry,
/// the registry default, then `DEFAULT_DATABASE_FILE`.
pub fn resolve_database_path(
    db_path: Option<&Path>,
    db_name: Option<&str>,
    env_name: Option<&str>,
    registry: &Registry,
) -> Result<PathBuf> {
    if let Some(path) = db_path {
        return Ok(path.to_path_buf());
    }

    if let Some(name) = db_name {
        return registry.lookup(name, "");
    }

    if let Some(name) = env_name.filter(|n| !n.is_empty()) {
        return registry.lookup(name, &format!(" from {}", DATABASE_ENV_VAR));
    }

    if registry.databases.len() == 1 {
        if let Some(entry) = registry.databases.values().next() {
            return Ok(PathBuf::from(&entry.path));
        }
    }

    if let Some((_, entry)) = registry.get_default_database() {
        return Ok(PathBuf::from(&entry.path));
    }

    Ok(PathBuf::from(DEFAULT_DATABASE_FILE))
}

/// Determines which database to open, consulting the environment and the
/// registry file
pub fn determine_database_path(db_path: Option<&Path>, db_name: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = db_path {
        return Ok(path.to_path_buf());
    }

    let registry = Registry::load_or_default(get_registry_path()?)?;
    let env_name = env::var(DATABASE_ENV_VAR).ok();
    let path = resolve_database_path(None, db_name, env_name.as_deref(), &registry)?;
    debug!("Resolved database path {:?}", path);
    Ok(path)
}
