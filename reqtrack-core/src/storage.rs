use anyhow::{Context, Result};
use fs2::FileExt;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::store::TrackerStore;

/// How long to wait for another process to release the lock
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Saves and loads the tracker from a YAML file, serializing writers
/// through a sidecar lock file
pub struct Storage {
    file_path: PathBuf,
    lock_file_path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let mut lock_name = file_path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            file_path,
            lock_file_path: PathBuf::from(lock_name),
        }
    }

    /// Returns the path to the storage file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn wait_for_lock<F>(&self, lock_file: &File, mut try_lock: F) -> Result<()>
    where
        F: FnMut(&File) -> std::io::Result<()>,
    {
        let start = Instant::now();
        loop {
            match try_lock(lock_file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        anyhow::bail!(
                            "Timeout waiting for file lock - another process may be writing: {:?}",
                            self.file_path
                        );
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to acquire lock on {:?}", self.lock_file_path)
                    })
                }
            }
        }
    }

    /// Acquire an exclusive lock; released when the returned handle drops
    fn acquire_write_lock(&self) -> Result<File> {
        if let Some(parent) = self.lock_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to create lock file: {:?}", self.lock_file_path))?;

        self.wait_for_lock(&lock_file, |f| FileExt::try_lock_exclusive(f))?;

        // Lock holder info, for debugging stuck locks
        let _ = writeln!(
            lock_file,
            "Locked by PID {} at {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        Ok(lock_file)
    }

    /// Acquire a shared lock for reading
    fn acquire_read_lock(&self) -> Result<Option<File>> {
        if !self.lock_file_path.exists() {
            return Ok(None);
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to open lock file: {:?}", self.lock_file_path))?;

        self.wait_for_lock(&lock_file, |f| FileExt::try_lock_shared(f))?;
        Ok(Some(lock_file))
    }

    fn read_store(&self) -> Result<TrackerStore> {
        if !self.file_path.exists() {
            return Ok(TrackerStore::new());
        }
        let file = File::open(&self.file_path)
            .with_context(|| format!("Failed to open file: {:?}", self.file_path))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader)
            .with_context(|| format!("Failed to parse YAML from {:?}", self.file_path))
    }

    fn write_store(&self, store: &TrackerStore) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(store)?;
        fs::write(&self.file_path, yaml)
            .with_context(|| format!("Failed to write {:?}", self.file_path))
    }

    /// Loads the tracker; a missing file reads as an empty store
    pub fn load(&self) -> Result<TrackerStore> {
        let _lock = self.acquire_read_lock()?;
        self.read_store()
    }

    /// Saves the whole tracker under the exclusive lock
    pub fn save(&self, store: &TrackerStore) -> Result<()> {
        let _lock = self.acquire_write_lock()?;
        self.write_store(store)
    }

    /// Reloads, applies `update_fn` and saves while holding the exclusive lock.
    ///
    /// Nothing is written when `update_fn` fails.
    pub fn update_atomically<F>(&self, update_fn: F) -> Result<TrackerStore>
    where
        F: FnOnce(&mut TrackerStore) -> Result<()>,
    {
        let _lock = self.acquire_write_lock()?;

        let mut store = self.read_store()?;
        update_fn(&mut store)?;
        self.write_store(&store)?;
        debug!("Saved {:?}", self.file_path);

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("tracker.yaml"));
        let store = storage.load().unwrap();
        assert!(store.projects.is_empty());
    }

    #[test]
    fn test_update_atomically_persists() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("tracker.yaml"));
        storage
            .update_atomically(|store| store.create_user("alice", "").map(|_| ()))
            .unwrap();

        let reloaded = storage.load().unwrap();
        assert_eq!(reloaded.users.len(), 1);
        assert!(dir.path().join("tracker.yaml.lock").exists());
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("tracker.yaml"));
        storage
            .update_atomically(|store| store.create_user("alice", "").map(|_| ()))
            .unwrap();

        let result = storage.update_atomically(|store| {
            store.create_user("bob", "")?;
            store.create_user("alice", "")?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(storage.load().unwrap().users.len(), 1);
    }
}
