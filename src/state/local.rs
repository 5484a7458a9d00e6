//! Local file-based state storage backend.
//!
//! This module provides a simple file-based state storage for local development
//! and single-machine use.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{EdgeweaveError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::StackState;

/// Default state directory name.
pub const STATE_DIR: &str = ".edgeweave";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store under `./.edgeweave`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                EdgeweaveError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::backend(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::corrupted(format!("Failed to read lock file: {e}")).into());
            }
        };

        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(EdgeweaveError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }));
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| {
            EdgeweaveError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            EdgeweaveError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(true)
    }

    /// Overwrites the lock file through a temporary file and a rename.
    async fn replace_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let temp_path = self.lock_path.with_extension("lock.tmp");
        fs::write(&temp_path, content.as_bytes()).await.map_err(|e| {
            EdgeweaveError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;
        fs::rename(&temp_path, &self.lock_path).await.map_err(|e| {
            EdgeweaveError::State(StateError::LockFailed {
                message: format!("Failed to replace lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EdgeweaveError::State(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StackState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read state file: {e}")))?;

        let state: StackState = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state file: {e}")))?;

        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_dir().await?;

        info!("Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StateError::backend(format!("Failed to create temp state file: {e}"))
        })?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::backend(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::backend(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to rename state file: {e}")))?;

        debug!("State saved (serial {})", state.serial);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::backend(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::new(&holder_id, operation);

        if !self.create_lock_file(&lock_info).await? {
            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(EdgeweaveError::State(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }));
                }
                Some(existing) => {
                    warn!(
                        "Taking over expired lock held by {} since {}",
                        existing.holder, existing.acquired_at
                    );
                }
                None => {}
            }

            self.delete_lock_file().await?;
            if !self.create_lock_file(&lock_info).await? {
                // Someone else won the race for the stale lock.
                let holder = self
                    .read_lock_file()
                    .await?
                    .map_or_else(|| String::from("unknown"), |l| l.holder);
                return Err(EdgeweaveError::State(StateError::LockedByOther {
                    holder,
                    since: String::from("just now"),
                }));
            }
        }

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut lock = match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => existing,
            _ => {
                return Err(StateError::LockLost {
                    lock_id: lock_id.to_string(),
                }
                .into());
            }
        };

        lock.refresh();
        self.replace_lock_file(&lock).await?;
        debug!("Refreshed state lock {lock_id} until {}", lock.expires_at);

        Ok(lock)
    }

    async fn force_unlock(&self) -> Result<()> {
        warn!("Force-removing lock file: {}", self.lock_path.display());
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = StackState::new("shop-edge", "dev");
        state.serial = 7;
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.project, "shop-edge");
        assert_eq!(loaded.serial, 7);
        assert!(!store.state_path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let (store, _temp) = create_test_store();
        store.ensure_dir().await.unwrap();
        std::fs::write(store.state_path(), "{not json").unwrap();

        let result = store.load().await;
        assert!(matches!(
            result,
            Err(EdgeweaveError::State(StateError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder", "apply")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1", "apply")
            .await
            .expect("Failed to acquire first lock");

        let err = store.acquire_lock("holder-2", "apply").await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("holder-1"));
    }

    #[test]
    fn test_no_lock_info_on_fresh_store() {
        let (store, _temp) = create_test_store();
        let info = tokio_test::assert_ok!(tokio_test::block_on(store.get_lock_info()));
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();

        let _lock = store.acquire_lock("holder-1", "apply").await.unwrap();
        store.release_lock("someone-else").await.unwrap();
        assert!(store.is_locked().await.unwrap());

        store.force_unlock().await.unwrap();
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_refreshed_lock_cannot_be_taken_over() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("run-1", "apply").await.unwrap();
        let mut overdue = lock.clone();
        overdue.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        store.replace_lock_file(&overdue).await.unwrap();

        let refreshed = store.refresh_lock(&lock.lock_id).await.unwrap();
        assert!(!refreshed.is_expired());
        assert_eq!(refreshed.holder, "run-1");

        let err = store.acquire_lock("run-2", "apply").await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("run-1"));
    }

    #[tokio::test]
    async fn test_refresh_after_takeover_reports_lost_lock() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("run-1", "apply").await.unwrap();
        store.force_unlock().await.unwrap();
        let _other = store.acquire_lock("run-2", "apply").await.unwrap();

        let err = store.refresh_lock(&lock.lock_id).await.unwrap_err();
        assert!(matches!(
            err,
            EdgeweaveError::State(StateError::LockLost { .. })
        ));
        assert_eq!(
            store.get_lock_info().await.unwrap().map(|l| l.holder),
            Some(String::from("run-2"))
        );
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let (store, _temp) = create_test_store();

        let mut stale = LockInfo::new("crashed-run", "apply");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        assert!(store.create_lock_file(&stale).await.unwrap());

        let lock = store.acquire_lock("holder-2", "apply").await.unwrap();
        assert_eq!(lock.holder, "holder-2");
        assert_eq!(
            store.get_lock_info().await.unwrap().map(|l| l.lock_id),
            Some(lock.lock_id)
        );
    }
}
