//! Scoped, locked access to stored state.
//!
//! A [`StateSession`] holds the state lock for the duration of one run and
//! renews it in the background while the run is going. It ends with
//! [`StateSession::commit`] (write, then unlock) or
//! [`StateSession::rollback`] (unlock only). A session dropped on any other
//! path releases its lock in the background.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::lock::{LOCK_REFRESH_SECS, LockInfo};
use super::store::StateStore;
use super::types::{STATE_VERSION, StackState};
use crate::error::{Result, StateError};

/// Exclusive handle on a stack's state for one run.
pub struct StateSession {
    store: Arc<dyn StateStore>,
    lock: Option<LockInfo>,
    state: StackState,
    heartbeat: Option<JoinHandle<()>>,
}

impl StateSession {
    /// Takes the lock and loads the current state (or starts an empty one).
    ///
    /// The lock is renewed every [`LOCK_REFRESH_SECS`] seconds until the
    /// session ends.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LockedByOther` if another run holds the lock, or
    /// any load error (the lock is released first).
    pub async fn acquire(
        store: Arc<dyn StateStore>,
        project: &str,
        environment: &str,
        operation: &str,
    ) -> Result<Self> {
        Self::acquire_with_refresh(
            store,
            project,
            environment,
            operation,
            Duration::from_secs(LOCK_REFRESH_SECS),
        )
        .await
    }

    /// Like [`StateSession::acquire`], renewing the lock every `refresh_every`.
    ///
    /// # Errors
    ///
    /// Same as [`StateSession::acquire`].
    pub async fn acquire_with_refresh(
        store: Arc<dyn StateStore>,
        project: &str,
        environment: &str,
        operation: &str,
        refresh_every: Duration,
    ) -> Result<Self> {
        let lock = store.acquire_lock("", operation).await?;

        let loaded = match store.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                release(store.as_ref(), &lock).await;
                return Err(e);
            }
        };

        let state = match loaded {
            Some(state) if state.version != STATE_VERSION => {
                release(store.as_ref(), &lock).await;
                return Err(StateError::VersionMismatch {
                    expected: STATE_VERSION.to_string(),
                    found: state.version,
                }
                .into());
            }
            Some(state) => {
                if state.project != project || state.environment != environment {
                    warn!(
                        "Stored state belongs to {}/{}, running as {project}/{environment}",
                        state.project, state.environment
                    );
                }
                state
            }
            None => {
                debug!("No stored state, starting empty");
                StackState::new(project, environment)
            }
        };

        info!(
            "Opened state session ({} backend, serial {})",
            store.backend_type(),
            state.serial
        );

        let heartbeat = spawn_heartbeat(Arc::clone(&store), lock.lock_id.clone(), refresh_every);

        Ok(Self {
            store,
            lock: Some(lock),
            state,
            heartbeat: Some(heartbeat),
        })
    }

    /// Returns the working copy of the state.
    #[must_use]
    pub const fn state(&self) -> &StackState {
        &self.state
    }

    /// Returns the working copy of the state for mutation.
    pub const fn state_mut(&mut self) -> &mut StackState {
        &mut self.state
    }

    /// Returns the lock held by this session.
    #[must_use]
    pub const fn lock(&self) -> Option<&LockInfo> {
        self.lock.as_ref()
    }

    /// Saves the working copy with the serial bumped, then releases the lock.
    ///
    /// Nothing is written unless the lock is still owned by this session.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LockLost` if the lock expired and was taken over
    /// or removed, or an error if the save fails; the lock is released
    /// regardless.
    pub async fn commit(mut self) -> Result<StackState> {
        self.stop_heartbeat();
        let Some(lock) = self.lock.take() else {
            return Err(StateError::LockLost {
                lock_id: String::from("<none>"),
            }
            .into());
        };

        if let Err(e) = self.store.refresh_lock(&lock.lock_id).await {
            error!("Not saving state: {e}");
            release(self.store.as_ref(), &lock).await;
            return Err(e);
        }

        self.state.serial += 1;
        self.state.last_updated = chrono::Utc::now();

        let saved = self.store.save(&self.state).await;
        release(self.store.as_ref(), &lock).await;
        saved?;

        info!("Committed state serial {}", self.state.serial);
        Ok(std::mem::replace(&mut self.state, StackState::new("", "")))
    }

    /// Releases the lock without writing anything.
    pub async fn rollback(mut self) {
        self.stop_heartbeat();
        if let Some(lock) = self.lock.take() {
            release(self.store.as_ref(), &lock).await;
        }
        debug!("Rolled back state session");
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

/// Renews the lock until aborted, or until another run owns it.
fn spawn_heartbeat(
    store: Arc<dyn StateStore>,
    lock_id: String,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.refresh_lock(&lock_id).await {
                Ok(lock) => debug!("State lock {lock_id} renewed until {}", lock.expires_at),
                Err(e) if e.is_conflict() => {
                    error!("{e}; this run's state will not be saved");
                    break;
                }
                Err(e) => warn!("Failed to renew state lock {lock_id}: {e}"),
            }
        }
    })
}

async fn release(store: &dyn StateStore, lock: &LockInfo) {
    if let Err(e) = store.release_lock(&lock.lock_id).await {
        warn!("Failed to release state lock {}: {e}", lock.lock_id);
    }
}

impl Drop for StateSession {
    fn drop(&mut self) {
        self.stop_heartbeat();
        let Some(lock) = self.lock.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("State session dropped without commit, releasing lock");
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    release(store.as_ref(), &lock).await;
                });
            }
            Err(_) => warn!(
                "State session dropped outside a runtime; lock {} left to expire",
                lock.lock_id
            ),
        }
    }
}

impl std::fmt::Debug for StateSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSession")
            .field("backend", &self.store.backend_type())
            .field("lock", &self.lock)
            .field("serial", &self.state.serial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalStateStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store() -> (Arc<dyn StateStore>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(temp.path()));
        (store, temp)
    }

    #[tokio::test]
    async fn test_commit_bumps_serial_and_unlocks() {
        let (store, _temp) = store();

        let session = StateSession::acquire(Arc::clone(&store), "shop-edge", "dev", "apply")
            .await
            .unwrap();
        assert!(store.is_locked().await.unwrap());

        let committed = session.commit().await.unwrap();
        assert_eq!(committed.serial, 1);
        assert!(!store.is_locked().await.unwrap());
        assert_eq!(store.load().await.unwrap().unwrap().serial, 1);
    }

    #[tokio::test]
    async fn test_second_session_conflicts() {
        let (store, _temp) = store();

        let first = StateSession::acquire(Arc::clone(&store), "shop-edge", "dev", "apply")
            .await
            .unwrap();
        let err = StateSession::acquire(Arc::clone(&store), "shop-edge", "dev", "apply")
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        first.rollback().await;
        assert!(!store.is_locked().await.unwrap());
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_long_run_locked() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(temp.path()));

        let session = StateSession::acquire_with_refresh(
            Arc::clone(&store),
            "shop-edge",
            "dev",
            "apply",
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        // Age the lock as if the run had been going past its expiry.
        let mut overdue = session.lock().cloned().unwrap();
        overdue.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        std::fs::write(
            temp.path().join("state.lock"),
            serde_json::to_string(&overdue).unwrap(),
        )
        .unwrap();

        let mut renewed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.is_locked().await.unwrap() {
                renewed = true;
                break;
            }
        }
        assert!(renewed);

        let other = LocalStateStore::with_base_dir(temp.path());
        let err = other.acquire_lock("run-2", "apply").await.unwrap_err();
        assert!(err.is_conflict());

        let committed = session.commit().await.unwrap();
        assert_eq!(committed.serial, 1);
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_after_takeover_writes_nothing() {
        let (store, _temp) = store();

        let mut session = StateSession::acquire(Arc::clone(&store), "shop-edge", "dev", "apply")
            .await
            .unwrap();
        session.state_mut().config_hash = String::from("stale");

        store.force_unlock().await.unwrap();
        let other = store.acquire_lock("run-2", "apply").await.unwrap();

        let err = session.commit().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::EdgeweaveError::State(StateError::LockLost { .. })
        ));
        assert!(err.is_conflict());
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(
            store.get_lock_info().await.unwrap().map(|l| l.lock_id),
            Some(other.lock_id)
        );
    }

    #[tokio::test]
    async fn test_version_mismatch_releases_lock() {
        let (store, _temp) = store();
        let mut old = StackState::new("shop-edge", "dev");
        old.version = String::from("0.1");
        store.save(&old).await.unwrap();

        let err = StateSession::acquire(Arc::clone(&store), "shop-edge", "dev", "apply")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let (store, _temp) = store();

        {
            let mut session =
                StateSession::acquire(Arc::clone(&store), "shop-edge", "dev", "apply")
                    .await
                    .unwrap();
            session.state_mut().config_hash = String::from("discarded");
        }

        let mut released = false;
        for _ in 0..50 {
            if !store.is_locked().await.unwrap() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released);
        assert!(store.load().await.unwrap().is_none());
    }
}
