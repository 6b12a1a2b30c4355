//! State file persistence
//!
//! Manages the `.stratus/state.json` file which records every resource the
//! stack currently owns. Writes go through a backup rotation, and a lock
//! file guards against concurrent applies.

use crate::error::{Result, StateError};
use crate::record::{StackState, StateRecord, STATE_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stratus_template::Value;
use tokio::fs;

const STATE_DIR: &str = ".stratus";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_SCRATCH: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";

/// Owns the persisted stack state and its on-disk location.
///
/// The engine funnels every mutation through the commit helpers, which
/// persist immediately. A crash between two commits therefore loses at most
/// the in-flight resource, never an already-committed one.
#[derive(Debug)]
pub struct StateStore {
    project_root: PathBuf,
    state: StackState,
}

impl StateStore {
    /// Load existing state (or start empty) from `project_root/.stratus/`.
    pub async fn open(project_root: impl AsRef<Path>) -> Result<Self> {
        let project_root = project_root.as_ref().to_path_buf();
        let state = Self::load_from(&project_root).await?;
        Ok(Self {
            project_root,
            state,
        })
    }

    pub fn state(&self) -> &StackState {
        &self.state
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn scratch_path(&self) -> PathBuf {
        self.state_dir().join(STATE_SCRATCH)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    async fn load_from(project_root: &Path) -> Result<StackState> {
        let path = project_root.join(STATE_DIR).join(STATE_FILE);
        if !path.exists() {
            tracing::debug!("State file not found, starting with empty state");
            return Ok(StackState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(StateError::VersionTooNew {
                found: state.version,
                supported: STATE_VERSION,
            });
        }

        tracing::debug!("Loaded state with {} records", state.records.len());
        Ok(state)
    }

    /// Persist the current state, rotating the previous file to a backup.
    pub async fn save(&self) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            fs::copy(&path, &backup).await?;
            tracing::debug!("Rotated state backup");
        }

        // Write the new generation to a scratch file and rename it into
        // place; the state file itself is never absent mid-save.
        let content = serde_json::to_string_pretty(&self.state)?;
        let scratch = self.scratch_path();
        fs::write(&scratch, content).await?;
        fs::rename(&scratch, &path).await?;

        tracing::debug!("Saved state with {} records", self.state.records.len());
        Ok(())
    }

    /// Record one resource's applied state and persist.
    pub async fn commit_record(&mut self, logical_id: &str, record: StateRecord) -> Result<()> {
        self.state.set_record(logical_id.to_string(), record);
        self.save().await
    }

    /// Forget one resource and persist.
    pub async fn remove_record(&mut self, logical_id: &str) -> Result<()> {
        self.state.remove_record(logical_id);
        self.save().await
    }

    /// Store the stack outputs and persist.
    pub async fn set_outputs(&mut self, outputs: BTreeMap<String, Value>) -> Result<()> {
        self.state.outputs = outputs;
        self.state.updated_at = Utc::now();
        self.save().await
    }

    /// Acquire the apply lock. Stale locks (older than 1 hour) are broken.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(StateError::Locked {
                    holder: lock_info.holder,
                    since: lock_info.acquired_at,
                });
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Lock file contents
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the apply lock
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // Drop cannot await, so this uses the blocking fs API
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
