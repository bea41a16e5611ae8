//! Persisted run state
//!
//! The fingerprint of the last run and the artifacts it produced live in a
//! JSON state file. The store is passed into the pipeline explicitly; callers
//! take an exclusive advisory lock before reading or mutating it.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checksum::Fingerprint;
use crate::error::{ConfigurationError, PipelineError, StateError};

/// How a recorded run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    Cancelled,
}

/// State persisted between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRunState {
    /// Schema fingerprint the artifacts were generated from
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts_fingerprint: Option<Fingerprint>,
    /// Digest of the settings that shape the run's output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_fingerprint: Option<Fingerprint>,
    pub recorded_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Artifact file names written by the run
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Held while the state may be mutated; released on drop
pub trait StateLock: Send {}

/// Storage for [`PersistedRunState`]
pub trait RunStateStore: Send {
    /// Acquire the exclusive lock.
    ///
    /// Fails with [`ConfigurationError::StateLocked`] if another process holds it.
    fn lock(&self) -> Result<Box<dyn StateLock>, PipelineError>;

    /// Load the prior record, `None` when no run was recorded yet
    fn load(&self) -> Result<Option<PersistedRunState>, StateError>;

    fn save(&self, state: &PersistedRunState) -> Result<(), StateError>;
}

// =============================================================================
// File store
// =============================================================================

/// JSON state file guarded by `<state file>.lock`
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RunStateStore for FileStateStore {
    fn lock(&self) -> Result<Box<dyn StateLock>, PipelineError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| self.io_error(e))?;

        match try_flock_exclusive(&file) {
            Ok(true) => {
                debug!(path = %lock_path.display(), "Acquired state lock");
                Ok(Box::new(FileLock { file, path: lock_path }))
            }
            Ok(false) => Err(ConfigurationError::StateLocked(lock_path).into()),
            Err(e) => Err(self.io_error(e).into()),
        }
    }

    fn load(&self) -> Result<Option<PersistedRunState>, StateError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, state: &PersistedRunState) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        std::io::Write::write_all(&mut tmp, &json).map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

struct FileLock {
    file: File,
    path: PathBuf,
}

impl StateLock for FileLock {}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = unlock(&self.file) {
            warn!(path = %self.path.display(), "Failed to release state lock: {}", e);
        } else {
            debug!(path = %self.path.display(), "Released state lock");
        }
    }
}

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if another
/// process holds it.
fn try_flock_exclusive(file: &File) -> std::io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: flock is a standard POSIX call on a descriptor owned by `file`.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

fn unlock(file: &File) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: see try_flock_exclusive
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    #[cfg(not(unix))]
    let _ = file;
    Ok(())
}

// =============================================================================
// In-memory store
// =============================================================================

/// Store kept in memory; used for library embedding and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    record: Option<PersistedRunState>,
    locked: bool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedRunState) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.record = Some(record);
        }
        store
    }

    pub fn record(&self) -> Option<PersistedRunState> {
        self.inner.lock().ok().and_then(|i| i.record.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().map(|i| i.locked).unwrap_or(false)
    }
}

struct MemoryLock {
    inner: Arc<Mutex<MemoryState>>,
}

impl StateLock for MemoryLock {}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.locked = false;
        }
    }
}

impl RunStateStore for MemoryStateStore {
    fn lock(&self) -> Result<Box<dyn StateLock>, PipelineError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ConfigurationError::StateLocked(PathBuf::from("<memory>")))?;
        if inner.locked {
            return Err(ConfigurationError::StateLocked(PathBuf::from("<memory>")).into());
        }
        inner.locked = true;
        Ok(Box::new(MemoryLock {
            inner: Arc::clone(&self.inner),
        }))
    }

    fn load(&self) -> Result<Option<PersistedRunState>, StateError> {
        Ok(self.record())
    }

    fn save(&self, state: &PersistedRunState) -> Result<(), StateError> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.record = Some(state.clone());
        }
        Ok(())
    }
}
