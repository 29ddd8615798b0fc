//! File-backed log store
//!
//! The log lives in a single JSONL file. Writers are serialized twice: an
//! async mutex queues tasks of this process, and an advisory exclusive lock
//! on the file serializes separate processes (or separate stores) that share
//! the path.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use crate::error::StorageError;
use crate::{LogGuard, LogStore};

/// Delay between attempts to take a contended file lock
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Default time to wait for the log lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a file-backed log store
#[derive(Debug, Clone)]
pub struct FileLogConfig {
    /// Path of the JSONL log file
    pub path: PathBuf,
    /// Whether to fsync after every rewrite
    pub sync_on_write: bool,
    /// How long to wait for the lock; `None` waits indefinitely
    pub lock_timeout: Option<Duration>,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/telemetry-log.jsonl"),
            sync_on_write: true,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
        }
    }
}

impl FileLogConfig {
    /// Create a config for the given log path with default settings
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Log store backed by one file on disk
///
/// The file is created on first acquisition if absent. Its parent directory
/// is never created; a missing directory is reported as
/// [`StorageError::DirectoryUnavailable`].
#[derive(Debug, Clone)]
pub struct FileLogStore {
    config: FileLogConfig,
    writers: Arc<Mutex<()>>,
}

impl FileLogStore {
    /// Create a store with the given configuration
    pub fn new(config: FileLogConfig) -> Self {
        Self {
            config,
            writers: Arc::new(Mutex::new(())),
        }
    }

    /// Create a store for a path with default settings
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(FileLogConfig::new(path))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.lock_timeout.map(|timeout| Instant::now() + timeout)
    }

    fn timed_out(&self) -> StorageError {
        StorageError::LockTimeout(self.config.lock_timeout.unwrap_or_default())
    }

    async fn acquire_writer(
        &self,
        deadline: Option<Instant>,
    ) -> Result<OwnedMutexGuard<()>, StorageError> {
        let writers = Arc::clone(&self.writers);
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, writers.lock_owned())
                .await
                .map_err(|_| self.timed_out()),
            None => Ok(writers.lock_owned().await),
        }
    }

    async fn open_file(&self) -> Result<std::fs::File, StorageError> {
        let path = &self.config.path;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(StorageError::directory_unavailable(dir.display().to_string())),
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|e| StorageError::open(format!("{}: {}", path.display(), e)))?;

        Ok(file.into_std().await)
    }

    async fn lock_file(
        &self,
        file: &std::fs::File,
        deadline: Option<Instant>,
    ) -> Result<(), StorageError> {
        let contended = fs2::lock_contended_error().raw_os_error();
        loop {
            match fs2::FileExt::try_lock_exclusive(file) {
                Ok(()) => return Ok(()),
                Err(e) if e.raw_os_error() == contended => {
                    trace!(path = %self.config.path.display(), "Log file lock contended");
                }
                Err(e) => return Err(StorageError::lock(e.to_string())),
            }

            if let Some(deadline) = deadline {
                if Instant::now() + LOCK_RETRY_INTERVAL > deadline {
                    return Err(self.timed_out());
                }
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    type Guard = FileLogGuard;

    #[instrument(skip_all)]
    async fn acquire(&self) -> Result<FileLogGuard, StorageError> {
        let deadline = self.deadline();
        let writer = self.acquire_writer(deadline).await?;

        let file = self.open_file().await?;
        self.lock_file(&file, deadline).await?;

        debug!(path = %self.config.path.display(), "Log lock acquired");
        Ok(FileLogGuard {
            file: File::from_std(file),
            sync_on_write: self.config.sync_on_write,
            _writer: writer,
        })
    }
}

/// Exclusive access to the log file
///
/// The advisory lock belongs to the open handle and is released when the
/// guard drops and the handle closes. The in-process writer slot is released
/// right after.
#[derive(Debug)]
pub struct FileLogGuard {
    file: File,
    sync_on_write: bool,
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl LogGuard for FileLogGuard {
    async fn read_all(&mut self) -> Result<Vec<u8>, StorageError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        let mut content = Vec::new();
        self.file.read_to_end(&mut content).await?;
        Ok(content)
    }

    async fn rewrite(&mut self, contents: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        self.file.set_len(0).await?;
        self.file.write_all(contents).await?;
        self.file.flush().await?;

        if self.sync_on_write {
            self.file.sync_data().await?;
        }
        Ok(())
    }
}
