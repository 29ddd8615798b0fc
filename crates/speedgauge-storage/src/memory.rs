//! In-memory log store
//!
//! Holds the log content in a byte buffer behind an async mutex. Used by
//! tests and by the HTTP layer's test harness; it honors the same exclusive
//! acquire/release contract as the file store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::{LogGuard, LogStore};

/// In-memory implementation of [`LogStore`]
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogStore {
    content: Arc<Mutex<Vec<u8>>>,
    lock_timeout: Option<Duration>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with raw log content
    pub fn with_content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: Arc::new(Mutex::new(content.into())),
            ..Default::default()
        }
    }

    /// Bound how long `acquire` waits for the lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Make every subsequent `acquire` fail as if the storage could not be opened
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of the current content
    ///
    /// Waits for any in-flight writer to finish.
    pub async fn content(&self) -> Vec<u8> {
        self.content.lock().await.clone()
    }

    /// Current content as text, one entry per line
    pub async fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.content().await)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    type Guard = InMemoryLogGuard;

    async fn acquire(&self) -> Result<InMemoryLogGuard, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::open("in-memory store marked unavailable"));
        }

        let content = Arc::clone(&self.content);
        let guard = match self.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, content.lock_owned())
                .await
                .map_err(|_| StorageError::LockTimeout(timeout))?,
            None => content.lock_owned().await,
        };

        Ok(InMemoryLogGuard { content: guard })
    }
}

/// Exclusive access to an [`InMemoryLogStore`] buffer
#[derive(Debug)]
pub struct InMemoryLogGuard {
    content: OwnedMutexGuard<Vec<u8>>,
}

#[async_trait]
impl LogGuard for InMemoryLogGuard {
    async fn read_all(&mut self) -> Result<Vec<u8>, StorageError> {
        Ok(self.content.clone())
    }

    async fn rewrite(&mut self, contents: &[u8]) -> Result<(), StorageError> {
        self.content.clear();
        self.content.extend_from_slice(contents);
        Ok(())
    }
}
