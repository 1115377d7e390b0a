//! Bounded queues persisted as JSON files.
//!
//! Newest entries sit at the front; anything past the cap is evicted from
//! the back. Every mutation rewrites the file through a temp-and-rename so
//! a crash mid-write never truncates the queue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue file could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A bounded, newest-first queue mirrored to a JSON file.
pub struct PersistedQueue<T> {
    path: PathBuf,
    cap: usize,
    entries: VecDeque<T>,
}

impl<T> PersistedQueue<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Load the queue from `path`, or start empty if the file is absent.
    /// Entries beyond `cap` are dropped on load.
    pub async fn load(path: impl Into<PathBuf>, cap: usize) -> Result<Self, QueueError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut entries: VecDeque<T> = serde_json::from_slice(&bytes)?;
                entries.truncate(cap);
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, cap, entries })
    }

    /// Prepend an entry, evicting the oldest past the cap.
    pub async fn prepend(&mut self, entry: T) -> Result<(), QueueError> {
        self.entries.push_front(entry);
        self.entries.truncate(self.cap);
        self.persist().await
    }

    /// Remove and return every entry, oldest first.
    pub async fn drain(&mut self) -> Result<Vec<T>, QueueError> {
        let drained: Vec<T> = self.entries.drain(..).rev().collect();
        self.persist().await?;
        Ok(drained)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
