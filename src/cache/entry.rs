//! A single cache slot: pending fill, ready buffer, or failed fill.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Error surfaced to readers of a block whose fill failed.
///
/// Cloneable so that every waiter of a failed [`CacheEntry`] — current and
/// future, until the entry is evicted — observes the same failure.
#[derive(Debug, Clone, Error)]
pub enum FillError {
    /// Reopening the origin path for a parallel fill failed.
    #[error("failed to reopen {path}: {message}")]
    Reopen {
        /// Path that could not be reopened.
        path: String,
        /// Underlying OS error message.
        message: String,
    },

    /// Stat of a freshly reopened handle failed.
    #[error("failed to stat {path}: {message}")]
    Stat {
        /// Path that could not be stat'd.
        path: String,
        /// Underlying OS error message.
        message: String,
    },

    /// The platform exposes no stable identity for a freshly reopened handle.
    #[error("no stable file identity available for {path}")]
    IdentityUnavailable {
        /// Path whose reopen produced no usable identity.
        path: String,
    },

    /// A seek did not land where it was told to.
    #[error("seek to {expected} returned {actual}")]
    SeekMismatch {
        /// Offset that was requested.
        expected: u64,
        /// Offset the backing handle actually reports.
        actual: u64,
    },

    /// A read returned zero bytes before the nominal block length was reached.
    #[error("short read while filling block: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes the fill expected to read.
        expected: usize,
        /// Bytes actually read before the short read.
        actual: usize,
    },

    /// Any other I/O failure encountered while filling a block.
    #[error("I/O error while filling block: {0}")]
    Io(String),
}

/// Readiness of a [`CacheEntry`], for introspection purposes only.
///
/// The entry itself does not store this as a field — it is derived from
/// whether the one-shot cell has been set, and to what.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A fill has been dispatched but has not yet completed.
    Pending,
    /// The fill completed successfully; the buffer is available.
    Ready,
    /// The fill failed; every waiter observes [`FillError`].
    Failed,
}

/// A single cache slot.
///
/// Created in the `Pending` state the moment a fill is dispatched for it.
/// Exactly one of [`CacheEntry::complete`] or [`CacheEntry::fail`] is called
/// exactly once, by the task performing the fill; every other caller only
/// ever calls [`CacheEntry::await_ready`].
#[derive(Debug)]
pub struct CacheEntry {
    path: std::path::PathBuf,
    result: OnceCell<Result<Arc<[u8]>, FillError>>,
}

impl CacheEntry {
    /// Creates a new entry in the `Pending` state, for a block of `path`.
    pub fn pending(path: std::path::PathBuf) -> Self {
        Self { path, result: OnceCell::new() }
    }

    /// The origin file path this entry caches a block of.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Publishes `buffer` and transitions the entry to `Ready`.
    ///
    /// # Panics
    ///
    /// Panics if the entry has already left the `Pending` state. `complete`
    /// and `fail` are one-shot by contract; a second call is a programming
    /// error, not a recoverable condition.
    pub fn complete(&self, buffer: Arc<[u8]>) {
        self.result
            .set(Ok(buffer))
            .expect("CacheEntry::complete called on an already-resolved entry");
    }

    /// Records `error` and transitions the entry to `Failed`.
    ///
    /// # Panics
    ///
    /// Panics if the entry has already left the `Pending` state.
    pub fn fail(&self, error: FillError) {
        self.result
            .set(Err(error))
            .expect("CacheEntry::fail called on an already-resolved entry");
    }

    /// Waits for the entry to leave `Pending`, then returns its terminal
    /// state. Many concurrent callers may await the same entry; all observe
    /// the same result once it resolves.
    pub async fn await_ready(&self) -> Result<Arc<[u8]>, FillError> {
        self.result.wait().await.clone()
    }

    /// Current state, for introspection. Never blocks.
    pub fn state(&self) -> EntryState {
        match self.result.get() {
            None => EntryState::Pending,
            Some(Ok(_)) => EntryState::Ready,
            Some(Err(_)) => EntryState::Failed,
        }
    }

    /// Length of the buffer if the entry is `Ready`, for introspection.
    pub fn buffer_len(&self) -> Option<usize> {
        match self.result.get() {
            Some(Ok(buf)) => Some(buf.len()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pending_entry_blocks_until_complete() {
        let entry = Arc::new(CacheEntry::pending(std::path::PathBuf::from("f.bin")));
        assert_eq!(entry.state(), EntryState::Pending);

        let waiter = {
            let entry = entry.clone();
            tokio::spawn(async move { entry.await_ready().await })
        };

        // Give the waiter a chance to start waiting before we publish.
        tokio::time::sleep(Duration::from_millis(10)).await;
        entry.complete(Arc::from(vec![1, 2, 3].into_boxed_slice()));

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(&*result, &[1, 2, 3]);
        assert_eq!(entry.state(), EntryState::Ready);
        assert_eq!(entry.buffer_len(), Some(3));
    }

    #[tokio::test]
    async fn failed_entry_is_observed_by_every_waiter() {
        let entry = Arc::new(CacheEntry::pending(std::path::PathBuf::from("f.bin")));
        let err = FillError::Io("disk on fire".to_string());
        entry.fail(err.clone());

        for _ in 0..3 {
            let result = entry.await_ready().await;
            assert!(matches!(result, Err(FillError::Io(msg)) if msg == "disk on fire"));
        }
        assert_eq!(entry.state(), EntryState::Failed);
        assert_eq!(entry.buffer_len(), None);
    }

    #[tokio::test]
    #[should_panic(expected = "already-resolved")]
    async fn double_complete_panics() {
        let entry = CacheEntry::pending(std::path::PathBuf::from("f.bin"));
        entry.complete(Arc::from(vec![0u8].into_boxed_slice()));
        entry.complete(Arc::from(vec![1u8].into_boxed_slice()));
    }
}
