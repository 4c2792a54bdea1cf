//! # Operator Introspection
//!
//! A `SIGUSR1` hook that logs the current cache residency on demand. This
//! replaces the stdin debug-command loop of the system this crate is
//! descended from: a long-running server has no controlling terminal to
//! read commands from, but it always has a signal mask (see the redesign
//! note on this).
//!
//! Not available on non-Unix targets; [`spawn`] is a no-op there.

use std::sync::Arc;

use crate::cache::BlockCache;

/// Spawns a background task that logs [`BlockCache::snapshot`] at `info`
/// level every time the process receives `SIGUSR1`.
///
/// The returned `JoinHandle` runs for the lifetime of the process; callers
/// are not expected to await it.
#[cfg(unix)]
pub fn spawn(cache: Arc<BlockCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut signal = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) {
            Ok(signal) => signal,
            Err(error) => {
                tracing::error!(%error, "failed to install SIGUSR1 handler; introspection disabled");
                return;
            }
        };

        loop {
            signal.recv().await;
            log_snapshot(&cache);
        }
    })
}

#[cfg(not(unix))]
pub fn spawn(_cache: Arc<BlockCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async {})
}

fn log_snapshot(cache: &BlockCache) {
    let snapshot = cache.snapshot();
    tracing::info!(resident = snapshot.len(), "cache residency snapshot requested");
    for entry in &snapshot {
        tracing::info!(
            file_identity = entry.key.file_identity,
            block_index = entry.key.block_index,
            path = %entry.path.display(),
            state = ?entry.state,
            buffer_len = entry.buffer_len,
            "resident block"
        );
    }
}
