//! [`CachingFile`]: the per-open-file handle that drives reads through the
//! [`BlockCache`], and [`PassthroughFile`]: the uncached fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::cache::{block_start, BlockCache, BlockKey, CacheEntry, FillError};
use crate::fs::identity::file_identity;
use crate::fs::{OpenError, OpenFlags, SeekWhence};

/// Index of the last block that contains any file data, or `None` for an
/// empty file.
///
/// Not simply `file_length / BLOCK_SIZE`: a file whose length is an exact
/// multiple of `BLOCK_SIZE` must not report a trailing empty block past
/// EOF, or the prefetch loop in [`CachingFile::read`] would fill and cache
/// a zero-length block that can never satisfy a read.
fn last_block_index(file_length: u64) -> Option<u64> {
    if file_length == 0 {
        None
    } else {
        Some((file_length - 1) / crate::cache::BLOCK_SIZE)
    }
}

/// A handle to a single open file, backed by the shared [`BlockCache`].
///
/// Only ever constructed for read-only opens: [`crate::fs::FileSystemFacade`]
/// routes writable opens to [`PassthroughFile`] instead, so a write through a
/// `CachingFile` can never silently serve stale cached bytes afterward (see
/// the write-coherence design note).
#[derive(Debug)]
pub struct CachingFile {
    path: PathBuf,
    flags: OpenFlags,
    primary: Arc<std::fs::File>,
    identity: u64,
    length: u64,
    pos: u64,
    cache: Arc<BlockCache>,
    prefetch: u64,
    fallback_lock: Arc<AsyncMutex<()>>,
}

impl CachingFile {
    /// Opens `path`, capturing its identity and length as the immutable
    /// anchor for every subsequent read.
    pub async fn open(
        path: PathBuf,
        flags: OpenFlags,
        cache: Arc<BlockCache>,
        prefetch: u64,
    ) -> Result<Self, OpenError> {
        let open_path = path.clone();
        let opened = tokio::task::spawn_blocking(move || open_and_stat(&open_path, flags))
            .await
            .map_err(|e| OpenError::Open { path: path.display().to_string(), message: e.to_string() })??;

        Ok(Self {
            path,
            flags,
            primary: Arc::new(opened.file),
            identity: opened.identity,
            length: opened.length,
            pos: 0,
            cache,
            prefetch,
            fallback_lock: Arc::new(AsyncMutex::new(())),
        })
    }

    /// Current logical read/write offset.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Length captured at open time. Does not reflect subsequent growth of
    /// the backing file.
    pub fn snapshot_length(&self) -> u64 {
        self.length
    }

    /// Reads into `buf` from the current offset, prefetching ahead blocks
    /// per the configured prefetch width.
    ///
    /// Returns the number of bytes copied; `0` means end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FillError> {
        if buf.is_empty() || self.length == 0 || self.pos >= self.length {
            return Ok(0);
        }

        let current = self.pos / crate::cache::BLOCK_SIZE;
        let offset_in_block = (self.pos % crate::cache::BLOCK_SIZE) as usize;
        // last_block_index is Some because self.length > 0 was checked above.
        let last = last_block_index(self.length).unwrap();
        let prefetch_end = current.saturating_add(self.prefetch).min(last);

        for block in current..=prefetch_end {
            let key = BlockKey::new(self.identity, block);
            if self.cache.contains(&key) {
                continue;
            }
            let (entry, created) = self.cache.get_or_insert_pending(key, self.path.clone());
            if created {
                self.dispatch_fill(block, entry);
            }
        }

        let current_key = BlockKey::new(self.identity, current);
        let entry = self
            .cache
            .get(&current_key)
            .expect("block was just inserted into the cache or was already resident");
        let block = entry.await_ready().await?;

        if offset_in_block >= block.len() {
            return Ok(0);
        }
        let available = &block[offset_in_block..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        if n > 0 {
            self.pos += n as u64;
        }
        Ok(n)
    }

    fn dispatch_fill(&self, block: u64, entry: Arc<CacheEntry>) {
        let path = self.path.clone();
        let flags = self.flags;
        let identity = self.identity;
        let file_length = self.length;
        let start = block_start(block);
        let primary = self.primary.clone();
        let fallback_lock = self.fallback_lock.clone();

        tracing::debug!(path = %path.display(), block, "dispatching fill");

        tokio::spawn(async move {
            match fill_block(path.clone(), flags, identity, file_length, start, primary, fallback_lock).await {
                Ok(buffer) => {
                    tracing::debug!(path = %path.display(), block, len = buffer.len(), "fill completed");
                    entry.complete(Arc::from(buffer.into_boxed_slice()));
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), block, %error, "fill failed");
                    entry.fail(error);
                }
            }
        });
    }

    /// Seeks the backing handle; the returned absolute offset becomes the
    /// new logical position. Does not warm or invalidate the cache for the
    /// new region.
    pub async fn seek(&mut self, offset: i64, whence: SeekWhence) -> std::io::Result<u64> {
        let primary = self.primary.clone();
        let new_pos = tokio::task::spawn_blocking(move || seek_handle(&primary, offset, whence))
            .await
            .map_err(std::io::Error::other)??;
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// Delegates to the backing handle. Does not invalidate any cached
    /// blocks of this file — see the write-coherence design note.
    pub async fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        use std::io::Write;
        let primary = self.primary.clone();
        let data = buf.to_vec();
        let (n, new_pos) = tokio::task::spawn_blocking(move || -> std::io::Result<(usize, u64)> {
            let mut handle = &*primary;
            let n = handle.write(&data)?;
            let pos = std::io::Seek::stream_position(&mut handle)?;
            Ok((n, pos))
        })
        .await
        .map_err(std::io::Error::other)??;
        self.pos = new_pos;
        Ok(n)
    }

    /// Delegates to the backing handle.
    pub async fn stat(&self) -> std::io::Result<std::fs::Metadata> {
        let primary = self.primary.clone();
        tokio::task::spawn_blocking(move || primary.metadata())
            .await
            .map_err(std::io::Error::other)?
    }
}

struct OpenedHandle {
    file: std::fs::File,
    identity: u64,
    length: u64,
}

fn open_and_stat(path: &Path, flags: OpenFlags) -> Result<OpenedHandle, OpenError> {
    let file = flags
        .to_options()
        .open(path)
        .map_err(|e| OpenError::Open { path: path.display().to_string(), message: e.to_string() })?;
    let metadata = file
        .metadata()
        .map_err(|e| OpenError::Stat { path: path.display().to_string(), message: e.to_string() })?;
    let identity = file_identity(&metadata)
        .ok_or_else(|| OpenError::IdentityUnavailable { path: path.display().to_string() })?;
    Ok(OpenedHandle { file, identity, length: metadata.len() })
}

fn seek_handle(file: &std::fs::File, offset: i64, whence: SeekWhence) -> std::io::Result<u64> {
    use std::io::Seek;
    let mut handle = file;
    handle.seek(whence.to_seek_from(offset))
}

/// Outcome of attempting to fill a block through a freshly reopened handle.
enum FreshAttempt {
    /// The fresh handle matched the captured identity and the block was read.
    Filled(Vec<u8>),
    /// Reopening, stat'ing, or identifying the fresh handle failed; the
    /// caller should fall back to the original handle.
    Unusable,
    /// The fresh handle's identity differs from the one captured at open:
    /// the file has been replaced. The caller should fall back.
    Mismatch,
}

/// Fills one block, per the fill routine design: reopen the origin path on
/// a fresh handle for parallelism, falling back to the original handle
/// (under `fallback_lock`) if the reopen is unusable or the file has been
/// replaced underneath us.
async fn fill_block(
    path: PathBuf,
    flags: OpenFlags,
    expected_identity: u64,
    file_length: u64,
    start: u64,
    primary: Arc<std::fs::File>,
    fallback_lock: Arc<AsyncMutex<()>>,
) -> Result<Vec<u8>, FillError> {
    let nominal_len = crate::cache::BLOCK_SIZE.min(file_length.saturating_sub(start)) as usize;

    let attempt_path = path.clone();
    let attempt = tokio::task::spawn_blocking(move || {
        open_fresh_and_read(&attempt_path, flags, expected_identity, start, nominal_len)
    })
    .await
    .map_err(|e| FillError::Io(format!("fill task panicked: {e}")))??;

    match attempt {
        FreshAttempt::Filled(buf) => Ok(buf),
        FreshAttempt::Unusable | FreshAttempt::Mismatch => {
            let _guard = fallback_lock.lock().await;
            tokio::task::spawn_blocking(move || read_positional(&primary, start, nominal_len))
                .await
                .map_err(|e| FillError::Io(format!("fallback fill task panicked: {e}")))?
        }
    }
}

fn open_fresh_and_read(
    path: &Path,
    flags: OpenFlags,
    expected_identity: u64,
    start: u64,
    len: usize,
) -> Result<FreshAttempt, FillError> {
    let file = match flags.to_options().open(path) {
        Ok(f) => f,
        Err(e) => {
            let error = FillError::Reopen { path: path.display().to_string(), message: e.to_string() };
            tracing::debug!(%error, "fresh reopen failed, falling back to original handle");
            return Ok(FreshAttempt::Unusable);
        }
    };
    let metadata = match file.metadata() {
        Ok(m) => m,
        Err(e) => {
            let error = FillError::Stat { path: path.display().to_string(), message: e.to_string() };
            tracing::debug!(%error, "fresh stat failed, falling back to original handle");
            return Ok(FreshAttempt::Unusable);
        }
    };
    let identity = match file_identity(&metadata) {
        Some(id) => id,
        None => {
            let error = FillError::IdentityUnavailable { path: path.display().to_string() };
            tracing::debug!(%error, "fresh handle exposes no stable identity, falling back to original handle");
            return Ok(FreshAttempt::Unusable);
        }
    };
    if identity != expected_identity {
        tracing::debug!(path = %path.display(), "fresh handle identity mismatch, falling back to original handle");
        return Ok(FreshAttempt::Mismatch);
    }
    read_positional(&file, start, len).map(FreshAttempt::Filled)
}

fn read_positional(file: &std::fs::File, start: u64, len: usize) -> Result<Vec<u8>, FillError> {
    use std::io::{Read, Seek, SeekFrom};
    let mut handle = file;
    let pos = handle
        .seek(SeekFrom::Start(start))
        .map_err(|e| FillError::Io(e.to_string()))?;
    if pos != start {
        return Err(FillError::SeekMismatch { expected: start, actual: pos });
    }

    let mut buf = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let n = handle.read(&mut buf[read..]).map_err(|e| FillError::Io(e.to_string()))?;
        if n == 0 {
            return Err(FillError::ShortRead { expected: len, actual: read });
        }
        read += n;
    }
    Ok(buf)
}

/// An open file when caching is disabled or the open was not read-only.
///
/// Mirrors the caching-disabled `File` wrapper in the system this crate is
/// descended from: every operation delegates straight to the backing
/// handle, with no block cache involved.
#[derive(Debug)]
pub struct PassthroughFile {
    file: Arc<std::fs::File>,
    pos: u64,
}

impl PassthroughFile {
    /// Opens `path` with `flags`, performing no caching.
    pub async fn open(path: PathBuf, flags: OpenFlags) -> std::io::Result<Self> {
        let file = tokio::task::spawn_blocking(move || flags.to_options().open(&path))
            .await
            .map_err(std::io::Error::other)??;
        Ok(Self { file: Arc::new(file), pos: 0 })
    }

    /// Current logical offset.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads into `buf`, delegating directly to the backing handle.
    pub async fn read(&mut self, buf_len: usize) -> std::io::Result<Vec<u8>> {
        use std::io::Read;
        let file = self.file.clone();
        let (data, n) = tokio::task::spawn_blocking(move || -> std::io::Result<(Vec<u8>, usize)> {
            let mut handle = &*file;
            let mut data = vec![0u8; buf_len];
            let n = handle.read(&mut data)?;
            data.truncate(n);
            Ok((data, n))
        })
        .await
        .map_err(std::io::Error::other)??;
        self.pos += n as u64;
        Ok(data)
    }

    /// Writes `buf`, delegating directly to the backing handle.
    pub async fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        use std::io::Write;
        let file = self.file.clone();
        let data = buf.to_vec();
        let n = tokio::task::spawn_blocking(move || (&*file).write(&data))
            .await
            .map_err(std::io::Error::other)??;
        self.pos += n as u64;
        Ok(n)
    }

    /// Seeks the backing handle.
    pub async fn seek(&mut self, offset: i64, whence: SeekWhence) -> std::io::Result<u64> {
        let file = self.file.clone();
        let new_pos = tokio::task::spawn_blocking(move || seek_handle(&file, offset, whence))
            .await
            .map_err(std::io::Error::other)??;
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// Delegates to the backing handle.
    pub async fn stat(&self) -> std::io::Result<std::fs::Metadata> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.metadata())
            .await
            .map_err(std::io::Error::other)?
    }
}
