//! # Filesystem Facade
//!
//! The boundary between the WebDAV protocol adapter and the real
//! filesystem. [`FileSystemFacade`] resolves every WebDAV path against a
//! configured root, rejects attempts to escape it, and decides per open
//! whether to hand back a cached [`CachingFile`] or an uncached
//! [`PassthroughFile`].
//!
//! ## Architecture
//!
//! - [`identity`]: stable file identity extraction, shared by the facade
//!   (open-time) and [`file`] (fill-time).
//! - [`file`]: [`CachingFile`] and [`PassthroughFile`], the two concrete
//!   open-file handles.
//!
//! Caching is only ever used for read-only opens. A writable open always
//! returns a [`PassthroughFile`]: see the write-coherence design note for why.

pub mod file;
pub mod identity;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub use file::{CachingFile, PassthroughFile};

use crate::cache::BlockCache;

/// Flags governing how a path is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Open in append mode.
    pub append: bool,
    /// Truncate an existing file to zero length on open.
    pub truncate: bool,
}

impl OpenFlags {
    /// The common case: open an existing file for reading only.
    pub fn read_only() -> Self {
        Self { read: true, write: false, create: false, append: false, truncate: false }
    }

    /// Whether these flags request any form of write access.
    pub fn is_writable(&self) -> bool {
        self.write || self.create || self.append || self.truncate
    }

    /// Builds the equivalent [`std::fs::OpenOptions`].
    pub fn to_options(self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .create(self.create)
            .append(self.append)
            .truncate(self.truncate);
        options
    }
}

/// Origin for a [`CachingFile::seek`] or [`PassthroughFile::seek`] offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// Relative to the start of the file.
    Start,
    /// Relative to the current position.
    Current,
    /// Relative to the end of the file.
    End,
}

impl SeekWhence {
    /// Converts to the equivalent [`std::io::SeekFrom`].
    pub fn to_seek_from(self, offset: i64) -> std::io::SeekFrom {
        match self {
            SeekWhence::Start => std::io::SeekFrom::Start(offset.max(0) as u64),
            SeekWhence::Current => std::io::SeekFrom::Current(offset),
            SeekWhence::End => std::io::SeekFrom::End(offset),
        }
    }
}

/// An open file, cached or not.
#[derive(Debug)]
pub enum OpenedFile {
    /// Served through the block cache.
    Caching(CachingFile),
    /// Delegates directly to the backing filesystem.
    Passthrough(PassthroughFile),
}

/// Failure resolving or opening a path at the filesystem boundary.
#[derive(Debug, Error)]
pub enum FacadeError {
    /// The requested path escapes the configured root.
    #[error("path escapes the served root: {0}")]
    PathEscapesRoot(String),

    /// The facade is read-only and the open requested write access.
    #[error("filesystem is read-only: {0}")]
    ReadOnly(String),

    /// Opening the path failed.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// Any other filesystem operation (mkdir, remove, rename, stat) failed.
    #[error("{operation} failed for {path}: {message}")]
    Operation {
        /// The operation that failed, e.g. `"mkdir"`.
        operation: &'static str,
        /// Path the operation was attempted against.
        path: String,
        /// Underlying OS error message.
        message: String,
    },
}

/// Failure opening a single file, before any block fill is attempted.
#[derive(Debug, Clone, Error)]
pub enum OpenError {
    /// The underlying `open(2)` call (or equivalent) failed.
    #[error("failed to open {path}: {message}")]
    Open {
        /// Path that could not be opened.
        path: String,
        /// Underlying OS error message.
        message: String,
    },

    /// Stat'ing the freshly opened handle failed.
    #[error("failed to stat {path}: {message}")]
    Stat {
        /// Path that could not be stat'd.
        path: String,
        /// Underlying OS error message.
        message: String,
    },

    /// The platform exposes no stable identity for this handle.
    #[error("no stable file identity available for {path}")]
    IdentityUnavailable {
        /// Path whose open produced no usable identity.
        path: String,
    },
}

/// Resolves WebDAV paths against a root directory and opens files, routing
/// read-only opens through the shared [`BlockCache`] and everything else
/// straight to the backing filesystem.
#[derive(Debug)]
pub struct FileSystemFacade {
    root: PathBuf,
    cache: Option<Arc<BlockCache>>,
    prefetch: u64,
    read_only: bool,
}

impl FileSystemFacade {
    /// Builds a facade serving `root`.
    ///
    /// `cache` is `None` when caching is disabled entirely (every open
    /// becomes a [`PassthroughFile`]); `read_only` rejects any open that
    /// requests write access before it reaches the backing filesystem.
    pub fn new(root: PathBuf, cache: Option<Arc<BlockCache>>, prefetch: u64, read_only: bool) -> Self {
        Self { root, cache, prefetch, read_only }
    }

    /// The configured cache, if caching is enabled. Used by the
    /// introspection hook to log residency without the facade needing its
    /// own duplicate snapshot method.
    pub fn cache(&self) -> Option<&Arc<BlockCache>> {
        self.cache.as_ref()
    }

    /// Resolves a WebDAV-relative path to an absolute path under the root.
    ///
    /// Rejects any path containing a `..` component. This is deliberately
    /// minimal: it does not resolve symlinks or canonicalize, so a symlink
    /// inside the root that points outside it is not caught here. See the
    /// redesign note on path traversal for why this bar was judged
    /// sufficient for the scope of this component.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf, FacadeError> {
        for component in relative.components() {
            if matches!(component, Component::ParentDir) {
                return Err(FacadeError::PathEscapesRoot(relative.display().to_string()));
            }
        }
        Ok(self.root.join(relative))
    }

    /// Opens `relative` with `flags`.
    ///
    /// Read-only opens are served through the block cache when caching is
    /// enabled. Any open that requests write access bypasses the cache
    /// entirely, whether or not caching is enabled overall, and is rejected
    /// outright if the facade itself is read-only.
    pub async fn open(&self, relative: &Path, flags: OpenFlags) -> Result<OpenedFile, FacadeError> {
        let path = self.resolve(relative)?;
        tracing::debug!(path = %relative.display(), writable = flags.is_writable(), "open");

        if flags.is_writable() {
            if self.read_only {
                return Err(FacadeError::ReadOnly(relative.display().to_string()));
            }
            let file = PassthroughFile::open(path, flags)
                .await
                .map_err(|e| FacadeError::Operation {
                    operation: "open",
                    path: relative.display().to_string(),
                    message: e.to_string(),
                })?;
            return Ok(OpenedFile::Passthrough(file));
        }

        match &self.cache {
            Some(cache) => {
                let file = CachingFile::open(path, flags, cache.clone(), self.prefetch).await?;
                Ok(OpenedFile::Caching(file))
            }
            None => {
                let file = PassthroughFile::open(path, flags)
                    .await
                    .map_err(|e| FacadeError::Operation {
                        operation: "open",
                        path: relative.display().to_string(),
                        message: e.to_string(),
                    })?;
                Ok(OpenedFile::Passthrough(file))
            }
        }
    }

    /// Creates a directory at `relative`.
    pub async fn mkdir(&self, relative: &Path) -> Result<(), FacadeError> {
        self.reject_if_read_only(relative)?;
        let path = self.resolve(relative)?;
        tracing::debug!(path = %relative.display(), "mkdir");
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| self.op_error("mkdir", relative, e))
    }

    /// Removes a file or empty directory at `relative`.
    pub async fn remove(&self, relative: &Path) -> Result<(), FacadeError> {
        self.reject_if_read_only(relative)?;
        let path = self.resolve(relative)?;
        tracing::debug!(path = %relative.display(), "remove");
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| self.op_error("remove", relative, e))?;
        if metadata.is_dir() {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        }
        .map_err(|e| self.op_error("remove", relative, e))
    }

    /// Renames `from` to `to`, both resolved against the root.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), FacadeError> {
        self.reject_if_read_only(from)?;
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        tracing::debug!(from = %from.display(), to = %to.display(), "rename");
        tokio::fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| self.op_error("rename", from, e))
    }

    /// Stats `relative` without opening it.
    pub async fn stat(&self, relative: &Path) -> Result<std::fs::Metadata, FacadeError> {
        let path = self.resolve(relative)?;
        tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.op_error("stat", relative, e))
    }

    /// Lists the entries of the directory at `relative`.
    ///
    /// Directory listings are never cached: see the non-goal on
    /// directory-entry caching.
    pub async fn read_dir(&self, relative: &Path) -> Result<Vec<std::fs::DirEntry>, FacadeError> {
        let path = self.resolve(relative)?;
        let entries = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<std::fs::DirEntry>> {
            std::fs::read_dir(&path)?.collect()
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|inner| inner)
        .map_err(|e| self.op_error("readdir", relative, e))?;
        Ok(entries)
    }

    fn reject_if_read_only(&self, relative: &Path) -> Result<(), FacadeError> {
        if self.read_only {
            return Err(FacadeError::ReadOnly(relative.display().to_string()));
        }
        Ok(())
    }

    fn op_error(&self, operation: &'static str, relative: &Path, error: std::io::Error) -> FacadeError {
        FacadeError::Operation { operation, path: relative.display().to_string(), message: error.to_string() }
    }
}
