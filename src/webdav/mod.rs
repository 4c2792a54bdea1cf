//! # WebDAV Adapter
//!
//! Wires [`crate::fs::FileSystemFacade`] into the [`dav_server`] crate's
//! [`DavFileSystem`] trait, so the cache underneath is transparent to any
//! WebDAV client: GET/PUT/PROPFIND/MKCOL/DELETE/MOVE all flow through here.
//!
//! This module owns no caching logic of its own — it only translates
//! between `dav_server`'s path and metadata types and the facade's.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, FsStream, OpenOptions,
    ReadDirMeta,
};
use futures::stream;

use crate::fs::{FacadeError, OpenFlags, OpenedFile, SeekWhence};
use crate::fs::file::{CachingFile, PassthroughFile};

/// Adapts [`crate::fs::FileSystemFacade`] to `dav_server`'s filesystem trait.
#[derive(Debug, Clone)]
pub struct CachingDavFileSystem {
    facade: std::sync::Arc<crate::fs::FileSystemFacade>,
}

impl CachingDavFileSystem {
    pub fn new(facade: std::sync::Arc<crate::fs::FileSystemFacade>) -> Self {
        Self { facade }
    }
}

fn dav_path_to_relative(path: &DavPath) -> PathBuf {
    // DavPath renders with a leading '/'; FileSystemFacade::resolve rejects
    // absolute-looking joins, so the leading separator is stripped here.
    let as_str = path.as_url_string();
    PathBuf::from(as_str.trim_start_matches('/'))
}

fn facade_error_to_fs(error: FacadeError) -> FsError {
    match error {
        FacadeError::PathEscapesRoot(_) => FsError::Forbidden,
        FacadeError::ReadOnly(_) => FsError::Forbidden,
        FacadeError::Open(_) => FsError::GeneralFailure,
        FacadeError::Operation { .. } => FsError::GeneralFailure,
    }
}

impl DavFileSystem for CachingDavFileSystem {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let relative = dav_path_to_relative(path);
            let flags = OpenFlags {
                read: options.read,
                write: options.write,
                create: options.create,
                append: options.append,
                truncate: options.truncate,
            };
            let opened = self.facade.open(&relative, flags).await.map_err(facade_error_to_fs)?;
            let file: Box<dyn DavFile> = match opened {
                OpenedFile::Caching(f) => Box::new(CachingDavFile { inner: f }),
                OpenedFile::Passthrough(f) => Box::new(PassthroughDavFile { inner: f }),
            };
            Ok(file)
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let relative = dav_path_to_relative(path);
            let entries = self.facade.read_dir(&relative).await.map_err(facade_error_to_fs)?;
            let dav_entries: Vec<Box<dyn DavDirEntry>> = entries
                .into_iter()
                .map(|entry| Box::new(FacadeDirEntry { entry }) as Box<dyn DavDirEntry>)
                .collect();
            let boxed: FsStream<Box<dyn DavDirEntry>> = Box::pin(stream::iter(dav_entries));
            Ok(boxed)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let relative = dav_path_to_relative(path);
            let metadata = self.facade.stat(&relative).await.map_err(facade_error_to_fs)?;
            Ok(Box::new(FacadeMetaData { metadata }) as Box<dyn DavMetaData>)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let relative = dav_path_to_relative(path);
            self.facade.mkdir(&relative).await.map_err(facade_error_to_fs)
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let relative = dav_path_to_relative(path);
            self.facade.remove(&relative).await.map_err(facade_error_to_fs)
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let relative = dav_path_to_relative(path);
            self.facade.remove(&relative).await.map_err(facade_error_to_fs)
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_relative = dav_path_to_relative(from);
            let to_relative = dav_path_to_relative(to);
            self.facade.rename(&from_relative, &to_relative).await.map_err(facade_error_to_fs)
        })
    }
}

struct FacadeDirEntry {
    entry: std::fs::DirEntry,
}

impl DavDirEntry for FacadeDirEntry {
    fn name(&self) -> Vec<u8> {
        self.entry.file_name().to_string_lossy().into_owned().into_bytes()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let metadata = self.entry.metadata().map_err(|_| FsError::GeneralFailure)?;
            Ok(Box::new(FacadeMetaData { metadata }) as Box<dyn DavMetaData>)
        })
    }
}

/// Adapts [`std::fs::Metadata`] to `dav_server`'s metadata trait.
#[derive(Debug, Clone)]
struct FacadeMetaData {
    metadata: std::fs::Metadata,
}

impl DavMetaData for FacadeMetaData {
    fn len(&self) -> u64 {
        self.metadata.len()
    }

    fn modified(&self) -> FsResult<SystemTime> {
        self.metadata.modified().map_err(|_| FsError::GeneralFailure)
    }

    fn created(&self) -> FsResult<SystemTime> {
        self.metadata.created().map_err(|_| FsError::NotImplemented)
    }

    fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }

    fn is_file(&self) -> bool {
        self.metadata.is_file()
    }

    fn is_symlink(&self) -> bool {
        self.metadata.is_symlink()
    }

    fn executable(&self) -> FsResult<bool> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Ok(self.metadata.permissions().mode() & 0o100 != 0)
        }
        #[cfg(not(unix))]
        {
            Err(FsError::NotImplemented)
        }
    }
}

/// [`DavFile`] implementation backed by a cached, read-ahead handle.
struct CachingDavFile {
    inner: CachingFile,
}

impl std::fmt::Debug for CachingDavFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingDavFile").field("position", &self.inner.position()).finish()
    }
}

impl DavFile for CachingDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let metadata = self.inner.stat().await.map_err(|_| FsError::GeneralFailure)?;
            Ok(Box::new(FacadeMetaData { metadata }) as Box<dyn DavMetaData>)
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write(&buf).await.map_err(|_| FsError::GeneralFailure)?;
            Ok(())
        })
    }

    fn write_buf(&mut self, mut buf: Box<dyn bytes::Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let bytes = buf.copy_to_bytes(buf.remaining());
            self.write_bytes(bytes).await
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let mut buf = vec![0u8; count];
            let mut filled = 0;
            while filled < count {
                let n = self.inner.read(&mut buf[filled..]).await.map_err(|_| FsError::GeneralFailure)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(Bytes::from(buf))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let (whence, offset) = seek_from_parts(pos);
            self.inner.seek(offset, whence).await.map_err(|_| FsError::GeneralFailure)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}

/// [`DavFile`] implementation for uncached opens (write access, or caching
/// disabled entirely).
struct PassthroughDavFile {
    inner: PassthroughFile,
}

impl std::fmt::Debug for PassthroughDavFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughDavFile").field("position", &self.inner.position()).finish()
    }
}

impl DavFile for PassthroughDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let metadata = self.inner.stat().await.map_err(|_| FsError::GeneralFailure)?;
            Ok(Box::new(FacadeMetaData { metadata }) as Box<dyn DavMetaData>)
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write(&buf).await.map_err(|_| FsError::GeneralFailure)?;
            Ok(())
        })
    }

    fn write_buf(&mut self, mut buf: Box<dyn bytes::Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let bytes = buf.copy_to_bytes(buf.remaining());
            self.write_bytes(bytes).await
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let data = self.inner.read(count).await.map_err(|_| FsError::GeneralFailure)?;
            Ok(Bytes::from(data))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let (whence, offset) = seek_from_parts(pos);
            self.inner.seek(offset, whence).await.map_err(|_| FsError::GeneralFailure)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}

fn seek_from_parts(pos: SeekFrom) -> (SeekWhence, i64) {
    match pos {
        SeekFrom::Start(n) => (SeekWhence::Start, n as i64),
        SeekFrom::Current(n) => (SeekWhence::Current, n),
        SeekFrom::End(n) => (SeekWhence::End, n),
    }
}
