//! # cachedav
//!
//! A local directory tree exposed over WebDAV, with a block-oriented,
//! read-ahead cache sitting between clients and the backing filesystem.
//!
//! ## Architecture
//!
//! - [`cache`]: the block cache itself — `BlockKey`, `CacheEntry`,
//!   `BlockCache` — with no knowledge of files or WebDAV.
//! - [`fs`]: the filesystem boundary — `FileSystemFacade`, `CachingFile`,
//!   `PassthroughFile` — that drives the cache against real files.
//! - [`webdav`]: the protocol adapter wiring the facade into `dav_server`.
//! - [`config`]: layered CLI/env/file configuration.
//! - [`introspection`]: the `SIGUSR1` cache-residency debug hook.
//!
//! This crate deliberately does not cache writes, directory entries, or
//! anything across process restarts — see the non-goals in each module's
//! documentation.

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod fs;
pub mod introspection;
pub mod webdav;

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, as declared in `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
