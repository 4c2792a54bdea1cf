//! # Configuration
//!
//! Layered configuration: CLI flags override environment variables, which
//! override an optional config file, which overrides the built-in defaults.
//! This mirrors the defaults-then-override shape of the database layer's
//! [`crate::cache`]-adjacent config types, generalized to a file + env +
//! CLI chain via `clap`'s derive API.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

/// Default number of 4 MiB blocks held in the cache.
const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Default number of blocks to read ahead of the requested one.
const DEFAULT_PREFETCH: u64 = 4;

/// Failure resolving configuration from flags, environment, and file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file named by `--config-file` could not be read.
    #[error("failed to read config file {path}: {message}")]
    ReadFile {
        /// Path that could not be read.
        path: String,
        /// Underlying OS error message.
        message: String,
    },

    /// The config file's contents are not valid TOML for this schema.
    #[error("failed to parse config file {path}: {message}")]
    ParseFile {
        /// Path whose contents failed to parse.
        path: String,
        /// Underlying parser error message.
        message: String,
    },

    /// The resolved served root does not exist or is not a directory.
    #[error("served root {0} does not exist or is not a directory")]
    InvalidRoot(String),

    /// A prefetch width was explicitly requested alongside a cache capacity
    /// of zero, which disables caching entirely and makes prefetch moot.
    #[error("prefetch of {prefetch} was requested but cache capacity is 0 (caching disabled)")]
    PrefetchWithoutCache {
        /// The explicitly requested prefetch width.
        prefetch: u64,
    },
}

/// Config file schema. Every field is optional: a file only overrides what
/// it names, so a config file committed with one setting still inherits
/// defaults for everything else.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    root: Option<PathBuf>,
    bind: Option<SocketAddr>,
    cache_capacity: Option<usize>,
    prefetch: Option<u64>,
    disable_cache: Option<bool>,
    read_only: Option<bool>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
}

/// Output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored when the output is a terminal.
    Pretty,
    /// Newline-delimited JSON, for log aggregation.
    Json,
}

/// Command-line flags. Every flag is optional so that a value left unset
/// here falls through to the environment, then the config file, then the
/// built-in default — see [`Config::load`].
#[derive(Debug, Parser)]
#[command(name = "cachedav", about = "A caching WebDAV server with block-oriented read-ahead")]
pub struct Cli {
    /// Directory tree to serve.
    #[arg(long, env = "CACHEDAV_ROOT")]
    pub root: Option<PathBuf>,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "CACHEDAV_BIND")]
    pub bind: Option<SocketAddr>,

    /// Maximum number of 4 MiB blocks held in the cache.
    #[arg(long, env = "CACHEDAV_CACHE_CAPACITY")]
    pub cache_capacity: Option<usize>,

    /// Number of blocks to read ahead of the one actually requested.
    #[arg(long, env = "CACHEDAV_PREFETCH")]
    pub prefetch: Option<u64>,

    /// Disable caching entirely; every open becomes a direct passthrough.
    #[arg(long, env = "CACHEDAV_DISABLE_CACHE")]
    pub disable_cache: bool,

    /// Reject every write, rename, mkdir, and remove.
    #[arg(long, env = "CACHEDAV_READ_ONLY")]
    pub read_only: bool,

    /// Optional TOML config file layered beneath environment and CLI.
    #[arg(long, env = "CACHEDAV_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// `tracing` env-filter directive, e.g. "info" or "cachedav=debug".
    #[arg(long, env = "CACHEDAV_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, env = "CACHEDAV_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub bind: SocketAddr,
    pub cache_capacity: usize,
    pub prefetch: u64,
    pub caching_enabled: bool,
    pub read_only: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Resolves configuration from CLI flags (already layered over
    /// environment variables by `clap`'s `env` attribute), an optional
    /// config file, and built-in defaults, in that order of precedence.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file_config = match &cli.config_file {
            Some(path) => Some(Self::read_file(path)?),
            None => None,
        };

        let root = cli
            .root
            .or_else(|| file_config.as_ref().and_then(|f| f.root.clone()))
            .unwrap_or_else(|| PathBuf::from("."));
        if !root.is_dir() {
            return Err(ConfigError::InvalidRoot(root.display().to_string()));
        }

        let bind = cli
            .bind
            .or_else(|| file_config.as_ref().and_then(|f| f.bind))
            .unwrap_or_else(|| "127.0.0.1:8080".parse().expect("static bind address is valid"));

        let cache_capacity = cli
            .cache_capacity
            .or_else(|| file_config.as_ref().and_then(|f| f.cache_capacity))
            .unwrap_or(DEFAULT_CACHE_CAPACITY);

        let explicit_prefetch = cli
            .prefetch
            .or_else(|| file_config.as_ref().and_then(|f| f.prefetch));
        let prefetch = explicit_prefetch.unwrap_or(DEFAULT_PREFETCH);

        if cache_capacity == 0 {
            if let Some(prefetch) = explicit_prefetch {
                return Err(ConfigError::PrefetchWithoutCache { prefetch });
            }
        }

        // A cache capacity of 0 disables caching outright, the same as
        // `--disable-cache`: there is nowhere to construct a `BlockCache` with
        // zero capacity, so the facade must fall back to passthrough opens.
        let caching_enabled = cache_capacity > 0
            && !(cli.disable_cache
                || file_config.as_ref().and_then(|f| f.disable_cache).unwrap_or(false));

        let read_only =
            cli.read_only || file_config.as_ref().and_then(|f| f.read_only).unwrap_or(false);

        let log_level = cli
            .log_level
            .or_else(|| file_config.as_ref().and_then(|f| f.log_level.clone()))
            .unwrap_or_else(|| "info".to_string());

        let log_format = cli
            .log_format
            .or_else(|| file_config.as_ref().and_then(|f| f.log_format))
            .unwrap_or(LogFormat::Pretty);

        Ok(Self {
            root,
            bind,
            cache_capacity,
            prefetch,
            caching_enabled,
            read_only,
            log_level,
            log_format,
        })
    }

    fn read_file(path: &PathBuf) -> Result<FileConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile { path: path.display().to_string(), message: e.to_string() })?;
        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFile { path: path.display().to_string(), message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            root: None,
            bind: None,
            cache_capacity: None,
            prefetch: None,
            disable_cache: false,
            read_only: false,
            config_file: None,
            log_level: None,
            log_format: None,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = base_cli();
        cli.root = Some(dir.path().to_path_buf());

        let config = Config::load(cli).unwrap();
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.prefetch, DEFAULT_PREFETCH);
        assert!(config.caching_enabled);
        assert!(!config.read_only);
    }

    #[test]
    fn cli_flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("cachedav.toml");
        std::fs::write(&config_path, "cache_capacity = 10\nprefetch = 2\n").unwrap();

        let mut cli = base_cli();
        cli.root = Some(dir.path().to_path_buf());
        cli.config_file = Some(config_path);
        cli.cache_capacity = Some(99);

        let config = Config::load(cli).unwrap();
        assert_eq!(config.cache_capacity, 99);
        assert_eq!(config.prefetch, 2);
    }

    #[test]
    fn nonexistent_root_is_rejected() {
        let mut cli = base_cli();
        cli.root = Some(PathBuf::from("/this/path/does/not/exist/at/all"));
        let err = Config::load(cli).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoot(_)));
    }

    #[test]
    fn disable_cache_flag_turns_off_caching() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = base_cli();
        cli.root = Some(dir.path().to_path_buf());
        cli.disable_cache = true;

        let config = Config::load(cli).unwrap();
        assert!(!config.caching_enabled);
    }

    #[test]
    fn zero_cache_capacity_disables_caching_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = base_cli();
        cli.root = Some(dir.path().to_path_buf());
        cli.cache_capacity = Some(0);

        let config = Config::load(cli).unwrap();
        assert!(!config.caching_enabled);
        assert_eq!(config.cache_capacity, 0);
    }

    #[test]
    fn explicit_prefetch_with_zero_cache_capacity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = base_cli();
        cli.root = Some(dir.path().to_path_buf());
        cli.cache_capacity = Some(0);
        cli.prefetch = Some(4);

        let err = Config::load(cli).unwrap_err();
        assert!(matches!(err, ConfigError::PrefetchWithoutCache { prefetch: 4 }));
    }
}
