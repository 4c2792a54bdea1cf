//! cachedav - a caching WebDAV file server.
//!
//! Serves a local directory tree over WebDAV, with reads routed through a
//! block-oriented, read-ahead LRU cache. See [`cachedav`] for the module
//! layout.

use std::panic;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::any;
use axum::Router;
use clap::Parser;
use dav_server::DavHandler;

use cachedav::cache::BlockCache;
use cachedav::config::{Cli, Config};
use cachedav::fs::FileSystemFacade;
use cachedav::introspection;
use cachedav::webdav::CachingDavFileSystem;

#[derive(Clone)]
struct AppState {
    handler: Arc<DavHandler>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("cachedav fatal error:");
        eprintln!("{panic_info}");
        if let Some(location) = panic_info.location() {
            eprintln!("location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    let cli = Cli::parse();
    let config = Config::load(cli)?;
    init_logging(&config);

    tracing::info!("───────────────────────────────────────────");
    tracing::info!("  cachedav v{}", cachedav::VERSION);
    tracing::info!("  serving {}", config.root.display());
    tracing::info!("───────────────────────────────────────────");

    let cache = if config.caching_enabled {
        tracing::info!(capacity = config.cache_capacity, prefetch = config.prefetch, "block cache enabled");
        Some(Arc::new(BlockCache::new(config.cache_capacity)))
    } else {
        tracing::info!("block cache disabled; every open is a direct passthrough");
        None
    };

    if let Some(cache) = &cache {
        introspection::spawn(cache.clone());
    }

    let facade = Arc::new(FileSystemFacade::new(
        config.root.clone(),
        cache,
        config.prefetch,
        config.read_only,
    ));
    let dav_fs = CachingDavFileSystem::new(facade);

    let handler = Arc::new(
        DavHandler::builder()
            .filesystem(Box::new(dav_fs))
            .locksystem(dav_server::fakels::FakeLs::new())
            .build_handler(),
    );

    let app = Router::new()
        .route("/*path", any(serve_dav))
        .route("/", any(serve_dav))
        .with_state(AppState { handler })
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(bind = %config.bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_dav(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> axum::response::Response {
    tracing::debug!(method = %request.method(), path = %request.uri().path(), "request");
    state.handler.handle(request).await
}

fn init_logging(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.log_format {
        cachedav::config::LogFormat::Json => subscriber.json().init(),
        cachedav::config::LogFormat::Pretty => subscriber.init(),
    }
}
