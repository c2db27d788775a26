//! axo-file-server binary.
//!
//! A small HTTP file server: multipart uploads land under a fixed
//! `<base>/<relative>` directory, downloads stream them back by filename, and
//! an in-memory registry lists what has been uploaded since start.

mod background;
mod config;
mod error;
mod files;
mod http;
mod locking;
mod logging;
mod record;
mod registry;
mod storage;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::background::spawn_background_tasks;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::build_cors_layer;
use crate::locking::LockManager;
use crate::registry::Registry;
use crate::storage::Storage;
use crate::upload::{UploadConfig, WriteMode};

shadow!(build);

/// Starts the file server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Storage::new(args.base_dir.clone(), args.relative_path.clone()).map_err(
        |err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()),
    )?;
    storage.ensure_root().await?;
    info!(root = ?storage.root_path(), "storage directory ready");

    let storage = Arc::new(storage);
    let registry = Arc::new(Registry::new());
    let lock_manager = Arc::new(LockManager::new());
    let upload_config = Arc::new(UploadConfig {
        lock_wait: Duration::from_secs(args.lock_wait_secs),
        write_mode: if args.detach_writes {
            WriteMode::Detach
        } else {
            WriteMode::Await
        },
    });
    let locks_for_tasks = lock_manager.clone();

    let mut app = build_router(
        storage,
        registry,
        lock_manager,
        upload_config,
        args.upload_max_size,
    );
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", addr);
    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service());

    spawn_background_tasks(locks_for_tasks);
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// Builds the application router with its shared state and layers.
fn build_router(
    storage: Arc<Storage>,
    registry: Arc<Registry>,
    lock_manager: Arc<LockManager>,
    upload_config: Arc<UploadConfig>,
    upload_max_size: u64,
) -> Router {
    let body_limit = match usize::try_from(upload_max_size) {
        Ok(0) | Err(_) => DefaultBodyLimit::disable(),
        Ok(limit) => DefaultBodyLimit::max(limit),
    };

    Router::new()
        .route("/", get(files::list_files))
        .route("/upload", post(upload::upload_file).layer(body_limit))
        .route("/download/{filename}", get(files::download_file))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(registry))
        .layer(Extension(lock_manager))
        .layer(Extension(upload_config))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
