//! Graphsync server binary
//!
//! Standalone collaboration server: WebSocket session manager, cluster
//! coordinator and store adapter wired together behind one HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use graphsync::api::{create_router, AppState};
use graphsync::auth;
use graphsync::cluster::ClusterCoordinator;
use graphsync::config::ServerConfig;
use graphsync::db::DatabaseConnection;
use graphsync::session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing/logging
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    tracing::info!("Loading server configuration...");
    let config = ServerConfig::load()?;
    tracing::info!("Server name: {}", config.server.name);
    tracing::info!("Database path: {}", config.database.path);
    tracing::info!("Security mode: {:?}", config.security.mode);

    // Address from environment (overrides the cluster host for binding)
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()?;
    let host = std::env::var("HOST").unwrap_or_else(|_| config.cluster.host.clone());
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Database
    let database_url = config.database_url();
    tracing::info!("Connecting to database: {}", database_url);
    let db = DatabaseConnection::new(&database_url).await?;
    tracing::info!("Running database migrations");
    db.run_migrations().await?;
    tracing::info!("Performing database health check");
    db.health_check().await?;

    // Cluster coordinator: registry row, channels, discovery
    let cluster = ClusterCoordinator::new(&config.cluster, port, db.clone());
    let direct_handler: graphsync::cluster::RequestHandler = Arc::new(|request| {
        tracing::debug!("Unsupported direct request from {}", request.sender_id);
        Some(serde_json::json!({"ok": false, "message": "unsupported request"}))
    });
    cluster.start(direct_handler).await?;
    tracing::info!("Cluster peer id: {}", cluster.peer_id());

    // Session manager: instances, auto-save, eviction
    let manager = SessionManager::new(db.clone(), Arc::clone(&cluster), config.session.clone());
    manager.start();

    // Router
    tracing::info!("Building API router");
    let auth_provider = auth::provider_for(&config.security);
    let state = AppState {
        db: db.clone(),
        manager: Arc::clone(&manager),
        cluster: Arc::clone(&cluster),
        auth: auth_provider,
    };
    let app = create_router(state);

    tracing::info!("Starting graphsync server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Ordered teardown: flush + release everything, then go offline
    manager.shutdown().await;
    cluster.shutdown().await;

    tracing::info!("Graphsync server shut down gracefully");
    Ok(())
}

/// Resolves once the process is asked to stop
///
/// Ctrl-C everywhere, SIGTERM additionally on Unix. A handler that cannot
/// be installed is logged and skipped rather than aborting the server.
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| tracing::warn!("SIGTERM handler unavailable: {}", e))
        .ok();

    #[cfg(unix)]
    let sigterm = async {
        match sigterm.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    let which = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Ctrl-C handler failed: {}", e);
            }
            "Ctrl-C"
        }
        _ = sigterm => "SIGTERM",
    };
    tracing::info!("{} received, draining sessions before exit", which);
}
