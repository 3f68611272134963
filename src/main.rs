use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use handlers::AppState;
use services::cleanup::CleanupScheduler;
use services::storage::Provider;
use services::storage::factory::StorageFactory;
use services::tracker::ResourceTracker;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        provider = %cfg.storage.provider,
        addr = %cfg.addr(),
        "starting media-store"
    );

    // --- Ensure local storage root exists ---
    if cfg.storage.provider == Provider::Local && !cfg.storage.local.root.exists() {
        fs::create_dir_all(&cfg.storage.local.root)?;
        tracing::info!(
            "created storage directory at {}",
            cfg.storage.local.root.display()
        );
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("created missing directory {:?}", parent);
        }
    }

    // SQLx does not create the database file on its own.
    if !Path::new(db_path).exists() {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(db_path)?;
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Migrations run at startup; --migrate exits afterwards ---
    run_migrations(&db).await?;
    if migrate {
        tracing::info!("database migration complete");
        return Ok(());
    }

    // --- Core services ---
    let factory = Arc::new(StorageFactory::new());
    let tracker = ResourceTracker::new(Arc::clone(&db));
    let scheduler = Arc::new(CleanupScheduler::new(
        tracker.clone(),
        Arc::clone(&factory),
        cfg.storage.clone(),
        cfg.cleanup.clone(),
    ));

    // Bind the configured driver up front so misconfiguration fails fast.
    factory.get_driver(&cfg.storage).await?;

    // --- Background cleanup with cooperative shutdown ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    // --- Build router ---
    let state = AppState {
        config: cfg.clone(),
        factory,
        tracker,
        scheduler,
        db,
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweeper and let an in-flight sweep wind down between keys.
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
    }
}

/// Run SQLite migrations manually from the embedded SQL file. Statements
/// are `IF NOT EXISTS`, so re-running at every startup is safe.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let sql = include_str!("../migrations/0001_init.sql");
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("running {} migration statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
