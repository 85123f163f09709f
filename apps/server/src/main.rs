mod auth;
mod config;
mod error;
mod graph;
mod media;
mod mentions;
mod models;
mod observability;
mod routes;
mod state;
mod timeline;
mod validation;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::IdentityVerifier;
use crate::config::ServerConfig;
use crate::media::MediaStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();

    let config = ServerConfig::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!(component = "db", "connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!(component = "db", "migrations applied");

    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .with_context(|| format!("failed to create media dir {}", config.media_dir.display()))?;

    let state = AppState::new(
        pool,
        IdentityVerifier::new(&config.identity),
        MediaStore::new(&config.media_dir, &config.public_url),
    );
    let app = routes::router(state).layer(routes::cors_layer(config.cors_origin.as_deref())?);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(
        component = "server",
        addr = %listener.local_addr()?,
        media_dir = %config.media_dir.display(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!(component = "server", "shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(component = "server", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!(component = "server", "shutdown signal received");
}
