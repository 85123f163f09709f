use anyhow::Context;
use axum::{http::HeaderValue, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::state::AppState;

pub mod auth;
pub mod comments;
pub mod friends;
pub mod posts;
pub mod reactions;
pub mod users;
pub mod ws;

pub fn router(state: AppState) -> Router {
    let media = ServeDir::new(state.media.root());

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .nest("/auth", auth::router())
        .nest("/users", users::router())
        .nest("/friends", friends::router())
        .nest("/posts", posts::router())
        .nest("/comments", comments::router())
        .nest("/reactions", reactions::router())
        .nest_service("/media", media)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin when none is configured, otherwise exactly the configured one.
pub fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let layer = match origin {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin {origin}"))?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };
    Ok(layer)
}

async fn health_check() -> &'static str {
    "OK"
}
