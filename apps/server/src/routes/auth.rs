use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::auth::{self, AuthUser};
use crate::error::ApiResult;
use crate::models::User;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session", post(session))
        .route("/me", get(me))
}

async fn session(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<User>> {
    let profile = auth::sign_in(&state.db, &user).await?;
    Ok(Json(profile))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<User>> {
    let profile = auth::get_me(&state.db, user.id).await?;
    Ok(Json(profile))
}
