use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{User, UserPublic};
use crate::state::AppState;
use crate::validation::normalize_email;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lookup", get(lookup_by_email))
        .route("/:id", get(get_user))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub email: String,
}

/// Get a specific user's public profile
async fn get_user(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<UserPublic>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    Ok(Json(user.into()))
}

/// Finds the first profile registered under an e-mail address.
async fn lookup_by_email(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<UserPublic>> {
    let email = normalize_email(&query.email);
    if email.is_empty() {
        return Err(ApiError::validation("Please enter an email address"));
    }

    let user = find_by_email(&state.db, &email)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    Ok(Json(user.into()))
}

pub(crate) async fn find_by_email(
    pool: &sqlx::PgPool,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE email = $1 ORDER BY created_at ASC LIMIT 1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}
