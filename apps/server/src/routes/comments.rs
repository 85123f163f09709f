use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::delete,
    Router,
};
use shared_proto::events::ServerEvent;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::Comment;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:id", delete(delete_comment))
}

/// Delete a comment and the reactions on it (author only)
async fn delete_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(comment_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let comment = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Comment"))?;

    if comment.user_id != user.id {
        return Err(ApiError::forbidden("Only the author can delete this comment"));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM reactions WHERE target_type = 'comment' AND target_id = $1")
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(
        component = "comments",
        %comment_id,
        post_id = %comment.post_id,
        user_id = %user.id,
        "comment deleted"
    );

    let post_author = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM posts WHERE id = $1")
        .bind(comment.post_id)
        .fetch_optional(&state.db)
        .await?;
    if let Some(author) = post_author.filter(|author| *author != user.id) {
        state.notify(
            author,
            &ServerEvent::CommentDeleted {
                post_id: comment.post_id,
                comment_id,
            },
        );
    }

    Ok(StatusCode::NO_CONTENT)
}
