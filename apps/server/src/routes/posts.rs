use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use shared_proto::events::ServerEvent;
use sqlx::types::Json as JsonColumn;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{ensure_profile, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::media::{MediaError, MediaType, MAX_VIDEO_BYTES};
use crate::mentions::{is_user_mentioned, mention_refs, to_plain_text, to_storage_format};
use crate::models::{Comment, MentionRef, Post};
use crate::state::AppState;
use crate::timeline::{self, clamp_limit};
use crate::validation::{validate_comment_content, validate_post_content};

/// Raw upload bodies may run a little over the video limit so the media store
/// can report the real size.
const MEDIA_BODY_LIMIT: usize = MAX_VIDEO_BYTES + 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_post))
        .route("/timeline", get(get_timeline))
        .route("/:id", get(get_post).put(edit_post).delete(delete_post))
        .route(
            "/:id/media",
            put(upload_media).layer(DefaultBodyLimit::max(MEDIA_BODY_LIMIT)),
        )
        .route("/:id/comments", get(list_comments).post(create_comment))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PostBody {
    #[serde(default)]
    #[validate(custom(function = "validate_post_content"))]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<MentionRef>,
    /// Set when the client will upload media right after creating the post.
    #[serde(default)]
    pub has_media: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentBody {
    #[validate(custom(function = "validate_comment_content"))]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<MentionRef>,
}

/// Converts `@Name` display text into stored markup and derives the mention
/// list from what actually ended up in the text.
fn prepare_content(content: &str, selected: &[MentionRef]) -> (String, Vec<MentionRef>) {
    let stored = to_storage_format(content.trim(), selected);
    let mentions = mention_refs(&stored);
    (stored, mentions)
}

async fn get_timeline(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<Json<Vec<Post>>> {
    let posts = timeline::load_timeline(&state.db, user.id, clamp_limit(query.limit)).await?;
    Ok(Json(posts))
}

async fn create_post(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PostBody>,
) -> ApiResult<(StatusCode, Json<Post>)> {
    body.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if body.content.trim().is_empty() && !body.has_media {
        return Err(ApiError::validation("Post must have text or media"));
    }

    let (content, mentions) = prepare_content(&body.content, &body.mentions);
    let (display_name, photo_url) = ensure_profile(&state.db, &user).await?;

    let post = sqlx::query_as::<_, Post>(
        r#"
        INSERT INTO posts (user_id, user_display_name, user_photo_url, content, mentions, media_type)
        VALUES ($1, $2, $3, $4, $5, 'none')
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(&display_name)
    .bind(&photo_url)
    .bind(&content)
    .bind(JsonColumn(&mentions))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        component = "posts",
        post_id = %post.id,
        user_id = %user.id,
        mentions = mentions.len(),
        "post created"
    );

    let friends = timeline::friend_ids(&state.db, user.id).await?;
    state.notify_many(
        friends,
        &ServerEvent::PostPublished {
            post_id: post.id,
            author_id: user.id,
        },
    );
    notify_mentioned(&state, &mentions, user.id, "post", post.id, &post.content);

    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<Uuid>,
) -> ApiResult<Json<Post>> {
    Ok(Json(load_visible_post(&state, user.id, post_id).await?))
}

async fn edit_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<Uuid>,
    Json(body): Json<PostBody>,
) -> ApiResult<Json<Post>> {
    body.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let existing = load_own_post(&state, user.id, post_id).await?;
    if body.content.trim().is_empty() && existing.media_type == MediaType::None.as_str() {
        return Err(ApiError::validation("Post must have text or media"));
    }

    let (content, mentions) = prepare_content(&body.content, &body.mentions);
    let post = sqlx::query_as::<_, Post>(
        r#"
        UPDATE posts
        SET content = $2, mentions = $3, edited = TRUE, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(post_id)
    .bind(&content)
    .bind(JsonColumn(&mentions))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(component = "posts", %post_id, user_id = %user.id, "post edited");

    // Only people newly mentioned by this edit hear about it.
    let added: Vec<MentionRef> = mentions
        .into_iter()
        .filter(|m| !is_user_mentioned(&existing.content, &m.user_id.to_string()))
        .collect();
    notify_mentioned(&state, &added, user.id, "post", post_id, &post.content);
    notify_audience(&state, user.id, &ServerEvent::PostUpdated { post_id }).await?;

    Ok(Json(post))
}

async fn delete_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let post = load_own_post(&state, user.id, post_id).await?;

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        DELETE FROM reactions
        WHERE (target_type = 'post' AND target_id = $1)
           OR (target_type = 'comment' AND target_id IN (SELECT id FROM comments WHERE post_id = $1))
        "#,
    )
    .bind(post_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    if let Some(path) = post.media_path.as_deref() {
        if let Err(err) = state.media.remove(path).await {
            tracing::warn!(component = "posts", %post_id, error = %err, "failed to remove post media");
        }
    }

    tracing::info!(component = "posts", %post_id, user_id = %user.id, "post deleted");
    notify_audience(&state, user.id, &ServerEvent::PostDeleted { post_id }).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Attaches an image or video to a post. The body is the raw file and the
/// `Content-Type` header names its type.
async fn upload_media(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Post>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| MediaError::UnsupportedType("missing content type".to_string()))?
        .to_string();

    let existing = load_own_post(&state, user.id, post_id).await?;
    let stored = state
        .media
        .save(user.id, post_id, &content_type, &body)
        .await?;

    let updated = sqlx::query_as::<_, Post>(
        r#"
        UPDATE posts
        SET media_type = $2, media_url = $3, media_path = $4, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(post_id)
    .bind(stored.kind.as_str())
    .bind(&stored.url)
    .bind(&stored.path)
    .fetch_one(&state.db)
    .await;
    let post = state.media.discard_on_error(&stored, updated).await?;

    if let Some(old) = existing.media_path.as_deref() {
        if old != stored.path {
            if let Err(err) = state.media.remove(old).await {
                tracing::warn!(component = "posts", %post_id, error = %err, "failed to remove replaced media");
            }
        }
    }

    notify_audience(&state, user.id, &ServerEvent::PostUpdated { post_id }).await?;
    Ok(Json(post))
}

async fn list_comments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Comment>>> {
    load_visible_post(&state, user.id, post_id).await?;

    let comments = sqlx::query_as::<_, Comment>(
        "SELECT * FROM comments WHERE post_id = $1 ORDER BY created_at ASC",
    )
    .bind(post_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<Uuid>,
    Json(body): Json<CommentBody>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    body.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let post = load_visible_post(&state, user.id, post_id).await?;
    let (content, mentions) = prepare_content(&body.content, &body.mentions);
    let (display_name, photo_url) = ensure_profile(&state.db, &user).await?;

    let comment = sqlx::query_as::<_, Comment>(
        r#"
        INSERT INTO comments (post_id, user_id, user_display_name, user_photo_url, content, mentions)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(post_id)
    .bind(user.id)
    .bind(&display_name)
    .bind(&photo_url)
    .bind(&content)
    .bind(JsonColumn(&mentions))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        component = "comments",
        comment_id = %comment.id,
        %post_id,
        user_id = %user.id,
        "comment added"
    );

    if post.user_id != user.id {
        state.notify(
            post.user_id,
            &ServerEvent::CommentAdded {
                post_id,
                comment_id: comment.id,
            },
        );
    }
    notify_mentioned(&state, &mentions, user.id, "comment", comment.id, &comment.content);

    Ok((StatusCode::CREATED, Json(comment)))
}

/// Loads a post the viewer may see. Posts from non-friends look missing.
pub(crate) async fn load_visible_post(
    state: &AppState,
    viewer: Uuid,
    post_id: Uuid,
) -> ApiResult<Post> {
    let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Post"))?;

    if !timeline::can_view(&state.db, viewer, post.user_id).await? {
        return Err(ApiError::NotFound("Post"));
    }
    Ok(post)
}

async fn load_own_post(state: &AppState, user_id: Uuid, post_id: Uuid) -> ApiResult<Post> {
    let post = load_visible_post(state, user_id, post_id).await?;
    if post.user_id != user_id {
        return Err(ApiError::forbidden("Only the author can change this post"));
    }
    Ok(post)
}

pub(crate) fn notify_mentioned(
    state: &AppState,
    mentions: &[MentionRef],
    author_id: Uuid,
    context: &str,
    target_id: Uuid,
    content: &str,
) {
    if mentions.is_empty() {
        return;
    }
    let event = ServerEvent::Mentioned {
        context: context.to_string(),
        target_id,
        by_user_id: author_id,
        excerpt: mention_excerpt(content),
    };
    state.notify_many(
        mentions
            .iter()
            .map(|m| m.user_id)
            .filter(|id| *id != author_id),
        &event,
    );
}

fn mention_excerpt(content: &str) -> String {
    const EXCERPT_CHARS: usize = 140;
    let plain = to_plain_text(content);
    if plain.chars().count() <= EXCERPT_CHARS {
        return plain;
    }
    let mut excerpt: String = plain.chars().take(EXCERPT_CHARS).collect();
    excerpt.push('…');
    excerpt
}

/// Sends a post event to the author and the author's friends.
async fn notify_audience(state: &AppState, author_id: Uuid, event: &ServerEvent) -> ApiResult<()> {
    let friends = timeline::friend_ids(&state.db, author_id).await?;
    state.notify_many(timeline::visible_authors(author_id, friends), event);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_mentions_follow_the_rewritten_text() {
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let selected = vec![
            MentionRef {
                user_id: bob,
                display_name: "Bob".to_string(),
            },
            MentionRef {
                user_id: carol,
                display_name: "Carol".to_string(),
            },
        ];

        let (content, mentions) = prepare_content("  hi @Bob!  ", &selected);

        assert_eq!(content, format!("hi @(Bob:{bob})!"));
        assert_eq!(mentions.len(), 1, "Carol was selected but removed from the text");
        assert_eq!(mentions[0].user_id, bob);
    }

    #[test]
    fn excerpt_strips_markup_and_truncates() {
        let id = Uuid::new_v4();
        assert_eq!(mention_excerpt(&format!("thanks @(Bob:{id})")), "thanks @Bob");
        assert_eq!(mention_excerpt("see @[Ann](u1)"), "see @Ann");

        let long = "x".repeat(300);
        let excerpt = mention_excerpt(&long);
        assert_eq!(excerpt.chars().count(), 141);
        assert!(excerpt.ends_with('…'));
    }

    #[test]
    fn post_body_defaults_allow_media_only_posts() {
        let body: PostBody = serde_json::from_str(r#"{"has_media": true}"#).expect("parse body");
        assert!(body.content.is_empty());
        assert!(body.has_media);
        assert!(body.validate().is_ok());
    }

    #[test]
    fn comment_body_rejects_blank_content() {
        let body: CommentBody = serde_json::from_str(r#"{"content": "   "}"#).expect("parse body");
        assert!(body.validate().is_err());
    }
}
