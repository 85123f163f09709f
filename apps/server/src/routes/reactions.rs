use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared_proto::events::ServerEvent;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{ensure_profile, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::models::Reaction;
use crate::routes::posts::load_visible_post;
use crate::state::AppState;
use crate::validation::validate_emoji;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/:target_type/:target_id",
        get(list_reactions).post(toggle_reaction),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionTarget {
    Post,
    Comment,
}

impl ReactionTarget {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "post" => Some(ReactionTarget::Post),
            "comment" => Some(ReactionTarget::Comment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReactionTarget::Post => "post",
            ReactionTarget::Comment => "comment",
        }
    }
}

#[derive(Deserialize, Validate)]
struct ReactionRequest {
    #[validate(length(min = 1, max = 32), custom(function = "validate_emoji"))]
    emoji: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<String>,
    pub user_has_reacted: bool,
}

/// Groups reactions by emoji. Groups are ordered by count, largest first;
/// equal counts keep the order in which their emoji first appears.
pub fn group_reactions(reactions: &[Reaction], viewer: Uuid) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for reaction in reactions {
        let index = match groups.iter().position(|g| g.emoji == reaction.emoji) {
            Some(index) => index,
            None => {
                groups.push(ReactionGroup {
                    emoji: reaction.emoji.clone(),
                    count: 0,
                    users: Vec::new(),
                    user_has_reacted: false,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        group.count += 1;
        group.users.push(reaction.user_display_name.clone());
        group.user_has_reacted |= reaction.user_id == viewer;
    }
    // sort_by is stable, which keeps first-seen order among ties
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups
}

fn parse_target(raw: &str) -> ApiResult<ReactionTarget> {
    ReactionTarget::parse(raw)
        .ok_or_else(|| ApiError::validation(format!("Unknown reaction target '{raw}'")))
}

async fn list_reactions(
    State(state): State<AppState>,
    user: AuthUser,
    Path((target_type, target_id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Vec<ReactionGroup>>> {
    let target = parse_target(&target_type)?;
    target_author(&state, user.id, target, target_id).await?;
    Ok(Json(fetch_groups(&state, user.id, target, target_id).await?))
}

/// Adds the caller's emoji to the target, or removes it if already present
async fn toggle_reaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path((target_type, target_id)): Path<(String, Uuid)>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<Json<Vec<ReactionGroup>>> {
    let target = parse_target(&target_type)?;
    req.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let emoji = req.emoji.trim();

    let author = target_author(&state, user.id, target, target_id).await?;

    let removed = sqlx::query(
        r#"
        DELETE FROM reactions
        WHERE target_type = $1 AND target_id = $2 AND user_id = $3 AND emoji = $4
        "#,
    )
    .bind(target.as_str())
    .bind(target_id)
    .bind(user.id)
    .bind(emoji)
    .execute(&state.db)
    .await?
    .rows_affected()
        > 0;

    if !removed {
        let (display_name, _) = ensure_profile(&state.db, &user).await?;
        sqlx::query(
            r#"
            INSERT INTO reactions (target_type, target_id, user_id, user_display_name, emoji)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (target_type, target_id, user_id, emoji) DO NOTHING
            "#,
        )
        .bind(target.as_str())
        .bind(target_id)
        .bind(user.id)
        .bind(&display_name)
        .bind(emoji)
        .execute(&state.db)
        .await?;
    }

    tracing::debug!(
        component = "reactions",
        target_type = target.as_str(),
        %target_id,
        user_id = %user.id,
        emoji,
        added = !removed,
        "reaction toggled"
    );

    if author != user.id {
        state.notify(
            author,
            &ServerEvent::ReactionsChanged {
                target_type: target.as_str().to_string(),
                target_id,
            },
        );
    }

    Ok(Json(fetch_groups(&state, user.id, target, target_id).await?))
}

/// Resolves the author of a reaction target the caller is allowed to see.
async fn target_author(
    state: &AppState,
    viewer: Uuid,
    target: ReactionTarget,
    target_id: Uuid,
) -> ApiResult<Uuid> {
    match target {
        ReactionTarget::Post => Ok(load_visible_post(state, viewer, target_id).await?.user_id),
        ReactionTarget::Comment => {
            let (post_id, author) = sqlx::query_as::<_, (Uuid, Uuid)>(
                "SELECT post_id, user_id FROM comments WHERE id = $1",
            )
            .bind(target_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or(ApiError::NotFound("Comment"))?;
            load_visible_post(state, viewer, post_id).await?;
            Ok(author)
        }
    }
}

async fn fetch_groups(
    state: &AppState,
    viewer: Uuid,
    target: ReactionTarget,
    target_id: Uuid,
) -> ApiResult<Vec<ReactionGroup>> {
    let reactions = sqlx::query_as::<_, Reaction>(
        r#"
        SELECT * FROM reactions
        WHERE target_type = $1 AND target_id = $2
        ORDER BY created_at DESC
        "#,
    )
    .bind(target.as_str())
    .bind(target_id)
    .fetch_all(&state.db)
    .await?;

    Ok(group_reactions(&reactions, viewer))
}
