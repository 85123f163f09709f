use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared_proto::events::ServerEvent;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{ensure_profile, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::graph::{
    current_status, inserted_request, membership_batches, merge_incoming, normalize_target_email,
    resolve_friends, role_of, FriendEntry, FriendsOverview, RequestAction, RequestRole,
    SendRequestChecks,
};
use crate::models::{FriendRequest, Friendship, User};
use crate::routes::users::find_by_email;
use crate::state::AppState;
use crate::timeline;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_friends))
        .route("/overview", get(overview))
        .route("/requests", post(send_request))
        .route("/requests/incoming", get(list_incoming))
        .route("/requests/incoming/count", get(count_incoming))
        .route("/requests/outgoing", get(list_outgoing))
        .route("/requests/:id/accept", post(accept_request))
        .route("/requests/:id/decline", post(decline_request))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/:friendship_id", delete(remove_friend))
}

#[derive(Debug, Deserialize)]
pub struct SendRequestBody {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct IncomingCount {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ResolvedRequest {
    pub request: FriendRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendship: Option<Friendship>,
}

/// Get all friends with their profiles, newest friendship first
async fn list_friends(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<FriendEntry>>> {
    Ok(Json(load_friends(&state, user.id).await?))
}

async fn overview(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<FriendsOverview>> {
    let friends = load_friends(&state, user.id).await?;
    let incoming = load_incoming(&state.db, &user).await?;
    let outgoing = load_outgoing(&state.db, user.id).await?;
    Ok(Json(FriendsOverview::build(friends, incoming, outgoing)))
}

async fn list_incoming(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<FriendRequest>>> {
    Ok(Json(load_incoming(&state.db, &user).await?))
}

async fn count_incoming(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<IncomingCount>> {
    let count = load_incoming(&state.db, &user).await?.len();
    Ok(Json(IncomingCount { count }))
}

async fn list_outgoing(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<FriendRequest>>> {
    Ok(Json(load_outgoing(&state.db, user.id).await?))
}

/// Send a friend request to an e-mail address
async fn send_request(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<SendRequestBody>,
) -> ApiResult<(StatusCode, Json<FriendRequest>)> {
    // Self-requests are refused before touching storage.
    let target_email = normalize_target_email(&body.email, &user.email)?;

    let outgoing_pending = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM friend_requests
            WHERE from_user_id = $1 AND to_user_email = $2 AND status = 'pending'
        )
        "#,
    )
    .bind(user.id)
    .bind(&target_email)
    .fetch_one(&state.db)
    .await?;

    let incoming_pending = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM friend_requests
            WHERE from_user_email = $1
              AND (to_user_id = $2 OR to_user_email = $3)
              AND status = 'pending'
        )
        "#,
    )
    .bind(&target_email)
    .bind(user.id)
    .bind(&user.email)
    .fetch_one(&state.db)
    .await?;

    let target = find_by_email(&state.db, &target_email).await?;
    let already_friends = match &target {
        Some(target) => timeline::are_friends(&state.db, user.id, target.id).await?,
        None => false,
    };

    SendRequestChecks {
        outgoing_pending,
        incoming_pending,
        already_friends,
    }
    .verdict()?;

    let (from_name, from_photo) = ensure_profile(&state.db, &user).await?;

    let request = sqlx::query_as::<_, FriendRequest>(
        r#"
        INSERT INTO friend_requests
            (from_user_id, to_user_id, to_user_email, from_user_email, from_user_name, from_user_photo_url, status)
        VALUES ($1, $2, $3, $4, $5, $6, 'pending')
        ON CONFLICT (from_user_id, to_user_email) WHERE status = 'pending' DO NOTHING
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(target.as_ref().map(|t| t.id))
    .bind(&target_email)
    .bind(&user.email)
    .bind(&from_name)
    .bind(&from_photo)
    .fetch_optional(&state.db)
    .await?;
    // A concurrent send for the same address won the insert.
    let request = inserted_request(request)?;

    tracing::info!(
        component = "friends",
        request_id = %request.id,
        from_user_id = %user.id,
        recipient_known = target.is_some(),
        "friend request sent"
    );

    if let Some(recipient) = request.to_user_id {
        state.notify(
            recipient,
            &ServerEvent::FriendRequestReceived {
                request_id: request.id,
                from_user_id: user.id,
                from_user_name: from_name,
            },
        );
    }

    Ok((StatusCode::CREATED, Json(request)))
}

async fn accept_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<ResolvedRequest>> {
    resolve_request(&state, &user, request_id, RequestAction::Accept)
        .await
        .map(Json)
}

async fn decline_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<ResolvedRequest>> {
    resolve_request(&state, &user, request_id, RequestAction::Decline)
        .await
        .map(Json)
}

async fn cancel_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<ResolvedRequest>> {
    resolve_request(&state, &user, request_id, RequestAction::Cancel)
        .await
        .map(Json)
}

/// Applies an action to a pending request. The request row is locked for the
/// whole transaction so two concurrent answers cannot both succeed, and an
/// accepted request creates at most one friendship per unordered pair.
async fn resolve_request(
    state: &AppState,
    user: &AuthUser,
    request_id: Uuid,
    action: RequestAction,
) -> ApiResult<ResolvedRequest> {
    if action == RequestAction::Accept {
        ensure_profile(&state.db, user).await?;
    }
    let mut tx = state.db.begin().await?;

    let request = sqlx::query_as::<_, FriendRequest>(
        "SELECT * FROM friend_requests WHERE id = $1 FOR UPDATE",
    )
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("Friend request"))?;

    let role = role_of(&request, user.id, &user.email);
    if role == RequestRole::Unrelated {
        return Err(ApiError::NotFound("Friend request"));
    }
    if !action.permitted_for(role) {
        let message = match action {
            RequestAction::Cancel => "Only the sender can cancel a friend request",
            RequestAction::Accept | RequestAction::Decline => {
                "Only the recipient can answer a friend request"
            }
        };
        return Err(ApiError::forbidden(message));
    }

    let next = current_status(&request)?.apply(action)?;
    let claimed_by = (action == RequestAction::Accept).then_some(user.id);

    let request = sqlx::query_as::<_, FriendRequest>(
        r#"
        UPDATE friend_requests
        SET status = $2, responded_at = NOW(), to_user_id = COALESCE($3, to_user_id)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(next.as_str())
    .bind(claimed_by)
    .fetch_one(&mut *tx)
    .await?;

    let mut friendship = None;
    if action == RequestAction::Accept {
        let existing = sqlx::query_as::<_, Friendship>(
            r#"
            SELECT * FROM friendships
            WHERE (user1_id = $1 AND user2_id = $2) OR (user1_id = $2 AND user2_id = $1)
            LIMIT 1
            "#,
        )
        .bind(request.from_user_id)
        .bind(user.id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_none() {
            friendship = sqlx::query_as::<_, Friendship>(
                r#"
                INSERT INTO friendships (user1_id, user2_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                RETURNING *
                "#,
            )
            .bind(request.from_user_id)
            .bind(user.id)
            .fetch_optional(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    tracing::info!(
        component = "friends",
        request_id = %request.id,
        user_id = %user.id,
        status = next.as_str(),
        friendship_created = friendship.is_some(),
        "friend request resolved"
    );

    let counterpart = match role {
        RequestRole::Sender => request.to_user_id,
        _ => Some(request.from_user_id),
    };
    if let Some(counterpart) = counterpart {
        state.notify(
            counterpart,
            &ServerEvent::FriendRequestResolved {
                request_id: request.id,
                status: next.as_str().to_string(),
            },
        );
    }
    if let Some(created) = &friendship {
        for member in [created.user1_id, created.user2_id] {
            if let Some(friend_id) = created.other_member(member) {
                state.notify(
                    member,
                    &ServerEvent::FriendshipCreated {
                        friendship_id: created.id,
                        friend_id,
                    },
                );
            }
        }
    }

    Ok(ResolvedRequest {
        request,
        friendship,
    })
}

/// Remove a friend; either member may end the friendship
async fn remove_friend(
    State(state): State<AppState>,
    user: AuthUser,
    Path(friendship_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let friendship = sqlx::query_as::<_, Friendship>("SELECT * FROM friendships WHERE id = $1")
        .bind(friendship_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Friendship"))?;

    let Some(friend_id) = friendship.other_member(user.id) else {
        return Err(ApiError::NotFound("Friendship"));
    };

    sqlx::query("DELETE FROM friendships WHERE id = $1")
        .bind(friendship_id)
        .execute(&state.db)
        .await?;

    tracing::info!(
        component = "friends",
        %friendship_id,
        user_id = %user.id,
        "friendship removed"
    );

    state.notify(
        friend_id,
        &ServerEvent::FriendshipRemoved {
            friendship_id,
            friend_id: user.id,
        },
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn load_friends(state: &AppState, user_id: Uuid) -> Result<Vec<FriendEntry>, sqlx::Error> {
    let pool = &state.db;
    let friendships = sqlx::query_as::<_, Friendship>(
        "SELECT * FROM friendships WHERE user1_id = $1 OR user2_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let friend_ids: Vec<Uuid> = friendships
        .iter()
        .filter_map(|f| f.other_member(user_id))
        .collect();

    let mut users = HashMap::new();
    for batch in membership_batches(&friend_ids) {
        let rows = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
            .bind(&batch)
            .fetch_all(pool)
            .await?;
        users.extend(rows.into_iter().map(|u| (u.id, u)));
    }

    let mut friends = resolve_friends(user_id, &friendships, &users);
    for entry in &mut friends {
        entry.online = state.is_online(entry.friend_id);
    }
    Ok(friends)
}

/// Pending requests addressed to the caller, found both by id and by e-mail
/// so requests sent before the caller signed up are included.
async fn load_incoming(pool: &PgPool, user: &AuthUser) -> Result<Vec<FriendRequest>, sqlx::Error> {
    let by_id = sqlx::query_as::<_, FriendRequest>(
        "SELECT * FROM friend_requests WHERE to_user_id = $1 AND status = 'pending'",
    )
    .bind(user.id)
    .fetch_all(pool)
    .await?;

    let by_email = sqlx::query_as::<_, FriendRequest>(
        "SELECT * FROM friend_requests WHERE to_user_email = $1 AND status = 'pending'",
    )
    .bind(&user.email)
    .fetch_all(pool)
    .await?;

    Ok(merge_incoming(by_id, by_email))
}

async fn load_outgoing(pool: &PgPool, user_id: Uuid) -> Result<Vec<FriendRequest>, sqlx::Error> {
    sqlx::query_as::<_, FriendRequest>(
        r#"
        SELECT * FROM friend_requests
        WHERE from_user_id = $1 AND status = 'pending'
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}
