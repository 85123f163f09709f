//! Timeline visibility: a viewer sees their own posts and their friends' posts.

use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use crate::graph::{self, membership_batches};
use crate::models::{Friendship, Post};

pub const DEFAULT_TIMELINE_LIMIT: i64 = 50;
pub const MAX_TIMELINE_LIMIT: i64 = 200;

pub fn clamp_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_TIMELINE_LIMIT)
        .clamp(1, MAX_TIMELINE_LIMIT)
}

/// The viewer first, then each friend once.
pub fn visible_authors<I>(viewer: Uuid, friend_ids: I) -> Vec<Uuid>
where
    I: IntoIterator<Item = Uuid>,
{
    let mut seen = HashSet::from([viewer]);
    let mut authors = vec![viewer];
    authors.extend(friend_ids.into_iter().filter(|id| seen.insert(*id)));
    authors
}

/// Combines per-batch results into one newest-first page.
pub fn merge_batches(batches: Vec<Vec<Post>>, limit: usize) -> Vec<Post> {
    let mut seen = HashSet::new();
    let mut posts: Vec<Post> = batches
        .into_iter()
        .flatten()
        .filter(|post| seen.insert(post.id))
        .collect();
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    posts.truncate(limit);
    posts
}

pub async fn friend_ids(pool: &PgPool, user_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT CASE
            WHEN f.user1_id = $1 THEN f.user2_id
            ELSE f.user1_id
        END AS friend_id
        FROM friendships f
        WHERE f.user1_id = $1 OR f.user2_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Checks both orientations of the pair.
pub async fn are_friends(pool: &PgPool, a: Uuid, b: Uuid) -> Result<bool, sqlx::Error> {
    let rows = sqlx::query_as::<_, Friendship>(
        r#"
        SELECT * FROM friendships
        WHERE (user1_id = $1 AND user2_id = $2) OR (user1_id = $2 AND user2_id = $1)
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_all(pool)
    .await?;
    Ok(graph::are_friends(&rows, a, b))
}

pub async fn can_view(pool: &PgPool, viewer: Uuid, author: Uuid) -> Result<bool, sqlx::Error> {
    if viewer == author {
        return Ok(true);
    }
    are_friends(pool, viewer, author).await
}

/// Loads the viewer's timeline, querying authors in membership-sized batches.
pub async fn load_timeline(pool: &PgPool, viewer: Uuid, limit: i64) -> Result<Vec<Post>, sqlx::Error> {
    let authors = visible_authors(viewer, friend_ids(pool, viewer).await?);
    let batches = membership_batches(&authors);

    let mut results = Vec::with_capacity(batches.len());
    for batch in &batches {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM posts
            WHERE user_id = ANY($1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(batch)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        results.push(posts);
    }

    tracing::debug!(
        component = "timeline",
        %viewer,
        authors = authors.len(),
        batches = batches.len(),
        "timeline assembled"
    );

    Ok(merge_batches(results, usize::try_from(limit).unwrap_or(0)))
}
