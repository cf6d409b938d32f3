use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// One row per channel lookup: the sanitized owner columns plus the
/// subscription aggregates, computed in a single round-trip.
#[derive(Debug, FromRow)]
pub struct ChannelProfileRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub created_at: OffsetDateTime,
    pub subscriber_count: i64,
    pub subscribed_to_count: i64,
    pub is_subscribed: bool,
}

/// `viewer` is NULL for anonymous requests, which makes `is_subscribed`
/// false without a separate query shape.
pub async fn channel_profile(
    db: &PgPool,
    username: &str,
    viewer: Option<Uuid>,
) -> Result<Option<ChannelProfileRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelProfileRow>(
        r#"
        SELECT u.id, u.username, u.email, u.full_name, u.avatar_url,
               u.cover_image_url, u.created_at,
               (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id)
                   AS subscriber_count,
               (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id)
                   AS subscribed_to_count,
               EXISTS(SELECT 1 FROM subscriptions s
                       WHERE s.channel_id = u.id AND s.subscriber_id = $2)
                   AS is_subscribed
        FROM users u
        WHERE u.username = $1
        "#,
    )
    .bind(username)
    .bind(viewer)
    .fetch_optional(db)
    .await
}
