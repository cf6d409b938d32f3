use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::ChannelProfileRow;

#[derive(Debug, Serialize)]
pub struct ChannelProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub subscriber_count: i64,
    pub subscribed_to_count: i64,
    pub is_subscribed: bool,
}

impl From<ChannelProfileRow> for ChannelProfile {
    fn from(row: ChannelProfileRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            full_name: row.full_name,
            avatar_url: row.avatar_url,
            cover_image_url: row.cover_image_url,
            created_at: row.created_at,
            subscriber_count: row.subscriber_count,
            subscribed_to_count: row.subscribed_to_count,
            is_subscribed: row.is_subscribed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_profile_serialization() {
        let profile = ChannelProfile::from(ChannelProfileRow {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice Example".into(),
            avatar_url: "https://media.fake.local/avatars/a.png".into(),
            cover_image_url: None,
            created_at: OffsetDateTime::now_utc(),
            subscriber_count: 42,
            subscribed_to_count: 7,
            is_subscribed: true,
        });
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["subscriber_count"], serde_json::json!(42));
        assert_eq!(json["subscribed_to_count"], serde_json::json!(7));
        assert_eq!(json["is_subscribed"], serde_json::json!(true));
        assert!(json.get("password_hash").is_none());
    }
}
