use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::User;

/// Sanitized user view: everything a client may see, nothing it may not.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
            cover_image_url: user.cover_image_url,
            created_at: user.created_at,
        }
    }
}

/// Login accepts either unique identifier; at least one must be present.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Returned by login: the fresh pair plus the sanitized user.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_strips_credential_fields() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice Example".into(),
            password_hash: "$argon2id$secret".into(),
            avatar_url: "https://media.fake.local/avatars/a.png".into(),
            cover_image_url: Some("https://media.fake.local/covers/a.png".into()),
            refresh_token: Some("stored-refresh-token".into()),
            created_at: OffsetDateTime::now_utc(),
        };

        let json = serde_json::to_value(PublicUser::from(user)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refresh_token").is_none());
        assert_eq!(json["username"], serde_json::json!("alice"));
        assert_eq!(
            json["cover_image_url"],
            serde_json::json!("https://media.fake.local/covers/a.png")
        );
    }

    #[test]
    fn auth_response_serializes_token_pair() {
        let user = User {
            id: Uuid::new_v4(),
            username: "bob".into(),
            email: "bob@example.com".into(),
            full_name: "Bob".into(),
            password_hash: String::new(),
            avatar_url: "https://media.fake.local/avatars/b.png".into(),
            cover_image_url: None,
            refresh_token: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let resp = AuthResponse {
            access_token: "acc".into(),
            refresh_token: "ref".into(),
            user: user.into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["access_token"], serde_json::json!("acc"));
        assert_eq!(json["refresh_token"], serde_json::json!("ref"));
        assert_eq!(json["user"]["username"], serde_json::json!("bob"));
    }
}
