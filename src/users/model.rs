use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database. The password hash and the single-slot
/// refresh token never serialize, regardless of which read path loads them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub created_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, \
                            avatar_url, cover_image_url, refresh_token, created_at";

impl User {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Lookup by either unique identity field; NULL binds never match.
    pub async fn find_by_username_or_email(
        db: &PgPool,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2"
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(db)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        db: &PgPool,
        username: &str,
        email: &str,
        full_name: &str,
        password_hash: &str,
        avatar_url: &str,
        cover_image_url: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, full_name, password_hash, avatar_url, cover_image_url)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(email)
        .bind(full_name)
        .bind(password_hash)
        .bind(avatar_url)
        .bind(cover_image_url)
        .fetch_one(db)
        .await
    }

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET full_name = $2, email = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(full_name)
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub async fn set_avatar_url(
        db: &PgPool,
        id: Uuid,
        avatar_url: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET avatar_url = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(avatar_url)
        .fetch_optional(db)
        .await
    }

    pub async fn set_cover_image_url(
        db: &PgPool,
        id: Uuid,
        cover_image_url: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET cover_image_url = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(cover_image_url)
        .fetch_optional(db)
        .await
    }

    pub async fn update_password_hash(
        db: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Login path: unconditionally replace the stored refresh token, which
    /// invalidates whatever session held the previous one.
    pub async fn store_refresh_token(
        db: &PgPool,
        id: Uuid,
        refresh_token: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(refresh_token)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Rotation is a compare-and-swap on the stored token. Of two concurrent
    /// refreshes presenting the same value, exactly one updates a row; the
    /// other sees `false` and must be rejected as a reuse.
    pub async fn rotate_refresh_token(
        db: &PgPool,
        id: Uuid,
        presented: &str,
        replacement: &str,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE users SET refresh_token = $3 WHERE id = $1 AND refresh_token = $2")
                .bind(id)
                .bind(presented)
                .bind(replacement)
                .execute(db)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Logout: idempotent, clearing an already-empty slot is fine.
    pub async fn clear_refresh_token(db: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET refresh_token = NULL WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}
