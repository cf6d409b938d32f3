use axum::extract::FromRef;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::error::ApiError;
use crate::state::AppState;

use super::dto::{
    AuthResponse, ChangePasswordRequest, LoginRequest, PublicUser, TokenPair, UpdateProfileRequest,
};
use super::model::User;

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// One uploaded file pulled out of a multipart body.
pub struct FilePart {
    pub bytes: Bytes,
    pub content_type: String,
}

pub struct RegisterForm {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub avatar: FilePart,
    pub cover_image: Option<FilePart>,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn media_key(prefix: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{}/{}.{}", prefix, Uuid::new_v4(), ext)
}

fn conflict_on_unique(e: sqlx::Error, message: &str) -> ApiError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return ApiError::Conflict(message.into());
        }
    }
    ApiError::Persistence(e)
}

async fn upload_media(state: &AppState, prefix: &str, file: &FilePart) -> Result<String, ApiError> {
    let key = media_key(prefix, &file.content_type);
    state
        .storage
        .upload(&key, file.bytes.clone(), &file.content_type)
        .await
        .map_err(ApiError::Upload)
}

/// Upload the replacement first, then best-effort delete the object the old
/// URL pointed at. A failed delete only leaves an orphan behind.
async fn replace_media(
    state: &AppState,
    prefix: &str,
    file: &FilePart,
    old_url: Option<&str>,
) -> Result<String, ApiError> {
    let url = upload_media(state, prefix, file).await?;
    if let Some(key) = old_url.and_then(|u| state.storage.key_for(u)) {
        if let Err(e) = state.storage.delete(key).await {
            warn!(error = %e, key, "failed to delete replaced media object");
        }
    }
    Ok(url)
}

fn issue_pair(keys: &JwtKeys, user: &User) -> Result<TokenPair, ApiError> {
    Ok(TokenPair {
        access_token: keys.sign_access(user)?,
        refresh_token: keys.sign_refresh(user.id)?,
    })
}

pub async fn register(state: &AppState, form: RegisterForm) -> Result<PublicUser, ApiError> {
    let full_name = form.full_name.trim().to_string();
    let username = form.username.trim().to_lowercase();
    let email = form.email.trim().to_lowercase();

    if full_name.is_empty() || username.is_empty() || email.is_empty() || form.password.is_empty() {
        return Err(ApiError::Validation("all fields are required".into()));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("invalid email".into()));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation("password too short".into()));
    }

    if User::find_by_username_or_email(&state.db, Some(&username), Some(&email))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("user already exists".into()));
    }

    // Media uploads happen before the row exists; a failed avatar upload
    // aborts registration.
    let avatar_url = upload_media(state, "avatars", &form.avatar).await?;
    let cover_image_url = match &form.cover_image {
        Some(file) => Some(upload_media(state, "covers", file).await?),
        None => None,
    };

    let password_hash = hash_password(&form.password)?;
    let user = User::create(
        &state.db,
        &username,
        &email,
        &full_name,
        &password_hash,
        &avatar_url,
        cover_image_url.as_deref(),
    )
    .await
    .map_err(|e| conflict_on_unique(e, "user already exists"))?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user.into())
}

pub async fn login(state: &AppState, payload: LoginRequest) -> Result<AuthResponse, ApiError> {
    let username = payload
        .username
        .as_deref()
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    if username.is_none() && email.is_none() {
        return Err(ApiError::Validation("username or email is required".into()));
    }

    let user = User::find_by_username_or_email(&state.db, username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }

    let keys = JwtKeys::from_ref(state);
    let pair = issue_pair(&keys, &user)?;

    // Overwrites whatever token was stored before; any session still holding
    // the old one loses its refresh capability here.
    User::store_refresh_token(&state.db, user.id, &pair.refresh_token).await?;

    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user: user.into(),
    })
}

pub async fn refresh_session(state: &AppState, presented: &str) -> Result<TokenPair, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_refresh(presented)?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    let pair = issue_pair(&keys, &user)?;

    // The swap only succeeds if the stored token still equals the presented
    // one; a rotated-away or replayed token loses here.
    let rotated =
        User::rotate_refresh_token(&state.db, user.id, presented, &pair.refresh_token).await?;
    if !rotated {
        warn!(user_id = %user.id, "stale refresh token presented");
        return Err(ApiError::TokenReused);
    }

    info!(user_id = %user.id, "session refreshed");
    Ok(pair)
}

pub async fn logout(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    User::clear_refresh_token(&state.db, user_id).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

pub async fn change_password(
    state: &AppState,
    user_id: Uuid,
    payload: ChangePasswordRequest,
) -> Result<(), ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    if !verify_password(&payload.old_password, &user.password_hash)? {
        return Err(ApiError::Validation("old password is incorrect".into()));
    }
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation("password too short".into()));
    }

    let password_hash = hash_password(&payload.new_password)?;
    User::update_password_hash(&state.db, user_id, &password_hash).await?;
    info!(%user_id, "password changed");
    Ok(())
}

pub async fn update_profile(
    state: &AppState,
    user_id: Uuid,
    payload: UpdateProfileRequest,
) -> Result<PublicUser, ApiError> {
    let full_name = payload.full_name.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    if full_name.is_empty() || email.is_empty() {
        return Err(ApiError::Validation("full_name and email are required".into()));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("invalid email".into()));
    }

    let user = User::update_profile(&state.db, user_id, &full_name, &email)
        .await
        .map_err(|e| conflict_on_unique(e, "email already in use"))?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(user.into())
}

pub async fn update_avatar(
    state: &AppState,
    user_id: Uuid,
    file: FilePart,
) -> Result<PublicUser, ApiError> {
    let current = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    let url = replace_media(state, "avatars", &file, Some(&current.avatar_url)).await?;
    let user = User::set_avatar_url(&state.db, user_id, &url)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(user.into())
}

pub async fn update_cover_image(
    state: &AppState,
    user_id: Uuid,
    file: FilePart,
) -> Result<PublicUser, ApiError> {
    let current = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    let url = replace_media(state, "covers", &file, current.cover_image_url.as_deref()).await?;
    let user = User::set_cover_image_url(&state.db, user_id, &url)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(user.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn media_keys_are_namespaced_and_unique() {
        let a = media_key("avatars", "image/png");
        let b = media_key("avatars", "image/png");
        assert!(a.starts_with("avatars/"));
        assert!(a.ends_with(".png"));
        assert_ne!(a, b);
        assert!(media_key("covers", "video/mp4").ends_with(".bin"));
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@example.com"));
    }

    #[tokio::test]
    async fn login_requires_an_identifier() {
        let state = AppState::fake();
        let err = login(
            &state,
            LoginRequest {
                username: None,
                email: None,
                password: "whatever-pw".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn login_treats_blank_identifiers_as_missing() {
        let state = AppState::fake();
        let err = login(
            &state,
            LoginRequest {
                username: Some("   ".into()),
                email: Some("".into()),
                password: "whatever-pw".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_token() {
        let state = AppState::fake();
        let err = refresh_session(&state, "not-a-jwt").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            password_hash: String::new(),
            avatar_url: String::new(),
            cover_image_url: None,
            refresh_token: None,
            created_at: time::OffsetDateTime::now_utc(),
        };
        let access = keys.sign_access(&user).unwrap();
        let err = refresh_session(&state, &access).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
    }

    #[tokio::test]
    async fn register_rejects_blank_fields() {
        let state = AppState::fake();
        let form = RegisterForm {
            full_name: "  ".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: "long-enough-pw".into(),
            avatar: FilePart {
                bytes: Bytes::from_static(b"png-bytes"),
                content_type: "image/png".into(),
            },
            cover_image: None,
        };
        let err = register(&state, form).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn register_rejects_invalid_email_and_short_password() {
        let state = AppState::fake();
        let avatar = || FilePart {
            bytes: Bytes::from_static(b"png-bytes"),
            content_type: "image/png".into(),
        };

        let err = register(
            &state,
            RegisterForm {
                full_name: "Alice".into(),
                username: "alice".into(),
                email: "not-an-email".into(),
                password: "long-enough-pw".into(),
                avatar: avatar(),
                cover_image: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = register(
            &state,
            RegisterForm {
                full_name: "Alice".into(),
                username: "alice".into(),
                email: "alice@example.com".into(),
                password: "short".into(),
                avatar: avatar(),
                cover_image: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn update_profile_rejects_blank_and_invalid_input() {
        let state = AppState::fake();
        let user_id = Uuid::new_v4();

        let err = update_profile(
            &state,
            user_id,
            UpdateProfileRequest {
                full_name: "".into(),
                email: "alice@example.com".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = update_profile(
            &state,
            user_id,
            UpdateProfileRequest {
                full_name: "Alice".into(),
                email: "nope".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
