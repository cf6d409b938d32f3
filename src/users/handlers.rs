use axum::{
    extract::{multipart::Field, DefaultBodyLimit, FromRef, Multipart, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration as TimeDuration;
use tracing::instrument;

use crate::{
    auth::jwt::{AuthUser, JwtKeys},
    error::ApiError,
    response::ApiResponse,
    state::AppState,
};

use super::dto::{
    AuthResponse, ChangePasswordRequest, LoginRequest, PublicUser, RefreshRequest, TokenPair,
    UpdateProfileRequest,
};
use super::model::User;
use super::service::{self, FilePart, RegisterForm};

const UPLOAD_BODY_LIMIT: usize = 10 * 1024 * 1024; // 10MB

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/refresh-token", post(refresh))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/users/logout", post(logout))
        .route("/users/change-password", post(change_password))
        .route("/users/me", get(get_me).patch(update_profile))
        .route("/users/me/avatar", patch(update_avatar))
        .route("/users/me/cover-image", patch(update_cover_image))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

// --- cookie plumbing ---

fn secure_cookie(name: &'static str, value: String, max_age: TimeDuration) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

fn with_token_cookies(jar: CookieJar, keys: &JwtKeys, access: &str, refresh: &str) -> CookieJar {
    jar.add(secure_cookie(
        "access_token",
        access.to_string(),
        TimeDuration::seconds(keys.access_ttl.as_secs() as i64),
    ))
    .add(secure_cookie(
        "refresh_token",
        refresh.to_string(),
        TimeDuration::seconds(keys.refresh_ttl.as_secs() as i64),
    ))
}

fn without_token_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build("access_token").path("/").build())
        .remove(Cookie::build("refresh_token").path("/").build())
}

// --- multipart plumbing ---

fn malformed_multipart() -> ApiError {
    ApiError::Validation("malformed multipart body".into())
}

async fn text_field(field: Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(|_| malformed_multipart())
}

async fn file_field(field: Field<'_>) -> Result<FilePart, ApiError> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let bytes = field.bytes().await.map_err(|_| malformed_multipart())?;
    Ok(FilePart {
        bytes,
        content_type,
    })
}

/// Pull the single expected file out of a multipart body.
async fn single_file(mut multipart: Multipart, name: &str) -> Result<Option<FilePart>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|_| malformed_multipart())? {
        if field.name() == Some(name) {
            return Ok(Some(file_field(field).await?));
        }
    }
    Ok(None)
}

// --- handlers ---

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let mut full_name = None;
    let mut username = None;
    let mut email = None;
    let mut password = None;
    let mut avatar = None;
    let mut cover_image = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| malformed_multipart())? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("full_name") => full_name = Some(text_field(field).await?),
            Some("username") => username = Some(text_field(field).await?),
            Some("email") => email = Some(text_field(field).await?),
            Some("password") => password = Some(text_field(field).await?),
            Some("avatar") => avatar = Some(file_field(field).await?),
            Some("cover_image") => cover_image = Some(file_field(field).await?),
            _ => {}
        }
    }

    let (Some(full_name), Some(username), Some(email), Some(password)) =
        (full_name, username, email, password)
    else {
        return Err(ApiError::Validation("all fields are required".into()));
    };
    let Some(avatar) = avatar else {
        return Err(ApiError::Validation("avatar is required".into()));
    };

    let user = service::register(
        &state,
        RegisterForm {
            full_name,
            username,
            email,
            password,
            avatar,
            cover_image,
        },
    )
    .await?;

    Ok(ApiResponse::send(user)
        .with_message("user registered")
        .with_status(StatusCode::CREATED))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<AuthResponse>), ApiError> {
    let auth = service::login(&state, payload).await?;

    let keys = JwtKeys::from_ref(&state);
    let jar = with_token_cookies(jar, &keys, &auth.access_token, &auth.refresh_token);
    Ok((
        jar,
        ApiResponse::send(auth).with_message("logged in"),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<TokenPair>), ApiError> {
    let presented = payload
        .and_then(|Json(body)| body.refresh_token)
        .or_else(|| jar.get("refresh_token").map(|c| c.value().to_string()))
        .ok_or_else(|| ApiError::Unauthorized("refresh token is required".into()))?;

    let pair = service::refresh_session(&state, &presented).await?;

    let keys = JwtKeys::from_ref(&state);
    let jar = with_token_cookies(jar, &keys, &pair.access_token, &pair.refresh_token);
    Ok((
        jar,
        ApiResponse::send(pair).with_message("session refreshed"),
    ))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<()>), ApiError> {
    service::logout(&state, user_id).await?;
    Ok((
        without_token_cookies(jar),
        ApiResponse::send(()).with_message("logged out"),
    ))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    service::change_password(&state, user_id, payload).await?;
    Ok(ApiResponse::send(()).with_message("password changed"))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(ApiResponse::send(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let user = service::update_profile(&state, user_id, payload).await?;
    Ok(ApiResponse::send(user).with_message("profile updated"))
}

#[instrument(skip(state, multipart))]
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let file = single_file(multipart, "avatar")
        .await?
        .ok_or_else(|| ApiError::Validation("avatar file is required".into()))?;
    let user = service::update_avatar(&state, user_id, file).await?;
    Ok(ApiResponse::send(user).with_message("avatar updated"))
}

#[instrument(skip(state, multipart))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let file = single_file(multipart, "cover_image")
        .await?
        .ok_or_else(|| ApiError::Validation("cover image file is required".into()))?;
    let user = service::update_cover_image(&state, user_id, file).await?;
    Ok(ApiResponse::send(user).with_message("cover image updated"))
}
