use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use tracing::instrument;

use crate::{auth::jwt::AuthUser, error::ApiError, response::ApiResponse, state::AppState};

use super::dto::ChannelProfile;
use super::repo;

pub fn routes() -> Router<AppState> {
    Router::new().route("/channels/:username", get(get_channel_profile))
}

/// Authentication is optional here: anonymous viewers get the aggregates
/// with `is_subscribed` fixed to false.
#[instrument(skip(state, viewer))]
pub async fn get_channel_profile(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Path(username): Path<String>,
) -> Result<ApiResponse<ChannelProfile>, ApiError> {
    let username = username.trim().to_lowercase();
    if username.is_empty() {
        return Err(ApiError::Validation("username is required".into()));
    }

    let row = repo::channel_profile(&state.db, &username, viewer.map(|AuthUser(id)| id))
        .await?
        .ok_or_else(|| ApiError::NotFound("channel not found".into()))?;

    Ok(ApiResponse::send(row.into()))
}
