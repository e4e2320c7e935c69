use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use slink_db::UserRecord;
use slink_types::api::UserResponse;
use slink_types::models::{Principal, User};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn current_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserResponse>, ApiError> {
    show(&state, principal.user_id).await
}

pub async fn show_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_principal): Extension<Principal>,
) -> Result<Json<UserResponse>, ApiError> {
    show(&state, user_id).await
}

async fn show(state: &AppState, user_id: Uuid) -> Result<Json<UserResponse>, ApiError> {
    let record = state
        .store
        .fetch::<UserRecord>(user_id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(UserResponse {
        user: User::from(&record),
    }))
}
