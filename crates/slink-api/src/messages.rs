use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use slink_db::{Filter, Kind, Order, Query, fields};
use slink_types::api::{CreateMessageRequest, MessageResponse, MessagesResponse};
use slink_types::models::{Message, Principal};

use crate::auth::AppState;
use crate::error::ApiError;

/// The most recent window of a channel's history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .gateway
        .coordinator()
        .guard()
        .authorize(&principal, channel_id)
        .await?;

    let query = Query::new(Kind::Message)
        .filter(Filter::eq(fields::CHANNEL_ID, channel_id.to_string()))
        .order(Order::NewestFirst)
        .limit(state.history_limit);
    let mut messages = state.store.query_as::<Message>(query).await?;
    messages.reverse();

    Ok(Json(MessagesResponse { messages }))
}

/// Same write path as the live session: validated, authorized, moderated and
/// committed together with the channel's activity timestamps.
pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .gateway
        .coordinator()
        .create_message(&principal, channel_id, &req.body)
        .await?;

    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}
