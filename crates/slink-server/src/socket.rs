use axum::{
    Extension,
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use futures_util::StreamExt;
use uuid::Uuid;

use slink_api::{ApiError, AppState};
use slink_types::models::Principal;

/// Opens a live session on a channel.
///
/// Membership is checked before the upgrade, so a rejected caller gets a
/// plain HTTP error and never a socket.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = state
        .gateway
        .open_session(principal, channel_id)
        .authorize()
        .await?;

    Ok(ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        session.run(sender, receiver).await;
    }))
}

/// Opens a feed of the caller's private chats: the current ones first, then
/// each chat as it is created or changes.
pub async fn subscribe_chats(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> Response {
    let feed = state.gateway.open_chat_feed(principal);

    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        feed.run(sender, receiver).await;
    })
}
