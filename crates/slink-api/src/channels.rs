use std::collections::BTreeSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use slink_db::{FieldUpdate, Filter, Kind, Query, UserRecord, fields};
use slink_types::api::{
    ChannelResponse, ChannelsResponse, CreateChannelRequest, MembershipResponse,
    UpsertChatRequest, UsersResponse,
};
use slink_types::models::{Channel, Principal, User};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::jobs::Job;

/// Channels the caller is a member of.
pub async fn index_channels(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ChannelsResponse>, ApiError> {
    let query = Query::new(Kind::Channel).filter(Filter::contains(
        fields::USER_IDS,
        principal.user_id.to_string(),
    ));
    let channels = state.store.query_as::<Channel>(query).await?;
    Ok(Json(ChannelsResponse { channels }))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }

    let now = Utc::now();
    let channel = Channel {
        id: Uuid::new_v4(),
        name: name.to_string(),
        user_id: principal.user_id,
        user_ids: BTreeSet::from([principal.user_id]),
        private: req.private,
        last_message_sent_at: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create(channel.clone()).await?;

    info!(channel_id = %channel.id, owner = %principal.user_id, "Created channel {}", channel.name);
    // Private chats are never indexed.
    if !channel.private {
        state.enqueue(Job::IndexChannel { channel_id: channel.id }).await;
    }

    Ok((StatusCode::CREATED, Json(ChannelResponse { channel })))
}

/// Returns the private chat whose members are exactly the requested users
/// plus the caller, creating it if none exists.
pub async fn upsert_chat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<UpsertChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut members: BTreeSet<Uuid> = req.user_ids.into_iter().collect();
    members.insert(principal.user_id);

    let query = Query::new(Kind::Channel)
        .filter(Filter::eq(fields::PRIVATE, true))
        .filter(Filter::contains(
            fields::USER_IDS,
            principal.user_id.to_string(),
        ));
    let existing = state
        .store
        .query_as::<Channel>(query)
        .await?
        .into_iter()
        .find(|c| c.user_ids == members);
    if let Some(channel) = existing {
        return Ok((StatusCode::OK, Json(ChannelResponse { channel })));
    }

    let ids: Vec<Uuid> = members.iter().copied().collect();
    let users = state.store.fetch_many::<UserRecord>(&ids).await?;
    if users.len() != ids.len() {
        return Err(ApiError::NotFound("user"));
    }
    let name = users
        .iter()
        .map(|u| u.screenname.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let now = Utc::now();
    let channel = Channel {
        id: Uuid::new_v4(),
        name,
        user_id: principal.user_id,
        user_ids: members,
        private: true,
        last_message_sent_at: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create(channel.clone()).await?;

    Ok((StatusCode::CREATED, Json(ChannelResponse { channel })))
}

pub async fn show_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let channel = visible_channel(&state, &principal, channel_id).await?;
    Ok(Json(ChannelResponse { channel }))
}

pub async fn join_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ApiError> {
    visible_channel(&state, &principal, channel_id).await?;

    state
        .store
        .update(
            Kind::Channel,
            channel_id,
            vec![FieldUpdate::array_union(
                fields::USER_IDS,
                principal.user_id.to_string(),
            )],
        )
        .await?;

    info!(%channel_id, user_id = %principal.user_id, "Joined channel");
    Ok((StatusCode::CREATED, Json(MembershipResponse { channel_id })))
}

pub async fn leave_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<MembershipResponse>, ApiError> {
    state
        .store
        .update(
            Kind::Channel,
            channel_id,
            vec![FieldUpdate::array_remove(
                fields::USER_IDS,
                principal.user_id.to_string(),
            )],
        )
        .await?;

    info!(%channel_id, user_id = %principal.user_id, "Left channel");
    Ok(Json(MembershipResponse { channel_id }))
}

pub async fn index_channel_users(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UsersResponse>, ApiError> {
    let channel = visible_channel(&state, &principal, channel_id).await?;

    let ids: Vec<Uuid> = channel.user_ids.into_iter().collect();
    let users = state
        .store
        .fetch_many::<UserRecord>(&ids)
        .await?
        .iter()
        .map(User::from)
        .collect();
    Ok(Json(UsersResponse { users }))
}

/// Public channels are visible to everyone; private ones only to members.
async fn visible_channel(
    state: &AppState,
    principal: &Principal,
    channel_id: Uuid,
) -> Result<Channel, ApiError> {
    match state.store.fetch::<Channel>(channel_id).await? {
        Some(channel) if !channel.private || channel.is_member(principal.user_id) => Ok(channel),
        _ => Err(ApiError::NotFound("channel")),
    }
}
