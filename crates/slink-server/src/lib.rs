pub mod config;
pub mod socket;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use slink_api::{AppState, AppStateInner, JobQueue, auth, channels, messages, users};
use slink_db::Store;
use slink_gateway::{Gateway, MembershipGuard, SessionConfig, WordListCensor, WriteCoordinator};

use crate::config::Config;

/// Wires the write path, live-session gateway and REST state together.
pub fn build_state(
    config: &Config,
    store: Arc<dyn Store>,
    jobs: Arc<dyn JobQueue>,
) -> anyhow::Result<AppState> {
    let mut coordinator = WriteCoordinator::new(store.clone(), MembershipGuard::new(store.clone()))
        .with_max_body_chars(config.max_body_chars);
    let censor = WordListCensor::from_csv(&config.censor_words)?;
    if !censor.is_empty() {
        coordinator = coordinator.with_censor(Arc::new(censor));
    }

    let gateway = Gateway::new(
        store.clone(),
        coordinator,
        SessionConfig {
            outbound_queue: config.outbound_queue,
            ..SessionConfig::default()
        },
    );

    Ok(Arc::new(AppStateInner {
        store,
        jwt_secret: config.jwt_secret.clone(),
        gateway,
        jobs,
        history_limit: config.history_limit,
    }))
}

pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/users", post(auth::register))
        .route("/session", post(auth::login));

    let protected_routes = Router::new()
        .route("/user", get(users::current_user))
        .route("/users/{user_id}", get(users::show_user))
        .route(
            "/channels",
            get(channels::index_channels).post(channels::create_channel),
        )
        .route("/channels/chats", post(channels::upsert_chat))
        .route("/channels/chats/subscribe", get(socket::subscribe_chats))
        .route("/channels/{channel_id}", get(channels::show_channel))
        .route("/channels/{channel_id}/join", post(channels::join_channel))
        .route("/channels/{channel_id}/leave", delete(channels::leave_channel))
        .route("/channels/{channel_id}/users", get(channels::index_channel_users))
        .route(
            "/channels/{channel_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/channels/{channel_id}/messages/subscribe",
            get(socket::subscribe),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            slink_api::middleware::require_auth,
        ));

    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
