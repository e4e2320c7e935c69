use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;

use slink_db::{
    Batch, FieldUpdate, Filter, Kind, Model, Query, Store, StoreError, UserRecord, fields,
};
use slink_gateway::Gateway;
use slink_types::api::{Claims, LoginRequest, RegisterRequest, SessionResponse};
use slink_types::models::{User, WORLD_CHAT_ID};

use crate::error::ApiError;
use crate::jobs::{Job, JobQueue};

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;
const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn Store>,
    pub jwt_secret: String,
    pub gateway: Gateway,
    pub jobs: Arc<dyn JobQueue>,
    /// Messages returned by the history endpoint.
    pub history_limit: u32,
}

impl AppStateInner {
    /// Hands a job to the queue. Failures are logged, never surfaced.
    pub async fn enqueue(&self, job: Job) {
        if let Err(e) = self.jobs.enqueue(job.clone()).await {
            warn!(?job, "Failed to enqueue job: {e:#}");
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let screenname = req.screenname.trim();
    let length = screenname.chars().count();
    if !(3..=32).contains(&length) {
        return Err(ApiError::BadRequest(
            "screenname must be between 3 and 32 characters".into(),
        ));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    if find_by_screenname(&state, screenname).await?.is_some() {
        return Err(ApiError::Conflict("screenname is taken".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_digest = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
        .to_string();

    let now = Utc::now();
    let record = UserRecord {
        id: Uuid::new_v4(),
        screenname: screenname.to_string(),
        password_digest,
        created_at: now,
        updated_at: now,
    };

    // Every new user lands in the public channel.
    let batch = Batch::new().create(record.clone().into_document()).update(
        Kind::Channel,
        WORLD_CHAT_ID,
        vec![FieldUpdate::array_union(
            fields::USER_IDS,
            record.id.to_string(),
        )],
    );
    state.store.commit(batch).await.map_err(|e| match e {
        // Lost a race with another registration for the same name.
        StoreError::AlreadyExists {
            kind: Kind::User, ..
        } => ApiError::Conflict("screenname is taken".into()),
        e => e.into(),
    })?;

    info!(user_id = %record.id, "Registered {}", record.screenname);
    state.enqueue(Job::IndexUser { user_id: record.id }).await;

    let user = User::from(&record);
    let token = create_token(&state.jwt_secret, &user)?;
    Ok((StatusCode::CREATED, Json(SessionResponse { user, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = find_by_screenname(&state, req.screenname.trim())
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&record.password_digest)
        .map_err(|e| anyhow::anyhow!("stored password digest is invalid: {e}"))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user = User::from(&record);
    let token = create_token(&state.jwt_secret, &user)?;
    Ok(Json(SessionResponse { user, token }))
}

async fn find_by_screenname(
    state: &AppStateInner,
    screenname: &str,
) -> Result<Option<UserRecord>, ApiError> {
    let query = Query::new(Kind::User).filter(Filter::eq(fields::SCREENNAME, screenname));
    Ok(state.store.first::<UserRecord>(query).await?)
}

pub fn create_token(secret: &str, user: &User) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        screenname: user.screenname.clone(),
        exp: (Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
