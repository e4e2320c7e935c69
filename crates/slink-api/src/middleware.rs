use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::debug;

use slink_db::UserRecord;
use slink_types::api::Claims;
use slink_types::models::Principal;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    /// Browsers cannot set headers on WebSocket upgrades, so the live
    /// endpoint also accepts the token here.
    pub token: Option<String>,
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected token: {e}");
        ApiError::Unauthorized
    })
}

/// Resolves the caller to a [`Principal`] and attaches it to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<TokenQuery>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match (&bearer, &query.token) {
        (Some(TypedHeader(Authorization(bearer))), _) => bearer.token(),
        (None, Some(token)) => token.as_str(),
        (None, None) => return Err(ApiError::Unauthorized),
    };

    let claims = decode_token(&state.jwt_secret, token)?;

    // Tokens outlive deleted accounts.
    let user = state
        .store
        .fetch::<UserRecord>(claims.sub)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(Principal {
        user_id: user.id,
        screenname: user.screenname,
    });
    Ok(next.run(req).await)
}
