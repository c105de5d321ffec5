use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::limits::MAX_PASSWORD_LEN;
use crate::model::UserInfo;
use crate::observability;

use super::{ApiError, AppState, MessageResponse};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

pub(super) fn check_password(password: &str) -> Result<(), ApiError> {
    if password.trim().is_empty() {
        return Err(ApiError::bad_request("empty password"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::bad_request("password too long"));
    }
    Ok(())
}

/// POST /signup — self-service account creation, open like /login.
pub async fn signup(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<(StatusCode, Json<UserInfo>), ApiError> {
    check_password(&creds.password)?;
    let hash = auth::hash_password(&creds.password)?;
    let user = state.engine.create_user(&creds.username, hash).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserInfo {
            id: user.id,
            username: user.username,
        }),
    ))
}

/// POST /login — verify credentials, issue a session token. The error is
/// the same whether the username or the password was wrong.
pub async fn login(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .engine
        .find_user_by_username(&creds.username)
        .ok_or_else(|| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            ApiError::unauthorized("unknown username or password")
        })?;
    if !auth::verify_password(&creds.password, &user.password_hash) {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Err(ApiError::unauthorized("unknown username or password"));
    }
    let token = state.sessions.issue_token(user.id)?;
    Ok(Json(TokenResponse { token }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

/// POST /revoke-token — blocks the presented token for the rest of its
/// lifetime. An unparseable token is retained for one full TTL.
pub async fn revoke(
    State(state): State<AppState>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if req.token.trim().is_empty() {
        return Err(ApiError::bad_request("token missing"));
    }
    let exp = state
        .sessions
        .verify_token(&req.token)
        .map(|c| c.exp)
        .unwrap_or_else(|_| auth::now_secs() + state.sessions.token_ttl_secs());
    state.revoked.revoke(req.token, exp);
    metrics::counter!(observability::TOKENS_REVOKED_TOTAL).increment(1);
    Ok(Json(MessageResponse {
        message: "token revoked".into(),
    }))
}
