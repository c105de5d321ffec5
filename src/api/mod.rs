//! REST surface: router assembly, shared state, and the auth middleware.

mod connections;
mod device_models;
mod device_types;
mod devices;
mod error;
mod session;
mod users;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Request, State},
    http::header,
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::auth::{RevokedTokens, SessionManager};
use crate::engine::Engine;
use crate::observability;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<SessionManager>,
    pub revoked: Arc<RevokedTokens>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Path/body ids arrive as strings and are parsed here so malformed ids
/// get the same 400 envelope as any other bad input.
pub(crate) fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::bad_request("invalid id"))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("invalid date, expected YYYY-MM-DD"))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Bearer-token gate for everything behind the API: 401 when no token is
/// presented, 403 when it is invalid, expired, or revoked.
async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Err(ApiError::unauthorized("token missing"));
    };
    if state.revoked.is_revoked(token) {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Err(ApiError::forbidden("token revoked"));
    }
    let claims = state.sessions.verify_token(token).inspect_err(|_| {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let method = req.method().as_str().to_owned();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());

    let start = Instant::now();
    let response = next.run(req).await;

    metrics::histogram!(
        observability::REQUEST_DURATION_SECONDS,
        "method" => method.clone(),
        "route" => route.clone(),
    )
    .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "method" => method,
        "route" => route,
        "status" => response.status().as_u16().to_string(),
    )
    .increment(1);

    response
}

/// Create the axum router with all routes.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/device-types",
            get(device_types::list).post(device_types::create),
        )
        .route(
            "/device-types/:id",
            get(device_types::get_by_id)
                .put(device_types::update)
                .delete(device_types::remove),
        )
        .route(
            "/device-models",
            get(device_models::list).post(device_models::create),
        )
        .route(
            "/device-models/:id",
            get(device_models::get_by_id)
                .put(device_models::update)
                .delete(device_models::remove),
        )
        .route("/devices", get(devices::list).post(devices::create))
        .route(
            "/devices/:id",
            get(devices::get_by_id)
                .put(devices::update)
                .delete(devices::remove),
        )
        .route(
            "/connections",
            get(connections::list).post(connections::create),
        )
        .route(
            "/connections/:id",
            get(connections::get_by_id)
                .put(connections::update)
                .delete(connections::remove),
        )
        .route("/users", get(users::list).post(users::create))
        .route(
            "/users/:id",
            get(users::get_by_id)
                .put(users::update)
                .delete(users::remove),
        )
        .route("/revoke-token", post(session::revoke))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/signup", post(session::signup))
        .route("/login", post(session::login))
        .merge(protected)
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}
