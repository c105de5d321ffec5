use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::auth::AuthError;
use crate::engine::EngineError;
use crate::observability;

/// Uniform error envelope: a human-readable message plus a stable
/// machine-checkable kind, so clients can tell "fix your input" from
/// "missing entity" from "wrong state" from "scheduling conflict".
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "auth",
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            kind: "auth",
            message: message.into(),
        }
    }

    /// Infrastructure failure: logged in full, reported generically, and
    /// never with a 400-class status.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("internal error: {err}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: "internal server error".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            kind: self.kind,
        });
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        metrics::counter!(observability::REJECTIONS_TOTAL, "kind" => e.kind()).increment(1);
        let status = match &e {
            EngineError::Validation(_)
            | EngineError::Precondition(..)
            | EngineError::Conflict(_)
            | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(..) => StatusCode::NOT_FOUND,
            EngineError::AlreadyExists(_) | EngineError::InUse(..) => StatusCode::CONFLICT,
            EngineError::Wal(_) => return Self::internal(e),
        };
        Self {
            status,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::TokenExpired | AuthError::InvalidToken => Self::forbidden(e.to_string()),
            AuthError::JwtEncode(_) | AuthError::Hashing => Self::internal(e),
        }
    }
}
