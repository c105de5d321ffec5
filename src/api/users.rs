use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use crate::auth;
use crate::model::UserInfo;

use super::session::check_password;
use super::{ApiError, AppState, MessageResponse, parse_id};

pub async fn list(State(state): State<AppState>) -> Json<Vec<UserInfo>> {
    Json(state.engine.list_users())
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserInfo>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_user(id)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    username: String,
    password: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<UserInfo>), ApiError> {
    check_password(&req.password)?;
    let hash = auth::hash_password(&req.password)?;
    let user = state.engine.create_user(&req.username, hash).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserInfo {
            id: user.id,
            username: user.username,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    username: Option<String>,
    password: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<UserInfo>, ApiError> {
    let id = parse_id(&id)?;
    let hash = match req.password.as_deref() {
        Some(password) => {
            check_password(password)?;
            Some(auth::hash_password(password)?)
        }
        None => None,
    };
    let user = state.engine.update_user(id, req.username, hash).await?;
    Ok(Json(UserInfo {
        id: user.id,
        username: user.username,
    }))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.engine.delete_user(id).await?;
    Ok(Json(MessageResponse {
        message: "user deleted".into(),
    }))
}
