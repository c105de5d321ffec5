use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use crate::engine::TypeFilter;
use crate::model::DeviceType;

use super::{ApiError, AppState, MessageResponse, parse_id};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    name: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Json<Vec<DeviceType>> {
    Json(state.engine.list_types(&TypeFilter { name: q.name }))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceType>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_type(id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    name: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<DeviceType>), ApiError> {
    let created = state.engine.create_type(&req.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    name: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<DeviceType>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.update_type(id, req.name).await?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.engine.delete_type(id).await?;
    Ok(Json(MessageResponse {
        message: "device type deleted".into(),
    }))
}
