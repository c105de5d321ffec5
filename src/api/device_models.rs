use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::ModelFilter;
use crate::model::DeviceModelInfo;

use super::{ApiError, AppState, MessageResponse, parse_id};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    name: Option<String>,
    type_id: Option<Ulid>,
    type_name: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Json<Vec<DeviceModelInfo>> {
    Json(state.engine.list_models(&ModelFilter {
        name: q.name,
        type_id: q.type_id,
        type_name: q.type_name,
    }))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceModelInfo>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_model(id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    name: String,
    type_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<DeviceModelInfo>), ApiError> {
    let type_id = parse_id(&req.type_id)?;
    let created = state.engine.create_model(&req.name, type_id).await?;
    Ok((StatusCode::CREATED, Json(state.engine.get_model(created.id)?)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    name: Option<String>,
    type_id: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<DeviceModelInfo>, ApiError> {
    let id = parse_id(&id)?;
    let type_id = req.type_id.as_deref().map(parse_id).transpose()?;
    let updated = state.engine.update_model(id, req.name, type_id).await?;
    Ok(Json(state.engine.get_model(updated.id)?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.engine.delete_model(id).await?;
    Ok(Json(MessageResponse {
        message: "device model deleted".into(),
    }))
}
