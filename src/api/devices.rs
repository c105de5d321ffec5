use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{DeviceFilter, DevicePatch};
use crate::model::{DeviceInfo, DeviceState};

use super::{ApiError, AppState, MessageResponse, parse_id};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    mac: Option<String>,
    state: Option<DeviceState>,
    model_id: Option<Ulid>,
    type_id: Option<Ulid>,
    model_name: Option<String>,
    type_name: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Json<Vec<DeviceInfo>> {
    Json(state.engine.list_devices(&DeviceFilter {
        mac: q.mac,
        state: q.state,
        model_id: q.model_id,
        type_id: q.type_id,
        model_name: q.model_name,
        type_name: q.type_name,
    }))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceInfo>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_device(id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    model_id: String,
    mac: String,
    state: Option<DeviceState>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<DeviceInfo>), ApiError> {
    let model_id = parse_id(&req.model_id)?;
    let created = state
        .engine
        .create_device(model_id, &req.mac, req.state)
        .await?;
    Ok((StatusCode::CREATED, Json(state.engine.get_device(created.id)?)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    model_id: Option<String>,
    mac: Option<String>,
    state: Option<DeviceState>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<DeviceInfo>, ApiError> {
    let id = parse_id(&id)?;
    let patch = DevicePatch {
        model_id: req.model_id.as_deref().map(parse_id).transpose()?,
        mac: req.mac,
        state: req.state,
    };
    let updated = state.engine.update_device(id, patch).await?;
    Ok(Json(state.engine.get_device(updated.id)?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.engine.delete_device(id).await?;
    Ok(Json(MessageResponse {
        message: "device deleted".into(),
    }))
}
