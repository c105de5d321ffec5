use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{ConnectionFilter, ConnectionPatch};
use crate::model::ConnectionInfo;

use super::{ApiError, AppState, MessageResponse, parse_date, parse_id};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    parent_device_id: Option<Ulid>,
    child_device_id: Option<Ulid>,
    /// Keep connections starting on or after this day.
    start_date: Option<NaiveDate>,
    /// Keep connections ending on or before this day.
    end_date: Option<NaiveDate>,
    include_archived: Option<bool>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Json<Vec<ConnectionInfo>> {
    let connections = state
        .engine
        .list_connections(&ConnectionFilter {
            parent_device_id: q.parent_device_id,
            child_device_id: q.child_device_id,
            start_from: q.start_date,
            end_until: q.end_date,
            include_archived: q.include_archived.unwrap_or(false),
        })
        .await;
    Json(connections)
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_connection(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    parent_device_id: String,
    child_device_id: String,
    start_date: String,
    end_date: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<ConnectionInfo>), ApiError> {
    let parent_device_id = parse_id(&req.parent_device_id)?;
    let child_device_id = parse_id(&req.child_device_id)?;
    let start_date = parse_date(&req.start_date)?;
    let end_date = req.end_date.as_deref().map(parse_date).transpose()?;

    let record = state
        .engine
        .create_connection(parent_device_id, child_device_id, start_date, end_date)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(state.engine.get_connection(record.id).await?),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    parent_device_id: Option<String>,
    child_device_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let id = parse_id(&id)?;
    let patch = ConnectionPatch {
        parent_device_id: req.parent_device_id.as_deref().map(parse_id).transpose()?,
        child_device_id: req.child_device_id.as_deref().map(parse_id).transpose()?,
        start_date: req.start_date.as_deref().map(parse_date).transpose()?,
        end_date: req.end_date.as_deref().map(parse_date).transpose()?,
    };
    let record = state.engine.update_connection(id, patch).await?;
    Ok(Json(state.engine.get_connection(record.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    hard: Option<bool>,
}

/// DELETE soft-deletes by default; `?hard=true` removes the record for good.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    let message = if q.hard.unwrap_or(false) {
        state.engine.delete_connection(id).await?;
        "connection deleted"
    } else {
        state.engine.archive_connection(id).await?;
        "connection archived"
    };
    Ok(Json(MessageResponse {
        message: message.into(),
    }))
}
