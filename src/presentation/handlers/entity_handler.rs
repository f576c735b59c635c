// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::domain::models::entity::{Contact, EntityStatus};
use crate::domain::services::entity_service::EntityService;
use crate::presentation::errors::AppError;
use crate::presentation::extractors::request_context::ClientContext;

/// 创建实体请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEntityRequest {
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: EntityStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindEntitiesQuery {
    pub phone_number: String,
}

pub async fn create_entity(
    Extension(service): Extension<Arc<EntityService>>,
    ClientContext(ctx): ClientContext,
    Json(payload): Json<CreateEntityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let contact = Contact {
        phone_number: payload.phone_number,
        email: payload.email,
    };
    let entity = service.create(&ctx, contact).await?;
    info!(request_id = ctx.trace_label(), "Entity {:?} created", entity.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": entity })),
    ))
}

/// 读取实体，经过读穿缓存
pub async fn get_entity(
    Extension(service): Extension<Arc<EntityService>>,
    ClientContext(ctx): ClientContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entity = service.get(&ctx, &id).await?;
    Ok(Json(json!({ "success": true, "data": entity })))
}

pub async fn update_entity_status(
    Extension(service): Extension<Arc<EntityService>>,
    ClientContext(ctx): ClientContext,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let entity = service.update_status(&ctx, &id, payload.status).await?;
    Ok(Json(json!({ "success": true, "data": entity })))
}

pub async fn find_entities(
    Extension(service): Extension<Arc<EntityService>>,
    ClientContext(ctx): ClientContext,
    Query(query): Query<FindEntitiesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let entities = service.find_by_phone(&ctx, &query.phone_number).await?;
    Ok(Json(json!({ "success": true, "data": entities })))
}
