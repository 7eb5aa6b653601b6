use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::logic::context::RequestContext;
use crate::logic::query_params::QueryParams;
use crate::logic::use_case::{UseCase, WriteMode};
use crate::model::{Entity, ListModel};

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// Decode a JSON body; an empty body reads as `null`.
fn parse_body(body: &Bytes) -> AppResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))
}

pub async fn list<E: Entity>(
    Extension(ctx): Extension<Arc<RequestContext>>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<ListModel>> {
    let params = QueryParams::from(params);
    let list = UseCase::<E>::new(&ctx).get(&params).await?;
    Ok(Json(list))
}

pub async fn get_by_id<E: Entity>(
    Extension(ctx): Extension<Arc<RequestContext>>,
    Path(id): Path<String>,
) -> AppResult<Json<E>> {
    let entity = UseCase::<E>::new(&ctx).get_by_id(&id).await?;
    Ok(Json(entity))
}

pub async fn create<E: Entity>(
    Extension(ctx): Extension<Arc<RequestContext>>,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> AppResult<Response> {
    let payload = parse_body(&body)?;
    let entity = UseCase::<E>::new(&ctx).create(&payload).await?;

    if QueryParams::from(params).is_skip_return() {
        return Ok((StatusCode::CREATED, Json(json!({ "message": "Success" }))).into_response());
    }
    Ok((StatusCode::CREATED, Json(entity)).into_response())
}

async fn update<E: Entity>(
    ctx: &RequestContext,
    id: &str,
    body: &Bytes,
    mode: WriteMode,
) -> AppResult<Json<E>> {
    let payload = parse_body(body)?;
    let entity = UseCase::<E>::new(ctx).update_by_id(id, &payload, mode).await?;
    Ok(Json(entity))
}

pub async fn update_by_id<E: Entity>(
    Extension(ctx): Extension<Arc<RequestContext>>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<E>> {
    update(&ctx, &id, &body, WriteMode::Full).await
}

pub async fn partially_update_by_id<E: Entity>(
    Extension(ctx): Extension<Arc<RequestContext>>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<E>> {
    update(&ctx, &id, &body, WriteMode::Partial).await
}

pub async fn delete_by_id<E: Entity>(
    Extension(ctx): Extension<Arc<RequestContext>>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let payload = parse_body(&body)?;
    UseCase::<E>::new(&ctx).delete_by_id(&id, &payload).await?;
    Ok(Json(json!({ "code": 200, "message": "Data has been deleted." })))
}
