//! `/api/trigger`: overlay triggers and firing them at connected clients.

use crate::error::{ApiError, ApiResult};
use crate::events::TRIGGER_EVENT;
use crate::handlers::AppState;
use crate::media::uploadable_type;
use crate::metrics;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_store::{query_triggers, RecordStore, Trigger, TriggerQuery};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Routes mounted under `/api/trigger`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/data", get(list_all))
        .route("/data/:type", get(list_by_type))
        .route("/create", post(create))
        .route("/query", get(query))
        .route("/:id", get(fetch).put(update).delete(remove))
        .route("/:id/emit", post(emit))
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e.body_text())))
}

fn parse_trigger(value: Value) -> ApiResult<Trigger> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::bad_request(format!("Invalid trigger: {e}")))
}

async fn list_all(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.triggers.get_all().await?))
}

async fn list_by_type(
    State(state): State<Arc<AppState>>,
    Path(raw_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let media_type = uploadable_type(&raw_type)?;
    let triggers: Vec<Trigger> = state
        .triggers
        .get_all()
        .await?
        .into_values()
        .filter(|trigger| trigger.item.media_type == media_type)
        .collect();
    Ok(Json(triggers))
}

async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let mut value = json_body(body)?;
    if value.get("item").map_or(true, Value::is_null) {
        return Err(ApiError::bad_request("Item is required"));
    }

    let mut trigger = parse_trigger(value.take())?;
    if trigger.id.is_empty() {
        trigger.id = Uuid::new_v4().to_string();
    }

    state.triggers.save(&trigger.id, trigger.clone()).await?;
    info!(id = %trigger.id, name = %trigger.name, "Trigger created");
    Ok((StatusCode::CREATED, Json(trigger)))
}

async fn query(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TriggerQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(query_triggers(state.triggers.as_ref(), &query).await?))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .triggers
        .load(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Trigger not found"))
}

async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let trigger = parse_trigger(json_body(body)?)?;
    if trigger.id != id {
        return Err(ApiError::bad_request("ID in path and body do not match"));
    }
    if state.triggers.load(&id).await?.is_none() {
        return Err(ApiError::not_found("Trigger not found"));
    }

    state.triggers.save(&id, trigger.clone()).await?;
    info!(id = %id, "Trigger updated");
    Ok(Json(trigger))
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.triggers.delete(&id).await? {
        return Err(ApiError::not_found("Trigger not found"));
    }
    info!(id = %id, "Trigger deleted");
    Ok(Json(json!({ "message": "Trigger deleted" })))
}

async fn emit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.triggers.load(&id).await?.is_none() {
        return Err(ApiError::not_found("Trigger not found"));
    }

    let delivered = state.hub.emit(TRIGGER_EVENT, &id);
    metrics::record_broadcast(delivered);
    info!(id = %id, delivered, "Trigger fired");
    Ok(Json(json!({ "id": id, "delivered": delivered })))
}
