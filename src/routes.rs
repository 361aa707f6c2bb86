//! RequestPipeline: HTTP routing, auth-gate → parse → core call → serialize.
//!
//! Grounded in `original_source/datanode/src/app/routes.py` for the endpoint
//! table, and in `examples/burakkonte-sinyalist/backend/src/main.rs` for the
//! axum wiring idiom (`AppState` + `ServiceBuilder` + `TraceLayer`).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::{self, SCOPE_CONSTRAINT_CONSUMPTION, SCOPE_STRATEGIC_COORDINATION};
use crate::config::Config;
use crate::error::DssError;
use crate::operations::{self, OperationPutRequest, OperationQueryRequest};
use crate::store::ReferenceStore;
use crate::subscriptions::{self, SubscriptionPutRequest, SubscriptionQueryRequest};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReferenceStore>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/dss/v1/status", get(status))
        .route(
            "/dss/v1/subscriptions/:id",
            get(get_subscription).put(put_subscription).delete(delete_subscription),
        )
        .route("/dss/v1/subscriptions/query", post(query_subscriptions))
        .route(
            "/dss/v1/operations/:id",
            get(get_operation).put(put_operation).delete(delete_operation),
        )
        .route("/dss/v1/operations/query", post(query_operations))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
    message: &'static str,
    version: &'static str,
}

async fn status() -> Json<StatusBody> {
    Json(StatusBody {
        status: "success",
        message: "OK",
        version: "SCD0.0.1",
    })
}

#[instrument(skip(state, headers))]
async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<subscriptions::SubscriptionResponse>, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_any_scope(&[SCOPE_STRATEGIC_COORDINATION, SCOPE_CONSTRAINT_CONSUMPTION])?;
    let resp = subscriptions::get(&state.store, id)?;
    Ok(Json(resp))
}

#[instrument(skip(state, headers, body))]
async fn query_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubscriptionQueryRequest>,
) -> Result<Json<subscriptions::SubscriptionQueryResponse>, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_any_scope(&[SCOPE_STRATEGIC_COORDINATION, SCOPE_CONSTRAINT_CONSUMPTION])?;
    let resp = subscriptions::query(&state.store, &state.config, &client, body)?;
    Ok(Json(resp))
}

#[instrument(skip(state, headers, body))]
async fn put_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<SubscriptionPutRequest>,
) -> Result<impl IntoResponse, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_any_scope(&[SCOPE_STRATEGIC_COORDINATION, SCOPE_CONSTRAINT_CONSUMPTION])?;
    let (resp, created) = subscriptions::put(&state.store, &state.config, &client, id, body)?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(resp)))
}

#[instrument(skip(state, headers))]
async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<subscriptions::DeletedSubscriptionResponse>, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_any_scope(&[SCOPE_STRATEGIC_COORDINATION, SCOPE_CONSTRAINT_CONSUMPTION])?;
    let resp = subscriptions::delete(&state.store, &client, id)?;
    Ok(Json(resp))
}

#[instrument(skip(state, headers))]
async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<crate::model::OperationJson>, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_scope(SCOPE_STRATEGIC_COORDINATION)?;
    let resp = operations::get(&state.store, &client, id)?;
    Ok(Json(resp))
}

#[instrument(skip(state, headers, body))]
async fn query_operations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OperationQueryRequest>,
) -> Result<Json<operations::OperationQueryResponse>, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_scope(SCOPE_STRATEGIC_COORDINATION)?;
    let resp = operations::query(&state.store, &state.config, &client, body)?;
    Ok(Json(resp))
}

#[instrument(skip(state, headers, body))]
async fn put_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<OperationPutRequest>,
) -> Result<impl IntoResponse, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_scope(SCOPE_STRATEGIC_COORDINATION)?;
    let (resp, created) = operations::put(&state.store, &state.config, &client, id, body)?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(resp)))
}

#[instrument(skip(state, headers))]
async fn delete_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<operations::OperationResponse>, DssError> {
    let client = auth::authenticate(&headers, &state.config)?;
    client.require_scope(SCOPE_STRATEGIC_COORDINATION)?;
    let resp = operations::delete(&state.store, &client, id)?;
    Ok(Json(resp))
}
