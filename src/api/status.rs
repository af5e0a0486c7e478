use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashMap;
use tracing::error;

use crate::SharedState;
use crate::delivery::DeliveryStatus;

const RECENT_DELIVERIES: usize = 10;

/// Plain liveness text, or a small JSON document with `?format=json`.
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("format").is_some_and(|f| f == "json") {
        return Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "bucket": state.pipeline.store().bucket(),
        }))
        .into_response();
    }
    format!(
        "{} {} publishing to {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        state.pipeline.store().bucket()
    )
    .into_response()
}

/// Server status with recent deliveries
/// Supports query parameter: ?status=failed
pub async fn status(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let store = state.deliveries.lock().await;

    let deliveries = match params.get("status").and_then(|s| DeliveryStatus::parse(s)) {
        Some(status) => store.by_status(status, store.len()),
        // Missing or unknown status, return recent
        None => store.recent(RECENT_DELIVERIES),
    };

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "deliveries": {
            "running": store.running_count(),
            "tracked": store.len(),
            "filtered": deliveries,
            "filtered_count": deliveries.len(),
        },
        "config": {
            "repository": state.config.repository.full_name,
            "branch": state.config.repository.branch,
            "bucket": state.config.storage.bucket,
            "prefix": state.config.prefix(),
            "cdn": state.config.cdn.is_some(),
            "build": state.config.build.is_some(),
        }
    }))
}

/// Returns a specific delivery by ID
pub async fn get_delivery(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> Response {
    let store = state.deliveries.lock().await;
    match store.get(&id) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("delivery '{}' not found", id) })),
        )
            .into_response(),
    }
}

/// Current bucket listing
pub async fn list_objects(AxumState(state): AxumState<SharedState>) -> Response {
    match state.pipeline.store().list_objects().await {
        Ok(objects) => Json(json!({
            "bucket": state.pipeline.store().bucket(),
            "count": objects.len(),
            "objects": objects,
        }))
        .into_response(),
        Err(e) => {
            error!("Listing bucket failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
