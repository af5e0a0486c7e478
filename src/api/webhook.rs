//! Webhook handler for GitHub push events

use axum::{
    Json,
    body::Bytes,
    extract::Query,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::SharedState;
use crate::delivery::DeliveryRecord;
use crate::webhook::{PushPayload, Verdict, authenticate};

/// Handles the GitHub webhook POST request.
///
/// Authentication runs on the raw body before anything else. Accepted push
/// deliveries run the full pipeline and the response carries its report:
/// 200 when every step succeeded, 500 when a step failed (the body still
/// holds every branch's outcome).
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Check for dry run mode
    let dry_run = params.get("dry_run").map(|v| v == "true").unwrap_or(false)
        || headers.get("X-Dry-Run").is_some();

    let verdict = match authenticate(
        state.config.webhook.secret.as_deref(),
        &headers,
        &body,
        state.config.webhook.push_only,
    ) {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!("Rejected webhook: {}", e);
            return e.into_response();
        }
    };

    let delivery = match verdict {
        Verdict::Accepted(delivery) => delivery,
        Verdict::Ignored(delivery) => {
            info!("Not push event; Received {:?} event", delivery.event_type);
            let mut record = DeliveryRecord::new(&delivery.id, &delivery.event_type);
            record.mark_ignored(format!("event '{}' is not handled", delivery.event_type));
            state.deliveries.lock().await.add(record);
            return ignored(&format!("event '{}' ignored", delivery.event_type));
        }
    };

    let payload = match PushPayload::parse(&body) {
        Ok(p) => p,
        Err(e) => {
            info!("Could not parse JSON body: {:?}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid push payload: {}", e) })),
            )
                .into_response();
        }
    };

    let mut record = DeliveryRecord::new(&delivery.id, &delivery.event_type);
    record.repository = state.pipeline.repository_for(&payload).map(String::from);
    record.branch = payload.branch().map(String::from);
    record.head_commit = payload.head_commit().map(String::from);
    record.dry_run = dry_run;

    if let Some(reason) = skip_reason(&state, &payload) {
        info!(delivery_id = %delivery.id, "Skipping delivery: {}", reason);
        record.mark_ignored(reason.clone());
        state.deliveries.lock().await.add(record);
        return ignored(&reason);
    }

    if let (Some(limit), Some(repo)) = (&state.config.rate_limit, &record.repository) {
        let mut rate_limiter = state.rate_limiter.lock().await;
        if rate_limiter.check_rate_limit(repo, limit.max_requests, limit.window_secs) {
            warn!(
                "Too many requests for repository {:?} - {:?} requests per {:?} seconds",
                repo, limit.max_requests, limit.window_secs
            );
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    state.deliveries.lock().await.add(record);
    if dry_run {
        info!("[DRY_RUN] Delivery {}", delivery.id);
    }

    match state.pipeline.run(&delivery.id, &payload, dry_run).await {
        Ok(report) => {
            let status = if report.is_complete() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let body = Json(&report).into_response();
            state
                .deliveries
                .lock()
                .await
                .update(&delivery.id, |r| r.mark_finished(report));
            (status, body).into_response()
        }
        Err(e) => {
            error!("Delivery {} failed: {}", delivery.id, e);
            state
                .deliveries
                .lock()
                .await
                .update(&delivery.id, |r| r.mark_failed(e.to_string()));
            e.into_response()
        }
    }
}

/// Why an authentic push should not be processed, if it should not.
fn skip_reason(state: &SharedState, payload: &PushPayload) -> Option<String> {
    if payload.deleted {
        return Some("branch deletion".to_string());
    }
    let Some(branch) = payload.branch() else {
        return Some(format!(
            "ref {:?} is not a branch",
            payload.git_ref.as_deref().unwrap_or("")
        ));
    };
    match &state.config.repository.branch {
        Some(wanted) if wanted != branch => Some(format!(
            "push to '{}' but only '{}' is published",
            branch, wanted
        )),
        _ => None,
    }
}

fn ignored(reason: &str) -> Response {
    (StatusCode::OK, Json(json!({ "ignored": reason }))).into_response()
}
