//! HTTP surface: the webhook endpoint plus read-only status endpoints

pub mod status;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use status::{get_delivery, list_objects, root, status};
pub use webhook::handle_webhook;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/webhook", routing::post(handle_webhook))
        .route("/status", routing::get(status))
        .route("/deliveries/{id}", routing::get(get_delivery))
        .route("/objects", routing::get(list_objects))
        .with_state(state)
}
