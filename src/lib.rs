pub mod api;
pub mod build;
pub mod cdn;
pub mod committer;
pub mod config;
pub mod delivery;
pub mod diff;
pub mod error;
pub mod git;
pub mod logging;
pub mod pipeline;
pub mod publisher;
pub mod rate_limit;
pub mod storage;
pub mod webhook;
pub mod workspace;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use config::PublishConfig;
use delivery::DeliveryStore;
use pipeline::Pipeline;
use rate_limit::RateLimiter;
use storage::{CdnInvalidator, ObjectStore};

pub struct AppState {
    pub config: Arc<PublishConfig>,
    pub pipeline: Pipeline,
    pub deliveries: Mutex<DeliveryStore>,
    pub rate_limiter: Mutex<RateLimiter>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: PublishConfig,
        store: Arc<dyn ObjectStore>,
        cdn: Option<Arc<dyn CdnInvalidator>>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            pipeline: Pipeline::new(config.clone(), store, cdn),
            deliveries: Mutex::new(DeliveryStore::new(config.max_deliveries)),
            rate_limiter: Mutex::new(RateLimiter::new()),
            start_time: Instant::now(),
            started_at: Utc::now(),
            config,
        }
    }
}

pub type SharedState = Arc<AppState>;
