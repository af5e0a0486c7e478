//! Wildcard cache invalidation

use chrono::Utc;
use tracing::info;

use crate::error::CdnError;
use crate::storage::{CdnInvalidator, InvalidationAck};

pub const INVALIDATE_ALL: &str = "/*";

/// Invalidate every path of `distribution_id`.
///
/// The caller reference is the current time in milliseconds. Two requests in
/// the same millisecond share a reference and the CDN treats the second as a
/// duplicate of the first.
pub async fn invalidate_all(
    cdn: &dyn CdnInvalidator,
    distribution_id: &str,
) -> Result<InvalidationAck, CdnError> {
    let caller_reference = Utc::now().timestamp_millis().to_string();
    info!(
        "Resetting cloudfront cache {} (reference {})",
        distribution_id, caller_reference
    );
    cdn.create_invalidation(distribution_id, &[INVALIDATE_ALL.to_string()], &caller_reference)
        .await
}
