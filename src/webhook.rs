//! Webhook authentication and push payload structures

use axum::{
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

pub const HEADER_SIGNATURE: &str = "x-hub-signature";
pub const HEADER_SIGNATURE_256: &str = "x-hub-signature-256";
pub const HEADER_EVENT: &str = "x-github-event";
pub const HEADER_DELIVERY: &str = "x-github-delivery";

/// Reasons a delivery is turned away before any side effect runs
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Must provide a 'GITHUB_WEBHOOK_SECRET' env variable")]
    MissingSecret,

    #[error("No X-Hub-Signature found on request")]
    MissingSignature,

    #[error("No X-Github-Event found on request")]
    MissingEventType,

    #[error("No X-Github-Delivery found on request")]
    MissingDeliveryId,

    #[error("X-Hub-Signature incorrect. Github webhook token doesn't match")]
    SignatureMismatch,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingEventType => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain")],
            self.to_string(),
        )
            .into_response()
    }
}

/// Outcome of a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Authentic push delivery; the pipeline should run.
    Accepted(Delivery),
    /// Authentic, but not an event this service acts on.
    Ignored(Delivery),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub event_type: String,
}

/// Compute the `sha1=<hex>` signature GitHub sends in `X-Hub-Signature`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Compute the `sha256=<hex>` signature GitHub sends in `X-Hub-Signature-256`.
pub fn compute_signature_256(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header over the raw request body.
///
/// Accepts both the `sha1=` and `sha256=` forms. Comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    if let Some(hex_sig) = signature_header.strip_prefix("sha256=") {
        let Ok(expected) = hex::decode(hex_sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        return mac.verify_slice(&expected).is_ok();
    }

    if let Some(hex_sig) = signature_header.strip_prefix("sha1=") {
        let Ok(expected) = hex::decode(hex_sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        return mac.verify_slice(&expected).is_ok();
    }

    false
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Validate a delivery's headers and signature.
///
/// Checks run in a fixed order and the first failure wins: secret configured,
/// signature present, event type present, delivery id present, signature
/// matches. `body` must be the raw bytes as received; the signature is never
/// checked against a re-serialized payload.
pub fn authenticate(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    push_only: bool,
) -> Result<Verdict, AuthError> {
    let secret = secret.ok_or(AuthError::MissingSecret)?;

    // Prefer the SHA-256 header when GitHub sends both
    let signature = header_str(headers, HEADER_SIGNATURE_256)
        .or_else(|| header_str(headers, HEADER_SIGNATURE))
        .ok_or(AuthError::MissingSignature)?;
    let event_type = header_str(headers, HEADER_EVENT).ok_or(AuthError::MissingEventType)?;
    let delivery_id = header_str(headers, HEADER_DELIVERY).ok_or(AuthError::MissingDeliveryId)?;

    if !verify_signature(secret, body, signature) {
        warn!(delivery_id, "Webhook signature mismatch");
        return Err(AuthError::SignatureMismatch);
    }

    let action = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("action").and_then(|a| a.as_str()).map(String::from));
    info!(
        delivery_id,
        event_type,
        action = action.as_deref().unwrap_or("-"),
        "Github-Event received"
    );
    debug!(payload = %String::from_utf8_lossy(body), "Payload");

    let delivery = Delivery {
        id: delivery_id.to_string(),
        event_type: event_type.to_string(),
    };
    if push_only && event_type != "push" {
        return Ok(Verdict::Ignored(delivery));
    }
    Ok(Verdict::Accepted(delivery))
}

/// Subset of the GitHub push payload this service reads
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PushPayload {
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub repository: Option<Repository>,
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub owner: Option<Owner>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Owner {
    pub login: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// One commit of a push; paths are repository-relative
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct CommitRecord {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl PushPayload {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Branch name when the push targets `refs/heads/*`, `None` for tags and other refs.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.as_deref()?.strip_prefix("refs/heads/")
    }

    /// Head commit id, ignoring the all-zero id GitHub sends for deletions.
    pub fn head_commit(&self) -> Option<&str> {
        self.after
            .as_deref()
            .filter(|sha| !sha.is_empty() && !sha.chars().all(|c| c == '0'))
    }

    pub fn owner(&self) -> Option<&Owner> {
        self.repository.as_ref()?.owner.as_ref()
    }
}
