//! HTTP interaction with the extraction service.
//!
//! This module is intentionally thin: one method registers and uploads an
//! image asset, one performs a single extraction call. Retry and fallback
//! policy live in [`crate::pipeline::sample`] so transport code stays free
//! of batch semantics.
//!
//! Errors are classified at the HTTP boundary: 401/403 become
//! [`CallError::Auth`] (fatal for the whole batch, the credential will not
//! get better), while timeouts, 429, 5xx and connection failures are
//! transient and eligible for retry.

use super::encode::EncodedImage;
use crate::config::ExtractConfig;
use crate::error::Doc2RegionsError;
use reqwest::header;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Outcome of a single service interaction, before retry policy is applied.
#[derive(Debug, Error)]
pub(crate) enum CallError {
    #[error("authentication rejected (HTTP {status}): {detail}")]
    Auth { status: u16, detail: String },

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("service returned HTTP {status}: {detail}")]
    Status {
        status: u16,
        detail: String,
        retry_after_secs: Option<u64>,
    },

    #[error("transport error: {detail}")]
    Transport { detail: String },
}

impl CallError {
    /// Auth failures abort the batch instead of falling back per document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CallError::Auth { .. })
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Auth { .. } => false,
            CallError::Timeout { .. } | CallError::Transport { .. } => true,
            CallError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }

    /// Server-requested retry delay, if the response carried one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CallError::Status {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// HTTP status associated with the failure, when there was a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Auth { status, .. } | CallError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Response to the asset-registration request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetGrant {
    upload_url: String,
    asset_id: Value,
}

/// HTTP client for one extraction run.
///
/// Two underlying `reqwest` clients with different timeouts: extraction
/// calls return a small JSON body within `api_timeout_secs`, while asset
/// uploads push the full image and get `upload_timeout_secs`.
pub(crate) struct ServiceClient {
    http: reqwest::Client,
    upload: reqwest::Client,
    endpoint: String,
    asset_endpoint: String,
    credential: String,
    api_timeout_secs: u64,
    upload_timeout_secs: u64,
}

impl ServiceClient {
    pub fn new(config: &ExtractConfig) -> Result<Self, Doc2RegionsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| {
                Doc2RegionsError::Internal(format!("failed to build HTTP client: {}", e))
            })?;

        let upload = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upload_timeout_secs))
            .build()
            .map_err(|e| {
                Doc2RegionsError::Internal(format!("failed to build upload client: {}", e))
            })?;

        Ok(Self {
            http,
            upload,
            endpoint: config.endpoint.clone(),
            asset_endpoint: config.asset_endpoint.clone(),
            credential: config.credential.clone(),
            api_timeout_secs: config.api_timeout_secs,
            upload_timeout_secs: config.upload_timeout_secs,
        })
    }

    /// Upload an image to the asset store and return its asset id.
    ///
    /// Two steps: register the asset to obtain a pre-signed upload URL, then
    /// PUT the raw image bytes to that URL.
    pub async fn upload_asset(
        &self,
        image: &EncodedImage,
        description: &str,
    ) -> Result<String, CallError> {
        let response = self
            .http
            .post(&self.asset_endpoint)
            .bearer_auth(&self.credential)
            .header(header::ACCEPT, "application/json")
            .json(&serde_json::json!({
                "contentType": image.mime_type,
                "description": description,
            }))
            .send()
            .await
            .map_err(|e| classify_transport(e, self.api_timeout_secs))?;

        let response = check_status(response).await?;
        let grant: AssetGrant = response.json().await.map_err(|e| CallError::Transport {
            detail: format!("malformed asset grant: {}", e),
        })?;

        // The service has returned the id both as a string and as a number.
        let asset_id = match grant.asset_id {
            Value::String(s) => s,
            other => other.to_string(),
        };

        debug!(
            "Uploading {} bytes to asset store (asset {})",
            image.bytes.len(),
            asset_id
        );

        let put = self
            .upload
            .put(&grant.upload_url)
            .header("x-amz-meta-nvcf-asset-description", description)
            .header(header::CONTENT_TYPE, image.mime_type)
            .body(image.bytes.clone())
            .send()
            .await
            .map_err(|e| classify_transport(e, self.upload_timeout_secs))?;

        check_status(put).await?;
        Ok(asset_id)
    }

    /// One extraction request; returns the raw response body.
    ///
    /// Asset-backed requests carry the reference headers the service uses to
    /// resolve the uploaded image.
    pub async fn call_once(&self, body: &Value, asset_id: Option<&str>) -> Result<String, CallError> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.credential)
            .header(header::ACCEPT, "application/json")
            .json(body);

        if let Some(id) = asset_id {
            req = req
                .header("NVCF-INPUT-ASSET-REFERENCES", id)
                .header("NVCF-FUNCTION-ASSET-IDS", id);
        }

        let response = req
            .send()
            .await
            .map_err(|e| classify_transport(e, self.api_timeout_secs))?;

        let response = check_status(response).await?;
        response.text().await.map_err(|e| CallError::Transport {
            detail: e.to_string(),
        })
    }
}

fn classify_transport(e: reqwest::Error, timeout_secs: u64) -> CallError {
    if e.is_timeout() {
        CallError::Timeout { secs: timeout_secs }
    } else {
        CallError::Transport {
            detail: e.to_string(),
        }
    }
}

/// Map a non-2xx response to a classified error, consuming the body for the
/// diagnostic.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_secs = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let detail = excerpt(&response.text().await.unwrap_or_default());

    match status.as_u16() {
        401 | 403 => Err(CallError::Auth {
            status: status.as_u16(),
            detail,
        }),
        code => Err(CallError::Status {
            status: code,
            detail,
            retry_after_secs,
        }),
    }
}

/// First few hundred bytes of a body, for error messages.
fn excerpt(body: &str) -> String {
    const MAX: usize = 300;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut end = MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
