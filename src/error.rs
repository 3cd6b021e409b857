//! Error types for the doc2regions library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Doc2RegionsError`] — **Fatal**: the batch cannot proceed at all
//!   (invalid configuration, rejected credential, unreadable input at
//!   registration time). Returned as `Err(Doc2RegionsError)` from the
//!   top-level `extract*` functions.
//!
//! * [`DocFailure`] — **Non-fatal**: a single document failed (encoding
//!   glitch, transient API error, unparseable response) but all other
//!   documents are fine. Stored inside [`crate::output::SampleResult`] so
//!   callers can inspect partial success instead of losing the whole batch
//!   to one bad image.
//!
//! The one deliberate crossover is authentication: a 401/403 means the
//! credential is bad for every remaining call, so it escapes per-document
//! containment and halts the orchestrator as [`Doc2RegionsError::AuthRejected`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the doc2regions library.
///
/// Document-level failures use [`DocFailure`] and are stored in
/// [`crate::output::SampleResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Doc2RegionsError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input image file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    ImageNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but is not a decodable image.
    #[error("File is not a supported image: '{path}': {detail}\nPNG, JPEG, BMP, TIFF and WebP inputs are supported.")]
    UnsupportedImage { path: PathBuf, detail: String },

    // ── Service errors ────────────────────────────────────────────────────
    /// The service rejected the credential (401/403) — batch-fatal.
    ///
    /// Retrying with the same credential cannot succeed, so the orchestrator
    /// halts instead of burning a call per remaining document. Results
    /// persisted before the rejection remain valid.
    #[error("Credential rejected by the service (HTTP {status}): {detail}\nCheck the API key passed to ExtractConfig::builder().credential(...).")]
    AuthRejected { status: u16, detail: String },

    // ── Run control ───────────────────────────────────────────────────────
    /// A background run was cancelled through its [`crate::ExtractHandle`]
    /// before all documents completed.
    #[error("Extraction run cancelled before completion")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure for a single document.
///
/// Stored alongside [`crate::output::SampleResult`] when a document falls
/// back to the empty result. The overall batch always continues.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocFailure {
    /// The input image could not be read or re-encoded for the request.
    #[error("{doc_id}: image encoding failed: {detail}")]
    Encoding { doc_id: String, detail: String },

    /// The service call exceeded the per-call deadline on every attempt.
    #[error("{doc_id}: service call timed out after {secs}s ({retries} retries)")]
    Timeout {
        doc_id: String,
        secs: u64,
        retries: u8,
    },

    /// The service refused the request, or transient failures outlasted the
    /// retry budget. `status` is the last HTTP status seen, when there was one.
    #[error("{doc_id}: service call failed after {retries} retries: {detail}")]
    Request {
        doc_id: String,
        status: Option<u16>,
        retries: u8,
        detail: String,
    },

    /// The response body was not decodable into the expected structure.
    #[error("{doc_id}: response parse failed: {detail}")]
    Parse { doc_id: String, detail: String },
}

impl DocFailure {
    /// Short failure-kind tag used in diagnostics and progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            DocFailure::Encoding { .. } => "encoding",
            DocFailure::Timeout { .. } => "timeout",
            DocFailure::Request { .. } => "request",
            DocFailure::Parse { .. } => "parse",
        }
    }

    /// Identifier of the document this failure belongs to.
    pub fn doc_id(&self) -> &str {
        match self {
            DocFailure::Encoding { doc_id, .. }
            | DocFailure::Timeout { doc_id, .. }
            | DocFailure::Request { doc_id, .. }
            | DocFailure::Parse { doc_id, .. } => doc_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejected_display() {
        let e = Doc2RegionsError::AuthRejected {
            status: 401,
            detail: "invalid key".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("401"), "got: {msg}");
        assert!(msg.contains("invalid key"));
    }

    #[test]
    fn invalid_config_display() {
        let e = Doc2RegionsError::InvalidConfig("credential must not be empty".into());
        assert!(e.to_string().contains("credential"));
    }

    #[test]
    fn timeout_failure_display() {
        let e = DocFailure::Timeout {
            doc_id: "scan-003".into(),
            secs: 60,
            retries: 3,
        };
        assert!(e.to_string().contains("scan-003"));
        assert!(e.to_string().contains("60s"));
        assert_eq!(e.kind(), "timeout");
    }

    #[test]
    fn request_failure_display_carries_status_detail() {
        let e = DocFailure::Request {
            doc_id: "page-1.png".into(),
            status: Some(500),
            retries: 3,
            detail: "HTTP 500: upstream overloaded".into(),
        };
        assert!(e.to_string().contains("page-1.png"));
        assert!(e.to_string().contains("3 retries"));
        assert_eq!(e.doc_id(), "page-1.png");
    }

    #[test]
    fn doc_failure_serialises() {
        let e = DocFailure::Parse {
            doc_id: "a.png".into(),
            detail: "no tool call in response".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        let back: DocFailure = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back.kind(), "parse");
    }
}
