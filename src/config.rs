//! Configuration for region-extraction runs.
//!
//! All behaviour is controlled through [`ExtractConfig`], built via its
//! [`ExtractConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across workers, log them, and diff two runs to
//! understand why their outputs differ.
//!
//! The credential is the one field without a usable default: `build()`
//! refuses an empty credential so a misconfigured batch fails before the
//! first network call rather than 401-ing per document.

use crate::error::Doc2RegionsError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default chat-completions endpoint of the parsing service.
pub const DEFAULT_ENDPOINT: &str = "https://integrate.api.nvidia.com/v1/chat/completions";

/// Default asset-upload endpoint for images above the inline payload limit.
pub const DEFAULT_ASSET_ENDPOINT: &str = "https://api.nvcf.nvidia.com/v2/nvcf/assets";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "nvidia/nemoretriever-parse";

/// Whether a run blocks the caller or executes as a spawned task.
///
/// `Synchronous` callers await [`crate::extract`] directly; `Background`
/// callers submit via [`crate::spawn_extract`] and receive an
/// [`crate::ExtractHandle`] to poll, join, or cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    /// Run inside the caller's task and return when the batch completes. (default)
    #[default]
    Synchronous,
    /// Run as a detached task; the caller holds a handle.
    Background,
}

/// Configuration for a region-extraction run.
///
/// Built via [`ExtractConfig::builder()`].
///
/// # Example
/// ```rust
/// use doc2regions::ExtractConfig;
///
/// let config = ExtractConfig::builder()
///     .credential("nvapi-...")
///     .concurrency(4)
///     .max_retries(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractConfig {
    /// Bearer credential for the service. Required; `build()` rejects an
    /// empty value so the failure surfaces before any document is attempted.
    pub credential: String,

    /// Chat-completions endpoint URL. Default: [`DEFAULT_ENDPOINT`].
    ///
    /// Override to target a self-hosted deployment or a mock server in tests.
    pub endpoint: String,

    /// Asset-upload endpoint URL. Default: [`DEFAULT_ASSET_ENDPOINT`].
    ///
    /// Only contacted for images whose encoded payload exceeds the service's
    /// inline limit; small images travel inline as a base64 data URI.
    pub asset_endpoint: String,

    /// Model identifier sent with each request. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Number of concurrent in-flight service calls. Default: 4.
    ///
    /// The service is network-bound, so a handful of concurrent calls cuts
    /// wall-clock time substantially. Hosted endpoints rate-limit per key;
    /// if you see 429 retries in the logs, lower this before raising the
    /// retry budget.
    pub concurrency: usize,

    /// Maximum retry attempts for a transient failure. Default: 3.
    ///
    /// Covers network errors, 5xx, and 429. Authentication failures and
    /// other 4xx responses are never retried — they surface immediately.
    /// The builder clamps values above 255 to match the per-sample retry
    /// counter.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. A 429 response with a
    /// parseable `Retry-After` header overrides the computed delay.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for the extraction request, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Timeout for uploading an image asset, in seconds. Default: 300.
    ///
    /// Uploads move the full image body, so they get a much longer budget
    /// than the JSON extraction call.
    pub upload_timeout_secs: u64,

    /// Synchronous or background execution. Default: [`RunMode::Synchronous`].
    pub run_mode: RunMode,

    /// Optional progress callback receiving per-document events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            asset_endpoint: DEFAULT_ASSET_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            upload_timeout_secs: 300,
            run_mode: RunMode::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractConfig")
            .field("credential", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("asset_endpoint", &self.asset_endpoint)
            .field("model", &self.model)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("run_mode", &self.run_mode)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl ExtractConfig {
    /// Create a new builder for `ExtractConfig`.
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractConfig`].
#[derive(Debug)]
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl ExtractConfigBuilder {
    pub fn credential(mut self, key: impl Into<String>) -> Self {
        self.config.credential = key.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn asset_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.asset_endpoint = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(u8::MAX as u32);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn run_mode(mut self, mode: RunMode) -> Self {
        self.config.run_mode = mode;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractConfig, Doc2RegionsError> {
        let c = &self.config;
        if c.credential.trim().is_empty() {
            return Err(Doc2RegionsError::InvalidConfig(
                "credential must not be empty".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(Doc2RegionsError::InvalidConfig(
                "concurrency must be >= 1".into(),
            ));
        }
        if !c.endpoint.starts_with("http://") && !c.endpoint.starts_with("https://") {
            return Err(Doc2RegionsError::InvalidConfig(format!(
                "endpoint must be an HTTP(S) URL, got '{}'",
                c.endpoint
            )));
        }
        Ok(self.config)
    }
}
