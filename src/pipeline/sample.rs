//! Per-document orchestration: encode, call, parse, contain.
//!
//! [`process_document`] is the containment boundary the batch layer relies
//! on: whatever goes wrong with one document (unreadable file, timeout after
//! all retries, HTTP error, malformed response) it returns a fallback
//! [`SampleResult`] with empty detections, zero usage, and the failure
//! attached, so the batch keeps its one-result-per-input alignment. The only
//! error it propagates is a rejected credential, which no amount of
//! continuing can fix.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx and timeouts are transient and frequent under concurrent
//! load. Exponential backoff (doubling from `retry_backoff_ms`) avoids
//! thundering-herd: with 500 ms base and 3 retries the wait sequence is
//! 500 ms → 1 s → 2 s. A `Retry-After` header from the service overrides the
//! computed delay, capped so one throttled document cannot stall its worker
//! indefinitely.

use super::client::{CallError, ServiceClient};
use super::encode;
use super::parse;
use super::request::{self, ImageTransport};
use crate::config::ExtractConfig;
use crate::document::DocumentImage;
use crate::error::{Doc2RegionsError, DocFailure};
use crate::output::{SampleResult, TokenUsage};
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Longest delay a `Retry-After` header is allowed to impose.
const MAX_RETRY_AFTER_MS: u64 = 30_000;

/// Extract regions for a single document.
///
/// Always returns `Ok` with a real or fallback sample, except for
/// authentication failures, which abort the whole batch.
pub(crate) async fn process_document(
    client: &ServiceClient,
    doc: &DocumentImage,
    config: &ExtractConfig,
) -> Result<SampleResult, Doc2RegionsError> {
    let start = Instant::now();

    let image = match encode::encode_document(doc) {
        Ok(img) => img,
        Err(e) => {
            warn!("Document {}: encoding failed — {}", doc.id, e);
            let failure = DocFailure::Encoding {
                doc_id: doc.id.clone(),
                detail: e.to_string(),
            };
            return Ok(fallback(doc, start, 0, failure));
        }
    };

    // An uploaded asset survives across attempts; only the extraction call
    // itself is repeated.
    let mut asset_id: Option<String> = None;
    let mut last_err: Option<CallError> = None;
    let mut retries_used: u32 = 0;

    for attempt in 0..=config.max_retries {
        retries_used = attempt;
        if attempt > 0 {
            let retry_after = last_err.as_ref().and_then(CallError::retry_after_secs);
            let backoff = backoff_delay_ms(config.retry_backoff_ms, attempt, retry_after);
            warn!(
                "Document {}: retry {}/{} after {}ms",
                doc.id, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let transport = if image.fits_inline() {
            ImageTransport::Inline
        } else {
            match &asset_id {
                Some(id) => ImageTransport::Asset {
                    asset_id: id.clone(),
                },
                None => match client.upload_asset(&image, &doc.id).await {
                    Ok(id) => {
                        asset_id = Some(id.clone());
                        ImageTransport::Asset { asset_id: id }
                    }
                    Err(e) if e.is_fatal() => return Err(auth_error(e)),
                    Err(e) => {
                        warn!("Document {}: asset upload failed — {}", doc.id, e);
                        let retryable = e.is_retryable();
                        last_err = Some(e);
                        if retryable {
                            continue;
                        }
                        break;
                    }
                },
            }
        };

        let body = request::build_body(&config.model, &image, &transport);
        let asset_ref = match &transport {
            ImageTransport::Asset { asset_id } => Some(asset_id.as_str()),
            ImageTransport::Inline => None,
        };

        match client.call_once(&body, asset_ref).await {
            Ok(raw) => match parse::parse_body(&raw, doc.width, doc.height) {
                Ok(parsed) => {
                    let duration = start.elapsed();
                    debug!(
                        "Document {}: {} regions, {} tokens, {:?}",
                        doc.id,
                        parsed.regions.len(),
                        parsed.usage.total_tokens,
                        duration
                    );

                    return Ok(SampleResult {
                        doc_id: doc.id.clone(),
                        detections: parsed.regions,
                        usage: parsed.usage,
                        duration_ms: duration.as_millis() as u64,
                        retries: u8::try_from(attempt).unwrap_or(u8::MAX),
                        failure: None,
                    });
                }
                Err(e) => {
                    // Malformed output is not transient; no retry.
                    warn!("Document {}: response parse failed — {}", doc.id, e);
                    let failure = DocFailure::Parse {
                        doc_id: doc.id.clone(),
                        detail: e.to_string(),
                    };
                    let retries = u8::try_from(attempt).unwrap_or(u8::MAX);
                    return Ok(fallback(doc, start, retries, failure));
                }
            },
            Err(e) if e.is_fatal() => return Err(auth_error(e)),
            Err(e) => {
                warn!(
                    "Document {}: attempt {} failed — {}",
                    doc.id,
                    attempt + 1,
                    e
                );
                let retryable = e.is_retryable();
                last_err = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    // All attempts exhausted (or a non-retryable failure cut them short).
    let retries = u8::try_from(retries_used).unwrap_or(u8::MAX);
    let failure = match last_err {
        Some(CallError::Timeout { secs }) => DocFailure::Timeout {
            doc_id: doc.id.clone(),
            secs,
            retries,
        },
        Some(e) => DocFailure::Request {
            doc_id: doc.id.clone(),
            status: e.status(),
            retries,
            detail: e.to_string(),
        },
        None => DocFailure::Request {
            doc_id: doc.id.clone(),
            status: None,
            retries,
            detail: "unknown error".to_string(),
        },
    };

    Ok(fallback(doc, start, retries, failure))
}

/// Delay before retry `attempt` (1-indexed).
///
/// A parseable `Retry-After` overrides the exponential schedule, capped at
/// [`MAX_RETRY_AFTER_MS`]. All arithmetic saturates: the header value and the
/// retry budget are external inputs and must never panic a worker.
fn backoff_delay_ms(base_ms: u64, attempt: u32, retry_after_secs: Option<u64>) -> u64 {
    match retry_after_secs {
        Some(secs) => secs.saturating_mul(1000).min(MAX_RETRY_AFTER_MS),
        None => base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
    }
}

/// Empty sample that keeps the batch aligned when a document fails.
fn fallback(doc: &DocumentImage, start: Instant, retries: u8, failure: DocFailure) -> SampleResult {
    SampleResult {
        doc_id: doc.id.clone(),
        detections: Vec::new(),
        usage: TokenUsage::zero(),
        duration_ms: start.elapsed().as_millis() as u64,
        retries,
        failure: Some(failure),
    }
}

fn auth_error(e: CallError) -> Doc2RegionsError {
    match e {
        CallError::Auth { status, detail } => Doc2RegionsError::AuthRejected { status, detail },
        other => Doc2RegionsError::Internal(other.to_string()),
    }
}
