//! Batch extraction entry points.
//!
//! This module provides the simpler API: submit a batch, wait for every
//! document, get one [`SampleResult`] per input back. Use
//! [`crate::stream::extract_stream`] when you want results progressively, or
//! [`crate::handle::spawn_extract`] to run in the background and poll.
//!
//! ## Alignment
//!
//! The batch functions uphold one invariant above all: the output contains
//! exactly one sample per submitted document, in submission order, no matter
//! which documents failed. Failures are contained per document; the only
//! aborts are a rejected credential and explicit cancellation, both of which
//! return an error rather than a partial output.

use crate::config::ExtractConfig;
use crate::document::DocumentImage;
use crate::error::Doc2RegionsError;
use crate::output::{ExtractOutput, ExtractStats, SampleResult};
use crate::pipeline::client::ServiceClient;
use crate::pipeline::sample;
use crate::sink::SampleSink;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

/// Extract text regions for a batch of document images.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `docs`   — Document images to process
/// * `config` — Extraction configuration
///
/// # Returns
/// `Ok(ExtractOutput)` with one sample per input document, in input order,
/// even if some (or all) documents failed — check `output.stats` and each
/// sample's `failure` field.
///
/// # Errors
/// Returns `Err(Doc2RegionsError)` only for fatal conditions:
/// - Invalid configuration (empty credential)
/// - Credential rejected by the service (HTTP 401/403)
pub async fn extract(
    docs: &[DocumentImage],
    config: &ExtractConfig,
) -> Result<ExtractOutput, Doc2RegionsError> {
    run_batch(docs, None, config, None).await
}

/// Extract regions and hand each finished sample to `sink` as it completes.
///
/// Samples reach the sink in completion order, which under concurrency is
/// not the input order; the returned [`ExtractOutput`] is still sorted into
/// input order. A sample the sink rejects is logged, counted in
/// `stats.persist_failed`, and kept in the output.
pub async fn extract_with_sink(
    docs: &[DocumentImage],
    sink: &dyn SampleSink,
    config: &ExtractConfig,
) -> Result<ExtractOutput, Doc2RegionsError> {
    run_batch(docs, Some(sink), config, None).await
}

/// Extract a batch and write the full output as JSON to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    docs: &[DocumentImage],
    output_path: impl AsRef<Path>,
    config: &ExtractConfig,
) -> Result<ExtractStats, Doc2RegionsError> {
    let output = extract(docs, config).await?;
    let path = output_path.as_ref();

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Doc2RegionsError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Doc2RegionsError::Internal(format!("failed to serialise output: {}", e)))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| Doc2RegionsError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Doc2RegionsError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(output.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally. Do not call from within an
/// async context; use [`extract`] there instead.
pub fn extract_sync(
    docs: &[DocumentImage],
    config: &ExtractConfig,
) -> Result<ExtractOutput, Doc2RegionsError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2RegionsError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(docs, config))
}

/// Shared batch driver behind every entry point.
///
/// `cancel` is wired up by [`crate::handle::spawn_extract`]; a `true` on the
/// channel aborts the run with [`Doc2RegionsError::Cancelled`], dropping all
/// in-flight calls.
pub(crate) async fn run_batch(
    docs: &[DocumentImage],
    sink: Option<&dyn SampleSink>,
    config: &ExtractConfig,
    mut cancel: Option<watch::Receiver<bool>>,
) -> Result<ExtractOutput, Doc2RegionsError> {
    let total_start = Instant::now();
    let total = docs.len();
    info!("Starting extraction: {} documents", total);

    // The builder validates this too, but a config assembled by hand can
    // reach here with an empty credential; fail before any network call.
    if config.credential.trim().is_empty() {
        return Err(Doc2RegionsError::InvalidConfig(
            "credential must not be empty".into(),
        ));
    }

    let client = ServiceClient::new(config)?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    let persist_failures = AtomicUsize::new(0);
    let client_ref = &client;
    let persist_ref = &persist_failures;

    // Collected up front so the stream yields plain futures; feeding the
    // closure-backed iterator straight into `stream::iter` cannot be proven
    // `Send` once this driver runs inside a spawned task. The futures are
    // lazy, so `buffer_unordered` still bounds how many run at once.
    let tasks: Vec<_> = docs
        .iter()
        .enumerate()
        .map(|(idx, doc)| async move {
            let position = idx + 1;
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_start(position, total, &doc.id);
            }

            let sample = sample::process_document(client_ref, doc, config).await?;

            if let Some(ref cb) = config.progress_callback {
                match &sample.failure {
                    None => {
                        cb.on_document_complete(position, total, &doc.id, sample.detections.len())
                    }
                    Some(e) => cb.on_document_fallback(position, total, &doc.id, e.to_string()),
                }
            }

            if let Some(s) = sink {
                if let Err(e) = s.persist(&sample) {
                    warn!("Document {}: {}", doc.id, e);
                    persist_ref.fetch_add(1, Ordering::Relaxed);
                }
            }

            Ok::<(usize, SampleResult), Doc2RegionsError>((idx, sample))
        })
        .collect();

    let mut in_flight = stream::iter(tasks).buffer_unordered(config.concurrency.max(1));

    let mut collected: Vec<(usize, SampleResult)> = Vec::with_capacity(total);
    loop {
        let item = tokio::select! {
            _ = cancel_requested(&mut cancel) => {
                info!("Extraction cancelled after {} of {} documents", collected.len(), total);
                return Err(Doc2RegionsError::Cancelled);
            }
            item = in_flight.next() => item,
        };

        match item {
            None => break,
            Some(Ok(entry)) => collected.push(entry),
            // Dropping `in_flight` cancels every in-flight document.
            Some(Err(fatal)) => return Err(fatal),
        }
    }

    // Restore input order; completion order depends on service latency.
    collected.sort_by_key(|(idx, _)| *idx);
    let samples: Vec<SampleResult> = collected.into_iter().map(|(_, s)| s).collect();

    let extracted = samples.iter().filter(|s| s.failure.is_none()).count();
    let stats = ExtractStats {
        total_documents: total,
        extracted_documents: extracted,
        fallback_documents: total - extracted,
        persist_failed: persist_failures.load(Ordering::Relaxed),
        total_prompt_tokens: samples.iter().map(|s| s.usage.prompt_tokens as u64).sum(),
        total_completion_tokens: samples
            .iter()
            .map(|s| s.usage.completion_tokens as u64)
            .sum(),
        total_tokens: samples.iter().map(|s| s.usage.total_tokens as u64).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {}/{} documents, {} tokens, {}ms total",
        extracted, total, stats.total_tokens, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(total, extracted);
    }

    Ok(ExtractOutput { samples, stats })
}

/// Resolves only when cancellation is requested; pends forever otherwise,
/// including when the cancel channel is absent or its sender is gone.
async fn cancel_requested(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
            // Sender dropped without cancelling; the run proceeds normally.
            std::future::pending::<()>().await
        }
        None => std::future::pending::<()>().await,
    }
}
