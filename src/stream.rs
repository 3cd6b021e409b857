//! Streaming extraction API: emit samples as they complete.
//!
//! Unlike the eager [`crate::run::extract`] which returns only after every
//! document finishes, [`extract_stream`] yields each [`SampleResult`] as
//! soon as its document completes. Callers can display partial results,
//! persist incrementally, or stop consuming early (dropping the stream
//! cancels the in-flight calls).
//!
//! Samples arrive in completion order, not input order; match them to
//! inputs by `doc_id`. Contained failures still arrive as ordinary samples
//! with `failure` set. The only `Err` item is a fatal error (rejected
//! credential), after which the stream ends.

use crate::config::ExtractConfig;
use crate::document::DocumentImage;
use crate::error::Doc2RegionsError;
use crate::output::SampleResult;
use crate::pipeline::client::ServiceClient;
use crate::pipeline::sample;
use futures::future;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-document results.
pub type SampleStream = Pin<Box<dyn Stream<Item = Result<SampleResult, Doc2RegionsError>> + Send>>;

/// Extract regions for a batch, streaming samples as they are ready.
///
/// The returned stream owns the documents and configuration, so it can be
/// moved into a spawned task. Progress callbacks are not fired in streaming
/// mode; the stream itself is the progress signal.
///
/// # Returns
/// - `Ok(SampleStream)` — one item per document; a fatal error surfaces as
///   a single `Err` item and ends the stream
/// - `Err(Doc2RegionsError)` — invalid configuration, detected up front
pub fn extract_stream(
    docs: Vec<DocumentImage>,
    config: &ExtractConfig,
) -> Result<SampleStream, Doc2RegionsError> {
    info!("Starting streaming extraction: {} documents", docs.len());

    if config.credential.trim().is_empty() {
        return Err(Doc2RegionsError::InvalidConfig(
            "credential must not be empty".into(),
        ));
    }

    let client = Arc::new(ServiceClient::new(config)?);
    let concurrency = config.concurrency.max(1);
    let config_owned = config.clone();

    let s = stream::iter(docs.into_iter().map(move |doc| {
        let client = Arc::clone(&client);
        let cfg = config_owned.clone();
        async move { sample::process_document(&client, &doc, &cfg).await }
    }))
    .buffer_unordered(concurrency)
    // Fuse after the first fatal error; in-flight work is dropped with the
    // inner stream state once the consumer sees the Err.
    .scan(false, |halted, item| {
        if *halted {
            return future::ready(None);
        }
        if item.is_err() {
            *halted = true;
        }
        future::ready(Some(item))
    });

    Ok(Box::pin(s))
}
