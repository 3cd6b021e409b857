//! Background extraction: spawn a run and control it through a handle.
//!
//! [`spawn_extract`] submits the batch onto the tokio runtime and returns an
//! [`ExtractHandle`] immediately. The caller polls [`ExtractHandle::progress`]
//! for live counters, requests a stop with [`ExtractHandle::cancel`], and
//! collects the final [`ExtractOutput`] with [`ExtractHandle::join`]. The
//! run itself is the same batch driver the synchronous API uses, so every
//! alignment and containment guarantee carries over unchanged.
//!
//! Dropping the handle detaches the run: it keeps processing (and keeps
//! feeding its sink, if any), but can no longer be observed or cancelled.

use crate::config::ExtractConfig;
use crate::document::DocumentImage;
use crate::error::Doc2RegionsError;
use crate::output::ExtractOutput;
use crate::progress::{ExtractProgressCallback, ProgressCallback};
use crate::run::run_batch;
use crate::sink::SampleSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Point-in-time view of a background run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    /// Documents in the batch.
    pub total_documents: usize,
    /// Documents finished, successfully or not.
    pub completed_documents: usize,
    /// Documents that produced a real (non-fallback) sample.
    pub extracted_documents: usize,
    /// Documents that fell back to the empty sample.
    pub fallback_documents: usize,
}

impl RunProgress {
    pub fn is_complete(&self) -> bool {
        self.completed_documents >= self.total_documents
    }
}

/// Updates the shared counters and forwards every event to the caller's own
/// callback, when one was configured.
struct CountingForwarder {
    completed: AtomicUsize,
    extracted: AtomicUsize,
    fallbacks: AtomicUsize,
    inner: Option<ProgressCallback>,
}

impl ExtractProgressCallback for CountingForwarder {
    fn on_run_start(&self, total_documents: usize) {
        if let Some(cb) = &self.inner {
            cb.on_run_start(total_documents);
        }
    }

    fn on_document_start(&self, index: usize, total: usize, doc_id: &str) {
        if let Some(cb) = &self.inner {
            cb.on_document_start(index, total, doc_id);
        }
    }

    fn on_document_complete(&self, index: usize, total: usize, doc_id: &str, regions: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.extracted.fetch_add(1, Ordering::SeqCst);
        if let Some(cb) = &self.inner {
            cb.on_document_complete(index, total, doc_id, regions);
        }
    }

    fn on_document_fallback(&self, index: usize, total: usize, doc_id: &str, error: String) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        if let Some(cb) = &self.inner {
            cb.on_document_fallback(index, total, doc_id, error);
        }
    }

    fn on_run_complete(&self, total_documents: usize, extracted_count: usize) {
        if let Some(cb) = &self.inner {
            cb.on_run_complete(total_documents, extracted_count);
        }
    }
}

/// Control handle for a background extraction run.
pub struct ExtractHandle {
    total: usize,
    counters: Arc<CountingForwarder>,
    cancel: watch::Sender<bool>,
    join: JoinHandle<Result<ExtractOutput, Doc2RegionsError>>,
}

impl ExtractHandle {
    /// Current progress counters.
    pub fn progress(&self) -> RunProgress {
        RunProgress {
            total_documents: self.total,
            completed_documents: self.counters.completed.load(Ordering::SeqCst),
            extracted_documents: self.counters.extracted.load(Ordering::SeqCst),
            fallback_documents: self.counters.fallbacks.load(Ordering::SeqCst),
        }
    }

    /// Whether the background task has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request cancellation.
    ///
    /// The run stops at the next scheduling point, drops its in-flight
    /// calls, and [`join`](Self::join) returns [`Doc2RegionsError::Cancelled`].
    /// Samples already handed to a sink stay persisted.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the run and return its output.
    pub async fn join(self) -> Result<ExtractOutput, Doc2RegionsError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Doc2RegionsError::Cancelled),
            Err(e) => Err(Doc2RegionsError::Internal(format!(
                "extraction task panicked: {}",
                e
            ))),
        }
    }
}

/// Run a batch in the background and return a handle to it.
///
/// The configured progress callback still fires; the handle's counters are
/// layered on top of it.
///
/// # Errors
/// Returns `Err` without spawning when the configuration is invalid.
pub fn spawn_extract(
    docs: Vec<DocumentImage>,
    config: ExtractConfig,
) -> Result<ExtractHandle, Doc2RegionsError> {
    spawn_inner(docs, None, config)
}

/// Background variant of [`crate::extract_with_sink`].
///
/// The sink is shared with the spawned task, so it must be `Arc`-owned.
pub fn spawn_extract_with_sink(
    docs: Vec<DocumentImage>,
    sink: Arc<dyn SampleSink>,
    config: ExtractConfig,
) -> Result<ExtractHandle, Doc2RegionsError> {
    spawn_inner(docs, Some(sink), config)
}

fn spawn_inner(
    docs: Vec<DocumentImage>,
    sink: Option<Arc<dyn SampleSink>>,
    mut config: ExtractConfig,
) -> Result<ExtractHandle, Doc2RegionsError> {
    if config.credential.trim().is_empty() {
        return Err(Doc2RegionsError::InvalidConfig(
            "credential must not be empty".into(),
        ));
    }

    let counters = Arc::new(CountingForwarder {
        completed: AtomicUsize::new(0),
        extracted: AtomicUsize::new(0),
        fallbacks: AtomicUsize::new(0),
        inner: config.progress_callback.take(),
    });
    config.progress_callback = Some(Arc::clone(&counters) as ProgressCallback);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let total = docs.len();

    let join = tokio::spawn(async move {
        let sink_ref = sink.as_deref();
        run_batch(&docs, sink_ref, &config, Some(cancel_rx)).await
    });

    Ok(ExtractHandle {
        total,
        counters,
        cancel: cancel_tx,
        join,
    })
}
