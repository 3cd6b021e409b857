//! Progress-callback trait for per-document extraction events.
//!
//! Inject an [`Arc<dyn ExtractProgressCallback>`] via
//! [`crate::config::ExtractConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline processes each document. Callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a database
//! record, or a terminal progress bar without the library knowing anything
//! about how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use doc2regions::{ExtractProgressCallback, ExtractConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, doc_id: &str, regions: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} ({} regions)", index, total, doc_id, regions);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractConfig::builder()
//!     .credential("nvapi-...")
//!     .progress_callback(counter as Arc<dyn ExtractProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each document.
///
/// Implementations must be `Send + Sync` (documents are processed
/// concurrently). All methods have default no-op implementations so callers
/// only override what they care about.
///
/// # Thread safety
///
/// `on_document_start`, `on_document_complete`, and `on_document_fallback`
/// may be called concurrently from different tasks. Implementations must
/// protect shared mutable state with appropriate synchronisation primitives
/// (e.g. `Mutex`, `AtomicUsize`).
pub trait ExtractProgressCallback: Send + Sync {
    /// Called once before any document is processed.
    ///
    /// # Arguments
    /// * `total_documents` — number of documents in the batch
    fn on_run_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called just before the service request is sent for a document.
    ///
    /// # Arguments
    /// * `index`  — 1-indexed position of the document in the batch
    /// * `total`  — total documents in the batch
    /// * `doc_id` — identifier of the document
    fn on_document_start(&self, index: usize, total: usize, doc_id: &str) {
        let _ = (index, total, doc_id);
    }

    /// Called when a document's regions are successfully extracted.
    ///
    /// # Arguments
    /// * `index`   — 1-indexed position of the document in the batch
    /// * `total`   — total documents
    /// * `doc_id`  — identifier of the document
    /// * `regions` — number of text regions detected
    fn on_document_complete(&self, index: usize, total: usize, doc_id: &str, regions: usize) {
        let _ = (index, total, doc_id, regions);
    }

    /// Called when a document fails after all retries and falls back to an
    /// empty result.
    ///
    /// The error is passed by value: an `Arc<dyn ExtractProgressCallback>`
    /// must be movable into `tokio::spawn` tasks, and a borrowed error string
    /// makes the resulting future fail the `Send` bound on some compiler
    /// versions.
    ///
    /// # Arguments
    /// * `index`  — 1-indexed position of the document in the batch
    /// * `total`  — total documents
    /// * `doc_id` — identifier of the document
    /// * `error`  — human-readable failure description
    fn on_document_fallback(&self, index: usize, total: usize, doc_id: &str, error: String) {
        let _ = (index, total, doc_id, error);
    }

    /// Called once after all documents have been attempted.
    ///
    /// # Arguments
    /// * `total_documents` — total documents in the batch
    /// * `extracted_count` — documents that produced regions without error
    fn on_run_complete(&self, total_documents: usize, extracted_count: usize) {
        let _ = (total_documents, extracted_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractConfig`].
pub type ProgressCallback = Arc<dyn ExtractProgressCallback>;
