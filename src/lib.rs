//! # doc2regions
//!
//! Extract labelled text regions from document images using a remote
//! vision-language service.
//!
//! ## Why this crate?
//!
//! Classic layout-analysis stacks (OCR plus heuristic segmentation) lose the
//! semantic role of each block — a caption, a title, and a footnote all come
//! back as "text". This crate sends each page image to a vision-language
//! model that reads the page as a human would and returns every region with
//! a label, a normalized bounding box, and the transcribed text, ready for
//! retrieval pipelines and dataset building.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images
//!  │
//!  ├─ 1. Encode  read bytes, normalise exotic formats to PNG, base64
//!  ├─ 2. Upload  oversize payloads go through the asset service first
//!  ├─ 3. Call    concurrent requests with retry + exponential backoff
//!  ├─ 4. Parse   tool-call JSON → labelled regions + token usage
//!  └─ 5. Output  exactly one SampleResult per input, in input order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2regions::{extract, DocumentImage, ExtractConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractConfig::builder()
//!         .credential(std::env::var("NVIDIA_API_KEY")?)
//!         .build()?;
//!     let docs = vec![DocumentImage::from_path("page-001.png")?];
//!     let output = extract(&docs, &config).await?;
//!     for sample in &output.samples {
//!         println!("{}: {} regions", sample.doc_id, sample.detections.len());
//!     }
//!     eprintln!("tokens: {} prompt / {} completion",
//!         output.stats.total_prompt_tokens,
//!         output.stats.total_completion_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2regions` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! doc2regions = { version = "0.3", default-features = false }
//! ```
//!
//! ## Choosing a Run Mode
//!
//! | Mode | Entry point | Best for |
//! |------|-------------|----------|
//! | [`RunMode::Synchronous`] | [`extract`] / [`extract_sync`] | Await the whole batch in place |
//! | [`RunMode::Background`]  | [`spawn_extract`] | Long batches you poll, cancel, or join later |
//! | streaming | [`extract_stream`] | Consume samples as each document finishes |
//!
//! Whatever the mode, a document that fails after its retry budget never
//! takes the batch down: it yields an empty fallback sample (zero regions,
//! zero usage) with the failure recorded on it. Only a rejected credential
//! aborts the run.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod handle;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod sink;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractConfig, ExtractConfigBuilder, RunMode, DEFAULT_ASSET_ENDPOINT, DEFAULT_ENDPOINT,
    DEFAULT_MODEL,
};
pub use document::{DocumentImage, ImageSource};
pub use error::{Doc2RegionsError, DocFailure};
pub use handle::{spawn_extract, spawn_extract_with_sink, ExtractHandle, RunProgress};
pub use output::{
    BoundingBox, ExtractOutput, ExtractStats, RegionLabel, SampleResult, TextRegionDetection,
    TokenUsage,
};
pub use progress::{ExtractProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::{extract, extract_sync, extract_to_file, extract_with_sink};
pub use sink::{MemorySink, SampleSink, SinkError};
pub use stream::{extract_stream, SampleStream};
