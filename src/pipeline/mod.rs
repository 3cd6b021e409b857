//! Pipeline stages for document-to-regions extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. point the client at a mock server) without
//! touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ encode ──▶ request ──▶ client ──▶ parse ──▶ sample
//! (path/bytes) (base64)   (JSON body)  (HTTP)    (regions)  (assemble)
//! ```
//!
//! 1. [`encode`]  — load the image and produce base64 bytes plus a MIME type
//! 2. [`request`] — build the chat-completions body carrying the image inline
//!    or as an uploaded-asset reference
//! 3. [`client`]  — drive the HTTP call with retry/backoff; the only stage
//!    with network I/O
//! 4. [`parse`]   — decode detected regions and token usage from the raw
//!    response body
//! 5. [`sample`]  — per-document orchestration; converts any stage failure
//!    into an empty fallback sample

pub mod client;
pub mod encode;
pub mod parse;
pub mod request;
pub mod sample;
pub mod usage;
