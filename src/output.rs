//! Output types: detections, token usage, per-document results, batch stats.
//!
//! Everything here is `Serialize + Deserialize` so a whole run can be dumped
//! as JSON (the CLI's `--json` mode) or stored by the host application.
//! [`SampleResult`] is the unit of the alignment guarantee: the orchestrator
//! produces exactly one per submitted [`crate::DocumentImage`], successful or
//! not, and never mutates one after creation.

use crate::error::DocFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Class label of a detected text region.
///
/// The known variants cover the parsing service's layout taxonomy; anything
/// the service emits outside that set is preserved verbatim in
/// [`RegionLabel::Other`] rather than dropped, so downstream consumers see
/// the full taxonomy even when it grows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegionLabel {
    /// Document title.
    Title,
    /// Running body text.
    Text,
    /// Section heading.
    SectionHeader,
    /// List item.
    ListItem,
    /// Table region.
    Table,
    /// Figure or other raster content.
    Picture,
    /// Figure/table caption.
    Caption,
    /// Footnote.
    Footnote,
    /// Mathematical formula.
    Formula,
    /// Page header.
    PageHeader,
    /// Page footer.
    PageFooter,
    /// Any label outside the known taxonomy, kept as the service spelled it.
    Other(String),
}

impl RegionLabel {
    /// Map a service label string onto the taxonomy.
    pub fn from_service(label: &str) -> Self {
        match label {
            "Title" => RegionLabel::Title,
            "Text" => RegionLabel::Text,
            "Section-header" => RegionLabel::SectionHeader,
            "List-item" => RegionLabel::ListItem,
            "Table" => RegionLabel::Table,
            "Picture" => RegionLabel::Picture,
            "Caption" => RegionLabel::Caption,
            "Footnote" => RegionLabel::Footnote,
            "Formula" => RegionLabel::Formula,
            "Page-header" => RegionLabel::PageHeader,
            "Page-footer" => RegionLabel::PageFooter,
            other => RegionLabel::Other(other.to_string()),
        }
    }

    /// The service's spelling of this label.
    pub fn as_str(&self) -> &str {
        match self {
            RegionLabel::Title => "Title",
            RegionLabel::Text => "Text",
            RegionLabel::SectionHeader => "Section-header",
            RegionLabel::ListItem => "List-item",
            RegionLabel::Table => "Table",
            RegionLabel::Picture => "Picture",
            RegionLabel::Caption => "Caption",
            RegionLabel::Footnote => "Footnote",
            RegionLabel::Formula => "Formula",
            RegionLabel::PageHeader => "Page-header",
            RegionLabel::PageFooter => "Page-footer",
            RegionLabel::Other(s) => s,
        }
    }
}

impl fmt::Display for RegionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RegionLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RegionLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RegionLabel::from_service(&s))
    }
}

/// A rectangle in normalized image coordinates.
///
/// All four fields are fractions of the image dimensions. The constructor
/// clamps into the unit square, so for every value produced by this crate:
/// `0 ≤ x`, `0 ≤ y`, `x + width ≤ 1`, `y + height ≤ 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Build from corner coordinates already scaled to [0,1].
    ///
    /// Out-of-range corners are clamped rather than rejected; an inverted
    /// quad collapses to zero width/height instead of going negative.
    pub fn from_corners(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        let x0 = xmin.clamp(0.0, 1.0);
        let y0 = ymin.clamp(0.0, 1.0);
        let x1 = xmax.clamp(0.0, 1.0);
        let y1 = ymax.clamp(0.0, 1.0);
        Self {
            x: x0,
            y: y0,
            width: (x1 - x0).max(0.0),
            height: (y1 - y0).max(0.0),
        }
    }

    /// True when the box lies inside the unit square (with float tolerance).
    pub fn in_unit_square(&self) -> bool {
        const EPS: f64 = 1e-9;
        self.x >= -EPS
            && self.y >= -EPS
            && self.width >= -EPS
            && self.height >= -EPS
            && self.x + self.width <= 1.0 + EPS
            && self.y + self.height <= 1.0 + EPS
    }
}

/// A single detected text region: class, location, transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegionDetection {
    /// Layout class assigned by the service.
    pub label: RegionLabel,
    /// Region location in normalized coordinates.
    pub bounding_box: BoundingBox,
    /// Transcribed text, possibly empty (e.g. for Picture regions).
    pub text: String,
}

/// Token counts consumed by one service call.
///
/// Advisory cost accounting, not required for correctness: a response
/// without a usage block yields [`TokenUsage::zero`], as does every
/// fallback result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// All three counters at zero — the fallback value.
    pub const fn zero() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

/// The result for one document — exactly one exists per submitted image.
///
/// On success `detections` holds the service's regions in reading order and
/// `failure` is `None`. On a contained failure `detections` is empty, `usage`
/// is zero, and `failure` records what went wrong. Either way the result is
/// final: nothing mutates it after the pipeline returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleResult {
    /// Identifier of the originating [`crate::DocumentImage`].
    pub doc_id: String,
    /// Detected regions in the service's reading order.
    pub detections: Vec<TextRegionDetection>,
    /// Token counts for the call that produced `detections`.
    pub usage: TokenUsage,
    /// Wall-clock time spent on this document, including retries and backoff.
    pub duration_ms: u64,
    /// Retries performed before success or exhaustion.
    pub retries: u8,
    /// The contained failure, if this is a fallback result.
    pub failure: Option<DocFailure>,
}

impl SampleResult {
    /// True when this result is the empty fallback for a failed document.
    pub fn is_fallback(&self) -> bool {
        self.failure.is_some()
    }
}

/// Aggregate statistics for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Documents submitted to the run.
    pub total_documents: usize,
    /// Documents whose service call and parse succeeded.
    pub extracted_documents: usize,
    /// Documents that fell back to the empty result.
    pub fallback_documents: usize,
    /// Results produced but rejected by the sink.
    pub persist_failed: usize,
    /// Sum of prompt tokens across all successful calls.
    pub total_prompt_tokens: u64,
    /// Sum of completion tokens across all successful calls.
    pub total_completion_tokens: u64,
    /// Sum of the service-reported totals.
    pub total_tokens: u64,
    /// Wall-clock duration of the whole run.
    pub total_duration_ms: u64,
}

/// Everything a completed run returns: per-document results plus stats.
///
/// `samples` is in input order regardless of completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractOutput {
    pub samples: Vec<SampleResult>,
    pub stats: ExtractStats,
}
