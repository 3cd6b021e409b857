//! Response parsing: raw service body → ordered region detections.
//!
//! The service answers a chat-completions request whose regions ride inside
//! a tool call: `choices[0].message.tool_calls[0].function.arguments` holds
//! a JSON *string*, which itself decodes to a list of region elements
//! (usually wrapped in one extra array level). Each element carries a type
//! label, the recognised text, and a corner-format bounding box.
//!
//! Deployments differ in small ways, so the decoder is tolerant where the
//! variation is known: arguments may appear under `message.content` when the
//! tool selector is ignored, bboxes may be corner objects or four-element
//! arrays, and coordinates may be normalized or in pixel units. A body that
//! matches none of the known shapes is a parse failure; the caller turns
//! that into an empty fallback sample.

use crate::output::{BoundingBox, RegionLabel, TextRegionDetection, TokenUsage};
use serde_json::Value;
use thiserror::Error;

use super::usage;

#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response shape: {0}")]
    Shape(&'static str),
}

/// Fully decoded response: regions in service order plus token usage.
#[derive(Debug)]
pub(crate) struct ParsedResponse {
    pub regions: Vec<TextRegionDetection>,
    pub usage: TokenUsage,
}

/// Decode a raw response body.
///
/// `width` and `height` are the source image dimensions, used to normalize
/// pixel-space coordinates. Region order follows the response; an empty
/// region list is a valid result, not an error.
pub(crate) fn parse_body(
    body: &str,
    width: u32,
    height: u32,
) -> Result<ParsedResponse, DecodeError> {
    let root: Value = serde_json::from_str(body)?;
    let usage = usage::extract_usage(&root);
    let regions = decode_regions(&root, width, height)?;
    Ok(ParsedResponse { regions, usage })
}

fn decode_regions(
    root: &Value,
    width: u32,
    height: u32,
) -> Result<Vec<TextRegionDetection>, DecodeError> {
    let arguments = tool_arguments(root)?;
    element_list(&arguments)?
        .iter()
        .map(|elem| decode_element(elem, width, height))
        .collect()
}

/// Locate and decode the tool-call arguments payload.
fn tool_arguments(root: &Value) -> Result<Value, DecodeError> {
    let message = root
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or(DecodeError::Shape("missing choices[0].message"))?;

    let raw = message
        .get("tool_calls")
        .and_then(|t| t.get(0))
        .and_then(|t| t.get("function"))
        .and_then(|f| f.get("arguments"))
        .or_else(|| message.get("content"))
        .ok_or(DecodeError::Shape(
            "missing tool_calls[0].function.arguments",
        ))?;

    match raw {
        Value::String(s) => Ok(serde_json::from_str(s)?),
        other => Ok(other.clone()),
    }
}

/// Unwrap the region list from the decoded arguments.
///
/// Canonical form is `[[e1, e2, ...]]`; some responses skip the outer
/// wrapper and send `[e1, e2, ...]` directly.
fn element_list(arguments: &Value) -> Result<Vec<Value>, DecodeError> {
    let outer = arguments
        .as_array()
        .ok_or(DecodeError::Shape("tool arguments are not an array"))?;

    match outer.first() {
        None => Ok(Vec::new()),
        Some(Value::Array(inner)) => Ok(inner.clone()),
        Some(Value::Object(_)) => Ok(outer.clone()),
        Some(_) => Err(DecodeError::Shape("region elements have unexpected type")),
    }
}

fn decode_element(
    elem: &Value,
    width: u32,
    height: u32,
) -> Result<TextRegionDetection, DecodeError> {
    let label = elem
        .get("type")
        .or_else(|| elem.get("label"))
        .or_else(|| elem.get("class"))
        .and_then(Value::as_str)
        .ok_or(DecodeError::Shape("element missing 'type' label"))?;

    let text = elem
        .get("text")
        .or_else(|| elem.get("content"))
        .and_then(Value::as_str)
        .ok_or(DecodeError::Shape("element missing 'text'"))?;

    let bbox = elem
        .get("bbox")
        .ok_or(DecodeError::Shape("element missing 'bbox'"))?;
    let (x0, y0, x1, y1) = corners(bbox)?;
    let (x0, y0, x1, y1) = normalize(x0, y0, x1, y1, width, height);

    Ok(TextRegionDetection {
        label: RegionLabel::from_service(label),
        bounding_box: BoundingBox::from_corners(x0, y0, x1, y1),
        text: text.to_string(),
    })
}

/// A single coordinate: a JSON number, or a numeric string.
fn coord(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Corner quad from either `{xmin, ymin, xmax, ymax}` or `[x0, y0, x1, y1]`.
fn corners(bbox: &Value) -> Result<(f64, f64, f64, f64), DecodeError> {
    if let Some(obj) = bbox.as_object() {
        let get = |key: &str| obj.get(key).and_then(coord);
        return match (get("xmin"), get("ymin"), get("xmax"), get("ymax")) {
            (Some(x0), Some(y0), Some(x1), Some(y1)) => Ok((x0, y0, x1, y1)),
            _ => Err(DecodeError::Shape("bbox object missing xmin/ymin/xmax/ymax")),
        };
    }

    if let Some(arr) = bbox.as_array() {
        if arr.len() == 4 {
            if let (Some(x0), Some(y0), Some(x1), Some(y1)) =
                (coord(&arr[0]), coord(&arr[1]), coord(&arr[2]), coord(&arr[3]))
            {
                return Ok((x0, y0, x1, y1));
            }
        }
        return Err(DecodeError::Shape("bbox array must hold four numbers"));
    }

    Err(DecodeError::Shape("bbox is neither object nor array"))
}

/// Corners arrive either normalized to `[0, 1]` or in pixel units. Any
/// corner beyond 1.5 marks the quad as pixel-space and it is divided
/// through by the image dimensions. The 1.5 cutoff tolerates slightly
/// out-of-range normalized output without misreading it as a tiny pixel box.
fn normalize(x0: f64, y0: f64, x1: f64, y1: f64, width: u32, height: u32) -> (f64, f64, f64, f64) {
    let pixel_space = [x0, y0, x1, y1].iter().any(|c| *c > 1.5);
    if !pixel_space || width == 0 || height == 0 {
        return (x0, y0, x1, y1);
    }
    let w = width as f64;
    let h = height as f64;
    (x0 / w, y0 / h, x1 / w, y1 / h)
}
