//! Request construction: chat-completions body for one document image.
//!
//! The service takes an OpenAI-style chat request with a single user message
//! whose content is the image, plus a fixed tool selector that switches the
//! model into bbox-annotated output mode. Small images are embedded as a
//! base64 data-URI; large ones reference a previously uploaded asset by id.

use super::encode::EncodedImage;
use serde_json::{json, Value};

/// Tool selector the service expects for region output with bounding boxes.
pub(crate) const TOOL_NAME: &str = "markdown_bbox";

/// How the image travels in the request body.
#[derive(Debug, Clone)]
pub(crate) enum ImageTransport {
    /// Base64 data-URI embedded in the message content.
    Inline,
    /// Reference to an asset uploaded ahead of the call.
    Asset { asset_id: String },
}

/// Build the JSON body for the extraction call.
pub(crate) fn build_body(model: &str, image: &EncodedImage, transport: &ImageTransport) -> Value {
    let url = match transport {
        ImageTransport::Inline => image.data_uri(),
        ImageTransport::Asset { asset_id } => {
            format!("data:{};asset_id,{}", image.mime_type, asset_id)
        }
    };

    json!({
        "tools": [{
            "type": "function",
            "function": { "name": TOOL_NAME }
        }],
        "model": model,
        "messages": [{
            "role": "user",
            "content": [{
                "type": "image_url",
                "image_url": { "url": url }
            }]
        }]
    })
}
