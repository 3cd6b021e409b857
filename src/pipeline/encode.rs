//! Image encoding: [`DocumentImage`] → base64 bytes wrapped in [`EncodedImage`].
//!
//! The parsing service accepts images either inline as a base64 data-URI or
//! as an uploaded asset referenced by id. PNG and JPEG inputs pass through
//! byte-for-byte; anything else is re-encoded as PNG, which is lossless and
//! keeps rendered text crisp for the parser. The inline-vs-upload decision
//! happens later, in the client, based on [`EncodedImage::inline_len`].

use crate::document::{DocumentImage, ImageSource};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Largest base64 payload the service accepts inline. Larger images go
/// through the asset-upload flow.
pub(crate) const MAX_INLINE_B64_LEN: usize = 180_000;

#[derive(Debug, Error)]
pub(crate) enum EncodeError {
    #[error("failed to read image file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode or re-encode image: {0}")]
    Image(#[from] image::ImageError),
}

/// An image ready for the wire: encoded file bytes plus their base64 form.
#[derive(Debug, Clone)]
pub(crate) struct EncodedImage {
    /// Encoded file bytes (PNG or pass-through JPEG/PNG). Uploaded raw when
    /// the image exceeds the inline limit.
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub base64: String,
}

impl EncodedImage {
    /// Inline payload size the service will see: the base64 string length.
    pub fn inline_len(&self) -> usize {
        self.base64.len()
    }

    pub fn fits_inline(&self) -> bool {
        self.inline_len() < MAX_INLINE_B64_LEN
    }

    /// `data:<mime>;base64,<payload>` URI for inline transport.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// Encode a document image for the service request.
///
/// PNG and JPEG bytes are kept as-is; other formats (BMP, TIFF, WebP, ...)
/// are decoded and re-encoded as PNG.
pub(crate) fn encode_document(doc: &DocumentImage) -> Result<EncodedImage, EncodeError> {
    let raw = match &doc.source {
        ImageSource::Path(path) => std::fs::read(path).map_err(|source| EncodeError::Read {
            path: path.display().to_string(),
            source,
        })?,
        ImageSource::Bytes(bytes) => bytes.clone(),
    };

    let (bytes, mime_type) = match image::guess_format(&raw) {
        Ok(image::ImageFormat::Png) => (raw, "image/png"),
        Ok(image::ImageFormat::Jpeg) => (raw, "image/jpeg"),
        _ => {
            let img = image::load_from_memory(&raw)?;
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
            (buf, "image/png")
        }
    };

    let base64 = STANDARD.encode(&bytes);
    debug!(
        "Encoded {} → {} bytes base64 ({})",
        doc.id,
        base64.len(),
        mime_type
    );

    Ok(EncodedImage {
        bytes,
        mime_type,
        base64,
    })
}
