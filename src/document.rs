//! Input documents: identify an image and pin down its pixel dimensions.
//!
//! The pipeline needs each image's width and height up front — the parser
//! normalizes pixel-space coordinates against them — so both constructors
//! probe dimensions at registration time by reading only the image header.
//! A file that cannot be identified fails here, before the batch starts,
//! rather than mid-run inside a worker.

use crate::error::Doc2RegionsError;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the image bytes come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Read from a file on disk at request-build time.
    Path(PathBuf),
    /// Supplied in memory by the caller.
    Bytes(Vec<u8>),
}

/// One document image submitted to the extraction pipeline.
///
/// Immutable once constructed; the pipeline only reads it. The `id` is how
/// results are attributed back to inputs, so it must be unique within a
/// batch — [`DocumentImage::from_path`] defaults it to the path itself.
#[derive(Debug, Clone)]
pub struct DocumentImage {
    /// Caller-facing identifier; carried through to the [`crate::output::SampleResult`].
    pub id: String,
    /// Image bytes or the path to read them from.
    pub source: ImageSource,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
}

impl DocumentImage {
    /// Register an image file, probing its pixel dimensions from the header.
    ///
    /// The document id defaults to the path string (override with
    /// [`DocumentImage::with_id`]).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Doc2RegionsError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(Doc2RegionsError::ImageNotFound { path });
        }

        let reader = image::ImageReader::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                Doc2RegionsError::PermissionDenied { path: path.clone() }
            }
            _ => Doc2RegionsError::ImageNotFound { path: path.clone() },
        })?;

        let (width, height) = reader
            .with_guessed_format()
            .map_err(|e| Doc2RegionsError::UnsupportedImage {
                path: path.clone(),
                detail: e.to_string(),
            })?
            .into_dimensions()
            .map_err(|e| Doc2RegionsError::UnsupportedImage {
                path: path.clone(),
                detail: e.to_string(),
            })?;

        debug!("Registered {} ({}x{})", path.display(), width, height);

        Ok(Self {
            id: path.to_string_lossy().into_owned(),
            source: ImageSource::Path(path),
            width,
            height,
        })
    }

    /// Register an in-memory image, probing dimensions from the byte header.
    pub fn from_bytes(id: impl Into<String>, bytes: Vec<u8>) -> Result<Self, Doc2RegionsError> {
        let id = id.into();

        let (width, height) = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| Doc2RegionsError::UnsupportedImage {
                path: PathBuf::from(&id),
                detail: e.to_string(),
            })?
            .into_dimensions()
            .map_err(|e| Doc2RegionsError::UnsupportedImage {
                path: PathBuf::from(&id),
                detail: e.to_string(),
            })?;

        Ok(Self {
            id,
            source: ImageSource::Bytes(bytes),
            width,
            height,
        })
    }

    /// Replace the default identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}
