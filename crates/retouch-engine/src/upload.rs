//! Turns an [`ImageArtifact`] into a value a provider request can carry.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use retouch_contracts::{ArtifactError, ImageArtifact, LocationKind};

use crate::http::{data_uri, mime_for_path};

/// Name given to in-memory uploads so transports can infer a MIME type.
pub const SYNTHETIC_FILE_NAME: &str = "image.png";

/// One use of an image in a request. Built fresh per request; reading consumes it.
pub enum ImageValue {
    Url(String),
    File { file: File, path: PathBuf },
    Bytes { reader: Cursor<Vec<u8>>, file_name: String },
}

impl fmt::Debug for ImageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageValue::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ImageValue::File { path, .. } => f.debug_struct("File").field("path", path).finish(),
            ImageValue::Bytes { reader, file_name } => f
                .debug_struct("Bytes")
                .field("len", &reader.get_ref().len())
                .field("file_name", file_name)
                .finish(),
        }
    }
}

impl ImageValue {
    pub fn file_name(&self) -> Option<String> {
        match self {
            ImageValue::Url(_) => None,
            ImageValue::File { path, .. } => Some(
                path.file_name()
                    .and_then(|value| value.to_str())
                    .unwrap_or(SYNTHETIC_FILE_NAME)
                    .to_string(),
            ),
            ImageValue::Bytes { file_name, .. } => Some(file_name.clone()),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        let name = match self {
            ImageValue::Url(url) => url.as_str(),
            ImageValue::File { path, .. } => path.to_str().unwrap_or_default(),
            ImageValue::Bytes { file_name, .. } => file_name.as_str(),
        };
        mime_for_path(Path::new(name)).unwrap_or("image/png")
    }

    /// Reads the full image; URLs yield `None` since they are passed by reference.
    pub fn read_bytes(self) -> Result<Option<Vec<u8>>> {
        match self {
            ImageValue::Url(_) => Ok(None),
            ImageValue::File { mut file, path } => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)
                    .with_context(|| format!("failed reading {}", path.display()))?;
                Ok(Some(bytes))
            }
            ImageValue::Bytes { mut reader, .. } => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
        }
    }

    /// URL string as-is, anything else inlined as a base64 data URI.
    pub fn into_request_string(self) -> Result<String> {
        let mime = self.mime_type();
        match self {
            ImageValue::Url(url) => Ok(url),
            other => {
                let bytes = other.read_bytes()?.unwrap_or_default();
                Ok(data_uri(sniff_mime(&bytes).unwrap_or(mime), &bytes))
            }
        }
    }
}

/// MIME type from the leading magic bytes, when they name a known image format.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// Prepares the request value for `image` without touching the artifact.
///
/// Remote URLs pass through, local paths are opened, bytes are wrapped in a
/// cursor named [`SYNTHETIC_FILE_NAME`]. An artifact with neither fails with
/// [`ArtifactError::MissingSource`].
pub fn prepare_image_value(image: &ImageArtifact) -> Result<ImageValue> {
    match image.location_kind() {
        Some(LocationKind::Url(url)) => Ok(ImageValue::Url(url.to_string())),
        Some(LocationKind::Path(path)) => {
            let file =
                File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
            Ok(ImageValue::File {
                file,
                path: path.to_path_buf(),
            })
        }
        None => {
            let bytes = image
                .data()
                .filter(|bytes| !bytes.is_empty())
                .ok_or(ArtifactError::MissingSource)?;
            Ok(ImageValue::Bytes {
                reader: Cursor::new(bytes.to_vec()),
                file_name: SYNTHETIC_FILE_NAME.to_string(),
            })
        }
    }
}
