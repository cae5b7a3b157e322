use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("either image data or a location must be provided")]
    MissingSource,
    #[error("image data and a location are mutually exclusive")]
    AmbiguousSource,
}

/// Where a location-backed artifact points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind<'a> {
    Url(&'a str),
    Path(&'a Path),
}

/// A single image, held in memory or referenced by location.
///
/// Caller-built artifacts carry exactly one source. Results returned by an
/// editor may be empty, which is how "no image produced" is reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArtifact {
    data: Option<Vec<u8>>,
    location: Option<String>,
    metadata: Metadata,
}

impl ImageArtifact {
    pub fn new(
        data: Option<Vec<u8>>,
        location: Option<String>,
        metadata: Metadata,
    ) -> Result<Self, ArtifactError> {
        let data = data.filter(|bytes| !bytes.is_empty());
        let location = location
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        match (&data, &location) {
            (None, None) => Err(ArtifactError::MissingSource),
            (Some(_), Some(_)) => Err(ArtifactError::AmbiguousSource),
            _ => Ok(Self {
                data,
                location,
                metadata,
            }),
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self, ArtifactError> {
        Self::new(Some(data.into()), None, Metadata::new())
    }

    pub fn from_location(location: impl Into<String>) -> Result<Self, ArtifactError> {
        Self::new(None, Some(location.into()), Metadata::new())
    }

    /// Result artifact holding whatever bytes the provider returned, possibly none.
    pub fn output(data: Vec<u8>, metadata: Metadata) -> Self {
        Self {
            data: Some(data),
            location: None,
            metadata,
        }
    }

    pub fn empty(metadata: Metadata) -> Self {
        Self::output(Vec::new(), metadata)
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn location_kind(&self) -> Option<LocationKind<'_>> {
        let location = self.location.as_deref()?;
        if is_remote_url(location) {
            return Some(LocationKind::Url(location));
        }
        Some(LocationKind::Path(Path::new(location)))
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// True when the artifact holds no bytes and no location.
    pub fn is_empty(&self) -> bool {
        self.data.as_ref().map(Vec::is_empty).unwrap_or(true) && self.location.is_none()
    }
}

pub fn is_remote_url(value: &str) -> bool {
    let lowered = value.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}
