//! Normalizes hosted-model run results into image bytes.

use std::fmt;
use std::io::{Cursor, Read};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use retouch_contracts::is_remote_url;
use serde_json::Value;

use crate::http::decode_data_uri;

/// Keys probed, in order, when a run returns a mapping.
pub const OUTPUT_MAP_KEYS: [&str; 4] = ["image", "images", "output", "result"];

/// The closed set of shapes a run result can take.
pub enum RunOutput {
    Stream(Box<dyn Read + Send>),
    Url(String),
    List(Vec<RunOutput>),
    Map(IndexMap<String, RunOutput>),
    Other(Value),
}

impl fmt::Debug for RunOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutput::Stream(_) => f.write_str("Stream(..)"),
            RunOutput::Url(url) => f.debug_tuple("Url").field(url).finish(),
            RunOutput::List(items) => f.debug_tuple("List").field(items).finish(),
            RunOutput::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            RunOutput::Other(value) => f.debug_tuple("Other").field(value).finish(),
        }
    }
}

impl RunOutput {
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        RunOutput::Stream(Box::new(Cursor::new(bytes.into())))
    }

    /// Maps a JSON run result onto the closed shape set.
    ///
    /// `data:` URIs are inline file content and become streams; other strings
    /// are only kept as URLs when they are `http(s)`.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => {
                if let Some(bytes) = decode_data_uri(&text) {
                    return RunOutput::bytes(bytes);
                }
                if is_remote_url(&text) {
                    return RunOutput::Url(text.trim().to_string());
                }
                RunOutput::Other(Value::String(text))
            }
            Value::Array(items) => {
                RunOutput::List(items.into_iter().map(Self::from_json).collect())
            }
            Value::Object(entries) => RunOutput::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
            other => RunOutput::Other(other),
        }
    }
}

/// Image bytes pulled out of a run result, plus the URL they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedImage {
    pub bytes: Vec<u8>,
    pub url: Option<String>,
}

impl ExtractedImage {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Walks `value` and returns the first non-empty image it yields.
///
/// Lists stop at the first item with bytes; maps follow the first present key
/// of [`OUTPUT_MAP_KEYS`]; unknown shapes yield nothing. Download failures are
/// errors, not empty results.
pub fn first_image_bytes(
    value: RunOutput,
    download: &dyn Fn(&str) -> Result<Vec<u8>>,
) -> Result<ExtractedImage> {
    match value {
        RunOutput::Stream(mut reader) => {
            let mut bytes = Vec::new();
            reader
                .read_to_end(&mut bytes)
                .context("failed reading run output stream")?;
            Ok(ExtractedImage { bytes, url: None })
        }
        RunOutput::Url(url) => {
            let bytes = download(&url)?;
            Ok(ExtractedImage {
                bytes,
                url: Some(url),
            })
        }
        RunOutput::List(items) => {
            for item in items {
                let extracted = first_image_bytes(item, download)?;
                if !extracted.is_empty() {
                    return Ok(extracted);
                }
            }
            Ok(ExtractedImage::default())
        }
        RunOutput::Map(mut entries) => {
            for key in OUTPUT_MAP_KEYS {
                if let Some(inner) = entries.shift_remove(key) {
                    return first_image_bytes(inner, download);
                }
            }
            Ok(ExtractedImage::default())
        }
        RunOutput::Other(_) => Ok(ExtractedImage::default()),
    }
}
