mod google;
mod openai;
mod replicate;

pub use google::{GeminiHttpTransport, GenerateContentTransport, GoogleImageEditor, GEMINI_API_BASE};
pub use openai::{
    ImageEditRequest, ImageEditTransport, OpenAiHttpTransport, OpenAiImageEditor,
    DEFAULT_EDIT_SIZE, OPENAI_API_BASE,
};
pub use replicate::{
    candidate_input_keys, PredictionTransport, ReplicateHttpTransport, ReplicateImageEditor,
    RunInput, DEFAULT_OUTPUT_FORMAT, FALLBACK_INPUT_KEYS, REPLICATE_API_BASE,
};

use retouch_contracts::{
    ArtifactError, CapabilityRegistry, ImageArtifact, Metadata, ModelSelection, ModelSelector,
    Provider,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{EditError, EditOptions, EditorConfig, UnsupportedModelPolicy};

pub(crate) fn select_model(
    provider: Provider,
    config: &EditorConfig,
    registry: &dyn CapabilityRegistry,
) -> Result<ModelSelection, EditError> {
    let selection = ModelSelector::new(registry).select(provider, config.model.as_deref());
    if let Some(note) = selection.note.as_deref() {
        debug!(
            provider = %provider,
            requested = ?selection.requested,
            model = %selection.model,
            "{note}"
        );
    }
    if !selection.supported {
        if config.unsupported_model == UnsupportedModelPolicy::Reject {
            return Err(EditError::UnsupportedModel {
                provider,
                model: selection.model,
            });
        }
        warn!(
            provider = %provider,
            model = %selection.model,
            "model is not registered for image edits; continuing"
        );
    }
    Ok(selection)
}

pub(crate) fn model_metadata(model: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("model".to_string(), Value::String(model.to_string()));
    metadata
}

pub(crate) fn option_str<'a>(options: &'a EditOptions, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Refuses artifacts that carry neither bytes nor a location.
pub(crate) fn require_source(image: &ImageArtifact) -> Result<(), EditError> {
    if image.is_empty() {
        return Err(ArtifactError::MissingSource.into());
    }
    Ok(())
}

/// Classifies a failure to turn an artifact into a request value.
pub(crate) fn prepare_error(provider: Provider, err: anyhow::Error) -> EditError {
    match err.downcast::<ArtifactError>() {
        Ok(artifact) => EditError::InvalidArtifact(artifact),
        Err(err) => EditError::UnsupportedInput {
            provider,
            reason: format!("{err:#}"),
        },
    }
}
