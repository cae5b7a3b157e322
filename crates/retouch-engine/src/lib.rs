use std::sync::Arc;

use async_trait::async_trait;
use retouch_contracts::{
    CapabilityRegistry, CredentialStore, ImageArtifact, ModelRegistry, Provider, Settings,
};
use serde_json::{Map, Value};
use tracing::info;

pub mod error;
mod http;
pub mod output;
pub mod providers;
pub mod upload;

pub use error::{BoxError, EditError};
pub use output::{first_image_bytes, ExtractedImage, RunOutput};
pub use providers::{GoogleImageEditor, OpenAiImageEditor, ReplicateImageEditor};
pub use upload::{prepare_image_value, ImageValue};

/// Provider-specific extras for one edit call.
pub type EditOptions = Map<String, Value>;

/// What an editor does when its model is not registered for image edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsupportedModelPolicy {
    /// Build anyway and report `is_supported() == false`.
    #[default]
    Flag,
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorConfig {
    pub model: Option<String>,
    pub unsupported_model: UnsupportedModelPolicy,
    /// Overrides both the credential store's base URL and the provider default.
    pub api_base: Option<String>,
}

impl EditorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_policy(mut self, policy: UnsupportedModelPolicy) -> Self {
        self.unsupported_model = policy;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }
}

/// Collaborators every editor is built from.
#[derive(Clone)]
pub struct EditorContext {
    pub credentials: Arc<dyn CredentialStore>,
    pub registry: Arc<dyn CapabilityRegistry>,
}

impl EditorContext {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        registry: Arc<dyn CapabilityRegistry>,
    ) -> Self {
        Self {
            credentials,
            registry,
        }
    }

    /// Environment credentials with the built-in model registry.
    pub fn from_env() -> Self {
        Self::new(Arc::new(Settings::from_env()), Arc::new(ModelRegistry::default()))
    }
}

#[async_trait]
pub trait ImageEditor: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    fn is_supported(&self) -> bool;

    /// Applies `prompt` to `image`. A response without an image is an empty
    /// artifact, not an error.
    async fn edit_image(
        &self,
        prompt: &str,
        image: &ImageArtifact,
        options: EditOptions,
    ) -> Result<ImageArtifact, EditError>;
}

pub fn supported_providers() -> Vec<Provider> {
    Provider::ALL.to_vec()
}

/// Builds a fresh editor for `provider`.
///
/// The provider name is resolved before any credential is looked at, and the
/// credential store is validated once for the resolved provider.
pub fn create_image_editor(
    provider: impl AsRef<str>,
    config: EditorConfig,
    context: &EditorContext,
) -> Result<Box<dyn ImageEditor>, EditError> {
    let provider = provider.as_ref().parse::<Provider>()?;
    context.credentials.validate_for_provider(provider)?;

    let editor: Box<dyn ImageEditor> = match provider {
        Provider::Google => Box::new(GoogleImageEditor::new(&config, context)?),
        Provider::OpenAi => Box::new(OpenAiImageEditor::new(&config, context)?),
        Provider::Replicate => Box::new(ReplicateImageEditor::new(&config, context)?),
    };
    info!(
        provider = %provider,
        model = %editor.model(),
        supported = editor.is_supported(),
        "image editor ready"
    );
    Ok(editor)
}
