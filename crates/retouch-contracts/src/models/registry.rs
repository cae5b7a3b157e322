use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::providers::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ImageGeneration,
    ImageEdit,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ImageGeneration => "image_generation",
            Capability::ImageEdit => "image_edit",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: Provider,
    pub display_name: Option<String>,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Lookup of which models a provider offers for a capability.
pub trait CapabilityRegistry: Send + Sync {
    /// Models in registration order, optionally narrowed by provider and capability.
    fn list_models(
        &self,
        provider: Option<Provider>,
        capability: Option<Capability>,
    ) -> Vec<ModelSpec>;

    fn supports(&self, model: &str, capability: Capability) -> bool;

    /// Providers with at least one model for `capability`, sorted by id.
    fn providers_with(&self, capability: Capability) -> Vec<Provider> {
        let mut providers = self
            .list_models(None, Some(capability))
            .into_iter()
            .map(|model| model.provider)
            .collect::<Vec<Provider>>();
        providers.sort_by_key(|provider| provider.as_str());
        providers.dedup();
        providers
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn from_specs(specs: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: specs
                .into_iter()
                .map(|spec| (spec.id.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }
}

impl CapabilityRegistry for ModelRegistry {
    fn list_models(
        &self,
        provider: Option<Provider>,
        capability: Option<Capability>,
    ) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| provider.map(|wanted| model.provider == wanted).unwrap_or(true))
            .filter(|model| capability.map(|wanted| model.supports(wanted)).unwrap_or(true))
            .cloned()
            .collect()
    }

    fn supports(&self, model: &str, capability: Capability) -> bool {
        self.get(model)
            .map(|spec| spec.supports(capability))
            .unwrap_or(false)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    use Capability::{ImageEdit, ImageGeneration};

    let mut map = IndexMap::new();

    let mut insert =
        |id: &str, provider: Provider, display_name: &str, capabilities: &[Capability]| {
            map.insert(
                id.to_string(),
                ModelSpec {
                    id: id.to_string(),
                    provider,
                    display_name: Some(display_name.to_string()),
                    capabilities: capabilities.to_vec(),
                },
            );
        };

    insert(
        "gemini-2.0-flash-preview-image-generation",
        Provider::Google,
        "Gemini 2.0 Flash Preview (image generation)",
        &[ImageEdit, ImageGeneration],
    );
    insert(
        "gemini-2.0-flash-exp-image-generation",
        Provider::Google,
        "Gemini 2.0 Flash Experimental (image generation)",
        &[ImageEdit, ImageGeneration],
    );
    insert(
        "gemini-2.0-flash-exp",
        Provider::Google,
        "Gemini 2.0 Flash Experimental",
        &[ImageEdit, ImageGeneration],
    );
    insert(
        "gpt-image-1",
        Provider::OpenAi,
        "GPT Image 1",
        &[ImageEdit, ImageGeneration],
    );
    insert(
        "dall-e-2",
        Provider::OpenAi,
        "DALL-E 2",
        &[ImageEdit, ImageGeneration],
    );
    insert("dall-e-3", Provider::OpenAi, "DALL-E 3", &[ImageGeneration]);
    insert(
        "black-forest-labs/flux-kontext-pro",
        Provider::Replicate,
        "FLUX.1 Kontext [pro]",
        &[ImageEdit],
    );
    insert(
        "black-forest-labs/flux-kontext-max",
        Provider::Replicate,
        "FLUX.1 Kontext [max]",
        &[ImageEdit],
    );
    insert(
        "qwen/qwen-image-edit",
        Provider::Replicate,
        "Qwen Image Edit",
        &[ImageEdit],
    );
    // generation-only; kept so edit lookups can flag it
    insert(
        "qwen/qwen-image",
        Provider::Replicate,
        "Qwen Image",
        &[ImageGeneration],
    );

    map
}
