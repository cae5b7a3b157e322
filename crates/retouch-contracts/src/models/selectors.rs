use super::registry::{Capability, CapabilityRegistry};
use crate::providers::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub provider: Provider,
    pub model: String,
    pub requested: Option<String>,
    pub supported: bool,
    pub note: Option<String>,
}

/// Resolves the model an editor binds to and whether it can edit images.
///
/// An unknown or non-edit model is still selected; `supported` records the
/// mismatch so the caller decides what to do with it.
pub struct ModelSelector<'a> {
    registry: &'a dyn CapabilityRegistry,
}

impl<'a> ModelSelector<'a> {
    pub fn new(registry: &'a dyn CapabilityRegistry) -> Self {
        Self { registry }
    }

    pub fn select(&self, provider: Provider, requested: Option<&str>) -> ModelSelection {
        let requested = requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let (model, mut note) = match requested.as_deref() {
            Some(model) => (model.to_string(), None),
            None => (
                provider.default_model().to_string(),
                Some("No model specified; using default.".to_string()),
            ),
        };
        let supported = self.registry.supports(&model, Capability::ImageEdit);
        if !supported {
            note = Some(format!(
                "Model '{model}' is not registered for capability '{}'.",
                Capability::ImageEdit
            ));
        }
        ModelSelection {
            provider,
            model,
            requested,
            supported,
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{ModelRegistry, ModelSpec};

    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::from_specs([
            ModelSpec {
                id: "edit-model".to_string(),
                provider: Provider::Replicate,
                display_name: None,
                capabilities: vec![Capability::ImageEdit],
            },
            ModelSpec {
                id: "gen-model".to_string(),
                provider: Provider::Replicate,
                display_name: None,
                capabilities: vec![Capability::ImageGeneration],
            },
        ])
    }

    #[test]
    fn requested_edit_model_is_supported() {
        let registry = registry();
        let selection =
            ModelSelector::new(&registry).select(Provider::Replicate, Some("edit-model"));
        assert_eq!(selection.model, "edit-model");
        assert_eq!(selection.requested.as_deref(), Some("edit-model"));
        assert!(selection.supported);
        assert_eq!(selection.note, None);
    }

    #[test]
    fn generation_only_model_is_flagged_not_replaced() {
        let registry = registry();
        let selection =
            ModelSelector::new(&registry).select(Provider::Replicate, Some("gen-model"));
        assert_eq!(selection.model, "gen-model");
        assert!(!selection.supported);
        assert_eq!(
            selection.note.as_deref(),
            Some("Model 'gen-model' is not registered for capability 'image_edit'.")
        );
    }

    #[test]
    fn missing_request_falls_back_to_provider_default() {
        let registry = ModelRegistry::default();
        let selection = ModelSelector::new(&registry).select(Provider::OpenAi, Some("  "));
        assert_eq!(selection.model, "gpt-image-1");
        assert_eq!(selection.requested, None);
        assert!(selection.supported);
        assert_eq!(
            selection.note.as_deref(),
            Some("No model specified; using default.")
        );
    }
}
