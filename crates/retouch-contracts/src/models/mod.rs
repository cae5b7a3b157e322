mod registry;
mod selectors;

pub use registry::{Capability, CapabilityRegistry, ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provider;

    #[test]
    fn default_registry_lists_edit_models_in_order() {
        let registry = ModelRegistry::default();
        let ids = registry
            .list_models(Some(Provider::Replicate), Some(Capability::ImageEdit))
            .into_iter()
            .map(|model| model.id)
            .collect::<Vec<String>>();
        assert_eq!(
            ids,
            vec![
                "black-forest-labs/flux-kontext-pro",
                "black-forest-labs/flux-kontext-max",
                "qwen/qwen-image-edit",
            ]
        );
    }

    #[test]
    fn supports_checks_capability_and_membership() {
        let registry = ModelRegistry::default();
        assert!(registry.supports("gpt-image-1", Capability::ImageEdit));
        assert!(!registry.supports("dall-e-3", Capability::ImageEdit));
        assert!(!registry.supports("qwen/qwen-image", Capability::ImageEdit));
        assert!(!registry.supports("not-a-model", Capability::ImageEdit));
    }

    #[test]
    fn every_provider_default_is_an_edit_model() {
        let registry = ModelRegistry::default();
        for provider in Provider::ALL {
            assert!(
                registry.supports(provider.default_model(), Capability::ImageEdit),
                "{provider} default should support image edits"
            );
        }
        assert_eq!(
            registry.providers_with(Capability::ImageEdit),
            vec![Provider::Google, Provider::OpenAi, Provider::Replicate]
        );
    }

    #[test]
    fn unfiltered_listing_includes_generation_only_models() {
        let registry = ModelRegistry::default();
        let all = registry.list_models(None, None);
        assert_eq!(all.len(), registry.list().count());
        assert!(all.iter().any(|model| model.id == "dall-e-3"));
        assert_eq!(
            registry.get("gpt-image-1").map(ModelSpec::label),
            Some("GPT Image 1")
        );
    }
}
