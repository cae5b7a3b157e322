use retouch_contracts::{ArtifactError, ConfigError, Provider, UnsupportedProvider};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    UnsupportedProvider(#[from] UnsupportedProvider),

    #[error("model '{model}' is not registered for image edits on {provider}")]
    UnsupportedModel { provider: Provider, model: String },

    #[error(transparent)]
    InvalidArtifact(#[from] ArtifactError),

    #[error("{provider} cannot use this image: {reason}")]
    UnsupportedInput { provider: Provider, reason: String },

    #[error("{provider} request failed: {source}")]
    ProviderCall {
        provider: Provider,
        #[source]
        source: BoxError,
    },

    #[error("{provider} worker did not complete: {source}")]
    Worker {
        provider: Provider,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl EditError {
    pub(crate) fn provider_call(provider: Provider, err: anyhow::Error) -> Self {
        Self::ProviderCall {
            provider,
            source: err.into(),
        }
    }
}
