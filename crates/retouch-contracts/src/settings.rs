use std::collections::BTreeMap;
use std::env;
use std::fmt;

use thiserror::Error;

use crate::providers::Provider;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{provider} credentials missing: set {}", .env_keys.join(" or "))]
    MissingCredential {
        provider: Provider,
        env_keys: Vec<&'static str>,
    },
}

/// Source of per-provider credentials and endpoint overrides.
pub trait CredentialStore: Send + Sync {
    fn credential(&self, provider: Provider) -> Result<String, ConfigError>;

    fn api_base(&self, provider: Provider) -> Option<String>;

    fn validate_for_provider(&self, provider: Provider) -> Result<(), ConfigError> {
        self.credential(provider).map(|_| ())
    }
}

pub fn credential_env_keys(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Google => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        Provider::OpenAi => &["OPENAI_API_KEY"],
        Provider::Replicate => &["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"],
    }
}

pub fn api_base_env_key(provider: Provider) -> &'static str {
    match provider {
        Provider::Google => "GEMINI_API_BASE",
        Provider::OpenAi => "OPENAI_API_BASE",
        Provider::Replicate => "REPLICATE_API_BASE",
    }
}

#[derive(Clone, Default)]
pub struct Settings {
    credentials: BTreeMap<Provider, String>,
    api_bases: BTreeMap<Provider, String>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configured = self.credentials.keys().collect::<Vec<&Provider>>();
        f.debug_struct("Settings")
            .field("credentials", &configured)
            .field("api_bases", &self.api_bases)
            .finish()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup, trying each provider's keys in order.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut settings = Self::default();
        for provider in Provider::ALL {
            if let Some(value) = credential_env_keys(provider)
                .iter()
                .find_map(|key| non_empty(*key))
            {
                settings.credentials.insert(provider, value);
            }
            if let Some(base) = non_empty(api_base_env_key(provider)) {
                settings
                    .api_bases
                    .insert(provider, base.trim_end_matches('/').to_string());
            }
        }
        settings
    }

    pub fn with_credential(mut self, provider: Provider, value: impl Into<String>) -> Self {
        self.credentials.insert(provider, value.into());
        self
    }

    pub fn with_api_base(mut self, provider: Provider, base: impl Into<String>) -> Self {
        let base = base.into();
        self.api_bases
            .insert(provider, base.trim_end_matches('/').to_string());
        self
    }
}

impl CredentialStore for Settings {
    fn credential(&self, provider: Provider) -> Result<String, ConfigError> {
        self.credentials
            .get(&provider)
            .cloned()
            .ok_or_else(|| ConfigError::MissingCredential {
                provider,
                env_keys: credential_env_keys(provider).to_vec(),
            })
    }

    fn api_base(&self, provider: Provider) -> Option<String> {
        self.api_bases.get(&provider).cloned()
    }
}
