use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported provider: {value}")]
pub struct UnsupportedProvider {
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    OpenAi,
    Replicate,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Google, Provider::OpenAi, Provider::Replicate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::OpenAi => "openai",
            Provider::Replicate => "replicate",
        }
    }

    /// Model used when the caller does not pick one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Google => "gemini-2.0-flash-preview-image-generation",
            Provider::OpenAi => "gpt-image-1",
            Provider::Replicate => "black-forest-labs/flux-kontext-pro",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Google => "Google Gemini",
            Provider::OpenAi => "OpenAI",
            Provider::Replicate => "Replicate",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Provider {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Provider {
    type Err = UnsupportedProvider;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .ok_or_else(|| UnsupportedProvider {
                value: raw.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{Provider, UnsupportedProvider};

    #[test]
    fn parses_known_providers_loosely() {
        assert_eq!("google".parse::<Provider>(), Ok(Provider::Google));
        assert_eq!(" OpenAI ".parse::<Provider>(), Ok(Provider::OpenAi));
        assert_eq!("replicate".parse::<Provider>(), Ok(Provider::Replicate));
    }

    #[test]
    fn unknown_provider_names_the_offending_value() {
        let err = "midjourney".parse::<Provider>().err();
        assert_eq!(
            err,
            Some(UnsupportedProvider {
                value: "midjourney".to_string()
            })
        );
        assert_eq!(
            err.map(|err| err.to_string()).unwrap_or_default(),
            "unsupported provider: midjourney"
        );
    }

    #[test]
    fn string_forms_round_trip_through_serde() -> anyhow::Result<()> {
        for provider in Provider::ALL {
            let encoded = serde_json::to_string(&provider)?;
            assert_eq!(encoded, format!("\"{}\"", provider.as_str()));
            assert_eq!(serde_json::from_str::<Provider>(&encoded)?, provider);
        }
        Ok(())
    }
}
