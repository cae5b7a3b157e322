//! Shared value types and collaborator contracts for prompt-driven image edits.

pub mod artifact;
pub mod models;
pub mod providers;
pub mod settings;

pub use artifact::{is_remote_url, ArtifactError, ImageArtifact, LocationKind, Metadata};
pub use models::{
    Capability, CapabilityRegistry, ModelRegistry, ModelSelection, ModelSelector, ModelSpec,
};
pub use providers::{Provider, UnsupportedProvider};
pub use settings::{ConfigError, CredentialStore, Settings};
