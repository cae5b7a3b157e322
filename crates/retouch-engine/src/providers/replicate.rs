use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use retouch_contracts::{CapabilityRegistry, ImageArtifact, ModelSelection, Provider};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{model_metadata, option_str, prepare_error, require_source, select_model};
use crate::http::{download_bytes, resolve_api_base, response_json_or_error, LazyBlockingClient};
use crate::output::{first_image_bytes, RunOutput};
use crate::upload::{prepare_image_value, ImageValue};
use crate::{EditError, EditOptions, EditorConfig, EditorContext, ImageEditor};

pub const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_OUTPUT_FORMAT: &str = "png";

/// Input field names hosted edit models commonly use for the source image.
pub const FALLBACK_INPUT_KEYS: [&str; 6] = [
    "image",
    "input_image",
    "image_1",
    "image_url",
    "prompt_image",
    "conditioning_image",
];

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Ordered, de-duplicated input keys to try for `model`.
pub fn candidate_input_keys(model: &str, preferred: Option<&str>) -> Vec<String> {
    let family_key = if model.contains("kontext") {
        "input_image"
    } else {
        "image"
    };
    let mut keys: Vec<String> = Vec::new();
    let candidates = preferred
        .into_iter()
        .chain(std::iter::once(family_key))
        .chain(FALLBACK_INPUT_KEYS);
    for key in candidates.filter(|key| !key.is_empty()) {
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// One run attempt: the image under `image_key` plus the remaining input fields.
#[derive(Debug)]
pub struct RunInput {
    pub image_key: String,
    pub image: ImageValue,
    pub fields: Map<String, Value>,
}

impl RunInput {
    /// Flattens into the JSON `input` object; `fields` win over the image key.
    pub fn into_json(self) -> Result<Value> {
        let mut input = Map::new();
        input.insert(
            self.image_key,
            Value::String(self.image.into_request_string()?),
        );
        input.extend(self.fields);
        Ok(Value::Object(input))
    }
}

/// Blocking access to a hosted-model prediction runner.
pub trait PredictionTransport: Send + Sync {
    fn run(&self, model: &str, input: RunInput) -> Result<RunOutput>;
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct ReplicateHttpTransport {
    api_base: String,
    api_token: String,
    poll_interval: Duration,
    http: LazyBlockingClient,
}

impl ReplicateHttpTransport {
    pub fn new(api_base: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_token: api_token.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            http: LazyBlockingClient::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn prediction_request(&self, model: &str, input: Value) -> (String, Value) {
        match model.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.api_base),
                json!({"version": version, "input": input}),
            ),
            None => (
                format!("{}/models/{}/predictions", self.api_base, model),
                json!({"input": input}),
            ),
        }
    }

    fn prediction_status(prediction: &Value) -> String {
        prediction
            .get("status")
            .and_then(Value::as_str)
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn poll_prediction(&self, mut prediction: Value) -> Result<Value> {
        loop {
            match Self::prediction_status(&prediction).as_str() {
                "succeeded" => return Ok(prediction),
                "failed" | "canceled" => bail!("Replicate prediction failed: {}", prediction),
                _ => {}
            }
            let poll_url = prediction
                .get("urls")
                .and_then(|urls| urls.get("get"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow::anyhow!("Replicate prediction missing poll URL"))?
                .to_string();
            thread::sleep(self.poll_interval);
            let response = self
                .http
                .get()?
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .with_context(|| format!("Replicate poll request failed ({poll_url})"))?;
            prediction = response_json_or_error("Replicate poll", response)?;
        }
    }
}

impl PredictionTransport for ReplicateHttpTransport {
    fn run(&self, model: &str, input: RunInput) -> Result<RunOutput> {
        let (endpoint, payload) = self.prediction_request(model, input.into_json()?);
        let response = self
            .http
            .get()?
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let prediction = response_json_or_error("Replicate", response)?;
        let mut prediction = self.poll_prediction(prediction)?;
        let output = prediction
            .get_mut("output")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(RunOutput::from_json(output))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        download_bytes(self.http.get()?, "Replicate", url)
    }
}

pub struct ReplicateImageEditor {
    selection: ModelSelection,
    transport: Arc<dyn PredictionTransport>,
}

impl ReplicateImageEditor {
    pub fn new(config: &EditorConfig, context: &EditorContext) -> Result<Self, EditError> {
        let api_token = context.credentials.credential(Provider::Replicate)?;
        let api_base = resolve_api_base(
            config
                .api_base
                .clone()
                .or_else(|| context.credentials.api_base(Provider::Replicate)),
            REPLICATE_API_BASE,
        );
        Self::with_transport(
            config,
            context.registry.as_ref(),
            Arc::new(ReplicateHttpTransport::new(api_base, api_token)),
        )
    }

    pub fn with_transport(
        config: &EditorConfig,
        registry: &dyn CapabilityRegistry,
        transport: Arc<dyn PredictionTransport>,
    ) -> Result<Self, EditError> {
        let selection = select_model(Provider::Replicate, config, registry)?;
        Ok(Self {
            selection,
            transport,
        })
    }

    fn input_fields(prompt: &str, options: &EditOptions) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("prompt".to_string(), Value::String(prompt.to_string()));
        fields.insert(
            "output_format".to_string(),
            Value::String(
                option_str(options, "output_format")
                    .unwrap_or(DEFAULT_OUTPUT_FORMAT)
                    .to_string(),
            ),
        );
        for (key, value) in options {
            if matches!(key.as_str(), "input_key" | "output_format") || value.is_null() {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        fields
    }
}

#[async_trait]
impl ImageEditor for ReplicateImageEditor {
    fn provider(&self) -> Provider {
        Provider::Replicate
    }

    fn model(&self) -> &str {
        &self.selection.model
    }

    fn is_supported(&self) -> bool {
        self.selection.supported
    }

    async fn edit_image(
        &self,
        prompt: &str,
        image: &ImageArtifact,
        options: EditOptions,
    ) -> Result<ImageArtifact, EditError> {
        require_source(image)?;
        let model = self.selection.model.clone();
        let preferred = options.get("input_key").and_then(Value::as_str);
        let keys = candidate_input_keys(&model, preferred);
        let fields = Self::input_fields(prompt, &options);
        let image = image.clone();
        let transport = Arc::clone(&self.transport);
        debug!(model = %model, ?keys, "dispatching Replicate image edit");

        let result = tokio::task::spawn_blocking(move || -> Result<ImageArtifact, EditError> {
            let download = |url: &str| transport.download(url);
            for key in keys {
                let value = prepare_image_value(&image)
                    .map_err(|err| prepare_error(Provider::Replicate, err))?;
                let output = transport
                    .run(
                        &model,
                        RunInput {
                            image_key: key.clone(),
                            image: value,
                            fields: fields.clone(),
                        },
                    )
                    .map_err(|err| EditError::provider_call(Provider::Replicate, err))?;
                let extracted = first_image_bytes(output, &download)
                    .map_err(|err| EditError::provider_call(Provider::Replicate, err))?;
                if extracted.is_empty() {
                    debug!(model = %model, key = %key, "no image for input key; trying next");
                    continue;
                }
                let mut metadata = model_metadata(&model);
                if let Some(url) = extracted.url {
                    metadata.insert("output_url".to_string(), Value::String(url));
                }
                return Ok(ImageArtifact::output(extracted.bytes, metadata));
            }
            Ok(ImageArtifact::empty(model_metadata(&model)))
        })
        .await
        .map_err(|source| EditError::Worker {
            provider: Provider::Replicate,
            source,
        })??;

        if result.is_empty() {
            warn!(model = %self.selection.model, "no input key produced an image");
        } else {
            info!(model = %self.selection.model, "Replicate edit completed");
        }
        Ok(result)
    }
}
