use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use retouch_contracts::{CapabilityRegistry, ImageArtifact, LocationKind, ModelSelection, Provider};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{model_metadata, option_str, prepare_error, require_source, select_model};
use crate::http::{
    decode_base64, download_bytes, json_value_to_form_text, resolve_api_base,
    response_json_or_error, LazyBlockingClient,
};
use crate::upload::{prepare_image_value, ImageValue, SYNTHETIC_FILE_NAME};
use crate::{EditError, EditOptions, EditorConfig, EditorContext, ImageEditor};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_EDIT_SIZE: &str = "1024x1024";

/// Optional edit fields forwarded only when the caller sets them.
const PASS_THROUGH_FIELDS: [&str; 7] = [
    "quality",
    "background",
    "output_format",
    "output_compression",
    "input_fidelity",
    "moderation",
    "user",
];

#[derive(Debug)]
pub struct ImageEditRequest {
    pub model: String,
    pub prompt: String,
    pub image: ImageValue,
    pub size: String,
    pub fields: Vec<(String, String)>,
}

/// Blocking access to a dedicated image-edit endpoint.
pub trait ImageEditTransport: Send + Sync {
    fn edit(&self, request: ImageEditRequest) -> Result<Value>;
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct OpenAiHttpTransport {
    api_base: String,
    api_key: String,
    http: LazyBlockingClient,
}

impl OpenAiHttpTransport {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            http: LazyBlockingClient::default(),
        }
    }

    fn image_part(image: ImageValue) -> Result<MultipartPart> {
        let file_name = image
            .file_name()
            .unwrap_or_else(|| SYNTHETIC_FILE_NAME.to_string());
        let mime = image.mime_type();
        let part = match image {
            ImageValue::File { file, path } => {
                let length = file
                    .metadata()
                    .with_context(|| format!("failed reading metadata of {}", path.display()))?
                    .len();
                MultipartPart::reader_with_length(file, length)
            }
            ImageValue::Bytes { reader, .. } => MultipartPart::bytes(reader.into_inner()),
            ImageValue::Url(url) => bail!("OpenAI image edits need local image content, got {url}"),
        };
        part.file_name(file_name)
            .mime_str(mime)
            .with_context(|| format!("invalid mime '{mime}' for image upload"))
    }
}

impl ImageEditTransport for OpenAiHttpTransport {
    fn edit(&self, request: ImageEditRequest) -> Result<Value> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let mut form = MultipartForm::new()
            .text("model", request.model)
            .text("prompt", request.prompt)
            .text("size", request.size);
        for (key, value) in request.fields {
            form = form.text(key, value);
        }
        form = form.part("image", Self::image_part(request.image)?);

        let response = self
            .http
            .get()?
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .with_context(|| format!("OpenAI edits request failed ({endpoint})"))?;
        response_json_or_error("OpenAI edits", response)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        download_bytes(self.http.get()?, "OpenAI", url)
    }
}

pub struct OpenAiImageEditor {
    selection: ModelSelection,
    transport: Arc<dyn ImageEditTransport>,
}

impl OpenAiImageEditor {
    pub fn new(config: &EditorConfig, context: &EditorContext) -> Result<Self, EditError> {
        let api_key = context.credentials.credential(Provider::OpenAi)?;
        let api_base = resolve_api_base(
            config
                .api_base
                .clone()
                .or_else(|| context.credentials.api_base(Provider::OpenAi)),
            OPENAI_API_BASE,
        );
        Self::with_transport(
            config,
            context.registry.as_ref(),
            Arc::new(OpenAiHttpTransport::new(api_base, api_key)),
        )
    }

    pub fn with_transport(
        config: &EditorConfig,
        registry: &dyn CapabilityRegistry,
        transport: Arc<dyn ImageEditTransport>,
    ) -> Result<Self, EditError> {
        let selection = select_model(Provider::OpenAi, config, registry)?;
        Ok(Self {
            selection,
            transport,
        })
    }

    fn form_fields(options: &EditOptions) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        for key in PASS_THROUGH_FIELDS {
            match options.get(key) {
                None | Some(Value::Null) => continue,
                Some(value) => fields.push((key.to_string(), json_value_to_form_text(value))),
            }
        }
        let ignored = options
            .keys()
            .filter(|key| key.as_str() != "size" && !PASS_THROUGH_FIELDS.contains(&key.as_str()))
            .collect::<Vec<&String>>();
        if !ignored.is_empty() {
            debug!(?ignored, "OpenAI edit ignores unknown options");
        }
        fields
    }
}

fn extract_result(
    payload: &Value,
    model: &str,
    transport: &dyn ImageEditTransport,
) -> Result<ImageArtifact> {
    let mut metadata = model_metadata(model);
    let Some(first) = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        return Ok(ImageArtifact::empty(metadata));
    };

    if let Some(encoded) = first
        .get("b64_json")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
    {
        let bytes = decode_base64("OpenAI", encoded)?;
        return Ok(ImageArtifact::output(bytes, metadata));
    }

    if let Some(url) = first
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        let bytes = transport.download(url)?;
        metadata.insert("output_url".to_string(), Value::String(url.to_string()));
        return Ok(ImageArtifact::output(bytes, metadata));
    }

    Ok(ImageArtifact::empty(metadata))
}

#[async_trait]
impl ImageEditor for OpenAiImageEditor {
    fn provider(&self) -> Provider {
        Provider::OpenAi
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
        if let Some(LocationKind::Url(url)) = image.location_kind() {
            return Err(EditError::UnsupportedInput {
                provider: Provider::OpenAi,
                reason: format!("remote image {url} must be fetched by the caller"),
            });
        }

        let size = option_str(&options, "size")
            .unwrap_or(DEFAULT_EDIT_SIZE)
            .to_string();
        let fields = Self::form_fields(&options);
        let model = self.selection.model.clone();
        let prompt = prompt.to_string();
        let image = image.clone();
        let transport = Arc::clone(&self.transport);
        debug!(
            model = %model,
            size = %size,
            fields = fields.len(),
            "dispatching OpenAI image edit"
        );

        let result = tokio::task::spawn_blocking(move || -> Result<ImageArtifact, EditError> {
            let value = prepare_image_value(&image)
                .map_err(|err| prepare_error(Provider::OpenAi, err))?;
            let payload = transport
                .edit(ImageEditRequest {
                    model: model.clone(),
                    prompt,
                    image: value,
                    size,
                    fields,
                })
                .map_err(|err| EditError::provider_call(Provider::OpenAi, err))?;
            extract_result(&payload, &model, transport.as_ref())
                .map_err(|err| EditError::provider_call(Provider::OpenAi, err))
        })
        .await
        .map_err(|source| EditError::Worker {
            provider: Provider::OpenAi,
            source,
        })??;

        if result.is_empty() {
            warn!(model = %self.selection.model, "OpenAI edit returned no image");
        } else {
            info!(model = %self.selection.model, "OpenAI edit completed");
        }
        Ok(result)
    }
}
