use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use retouch_contracts::{
    ArtifactError, CapabilityRegistry, ImageArtifact, LocationKind, ModelSelection, Provider,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{model_metadata, select_model};
use crate::http::{decode_base64, resolve_api_base, response_json_or_error_async};
use crate::upload::sniff_mime;
use crate::{EditError, EditOptions, EditorConfig, EditorContext, ImageEditor};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Native async access to a multimodal `generateContent` endpoint.
#[async_trait]
pub trait GenerateContentTransport: Send + Sync {
    async fn generate_content(&self, model: &str, payload: &Value) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct GeminiHttpTransport {
    api_base: String,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiHttpTransport {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

#[async_trait]
impl GenerateContentTransport for GeminiHttpTransport {
    async fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error_async("Gemini", response).await
    }
}

pub struct GoogleImageEditor {
    selection: ModelSelection,
    transport: Arc<dyn GenerateContentTransport>,
}

impl GoogleImageEditor {
    pub fn new(config: &EditorConfig, context: &EditorContext) -> Result<Self, EditError> {
        let api_key = context.credentials.credential(Provider::Google)?;
        let api_base = resolve_api_base(
            config
                .api_base
                .clone()
                .or_else(|| context.credentials.api_base(Provider::Google)),
            GEMINI_API_BASE,
        );
        Self::with_transport(
            config,
            context.registry.as_ref(),
            Arc::new(GeminiHttpTransport::new(api_base, api_key)),
        )
    }

    pub fn with_transport(
        config: &EditorConfig,
        registry: &dyn CapabilityRegistry,
        transport: Arc<dyn GenerateContentTransport>,
    ) -> Result<Self, EditError> {
        let selection = select_model(Provider::Google, config, registry)?;
        Ok(Self {
            selection,
            transport,
        })
    }

    async fn load_image(image: &ImageArtifact) -> Result<Vec<u8>, EditError> {
        let unsupported = |reason: String| EditError::UnsupportedInput {
            provider: Provider::Google,
            reason,
        };
        match image.location_kind() {
            Some(LocationKind::Url(url)) => Err(unsupported(format!(
                "remote image {url} must be fetched by the caller"
            ))),
            Some(LocationKind::Path(path)) => tokio::fs::read(path)
                .await
                .map_err(|err| unsupported(format!("failed reading {}: {err}", path.display()))),
            None => image
                .data()
                .filter(|bytes| !bytes.is_empty())
                .map(<[u8]>::to_vec)
                .ok_or(EditError::InvalidArtifact(ArtifactError::MissingSource)),
        }
    }
}

fn build_payload(prompt: &str, mime_type: &str, bytes: &[u8]) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {"text": prompt},
                {"inlineData": {"mimeType": mime_type, "data": BASE64.encode(bytes)}},
            ],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
        },
    })
}

/// First inline image of the first candidate, with the metadata the response reports.
fn extract_result(response: &Value, requested_model: &str) -> Result<ImageArtifact> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for part in parts {
        let Some(data) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        let bytes = decode_base64("Gemini", data)?;
        let model_version = response
            .get("modelVersion")
            .and_then(Value::as_str)
            .unwrap_or(requested_model);
        let mut metadata = model_metadata(model_version);
        if let Some(total) = response
            .get("usageMetadata")
            .and_then(|usage| usage.get("totalTokenCount"))
            .and_then(Value::as_u64)
        {
            metadata.insert("total_tokens".to_string(), Value::from(total));
        }
        return Ok(ImageArtifact::output(bytes, metadata));
    }

    Ok(ImageArtifact::empty(model_metadata(requested_model)))
}

#[async_trait]
impl ImageEditor for GoogleImageEditor {
    fn provider(&self) -> Provider {
        Provider::Google
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
        let bytes = Self::load_image(image).await?;
        let mime_type = sniff_mime(&bytes).ok_or_else(|| EditError::UnsupportedInput {
            provider: Provider::Google,
            reason: "image data is not in a recognized image format".to_string(),
        })?;
        if !options.is_empty() {
            let ignored = options.keys().collect::<Vec<&String>>();
            debug!(?ignored, "Gemini edit ignores options");
        }

        let model = self.selection.model.as_str();
        let payload = build_payload(prompt, mime_type, &bytes);
        debug!(model = %model, mime_type, bytes = bytes.len(), "dispatching Gemini image edit");
        let response = self
            .transport
            .generate_content(model, &payload)
            .await
            .map_err(|err| EditError::provider_call(Provider::Google, err))?;
        let result = extract_result(&response, model)
            .map_err(|err| EditError::provider_call(Provider::Google, err))?;

        if result.is_empty() {
            warn!(model = %model, "Gemini response carried no inline image");
        } else {
            info!(model = %model, "Gemini edit completed");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mockito::Matcher;
    use retouch_contracts::ModelRegistry;

    use super::*;

    struct FakeTransport {
        response: Value,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl FakeTransport {
        fn returning(response: Value) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl GenerateContentTransport for FakeTransport {
        async fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
            self.calls
                .lock()
                .map_err(|_| anyhow::anyhow!("recorder poisoned"))?
                .push((model.to_string(), payload.clone()));
            Ok(self.response.clone())
        }
    }

    fn editor(transport: Arc<FakeTransport>) -> GoogleImageEditor {
        let registry = ModelRegistry::default();
        GoogleImageEditor::with_transport(&EditorConfig::new(), &registry, transport)
            .expect("editor builds")
    }

    fn ten_byte_png() -> Vec<u8> {
        b"\x89PNG\r\n\x1a\n\x00\x00".to_vec()
    }

    #[tokio::test]
    async fn first_inline_part_becomes_the_result() -> anyhow::Result<()> {
        let transport = FakeTransport::returning(json!({
            "candidates": [{"content": {"parts": [
                {"text": "Here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "RURJVEVE"}},
                {"inlineData": {"mimeType": "image/png", "data": "U0VDT05E"}},
            ]}}],
            "modelVersion": "gemini-2.0-flash-preview-image-generation-001",
            "usageMetadata": {"totalTokenCount": 1290},
        }));
        let editor = editor(Arc::clone(&transport));
        let image = ImageArtifact::from_bytes(ten_byte_png())?;

        let edited = editor
            .edit_image("make this black and white", &image, EditOptions::new())
            .await?;

        assert_eq!(edited.data(), Some(&b"EDITED"[..]));
        assert_eq!(
            edited.metadata().get("model"),
            Some(&json!("gemini-2.0-flash-preview-image-generation-001"))
        );
        assert_eq!(edited.metadata().get("total_tokens"), Some(&json!(1290)));

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "gemini-2.0-flash-preview-image-generation");
        let parts = &calls[0].1["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], json!("make this black and white"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[1]["inlineData"]["data"], json!(BASE64.encode(ten_byte_png())));
        assert_eq!(
            calls[0].1["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
        Ok(())
    }

    #[tokio::test]
    async fn zero_inline_parts_is_empty_without_error() -> anyhow::Result<()> {
        let transport = FakeTransport::returning(json!({
            "candidates": [{"content": {"parts": [{"text": "I can't edit that."}]}}],
            "modelVersion": "gemini-2.0-flash-preview-image-generation-001",
            "usageMetadata": {"totalTokenCount": 12},
        }));
        let editor = editor(transport);
        let image = ImageArtifact::from_bytes(ten_byte_png())?;

        let edited = editor
            .edit_image("make this black and white", &image, EditOptions::new())
            .await?;

        assert!(edited.is_empty());
        assert_eq!(edited.metadata().len(), 1);
        assert_eq!(
            edited.metadata().get("model"),
            Some(&json!("gemini-2.0-flash-preview-image-generation"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_candidates_is_empty_too() -> anyhow::Result<()> {
        let editor = editor(FakeTransport::returning(json!({"promptFeedback": {}})));
        let image = ImageArtifact::from_bytes(ten_byte_png())?;
        let edited = editor.edit_image("x", &image, EditOptions::new()).await?;
        assert!(edited.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn path_artifacts_are_read_from_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("photo.bin");
        std::fs::write(&path, b"\xff\xd8\xff\xe0jpeg")?;
        let transport = FakeTransport::returning(json!({}));
        let editor = editor(Arc::clone(&transport));
        let image = ImageArtifact::from_location(path.to_string_lossy().to_string())?;

        editor.edit_image("x", &image, EditOptions::new()).await?;

        let calls = transport.calls();
        assert_eq!(
            calls[0].1["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            json!("image/jpeg")
        );
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_bytes_never_reach_the_transport() -> anyhow::Result<()> {
        let transport = FakeTransport::returning(json!({}));
        let editor = editor(Arc::clone(&transport));
        let image = ImageArtifact::from_bytes(b"plain text, not pixels".to_vec())?;

        let err = editor.edit_image("x", &image, EditOptions::new()).await.err();

        assert!(matches!(
            err,
            Some(EditError::UnsupportedInput {
                provider: Provider::Google,
                ..
            })
        ));
        assert!(transport.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn previous_empty_result_is_not_sent_again() {
        let transport = FakeTransport::returning(json!({}));
        let editor = editor(Arc::clone(&transport));
        let previous = ImageArtifact::empty(model_metadata("gemini-2.0-flash-exp"));

        let err = editor.edit_image("x", &previous, EditOptions::new()).await.err();

        assert!(matches!(
            err,
            Some(EditError::InvalidArtifact(ArtifactError::MissingSource))
        ));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn http_transport_posts_generate_content() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.0-flash-exp:generateContent")
            .match_query(Matcher::UrlEncoded("key".to_string(), "g-key".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "generationConfig": {"responseModalities": ["IMAGE", "TEXT"]}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"candidates": [{"content": {"parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "RURJVEVE"}}
                ]}}]})
                .to_string(),
            )
            .create_async()
            .await;

        let transport = GeminiHttpTransport::new(format!("{}/v1beta", server.url()), "g-key");
        let response = transport
            .generate_content(
                "gemini-2.0-flash-exp",
                &build_payload("x", "image/png", b"img"),
            )
            .await?;

        mock.assert_async().await;
        let result = extract_result(&response, "gemini-2.0-flash-exp")?;
        assert_eq!(result.data(), Some(&b"EDITED"[..]));
        assert_eq!(result.metadata().get("model"), Some(&json!("gemini-2.0-flash-exp")));
        Ok(())
    }

    #[tokio::test]
    async fn http_transport_reports_api_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"message":"API key not valid"}}"#)
            .create_async()
            .await;

        let transport = GeminiHttpTransport::new(server.url(), "bad");
        let err = transport
            .generate_content("gemini-2.0-flash-exp", &json!({}))
            .await
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();

        assert!(err.starts_with("Gemini request failed (403)"), "{err}");
    }
}
