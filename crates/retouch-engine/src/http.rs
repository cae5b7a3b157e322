use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as BlockingClient, Response as BlockingResponse};
use serde_json::Value;

/// Blocking client built on first use.
///
/// Construction happens inside the worker thread; building a blocking client
/// on an async executor thread panics in debug builds. Requests carry no total
/// timeout unless one is set explicitly.
#[derive(Debug, Default)]
pub(crate) struct LazyBlockingClient {
    timeout: Option<Duration>,
    inner: OnceLock<BlockingClient>,
}

impl LazyBlockingClient {
    #[cfg(test)]
    fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            inner: OnceLock::new(),
        }
    }

    pub(crate) fn get(&self) -> Result<&BlockingClient> {
        if let Some(client) = self.inner.get() {
            return Ok(client);
        }
        let client = BlockingClient::builder()
            .timeout(self.timeout)
            .build()
            .context("failed building blocking HTTP client")?;
        Ok(self.inner.get_or_init(|| client))
    }
}

pub(crate) fn resolve_api_base(configured: Option<String>, default_base: &str) -> String {
    configured
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_base.to_string())
}

pub(crate) fn response_json_or_error(provider: &str, response: BlockingResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    parse_json_body(provider, status, &body)
}

pub(crate) async fn response_json_or_error_async(
    provider: &str,
    response: reqwest::Response,
) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("{provider} response body read failed"))?;
    parse_json_body(provider, status, &body)
}

fn parse_json_body(provider: &str, status: reqwest::StatusCode, body: &str) -> Result<Value> {
    if !status.is_success() {
        bail!(
            "{provider} request failed ({}): {}",
            status.as_u16(),
            truncate_text(body, 512)
        );
    }
    serde_json::from_str(body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

pub(crate) fn download_bytes(http: &BlockingClient, provider: &str, url: &str) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .send()
        .with_context(|| format!("failed downloading {provider} image ({url})"))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "{provider} image download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("failed reading {provider} image bytes"))?;
    Ok(bytes.to_vec())
}

pub(crate) fn decode_base64(provider: &str, encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded.trim().as_bytes())
        .with_context(|| format!("{provider} image base64 decode failed"))
}

pub(crate) fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// Decodes a `data:<mime>;base64,<payload>` URI; `None` for anything else.
pub(crate) fn decode_data_uri(value: &str) -> Option<Vec<u8>> {
    let rest = value.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    BASE64.decode(payload.as_bytes()).ok()
}

pub(crate) fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub(crate) fn json_value_to_form_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(raw) => raw.to_string(),
        Value::Number(raw) => raw.to_string(),
        Value::String(raw) => raw.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use serde_json::json;

    use super::*;

    #[test]
    fn data_uri_decodes_only_base64_payloads() {
        let encoded = data_uri("image/png", b"EDITED");
        assert_eq!(encoded, "data:image/png;base64,RURJVEVE");
        assert_eq!(decode_data_uri(&encoded), Some(b"EDITED".to_vec()));
        assert_eq!(decode_data_uri("data:text/plain,hello"), None);
        assert_eq!(decode_data_uri("https://example.com/a.png"), None);
    }

    #[test]
    fn api_base_falls_back_to_default() {
        assert_eq!(
            resolve_api_base(Some(" http://local:1/v1/ ".to_string()), "https://x"),
            "http://local:1/v1"
        );
        assert_eq!(resolve_api_base(Some(String::new()), "https://x"), "https://x");
        assert_eq!(resolve_api_base(None, "https://x"), "https://x");
    }

    #[test]
    fn form_text_keeps_strings_unquoted() {
        assert_eq!(json_value_to_form_text(&json!("high")), "high");
        assert_eq!(json_value_to_form_text(&json!(80)), "80");
        assert_eq!(json_value_to_form_text(&json!(true)), "true");
        assert_eq!(json_value_to_form_text(&json!({"a": 1})), "{\"a\":1}");
    }

    /// Answers one request with `ok` after `delay`.
    fn slow_server(delay: Duration) -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0_u8; 1024];
                let _ = stream.read(&mut buf);
                thread::sleep(delay);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                );
            }
        });
        Ok(format!("http://{addr}/slow"))
    }

    #[test]
    fn blocking_client_has_no_total_timeout_by_default() -> Result<()> {
        let lazy = LazyBlockingClient::default();
        assert_eq!(lazy.timeout, None);

        let url = slow_server(Duration::from_millis(300))?;
        let body = lazy.get()?.get(&url).send()?.text()?;
        assert_eq!(body, "ok");
        assert!(std::ptr::eq(lazy.get()?, lazy.get()?));
        Ok(())
    }

    #[test]
    fn explicit_timeout_is_applied_to_the_client() -> Result<()> {
        let lazy = LazyBlockingClient::with_timeout(Duration::from_millis(50));
        let url = slow_server(Duration::from_millis(500))?;
        let err = lazy.get()?.get(&url).send().err();
        assert!(err.map(|err| err.is_timeout()).unwrap_or(false));
        Ok(())
    }

    #[test]
    fn truncation_marks_cut_text() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
