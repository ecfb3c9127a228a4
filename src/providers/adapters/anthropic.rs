//! Anthropic Claude envelope — `x-api-key` + `anthropic-version` headers
//! instead of bearer auth, and a `system` field pulled out of the message
//! list rather than inlined as a `"system"`-role message.

use http::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde_json::Value;

use super::{truncate, AdapterError, PreparedRequest, ProviderAdapter, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> &'static str {
        "anthropic"
    }

    fn build_request(
        &self,
        endpoint: &str,
        model: &str,
        prompt: &str,
        key: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<PreparedRequest, AdapterError> {
        let url = Url::parse(endpoint)
            .map_err(|e| AdapterError::InvalidRequest(format!("bad endpoint {endpoint}: {e}")))?;

        let mut headers = HeaderMap::new();
        let mut key_value = HeaderValue::from_str(key)
            .map_err(|e| AdapterError::InvalidRequest(e.to_string()))?;
        key_value.set_sensitive(true);
        headers.insert("x-api-key", key_value);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "messages": [{"role": "user", "content": prompt}],
        });

        Ok(PreparedRequest { url, headers, body })
    }

    fn parse_response(&self, raw_body: &str) -> Result<String, AdapterError> {
        let body: Value = serde_json::from_str(raw_body)
            .map_err(|e| AdapterError::Parse(format!("invalid json: {e}")))?;
        let text = body["content"][0]["text"].as_str();
        match text {
            Some(t) if !t.is_empty() => Ok(t.to_string()),
            _ => Err(AdapterError::Parse(truncate(raw_body, 200))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_uses_api_key_header() {
        let adapter = AnthropicAdapter::new();
        let req = adapter
            .build_request(
                "https://api.anthropic.com/v1/messages",
                "claude-sonnet-4-20250514",
                "Analyze example.com",
                "sk-ant-test",
                None,
                None,
            )
            .unwrap();
        assert_eq!(req.headers.get("x-api-key").unwrap(), "sk-ant-test");
        assert_eq!(req.headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert!(req.headers.get(http::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn parse_response_extracts_first_content_block() {
        let adapter = AnthropicAdapter::new();
        let raw = r#"{"content":[{"type":"text","text":"hello"}]}"#;
        assert_eq!(adapter.parse_response(raw).unwrap(), "hello");
    }
}
