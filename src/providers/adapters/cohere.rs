//! Cohere envelope — a single-prompt `generate` call (no chat message list),
//! bearer auth, `generations[0].text` on the reply. New in this crate: the
//! teacher has no Cohere adapter, so this follows the same shape as
//! `openai_family` while matching Cohere's older single-prompt endpoint.

use http::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde_json::Value;

use super::{truncate, AdapterError, PreparedRequest, ProviderAdapter, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

pub struct CohereAdapter;

impl CohereAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for CohereAdapter {
    fn family(&self) -> &'static str {
        "cohere"
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
        let auth = format!("Bearer {key}");
        let mut auth_value = HeaderValue::from_str(&auth)
            .map_err(|e| AdapterError::InvalidRequest(e.to_string()))?;
        auth_value.set_sensitive(true);
        headers.insert(http::header::AUTHORIZATION, auth_value);
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": temperature.unwrap_or(DEFAULT_TEMPERATURE),
        });

        Ok(PreparedRequest { url, headers, body })
    }

    fn parse_response(&self, raw_body: &str) -> Result<String, AdapterError> {
        let body: Value = serde_json::from_str(raw_body)
            .map_err(|e| AdapterError::Parse(format!("invalid json: {e}")))?;
        let text = body["generations"][0]["text"].as_str();
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
    fn build_request_sends_single_prompt_field() {
        let adapter = CohereAdapter::new();
        let req = adapter
            .build_request(
                "https://api.cohere.ai/v1/generate",
                "command-r",
                "Analyze example.com",
                "co-test",
                None,
                None,
            )
            .unwrap();
        assert_eq!(req.body["prompt"], "Analyze example.com");
        assert!(req.body.get("messages").is_none());
    }

    #[test]
    fn parse_response_extracts_first_generation() {
        let adapter = CohereAdapter::new();
        let raw = r#"{"generations":[{"text":"hello"}]}"#;
        assert_eq!(adapter.parse_response(raw).unwrap(), "hello");
    }
}
