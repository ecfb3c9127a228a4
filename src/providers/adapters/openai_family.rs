//! OpenAI-compatible chat-completions envelope — shared by OpenAI, DeepSeek,
//! Groq, Perplexity, Together, XAI, Mistral, and AI21. All of these vendors
//! accept the same `{model, messages, max_tokens, temperature}` body behind
//! bearer auth and reply with `choices[0].message.content`; only the base
//! URL differs, which comes from the provider's own `endpoint` config.

use http::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde_json::Value;

use super::{truncate, AdapterError, PreparedRequest, ProviderAdapter, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

pub struct OpenAiCompatAdapter;

impl OpenAiCompatAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn family(&self) -> &'static str {
        "openai"
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
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": temperature.unwrap_or(DEFAULT_TEMPERATURE),
        });

        Ok(PreparedRequest { url, headers, body })
    }

    fn parse_response(&self, raw_body: &str) -> Result<String, AdapterError> {
        let body: Value = serde_json::from_str(raw_body)
            .map_err(|e| AdapterError::Parse(format!("invalid json: {e}")))?;
        let text = body["choices"][0]["message"]["content"].as_str();
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
    fn build_request_sets_bearer_auth() {
        let adapter = OpenAiCompatAdapter::new();
        let req = adapter
            .build_request(
                "https://api.openai.com/v1/chat/completions",
                "gpt-4o-mini",
                "Analyze example.com",
                "sk-test",
                None,
                None,
            )
            .unwrap();
        assert_eq!(
            req.headers.get(http::header::AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
        assert_eq!(req.body["model"], "gpt-4o-mini");
        assert_eq!(req.body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn parse_response_extracts_content() {
        let adapter = OpenAiCompatAdapter::new();
        let raw = r#"{"choices":[{"message":{"content":"hello"}}]}"#;
        assert_eq!(adapter.parse_response(raw).unwrap(), "hello");
    }

    #[test]
    fn parse_response_rejects_empty_content() {
        let adapter = OpenAiCompatAdapter::new();
        let raw = r#"{"choices":[{"message":{"content":""}}]}"#;
        assert!(adapter.parse_response(raw).is_err());
    }
}
