//! Google Gemini envelope — key passed as a URL query parameter rather than
//! a header, `contents[].parts[].text` request shape, `generationConfig`
//! for sampling parameters.

use http::HeaderMap;
use reqwest::Url;
use serde_json::Value;

use super::{truncate, AdapterError, PreparedRequest, ProviderAdapter};

pub struct GoogleAdapter;

impl GoogleAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn family(&self) -> &'static str {
        "google"
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
        let full_url = format!("{endpoint}/models/{model}:generateContent?key={key}");
        let url = Url::parse(&full_url)
            .map_err(|e| AdapterError::InvalidRequest(format!("bad endpoint {endpoint}: {e}")))?;

        let mut gen_config = serde_json::json!({});
        if let Some(t) = temperature {
            gen_config["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = max_tokens {
            gen_config["maxOutputTokens"] = serde_json::json!(m);
        }

        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": gen_config,
        });

        Ok(PreparedRequest { url, headers: HeaderMap::new(), body })
    }

    fn parse_response(&self, raw_body: &str) -> Result<String, AdapterError> {
        let body: Value = serde_json::from_str(raw_body)
            .map_err(|e| AdapterError::Parse(format!("invalid json: {e}")))?;
        let text = body["candidates"][0]["content"]["parts"][0]["text"].as_str();
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
    fn build_request_puts_key_in_url() {
        let adapter = GoogleAdapter::new();
        let req = adapter
            .build_request(
                "https://generativelanguage.googleapis.com/v1beta",
                "gemini-2.5-flash",
                "Analyze example.com",
                "AIza-test",
                Some(500),
                Some(0.7),
            )
            .unwrap();
        assert!(req.url.as_str().contains("key=AIza-test"));
        assert!(req.headers.is_empty());
        assert_eq!(req.body["generationConfig"]["maxOutputTokens"], 500);
    }

    #[test]
    fn parse_response_extracts_first_candidate() {
        let adapter = GoogleAdapter::new();
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#;
        assert_eq!(adapter.parse_response(raw).unwrap(), "hello");
    }
}
