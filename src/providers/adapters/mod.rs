//! Provider adapter trait — one implementation per vendor envelope family.
//!
//! Adapters are pure translators: `build_request` shapes the outbound call,
//! `parse_response` extracts the completion text. Neither method performs
//! I/O; the scheduler's dispatch loop owns the HTTP client, the timeout, and
//! the retry loop (§4.6 lives one layer up, in `providers::circuit`).

pub mod anthropic;
pub mod cohere;
pub mod google;
pub mod openai_family;

use http::HeaderMap;
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;

/// Output tokens requested when a provider config doesn't override it.
pub const DEFAULT_MAX_TOKENS: u32 = 500;
/// Sampling temperature used when a provider config doesn't override it.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// A fully-shaped outbound call, ready for the dispatch loop to send.
pub struct PreparedRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid endpoint/model for request: {0}")]
    InvalidRequest(String),
    #[error("response had no usable completion text")]
    Parse(String),
}

/// One vendor family's translation of the abstract chat request.
pub trait ProviderAdapter: Send + Sync {
    /// The family name, used only for logging (`openai`, `anthropic`, `google`, `cohere`).
    fn family(&self) -> &'static str;

    /// Build the outbound HTTP call for one (model, prompt, key) triple.
    fn build_request(
        &self,
        endpoint: &str,
        model: &str,
        prompt: &str,
        key: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<PreparedRequest, AdapterError>;

    /// Extract the single text completion from a successful HTTP body.
    fn parse_response(&self, raw_body: &str) -> Result<String, AdapterError>;
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
