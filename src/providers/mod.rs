//! Provider registry, key pool, rate limiting, adapters, and the circuit
//! breaker: everything that turns an enabled `ProviderDescriptor` into a
//! dispatched, classified outbound call.

pub mod adapters;
pub mod circuit;
pub mod rate_limiter;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use adapters::{anthropic::AnthropicAdapter, cohere::CohereAdapter, google::GoogleAdapter, openai_family::OpenAiCompatAdapter, ProviderAdapter};

/// The vendor envelope family a provider speaks. Tagged-variant dispatch,
/// not a trait hierarchy, see DESIGN.md.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Google,
    Cohere,
}

impl ProviderFamily {
    pub fn adapter(self) -> Box<dyn ProviderAdapter> {
        match self {
            ProviderFamily::OpenAi => Box::new(OpenAiCompatAdapter::new()),
            ProviderFamily::Anthropic => Box::new(AnthropicAdapter::new()),
            ProviderFamily::Google => Box::new(GoogleAdapter::new()),
            ProviderFamily::Cohere => Box::new(CohereAdapter::new()),
        }
    }
}

/// A provider as known to the scheduler for the lifetime of one process,
/// an immutable snapshot built once from `ProviderConfig` at startup (§4.3).
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub family: ProviderFamily,
    pub model: String,
    pub api_keys: Vec<String>,
    pub endpoint: String,
    pub rpm: u32,
    pub burst: usize,
    pub retry_after_ms: u64,
}

impl ProviderDescriptor {
    /// The `provider/model` composite id stored on every response row.
    pub fn composite_model(&self) -> String {
        format!("{}/{}", self.name, self.model)
    }
}

impl TryFrom<&ProviderConfig> for ProviderDescriptor {
    type Error = anyhow::Error;

    fn try_from(cfg: &ProviderConfig) -> Result<Self, Self::Error> {
        if !cfg.enabled || cfg.api_keys.iter().all(|k| k.is_empty()) {
            anyhow::bail!("provider {} has no usable api_keys", cfg.name);
        }
        let api_keys: Vec<String> = cfg.api_keys.iter().filter(|k| !k.is_empty()).cloned().collect();
        if api_keys.is_empty() {
            anyhow::bail!("provider {} has no usable api_keys", cfg.name);
        }
        Ok(ProviderDescriptor {
            name: cfg.name.clone(),
            family: cfg.family,
            model: cfg.model.clone(),
            api_keys,
            endpoint: cfg.endpoint.clone(),
            rpm: cfg.rate_limit.rpm,
            burst: cfg.rate_limit.burst,
            retry_after_ms: cfg.rate_limit.retry_after_ms,
        })
    }
}
