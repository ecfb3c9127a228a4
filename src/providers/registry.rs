//! Provider Registry (§4.3), validates and snapshots the enabled provider
//! set at startup. Generalized from the teacher's single-provider
//! `GOOGLE_MODELS` static array (`keyvault/src/pool/registry.rs`) into a
//! config-driven table spanning every family.

use anyhow::Result;
use tracing::warn;

use crate::config::ProviderConfig;

use super::ProviderDescriptor;

/// An immutable snapshot of every usable provider, built once per process.
pub struct ProviderRegistry {
    enabled: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn load(configs: &[ProviderConfig]) -> Result<Self> {
        let mut enabled = Vec::new();
        for cfg in configs {
            match ProviderDescriptor::try_from(cfg) {
                Ok(descriptor) => enabled.push(descriptor),
                Err(e) => {
                    if cfg.enabled {
                        warn!(provider = %cfg.name, error = %e, "provider disabled at startup");
                    }
                }
            }
        }
        if enabled.is_empty() {
            anyhow::bail!("provider registry: zero enabled providers after validation");
        }
        Ok(Self { enabled })
    }

    /// The snapshot used for the duration of a scheduler cycle.
    pub fn enabled_providers(&self) -> &[ProviderDescriptor] {
        &self.enabled
    }

    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.enabled.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, RateLimitConfig, Tier};
    use crate::providers::ProviderFamily;

    fn provider(name: &str, enabled: bool, keys: Vec<&str>) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            family: ProviderFamily::OpenAi,
            model: "gpt-4o-mini".to_string(),
            enabled,
            api_keys: keys.into_iter().map(String::from).collect(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            tier: Tier::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    #[test]
    fn disabled_provider_is_excluded() {
        let configs = vec![provider("openai", true, vec!["sk-1"]), provider("groq", false, vec!["gsk-1"])];
        let registry = ProviderRegistry::load(&configs).unwrap();
        assert_eq!(registry.enabled_providers().len(), 1);
        assert_eq!(registry.enabled_providers()[0].name, "openai");
    }

    #[test]
    fn provider_with_empty_keys_is_excluded() {
        let configs = vec![provider("openai", true, vec![""])];
        let registry = ProviderRegistry::load(&configs);
        assert!(registry.is_err());
    }

    #[test]
    fn composite_model_id_is_provider_slash_model() {
        let configs = vec![provider("openai", true, vec!["sk-1"])];
        let registry = ProviderRegistry::load(&configs).unwrap();
        assert_eq!(registry.get("openai").unwrap().composite_model(), "openai/gpt-4o-mini");
    }
}
