//! Process configuration, environment variables with an optional YAML
//! override file, following the teacher's `Config::from_env` convention.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderFamily;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    pub family: ProviderFamily,
    pub model: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
    pub endpoint: String,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Fast,
    #[default]
    Medium,
    Slow,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub rpm: u32,
    pub burst: usize,
    pub retry_after_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rpm: 60, burst: 4, retry_after_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    pub prompt_type: String,
    pub template: String,
}

fn default_prompts() -> Vec<PromptConfig> {
    vec![
        PromptConfig {
            prompt_type: "business_analysis".to_string(),
            template: "Analyze the business potential and market position of {domain}. Provide comprehensive insights.".to_string(),
        },
        PromptConfig {
            prompt_type: "content_strategy".to_string(),
            template: "Develop a content and SEO strategy for {domain}. Include competitive analysis.".to_string(),
        },
        PromptConfig {
            prompt_type: "technical_assessment".to_string(),
            template: "Assess the technical implementation and infrastructure needs for {domain}.".to_string(),
        },
    ]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CycleConfig {
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    #[serde(default = "defaults::interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "defaults::sla_target_secs")]
    pub sla_target_secs: u64,
    #[serde(default = "defaults::sla_max_secs")]
    pub sla_max_secs: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            interval_ms: defaults::interval_ms(),
            sla_target_secs: defaults::sla_target_secs(),
            sla_max_secs: defaults::sla_max_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    #[serde(default = "defaults::retry_max")]
    pub retry_max: u32,
    #[serde(default = "defaults::deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { retry_max: defaults::retry_max(), deadline_ms: defaults::deadline_ms() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitConfig {
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "defaults::reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::failure_threshold(),
            reset_timeout_ms: defaults::reset_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    Strict,
    Relaxed,
}

impl Default for ValidatorMode {
    fn default() -> Self {
        ValidatorMode::Strict
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub mode: ValidatorMode,
    #[serde(default = "defaults::min_ratio")]
    pub min_ratio: f64,
    #[serde(default = "defaults::reconcile_every_n_cycles")]
    pub reconcile_every_n_cycles: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            mode: ValidatorMode::default(),
            min_ratio: defaults::min_ratio(),
            reconcile_every_n_cycles: defaults::reconcile_every_n_cycles(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    pub path: PathBuf,
    #[serde(default = "defaults::stale_after_ms")]
    pub stale_after_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    #[serde(default = "defaults::drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout_ms: defaults::drain_timeout_ms() }
    }
}

mod defaults {
    pub fn batch_size() -> usize { 50 }
    pub fn interval_ms() -> u64 { 15_000 }
    pub fn sla_target_secs() -> u64 { 600 }
    pub fn sla_max_secs() -> u64 { 1_800 }
    pub fn worker_pool_size() -> usize { 64 }
    pub fn retry_max() -> u32 { 3 }
    pub fn deadline_ms() -> u64 { 30_000 }
    pub fn failure_threshold() -> u32 { 5 }
    pub fn reset_timeout_ms() -> u64 { 300_000 }
    pub fn min_ratio() -> f64 { 1.0 }
    pub fn reconcile_every_n_cycles() -> u64 { 10 }
    pub fn stale_after_ms() -> u64 { 3_600_000 }
    pub fn drain_timeout_ms() -> u64 { 30_000 }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub data_dir: PathBuf,
    #[serde(default = "defaults::worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    pub lock: LockConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default = "default_prompts")]
    pub prompts: Vec<PromptConfig>,
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Resolve configuration the way the teacher's daemon does: environment
    /// variables layered over sensible home-directory-relative defaults,
    /// with an optional YAML file (`CRAWL_SCHEDULER_CONFIG`) providing the
    /// provider table and any overrides.
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("CRAWL_SCHEDULER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".crawl-scheduler")
            });

        let config_path = std::env::var("CRAWL_SCHEDULER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("config.yaml"));

        let mut config: Config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading config file {}", config_path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", config_path.display()))?
        } else {
            Config {
                data_dir: data_dir.clone(),
                worker_pool_size: defaults::worker_pool_size(),
                cycle: CycleConfig::default(),
                task: TaskConfig::default(),
                circuit: CircuitConfig::default(),
                validator: ValidatorConfig::default(),
                lock: LockConfig { path: data_dir.join("scheduler.lock"), stale_after_ms: defaults::stale_after_ms() },
                shutdown: ShutdownConfig::default(),
                prompts: default_prompts(),
                providers: default_providers_from_env(),
            }
        };

        config.data_dir = data_dir;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        validate(&config)?;
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("crawl.db")
    }
}

/// Fallback provider table built from well-known `<PROVIDER>_API_KEY`
/// environment variables, used when no YAML config file is present.
fn default_providers_from_env() -> Vec<ProviderConfig> {
    let candidates: &[(&str, ProviderFamily, &str, &str)] = &[
        ("openai", ProviderFamily::OpenAi, "gpt-4o-mini", "https://api.openai.com/v1/chat/completions"),
        ("anthropic", ProviderFamily::Anthropic, "claude-sonnet-4-20250514", "https://api.anthropic.com/v1/messages"),
        ("google", ProviderFamily::Google, "gemini-2.5-flash", "https://generativelanguage.googleapis.com/v1beta"),
        ("deepseek", ProviderFamily::OpenAi, "deepseek-chat", "https://api.deepseek.com/chat/completions"),
        ("groq", ProviderFamily::OpenAi, "llama-3.3-70b-versatile", "https://api.groq.com/openai/v1/chat/completions"),
        ("perplexity", ProviderFamily::OpenAi, "sonar", "https://api.perplexity.ai/chat/completions"),
        ("cohere", ProviderFamily::Cohere, "command-r", "https://api.cohere.ai/v1/generate"),
    ];

    let mut env_keys: HashMap<String, String> = HashMap::new();
    for (key, value) in std::env::vars() {
        env_keys.insert(key, value);
    }

    candidates
        .iter()
        .map(|(name, family, model, endpoint)| {
            let env_name = format!("{}_API_KEY", name.to_uppercase());
            let api_keys = env_keys
                .get(&env_name)
                .filter(|v| !v.is_empty())
                .map(|v| vec![v.clone()])
                .unwrap_or_default();
            ProviderConfig {
                name: name.to_string(),
                family: *family,
                model: model.to_string(),
                enabled: !api_keys.is_empty(),
                api_keys,
                endpoint: endpoint.to_string(),
                tier: Tier::default(),
                rate_limit: RateLimitConfig::default(),
            }
        })
        .collect()
}

/// Fatal, startup-only errors (§7): the caller reports these and exits
/// non-zero rather than retrying, unlike the persistence/provider errors
/// that surface during a running cycle.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("zero enabled providers with a non-empty api_keys list")]
    NoEnabledProviders,
    #[error("prompt set must not be empty")]
    EmptyPromptSet,
    #[error("provider {0} has rate_limit.rpm = 0")]
    ZeroRpm(String),
}

fn validate(config: &Config) -> std::result::Result<(), ConfigError> {
    if config.providers.iter().filter(|p| p.enabled && !p.api_keys.is_empty()).count() == 0 {
        return Err(ConfigError::NoEnabledProviders);
    }
    if config.prompts.is_empty() {
        return Err(ConfigError::EmptyPromptSet);
    }
    for p in &config.providers {
        if p.enabled && p.rate_limit.rpm == 0 {
            return Err(ConfigError::ZeroRpm(p.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_enabled_providers() {
        let config = Config {
            data_dir: PathBuf::from("/tmp"),
            worker_pool_size: 1,
            cycle: CycleConfig::default(),
            task: TaskConfig::default(),
            circuit: CircuitConfig::default(),
            validator: ValidatorConfig::default(),
            lock: LockConfig { path: PathBuf::from("/tmp/x.lock"), stale_after_ms: 1000 },
            shutdown: ShutdownConfig::default(),
            prompts: default_prompts(),
            providers: vec![],
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_empty_prompt_set() {
        let config = Config {
            data_dir: PathBuf::from("/tmp"),
            worker_pool_size: 1,
            cycle: CycleConfig::default(),
            task: TaskConfig::default(),
            circuit: CircuitConfig::default(),
            validator: ValidatorConfig::default(),
            lock: LockConfig { path: PathBuf::from("/tmp/x.lock"), stale_after_ms: 1000 },
            shutdown: ShutdownConfig::default(),
            prompts: vec![],
            providers: vec![ProviderConfig {
                name: "openai".to_string(),
                family: ProviderFamily::OpenAi,
                model: "gpt-4o-mini".to_string(),
                enabled: true,
                api_keys: vec!["sk-test".to_string()],
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                tier: Tier::default(),
                rate_limit: RateLimitConfig::default(),
            }],
        };
        assert!(validate(&config).is_err());
    }
}
