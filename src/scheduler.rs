//! Scheduler / Work Planner (§4.7), grounded on
//! `other_examples/.../crawler.rs`'s `CrawlerOrchestrator::run` (chunked
//! `stream::iter(...).buffer_unordered(n)`, per-cycle SLA tracking) and the
//! teacher's `keyvault-package/src/pool/mod.rs::parallel_generate`
//! (spawned tasks collected into a result vec).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::providers::circuit::{dispatch_with_retry, CircuitBreaker, DispatchError, ErrorClass};
use crate::providers::rate_limiter::RateLimiter;
use crate::providers::registry::ProviderRegistry;
use crate::providers::ProviderDescriptor;
use crate::store::domain::DomainStore;
use crate::store::response::{new_batch_id, Response, ResponseStore};
use crate::validator::CompletionValidator;

/// Per-provider breakdown for one cycle (§4.9 metrics requirement).
pub struct ProviderCycleStats {
    pub provider: String,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub circuit_state: &'static str,
}

#[derive(Default)]
struct ProviderAccum {
    attempted: u64,
    succeeded: u64,
    failed: u64,
    latency_sum_ms: u64,
}

pub struct CycleMetrics {
    pub tasks_attempted: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub domains_completed: u64,
    pub domains_left_processing: u64,
    pub elapsed: Duration,
    pub providers: Vec<ProviderCycleStats>,
    pub recent_by_model: HashMap<String, i64>,
}

impl CycleMetrics {
    fn log(&self) {
        info!(
            tasks_attempted = self.tasks_attempted,
            tasks_succeeded = self.tasks_succeeded,
            tasks_failed = self.tasks_failed,
            domains_completed = self.domains_completed,
            domains_left_processing = self.domains_left_processing,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "cycle finished"
        );
        for p in &self.providers {
            info!(
                provider = %p.provider,
                attempted = p.attempted,
                succeeded = p.succeeded,
                failed = p.failed,
                avg_latency_ms = p.avg_latency_ms,
                circuit_state = p.circuit_state,
                "provider cycle stats"
            );
        }
        if !self.recent_by_model.is_empty() {
            info!(recent_by_model = ?self.recent_by_model, "recent response counts by model");
        }
    }
}

struct ProviderRuntime {
    descriptor: ProviderDescriptor,
    client: Client,
    rate_limiter: RateLimiter,
    circuit: CircuitBreaker,
    /// Set once an auth/model-not-found error is seen; this (provider,
    /// model) pair is permanently unusable for the process lifetime, but
    /// does not trip the circuit (§4.6, would hide healthy siblings).
    disabled: std::sync::atomic::AtomicBool,
}

/// Drives the domain -> task matrix -> dispatch -> validate loop. Owns one
/// `ProviderRuntime` per enabled provider for the lifetime of the process.
pub struct Scheduler {
    config: Config,
    domains: DomainStore,
    responses: ResponseStore,
    providers: Vec<ProviderRuntime>,
}

impl Scheduler {
    pub fn new(config: Config, registry: &ProviderRegistry, domains: DomainStore, responses: ResponseStore) -> Self {
        let providers = registry
            .enabled_providers()
            .iter()
            .map(|descriptor| ProviderRuntime {
                descriptor: descriptor.clone(),
                client: Client::builder()
                    .timeout(Duration::from_millis(config.task.deadline_ms))
                    .build()
                    .expect("reqwest client builds with a sane timeout"),
                rate_limiter: RateLimiter::new(descriptor),
                circuit: CircuitBreaker::new(config.circuit.failure_threshold, config.circuit.reset_timeout_ms),
                disabled: std::sync::atomic::AtomicBool::new(false),
            })
            .collect();
        Self { config, domains, responses, providers }
    }

    /// Runs one scheduler cycle (§4.7 steps 1-6). Returns metrics for the
    /// lifecycle coordinator to log and, eventually, the process to exit on
    /// shutdown between cycles.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleMetrics> {
        let start = Instant::now();
        if self.providers.is_empty() {
            warn!("cycle skipped: zero enabled providers");
            return Ok(self.empty_metrics(start.elapsed()));
        }

        let expected_tensor_size = (self.providers.len() * self.config.prompts.len()) as i64;
        let domains = self.domains.claim_pending(self.config.cycle.batch_size, None)?;
        if domains.is_empty() {
            return Ok(self.empty_metrics(start.elapsed()));
        }

        let batch_id = new_batch_id(chrono::Utc::now());
        let mut succeeded = 0u64;
        let mut failed = 0u64;
        let mut attempted = 0u64;
        let mut hard_deadline_hit = false;
        let mut provider_accum: Vec<ProviderAccum> = self.providers.iter().map(|_| ProviderAccum::default()).collect();

        for domain in &domains {
            if start.elapsed() > Duration::from_secs(self.config.cycle.sla_max_secs) {
                error!(elapsed_secs = start.elapsed().as_secs(), "hard SLA deadline reached, stopping claims for this cycle");
                hard_deadline_hit = true;
                break;
            }
            if start.elapsed() > Duration::from_secs(self.config.cycle.sla_target_secs) {
                warn!(elapsed_secs = start.elapsed().as_secs(), "soft SLA deadline reached");
            }

            let tasks: Vec<(usize, &crate::config::PromptConfig)> = self
                .providers
                .iter()
                .enumerate()
                .flat_map(|(idx, _)| self.config.prompts.iter().map(move |p| (idx, p)))
                .collect();

            let results = stream::iter(tasks.into_iter().map(|(provider_idx, prompt)| {
                let domain = domain.clone();
                let batch_id = batch_id.clone();
                async move {
                    let outcome = self.dispatch_task(provider_idx, prompt, &domain.domain, &domain.id, &batch_id).await;
                    (provider_idx, outcome)
                }
            }))
            .buffer_unordered(self.config.worker_pool_size)
            .collect::<Vec<_>>()
            .await;

            let mut responses_to_write = Vec::new();
            for (provider_idx, result) in results {
                attempted += 1;
                provider_accum[provider_idx].attempted += 1;
                match result {
                    Ok(Some(response)) => {
                        succeeded += 1;
                        provider_accum[provider_idx].succeeded += 1;
                        provider_accum[provider_idx].latency_sum_ms += response.response_time_ms.max(0) as u64;
                        responses_to_write.push(response);
                    }
                    Ok(None) => {
                        failed += 1;
                        provider_accum[provider_idx].failed += 1;
                    }
                    Err(_) => {
                        failed += 1;
                        provider_accum[provider_idx].failed += 1;
                    }
                }
            }
            if !responses_to_write.is_empty() {
                self.responses.append_batch(&responses_to_write)?;
            }

            let validator = CompletionValidator::new(&self.domains, &self.responses, &self.config.validator);
            validator.validate_and_transition(&domain.id, expected_tensor_size)?;
        }

        let domains_completed = self
            .domains
            .completed_ids()?
            .iter()
            .filter(|id| domains.iter().any(|d| &d.id == *id))
            .count() as u64;

        let mut provider_stats = Vec::with_capacity(self.providers.len());
        for (runtime, accum) in self.providers.iter().zip(provider_accum.iter()) {
            let avg_latency_ms = if accum.succeeded > 0 { accum.latency_sum_ms as f64 / accum.succeeded as f64 } else { 0.0 };
            provider_stats.push(ProviderCycleStats {
                provider: runtime.descriptor.name.clone(),
                attempted: accum.attempted,
                succeeded: accum.succeeded,
                failed: accum.failed,
                avg_latency_ms,
                circuit_state: runtime.circuit.state_label().await,
            });
        }

        let since = chrono::Utc::now() - chrono::Duration::milliseconds(self.config.cycle.interval_ms as i64).max(chrono::Duration::seconds(1));
        let recent_by_model = self.responses.recent_by_model(since).unwrap_or_default();

        let metrics = CycleMetrics {
            tasks_attempted: attempted,
            tasks_succeeded: succeeded,
            tasks_failed: failed,
            domains_completed,
            domains_left_processing: domains.len() as u64 - domains_completed,
            elapsed: start.elapsed(),
            providers: provider_stats,
            recent_by_model,
        };
        metrics.log();
        if hard_deadline_hit {
            warn!("cycle stopped early due to hard SLA deadline; remaining claimed domains stay in processing");
        }
        Ok(metrics)
    }

    fn empty_metrics(&self, elapsed: Duration) -> CycleMetrics {
        CycleMetrics {
            tasks_attempted: 0,
            tasks_succeeded: 0,
            tasks_failed: 0,
            domains_completed: 0,
            domains_left_processing: 0,
            elapsed,
            providers: Vec::new(),
            recent_by_model: HashMap::new(),
        }
    }

    async fn dispatch_task(
        &self,
        provider_idx: usize,
        prompt: &crate::config::PromptConfig,
        domain_name: &str,
        domain_id: &str,
        batch_id: &str,
    ) -> anyhow::Result<Option<Response>> {
        let runtime = &self.providers[provider_idx];
        if runtime.disabled.load(std::sync::atomic::Ordering::Relaxed) {
            return Ok(None);
        }
        let adapter = runtime.descriptor.family.adapter();
        let prompt_text = prompt.template.replace("{domain}", domain_name);
        let max_attempts = self.config.task.retry_max;

        let outcome = dispatch_with_retry(&runtime.circuit, max_attempts, |_attempt| {
            let prompt_text = prompt_text.clone();
            let adapter = &adapter;
            let runtime = runtime;
            async move {
                let lease = runtime.rate_limiter.acquire().await;
                let prepared = adapter
                    .build_request(
                        &runtime.descriptor.endpoint,
                        &runtime.descriptor.model,
                        &prompt_text,
                        &lease.key,
                        None,
                        None,
                    )
                    .map_err(|e| (ErrorClass::Fatal, e.to_string()))?;

                let started = Instant::now();
                let resp = runtime
                    .client
                    .post(prepared.url)
                    .headers(prepared.headers)
                    .json(&prepared.body)
                    .send()
                    .await
                    .map_err(|e| classify_reqwest_error(&e))?;

                let status = resp.status();
                if status.as_u16() == 429 {
                    runtime.rate_limiter.record_rate_limited(&lease.key).await;
                    return Err((ErrorClass::RateLimited, "rate limited by upstream".to_string()));
                }
                if status.as_u16() == 401 || status.as_u16() == 403 || status.as_u16() == 404 {
                    return Err((ErrorClass::Fatal, format!("auth/not-found error: {status}")));
                }
                if !status.is_success() {
                    return Err((ErrorClass::Transient, format!("http {status}")));
                }

                let body = resp.text().await.map_err(|e| (ErrorClass::Transient, e.to_string()))?;
                let text = adapter.parse_response(&body).map_err(|e| (ErrorClass::Transient, e.to_string()))?;
                let latency_ms = started.elapsed().as_millis() as i64;
                Ok(Response {
                    domain_id: domain_id.to_string(),
                    model: runtime.descriptor.composite_model(),
                    prompt_type: prompt.prompt_type.clone(),
                    prompt: prompt_text.clone(),
                    response: text,
                    response_time_ms: latency_ms,
                    batch_id: batch_id.to_string(),
                    created_at: chrono::Utc::now(),
                })
            }
        })
        .await;

        match outcome {
            Ok(response) => Ok(Some(response)),
            Err(DispatchError::CircuitOpen) => Ok(None),
            Err(DispatchError::RetriesExhausted(msg)) => {
                warn!(provider = %runtime.descriptor.name, domain = %domain_name, error = %msg, "task failed after retries");
                Ok(None)
            }
            Err(DispatchError::Fatal(msg)) => {
                error!(provider = %runtime.descriptor.name, model = %runtime.descriptor.model, error = %msg, "auth/model-not-found error, disabling provider for process lifetime");
                runtime.disabled.store(true, std::sync::atomic::Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    #[cfg(test)]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn domains(&self) -> &DomainStore {
        &self.domains
    }

    pub fn responses(&self) -> &ResponseStore {
        &self.responses
    }

    pub fn expected_tensor_size(&self) -> i64 {
        (self.providers.len() * self.config.prompts.len()) as i64
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> (ErrorClass, String) {
    // every reqwest-level failure this sees (timeout, connect reset, body
    // read error) is retryable; anything truly fatal arrives as an HTTP
    // status code instead, handled above.
    (ErrorClass::Transient, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitConfig, CycleConfig, LockConfig, ProviderConfig, RateLimitConfig, ShutdownConfig, Tier, TaskConfig, ValidatorConfig};
    use crate::providers::ProviderFamily;
    use crate::store::domain::DomainStore;
    use crate::store::response::ResponseStore;
    use tempfile::tempdir;

    fn test_config(data_dir: std::path::PathBuf) -> Config {
        Config {
            data_dir: data_dir.clone(),
            worker_pool_size: 4,
            cycle: CycleConfig::default(),
            task: TaskConfig::default(),
            circuit: CircuitConfig::default(),
            validator: ValidatorConfig::default(),
            lock: LockConfig { path: data_dir.join("scheduler.lock"), stale_after_ms: 3_600_000 },
            shutdown: ShutdownConfig::default(),
            prompts: vec![crate::config::PromptConfig {
                prompt_type: "business_analysis".to_string(),
                template: "Analyze {domain}.".to_string(),
            }],
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
        }
    }

    #[test]
    fn scheduler_builds_one_runtime_per_enabled_provider() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = ProviderRegistry::load(&config.providers).unwrap();
        let domains = DomainStore::open(&dir.path().join("d.db")).unwrap();
        let responses = ResponseStore::open(&dir.path().join("r.db")).unwrap();
        let scheduler = Scheduler::new(config, &registry, domains, responses);
        assert_eq!(scheduler.provider_count(), 1);
    }

    #[test]
    fn expected_tensor_size_is_providers_times_prompts() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let prompt_count = config.prompts.len();
        let registry = ProviderRegistry::load(&config.providers).unwrap();
        let domains = DomainStore::open(&dir.path().join("d.db")).unwrap();
        let responses = ResponseStore::open(&dir.path().join("r.db")).unwrap();
        let scheduler = Scheduler::new(config, &registry, domains, responses);
        assert_eq!(scheduler.expected_tensor_size(), prompt_count as i64);
    }

    #[tokio::test]
    async fn cycle_with_no_pending_domains_makes_no_changes() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = ProviderRegistry::load(&config.providers).unwrap();
        let domains = DomainStore::open(&dir.path().join("d.db")).unwrap();
        let responses = ResponseStore::open(&dir.path().join("r.db")).unwrap();
        let scheduler = Scheduler::new(config, &registry, domains, responses);
        let metrics = scheduler.run_cycle().await.unwrap();
        assert_eq!(metrics.tasks_attempted, 0);
        assert_eq!(metrics.domains_completed, 0);
        assert!(metrics.providers.is_empty());
        assert!(metrics.recent_by_model.is_empty());
    }
}
