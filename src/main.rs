//! Multi-provider LLM crawl scheduler: fan-out, rate limiting, and
//! completeness validation over a domain catalog. Bootstrap sequence
//! follows the teacher's `keyvault/src/main.rs` (tracing init, config,
//! persistence, then the long-running loop); the Keychain/vault/JSON-RPC
//! portions of that bootstrap have no counterpart here and are replaced
//! by the scheduler loop and signal-driven shutdown.

use anyhow::{Context, Result};
use tracing::info;

mod config;
mod lifecycle;
mod lock;
mod providers;
mod scheduler;
mod store;
mod validator;

use config::Config;
use providers::registry::ProviderRegistry;
use scheduler::Scheduler;
use store::domain::DomainStore;
use store::response::ResponseStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crawl_scheduler=info".into()),
        )
        .with_target(false)
        .init();

    info!("crawl-scheduler v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("failed to load configuration")?;
    info!(data_dir = %config.data_dir.display(), providers = config.providers.len(), "configuration loaded");

    let registry = ProviderRegistry::load(&config.providers).context("failed to build provider registry")?;
    info!(enabled = registry.enabled_providers().len(), "provider registry ready");

    let domains = DomainStore::open(&config.db_path()).context("failed to open domain store")?;
    let responses = ResponseStore::open(&config.db_path()).context("failed to open response store")?;

    let scheduler = Scheduler::new(config.clone(), &registry, domains, responses);

    lifecycle::run(config, scheduler).await
}
