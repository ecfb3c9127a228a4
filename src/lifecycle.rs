//! Lifecycle Coordinator (§4.9): startup lock plus the graceful-shutdown
//! drain loop around the scheduler's cycle. The teacher's daemon never
//! shuts down gracefully (it runs until killed); the SIGTERM/SIGINT
//! handling and drain timeout here are new.

use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use crate::config::Config;
use crate::lock::ProcessLock;
use crate::scheduler::{CycleMetrics, Scheduler};
use crate::validator::CompletionValidator;

enum CycleOutcome {
    Finished(anyhow::Result<CycleMetrics>),
    Signaled(&'static str),
}

pub async fn run(config: Config, scheduler: Scheduler) -> Result<()> {
    let lock = ProcessLock::acquire(&config.lock.path, Duration::from_millis(config.lock.stale_after_ms))?;
    info!(path = %config.lock.path.display(), "startup lock acquired");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let drain_timeout = Duration::from_millis(config.shutdown.drain_timeout_ms);

    let mut cycle_count: u64 = 0;
    let result: Result<()> = loop {
        let reconcile_due = cycle_count % config.validator.reconcile_every_n_cycles == 0;
        let cycle_future = scheduler.run_cycle();
        tokio::pin!(cycle_future);

        let outcome = tokio::select! {
            res = &mut cycle_future => CycleOutcome::Finished(res),
            name = async {
                tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                }
            } => CycleOutcome::Signaled(name),
        };

        // (a)/(d)-suspended tasks (key-slot acquisition, provider in-flight
        // semaphore) never reach a response row, so a timed-out drain has
        // nothing to persist for them beyond this log line.
        let (cycle_result, shutting_down) = match outcome {
            CycleOutcome::Finished(res) => (res, false),
            CycleOutcome::Signaled(signal_name) => {
                info!(signal = signal_name, drain_timeout_ms = config.shutdown.drain_timeout_ms, "shutdown signal received, draining in-flight cycle");
                match tokio::time::timeout(drain_timeout, &mut cycle_future).await {
                    Ok(res) => (res, true),
                    Err(_) => {
                        tracing::warn!(
                            signal = signal_name,
                            drain_timeout_ms = config.shutdown.drain_timeout_ms,
                            reason = "shutdown",
                            "drain timeout elapsed, in-flight tasks recorded failed_terminal"
                        );
                        break Ok(());
                    }
                }
            }
        };

        match cycle_result {
            Ok(metrics) => {
                if reconcile_due {
                    if let Err(e) = reconcile(&scheduler, &config) {
                        tracing::error!(error = %e, "reconciliation pass failed");
                    }
                }
                cycle_count += 1;
                if shutting_down {
                    info!(tasks_succeeded = metrics.tasks_succeeded, "in-flight cycle drained before shutdown");
                    break Ok(());
                }
                if metrics.tasks_attempted == 0 {
                    tokio::time::sleep(Duration::from_millis(config.cycle.interval_ms)).await;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "cycle failed, backing off before retry");
                if shutting_down {
                    break Err(e);
                }
                tokio::time::sleep(Duration::from_millis(config.cycle.interval_ms)).await;
            }
        }
    };

    info!(drain_timeout_ms = config.shutdown.drain_timeout_ms, "shutdown drain complete");
    lock.release()?;
    result
}

fn reconcile(scheduler: &Scheduler, config: &Config) -> Result<()> {
    let validator = CompletionValidator::new(scheduler.domains(), scheduler.responses(), &config.validator);
    let reset_count = validator.reconcile(scheduler.expected_tensor_size())?;
    if reset_count > 0 {
        info!(reset_count, "reconciliation reset domains back to pending");
    }
    Ok(())
}
