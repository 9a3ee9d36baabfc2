use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{PurgePolicy, StagingArea};
use crate::config::StagingConfig;
use crate::observability::Metrics;

/// Retention applied by the background sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    pub max_age: Duration,
    pub max_total_bytes: u64,
    pub interval: Duration,
}

impl From<&StagingConfig> for SweepPolicy {
    fn from(config: &StagingConfig) -> Self {
        Self {
            max_age: config.max_age(),
            max_total_bytes: config.max_total_bytes.as_u64(),
            interval: config.sweep_interval(),
        }
    }
}

/// Apply age then size retention every `interval` until `cancel` fires
pub async fn run_sweeper(
    staging: Arc<StagingArea>,
    policy: SweepPolicy,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; nothing is staged yet at startup
    ticker.tick().await;

    info!(interval_secs = policy.interval.as_secs(), "Staging sweeper started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let aged = staging.purge(PurgePolicy::OlderThan(policy.max_age)).await;
        let budget = staging
            .purge(PurgePolicy::OverBudget(policy.max_total_bytes))
            .await;
        let orphans = staging.discard_orphans().await;

        metrics.files_purged(aged.files_removed + budget.files_removed);
        debug!(
            aged = aged.files_removed,
            over_budget = budget.files_removed,
            orphans,
            bytes_freed = aged.bytes_freed + budget.bytes_freed,
            "Sweep finished"
        );
    }

    info!("Staging sweeper stopped");
}
