//! Periodic reconciliation.
//!
//! A pass walks a snapshot of every record and re-derives its state under
//! that record's lock, exactly like the event path would. Failures are
//! isolated per record; the next pass is the retry.

use super::{DropReason, LifecycleEngine, Transition};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::state::{ChannelKey, ChannelKind};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, warn};

/// Tally of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub visited: usize,
    pub spawned: usize,
    pub renamed: usize,
    pub destroyed: usize,
    pub dropped: usize,
    pub held: usize,
    pub failed: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: &Transition) {
        match outcome {
            Transition::Spawned { .. } => self.spawned += 1,
            Transition::Renamed { .. } => self.renamed += 1,
            Transition::Destroyed => self.destroyed += 1,
            Transition::Dropped(_) => self.dropped += 1,
            Transition::Held => self.held += 1,
            Transition::Unchanged | Transition::Untracked => {}
        }
    }
}

impl LifecycleEngine {
    /// Run one full pass over every stored record.
    ///
    /// Only a failure to open the snapshot aborts the pass.
    pub async fn reconcile_pass(&self) -> EngineResult<PassSummary> {
        let started = Instant::now();
        let mut summary = PassSummary::default();

        for channel in self.store.scan_all()? {
            let key = channel.key();
            summary.visited += 1;
            match self.reconcile_channel(key).await {
                Ok(outcome) => {
                    debug!(channel = %key, ?outcome, "Reconciled channel");
                    summary.record(&outcome);
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::record_transition_error(e.error_code());
                    warn!(channel = %key, error = %e, "Reconciliation failed for channel");
                }
            }
        }

        metrics::record_reconcile_pass(started.elapsed().as_secs_f64(), self.locks.domain_count());
        Ok(summary)
    }

    /// Re-derive the state of one channel.
    ///
    /// The snapshot entry only names the channel; the record is re-read under
    /// the lock, so one removed since the snapshot is skipped.
    pub async fn reconcile_channel(&self, key: ChannelKey) -> EngineResult<Transition> {
        let _guard = self.locks.acquire(key).await;
        let Some(channel) = self.load(key)? else {
            return Ok(Transition::Untracked);
        };

        let tenant_exists = self
            .platform
            .tenant_exists(key.tenant_id)
            .await
            .map_err(|e| EngineError::platform("tenant_exists", key, e))?;
        if !tenant_exists {
            return self.drop_record(key, DropReason::TenantGone);
        }

        let resource_exists = self
            .platform
            .resource_exists(key)
            .await
            .map_err(|e| EngineError::platform("resource_exists", key, e))?;
        if !resource_exists {
            return self.drop_record(key, DropReason::ResourceGone);
        }

        match channel.config.kind {
            ChannelKind::Spawner => self.spawn_locked(&channel).await,
            _ => self.settle_locked(&channel, Utc::now()).await,
        }
    }
}

/// Run reconciliation passes every `interval` until shutdown.
///
/// Nothing runs until `ready` turns true; the first pass follows
/// immediately after.
pub fn spawn_reconciler(
    engine: Arc<LifecycleEngine>,
    interval: Duration,
    mut ready: watch::Receiver<bool>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = ready.wait_for(|ready| *ready) => {
                if result.is_err() {
                    info!("Readiness signal dropped, reconciler not started");
                    return;
                }
            }
            _ = shutdown.recv() => {
                info!("Reconciler stopped before platform became ready");
                return;
            }
        }

        info!(interval_secs = interval.as_secs(), "Reconciler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pass: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    pass += 1;
                    let span = info_span!("reconcile", pass);
                    match engine.reconcile_pass().instrument(span).await {
                        Ok(summary) => info!(
                            pass,
                            visited = summary.visited,
                            spawned = summary.spawned,
                            renamed = summary.renamed,
                            destroyed = summary.destroyed,
                            held = summary.held,
                            dropped = summary.dropped,
                            failed = summary.failed,
                            "Reconciliation pass complete"
                        ),
                        Err(e) => warn!(pass, error = %e, "Reconciliation pass aborted"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Reconciler shutting down");
                    break;
                }
            }
        }
    })
}
