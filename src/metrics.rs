//! Prometheus metrics collection for dynchan.
//!
//! - `dynchan_channels_spawned_total` - Children created by spawners
//! - `dynchan_channels_destroyed_total` - Expired children deleted
//! - `dynchan_channels_renamed_total` - Display name updates issued
//! - `dynchan_records_dropped_total{reason}` - Records removed for platform drift
//! - `dynchan_records_undecodable_total` - Stored documents skipped on read
//! - `dynchan_transition_errors_total{error}` - Failed transitions by error code
//! - `dynchan_reconcile_passes_total` / `dynchan_reconcile_duration_seconds`
//! - `dynchan_lock_domains` - Live per-channel locks

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

pub static CHANNELS_SPAWNED: OnceLock<IntCounter> = OnceLock::new();

pub static CHANNELS_DESTROYED: OnceLock<IntCounter> = OnceLock::new();

pub static CHANNELS_RENAMED: OnceLock<IntCounter> = OnceLock::new();

/// Records removed because their tenant or channel vanished.
pub static RECORDS_DROPPED: OnceLock<IntCounterVec> = OnceLock::new();

/// Stored documents that failed to decode and were skipped.
pub static RECORDS_UNDECODABLE: OnceLock<IntCounter> = OnceLock::new();

pub static TRANSITION_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

pub static RECONCILE_PASSES: OnceLock<IntCounter> = OnceLock::new();

// ========================================================================
// Gauges and histograms
// ========================================================================

pub static RECONCILE_DURATION: OnceLock<Histogram> = OnceLock::new();

pub static LOCK_DOMAINS: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before metrics are scraped. Recording
/// before `init` is a silent no-op.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(CHANNELS_SPAWNED, IntCounter::new("dynchan_channels_spawned_total", "Child channels spawned"));
    register!(CHANNELS_DESTROYED, IntCounter::new("dynchan_channels_destroyed_total", "Expired child channels destroyed"));
    register!(CHANNELS_RENAMED, IntCounter::new("dynchan_channels_renamed_total", "Channel renames issued"));
    register!(RECORDS_DROPPED, IntCounterVec::new(Opts::new("dynchan_records_dropped_total", "Records removed for platform drift"), &["reason"]));
    register!(RECORDS_UNDECODABLE, IntCounter::new("dynchan_records_undecodable_total", "Stored channel documents that failed to decode"));
    register!(TRANSITION_ERRORS, IntCounterVec::new(Opts::new("dynchan_transition_errors_total", "Failed lifecycle transitions by error"), &["error"]));
    register!(RECONCILE_PASSES, IntCounter::new("dynchan_reconcile_passes_total", "Completed reconciliation passes"));
    register!(RECONCILE_DURATION, Histogram::with_opts(
        HistogramOpts::new("dynchan_reconcile_duration_seconds", "Reconciliation pass duration")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0])));
    register!(LOCK_DOMAINS, IntGauge::new("dynchan_lock_domains", "Live per-channel lock domains"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for lifecycle metric updates
// ============================================================================

#[inline]
fn inc(metric: &OnceLock<IntCounter>) {
    if let Some(c) = metric.get() {
        c.inc();
    }
}

#[inline]
pub fn record_spawn() {
    inc(&CHANNELS_SPAWNED);
}

#[inline]
pub fn record_destroy() {
    inc(&CHANNELS_DESTROYED);
}

#[inline]
pub fn record_rename() {
    inc(&CHANNELS_RENAMED);
}

#[inline]
pub fn record_drop(reason: &str) {
    if let Some(c) = RECORDS_DROPPED.get() {
        c.with_label_values(&[reason]).inc();
    }
}

#[inline]
pub fn record_undecodable() {
    inc(&RECORDS_UNDECODABLE);
}

#[inline]
pub fn record_transition_error(error: &str) {
    if let Some(c) = TRANSITION_ERRORS.get() {
        c.with_label_values(&[error]).inc();
    }
}

/// Record a finished reconciliation pass.
#[inline]
pub fn record_reconcile_pass(duration_secs: f64, lock_domains: usize) {
    inc(&RECONCILE_PASSES);
    if let Some(h) = RECONCILE_DURATION.get() {
        h.observe(duration_secs);
    }
    if let Some(g) = LOCK_DOMAINS.get() {
        g.set(lock_domains as i64);
    }
}
