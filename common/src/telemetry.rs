// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// `RUST_LOG` wins over `log_level` when set. JSON output carries the current
/// span so operation fields (schedule_id, actor) appear on every line.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus recorder and describe every metric
///
/// The returned handle renders the exposition text for the `/metrics` route.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_metrics();
    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

pub fn describe_metrics() {
    describe_counter!(
        "timetable_slots_committed_total",
        "Slots written to a schedule, by source"
    );
    describe_counter!(
        "timetable_placements_skipped_total",
        "Generated placements rejected during validation"
    );
    describe_counter!(
        "timetable_history_versions_total",
        "History versions recorded"
    );
    describe_counter!(
        "timetable_reasoning_failures_total",
        "Reasoning service calls that failed or returned unusable output"
    );
    describe_counter!(
        "timetable_schedules_finalized_total",
        "Schedules moved to the finalized state"
    );
}

/// `source` is one of external, manual, import, generated
#[inline]
pub fn record_slot_committed(source: &'static str) {
    counter!("timetable_slots_committed_total", "source" => source).increment(1);
}

#[inline]
pub fn record_placement_skipped(reason: &str) {
    counter!("timetable_placements_skipped_total", "reason" => reason.to_string()).increment(1);
}

#[inline]
pub fn record_history_version() {
    counter!("timetable_history_versions_total").increment(1);
}

#[inline]
pub fn record_reasoning_failure(kind: &'static str) {
    counter!("timetable_reasoning_failures_total", "kind" => kind).increment(1);
}

#[inline]
pub fn record_schedule_finalized(level: Option<i32>) {
    let level = level.map_or_else(|| "none".to_string(), |l| l.to_string());
    counter!("timetable_schedules_finalized_total", "level" => level).increment(1);
}
