use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "lucido_units_rendered_total",
            Unit::Count,
            "Total number of rendered units, labelled by source."
        );
        describe_counter!(
            "lucido_render_attempts_total",
            Unit::Count,
            "Total number of unit generation attempts, including retries."
        );
        describe_counter!(
            "lucido_render_fallback_total",
            Unit::Count,
            "Total number of units that exhausted retries and used the fallback template."
        );
        describe_counter!(
            "lucido_planner_repair_rounds_total",
            Unit::Count,
            "Total number of outline repair rounds sent back to the model."
        );
        describe_counter!(
            "lucido_inspection_repair_total",
            Unit::Count,
            "Total number of vision-guided repairs applied past the severity gate."
        );
        describe_counter!(
            "lucido_inspection_skipped_total",
            Unit::Count,
            "Total number of inspections skipped by the severity gate or degraded to a no-op."
        );
        describe_counter!(
            "lucido_pipeline_unit_failures_total",
            Unit::Count,
            "Total number of units that could not be persisted during a pipeline run."
        );
        describe_histogram!(
            "lucido_inspection_ms",
            Unit::Milliseconds,
            "Visual inspection latency in milliseconds, capture through verdict."
        );
    });
}
