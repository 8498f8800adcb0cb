use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names;
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
            metric_names::METRIC_L1_HIT,
            Unit::Count,
            "Total number of ephemeral-tier hits."
        );
        describe_counter!(
            metric_names::METRIC_L1_MISS,
            Unit::Count,
            "Total number of ephemeral-tier misses, including expired entries."
        );
        describe_counter!(
            metric_names::METRIC_L1_EVICT,
            Unit::Count,
            "Total number of ephemeral-tier evictions due to capacity."
        );
        describe_counter!(
            metric_names::METRIC_L2_HIT,
            Unit::Count,
            "Total number of durable-tier hits."
        );
        describe_counter!(
            metric_names::METRIC_L2_MISS,
            Unit::Count,
            "Total number of durable-tier misses."
        );
        describe_counter!(
            metric_names::METRIC_L2_ERROR,
            Unit::Count,
            "Durable-tier reads that failed or timed out and were treated as misses."
        );
        describe_counter!(
            metric_names::METRIC_WRITE_ERROR,
            Unit::Count,
            "Durable-tier writes that failed and were swallowed."
        );
        describe_counter!(
            metric_names::METRIC_FETCH_TOTAL,
            Unit::Count,
            "Total number of upstream fetches issued."
        );
        describe_counter!(
            metric_names::METRIC_FETCH_ERROR,
            Unit::Count,
            "Total number of upstream fetches that failed."
        );
        describe_counter!(
            metric_names::METRIC_FETCH_COALESCED,
            Unit::Count,
            "Callers that joined an in-flight fetch instead of issuing their own."
        );
        describe_histogram!(
            metric_names::METRIC_FETCH_MS,
            Unit::Milliseconds,
            "Upstream fetch latency in milliseconds."
        );
        describe_gauge!(
            metric_names::METRIC_IN_FLIGHT,
            Unit::Count,
            "Current number of upstream fetches in flight."
        );
    });
}
