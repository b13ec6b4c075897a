use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "outcache_hit_total",
            Unit::Count,
            "Total number of requests answered from a fresh stored response."
        );
        describe_counter!(
            "outcache_miss_total",
            Unit::Count,
            "Total number of cacheable requests with no usable stored response."
        );
        describe_counter!(
            "outcache_not_modified_total",
            Unit::Count,
            "Total number of conditional requests answered with 304."
        );
        describe_counter!(
            "outcache_store_total",
            Unit::Count,
            "Total number of responses written to the store."
        );
        describe_counter!(
            "outcache_evict_total",
            Unit::Count,
            "Total number of stored responses evicted due to capacity."
        );
        describe_counter!(
            "outcache_lock_wait_total",
            Unit::Count,
            "Total number of requests that waited on an in-flight computation."
        );
        describe_counter!(
            "outcache_lock_timeout_total",
            Unit::Count,
            "Total number of waits that gave up after the lock timeout."
        );
    });
}
