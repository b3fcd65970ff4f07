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
            "vellum_requests_total",
            Unit::Count,
            "Requests handled by the dispatcher, labelled by outcome."
        );
        describe_counter!(
            "vellum_render_failures_total",
            Unit::Count,
            "Render failures attributed to a request path."
        );
        describe_counter!(
            "vellum_unattributed_failures_total",
            Unit::Count,
            "Failures raised outside any in-flight request."
        );
        describe_counter!(
            "vellum_route_rebuild_total",
            Unit::Count,
            "Route table rebuilds that installed a new snapshot."
        );
        describe_counter!(
            "vellum_route_cache_clear_total",
            Unit::Count,
            "Route match cache clears triggered by content changes."
        );
        describe_histogram!(
            "vellum_render_ms",
            Unit::Milliseconds,
            "Time from dispatch to render completion in milliseconds."
        );
    });
}
