use std::{io, sync::Once};

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::publishing::METRIC_MOVED,
    cache::{METRIC_EVICT, METRIC_HIT, METRIC_INVALIDATE, METRIC_MISS},
    config::{LogFormat, LoggingSettings},
    infra::flatfile::METRIC_MALFORMED_RECORD,
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so that `page` can write the rendered page to stdout.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed(),
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
        describe_counter!(METRIC_HIT, Unit::Count, "Total number of page cache hits.");
        describe_counter!(METRIC_MISS, Unit::Count, "Total number of page cache misses.");
        describe_counter!(
            METRIC_EVICT,
            Unit::Count,
            "Total number of page cache evictions due to capacity."
        );
        describe_counter!(
            METRIC_INVALIDATE,
            Unit::Count,
            "Total number of whole-cache invalidations after a store change."
        );
        describe_counter!(
            METRIC_MALFORMED_RECORD,
            Unit::Count,
            "Total number of malformed store records skipped while reading."
        );
        describe_counter!(
            METRIC_MOVED,
            Unit::Count,
            "Total number of links moved from staging to the published store."
        );
    });
}
