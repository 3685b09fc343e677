use crate::config::{LogFormat, TelemetryConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const PAGES_FETCHED: &str = "puller_pages_fetched";
pub const RECORDS_LOADED: &str = "puller_records_loaded";
pub const LOAD_JOBS: &str = "puller_load_jobs";
pub const FANOUT_FAILURES: &str = "puller_fanout_failures";
pub const KEYS_HARVESTED: &str = "puller_keys_harvested";

pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        describe();

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    Ok(())
}

fn describe() {
    metrics::describe_counter!(PAGES_FETCHED, "Pages fetched from remote list APIs");
    metrics::describe_counter!(RECORDS_LOADED, "Records handed to the sink");
    metrics::describe_counter!(LOAD_JOBS, "Load jobs submitted to the sink");
    metrics::describe_counter!(FANOUT_FAILURES, "Fan-out keys that failed");
    metrics::describe_counter!(KEYS_HARVESTED, "Keys collected by harvest passes");
}

pub fn shutdown() {
    tracing::info!("Shutting down telemetry");
}
