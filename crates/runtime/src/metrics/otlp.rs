//! OpenTelemetry OTLP metrics exporter.
//!
//! Records query supervisor and sync service metrics as OpenTelemetry gauge
//! instruments and exports them via gRPC or HTTP to any OTLP-compatible
//! collector (e.g. Prometheus, Grafana Alloy, Datadog, New Relic).

use super::{MetricsError, MetricsExporter, MetricsSnapshot, OtlpConfig, OtlpProtocol};
use async_trait::async_trait;
use opentelemetry::metrics::{Gauge, MeterProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::time::Duration;

/// Holds all OpenTelemetry gauge instruments.
struct Instruments {
    // Query supervisor
    queries_started: Gauge<f64>,
    queries_completed: Gauge<f64>,
    queries_failed: Gauge<f64>,
    queries_start_failed: Gauge<f64>,
    active_queries: Gauge<f64>,
    pending_queries: Gauge<f64>,
    concurrency_limit: Gauge<f64>,
    query_duration_count: Gauge<f64>,
    query_duration_sum_ms: Gauge<f64>,
    // Sync service
    remotes_total: Gauge<f64>,
    remotes_connected: Gauge<f64>,
    last_sync_errors: Gauge<f64>,
}

/// Exports metrics via OpenTelemetry OTLP protocol.
pub struct OtlpExporter {
    provider: SdkMeterProvider,
    instruments: Instruments,
}

impl OtlpExporter {
    /// Create a new OTLP exporter from configuration.
    pub fn new(
        config: OtlpConfig,
        service_name: &str,
        service_namespace: &str,
        export_interval: Duration,
    ) -> Result<Self, MetricsError> {
        use opentelemetry::KeyValue;
        use opentelemetry_otlp::MetricExporter;
        use opentelemetry_sdk::metrics::PeriodicReader;
        use opentelemetry_sdk::Resource;

        let timeout = Duration::from_secs(config.timeout_seconds);

        let metric_exporter = match config.protocol {
            OtlpProtocol::Grpc => MetricExporter::builder()
                .with_tonic()
                .with_endpoint(&config.endpoint)
                .with_timeout(timeout)
                .build()
                .map_err(|e| {
                    MetricsError::ConfigError(format!("Failed to build gRPC OTLP exporter: {}", e))
                })?,
            OtlpProtocol::HttpBinary | OtlpProtocol::HttpJson => MetricExporter::builder()
                .with_http()
                .with_endpoint(&config.endpoint)
                .with_timeout(timeout)
                .build()
                .map_err(|e| {
                    MetricsError::ConfigError(format!("Failed to build HTTP OTLP exporter: {}", e))
                })?,
        };

        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(export_interval)
            .build();

        let resource = Resource::builder()
            .with_service_name(service_name.to_string())
            .with_attribute(KeyValue::new(
                "service.namespace",
                service_namespace.to_string(),
            ))
            .build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();

        let meter = provider.meter("loomcore.runtime");

        let instruments = Instruments {
            queries_started: meter
                .f64_gauge("supervisor.queries_started")
                .with_description("Total number of queries admitted")
                .build(),
            queries_completed: meter
                .f64_gauge("supervisor.queries_completed")
                .with_description("Total number of queries that completed successfully")
                .build(),
            queries_failed: meter
                .f64_gauge("supervisor.queries_failed")
                .with_description("Total number of queries that failed or were interrupted")
                .build(),
            queries_start_failed: meter
                .f64_gauge("supervisor.queries_start_failed")
                .with_description("Total number of queries that never reached the running state")
                .build(),
            active_queries: meter
                .f64_gauge("supervisor.active_queries")
                .with_description("Number of queries currently running")
                .build(),
            pending_queries: meter
                .f64_gauge("supervisor.pending_queries")
                .with_description("Number of queries waiting in the pending queue")
                .build(),
            concurrency_limit: meter
                .f64_gauge("supervisor.concurrency_limit")
                .with_description("Configured maximum number of concurrently running queries")
                .build(),
            query_duration_count: meter
                .f64_gauge("supervisor.query_duration_ms.count")
                .with_description("Number of samples recorded in the query duration histogram")
                .build(),
            query_duration_sum_ms: meter
                .f64_gauge("supervisor.query_duration_ms.sum")
                .with_description("Cumulative query duration in milliseconds")
                .build(),
            remotes_total: meter
                .f64_gauge("sync.remotes_total")
                .with_description("Number of remotes registered with the sync service")
                .build(),
            remotes_connected: meter
                .f64_gauge("sync.remotes_connected")
                .with_description("Number of remotes currently connected")
                .build(),
            last_sync_errors: meter
                .f64_gauge("sync.last_sync_errors")
                .with_description("Number of remotes whose last sync attempt failed")
                .build(),
        };

        tracing::info!(
            "OTLP metrics exporter initialized: endpoint={}, protocol={:?}",
            config.endpoint,
            config.protocol
        );

        Ok(Self {
            provider,
            instruments,
        })
    }
}

#[async_trait]
impl MetricsExporter for OtlpExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), MetricsError> {
        let i = &self.instruments;

        // Query supervisor
        i.queries_started
            .record(snapshot.supervisor.queries_started as f64, &[]);
        i.queries_completed
            .record(snapshot.supervisor.queries_completed as f64, &[]);
        i.queries_failed
            .record(snapshot.supervisor.queries_failed as f64, &[]);
        i.queries_start_failed
            .record(snapshot.supervisor.queries_start_failed as f64, &[]);
        i.active_queries
            .record(snapshot.supervisor.active_queries as f64, &[]);
        i.pending_queries
            .record(snapshot.supervisor.pending_queries as f64, &[]);
        i.concurrency_limit
            .record(snapshot.supervisor.concurrency_limit as f64, &[]);
        i.query_duration_count
            .record(snapshot.supervisor.query_duration_ms.count as f64, &[]);
        i.query_duration_sum_ms
            .record(snapshot.supervisor.query_duration_ms.sum_ms as f64, &[]);

        // Sync service
        i.remotes_total
            .record(snapshot.sync.remotes_total as f64, &[]);
        i.remotes_connected
            .record(snapshot.sync.remotes_connected as f64, &[]);
        i.last_sync_errors
            .record(snapshot.sync.last_sync_errors as f64, &[]);

        tracing::trace!("Recorded metrics snapshot to OTLP gauges");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MetricsError> {
        self.provider.shutdown().map_err(|e| {
            MetricsError::ShutdownFailed(format!("OTLP meter provider shutdown failed: {}", e))
        })
    }
}
