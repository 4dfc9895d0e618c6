//! `OpenTelemetry` metrics export.
//!
//! Only compiled with the `metrics` Cargo feature. Sets up the OTLP
//! exporters and exposes the counters the server records, most importantly
//! the outcome of best-effort side effects (profile sync, credential emails)
//! so operators can alert on failure rates that never surface as request
//! errors.

use std::sync::OnceLock;

use opentelemetry::metrics::Counter;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Errors that can occur during metrics pipeline initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to build an OTLP exporter.
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// Failed during `OTel` SDK shutdown or flush.
    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the `OpenTelemetry` providers alive; call [`MetricsGuard::shutdown`]
/// before exit to flush.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// Gracefully shut down both providers, flushing any buffered telemetry.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Initialise the OTLP pipeline for traces and metrics.
///
/// * `endpoint` -- OTLP receiver URL, e.g. `"http://localhost:4317"` (gRPC).
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();

    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

fn side_effect_counter() -> &'static Counter<u64> {
    static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
    COUNTER.get_or_init(|| {
        global::meter("hivelink")
            .u64_counter("hivelink.side_effects")
            .with_description("Best-effort side effects by kind and outcome")
            .build()
    })
}

fn sponsorship_counter() -> &'static Counter<u64> {
    static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
    COUNTER.get_or_init(|| {
        global::meter("hivelink")
            .u64_counter("hivelink.sponsorships.finished")
            .with_description("Sponsorship workflows reaching a terminal state")
            .build()
    })
}

/// Count one best-effort side effect.
pub fn record_side_effect(kind: &'static str, succeeded: bool) {
    side_effect_counter().add(
        1,
        &[
            KeyValue::new("kind", kind),
            KeyValue::new("outcome", if succeeded { "ok" } else { "failed" }),
        ],
    );
}

/// Count a sponsorship workflow reaching `completed` or `failed`.
pub fn record_sponsorship_outcome(status: &'static str) {
    sponsorship_counter().add(1, &[KeyValue::new("status", status)]);
}
