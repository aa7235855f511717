//! Telemetry and structured logging for conversions.

use crate::conversion::{ConversionRecord, ConversionStatus};
use crate::resource::ResourceStats;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

const TRACER_NAME: &str = "ppt-export-server";

/// Conversions slower than this are logged as warnings.
const SLOW_CONVERSION_MS: i64 = 5000;

/// Records a span and structured log events for a finished conversion.
pub fn record_conversion_telemetry(record: &ConversionRecord) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("fixed_format_export");

    span.set_attribute(KeyValue::new("conversion_id", record.conversion_id.clone()));
    span.set_attribute(KeyValue::new("status", record.status.to_string()));
    span.set_attribute(KeyValue::new("input_bytes", record.input_bytes as i64));
    if let Some(output_bytes) = record.output_bytes {
        span.set_attribute(KeyValue::new("output_bytes", output_bytes as i64));
    }
    if let Some(ref filename) = record.filename {
        span.set_attribute(KeyValue::new("filename", filename.clone()));
    }

    if let Some(duration_ms) = record.duration_ms() {
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));

        info!(
            conversion_id = %record.conversion_id,
            status = %record.status,
            input_bytes = record.input_bytes,
            output_bytes = ?record.output_bytes,
            duration_ms = duration_ms,
            "Conversion finished"
        );

        if duration_ms > SLOW_CONVERSION_MS {
            warn!(
                conversion_id = %record.conversion_id,
                duration_ms = duration_ms,
                "Conversion exceeded performance threshold ({}ms)",
                SLOW_CONVERSION_MS
            );
        }
    }

    if matches!(
        record.status,
        ConversionStatus::Failed | ConversionStatus::Rejected
    ) {
        if let Some(ref error) = record.error {
            span.set_attribute(KeyValue::new("error", error.clone()));
        }
    }

    span.end();
}

/// Records the engine manager's counters, e.g. on shutdown.
pub fn record_engine_stats(stats: &ResourceStats) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("engine_stats");

    span.set_attribute(KeyValue::new("created", stats.created as i64));
    span.set_attribute(KeyValue::new("completed", stats.completed as i64));
    span.set_attribute(KeyValue::new("discarded", stats.discarded as i64));
    span.end();

    info!(
        created = stats.created,
        completed = stats.completed,
        discarded = stats.discarded,
        "Engine statistics"
    );
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Reads `OTEL_EXPORTER_OTLP_ENDPOINT` (default `http://localhost:4317`) and
/// `OTEL_SERVICE_NAME` (default `ppt-export-server`). Must run inside a tokio
/// runtime.
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}

/// Flushes and shuts down the global tracer provider.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_complete_conversion() {
        let mut record = ConversionRecord::new(Some("deck.pptx".to_string()), 2048);
        record.start_converting();
        record.mark_complete(4096);

        // Uses the no-op global tracer; must not panic.
        record_conversion_telemetry(&record);
    }

    #[test]
    fn test_record_failed_conversion() {
        let mut record = ConversionRecord::new(None, 0);
        record.mark_rejected("document is empty".to_string());

        record_conversion_telemetry(&record);
    }

    #[test]
    fn test_record_engine_stats() {
        record_engine_stats(&ResourceStats {
            created: 1,
            active: 0,
            completed: 3,
            discarded: 0,
            running: true,
        });
    }
}
