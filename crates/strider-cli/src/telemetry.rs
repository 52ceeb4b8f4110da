//! Tracing pipeline initialisation for Strider.
//!
//! Call [`init_tracing`] once at process startup to wire up the `tracing`
//! subscriber with the append-only operational log file and an optional
//! OTLP span exporter.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set the OTLP HTTP exporter is activated. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `STRIDER_LOG_FORMAT=json` | Emit newline-delimited JSON logs on the console. |
//!
//! # Example
//!
//! ```rust,ignore
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = telemetry::init_tracing("strider", Path::new("strider.log"));
//! ```

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise the global `tracing` subscriber.
///
/// Three sinks are wired up:
///
/// * a console layer (compact, or NDJSON with `STRIDER_LOG_FORMAT=json`);
/// * an append-only file layer on `log_file` – the plain-text operational
///   event log (session messages are mirrored here);
/// * an optional OTLP span exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is
///   set.
///
/// The returned [`TelemetryGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes all pending span batches.
pub fn init_tracing(service_name: &str, log_file: &Path) -> TelemetryGuard {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));
    let use_json = std::env::var("STRIDER_LOG_FORMAT").as_deref() == Ok("json");

    let file_layer = match open_log_file(log_file) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false),
        ),
        Err(e) => {
            eprintln!(
                "[strider] cannot open log file {}: {e}; file logging disabled",
                log_file.display()
            );
            None
        }
    };

    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("strider")));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(file_layer);
    if use_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }

    TelemetryGuard(provider)
}

/// Open the operational log file in append-only mode, creating it if
/// necessary.
pub(crate) fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// RAII guard that shuts down the OTel [`SdkTracerProvider`] on drop.
///
/// Dropping this guard calls [`SdkTracerProvider::shutdown`], flushing all
/// pending spans before the process exits.  Hold an instance of this type
/// in `main` for the entire program lifetime.
pub struct TelemetryGuard(Option<SdkTracerProvider>);

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[strider] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Build an [`SdkTracerProvider`] when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// Returns `None` when the env-var is absent or the exporter cannot be
/// initialised (the error is printed to stderr and the caller falls back to
/// console + file output only).
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[strider] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Use the simple (synchronous) exporter so that no Tokio runtime
            // needs to be running at init time.  The CLI creates its Tokio
            // runtime only after calling `init_tracing`, making a batch
            // exporter (which internally spawns tasks) unsafe to use here.
            .with_simple_exporter(exporter)
            .build(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
