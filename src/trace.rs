use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt::format::{FmtSpan, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

/// Build the OpenTelemetry tracing layer
pub fn build_otel_layer<S>(
    provider: &SdkTracerProvider,
    service_name: &str,
) -> OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let tracer = provider.tracer(service_name.to_string());
    tracing_opentelemetry::layer().with_tracer(tracer)
}

/// Cloud Logging severity for a `tracing` level
fn severity(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG | Level::TRACE => "DEBUG",
    }
}

/// One JSON object per line with `severity` at the root, as Cloud Logging expects.
struct GcpJsonFormat;

impl<S, N> FormatEvent<S, N> for GcpJsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        use std::fmt::Write;

        let metadata = event.metadata();

        let mut entry = Map::new();
        entry.insert("severity".into(), severity(metadata.level()).into());
        entry.insert(
            "timestamp".into(),
            chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
                .into(),
        );
        entry.insert("target".into(), metadata.target().into());

        if let Some(span) = ctx.lookup_current() {
            entry.insert("span".into(), span.name().into());
        }

        event.record(&mut JsonFields(&mut entry));

        let line = serde_json::to_string(&entry).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

/// Collects event fields into the log entry
struct JsonFields<'a>(&'a mut Map<String, Value>);

impl Visit for JsonFields<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().into(), format!("{value:?}").into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().into(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().into(), value.into());
    }
}

/// JSON fmt layer for cloud environments
pub fn build_json_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .event_format(GcpJsonFormat)
        .with_ansi(false)
}

/// Pretty fmt layer for local development
pub fn build_pretty_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
}

/// `RUST_LOG` if set, the configured level otherwise
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Sets the global tracer provider and installs the `tracing` subscriber.
///
/// Does nothing (beyond a warning) if a subscriber is already installed.
pub fn init_subscriber(provider: SdkTracerProvider, config: &LoggingConfig) {
    // The global provider must be set before the layers are built
    opentelemetry::global::set_tracer_provider(provider.clone());

    let otel_layer = build_otel_layer(&provider, &config.service_name);
    let filter = build_filter(config);
    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    let result = match config.log_format {
        LogFormat::Pretty => registry.with(build_pretty_layer()).try_init(),
        LogFormat::Json => registry.with(build_json_layer()).try_init(),
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "Global subscriber already installed");
    }
}
