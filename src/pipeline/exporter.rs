use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::trace::TracerProviderBuilder;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tracing::info;

use crate::config::ConfigProperties;
use crate::error::TelemetryError;
use crate::gcp::auth::{AuthInterceptor, HeaderInjectingClient, HeaderSource};

pub const TRACES_EXPORTER: &str = "otel.traces.exporter";
pub const OTLP_PROTOCOL: &str = "otel.exporter.otlp.protocol";
pub const OTLP_TRACES_PROTOCOL: &str = "otel.exporter.otlp.traces.protocol";
pub const OTLP_ENDPOINT: &str = "otel.exporter.otlp.endpoint";
pub const OTLP_TRACES_ENDPOINT: &str = "otel.exporter.otlp.traces.endpoint";
pub const OTLP_HEADERS: &str = "otel.exporter.otlp.headers";
pub const OTLP_TIMEOUT: &str = "otel.exporter.otlp.timeout";
pub const OTLP_INSECURE: &str = "otel.exporter.otlp.insecure";

pub const DEFAULT_GRPC_ENDPOINT: &str = "http://localhost:4317";
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:4318/v1/traces";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const HTTP_TRACES_PATH: &str = "/v1/traces";

/// Settings shared by both OTLP transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtlpSettings {
    pub endpoint: String,
    pub timeout: Duration,
    /// Static headers, sent as-is on every call
    pub headers: HashMap<String, String>,
    pub insecure: bool,
}

impl OtlpSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            headers: HashMap::new(),
            insecure: false,
        }
    }
}

/// Settings plus the dynamic header supplier, if any
#[derive(Debug, Clone)]
pub struct OtlpConfig {
    settings: OtlpSettings,
    header_source: Option<HeaderSource>,
}

/// Builder view of an OTLP exporter; `build` yields the same transport kind.
#[derive(Debug)]
pub struct OtlpExporterBuilder<E> {
    config: OtlpConfig,
    _kind: PhantomData<fn() -> E>,
}

impl<E: From<OtlpConfig>> OtlpExporterBuilder<E> {
    fn from_config(config: OtlpConfig) -> Self {
        Self {
            config,
            _kind: PhantomData,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.settings.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.settings.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.settings.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.config.settings.insecure = insecure;
        self
    }

    /// Replaces the dynamic header supplier.
    pub fn with_header_source(mut self, source: HeaderSource) -> Self {
        self.config.header_source = Some(source);
        self
    }

    pub fn build(self) -> E {
        E::from(self.config)
    }
}

/// OTLP over HTTP with protobuf payloads
#[derive(Debug, Clone)]
pub struct OtlpHttpExporter {
    config: OtlpConfig,
}

/// OTLP over gRPC
#[derive(Debug, Clone)]
pub struct OtlpGrpcExporter {
    config: OtlpConfig,
}

impl From<OtlpConfig> for OtlpHttpExporter {
    fn from(config: OtlpConfig) -> Self {
        Self { config }
    }
}

impl From<OtlpConfig> for OtlpGrpcExporter {
    fn from(config: OtlpConfig) -> Self {
        Self { config }
    }
}

impl OtlpHttpExporter {
    pub fn builder() -> OtlpExporterBuilder<Self> {
        OtlpExporterBuilder::from_config(OtlpConfig {
            settings: OtlpSettings::new(DEFAULT_HTTP_ENDPOINT),
            header_source: None,
        })
    }

    /// Builder carrying this exporter's current settings
    pub fn to_builder(&self) -> OtlpExporterBuilder<Self> {
        OtlpExporterBuilder::from_config(self.config.clone())
    }

    pub fn settings(&self) -> &OtlpSettings {
        &self.config.settings
    }

    pub fn header_source(&self) -> Option<&HeaderSource> {
        self.config.header_source.as_ref()
    }

    fn span_exporter(&self) -> Result<SpanExporter, TelemetryError> {
        let settings = &self.config.settings;
        let mut builder = SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(settings.endpoint.clone())
            .with_timeout(settings.timeout);

        if !settings.headers.is_empty() {
            builder = builder.with_headers(settings.headers.clone());
        }

        let client = blocking_client(settings.timeout)?;

        let builder = match &self.config.header_source {
            Some(source) => {
                builder.with_http_client(HeaderInjectingClient::new(client, source.clone()))
            }
            None => builder.with_http_client(client),
        };

        Ok(builder.build()?)
    }
}

impl OtlpGrpcExporter {
    pub fn builder() -> OtlpExporterBuilder<Self> {
        OtlpExporterBuilder::from_config(OtlpConfig {
            settings: OtlpSettings::new(DEFAULT_GRPC_ENDPOINT),
            header_source: None,
        })
    }

    /// Builder carrying this exporter's current settings
    pub fn to_builder(&self) -> OtlpExporterBuilder<Self> {
        OtlpExporterBuilder::from_config(self.config.clone())
    }

    pub fn settings(&self) -> &OtlpSettings {
        &self.config.settings
    }

    pub fn header_source(&self) -> Option<&HeaderSource> {
        self.config.header_source.as_ref()
    }

    /// Must run inside a tokio runtime: tonic spawns the channel worker.
    fn span_exporter(&self) -> Result<SpanExporter, TelemetryError> {
        let settings = &self.config.settings;
        let mut builder = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(settings.endpoint.clone())
            .with_timeout(settings.timeout);

        if !settings.headers.is_empty() {
            builder = builder.with_metadata(metadata_from(&settings.headers)?);
        }

        if !settings.insecure && settings.endpoint.starts_with("https") {
            let tls_config = tonic::transport::ClientTlsConfig::new().with_native_roots();
            builder = builder.with_tls_config(tls_config);
        }

        if let Some(source) = &self.config.header_source {
            builder = builder.with_interceptor(AuthInterceptor::new(source.clone()));
        }

        Ok(builder.build()?)
    }
}

/// The blocking client owns a runtime, which must not be created or dropped
/// on a tokio worker thread.
fn blocking_client(timeout: Duration) -> Result<reqwest::blocking::Client, TelemetryError> {
    std::thread::spawn(move || reqwest::blocking::Client::builder().timeout(timeout).build())
        .join()
        .map_err(|_| TelemetryError::Exporter("HTTP client thread panicked".to_string()))?
        .map_err(|e| TelemetryError::Exporter(e.to_string()))
}

fn metadata_from(headers: &HashMap<String, String>) -> Result<MetadataMap, TelemetryError> {
    let mut metadata = MetadataMap::new();
    for (name, value) in headers {
        let key = MetadataKey::from_bytes(name.as_bytes())
            .map_err(|e| TelemetryError::Exporter(format!("Invalid header name {name}: {e}")))?;
        let value = MetadataValue::try_from(value.as_str())
            .map_err(|e| TelemetryError::Exporter(format!("Invalid header value for {name}: {e}")))?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}

/// An exporter the pipeline can install but that is not OTLP.
pub trait ConfigurableExporter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn install(self: Box<Self>, builder: TracerProviderBuilder) -> TracerProviderBuilder;
}

/// Wraps any SDK span exporter under a name.
#[derive(Debug)]
pub struct NamedExporter<E> {
    name: String,
    exporter: E,
}

impl<E> NamedExporter<E> {
    pub fn new(name: impl Into<String>, exporter: E) -> Self {
        Self {
            name: name.into(),
            exporter,
        }
    }
}

impl<E> ConfigurableExporter for NamedExporter<E>
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn install(self: Box<Self>, builder: TracerProviderBuilder) -> TracerProviderBuilder {
        builder.with_batch_exporter(self.exporter)
    }
}

/// A span exporter as handed to exporter customizers.
#[derive(Debug)]
pub enum ExporterHandle {
    OtlpHttp(OtlpHttpExporter),
    OtlpGrpc(OtlpGrpcExporter),
    Other(Box<dyn ConfigurableExporter>),
}

impl ExporterHandle {
    pub fn name(&self) -> &str {
        match self {
            Self::OtlpHttp(_) => "otlp/http",
            Self::OtlpGrpc(_) => "otlp/grpc",
            Self::Other(exporter) => exporter.name(),
        }
    }

    /// Builds the OTLP exporter from `otel.exporter.otlp.*` properties.
    pub fn otlp_from_properties(properties: &ConfigProperties) -> Result<Self, TelemetryError> {
        let protocol = properties
            .get(OTLP_TRACES_PROTOCOL)
            .or_else(|| properties.get(OTLP_PROTOCOL))
            .unwrap_or("grpc");

        let http = match protocol {
            "grpc" => false,
            "http/protobuf" => true,
            other => {
                return Err(TelemetryError::Init(format!(
                    "Unsupported OTLP protocol: {other}"
                )))
            }
        };

        // The signal-specific endpoint is used verbatim; the generic one gets
        // the traces path appended for HTTP.
        let endpoint = match (properties.get(OTLP_TRACES_ENDPOINT), properties.get(OTLP_ENDPOINT)) {
            (Some(endpoint), _) => endpoint.to_string(),
            (None, Some(endpoint)) if http => {
                format!("{}{}", endpoint.trim_end_matches('/'), HTTP_TRACES_PATH)
            }
            (None, Some(endpoint)) => endpoint.to_string(),
            (None, None) if http => DEFAULT_HTTP_ENDPOINT.to_string(),
            (None, None) => DEFAULT_GRPC_ENDPOINT.to_string(),
        };

        let config = OtlpConfig {
            settings: OtlpSettings {
                endpoint,
                timeout: properties.get_millis(OTLP_TIMEOUT).unwrap_or(DEFAULT_TIMEOUT),
                headers: properties.get_map(OTLP_HEADERS),
                insecure: properties.get_bool(OTLP_INSECURE).unwrap_or(false),
            },
            header_source: None,
        };

        Ok(if http {
            Self::OtlpHttp(config.into())
        } else {
            Self::OtlpGrpc(config.into())
        })
    }

    /// Adds this exporter to the tracer provider being built.
    pub fn install(
        self,
        builder: TracerProviderBuilder,
    ) -> Result<TracerProviderBuilder, TelemetryError> {
        info!(exporter = self.name(), "📤 Installing span exporter");
        match self {
            Self::OtlpHttp(exporter) => Ok(builder.with_batch_exporter(exporter.span_exporter()?)),
            Self::OtlpGrpc(exporter) => Ok(builder.with_batch_exporter(exporter.span_exporter()?)),
            Self::Other(exporter) => Ok(exporter.install(builder)),
        }
    }
}
