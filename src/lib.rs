//! Google Cloud authentication for OTLP trace export.
//!
//! A [`pipeline`] assembles an OpenTelemetry tracer provider from string
//! properties and lets extensions customize it. The [`gcp`] extension
//! points OTLP export at the regional Google Cloud telemetry endpoint, adds
//! fresh credential headers to every export call, and tags the resource with
//! the project id.
//!
//! # Features
//!
//! - `gcp-adc` (default): Application Default Credentials via `gcp_auth`
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use gcp_otlp_auth::gcp::GcpAuthCustomizerProvider;
//! use gcp_otlp_auth::pipeline::PipelineBuilder;
//!
//! let pipeline = PipelineBuilder::new()
//!     .with_property("otel.service.name", "checkout")
//!     .with_property("otel.log.format", "json")
//!     .with_provider(GcpAuthCustomizerProvider::from_adc().await?)
//!     .build()?;
//!
//! pipeline.install_global();
//! ```
//!
//! # Configuration
//!
//! | Variable / property | Description | Default |
//! |---------------------|-------------|---------|
//! | `GOOGLE_CLOUD_PROJECT` / `google.cloud.project` | Project id | required |
//! | `GOOGLE_CLOUD_REGION` / `google.cloud.region` | Region of the telemetry endpoint | required |
//! | `otel.exporter.otlp.endpoint` | OTLP endpoint | regional endpoint |
//! | `otel.exporter.otlp.protocol` | `grpc` or `http/protobuf` | `grpc` |
//! | `otel.traces.exporter` | `otlp`, `none` or a named exporter | `otlp` |
//! | `RUST_LOG` / `otel.log.level` | Log level filter | `info` |
//! | `otel.log.format` | `pretty` or `json` | `pretty` |
//!
//! # Module Structure
//!
//! - [`config`]: property map, environment access, logging settings
//! - [`error`]: error types
//! - [`options`]: required options and their resolution
//! - [`gcp`]: credentials, auth headers and the pipeline extension
//! - [`pipeline`]: host pipeline, exporters and resources
//! - [`trace`]: `tracing` subscriber setup

pub mod config;
pub mod error;
pub mod gcp;
pub mod options;
pub mod pipeline;
pub mod trace;

// Re-exports
pub use config::{ConfigProperties, Environment, LogFormat, LoggingConfig, ProcessEnv};
pub use error::{AuthError, ConfigurationError, TelemetryError};
pub use gcp::GcpAuthCustomizerProvider;
pub use options::ConfigurableOption;
pub use pipeline::{CustomizerProvider, CustomizerRegistry, Pipeline, PipelineBuilder};
