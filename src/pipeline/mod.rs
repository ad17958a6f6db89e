//! Host-side pipeline assembly.
//!
//! Extensions implement [`CustomizerProvider`] and register callbacks with a
//! [`CustomizerRegistry`]. [`PipelineBuilder::build`] then runs them in this
//! order:
//!
//! 1. properties suppliers, whose values act as defaults under the
//!    user-supplied properties
//! 2. exporter customizers, once per constructed exporter
//! 3. resource customizers
//!
//! Providers run sorted by [`CustomizerProvider::order`], lowest first, so a
//! provider with a high order sees (and can override) the work of the others.
//!
//! # Example
//!
//! ```rust,ignore
//! use gcp_otlp_auth::gcp::GcpAuthCustomizerProvider;
//! use gcp_otlp_auth::pipeline::PipelineBuilder;
//!
//! let pipeline = PipelineBuilder::new()
//!     .with_property("otel.service.name", "checkout")
//!     .with_provider(GcpAuthCustomizerProvider::from_adc().await?)
//!     .build()?;
//!
//! pipeline.install_global();
//! ```

pub mod exporter;
pub mod resource;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry_sdk::resource::ResourceDetector;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::{debug, info};

use crate::config::{ConfigProperties, Environment, LoggingConfig, ProcessEnv};
use crate::error::{ConfigurationError, TelemetryError};
use crate::gcp::resource::GcpResourceDetector;
use crate::trace::init_subscriber;

pub use exporter::{ConfigurableExporter, ExporterHandle, NamedExporter};

/// Enables the GCP resource detector when `true`
pub const GCP_RESOURCE_PROVIDER_ENABLED: &str = "otel.resource.providers.gcp.enabled";

pub type ExporterCustomizer = Box<dyn Fn(ExporterHandle, &ConfigProperties) -> ExporterHandle>;
pub type PropertiesSupplier =
    Box<dyn Fn(&ConfigProperties) -> Result<BTreeMap<String, String>, ConfigurationError>>;
pub type ResourceCustomizer =
    Box<dyn Fn(Resource, &ConfigProperties) -> Result<Resource, ConfigurationError>>;
pub type ExporterFactory = Box<dyn Fn(&ConfigProperties) -> Box<dyn ConfigurableExporter>>;

/// Callbacks registered by the providers
#[derive(Default)]
pub struct CustomizerRegistry {
    exporter_customizers: Vec<ExporterCustomizer>,
    properties_suppliers: Vec<PropertiesSupplier>,
    resource_customizers: Vec<ResourceCustomizer>,
}

impl CustomizerRegistry {
    pub fn add_exporter_customizer<F>(&mut self, customizer: F) -> &mut Self
    where
        F: Fn(ExporterHandle, &ConfigProperties) -> ExporterHandle + 'static,
    {
        self.exporter_customizers.push(Box::new(customizer));
        self
    }

    pub fn add_properties_supplier<F>(&mut self, supplier: F) -> &mut Self
    where
        F: Fn(&ConfigProperties) -> Result<BTreeMap<String, String>, ConfigurationError> + 'static,
    {
        self.properties_suppliers.push(Box::new(supplier));
        self
    }

    pub fn add_resource_customizer<F>(&mut self, customizer: F) -> &mut Self
    where
        F: Fn(Resource, &ConfigProperties) -> Result<Resource, ConfigurationError> + 'static,
    {
        self.resource_customizers.push(Box::new(customizer));
        self
    }

    /// Defaults from the suppliers, overridden by `user` values.
    pub(crate) fn assemble_properties(
        &self,
        user: &ConfigProperties,
    ) -> Result<ConfigProperties, ConfigurationError> {
        let mut properties = ConfigProperties::new();
        for supplier in &self.properties_suppliers {
            properties.extend(supplier(user)?);
        }
        properties.extend(user.iter());
        Ok(properties)
    }

    pub(crate) fn customize_exporter(
        &self,
        mut exporter: ExporterHandle,
        properties: &ConfigProperties,
    ) -> ExporterHandle {
        for customizer in &self.exporter_customizers {
            exporter = customizer(exporter, properties);
        }
        exporter
    }

    pub(crate) fn customize_resource(
        &self,
        mut resource: Resource,
        properties: &ConfigProperties,
    ) -> Result<Resource, ConfigurationError> {
        for customizer in &self.resource_customizers {
            resource = customizer(resource, properties)?;
        }
        Ok(resource)
    }
}

/// An extension that customizes the pipeline.
pub trait CustomizerProvider {
    fn customize(&self, registry: &mut CustomizerRegistry);

    /// Providers run in ascending order.
    fn order(&self) -> i32 {
        0
    }
}

pub struct PipelineBuilder {
    properties: ConfigProperties,
    providers: Vec<Box<dyn CustomizerProvider>>,
    exporter_factories: HashMap<String, ExporterFactory>,
    env: Arc<dyn Environment>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            properties: ConfigProperties::new(),
            providers: Vec::new(),
            exporter_factories: HashMap::new(),
            env: Arc::new(ProcessEnv),
        }
    }

    /// User-supplied properties; these win over supplied defaults.
    pub fn with_properties(mut self, properties: ConfigProperties) -> Self {
        self.properties.extend(properties.iter());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key, value);
        self
    }

    pub fn with_provider(mut self, provider: impl CustomizerProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Registers a non-OTLP exporter, selected with `otel.traces.exporter=<name>`.
    pub fn with_named_exporter<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ConfigProperties) -> Box<dyn ConfigurableExporter> + 'static,
    {
        self.exporter_factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Environment used by resource detection
    pub fn with_environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = env;
        self
    }

    pub fn build(mut self) -> Result<Pipeline, TelemetryError> {
        self.providers.sort_by_key(|provider| provider.order());

        let mut registry = CustomizerRegistry::default();
        for provider in &self.providers {
            provider.customize(&mut registry);
        }

        let properties = registry.assemble_properties(&self.properties)?;
        debug!(count = properties.len(), "Pipeline properties assembled");

        let exporter = self
            .create_exporter(&properties)?
            .map(|exporter| registry.customize_exporter(exporter, &properties));

        let mut detectors: Vec<Box<dyn ResourceDetector>> = Vec::new();
        if properties.get_bool(GCP_RESOURCE_PROVIDER_ENABLED) == Some(true) {
            detectors.push(Box::new(GcpResourceDetector::new(self.env.clone())));
        }
        let resource = resource::build_base_resource(&properties, detectors);
        let resource = registry.customize_resource(resource, &properties)?;

        let mut builder = SdkTracerProvider::builder().with_resource(resource.clone());
        if let Some(exporter) = exporter {
            builder = exporter.install(builder)?;
        }

        info!("✅ Telemetry pipeline built");
        Ok(Pipeline {
            tracer_provider: builder.build(),
            properties,
            resource,
        })
    }

    fn create_exporter(
        &self,
        properties: &ConfigProperties,
    ) -> Result<Option<ExporterHandle>, TelemetryError> {
        match properties.get(exporter::TRACES_EXPORTER).unwrap_or("otlp") {
            "none" => Ok(None),
            "otlp" => ExporterHandle::otlp_from_properties(properties).map(Some),
            name => match self.exporter_factories.get(name) {
                Some(factory) => Ok(Some(ExporterHandle::Other(factory(properties)))),
                None => Err(TelemetryError::Init(format!("Unknown span exporter: {name}"))),
            },
        }
    }
}

/// The assembled pipeline
#[derive(Debug)]
pub struct Pipeline {
    tracer_provider: SdkTracerProvider,
    properties: ConfigProperties,
    resource: Resource,
}

impl Pipeline {
    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Properties after defaults were applied
    pub fn properties(&self) -> &ConfigProperties {
        &self.properties
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Sets the global tracer provider and `tracing` subscriber.
    pub fn install_global(&self) {
        init_subscriber(
            self.tracer_provider.clone(),
            &LoggingConfig::from_properties(&self.properties),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use opentelemetry::trace::{Tracer, TracerProvider};
    use opentelemetry::{Key, KeyValue, Value};
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    struct Recorder {
        name: &'static str,
        order: i32,
        seen: Rc<RefCell<Vec<&'static str>>>,
    }

    impl CustomizerProvider for Recorder {
        fn customize(&self, registry: &mut CustomizerRegistry) {
            let name = self.name;
            let seen = self.seen.clone();
            registry
                .add_exporter_customizer(move |exporter, _| {
                    seen.borrow_mut().push(name);
                    exporter
                })
                .add_properties_supplier(move |_| {
                    Ok(BTreeMap::from([("source".to_string(), name.to_string())]))
                })
                .add_resource_customizer(move |resource, _| {
                    Ok(resource::overlay(&resource, [KeyValue::new("last", name)]))
                });
        }

        fn order(&self) -> i32 {
            self.order
        }
    }

    fn memory_pipeline(exporter: InMemorySpanExporter) -> PipelineBuilder {
        PipelineBuilder::new()
            .with_property(exporter::TRACES_EXPORTER, "memory")
            .with_named_exporter("memory", move |_| {
                Box::new(NamedExporter::new("memory", exporter.clone())) as Box<dyn ConfigurableExporter>
            })
    }

    #[test]
    fn providers_run_in_ascending_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let pipeline = memory_pipeline(InMemorySpanExporter::default())
            .with_provider(Recorder {
                name: "late",
                order: i32::MAX - 1,
                seen: seen.clone(),
            })
            .with_provider(Recorder {
                name: "early",
                order: 0,
                seen: seen.clone(),
            })
            .build()
            .unwrap();

        assert_eq!(*seen.borrow(), vec!["early", "late"]);
        assert_eq!(pipeline.properties().get("source"), Some("late"));
        assert_eq!(
            pipeline.resource().get(&Key::from_static_str("last")),
            Some(Value::from("late"))
        );
    }

    #[test]
    fn user_properties_win_over_defaults() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let pipeline = memory_pipeline(InMemorySpanExporter::default())
            .with_property("source", "user")
            .with_provider(Recorder {
                name: "supplier",
                order: 0,
                seen,
            })
            .build()
            .unwrap();

        assert_eq!(pipeline.properties().get("source"), Some("user"));
    }

    #[test]
    fn failing_supplier_aborts_build() {
        struct Broken;
        impl CustomizerProvider for Broken {
            fn customize(&self, registry: &mut CustomizerRegistry) {
                registry.add_properties_supplier(|_| {
                    Err(ConfigurationError {
                        option: "Google Cloud Region",
                        env_var: "GOOGLE_CLOUD_REGION",
                        property: "google.cloud.region".to_string(),
                    })
                });
            }
        }

        let result = PipelineBuilder::new().with_provider(Broken).build();

        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[test]
    fn unknown_exporter_is_an_error() {
        let result = PipelineBuilder::new()
            .with_property(exporter::TRACES_EXPORTER, "zipkin")
            .build();

        assert!(matches!(result, Err(TelemetryError::Init(_))));
    }

    #[test]
    fn none_exporter_builds_without_export() {
        let pipeline = PipelineBuilder::new()
            .with_property(exporter::TRACES_EXPORTER, "none")
            .build();

        assert!(pipeline.is_ok());
    }

    #[test]
    fn spans_reach_named_exporter() {
        let exporter = InMemorySpanExporter::default();
        let pipeline = memory_pipeline(exporter.clone()).build().unwrap();

        let tracer = pipeline.tracer_provider().tracer("test");
        tracer.in_span("sample", |_| {});
        pipeline.tracer_provider().force_flush().unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "sample");
    }

    #[test]
    fn gcp_detector_enabled_by_property() {
        let env: HashMap<String, String> =
            HashMap::from([("K_SERVICE".to_string(), "checkout".to_string())]);
        let pipeline = PipelineBuilder::new()
            .with_property(exporter::TRACES_EXPORTER, "none")
            .with_property(GCP_RESOURCE_PROVIDER_ENABLED, "true")
            .with_environment(Arc::new(env))
            .build()
            .unwrap();

        assert_eq!(
            pipeline.resource().get(&Key::from_static_str("cloud.platform")),
            Some(Value::from("gcp_cloud_run"))
        );
    }
}
