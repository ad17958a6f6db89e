use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::ResourceDetector;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{
    CLOUD_PLATFORM, CLOUD_PROVIDER, CLOUD_REGION, FAAS_NAME, FAAS_VERSION,
};

use crate::config::{ConfigProperties, Environment};
use crate::error::ConfigurationError;
use crate::gcp::config::GcpPlatform;
use crate::options::ConfigurableOption;
use crate::pipeline::resource::overlay;

/// GCP cloud provider value (semconv)
pub const CLOUD_PROVIDER_GCP: &str = "gcp";

/// GCP project ID attribute (required for OTLP ingestion)
pub const GCP_PROJECT_ID: &str = "gcp.project_id";

/// Sets `gcp.project_id` from the project option, replacing any previous value.
pub fn customize_resource(
    resource: Resource,
    env: &dyn Environment,
    properties: &ConfigProperties,
) -> Result<Resource, ConfigurationError> {
    let project_id = ConfigurableOption::GOOGLE_CLOUD_PROJECT.resolve(env, properties)?;
    Ok(overlay(&resource, [KeyValue::new(GCP_PROJECT_ID, project_id)]))
}

/// Detects serverless platform attributes from the environment.
pub struct GcpResourceDetector {
    env: Arc<dyn Environment>,
}

impl GcpResourceDetector {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }

    fn first_set(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.env.var(name))
    }
}

impl ResourceDetector for GcpResourceDetector {
    fn detect(&self) -> Resource {
        let Some(platform) = GcpPlatform::detect(&*self.env) else {
            return Resource::builder_empty().build();
        };

        let mut attrs = vec![
            KeyValue::new(CLOUD_PROVIDER, CLOUD_PROVIDER_GCP),
            KeyValue::new(CLOUD_PLATFORM, platform.as_str()),
        ];

        if let Some(region) = self.first_set(&["CLOUD_RUN_REGION", "FUNCTION_REGION", "GAE_REGION"]) {
            attrs.push(KeyValue::new(CLOUD_REGION, region));
        }

        if let Some(service) = self.first_set(&["K_SERVICE", "FUNCTION_NAME", "GAE_SERVICE"]) {
            attrs.push(KeyValue::new(FAAS_NAME, service));
        }

        if let Some(revision) = self.first_set(&["K_REVISION", "GAE_VERSION"]) {
            attrs.push(KeyValue::new(FAAS_VERSION, revision));
        }

        Resource::builder_empty().with_attributes(attrs).build()
    }
}
