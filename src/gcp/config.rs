use std::collections::BTreeMap;

use crate::config::{ConfigProperties, Environment};
use crate::error::ConfigurationError;
use crate::options::ConfigurableOption;
use crate::pipeline::exporter::{OTLP_ENDPOINT, OTLP_INSECURE};
use crate::pipeline::GCP_RESOURCE_PROVIDER_ENABLED;

/// Regional telemetry endpoint
pub fn regional_endpoint(region: &str) -> String {
    format!("https://staging-{region}-telemetry.example.com:443")
}

/// Properties the extension needs, offered as defaults.
///
/// The pipeline applies user-supplied values on top, so nothing set by the
/// user is overridden here.
pub fn default_properties(
    env: &dyn Environment,
    properties: &ConfigProperties,
) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let region = ConfigurableOption::GOOGLE_CLOUD_REGION.resolve(env, properties)?;

    Ok(BTreeMap::from([
        (OTLP_ENDPOINT.to_string(), regional_endpoint(&region)),
        (OTLP_INSECURE.to_string(), "false".to_string()),
        (GCP_RESOURCE_PROVIDER_ENABLED.to_string(), "true".to_string()),
    ]))
}

/// GCP cloud platforms (maps to cloud.platform semconv values)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcpPlatform {
    CloudRun,
    CloudFunctions,
    AppEngine,
}

impl GcpPlatform {
    /// Returns the OpenTelemetry semantic convention value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudRun => "gcp_cloud_run",
            Self::CloudFunctions => "gcp_cloud_functions",
            Self::AppEngine => "gcp_app_engine",
        }
    }

    /// Detects the serverless platform from its well-known variables
    pub fn detect(env: &dyn Environment) -> Option<Self> {
        if any_set(env, &["K_SERVICE", "K_REVISION"]) {
            Some(Self::CloudRun)
        } else if any_set(env, &["FUNCTION_NAME", "FUNCTION_TARGET"]) {
            Some(Self::CloudFunctions)
        } else if any_set(env, &["GAE_SERVICE", "GAE_VERSION"]) {
            Some(Self::AppEngine)
        } else {
            None
        }
    }
}

fn any_set(env: &dyn Environment, names: &[&str]) -> bool {
    names.iter().any(|name| env.var(name).is_some())
}
