//! GCP authentication extension for the telemetry pipeline.
//!
//! Registers three customizations with the host pipeline so that spans are
//! exported to the Google Cloud telemetry endpoint with the caller's ambient
//! credentials:
//!
//! - default properties: regional OTLP endpoint, TLS on, GCP resource
//!   detection on (user-set values still win)
//! - OTLP exporters get `Authorization` and `X-Goog-User-Project` headers,
//!   recomputed on every export so refreshed tokens are picked up
//! - the resource gets `gcp.project_id`
//!
//! # Example
//!
//! ```rust,ignore
//! use gcp_otlp_auth::gcp::GcpAuthCustomizerProvider;
//! use gcp_otlp_auth::pipeline::PipelineBuilder;
//!
//! let pipeline = PipelineBuilder::new()
//!     .with_provider(GcpAuthCustomizerProvider::from_adc().await?)
//!     .build()?;
//! ```
//!
//! # Environment Variables
//!
//! - `GOOGLE_CLOUD_PROJECT` / `google.cloud.project`: Project ID (required)
//! - `GOOGLE_CLOUD_REGION` / `google.cloud.region`: Region (required)
//! - `K_SERVICE`, `FUNCTION_NAME`, `GAE_SERVICE`: Platform auto-detection

pub mod auth;
pub mod config;
pub mod credentials;
pub mod exporter;
pub mod resource;

use std::sync::Arc;

use tracing::info;

use crate::config::{Environment, ProcessEnv};
use crate::pipeline::{CustomizerProvider, CustomizerRegistry};

use crate::config::ConfigProperties;
use crate::options::ConfigurableOption;

#[cfg(feature = "gcp-adc")]
use crate::error::TelemetryError;

pub use auth::{HeaderSource, AUTHORIZATION_HEADER, QUOTA_USER_PROJECT_HEADER};
pub use config::{regional_endpoint, GcpPlatform};
pub use credentials::{AccessToken, CredentialProvider, CredentialSource};
pub use resource::{GcpResourceDetector, GCP_PROJECT_ID};

#[cfg(feature = "gcp-adc")]
pub use credentials::AdcCredentialSource;

/// Order of the extension among pipeline providers
pub const PROVIDER_ORDER: i32 = i32::MAX - 1;

/// Pipeline extension that authenticates OTLP export with Google credentials.
pub struct GcpAuthCustomizerProvider {
    credentials: Arc<CredentialProvider>,
    env: Arc<dyn Environment>,
}

impl GcpAuthCustomizerProvider {
    pub fn new(credentials: Arc<CredentialProvider>) -> Self {
        Self {
            credentials,
            env: Arc::new(ProcessEnv),
        }
    }

    /// Environment the project and region options are read from
    pub fn with_environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = env;
        self
    }

    /// Uses Application Default Credentials.
    ///
    /// When the credential has no project of its own, `GOOGLE_CLOUD_PROJECT`
    /// from the process environment becomes the quota project. Use
    /// [`Self::from_adc_with_properties`] to also consult pipeline properties.
    #[cfg(feature = "gcp-adc")]
    pub async fn from_adc() -> Result<Self, TelemetryError> {
        Self::from_adc_with_properties(&ConfigProperties::new()).await
    }

    /// Like [`Self::from_adc`], falling back to `google.cloud.project` in
    /// `properties` when the environment variable is unset.
    #[cfg(feature = "gcp-adc")]
    pub async fn from_adc_with_properties(
        properties: &ConfigProperties,
    ) -> Result<Self, TelemetryError> {
        let mut source = AdcCredentialSource::discover().await?;

        if let Some(project) =
            fallback_quota_project(source.quota_project_id(), &ProcessEnv, properties)
        {
            source = source.with_quota_project(project);
        }

        let credentials = CredentialProvider::initialize(Arc::new(source))?;
        Ok(Self::new(Arc::new(credentials)))
    }

    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        &self.credentials
    }
}

/// Project option to use as quota project when the credential reports none.
#[cfg_attr(not(feature = "gcp-adc"), allow(dead_code))]
fn fallback_quota_project(
    reported: Option<String>,
    env: &dyn Environment,
    properties: &ConfigProperties,
) -> Option<String> {
    match reported {
        Some(_) => None,
        None => ConfigurableOption::GOOGLE_CLOUD_PROJECT
            .resolve(env, properties)
            .ok(),
    }
}

impl CustomizerProvider for GcpAuthCustomizerProvider {
    fn customize(&self, registry: &mut CustomizerRegistry) {
        info!(
            quota_project_id = %self.credentials.quota_project_id(),
            "🔐 Registering GCP auth customizations"
        );

        let credentials = self.credentials.clone();
        let defaults_env = self.env.clone();
        let resource_env = self.env.clone();

        registry
            .add_exporter_customizer(move |exporter, _| {
                exporter::customize_exporter(exporter, &credentials)
            })
            .add_properties_supplier(move |properties| {
                config::default_properties(&*defaults_env, properties)
            })
            .add_resource_customizer(move |resource, properties| {
                resource::customize_resource(resource, &*resource_env, properties)
            });
    }

    fn order(&self) -> i32 {
        PROVIDER_ORDER
    }
}
