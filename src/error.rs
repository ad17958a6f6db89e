use thiserror::Error;

/// Boxed error produced by a credential backend or transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A required option has neither of its two sources set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "GCP Authentication Extension not configured properly: {option} not configured. \
     Configure it by exporting environment variable {env_var} or system property {property}"
)]
pub struct ConfigurationError {
    /// User-readable option name, e.g. `Google Cloud Project ID`
    pub option: &'static str,
    /// Environment variable that was checked
    pub env_var: &'static str,
    /// Property that was checked
    pub property: String,
}

/// Failure to obtain or refresh ambient credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unable to retrieve Google Application Default Credentials: {0}")]
    FailedInitialRetrieval(#[source] BoxError),
    #[error("Unable to refresh Google Application Default Credentials: {0}")]
    FailedRefresh(#[source] BoxError),
}

impl AuthError {
    /// Whether the failure happened on the per-export path and can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FailedRefresh(_))
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),
    #[error("Exporter error: {0}")]
    Exporter(String),
    #[error("Initialization error: {0}")]
    Init(String),
}

impl From<opentelemetry_otlp::ExporterBuildError> for TelemetryError {
    fn from(err: opentelemetry_otlp::ExporterBuildError) -> Self {
        Self::Exporter(err.to_string())
    }
}
