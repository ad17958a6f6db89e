use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::error::{AuthError, BoxError};

/// Tokens this close to expiry are refreshed before use.
///
/// Kept below the 20 s window in which `gcp_auth` re-mints its cached token.
pub const EXPIRY_SKEW: TimeDelta = TimeDelta::seconds(10);

/// OAuth2 bearer token with its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// A token without expiry never needs a refresh.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - EXPIRY_SKEW <= now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Backend that mints tokens for an ambient identity.
pub trait CredentialSource: Send + Sync {
    /// Project that calls are billed against, when the identity carries one.
    fn quota_project_id(&self) -> Option<String>;

    /// Mints a fresh token. May block on network I/O.
    fn fetch_token(&self) -> Result<AccessToken, BoxError>;
}

/// Copy of the credential state handed out to callers.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub quota_project_id: String,
    pub token: String,
}

impl fmt::Debug for TokenSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSnapshot")
            .field("quota_project_id", &self.quota_project_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

struct Credential {
    quota_project_id: String,
    token: Option<AccessToken>,
    /// The last refresh returned the token already held; wait for real expiry.
    reissued: bool,
}

impl Credential {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match &self.token {
            None => true,
            Some(token) if self.reissued => token.is_expired(now),
            Some(token) => token.needs_refresh(now),
        }
    }
}

/// Owns the process-wide credential and refreshes it on demand.
///
/// Every reader goes through one mutex covering check, refresh and read, so
/// concurrent callers that find the token expired wait on a single refresh.
pub struct CredentialProvider {
    source: Arc<dyn CredentialSource>,
    credential: Mutex<Credential>,
}

impl CredentialProvider {
    /// Obtains the ambient identity. Fails when the source has no quota project.
    pub fn initialize(source: Arc<dyn CredentialSource>) -> Result<Self, AuthError> {
        let quota_project_id = source
            .quota_project_id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AuthError::FailedInitialRetrieval("credentials carry no quota project".into())
            })?;

        info!(quota_project_id = %quota_project_id, "Ambient credentials initialized");

        Ok(Self {
            source,
            credential: Mutex::new(Credential {
                quota_project_id,
                token: None,
                reissued: false,
            }),
        })
    }

    /// Returns a valid token, refreshing it first when it is missing or expired.
    pub fn current_token(&self) -> Result<TokenSnapshot, AuthError> {
        let mut credential = self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if credential.is_stale(Utc::now()) {
            debug!("Refreshing access token");
            let token = self.source.fetch_token().map_err(AuthError::FailedRefresh)?;
            debug!(expires_at = ?token.expires_at(), "Access token refreshed");
            credential.reissued = credential.token.as_ref() == Some(&token);
            credential.token = Some(token);
        }

        let token = credential
            .token
            .as_ref()
            .map(|token| token.as_str().to_string())
            .unwrap_or_default();

        Ok(TokenSnapshot {
            quota_project_id: credential.quota_project_id.clone(),
            token,
        })
    }

    pub fn quota_project_id(&self) -> String {
        self.credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .quota_project_id
            .clone()
    }
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("quota_project_id", &self.quota_project_id())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "gcp-adc")]
pub use adc::AdcCredentialSource;

#[cfg(feature = "gcp-adc")]
mod adc {
    use std::sync::Arc;
    use std::time::Duration;

    use tracing::warn;

    use super::{AccessToken, CredentialSource};
    use crate::error::{AuthError, BoxError};

    const TRACE_SCOPE: &str = "https://www.googleapis.com/auth/trace.append";

    /// Upper bound on a single token refresh
    pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

    /// Application Default Credentials via `gcp_auth`.
    pub struct AdcCredentialSource {
        provider: Arc<dyn gcp_auth::TokenProvider>,
        project_id: Option<String>,
        timeout: Duration,
    }

    impl AdcCredentialSource {
        /// Discovers ADC and the project id of the credential.
        pub async fn discover() -> Result<Self, AuthError> {
            let provider = gcp_auth::provider()
                .await
                .map_err(|e| AuthError::FailedInitialRetrieval(Box::new(e)))?;

            let project_id = match provider.project_id().await {
                Ok(id) => Some(id.to_string()),
                Err(e) => {
                    warn!(error = %e, "Credentials do not report a project id");
                    None
                }
            };

            Ok(Self {
                provider,
                project_id,
                timeout: DEFAULT_REFRESH_TIMEOUT,
            })
        }

        pub fn with_quota_project(mut self, project_id: impl Into<String>) -> Self {
            self.project_id = Some(project_id.into());
            self
        }

        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }
    }

    impl CredentialSource for AdcCredentialSource {
        fn quota_project_id(&self) -> Option<String> {
            self.project_id.clone()
        }

        fn fetch_token(&self) -> Result<AccessToken, BoxError> {
            let provider = &self.provider;
            let timeout = self.timeout;

            // A scoped thread with its own runtime works whether or not the
            // caller is already inside a tokio runtime.
            let token = std::thread::scope(|scope| {
                scope
                    .spawn(move || -> Result<Arc<gcp_auth::Token>, BoxError> {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()?;
                        let token = runtime
                            .block_on(tokio::time::timeout(timeout, provider.token(&[TRACE_SCOPE])))??;
                        Ok(token)
                    })
                    .join()
                    .map_err(|_| BoxError::from("token refresh thread panicked"))?
            })?;

            Ok(AccessToken::new(token.as_str(), Some(token.expires_at())))
        }
    }
}
