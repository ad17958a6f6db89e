use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response};
use opentelemetry_http::{HttpClient, HttpError};
use tonic::metadata::{MetadataKey, MetadataValue};
use tonic::service::Interceptor;
use tonic::Status;
use tracing::warn;

use crate::error::AuthError;
use crate::gcp::credentials::CredentialProvider;

pub const QUOTA_USER_PROJECT_HEADER: &str = "X-Goog-User-Project";
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Headers attached to a single export call
pub type HeaderSet = HashMap<String, String>;

/// Builds the auth headers from a freshly checked token.
pub fn build_headers(credentials: &CredentialProvider) -> Result<HeaderSet, AuthError> {
    let snapshot = credentials.current_token()?;

    Ok(HashMap::from([
        (QUOTA_USER_PROJECT_HEADER.to_string(), snapshot.quota_project_id),
        (
            AUTHORIZATION_HEADER.to_string(),
            format!("Bearer {}", snapshot.token),
        ),
    ]))
}

/// Per-call header supplier attached to an exporter.
///
/// Invoked lazily on every export, possibly from several threads at once.
#[derive(Clone)]
pub struct HeaderSource(Arc<dyn Fn() -> Result<HeaderSet, AuthError> + Send + Sync>);

impl HeaderSource {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<HeaderSet, AuthError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Header source backed by the shared credential
    pub fn from_credentials(credentials: Arc<CredentialProvider>) -> Self {
        Self::new(move || build_headers(&credentials))
    }

    pub fn headers(&self) -> Result<HeaderSet, AuthError> {
        (self.0)()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HeaderSource(..)")
    }
}

/// gRPC interceptor that adds the headers as request metadata.
#[derive(Clone, Debug)]
pub struct AuthInterceptor {
    source: HeaderSource,
}

impl AuthInterceptor {
    pub fn new(source: HeaderSource) -> Self {
        Self { source }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, Status> {
        let headers = self.source.headers().map_err(|e| {
            warn!(
                error = %e,
                retryable = e.is_retryable(),
                "Dropping export attempt without credentials"
            );
            status_for(&e)
        })?;

        let metadata = request.metadata_mut();
        for (name, value) in headers {
            let key = MetadataKey::from_bytes(name.as_bytes())
                .map_err(|e| Status::internal(format!("Invalid header name {name}: {e}")))?;
            let value = MetadataValue::try_from(value)
                .map_err(|e| Status::internal(format!("Invalid header value for {name}: {e}")))?;
            metadata.insert(key, value);
        }

        Ok(request)
    }
}

/// Refresh failures map to UNAVAILABLE, which OTLP exporters retry.
fn status_for(error: &AuthError) -> Status {
    if error.is_retryable() {
        Status::unavailable(error.to_string())
    } else {
        Status::unauthenticated(error.to_string())
    }
}

/// HTTP client wrapper that adds the headers to every request.
pub struct HeaderInjectingClient<C> {
    inner: C,
    source: HeaderSource,
}

impl<C> HeaderInjectingClient<C> {
    pub fn new(inner: C, source: HeaderSource) -> Self {
        Self { inner, source }
    }
}

impl<C: fmt::Debug> fmt::Debug for HeaderInjectingClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderInjectingClient")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for HeaderInjectingClient<C> {
    async fn send_bytes(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let headers = self.source.headers().map_err(|e| {
            warn!(
                error = %e,
                retryable = e.is_retryable(),
                "Dropping export attempt without credentials"
            );
            Box::new(e) as HttpError
        })?;

        for (name, value) in headers {
            request.headers_mut().insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }

        self.inner.send_bytes(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::gcp::credentials::testing::FakeSource;

    fn credentials(source: FakeSource) -> Arc<CredentialProvider> {
        Arc::new(CredentialProvider::initialize(Arc::new(source)).unwrap())
    }

    fn failing() -> Arc<CredentialProvider> {
        let mut source = FakeSource::new("proj1");
        source.fail = true;
        credentials(source)
    }

    #[test]
    fn build_headers_returns_exactly_two_entries() {
        let headers = build_headers(&credentials(FakeSource::new("proj1"))).unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[QUOTA_USER_PROJECT_HEADER], "proj1");
        assert_eq!(headers[AUTHORIZATION_HEADER], "Bearer token-1");
    }

    #[test]
    fn build_headers_propagates_refresh_failure() {
        let err = build_headers(&failing()).unwrap_err();

        assert!(matches!(err, AuthError::FailedRefresh(_)));
    }

    #[test]
    fn header_source_is_lazy() {
        let source = FakeSource::new("proj1");
        let credentials = credentials(source);

        let header_source = HeaderSource::from_credentials(credentials.clone());
        assert_eq!(credentials.quota_project_id(), "proj1");

        let headers = header_source.headers().unwrap();
        assert_eq!(headers[AUTHORIZATION_HEADER], "Bearer token-1");
    }

    #[test]
    fn interceptor_sets_metadata() {
        let mut interceptor =
            AuthInterceptor::new(HeaderSource::from_credentials(credentials(FakeSource::new("proj1"))));

        let request = interceptor.call(tonic::Request::new(())).unwrap();

        let metadata = request.metadata();
        assert_eq!(metadata.get("x-goog-user-project").unwrap(), "proj1");
        assert_eq!(metadata.get("authorization").unwrap(), "Bearer token-1");
    }

    #[test]
    fn interceptor_fails_retryably_on_refresh_error() {
        let mut interceptor = AuthInterceptor::new(HeaderSource::from_credentials(failing()));

        let status = interceptor.call(tonic::Request::new(())).unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[test]
    fn interceptor_rejects_missing_identity_as_unauthenticated() {
        let mut interceptor = AuthInterceptor::new(HeaderSource::new(|| {
            Err(AuthError::FailedInitialRetrieval("no credentials".into()))
        }));

        let status = interceptor.call(tonic::Request::new(())).unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[derive(Debug, Default)]
    struct RecordingClient {
        requests: Mutex<Vec<http::HeaderMap>>,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            self.requests.lock().unwrap().push(request.headers().clone());
            Ok(Response::new(Bytes::new()))
        }
    }

    fn export_request() -> Request<Bytes> {
        Request::builder()
            .method("POST")
            .uri("https://example.com/v1/traces")
            .body(Bytes::from_static(b"payload"))
            .unwrap()
    }

    #[tokio::test]
    async fn http_client_adds_headers() {
        let client = HeaderInjectingClient::new(
            RecordingClient::default(),
            HeaderSource::from_credentials(credentials(FakeSource::new("proj1"))),
        );

        client.send_bytes(export_request()).await.unwrap();

        let requests = client.inner.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["x-goog-user-project"], "proj1");
        assert_eq!(requests[0]["authorization"], "Bearer token-1");
    }

    #[tokio::test]
    async fn http_client_skips_send_on_refresh_error() {
        let client =
            HeaderInjectingClient::new(RecordingClient::default(), HeaderSource::from_credentials(failing()));

        let result = client.send_bytes(export_request()).await;

        assert!(result.is_err());
        assert!(client.inner.requests.lock().unwrap().is_empty());
    }
}
