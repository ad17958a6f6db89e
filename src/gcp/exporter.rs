use std::sync::Arc;

use tracing::{debug, info};

use crate::gcp::auth::HeaderSource;
use crate::gcp::credentials::CredentialProvider;
use crate::pipeline::ExporterHandle;

/// Attaches the credential-backed header source to OTLP exporters.
///
/// Other exporters are returned untouched: there is no generic way to add
/// headers to them, and failing would break exporters unrelated to auth.
pub fn customize_exporter(
    exporter: ExporterHandle,
    credentials: &Arc<CredentialProvider>,
) -> ExporterHandle {
    match exporter {
        ExporterHandle::OtlpHttp(exporter) => {
            info!("🔐 Adding GCP auth headers to OTLP/HTTP exporter");
            ExporterHandle::OtlpHttp(
                exporter
                    .to_builder()
                    .with_header_source(HeaderSource::from_credentials(credentials.clone()))
                    .build(),
            )
        }
        ExporterHandle::OtlpGrpc(exporter) => {
            info!("🔐 Adding GCP auth headers to OTLP/gRPC exporter");
            ExporterHandle::OtlpGrpc(
                exporter
                    .to_builder()
                    .with_header_source(HeaderSource::from_credentials(credentials.clone()))
                    .build(),
            )
        }
        other @ ExporterHandle::Other(_) => {
            debug!(exporter = other.name(), "Leaving non-OTLP exporter unchanged");
            other
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gcp::auth::{AUTHORIZATION_HEADER, QUOTA_USER_PROJECT_HEADER};
    use crate::gcp::credentials::testing::FakeSource;
    use crate::pipeline::exporter::{OtlpGrpcExporter, OtlpHttpExporter};
    use crate::pipeline::NamedExporter;
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    fn credentials() -> Arc<CredentialProvider> {
        Arc::new(CredentialProvider::initialize(Arc::new(FakeSource::new("test-project"))).unwrap())
    }

    #[test]
    fn grpc_exporter_gets_header_source_and_keeps_settings() {
        let original = OtlpGrpcExporter::builder()
            .with_endpoint("https://collector:4317")
            .with_header("x-tenant", "a")
            .with_timeout(Duration::from_secs(3))
            .build();
        let settings = original.settings().clone();

        let customized = customize_exporter(ExporterHandle::OtlpGrpc(original), &credentials());

        let ExporterHandle::OtlpGrpc(exporter) = customized else {
            panic!("variant changed");
        };
        assert_eq!(exporter.settings(), &settings);
        let headers = exporter.header_source().unwrap().headers().unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[QUOTA_USER_PROJECT_HEADER], "test-project");
        assert_eq!(headers[AUTHORIZATION_HEADER], "Bearer token-1");
    }

    #[test]
    fn http_exporter_gets_header_source_and_keeps_settings() {
        let original = OtlpHttpExporter::builder()
            .with_endpoint("https://collector/v1/traces")
            .with_insecure(true)
            .build();
        let settings = original.settings().clone();

        let customized = customize_exporter(ExporterHandle::OtlpHttp(original), &credentials());

        let ExporterHandle::OtlpHttp(exporter) = customized else {
            panic!("variant changed");
        };
        assert_eq!(exporter.settings(), &settings);
        assert!(exporter.header_source().is_some());
    }

    #[test]
    fn existing_header_source_is_replaced() {
        let stale = HeaderSource::new(|| Ok(Default::default()));
        let original = OtlpGrpcExporter::builder()
            .with_header_source(stale.clone())
            .build();

        let customized = customize_exporter(ExporterHandle::OtlpGrpc(original), &credentials());

        let ExporterHandle::OtlpGrpc(exporter) = customized else {
            panic!("variant changed");
        };
        assert!(!exporter.header_source().unwrap().ptr_eq(&stale));
    }

    #[test]
    fn other_exporter_is_returned_unchanged() {
        let boxed: Box<dyn crate::pipeline::ConfigurableExporter> =
            Box::new(NamedExporter::new("memory", InMemorySpanExporter::default()));
        let address = &*boxed as *const _ as *const ();

        let customized = customize_exporter(ExporterHandle::Other(boxed), &credentials());

        let ExporterHandle::Other(exporter) = customized else {
            panic!("variant changed");
        };
        assert_eq!(exporter.name(), "memory");
        assert_eq!(&*exporter as *const _ as *const (), address);
    }
}
