use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::ResourceDetector;
use opentelemetry_sdk::Resource;

use crate::config::{ConfigProperties, SERVICE_NAME};

/// Extra resource attributes as `k1=v1,k2=v2`
pub const RESOURCE_ATTRIBUTES: &str = "otel.resource.attributes";

/// SDK defaults, detector output, then configured attributes and service name.
pub fn build_base_resource(
    properties: &ConfigProperties,
    detectors: Vec<Box<dyn ResourceDetector>>,
) -> Resource {
    let mut builder = Resource::builder();
    for detector in detectors {
        builder = builder.with_detector(detector);
    }

    let attributes = properties
        .get_map(RESOURCE_ATTRIBUTES)
        .into_iter()
        .map(|(key, value)| KeyValue::new(key, value));
    builder = builder.with_attributes(attributes);

    if let Some(name) = properties.get(SERVICE_NAME) {
        builder = builder.with_service_name(name.to_string());
    }

    builder.build()
}

/// Copies `resource` and sets `attributes` on top; later values win.
pub fn overlay(resource: &Resource, attributes: impl IntoIterator<Item = KeyValue>) -> Resource {
    let existing = resource
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));

    Resource::builder_empty()
        .with_attributes(existing.chain(attributes))
        .build()
}
