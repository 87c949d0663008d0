//! Resource attribute detection.
//!
//! The service resource is assembled once at setup from the SDK's default
//! detectors (`telemetry.sdk.*`, `OTEL_RESOURCE_ATTRIBUTES`,
//! `OTEL_SERVICE_NAME`), the host and process detectors below, and finally the
//! explicit service identity from [`ResourceConfig`], which wins on conflict.

use crate::config::ResourceConfig;
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::{Resource, ResourceDetector};
use opentelemetry_semantic_conventions::resource::{
    DEPLOYMENT_ENVIRONMENT_NAME, HOST_ARCH, HOST_NAME, OS_TYPE, PROCESS_EXECUTABLE_NAME,
    PROCESS_PID, PROCESS_RUNTIME_NAME, SERVICE_INSTANCE_ID, SERVICE_NAME, SERVICE_VERSION,
};
use std::env;
use std::fs;

const HOSTNAME_FILE: &str = "/proc/sys/kernel/hostname";

/// Detects `host.name`, `host.arch` and `os.type`.
#[derive(Debug, Default)]
pub struct HostDetector;

impl ResourceDetector for HostDetector {
    fn detect(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new(HOST_ARCH, host_arch()),
            KeyValue::new(OS_TYPE, env::consts::OS),
        ];

        if let Some(name) = hostname() {
            attributes.push(KeyValue::new(HOST_NAME, name));
        }

        Resource::builder_empty().with_attributes(attributes).build()
    }
}

/// Detects `process.pid`, `process.executable.name` and
/// `process.runtime.name`.
#[derive(Debug, Default)]
pub struct ProcessDetector;

impl ResourceDetector for ProcessDetector {
    fn detect(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new(PROCESS_PID, i64::from(std::process::id())),
            KeyValue::new(PROCESS_RUNTIME_NAME, "rust"),
        ];

        if let Some(name) = env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        {
            attributes.push(KeyValue::new(PROCESS_EXECUTABLE_NAME, name));
        }

        Resource::builder_empty().with_attributes(attributes).build()
    }
}

/// Builds the service resource.
pub fn build_resource(config: &ResourceConfig) -> Resource {
    let mut explicit = vec![
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
    ];

    if !config.instance_id.is_empty() {
        explicit.push(KeyValue::new(SERVICE_INSTANCE_ID, config.instance_id.clone()));
    }

    if !config.deployment_environment.is_empty() {
        explicit.push(KeyValue::new(
            DEPLOYMENT_ENVIRONMENT_NAME,
            config.deployment_environment.clone(),
        ));
    }

    Resource::builder()
        .with_detector(Box::new(HostDetector))
        .with_detector(Box::new(ProcessDetector))
        .with_attributes(explicit)
        .build()
}

fn hostname() -> Option<String> {
    fs::read_to_string(HOSTNAME_FILE)
        .ok()
        .or_else(|| env::var("HOSTNAME").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn host_arch() -> &'static str {
    match env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "x86",
        "arm" => "arm32",
        "powerpc64" => "ppc64",
        "s390x" => "s390x",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    fn get_string_value(resource: &Resource, key: &str) -> Option<String> {
        resource
            .get(&Key::from(key.to_owned()))
            .and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
    }

    #[test]
    fn test_host_detector() {
        let resource = HostDetector.detect();

        assert_eq!(
            get_string_value(&resource, "os.type"),
            Some(env::consts::OS.to_string())
        );
        assert!(get_string_value(&resource, "host.arch").is_some());
    }

    #[test]
    fn test_process_detector() {
        let resource = ProcessDetector.detect();

        assert_eq!(
            resource.get(&Key::from_static_str("process.pid")),
            Some(Value::I64(i64::from(std::process::id())))
        );
        assert_eq!(
            get_string_value(&resource, "process.runtime.name"),
            Some("rust".to_string())
        );
    }

    #[test]
    fn test_explicit_identity_wins() {
        let config = ResourceConfig {
            service_name: "hello".to_string(),
            service_version: "1.2.3".to_string(),
            instance_id: "pod-7".to_string(),
            deployment_environment: "staging".to_string(),
        };

        temp_env::with_var("OTEL_SERVICE_NAME", Some("from-env"), || {
            let resource = build_resource(&config);

            assert_eq!(get_string_value(&resource, "service.name"), Some("hello".into()));
            assert_eq!(get_string_value(&resource, "service.version"), Some("1.2.3".into()));
            assert_eq!(
                get_string_value(&resource, "service.instance.id"),
                Some("pod-7".into())
            );
            assert_eq!(
                get_string_value(&resource, "deployment.environment.name"),
                Some("staging".into())
            );
            assert_eq!(
                get_string_value(&resource, "telemetry.sdk.language"),
                Some("rust".into())
            );
        });
    }

    #[test]
    fn test_empty_optional_identity_is_omitted() {
        let resource = build_resource(&ResourceConfig::default());

        assert!(get_string_value(&resource, "service.instance.id").is_none());
        assert!(get_string_value(&resource, "deployment.environment.name").is_none());
    }
}
