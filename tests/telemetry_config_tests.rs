//! Tests for TelemetryConfig and LogFormat.

use serial_test::serial;
use std::env;
use tidemq::telemetry::{LogFormat, TelemetryConfig};

#[test]
#[serial]
fn test_log_format_from_env() {
    unsafe { env::set_var("LOG_FORMAT", "json") };
    assert_eq!(LogFormat::from_env(), LogFormat::Json);

    unsafe { env::set_var("LOG_FORMAT", "PRETTY") };
    assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

    unsafe { env::remove_var("LOG_FORMAT") };
    assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
}

#[test]
#[serial]
fn test_telemetry_config_default() {
    unsafe {
        env::remove_var("OTEL_SERVICE_NAME");
        env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
    }
    let config = TelemetryConfig::default();
    assert_eq!(config.service_name, "tidemq-broker");
    assert_eq!(config.otlp_endpoint, "http://localhost:4317");
    assert!(config.enable_console);
}

#[test]
#[serial]
fn test_telemetry_config_from_env() {
    unsafe {
        env::set_var("OTEL_SERVICE_NAME", "broker-7");
        env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317");
    }
    let config = TelemetryConfig::default();
    assert_eq!(config.service_name, "broker-7");
    assert_eq!(config.otlp_endpoint, "http://collector:4317");
    unsafe {
        env::remove_var("OTEL_SERVICE_NAME");
        env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
    }
}

#[test]
fn test_telemetry_config_custom_values() {
    let config = TelemetryConfig {
        service_name: "my-custom-service".to_string(),
        otlp_endpoint: "http://custom:4318".to_string(),
        enable_console: false,
    };

    assert_eq!(config.service_name, "my-custom-service");
    assert!(!config.enable_console);
}
