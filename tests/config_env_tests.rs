//! Integration tests for BrokerConfig::from_env()

use std::env;
use std::sync::Mutex;
use std::time::Duration;

use tidemq::cluster::{BrokerConfig, MetadataStoreType, PublishConfig};

/// Environment variables are process-global, so env-based tests run one at a time.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// All environment variables read by BrokerConfig::from_env().
const ALL_CONFIG_ENV_VARS: &[&str] = &[
    "BROKER_HOST",
    "BROKER_PORT",
    "LISTEN_ADDR",
    "HEALTH_PORT",
    "METADATA_STORE_TYPE",
    "METADATA_PATH",
    "S3_BUCKET",
    "AWS_S3_BUCKET",
    "AWS_REGION",
    "AWS_ENDPOINT",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "TOPICS_ROOT",
    "HEARTBEAT_INTERVAL_MS",
    "RESPONSE_QUEUE_CAPACITY",
    "MAX_FRAME_SIZE",
    "MAX_CONNECTIONS",
    "OUTBOUND_DRAIN_TIMEOUT_MS",
];

/// Run `f` with exactly `vars` set among the config variables, restoring
/// the previous environment afterwards.
fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

    let all_originals: Vec<_> = ALL_CONFIG_ENV_VARS
        .iter()
        .map(|k| (*k, env::var(*k).ok()))
        .collect();

    for key in ALL_CONFIG_ENV_VARS {
        unsafe { env::remove_var(key) };
    }
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    for (key, original) in all_originals {
        match original {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
    }

    result
}

// ============================================================================
// Defaults
// ============================================================================

#[test]
fn test_from_env_defaults() {
    with_env_vars(&[], || {
        let config = BrokerConfig::from_env().expect("Should parse config");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 17777);
        assert_eq!(config.listen_addr, "0.0.0.0:17777");
        assert_eq!(config.metadata_store, MetadataStoreType::Memory);
        assert_eq!(config.topics_root, "topics");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    });
}

#[test]
fn test_listen_addr_follows_port() {
    with_env_vars(&[("BROKER_PORT", "18000")], || {
        let config = BrokerConfig::from_env().unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:18000");
        assert_eq!(config.self_address().as_str(), "127.0.0.1:18000");
    });
}

#[test]
fn test_identity_and_listener_are_independent() {
    with_env_vars(
        &[
            ("BROKER_HOST", "broker-2.internal"),
            ("BROKER_PORT", "17777"),
            ("LISTEN_ADDR", "127.0.0.1:0"),
        ],
        || {
            let config = BrokerConfig::from_env().unwrap();
            assert_eq!(config.self_address().as_str(), "broker-2.internal:17777");
            assert_eq!(config.listen_addr, "127.0.0.1:0");
        },
    );
}

// ============================================================================
// Metadata store selection
// ============================================================================

#[test]
fn test_local_store() {
    with_env_vars(
        &[
            ("METADATA_STORE_TYPE", "LOCAL"),
            ("METADATA_PATH", "/var/lib/tidemq"),
        ],
        || {
            let config = BrokerConfig::from_env().unwrap();
            assert_eq!(
                config.metadata_store,
                MetadataStoreType::Local {
                    path: "/var/lib/tidemq".to_string()
                }
            );
        },
    );
}

#[test]
fn test_s3_store_with_fallback_bucket_var() {
    with_env_vars(
        &[
            ("METADATA_STORE_TYPE", "s3"),
            ("AWS_S3_BUCKET", "meta"),
            ("AWS_ENDPOINT", "http://localhost:9000"),
        ],
        || {
            let config = BrokerConfig::from_env().unwrap();
            match config.metadata_store {
                MetadataStoreType::S3 {
                    bucket,
                    region,
                    endpoint,
                    ..
                } => {
                    assert_eq!(bucket, "meta");
                    assert_eq!(region, "us-east-1");
                    assert_eq!(endpoint.as_deref(), Some("http://localhost:9000"));
                }
                other => panic!("expected s3, got {:?}", other),
            }
        },
    );
}

#[test]
fn test_s3_store_requires_bucket() {
    with_env_vars(&[("METADATA_STORE_TYPE", "s3")], || {
        let err = BrokerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    });
}

#[test]
fn test_unknown_store_type() {
    with_env_vars(&[("METADATA_STORE_TYPE", "etcd")], || {
        let err = BrokerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Unknown METADATA_STORE_TYPE 'etcd'"));
    });
}

// ============================================================================
// Publish tuning
// ============================================================================

#[test]
fn test_publish_tuning_from_env() {
    with_env_vars(
        &[
            ("HEARTBEAT_INTERVAL_MS", "250"),
            ("RESPONSE_QUEUE_CAPACITY", "16"),
            ("OUTBOUND_DRAIN_TIMEOUT_MS", "900"),
        ],
        || {
            let config = BrokerConfig::from_env().unwrap();
            let publish = PublishConfig::from(&config);
            assert_eq!(publish.heartbeat_interval, Duration::from_millis(250));
            assert_eq!(publish.response_queue_capacity, 16);
            assert_eq!(publish.drain_timeout, Duration::from_millis(900));
        },
    );
}

#[test]
fn test_invalid_number_is_rejected() {
    with_env_vars(&[("MAX_FRAME_SIZE", "big")], || {
        let err = BrokerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Invalid MAX_FRAME_SIZE"));
    });
}

#[test]
fn test_slow_heartbeat_fails_validation() {
    with_env_vars(&[("HEARTBEAT_INTERVAL_MS", "5000")], || {
        let config = BrokerConfig::from_env().unwrap();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("heartbeat_interval")));
    });
}
