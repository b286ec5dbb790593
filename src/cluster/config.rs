//! Broker process configuration.
//!
//! Every setting has a default and can be overridden from the environment
//! with [`BrokerConfig::from_env`]. Call [`BrokerConfig::validate`] at startup.
//!
//! # Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `BROKER_HOST` | `127.0.0.1` | Host part of this broker's identity |
//! | `BROKER_PORT` | `17777` | Port part of this broker's identity |
//! | `LISTEN_ADDR` | `0.0.0.0:<BROKER_PORT>` | Socket the publish listener binds |
//! | `HEALTH_PORT` | `8080` | HTTP health port, `0` disables |
//! | `METADATA_STORE_TYPE` | `memory` | `memory`, `local` or `s3` |
//! | `METADATA_PATH` | `/tmp/tidemq-metadata` | Root directory for `local` |
//! | `S3_BUCKET` / `AWS_S3_BUCKET` | | Bucket for `s3` |
//! | `AWS_REGION` | `us-east-1` | |
//! | `AWS_ENDPOINT` | | S3-compatible endpoint (MinIO) |
//! | `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` | | Static credentials |
//! | `TOPICS_ROOT` | `topics` | Prefix of topic metadata in the store |
//! | `HEARTBEAT_INTERVAL_MS` | `1000` | Idle heartbeat period |
//! | `RESPONSE_QUEUE_CAPACITY` | `128` | Per-session outbound queue size |
//! | `MAX_FRAME_SIZE` | `8388608` | Largest accepted frame body |
//! | `MAX_CONNECTIONS` | `10000` | Concurrent connections, `0` is unlimited |
//! | `OUTBOUND_DRAIN_TIMEOUT_MS` | `5000` | Flush deadline after a session ends |

use std::time::Duration;

use crate::constants::{
    DEFAULT_BROKER_PORT, DEFAULT_HEALTH_PORT, DEFAULT_HEARTBEAT_INTERVAL_MS,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_TOTAL_CONNECTIONS, DEFAULT_OUTBOUND_DRAIN_TIMEOUT_MS,
    DEFAULT_RESPONSE_QUEUE_CAPACITY, DEFAULT_TOPICS_ROOT,
};
use crate::types::BrokerAddress;

const DEFAULT_METADATA_PATH: &str = "/tmp/tidemq-metadata";

/// Where partition assignment documents are read from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MetadataStoreType {
    /// Process-local store, empty at startup. Used by tests and demos.
    #[default]
    Memory,
    /// Local filesystem rooted at `path`.
    Local { path: String },
    /// Amazon S3 or an S3-compatible service.
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
}

impl MetadataStoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataStoreType::Memory => "memory",
            MetadataStoreType::Local { .. } => "local",
            MetadataStoreType::S3 { .. } => "s3",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Host other components use to reach this broker. Compared against
    /// `leaderBroker` in assignment documents.
    pub host: String,
    pub port: u16,
    /// Address the publish listener binds to.
    pub listen_addr: String,
    /// Port of the HTTP health server. Zero disables it.
    pub health_port: u16,
    pub metadata_store: MetadataStoreType,
    pub topics_root: String,
    pub heartbeat_interval: Duration,
    pub response_queue_capacity: usize,
    pub max_frame_size: usize,
    /// Zero means unlimited.
    pub max_connections: usize,
    pub outbound_drain_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_BROKER_PORT,
            listen_addr: format!("0.0.0.0:{}", DEFAULT_BROKER_PORT),
            health_port: DEFAULT_HEALTH_PORT,
            metadata_store: MetadataStoreType::default(),
            topics_root: DEFAULT_TOPICS_ROOT.to_string(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            response_queue_capacity: DEFAULT_RESPONSE_QUEUE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: DEFAULT_MAX_TOTAL_CONNECTIONS,
            outbound_drain_timeout: Duration::from_millis(DEFAULT_OUTBOUND_DRAIN_TIMEOUT_MS),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

impl BrokerConfig {
    /// This broker's `host:port` identity.
    pub fn self_address(&self) -> BrokerAddress {
        BrokerAddress::from_host_port(&self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("host must not be empty".to_string());
        }

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }

        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "listen_addr ({}) is not a valid socket address",
                self.listen_addr
            ));
        }

        if self.topics_root.trim_matches('/').is_empty() {
            errors.push("topics_root must not be empty".to_string());
        }

        if self.heartbeat_interval.is_zero() {
            errors.push("heartbeat_interval must be greater than zero".to_string());
        }

        if self.heartbeat_interval > Duration::from_secs(1) {
            errors.push(format!(
                "heartbeat_interval ({:?}) must not exceed 1s; clients expect a heartbeat every second",
                self.heartbeat_interval
            ));
        }

        if self.response_queue_capacity == 0 {
            errors.push("response_queue_capacity must be greater than zero".to_string());
        }

        if self.max_frame_size < 64 {
            errors.push(format!(
                "max_frame_size ({}) must be at least 64 bytes",
                self.max_frame_size
            ));
        }

        if self.outbound_drain_timeout.is_zero() {
            errors.push("outbound_drain_timeout must be greater than zero".to_string());
        }

        match &self.metadata_store {
            MetadataStoreType::Local { path } if path.trim().is_empty() => {
                errors.push("metadata path must not be empty".to_string());
            }
            MetadataStoreType::S3 { bucket, .. } if bucket.trim().is_empty() => {
                errors.push("S3 bucket must not be empty".to_string());
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Self::default();

        let host = std::env::var("BROKER_HOST").unwrap_or(defaults.host);
        let port: u16 = parse_env("BROKER_PORT", defaults.port)?;
        if port == 0 {
            return Err("BROKER_PORT must be between 1 and 65535".into());
        }

        let listen_addr =
            std::env::var("LISTEN_ADDR").unwrap_or_else(|_| format!("0.0.0.0:{}", port));
        let health_port: u16 = parse_env("HEALTH_PORT", defaults.health_port)?;

        let store_type = std::env::var("METADATA_STORE_TYPE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let metadata_store = match store_type.as_str() {
            "memory" => MetadataStoreType::Memory,
            "local" => MetadataStoreType::Local {
                path: std::env::var("METADATA_PATH")
                    .unwrap_or_else(|_| DEFAULT_METADATA_PATH.to_string()),
            },
            "s3" => {
                let bucket = std::env::var("S3_BUCKET")
                    .or_else(|_| std::env::var("AWS_S3_BUCKET"))
                    .map_err(
                        |_| "S3_BUCKET or AWS_S3_BUCKET must be set when METADATA_STORE_TYPE=s3",
                    )?;
                MetadataStoreType::S3 {
                    bucket,
                    region: std::env::var("AWS_REGION")
                        .unwrap_or_else(|_| "us-east-1".to_string()),
                    endpoint: std::env::var("AWS_ENDPOINT").ok(),
                    access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                    secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                }
            }
            other => {
                return Err(format!(
                    "Unknown METADATA_STORE_TYPE '{}'. Valid types: memory, local, s3",
                    other
                )
                .into());
            }
        };

        let topics_root = std::env::var("TOPICS_ROOT").unwrap_or(defaults.topics_root);

        let heartbeat_ms: u64 =
            parse_env("HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS)?;
        let drain_ms: u64 =
            parse_env("OUTBOUND_DRAIN_TIMEOUT_MS", DEFAULT_OUTBOUND_DRAIN_TIMEOUT_MS)?;

        Ok(Self {
            host,
            port,
            listen_addr,
            health_port,
            metadata_store,
            topics_root,
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            response_queue_capacity: parse_env(
                "RESPONSE_QUEUE_CAPACITY",
                defaults.response_queue_capacity,
            )?,
            max_frame_size: parse_env("MAX_FRAME_SIZE", defaults.max_frame_size)?,
            max_connections: parse_env("MAX_CONNECTIONS", defaults.max_connections)?,
            outbound_drain_timeout: Duration::from_millis(drain_ms),
        })
    }
}

/// Per-session tuning used by the publish stream handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishConfig {
    pub heartbeat_interval: Duration,
    pub response_queue_capacity: usize,
    pub drain_timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for PublishConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            response_queue_capacity: config.response_queue_capacity.max(1),
            drain_timeout: config.outbound_drain_timeout,
        }
    }
}
