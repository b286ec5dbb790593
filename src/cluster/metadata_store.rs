//! Construction of the object store holding topic metadata.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use std::sync::Arc;
use tracing::info;

use super::config::{BrokerConfig, MetadataStoreType};
use super::error::{BrokerError, BrokerResult};

/// Build the metadata store backend selected by `config.metadata_store`.
///
/// A local store creates its root directory if it is missing.
pub fn create_object_store(config: &BrokerConfig) -> BrokerResult<Arc<dyn ObjectStore>> {
    match &config.metadata_store {
        MetadataStoreType::Memory => {
            info!("Using in-memory metadata store");
            Ok(Arc::new(InMemory::new()))
        }
        MetadataStoreType::Local { path } => {
            std::fs::create_dir_all(path).map_err(|e| {
                BrokerError::Config(format!("Failed to create metadata directory: {}", e))
            })?;

            let store = LocalFileSystem::new_with_prefix(path).map_err(|e| {
                BrokerError::Config(format!("Failed to open metadata directory: {}", e))
            })?;
            info!(path = %path, "Using local metadata store");
            Ok(Arc::new(store))
        }
        MetadataStoreType::S3 {
            bucket,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
        } => {
            use object_store::aws::AmazonS3Builder;

            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_region(region);

            if let Some(ep) = endpoint {
                builder = builder.with_endpoint(ep).with_allow_http(true);
            }

            if let (Some(key), Some(secret)) = (access_key_id, secret_access_key) {
                builder = builder
                    .with_access_key_id(key)
                    .with_secret_access_key(secret);
            }

            let store = builder.build().map_err(|e| {
                BrokerError::Config(format!("Failed to create S3 metadata store: {}", e))
            })?;

            info!(bucket = %bucket, region = %region, "Using S3 metadata store");
            Ok(Arc::new(store))
        }
    }
}
