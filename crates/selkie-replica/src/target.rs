//! Replica target configuration.

use crate::{ReplicaError, DEFAULT_SYNC_INTERVAL};
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;

/// Where and how a database is replicated. Immutable for the process
/// lifetime; constructed once at startup and passed in.
#[derive(Debug, Clone)]
pub struct ReplicaTarget {
    /// Bucket holding the replica.
    pub bucket: String,
    /// Key prefix inside the bucket (typically the database name).
    pub prefix: String,
    /// Endpoint override for local MinIO-style stores. `None` for real S3.
    pub endpoint: Option<String>,
    /// Region. AWS credentials themselves come from the environment.
    pub region: String,
    /// How often the replicator ships new log bytes.
    pub sync_interval: Duration,
}

impl ReplicaTarget {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            endpoint: None,
            region: "us-east-1".to_string(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Build the backend client. An endpoint override switches to path-style
    /// addressing over plain HTTP, which is what MinIO-style local stores
    /// speak.
    pub fn build_store(&self) -> Result<Arc<dyn ObjectStore>, ReplicaError> {
        if self.bucket.is_empty() {
            return Err(ReplicaError::InvalidTarget("empty bucket name".into()));
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&self.bucket)
            .with_region(&self.region);

        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let store = builder.build()?;
        Ok(Arc::new(store))
    }
}
