//! Object store client
//!
//! The in-cluster store speaks the S3 protocol. Uploads go through
//! `object_store`; bucket creation, which `object_store` does not model, is a
//! presigned `PUT /<bucket>/` sent with `reqwest`.
//!
//! Both are hidden behind [`StoreConnector`] / [`ObjectStoreClient`] so the
//! publisher can be exercised against an in-memory fake.

use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Content type of source archives
pub const ARCHIVE_CONTENT_TYPE: &str = "application/tar+gzip";

/// How long a presigned bucket request stays valid
const PRESIGN_TTL: Duration = Duration::from_secs(60);

/// Errors raised by the object store client
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, reset, timed out)
    #[error("store unreachable at {endpoint}: {message}")]
    Unreachable { endpoint: String, message: String },

    /// The client could not be configured
    #[error("failed to create store client: {0}")]
    Client(String),

    /// Bucket creation was rejected
    #[error("failed to create bucket '{bucket}': {message}")]
    Bucket { bucket: String, message: String },

    /// Upload was rejected or interrupted
    #[error("failed to upload '{key}': {message}")]
    Upload { key: String, message: String },
}

impl StoreError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Credentials and endpoint of a store connection
#[derive(Clone)]
pub struct StoreEndpoint {
    /// Base URL, e.g. `http://127.0.0.1:9000`
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl StoreEndpoint {
    /// Plain-HTTP endpoint on the loopback interface
    pub fn loopback(port: u16, access_key: &str, secret_key: &str, region: &str) -> Self {
        Self {
            url: format!("http://127.0.0.1:{}", port),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            region: region.to_string(),
        }
    }
}

/// Operations the publisher needs from an object store
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Creates `bucket`, treating an existing bucket as success
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Streams `body` to `bucket/key`, replacing any existing object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: tokio::fs::File,
        content_type: &str,
    ) -> Result<u64, StoreError>;
}

/// Opens client connections to a store endpoint
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, endpoint: StoreEndpoint)
    -> Result<Box<dyn ObjectStoreClient>, StoreError>;
}

/// Connector for S3-compatible stores (MinIO)
#[derive(Debug, Clone)]
pub struct S3Connector {
    http: reqwest::Client,
}

impl S3Connector {
    /// Creates a connector
    ///
    /// Store endpoints are reached through a loopback tunnel, so system
    /// proxy settings are ignored.
    pub fn new() -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| StoreError::Client(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl StoreConnector for S3Connector {
    async fn connect(
        &self,
        endpoint: StoreEndpoint,
    ) -> Result<Box<dyn ObjectStoreClient>, StoreError> {
        if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
            return Err(StoreError::Client(format!(
                "endpoint must start with http:// or https://: {}",
                endpoint.url
            )));
        }

        debug!(endpoint = %endpoint.url, "store client created");
        Ok(Box::new(S3Client {
            endpoint,
            http: self.http.clone(),
        }))
    }
}

/// S3 client bound to one endpoint
///
/// `object_store` binds a store to a single bucket, so one is built per call.
struct S3Client {
    endpoint: StoreEndpoint,
    http: reqwest::Client,
}

impl S3Client {
    fn bucket_store(&self, bucket: &str) -> Result<AmazonS3, StoreError> {
        AmazonS3Builder::new()
            .with_endpoint(&self.endpoint.url)
            .with_allow_http(self.endpoint.url.starts_with("http://"))
            .with_bucket_name(bucket)
            .with_region(&self.endpoint.region)
            .with_access_key_id(&self.endpoint.access_key)
            .with_secret_access_key(&self.endpoint.secret_key)
            .with_virtual_hosted_style_request(false)
            .build()
            .map_err(|e| StoreError::Client(e.to_string()))
    }

    fn unreachable(&self, message: impl ToString) -> StoreError {
        StoreError::Unreachable {
            endpoint: self.endpoint.url.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for S3Client {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let store = self.bucket_store(bucket)?;

        // An empty object path signs the bucket URL itself
        let url = store
            .signed_url(Method::PUT, &ObjectPath::default(), PRESIGN_TTL)
            .await
            .map_err(|e| StoreError::Client(e.to_string()))?;

        let response = self
            .http
            .put(url)
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    self.unreachable(e)
                } else {
                    StoreError::Bucket {
                        bucket: bucket.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            info!(bucket = %bucket, "bucket created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if bucket_already_exists(status, &body) {
            debug!(bucket = %bucket, "bucket already exists");
            return Ok(());
        }

        Err(StoreError::Bucket {
            bucket: bucket.to_string(),
            message: format!("status {}: {}", status.as_u16(), body.trim()),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: tokio::fs::File,
        content_type: &str,
    ) -> Result<u64, StoreError> {
        let store: Arc<dyn ObjectStore> = Arc::new(self.bucket_store(bucket)?);
        let path = ObjectPath::parse(key).map_err(|e| StoreError::Upload {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());

        let upload_error = |message: String| StoreError::Upload {
            key: key.to_string(),
            message,
        };

        let mut writer = BufWriter::new(store, path).with_attributes(attributes);
        let size = match tokio::io::copy(&mut body, &mut writer).await {
            Ok(size) => size,
            Err(e) => {
                let _ = writer.abort().await;
                return Err(upload_error(e.to_string()));
            }
        };
        writer
            .shutdown()
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        info!(bucket = %bucket, key = %key, size, "object uploaded");
        Ok(size)
    }
}

/// S3 answers 409 for both "owned by you" and "owned by someone else"
fn bucket_already_exists(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        && (body.contains("BucketAlreadyOwnedByYou") || body.contains("BucketAlreadyExists"))
}
