//! S3 Remote Store
//!
//! Amazon S3 (or any SigV4-speaking compatible service) through the
//! `object_store` crate.
//!
//! # Design
//!
//! - Requests are signed with the configured access key; with no credentials
//!   configured the remote tier stays disabled
//! - The store owns a small tokio runtime and blocks on it, so it fits the
//!   synchronous [`RemoteStore`] seam; it must not be called from inside an
//!   async task
//! - Files above the multipart threshold are uploaded in parts without being
//!   read into memory whole; downloads stream chunk by chunk into the file
//! - Retries with backoff are handled by `object_store`'s client

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload, WriteMultipart};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::debug;

use super::remote::RemoteStore;
use super::validate_key;
use crate::error::{Error, Result};

/// Files at least this large are uploaded in parts (16 MiB)
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Part size for multipart uploads
const MULTIPART_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Parts in flight during a multipart upload
const MULTIPART_CONCURRENCY: usize = 10;

/// S3 remote store configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3StoreConfig {
    /// Bucket holding the artifacts
    pub bucket: String,
    /// Bucket region
    pub region: String,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...)
    pub endpoint: Option<String>,
    /// Allow plain-HTTP endpoints
    pub allow_http: bool,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            bucket: "models".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
            allow_http: false,
        }
    }
}

// Keep the secret out of logs.
impl std::fmt::Debug for S3StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StoreConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("endpoint", &self.endpoint)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

impl S3StoreConfig {
    /// Create a configuration for a bucket in a region
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Read `BUCKET`, `REGION_NAME`, `AWS_ACCESS_KEY_ID`,
    /// `AWS_SECRET_ACCESS_KEY` and `AWS_ENDPOINT_URL`; unset or empty
    /// variables keep their defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Fill in values from an environment lookup
    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(bucket) = var("BUCKET") {
            self.bucket = bucket;
        }
        if let Some(region) = var("REGION_NAME") {
            self.region = region;
        }
        if let Some(key) = var("AWS_ACCESS_KEY_ID") {
            self.access_key_id = Some(key);
        }
        if let Some(secret) = var("AWS_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(secret);
        }
        if let Some(endpoint) = var("AWS_ENDPOINT_URL") {
            self.endpoint = Some(endpoint);
        }
        self
    }

    /// Set credentials
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    /// Set a custom endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.allow_http = endpoint.starts_with("http://");
        self.endpoint = Some(endpoint);
        self
    }

    /// Whether both halves of the access key are present
    pub fn has_credentials(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|v| !v.is_empty());
        set(&self.access_key_id) && set(&self.secret_access_key)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() || self.bucket.contains('/') {
            return Err(Error::Config(format!(
                "S3 bucket must be a single path segment, got {:?}",
                self.bucket
            )));
        }
        if self.region.is_empty() {
            return Err(Error::Config("S3 region must not be empty".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(Error::Config(format!(
                    "S3 endpoint must be an http(s) URL, got {:?}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// Remote store backed by an S3 bucket
pub struct S3RemoteStore {
    store: Arc<dyn ObjectStore>,
    runtime: Runtime,
    description: String,
    multipart_threshold: u64,
}

impl S3RemoteStore {
    /// Create a store from its configuration.
    ///
    /// Settings not present in `config` (session tokens, profiles) are taken
    /// from the standard AWS environment variables.
    pub fn new(config: S3StoreConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }

        let description = match &config.endpoint {
            Some(endpoint) => {
                builder = builder.with_endpoint(endpoint);
                format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket)
            }
            None => format!("s3://{}", config.bucket),
        };

        let store = builder.build().map_err(|e| {
            Error::Config(format!("failed to create S3 client for {}: {}", description, e))
        })?;

        Self::with_object_store(Arc::new(store), description)
    }

    /// Wrap any `object_store` backend
    pub fn with_object_store(
        store: Arc<dyn ObjectStore>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("modelcache-s3")
            .enable_all()
            .build()?;

        Ok(Self {
            store,
            runtime,
            description: description.into(),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        })
    }

    /// Set the size from which uploads are split into parts
    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    async fn upload_multipart(
        &self,
        location: &ObjectPath,
        mut file: File,
    ) -> object_store::Result<()> {
        let upload = self.store.put_multipart(location).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, MULTIPART_CHUNK_SIZE);

        let mut buf = vec![0u8; MULTIPART_CHUNK_SIZE];
        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    writer.abort().await?;
                    return Err(object_store::Error::Generic {
                        store: "S3",
                        source: Box::new(e),
                    });
                }
            };
            writer.wait_for_capacity(MULTIPART_CONCURRENCY).await?;
            writer.write(&buf[..n]);
        }

        writer.finish().await?;
        Ok(())
    }
}

fn remote_error(operation: &'static str, key: &str, e: object_store::Error) -> Error {
    match e {
        object_store::Error::NotFound { .. } => Error::RemoteNotFound(key.to_string()),
        e => Error::Remote {
            operation,
            key: key.to_string(),
            reason: e.to_string(),
        },
    }
}

impl RemoteStore for S3RemoteStore {
    fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        validate_key(key)?;
        let location = ObjectPath::from(key);
        let size = fs::metadata(local_path)?.len();

        if size >= self.multipart_threshold {
            let file = File::open(local_path)?;
            self.runtime
                .block_on(self.upload_multipart(&location, file))
                .map_err(|e| remote_error("upload", key, e))?;
        } else {
            let payload = PutPayload::from_bytes(fs::read(local_path)?.into());
            self.runtime
                .block_on(self.store.put(&location, payload))
                .map_err(|e| remote_error("upload", key, e))?;
        }

        debug!("Uploaded {} ({} bytes) to {}", key, size, self.description);
        Ok(())
    }

    fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        validate_key(key)?;
        let location = ObjectPath::from(key);

        let result = self.runtime.block_on(async {
            let mut stream = self.store.get(&location).await?.into_stream();
            let mut file = File::create(local_path).map_err(|e| object_store::Error::Generic {
                store: "S3",
                source: Box::new(e),
            })?;
            while let Some(chunk) = stream.try_next().await? {
                file.write_all(&chunk)
                    .map_err(|e| object_store::Error::Generic {
                        store: "S3",
                        source: Box::new(e),
                    })?;
            }
            Ok::<(), object_store::Error>(())
        });

        if let Err(e) = result {
            let _ = fs::remove_file(local_path);
            return Err(remote_error("download", key, e));
        }

        debug!("Downloaded {} from {}", key, self.description);
        Ok(())
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
