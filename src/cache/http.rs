//! HTTP Remote Store
//!
//! Plain path-style object access: `GET`/`PUT {endpoint}/{bucket}/{key}`
//! with an optional bearer token. Suits public or gateway-fronted buckets
//! and static artifact servers; requests are not SigV4-signed, so
//! authenticated S3 endpoints need [`S3RemoteStore`](super::S3RemoteStore).
//!
//! # Design
//!
//! - Blocking `reqwest` client with a per-request timeout
//! - Bodies are streamed between the network and files, never buffered whole
//! - Transport errors, 429 and 5xx are retried with exponential backoff;
//!   404 is reported immediately as not-found

use std::fs::{self, File};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::remote::RemoteStore;
use crate::error::{Error, Result};

/// HTTP remote store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStoreConfig {
    /// Base URL of the object store
    pub endpoint: String,
    /// Bucket holding the artifacts
    pub bucket: String,
    /// Optional bearer token
    pub bearer_token: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry, doubled on each subsequent one
    pub initial_backoff_ms: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "models".to_string(),
            bearer_token: None,
            timeout_secs: 300,
            max_retries: 3,
            initial_backoff_ms: 200,
        }
    }
}

impl HttpStoreConfig {
    /// Create a configuration for a bucket at an endpoint
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(Error::Config(format!(
                "remote endpoint must be an http(s) URL, got {:?}",
                self.endpoint
            )));
        }
        if self.bucket.is_empty() || self.bucket.contains('/') {
            return Err(Error::Config(format!(
                "remote bucket must be a single path segment, got {:?}",
                self.bucket
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("remote timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }
}

/// Remote store speaking plain HTTP to an object store
pub struct HttpRemoteStore {
    client: Client,
    config: HttpStoreConfig,
}

impl HttpRemoteStore {
    /// Create a store from its configuration
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::RemoteTransport)?;

        Ok(Self { client, config })
    }

    /// Get configuration
    pub fn config(&self) -> &HttpStoreConfig {
        &self.config
    }

    /// URL of an object
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            urlencoding::encode(key)
        )
    }

    /// Send a request, retrying transient failures.
    ///
    /// `build` is called once per attempt so request bodies can be reopened.
    fn send_with_retry<F>(&self, operation: &'static str, key: &str, mut build: F) -> Result<Response>
    where
        F: FnMut() -> Result<RequestBuilder>,
    {
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut attempt = 0;

        loop {
            let mut request = build()?;
            if let Some(token) = &self.config.bearer_token {
                request = request.bearer_auth(token);
            }

            let retry_reason = match request.send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(Error::RemoteNotFound(key.to_string()));
                }
                Ok(response) if is_retryable(response.status()) => {
                    if attempt >= self.config.max_retries {
                        return Err(Error::Remote {
                            operation,
                            key: key.to_string(),
                            reason: format!(
                                "HTTP {} after {} attempts",
                                response.status(),
                                attempt + 1
                            ),
                        });
                    }
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    return Err(Error::Remote {
                        operation,
                        key: key.to_string(),
                        reason: format!("HTTP {}", response.status()),
                    });
                }
                Err(e) => {
                    if attempt >= self.config.max_retries {
                        return Err(Error::RemoteTransport(e));
                    }
                    e.to_string()
                }
            };

            attempt += 1;
            warn!(
                "Remote {} of {} failed ({}), retry {}/{} in {:?}",
                operation, key, retry_reason, attempt, self.config.max_retries, backoff
            );
            thread::sleep(backoff);
            backoff *= 2;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl RemoteStore for HttpRemoteStore {
    fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let url = self.object_url(key);
        self.send_with_retry("upload", key, || {
            let file = File::open(local_path)?;
            Ok(self.client.put(&url).body(file))
        })?;

        debug!("Uploaded {} to {}", key, url);
        Ok(())
    }

    fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let url = self.object_url(key);
        let mut response = self.send_with_retry("download", key, || Ok(self.client.get(&url)))?;

        let mut file = File::create(local_path)?;
        if let Err(e) = response.copy_to(&mut file) {
            drop(file);
            let _ = fs::remove_file(local_path);
            return Err(Error::RemoteTransport(e));
        }

        debug!("Downloaded {} from {}", key, url);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), self.config.bucket)
    }
}

// =============================================================================
// Tests
// =============================================================================
