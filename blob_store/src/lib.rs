//! Object store gateway for stored images.
//!
//! [`BlobStorage`] is a pass-through over an [`object_store::ObjectStore`]:
//! it writes bytes under a key with the content type recorded as object
//! metadata, and reads them back. It never interprets the bytes it moves.

use std::{env, fmt, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    aws::{AmazonS3Builder, S3ConditionalPut},
    local::LocalFileSystem,
    memory::InMemory,
    path::Path,
    Attribute,
    AttributeValue,
    Attributes,
    ObjectStore,
    ObjectStoreScheme,
    PutMode,
    PutOptions,
    PutPayload,
};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

mod error;
pub mod retry;

pub use error::StoreError;
use retry::RetryPolicy;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_put_attempts() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    200
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    /// `s3://bucket/prefix`, `file:///some/dir` or `memory:///`.
    pub url: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Cloudflare R2 account; expands to the account's S3 endpoint.
    #[serde(default)]
    pub r2_account_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_put_attempts")]
    pub max_put_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl fmt::Debug for BlobStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStorageConfig")
            .field("url", &self.url)
            .field("endpoint", &self.endpoint)
            .field("r2_account_id", &self.r2_account_id)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("allow_http", &self.allow_http)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_put_attempts", &self.max_put_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl BlobStorageConfig {
    pub fn new(url: &str) -> Self {
        BlobStorageConfig {
            url: url.to_string(),
            endpoint: None,
            r2_account_id: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
            request_timeout_secs: default_request_timeout_secs(),
            max_put_attempts: default_max_put_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new("memory:///")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_put_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn validate(&self) -> Result<()> {
        let url = self
            .url
            .parse::<Url>()
            .with_context(|| format!("invalid storage url: {}", self.url))?;
        let (scheme, _) = ObjectStoreScheme::parse(&url)
            .with_context(|| format!("unsupported storage url: {}", self.url))?;
        if !matches!(
            scheme,
            ObjectStoreScheme::AmazonS3 | ObjectStoreScheme::Local | ObjectStoreScheme::Memory
        ) {
            return Err(anyhow!(
                "unsupported storage scheme {:?}, expected s3, file or memory",
                scheme
            ));
        }
        if self.endpoint.is_some() && self.r2_account_id.is_some() {
            return Err(anyhow!("cannot specify both endpoint and r2_account_id"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be greater than 0"));
        }
        if self.max_put_attempts == 0 {
            return Err(anyhow!("max_put_attempts must be at least 1"));
        }
        Ok(())
    }

    fn endpoint_url(&self) -> Option<String> {
        self.endpoint.clone().or_else(|| {
            self.r2_account_id
                .as_ref()
                .map(|account| format!("https://{}.r2.cloudflarestorage.com", account))
        })
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let dir = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("imgdrop_storage/images");
        Self::new(&format!("file://{}", dir.display()))
    }
}

/// Location of a successful write.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub key: String,
    pub location: String,
    pub size_bytes: u64,
}

/// Bytes and content type read back for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// The storage capability the image pipeline depends on.
#[async_trait]
pub trait ObjectGateway: Send + Sync {
    /// Writes `data` under `key`. Fails if `key` already holds other bytes.
    async fn put(&self, key: &str, data: Bytes, content_type: &str)
        -> Result<PutResult, StoreError>;

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError>;
}

#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    prefix: Path,
    supports_attributes: bool,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    metrics: Arc<metrics::blob_store_stats::Metrics>,
}

impl BlobStorage {
    pub fn new(config: &BlobStorageConfig) -> Result<Self> {
        config.validate()?;
        let url = config.url.parse::<Url>()?;
        let (scheme, prefix) = ObjectStoreScheme::parse(&url)?;
        let (object_store, prefix, supports_attributes): (Arc<dyn ObjectStore>, Path, bool) =
            match scheme {
                ObjectStoreScheme::AmazonS3 => {
                    let mut builder = AmazonS3Builder::from_env()
                        .with_url(config.url.as_str())
                        .with_conditional_put(S3ConditionalPut::ETagMatch)
                        .with_allow_http(config.allow_http);
                    if let Some(endpoint) = config.endpoint_url() {
                        builder = builder.with_endpoint(endpoint);
                    }
                    if let Some(region) = &config.region {
                        builder = builder.with_region(region);
                    } else if config.r2_account_id.is_some() {
                        builder = builder.with_region("auto");
                    }
                    if let Some(access_key_id) = &config.access_key_id {
                        builder = builder.with_access_key_id(access_key_id);
                    }
                    if let Some(secret_access_key) = &config.secret_access_key {
                        builder = builder.with_secret_access_key(secret_access_key);
                    }
                    let s3 = builder.build().context("unable to build S3 client")?;
                    (Arc::new(s3), prefix, true)
                }
                ObjectStoreScheme::Local => {
                    let dir = url
                        .to_file_path()
                        .map_err(|_| anyhow!("invalid file url: {}", config.url))?;
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("creating storage dir {}", dir.display()))?;
                    let local = LocalFileSystem::new_with_prefix(&dir)?;
                    // the local backend has no object metadata; content types
                    // are resolved from key extensions on read.
                    (Arc::new(local), Path::default(), false)
                }
                ObjectStoreScheme::Memory => (Arc::new(InMemory::new()), prefix, true),
                other => return Err(anyhow!("unsupported storage scheme {:?}", other)),
            };
        info!(url = %config.url, "using object store");
        Ok(Self {
            object_store,
            prefix,
            supports_attributes,
            request_timeout: config.request_timeout(),
            retry_policy: config.retry_policy(),
            metrics: Arc::new(metrics::blob_store_stats::Metrics::new()),
        })
    }

    /// Wraps an already constructed store, e.g. `InMemory` in tests.
    pub fn from_object_store(
        object_store: Arc<dyn ObjectStore>,
        supports_attributes: bool,
        config: &BlobStorageConfig,
    ) -> Self {
        Self {
            object_store,
            prefix: Path::default(),
            supports_attributes,
            request_timeout: config.request_timeout(),
            retry_policy: config.retry_policy(),
            metrics: Arc::new(metrics::blob_store_stats::Metrics::new()),
        }
    }

    pub fn get_object_store(&self) -> Arc<dyn ObjectStore> {
        self.object_store.clone()
    }

    fn location(&self, key: &str) -> Result<Path, StoreError> {
        if key.is_empty() || key == "." || key == ".." || key.contains('/') {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.prefix.child(key))
    }

    async fn timed<T, F>(&self, operation: &'static str, key: &str, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, object_store::Error>>,
    {
        let histogram = &self.metrics.operation_duration;
        let fut = metrics::create_timed_future(fut, |elapsed| {
            histogram.record(
                elapsed.as_secs_f64(),
                &[KeyValue::new("operation", operation)],
            );
        });
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(|source| StoreError::from_object_store(key, source)),
            Err(_) => Err(StoreError::Timeout {
                key: key.to_string(),
                after: self.request_timeout,
            }),
        }
    }

    async fn write_once(
        &self,
        key: &str,
        location: &Path,
        data: &Bytes,
        content_type: &str,
        is_retry: bool,
    ) -> Result<(), StoreError> {
        let mut attributes = Attributes::new();
        if self.supports_attributes {
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_string()),
            );
        }
        let opts = PutOptions {
            mode: PutMode::Create,
            attributes,
            ..Default::default()
        };
        let payload = PutPayload::from(data.clone());
        let result = self
            .timed("put", key, self.object_store.put_opts(location, payload, opts))
            .await;
        match result {
            // An earlier attempt may have landed before its response was lost.
            Err(StoreError::AlreadyExists { .. }) if is_retry => {
                self.confirm_existing(key, location, data).await
            }
            Err(e) => Err(e),
            Ok(_) => Ok(()),
        }
    }

    async fn confirm_existing(
        &self,
        key: &str,
        location: &Path,
        data: &Bytes,
    ) -> Result<(), StoreError> {
        let existing = self
            .timed("get", key, async {
                self.object_store.get(location).await?.bytes().await
            })
            .await?;
        if existing == *data {
            debug!(key, "retried write found identical object");
            Ok(())
        } else {
            Err(StoreError::AlreadyExists {
                key: key.to_string(),
            })
        }
    }

    fn resolve_content_type(key: &str, attributes: &Attributes) -> String {
        if let Some(value) = attributes.get(&Attribute::ContentType) {
            return value.to_string();
        }
        mime_guess::from_path(key)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    }
}

#[async_trait]
impl ObjectGateway for BlobStorage {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<PutResult, StoreError> {
        let location = self.location(key)?;
        let size_bytes = data.len() as u64;
        let (location_ref, data_ref) = (&location, &data);
        self.retry_policy
            .run(|attempt| async move {
                if attempt > 1 {
                    warn!(key, attempt, "retrying object store write");
                }
                self.write_once(key, location_ref, data_ref, content_type, attempt > 1)
                    .await
            })
            .await?;
        Ok(PutResult {
            key: key.to_string(),
            location: location.to_string(),
            size_bytes,
        })
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        let location = self.location(key)?;
        let (data, attributes) = self
            .timed("get", key, async {
                let result = self.object_store.get(&location).await?;
                let attributes = result.attributes.clone();
                let data = result.bytes().await?;
                Ok::<_, object_store::Error>((data, attributes))
            })
            .await?;
        Ok(StoredObject {
            content_type: Self::resolve_content_type(key, &attributes),
            data,
        })
    }
}
