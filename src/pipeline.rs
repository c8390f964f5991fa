use std::{fmt, sync::Arc};

use blob_store::{ObjectGateway, StoreError, StoredObject};
use bytes::Bytes;
use metrics::{upload_stats, Timer};
use opentelemetry::KeyValue;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Span};

use crate::{
    data_model::{ImageFormat, StoredObjectKey, UploadRequest, UploadResult},
    keys,
    transcode::{self, DecodeError, TranscodeOptions, Transcoded},
    validation::{self, ClientInputError},
};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error(transparent)]
    ClientInput(#[from] ClientInputError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("image not found: {key}")]
    NotFound { key: String },
}

/// Progress of a single upload. Failures are reported with the stage the
/// upload had reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Received,
    Validated,
    Transcoded,
    KeyAssigned,
    Stored,
    Responded,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStage::Received => "received",
            UploadStage::Validated => "validated",
            UploadStage::Transcoded => "transcoded",
            UploadStage::KeyAssigned => "key_assigned",
            UploadStage::Stored => "stored",
            UploadStage::Responded => "responded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base of the links handed back to clients.
    pub public_url: String,
    pub max_upload_bytes: u64,
    pub max_concurrent_transcodes: usize,
    pub transcode: TranscodeOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8900".to_string(),
            max_upload_bytes: validation::MAX_UPLOAD_BYTES,
            max_concurrent_transcodes: 4,
            transcode: TranscodeOptions::default(),
        }
    }
}

/// Upload and retrieval over an injected object gateway.
pub struct ImagePipeline {
    gateway: Arc<dyn ObjectGateway>,
    config: PipelineConfig,
    transcode_permits: Arc<Semaphore>,
    metrics: Arc<upload_stats::Metrics>,
}

impl ImagePipeline {
    pub fn new(gateway: Arc<dyn ObjectGateway>, config: PipelineConfig) -> Self {
        let permits = config.max_concurrent_transcodes.max(1);
        Self {
            gateway,
            config,
            transcode_permits: Arc::new(Semaphore::new(permits)),
            metrics: Arc::new(upload_stats::Metrics::new()),
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.config.max_upload_bytes
    }

    pub fn public_url(&self, key: &StoredObjectKey) -> String {
        format!("{}/{}", self.config.public_url.trim_end_matches('/'), key)
    }

    #[tracing::instrument(
        skip_all,
        fields(
            size = request.declared_size,
            content_type = request.declared_content_type.as_deref().unwrap_or_default(),
            key = tracing::field::Empty,
        )
    )]
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadResult, ImageError> {
        let original_size = request.declared_size;

        let format = match self.validate(&request) {
            Ok(format) => format,
            Err(err) => {
                info!(stage = %UploadStage::Received, reason = %err, "upload rejected");
                self.metrics.upload_outcome("rejected");
                return Err(err.into());
            }
        };
        debug!(stage = %UploadStage::Validated, %format, "upload validated");

        let transcoded = match self.transcode(request.file_bytes, format).await {
            Ok(transcoded) => transcoded,
            Err(err) => {
                error!(
                    stage = %UploadStage::Validated,
                    size = original_size,
                    content_type = %format,
                    error = %err,
                    "failed to transcode upload"
                );
                self.metrics.upload_outcome("decode_failed");
                return Err(err.into());
            }
        };
        debug!(
            stage = %UploadStage::Transcoded,
            width = transcoded.width,
            height = transcoded.height,
            resized = transcoded.resized,
            optimized_size = transcoded.bytes.len(),
            "upload transcoded"
        );

        let key = keys::generate(request.original_file_name.as_deref(), format);
        Span::current().record("key", key.as_str());
        debug!(stage = %UploadStage::KeyAssigned, "key assigned");

        let optimized_size = transcoded.bytes.len() as u64;
        if let Err(err) = self
            .gateway
            .put(key.as_str(), transcoded.bytes, format.mime_type())
            .await
        {
            error!(
                stage = %UploadStage::KeyAssigned,
                %key,
                size = optimized_size,
                content_type = %format,
                error = %err,
                "failed to store upload"
            );
            self.metrics.upload_outcome("store_failed");
            return Err(err.into());
        }

        self.metrics.upload_outcome("stored");
        self.metrics.original_bytes.add(original_size, &[]);
        self.metrics.optimized_bytes.add(optimized_size, &[]);
        info!(
            stage = %UploadStage::Stored,
            %key,
            original_size,
            optimized_size,
            "image stored"
        );

        let result = UploadResult {
            url: self.public_url(&key),
            key,
            original_size,
            optimized_size,
        };
        debug!(stage = %UploadStage::Responded, url = %result.url, "upload complete");
        Ok(result)
    }

    fn validate(&self, request: &UploadRequest) -> Result<ImageFormat, ClientInputError> {
        if request.file_bytes.is_empty() {
            return Err(ClientInputError::MissingFile);
        }
        let size = request.declared_size.max(request.file_bytes.len() as u64);
        validation::validate(
            request.declared_content_type.as_deref(),
            size,
            self.config.max_upload_bytes,
        )
    }

    async fn transcode(&self, bytes: Bytes, format: ImageFormat) -> Result<Transcoded, DecodeError> {
        let permit = self
            .transcode_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DecodeError::Worker(e.to_string()))?;
        let options = self.config.transcode.clone();
        let _timer = Timer::start_with_labels(
            &self.metrics.transcode_duration,
            &[KeyValue::new("format", format.extension())],
        );
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            transcode::transcode(bytes, format, &options)
        })
        .await
        .map_err(|e| DecodeError::Worker(e.to_string()))?
    }

    /// Reads a stored image. Every gateway failure surfaces as `NotFound`
    /// so callers learn nothing about the backend.
    #[tracing::instrument(skip(self))]
    pub async fn retrieve(&self, key: &str) -> Result<StoredObject, ImageError> {
        if key.trim().is_empty() {
            return Err(ClientInputError::EmptyKey.into());
        }
        let not_found = || ImageError::NotFound {
            key: key.to_string(),
        };
        let Some(key) = StoredObjectKey::parse(key) else {
            debug!("malformed image key");
            self.metrics.retrieval_outcome("miss");
            return Err(not_found());
        };

        match self.gateway.get(key.as_str()).await {
            Ok(object) => {
                self.metrics.retrieval_outcome("hit");
                Ok(object)
            }
            Err(err) if err.is_not_found() => {
                debug!("image not found");
                self.metrics.retrieval_outcome("miss");
                Err(not_found())
            }
            Err(err) => {
                warn!(error = %err, "object store read failed");
                self.metrics.retrieval_outcome("miss");
                Err(not_found())
            }
        }
    }
}
