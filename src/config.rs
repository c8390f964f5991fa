use std::{fmt::Debug, net::SocketAddr, path::Path};

use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    pipeline::PipelineConfig,
    transcode::{TranscodeOptions, MAX_DIMENSION, MAX_INPUT_PIXELS},
    validation::MAX_UPLOAD_BYTES,
};

const ENV_PREFIX: &str = "IMGDROP_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub env: String,
    pub listen_addr: String,
    /// Base URL for the links returned by uploads.
    pub public_url: String,
    pub structured_logging: bool,
    pub limits: UploadLimits,
    pub storage: BlobStorageConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLimits {
    pub max_upload_bytes: u64,
    pub max_dimension: u32,
    /// Decoded pixel ceiling; larger images are refused from their header.
    pub max_input_pixels: u64,
    pub max_concurrent_transcodes: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            max_dimension: MAX_DIMENSION,
            max_input_pixels: MAX_INPUT_PIXELS,
            max_concurrent_transcodes: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enable_tracing: bool,
    pub enable_metrics: bool,
    /// OTLP collector; the exporter default is used when unset.
    pub endpoint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: "local".to_string(),
            listen_addr: "0.0.0.0:8900".to_string(),
            public_url: "http://localhost:8900".to_string(),
            structured_logging: false,
            limits: UploadLimits::default(),
            storage: BlobStorageConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, then the optional YAML file, then `IMGDROP_*` variables
    /// (`__` separates nested keys, e.g. `IMGDROP_STORAGE__URL`).
    pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("unable to read config {}: {}", path.display(), e))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_yaml_str(config_str: &str) -> Result<ServerConfig> {
        Self::extract(
            Figment::from(Serialized::defaults(ServerConfig::default()))
                .merge(Yaml::string(config_str)),
        )
    }

    fn extract(figment: Figment) -> Result<ServerConfig> {
        let config: ServerConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        match self.public_url.parse::<Url>() {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(anyhow!("invalid public url: {}", self.public_url)),
        }
        if self.limits.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than 0"));
        }
        if self.limits.max_dimension == 0 {
            return Err(anyhow!("max_dimension must be greater than 0"));
        }
        if self.limits.max_input_pixels == 0 {
            return Err(anyhow!("max_input_pixels must be greater than 0"));
        }
        if self.limits.max_concurrent_transcodes == 0 {
            return Err(anyhow!("max_concurrent_transcodes must be greater than 0"));
        }
        self.storage.validate()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            public_url: self.public_url.clone(),
            max_upload_bytes: self.limits.max_upload_bytes,
            max_concurrent_transcodes: self.limits.max_concurrent_transcodes,
            transcode: TranscodeOptions {
                max_dimension: self.limits.max_dimension,
                max_input_pixels: self.limits.max_input_pixels,
                ..Default::default()
            },
        }
    }

    pub fn instance_id(&self) -> String {
        format!(
            "{}-{}",
            self.env,
            self.listen_addr.replace([':', '.'], "-")
        )
    }
}
