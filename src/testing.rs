use std::{io::Cursor, sync::Arc};

use axum::Router;
use blob_store::{BlobStorage, BlobStorageConfig};
use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    config::ServerConfig,
    data_model::{ImageFormat, UploadRequest},
    pipeline::{ImagePipeline, PipelineConfig},
    routes::{create_routes, RouteState},
};

pub const BOUNDARY: &str = "imgdrop-test-boundary";

pub struct TestService {
    pub config: ServerConfig,
    pub blob_storage: Arc<BlobStorage>,
    pub router: Router,
}

impl TestService {
    pub fn new() -> Self {
        Self::with_config(ServerConfig {
            storage: BlobStorageConfig::in_memory(),
            ..Default::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let blob_storage = Arc::new(BlobStorage::new(&config.storage).unwrap());
        let pipeline = Arc::new(ImagePipeline::new(
            blob_storage.clone(),
            config.pipeline_config(),
        ));
        let router = create_routes(RouteState { pipeline }, &config);
        Self {
            config,
            blob_storage,
            router,
        }
    }

    /// Number of objects currently in the backing store.
    pub async fn object_count(&self) -> usize {
        use futures::TryStreamExt;

        self.blob_storage
            .get_object_store()
            .list(None)
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .len()
    }
}

pub fn memory_pipeline() -> ImagePipeline {
    let storage = BlobStorage::new(&BlobStorageConfig::in_memory()).unwrap();
    ImagePipeline::new(Arc::new(storage), PipelineConfig::default())
}

pub fn upload_request(bytes: Bytes, content_type: &str, file_name: &str) -> UploadRequest {
    UploadRequest {
        declared_size: bytes.len() as u64,
        file_bytes: bytes,
        declared_content_type: Some(content_type.to_string()),
        original_file_name: Some(file_name.to_string()),
    }
}

/// A smooth RGB gradient; compresses well and decodes deterministically.
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    DynamicImage::ImageRgb8(image)
}

pub fn encode_fixture(image: &DynamicImage, format: ImageFormat) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    match format {
        // the gif encoder wants rgba
        ImageFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut buf, image::ImageFormat::Gif)
            .unwrap(),
        format => image.write_to(&mut buf, format.into()).unwrap(),
    }
    Bytes::from(buf.into_inner())
}

/// Builds a `multipart/form-data` body with one file part.
pub fn multipart_body(
    field: &str,
    file_name: &str,
    content_type: Option<&str>,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    if let Some(content_type) = content_type {
        body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    }
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}
