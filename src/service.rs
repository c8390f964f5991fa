use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::BlobStorage;
use tokio::signal;
use tracing::info;

use crate::{
    config::ServerConfig,
    pipeline::ImagePipeline,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub pipeline: Arc<ImagePipeline>,
}

impl Service {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let blob_storage =
            BlobStorage::new(&config.storage).context("error initializing BlobStorage")?;
        let pipeline = Arc::new(ImagePipeline::new(
            Arc::new(blob_storage),
            config.pipeline_config(),
        ));
        Ok(Self { config, pipeline })
    }

    pub async fn start(&self) -> Result<()> {
        let route_state = RouteState {
            pipeline: self.pipeline.clone(),
        };

        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(route_state, &self.config);
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
    info!("signal received, shutting down server gracefully");
}

#[cfg(test)]
mod tests {
    use blob_store::BlobStorageConfig;

    use super::*;
    use crate::data_model::StoredObjectKey;

    #[test]
    fn test_new_builds_pipeline_from_config() {
        let service = Service::new(ServerConfig {
            public_url: "https://img.example.com/".to_string(),
            storage: BlobStorageConfig::in_memory(),
            ..Default::default()
        })
        .unwrap();
        let key = StoredObjectKey::parse("abc.png").unwrap();
        assert_eq!(
            service.pipeline.public_url(&key),
            "https://img.example.com/abc.png"
        );
        assert_eq!(service.pipeline.max_upload_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_new_rejects_unusable_storage() {
        let result = Service::new(ServerConfig {
            storage: BlobStorageConfig::new("gopher://nowhere"),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
