use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{config::ServerConfig, middleware::InstanceRequestSpan, pipeline::ImagePipeline};

pub(crate) mod download;
mod upload;
use download::download_image;
use upload::upload_image;

#[derive(Clone)]
pub struct RouteState {
    pub pipeline: Arc<ImagePipeline>,
}

pub fn create_routes(route_state: RouteState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);
    let body_limit = upload::body_limit(route_state.pipeline.max_upload_bytes());

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route(
            "/upload",
            post(upload_image).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/{id}", get(download_image))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(InstanceRequestSpan::new(&config.env, &config.instance_id()))
                .on_failure(()),
        )
        .layer(cors)
        .with_state(route_state)
}

async fn index() -> String {
    format!(
        "imgdrop server {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_BUILD_TIMESTAMP")
    )
}

async fn healthz() -> &'static str {
    "ok"
}
