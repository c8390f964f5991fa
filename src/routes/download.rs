use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};

use super::RouteState;
use crate::http_objects::ApiError;

/// Stored keys never change content, so responses may be cached forever.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

pub async fn download_image(
    Path(id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response<Body>, ApiError> {
    let object = state.pipeline.retrieve(&id).await?;

    Response::builder()
        .header(header::CONTENT_TYPE, object.content_type)
        .header(header::CONTENT_LENGTH, object.data.len())
        .header(header::CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL)
        .body(Body::from(object.data))
        .map_err(|e| ApiError::internal_error_str(&e.to_string()))
}
