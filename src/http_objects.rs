use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{data_model::UploadResult, pipeline::ImageError, validation::ClientInputError};

pub const UPLOAD_FAILED: &str = "Failed to upload image. Please try again.";
pub const IMAGE_NOT_FOUND: &str = "Image not found";

/// Every error response body: `{"error": "<message>"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    #[serde(rename = "error")]
    message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_error_str(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        debug!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, Json(self)).into_response()
    }
}

impl From<ClientInputError> for ApiError {
    fn from(err: ClientInputError) -> Self {
        Self::bad_request(&err.to_string())
    }
}

impl From<ImageError> for ApiError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::ClientInput(err) => err.into(),
            ImageError::NotFound { .. } => Self::not_found(IMAGE_NOT_FOUND),
            // details were logged by the pipeline
            ImageError::Decode(_) | ImageError::Store(_) => Self::internal_error_str(UPLOAD_FAILED),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub key: String,
    pub original_size: u64,
    pub optimized_size: u64,
}

impl From<UploadResult> for UploadResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            success: true,
            url: result.url,
            key: result.key.to_string(),
            original_size: result.original_size,
            optimized_size: result.optimized_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use blob_store::StoreError;

    use super::*;
    use crate::transcode::DecodeError;

    #[test]
    fn test_error_mapping() {
        let err: ApiError = ImageError::ClientInput(ClientInputError::UnsupportedType(
            "text/plain".to_string(),
        ))
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.message(),
            "Invalid file type. Only JPG, PNG, GIF, and WebP are allowed."
        );

        let err: ApiError = ImageError::ClientInput(ClientInputError::EmptyKey).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Image ID is required");

        let err: ApiError = ImageError::NotFound {
            key: "x".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), IMAGE_NOT_FOUND);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err: ApiError = ImageError::Store(StoreError::NotFound {
            key: "secret-bucket-layout".to_string(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), UPLOAD_FAILED);

        let err: ApiError = ImageError::Decode(DecodeError::Worker("panicked".to_string())).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), UPLOAD_FAILED);
    }

    #[test]
    fn test_serialized_shapes() {
        let body = serde_json::to_value(ApiError::not_found(IMAGE_NOT_FOUND)).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Image not found" }));

        let response = UploadResponse {
            success: true,
            url: "https://img.example.com/abc.png".to_string(),
            key: "abc.png".to_string(),
            original_size: 10,
            optimized_size: 5,
        };
        assert_eq!(
            serde_json::to_value(response).unwrap(),
            serde_json::json!({
                "success": true,
                "url": "https://img.example.com/abc.png",
                "key": "abc.png",
                "originalSize": 10,
                "optimizedSize": 5,
            })
        );
    }
}
