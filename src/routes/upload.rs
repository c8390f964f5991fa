use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart,
        State,
    },
    http::StatusCode,
    Json,
};
use bytes::BytesMut;

use super::RouteState;
use crate::{
    data_model::UploadRequest,
    http_objects::{ApiError, UploadResponse},
    validation::{self, ClientInputError},
};

const FILE_FIELD: &str = "file";

/// Room for boundaries, part headers and any small extra form fields.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub(super) fn body_limit(max_upload_bytes: u64) -> usize {
    usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX)
}

pub async fn upload_image(
    State(state): State<RouteState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart
        .map_err(|rejection| ClientInputError::MalformedUpload(rejection.body_text()))?;
    let request = read_file_field(&mut multipart, state.pipeline.max_upload_bytes()).await?;
    let result = state.pipeline.upload(request).await?;
    Ok(Json(result.into()))
}

/// Pulls the `file` part out of the form, checking presence, then the
/// declared type, then the size. Only the first chunk is read before the
/// type check and the size is enforced while streaming, so bad uploads are
/// refused without buffering them.
async fn read_file_field(
    multipart: &mut Multipart,
    max_bytes: u64,
) -> Result<UploadRequest, ClientInputError> {
    let to_client_error = |err: MultipartError| multipart_error(err, max_bytes);

    while let Some(mut field) = multipart.next_field().await.map_err(to_client_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let original_file_name = field.file_name().map(str::to_string);
        let declared_content_type = field.content_type().unwrap_or_default().to_string();

        let mut next = field.chunk().await.map_err(to_client_error)?;
        if next.as_ref().map_or(true, |chunk| chunk.is_empty()) {
            return Err(ClientInputError::MissingFile);
        }
        validation::check_content_type(&declared_content_type)?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = next {
            validation::check_size((buf.len() + chunk.len()) as u64, max_bytes)?;
            buf.extend_from_slice(&chunk);
            next = field.chunk().await.map_err(to_client_error)?;
        }
        return Ok(UploadRequest {
            declared_size: buf.len() as u64,
            file_bytes: buf.freeze(),
            declared_content_type: Some(declared_content_type),
            original_file_name,
        });
    }
    Err(ClientInputError::MissingFile)
}

fn multipart_error(err: MultipartError, max_bytes: u64) -> ClientInputError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        // the body limit tripped; the real size is unknown
        return ClientInputError::TooLarge {
            size: max_bytes.saturating_add(1),
            max: max_bytes,
        };
    }
    ClientInputError::MalformedUpload(err.body_text())
}
