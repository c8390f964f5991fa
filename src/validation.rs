use crate::data_model::ImageFormat;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientInputError {
    #[error("No file provided")]
    MissingFile,

    #[error("Invalid file type. Only JPG, PNG, GIF, and WebP are allowed.")]
    UnsupportedType(String),

    #[error("File too large. Maximum size is {}.", human_size(*max))]
    TooLarge { size: u64, max: u64 },

    #[error("Image ID is required")]
    EmptyKey,

    #[error("Invalid upload: {0}")]
    MalformedUpload(String),
}

fn human_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Checks a declared upload before any decoding happens: presence, then
/// type, then size.
pub fn validate(
    declared_type: Option<&str>,
    declared_size: u64,
    max_bytes: u64,
) -> Result<ImageFormat, ClientInputError> {
    let declared_type = declared_type.ok_or(ClientInputError::MissingFile)?;
    let format = check_content_type(declared_type)?;
    check_size(declared_size, max_bytes)?;
    Ok(format)
}

pub fn check_content_type(declared_type: &str) -> Result<ImageFormat, ClientInputError> {
    ImageFormat::from_mime(declared_type)
        .ok_or_else(|| ClientInputError::UnsupportedType(declared_type.to_string()))
}

pub fn check_size(size: u64, max_bytes: u64) -> Result<(), ClientInputError> {
    if size > max_bytes {
        return Err(ClientInputError::TooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_allowed_types() {
        for declared in ["image/jpeg", "image/jpg", "image/png", "image/gif", "image/webp"] {
            assert!(validate(Some(declared), 1024, MAX_UPLOAD_BYTES).is_ok(), "{declared}");
        }
        assert_eq!(
            validate(Some("Image/JPG"), 1, MAX_UPLOAD_BYTES),
            Ok(ImageFormat::Jpeg)
        );
    }

    #[test]
    fn test_rejects_other_types() {
        for declared in [
            "text/plain",
            "image/svg+xml",
            "image/bmp",
            "image/tiff",
            "application/octet-stream",
            "",
        ] {
            assert_eq!(
                validate(Some(declared), 10, MAX_UPLOAD_BYTES),
                Err(ClientInputError::UnsupportedType(declared.to_string()))
            );
        }
    }

    #[test]
    fn test_size_ceiling_is_inclusive() {
        assert!(validate(Some("image/png"), MAX_UPLOAD_BYTES, MAX_UPLOAD_BYTES).is_ok());
        assert_eq!(
            validate(Some("image/png"), MAX_UPLOAD_BYTES + 1, MAX_UPLOAD_BYTES),
            Err(ClientInputError::TooLarge {
                size: MAX_UPLOAD_BYTES + 1,
                max: MAX_UPLOAD_BYTES
            })
        );
    }

    #[test]
    fn test_check_order() {
        assert_eq!(
            validate(None, u64::MAX, MAX_UPLOAD_BYTES),
            Err(ClientInputError::MissingFile)
        );
        // an oversize file of the wrong type reports the type first
        assert!(matches!(
            validate(Some("text/plain"), u64::MAX, MAX_UPLOAD_BYTES),
            Err(ClientInputError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ClientInputError::TooLarge {
                size: 11 * 1024 * 1024,
                max: MAX_UPLOAD_BYTES
            }
            .to_string(),
            "File too large. Maximum size is 10MB."
        );
        assert_eq!(
            ClientInputError::TooLarge { size: 20, max: 10 }.to_string(),
            "File too large. Maximum size is 10 bytes."
        );
        assert_eq!(ClientInputError::MissingFile.to_string(), "No file provided");
    }
}
