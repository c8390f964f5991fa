use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 4] = [
        ImageFormat::Jpeg,
        ImageFormat::Png,
        ImageFormat::Gif,
        ImageFormat::Webp,
    ];

    /// Resolves a declared MIME type. Matching ignores case, surrounding
    /// whitespace and parameters such as `; charset=binary`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/gif" => Some(ImageFormat::Gif),
            "image/webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.extensions()[0]
    }

    /// Known file extensions, canonical first.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ImageFormat::Jpeg => &["jpg", "jpeg", "jpe"],
            ImageFormat::Png => &["png"],
            ImageFormat::Gif => &["gif"],
            ImageFormat::Webp => &["webp"],
        }
    }

    /// Formats whose frames must survive untouched.
    pub fn is_animated(&self) -> bool {
        matches!(self, ImageFormat::Gif)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

impl From<ImageFormat> for image::ImageFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

/// One received upload, alive for the duration of the request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_bytes: Bytes,
    pub declared_content_type: Option<String>,
    pub declared_size: u64,
    pub original_file_name: Option<String>,
}

/// Key addressing one stored object: `<10 char id>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredObjectKey(String);

impl StoredObjectKey {
    pub(crate) fn from_parts(id: &str, extension: &str) -> Self {
        Self(format!("{}.{}", id, extension))
    }

    /// Accepts a key presented by a client. Returns `None` for anything
    /// this service could not have issued as a single path segment.
    pub fn parse(key: &str) -> Option<Self> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && key.len() <= 128
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        valid.then(|| Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoredObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub key: StoredObjectKey,
    pub url: String,
    pub original_size: u64,
    pub optimized_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_resolution() {
        assert_eq!(ImageFormat::from_mime("image/jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime("IMAGE/JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(
            ImageFormat::from_mime(" image/png; charset=binary"),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::from_mime("image/webp"), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::from_mime("image/gif"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::from_mime("image/svg+xml"), None);
        assert_eq!(ImageFormat::from_mime("text/plain"), None);
        assert_eq!(ImageFormat::from_mime(""), None);
    }

    #[test]
    fn test_mime_type_round_trips() {
        for format in ImageFormat::ALL {
            assert_eq!(ImageFormat::from_mime(format.mime_type()), Some(format));
        }
    }

    #[test]
    fn test_key_parse() {
        assert!(StoredObjectKey::parse("V1StGXR8_Z.jpg").is_some());
        assert!(StoredObjectKey::parse("nonexistent-key").is_some());
        assert!(StoredObjectKey::parse("").is_none());
        assert!(StoredObjectKey::parse("..").is_none());
        assert!(StoredObjectKey::parse("a/b.png").is_none());
        assert!(StoredObjectKey::parse("a b.png").is_none());
        assert!(StoredObjectKey::parse(&"x".repeat(129)).is_none());
    }
}
