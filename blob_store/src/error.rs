use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("object already exists: {key}")]
    AlreadyExists { key: String },

    #[error("invalid object key: {key:?}")]
    InvalidKey { key: String },

    #[error("object store call for {key} timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    #[error("object store failure for {key}. error: {source}")]
    Backend {
        key: String,
        source: object_store::Error,
    },
}

impl StoreError {
    pub(crate) fn from_object_store(key: &str, source: object_store::Error) -> Self {
        let key = key.to_string();
        match source {
            object_store::Error::NotFound { .. } => StoreError::NotFound { key },
            object_store::Error::AlreadyExists { .. } => StoreError::AlreadyExists { key },
            object_store::Error::InvalidPath { .. } => StoreError::InvalidKey { key },
            source => StoreError::Backend { key, source },
        }
    }

    /// Identifies failures a second attempt may cure.
    ///
    /// Timeouts and generic transport failures qualify. Missing or
    /// conflicting objects, bad keys and auth or configuration
    /// problems do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Backend { source, .. } => matches!(
                source,
                object_store::Error::Generic { .. } | object_store::Error::JoinError { .. }
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
