//! Registry error types

use super::key::StreamKey;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No source under this key
    StreamNotFound(StreamKey),
    /// A live source already exists under this key
    StreamAlreadyPublishing(StreamKey),
    /// The source exists but has been closed
    StreamClosed(StreamKey),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::StreamNotFound(key) => write!(f, "Stream not found: {}", key),
            RegistryError::StreamAlreadyPublishing(key) => {
                write!(f, "Stream already has a publisher: {}", key)
            }
            RegistryError::StreamClosed(key) => write!(f, "Stream closed: {}", key),
        }
    }
}

impl std::error::Error for RegistryError {}
