//! Error types for the sync runtime.

use settle_engine::RecordId;

/// Failure reported by the remote document store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Document not found")]
    NotFound,

    #[error("Transient gateway error (status {status})")]
    TransientGateway { status: u16 },

    #[error("Session expired")]
    AuthExpired,

    #[error("Rejected by remote store (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Subscription closed")]
    Closed,
}

impl RemoteError {
    /// Classify an HTTP-like status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            404 => RemoteError::NotFound,
            401 | 419 => RemoteError::AuthExpired,
            502..=504 => RemoteError::TransientGateway { status },
            _ => RemoteError::Rejected {
                status,
                message: message.into(),
            },
        }
    }

    /// Status code carried by (or implied by) the error.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::NotFound => Some(404),
            RemoteError::AuthExpired => Some(401),
            RemoteError::TransientGateway { status } | RemoteError::Rejected { status, .. } => {
                Some(*status)
            }
            RemoteError::Network(_) | RemoteError::Closed => None,
        }
    }
}

/// Error returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Engine error: {0}")]
    Engine(#[from] settle_engine::Error),

    #[error("Unknown record: {0}")]
    UnknownRecord(RecordId),

    #[error("Record {0} has not been acknowledged by the server yet")]
    TemporaryRecord(RecordId),
}

impl SyncError {
    /// Map a local view rejection onto the caller-facing variants.
    pub(crate) fn local(error: settle_engine::Error) -> Self {
        match error {
            settle_engine::Error::RecordNotFound(id) => SyncError::UnknownRecord(id),
            settle_engine::Error::TemporaryRecord(id) => SyncError::TemporaryRecord(id),
            other => SyncError::Engine(other),
        }
    }

    /// The remote failure behind this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SyncError>;
