use crate::framing::FramingError;
use crate::message::RpcError;

/// Common transport error type
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RpcError),
}

impl TransportError {
    /// The JSON-RPC error returned by the remote side, if that is what failed.
    pub fn remote(&self) -> Option<&RpcError> {
        match self {
            TransportError::Remote(e) => Some(e),
            _ => None,
        }
    }
}
