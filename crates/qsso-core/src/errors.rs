//! Error types for qsso core.
//!
//! Two layers: [`PeerError`] is what the identity server (or the transport in
//! front of it) reported, with the structured `awsErrorCode` pulled out when
//! present. [`AuthError`] is what session and registry operations return.

use std::fmt;

use thiserror::Error;

use qsso_crypto::token_envelope::EnvelopeError;
use qsso_proto::v1::AwsErrorCode;
use qsso_proto::ValidationError;

use crate::store::StoreError;

// ============================================================================
// Peer errors
// ============================================================================

/// Failure reported by a [`TokenPeer`](crate::peer::TokenPeer) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct PeerError {
    /// Structured token-domain code, absent for plain transport failures
    pub code: Option<AwsErrorCode>,
    pub message: String,
}

impl PeerError {
    pub fn with_code(code: AwsErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// An error with no token-domain code (disconnects, timeouts, bad replies).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.code, Some(AwsErrorCode::Cancelled))
    }
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

// ============================================================================
// Auth errors
// ============================================================================

/// Errors returned by session and registry operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The peer rejected or failed the call
    #[error("token request failed: {0}")]
    Peer(#[from] PeerError),

    /// A token was asked for while no session exists
    #[error("no active SSO session")]
    NoSession,

    /// Re-authentication needs a prior connection
    #[error("cannot reauthenticate: not connected")]
    NotConnected,

    /// The registry has not been constructed yet
    #[error("auth registry is not ready")]
    NotReady,

    /// Operation not available for this kind of session
    #[error("unsupported for this session: {0}")]
    Unsupported(&'static str),

    #[error("invalid login input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("failed to decrypt access token: {0}")]
    Decrypt(#[from] EnvelopeError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("legacy migration failed: {0}")]
    Migration(String),
}

impl AuthError {
    /// The structured peer code behind this error, if any.
    pub fn aws_error_code(&self) -> Option<&AwsErrorCode> {
        match self {
            AuthError::Peer(e) => e.code.as_ref(),
            _ => None,
        }
    }
}
