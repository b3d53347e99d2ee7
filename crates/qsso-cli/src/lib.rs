//! qsso - command-line front end for the SSO session core
//!
//! This crate provides a command-line interface for:
//! - Signing in to Builder ID or an IAM Identity Center start URL
//! - Inspecting connection state and fetching bearer tokens
//! - Restoring a cached session and importing legacy connections
//!
//! Every command spawns the language server, runs against an
//! [`qsso_core::AuthRegistry`] and shuts the server down again.

pub mod cli;
pub mod config;
pub mod output;
pub mod runtime;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use qsso_core::AuthError;
use qsso_proto::v1::AwsErrorCode;

/// Exit codes for CLI operations
///
/// Exit codes provide machine-readable status for scripting:
/// - 0: Success
/// - 1: General error
/// - 2: Authentication failed - the server rejected or could not refresh the token
/// - 3: Cancelled - an interactive sign-in was abandoned
/// - 4: Server unavailable - the language server could not be reached
/// - 5: Invalid input - bad start URL, region or scopes
/// - 6: Not connected - no usable SSO connection
/// - 7: Expired - the connection needs reauthentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthenticationFailed = 2,
    Cancelled = 3,
    ServerUnavailable = 4,
    InvalidInput = 5,
    NotConnected = 6,
    Expired = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::AuthenticationFailed => "AUTH_FAILED",
            ExitCode::Cancelled => "CANCELLED",
            ExitCode::ServerUnavailable => "SERVER_UNAVAILABLE",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::NotConnected => "NOT_CONNECTED",
            ExitCode::Expired => "EXPIRED",
        }
    }

    /// Get a human-readable description of the exit code
    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Operation completed successfully",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::AuthenticationFailed => "The identity server rejected the request",
            ExitCode::Cancelled => "Sign-in was cancelled",
            ExitCode::ServerUnavailable => "Could not reach the language server",
            ExitCode::InvalidInput => "Invalid arguments provided",
            ExitCode::NotConnected => "No SSO connection is established",
            ExitCode::Expired => "The connection has expired and needs reauthentication",
        }
    }

    /// Map a core error onto an exit code
    pub fn from_auth_error(err: &AuthError) -> Self {
        match err {
            AuthError::NoSession | AuthError::NotConnected => ExitCode::NotConnected,
            AuthError::InvalidInput(_) => ExitCode::InvalidInput,
            AuthError::Peer(peer) => match &peer.code {
                Some(AwsErrorCode::Cancelled) => ExitCode::Cancelled,
                Some(AwsErrorCode::CannotRefreshSsoToken) => ExitCode::Expired,
                Some(_) => ExitCode::AuthenticationFailed,
                None => ExitCode::ServerUnavailable,
            },
            AuthError::NotReady => ExitCode::ServerUnavailable,
            _ => ExitCode::GeneralError,
        }
    }
}
