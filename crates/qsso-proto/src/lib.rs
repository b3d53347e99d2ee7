//! Wire format for the identity language-server protocol.
//!
//! All messages are JSON-RPC payloads. Top-level fields are camelCase; the
//! profile and SSO-session `settings` objects keep the snake_case keys used
//! by the shared AWS config file.

#![forbid(unsafe_code)]

pub mod v1;
pub mod validation;

pub use validation::ValidationError;
