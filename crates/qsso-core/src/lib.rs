//! qsso core - SSO session state and token plumbing.
//!
//! This crate implements:
//! - The SSO connection session state machine and its token-fetch protocol
//! - The auth registry that feature code talks to
//! - The bridge from server token-change notifications to session state
//! - Import of the legacy multi-connection store
//! - Persistent key/value state
//!
//! The identity server is reached through the [`peer::TokenPeer`] trait; the
//! `rpc` feature provides the JSON-RPC implementation.

#![forbid(unsafe_code)]

// State machines
pub mod session;
pub mod registry;
pub mod notifications;

// Infrastructure
pub mod peer;
pub mod events;
pub mod store;
pub mod migration;

// Supporting modules
pub mod errors;
pub mod types;
pub mod harness;

#[cfg(feature = "rpc")]
pub mod rpc_peer;

pub use errors::{AuthError, PeerError};
pub use registry::{AuthRegistry, Dependents, NoopDependents, RegistryCell, RegistryConfig, VisibilityFlags};
pub use session::{RestoreOutcome, SsoSession, SsoSessionConfig, TokenBundle};
pub use types::{AuthState, Connection, ConnectionKind, ConnectionStateEvent, SsoConnection};
