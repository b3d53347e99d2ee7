//! JSON-RPC transport to the identity language server.
//!
//! This crate has no knowledge of SSO semantics: it frames messages,
//! correlates requests with responses, propagates cancellation and fans
//! out notifications. The process module runs the server as a child.

pub mod error;
pub mod framing;
pub mod message;
pub mod connection;
pub mod process;
pub mod testing;

pub use error::*;
pub use framing::*;
pub use message::*;
pub use connection::*;
pub use process::*;
