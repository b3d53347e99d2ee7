//! Testing utilities for code built on [`RpcConnection`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::connection::{ConnectionOptions, RequestHandler, RpcConnection};
use crate::message::RpcError;

/// Buffer size of the in-memory pipe between the two ends
const PIPE_CAPACITY: usize = 64 * 1024;

/// Two connections wired back to back over an in-memory pipe.
pub fn connected_pair(options: ConnectionOptions) -> (RpcConnection, RpcConnection) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    (
        RpcConnection::start(a_read, a_write, options.clone()),
        RpcConnection::start(b_read, b_write, options),
    )
}

type HandlerFn = dyn Fn(&str, Option<Value>) -> Result<Value, RpcError> + Send + Sync;

/// Request handler backed by a synchronous closure.
pub struct FnHandler {
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, Option<Value>) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl RequestHandler for FnHandler {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        (self.f)(method, params)
    }
}

/// Handler that accepts every request and never answers.
pub struct NeverReply {
    seen: Arc<Notify>,
}

impl NeverReply {
    /// The returned `Notify` is signalled each time a request arrives.
    pub fn new() -> (Self, Arc<Notify>) {
        let seen = Arc::new(Notify::new());
        (
            Self {
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

#[async_trait]
impl RequestHandler for NeverReply {
    async fn handle_request(&self, _method: &str, _params: Option<Value>) -> Result<Value, RpcError> {
        self.seen.notify_one();
        std::future::pending().await
    }
}
