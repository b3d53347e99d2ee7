//! JSON-RPC connection over a framed byte stream.
//!
//! One reader task decodes inbound frames and routes them: responses go to
//! the waiting request by id, notifications fan out to per-method broadcast
//! subscribers, and peer-initiated requests are answered through the
//! installed [`RequestHandler`]. One writer task serializes outbound frames.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::framing::{read_message, HeaderCodec};
use crate::message::{
    Message, Notification, Request, RequestId, Response, RpcError, JSONRPC_VERSION,
    METHOD_CANCEL_REQUEST,
};

const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// Answers requests initiated by the remote side.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError>;
}

/// Default handler: acknowledges capability registration, rejects the rest.
pub struct DefaultRequestHandler;

#[async_trait]
impl RequestHandler for DefaultRequestHandler {
    async fn handle_request(&self, method: &str, _params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "client/registerCapability" | "client/unregisterCapability" => Ok(Value::Null),
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

/// Connection tuning
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Per-request deadline; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// Buffered notifications per method before slow subscribers lag
    pub notification_capacity: usize,
    pub codec: HeaderCodec,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            codec: HeaderCodec::default(),
        }
    }
}

impl ConnectionOptions {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

struct Shared {
    next_id: AtomicI64,
    pending: DashMap<i64, oneshot::Sender<Result<Value, RpcError>>>,
    subscribers: DashMap<String, broadcast::Sender<Value>>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    handler: RwLock<Arc<dyn RequestHandler>>,
    connected: AtomicBool,
    codec: HeaderCodec,
    notification_capacity: usize,
}

impl Shared {
    fn send<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let body = serde_json::to_vec(message)?;
        let frame = self.codec.encode(&body)?;
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }

    fn subscriber(&self, method: &str) -> broadcast::Sender<Value> {
        self.subscribers
            .entry(method.to_string())
            .or_insert_with(|| broadcast::channel(self.notification_capacity).0)
            .clone()
    }

    fn dispatch(self: &Arc<Self>, body: &[u8]) {
        let message = match Message::parse(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable message");
                return;
            }
        };

        match message {
            Message::Response(response) => {
                let id = match &response.id {
                    Some(RequestId::Number(n)) => *n,
                    other => {
                        warn!(id = ?other, "response for an id this side never issued");
                        return;
                    }
                };
                match self.pending.remove(&id) {
                    Some((_, waiter)) => {
                        // Receiver gone means the caller already gave up.
                        let _ = waiter.send(response.into_result());
                    }
                    None => debug!(id, "late response for abandoned request"),
                }
            }
            Message::Notification(notification) => {
                trace!(method = %notification.method, "notification received");
                if let Some(sender) = self.subscribers.get(&notification.method) {
                    let _ = sender.send(notification.params.unwrap_or(Value::Null));
                } else {
                    debug!(method = %notification.method, "no subscriber for notification");
                }
            }
            Message::Request(request) => {
                let shared = Arc::clone(self);
                let handler = self.handler.read().clone();
                tokio::spawn(async move {
                    let response = match handler.handle_request(&request.method, request.params).await {
                        Ok(result) => Response::ok(request.id, result),
                        Err(error) => Response::err(Some(request.id), error),
                    };
                    if let Err(e) = shared.send(&response) {
                        debug!(error = %e, "could not answer peer request");
                    }
                });
            }
        }
    }

    fn shutdown(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("connection closed");
        }
        // Dropping the senders wakes every waiter with Disconnected and
        // closes every notification stream.
        self.pending.clear();
        self.subscribers.clear();
    }
}

struct Tasks(Mutex<Vec<JoinHandle<()>>>);

impl Drop for Tasks {
    fn drop(&mut self) {
        for task in self.0.lock().drain(..) {
            task.abort();
        }
    }
}

/// A running JSON-RPC connection. Cheap to clone; the I/O tasks stop when
/// the last clone is dropped or [`RpcConnection::close`] is called.
#[derive(Clone)]
pub struct RpcConnection {
    shared: Arc<Shared>,
    tasks: Arc<Tasks>,
    request_timeout: Option<Duration>,
}

impl RpcConnection {
    /// Start reader and writer tasks on the current runtime.
    pub fn start<R, W>(reader: R, writer: W, options: ConnectionOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            next_id: AtomicI64::new(1),
            pending: DashMap::new(),
            subscribers: DashMap::new(),
            outgoing,
            handler: RwLock::new(Arc::new(DefaultRequestHandler)),
            connected: AtomicBool::new(true),
            codec: options.codec.clone(),
            notification_capacity: options.notification_capacity,
        });

        let reader_task = tokio::spawn(read_loop(Arc::clone(&shared), reader));
        let writer_task = tokio::spawn(write_loop(Arc::clone(&shared), writer, outgoing_rx));

        Self {
            shared,
            tasks: Arc::new(Tasks(Mutex::new(vec![reader_task, writer_task]))),
            request_timeout: options.request_timeout,
        }
    }

    /// Replace the handler for peer-initiated requests.
    pub fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.shared.handler.write() = handler;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response.
    ///
    /// When `cancel` fires first, a `$/cancelRequest` is sent and the call
    /// returns [`TransportError::Cancelled`] without waiting for the peer.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, TransportError> {
        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(TransportError::Cancelled);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        let request = Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params: Some(params),
        };
        if let Err(e) = self.shared.send(&request) {
            self.shared.pending.remove(&id);
            return Err(e);
        }
        debug!(id, method, "request sent");

        enum Outcome {
            Reply(Result<Result<Value, RpcError>, oneshot::error::RecvError>),
            Cancelled,
            TimedOut,
        }

        let outcome = tokio::select! {
            reply = rx => Outcome::Reply(reply),
            _ = wait_cancelled(cancel) => Outcome::Cancelled,
            _ = wait_deadline(self.request_timeout) => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Reply(Ok(Ok(value))) => Ok(value),
            Outcome::Reply(Ok(Err(error))) => {
                debug!(id, method, code = error.code, "request failed");
                Err(TransportError::Remote(error))
            }
            Outcome::Reply(Err(_)) => Err(TransportError::Disconnected),
            Outcome::Cancelled => {
                self.abandon(id);
                debug!(id, method, "request cancelled");
                Err(TransportError::Cancelled)
            }
            Outcome::TimedOut => {
                self.abandon(id);
                warn!(id, method, "request timed out");
                Err(TransportError::Timeout)
            }
        }
    }

    /// Typed wrapper over [`RpcConnection::request`].
    pub async fn call<P, T>(
        &self,
        method: &str,
        params: &P,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, TransportError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let value = self.request(method, params, cancel).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification. Nothing is awaited from the peer.
    pub fn notify<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<(), TransportError> {
        let notification = Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        };
        self.shared.send(&notification)
    }

    /// Subscribe to notifications named `method`. The stream closes when the
    /// connection does.
    pub fn subscribe(&self, method: &str) -> broadcast::Receiver<Value> {
        self.shared.subscriber(method).subscribe()
    }

    /// `initialize` request followed by the `initialized` notification.
    pub async fn initialize(&self, params: Value) -> Result<Value, TransportError> {
        let result = self.request("initialize", params, None).await?;
        self.notify("initialized", &json!({}))?;
        Ok(result)
    }

    /// Stop both I/O tasks and fail outstanding requests.
    pub fn close(&self) {
        self.shared.shutdown();
        for task in self.tasks.0.lock().drain(..) {
            task.abort();
        }
    }

    fn abandon(&self, id: i64) {
        self.shared.pending.remove(&id);
        if let Err(e) = self
            .shared
            .send(&Notification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: METHOD_CANCEL_REQUEST.to_string(),
                params: Some(json!({ "id": id })),
            })
        {
            debug!(id, error = %e, "could not send cancellation");
        }
    }
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        match read_message(&mut reader, &mut buf, &shared.codec).await {
            Ok(Some(body)) => shared.dispatch(&body),
            Ok(None) => {
                debug!("peer closed the stream");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        }
    }
    shared.shutdown();
}

async fn write_loop<W>(shared: Arc<Shared>, mut writer: W, mut frames: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "write failed");
            break;
        }
    }
    shared.shutdown();
}
