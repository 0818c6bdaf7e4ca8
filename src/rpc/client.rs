//! Remote client bound to one connection.
//!
//! [`RemoteClient`] turns captured invocations into requests: it allocates
//! the request id, subscribes to the connection's [`InboundHub`], hands the
//! encoded request to the transport through a [`FrameSender`], and returns
//! the call's [`CallStream`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::call::{call_channel, CallStream};
use super::error::RpcError;
use super::proxy::{CallProxy, Dispatch};
use super::router::{route_responses, InboundHub};
use super::wire::Request;

/// Name of the root node of [`RemoteClient::proxy`]. It is not part of the
/// wire method name.
pub const ROOT_NAME: &str = "root";

/// Initial value of the request id counter. The counter is bumped before
/// use, so the first request carries id `"2"`.
const REQUEST_ID_SEED: u64 = 1;

/// One text frame waiting to be written, with its delivery acknowledgement.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded request envelope.
    pub text: String,
    ack: oneshot::Sender<Result<(), String>>,
}

impl OutboundFrame {
    /// Report the outcome of writing this frame back to the caller.
    pub fn ack(self, result: Result<(), String>) {
        // The call may already have been dropped; nothing to report to.
        let _ = self.ack.send(result);
    }
}

/// Send primitive of a connection.
///
/// The transport owns the receiving end and acknowledges every frame once
/// it has been written (or failed to be).
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `text` and wait until the transport has written it.
    pub async fn send(&self, text: String) -> Result<(), RpcError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(OutboundFrame { text, ack })
            .map_err(|_| RpcError::SendFailed("transport writer is gone".to_string()))?;

        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(RpcError::SendFailed(reason)),
            Err(_) => Err(RpcError::SendFailed("frame dropped before it was written".to_string())),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct ClientInner {
    /// Last request id handed out on this connection.
    next_id: AtomicU64,
    /// Write side of the connection.
    sender: FrameSender,
    /// Responses decoded from the connection, by request id.
    inbound: InboundHub,
}

/// RPC client for one live connection.
///
/// Cheap to clone; clones share the request id counter. A new connection
/// always gets a new `RemoteClient`, so ids restart per connection.
///
/// # Example
///
/// ```ignore
/// let items = client.invoke("automations.list", None).collect().await?;
/// let reply: User = client.proxy().path("users.get").call(vec![json!({"id": 1})]).reply().await?;
/// ```
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .field("inbound", &self.inner.inbound)
            .finish()
    }
}

impl RemoteClient {
    pub fn new(sender: FrameSender, inbound: InboundHub) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                next_id: AtomicU64::new(REQUEST_ID_SEED),
                sender,
                inbound,
            }),
        }
    }

    /// A fresh capture tree whose invocations dispatch through this client.
    pub fn proxy(&self) -> CallProxy<RemoteClient> {
        CallProxy::root(ROOT_NAME, self.clone())
    }

    /// The inbound hub this client routes from.
    pub fn inbound(&self) -> &InboundHub {
        &self.inner.inbound
    }

    /// Send a request for `method` and return its result sequence.
    ///
    /// Must be called from within a Tokio runtime: the send and the
    /// response routing run on a spawned task.
    pub fn invoke(&self, method: &str, args: Option<Vec<Value>>) -> CallStream {
        let request = Request::new(self.next_id().to_string(), method, args);
        let (sink, call) = call_channel(request.request_id.clone());

        // Subscribe before sending so no response can slip past.
        let subscription = self.inner.inbound.subscribe(&request.request_id);
        let sender = self.inner.sender.clone();

        tokio::spawn(async move {
            if subscription.hub_ended() {
                // The connection is gone; the call takes its end as is.
                debug!("Request {} not sent, connection already ended", request.request_id);
                route_responses(subscription, &sink).await;
                return;
            }

            let payload = match request.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    sink.fail(RpcError::Encode(e.to_string()));
                    return;
                }
            };

            debug!("Sending request {} ({})", request.request_id, request.method);
            if let Err(e) = sender.send(payload).await {
                debug!("Request {} failed to send: {}", request.request_id, e);
                sink.fail(e);
                return;
            }

            route_responses(subscription, &sink).await;
        });

        call
    }

    /// Generate the next request ID.
    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Dispatch for RemoteClient {
    type Output = CallStream;

    fn dispatch(&self, chain: Vec<String>, args: Option<Vec<Value>>) -> CallStream {
        // The first name is the proxy root.
        let method = chain.get(1..).unwrap_or_default().join(".");
        self.invoke(&method, args)
    }
}
