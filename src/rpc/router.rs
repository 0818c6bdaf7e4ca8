//! Inbound response registry and per-call routing.
//!
//! One connection publishes every decoded [`Response`] on an [`InboundHub`].
//! Each in-flight call registers an unbounded queue under its request id
//! before its request is sent, so a slow reader delays its own frames but
//! never loses them. Frames for ids nobody registered are unrelated traffic
//! and are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::call::CallSink;
use super::error::RpcError;
use super::wire::{error_message, Response, ResponseKind};

/// How the inbound side of a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Orderly close: in-flight calls complete without a value.
    Closed,
    /// Transport failure: in-flight calls fail.
    Failed(String),
}

/// One item delivered to a registered call.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Frame(Response),
    End(StreamEnd),
}

#[derive(Debug, Default)]
struct Routes {
    /// Queue of every call still waiting for frames, by request id.
    calls: HashMap<String, mpsc::UnboundedSender<InboundEvent>>,
    /// Set once; later frames and registrations see it immediately.
    end: Option<StreamEnd>,
}

/// Demultiplexer for decoded responses of one connection.
#[derive(Debug, Clone, Default)]
pub struct InboundHub {
    routes: Arc<Mutex<Routes>>,
}

impl InboundHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        // Routes hold no invariant a panic could break.
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a decoded response to the call registered under its id.
    ///
    /// Frames published after the hub ended are discarded.
    pub fn publish(&self, response: Response) {
        let routes = self.routes();
        if routes.end.is_some() {
            return;
        }
        match routes.calls.get(&response.request_id) {
            Some(queue) => {
                // A closed queue means the call already finished.
                let _ = queue.send(InboundEvent::Frame(response));
            }
            None => trace!("No call waiting for request {}", response.request_id),
        }
    }

    /// End the stream for every registered call. Only the first call has
    /// any effect.
    pub fn finish(&self, end: StreamEnd) {
        let mut routes = self.routes();
        if routes.end.is_some() {
            return;
        }
        for (_, queue) in routes.calls.drain() {
            let _ = queue.send(InboundEvent::End(end.clone()));
        }
        routes.end = Some(end);
    }

    pub fn close(&self) {
        self.finish(StreamEnd::Closed);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.finish(StreamEnd::Failed(reason.into()));
    }

    /// The terminal state, if the stream has ended.
    pub fn end_state(&self) -> Option<StreamEnd> {
        self.routes().end.clone()
    }

    /// Number of calls still registered for frames.
    pub fn pending_calls(&self) -> usize {
        self.routes().calls.len()
    }

    /// Register `request_id` and start queueing its frames.
    ///
    /// On a hub that already ended, the subscription yields the end at once.
    pub(crate) fn subscribe(&self, request_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes();
        let ended = match &routes.end {
            Some(end) => {
                let _ = tx.send(InboundEvent::End(end.clone()));
                true
            }
            None => {
                routes.calls.insert(request_id.to_string(), tx);
                false
            }
        };
        Subscription {
            request_id: request_id.to_string(),
            rx,
            hub: self.clone(),
            ended,
        }
    }
}

/// A call's registration on the hub. Dropping it unregisters the call.
pub(crate) struct Subscription {
    request_id: String,
    rx: mpsc::UnboundedReceiver<InboundEvent>,
    hub: InboundHub,
    ended: bool,
}

impl Subscription {
    /// Whether the hub had already ended when this call registered.
    pub(crate) fn hub_ended(&self) -> bool {
        self.ended
    }

    async fn recv(&mut self) -> InboundEvent {
        // The hub only drops a queue after sending its end.
        self.rx.recv().await.unwrap_or(InboundEvent::End(StreamEnd::Closed))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.routes().calls.remove(&self.request_id);
    }
}

/// Feed every frame of the subscribed call into `sink` until the call ends.
pub(crate) async fn route_responses(mut subscription: Subscription, sink: &CallSink) {
    while !sink.is_finished() {
        match subscription.recv().await {
            InboundEvent::Frame(response) => {
                debug!("Got {} for request {}", response.kind.as_str(), response.request_id);
                apply_response(response, sink);
            }
            InboundEvent::End(StreamEnd::Closed) => {
                debug!("Connection closed with request {} in flight", subscription.request_id);
                sink.complete();
            }
            InboundEvent::End(StreamEnd::Failed(reason)) => {
                debug!(
                    "Connection failed with request {} in flight: {}",
                    subscription.request_id, reason
                );
                sink.fail(RpcError::ConnectionLost(reason));
            }
        }
    }
}

/// Apply one matching response to a call.
pub(crate) fn apply_response(response: Response, sink: &CallSink) {
    match response.kind {
        ResponseKind::Item => {
            sink.emit(response.object);
        }
        ResponseKind::Reply => {
            sink.emit(response.object);
            sink.complete();
        }
        ResponseKind::End => {
            sink.complete();
        }
        ResponseKind::Error => {
            sink.fail(RpcError::Remote(error_message(&response.object)));
        }
        ResponseKind::Unknown(tag) => {
            sink.fail(RpcError::InvalidResponse(tag));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::call::{call_channel, CallStream};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn frame(id: &str, kind: ResponseKind, object: Value) -> Response {
        Response::new(id, kind, object)
    }

    /// Spawn a router for `id` the same way the client does.
    fn route(hub: &InboundHub, id: &str) -> CallStream {
        let (sink, call) = call_channel(id);
        let subscription = hub.subscribe(id);
        tokio::spawn(async move { route_responses(subscription, &sink).await });
        call
    }

    async fn collect(call: CallStream) -> Result<Vec<Value>, RpcError> {
        tokio::time::timeout(TEST_TIMEOUT, call.collect())
            .await
            .expect("Test timed out")
    }

    #[tokio::test]
    async fn test_items_then_end() {
        let hub = InboundHub::new();
        let call = route(&hub, "2");

        hub.publish(frame("2", ResponseKind::Item, json!("a")));
        hub.publish(frame("2", ResponseKind::Item, json!("b")));
        hub.publish(frame("2", ResponseKind::End, Value::Null));

        assert_eq!(collect(call).await, Ok(vec![json!("a"), json!("b")]));
    }

    #[tokio::test]
    async fn test_reply_yields_single_value() {
        let hub = InboundHub::new();
        let call = route(&hub, "2");

        hub.publish(frame("2", ResponseKind::Reply, json!({"id": 1, "name": "x"})));
        hub.publish(frame("2", ResponseKind::Item, json!("ignored after reply")));

        assert_eq!(collect(call).await, Ok(vec![json!({"id": 1, "name": "x"})]));
    }

    #[tokio::test]
    async fn test_error_messages() {
        for (object, expected) in [
            (json!({"message": "boom"}), "boom"),
            (json!("boom"), "boom"),
            (Value::Null, "(none)"),
        ] {
            let hub = InboundHub::new();
            let call = route(&hub, "3");
            hub.publish(frame("3", ResponseKind::Error, object));

            assert_eq!(collect(call).await, Err(RpcError::Remote(expected.to_string())));
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_is_invalid() {
        let hub = InboundHub::new();
        let call = route(&hub, "3");
        hub.publish(frame("3", ResponseKind::Unknown("progress".into()), json!(1)));

        assert_eq!(collect(call).await, Err(RpcError::InvalidResponse("progress".into())));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_isolated() {
        let hub = InboundHub::new();
        let first = route(&hub, "2");
        let second = route(&hub, "3");

        hub.publish(frame("3", ResponseKind::Item, json!("three-a")));
        hub.publish(frame("2", ResponseKind::Item, json!("two-a")));
        hub.publish(frame("99", ResponseKind::Error, json!("unrelated")));
        hub.publish(frame("3", ResponseKind::Error, json!({"message": "three failed"})));
        hub.publish(frame("2", ResponseKind::Reply, json!("two-b")));

        assert_eq!(collect(first).await, Ok(vec![json!("two-a"), json!("two-b")]));
        assert_eq!(collect(second).await, Err(RpcError::Remote("three failed".into())));
    }

    #[tokio::test]
    async fn test_close_completes_in_flight_call() {
        let hub = InboundHub::new();
        let call = route(&hub, "2");

        hub.publish(frame("2", ResponseKind::Item, json!(1)));
        hub.close();

        assert_eq!(collect(call).await, Ok(vec![json!(1)]));
    }

    #[tokio::test]
    async fn test_failure_fails_in_flight_call() {
        let hub = InboundHub::new();
        let call = route(&hub, "2");

        hub.fail("reset by peer");

        assert_eq!(collect(call).await, Err(RpcError::ConnectionLost("reset by peer".into())));
    }

    #[tokio::test]
    async fn test_subscribing_after_end_sees_end() {
        let hub = InboundHub::new();
        hub.close();
        hub.fail("ignored, already closed");
        assert_eq!(hub.end_state(), Some(StreamEnd::Closed));

        let call = route(&hub, "2");
        assert_eq!(collect(call).await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let hub = InboundHub::new();
        assert_eq!(hub.pending_calls(), 0);
        hub.publish(frame("1", ResponseKind::Item, json!(1)));
    }

    #[tokio::test]
    async fn test_backlog_is_delivered_in_full() {
        let hub = InboundHub::new();
        let (sink, call) = call_channel("2");
        let subscription = hub.subscribe("2");

        // Everything arrives before the router runs at all.
        for n in 0..5000 {
            hub.publish(frame("2", ResponseKind::Item, json!(n)));
        }
        hub.publish(frame("2", ResponseKind::End, Value::Null));
        tokio::spawn(async move { route_responses(subscription, &sink).await });

        let expected: Vec<Value> = (0..5000).map(|n| json!(n)).collect();
        assert_eq!(collect(call).await, Ok(expected));
    }

    #[tokio::test]
    async fn test_finished_call_is_unregistered() {
        let hub = InboundHub::new();
        let call = route(&hub, "2");
        assert_eq!(hub.pending_calls(), 1);

        hub.publish(frame("2", ResponseKind::Reply, json!("done")));
        assert_eq!(collect(call).await, Ok(vec![json!("done")]));

        tokio::time::timeout(TEST_TIMEOUT, async {
            while hub.pending_calls() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("Test timed out");
    }
}
