//! Binds a transport's lifecycle events to a [`RemoteClient`].

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::rpc::{decode_frame, FrameSender, InboundHub, RemoteClient};

/// Lifecycle events of one duplex connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Text(String),
    Binary(Vec<u8>),
    Error(String),
    Close,
}

/// State of a connection after it has opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
    Failed(String),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnectionState::Open)
    }
}

/// Errors establishing a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport could not be created at all.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The transport reported an error before opening.
    #[error("Transport error: {0}")]
    Failed(String),

    /// The transport closed before it ever opened.
    #[error("Connection closed before it was established")]
    ClosedBeforeOpen,
}

/// One open connection and the client bound to it.
#[derive(Debug)]
pub struct ConnectionHandle {
    client: RemoteClient,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes state changes of this connection.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection is closed or failed.
    pub async fn terminated(&mut self) -> ConnectionState {
        loop {
            {
                let state = self.state.borrow_and_update();
                if state.is_terminal() {
                    return state.clone();
                }
            }
            if self.state.changed().await.is_err() {
                // Decoder task is gone without reporting; treat as closed.
                return ConnectionState::Closed;
            }
        }
    }
}

/// Wait for `events` to open, then attach the response decoder.
///
/// Frames before `Open` are ignored. An `Error` before `Open` fails the
/// attempt; a `Close` (or the event source ending) reports
/// [`TransportError::ClosedBeforeOpen`].
///
/// After `Open`, text frames that decode as responses are published to the
/// client's inbound hub; everything else is dropped. `Close` completes
/// in-flight calls, `Error` fails them.
pub async fn bind<S>(mut events: S, sender: FrameSender) -> Result<ConnectionHandle, TransportError>
where
    S: Stream<Item = TransportEvent> + Send + Unpin + 'static,
{
    loop {
        match events.next().await {
            Some(TransportEvent::Open) => break,
            Some(TransportEvent::Text(_)) | Some(TransportEvent::Binary(_)) => {
                debug!("Ignoring frame received before open");
            }
            Some(TransportEvent::Error(reason)) => return Err(TransportError::Failed(reason)),
            Some(TransportEvent::Close) | None => return Err(TransportError::ClosedBeforeOpen),
        }
    }

    let hub = InboundHub::new();
    let client = RemoteClient::new(sender, hub.clone());
    let (state_tx, state_rx) = watch::channel(ConnectionState::Open);

    tokio::spawn(decode_events(events, hub, state_tx));

    Ok(ConnectionHandle {
        client,
        state: state_rx,
    })
}

async fn decode_events<S>(mut events: S, hub: InboundHub, state: watch::Sender<ConnectionState>)
where
    S: Stream<Item = TransportEvent> + Unpin,
{
    let end = loop {
        match events.next().await {
            Some(TransportEvent::Text(text)) => {
                if let Some(response) = decode_frame(&text) {
                    hub.publish(response);
                }
            }
            Some(TransportEvent::Binary(bytes)) => {
                trace!("Ignoring binary frame ({} bytes)", bytes.len());
            }
            Some(TransportEvent::Open) => {
                trace!("Ignoring repeated open event");
            }
            Some(TransportEvent::Error(reason)) => break ConnectionState::Failed(reason),
            Some(TransportEvent::Close) | None => break ConnectionState::Closed,
        }
    };

    match &end {
        ConnectionState::Failed(reason) => {
            warn!("Connection failed: {}", reason);
            hub.fail(reason.clone());
        }
        _ => {
            info!("Connection closed with {} calls in flight", hub.pending_calls());
            hub.close();
        }
    }
    state.send_replace(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{OutboundFrame, RpcError};
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn events() -> (
        mpsc::UnboundedSender<TransportEvent>,
        impl Stream<Item = TransportEvent> + Send + Unpin + 'static,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }));
        (tx, stream)
    }

    async fn open() -> (
        ConnectionHandle,
        mpsc::UnboundedSender<TransportEvent>,
        mpsc::UnboundedReceiver<OutboundFrame>,
    ) {
        let (tx, stream) = events();
        let (sender, outbound) = FrameSender::channel();
        tx.send(TransportEvent::Open).unwrap();
        let handle = bind(stream, sender).await.expect("bind should succeed");
        (handle, tx, outbound)
    }

    async fn ack_next(outbound: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> String {
        let frame = tokio::time::timeout(TEST_TIMEOUT, outbound.recv())
            .await
            .expect("Test timed out")
            .expect("outbound closed");
        let text = frame.text.clone();
        frame.ack(Ok(()));
        text
    }

    #[tokio::test]
    async fn test_error_before_open_fails_attempt() {
        let (tx, stream) = events();
        let (sender, _outbound) = FrameSender::channel();
        tx.send(TransportEvent::Text("early".into())).unwrap();
        tx.send(TransportEvent::Error("refused".into())).unwrap();

        let result = bind(stream, sender).await;
        assert_eq!(result.err(), Some(TransportError::Failed("refused".into())));
    }

    #[tokio::test]
    async fn test_close_before_open() {
        let (tx, stream) = events();
        let (sender, _outbound) = FrameSender::channel();
        tx.send(TransportEvent::Close).unwrap();

        let result = bind(stream, sender).await;
        assert_eq!(result.err(), Some(TransportError::ClosedBeforeOpen));
    }

    #[tokio::test]
    async fn test_frames_reach_matching_call() {
        let (handle, tx, mut outbound) = open().await;
        assert_eq!(handle.state(), ConnectionState::Open);

        let call = handle.client().invoke("automations.list", None);
        ack_next(&mut outbound).await;

        tx.send(TransportEvent::Binary(vec![1, 2, 3])).unwrap();
        tx.send(TransportEvent::Text("garbage".into())).unwrap();
        tx.send(TransportEvent::Text(r#"{"requestId":"2"}"#.into())).unwrap();
        tx.send(TransportEvent::Text(r#"{"requestId":"2","type":"item","object":"a"}"#.into()))
            .unwrap();
        tx.send(TransportEvent::Text(r#"{"requestId":"2","type":"end"}"#.into())).unwrap();

        let values = tokio::time::timeout(TEST_TIMEOUT, call.collect())
            .await
            .expect("Test timed out");
        assert_eq!(values, Ok(vec![json!("a")]));
    }

    #[tokio::test]
    async fn test_close_completes_in_flight_call() {
        let (mut handle, tx, mut outbound) = open().await;

        let call = handle.client().invoke("users.get", Some(vec![json!({"id": 1})]));
        ack_next(&mut outbound).await;
        tx.send(TransportEvent::Close).unwrap();

        let values = tokio::time::timeout(TEST_TIMEOUT, call.collect())
            .await
            .expect("Test timed out");
        assert_eq!(values, Ok(vec![]));
        assert_eq!(handle.terminated().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_error_fails_in_flight_call() {
        let (mut handle, tx, mut outbound) = open().await;

        let call = handle.client().invoke("users.get", None);
        ack_next(&mut outbound).await;
        tx.send(TransportEvent::Error("reset".into())).unwrap();

        let values = tokio::time::timeout(TEST_TIMEOUT, call.collect())
            .await
            .expect("Test timed out");
        assert_eq!(values, Err(RpcError::ConnectionLost("reset".into())));
        assert_eq!(handle.terminated().await, ConnectionState::Failed("reset".into()));
    }

    #[tokio::test]
    async fn test_event_source_ending_counts_as_close() {
        let (mut handle, tx, _outbound) = open().await;
        drop(tx);

        let state = tokio::time::timeout(TEST_TIMEOUT, handle.terminated())
            .await
            .expect("Test timed out");
        assert_eq!(state, ConnectionState::Closed);
        assert!(handle.client().inbound().end_state().is_some());
    }
}
