//! WebSocket transport (tokio-tungstenite).
//!
//! Adapts a client WebSocket into [`TransportEvent`]s for [`bind`] and runs
//! a writer task that drains the connection's outbound frames.

use std::future::Future;

use futures_util::{future, stream, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info};
use url::Url;

use super::binding::{bind, ConnectionHandle, ConnectionState, TransportError, TransportEvent};
use super::supervisor::Connector;
use crate::config::{ClientConfig, ConfigError};
use crate::rpc::{FrameSender, OutboundFrame};

/// Open a WebSocket to `url` and bind an RPC client to it.
pub async fn connect_websocket(url: &Url) -> Result<ConnectionHandle, TransportError> {
    info!("Connecting to {}", url);
    let (ws, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let (sink, source) = ws.split();
    let (sender, outbound) = FrameSender::channel();

    // The socket is already open once the handshake has completed.
    let events = stream::once(future::ready(TransportEvent::Open)).chain(source.filter_map(|msg| {
        future::ready(match msg {
            Ok(WsMessage::Text(text)) => Some(TransportEvent::Text(text.as_str().to_owned())),
            Ok(WsMessage::Binary(data)) => Some(TransportEvent::Binary(data.to_vec())),
            Ok(WsMessage::Close(frame)) => {
                debug!("Received close frame: {:?}", frame);
                Some(TransportEvent::Close)
            }
            // tungstenite answers pings itself
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => None,
            Err(e) => Some(TransportEvent::Error(e.to_string())),
        })
    }));

    let handle = bind(Box::pin(events), sender).await?;
    tokio::spawn(write_frames(sink, outbound, handle.watch_state()));

    info!("Connected to {}", url);
    Ok(handle)
}

async fn write_frames<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    state: watch::Receiver<ConnectionState>,
) where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let terminated = until_terminated(state);
    tokio::pin!(terminated);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(mut frame) = frame else { break };
                let text = std::mem::take(&mut frame.text);
                let result = sink
                    .send(WsMessage::Text(text.into()))
                    .await
                    .map_err(|e| e.to_string());
                frame.ack(result);
            }
            _ = &mut terminated => break,
        }
    }

    // Frames still queued are dropped, which fails their calls.
    let _ = sink.close().await;
    debug!("WebSocket writer stopped");
}

async fn until_terminated(mut state: watch::Receiver<ConnectionState>) {
    loop {
        if state.borrow_and_update().is_terminal() {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// [`Connector`] that opens a WebSocket to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.endpoint()?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> impl Future<Output = Result<ConnectionHandle, TransportError>> + Send {
        connect_websocket(&self.url)
    }
}
