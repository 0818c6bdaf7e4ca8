//! Reconnecting supervisor and the published current client.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::binding::{ConnectionHandle, ConnectionState, TransportError};
use crate::rpc::{CallStream, RemoteClient, RpcError};

/// Something that can open a new connection on demand.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<ConnectionHandle, TransportError>> + Send;
}

/// The client of the currently open connection.
#[derive(Debug, Clone)]
pub struct ActiveHandle {
    /// Increments with every successful connection.
    pub generation: u64,
    pub client: RemoteClient,
}

/// Read side of the supervisor: the only way call sites reach a client.
///
/// Only the supervisor task writes; any number of `Coordinator` clones read.
/// When every clone is dropped the supervisor shuts down.
#[derive(Debug, Clone)]
pub struct Coordinator {
    rx: watch::Receiver<Option<ActiveHandle>>,
}

impl Coordinator {
    /// The live client, or [`RpcError::NotConnected`] while reconnecting.
    pub fn current(&self) -> Result<RemoteClient, RpcError> {
        self.rx
            .borrow()
            .as_ref()
            .map(|active| active.client.clone())
            .ok_or(RpcError::NotConnected)
    }

    /// Generation of the live connection, if any.
    pub fn generation(&self) -> Option<u64> {
        self.rx.borrow().as_ref().map(|active| active.generation)
    }

    /// Dispatch `method` on the live client.
    pub fn invoke(&self, method: &str, args: Option<Vec<Value>>) -> Result<CallStream, RpcError> {
        Ok(self.current()?.invoke(method, args))
    }

    /// Wait until a connection is published.
    ///
    /// Fails only if the supervisor has stopped.
    pub async fn wait_connected(&mut self) -> Result<RemoteClient, RpcError> {
        loop {
            if let Some(active) = self.rx.borrow_and_update().as_ref() {
                return Ok(active.client.clone());
            }
            if self.rx.changed().await.is_err() {
                return Err(RpcError::NotConnected);
            }
        }
    }

    /// Wait for the next publication (a new connection, or the loss of the
    /// current one) and return the generation now live.
    pub async fn changed(&mut self) -> Result<Option<u64>, RpcError> {
        self.rx.changed().await.map_err(|_| RpcError::NotConnected)?;
        Ok(self.generation())
    }
}

/// Start the reconnect loop.
///
/// The loop connects, publishes the new client, waits for the connection to
/// end, withdraws the client, and tries again after `retry_delay`. There is
/// no attempt limit. Abort the returned task (or drop every `Coordinator`)
/// to stop it.
pub fn spawn_supervisor<C: Connector>(
    connector: C,
    retry_delay: Duration,
) -> (Coordinator, JoinHandle<()>) {
    let (tx, rx) = watch::channel(None);
    let task = tokio::spawn(supervise(connector, retry_delay, tx));
    (Coordinator { rx }, task)
}

async fn supervise<C: Connector>(
    connector: C,
    retry_delay: Duration,
    tx: watch::Sender<Option<ActiveHandle>>,
) {
    let mut generation = 0u64;
    let mut attempt = 0u64;

    loop {
        attempt += 1;
        let connected = tokio::select! {
            result = connector.connect() => result,
            _ = tx.closed() => return,
        };

        match connected {
            Ok(mut handle) => {
                generation += 1;
                attempt = 0;
                info!("Connection {} established", generation);
                tx.send_replace(Some(ActiveHandle {
                    generation,
                    client: handle.client().clone(),
                }));

                let end = tokio::select! {
                    end = handle.terminated() => end,
                    _ = tx.closed() => return,
                };
                tx.send_replace(None);

                match end {
                    ConnectionState::Failed(reason) => {
                        warn!("Connection {} failed: {}; reconnecting", generation, reason)
                    }
                    _ => info!("Connection {} closed; reconnecting", generation),
                }
            }
            Err(e) => {
                warn!("Connection attempt {} failed: {}", attempt, e);
            }
        }

        if retry_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {}
                _ = tx.closed() => return,
            }
        }
    }
}
