//! Per-call failure type.

use thiserror::Error;

/// Failure of a single logical call.
///
/// Clone so that every subscriber of a [`CallStream`](super::CallStream)
/// replays the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The server answered with an `error` response.
    #[error("{0}")]
    Remote(String),

    /// The server answered with an unrecognized response type.
    #[error("Invalid response type: {0}")]
    InvalidResponse(String),

    /// The request could not be handed to the transport.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The transport failed while the call was in flight.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The request could not be serialized.
    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// A produced value did not match the type the caller asked for.
    #[error("Failed to decode result: {0}")]
    Decode(String),

    /// A caller-imposed timeout expired.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// No live connection is currently published.
    #[error("Not connected to server")]
    NotConnected,
}
