//! Connection management for the RPC client.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐ connect ┌──────────────────┐ events ┌──────────┐
//! │ Supervisor │ ──────► │ WebSocket adapter│ ─────► │ binding  │──► ConnectionHandle
//! └─────┬──────┘         └──────────────────┘        └──────────┘      (RemoteClient)
//!       │ publish / clear
//!       ▼
//! ┌─────────────┐
//! │ Coordinator │ ◄── current() from call sites
//! └─────────────┘
//! ```
//!
//! A connection moves `Connecting → Open → (Closed | Failed)`. The
//! supervisor reconnects forever and replaces the published client after
//! every successful open. Calls still in flight on a replaced client are
//! not migrated.

mod binding;
mod supervisor;
mod websocket;

pub use binding::{bind, ConnectionHandle, ConnectionState, TransportError, TransportEvent};
pub use supervisor::{spawn_supervisor, ActiveHandle, Connector, Coordinator};
pub use websocket::{connect_websocket, WsConnector};
