//! Beatrix RPC Client Library
//!
//! A multiplexed RPC client over a single WebSocket:
//!
//! - `rpc` - call capture, request encoding, response routing per call
//! - `transport` - connection binding, WebSocket adapter, reconnect supervisor
//! - `api` - typed facade for the known server methods
//! - `config` - environment-driven client configuration
//!
//! # Usage
//!
//! ```ignore
//! use beatrix_rpc::config::ClientConfig;
//! use beatrix_rpc::transport::{spawn_supervisor, WsConnector};
//!
//! let config = ClientConfig::from_env()?;
//! let (mut coordinator, _task) = spawn_supervisor(WsConnector::from_config(&config)?, config.retry_delay);
//! let client = coordinator.wait_connected().await?;
//! let user = client.proxy().path("users.get").call(vec![json!({"id": 1})]).last().await?;
//! ```

pub mod api;
pub mod config;
pub mod rpc;
pub mod transport;
