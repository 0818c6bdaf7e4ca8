//! Multiplexed RPC over a single duplex text connection.
//!
//! Every call is a request envelope naming a dotted method path. The server
//! answers with any number of response frames tagged with the same request
//! id, so many calls share one connection at the same time.
//!
//! # Architecture
//!
//! ```text
//!  client.proxy().path("users.get").call(args)
//!        │
//!        ▼
//! ┌──────────────┐  (chain, args)  ┌──────────────┐   text frame   ┌────────┐
//! │  CallProxy   │ ───────────────►│ RemoteClient │ ─────────────► │ server │
//! └──────────────┘                 └──────┬───────┘                └───┬────┘
//!                                         │ subscribe(id)              │
//!                                         ▼                            │
//!                  CallStream ◄── route ◄── InboundHub ◄── decode ◄────┘
//! ```
//!
//! # Protocol
//!
//! ```text
//! → {"requestId":"2","method":"users.get","args":[{"id":1}]}
//! ← {"requestId":"2","type":"reply","object":{"id":1,"name":"x"}}
//! ```
//!
//! Response `type` is one of `item` (one value, more to come), `reply`
//! (one value, done), `end` (done) or `error` (failed).
//!
//! # Usage
//!
//! ```ignore
//! use beatrix_rpc::rpc::RemoteClient;
//! use serde_json::json;
//!
//! let user: serde_json::Value = client
//!     .proxy()
//!     .path("users.get")
//!     .call(vec![json!({"id": 1})])
//!     .reply()
//!     .await?;
//! ```

mod call;
mod client;
mod error;
mod proxy;
mod router;
mod wire;

pub use call::{with_timeout, CallStream, TypedCall};
pub use client::{FrameSender, OutboundFrame, RemoteClient, ROOT_NAME};
pub use error::RpcError;
pub use proxy::{CallProxy, Dispatch, Property, GETTER_SUFFIX};
pub use router::{InboundEvent, InboundHub, StreamEnd};
pub use wire::{decode_frame, error_message, Request, Response, ResponseKind};
