//! # hearth-adapter-rpc
//!
//! Symmetric JSON RPC over any `AsyncRead + AsyncWrite` pair, one message
//! per line, and the bridge that exposes an out-of-process integration as a
//! [`Provider`](hearth_app::provider::Provider).
//!
//! ## Layers
//! - [`message`]: the wire shapes (call, response)
//! - [`peer`]: pending-call table, inbound dispatch, timeouts
//! - [`bridge`]: provider-side methods (`registerService`, `updateValue`, ...)
//!   and the remote service backend (`setValue`, `triggerAction`)
//! - [`process`]: child processes speaking RPC on their stdio, restarted by
//!   a scheduler task

pub mod bridge;
pub mod error;
pub mod message;
pub mod peer;
pub mod process;

pub use error::RpcError;
pub use peer::{CallHandler, Connection, PeerOptions, RpcPeer, connect};
