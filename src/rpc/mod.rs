//! RPC adapters implementing [`crate::ports::RpcAdapter`].
//!
//! The only concrete adapter is [`AlloyRpcAdapter`], backed by
//! `alloy`'s `Provider` over HTTP. Additional transports (WebSocket,
//! cursor-paginated peers) can be added here without touching the
//! core, since the core only ever depends on the `RpcAdapter` trait.

mod alloy_adapter;

pub use alloy_adapter::{AlloyRpcAdapter, connect_http};
