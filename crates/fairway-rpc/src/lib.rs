//! The RPC connection engine (C5): negotiation, a send loop shared by
//! client and server roles, receive loops that differ by role, timeouts
//! and cancellation, and stream children.
//!
//! Everything here is shard-local — a `Client` or `Server` must be driven
//! from inside a `fairway_rt::Shard`'s `LocalSet`, same as the primitives
//! in `fairway_rt::sync` it's built on.

mod client;
mod connection;
mod error;
mod exception;
mod negotiation;
mod server;
mod stream;

pub use client::{Client, Codable};
pub use connection::{ConnectionState, ConnectionStats};
pub use error::{RpcError, RpcErrorKind};
pub use negotiation::NegotiatedFeatures;
pub use server::{Handler, Server, ServerBuilder, ServerConnection};
pub use stream::{register_with_parent, deregister_from_parent, run_stream_child, StreamChildHandle, StreamDomain, StreamItem};
