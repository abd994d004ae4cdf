//! Wire framing for the fairway RPC protocol: four frame families sharing a
//! fixed-header-then-body shape, with an optional compression envelope
//! wrapped around everything except negotiation.
//!
//! Little-endian is used for every multi-byte field, regardless of host
//! byte order.

mod compressor;
mod error;
mod frame;
mod headers;
mod io;

pub use compressor::{Compressor, DeflateCompressor, IdentityCompressor};
pub use error::CodecError;
pub use frame::FrameCodec;
pub use headers::{feature_id, NegotiationFrame, RequestFrame, ResponseFrame, StreamFrame, STREAM_END_MARKER};
