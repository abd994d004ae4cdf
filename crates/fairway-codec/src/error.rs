//! Codec-level protocol errors. A short read or a malformed header is
//! treated as a protocol violation that closes the connection — the codec
//! never tries to resynchronize with a misbehaving peer.

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A non-zero but short read during a fixed-size header — the peer
    /// closed mid-frame.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The body read loop never reached the declared length before EOF.
    #[error("body length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("negotiation frame had a bad magic value")]
    BadMagic,

    #[error("malformed negotiation feature record: {reason}")]
    MalformedFeature { reason: &'static str },

    #[error("decompression failed: {0}")]
    Decompress(String),
}
