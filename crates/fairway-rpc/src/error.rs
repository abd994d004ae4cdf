//! The RPC engine's error domain: each call resolves to a value or exactly
//! one discriminable failure, never a string to be parsed back apart.

use fairway_codec::CodecError;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind) -> Self {
        Self { kind }
    }
}

/// Failure kinds a caller can match on. `non_exhaustive` so a new kind
/// doesn't become a breaking change for callers who already match
/// exhaustively.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RpcErrorKind {
    /// Bad magic, a short header, a length overflow, or any other framing
    /// violation. Fatal to the connection.
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// The call's deadline elapsed before a reply arrived.
    #[error("request timed out")]
    Timeout,

    /// The server has no handler registered for the verb.
    #[error("unknown verb {verb}")]
    UnknownVerb { verb: u64 },

    /// The caller's own cancellation token fired.
    #[error("call cancelled")]
    Cancelled,

    /// The connection reached a terminal state before this call completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The stream child's inbound queue was aborted, usually because its
    /// connection tore down.
    #[error("stream closed")]
    StreamClosed,

    /// The server-side handler panicked; the client observes this as a
    /// remote failure rather than a lost call.
    #[error("handler exception: {message}")]
    HandlerException { message: String },
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        RpcError::new(RpcErrorKind::ProtocolViolation {
            reason: err.to_string(),
        })
    }
}

impl From<fairway_rt::SchedError> for RpcError {
    fn from(err: fairway_rt::SchedError) -> Self {
        use fairway_rt::SchedError;
        match err {
            SchedError::Aborted => RpcError::new(RpcErrorKind::StreamClosed),
            SchedError::ShardGone | SchedError::Broken | SchedError::GateClosed => {
                RpcError::new(RpcErrorKind::ConnectionClosed)
            }
        }
    }
}
