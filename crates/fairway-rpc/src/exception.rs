//! Wire encoding for exception reply payloads (negative-MSGID responses).
//! `TYPE_TAG(4) | EXC_LEN(4) | EXC_DATA(EXC_LEN)`, with the `UNKNOWN_VERB`
//! kind's layout fixed by the wire contract.

use bytes::Bytes;

use crate::error::{RpcError, RpcErrorKind};

const TAG_UNKNOWN_VERB: u32 = 0;
const TAG_HANDLER_EXCEPTION: u32 = 1;

pub(crate) fn encode_unknown_verb(verb: u64) -> Bytes {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&TAG_UNKNOWN_VERB.to_le_bytes());
    buf.extend_from_slice(&8u32.to_le_bytes());
    buf.extend_from_slice(&verb.to_le_bytes());
    Bytes::from(buf)
}

pub(crate) fn encode_handler_exception(message: &str) -> Bytes {
    let data = message.as_bytes();
    let mut buf = Vec::with_capacity(8 + data.len());
    buf.extend_from_slice(&TAG_HANDLER_EXCEPTION.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    Bytes::from(buf)
}

pub(crate) fn decode(payload: &Bytes) -> Result<RpcErrorKind, RpcError> {
    if payload.len() < 8 {
        return Err(protocol_violation("exception payload shorter than its own header"));
    }
    let tag = u32::from_le_bytes(payload[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
    if payload.len() != 8 + len {
        return Err(protocol_violation("exception payload length mismatch"));
    }
    let data = &payload[8..];
    match tag {
        TAG_UNKNOWN_VERB => {
            if data.len() != 8 {
                return Err(protocol_violation("UNKNOWN_VERB exception data must be 8 bytes"));
            }
            let verb = u64::from_le_bytes(data.try_into().unwrap());
            Ok(RpcErrorKind::UnknownVerb { verb })
        }
        TAG_HANDLER_EXCEPTION => Ok(RpcErrorKind::HandlerException {
            message: String::from_utf8_lossy(data).into_owned(),
        }),
        other => Err(protocol_violation(&format!("unknown exception tag {other}"))),
    }
}

fn protocol_violation(reason: &str) -> RpcError {
    RpcError::new(RpcErrorKind::ProtocolViolation {
        reason: reason.to_string(),
    })
}
