//! Pure, in-memory frame encode/decode. These functions never touch I/O —
//! they operate on a buffer that already holds exactly one logical frame's
//! bytes (header followed by body), whether that buffer came straight off
//! the wire or out of a decompressed envelope. That's what lets
//! [`crate::frame::FrameCodec`] use the same parser regardless of whether
//! compression is in effect.

use bytes::Bytes;

use crate::error::CodecError;

pub const NEGOTIATION_MAGIC: [u8; 8] = *b"FWYRPC01";

/// `0xFFFF_FFFF` on the wire marks a stream frame as end-of-stream.
pub const STREAM_END_MARKER: u32 = 0xFFFF_FFFF;

pub mod feature_id {
    pub const COMPRESS: u32 = 1;
    pub const TIMEOUT: u32 = 2;
    pub const CONNECTION_ID: u32 = 3;
    pub const STREAM_PARENT: u32 = 4;
    pub const ISOLATION: u32 = 5;
}

/// What a just-read header tells us to do next.
pub(crate) enum PayloadLength {
    Bytes(usize),
    EndOfStream,
}

// ---------------------------------------------------------------- negotiation

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NegotiationFrame {
    pub features: Vec<(u32, Bytes)>,
}

impl NegotiationFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature(mut self, id: u32, value: impl Into<Bytes>) -> Self {
        self.features.push((id, value.into()));
        self
    }

    pub fn get(&self, id: u32) -> Option<&Bytes> {
        self.features.iter().find(|(f, _)| *f == id).map(|(_, v)| v)
    }

    pub fn has(&self, id: u32) -> bool {
        self.get(id).is_some()
    }
}

pub(crate) const NEGOTIATION_HEADER_LEN: usize = 12;

pub(crate) fn negotiation_payload_len(header: &[u8]) -> Result<PayloadLength, CodecError> {
    if header[0..8] != NEGOTIATION_MAGIC {
        return Err(CodecError::BadMagic);
    }
    let extra_len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
    Ok(PayloadLength::Bytes(extra_len))
}

pub(crate) fn parse_negotiation(full: &[u8]) -> Result<NegotiationFrame, CodecError> {
    if full[0..8] != NEGOTIATION_MAGIC {
        return Err(CodecError::BadMagic);
    }
    let extra_len = u32::from_le_bytes(full[8..12].try_into().unwrap()) as usize;
    if full.len() != NEGOTIATION_HEADER_LEN + extra_len {
        return Err(CodecError::LengthMismatch {
            expected: NEGOTIATION_HEADER_LEN + extra_len,
            got: full.len(),
        });
    }
    let mut features = Vec::new();
    let mut cursor = NEGOTIATION_HEADER_LEN;
    while cursor < full.len() {
        if full.len() - cursor < 8 {
            return Err(CodecError::MalformedFeature {
                reason: "truncated feature record header",
            });
        }
        let feature_id = u32::from_le_bytes(full[cursor..cursor + 4].try_into().unwrap());
        let value_len =
            u32::from_le_bytes(full[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
        cursor += 8;
        if full.len() - cursor < value_len {
            return Err(CodecError::MalformedFeature {
                reason: "feature value runs past frame end",
            });
        }
        let value = Bytes::copy_from_slice(&full[cursor..cursor + value_len]);
        cursor += value_len;
        features.push((feature_id, value));
    }
    Ok(NegotiationFrame { features })
}

pub(crate) fn encode_negotiation(frame: &NegotiationFrame) -> Vec<u8> {
    let extra_len: usize = frame.features.iter().map(|(_, v)| 8 + v.len()).sum();
    let mut out = Vec::with_capacity(NEGOTIATION_HEADER_LEN + extra_len);
    out.extend_from_slice(&NEGOTIATION_MAGIC);
    out.extend_from_slice(&(extra_len as u32).to_le_bytes());
    for (id, value) in &frame.features {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
    }
    out
}

// -------------------------------------------------------------------- request

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub timeout_ms: Option<u64>,
    pub verb: u64,
    pub message_id: i64,
    pub payload: Bytes,
}

pub(crate) fn request_header_len(timeout_enabled: bool) -> usize {
    if timeout_enabled {
        28
    } else {
        20
    }
}

pub(crate) fn request_payload_len(header: &[u8]) -> Result<PayloadLength, CodecError> {
    let len_offset = header.len() - 4;
    let len = u32::from_le_bytes(header[len_offset..].try_into().unwrap()) as usize;
    Ok(PayloadLength::Bytes(len))
}

pub(crate) fn parse_request(full: &[u8], timeout_enabled: bool) -> Result<RequestFrame, CodecError> {
    let mut offset = 0;
    let timeout_ms = if timeout_enabled {
        let v = u64::from_le_bytes(full[0..8].try_into().unwrap());
        offset += 8;
        Some(v)
    } else {
        None
    };
    let verb = u64::from_le_bytes(full[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let message_id = i64::from_le_bytes(full[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let payload_len = u32::from_le_bytes(full[offset..offset + 4].try_into().unwrap()) as usize;
    offset += 4;
    if full.len() != offset + payload_len {
        return Err(CodecError::LengthMismatch {
            expected: offset + payload_len,
            got: full.len(),
        });
    }
    let payload = Bytes::copy_from_slice(&full[offset..]);
    Ok(RequestFrame {
        timeout_ms,
        verb,
        message_id,
        payload,
    })
}

pub(crate) fn encode_request(frame: &RequestFrame, timeout_enabled: bool) -> Vec<u8> {
    let header_len = request_header_len(timeout_enabled);
    let mut out = Vec::with_capacity(header_len + frame.payload.len());
    if timeout_enabled {
        out.extend_from_slice(&frame.timeout_ms.unwrap_or(0).to_le_bytes());
    }
    out.extend_from_slice(&frame.verb.to_le_bytes());
    out.extend_from_slice(&frame.message_id.to_le_bytes());
    out.extend_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&frame.payload);
    out
}

// ------------------------------------------------------------------- response

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub message_id: i64,
    pub payload: Bytes,
}

impl ResponseFrame {
    /// A negative message-id signals an exception reply.
    pub fn is_exception(&self) -> bool {
        self.message_id < 0
    }
}

pub(crate) const RESPONSE_HEADER_LEN: usize = 12;

pub(crate) fn response_payload_len(header: &[u8]) -> Result<PayloadLength, CodecError> {
    let len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
    Ok(PayloadLength::Bytes(len))
}

pub(crate) fn parse_response(full: &[u8]) -> Result<ResponseFrame, CodecError> {
    let message_id = i64::from_le_bytes(full[0..8].try_into().unwrap());
    let payload_len = u32::from_le_bytes(full[8..12].try_into().unwrap()) as usize;
    if full.len() != RESPONSE_HEADER_LEN + payload_len {
        return Err(CodecError::LengthMismatch {
            expected: RESPONSE_HEADER_LEN + payload_len,
            got: full.len(),
        });
    }
    Ok(ResponseFrame {
        message_id,
        payload: Bytes::copy_from_slice(&full[RESPONSE_HEADER_LEN..]),
    })
}

pub(crate) fn encode_response(frame: &ResponseFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(RESPONSE_HEADER_LEN + frame.payload.len());
    out.extend_from_slice(&frame.message_id.to_le_bytes());
    out.extend_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&frame.payload);
    out
}

// --------------------------------------------------------------------- stream

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Payload(Bytes),
    EndOfStream,
}

pub(crate) const STREAM_HEADER_LEN: usize = 4;

pub(crate) fn stream_payload_len(header: &[u8]) -> Result<PayloadLength, CodecError> {
    let len = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if len == STREAM_END_MARKER {
        Ok(PayloadLength::EndOfStream)
    } else {
        Ok(PayloadLength::Bytes(len as usize))
    }
}

pub(crate) fn parse_stream(full: &[u8]) -> Result<StreamFrame, CodecError> {
    let len = u32::from_le_bytes(full[0..4].try_into().unwrap());
    if len == STREAM_END_MARKER {
        return Ok(StreamFrame::EndOfStream);
    }
    let declared = len as usize;
    if full.len() != STREAM_HEADER_LEN + declared {
        return Err(CodecError::LengthMismatch {
            expected: STREAM_HEADER_LEN + declared,
            got: full.len(),
        });
    }
    Ok(StreamFrame::Payload(Bytes::copy_from_slice(
        &full[STREAM_HEADER_LEN..],
    )))
}

pub(crate) fn encode_stream(frame: &StreamFrame) -> Vec<u8> {
    match frame {
        StreamFrame::EndOfStream => STREAM_END_MARKER.to_le_bytes().to_vec(),
        StreamFrame::Payload(payload) => {
            let mut out = Vec::with_capacity(STREAM_HEADER_LEN + payload.len());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
            out
        }
    }
}
