//! Feature negotiation (§4.5.1): the initiator offers a set of features,
//! the acceptor replies with whatever subset it's willing to honor, and
//! both sides switch those features on only after the reply has crossed
//! the wire.

use bytes::Bytes;
use fairway_codec::{feature_id, NegotiationFrame};
use fairway_core::ConnectionId;

/// What a connection asked for or was granted. The same type is used for
/// both the offer and the reply; `effective` on each side is just whatever
/// the server's reply frame says, intersected implicitly by the server only
/// ever accepting a subset of what was offered.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedFeatures {
    pub compressor_name: Option<String>,
    pub timeout_enabled: bool,
    pub connection_id: Option<ConnectionId>,
    pub stream_parent: Option<ConnectionId>,
    pub isolation_cookie: Option<String>,
}

impl NegotiatedFeatures {
    pub fn to_frame(&self) -> NegotiationFrame {
        let mut frame = NegotiationFrame::new();
        if let Some(name) = &self.compressor_name {
            frame = frame.with_feature(feature_id::COMPRESS, Bytes::copy_from_slice(name.as_bytes()));
        }
        if self.timeout_enabled {
            frame = frame.with_feature(feature_id::TIMEOUT, Bytes::new());
        }
        if let Some(id) = self.connection_id {
            frame = frame.with_feature(feature_id::CONNECTION_ID, Bytes::copy_from_slice(&id.to_le_bytes()));
        }
        if let Some(parent) = self.stream_parent {
            frame = frame.with_feature(
                feature_id::STREAM_PARENT,
                Bytes::copy_from_slice(&parent.to_le_bytes()),
            );
        }
        if let Some(cookie) = &self.isolation_cookie {
            frame = frame.with_feature(feature_id::ISOLATION, Bytes::copy_from_slice(cookie.as_bytes()));
        }
        frame
    }

    /// Unknown feature ids in `frame` are ignored silently, per the wire
    /// contract; only the ids this engine understands are extracted.
    pub fn from_frame(frame: &NegotiationFrame) -> Self {
        Self {
            compressor_name: frame
                .get(feature_id::COMPRESS)
                .map(|v| String::from_utf8_lossy(v).into_owned()),
            timeout_enabled: frame.has(feature_id::TIMEOUT),
            connection_id: frame.get(feature_id::CONNECTION_ID).and_then(bytes_to_id),
            stream_parent: frame.get(feature_id::STREAM_PARENT).and_then(bytes_to_id),
            isolation_cookie: frame
                .get(feature_id::ISOLATION)
                .map(|v| String::from_utf8_lossy(v).into_owned()),
        }
    }
}

fn bytes_to_id(bytes: &Bytes) -> Option<ConnectionId> {
    let array: [u8; 16] = bytes.as_ref().try_into().ok()?;
    Some(ConnectionId::from_le_bytes(array))
}
