//! Id types threaded through the scheduler, fair queue, and RPC engine.

use std::fmt;

/// Identifies one shard (one single-threaded cooperative executor) among
/// however many the process runs, one per OS thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub u16);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard:{}", self.0)
    }
}

/// A 128-bit connection id whose upper 16 bits encode the owning shard, per
/// the wire contract for `CONNECTION_ID`/`STREAM_PARENT` negotiation
/// features. The lower 112 bits are a shard-local counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u128);

impl ConnectionId {
    pub fn new(shard: ShardId, local: u64) -> Self {
        // Upper 16 bits: shard. Remaining 112 bits: local counter (we only
        // ever use the low 64 of those, but the layout leaves room).
        let value = ((shard.0 as u128) << 112) | (local as u128);
        Self(value)
    }

    pub fn shard(&self) -> ShardId {
        ShardId((self.0 >> 112) as u16)
    }

    pub fn local(&self) -> u64 {
        (self.0 & u64::MAX as u128) as u64
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }

    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionId")
            .field("shard", &self.shard())
            .field("local", &self.local())
            .finish()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:x}", self.shard(), self.local())
    }
}

/// A per-connection request/reply correlation id. Negative values denote an
/// exception reply on the wire (see the response frame layout); this type
/// just carries the raw signed value, the sign is interpreted by the codec
/// and connection layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn is_exception(&self) -> bool {
        self.0 < 0
    }

    pub fn negate(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_round_trips_through_shard_and_local() {
        let id = ConnectionId::new(ShardId(7), 0xdead_beef);
        assert_eq!(id.shard(), ShardId(7));
        assert_eq!(id.local(), 0xdead_beef);

        let bytes = id.to_le_bytes();
        let parsed = ConnectionId::from_le_bytes(bytes);
        assert_eq!(parsed, id);
    }

    #[test]
    fn message_id_negation_flags_exceptions() {
        let id = MessageId(42);
        assert!(!id.is_exception());
        let negated = id.negate();
        assert!(negated.is_exception());
        assert_eq!(negated.negate(), id);
    }
}
