//! Shared plumbing used by both [`crate::client::Client`] and
//! [`crate::server::Server`]: the outbound FIFO, per-connection counters,
//! and the send loop (§4.5.2). Receive loops differ enough between client
//! and server (§4.5.3) that they live in their own modules.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use fairway_codec::{FrameCodec, RequestFrame, ResponseFrame, StreamFrame};
use fairway_core::{Clock, Deadline};
use fairway_rt::sync::Gate;
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

use crate::error::RpcError;

/// A connection's lifecycle (§4's data model). `Connecting`/`Negotiating`
/// only exist before a [`ConnectionShared`] is even constructed — by
/// construction time the handshake already succeeded, so `new` starts a
/// connection straight at `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Negotiating,
    Ready,
    Error,
    Closed,
}

/// Something waiting in the outbound FIFO to be written. `message_id` is
/// carried on request entries so a timeout/cancellation can find and
/// remove a not-yet-sent request in the FIFO; this is a linear scan, a
/// deliberate simplification of the "O(1) iterator-stored" removal — see
/// the design notes.
pub(crate) enum OutboundItem {
    Request {
        message_id: i64,
        verb: u64,
        payload: Bytes,
        deadline: Option<Deadline>,
    },
    Response(ResponseFrame),
    Stream(StreamFrame),
}

impl OutboundItem {
    pub(crate) fn message_id(&self) -> Option<i64> {
        match self {
            OutboundItem::Request { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }
}

/// Counters surfaced per §7/§9: messages actually written, requests that
/// timed out, and replies that arrived for a message-id nobody was
/// waiting on anymore (a legitimate race with a just-retired timeout).
#[derive(Default)]
pub struct ConnectionStats {
    sent_messages: Cell<u64>,
    timeout_count: Cell<u64>,
    unmatched_reply_count: Cell<u64>,
}

impl ConnectionStats {
    pub fn sent_messages(&self) -> u64 {
        self.sent_messages.get()
    }
    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.get()
    }
    pub fn unmatched_reply_count(&self) -> u64 {
        self.unmatched_reply_count.get()
    }
    pub(crate) fn record_sent(&self) {
        self.sent_messages.set(self.sent_messages.get() + 1);
    }
    pub(crate) fn record_timeout(&self) {
        self.timeout_count.set(self.timeout_count.get() + 1);
    }
    pub(crate) fn record_unmatched_reply(&self) {
        self.unmatched_reply_count.set(self.unmatched_reply_count.get() + 1);
    }
}

/// State shared between a connection's send loop, receive loop, and the
/// `Client`/`Server` wrapper sitting on top. Shard-local: everything here
/// is `Rc`/`Cell`-based, never touched from another OS thread.
pub(crate) struct ConnectionShared {
    pub(crate) fifo: RefCell<VecDeque<OutboundItem>>,
    pub(crate) fifo_notify: Notify,
    pub(crate) stats: ConnectionStats,
    pub(crate) closed: Cell<bool>,
    pub(crate) state: Cell<ConnectionState>,
    pub(crate) abort_notify: Notify,
    /// Counts in-flight replies on the server side (§4.5.6's "reply
    /// gate"); unused by `Client`, which tracks outstanding calls in its
    /// own map instead.
    pub(crate) reply_gate: Gate,
    pub(crate) codec: FrameCodec,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ConnectionShared {
    pub(crate) fn new(codec: FrameCodec, clock: Arc<dyn Clock>) -> Rc<Self> {
        Rc::new(Self {
            fifo: RefCell::new(VecDeque::new()),
            fifo_notify: Notify::new(),
            stats: ConnectionStats::default(),
            closed: Cell::new(false),
            state: Cell::new(ConnectionState::Ready),
            abort_notify: Notify::new(),
            reply_gate: Gate::new(),
            codec,
            clock,
        })
    }

    pub(crate) fn push(&self, item: OutboundItem) {
        self.fifo.borrow_mut().push_back(item);
        self.fifo_notify.notify_one();
    }

    /// Remove a not-yet-sent request by message-id. Returns `true` if an
    /// entry was found and removed (meaning the caller must still fail the
    /// waiter itself; nothing here does that).
    pub(crate) fn remove_queued(&self, message_id: i64) -> bool {
        let mut fifo = self.fifo.borrow_mut();
        if let Some(pos) = fifo.iter().position(|item| item.message_id() == Some(message_id)) {
            fifo.remove(pos);
            true
        } else {
            false
        }
    }

    /// Marks the connection closed because a loop ran its course on its
    /// own (peer EOF, protocol error). Leaves an already-`Error` state
    /// alone — that was set by an explicit `abort`, and stays the more
    /// informative terminal state.
    pub(crate) fn mark_closed(&self) {
        self.closed.set(true);
        if self.state.get() != ConnectionState::Error {
            self.state.set(ConnectionState::Closed);
        }
        self.fifo_notify.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// §4.5.6: close the read side and flip the error flag. There's no
    /// generic socket half-close over an arbitrary `AsyncRead`, so this
    /// races the receive loop's next read against `abort_notify` instead —
    /// the loop observes it exactly like it would observe real EOF.
    pub(crate) fn abort(&self) {
        self.state.set(ConnectionState::Error);
        self.closed.set(true);
        self.abort_notify.notify_waiters();
        self.fifo_notify.notify_waiters();
    }
}

/// Handles to a connection's two loop tasks, held so `stop` can join both
/// rather than leaking them (§4.5.6: "the loops never leak tasks").
pub(crate) struct LoopHandles {
    pub(crate) send: fairway_rt::LocalTaskHandle<Result<(), RpcError>>,
    pub(crate) receive: fairway_rt::LocalTaskHandle<()>,
}

/// The send loop (§4.5.2): wake whenever the FIFO is non-empty, drain it in
/// order, stamp absolute deadlines down to relative-remaining milliseconds
/// if the `TIMEOUT` feature is in effect, write, flush, count. Exits on the
/// first write error or once the connection is marked closed with an empty
/// FIFO.
pub(crate) async fn send_loop<W>(shared: Rc<ConnectionShared>, mut writer: W) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let item = loop {
            if let Some(item) = shared.fifo.borrow_mut().pop_front() {
                break Some(item);
            }
            if shared.is_closed() {
                break None;
            }
            shared.fifo_notify.notified().await;
        };
        let Some(item) = item else {
            return Ok(());
        };

        match item {
            OutboundItem::Request {
                message_id,
                verb,
                payload,
                deadline,
            } => {
                let timeout_ms = shared.codec.timeout_enabled().then(|| {
                    deadline
                        .and_then(|d| d.remaining(shared.clock.now()))
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(u64::MAX)
                });
                let frame = RequestFrame {
                    timeout_ms,
                    verb,
                    message_id,
                    payload,
                };
                shared.codec.write_request(&mut writer, &frame).await?;
            }
            OutboundItem::Response(frame) => {
                shared.codec.write_response(&mut writer, &frame).await?;
            }
            OutboundItem::Stream(frame) => {
                shared.codec.write_stream(&mut writer, &frame).await?;
            }
        }
        tokio::io::AsyncWriteExt::flush(&mut writer).await.map_err(fairway_codec::CodecError::from)?;
        shared.stats.record_sent();
    }
}
