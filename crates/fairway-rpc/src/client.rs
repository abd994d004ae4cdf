//! The client half of a connection: outstanding-call bookkeeping, the
//! receive loop that matches replies back to callers (§4.5.3), and typed
//! call convenience on top of the raw byte interface.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fairway_codec::FrameCodec;
use fairway_core::{Cancellation, Clock, Deadline, SystemClock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::connection::{send_loop, ConnectionShared, ConnectionState, ConnectionStats, LoopHandles, OutboundItem};
use crate::error::{RpcError, RpcErrorKind};
use crate::exception;
use crate::negotiation::NegotiatedFeatures;

/// How often the cancellation watcher polls an in-flight call's token.
/// `fairway_core::Cancellation` is a bare flag with no waker integration,
/// so there's no way to be notified the instant it flips; a short poll
/// interval bounds how late a cancellation can be observed without
/// reaching into `fairway-core` to add one.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

struct PendingCall {
    reply_tx: Option<oneshot::Sender<Result<Bytes, RpcError>>>,
    timer: Option<fairway_rt::Timer>,
    done: Rc<Cell<bool>>,
}

/// A connection acting as an RPC caller. Cheaply cloneable; clones share
/// the same underlying connection state.
#[derive(Clone)]
pub struct Client {
    shared: Rc<ConnectionShared>,
    calls: Rc<RefCell<HashMap<i64, PendingCall>>>,
    next_message_id: Rc<Cell<i64>>,
    clock: Arc<dyn Clock>,
    loops: Rc<RefCell<Option<LoopHandles>>>,
}

impl Client {
    /// Negotiate, then spawn the send and receive loops on the current
    /// shard. Must be called from within a running `LocalSet` (see
    /// `fairway_rt::Shard`).
    pub async fn connect<S>(
        mut stream: S,
        offer: NegotiatedFeatures,
        compressor: Option<Arc<dyn fairway_codec::Compressor>>,
    ) -> Result<Client, RpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let handshake_codec = FrameCodec::new();
        handshake_codec
            .write_negotiation(&mut stream, &offer.to_frame())
            .await?;
        let accepted = handshake_codec
            .read_negotiation(&mut stream)
            .await?
            .ok_or_else(|| RpcError::new(RpcErrorKind::ConnectionClosed))?;
        let accepted = NegotiatedFeatures::from_frame(&accepted);

        let codec = FrameCodec::new()
            .with_timeout(accepted.timeout_enabled)
            .with_compressor(compressor);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let shared = ConnectionShared::new(codec, Arc::clone(&clock));

        let client = Client {
            shared: Rc::clone(&shared),
            calls: Rc::new(RefCell::new(HashMap::new())),
            next_message_id: Rc::new(Cell::new(1)),
            clock,
            loops: Rc::new(RefCell::new(None)),
        };

        let (reader, writer) = tokio::io::split(stream);
        let send = fairway_rt::spawn_local(send_loop(Rc::clone(&shared), writer));
        let receive = fairway_rt::spawn_local(receive_loop(Rc::clone(&shared), Rc::clone(&client.calls), reader));
        *client.loops.borrow_mut() = Some(LoopHandles { send, receive });

        Ok(client)
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    /// The clock this connection stamps deadlines against. Exposed mainly
    /// so callers (and tests) can build a [`Deadline`] relative to the
    /// connection's own notion of "now" rather than the wall clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// §4.5.6: close the read side and flip the connection into the
    /// `Error` state. The receive loop observes this the next time it
    /// would otherwise block on a read, same as real EOF; outstanding
    /// calls fail once that loop actually exits (see
    /// `fail_all_outstanding`), not synchronously here.
    pub fn abort(&self) {
        self.shared.abort();
    }

    /// `abort`, then wait for the send and receive loop tasks to finish.
    /// By the time the receive loop exits it has already failed every
    /// outstanding call (`fail_all_outstanding`), so nothing is left
    /// dangling in `calls` once `stop` returns.
    pub async fn stop(&self) {
        self.abort();
        let loops = self.loops.borrow_mut().take();
        if let Some(loops) = loops {
            let _ = loops.send.await;
            loops.receive.await;
        }
    }

    /// Issue one call. `deadline` is optional and only meaningful if the
    /// connection negotiated `TIMEOUT`; `cancellation` lets the caller
    /// abandon the call from application code.
    pub async fn call(
        &self,
        verb: u64,
        payload: Bytes,
        deadline: Option<Deadline>,
        cancellation: Option<Cancellation>,
    ) -> Result<Bytes, RpcError> {
        if self.shared.is_closed() {
            return Err(RpcError::new(RpcErrorKind::ConnectionClosed));
        }

        let message_id = self.allocate_message_id();
        let (tx, rx) = oneshot::channel();
        let done = Rc::new(Cell::new(false));

        let timer = deadline.and_then(|d| d.remaining(self.clock.now())).map(|remaining| {
            let shared = Rc::clone(&self.shared);
            let calls = Rc::clone(&self.calls);
            let done_for_timer = Rc::clone(&done);
            fairway_rt::Timer::after(remaining, move || {
                if done_for_timer.get() {
                    return;
                }
                shared.remove_queued(message_id);
                if let Some(mut pending) = calls.borrow_mut().remove(&message_id) {
                    shared.stats.record_timeout();
                    if let Some(tx) = pending.reply_tx.take() {
                        let _ = tx.send(Err(RpcError::new(RpcErrorKind::Timeout)));
                    }
                }
            })
        });

        self.calls.borrow_mut().insert(
            message_id,
            PendingCall {
                reply_tx: Some(tx),
                timer: timer.clone(),
                done: Rc::clone(&done),
            },
        );
        self.shared.push(OutboundItem::Request {
            message_id,
            verb,
            payload,
            deadline,
        });

        if let Some(cancellation) = cancellation {
            spawn_cancellation_watcher(
                message_id,
                cancellation,
                Rc::clone(&self.shared),
                Rc::clone(&self.calls),
                Rc::clone(&done),
            );
        }

        let result = rx.await.unwrap_or_else(|_| Err(RpcError::new(RpcErrorKind::ConnectionClosed)));
        done.set(true);
        if let Some(timer) = timer {
            timer.cancel();
        }
        result
    }

    fn allocate_message_id(&self) -> i64 {
        let current = self.next_message_id.get();
        let next = if current == i64::MAX { 1 } else { current + 1 };
        self.next_message_id.set(next);
        current
    }
}

fn spawn_cancellation_watcher(
    message_id: i64,
    cancellation: Cancellation,
    shared: Rc<ConnectionShared>,
    calls: Rc<RefCell<HashMap<i64, PendingCall>>>,
    done: Rc<Cell<bool>>,
) {
    fairway_rt::spawn_local(async move {
        loop {
            if done.get() {
                return;
            }
            if cancellation.is_cancelled() {
                shared.remove_queued(message_id);
                if let Some(mut pending) = calls.borrow_mut().remove(&message_id) {
                    if let Some(timer) = &pending.timer {
                        timer.cancel();
                    }
                    if let Some(tx) = pending.reply_tx.take() {
                        let _ = tx.send(Err(RpcError::new(RpcErrorKind::Cancelled)));
                    }
                }
                return;
            }
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        }
    });
}

/// The client-side receive loop (§4.5.3): match replies to outstanding
/// calls by message-id, logging and discarding unmatched error replies
/// (this happens legitimately once a timeout has already retired the
/// record) and silently dropping any other unmatched reply.
async fn receive_loop<R>(
    shared: Rc<ConnectionShared>,
    calls: Rc<RefCell<HashMap<i64, PendingCall>>>,
    mut reader: R,
) where
    R: AsyncRead + Unpin,
{
    loop {
        if shared.is_closed() {
            break;
        }
        let frame = tokio::select! {
            biased;
            _ = shared.abort_notify.notified() => break,
            result = shared.codec.read_response(&mut reader) => match result {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(target: "fairway::rpc", error = %err, "client receive loop: protocol error");
                    break;
                }
            },
        };

        let is_exception = frame.is_exception();
        let key = if is_exception { -frame.message_id } else { frame.message_id };

        let pending = calls.borrow_mut().remove(&key);
        match pending {
            Some(mut pending) => {
                if let Some(timer) = &pending.timer {
                    timer.cancel();
                }
                pending.done.set(true);
                if let Some(tx) = pending.reply_tx.take() {
                    let result = if is_exception {
                        match exception::decode(&frame.payload) {
                            Ok(kind) => Err(RpcError::new(kind)),
                            Err(err) => Err(err),
                        }
                    } else {
                        Ok(frame.payload)
                    };
                    let _ = tx.send(result);
                }
            }
            None => {
                shared.stats.record_unmatched_reply();
                if is_exception {
                    tracing::debug!(
                        target: "fairway::rpc",
                        message_id = frame.message_id,
                        "dropped unmatched exception reply, likely a retired timeout"
                    );
                }
            }
        }
    }

    shared.mark_closed();
    fail_all_outstanding(&calls);
}

fn fail_all_outstanding(calls: &RefCell<HashMap<i64, PendingCall>>) {
    for (_, mut pending) in calls.borrow_mut().drain() {
        if let Some(timer) = &pending.timer {
            timer.cancel();
        }
        pending.done.set(true);
        if let Some(tx) = pending.reply_tx.take() {
            let _ = tx.send(Err(RpcError::new(RpcErrorKind::ConnectionClosed)));
        }
    }
}

/// A minimal typed-payload convenience. Deliberately hand-rolled rather
/// than pulling in a serialization framework: callers who want one can
/// implement `Codable` in terms of it.
pub trait Codable: Sized {
    fn encode(&self) -> Bytes;
    fn decode(bytes: Bytes) -> Result<Self, RpcError>;
}

impl Client {
    pub async fn call_typed<Req, Resp>(
        &self,
        verb: u64,
        request: &Req,
        deadline: Option<Deadline>,
        cancellation: Option<Cancellation>,
    ) -> Result<Resp, RpcError>
    where
        Req: Codable,
        Resp: Codable,
    {
        let payload = self.call(verb, request.encode(), deadline, cancellation).await?;
        Resp::decode(payload)
    }
}
