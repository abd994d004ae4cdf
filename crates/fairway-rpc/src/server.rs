//! The server half of a connection: verb dispatch, isolation-group
//! execution, and the receive loop that turns requests into replies
//! (§4.5.3).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use fairway_codec::FrameCodec;
use fairway_core::{Clock, ConnectionId, Deadline, ShardId, SystemClock};
use fairway_rt::ShardHandle;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{send_loop, ConnectionShared, ConnectionState, ConnectionStats, LoopHandles, OutboundItem};
use crate::error::{RpcError, RpcErrorKind};
use crate::exception;
use crate::negotiation::NegotiatedFeatures;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Bytes, RpcError>>>>;

/// A verb handler that runs inline, on whatever shard accepted the
/// connection. Takes the raw request payload and, if `TIMEOUT` is in
/// effect, the absolute deadline the client's relative timeout converts to
/// on this server's clock.
pub trait Handler: 'static {
    fn call(&self, payload: Bytes, deadline: Option<Deadline>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Bytes, Option<Deadline>) -> Fut + 'static,
    Fut: Future<Output = Result<Bytes, RpcError>> + 'static,
{
    fn call(&self, payload: Bytes, deadline: Option<Deadline>) -> HandlerFuture {
        Box::pin(self(payload, deadline))
    }
}

/// A handler bound to an isolation group: the closure itself has to be
/// `Send` because it crosses shards through `ShardHandle::submit`, even
/// though the future it returns runs locally on the target shard and
/// doesn't.
type IsolatedHandler = Arc<dyn Fn(Bytes, Option<Deadline>) -> HandlerFuture + Send + Sync>;

enum RouteHandler {
    Local(Rc<dyn Handler>),
    Isolated(IsolatedHandler, ShardHandle),
}

struct Route {
    handler: RouteHandler,
}

/// Settings for connections that arrive advertising `STREAM_PARENT` rather
/// than behaving as an ordinary request/response connection (§4.5.5).
#[derive(Clone)]
pub struct StreamingConfig {
    pub domain: String,
    pub parent_shard: ShardHandle,
    pub queue_capacity: usize,
    pub byte_capacity: u32,
}

/// Builds a [`Server`] by registering verb handlers before any connection
/// is accepted.
pub struct ServerBuilder {
    routes: HashMap<u64, Route>,
    compressor: Option<Arc<dyn fairway_codec::Compressor>>,
    streaming: Option<StreamingConfig>,
    shard_id: ShardId,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            compressor: None,
            streaming: None,
            shard_id: ShardId(0),
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shard this server accepts connections on. Used only to stamp
    /// the upper bits of ids this server assigns to new stream children;
    /// defaults to shard 0 if never set, which is fine for a single-shard
    /// server or one that never accepts stream children.
    pub fn with_shard_id(mut self, shard_id: ShardId) -> Self {
        self.shard_id = shard_id;
        self
    }

    /// Register a handler for `verb`, running in the handler-default
    /// scheduling context: inline, on whatever shard accepted the
    /// connection.
    pub fn route<H>(mut self, verb: u64, handler: H) -> Self
    where
        H: Handler,
    {
        self.routes.insert(
            verb,
            Route {
                handler: RouteHandler::Local(Rc::new(handler)),
            },
        );
        self
    }

    /// Register a handler that always runs via cross-shard submit to
    /// `isolation`, rather than inline on the accepting shard. Unlike
    /// `route`'s handler, this one must be `Send + Sync`.
    pub fn route_isolated<H, Fut>(mut self, verb: u64, isolation: ShardHandle, handler: H) -> Self
    where
        H: Fn(Bytes, Option<Deadline>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, RpcError>> + 'static,
    {
        let handler: IsolatedHandler = Arc::new(move |payload, deadline| Box::pin(handler(payload, deadline)));
        self.routes.insert(
            verb,
            Route {
                handler: RouteHandler::Isolated(handler, isolation),
            },
        );
        self
    }

    pub fn with_compressor(mut self, compressor: Option<Arc<dyn fairway_codec::Compressor>>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Accept connections that declare themselves a child of this server's
    /// streaming domain, instead of treating every connection as
    /// request/response.
    pub fn with_streaming_domain(mut self, config: StreamingConfig) -> Self {
        self.streaming = Some(config);
        self
    }

    pub fn build(self) -> Server {
        Server {
            routes: Rc::new(self.routes),
            compressor: self.compressor,
            streaming: self.streaming,
            shard_id: self.shard_id,
            next_child_local_id: Rc::new(Cell::new(0)),
        }
    }
}

#[derive(Clone)]
pub struct Server {
    routes: Rc<HashMap<u64, Route>>,
    compressor: Option<Arc<dyn fairway_codec::Compressor>>,
    streaming: Option<StreamingConfig>,
    shard_id: ShardId,
    next_child_local_id: Rc<Cell<u64>>,
}

impl Server {
    /// Accept negotiation on `stream` and spawn the send/receive loops.
    /// Must be called from within a running `LocalSet`.
    pub async fn serve<S>(&self, mut stream: S) -> Result<ServerConnection, RpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let handshake_codec = FrameCodec::new();
        let offer = handshake_codec
            .read_negotiation(&mut stream)
            .await?
            .ok_or_else(|| RpcError::new(RpcErrorKind::ConnectionClosed))?;
        let offer = NegotiatedFeatures::from_frame(&offer);

        // The server accepts whatever subset it can honor; for the
        // connection engine that's everything the client asked for that it
        // recognizes (unknown features were already dropped in `from_frame`).
        handshake_codec
            .write_negotiation(&mut stream, &offer.to_frame())
            .await?;

        let codec = FrameCodec::new()
            .with_timeout(offer.timeout_enabled)
            .with_compressor(self.compressor.clone());

        if let (Some(_parent_id), Some(streaming)) = (offer.stream_parent, &self.streaming) {
            // `_parent_id` only selects which domain instance to register
            // with (via `streaming.domain`, resolved on `parent_shard`); the
            // child is filed in that domain's map under an id this server
            // assigns itself, per the wire contract.
            let child_id = ConnectionId::new(self.shard_id, self.next_child_local_id());
            let (reader, _writer) = tokio::io::split(stream);
            let queue = fairway_rt::sync::BoundedQueue::new(streaming.queue_capacity);
            let semaphore = fairway_rt::sync::WeightedSemaphore::new(streaming.byte_capacity as usize);
            let handle = crate::stream::StreamChildHandle::new(child_id, queue.clone());
            crate::stream::register_with_parent(&streaming.parent_shard, streaming.domain.clone(), handle).await?;
            crate::stream::run_stream_child(codec, reader, queue, semaphore, streaming.byte_capacity).await;
            let _ = crate::stream::deregister_from_parent(&streaming.parent_shard, streaming.domain.clone(), child_id).await;
            // The stream child already ran to completion above, so there's
            // no send/receive loop left to hand back; report it as a closed
            // connection with nothing for `stop` to join.
            let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
            let shared = ConnectionShared::new(codec, clock);
            shared.mark_closed();
            return Ok(ServerConnection {
                shared,
                loops: Rc::new(RefCell::new(None)),
            });
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let shared = ConnectionShared::new(codec, clock);

        let (reader, writer) = tokio::io::split(stream);
        let send = fairway_rt::spawn_local(send_loop(Rc::clone(&shared), writer));
        let receive = fairway_rt::spawn_local(receive_loop(Rc::clone(&shared), Rc::clone(&self.routes), reader));
        let loops = Rc::new(RefCell::new(Some(LoopHandles { send, receive })));

        Ok(ServerConnection {
            shared,
            loops,
        })
    }

    fn next_child_local_id(&self) -> u64 {
        let id = self.next_child_local_id.get();
        self.next_child_local_id.set(id + 1);
        id
    }
}

/// One accepted connection on the server side: the routing table in
/// [`Server`] is reusable across many connections, but `abort`/`stop`/state
/// are per-connection, so they live here rather than on `Server` itself.
pub struct ServerConnection {
    shared: Rc<ConnectionShared>,
    loops: Rc<RefCell<Option<LoopHandles>>>,
}

impl ServerConnection {
    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// §4.5.6: close the read side and flip into the `Error` state. Same
    /// cooperative-race mechanism as `Client::abort`.
    pub fn abort(&self) {
        self.shared.abort();
    }

    /// `abort`, then wait for the reply gate to drain and for both loop
    /// tasks to finish. The reply gate drains independently of the receive
    /// loop exiting: dispatch runs as its own spawned task per request, so
    /// the receive loop itself may already be done reading while replies
    /// are still in flight.
    pub async fn stop(&self) {
        self.abort();
        self.shared.reply_gate.close().await;
        let loops = self.loops.borrow_mut().take();
        if let Some(loops) = loops {
            let _ = loops.send.await;
            loops.receive.await;
        }
    }
}

/// The server-side receive loop (§4.5.3): look up the handler for each
/// request's verb, convert a relative timeout into an absolute deadline,
/// dispatch (inline or via the route's isolation group), and push the
/// reply onto the send loop's FIFO. A missing handler gets the fixed
/// `UNKNOWN_VERB` exception reply instead of ever reaching a handler.
async fn receive_loop<R>(shared: Rc<ConnectionShared>, routes: Rc<HashMap<u64, Route>>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    loop {
        if shared.is_closed() {
            break;
        }
        let frame = tokio::select! {
            biased;
            _ = shared.abort_notify.notified() => break,
            result = shared.codec.read_request(&mut reader) => match result {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(target: "fairway::rpc", error = %err, "server receive loop: protocol error");
                    break;
                }
            },
        };

        let deadline = frame.timeout_ms.and_then(|ms| {
            if ms == u64::MAX {
                None
            } else {
                Some(Deadline::at(shared.clock.now() + std::time::Duration::from_millis(ms)))
            }
        });

        let Some(route) = routes.get(&frame.verb) else {
            shared.push(OutboundItem::Response(fairway_codec::ResponseFrame {
                message_id: -frame.message_id,
                payload: exception::encode_unknown_verb(frame.verb),
            }));
            continue;
        };

        // A gate entry already denied (connection stopping) means the reply
        // would never be flushed anyway; drop the request rather than
        // dispatching a handler nobody will hear back from.
        let Ok(reply_permit) = shared.reply_gate.enter() else {
            continue;
        };

        let message_id = frame.message_id;
        let payload = frame.payload;
        let shared_for_reply = Rc::clone(&shared);

        match &route.handler {
            RouteHandler::Local(handler) => {
                let handler = Rc::clone(handler);
                fairway_rt::spawn_local(async move {
                    let response = run_with_panic_capture(handler.call(payload, deadline)).await;
                    push_reply(&shared_for_reply, message_id, response);
                    drop(reply_permit);
                });
            }
            RouteHandler::Isolated(handler, isolation) => {
                let handler = Arc::clone(handler);
                let isolation = isolation.clone();
                fairway_rt::spawn_local(async move {
                    let result = isolation
                        .submit(move || async move { run_with_panic_capture(handler(payload, deadline)).await })
                        .await;
                    let response = result.unwrap_or_else(|_| Err(RpcError::new(RpcErrorKind::ConnectionClosed)));
                    push_reply(&shared_for_reply, message_id, response);
                    drop(reply_permit);
                });
            }
        }
    }

    shared.mark_closed();
}

/// Runs a handler's future as its own local task so a panic surfaces as a
/// `JoinError` instead of unwinding through the receive loop (or through
/// `ShardHandle::submit`, for isolated routes), then turns that into a
/// handler-exception reply rather than losing the call.
async fn run_with_panic_capture<Fut>(fut: Fut) -> Result<Bytes, RpcError>
where
    Fut: Future<Output = Result<Bytes, RpcError>> + 'static,
{
    match tokio::task::spawn_local(fut).await {
        Ok(response) => response,
        Err(join_err) => {
            let message = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "handler task was cancelled".to_string()
            };
            tracing::warn!(target: "fairway::rpc", message = %message, "handler panicked");
            Err(RpcError::new(RpcErrorKind::HandlerException { message }))
        }
    }
}

fn push_reply(shared: &ConnectionShared, message_id: i64, result: Result<Bytes, RpcError>) {
    let frame = match result {
        Ok(payload) => fairway_codec::ResponseFrame { message_id, payload },
        Err(err) => fairway_codec::ResponseFrame {
            message_id: -message_id,
            payload: exception::encode_handler_exception(&err.to_string()),
        },
    };
    shared.push(OutboundItem::Response(frame));
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}
