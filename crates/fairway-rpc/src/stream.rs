//! Stream children (§4.5.5): a connection that negotiated `STREAM_PARENT`
//! is folded into a named streaming domain living on its parent's shard,
//! and its frames are pushed into a bounded, semaphore-guarded queue so a
//! misbehaving child can't grow unbounded memory or stall the consumer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use fairway_codec::{FrameCodec, StreamFrame};
use fairway_core::ConnectionId;
use fairway_rt::sync::{BoundedQueue, SemaphorePermit, WeightedSemaphore};
use fairway_rt::ShardHandle;
use tokio::io::AsyncRead;

use crate::error::{RpcError, RpcErrorKind};

thread_local! {
    static DOMAINS: RefCell<HashMap<String, StreamDomain>> = RefCell::new(HashMap::new());
}

/// One item pulled off a stream child's inbound queue.
pub enum StreamItem {
    Payload(Bytes, #[allow(dead_code)] SemaphorePermit),
    EndOfStream,
}

/// A handle a parent can use to pull frames from one registered child.
#[derive(Clone)]
pub struct StreamChildHandle {
    pub id: ConnectionId,
    queue: BoundedQueue<StreamItem>,
    eos_seen: Rc<RefCell<bool>>,
}

impl StreamChildHandle {
    pub fn new(id: ConnectionId, queue: BoundedQueue<StreamItem>) -> Self {
        Self {
            id,
            queue,
            eos_seen: Rc::new(RefCell::new(false)),
        }
    }

    /// Pull the next item. Once end-of-stream has been observed, every
    /// further call keeps returning it instead of erroring on the
    /// now-aborted queue underneath: reads past the end of a stream are
    /// sticky, not a one-shot event the consumer can miss.
    pub async fn pull(&self) -> StreamItem {
        if *self.eos_seen.borrow() {
            return StreamItem::EndOfStream;
        }
        match self.queue.pop().await {
            Ok(StreamItem::EndOfStream) | Err(_) => {
                *self.eos_seen.borrow_mut() = true;
                StreamItem::EndOfStream
            }
            Ok(item) => item,
        }
    }
}

/// The shard-local registry of streaming domains by name. Lives on whatever
/// shard calls [`StreamDomain::register`] for that name; children
/// elsewhere reach it only via [`ShardHandle::submit`] against that shard.
#[derive(Clone)]
pub struct StreamDomain {
    children: Rc<RefCell<HashMap<ConnectionId, StreamChildHandle>>>,
}

impl StreamDomain {
    /// Create (or replace) the domain named `name` on the current shard.
    pub fn register(name: &str) -> Self {
        let domain = StreamDomain {
            children: Rc::new(RefCell::new(HashMap::new())),
        };
        DOMAINS.with(|domains| domains.borrow_mut().insert(name.to_string(), domain.clone()));
        domain
    }

    pub fn lookup(name: &str) -> Option<StreamDomain> {
        DOMAINS.with(|domains| domains.borrow().get(name).cloned())
    }

    pub fn child(&self, id: ConnectionId) -> Option<StreamChildHandle> {
        self.children.borrow().get(&id).cloned()
    }

    fn insert(&self, handle: StreamChildHandle) {
        self.children.borrow_mut().insert(handle.id, handle);
    }

    fn remove(&self, id: ConnectionId) -> Option<StreamChildHandle> {
        self.children.borrow_mut().remove(&id)
    }
}

/// Register `handle` under `domain_name` on `parent_shard`, crossing shards
/// via `submit` since the domain's child map is `Rc`-based and lives only
/// on the owning shard.
pub async fn register_with_parent(
    parent_shard: &ShardHandle,
    domain_name: String,
    handle: StreamChildHandle,
) -> Result<(), RpcError> {
    let found = parent_shard
        .submit(move || {
            let found = match StreamDomain::lookup(&domain_name) {
                Some(domain) => {
                    domain.insert(handle);
                    true
                }
                None => false,
            };
            async move { found }
        })
        .await?;
    if found {
        Ok(())
    } else {
        Err(RpcError::new(RpcErrorKind::ProtocolViolation {
            reason: "unknown streaming domain".to_string(),
        }))
    }
}

pub async fn deregister_from_parent(
    parent_shard: &ShardHandle,
    domain_name: String,
    id: ConnectionId,
) -> Result<(), RpcError> {
    parent_shard
        .submit(move || {
            if let Some(domain) = StreamDomain::lookup(&domain_name) {
                domain.remove(id);
            }
            async move {}
        })
        .await?;
    Ok(())
}

/// Drive a child connection's inbound side: read stream frames, charge
/// bytes-in-flight against `semaphore` (sized to `capacity` units total),
/// and push into `queue`. A payload length of `0xFFFFFFFF` (the
/// end-of-stream marker) stops the loop from pulling any further frames,
/// matching §4.5.5. A single frame larger than `capacity` can never be
/// admitted no matter how much the semaphore drains, so it closes the
/// child instead of acquiring forever — the oversized-message deadlock
/// the bounded queue exists to prevent.
pub async fn run_stream_child<R>(
    codec: FrameCodec,
    mut reader: R,
    queue: BoundedQueue<StreamItem>,
    semaphore: WeightedSemaphore,
    capacity: u32,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match codec.read_stream(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(target: "fairway::rpc", error = %err, "stream child: protocol error");
                break;
            }
        };

        match frame {
            StreamFrame::EndOfStream => {
                let _ = queue.push_eventually(StreamItem::EndOfStream).await;
                break;
            }
            StreamFrame::Payload(payload) => {
                let units = (payload.len() as u32).max(1);
                if units > capacity {
                    tracing::warn!(
                        target: "fairway::rpc",
                        len = payload.len(),
                        capacity,
                        "stream payload exceeds child capacity, closing child"
                    );
                    break;
                }
                let permit = match semaphore.acquire(units).await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                if queue.push_eventually(StreamItem::Payload(payload, permit)).await.is_err() {
                    break;
                }
            }
        }
    }

    queue.abort();
    semaphore.break_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn end_of_stream_marker_stops_the_loop_and_reads_past_it_stay_sticky() {
        let (mut client_side, server_side) = tokio::io::duplex(4096);
        let codec = FrameCodec::new();
        for _ in 0..3 {
            codec
                .write_stream(&mut client_side, &StreamFrame::Payload(Bytes::from_static(b"a")))
                .await
                .unwrap();
        }
        codec
            .write_stream(&mut client_side, &StreamFrame::EndOfStream)
            .await
            .unwrap();
        drop(client_side);

        let queue = BoundedQueue::new(4);
        let semaphore = WeightedSemaphore::new(1024);
        let handle = StreamChildHandle::new(ConnectionId::new(fairway_core::ShardId(0), 1), queue.clone());
        run_stream_child(codec, server_side, queue, semaphore, 1024).await;

        for _ in 0..3 {
            match handle.pull().await {
                StreamItem::Payload(bytes, _permit) => assert_eq!(&bytes[..], b"a"),
                StreamItem::EndOfStream => panic!("expected a payload frame"),
            }
        }
        // The end-of-stream marker is sticky: every read past it, however
        // many, observes end-of-stream again rather than an aborted-queue
        // error.
        assert!(matches!(handle.pull().await, StreamItem::EndOfStream));
        assert!(matches!(handle.pull().await, StreamItem::EndOfStream));
    }

    #[tokio::test]
    async fn frame_larger_than_capacity_closes_the_child_instead_of_deadlocking() {
        let (mut client_side, server_side) = tokio::io::duplex(8192);
        let codec = FrameCodec::new();
        codec
            .write_stream(&mut client_side, &StreamFrame::Payload(Bytes::from(vec![b'x'; 100])))
            .await
            .unwrap();
        drop(client_side);

        let queue = BoundedQueue::new(4);
        let semaphore = WeightedSemaphore::new(50);
        // Capacity (50) is below the single frame's size (100): no amount
        // of draining could ever admit it, so the loop must close the
        // child rather than block on `acquire` forever.
        run_stream_child(codec, server_side, queue.clone(), semaphore.clone(), 50).await;

        assert!(semaphore.is_broken());
        assert!(queue.pop().await.is_err());
    }

    #[tokio::test]
    async fn payload_within_capacity_is_admitted_and_permit_released_on_drop() {
        let (mut client_side, server_side) = tokio::io::duplex(8192);
        let codec = FrameCodec::new();
        codec
            .write_stream(&mut client_side, &StreamFrame::Payload(Bytes::from(vec![b'x'; 40])))
            .await
            .unwrap();
        codec
            .write_stream(&mut client_side, &StreamFrame::EndOfStream)
            .await
            .unwrap();
        drop(client_side);

        let queue = BoundedQueue::new(4);
        let semaphore = WeightedSemaphore::new(50);
        run_stream_child(codec, server_side, queue.clone(), semaphore.clone(), 50).await;

        match queue.pop().await.unwrap() {
            StreamItem::Payload(bytes, permit) => {
                assert_eq!(bytes.len(), 40);
                drop(permit);
                assert_eq!(semaphore.available_units(), 50);
            }
            StreamItem::EndOfStream => panic!("expected the payload frame first"),
        }
    }
}
