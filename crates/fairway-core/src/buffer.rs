//! Scoped buffers (C1): an ownership-tracked byte container that is either a
//! single inline chunk or an ordered list of fixed-size chunks, shareable
//! across tasks on one shard and transferable across shards via a
//! release-on-drop handle.
//!
//! Two types model the two phases a buffer goes through:
//!
//! - [`RecvBuf`] is the mutable, uniquely-owned phase: something is filling
//!   it (typically a socket read) and nobody else can see it yet.
//! - [`SendBuf`] is the frozen, shareable phase: the bytes are fixed and any
//!   number of tasks — possibly on other shards — can hold a reference.
//!
//! `RecvBuf::freeze` is the one-way transition between them, mirroring the
//! `WritableBuffer -> ReadableBuffer` split used throughout the teaching
//! reference this crate is grounded on.

use crate::error::CoreError;
use std::sync::Arc;

/// The smallest chunk size we allow. 28 bytes is the longest fixed header in
/// the wire protocol (an 8-byte timeout prefix plus an 8-byte verb, an
/// 8-byte message id, and a 4-byte length), so anything smaller could not
/// hold a single frame header in its first chunk.
pub const MIN_CHUNK_SIZE: usize = 28;

/// The chunk size used when a caller doesn't have a reason to pick another
/// one. A power of two comfortably larger than [`MIN_CHUNK_SIZE`].
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// A single fixed-capacity chunk, exclusively owned while it is being filled.
struct OwnedChunk {
    data: Box<[u8]>,
    filled: usize,
}

impl OwnedChunk {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.filled
    }
}

/// The writable, exclusively-owned phase of a scoped buffer. Something is
/// filling it — typically a socket read loop — and it has not been shared
/// with anyone yet.
pub struct RecvBuf {
    chunk_size: usize,
    chunks: Vec<OwnedChunk>,
    target_len: usize,
}

impl RecvBuf {
    /// Construct a buffer that will eventually hold exactly `size` bytes,
    /// using `chunk_size`-sized chunks (or a single smaller inline chunk if
    /// `size <= chunk_size`).
    ///
    /// Fails only if the allocator fails, and only if `chunk_size` is below
    /// [`MIN_CHUNK_SIZE`] — both are programming errors in the strict sense,
    /// but the former is reported rather than panicking since callers size
    /// buffers from untrusted wire lengths.
    pub fn with_size(size: usize, chunk_size: usize) -> Result<Self, CoreError> {
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(CoreError::ChunkSizeTooSmall {
                requested: chunk_size,
                minimum: MIN_CHUNK_SIZE,
            });
        }
        let mut chunks = Vec::new();
        if size == 0 {
            // A zero-length buffer still gets one zero-capacity chunk so
            // `front_chunk_mut` has something (empty) to hand back.
            chunks.push(OwnedChunk::new(0));
        } else {
            let mut remaining = size;
            while remaining > 0 {
                let cap = remaining.min(chunk_size);
                chunks.push(OwnedChunk::new(cap));
                remaining -= cap;
            }
        }
        Ok(Self {
            chunk_size,
            chunks,
            target_len: size,
        })
    }

    /// Construct a buffer of the given size using [`DEFAULT_CHUNK_SIZE`].
    pub fn with_default_chunking(size: usize) -> Result<Self, CoreError> {
        Self::with_size(size, DEFAULT_CHUNK_SIZE)
    }

    /// Total number of bytes this buffer will hold once fully filled.
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Number of bytes written so far.
    pub fn filled_len(&self) -> usize {
        self.chunks.iter().map(|c| c.filled).sum()
    }

    /// Returns a writable slice into the first chunk with unfilled capacity,
    /// guaranteed to be at least `chunk_size` bytes unless the buffer itself
    /// is smaller than that. Returns an empty slice once the buffer is fully
    /// filled.
    pub fn front_chunk_mut(&mut self) -> &mut [u8] {
        match self.chunks.iter_mut().find(|c| c.remaining() > 0) {
            Some(chunk) => {
                let start = chunk.filled;
                &mut chunk.data[start..]
            }
            None => &mut [],
        }
    }

    /// Advance the fill cursor by `n` bytes after writing into the slice
    /// returned by [`Self::front_chunk_mut`].
    ///
    /// Panics if `n` exceeds the remaining capacity of the current front
    /// chunk — advancing past what was actually written is a programming
    /// error, not a recoverable one.
    pub fn advance_filled(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let chunk = self
            .chunks
            .iter_mut()
            .find(|c| c.remaining() > 0)
            .expect("advance_filled called with no remaining capacity");
        assert!(
            n <= chunk.remaining(),
            "advance_filled({n}) exceeds remaining capacity {}",
            chunk.remaining()
        );
        chunk.filled += n;
    }

    /// Whether every chunk has been completely filled.
    pub fn is_complete(&self) -> bool {
        self.filled_len() == self.target_len
    }

    /// Freeze the buffer into a shareable [`SendBuf`]. Any unfilled tail
    /// capacity is truncated away — only the logically filled prefix is
    /// visible afterwards.
    pub fn freeze(self) -> SendBuf {
        let chunks: Vec<Arc<[u8]>> = self
            .chunks
            .into_iter()
            .map(|c| Arc::from(&c.data[..c.filled]))
            .collect();
        let len = chunks.iter().map(|c| c.len()).sum();
        SendBuf {
            inner: Arc::new(SendBufInner {
                chunks,
                chunk_size: self.chunk_size,
            }),
            start: 0,
            len,
            _origin: None,
        }
    }
}

struct SendBufInner {
    chunks: Vec<Arc<[u8]>>,
    chunk_size: usize,
}

/// A release-on-drop handle attached to a [`SendBuf`] that crossed shards.
///
/// Dropping it runs the closure exactly once, which is expected to post a
/// release message back to the origin shard (see `fairway_rt::cross_shard`).
/// The recipient shard must treat the bytes behind the `SendBuf` as
/// read-only for as long as it holds one — writing to them is undefined
/// behavior by contract, not by the type system, matching the "remote
/// handle" design note.
pub struct RemoteHandle {
    release: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl RemoteHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle").finish_non_exhaustive()
    }
}

/// The frozen, shareable phase of a scoped buffer.
///
/// Cloning a `SendBuf` (via [`Self::share`]) aliases the same chunk storage;
/// no bytes are copied. `trim_front` only ever moves the logical window
/// forward, it never mutates shared storage.
#[derive(Clone)]
pub struct SendBuf {
    inner: Arc<SendBufInner>,
    start: usize,
    len: usize,
    _origin: Option<Arc<RemoteHandle>>,
}

impl SendBuf {
    /// Build a `SendBuf` directly from already-final bytes, as a single
    /// inline chunk. Convenient for tests and for small protocol messages
    /// (negotiation replies, exception payloads) assembled in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len();
        Self {
            inner: Arc::new(SendBufInner {
                chunks: vec![Arc::from(bytes.into_boxed_slice())],
                chunk_size: DEFAULT_CHUNK_SIZE,
            }),
            start: 0,
            len,
            _origin: None,
        }
    }

    /// Logical length of the buffer, i.e. what remains after any
    /// [`Self::trim_front`] calls.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read-only view into the first chunk of remaining data. May be shorter
    /// than the chunk size if this is the last (or only) chunk.
    pub fn front_chunk(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        let (chunk_idx, offset) = self.locate(self.start);
        let chunk = &self.inner.chunks[chunk_idx];
        let available_in_chunk = chunk.len() - offset;
        let take = available_in_chunk.min(self.len);
        &chunk[offset..offset + take]
    }

    /// Advance the logical start past `n` bytes.
    ///
    /// Panics if `n` exceeds the current logical length — trimming beyond
    /// what exists is a programming error per contract.
    pub fn trim_front(&mut self, n: usize) {
        assert!(
            n <= self.len,
            "trim_front({n}) exceeds remaining length {}",
            self.len
        );
        self.start += n;
        self.len -= n;
    }

    /// Copy the entire remaining logical window out into a contiguous
    /// `Vec<u8>`. Used by the codec layer once a frame's payload has been
    /// fully buffered and needs to be handed to application code as a plain
    /// byte slice.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        let mut remaining = self.len;
        let (mut chunk_idx, mut offset) = self.locate(self.start);
        while remaining > 0 {
            let chunk = &self.inner.chunks[chunk_idx];
            let available = chunk.len() - offset;
            let take = available.min(remaining);
            out.extend_from_slice(&chunk[offset..offset + take]);
            remaining -= take;
            chunk_idx += 1;
            offset = 0;
        }
        out
    }

    /// Produce an alias of this buffer with its own independent
    /// [`RemoteHandle`] lifecycle but the same underlying storage — no
    /// bytes are copied. Used for fan-out to multiple readers on the same
    /// shard.
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// Produce an alias of this buffer tagged with a `RemoteHandle` whose
    /// release callback fires when every cross-shard-shared clone (and this
    /// one) has been dropped. Used when a buffer crosses shard boundaries:
    /// the recipient gets a read-only alias, and the origin shard is
    /// notified via `on_release` once nobody on the recipient side needs the
    /// bytes any more.
    pub fn share_cross_shard(&self, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            start: self.start,
            len: self.len,
            _origin: Some(Arc::new(RemoteHandle::new(on_release))),
        }
    }

    /// The chunk size this buffer was built with, for callers that need to
    /// size a follow-up `RecvBuf` the same way.
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    fn locate(&self, logical_offset: usize) -> (usize, usize) {
        let mut remaining = logical_offset;
        for (idx, chunk) in self.inner.chunks.iter().enumerate() {
            if remaining < chunk.len() {
                return (idx, remaining);
            }
            remaining -= chunk.len();
        }
        // logical_offset == total length: point one past the last chunk.
        (self.inner.chunks.len().saturating_sub(1), 0)
    }
}

impl std::fmt::Debug for SendBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendBuf")
            .field("len", &self.len)
            .field("chunks", &self.inner.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_chunks() {
        let err = RecvBuf::with_size(100, 16).unwrap_err();
        assert!(matches!(err, CoreError::ChunkSizeTooSmall { .. }));
    }

    #[test]
    fn fills_and_freezes_single_chunk() {
        let mut buf = RecvBuf::with_size(10, DEFAULT_CHUNK_SIZE).unwrap();
        assert!(!buf.is_complete());
        let chunk = buf.front_chunk_mut();
        assert!(chunk.len() >= 10);
        chunk[..10].copy_from_slice(b"0123456789");
        buf.advance_filled(10);
        assert!(buf.is_complete());

        let send = buf.freeze();
        assert_eq!(send.len(), 10);
        assert_eq!(send.to_contiguous(), b"0123456789");
    }

    #[test]
    fn fills_across_multiple_chunks() {
        let mut buf = RecvBuf::with_size(50, MIN_CHUNK_SIZE).unwrap();
        // 50 bytes over 28-byte chunks spans two chunks (28 + 22).
        let mut total_written = 0;
        let payload: Vec<u8> = (0..50u8).collect();
        while total_written < payload.len() {
            let chunk = buf.front_chunk_mut();
            let take = chunk.len().min(payload.len() - total_written);
            chunk[..take].copy_from_slice(&payload[total_written..total_written + take]);
            buf.advance_filled(take);
            total_written += take;
        }
        let send = buf.freeze();
        assert_eq!(send.to_contiguous(), payload);
    }

    #[test]
    fn trim_front_advances_window() {
        let send = SendBuf::from_bytes(b"hello world".to_vec());
        let mut view = send.share();
        view.trim_front(6);
        assert_eq!(view.to_contiguous(), b"world");
        assert_eq!(view.len(), 5);
    }

    #[test]
    #[should_panic(expected = "exceeds remaining length")]
    fn trim_front_past_end_panics() {
        let mut send = SendBuf::from_bytes(b"hi".to_vec());
        send.trim_front(10);
    }

    #[test]
    fn share_cross_shard_runs_release_once_all_aliases_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let released = Arc::new(AtomicUsize::new(0));
        let send = SendBuf::from_bytes(b"payload".to_vec());
        {
            let released = Arc::clone(&released);
            let remote = send.share_cross_shard(move || {
                released.fetch_add(1, Ordering::SeqCst);
            });
            let _alias = remote.share();
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
