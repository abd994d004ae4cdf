//! The stable error domain shared by every `fairway-*` crate.
//!
//! Each downstream crate defines its own `thiserror` enum for errors that are
//! specific to its layer (connection-engine timeouts, codec protocol
//! violations, and so on) and converts into [`CoreError`] only at the points
//! where that specificity no longer matters to the caller — e.g. when a
//! buffer allocation fails inside the codec. `CoreError` itself only needs to
//! describe the handful of failure modes that are truly cross-cutting.

use core::fmt;

/// Cross-cutting failures that can originate from the buffer or clock layer
/// and need to be observable by every crate above them.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A buffer could not be constructed because the allocator failed.
    #[error("allocation failed while constructing a {requested}-byte buffer")]
    Allocation { requested: usize },

    /// A caller asked for a chunk size below [`crate::buffer::MIN_CHUNK_SIZE`].
    #[error("chunk size {requested} is below the minimum of {minimum}")]
    ChunkSizeTooSmall { requested: usize, minimum: usize },
}

/// A `Display`-only wrapper used when a lower layer needs to attach an
/// opaque cause without pulling in that layer's error type as a dependency.
#[derive(Debug)]
pub struct BoxedCause(pub Box<dyn fmt::Display + Send + Sync + 'static>);

impl fmt::Display for BoxedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
