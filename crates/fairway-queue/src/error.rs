//! Errors from registering classes and enqueueing requests. The queue's
//! *dispatch* path never fails this way — see [`crate::queue::DispatchFailure`]
//! for how a misbehaving `on_dispatch` callback is reported instead.

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("class shares must be at least 1")]
    ZeroShares,

    #[error("request weight must be at least 1")]
    ZeroWeight,

    #[error("class handle does not refer to a registered class")]
    UnknownClass,

    #[error("class was unregistered")]
    ClassDestroyed,

    #[error("class has queued or in-flight requests and cannot be unregistered")]
    ClassBusy,
}
