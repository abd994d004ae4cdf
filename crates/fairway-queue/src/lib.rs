//! A weighted fair queue multiplexing requests from multiple priority
//! classes onto one fixed-capacity dispatch window.
//!
//! Selection is virtual-time scheduling: each class tracks an `accumulated`
//! counter that advances by `weight / shares` every time one of its requests
//! is dispatched, and the class with the smallest `accumulated` goes next.
//! A class that sits idle has its counter forgiven back to the current
//! floor when it re-enters, so a burst of activity after a quiet period
//! doesn't get starved paying off debt it never really owed.

pub mod error;
pub mod queue;

pub use error::QueueError;
pub use queue::{ClassHandle, ClassStats, DispatchFailure, DispatchedRequest, FairQueue, InFlightToken};
