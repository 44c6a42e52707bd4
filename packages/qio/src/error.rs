// queue error types.

use blocklist::AllocError;
use std::sync::Arc;
use thiserror::Error;


// ==== base error types ====


/// Error for using a queue that has been closed or hung up
///
/// Carries the reason recorded when the queue was closed.
#[derive(Error, Debug, Clone, Eq, PartialEq, Hash)]
#[error("{reason}")]
pub struct ClosedError {
    /// The reason recorded at close or hangup time
    pub reason: Arc<str>,
}

/// Error for a non-blocking producer finding the queue at or over its limit
///
/// The data offered has been dropped.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("queue full")]
pub struct FullError;

/// Error for a blocked reader or writer that was interrupted
///
/// A writer is only ever interrupted after the chunk it was writing has been queued in full, so
/// retrying never duplicates or truncates data.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("interrupted")]
pub struct InterruptedError;


// ==== compound error types ====


macro_rules! compound_from {
    ($compound:ident {$(
        $variant:ident($inner:ty),
    )*})=>{$(
        impl From<$inner> for $compound {
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    )*};
}

/// Error for an operation on a queue
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum QueueError {
    /// The queue is closed
    #[error(transparent)]
    Closed(ClosedError),
    /// The queue was full and the data was dropped
    #[error(transparent)]
    Full(FullError),
    /// The operation was interrupted while blocked
    #[error(transparent)]
    Interrupted(InterruptedError),
    /// A sleeping allocation failed
    #[error(transparent)]
    Alloc(AllocError),
}

compound_from!(QueueError {
    Closed(ClosedError),
    Full(FullError),
    Interrupted(InterruptedError),
    Alloc(AllocError),
});

impl QueueError {
    // construct a closed error from a recorded reason.
    pub(crate) fn closed(reason: &Arc<str>) -> Self {
        ClosedError { reason: Arc::clone(reason) }.into()
    }

    /// The close reason, if this is a [`QueueError::Closed`].
    pub fn closed_reason(&self) -> Option<&str> {
        match self {
            QueueError::Closed(ClosedError { reason }) => Some(reason),
            _ => None,
        }
    }
}
