use std::io;

/// Error taxonomy for the region-locking core.
///
/// There is no `OwnerLiveness` variant: dead-owner cleanup is handled
/// silently by [`crate::sweeper`] and never surfaces to a caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The lock table has no free slot, or an owner set is full.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A non-blocking request conflicts with an existing lock.
    #[error("would block: conflicting lock held by another owner")]
    WouldBlock,

    /// The handle is missing, stale, or does not belong to this segment.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// The request itself is malformed (e.g. zero range after normalization,
    /// an unsupported command).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Segment create/map/stat/semaphore failure. Any partial state this
    /// process created is rolled back before this error is returned.
    #[error("system failure: {0}")]
    SystemFailure(String),
}

impl Error {
    pub(crate) fn system(context: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Error::SystemFailure(format!("{}: {}", context.into(), source))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::SystemFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
