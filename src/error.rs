//! Pool errors.

use thiserror::Error;

/// Result type for pool operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors that can occur while managing a pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum AllocError {
    /// The buffer cannot hold even the sentinel header.
    #[error("buffer of {capacity} bytes cannot hold a pool, at least {required} bytes are needed")]
    InsufficientCapacity { capacity: usize, required: usize },

    /// No gap, the tail included, can hold the request. Also returned when
    /// the request size overflows once the header is added.
    #[error("out of memory: no gap can hold a request of {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The pointer is not the payload of a live block of this pool.
    #[error("pointer {addr:#x} is not a live allocation of this pool")]
    InvalidPointer { addr: usize },

    /// The handle does not resolve to a live allocation.
    #[error("handle {index}:{generation} is stale or does not belong to this pool")]
    InvalidHandle { index: u32, generation: u32 },

    /// Every slot of the handle table is in use.
    #[error("handle table is full ({slots} slots in use)")]
    HandlesExhausted { slots: usize },

    /// The operating system refused to map the requested memory.
    #[error("failed to map {len} bytes of memory")]
    MapFailed { len: usize },
}

impl AllocError {
    /// Returns true if retrying after a [`crate::Pool::free`] or a
    /// [`crate::Pool::defragment`] might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::HandlesExhausted { .. })
    }
}
