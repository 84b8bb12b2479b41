use thiserror::Error;

/// Returned when no free block can satisfy an allocation.
///
/// This is reported only after every run of adjacent free blocks
/// encountered by the search has been merged.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error(
    "Cannot allocate {requested} bytes: \
     the largest free block holds {largest_free} bytes"
)]
pub struct CapacityError
{
    /// Number of bytes requested, before rounding.
    pub requested: usize,

    /// Content size of the largest free block at the time of failure.
    pub largest_free: usize,
}

/// Returned when a pointer cannot be freed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("Cannot free {address:#x}: {reason}")]
pub struct InvalidFreeError
{
    /// The address that was passed in.
    pub address: usize,

    /// Why the address was rejected.
    pub reason: InvalidFreeReason,
}

/// Why a pointer could not be freed.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum InvalidFreeReason
{
    #[error("the arena has not been initialized")]
    Uninitialized,

    #[error("the address lies outside the arena")]
    OutOfRange,

    #[error("the address is not the content of a block")]
    NotABlock,

    #[error("the block is not allocated")]
    NotAllocated,
}
