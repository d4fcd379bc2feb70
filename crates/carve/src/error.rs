//! Failure types shared by every resource.
//!
//! Each refusal class gets its own variant so callers can match on the exact
//! cause; the [`FailurePolicy`](crate::FailurePolicy) hook fires on every
//! error before it is returned. No operation that fails mutates resource
//! state.

use snafu::Snafu;

/// Errors returned by [`Resource::allocate`](crate::Resource::allocate).
#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum AllocError {
    /// Construction detected an unusable configuration; the resource refuses
    /// every operation.
    #[snafu(display("resource construction was invalid, refusing to allocate"))]
    InvalidResource {
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The resource rejects zero-size requests.
    #[snafu(display("zero-size allocation request"))]
    ZeroSize {
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The request cannot be fulfilled from the remaining space.
    #[snafu(display("out of space: requested {requested} bytes, {available} available"))]
    OutOfSpace {
        requested: usize,
        available: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// `count * element_size` does not fit in a `usize`.
    #[snafu(display("allocation size overflow: {count} elements of {element_size} bytes"))]
    Overflow {
        count: usize,
        element_size: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Errors returned by [`Resource::free`](crate::Resource::free).
#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum FreeError {
    /// Construction detected an unusable configuration; the resource refuses
    /// every operation.
    #[snafu(display("resource construction was invalid, refusing to free"))]
    InvalidResource {
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The resource never frees individual blocks (linear family).
    #[snafu(display("this resource does not free individual blocks"))]
    Unsupported {
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// Nothing is currently allocated.
    #[snafu(display("nothing is allocated, nothing to free"))]
    NothingAllocated {
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The pointer is not the most recent live allocation (stack resource).
    #[snafu(display("address {address:#x} is not the top of the stack"))]
    NotTopOfStack {
        address: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The pointer lies outside the managed range.
    #[snafu(display("address {address:#x} is outside the managed region"))]
    OutOfRange {
        address: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The pointer does not carry the resource's alignment.
    #[snafu(display("address {address:#x} is not aligned to {alignment} bytes"))]
    Misaligned {
        address: usize,
        alignment: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The pointer does not sit on a block boundary (pool resource).
    #[snafu(display("address {address:#x} does not sit on a {block_size}-byte block boundary"))]
    NotBlockStart {
        address: usize,
        block_size: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The block's header and footer disagree; this is probably not a live
    /// block (dynamic resource).
    #[snafu(display("block metadata at {address:#x} is corrupt or not a block"))]
    CorruptBlock {
        address: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The block is already free.
    #[snafu(display("block at {address:#x} is already free"))]
    DoubleFree {
        address: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}
