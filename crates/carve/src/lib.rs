//! Memory resources that carve typed sub-allocations out of one caller-
//! supplied, fixed-size byte buffer.
//!
//! The crate targets freestanding environments (embedded targets, kernels,
//! engines with deterministic latency budgets) where the host picks an
//! allocation policy per region instead of relying on a global heap. Every
//! resource borrows its buffer, writes only block metadata into it, and is
//! `no_std`.
//!
//! # Available Resources
//!
//! | Resource | Allocate | Free | Best Use Case |
//! |----------|----------|------|---------------|
//! | [`LinearResource`] | O(1) | unsupported (bulk [`reset`](LinearResource::reset)) | per-frame scratch, parse-then-reset |
//! | [`StaticLinearResource`] | O(1) | unsupported | scratch with no runtime buffer, shared by `(bank, size)` key |
//! | [`StackResource`] | O(1) | O(1), LIFO only | nested lifetimes, unwind-in-order workloads |
//! | [`PoolResource`] | O(1) | O(1), O(n) guarded | many same-sized objects |
//! | [`DynamicResource`] | O(n) best fit | O(1) with a free neighbour | general purpose, mixed sizes |
//! | [`VoidResource`] | always fails | no-op | deliberate sink |
//!
//! # Usage Example
//!
//! ```rust
//! use carve::DynamicResource;
//!
//! let mut backing = [0u8; 4096];
//! let memory = DynamicResource::new(&mut backing, 8);
//!
//! let ptr = memory.allocate(200).unwrap();
//! // ... use the 200 bytes ...
//! memory.free(ptr).unwrap();
//! ```
//!
//! Any resource can sit behind `&dyn Resource`, which is how the
//! `carve-poly` façade adapts them to container allocators.
//!
//! # Failure Model
//!
//! Fallible operations return [`AllocError`] / [`FreeError`] and never
//! mutate state on the error path. Each resource additionally carries a
//! [`FailurePolicy`] fired on every refusal; the `panic-on-failure` cargo
//! feature turns the default policy into a panic for builds that prefer to
//! die loudly over limping.
//!
//! # Thread Safety
//!
//! Resources are single-threaded: methods take `&self` with interior
//! mutability, and raw pointers keep every resource `!Sync`. Callers that
//! share a resource across threads must wrap it in their own mutual
//! exclusion. The only process-global state is the static-linear bank
//! registry, which carries its own spin lock.

#![cfg_attr(not(test), no_std)]

pub mod addr;
mod banks;
mod dynamic;
pub mod error;
mod linear;
mod pool;
mod resource;
mod stack;
mod void;

pub use self::{
    banks::{BANK_POOL_BYTES, MAX_BANKS, StaticLinearResource},
    dynamic::DynamicResource,
    error::{AllocError, FreeError},
    linear::LinearResource,
    pool::PoolResource,
    resource::{FailurePolicy, Resource, ResourceKind, resource_eq},
    stack::StackResource,
    void::VoidResource,
};
