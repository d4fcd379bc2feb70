//! Stack resource: LIFO bump allocation with footer-validated frees.
//!
//! Every block is followed by a footer recording the distance from the
//! previous top of the stack to the new one. Frees read the footer under the
//! current top, recompute where the top block starts, and refuse anything
//! that is not that exact address, so only the most recent live allocation
//! can ever be released.
//!
//! ```text
//! Block layout (top of stack on the right):
//! ┌───────────────────┬──────────────────────────┐
//! │ aligned user data │ footer: distance_to_prev │
//! └───────────────────┴──────────────────────────┘
//!                                                ▲ cursor
//! ```
//!
//! Allocation and free are both O(1).

use core::{cell::Cell, marker::PhantomData, ptr::NonNull};

use dataview::Pod;
use snafu::ensure;

use crate::{
    addr::{Region, align_up},
    error::{AllocError, FreeError, alloc_error, free_error},
    resource::{FailurePolicy, Resource, ResourceKind, TripExt as _},
};

/// Trailing per-block metadata: the byte distance from the previous cursor
/// position to the one this block established.
#[repr(C)]
#[derive(Pod, Clone, Copy, Debug)]
struct StackFooter {
    distance_to_prev: usize,
}

/// A LIFO resource over a caller-supplied buffer.
///
/// # Usage Example
///
/// ```rust
/// use carve::StackResource;
///
/// let mut backing = [0u8; 1024];
/// let memory = StackResource::new(&mut backing, 8);
///
/// let a = memory.allocate(100).unwrap();
/// let b = memory.allocate(100).unwrap();
///
/// // Frees must unwind in reverse allocation order.
/// assert!(memory.free(a).is_err());
/// memory.free(b).unwrap();
/// memory.free(a).unwrap();
/// ```
pub struct StackResource<'buf> {
    region: Region,
    cursor: Cell<usize>,
    valid: bool,
    policy: Cell<FailurePolicy>,
    _buffer: PhantomData<&'buf mut [u8]>,
}

impl<'buf> StackResource<'buf> {
    /// Creates a stack resource over `buffer`.
    ///
    /// `alignment` must be a power of two; it is promoted to at least the
    /// pointer width. The buffer must hold at least one footer.
    pub fn new(buffer: &'buf mut [u8], alignment: usize) -> Self {
        let region = Region::new(buffer, alignment);
        let valid =
            region.alignment().is_power_of_two() && region.span() >= size_of::<StackFooter>();
        let policy = FailurePolicy::default();
        if valid {
            log::debug!(
                "stack resource: {} usable bytes, alignment {}",
                region.span(),
                region.alignment(),
            );
        } else {
            log::debug!("stack resource rejected: bad alignment or buffer below footer size");
            policy.trip(&alloc_error::InvalidResourceSnafu.build());
        }
        Self {
            region,
            cursor: Cell::new(if valid { region.start() } else { 0 }),
            valid,
            policy: Cell::new(policy),
            _buffer: PhantomData,
        }
    }

    /// Replaces the failure policy fired on refused operations.
    #[must_use]
    pub fn with_failure_policy(self, policy: FailurePolicy) -> Self {
        self.policy.set(policy);
        self
    }

    /// Allocates `size` bytes (rounded up to the alignment) plus a trailing
    /// footer. Zero-size requests are rejected.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.try_allocate(size).trip(self.policy.get())
    }

    fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(self.valid, alloc_error::InvalidResourceSnafu);
        ensure!(size != 0, alloc_error::ZeroSizeSnafu);
        let prev_cursor = self.cursor.get();
        let user_start = align_up(prev_cursor, self.region.alignment());
        let rounded = align_up(size, self.region.alignment());
        let new_cursor = user_start
            .checked_add(rounded)
            .and_then(|footer_start| footer_start.checked_add(size_of::<StackFooter>()));
        let new_cursor = match new_cursor {
            Some(new_cursor) if new_cursor <= self.region.end() => new_cursor,
            _ => {
                return alloc_error::OutOfSpaceSnafu {
                    requested: rounded,
                    available: self.available_size(),
                }
                .fail();
            }
        };
        self.region.write_pod(
            user_start + rounded,
            StackFooter {
                distance_to_prev: new_cursor - prev_cursor,
            },
        );
        self.cursor.set(new_cursor);
        Ok(self.region.ptr_at(user_start))
    }

    /// Frees the most recent live allocation. Any other pointer, including
    /// one already freed, is refused without touching state.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        self.try_free(ptr).trip(self.policy.get())
    }

    fn try_free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        ensure!(self.valid, free_error::InvalidResourceSnafu);
        let address = ptr.addr().get();
        let cursor = self.cursor.get();
        ensure!(cursor > self.region.start(), free_error::NothingAllocatedSnafu);
        let footer: StackFooter = self.region.read_pod(cursor - size_of::<StackFooter>());
        let prev_cursor = cursor - footer.distance_to_prev;
        let top_block = align_up(prev_cursor, self.region.alignment());
        ensure!(address == top_block, free_error::NotTopOfStackSnafu { address });
        self.cursor.set(prev_cursor);
        Ok(())
    }

    /// Bytes remaining between the cursor and the end of the region. A
    /// block's footer also comes out of this budget.
    #[must_use]
    pub fn available_size(&self) -> usize {
        if !self.valid {
            return 0;
        }
        let next_start = align_up(self.cursor.get(), self.region.alignment());
        self.region.end().saturating_sub(next_start)
    }

    /// False iff construction detected an unusable configuration.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Resource for StackResource<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Stack
    }

    fn alignment(&self) -> usize {
        self.region.alignment()
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn base(&self) -> Option<NonNull<u8>> {
        Some(self.region.base())
    }

    fn available_size(&self) -> usize {
        Self::available_size(self)
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        Self::allocate(self, size)
    }

    fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        Self::free(self, ptr)
    }
}

impl core::fmt::Debug for StackResource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StackResource")
            .field("alignment", &self.region.alignment())
            .field("available", &self.available_size())
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_test_resource<F>(size: usize, test_fn: F)
    where
        F: FnOnce(&StackResource<'_>),
    {
        let mut buffer = vec![0u8; size];
        let memory = StackResource::new(&mut buffer, 8);
        test_fn(&memory);
    }

    #[test]
    fn test_lifo_discipline() {
        with_test_resource(5000, |memory| {
            // The whole region cannot fit: every block carries a footer.
            assert!(matches!(
                memory.allocate(5000),
                Err(AllocError::OutOfSpace { .. })
            ));

            let p2 = memory.allocate(512).unwrap();
            let p3 = memory.allocate(256).unwrap();
            let p4 = memory.allocate(128).unwrap();
            let p5 = memory.allocate(3).unwrap();

            memory.free(p5).unwrap();
            memory.free(p4).unwrap();
            memory.free(p3).unwrap();
            memory.free(p2).unwrap();

            // Second free of the same pointer: the stack is empty again.
            let before = memory.available_size();
            assert!(matches!(
                memory.free(p2),
                Err(FreeError::NothingAllocated { .. })
            ));
            assert_eq!(memory.available_size(), before);

            assert!(memory.allocate(200).is_ok());
            assert!(memory.allocate(200).is_ok());
            assert!(memory.allocate(200).is_ok());
        });
    }

    #[test]
    fn test_non_top_free_is_refused() {
        with_test_resource(1024, |memory| {
            let a = memory.allocate(64).unwrap();
            let b = memory.allocate(64).unwrap();
            let before = memory.available_size();
            assert!(matches!(
                memory.free(a),
                Err(FreeError::NotTopOfStack { .. })
            ));
            assert_eq!(memory.available_size(), before);
            memory.free(b).unwrap();
            memory.free(a).unwrap();
        });
    }

    #[test]
    fn test_zero_size_is_rejected() {
        with_test_resource(1024, |memory| {
            assert!(matches!(memory.allocate(0), Err(AllocError::ZeroSize { .. })));
        });
    }

    #[test]
    fn test_balanced_sequence_returns_to_start() {
        with_test_resource(4096, |memory| {
            let fresh = memory.available_size();
            let mut live = Vec::new();
            for size in [16, 200, 8, 1024, 3] {
                live.push(memory.allocate(size).unwrap());
            }
            while let Some(ptr) = live.pop() {
                memory.free(ptr).unwrap();
            }
            assert_eq!(memory.available_size(), fresh);
        });
    }

    #[test]
    fn test_freeing_empty_stack() {
        with_test_resource(1024, |memory| {
            assert!(matches!(
                memory.free(NonNull::dangling()),
                Err(FreeError::NothingAllocated { .. })
            ));
        });
    }

    #[test]
    fn test_footer_overhead_is_accounted() {
        with_test_resource(128, |memory| {
            let available = memory.available_size();
            // An allocation of the full span must fail: no room for the footer.
            assert!(memory.allocate(available).is_err());
            let ptr = memory
                .allocate(available - size_of::<StackFooter>())
                .unwrap();
            assert_eq!(memory.available_size(), 0);
            memory.free(ptr).unwrap();
        });
    }
}
