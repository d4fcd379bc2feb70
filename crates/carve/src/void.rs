//! Void resource: no storage, every allocation fails, every free succeeds.
//!
//! Useful as a deliberate sink, or as a placeholder resource for containers
//! that must never allocate.

use core::{cell::Cell, ptr::NonNull};

use crate::{
    error::{AllocError, FreeError, alloc_error},
    resource::{FailurePolicy, Resource, ResourceKind, TripExt as _},
};

/// A resource with no backing region.
#[derive(Debug, Default)]
pub struct VoidResource {
    policy: Cell<FailurePolicy>,
}

impl VoidResource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the failure policy fired on refused operations.
    #[must_use]
    pub fn with_failure_policy(self, policy: FailurePolicy) -> Self {
        self.policy.set(policy);
        self
    }

    /// Always fails: there is nothing to hand out.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        Err(alloc_error::OutOfSpaceSnafu {
            requested: size,
            available: 0usize,
        }
        .build())
        .trip(self.policy.get())
    }

    /// Always succeeds: nothing was ever handed out, nothing to reclaim.
    pub fn free(&self, _ptr: NonNull<u8>) -> Result<(), FreeError> {
        Ok(())
    }
}

impl Resource for VoidResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Void
    }

    fn alignment(&self) -> usize {
        size_of::<usize>()
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn base(&self) -> Option<NonNull<u8>> {
        None
    }

    fn available_size(&self) -> usize {
        0
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        Self::allocate(self, size)
    }

    fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        Self::free(self, ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_eq;

    #[test]
    fn test_void_never_allocates() {
        let void = VoidResource::new();
        assert!(matches!(
            void.allocate(1),
            Err(AllocError::OutOfSpace { .. })
        ));
        assert_eq!(Resource::available_size(&void), 0);
        assert!(void.free(NonNull::dangling()).is_ok());
    }

    #[test]
    fn test_two_voids_are_equal() {
        let a = VoidResource::new();
        let b = VoidResource::new();
        assert!(resource_eq(&a, &b));
    }
}
