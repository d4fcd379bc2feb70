//! Linear (bump) resource.
//!
//! Memory is handed out by advancing a cursor; individual frees are not
//! supported and the only way to reclaim space is [`LinearResource::reset`],
//! which rewinds the cursor to the start of the region and invalidates every
//! pointer handed out so far (the caller's responsibility). This suits
//! parse-then-reset and per-frame scratch workloads where O(1) allocation
//! with zero per-block metadata is decisive.

use core::{cell::Cell, marker::PhantomData, ptr::NonNull};

use snafu::ensure;

use crate::{
    addr::{Region, align_up},
    error::{AllocError, FreeError, alloc_error, free_error},
    resource::{FailurePolicy, Resource, ResourceKind, TripExt as _},
};

/// A bump-pointer resource over a caller-supplied buffer.
///
/// # Usage Example
///
/// ```rust
/// use carve::LinearResource;
///
/// let mut backing = [0u8; 1024];
/// let memory = LinearResource::new(&mut backing, 8);
///
/// let a = memory.allocate(100).unwrap();
/// let b = memory.allocate(100).unwrap();
/// assert_ne!(a, b);
///
/// // Individual frees are rejected; reclaim everything at once instead.
/// assert!(memory.free(a).is_err());
/// memory.reset();
/// assert_eq!(memory.allocate(100).unwrap(), a);
/// ```
pub struct LinearResource<'buf> {
    region: Region,
    cursor: Cell<usize>,
    valid: bool,
    policy: Cell<FailurePolicy>,
    _buffer: PhantomData<&'buf mut [u8]>,
}

impl<'buf> LinearResource<'buf> {
    /// Creates a linear resource over `buffer`.
    ///
    /// `alignment` must be a power of two; it is promoted to at least the
    /// pointer width. A non-power-of-two request marks the resource invalid
    /// and every subsequent operation fails.
    pub fn new(buffer: &'buf mut [u8], alignment: usize) -> Self {
        let region = Region::new(buffer, alignment);
        let valid = region.alignment().is_power_of_two();
        let policy = FailurePolicy::default();
        if valid {
            log::debug!(
                "linear resource: {} usable bytes, alignment {}",
                region.span(),
                region.alignment(),
            );
        } else {
            log::debug!(
                "linear resource rejected: alignment {} is not a power of two",
                region.alignment(),
            );
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

    /// Rewinds the cursor to the start of the region. Every pointer handed
    /// out before the reset is invalidated.
    pub fn reset(&self) {
        if self.valid {
            self.cursor.set(self.region.start());
        }
    }

    /// Allocates `size` bytes (rounded up to the alignment) by advancing the
    /// cursor. Zero-size requests are rejected.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.try_allocate(size).trip(self.policy.get())
    }

    fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(self.valid, alloc_error::InvalidResourceSnafu);
        ensure!(size != 0, alloc_error::ZeroSizeSnafu);
        let rounded = align_up(size, self.region.alignment());
        let available = self.available_size();
        ensure!(
            rounded <= available,
            alloc_error::OutOfSpaceSnafu {
                requested: rounded,
                available,
            }
        );
        let cursor = self.cursor.get();
        self.cursor.set(cursor + rounded);
        Ok(self.region.ptr_at(cursor))
    }

    /// Always fails: the linear resource does not free individual blocks.
    pub fn free(&self, _ptr: NonNull<u8>) -> Result<(), FreeError> {
        Err(free_error::UnsupportedSnafu.build()).trip(self.policy.get())
    }

    /// Bytes remaining between the cursor and the end of the region.
    #[must_use]
    pub fn available_size(&self) -> usize {
        if !self.valid {
            return 0;
        }
        self.region.end() - self.cursor.get()
    }

    /// False iff construction detected an unusable configuration.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Resource for LinearResource<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Linear
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

impl core::fmt::Debug for LinearResource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinearResource")
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
        F: FnOnce(&LinearResource<'_>),
    {
        let mut buffer = vec![0u8; size];
        let memory = LinearResource::new(&mut buffer, 8);
        test_fn(&memory);
    }

    #[test]
    fn test_allocations_advance() {
        with_test_resource(1024, |memory| {
            let a = memory.allocate(100).unwrap();
            let b = memory.allocate(100).unwrap();
            // 100 rounds up to 104 under 8-byte alignment.
            assert_eq!(b.addr().get() - a.addr().get(), 104);
        });
    }

    #[test]
    fn test_zero_size_is_rejected() {
        with_test_resource(1024, |memory| {
            assert!(matches!(memory.allocate(0), Err(AllocError::ZeroSize { .. })));
        });
    }

    #[test]
    fn test_free_is_unsupported() {
        with_test_resource(1024, |memory| {
            let ptr = memory.allocate(64).unwrap();
            let before = memory.available_size();
            assert!(matches!(memory.free(ptr), Err(FreeError::Unsupported { .. })));
            assert_eq!(memory.available_size(), before);
        });
    }

    #[test]
    fn test_exhaustion() {
        with_test_resource(256, |memory| {
            let span = memory.available_size();
            assert!(memory.allocate(span).is_ok());
            assert_eq!(memory.available_size(), 0);
            assert!(matches!(
                memory.allocate(1),
                Err(AllocError::OutOfSpace { .. })
            ));
        });
    }

    #[test]
    fn test_reset_returns_first_address() {
        with_test_resource(1024, |memory| {
            let first = memory.allocate(512).unwrap();
            memory.allocate(64).unwrap();
            memory.allocate(64).unwrap();
            memory.reset();
            let again = memory.allocate(512).unwrap();
            assert_eq!(first, again);
        });
    }

    #[test]
    fn test_available_is_monotonic() {
        with_test_resource(1024, |memory| {
            let before = memory.available_size();
            memory.allocate(96).unwrap();
            assert!(memory.available_size() < before);
            memory.reset();
            assert_eq!(memory.available_size(), before);
        });
    }

    #[test]
    fn test_invalid_alignment_refuses_everything() {
        let mut buffer = [0u8; 256];
        let memory = LinearResource::new(&mut buffer, 24);
        assert!(!memory.is_valid());
        assert_eq!(memory.available_size(), 0);
        assert!(matches!(
            memory.allocate(16),
            Err(AllocError::InvalidResource { .. })
        ));
    }
}
