//! Polymorphic allocator façade over any [`carve`] memory resource.
//!
//! [`PolyAllocator`] is a thin, copyable handle pairing an element type with
//! a borrowed `&dyn Resource`. It speaks the container-allocator protocol
//! (typed allocate/deallocate, in-place construct/destroy, rebind, equality)
//! so a container written against that protocol runs unchanged over a
//! linear, stack, pool or dynamic region.
//!
//! # Usage Example
//!
//! ```rust
//! use carve::DynamicResource;
//! use carve_poly::PolyAllocator;
//!
//! let mut backing = [0u8; 4096];
//! let memory = DynamicResource::new(&mut backing, 8);
//! let allocator = PolyAllocator::<u32>::new(&memory);
//!
//! let values = allocator.allocate(16).unwrap();
//! // ... construct and use up to 16 u32 values ...
//! allocator.deallocate(values, 16).unwrap();
//!
//! // Rebinding changes the element type, not the resource.
//! let bytes = allocator.rebind::<u8>();
//! assert!(allocator == bytes);
//! ```
//!
//! The [`new_array`] / [`delete_array`] helpers build and tear down
//! counted arrays through any allocator; the element count travels in a
//! small header in front of the array itself.

#![cfg_attr(not(test), no_std)]

mod array;

pub use self::array::{delete_array, new_array};

use core::{fmt, marker::PhantomData, ptr::NonNull};

use carve::{AllocError, FreeError, Resource, error::alloc_error, resource_eq};

/// A copyable, typed handle over a borrowed memory resource.
pub struct PolyAllocator<'res, T> {
    resource: &'res dyn Resource,
    _element: PhantomData<fn() -> T>,
}

impl<'res, T> PolyAllocator<'res, T> {
    /// Wraps `resource` without taking ownership.
    ///
    /// The element type's alignment must not exceed the resource's; every
    /// pointer the resource hands out is aligned to the resource alignment
    /// and no further.
    #[must_use]
    pub fn new(resource: &'res dyn Resource) -> Self {
        debug_assert!(align_of::<T>() <= resource.alignment());
        Self {
            resource,
            _element: PhantomData,
        }
    }

    /// The underlying resource.
    #[must_use]
    pub fn resource(&self) -> &'res dyn Resource {
        self.resource
    }

    /// Allocates raw storage for `count` elements of `T`.
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>, AllocError> {
        let bytes = size_of::<T>().checked_mul(count);
        let bytes = match bytes {
            Some(bytes) => bytes,
            None => {
                return alloc_error::OverflowSnafu {
                    count,
                    element_size: size_of::<T>(),
                }
                .fail();
            }
        };
        self.resource.allocate(bytes).map(NonNull::cast)
    }

    /// Returns storage for `count` elements. The elements must already be
    /// destroyed; only the bytes go back to the resource.
    pub fn deallocate(&self, ptr: NonNull<T>, _count: usize) -> Result<(), FreeError> {
        self.resource.free(ptr.cast())
    }

    /// Allocates `size` raw bytes. `align` must not exceed the resource's
    /// alignment, which every returned pointer carries.
    pub fn allocate_bytes(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(align <= self.resource.alignment());
        self.resource.allocate(size)
    }

    /// Returns raw bytes obtained from
    /// [`allocate_bytes`](Self::allocate_bytes).
    pub fn deallocate_bytes(&self, ptr: NonNull<u8>, _size: usize) -> Result<(), FreeError> {
        self.resource.free(ptr)
    }

    /// Moves `value` into the storage at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to valid, properly aligned storage for `T` that
    /// holds no live value.
    pub unsafe fn construct(&self, ptr: NonNull<T>, value: T) {
        // SAFETY: caller guarantees the storage.
        unsafe { ptr.as_ptr().write(value) }
    }

    /// Drops the value at `ptr` in place, leaving the storage allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live, properly aligned `T` that is not used
    /// again.
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        // SAFETY: caller guarantees a live value.
        unsafe { ptr.as_ptr().drop_in_place() }
    }

    /// Allocates storage for one element and moves `value` into it.
    pub fn new_object(&self, value: T) -> Result<NonNull<T>, AllocError> {
        let ptr = self.allocate(1)?;
        // SAFETY: freshly allocated storage for one `T`.
        unsafe { self.construct(ptr, value) };
        Ok(ptr)
    }

    /// Drops the object at `ptr` and returns its storage.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`new_object`](Self::new_object) on an equal
    /// allocator and must not be used again.
    pub unsafe fn delete_object(&self, ptr: NonNull<T>) -> Result<(), FreeError> {
        // SAFETY: caller guarantees a live object from this allocator.
        unsafe { self.destroy(ptr) };
        self.deallocate(ptr, 1)
    }

    /// The same resource seen through another element type. No storage
    /// moves.
    #[must_use]
    pub fn rebind<U>(&self) -> PolyAllocator<'res, U> {
        PolyAllocator::new(self.resource)
    }
}

impl<T> Clone for PolyAllocator<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PolyAllocator<'_, T> {}

/// Two façades are equal iff their resources are: memory allocated through
/// one can be deallocated through the other, whatever the element types.
impl<T, U> PartialEq<PolyAllocator<'_, U>> for PolyAllocator<'_, T> {
    fn eq(&self, other: &PolyAllocator<'_, U>) -> bool {
        resource_eq(self.resource, other.resource)
    }
}

impl<T> fmt::Debug for PolyAllocator<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolyAllocator")
            .field("resource_kind", &self.resource.kind())
            .field("alignment", &self.resource.alignment())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve::{DynamicResource, PoolResource, VoidResource};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Triple {
        a: i32,
        b: i32,
        c: i32,
    }

    #[test]
    fn test_typed_round_trip() {
        let mut backing = [0u8; 4096];
        let memory = DynamicResource::new(&mut backing, 8);
        let allocator = PolyAllocator::<Triple>::new(&memory);
        let fresh = memory.available_size();

        let storage = allocator.allocate(5).unwrap();
        for index in 0..5 {
            // SAFETY: `storage` holds room for five `Triple`s.
            unsafe {
                allocator.construct(storage.add(index), Triple { a: 4, b: 5, c: 6 });
            }
        }
        // SAFETY: five values were just constructed.
        let values = unsafe { core::slice::from_raw_parts(storage.as_ptr(), 5) };
        assert!(values.iter().all(|v| *v == Triple { a: 4, b: 5, c: 6 }));

        for index in 0..5 {
            // SAFETY: each element is live exactly once.
            unsafe { allocator.destroy(storage.add(index)) };
        }
        allocator.deallocate(storage, 5).unwrap();
        assert_eq!(memory.available_size(), fresh);
    }

    #[test]
    fn test_new_and_delete_object() {
        let mut backing = [0u8; 1024];
        let memory = DynamicResource::new(&mut backing, 8);
        let allocator = PolyAllocator::<Triple>::new(&memory);
        let fresh = memory.available_size();

        let object = allocator.new_object(Triple { a: 40, b: 50, c: 60 }).unwrap();
        // SAFETY: `object` is live.
        assert_eq!(unsafe { object.as_ptr().read() }.b, 50);
        // SAFETY: freshly created through this allocator.
        unsafe { allocator.delete_object(object).unwrap() };
        assert_eq!(memory.available_size(), fresh);
    }

    #[test]
    fn test_rebind_shares_the_resource() {
        let mut backing = [0u8; 1024];
        let memory = DynamicResource::new(&mut backing, 8);
        let ints = PolyAllocator::<u32>::new(&memory);
        let bytes = ints.rebind::<u8>();

        let ptr = ints.allocate(4).unwrap();
        // Equal allocators free each other's memory.
        assert!(ints == bytes);
        bytes.deallocate(ptr.cast(), 16).unwrap();
    }

    #[test]
    fn test_facades_over_different_resources_differ() {
        let mut backing_a = [0u8; 512];
        let mut backing_b = [0u8; 512];
        let memory_a = DynamicResource::new(&mut backing_a, 8);
        let memory_b = DynamicResource::new(&mut backing_b, 8);
        let a = PolyAllocator::<u8>::new(&memory_a);
        let b = PolyAllocator::<u8>::new(&memory_b);
        assert!(a != b);
    }

    #[test]
    fn test_overflowing_count_is_refused() {
        let void = VoidResource::new();
        let allocator = PolyAllocator::<u64>::new(&void);
        assert!(matches!(
            allocator.allocate(usize::MAX / 2),
            Err(AllocError::Overflow { .. })
        ));
    }

    #[test]
    fn test_facade_over_a_pool() {
        let mut backing = [0u8; 1024];
        let pool = PoolResource::new(&mut backing, 64, 8, true);
        let allocator = PolyAllocator::<[u8; 64]>::new(&pool);

        let block = allocator.allocate(1).unwrap();
        assert_eq!(pool.free_blocks_count(), pool.blocks_count() - 1);
        allocator.deallocate(block, 1).unwrap();
        assert_eq!(pool.free_blocks_count(), pool.blocks_count());
    }
}
