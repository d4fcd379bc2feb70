//! Counted arrays over any allocator.
//!
//! [`new_array`] prefixes the elements with a small header holding the
//! element count, so [`delete_array`] can drop and free the whole thing from
//! nothing but the array pointer.
//!
//! ```text
//! ┌──────────────────┬────────┬────────┬─────┬────────┐
//! │ header: count    │ elem 0 │ elem 1 │ ... │ elem N │
//! └──────────────────┴────────┴────────┴─────┴────────┘
//!                    ▲ returned pointer
//! ```
//!
//! The header occupies `max(16, resource alignment)` bytes so the elements
//! keep the resource's alignment whatever the target's pointer width.

use core::ptr::NonNull;

use carve::{AllocError, FreeError, Resource, error::alloc_error};

use crate::PolyAllocator;

/// Bytes reserved in front of the elements for the count word.
fn header_size(resource: &dyn Resource) -> usize {
    resource.alignment().max(16)
}

/// Allocates and clone-constructs an array of `count` elements.
///
/// The element count is written into a header in front of the array; the
/// returned pointer addresses the first element. Release the array with
/// [`delete_array`] and nothing else.
pub fn new_array<T: Clone>(
    count: usize,
    allocator: &PolyAllocator<'_, T>,
    value: T,
) -> Result<NonNull<T>, AllocError> {
    let header = header_size(allocator.resource());
    let total = size_of::<T>()
        .checked_mul(count)
        .and_then(|payload| payload.checked_add(header));
    let total = match total {
        Some(total) => total,
        None => {
            return alloc_error::OverflowSnafu {
                count,
                element_size: size_of::<T>(),
            }
            .fail();
        }
    };

    let raw = allocator.rebind::<u8>().allocate_bytes(total, align_of::<T>())?;
    log::trace!("array of {count} elements, {total} bytes including header");
    // SAFETY: `raw` holds `total` bytes: an aligned count word up front and
    // `count` properly aligned `T` slots after `header` bytes.
    unsafe {
        raw.cast::<usize>().as_ptr().write(count);
        let first = raw.as_ptr().add(header).cast::<T>();
        for index in 0..count {
            first.add(index).write(value.clone());
        }
        Ok(NonNull::new_unchecked(first))
    }
}

/// Drops every element of an array built by [`new_array`] and frees its
/// storage.
///
/// # Safety
///
/// `ptr` must come from [`new_array`] through an allocator equal to
/// `allocator`, and the array must not be used again.
pub unsafe fn delete_array<T>(
    ptr: NonNull<T>,
    allocator: &PolyAllocator<'_, T>,
) -> Result<(), FreeError> {
    let header = header_size(allocator.resource());
    // SAFETY: `new_array` put the count word `header` bytes below the first
    // element and constructed exactly `count` elements.
    unsafe {
        let raw = ptr.as_ptr().cast::<u8>().sub(header);
        let count = raw.cast::<usize>().read();
        for index in 0..count {
            ptr.as_ptr().add(index).drop_in_place();
        }
        log::trace!("deleting array of {count} elements");
        allocator.rebind::<u8>().deallocate_bytes(
            NonNull::new_unchecked(raw),
            header + count * size_of::<T>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use carve::DynamicResource;

    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Triple {
        a: i32,
        b: i32,
        c: i32,
    }

    #[test]
    fn test_array_round_trip() {
        let mut backing = [0u8; 5000];
        let memory = DynamicResource::new(&mut backing, 8);
        let allocator = PolyAllocator::<Triple>::new(&memory);
        let fresh = memory.available_size();

        let array = new_array(5, &allocator, Triple { a: 40, b: 50, c: 60 }).unwrap();
        // SAFETY: five elements were just constructed.
        let values = unsafe { core::slice::from_raw_parts(array.as_ptr(), 5) };
        assert!(values.iter().all(|v| *v == Triple { a: 40, b: 50, c: 60 }));

        // SAFETY: the array came from `new_array` on this allocator.
        unsafe { delete_array(array, &allocator).unwrap() };
        assert_eq!(memory.available_size(), fresh);
    }

    #[test]
    fn test_count_lives_in_the_header() {
        let mut backing = [0u8; 1024];
        let memory = DynamicResource::new(&mut backing, 8);
        let allocator = PolyAllocator::<u64>::new(&memory);

        let array = new_array(3, &allocator, 7u64).unwrap();
        let header = header_size(allocator.resource());
        // SAFETY: the header word sits `header` bytes below the elements.
        let stored = unsafe { array.as_ptr().cast::<u8>().sub(header).cast::<usize>().read() };
        assert_eq!(stored, 3);
        // SAFETY: built by `new_array` above.
        unsafe { delete_array(array, &allocator).unwrap() };
    }

    #[test]
    fn test_every_element_is_dropped() {
        struct Counted<'a>(&'a Cell<usize>);

        impl Clone for Counted<'_> {
            fn clone(&self) -> Self {
                Counted(self.0)
            }
        }

        impl Drop for Counted<'_> {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Cell::new(0);
        let mut backing = [0u8; 1024];
        let memory = DynamicResource::new(&mut backing, 8);
        let allocator = PolyAllocator::<Counted<'_>>::new(&memory);

        let array = new_array(4, &allocator, Counted(&drops)).unwrap();
        // The template value itself is consumed by `new_array`.
        assert_eq!(drops.get(), 1);
        // SAFETY: built by `new_array` above.
        unsafe { delete_array(array, &allocator).unwrap() };
        assert_eq!(drops.get(), 1 + 4);
    }

    #[test]
    fn test_empty_array() {
        let mut backing = [0u8; 1024];
        let memory = DynamicResource::new(&mut backing, 8);
        let allocator = PolyAllocator::<u32>::new(&memory);
        let fresh = memory.available_size();

        let array = new_array(0, &allocator, 0u32).unwrap();
        // SAFETY: zero elements, header only.
        unsafe { delete_array(array, &allocator).unwrap() };
        assert_eq!(memory.available_size(), fresh);
    }
}
