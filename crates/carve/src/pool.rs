//! Pool resource: fixed-size blocks threaded into a singly linked free list.
//!
//! The region is cut into equal blocks at construction; each free block
//! stores the address of the next free block in its own first word, so the
//! free list costs no memory beyond the blocks themselves. Allocation pops
//! the list head and free pushes it back, both O(1). An optional guard walks
//! the free list on every free to reject double frees, trading O(free count)
//! time for safety.
//!
//! ```text
//! Fresh pool, address-ordered free list:
//! ┌─────────┬─────────┬─────────┬─────────┐
//! │ next ───┼▶next ───┼▶next ───┼▶next: ∅ │
//! └─────────┴─────────┴─────────┴─────────┘
//!  block 0   block 1   block 2   block 3
//! ```

use core::{cell::Cell, marker::PhantomData, ptr::NonNull};

use dataview::Pod;
use snafu::ensure;

use crate::{
    addr::{Region, align_up},
    error::{AllocError, FreeError, alloc_error, free_error},
    resource::{FailurePolicy, Resource, ResourceKind, TripExt as _},
};

/// In-band free-list node, written into the first word of a free block.
/// Zero marks the end of the list.
#[repr(C)]
#[derive(Pod, Clone, Copy, Debug)]
struct FreeNode {
    next: usize,
}

/// A fixed-block resource over a caller-supplied buffer.
///
/// # Usage Example
///
/// ```rust
/// use carve::PoolResource;
///
/// let mut backing = [0u8; 1024];
/// let pool = PoolResource::new(&mut backing, 256, 8, true);
/// assert_eq!(pool.blocks_count(), pool.free_blocks_count());
///
/// let block = pool.allocate(256).unwrap();
/// pool.free(block).unwrap();
/// // The guard catches the second free of the same block.
/// assert!(pool.free(block).is_err());
/// ```
pub struct PoolResource<'buf> {
    region: Region,
    block_size: usize,
    block_count: usize,
    free_count: Cell<usize>,
    /// Address of the first free block, zero when the pool is exhausted.
    free_root: Cell<usize>,
    guard_double_free: bool,
    valid: bool,
    policy: Cell<FailurePolicy>,
    _buffer: PhantomData<&'buf mut [u8]>,
}

impl<'buf> PoolResource<'buf> {
    /// Creates a pool over `buffer` with blocks of `block_size` bytes.
    ///
    /// The block size is promoted to at least an aligned pointer and rounded
    /// up to the (promoted) alignment. With `guard_double_free`, every free
    /// walks the free list and rejects a block that is already on it.
    pub fn new(
        buffer: &'buf mut [u8],
        block_size: usize,
        alignment: usize,
        guard_double_free: bool,
    ) -> Self {
        let region = Region::new(buffer, alignment);
        let policy = FailurePolicy::default();
        let promoted = if region.alignment().is_power_of_two() {
            align_up(block_size.max(size_of::<usize>()), region.alignment())
        } else {
            0
        };
        let valid = promoted != 0 && promoted != usize::MAX && promoted <= region.span();
        let resource = Self {
            region,
            block_size: promoted,
            block_count: if valid { region.span() / promoted } else { 0 },
            free_count: Cell::new(0),
            free_root: Cell::new(0),
            guard_double_free,
            valid,
            policy: Cell::new(policy),
            _buffer: PhantomData,
        };
        if valid {
            resource.thread_free_list();
            log::debug!(
                "pool resource: {} blocks of {} bytes, alignment {}",
                resource.block_count,
                resource.block_size,
                region.alignment(),
            );
        } else {
            log::debug!("pool resource rejected: bad alignment or region below one block");
            resource
                .policy
                .get()
                .trip(&alloc_error::InvalidResourceSnafu.build());
        }
        resource
    }

    /// Replaces the failure policy fired on refused operations.
    #[must_use]
    pub fn with_failure_policy(self, policy: FailurePolicy) -> Self {
        self.policy.set(policy);
        self
    }

    /// Links every block into the free list in address order.
    fn thread_free_list(&self) {
        let start = self.region.start();
        for index in 0..self.block_count {
            let block = start + index * self.block_size;
            let next = if index + 1 < self.block_count {
                block + self.block_size
            } else {
                0
            };
            self.region.write_pod(block, FreeNode { next });
        }
        self.free_root.set(if self.block_count > 0 { start } else { 0 });
        self.free_count.set(self.block_count);
    }

    /// Pops the free-list head in O(1).
    ///
    /// The `size` argument is ignored: every block has
    /// [`block_size`](Self::block_size) bytes, whatever was asked for.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.try_allocate(size).trip(self.policy.get())
    }

    fn try_allocate(&self, _size: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(self.valid, alloc_error::InvalidResourceSnafu);
        let block = self.free_root.get();
        ensure!(
            block != 0,
            alloc_error::OutOfSpaceSnafu {
                requested: self.block_size,
                available: 0usize,
            }
        );
        let node: FreeNode = self.region.read_pod(block);
        self.free_root.set(node.next);
        self.free_count.set(self.free_count.get() - 1);
        Ok(self.region.ptr_at(block))
    }

    /// Pushes a block back onto the free list.
    ///
    /// The pointer must lie inside the pool and sit exactly on a block
    /// boundary. With the double-free guard enabled, a block already on the
    /// free list is refused in O(free count).
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        self.try_free(ptr).trip(self.policy.get())
    }

    fn try_free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        ensure!(self.valid, free_error::InvalidResourceSnafu);
        let address = ptr.addr().get();
        let start = self.region.start();
        let pool_end = start + self.block_count * self.block_size;
        ensure!(
            address >= start && address < pool_end,
            free_error::OutOfRangeSnafu { address }
        );
        ensure!(
            (address - start).is_multiple_of(self.block_size),
            free_error::NotBlockStartSnafu {
                address,
                block_size: self.block_size,
            }
        );
        if self.guard_double_free {
            let mut current = self.free_root.get();
            while current != 0 {
                ensure!(current != address, free_error::DoubleFreeSnafu { address });
                current = self.region.read_pod::<FreeNode>(current).next;
            }
        }
        self.region.write_pod(
            address,
            FreeNode {
                next: self.free_root.get(),
            },
        );
        self.free_root.set(address);
        self.free_count.set(self.free_count.get() + 1);
        Ok(())
    }

    /// The promoted block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks the region was cut into.
    #[must_use]
    pub fn blocks_count(&self) -> usize {
        self.block_count
    }

    /// Number of blocks currently on the free list.
    #[must_use]
    pub fn free_blocks_count(&self) -> usize {
        self.free_count.get()
    }

    /// Free blocks times the block size.
    #[must_use]
    pub fn available_size(&self) -> usize {
        self.free_count.get() * self.block_size
    }

    /// False iff construction detected an unusable configuration.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Resource for PoolResource<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pool
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

impl core::fmt::Debug for PoolResource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolResource")
            .field("block_size", &self.block_size)
            .field("blocks", &self.block_count)
            .field("free", &self.free_count.get())
            .field("valid", &self.valid)
            .finish()
    }
}
