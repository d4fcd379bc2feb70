//! Dynamic resource: best-fit allocation over boundary-tagged blocks.
//!
//! The whole region is tiled by blocks. Every block, allocated or free,
//! carries an identical header and footer word holding its full size with
//! the low bit set iff the block is allocated (sizes are always multiples of
//! the alignment, so bit 0 is free to act as the flag). Free blocks
//! additionally hold `prev`/`next` link words right after the header, which
//! thread them into a doubly linked free list kept sorted by ascending
//! address.
//!
//! ```text
//! Allocated block:
//! ┌────────┬─────────────────────────────────┬────────┐
//! │ size|1 │            payload              │ size|1 │
//! └────────┴─────────────────────────────────┴────────┘
//!
//! Free block:
//! ┌────────┬──────┬──────┬───────────────────┬────────┐
//! │ size|0 │ prev │ next │      unused       │ size|0 │
//! └────────┴──────┴──────┴───────────────────┴────────┘
//! ```
//!
//! # Algorithm
//!
//! - **Allocation** walks the free list for the *smallest* block whose
//!   payload covers the request (best fit, first seen wins on ties). A
//!   winner with enough surplus is split: the lower part is handed out and
//!   the remainder replaces the winner in the free list.
//! - **Free** validates the pointer (alignment, range, header/footer
//!   agreement, not already free), then coalesces with whichever memory
//!   neighbours are free. Unlinking a neighbour yields the exact list
//!   position of the unified block, so the address-sorted insert is O(1);
//!   only a free with two allocated neighbours pays a list walk.
//!
//! The footer is what makes left coalescing cheap: the word directly below a
//! block's header is its lower neighbour's footer, giving that neighbour's
//! size and status without any search.
//!
//! # Usage Example
//!
//! ```rust
//! use carve::DynamicResource;
//!
//! let mut backing = [0u8; 4096];
//! let memory = DynamicResource::new(&mut backing, 8);
//! let fresh = memory.available_size();
//!
//! let a = memory.allocate(200).unwrap();
//! let b = memory.allocate(200).unwrap();
//! memory.free(a).unwrap();
//! memory.free(b).unwrap();
//!
//! // Neighbouring frees coalesce back into one block.
//! assert_eq!(memory.available_size(), fresh);
//! assert_eq!(memory.free_block_count(), 1);
//! ```
//!
//! # Performance Characteristics
//!
//! - Allocation: O(free-list length)
//! - Free: O(1) when at least one neighbour is free, O(free-list length)
//!   otherwise
//! - Overhead: two words per allocated block

use core::{cell::Cell, marker::PhantomData, ptr::NonNull};

use dataview::Pod;
use snafu::ensure;

use crate::{
    addr::{Region, align_up, is_aligned},
    error::{AllocError, FreeError, alloc_error, free_error},
    resource::{FailurePolicy, Resource, ResourceKind, TripExt as _},
};

/// One boundary-tag word: the block's full size with the allocation flag in
/// bit 0.
#[repr(C)]
#[derive(Pod, Clone, Copy, Debug, PartialEq, Eq)]
struct BoundaryTag {
    size_and_status: usize,
}

impl BoundaryTag {
    fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size & 1 == 0);
        Self {
            size_and_status: size | usize::from(allocated),
        }
    }

    fn size(self) -> usize {
        self.size_and_status & !1
    }

    fn is_allocated(self) -> bool {
        self.size_and_status & 1 != 0
    }
}

/// Free-list links, stored right after a free block's header. Zero stands
/// for "no neighbour"; link words hold plain addresses and pointers are
/// re-minted through the region base when needed.
#[repr(C)]
#[derive(Pod, Clone, Copy, Debug)]
struct FreeLinks {
    prev: usize,
    next: usize,
}

/// A best-fit, coalescing resource over a caller-supplied buffer.
pub struct DynamicResource<'buf> {
    region: Region,
    /// Address of the first free block's header, zero when the list is
    /// empty.
    free_root: Cell<usize>,
    /// Sum of the full sizes of all currently allocated blocks.
    allocated: Cell<usize>,
    valid: bool,
    policy: Cell<FailurePolicy>,
    _buffer: PhantomData<&'buf mut [u8]>,
}

impl<'buf> DynamicResource<'buf> {
    /// Creates a dynamic resource over `buffer`.
    ///
    /// `alignment` must be a power of two; it is promoted to at least the
    /// pointer width. The region must hold at least one minimum block
    /// (header, free-list links and footer, all aligned), otherwise the
    /// resource is invalid and refuses every operation without ever writing
    /// into the buffer.
    pub fn new(buffer: &'buf mut [u8], alignment: usize) -> Self {
        let region = Region::new(buffer, alignment);
        let policy = FailurePolicy::default();
        let resource = Self {
            region,
            free_root: Cell::new(0),
            allocated: Cell::new(0),
            valid: false,
            policy: Cell::new(policy),
            _buffer: PhantomData,
        };
        let valid =
            region.alignment().is_power_of_two() && region.span() >= resource.min_block_size();
        let mut resource = resource;
        resource.valid = valid;
        if valid {
            resource.set_block(region.start(), region.end(), false);
            resource
                .region
                .write_pod(region.start() + TAG_SIZE, FreeLinks { prev: 0, next: 0 });
            resource.free_root.set(region.start());
            log::debug!(
                "dynamic resource: {} usable bytes, alignment {}, minimum block {}",
                region.span(),
                region.alignment(),
                resource.min_block_size(),
            );
        } else {
            log::debug!("dynamic resource rejected: bad alignment or region below one block");
            policy.trip(&alloc_error::InvalidResourceSnafu.build());
        }
        resource
    }

    /// Replaces the failure policy fired on refused operations.
    #[must_use]
    pub fn with_failure_policy(self, policy: FailurePolicy) -> Self {
        self.policy.set(policy);
        self
    }

    /// Allocates at least `size` bytes from the smallest free block that can
    /// hold them.
    ///
    /// A zero-size request is satisfied with a minimum block.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.try_allocate(size).trip(self.policy.get())
    }

    fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(self.valid, alloc_error::InvalidResourceSnafu);
        let rounded = align_up(size, self.region.alignment());

        // Best fit: the smallest block whose payload covers the request;
        // list order (= address order) breaks ties.
        let mut best = 0;
        let mut best_size = 0;
        let mut current = self.free_root.get();
        while current != 0 {
            let block_size = self.tag_at(current).size();
            if rounded <= block_size - self.tag_overhead() && (best == 0 || block_size < best_size)
            {
                best = current;
                best_size = block_size;
            }
            current = self.links_at(current).next;
        }
        ensure!(
            best != 0,
            alloc_error::OutOfSpaceSnafu {
                requested: rounded,
                available: self.available_size(),
            }
        );

        let header = self.take_block(best, rounded);
        let taken = self.tag_at(header).size();
        self.allocated.set(self.allocated.get() + taken);
        Ok(self.region.ptr_at(header + self.aligned_tag()))
    }

    /// Carves the request out of the winning block: splits when the surplus
    /// can hold a minimum free block, otherwise takes the block whole.
    fn take_block(&self, header: usize, rounded: usize) -> usize {
        let block_size = self.tag_at(header).size();
        let required = self
            .min_block_size()
            .max(rounded + self.tag_overhead());
        let links = self.links_at(header);
        if required + self.min_block_size() + self.region.alignment() <= block_size {
            let split = header + required;
            self.set_block(header, split, true);
            self.set_block(split, header + block_size, false);
            // The remainder takes the winner's place in the list.
            self.link_between(split, links.prev, links.next);
            log::trace!("split {block_size}-byte block into {required} + {}", block_size - required);
        } else {
            self.unlink(header);
            self.set_block(header, header + block_size, true);
        }
        header
    }

    /// Returns a block to the resource, coalescing with free neighbours.
    ///
    /// The pointer must be one previously returned by
    /// [`allocate`](Self::allocate) on this resource and not freed since;
    /// violations are detected through the boundary tags and refused without
    /// touching state.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        self.try_free(ptr).trip(self.policy.get())
    }

    fn try_free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        ensure!(self.valid, free_error::InvalidResourceSnafu);
        let alignment = self.region.alignment();
        let address = ptr.addr().get();
        let start = self.region.start();
        let end = self.region.end();

        ensure!(
            is_aligned(address, alignment),
            free_error::MisalignedSnafu { address, alignment }
        );
        ensure!(
            address >= start + self.aligned_tag() && address < end,
            free_error::OutOfRangeSnafu { address }
        );

        let header = address - self.aligned_tag();
        let head_tag = self.tag_at(header);
        let size = head_tag.size();
        // The size must describe a block that fits the region before the
        // footer can be read at all.
        let block_end = match header.checked_add(size) {
            Some(block_end)
                if size >= self.min_block_size()
                    && is_aligned(size, alignment)
                    && block_end <= end =>
            {
                block_end
            }
            _ => return free_error::CorruptBlockSnafu { address }.fail(),
        };
        ensure!(
            self.tag_at(self.footer_addr(block_end)) == head_tag,
            free_error::CorruptBlockSnafu { address }
        );
        ensure!(
            head_tag.is_allocated(),
            free_error::DoubleFreeSnafu { address }
        );

        // Mark free first: a stray second free of this block now fails the
        // already-free check even before any coalescing below rewrites it.
        self.set_block(header, block_end, false);
        self.allocated.set(self.allocated.get() - size);

        let mut from = header;
        let mut to = block_end;
        // List position to splice the unified block into, learned from
        // whichever neighbours get unlinked.
        let mut hint: Option<(usize, usize)> = None;

        if header != start {
            let left_footer = self.tag_at(self.footer_addr(header));
            if !left_footer.is_allocated() {
                let left_header = header - left_footer.size();
                let left_links = self.links_at(left_header);
                self.unlink(left_header);
                from = left_header;
                hint = Some((left_links.prev, left_links.next));
                log::trace!("coalesced left into block at {left_header:#x}");
            }
        }
        if block_end != end {
            let right_tag = self.tag_at(block_end);
            if !right_tag.is_allocated() {
                // Read after the left unlink so the links are current.
                let right_links = self.links_at(block_end);
                self.unlink(block_end);
                to = block_end + right_tag.size();
                hint = Some(match hint {
                    Some((prev, _)) => (prev, right_links.next),
                    None => (right_links.prev, right_links.next),
                });
                log::trace!("coalesced right into block ending at {to:#x}");
            }
        }

        self.set_block(from, to, false);
        match hint {
            Some((prev, next)) => self.link_between(from, prev, next),
            None if self.free_root.get() == 0 => self.link_between(from, 0, 0),
            None => {
                // Both neighbours allocated: walk for the first free block
                // past the new one to keep the list address-sorted.
                let mut prev = 0;
                let mut current = self.free_root.get();
                while current != 0 && current < from {
                    prev = current;
                    current = self.links_at(current).next;
                }
                self.link_between(from, prev, current);
            }
        }
        Ok(())
    }

    /// Bytes of the region not currently held by allocated blocks. This
    /// counts whole blocks, headers and footers included, and returns to the
    /// fresh-region value once everything is freed.
    #[must_use]
    pub fn available_size(&self) -> usize {
        if !self.valid {
            return 0;
        }
        self.region.span() - self.allocated.get()
    }

    /// Number of blocks on the free list.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.free_root.get();
        while current != 0 {
            count += 1;
            current = self.links_at(current).next;
        }
        count
    }

    /// False iff construction detected an unusable configuration.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn aligned_tag(&self) -> usize {
        align_up(TAG_SIZE, self.region.alignment())
    }

    /// Header plus footer, both rounded to the alignment: the per-block cost
    /// of an allocated block.
    fn tag_overhead(&self) -> usize {
        2 * self.aligned_tag()
    }

    /// Smallest block that can ever exist: an aligned free header (tag plus
    /// links) and an aligned footer.
    fn min_block_size(&self) -> usize {
        align_up(TAG_SIZE + size_of::<FreeLinks>(), self.region.alignment()) + self.aligned_tag()
    }

    fn footer_addr(&self, block_end: usize) -> usize {
        block_end - self.aligned_tag()
    }

    fn tag_at(&self, addr: usize) -> BoundaryTag {
        self.region.read_pod(addr)
    }

    fn links_at(&self, header: usize) -> FreeLinks {
        self.region.read_pod(header + TAG_SIZE)
    }

    /// Writes matching header and footer tags for the block `from..to`.
    fn set_block(&self, from: usize, to: usize, allocated: bool) {
        let tag = BoundaryTag::new(to - from, allocated);
        self.region.write_pod(from, tag);
        self.region.write_pod(self.footer_addr(to), tag);
    }

    /// Removes a free block from the list, bridging its neighbours.
    fn unlink(&self, header: usize) {
        let links = self.links_at(header);
        if links.prev != 0 {
            let mut prev_links = self.links_at(links.prev);
            prev_links.next = links.next;
            self.region.write_pod(links.prev + TAG_SIZE, prev_links);
        } else {
            self.free_root.set(links.next);
        }
        if links.next != 0 {
            let mut next_links = self.links_at(links.next);
            next_links.prev = links.prev;
            self.region.write_pod(links.next + TAG_SIZE, next_links);
        }
    }

    /// Splices a free block between `prev` and `next` (either may be zero
    /// for the list ends; a zero `prev` makes the block the new root).
    fn link_between(&self, header: usize, prev: usize, next: usize) {
        self.region.write_pod(header + TAG_SIZE, FreeLinks { prev, next });
        if prev != 0 {
            let mut prev_links = self.links_at(prev);
            prev_links.next = header;
            self.region.write_pod(prev + TAG_SIZE, prev_links);
        } else {
            self.free_root.set(header);
        }
        if next != 0 {
            let mut next_links = self.links_at(next);
            next_links.prev = header;
            self.region.write_pod(next + TAG_SIZE, next_links);
        }
    }
}

const TAG_SIZE: usize = size_of::<BoundaryTag>();

impl Resource for DynamicResource<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Dynamic
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

impl core::fmt::Debug for DynamicResource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DynamicResource")
            .field("alignment", &self.region.alignment())
            .field("available", &self.available_size())
            .field("free_blocks", &self.free_block_count())
            .field("valid", &self.valid)
            .finish()
    }
}
