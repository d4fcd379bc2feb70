//! Static-linear resource: bump allocation out of process-wide banks.
//!
//! A *bank* is a slice of one static byte pool, keyed by a `(bank id, size)`
//! pair and carved out on first reference of that key. Every
//! [`StaticLinearResource`] instance with the same parameters refers to the
//! same bank and the same cursor: constructing a second instance observes
//! whatever cursor state the first one left behind, and copying an instance
//! preserves the shared state. This is the variant to reach for when no
//! runtime-provided buffer exists.
//!
//! The registry is the only process-global state in this crate. Entries are
//! never removed; their lifetime is the process lifetime. A spin mutex
//! guards the table, which also makes the registry safe under concurrent
//! first use even though the resources themselves remain single-threaded
//! objects.

use core::{cell::UnsafeCell, ptr::NonNull};

use arrayvec::ArrayVec;
use snafu::ensure;
use spin::mutex::SpinMutex;

use crate::{
    addr::align_up,
    error::{AllocError, FreeError, alloc_error, free_error},
    resource::{FailurePolicy, Resource, ResourceKind, TripExt as _},
};

/// Maximum number of distinct `(bank id, size)` keys the registry can hold.
pub const MAX_BANKS: usize = 16;

/// Total bytes owned by the static pool all banks are carved from.
pub const BANK_POOL_BYTES: usize = 64 * 1024;

/// Banks always use the minimum alignment (the pointer width).
const BANK_ALIGNMENT: usize = size_of::<usize>();

/// Bank slices start on 16-byte boundaries within the pool.
const SLICE_ALIGNMENT: usize = 16;

#[repr(align(16))]
struct BankPool(UnsafeCell<[u8; BANK_POOL_BYTES]>);

// SAFETY: the pool bytes are only read or written while holding `REGISTRY`,
// through pointers handed out by the registry's disjoint bank slices.
unsafe impl Sync for BankPool {}

static BANK_POOL: BankPool = BankPool(UnsafeCell::new([0; BANK_POOL_BYTES]));

fn pool_base() -> NonNull<u8> {
    NonNull::from(&BANK_POOL).cast::<u8>()
}

#[derive(Debug)]
struct BankEntry {
    bank: usize,
    size: usize,
    /// Offset of the bank's slice within the pool.
    offset: usize,
    /// Bump cursor, relative to the slice start. Shared by every instance
    /// keyed to this entry.
    cursor: usize,
}

#[derive(Debug)]
struct BankRegistry {
    entries: ArrayVec<BankEntry, MAX_BANKS>,
    reserved: usize,
}

impl BankRegistry {
    const fn new() -> Self {
        Self {
            entries: ArrayVec::new_const(),
            reserved: 0,
        }
    }

    /// Finds the entry for `(bank, size)`, carving a fresh slice out of the
    /// pool on first reference. `None` when the table is full or the pool
    /// cannot fit `size` more bytes.
    fn slot(&mut self, bank: usize, size: usize) -> Option<usize> {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.bank == bank && entry.size == size)
        {
            return Some(index);
        }
        if self.entries.is_full() {
            return None;
        }
        let offset = align_up(self.reserved, SLICE_ALIGNMENT);
        let end = offset.checked_add(size)?;
        if end > BANK_POOL_BYTES {
            return None;
        }
        log::debug!("static-linear bank ({bank}, {size}): carved pool slice at offset {offset}");
        self.entries.push(BankEntry {
            bank,
            size,
            offset,
            cursor: 0,
        });
        self.reserved = end;
        Some(self.entries.len() - 1)
    }
}

static REGISTRY: SpinMutex<BankRegistry> = SpinMutex::new(BankRegistry::new());

/// A linear resource whose backing storage is a process-wide static bank
/// selected by the `SIZE` and `BANK` parameters.
///
/// All instances with the same parameters share one buffer and one cursor.
///
/// # Usage Example
///
/// ```rust
/// use carve::StaticLinearResource;
///
/// let first = StaticLinearResource::<1024, 7>::new();
/// first.allocate(512).unwrap();
///
/// // A copy, or a second instance, observes the same cursor.
/// let second = first;
/// let ptr = second.allocate(64).unwrap();
/// assert_eq!(ptr.addr().get() - first.base_addr(), 512);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StaticLinearResource<const SIZE: usize, const BANK: usize> {
    slot: Option<usize>,
    policy: FailurePolicy,
}

impl<const SIZE: usize, const BANK: usize> StaticLinearResource<SIZE, BANK> {
    /// Creates (or re-attaches to) the bank keyed by `(BANK, SIZE)`.
    ///
    /// The instance is invalid (every operation fails) when the registry is
    /// full or the pool cannot fit `SIZE` more bytes.
    #[must_use]
    pub fn new() -> Self {
        let slot = REGISTRY.lock().slot(BANK, SIZE);
        let policy = FailurePolicy::default();
        if slot.is_none() {
            log::debug!("static-linear bank ({BANK}, {SIZE}): registry refused the key");
            policy.trip(&alloc_error::InvalidResourceSnafu.build());
        }
        Self { slot, policy }
    }

    /// Replaces the failure policy fired on refused operations.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The bank id this instance is keyed to.
    #[must_use]
    pub fn bank(&self) -> usize {
        BANK
    }

    /// The bank size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        SIZE
    }

    /// Address of the bank's first byte, or zero when the instance is
    /// invalid.
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.base_ptr().map_or(0, |ptr| ptr.addr().get())
    }

    fn base_ptr(&self) -> Option<NonNull<u8>> {
        let slot = self.slot?;
        let offset = REGISTRY.lock().entries[slot].offset;
        // SAFETY: the slice at `offset` lies inside the static pool.
        Some(unsafe { pool_base().add(offset) })
    }

    /// Rewinds the shared cursor to the start of the bank, for every
    /// instance keyed to it.
    pub fn reset(&self) {
        if let Some(slot) = self.slot {
            REGISTRY.lock().entries[slot].cursor = 0;
        }
    }

    /// Allocates `size` bytes (rounded up to the pointer width) by advancing
    /// the shared cursor. Zero-size requests are rejected.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.try_allocate(size).trip(self.policy)
    }

    fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let slot = self.slot;
        let slot = match slot {
            Some(slot) => slot,
            None => return alloc_error::InvalidResourceSnafu.fail(),
        };
        ensure!(size != 0, alloc_error::ZeroSizeSnafu);
        let rounded = align_up(size, BANK_ALIGNMENT);
        let mut registry = REGISTRY.lock();
        let entry = &mut registry.entries[slot];
        let available = SIZE - entry.cursor;
        ensure!(
            rounded <= available,
            alloc_error::OutOfSpaceSnafu {
                requested: rounded,
                available,
            }
        );
        let offset = entry.offset + entry.cursor;
        entry.cursor += rounded;
        // SAFETY: `offset..offset + rounded` lies inside the static pool.
        Ok(unsafe { pool_base().add(offset) })
    }

    /// Always fails: the linear family does not free individual blocks.
    pub fn free(&self, _ptr: NonNull<u8>) -> Result<(), FreeError> {
        Err(free_error::UnsupportedSnafu.build()).trip(self.policy)
    }

    /// Bytes remaining between the shared cursor and the end of the bank.
    #[must_use]
    pub fn available_size(&self) -> usize {
        match self.slot {
            Some(slot) => SIZE - REGISTRY.lock().entries[slot].cursor,
            None => 0,
        }
    }

    /// False iff the registry refused the `(BANK, SIZE)` key.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.slot.is_some()
    }
}

impl<const SIZE: usize, const BANK: usize> Default for StaticLinearResource<SIZE, BANK> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize, const BANK: usize> Resource for StaticLinearResource<SIZE, BANK> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StaticLinear
    }

    fn alignment(&self) -> usize {
        BANK_ALIGNMENT
    }

    fn is_valid(&self) -> bool {
        Self::is_valid(self)
    }

    fn base(&self) -> Option<NonNull<u8>> {
        self.base_ptr()
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
