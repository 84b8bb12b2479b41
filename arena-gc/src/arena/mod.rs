//! The arena and the blocks it is made of.
//!
//! # Layout
//!
//! An arena is a fixed-size byte buffer that is tiled by blocks.
//! Each [block header][`BlockHeader`] is immediately followed by
//! the block's content, which is immediately followed by the next header.
//! The last block ends exactly at the end of the arena.
//! Hence the blocks form a linked sequence that is walked by offsets:
//! the block after the one at `offset` lives at
//! `offset + HEADER_SIZE + size`.
//!
//! Offsets are used internally throughout.
//! Pointers are only formed when handing content out to users,
//! and only accepted back when users return them.
//!
//! # Initialization
//!
//! A zeroed arena is uninitialized: its first header has a size of zero.
//! The first allocation replaces it by a single free block
//! spanning the entire capacity minus its own header.
//! [`Arena::reset`] zeroes the arena again.

pub use self::block::*;

mod alloc;
mod block;

use {
    serde::Serialize,
    std::{
        cell::{Cell, UnsafeCell},
        ptr::{self, NonNull, addr_of_mut},
        slice,
    },
};

/// Capacity of the process arena, in bytes.
pub const ARENA_CAPACITY: usize = 65536;

/// Backing storage of an arena, aligned for block headers.
#[repr(C)]
struct Memory<const CAPACITY: usize>
{
    _align: [BlockHeader; 0],
    bytes: [u8; CAPACITY],
}

/// Fixed-capacity region of memory managed as a sequence of blocks.
///
/// See the [module documentation][`self`] for the layout.
/// Arenas are not thread-safe; they are used by a single thread.
pub struct Arena<const CAPACITY: usize = ARENA_CAPACITY>
{
    /// Content handed out to users aliases this memory,
    /// so it is only ever accessed through raw pointers.
    memory: UnsafeCell<Memory<CAPACITY>>,

    /// Set for the duration of a collection.
    collecting: Cell<bool>,
}

/// Summary of the blocks in an arena.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ArenaStats
{
    /// Number of blocks, free or allocated.
    pub blocks: usize,

    /// Number of allocated blocks.
    pub allocated_blocks: usize,

    /// Sum of the content sizes of allocated blocks.
    pub allocated_bytes: usize,

    /// Sum of the content sizes of free blocks.
    pub free_bytes: usize,

    /// Content size of the largest free block.
    pub largest_free: usize,
}

impl<const CAPACITY: usize> Arena<CAPACITY>
{
    const CAPACITY_IS_VALID: () = assert!(
        CAPACITY > HEADER_SIZE && CAPACITY % WORD_SIZE == 0,
        "Arena capacity must fit a header and be a multiple of the word size",
    );

    /// Create an uninitialized arena.
    pub const fn new() -> Self
    {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_VALID;
        let memory = Memory{_align: [], bytes: [0; CAPACITY]};
        Self{memory: UnsafeCell::new(memory), collecting: Cell::new(false)}
    }

    /// Number of bytes in the arena, headers included.
    pub const fn capacity(&self) -> usize
    {
        CAPACITY
    }

    /// Whether `address` falls within the arena.
    pub fn contains(&self, address: usize) -> bool
    {
        let base = self.base() as usize;
        address >= base && address - base < CAPACITY
    }

    /// Whether any allocation has taken place since creation or reset.
    pub fn is_initialized(&self) -> bool
    {
        self.header(0).size != 0
    }

    /// Discard all blocks by zeroing the arena.
    ///
    /// Any pointers into the arena become dangling.
    pub fn reset(&self)
    {
        // SAFETY: The memory is CAPACITY bytes long.
        unsafe { ptr::write_bytes(self.base(), 0, CAPACITY); }
    }

    /// Summarize the blocks in the arena.
    ///
    /// An uninitialized arena has no blocks.
    pub fn stats(&self) -> ArenaStats
    {
        let mut stats = ArenaStats::default();
        for (_, header) in self.blocks() {
            stats.blocks += 1;
            if header.is_allocated() {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += header.size;
            } else {
                stats.free_bytes += header.size;
                stats.largest_free = stats.largest_free.max(header.size);
            }
        }
        stats
    }

    /// Establish the initial free block if the arena is uninitialized.
    pub (crate) fn ensure_initialized(&self)
    {
        if !self.is_initialized() {
            self.set_header(0, BlockHeader::free(CAPACITY - HEADER_SIZE));
        }
    }

    /// Pointer to the first byte of the arena.
    ///
    /// Every pointer into the arena is derived from this one.
    fn base(&self) -> *mut u8
    {
        self.memory.get().cast::<u8>()
    }

    /// Offset of the header that follows the block at `offset`.
    ///
    /// Equal to [`CAPACITY`][`Self::capacity`] for the last block.
    pub (crate) fn next_offset(offset: usize, size: usize) -> usize
    {
        offset.saturating_add(HEADER_SIZE).saturating_add(size)
    }

    /// Read the header at `offset`.
    pub (crate) fn header(&self, offset: usize) -> BlockHeader
    {
        debug_assert!(offset % WORD_SIZE == 0);
        debug_assert!(offset + HEADER_SIZE <= CAPACITY);
        // SAFETY: Offset is in bounds and aligned for a header.
        unsafe { ptr::read(self.base().add(offset).cast::<BlockHeader>()) }
    }

    /// Write the header at `offset`.
    pub (crate) fn set_header(&self, offset: usize, header: BlockHeader)
    {
        self.set_size(offset, header.size);
        self.set_flags(offset, header.flags);
    }

    /// Overwrite the size in the header at `offset`.
    pub (crate) fn set_size(&self, offset: usize, size: usize)
    {
        debug_assert!(offset + HEADER_SIZE <= CAPACITY);
        // Fields are written individually so that padding bytes
        // keep their old values; merged headers become content.
        // SAFETY: Offset is in bounds and aligned for a header.
        unsafe {
            let header = self.base().add(offset).cast::<BlockHeader>();
            addr_of_mut!((*header).size).write(size);
        }
    }

    /// Overwrite the flags in the header at `offset`.
    pub (crate) fn set_flags(&self, offset: usize, flags: BlockFlags)
    {
        debug_assert!(offset + HEADER_SIZE <= CAPACITY);
        // SAFETY: Offset is in bounds and aligned for a header.
        unsafe {
            let header = self.base().add(offset).cast::<BlockHeader>();
            addr_of_mut!((*header).flags).write(flags);
        }
    }

    /// Pointer to the content of the block at `offset`.
    pub (crate) fn content_ptr(&self, offset: usize) -> NonNull<u8>
    {
        debug_assert!(offset + HEADER_SIZE <= CAPACITY);
        // SAFETY: Offset is in bounds, and base is never null.
        unsafe { NonNull::new_unchecked(self.base().add(offset + HEADER_SIZE)) }
    }

    /// Offset of the header that precedes `ptr`, if `ptr` lies in the arena.
    pub (crate) fn offset_of_content(&self, ptr: *const u8) -> Option<usize>
    {
        let offset = (ptr as usize)
            .checked_sub(self.base() as usize)?
            .checked_sub(HEADER_SIZE)?;
        (offset + HEADER_SIZE <= CAPACITY).then_some(offset)
    }

    /// The content of the block at `offset`, as bytes.
    pub (crate) fn content_bytes(&self, offset: usize, size: usize) -> &[u8]
    {
        debug_assert!(Self::next_offset(offset, size) <= CAPACITY);
        // SAFETY: The content lies within the arena,
        //         and the arena is zero-initialized.
        unsafe { slice::from_raw_parts(self.content_ptr(offset).as_ptr(), size) }
    }

    /// Read the `slot`th word of the content of the block at `offset`.
    pub (crate) fn content_word(&self, offset: usize, slot: usize) -> usize
    {
        let at = offset + HEADER_SIZE + slot * WORD_SIZE;
        debug_assert!(at + WORD_SIZE <= CAPACITY);
        // SAFETY: Contents are word-aligned and within the arena.
        unsafe { ptr::read(self.base().add(at).cast::<usize>()) }
    }

    /// Iterate over the blocks, yielding their offsets and headers.
    ///
    /// The headers are read lazily, so the iterator
    /// must not be held across changes to the arena.
    pub (crate) fn blocks(&self) -> Blocks<'_, CAPACITY>
    {
        let offset = if self.is_initialized() { 0 } else { CAPACITY };
        Blocks{arena: self, offset}
    }

    /// Find the block whose header or content contains `address`.
    pub (crate) fn block_containing(&self, address: usize)
        -> Option<(usize, BlockHeader)>
    {
        if !self.contains(address) {
            return None;
        }
        let relative = address - self.base() as usize;
        // Blocks tile the arena in order, so the first block
        // that ends past the address is the one containing it.
        self.blocks()
            .find(|&(offset, header)|
                relative < Self::next_offset(offset, header.size))
    }

    /// Whether a collection is in progress.
    pub (crate) fn is_collecting(&self) -> bool
    {
        self.collecting.get()
    }

    /// Flag the arena as being collected until the guard is dropped.
    pub (crate) fn begin_collection(&self) -> CollectionGuard<'_, CAPACITY>
    {
        assert!(!self.collecting.replace(true), "Collection is not reentrant");
        CollectionGuard{arena: self}
    }
}

impl<const CAPACITY: usize> Default for Arena<CAPACITY>
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Iterator returned by [`Arena::blocks`].
pub (crate) struct Blocks<'a, const CAPACITY: usize>
{
    arena: &'a Arena<CAPACITY>,
    offset: usize,
}

impl<'a, const CAPACITY: usize> Iterator for Blocks<'a, CAPACITY>
{
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.offset >= CAPACITY {
            return None;
        }
        let offset = self.offset;
        let header = self.arena.header(offset);
        self.offset = Arena::<CAPACITY>::next_offset(offset, header.size);
        Some((offset, header))
    }
}

/// Clears the collecting flag of an arena when dropped.
pub (crate) struct CollectionGuard<'a, const CAPACITY: usize>
{
    arena: &'a Arena<CAPACITY>,
}

impl<'a, const CAPACITY: usize> Drop for CollectionGuard<'a, CAPACITY>
{
    fn drop(&mut self)
    {
        self.arena.collecting.set(false);
    }
}
