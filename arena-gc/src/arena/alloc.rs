use {
    super::{Arena, BlockFlags, BlockHeader, HEADER_SIZE, round_up},
    crate::{CapacityError, InvalidFreeError, InvalidFreeReason},
    std::ptr::NonNull,
    tracing::trace,
};

impl<const CAPACITY: usize> Arena<CAPACITY>
{
    /// Allocate a block with at least `size` bytes of content.
    ///
    /// Returns [`None`] if `size` is zero, without touching the arena.
    /// Otherwise the size is rounded up to a multiple of [`WORD_SIZE`],
    /// and the first free block that is large enough is handed out,
    /// split if the remainder can hold a block of its own.
    /// Adjacent free blocks are merged while searching.
    ///
    /// The content is word-aligned and is not cleared.
    ///
    /// # Panics
    ///
    /// Panics if a collection is in progress.
    ///
    /// [`WORD_SIZE`]: `super::WORD_SIZE`
    pub fn try_allocate(&self, size: usize)
        -> Result<Option<NonNull<u8>>, CapacityError>
    {
        if size == 0 {
            return Ok(None);
        }

        assert!(
            !self.is_collecting(),
            "Cannot allocate during garbage collection",
        );

        self.ensure_initialized();

        let Some(rounded) = round_up(size)
            else { return Err(self.capacity_error(size)) };

        let Some(offset) = self.find_fit(rounded)
            else { return Err(self.capacity_error(size)) };

        self.split(offset, rounded);
        self.set_flags(offset, BlockFlags::ALLOCATED);

        trace!(offset, size = rounded, "allocated block");

        Ok(Some(self.content_ptr(offset)))
    }

    /// Like [`try_allocate`][`Self::try_allocate`],
    /// but running out of capacity is fatal.
    ///
    /// # Panics
    ///
    /// Panics if no free block is large enough.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>>
    {
        self.try_allocate(size)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    /// Free a block previously returned by an allocation.
    ///
    /// Freeing a null pointer does nothing.
    /// The freed block absorbs any free blocks that directly follow it.
    /// Free blocks that precede it are left alone;
    /// [`defragment`][`Self::defragment`] merges those.
    pub fn try_deallocate(&self, ptr: *mut u8) -> Result<(), InvalidFreeError>
    {
        if ptr.is_null() {
            return Ok(());
        }

        let offset = self.allocated_block_at(ptr)?;
        self.release(offset);

        Ok(())
    }

    /// Like [`try_deallocate`][`Self::try_deallocate`],
    /// but an invalid pointer is fatal.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not the content of an allocated block,
    /// which includes freeing the same block twice.
    pub fn deallocate(&self, ptr: *mut u8)
    {
        self.try_deallocate(ptr)
            .unwrap_or_else(|err| panic!("{}", err))
    }

    /// Mark the block at `offset` as free and merge its free successors.
    ///
    /// Returns the content size of the resulting free block.
    pub (crate) fn release(&self, offset: usize) -> usize
    {
        self.set_flags(offset, BlockFlags::empty());
        let size = self.coalesce_forward(offset);
        trace!(offset, size, "released block");
        size
    }

    /// Merge every free block directly following the block at `offset`
    /// into that block.
    ///
    /// Returns the new content size of the block at `offset`.
    pub (crate) fn coalesce_forward(&self, offset: usize) -> usize
    {
        let mut size = self.header(offset).size;
        loop {
            let next = Self::next_offset(offset, size);
            if next >= CAPACITY {
                break;
            }
            let next_header = self.header(next);
            if next_header.is_allocated() {
                break;
            }
            // The absorbed header becomes part of the content.
            size += HEADER_SIZE + next_header.size;
        }
        self.set_size(offset, size);
        size
    }

    /// Find the first free block with at least `size` bytes of content,
    /// merging runs of free blocks along the way.
    fn find_fit(&self, size: usize) -> Option<usize>
    {
        let mut offset = 0;
        loop {
            let mut header = self.header(offset);
            if !header.is_allocated() {
                header.size = self.coalesce_forward(offset);
                if header.size >= size {
                    return Some(offset);
                }
            }
            offset = Self::next_offset(offset, header.size);
            if offset >= CAPACITY {
                return None;
            }
        }
    }

    /// Shrink the block at `offset` to `size` bytes of content,
    /// turning the excess into a new free block.
    ///
    /// If the excess cannot hold a header and at least one byte of content,
    /// the block keeps its size.
    fn split(&self, offset: usize, size: usize)
    {
        let header = self.header(offset);
        debug_assert!(header.size >= size);

        if header.size <= size + HEADER_SIZE {
            return;
        }

        let remainder = Self::next_offset(offset, size);
        let remainder_size = header.size - size - HEADER_SIZE;
        self.set_header(remainder, BlockHeader::free(remainder_size));
        self.set_size(offset, size);

        trace!(offset, size, remainder_size, "split block");
    }

    /// Offset of the allocated block whose content starts at `ptr`.
    ///
    /// The block chain is walked to confirm that
    /// the recovered header is an actual block boundary.
    fn allocated_block_at(&self, ptr: *const u8)
        -> Result<usize, InvalidFreeError>
    {
        let error = |reason| InvalidFreeError{address: ptr as usize, reason};

        if !self.is_initialized() {
            return Err(error(InvalidFreeReason::Uninitialized));
        }

        let offset = self.offset_of_content(ptr)
            .ok_or_else(|| error(InvalidFreeReason::OutOfRange))?;

        let (_, header) = self.blocks()
            .take_while(|&(at, _)| at <= offset)
            .find(|&(at, _)| at == offset)
            .ok_or_else(|| error(InvalidFreeReason::NotABlock))?;

        if !header.is_allocated() {
            return Err(error(InvalidFreeReason::NotAllocated));
        }

        Ok(offset)
    }

    fn capacity_error(&self, requested: usize) -> CapacityError
    {
        let largest_free = self.stats().largest_free;
        CapacityError{requested, largest_free}
    }
}
