use {
    bitflags::bitflags,
    std::mem::{align_of, size_of},
};

/// Size of a machine word.
///
/// Block contents are aligned to this value,
/// and every content size is a multiple of it.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Number of bytes occupied by a block header.
///
/// The content of a block starts this many bytes after its header.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

// Contents directly follow headers, so headers must keep them word-aligned.
const _: () = assert!(align_of::<BlockHeader>() == WORD_SIZE);
const _: () = assert!(HEADER_SIZE % WORD_SIZE == 0);

bitflags!
{
    /// State bits stored in each block header.
    pub struct BlockFlags: u8
    {
        /// The block is handed out to a user.
        const ALLOCATED = 0b01;

        /// The block was reached during the current collection.
        ///
        /// Meaningless outside of a collection.
        const MARKED = 0b10;
    }
}

/// Data at the start of each block.
///
/// The zeroed header is how an uninitialized arena presents itself:
/// a first block with a size of zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct BlockHeader
{
    /// Content capacity in bytes, excluding the header.
    pub size: usize,

    /// Allocation and mark state.
    pub flags: BlockFlags,
}

impl BlockHeader
{
    /// Header of a free block with the given content size.
    pub fn free(size: usize) -> Self
    {
        Self{size, flags: BlockFlags::empty()}
    }

    /// Whether the block is handed out to a user.
    pub fn is_allocated(&self) -> bool
    {
        self.flags.contains(BlockFlags::ALLOCATED)
    }

    /// Whether the block was reached during the current collection.
    pub fn is_marked(&self) -> bool
    {
        self.flags.contains(BlockFlags::MARKED)
    }
}

/// Round `size` up to the next multiple of [`WORD_SIZE`].
///
/// Returns [`None`] if the result does not fit in a [`usize`].
pub fn round_up(size: usize) -> Option<usize>
{
    // WORD_SIZE is a power of two, so masking clears the remainder.
    Some(size.checked_add(WORD_SIZE - 1)? & !(WORD_SIZE - 1))
}
