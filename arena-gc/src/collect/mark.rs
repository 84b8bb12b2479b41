use {
    crate::{Arena, BlockFlags, WORD_SIZE},
    smallvec::SmallVec,
};

/// Marks the blocks reachable from a set of candidate words.
///
/// Any word whose value falls within a block's header or content
/// counts as a reference to that block, so interior pointers keep
/// blocks alive. Words that point into free blocks are discarded.
///
/// Marked blocks are queued on a work-list and their contents are
/// scanned word by word, which avoids recursion depth proportional to
/// the length of pointer chains. Blocks are marked before they are queued
/// and never queued twice, which guarantees termination on cyclic data.
pub (super) struct Marker<'a, const CAPACITY: usize>
{
    arena: &'a Arena<CAPACITY>,

    /// Offsets of marked blocks whose contents are yet to be scanned.
    ///
    /// Offsets rather than addresses, so that the work-list
    /// does not itself look like a set of references.
    pending: SmallVec<[usize; 32]>,

    /// Number of blocks marked so far.
    marked: usize,
}

impl<'a, const CAPACITY: usize> Marker<'a, CAPACITY>
{
    pub (super) fn new(arena: &'a Arena<CAPACITY>) -> Self
    {
        Self{arena, pending: SmallVec::new(), marked: 0}
    }

    /// Mark every block reachable from the given candidate words.
    pub (super) fn mark_roots<I>(&mut self, roots: I)
        where I: IntoIterator<Item = usize>
    {
        for word in roots {
            self.mark_candidate(word);
        }
        self.drain();
    }

    /// Number of blocks marked.
    pub (super) fn finish(self) -> usize
    {
        debug_assert!(self.pending.is_empty());
        self.marked
    }

    fn mark_candidate(&mut self, word: usize)
    {
        let Some((offset, header)) = self.arena.block_containing(word)
            else { return };

        // Free blocks never hold live references.
        if !header.is_allocated() {
            return;
        }

        // Already marked blocks are scanned or queued.
        if header.is_marked() {
            return;
        }

        self.arena.set_flags(offset, header.flags | BlockFlags::MARKED);
        self.pending.push(offset);
        self.marked += 1;
    }

    fn drain(&mut self)
    {
        while let Some(offset) = self.pending.pop() {
            let size = self.arena.header(offset).size;
            for slot in 0 .. size / WORD_SIZE {
                let word = self.arena.content_word(offset, slot);
                self.mark_candidate(word);
            }
        }
    }
}
