//! Conservative mark-and-sweep garbage collection.
//!
//! A collection marks every allocated block reachable from a set of
//! candidate words, then frees the allocated blocks that were not marked.
//! Nothing about the contents of blocks is known,
//! so every word of a reachable block is itself a candidate.
//! Values that merely look like references keep blocks alive;
//! this errs on the side of retaining too much, never too little.
//!
//! Collections do not move blocks.
//! [`Arena::defragment`] merges the free blocks left behind.

pub use self::roots::*;

mod mark;
mod roots;
mod sweep;

use {
    self::mark::Marker,
    crate::{Arena, CapacityError},
    std::{hint::black_box, ptr::NonNull},
    tracing::{debug, warn},
};

impl<const CAPACITY: usize> Arena<CAPACITY>
{
    /// Collect garbage, using the given words as the root set.
    ///
    /// Returns the number of content bytes reclaimed.
    /// Collecting an uninitialized arena reclaims nothing.
    pub fn collect_with_roots<I>(&self, roots: I) -> usize
        where I: IntoIterator<Item = usize>
    {
        if !self.is_initialized() {
            return 0;
        }

        let _collecting = self.begin_collection();

        self.clear_marks();

        let mut marker = Marker::new(self);
        marker.mark_roots(roots);
        let marked = marker.finish();

        let reclaimed = self.sweep();

        debug!(marked, reclaimed, "Collection finished");

        reclaimed
    }

    /// Collect garbage, using the registers and the call stack
    /// between this frame and `origin` as the root set.
    ///
    /// Returns the number of content bytes reclaimed.
    /// Without an origin, or with an origin below this frame,
    /// the stack cannot be scanned and nothing is reclaimed.
    #[inline(never)]
    pub fn collect(&self, origin: Option<StackOrigin>) -> usize
    {
        if !self.is_initialized() {
            return 0;
        }

        let Some(origin) = origin else {
            warn!("No stack origin recorded; skipping collection");
            return 0;
        };

        let registers = Registers::capture();

        let top = 0u8;
        let Some(stack) = StackRange::new(black_box(&top) as *const u8, origin)
            else { return 0 };

        debug!(
            registers = registers.words().len(),
            stack_words = stack.len(),
            "Scanning roots",
        );

        // SAFETY: The range ends in this frame, which is live.
        let stack_words = unsafe { stack.words() };
        let roots = registers.words().iter().copied().chain(stack_words);
        self.collect_with_roots(roots)
    }

    /// Allocate, collecting garbage first if the arena is exhausted.
    ///
    /// On exhaustion this collects with [`collect`][`Self::collect`],
    /// defragments, and tries once more.
    /// Without an origin the collection reclaims nothing.
    pub fn try_allocate_or_collect(
        &self,
        size: usize,
        origin: Option<StackOrigin>,
    ) -> Result<Option<NonNull<u8>>, CapacityError>
    {
        match self.try_allocate(size) {
            Ok(ptr) => Ok(ptr),
            Err(err) => {
                debug!(%err, "Arena exhausted; collecting");
                self.collect(origin);
                self.defragment();
                self.try_allocate(size)
            },
        }
    }
}

#[cfg(test)]
mod tests
{
    use {crate::HEADER_SIZE, super::*};

    #[test]
    fn collecting_uninitialized_arena_reclaims_nothing()
    {
        let arena = Arena::<1024>::new();
        assert_eq!(arena.collect_with_roots([]), 0);
        assert_eq!(arena.collect(None), 0);
        assert!(!arena.is_initialized());
    }

    #[test]
    fn collecting_without_origin_frees_nothing()
    {
        let arena = Arena::<4096>::new();
        for _ in 0 .. 4 {
            arena.allocate(64).unwrap();
        }
        assert_eq!(arena.collect(None), 0);
        assert_eq!(arena.stats().allocated_blocks, 4);
    }

    #[test]
    fn rooted_block_survives_and_garbage_is_reclaimed()
    {
        let arena = Box::new(Arena::<65536>::new());
        let a = arena.allocate(256).unwrap().as_ptr();
        for _ in 0 .. 5 {
            arena.allocate(128).unwrap();
        }

        assert_eq!(arena.collect_with_roots([a as usize]), 5 * 128);

        arena.defragment();
        let blocks: Vec<_> = arena.blocks().map(|(_, header)| header).collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].is_allocated());
        assert_eq!(blocks[0].size, 256);
        assert!(!blocks[1].is_allocated());
        assert_eq!(blocks[1].size, 65536 - 2 * HEADER_SIZE - 256);
    }

    #[test]
    fn interior_root_keeps_chain_alive()
    {
        let arena = Arena::<4096>::new();
        let a = arena.allocate(32).unwrap().as_ptr();
        let b = arena.allocate(32).unwrap().as_ptr();
        let garbage = arena.allocate(32).unwrap().as_ptr();

        // SAFETY: Each block holds four words.
        unsafe {
            a.cast::<usize>().add(2).write(b as usize + 17);
            garbage.cast::<usize>().write(a as usize);
        }

        // SAFETY: Still within a.
        let interior = unsafe { a.add(31) } as usize;
        assert_eq!(arena.collect_with_roots([interior]), 32);

        let allocated = arena.blocks()
            .filter(|(_, header)| header.is_allocated())
            .count();
        assert_eq!(allocated, 2);
    }

    #[test]
    fn unrooted_cycle_is_reclaimed()
    {
        let arena = Arena::<4096>::new();
        let a = arena.allocate(8).unwrap().as_ptr();
        let b = arena.allocate(8).unwrap().as_ptr();

        // SAFETY: Each block holds one word.
        unsafe {
            a.cast::<usize>().write(b as usize);
            b.cast::<usize>().write(a as usize);
        }

        assert_eq!(arena.collect_with_roots([]), 16);
        arena.defragment();
        assert_eq!(arena.stats().blocks, 1);
    }

    #[test]
    fn repeated_collections_are_stable()
    {
        let arena = Arena::<4096>::new();
        let a = arena.allocate(64).unwrap().as_ptr();
        assert_eq!(arena.collect_with_roots([a as usize]), 0);
        assert_eq!(arena.collect_with_roots([a as usize]), 0);
        assert_eq!(arena.collect_with_roots([]), 64);
        assert_eq!(arena.collect_with_roots([]), 0);
    }

    #[test]
    fn allocation_is_possible_after_collection()
    {
        let arena = Arena::<4096>::new();
        arena.allocate(64).unwrap();
        arena.collect_with_roots([]);
        assert!(!arena.is_collecting());
        assert!(arena.allocate(64).is_some());
    }

    #[test]
    #[should_panic(expected = "Cannot allocate during garbage collection")]
    fn allocating_while_collecting_is_fatal()
    {
        let arena = Arena::<4096>::new();
        let _collecting = arena.begin_collection();
        arena.allocate(8);
    }
}
