use {
    crate::{Arena, BlockFlags},
    tracing::trace,
};

impl<const CAPACITY: usize> Arena<CAPACITY>
{
    /// Merge every run of adjacent free blocks into a single free block.
    ///
    /// Blocks never move; only free blocks grow.
    /// This covers what freeing alone cannot: a free block that was
    /// already free when its successor was freed.
    pub fn defragment(&self)
    {
        let mut offset = if self.is_initialized() { 0 } else { CAPACITY };
        while offset < CAPACITY {
            let header = self.header(offset);
            let size = if header.is_allocated() {
                header.size
            } else {
                self.coalesce_forward(offset)
            };
            offset = Self::next_offset(offset, size);
        }
    }

    /// Clear the mark of every block.
    pub (super) fn clear_marks(&self)
    {
        let mut offset = if self.is_initialized() { 0 } else { CAPACITY };
        while offset < CAPACITY {
            let header = self.header(offset);
            self.set_flags(offset, header.flags - BlockFlags::MARKED);
            offset = Self::next_offset(offset, header.size);
        }
    }

    /// Free every allocated block that was not marked,
    /// and clear the marks of the others.
    ///
    /// Returns the sum of the content sizes of the freed blocks.
    pub (super) fn sweep(&self) -> usize
    {
        let mut reclaimed = 0;
        let mut offset = if self.is_initialized() { 0 } else { CAPACITY };
        while offset < CAPACITY {
            let header = self.header(offset);
            let size = if header.is_allocated() && !header.is_marked() {
                trace!(offset, size = header.size, "sweeping unreachable block");
                reclaimed += header.size;
                self.release(offset)
            } else {
                self.set_flags(offset, header.flags - BlockFlags::MARKED);
                header.size
            };
            offset = Self::next_offset(offset, size);
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests
{
    use {
        crate::HEADER_SIZE,
        super::*,
        proptest::{self as p, proptest},
    };

    const SMALL: usize = 1024;

    fn sizes<const CAPACITY: usize>(arena: &Arena<CAPACITY>)
        -> Vec<(usize, bool)>
    {
        arena.blocks()
            .map(|(_, header)| (header.size, header.is_allocated()))
            .collect()
    }

    #[test]
    fn defragment_uninitialized_is_noop()
    {
        let arena = Arena::<SMALL>::new();
        arena.defragment();
        assert!(!arena.is_initialized());
    }

    #[test]
    fn defragment_merges_what_free_leaves_behind()
    {
        let arena = Arena::<SMALL>::new();
        let a = arena.allocate(64).unwrap().as_ptr();
        let b = arena.allocate(64).unwrap().as_ptr();
        let _c = arena.allocate(64).unwrap();

        arena.deallocate(a);
        arena.deallocate(b);
        assert_eq!(sizes(&arena)[.. 2], [(64, false), (64, false)]);

        arena.defragment();
        assert_eq!(sizes(&arena)[.. 2], [(64 + HEADER_SIZE + 64, false), (64, true)]);
    }

    #[test]
    fn free_order_does_not_matter_after_defragment()
    {
        let layout = |a_first: bool| {
            let arena = Arena::<SMALL>::new();
            let a = arena.allocate(40).unwrap().as_ptr();
            let b = arena.allocate(72).unwrap().as_ptr();
            let _c = arena.allocate(8).unwrap();
            if a_first {
                arena.deallocate(a);
                arena.deallocate(b);
            } else {
                arena.deallocate(b);
                arena.deallocate(a);
            }
            arena.defragment();
            sizes(&arena)
        };
        assert_eq!(layout(true), layout(false));
        assert_eq!(layout(true)[0], (40 + HEADER_SIZE + 72, false));
    }

    #[test]
    fn sweep_frees_unmarked_and_clears_marks()
    {
        let arena = Arena::<SMALL>::new();
        let a = arena.allocate(24).unwrap();
        let _b = arena.allocate(40).unwrap();
        let _c = arena.allocate(8).unwrap();

        let offset = arena.offset_of_content(a.as_ptr()).unwrap();
        arena.set_flags(offset, BlockFlags::ALLOCATED | BlockFlags::MARKED);

        assert_eq!(arena.sweep(), 48);
        assert_eq!(
            sizes(&arena),
            [
                (24, true),
                (40, false),
                (SMALL - 3 * HEADER_SIZE - 64, false),
            ],
        );
        assert!(arena.blocks().all(|(_, header)| !header.is_marked()));
    }

    #[test]
    fn sweep_uninitialized_reclaims_nothing()
    {
        let arena = Arena::<SMALL>::new();
        assert_eq!(arena.sweep(), 0);
    }

    proptest!
    {
        #[test]
        fn defragment_is_idempotent(
            ops in p::collection::vec((1usize ..= 200, p::bool::ANY), 1 .. 48),
        )
        {
            let arena = Box::new(Arena::<8192>::new());
            let mut live = Vec::new();
            for (size, free_one) in ops {
                if let Ok(Some(ptr)) = arena.try_allocate(size) {
                    live.push(ptr.as_ptr());
                }
                if free_one && !live.is_empty() {
                    arena.deallocate(live.swap_remove(size % live.len()));
                }
            }

            arena.defragment();
            let once = sizes(&*arena);
            arena.defragment();
            assert_eq!(sizes(&*arena), once);

            // No two neighbours are free.
            for pair in once.windows(2) {
                assert!(pair[0].1 || pair[1].1);
            }
        }
    }
}
