//! The process arena and operations on it.
//!
//! Each thread that uses these functions gets its own arena
//! of [`ARENA_CAPACITY`] bytes, created uninitialized
//! and initialized by the first allocation.
//! The arenas of different threads are independent: a pointer
//! must never be freed or collected on a thread other than
//! the one that allocated it.
//!
//! Conservative collection needs to know where the stack begins.
//! Wrap the program, or the part of it that collects, in [`run`].
//! Outside of [`run`], [`collect`] reclaims nothing.

use {
    crate::{Arena, ArenaStats, BlockInfo, StackOrigin, ARENA_CAPACITY},
    std::{cell::Cell, hint::black_box, ptr},
    tracing::debug,
};

thread_local!
{
    static ARENA: Arena<ARENA_CAPACITY> = const { Arena::new() };

    static STACK_ORIGIN: Cell<Option<StackOrigin>> = const { Cell::new(None) };
}

/// Call `f` with the stack origin recorded in this frame.
///
/// Collections within `f` scan the stack from their own frame up to here.
/// Nested calls keep the origin of the outermost call.
#[inline(never)]
pub fn run<F, R>(f: F) -> R
    where F: FnOnce() -> R
{
    let anchor = 0usize;
    let origin = StackOrigin::at(black_box(&anchor));

    let recorded = STACK_ORIGIN.with(|cell| {
        if cell.get().is_some() {
            return false;
        }
        debug!(origin = origin.address(), "Recorded stack origin");
        cell.set(Some(origin));
        true
    });

    let _origin = OriginGuard{recorded};
    enter(f)
}

/// Keeps the body of `f` in a frame below the anchor of [`run`].
#[inline(never)]
fn enter<F, R>(f: F) -> R
    where F: FnOnce() -> R
{
    f()
}

/// Forgets the stack origin when the recording [`run`] returns.
struct OriginGuard
{
    recorded: bool,
}

impl Drop for OriginGuard
{
    fn drop(&mut self)
    {
        if self.recorded {
            STACK_ORIGIN.with(|cell| cell.set(None));
        }
    }
}

/// The stack origin recorded by [`run`], if any.
pub fn stack_origin() -> Option<StackOrigin>
{
    STACK_ORIGIN.with(Cell::get)
}

/// Allocate at least `size` bytes from the process arena.
///
/// Returns null if `size` is zero.
/// See [`Arena::allocate`].
///
/// # Panics
///
/// Panics if the arena cannot satisfy the request.
pub fn allocate(size: usize) -> *mut u8
{
    ARENA.with(|arena| arena.allocate(size))
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// Like [`allocate`], but collect and defragment once
/// before giving up on an exhausted arena.
///
/// # Panics
///
/// Panics if the arena still cannot satisfy the request.
pub fn allocate_or_collect(size: usize) -> *mut u8
{
    let origin = stack_origin();
    ARENA.with(|arena| arena.try_allocate_or_collect(size, origin))
        .unwrap_or_else(|err| panic!("{}", err))
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// Free a block of the process arena. Null is ignored.
///
/// # Panics
///
/// Panics if `ptr` is not the content of an allocated block.
pub fn deallocate(ptr: *mut u8)
{
    ARENA.with(|arena| arena.deallocate(ptr));
}

/// Collect garbage in the process arena,
/// scanning the registers and the stack up to the origin.
///
/// Returns the number of content bytes reclaimed.
/// Without an origin recorded by [`run`], nothing is collected.
pub fn collect() -> usize
{
    let origin = stack_origin();
    ARENA.with(|arena| arena.collect(origin))
}

/// Merge adjacent free blocks of the process arena.
pub fn defragment()
{
    ARENA.with(Arena::defragment);
}

/// Zero the process arena, discarding every block.
pub fn reset_arena()
{
    ARENA.with(Arena::reset);
}

/// Render the process arena as text.
pub fn dump_arena() -> String
{
    ARENA.with(|arena| arena.dump().to_string())
}

/// Summarize the blocks of the process arena.
pub fn stats() -> ArenaStats
{
    ARENA.with(Arena::stats)
}

/// Describe every block of the process arena.
pub fn layout() -> Vec<BlockInfo>
{
    ARENA.with(Arena::layout)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn zero_size_is_null()
    {
        assert!(allocate(0).is_null());
        assert!(allocate_or_collect(0).is_null());
        assert!(layout().is_empty());
    }

    #[test]
    fn deallocate_null_is_noop()
    {
        deallocate(ptr::null_mut());
        assert!(layout().is_empty());
    }

    #[test]
    fn reset_discards_blocks()
    {
        let ptr = allocate(32);
        assert!(!ptr.is_null());
        assert_eq!(stats().allocated_blocks, 1);

        reset_arena();
        assert!(layout().is_empty());
        assert_eq!(dump_arena(), "Dumping arena...\nArena has not been initialized.\n\n");
    }

    #[test]
    fn run_records_outermost_origin()
    {
        assert_eq!(stack_origin(), None);
        run(|| {
            let outer = stack_origin();
            assert!(outer.is_some());
            run(|| assert_eq!(stack_origin(), outer));
            assert_eq!(stack_origin(), outer);
        });
        assert_eq!(stack_origin(), None);
    }

    #[test]
    fn run_returns_result()
    {
        assert_eq!(run(|| 42), 42);
    }

    #[test]
    fn collect_without_origin_frees_nothing()
    {
        assert_eq!(collect(), 0);
        allocate(64);
        assert_eq!(collect(), 0);
        assert_eq!(stats().allocated_blocks, 1);
    }
}
