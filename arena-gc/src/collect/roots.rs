//! Discovery of the conservative root set.
//!
//! The roots are every word in the general-purpose registers
//! and every word on the call stack between the collecting frame
//! and the stack origin. No filtering takes place here;
//! deciding which words look like pointers is up to the marker.
//!
//! The stack origin is an approximation of the highest stack address,
//! taken from a local variable in a frame close to program entry.
//! This assumes one contiguous stack that grows toward lower addresses.
//! Locals of frames above the origin are not scanned.
//! Without an origin the stack cannot be scanned at all,
//! and a collection must not take place.

use {
    crate::WORD_SIZE,
    std::{arch::asm, ptr},
    tracing::warn,
};

#[cfg(target_arch = "x86")]
const REGISTER_COUNT: usize = 8;

#[cfg(target_arch = "x86_64")]
const REGISTER_COUNT: usize = 16;

// x0 through x30, and sp.
#[cfg(target_arch = "aarch64")]
const REGISTER_COUNT: usize = 32;

#[cfg(not(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
)))]
compile_error!("Register capture is not implemented for this architecture");

/// Snapshot of the general-purpose registers.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Registers([usize; REGISTER_COUNT]);

impl Registers
{
    /// Capture the general-purpose registers.
    ///
    /// This is always inlined, so that callee-saved registers
    /// spilled by the caller's prologue stay in the caller's frame.
    #[inline(always)]
    pub fn capture() -> Self
    {
        let mut words = [0usize; REGISTER_COUNT];
        // SAFETY: The buffer holds exactly REGISTER_COUNT words.
        unsafe { capture_into(words.as_mut_ptr()); }
        Self(words)
    }

    /// The captured words.
    pub fn words(&self) -> &[usize]
    {
        &self.0
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
unsafe fn capture_into(buf: *mut usize)
{
    asm!(
        "mov [{buf}], rax",
        "mov [{buf} + 8], rbx",
        "mov [{buf} + 16], rcx",
        "mov [{buf} + 24], rdx",
        "mov [{buf} + 32], rsi",
        "mov [{buf} + 40], rdi",
        "mov [{buf} + 48], rbp",
        "mov [{buf} + 56], rsp",
        "mov [{buf} + 64], r8",
        "mov [{buf} + 72], r9",
        "mov [{buf} + 80], r10",
        "mov [{buf} + 88], r11",
        "mov [{buf} + 96], r12",
        "mov [{buf} + 104], r13",
        "mov [{buf} + 112], r14",
        "mov [{buf} + 120], r15",
        buf = in(reg) buf,
        options(nostack, preserves_flags),
    );
}

#[cfg(target_arch = "x86")]
#[inline(always)]
unsafe fn capture_into(buf: *mut usize)
{
    asm!(
        "mov [{buf}], eax",
        "mov [{buf} + 4], ebx",
        "mov [{buf} + 8], ecx",
        "mov [{buf} + 12], edx",
        "mov [{buf} + 16], esi",
        "mov [{buf} + 20], edi",
        "mov [{buf} + 24], ebp",
        "mov [{buf} + 28], esp",
        buf = in(reg) buf,
        options(nostack, preserves_flags),
    );
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn capture_into(buf: *mut usize)
{
    asm!(
        "stp x0, x1, [{buf}]",
        "stp x2, x3, [{buf}, #16]",
        "stp x4, x5, [{buf}, #32]",
        "stp x6, x7, [{buf}, #48]",
        "stp x8, x9, [{buf}, #64]",
        "stp x10, x11, [{buf}, #80]",
        "stp x12, x13, [{buf}, #96]",
        "stp x14, x15, [{buf}, #112]",
        "stp x16, x17, [{buf}, #128]",
        "stp x18, x19, [{buf}, #144]",
        "stp x20, x21, [{buf}, #160]",
        "stp x22, x23, [{buf}, #176]",
        "stp x24, x25, [{buf}, #192]",
        "stp x26, x27, [{buf}, #208]",
        "stp x28, x29, [{buf}, #224]",
        "str x30, [{buf}, #240]",
        "mov {tmp}, sp",
        "str {tmp}, [{buf}, #248]",
        buf = in(reg) buf,
        tmp = out(reg) _,
        options(nostack, preserves_flags),
    );
}

/// Approximate highest address of the call stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StackOrigin(usize);

impl StackOrigin
{
    /// Use the address of a local variable as the stack origin.
    ///
    /// Only locals of frames called from the frame that owns `local`
    /// will be scanned, so this should be a local of an early frame.
    pub fn at<T>(local: &T) -> Self
    {
        Self(local as *const T as usize)
    }

    /// The recorded address.
    pub fn address(self) -> usize
    {
        self.0
    }
}

/// Range of live stack words, from the collecting frame to the origin.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StackRange
{
    start: usize,
    end: usize,
}

impl StackRange
{
    /// The words between `top`, a local of the collecting frame,
    /// and the stack origin.
    ///
    /// Returns [`None`] if the origin does not lie above `top`,
    /// in which case the stack cannot be scanned.
    pub fn new<T>(top: *const T, origin: StackOrigin) -> Option<Self>
    {
        let start = (top as usize + WORD_SIZE - 1) & !(WORD_SIZE - 1);
        let StackOrigin(end) = origin;
        if end <= start {
            warn!(start, end, "Stack origin lies below the current frame");
            return None;
        }
        Some(Self{start, end})
    }

    /// Number of whole words in the range.
    pub fn len(&self) -> usize
    {
        (self.end - self.start) / WORD_SIZE
    }

    /// Whether the range holds no words.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Read the words in the range, from the collecting frame outward.
    ///
    /// # Safety
    ///
    /// The range must still be part of the live stack of this thread;
    /// that is, the frame owning `top` must not have returned.
    pub unsafe fn words(&self) -> impl Iterator<Item = usize> + '_
    {
        (0 .. self.len()).map(|i| {
            let address = self.start + i * WORD_SIZE;
            // SAFETY: The address is word-aligned and on the live stack.
            //         Volatile because the compiler knows nothing
            //         about what we are reading.
            unsafe { ptr::read_volatile(address as *const usize) }
        })
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, std::hint::black_box};

    #[test]
    fn registers_include_stack_pointer()
    {
        let local = 0u8;
        let local = black_box(&local) as *const u8 as usize;
        let registers = Registers::capture();
        // The stack pointer lies within a few pages below any local.
        assert!(
            registers.words().iter()
                .any(|&word| word <= local && local - word < 1 << 16),
        );
    }

    #[test]
    fn stack_range_with_origin_below_is_rejected()
    {
        let local = 0u8;
        let origin = StackOrigin((&local as *const u8 as usize) - 64);
        assert_eq!(StackRange::new(&local as *const u8, origin), None);
    }

    #[test]
    fn stack_range_sees_caller_locals()
    {
        let anchor = 0u8;
        let origin = StackOrigin::at(black_box(&anchor));
        holds_needle(origin);
    }

    #[inline(never)]
    fn holds_needle(origin: StackOrigin)
    {
        let needle: usize = 0x5EED_1E55;
        black_box(&needle);
        finds_needle(origin, needle);
    }

    #[inline(never)]
    fn finds_needle(origin: StackOrigin, needle: usize)
    {
        let top = 0u8;
        let range = StackRange::new(black_box(&top) as *const u8, origin)
            .unwrap();
        assert!(!range.is_empty());
        // SAFETY: This frame is live.
        let found = unsafe { range.words().any(|word| word == needle) };
        assert!(found);
    }
}
