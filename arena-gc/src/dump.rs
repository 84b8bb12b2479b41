//! Human-readable and structured views of an arena.
//!
//! Neither view changes the arena.

use {
    crate::{Arena, HEADER_SIZE},
    serde::Serialize,
    std::fmt::{self, Display, Formatter, Write},
};

/// Text dump of an arena, created by [`Arena::dump`].
///
/// Prints one line per block with its header size, content size,
/// and whether it is free. The content of each allocated block
/// follows on its own line, indented by a tab.
/// Printable ASCII is passed through and other bytes are escaped.
pub struct Dump<'a, const CAPACITY: usize>
{
    arena: &'a Arena<CAPACITY>,
}

/// Description of a single block, as found in [`Arena::layout`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct BlockInfo
{
    /// Position of the block in the arena, starting at zero.
    pub index: usize,

    /// Offset of the block header from the start of the arena.
    pub offset: usize,

    /// Number of bytes taken by the block header.
    pub header_size: usize,

    /// Number of bytes of content.
    pub size: usize,

    /// Whether the block is handed out to a user.
    pub allocated: bool,
}

impl<const CAPACITY: usize> Arena<CAPACITY>
{
    /// Dump the arena as text.
    pub fn dump(&self) -> Dump<'_, CAPACITY>
    {
        Dump{arena: self}
    }

    /// Describe every block of the arena.
    ///
    /// An uninitialized arena has no blocks.
    pub fn layout(&self) -> Vec<BlockInfo>
    {
        self.blocks()
            .enumerate()
            .map(|(index, (offset, header))| BlockInfo{
                index,
                offset,
                header_size: HEADER_SIZE,
                size: header.size,
                allocated: header.is_allocated(),
            })
            .collect()
    }
}

impl<'a, const CAPACITY: usize> Display for Dump<'a, CAPACITY>
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result
    {
        writeln!(f, "Dumping arena...")?;

        if !self.arena.is_initialized() {
            writeln!(f, "Arena has not been initialized.")?;
            return writeln!(f);
        }

        for (index, (offset, header)) in self.arena.blocks().enumerate() {
            let free = if header.is_allocated() { "" } else { ", free" };
            writeln!(f, "Block #{} ({}B + {}B{})", index, HEADER_SIZE, header.size, free)?;

            if !header.is_allocated() {
                continue;
            }

            f.write_char('\t')?;
            for &byte in self.arena.content_bytes(offset, header.size) {
                write_escaped(f, byte)?;
            }
            writeln!(f)?;
        }

        writeln!(f)
    }
}

/// Write a byte, escaping it unless it is printable ASCII.
fn write_escaped(f: &mut impl Write, byte: u8) -> fmt::Result
{
    match byte {
        b'\0'  => f.write_str("\\0"),
        b'\n'  => f.write_str("\\n"),
        b'\r'  => f.write_str("\\r"),
        b'\t'  => f.write_str("\\t"),
        0x0B   => f.write_str("\\v"),
        0x08   => f.write_str("\\b"),
        0x07   => f.write_str("\\a"),
        0x0C   => f.write_str("\\f"),
        b'\\'  => f.write_str("\\\\"),
        b' ' ..= b'~' => f.write_char(byte as char),
        _      => write!(f, "\\x{:02X}", byte),
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, std::ptr::copy_nonoverlapping};

    const SMALL: usize = 1024;

    fn escaped(bytes: &[u8]) -> String
    {
        let mut out = String::new();
        for &byte in bytes {
            write_escaped(&mut out, byte).unwrap();
        }
        out
    }

    #[test]
    fn escapes()
    {
        assert_eq!(escaped(b"plain text ~!"), "plain text ~!");
        assert_eq!(escaped(b"\0\n\r\t"), "\\0\\n\\r\\t");
        assert_eq!(escaped(b"\x0B\x08\x07\x0C\\"), "\\v\\b\\a\\f\\\\");
        assert_eq!(escaped(b"\x01\x1F\x7F\x80\xFF"), "\\x01\\x1F\\x7F\\x80\\xFF");
    }

    #[test]
    fn dump_uninitialized()
    {
        let arena = Arena::<SMALL>::new();
        assert_eq!(
            arena.dump().to_string(),
            "Dumping arena...\nArena has not been initialized.\n\n",
        );
    }

    #[test]
    fn dump_shows_allocated_content()
    {
        let arena = Arena::<SMALL>::new();
        let text = b"Hello, world!\n\0";
        let ptr = arena.allocate(text.len()).unwrap().as_ptr();
        // SAFETY: The block holds at least text.len() bytes.
        unsafe { copy_nonoverlapping(text.as_ptr(), ptr, text.len()); }

        let expected = format!(
            "Dumping arena...\n\
             Block #0 ({h}B + 16B)\n\
             \tHello, world!\\n\\0\\0\n\
             Block #1 ({h}B + {rest}B, free)\n\
             \n",
            h = HEADER_SIZE,
            rest = SMALL - 2 * HEADER_SIZE - 16,
        );
        assert_eq!(arena.dump().to_string(), expected);

        arena.deallocate(ptr);
        let expected = format!(
            "Dumping arena...\nBlock #0 ({h}B + {rest}B, free)\n\n",
            h = HEADER_SIZE,
            rest = SMALL - HEADER_SIZE,
        );
        assert_eq!(arena.dump().to_string(), expected);
    }

    #[test]
    fn dump_does_not_change_arena()
    {
        let arena = Arena::<SMALL>::new();
        arena.allocate(40).unwrap();
        let before = arena.layout();
        let _ = arena.dump().to_string();
        assert_eq!(arena.layout(), before);
    }

    #[test]
    fn layout_describes_blocks()
    {
        let arena = Arena::<SMALL>::new();
        assert!(arena.layout().is_empty());

        arena.allocate(100).unwrap();
        let size = crate::round_up(100).unwrap();
        let layout = arena.layout();
        assert_eq!(
            layout,
            [
                BlockInfo{
                    index: 0,
                    offset: 0,
                    header_size: HEADER_SIZE,
                    size,
                    allocated: true,
                },
                BlockInfo{
                    index: 1,
                    offset: HEADER_SIZE + size,
                    header_size: HEADER_SIZE,
                    size: SMALL - 2 * HEADER_SIZE - size,
                    allocated: false,
                },
            ],
        );

        let json = serde_json::to_value(&layout[0]).unwrap();
        assert_eq!(json["size"], size);
        assert_eq!(json["allocated"], true);
    }
}
