use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::str::FromStr;

use crate::layout::Overlay;
use crate::Addr;
use crate::Error;
use crate::Result;


/// The previous chunk is in use.
pub const PREV_INUSE: u64 = 0b001;
/// The chunk was obtained via `mmap`.
pub const IS_MMAPPED: u64 = 0b010;
/// The chunk belongs to an arena other than the main arena.
pub const NON_MAIN_ARENA: u64 = 0b100;
/// All flag bits stored in a chunk's size field.
pub const SIZE_BITS: u64 = PREV_INUSE | IS_MMAPPED | NON_MAIN_ARENA;


/// A snapshot of a `malloc_chunk`.
///
/// The link fields are only meaningful for free chunks; they are
/// whatever the chunk's memory holds at their position otherwise.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// The chunk's address.
    pub addr: Addr,
    /// The size of the previous chunk, if it is free.
    pub prev_size: u64,
    /// The raw size field, flag bits included.
    pub size: u64,
    /// The forward link.
    pub fd: Addr,
    /// The backward link.
    pub bk: Addr,
    /// The forward link to the next larger size (large bins only).
    pub fd_nextsize: Addr,
    /// The backward link to the next smaller size (large bins only).
    pub bk_nextsize: Addr,
}

impl Chunk {
    pub(crate) fn from_overlay(overlay: &Overlay) -> Result<Self> {
        let chunk = Self {
            addr: overlay.addr(),
            prev_size: overlay.read("prev_size")?,
            size: overlay.read("size")?,
            fd: overlay.read("fd")?,
            bk: overlay.read("bk")?,
            fd_nextsize: overlay.read("fd_nextsize")?,
            bk_nextsize: overlay.read("bk_nextsize")?,
        };
        Ok(chunk)
    }

    /// The size of the chunk with all flag bits masked out.
    #[inline]
    pub fn real_size(&self) -> u64 {
        self.size & !SIZE_BITS
    }

    /// The flag bits of the size field.
    #[inline]
    pub fn flags(&self) -> u64 {
        self.size & SIZE_BITS
    }

    /// Whether the previous chunk is in use.
    #[inline]
    pub fn prev_inuse(&self) -> bool {
        self.size & PREV_INUSE != 0
    }

    /// Whether the chunk was allocated via `mmap`.
    #[inline]
    pub fn is_mmapped(&self) -> bool {
        self.size & IS_MMAPPED != 0
    }

    /// Whether the chunk belongs to an arena other than the main one.
    #[inline]
    pub fn non_main_arena(&self) -> bool {
        self.size & NON_MAIN_ARENA != 0
    }
}


/// The kinds of bins a free chunk may reside in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinKind {
    /// A per-thread cache bin.
    Tcache,
    /// A fast bin.
    Fast,
    /// A small bin.
    Small,
    /// A large bin.
    Large,
    /// The unsorted bin.
    Unsorted,
}

impl BinKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Tcache => "tcachebins",
            Self::Fast => "fastbins",
            Self::Small => "smallbins",
            Self::Large => "largebins",
            Self::Unsorted => "unsortedbin",
        }
    }
}

impl Display for BinKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for BinKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "tcache" | "tcachebins" => Self::Tcache,
            "fast" | "fastbins" => Self::Fast,
            "small" | "smallbins" => Self::Small,
            "large" | "largebins" => Self::Large,
            "unsorted" | "unsortedbin" => Self::Unsorted,
            _ => return Err(Error::with_invalid_input(format!("`{s}` is not a known bin"))),
        };
        Ok(kind)
    }
}


/// The classification of a chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    /// The chunk is in use (or in no bin we know of).
    Allocated,
    /// The chunk is the top chunk of its arena.
    Top,
    /// The chunk is free and linked into a bin of the given kind.
    Free(BinKind),
}

impl Classification {
    /// The label used when rendering a chunk.
    ///
    /// Without a tcache, the allocator keeps the corresponding chunks
    /// in fast bins, which is what a tcache classification is then
    /// reported as.
    pub fn label(&self, has_tcache: bool) -> String {
        match self {
            Self::Allocated => "Allocated chunk".to_string(),
            Self::Top => "Top chunk".to_string(),
            Self::Free(BinKind::Tcache) if !has_tcache => {
                format!("Free chunk ({})", BinKind::Fast)
            }
            Self::Free(kind) => format!("Free chunk ({kind})"),
        }
    }

    /// The names of the link fields relevant for this classification.
    pub fn link_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Allocated | Self::Top => &[],
            Self::Free(BinKind::Tcache | BinKind::Fast) => &["fd"],
            Self::Free(BinKind::Small | BinKind::Unsorted) => &["fd", "bk"],
            Self::Free(BinKind::Large) => &["fd", "bk", "fd_nextsize", "bk_nextsize"],
        }
    }
}


/// How to determine the bin a chunk belongs to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BinQuery {
    /// Infer membership from the state of the owning arena and of the
    /// threads' caches.
    #[default]
    Infer,
    /// The operator asserts that the chunk is free and in a bin of the
    /// given kind.
    Explicit(BinKind),
}


/// A decoded and classified chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodedChunk {
    /// The chunk's fields.
    pub chunk: Chunk,
    /// Its classification.
    pub class: Classification,
}

impl DecodedChunk {
    /// Look up a link field by name.
    pub(crate) fn link(&self, name: &str) -> Option<Addr> {
        match name {
            "fd" => Some(self.chunk.fd),
            "bk" => Some(self.chunk.bk),
            "fd_nextsize" => Some(self.chunk.fd_nextsize),
            "bk_nextsize" => Some(self.chunk.bk_nextsize),
            _ => None,
        }
    }
}


/// The ways a chunk can be rendered.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RenderMode {
    /// The classification line, address, size, and links.
    #[default]
    Summary,
    /// The summary followed by a hexdump of the chunk's memory.
    Dump,
}


/// Options for [`Heap::malloc_chunk`][crate::ptmalloc::Heap::malloc_chunk].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChunkOpts {
    /// How to determine bin membership.
    pub bin: BinQuery,
    /// How to render the chunk.
    pub mode: RenderMode,
}
