//! Reconstruction of the state of glibc's `ptmalloc` allocator.
//!
//! The central type is [`Heap`], which lazily locates the allocator's
//! control structures in a [`Target`][crate::Target] and decodes,
//! classifies, and renders individual chunks.

mod arena;
mod bins;
mod chunk;
mod heap;
mod heuristic;
pub mod layouts;
mod render;
mod tcache;
mod version;

use crate::util::align_up;
use crate::Addr;

pub use arena::Arena;
pub use arena::HeapInfo;
pub use arena::MallocPar;
pub use arena::ThreadCache;
pub use chunk::BinKind;
pub use chunk::BinQuery;
pub use chunk::Chunk;
pub use chunk::ChunkOpts;
pub use chunk::Classification;
pub use chunk::DecodedChunk;
pub use chunk::RenderMode;
pub use chunk::IS_MMAPPED;
pub use chunk::NON_MAIN_ARENA;
pub use chunk::PREV_INUSE;
pub use chunk::SIZE_BITS;
pub use heap::Builder;
pub use heap::Config;
pub use heap::Heap;
pub use heap::HeapField;
pub use heap::LayoutPolicy;
pub use version::GlibcVersion;


/// The number of fast bins.
pub(crate) const NFASTBINS: usize = 10;
/// The number of regular bins, including the unusable bin 0.
pub(crate) const NBINS: usize = 128;
/// The number of small bins.
pub(crate) const NSMALLBINS: usize = 64;
/// The number of tcache bins.
pub(crate) const TCACHE_MAX_BINS: usize = 64;


/// Retrieve `MALLOC_ALIGNMENT` for the given pointer width and release.
///
/// i386 switched to a 16 byte alignment with glibc 2.26.
pub(crate) fn malloc_alignment(ptr_size: usize, version: GlibcVersion) -> u64 {
    if ptr_size == 4 && version.at_least(2, 26) {
        16
    } else {
        2 * ptr_size as u64
    }
}


/// Size and alignment parameters of the allocator in the target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Geometry {
    /// `SIZE_SZ`, the width of a size field (and of a pointer).
    pub size_sz: u64,
    /// `MALLOC_ALIGNMENT`.
    pub align: u64,
    /// The glibc release.
    pub version: GlibcVersion,
}

impl Geometry {
    pub fn new(ptr_size: usize, version: GlibcVersion) -> Self {
        Self {
            size_sz: ptr_size as u64,
            align: malloc_alignment(ptr_size, version),
            version,
        }
    }

    /// `MINSIZE`, the smallest possible chunk size.
    #[inline]
    pub fn min_size(&self) -> u64 {
        align_up(4 * self.size_sz, self.align)
    }

    /// `HEAP_MAX_SIZE`, the alignment of non-main heaps.
    #[inline]
    pub fn heap_max_size(&self) -> u64 {
        if self.size_sz == 8 {
            0x4000000
        } else {
            0x100000
        }
    }

    /// The compile time default of `global_max_fast`.
    #[inline]
    pub fn default_global_max_fast(&self) -> u64 {
        64 * self.size_sz / 4
    }

    /// Whether single linked lists use pointer mangling ("safe
    /// linking").
    #[inline]
    pub fn safe_linking(&self) -> bool {
        self.version.at_least(2, 32)
    }

    /// Whether the allocator has a per-thread cache.
    #[inline]
    pub fn has_tcache(&self) -> bool {
        self.version.at_least(2, 26)
    }

    /// Convert a chunk address into the address handed out to users.
    #[inline]
    pub fn chunk2mem(&self, chunk: Addr) -> Addr {
        chunk + 2 * self.size_sz
    }

    /// Convert a user address into the address of its chunk.
    #[inline]
    pub fn mem2chunk(&self, mem: Addr) -> Addr {
        mem.wrapping_sub(2 * self.size_sz)
    }

    /// Compute the address of the first chunk of a heap whose usable
    /// memory starts at `start`.
    #[inline]
    pub fn first_chunk(&self, start: Addr) -> Addr {
        align_up(start + 2 * self.size_sz, self.align) - 2 * self.size_sz
    }

    /// The size of the chunk holding a structure of `size` bytes.
    #[inline]
    pub fn request2size(&self, size: u64) -> u64 {
        align_up(size + self.size_sz, self.align).max(self.min_size())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    /// Check the derived parameters on 64 and 32 bit targets.
    #[test]
    fn geometry() {
        let geometry = Geometry::new(8, GlibcVersion::new(2, 35));
        assert_eq!(geometry.align, 0x10);
        assert_eq!(geometry.min_size(), 0x20);
        assert_eq!(geometry.default_global_max_fast(), 0x80);
        assert_eq!(geometry.first_chunk(0x7ffff00008c8), 0x7ffff00008d0);
        assert_eq!(geometry.first_chunk(0x555555559000), 0x555555559000);
        assert_eq!(geometry.request2size(0x280), 0x290);
        assert!(geometry.safe_linking());

        let geometry = Geometry::new(4, GlibcVersion::new(2, 27));
        assert_eq!(geometry.align, 0x10);
        assert_eq!(geometry.min_size(), 0x10);
        assert_eq!(geometry.default_global_max_fast(), 0x40);
        assert_eq!(geometry.heap_max_size(), 0x100000);
        assert!(!geometry.safe_linking());

        let geometry = Geometry::new(4, GlibcVersion::new(2, 24));
        assert_eq!(geometry.align, 0x8);
        assert!(!geometry.has_tcache());
    }
}
