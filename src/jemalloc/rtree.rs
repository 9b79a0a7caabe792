//! Lookup in jemalloc's radix tree mapping page addresses to extents.
//!
//! The tree covers the `LG_VADDR` significant bits of an address above
//! the page offset. With 48 bit virtual addresses and 4 KiB pages that
//! makes for 36 bits, split across two levels of 18 bits each. The
//! root is embedded in `arena_emap_global`; interior elements hold a
//! child pointer and leaf elements hold the packed `edata_t` pointer
//! in their low 48 bits.

use crate::log::trace;
use crate::util::words;
use crate::Addr;
use crate::Memory;
use crate::Result;


/// The number of high address bits not covered by the tree.
const NHIB: u32 = 64 - super::LG_VADDR;
/// The size of node and leaf elements.
const ELEMENT_SIZE: usize = 8;


#[derive(Clone, Copy, Debug)]
struct Level {
    /// The number of key bits consumed at this level.
    bits: u32,
    /// The number of key bits consumed up to and including this level,
    /// counting the unused high bits.
    cumbits: u32,
}

static LEVELS: [Level; 2] = [
    Level {
        bits: 18,
        cumbits: NHIB + 18,
    },
    Level {
        bits: 18,
        cumbits: NHIB + 36,
    },
];


/// The index into the level `level` array for `key`.
#[inline]
fn subkey(key: Addr, level: &Level) -> usize {
    let shift = 64 - level.cumbits;
    ((key >> shift) & ((1 << level.bits) - 1)) as usize
}

/// Extract the `edata_t` pointer from a leaf element's bits.
#[inline]
fn leaf_extent(le_bits: u64) -> Option<Addr> {
    let ptr = ((le_bits << NHIB) >> NHIB) & !1;
    (ptr != 0).then_some(ptr)
}

/// Decode all elements in a level array.
fn elements(data: &[u8]) -> impl Iterator<Item = u64> + '_ {
    words(data, 0, ELEMENT_SIZE).map(|(_offset, value)| value)
}


/// A read-only view on a jemalloc radix tree.
#[derive(Debug)]
pub(super) struct RTree<'m, M: ?Sized> {
    memory: &'m M,
    root: Addr,
}

impl<'m, M> RTree<'m, M>
where
    M: Memory + ?Sized,
{
    pub(super) fn new(memory: &'m M, root: Addr) -> Self {
        Self { memory, root }
    }

    /// Look up the address of the `edata_t` covering `key`.
    pub(super) fn lookup(&self, key: Addr) -> Result<Option<Addr>> {
        let [first, second] = &LEVELS;

        let node = self.root + (subkey(key, first) * ELEMENT_SIZE) as Addr;
        let child = self.memory.read_uint(node, ELEMENT_SIZE)?;
        if child == 0 {
            trace!("no leaf array for {key:#x} at node element {node:#x}");
            return Ok(None)
        }

        let leaf = child + (subkey(key, second) * ELEMENT_SIZE) as Addr;
        let le_bits = self.memory.read_uint(leaf, ELEMENT_SIZE)?;
        Ok(leaf_extent(le_bits))
    }

    /// Enumerate the addresses of all `edata_t` referenced by the tree.
    ///
    /// Extents spanning multiple pages are referenced by consecutive
    /// leaf elements and reported only once.
    pub(super) fn extents(&self) -> Result<Vec<Addr>> {
        let [first, second] = &LEVELS;
        let nodes = self
            .memory
            .read_bytes(self.root, (1 << first.bits) * ELEMENT_SIZE)?;

        let mut extents = Vec::new();
        let mut last = None;
        for child in elements(&nodes).filter(|child| *child != 0) {
            let leaves = self
                .memory
                .read_bytes(child, (1 << second.bits) * ELEMENT_SIZE)?;
            for extent in elements(&leaves).filter_map(leaf_extent) {
                if last != Some(extent) {
                    let () = extents.push(extent);
                    last = Some(extent);
                }
            }
        }
        Ok(extents)
    }
}
