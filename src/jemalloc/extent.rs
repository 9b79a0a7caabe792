use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::rc::Rc;

use crate::layout::Field;
use crate::layout::Layout;
use crate::layout::Overlay;
use crate::Addr;
use crate::Memory;
use crate::Result;

use super::LG_PAGE;


/// Build the layout of the leading fields of `edata_t`, the only ones
/// we interpret.
pub(super) fn edata_layout() -> Layout {
    Layout::new("edata_s", 0x18)
        .with_field(Field::new("e_bits", 0x0, 8))
        .with_field(Field::new("e_addr", 0x8, 8))
        .with_field(Field::new("e_size_esn", 0x10, 8))
}


/// Extract `width` bits starting at `shift`.
#[inline]
fn bits(value: u64, shift: u32, width: u32) -> u64 {
    (value >> shift) & ((1 << width) - 1)
}


/// The page allocator interface an extent was obtained from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pai {
    /// The page allocator for extents.
    Pac,
    /// The huge page allocator.
    Hpa,
}

impl Display for Pai {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            Self::Pac => "PAC",
            Self::Hpa => "HPA",
        };
        f.write_str(s)
    }
}


/// The bit fields packed into `edata_t::e_bits`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtentBits {
    /// The arena the extent came from; all ones if unassociated.
    pub arena_ind: u64,
    /// Whether the extent is a slab of small regions.
    pub slab: bool,
    /// Whether physical memory is committed.
    pub committed: bool,
    /// The page allocator the extent came from.
    pub pai: Pai,
    /// Whether the memory is known to be zeroed.
    pub zeroed: bool,
    /// Whether the extent is surrounded by guard pages.
    pub guarded: bool,
    /// The `extent_state_t`.
    pub state: u64,
    /// The size class index of allocations in the extent.
    pub szind: u64,
    /// The number of free regions in a slab.
    pub nfree: u64,
    /// The shard of the bin the extent came from.
    pub bin_shard: u64,
    /// Whether the extent is the head of a mapping.
    pub is_head: bool,
}

impl From<u64> for ExtentBits {
    fn from(e_bits: u64) -> Self {
        Self {
            arena_ind: bits(e_bits, 0, 12),
            slab: bits(e_bits, 12, 1) != 0,
            committed: bits(e_bits, 13, 1) != 0,
            pai: if bits(e_bits, 14, 1) == 0 {
                Pai::Pac
            } else {
                Pai::Hpa
            },
            zeroed: bits(e_bits, 15, 1) != 0,
            guarded: bits(e_bits, 16, 1) != 0,
            state: bits(e_bits, 17, 3),
            szind: bits(e_bits, 20, 8),
            nfree: bits(e_bits, 28, 10),
            bin_shard: bits(e_bits, 38, 6),
            is_head: bits(e_bits, 44, 1) != 0,
        }
    }
}


/// A jemalloc extent, as described by its `edata_t` record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Extent {
    /// The address of the `edata_t` record.
    pub extent_address: Addr,
    /// The start of the memory the extent describes.
    pub allocated_address: Addr,
    /// The size of the memory the extent describes.
    ///
    /// May exceed the usable size for large size classes when
    /// `cache_oblivious` is enabled.
    pub size: u64,
    /// The raw `e_bits` word.
    pub e_bits: u64,
}

impl Extent {
    pub(super) fn read<M>(memory: &M, addr: Addr, layout: Rc<Layout>) -> Result<Self>
    where
        M: Memory + ?Sized,
    {
        let overlay = Overlay::new(memory, addr, layout, None)?;
        let e_size_esn = overlay.read("e_size_esn")?;
        let extent = Self {
            extent_address: addr,
            allocated_address: overlay.read("e_addr")?,
            size: (e_size_esn >> LG_PAGE) << LG_PAGE,
            e_bits: overlay.read("e_bits")?,
        };
        Ok(extent)
    }

    /// Decode the bit fields.
    #[inline]
    pub fn bits(&self) -> ExtentBits {
        ExtentBits::from(self.e_bits)
    }

    /// Whether the extent serves small size class allocations.
    #[inline]
    pub fn is_small_class(&self) -> bool {
        self.bits().slab
    }

    /// Check whether `ptr` lies in the memory described by the extent.
    #[inline]
    pub fn contains(&self, ptr: Addr) -> bool {
        (self.allocated_address..self.allocated_address + self.size).contains(&ptr)
    }
}
