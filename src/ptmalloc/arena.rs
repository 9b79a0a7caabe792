//! Typed accessors for glibc's control structures.

use crate::layout::Overlay;
use crate::Addr;
use crate::Result;


/// A snapshot of a `malloc_state`, i.e., an arena.
#[derive(Clone, Debug)]
pub struct Arena {
    overlay: Overlay,
    size_sz: u64,
}

impl Arena {
    pub(crate) fn new(overlay: Overlay, size_sz: u64) -> Self {
        Self { overlay, size_sz }
    }

    /// The arena's address.
    #[inline]
    pub fn addr(&self) -> Addr {
        self.overlay.addr()
    }

    /// The underlying overlay, for access to fields without a
    /// dedicated accessor.
    #[inline]
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn mutex(&self) -> Result<u64> {
        self.overlay.read("mutex")
    }

    /// The head of fast bin `idx`.
    pub fn fastbin(&self, idx: usize) -> Result<Addr> {
        self.overlay.read_element("fastbinsY", idx)
    }

    /// The address of the slot holding the head of fast bin `idx`.
    pub fn fastbin_addr(&self, idx: usize) -> Result<Addr> {
        self.overlay.element_addr("fastbinsY", idx)
    }

    /// The number of fast bins.
    pub fn fastbin_count(&self) -> Result<usize> {
        Ok(self.overlay.field("fastbinsY")?.count)
    }

    pub fn top(&self) -> Result<Addr> {
        self.overlay.read("top")
    }

    pub fn last_remainder(&self) -> Result<Addr> {
        self.overlay.read("last_remainder")
    }

    /// The address of the pseudo chunk heading regular bin `idx`
    /// (`bin_at`). Bin 1 is the unsorted bin.
    pub fn bin_at(&self, idx: usize) -> Result<Addr> {
        let slot = self.overlay.element_addr("bins", (idx - 1) * 2)?;
        Ok(slot - 2 * self.size_sz)
    }

    /// The `fd` and `bk` links of regular bin `idx`.
    pub fn bin(&self, idx: usize) -> Result<(Addr, Addr)> {
        let fd = self.overlay.read_element("bins", (idx - 1) * 2)?;
        let bk = self.overlay.read_element("bins", (idx - 1) * 2 + 1)?;
        Ok((fd, bk))
    }

    /// The number of regular bins, including the unusable bin 0.
    pub fn bin_count(&self) -> Result<usize> {
        Ok(self.overlay.field("bins")?.count / 2 + 1)
    }

    /// The next arena in the ring of arenas.
    pub fn next(&self) -> Result<Addr> {
        self.overlay.read("next")
    }

    pub fn attached_threads(&self) -> Result<u64> {
        self.overlay.read("attached_threads")
    }

    pub fn system_mem(&self) -> Result<u64> {
        self.overlay.read("system_mem")
    }
}


/// A snapshot of `mp_`, the `malloc_par` singleton.
#[derive(Clone, Debug)]
pub struct MallocPar {
    overlay: Overlay,
}

impl MallocPar {
    pub(crate) fn new(overlay: Overlay) -> Self {
        Self { overlay }
    }

    #[inline]
    pub fn addr(&self) -> Addr {
        self.overlay.addr()
    }

    #[inline]
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn mmap_threshold(&self) -> Result<u64> {
        self.overlay.read("mmap_threshold")
    }

    pub fn n_mmaps_max(&self) -> Result<u64> {
        self.overlay.read("n_mmaps_max")
    }

    /// The start of the main heap.
    pub fn sbrk_base(&self) -> Result<Addr> {
        self.overlay.read("sbrk_base")
    }

    /// The number of tcache bins, if the allocator has a tcache.
    pub fn tcache_bins(&self) -> Result<Option<u64>> {
        self.optional("tcache_bins")
    }

    /// The maximum number of chunks per tcache bin, if the allocator
    /// has a tcache.
    pub fn tcache_count(&self) -> Result<Option<u64>> {
        self.optional("tcache_count")
    }

    fn optional(&self, field: &str) -> Result<Option<u64>> {
        if self.overlay.has_field(field) {
            self.overlay.read(field).map(Some)
        } else {
            Ok(None)
        }
    }
}


/// A snapshot of a `tcache_perthread_struct`.
#[derive(Clone, Debug)]
pub struct ThreadCache {
    overlay: Overlay,
}

impl ThreadCache {
    pub(crate) fn new(overlay: Overlay) -> Self {
        Self { overlay }
    }

    #[inline]
    pub fn addr(&self) -> Addr {
        self.overlay.addr()
    }

    /// The number of bins.
    pub fn bin_count(&self) -> Result<usize> {
        Ok(self.overlay.field("entries")?.count)
    }

    /// The number of chunks in bin `idx`.
    pub fn count(&self, idx: usize) -> Result<u64> {
        self.overlay.read_element("counts", idx)
    }

    /// The head of bin `idx`, a user (not chunk) address.
    pub fn entry(&self, idx: usize) -> Result<Addr> {
        self.overlay.read_element("entries", idx)
    }
}


/// A snapshot of the `heap_info` header of a non-main heap.
#[derive(Clone, Debug)]
pub struct HeapInfo {
    overlay: Overlay,
}

impl HeapInfo {
    pub(crate) fn new(overlay: Overlay) -> Self {
        Self { overlay }
    }

    #[inline]
    pub fn addr(&self) -> Addr {
        self.overlay.addr()
    }

    /// The arena owning the heap.
    pub fn ar_ptr(&self) -> Result<Addr> {
        self.overlay.read("ar_ptr")
    }

    /// The previous heap of the same arena.
    pub fn prev(&self) -> Result<Addr> {
        self.overlay.read("prev")
    }

    pub fn size(&self) -> Result<u64> {
        self.overlay.read("size")
    }
}
