//! Built-in layouts of glibc's allocator structures.
//!
//! These mirror the C definitions in `malloc/malloc.c` and
//! `malloc/arena.c` for the releases we know about and are used when no
//! debug information describing the structures is available.

use super::malloc_alignment;
use super::GlibcVersion;
use super::NBINS;
use super::NFASTBINS;
use super::TCACHE_MAX_BINS;
use crate::layout::Field;
use crate::layout::Layout;
use crate::util::align_up;


/// Lay out fields one after another, following C's alignment rules for
/// naturally aligned scalar types.
struct LayoutBuilder {
    layout: Layout,
    offset: usize,
    align: usize,
}

impl LayoutBuilder {
    fn new(name: &str) -> Self {
        Self {
            layout: Layout::new(name, 0),
            offset: 0,
            align: 1,
        }
    }

    fn array(mut self, name: &str, width: usize, count: usize) -> Self {
        let offset = align_up(self.offset as u64, width as u64) as usize;
        self.layout = self.layout.with_field(Field::array(name, offset, width, count));
        self.offset = offset + width * count;
        self.align = self.align.max(width);
        self
    }

    fn scalar(self, name: &str, width: usize) -> Self {
        self.array(name, width, 1)
    }

    fn scalar_if(self, cond: bool, name: &str, width: usize) -> Self {
        if cond {
            self.scalar(name, width)
        } else {
            self
        }
    }

    /// Pad the structure with a byte array such that its size plus
    /// `extra` is a multiple of `align`.
    fn pad(mut self, extra: usize, align: usize) -> Self {
        let end = align_up((self.offset + extra) as u64, align as u64) as usize - extra;
        if end > self.offset {
            let len = end - self.offset;
            self = self.array("pad", 1, len);
        }
        self
    }

    fn build(self) -> Layout {
        let size = align_up(self.offset as u64, self.align as u64) as usize;
        let mut layout = Layout::new(self.layout.name(), size);
        for field in self.layout.fields() {
            layout = layout.with_field(field.clone());
        }
        layout
    }
}


fn malloc_chunk(ptr_size: usize, version: GlibcVersion) -> Layout {
    let (prev_size, size) = if version.at_least(2, 26) {
        ("mchunk_prev_size", "mchunk_size")
    } else {
        ("prev_size", "size")
    };

    LayoutBuilder::new("malloc_chunk")
        .scalar(prev_size, ptr_size)
        .scalar(size, ptr_size)
        .scalar("fd", ptr_size)
        .scalar("bk", ptr_size)
        .scalar("fd_nextsize", ptr_size)
        .scalar("bk_nextsize", ptr_size)
        .build()
}

fn malloc_state(ptr_size: usize, version: GlibcVersion) -> Layout {
    LayoutBuilder::new("malloc_state")
        .scalar("mutex", 4)
        .scalar("flags", 4)
        .scalar_if(version.at_least(2, 27), "have_fastchunks", 4)
        .array("fastbinsY", ptr_size, NFASTBINS)
        .scalar("top", ptr_size)
        .scalar("last_remainder", ptr_size)
        .array("bins", ptr_size, NBINS * 2 - 2)
        .array("binmap", 4, 4)
        .scalar("next", ptr_size)
        .scalar("next_free", ptr_size)
        .scalar("attached_threads", ptr_size)
        .scalar("system_mem", ptr_size)
        .scalar("max_system_mem", ptr_size)
        .build()
}

fn malloc_par(ptr_size: usize, version: GlibcVersion) -> Layout {
    let tcache = version.at_least(2, 26);
    let hugepages = version.at_least(2, 35);

    LayoutBuilder::new("malloc_par")
        .scalar("trim_threshold", ptr_size)
        .scalar("top_pad", ptr_size)
        .scalar("mmap_threshold", ptr_size)
        .scalar("arena_test", ptr_size)
        .scalar("arena_max", ptr_size)
        .scalar_if(hugepages, "thp_pagesize", ptr_size)
        .scalar_if(hugepages, "hp_pagesize", ptr_size)
        .scalar_if(hugepages, "hp_flags", 4)
        .scalar("n_mmaps", 4)
        .scalar("n_mmaps_max", 4)
        .scalar("max_n_mmaps", 4)
        .scalar("no_dyn_threshold", 4)
        .scalar("mmapped_mem", ptr_size)
        .scalar("max_mmapped_mem", ptr_size)
        .scalar("sbrk_base", ptr_size)
        .scalar_if(tcache, "tcache_bins", ptr_size)
        .scalar_if(tcache, "tcache_max_bytes", ptr_size)
        .scalar_if(tcache, "tcache_count", ptr_size)
        .scalar_if(tcache, "tcache_unsorted_limit", ptr_size)
        .build()
}

fn tcache_perthread_struct(ptr_size: usize, version: GlibcVersion) -> Option<Layout> {
    if !version.at_least(2, 26) {
        return None
    }

    let count_width = if version.at_least(2, 30) { 2 } else { 1 };
    let layout = LayoutBuilder::new("tcache_perthread_struct")
        .array("counts", count_width, TCACHE_MAX_BINS)
        .array("entries", ptr_size, TCACHE_MAX_BINS)
        .build();
    Some(layout)
}

fn heap_info(ptr_size: usize, version: GlibcVersion) -> Layout {
    LayoutBuilder::new("heap_info")
        .scalar("ar_ptr", ptr_size)
        .scalar("prev", ptr_size)
        .scalar("size", ptr_size)
        .scalar("mprotect_size", ptr_size)
        .scalar_if(version.at_least(2, 35), "pagesize", ptr_size)
        .pad(2 * ptr_size, malloc_alignment(ptr_size, version) as usize)
        .build()
}


/// Retrieve the built-in layout of the glibc structure `name` for the
/// given pointer width and release.
///
/// Known structures are `malloc_chunk`, `malloc_state`, `malloc_par`,
/// `tcache_perthread_struct`, and `heap_info`.
pub fn glibc_layout(name: &str, ptr_size: usize, version: GlibcVersion) -> Option<Layout> {
    if ptr_size != 4 && ptr_size != 8 {
        return None
    }

    match name {
        "malloc_chunk" => Some(malloc_chunk(ptr_size, version)),
        "malloc_state" => Some(malloc_state(ptr_size, version)),
        "malloc_par" => Some(malloc_par(ptr_size, version)),
        "tcache_perthread_struct" => tcache_perthread_struct(ptr_size, version),
        "heap_info" => Some(heap_info(ptr_size, version)),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    const V2_24: GlibcVersion = GlibcVersion::new(2, 24);
    const V2_27: GlibcVersion = GlibcVersion::new(2, 27);
    const V2_31: GlibcVersion = GlibcVersion::new(2, 31);
    const V2_35: GlibcVersion = GlibcVersion::new(2, 35);


    /// Check sizes and offsets of `malloc_state` against those of real
    /// glibc builds.
    #[test]
    fn malloc_state_layout() {
        let layout = glibc_layout("malloc_state", 8, V2_35).unwrap();
        assert_eq!(layout.size(), 0x898);
        assert_eq!(layout.field("fastbinsY").unwrap().offset, 0x10);
        assert_eq!(layout.field("top").unwrap().offset, 0x60);
        assert_eq!(layout.field("bins").unwrap().offset, 0x70);
        assert_eq!(layout.field("next").unwrap().offset, 0x870);
        assert_eq!(layout.field("system_mem").unwrap().offset, 0x888);

        let layout = glibc_layout("malloc_state", 8, V2_24).unwrap();
        assert_eq!(layout.size(), 0x890);
        assert_eq!(layout.field("fastbinsY").unwrap().offset, 0x8);

        let layout = glibc_layout("malloc_state", 4, V2_27).unwrap();
        assert_eq!(layout.size(), 0x458);
    }

    /// Check `malloc_par` across the releases that changed it.
    #[test]
    fn malloc_par_layout() {
        let layout = glibc_layout("malloc_par", 8, V2_35).unwrap();
        assert_eq!(layout.size(), 0x88);
        assert_eq!(layout.field("sbrk_base").unwrap().offset, 0x60);
        assert_eq!(layout.field("tcache_bins").unwrap().offset, 0x68);

        let layout = glibc_layout("malloc_par", 8, V2_31).unwrap();
        assert_eq!(layout.size(), 0x70);
        assert_eq!(layout.field("sbrk_base").unwrap().offset, 0x48);

        let layout = glibc_layout("malloc_par", 8, V2_24).unwrap();
        assert_eq!(layout.field("tcache_bins"), None);
    }

    /// Check the remaining structures.
    #[test]
    fn other_layouts() {
        let layout = glibc_layout("tcache_perthread_struct", 8, V2_35).unwrap();
        assert_eq!(layout.size(), 0x280);
        let layout = glibc_layout("tcache_perthread_struct", 8, V2_27).unwrap();
        assert_eq!(layout.size(), 0x240);
        assert_eq!(glibc_layout("tcache_perthread_struct", 8, V2_24), None);

        assert_eq!(glibc_layout("heap_info", 8, V2_35).unwrap().size(), 0x30);
        assert_eq!(glibc_layout("heap_info", 8, V2_31).unwrap().size(), 0x20);
        assert_eq!(glibc_layout("heap_info", 4, V2_35).unwrap().size(), 0x18);

        let layout = glibc_layout("malloc_chunk", 8, V2_35).unwrap();
        assert_eq!(layout.size(), 0x30);
        assert_eq!(layout.field("size").unwrap().name, "mchunk_size");
        let layout = glibc_layout("malloc_chunk", 4, V2_24).unwrap();
        assert_eq!(layout.size(), 0x18);
        assert_eq!(layout.field("size").unwrap().name, "size");

        assert_eq!(glibc_layout("edata_t", 8, V2_35), None);
        assert_eq!(glibc_layout("malloc_chunk", 2, V2_35), None);
    }
}
