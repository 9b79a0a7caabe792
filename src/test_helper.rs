//! In-memory targets for use in tests.
//!
//! [`FakeProcess`] implements the target traits on top of a set of
//! byte buffers. [`GlibcFixture`] and [`JemallocFixture`] populate one
//! with the allocator state of small but realistic processes.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::Range;

use crate::ptmalloc::layouts::glibc_layout;
use crate::ptmalloc::GlibcVersion;
use crate::ptmalloc::IS_MMAPPED;
use crate::ptmalloc::NON_MAIN_ARENA;
use crate::ptmalloc::PREV_INUSE;
use crate::Addr;
use crate::Error;
use crate::Memory;
use crate::Result;
use crate::Symbols;
use crate::Target;
use crate::ThreadId;
use crate::Threads;


/// A fake process, with memory, symbols, sections, and threads set up
/// explicitly.
#[derive(Clone, Debug, Default)]
pub struct FakeProcess {
    ptr_size: usize,
    regions: BTreeMap<Addr, Vec<u8>>,
    dynamic_symbols: HashMap<String, Addr>,
    static_symbols: HashMap<String, Addr>,
    thread_locals: HashMap<(String, ThreadId), Addr>,
    sections: HashMap<(String, String), Range<Addr>>,
    threads: BTreeMap<ThreadId, Option<Range<Addr>>>,
    selected: Option<ThreadId>,
}

impl FakeProcess {
    /// Create a process without any memory, for a target with pointers
    /// of `ptr_size` bytes.
    pub fn new(ptr_size: usize) -> Self {
        Self {
            ptr_size,
            ..Default::default()
        }
    }

    /// Map `data` at `addr`.
    pub fn map(&mut self, addr: Addr, data: Vec<u8>) {
        let _prev = self.regions.insert(addr, data);
    }

    fn region(&self, addr: Addr, len: usize) -> Option<(Addr, &Vec<u8>)> {
        let (start, data) = self.regions.range(..=addr).next_back()?;
        let end = addr.checked_add(len as Addr)?;
        (end <= *start + data.len() as Addr).then_some((*start, data))
    }

    /// Overwrite mapped memory at `addr` with `data`.
    ///
    /// # Panics
    /// Panics if the range is not covered by a single mapping.
    pub fn write(&mut self, addr: Addr, data: &[u8]) {
        let start = self
            .region(addr, data.len())
            .map(|(start, _)| start)
            .unwrap_or_else(|| panic!("{} bytes at {addr:#x} are not mapped", data.len()));
        let region = self.regions.get_mut(&start).unwrap();
        let offset = (addr - start) as usize;
        let () = region[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Write a little endian integer of `width` bytes.
    pub fn write_uint(&mut self, addr: Addr, value: u64, width: usize) {
        let () = self.write(addr, &value.to_le_bytes()[..width]);
    }

    /// Write a little endian 64 bit integer.
    pub fn write_u64(&mut self, addr: Addr, value: u64) {
        let () = self.write_uint(addr, value, 8);
    }

    /// Write a pointer sized value.
    pub fn write_pointer(&mut self, addr: Addr, value: Addr) {
        let () = self.write_uint(addr, value, self.ptr_size);
    }

    /// Register an exported symbol.
    pub fn add_dynamic_symbol(&mut self, name: &str, addr: Addr) {
        let _prev = self.dynamic_symbols.insert(name.to_string(), addr);
    }

    /// Register a non-exported symbol.
    pub fn add_static_symbol(&mut self, name: &str, addr: Addr) {
        let _prev = self.static_symbols.insert(name.to_string(), addr);
    }

    /// Register a non-exported thread-local variable as located at
    /// `addr` for `thread`.
    pub fn add_thread_local_symbol(&mut self, name: &str, thread: ThreadId, addr: Addr) {
        let _prev = self.thread_locals.insert((name.to_string(), thread), addr);
    }

    /// Register `section` of the loaded object `object`.
    pub fn add_section(&mut self, object: &str, section: &str, range: Range<Addr>) {
        let _prev = self
            .sections
            .insert((object.to_string(), section.to_string()), range);
    }

    /// Add a thread, optionally with the region holding its
    /// thread-local storage.
    pub fn add_thread(&mut self, thread: ThreadId, tls: Option<Range<Addr>>) {
        let _prev = self.threads.insert(thread, tls);
    }

    /// Select `thread`.
    pub fn select_thread(&mut self, thread: ThreadId) {
        self.selected = Some(thread);
    }
}

impl Memory for FakeProcess {
    fn ptr_size(&self) -> usize {
        self.ptr_size
    }

    fn read_bytes(&self, addr: Addr, len: usize) -> Result<Vec<u8>> {
        let (start, data) = self
            .region(addr, len)
            .ok_or_else(|| Error::memory_unreadable(addr, len))?;
        let offset = (addr - start) as usize;
        Ok(data[offset..offset + len].to_vec())
    }
}

impl Symbols for FakeProcess {
    fn dynamic_symbol_address(&self, name: &str, _thread: ThreadId) -> Option<Addr> {
        self.dynamic_symbols.get(name).copied()
    }

    fn static_linkage_symbol_address(&self, name: &str, thread: ThreadId) -> Option<Addr> {
        self.thread_locals
            .get(&(name.to_string(), thread))
            .or_else(|| self.static_symbols.get(name))
            .copied()
    }

    fn section_range(&self, object: &str, section: &str) -> Option<Range<Addr>> {
        self.sections
            .iter()
            .find(|((obj, sec), _)| obj.starts_with(object) && sec == section)
            .map(|(_, range)| range.clone())
    }
}

impl Threads for FakeProcess {
    fn selected_thread(&self) -> ThreadId {
        self.selected
            .or_else(|| self.threads.keys().next().copied())
            .unwrap_or(ThreadId(1))
    }

    fn threads(&self) -> Vec<ThreadId> {
        if self.threads.is_empty() {
            vec![ThreadId(1)]
        } else {
            self.threads.keys().copied().collect()
        }
    }

    fn thread_local_region(&self, thread: ThreadId) -> Option<Range<Addr>> {
        self.threads.get(&thread).cloned().flatten()
    }
}


/// A target hiding some of the symbols of another one.
#[derive(Debug)]
pub struct MaskedSymbols<'t, T: ?Sized> {
    target: &'t T,
    masked: Vec<String>,
}

impl<'t, T> MaskedSymbols<'t, T>
where
    T: Target + ?Sized,
{
    /// Wrap `target`, hiding the symbols listed in `masked`.
    pub fn new(target: &'t T, masked: &[&str]) -> Self {
        Self {
            target,
            masked: masked.iter().map(|name| name.to_string()).collect(),
        }
    }

    fn is_masked(&self, name: &str) -> bool {
        self.masked.iter().any(|masked| masked == name)
    }
}

impl<T> Memory for MaskedSymbols<'_, T>
where
    T: Target + ?Sized,
{
    fn ptr_size(&self) -> usize {
        self.target.ptr_size()
    }

    fn read_bytes(&self, addr: Addr, len: usize) -> Result<Vec<u8>> {
        self.target.read_bytes(addr, len)
    }
}

impl<T> Symbols for MaskedSymbols<'_, T>
where
    T: Target + ?Sized,
{
    fn dynamic_symbol_address(&self, name: &str, thread: ThreadId) -> Option<Addr> {
        if self.is_masked(name) {
            return None
        }
        self.target.dynamic_symbol_address(name, thread)
    }

    fn static_linkage_symbol_address(&self, name: &str, thread: ThreadId) -> Option<Addr> {
        if self.is_masked(name) {
            return None
        }
        self.target.static_linkage_symbol_address(name, thread)
    }

    fn section_range(&self, object: &str, section: &str) -> Option<Range<Addr>> {
        self.target.section_range(object, section)
    }
}

impl<T> Threads for MaskedSymbols<'_, T>
where
    T: Target + ?Sized,
{
    fn selected_thread(&self) -> ThreadId {
        self.target.selected_thread()
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.target.threads()
    }

    fn thread_local_region(&self, thread: ThreadId) -> Option<Range<Addr>> {
        self.target.thread_local_region(thread)
    }
}


/// Writes glibc structures into a [`FakeProcess`] by field name, using
/// the built-in layouts.
struct GlibcWriter<'p> {
    process: &'p mut FakeProcess,
    version: GlibcVersion,
}

impl GlibcWriter<'_> {
    fn field(&mut self, structure: &str, base: Addr, field: &str, idx: usize, value: u64) {
        let layout = glibc_layout(structure, 8, self.version).unwrap();
        let field = layout
            .field(field)
            .unwrap_or_else(|| panic!("`{structure}` has no field `{field}`"));
        assert!(idx < field.count);
        let addr = base + (field.offset + idx * field.width) as Addr;
        let () = self.process.write_uint(addr, value, field.width);
    }

    fn chunk(&mut self, addr: Addr, prev_size: u64, size: u64) {
        let () = self.field("malloc_chunk", addr, "prev_size", 0, prev_size);
        let () = self.field("malloc_chunk", addr, "size", 0, size);
    }

    fn links(&mut self, addr: Addr, fd: Addr, bk: Addr) {
        let () = self.field("malloc_chunk", addr, "fd", 0, fd);
        let () = self.field("malloc_chunk", addr, "bk", 0, bk);
    }

    /// Write a pointer mangled the way glibc 2.32+ does for single
    /// linked lists.
    fn mangled(&mut self, pos: Addr, ptr: Addr) {
        let () = self.process.write_u64(pos, (pos >> 12) ^ ptr);
    }

    /// The address of the pseudo chunk of regular bin `idx`.
    fn bin_at(&self, arena: Addr, idx: usize) -> Addr {
        let layout = glibc_layout("malloc_state", 8, self.version).unwrap();
        let bins = layout.field("bins").unwrap();
        arena + (bins.offset + (idx - 1) * 2 * 8) as Addr - 0x10
    }

    /// Write an arena with all regular bins empty.
    fn arena(&mut self, addr: Addr, top: Addr, next: Addr, system_mem: u64) {
        for idx in 1..128 {
            let bin = self.bin_at(addr, idx);
            let () = self.field("malloc_state", addr, "bins", (idx - 1) * 2, bin);
            let () = self.field("malloc_state", addr, "bins", (idx - 1) * 2 + 1, bin);
        }
        let () = self.field("malloc_state", addr, "top", 0, top);
        let () = self.field("malloc_state", addr, "next", 0, next);
        let () = self.field("malloc_state", addr, "attached_threads", 0, 1);
        let () = self.field("malloc_state", addr, "system_mem", 0, system_mem);
        let () = self.field("malloc_state", addr, "max_system_mem", 0, system_mem);
    }

    /// Link `chunk` as the only element of regular bin `idx`.
    fn bin(&mut self, arena: Addr, idx: usize, chunk: Addr) {
        let bin = self.bin_at(arena, idx);
        let () = self.field("malloc_state", arena, "bins", (idx - 1) * 2, chunk);
        let () = self.field("malloc_state", arena, "bins", (idx - 1) * 2 + 1, chunk);
        let () = self.links(chunk, bin, bin);
    }
}


/// A two threaded x86-64 process using glibc 2.35, with a chunk in
/// every kind of bin.
///
/// The main heap holds, in order: the main thread's tcache, an
/// allocated chunk, chunks in the tcache, a fast bin, a small bin, a
/// large bin, and the unsorted bin (each free chunk followed by an
/// allocated guard chunk), and the top chunk. The second thread uses
/// its own arena, the heap of which holds its tcache, one allocated
/// chunk, and the top chunk.
#[derive(Debug)]
pub struct GlibcFixture {
    /// The fake process.
    pub process: FakeProcess,
}

impl GlibcFixture {
    /// The `.data` section of libc.
    pub const DATA: Range<Addr> = 0x7ffff7fa0000..0x7ffff7fa2000;
    /// The `.rodata` section of libc.
    pub const RODATA: Range<Addr> = 0x7ffff7f50000..0x7ffff7f50100;
    /// `main_arena`.
    pub const MAIN_ARENA: Addr = 0x7ffff7fa0c80;
    /// `mp_`.
    pub const MP: Addr = 0x7ffff7fa1520;
    /// `global_max_fast`.
    pub const GLOBAL_MAX_FAST: Addr = 0x7ffff7fa15b0;

    /// The main thread, selected by default.
    pub const MAIN_THREAD: ThreadId = ThreadId(1000);
    /// A thread using an arena of its own.
    pub const SECOND_THREAD: ThreadId = ThreadId(1001);
    /// The thread-local storage of the main thread.
    pub const MAIN_TLS: Addr = 0x7ffff7d80000;
    /// The thread-local storage of the second thread.
    pub const SECOND_TLS: Addr = 0x7ffff77ff000;
    /// The offset of `thread_arena` into a thread's TLS block.
    pub const THREAD_ARENA_TLS_OFFSET: Addr = 0x6e0;
    /// The offset of `tcache` into a thread's TLS block.
    pub const TCACHE_TLS_OFFSET: Addr = 0x6f8;
    const TLS_LEN: usize = 0x1000;

    /// The start of the main heap, `mp_.sbrk_base`.
    pub const MAIN_HEAP: Addr = 0x555555559000;
    const HEAP_LEN: u64 = 0x21000;
    /// The chunk holding the main thread's `tcache_perthread_struct`.
    pub const MAIN_TCACHE_CHUNK: Addr = 0x555555559000;
    /// The main thread's `tcache_perthread_struct`.
    pub const MAIN_TCACHE: Addr = 0x555555559010;
    /// An allocated chunk.
    pub const ALLOCATED: Addr = 0x555555559290;
    /// A chunk in tcache bin 1.
    pub const TCACHE_CHUNK: Addr = 0x5555555592c0;
    /// A chunk in fast bin 0.
    pub const FAST_CHUNK: Addr = 0x5555555592f0;
    /// A chunk in small bin 9.
    pub const SMALL_CHUNK: Addr = 0x555555559310;
    /// An allocated chunk following a free one.
    pub const GUARD1: Addr = 0x5555555593a0;
    /// A chunk in large bin 64.
    pub const LARGE_CHUNK: Addr = 0x5555555593c0;
    /// An allocated chunk following a free one.
    pub const GUARD2: Addr = 0x5555555597d0;
    /// A chunk in the unsorted bin.
    pub const UNSORTED_CHUNK: Addr = 0x5555555597f0;
    /// An allocated chunk following a free one.
    pub const GUARD3: Addr = 0x5555555598f0;
    /// The top chunk of the main arena.
    pub const MAIN_TOP: Addr = 0x555555559910;

    /// The second thread's heap, starting with its `heap_info`.
    pub const THREAD_HEAP: Addr = 0x7ffff0000000;
    /// The second thread's arena.
    pub const THREAD_ARENA: Addr = 0x7ffff0000030;
    /// The chunk holding the second thread's `tcache_perthread_struct`.
    pub const THREAD_TCACHE_CHUNK: Addr = 0x7ffff00008d0;
    /// The second thread's `tcache_perthread_struct`.
    pub const THREAD_TCACHE: Addr = 0x7ffff00008e0;
    /// An allocated chunk in the second thread's heap.
    pub const THREAD_ALLOCATED: Addr = 0x7ffff0000b60;
    /// The top chunk of the second thread's arena.
    pub const THREAD_TOP: Addr = 0x7ffff0000b90;

    /// An `mmap`ed chunk.
    pub const MMAPPED_CHUNK: Addr = 0x7ffff7c00000;

    /// Create the two threaded fixture.
    pub fn new() -> Self {
        let mut fixture = Self::single_threaded();
        let thread = Self::SECOND_THREAD;
        let tls = Self::SECOND_TLS;
        let process = &mut fixture.process;
        let () = process.map(tls, vec![0; Self::TLS_LEN]);
        let () = process.add_thread(thread, Some(tls..tls + Self::TLS_LEN as Addr));
        let () = process.add_thread_local_symbol("thread_arena", thread, tls + Self::THREAD_ARENA_TLS_OFFSET);
        let () = process.add_thread_local_symbol("tcache", thread, tls + Self::TCACHE_TLS_OFFSET);
        let () = process.write_u64(tls + Self::THREAD_ARENA_TLS_OFFSET, Self::THREAD_ARENA);
        let () = process.write_u64(tls + Self::TCACHE_TLS_OFFSET, Self::THREAD_TCACHE);
        let () = fixture.write_thread_heap();
        fixture
    }

    /// Create a fixture with only the main thread, which uses the
    /// main arena. The main arena's ring is closed on itself.
    pub fn single_threaded() -> Self {
        let mut process = FakeProcess::new(8);
        let () = process.map(Self::DATA.start, vec![0; (Self::DATA.end - Self::DATA.start) as usize]);
        let () = process.add_section("libc.so.6", ".data", Self::DATA);

        let mut rodata = vec![0; (Self::RODATA.end - Self::RODATA.start) as usize];
        let banner = b"GNU C Library (GNU libc) stable release version 2.35.\n";
        let () = rodata[0x20..0x20 + banner.len()].copy_from_slice(banner);
        let () = process.map(Self::RODATA.start, rodata);
        let () = process.add_section("libc.so.6", ".rodata", Self::RODATA);

        let () = process.add_static_symbol("main_arena", Self::MAIN_ARENA);
        let () = process.add_static_symbol("mp_", Self::MP);
        let () = process.add_static_symbol("global_max_fast", Self::GLOBAL_MAX_FAST);
        let () = process.add_dynamic_symbol("malloc", 0x7ffff7e1e0e0);

        let thread = Self::MAIN_THREAD;
        let tls = Self::MAIN_TLS;
        let () = process.map(tls, vec![0; Self::TLS_LEN]);
        let () = process.add_thread(thread, Some(tls..tls + Self::TLS_LEN as Addr));
        let () = process.select_thread(thread);
        let () = process.add_thread_local_symbol("thread_arena", thread, tls + Self::THREAD_ARENA_TLS_OFFSET);
        let () = process.add_thread_local_symbol("tcache", thread, tls + Self::TCACHE_TLS_OFFSET);
        let () = process.write_u64(tls + Self::THREAD_ARENA_TLS_OFFSET, Self::MAIN_ARENA);
        let () = process.write_u64(tls + Self::TCACHE_TLS_OFFSET, Self::MAIN_TCACHE);

        let () = process.map(Self::MAIN_HEAP, vec![0; Self::HEAP_LEN as usize]);
        let () = process.map(Self::MMAPPED_CHUNK, vec![0; 0x2000]);

        let mut fixture = Self { process };
        let () = fixture.write_main_heap();
        fixture
    }

    fn writer(&mut self) -> GlibcWriter<'_> {
        GlibcWriter {
            process: &mut self.process,
            version: GlibcVersion::new(2, 35),
        }
    }

    fn write_main_heap(&mut self) {
        let arena = Self::MAIN_ARENA;
        let mut w = self.writer();

        let () = w.arena(arena, Self::MAIN_TOP, arena, Self::HEAP_LEN);
        let () = w.field("malloc_state", arena, "have_fastchunks", 0, 1);

        let () = w.field("malloc_par", Self::MP, "trim_threshold", 0, 0x20000);
        let () = w.field("malloc_par", Self::MP, "top_pad", 0, 0x20000);
        let () = w.field("malloc_par", Self::MP, "mmap_threshold", 0, 0x20000);
        let () = w.field("malloc_par", Self::MP, "arena_test", 0, 8);
        let () = w.field("malloc_par", Self::MP, "n_mmaps", 0, 1);
        let () = w.field("malloc_par", Self::MP, "n_mmaps_max", 0, 0x10000);
        let () = w.field("malloc_par", Self::MP, "max_n_mmaps", 0, 1);
        let () = w.field("malloc_par", Self::MP, "mmapped_mem", 0, 0x2000);
        let () = w.field("malloc_par", Self::MP, "max_mmapped_mem", 0, 0x2000);
        let () = w.field("malloc_par", Self::MP, "sbrk_base", 0, Self::MAIN_HEAP);
        let () = w.field("malloc_par", Self::MP, "tcache_bins", 0, 64);
        let () = w.field("malloc_par", Self::MP, "tcache_max_bytes", 0, 0x408);
        let () = w.field("malloc_par", Self::MP, "tcache_count", 0, 7);
        let () = w.process.write_u64(Self::GLOBAL_MAX_FAST, 0x80);

        let () = w.chunk(Self::MAIN_TCACHE_CHUNK, 0, 0x290 | PREV_INUSE);
        let () = w.chunk(Self::ALLOCATED, 0, 0x30 | PREV_INUSE);
        let () = w.process.write(Self::ALLOCATED + 0x10, b"This is a test string");

        let () = w.chunk(Self::TCACHE_CHUNK, 0, 0x30 | PREV_INUSE);
        let mem = Self::TCACHE_CHUNK + 0x10;
        let () = w.mangled(mem, 0);
        let () = w.field("tcache_perthread_struct", Self::MAIN_TCACHE, "counts", 1, 1);
        let () = w.field("tcache_perthread_struct", Self::MAIN_TCACHE, "entries", 1, mem);

        let () = w.chunk(Self::FAST_CHUNK, 0, 0x20 | PREV_INUSE);
        let () = w.mangled(Self::FAST_CHUNK + 0x10, 0);
        let () = w.field("malloc_state", arena, "fastbinsY", 0, Self::FAST_CHUNK);

        let () = w.chunk(Self::SMALL_CHUNK, 0, 0x90 | PREV_INUSE);
        let () = w.bin(arena, 9, Self::SMALL_CHUNK);
        let () = w.chunk(Self::GUARD1, 0x90, 0x20);

        let () = w.chunk(Self::LARGE_CHUNK, 0, 0x410 | PREV_INUSE);
        let () = w.bin(arena, 64, Self::LARGE_CHUNK);
        let () = w.field("malloc_chunk", Self::LARGE_CHUNK, "fd_nextsize", 0, Self::LARGE_CHUNK);
        let () = w.field("malloc_chunk", Self::LARGE_CHUNK, "bk_nextsize", 0, Self::LARGE_CHUNK);
        let () = w.chunk(Self::GUARD2, 0x410, 0x20);

        let () = w.chunk(Self::UNSORTED_CHUNK, 0, 0x100 | PREV_INUSE);
        let () = w.bin(arena, 1, Self::UNSORTED_CHUNK);
        let () = w.chunk(Self::GUARD3, 0x100, 0x20);

        let top_size = Self::MAIN_HEAP + Self::HEAP_LEN - Self::MAIN_TOP;
        let () = w.chunk(Self::MAIN_TOP, 0, top_size | PREV_INUSE);

        let () = w.chunk(Self::MMAPPED_CHUNK, 0, 0x2000 | IS_MMAPPED);
    }

    fn write_thread_heap(&mut self) {
        let () = self
            .process
            .map(Self::THREAD_HEAP, vec![0; Self::HEAP_LEN as usize]);

        let main = Self::MAIN_ARENA;
        let arena = Self::THREAD_ARENA;
        let mut w = self.writer();
        let () = w.field("heap_info", Self::THREAD_HEAP, "ar_ptr", 0, arena);
        let () = w.field("heap_info", Self::THREAD_HEAP, "size", 0, Self::HEAP_LEN);
        let () = w.field("heap_info", Self::THREAD_HEAP, "mprotect_size", 0, Self::HEAP_LEN);
        let () = w.field("heap_info", Self::THREAD_HEAP, "pagesize", 0, 0x1000);

        // NONCONTIGUOUS_BIT
        let () = w.field("malloc_state", arena, "flags", 0, 0x2);
        let () = w.arena(arena, Self::THREAD_TOP, main, Self::HEAP_LEN);
        let () = w.field("malloc_state", main, "next", 0, arena);

        let flags = PREV_INUSE | NON_MAIN_ARENA;
        let () = w.chunk(Self::THREAD_TCACHE_CHUNK, 0, 0x290 | flags);
        let () = w.chunk(Self::THREAD_ALLOCATED, 0, 0x30 | flags);
        let top_size = Self::THREAD_HEAP + Self::HEAP_LEN - Self::THREAD_TOP;
        let () = w.chunk(Self::THREAD_TOP, 0, top_size | flags);
    }

    /// The symbols of the allocator's internal variables.
    pub const INTERNAL_SYMBOLS: &'static [&'static str] =
        &["main_arena", "mp_", "global_max_fast", "thread_arena", "tcache"];
}

impl Default for GlibcFixture {
    fn default() -> Self {
        Self::new()
    }
}


/// A process using jemalloc 5.3.0, with one small and one large
/// extent.
#[derive(Debug)]
pub struct JemallocFixture {
    /// The fake process.
    pub process: FakeProcess,
}

impl JemallocFixture {
    /// The address of `je_arena_emap_global`.
    pub const EMAP: Addr = 0x7ffff7e5c040;
    const ROOT_OFFSET: Addr = 0x78;
    const LEAF: Addr = 0x7ffff5a00000;
    const LEVEL_LEN: usize = (1 << 18) * 8;

    /// The page of the slab backing small allocations.
    pub const SMALL_PAGE: Addr = 0x7ffff7208000;
    /// A small allocation.
    pub const SMALL_ALLOC: Addr = 0x7ffff7208080;
    /// The `edata_t` describing the slab.
    pub const SMALL_EDATA: Addr = 0x7ffff7a16580;
    /// A large allocation spanning four pages.
    pub const LARGE_ALLOC: Addr = 0x7ffff7210000;
    /// The `edata_t` describing the large allocation.
    pub const LARGE_EDATA: Addr = 0x7ffff7a16600;

    /// Create the fixture.
    pub fn new() -> Self {
        let mut process = FakeProcess::new(8);
        let () = process.add_thread(ThreadId(2000), None);
        let () = process.add_dynamic_symbol("je_arena_emap_global", Self::EMAP);
        let () = process.map(Self::EMAP, vec![0; Self::ROOT_OFFSET as usize + Self::LEVEL_LEN]);
        let () = process.map(Self::LEAF, vec![0; Self::LEVEL_LEN]);
        let () = process.map(Self::SMALL_EDATA & !0xfff, vec![0; 0x1000]);

        let root = Self::EMAP + Self::ROOT_OFFSET;
        let () = process.write_u64(root + ((Self::SMALL_PAGE >> 30) & 0x3ffff) * 8, Self::LEAF);
        assert_eq!(Self::SMALL_PAGE >> 30, Self::LARGE_ALLOC >> 30);

        let leaf_element = |page: Addr| Self::LEAF + ((page >> 12) & 0x3ffff) * 8;
        // szind in the high bits, the slab flag in bit 0
        let () = process.write_u64(leaf_element(Self::SMALL_PAGE), (5 << 48) | Self::SMALL_EDATA | 1);
        for page in 0..4 {
            let () = process.write_u64(
                leaf_element(Self::LARGE_ALLOC + page * 0x1000),
                (40 << 48) | Self::LARGE_EDATA,
            );
        }

        // committed, szind 5, 62 free regions, slab
        let bits = (62 << 28) | (5 << 20) | (1 << 13) | (1 << 12);
        let () = write_edata(&mut process, Self::SMALL_EDATA, bits, Self::SMALL_PAGE, 0x1000 | 0x3);
        // committed, szind 40, head
        let bits = (1 << 44) | (40 << 20) | (1 << 13);
        let () = write_edata(&mut process, Self::LARGE_EDATA, bits, Self::LARGE_ALLOC, 0x4000 | 0x7);

        Self { process }
    }
}

impl Default for JemallocFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn write_edata(process: &mut FakeProcess, addr: Addr, bits: u64, base: Addr, size_esn: u64) {
    let () = process.write_u64(addr, bits);
    let () = process.write_u64(addr + 0x8, base);
    let () = process.write_u64(addr + 0x10, size_esn);
}
