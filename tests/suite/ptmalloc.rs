use std::cell::Cell;
use std::cell::RefCell;

use heapsym::ptmalloc::BinKind;
use heapsym::ptmalloc::BinQuery;
use heapsym::ptmalloc::ChunkOpts;
use heapsym::ptmalloc::Classification;
use heapsym::ptmalloc::GlibcVersion;
use heapsym::ptmalloc::Heap;
use heapsym::ptmalloc::HeapField;
use heapsym::ptmalloc::RenderMode;
use heapsym::Addr;
use heapsym::Deny;
use heapsym::ErrorKind;
use heapsym::ResolutionState;
use heapsym::Threads as _;
use heapsym::__private::GlibcFixture;
use heapsym::__private::MaskedSymbols;

use test_log::test;


/// All chunks of the fixture along with their expected
/// classification.
const CHUNKS: [(Addr, Classification); 13] = [
    (GlibcFixture::MAIN_TCACHE_CHUNK, Classification::Allocated),
    (GlibcFixture::ALLOCATED, Classification::Allocated),
    (GlibcFixture::TCACHE_CHUNK, Classification::Free(BinKind::Tcache)),
    (GlibcFixture::FAST_CHUNK, Classification::Free(BinKind::Fast)),
    (GlibcFixture::SMALL_CHUNK, Classification::Free(BinKind::Small)),
    (GlibcFixture::GUARD1, Classification::Allocated),
    (GlibcFixture::LARGE_CHUNK, Classification::Free(BinKind::Large)),
    (GlibcFixture::UNSORTED_CHUNK, Classification::Free(BinKind::Unsorted)),
    (GlibcFixture::MAIN_TOP, Classification::Top),
    (GlibcFixture::THREAD_TCACHE_CHUNK, Classification::Allocated),
    (GlibcFixture::THREAD_ALLOCATED, Classification::Allocated),
    (GlibcFixture::THREAD_TOP, Classification::Top),
    (GlibcFixture::MMAPPED_CHUNK, Classification::Allocated),
];


fn summary(heap: &Heap<'_>, addr: Addr) -> String {
    heap.malloc_chunk(addr, &ChunkOpts::default()).unwrap()
}

fn classify_all(heap: &Heap<'_>) {
    for (addr, class) in CHUNKS {
        let decoded = heap.decode_chunk(addr, BinQuery::Infer).unwrap();
        assert_eq!(decoded.class, class, "{addr:#x}");
    }
}


/// Check that we detect the glibc release from the banner in libc's
/// read-only data.
#[test]
fn version_detection() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);
    assert_eq!(heap.glibc_version(), GlibcVersion::new(2, 35));
    assert!(heap.has_tcache());
}

/// Check that every chunk of the fixture is classified correctly when
/// all symbols are available.
#[test]
fn chunk_classification() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);
    let () = classify_all(&heap);
}

/// Check the summaries of chunks in the various bins.
#[test]
fn free_chunk_summaries() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);

    let tcache = "\
Free chunk (tcachebins) | PREV_INUSE
Addr: 0x5555555592c0
Size: 0x30 (with flag bits: 0x31)
fd: 0x555555559

";
    assert_eq!(summary(&heap, GlibcFixture::TCACHE_CHUNK), tcache);

    let fast = "\
Free chunk (fastbins) | PREV_INUSE
Addr: 0x5555555592f0
Size: 0x20 (with flag bits: 0x21)
fd: 0x555555559

";
    assert_eq!(summary(&heap, GlibcFixture::FAST_CHUNK), fast);

    let small = "\
Free chunk (smallbins) | PREV_INUSE
Addr: 0x555555559310
Size: 0x90 (with flag bits: 0x91)
fd: 0x7ffff7fa0d60
bk: 0x7ffff7fa0d60

";
    assert_eq!(summary(&heap, GlibcFixture::SMALL_CHUNK), small);

    let large = "\
Free chunk (largebins) | PREV_INUSE
Addr: 0x5555555593c0
Size: 0x410 (with flag bits: 0x411)
fd: 0x7ffff7fa10d0
bk: 0x7ffff7fa10d0
fd_nextsize: 0x5555555593c0
bk_nextsize: 0x5555555593c0

";
    assert_eq!(summary(&heap, GlibcFixture::LARGE_CHUNK), large);

    let unsorted = "\
Free chunk (unsortedbin) | PREV_INUSE
Addr: 0x5555555597f0
Size: 0x100 (with flag bits: 0x101)
fd: 0x7ffff7fa0ce0
bk: 0x7ffff7fa0ce0

";
    assert_eq!(summary(&heap, GlibcFixture::UNSORTED_CHUNK), unsorted);
}

/// Check the summaries of in-use and top chunks, in both arenas.
#[test]
fn allocated_chunk_summaries() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);

    let allocated = "\
Allocated chunk | PREV_INUSE
Addr: 0x555555559290
Size: 0x30 (with flag bits: 0x31)

";
    assert_eq!(summary(&heap, GlibcFixture::ALLOCATED), allocated);

    let guard = "\
Allocated chunk
Addr: 0x5555555593a0
Size: 0x20 (with flag bits: 0x20)

";
    assert_eq!(summary(&heap, GlibcFixture::GUARD1), guard);

    let top = "\
Top chunk | PREV_INUSE
Addr: 0x555555559910
Size: 0x206f0 (with flag bits: 0x206f1)

";
    assert_eq!(summary(&heap, GlibcFixture::MAIN_TOP), top);

    let thread_allocated = "\
Allocated chunk | PREV_INUSE | NON_MAIN_ARENA
Addr: 0x7ffff0000b60
Size: 0x30 (with flag bits: 0x35)

";
    assert_eq!(
        summary(&heap, GlibcFixture::THREAD_ALLOCATED),
        thread_allocated
    );

    let thread_top = "\
Top chunk | PREV_INUSE | NON_MAIN_ARENA
Addr: 0x7ffff0000b90
Size: 0x20470 (with flag bits: 0x20475)

";
    assert_eq!(summary(&heap, GlibcFixture::THREAD_TOP), thread_top);

    let mmapped = "\
Allocated chunk | IS_MMAPPED
Addr: 0x7ffff7c00000
Size: 0x2000 (with flag bits: 0x2002)

";
    assert_eq!(summary(&heap, GlibcFixture::MMAPPED_CHUNK), mmapped);
}

/// Check that a dump covers the chunk and the size field of its
/// successor.
#[test]
fn chunk_dump() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);
    let opts = ChunkOpts {
        mode: RenderMode::Dump,
        ..Default::default()
    };
    let out = heap.malloc_chunk(GlibcFixture::ALLOCATED, &opts).unwrap();
    let expected = "\
Allocated chunk | PREV_INUSE
Addr: 0x555555559290
Size: 0x30 (with flag bits: 0x31)

hexdump
+0000 0x555555559290  00 00 00 00 00 00 00 00  31 00 00 00 00 00 00 00  │........│1.......│
+0010 0x5555555592a0  54 68 69 73 20 69 73 20  61 20 74 65 73 74 20 73  │This.is.│a.test.s│
+0020 0x5555555592b0  74 72 69 6e 67 00 00 00  00 00 00 00 00 00 00 00  │tring...│........│
+0030 0x5555555592c0  00 00 00 00 00 00 00 00                           │........│        │

";
    assert_eq!(out, expected);
}

/// Check that an explicitly provided bin overrides inference.
#[test]
fn explicit_bin() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);
    let opts = ChunkOpts {
        bin: BinQuery::Explicit(BinKind::Small),
        ..Default::default()
    };
    let out = heap.malloc_chunk(GlibcFixture::ALLOCATED, &opts).unwrap();
    let expected = "\
Free chunk (smallbins) | PREV_INUSE
Addr: 0x555555559290
Size: 0x30 (with flag bits: 0x31)
fd: 0x2073692073696854
bk: 0x7320747365742061

";
    assert_eq!(out, expected);
}

/// Check the accessors of arenas, `mp_`, and thread caches.
#[test]
fn allocator_structures() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);

    let arenas = heap.arenas().unwrap();
    let addrs = arenas.iter().map(|arena| arena.addr()).collect::<Vec<_>>();
    assert_eq!(addrs, [GlibcFixture::MAIN_ARENA, GlibcFixture::THREAD_ARENA]);
    assert_eq!(arenas[0].top().unwrap(), GlibcFixture::MAIN_TOP);
    assert_eq!(arenas[0].fastbin(0).unwrap(), GlibcFixture::FAST_CHUNK);
    assert_eq!(
        arenas[0].bin(9).unwrap(),
        (GlibcFixture::SMALL_CHUNK, GlibcFixture::SMALL_CHUNK)
    );
    assert_eq!(arenas[1].top().unwrap(), GlibcFixture::THREAD_TOP);
    assert_eq!(arenas[1].next().unwrap(), GlibcFixture::MAIN_ARENA);

    let info = heap.heap_info_for(GlibcFixture::THREAD_ALLOCATED).unwrap();
    assert_eq!(info.addr(), GlibcFixture::THREAD_HEAP);
    assert_eq!(info.ar_ptr().unwrap(), GlibcFixture::THREAD_ARENA);
    assert_eq!(info.size().unwrap(), 0x21000);

    let mp = heap.mp().unwrap();
    assert_eq!(mp.addr(), GlibcFixture::MP);
    assert_eq!(mp.sbrk_base().unwrap(), GlibcFixture::MAIN_HEAP);
    assert_eq!(mp.tcache_bins().unwrap(), Some(64));
    assert_eq!(heap.global_max_fast().unwrap(), 0x80);

    let cache = heap.thread_cache().unwrap();
    assert_eq!(cache.addr(), GlibcFixture::MAIN_TCACHE);
    assert_eq!(cache.bin_count().unwrap(), 64);
    assert_eq!(cache.count(1).unwrap(), 1);
    assert_eq!(cache.entry(1).unwrap(), GlibcFixture::TCACHE_CHUNK + 0x10);

    let cache = heap.thread_cache_for(GlibcFixture::SECOND_THREAD).unwrap();
    assert_eq!(cache.addr(), GlibcFixture::THREAD_TCACHE);
    assert_eq!(cache.entry(1).unwrap(), 0);
}

/// Check that chunks are classified the same irrespective of the
/// thread selected.
#[test]
fn selected_thread_independence() {
    let fixture = GlibcFixture::new();
    let mut process = fixture.process.clone();
    let () = process.select_thread(GlibcFixture::SECOND_THREAD);

    let heap = Heap::new(&process);
    assert_eq!(heap.main_arena_addr().unwrap(), GlibcFixture::MAIN_ARENA);
    assert_eq!(heap.thread_arena().unwrap().addr(), GlibcFixture::THREAD_ARENA);
    let () = classify_all(&heap);
}

/// Check that all internal variables are found without symbols,
/// through heuristics and brute force searches.
#[test]
fn symbol_fallbacks() {
    let fixture = GlibcFixture::new();
    let target = MaskedSymbols::new(&fixture.process, GlibcFixture::INTERNAL_SYMBOLS);
    let asked = Cell::new(0);
    let confirm = |_prompt: &str| {
        let () = asked.set(asked.get() + 1);
        true
    };
    let heap = Heap::builder().set_confirm(&confirm).build(&target);

    assert_eq!(heap.main_arena_addr().unwrap(), GlibcFixture::MAIN_ARENA);
    assert_eq!(heap.mp_addr().unwrap(), GlibcFixture::MP);
    assert_eq!(heap.global_max_fast().unwrap(), 0x80);
    for (thread, arena, cache) in [
        (
            GlibcFixture::MAIN_THREAD,
            GlibcFixture::MAIN_ARENA,
            GlibcFixture::MAIN_TCACHE,
        ),
        (
            GlibcFixture::SECOND_THREAD,
            GlibcFixture::THREAD_ARENA,
            GlibcFixture::THREAD_TCACHE,
        ),
    ] {
        assert_eq!(heap.thread_arena_addr_for(thread).unwrap(), arena);
        assert_eq!(heap.thread_cache_addr_for(thread).unwrap(), cache);
    }
    assert!(asked.get() > 0);

    let () = classify_all(&heap);
    assert_eq!(target.selected_thread(), GlibcFixture::MAIN_THREAD);
}

/// Check that the arena of the only thread is inferred without
/// prompting.
#[test]
fn single_threaded_inference() {
    let fixture = GlibcFixture::single_threaded();
    let target = MaskedSymbols::new(&fixture.process, &["thread_arena", "tcache"]);
    let heap = Heap::builder().set_confirm(&Deny).build(&target);
    let thread = GlibcFixture::MAIN_THREAD;

    assert_eq!(
        heap.state(HeapField::ThreadArena(thread)),
        ResolutionState::Unresolved
    );
    assert_eq!(heap.thread_arena().unwrap().addr(), GlibcFixture::MAIN_ARENA);
    assert_eq!(
        heap.state(HeapField::ThreadArena(thread)),
        ResolutionState::Resolved
    );
    assert_eq!(heap.thread_cache().unwrap().addr(), GlibcFixture::MAIN_TCACHE);
    assert_eq!(
        heap.decode_chunk(GlibcFixture::TCACHE_CHUNK, BinQuery::Infer)
            .unwrap()
            .class,
        Classification::Free(BinKind::Tcache)
    );
}

/// Check that a symbol no strategy can locate is reported as such.
#[test]
fn unresolvable_symbols() {
    let fixture = GlibcFixture::new();
    let mut process = fixture.process.clone();
    let data = GlibcFixture::DATA;
    let () = process.write(data.start, &vec![0; (data.end - data.start) as usize]);

    let target = MaskedSymbols::new(&process, GlibcFixture::INTERNAL_SYMBOLS);
    let heap = Heap::builder().set_confirm(&Deny).build(&target);

    let err = heap
        .malloc_chunk(GlibcFixture::ALLOCATED, &ChunkOpts::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable, "{err:#}");
    assert_eq!(err.symbol(), Some("main_arena"));
    assert_eq!(heap.state(HeapField::MainArena), ResolutionState::Unresolvable);

    let err = heap.mp_addr().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable);
    assert_eq!(err.symbol(), Some("mp_"));

    for thread in [GlibcFixture::MAIN_THREAD, GlibcFixture::SECOND_THREAD] {
        let err = heap.thread_arena_addr_for(thread).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable, "{err:#}");
        assert_eq!(err.symbol(), Some("thread_arena"));
        assert_eq!(
            heap.state(HeapField::ThreadArena(thread)),
            ResolutionState::Unresolvable
        );
    }

    let err = heap.thread_cache().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable);
    assert_eq!(err.symbol(), Some("tcache"));

    // The compile time default stands in for `global_max_fast`.
    assert_eq!(heap.global_max_fast().unwrap(), 0x80);
}

/// Check that only the selected thread's storage is searched when
/// inferring tcache membership.
#[test]
fn brute_force_confined_to_selected_thread() {
    let fixture = GlibcFixture::new();
    let target = MaskedSymbols::new(&fixture.process, GlibcFixture::INTERNAL_SYMBOLS);
    let prompts = RefCell::new(Vec::new());
    let confirm = |prompt: &str| {
        let () = prompts.borrow_mut().push(prompt.to_string());
        true
    };
    let heap = Heap::builder().set_confirm(&confirm).build(&target);

    let decoded = heap
        .decode_chunk(GlibcFixture::ALLOCATED, BinQuery::Infer)
        .unwrap();
    assert_eq!(decoded.class, Classification::Allocated);
    assert!(!prompts.borrow().is_empty());
    for prompt in prompts.borrow().iter() {
        assert!(prompt.contains("thread 1000"), "{prompt}");
    }
    assert_eq!(
        heap.state(HeapField::ThreadArena(GlibcFixture::SECOND_THREAD)),
        ResolutionState::Unresolvable
    );

    // Asking for the thread explicitly may search its storage.
    let () = prompts.borrow_mut().clear();
    assert_eq!(
        heap.thread_arena_addr_for(GlibcFixture::SECOND_THREAD)
            .unwrap(),
        GlibcFixture::THREAD_ARENA
    );
    assert_eq!(prompts.borrow().len(), 1);
    assert!(prompts.borrow()[0].contains("thread 1001"));
}

/// Make sure that corrupted free lists are treated as not containing
/// the chunk in question.
#[test]
fn corrupted_free_lists() {
    let fixture = GlibcFixture::new();
    let mangle = |pos: Addr, ptr: Addr| (pos >> 12) ^ ptr;
    let tcache_link = GlibcFixture::TCACHE_CHUNK + 0x10;
    let fast_link = GlibcFixture::FAST_CHUNK + 0x10;

    for (pos, revealed) in [
        // unmapped
        (tcache_link, 0xdead0000),
        // misaligned
        (tcache_link, 0x555555559298),
        // link beyond the end of the address space
        (fast_link, 0xfffffffffffffff0),
        // misaligned, and overflowing as well
        (fast_link, 0xfffffffffffffff8),
        (fast_link, 0xdead0000),
    ] {
        let mut process = fixture.process.clone();
        let () = process.write_u64(pos, mangle(pos, revealed));
        let heap = Heap::new(&process);

        for addr in [GlibcFixture::ALLOCATED, GlibcFixture::GUARD1] {
            let decoded = heap.decode_chunk(addr, BinQuery::Infer).unwrap();
            assert_eq!(decoded.class, Classification::Allocated, "{addr:#x}");
        }
        // Heads of the corrupted lists are still found.
        let decoded = heap
            .decode_chunk(GlibcFixture::TCACHE_CHUNK, BinQuery::Infer)
            .unwrap();
        assert_eq!(decoded.class, Classification::Free(BinKind::Tcache));
        let decoded = heap
            .decode_chunk(GlibcFixture::FAST_CHUNK, BinQuery::Infer)
            .unwrap();
        assert_eq!(decoded.class, Classification::Free(BinKind::Fast));
    }
}

/// Check that dumping a chunk with a corrupt size field fails instead
/// of reading unbounded amounts of memory.
#[test]
fn implausible_dump_size() {
    let fixture = GlibcFixture::new();
    let opts = ChunkOpts {
        bin: BinQuery::Explicit(BinKind::Small),
        mode: RenderMode::Dump,
    };

    for size in [0xfffffffffffffff9, 0x100000000001, 0x4000011] {
        let mut process = fixture.process.clone();
        let () = process.write_u64(GlibcFixture::ALLOCATED + 8, size);
        let heap = Heap::new(&process);

        let err = heap
            .malloc_chunk(GlibcFixture::ALLOCATED, &opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData, "{size:#x}");

        // The summary is still rendered.
        let out = heap
            .malloc_chunk(
                GlibcFixture::ALLOCATED,
                &ChunkOpts {
                    mode: RenderMode::Summary,
                    ..opts
                },
            )
            .unwrap();
        assert!(out.starts_with("Free chunk (smallbins)"), "{out}");
    }
}

/// Make sure that disabling heuristics leaves symbols as the only
/// means of locating structures.
#[test]
fn disabled_heuristics() {
    let fixture = GlibcFixture::new();
    let target = MaskedSymbols::new(&fixture.process, &["main_arena"]);
    let yes = |_prompt: &str| true;
    let heap = Heap::builder()
        .enable_heuristics(false)
        .set_confirm(&yes)
        .build(&target);

    let err = heap.main_arena_addr().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable);
    assert_eq!(err.symbol(), Some("main_arena"));
    assert_eq!(heap.mp_addr().unwrap(), GlibcFixture::MP);
}

/// Check that resetting the session forgets resolved addresses.
#[test]
fn session_reset() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);
    assert_eq!(heap.state(HeapField::MainArena), ResolutionState::Unresolved);

    let _out = summary(&heap, GlibcFixture::TCACHE_CHUNK);
    assert_eq!(heap.state(HeapField::MainArena), ResolutionState::Resolved);
    assert_eq!(
        heap.state(HeapField::ThreadCache(GlibcFixture::MAIN_THREAD)),
        ResolutionState::Resolved
    );

    let () = heap.reset();
    assert_eq!(heap.state(HeapField::MainArena), ResolutionState::Unresolved);
    assert_eq!(
        heap.state(HeapField::ThreadCache(GlibcFixture::MAIN_THREAD)),
        ResolutionState::Unresolved
    );
    assert_eq!(heap.main_arena_addr().unwrap(), GlibcFixture::MAIN_ARENA);
}

/// Check that reading a chunk from unmapped memory fails.
#[test]
fn unreadable_chunk() {
    let fixture = GlibcFixture::new();
    let heap = Heap::new(&fixture.process);
    let err = heap
        .malloc_chunk(0x1000, &ChunkOpts::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemoryUnreadable);
}
