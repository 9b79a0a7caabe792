use heapsym::jemalloc::Jemalloc;
use heapsym::ptmalloc::GlibcVersion;
use heapsym::ptmalloc::Heap;
use heapsym::ErrorKind;
use heapsym::Pid;
use heapsym::Process;

use test_log::test;


/// Check that we detect the release of the C library we run on.
#[cfg(target_env = "gnu")]
#[test]
fn live_glibc_version() {
    let process = Process::open(Pid::Slf).unwrap();
    let version = GlibcVersion::detect(&process, "libc").unwrap();
    assert!(version.at_least(2, 17), "{version}");

    let heap = Heap::builder()
        .set_allocator_object("libc")
        .build(&process);
    assert_eq!(heap.glibc_version(), version);
}

/// Make sure that inspecting jemalloc in a process not using it fails
/// gracefully.
#[test]
fn live_jemalloc_absent() {
    let process = Process::open(Pid::Slf).unwrap();
    let err = Jemalloc::new(&process).extents().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable);
    assert_eq!(err.symbol(), Some("je_arena_emap_global"));
}
