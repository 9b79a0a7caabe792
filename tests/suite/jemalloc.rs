use heapsym::jemalloc::Jemalloc;
use heapsym::jemalloc::Pai;
use heapsym::ErrorKind;
use heapsym::ResolutionState;
use heapsym::__private::JemallocFixture;
use heapsym::__private::MaskedSymbols;

use test_log::test;


/// Check that every pointer into an extent maps back to that extent.
#[test]
fn find_extent_contains_pointer() {
    let fixture = JemallocFixture::new();
    let jemalloc = Jemalloc::new(&fixture.process);

    let small = JemallocFixture::SMALL_PAGE..JemallocFixture::SMALL_PAGE + 0x1000;
    for ptr in small.step_by(0x80) {
        let extent = jemalloc.find_extent(ptr).unwrap();
        assert_eq!(extent.extent_address, JemallocFixture::SMALL_EDATA);
        assert!(extent.contains(ptr), "{extent:x?} does not contain {ptr:#x}");
        assert!(extent.is_small_class());
    }

    let large = JemallocFixture::LARGE_ALLOC..JemallocFixture::LARGE_ALLOC + 0x4000;
    for ptr in large.step_by(0x800) {
        let extent = jemalloc.find_extent(ptr).unwrap();
        assert_eq!(extent.extent_address, JemallocFixture::LARGE_EDATA);
        assert!(extent.contains(ptr), "{extent:x?} does not contain {ptr:#x}");
        assert!(!extent.is_small_class());
    }
}

/// Check the decoded metadata of both extents.
#[test]
fn extent_metadata() {
    let fixture = JemallocFixture::new();
    let jemalloc = Jemalloc::new(&fixture.process);

    let extents = jemalloc.extents().unwrap();
    assert_eq!(extents.len(), 2);
    assert_eq!(extents[0].allocated_address, JemallocFixture::SMALL_PAGE);
    assert_eq!(extents[1].allocated_address, JemallocFixture::LARGE_ALLOC);

    let bits = extents[0].bits();
    assert!(bits.slab);
    assert!(bits.committed);
    assert_eq!(bits.szind, 5);
    assert_eq!(bits.nfree, 62);
    assert_eq!(bits.pai, Pai::Pac);

    let bits = jemalloc
        .extent_info(JemallocFixture::LARGE_EDATA)
        .unwrap()
        .bits();
    assert!(bits.is_head);
    assert_eq!(bits.szind, 40);
}

/// Check that pointers outside of all extents are not found.
#[test]
fn foreign_pointer() {
    let fixture = JemallocFixture::new();
    let jemalloc = Jemalloc::new(&fixture.process);

    for ptr in [
        JemallocFixture::SMALL_PAGE + 0x1000,
        JemallocFixture::LARGE_ALLOC + 0x4000,
    ] {
        let err = jemalloc.find_extent(ptr).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{ptr:#x}");
    }
}

/// Make sure that the extent map is only located through symbols.
#[test]
fn missing_emap_symbol() {
    let fixture = JemallocFixture::new();
    let target = MaskedSymbols::new(&fixture.process, &["je_arena_emap_global"]);
    let jemalloc = Jemalloc::new(&target);

    let err = jemalloc
        .find_extent(JemallocFixture::SMALL_ALLOC)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable);
    assert_eq!(err.symbol(), Some("je_arena_emap_global"));
    assert_eq!(jemalloc.state(), ResolutionState::Unresolvable);
}

/// Check that an explicit root offset is honored.
#[test]
fn explicit_root_offset() {
    let fixture = JemallocFixture::new();
    let jemalloc = Jemalloc::builder()
        .set_rtree_root_offset(Some(0x70))
        .build(&fixture.process);
    assert_eq!(jemalloc.rtree_root().unwrap(), JemallocFixture::EMAP + 0x70);
    // With the root misplaced, no extent is found.
    assert!(jemalloc.find_extent(JemallocFixture::SMALL_ALLOC).is_err());
}
