//! Heuristics locating glibc's control structures without symbols.
//!
//! `main_arena` and `mp_` live in the `.data` section of the C library,
//! so a plausible candidate can be found by trying every suitably
//! aligned offset. `thread_arena` is found by looking for a pointer to
//! a known arena in the thread's thread-local storage.

use std::ops::Range;

use super::arena::Arena;
use super::arena::MallocPar;
use super::Heap;
use super::NBINS;
use super::TCACHE_MAX_BINS;
use crate::layout::Overlay;
use crate::log::debug;
use crate::util::words;
use crate::Addr;
use crate::Error;
use crate::Result;
use crate::ThreadId;


/// The maximum number of arenas followed when checking that a
/// candidate's arena ring closes.
const MAX_RING_LEN: usize = 64;
/// The largest plausible value of a mutex word.
const MAX_MUTEX: u64 = 2;


/// Retrieve the range and contents of `.data` of the allocator object.
fn data_section(heap: &Heap<'_>) -> Result<(Range<Addr>, Vec<u8>)> {
    let object = &heap.config().allocator_object;
    let range = heap
        .target()
        .section_range(object, ".data")
        .ok_or_else(|| Error::with_not_found(format!("no `.data` section found in `{object}`")))?;
    let data = heap
        .target()
        .read_bytes(range.start, (range.end - range.start) as usize)?;
    Ok((range, data))
}

/// Check whether following `next` links from `arena` leads back to it.
fn ring_closes(heap: &Heap<'_>, arena: &Arena) -> bool {
    let next_offset = match arena.overlay().field("next") {
        Ok(field) => field.offset as u64,
        Err(..) => return false,
    };
    let mut next = match arena.next() {
        Ok(next) => next,
        Err(..) => return false,
    };

    for _ in 0..MAX_RING_LEN {
        if next == arena.addr() {
            return true
        }
        if next == 0 {
            return false
        }
        next = match heap.target().read_pointer(next + next_offset) {
            Ok(next) => next,
            Err(..) => return false,
        };
    }
    false
}

fn plausible_arena(heap: &Heap<'_>, arena: &Arena) -> Result<bool> {
    if arena.mutex()? > MAX_MUTEX || arena.top()? == 0 {
        return Ok(false)
    }

    // Empty bins point to themselves in both directions.
    for idx in 1..NBINS {
        let (fd, bk) = arena.bin(idx)?;
        let bin = arena.bin_at(idx)?;
        if fd == 0 || bk == 0 || (fd == bin) != (bk == bin) {
            return Ok(false)
        }
    }
    Ok(ring_closes(heap, arena))
}

/// Search `.data` for `main_arena`.
pub(super) fn find_main_arena(heap: &Heap<'_>) -> Result<Option<Addr>> {
    let (range, data) = data_section(heap)?;
    let layout = heap.layout("malloc_state")?;
    let ptr_size = heap.target().ptr_size();
    let size_sz = ptr_size as u64;

    let mut offset = 0;
    while offset + layout.size() <= data.len() {
        let addr = range.start + offset as Addr;
        let overlay = Overlay::from_bytes(addr, layout.clone(), &data[offset..])?;
        let arena = Arena::new(overlay, size_sz);
        if plausible_arena(heap, &arena)? {
            debug!("found `main_arena` candidate at {addr:#x}");
            return Ok(Some(addr))
        }
        offset += ptr_size;
    }
    Ok(None)
}


fn plausible_mp(heap: &Heap<'_>, mp: &MallocPar, top: Addr, system_mem: u64) -> Result<bool> {
    let sbrk_base = mp.sbrk_base()?;
    if sbrk_base == 0 || top < sbrk_base || top >= sbrk_base.saturating_add(system_mem) {
        return Ok(false)
    }

    // DEFAULT_MMAP_THRESHOLD_MAX
    let max_mmap_threshold = 4 * 1024 * 1024 * heap.target().ptr_size() as u64;
    let mmap_threshold = mp.mmap_threshold()?;
    if mmap_threshold == 0 || mmap_threshold > max_mmap_threshold {
        return Ok(false)
    }

    if let Some(bins) = mp.tcache_bins()? {
        if bins == 0 || bins > TCACHE_MAX_BINS as u64 {
            return Ok(false)
        }
    }
    if let Some(count) = mp.tcache_count()? {
        if count > u64::from(u16::MAX) {
            return Ok(false)
        }
    }
    Ok(true)
}

/// Search `.data` for `mp_`, using the main arena's top chunk and
/// system memory for validation.
pub(super) fn find_mp(heap: &Heap<'_>) -> Result<Option<Addr>> {
    let main_arena = heap.main_arena()?;
    let top = main_arena.top()?;
    let system_mem = main_arena.system_mem()?;
    let arena_range = main_arena.addr()..main_arena.addr() + main_arena.overlay().bytes().len() as Addr;

    let (range, data) = data_section(heap)?;
    let layout = heap.layout("malloc_par")?;
    let ptr_size = heap.target().ptr_size();

    let mut offset = 0;
    while offset + layout.size() <= data.len() {
        let addr = range.start + offset as Addr;
        let end = addr + layout.size() as Addr;
        if addr < arena_range.end && arena_range.start < end {
            offset += ptr_size;
            continue
        }

        let overlay = Overlay::from_bytes(addr, layout.clone(), &data[offset..])?;
        if plausible_mp(heap, &MallocPar::new(overlay), top, system_mem)? {
            debug!("found `mp_` candidate at {addr:#x}");
            return Ok(Some(addr))
        }
        offset += ptr_size;
    }
    Ok(None)
}


/// A single threaded process only ever uses the main arena.
pub(super) fn single_thread_arena(heap: &Heap<'_>) -> Result<Option<Addr>> {
    if heap.target().threads().len() > 1 {
        debug!("process is multi-threaded; `thread_arena` cannot be inferred");
        return Ok(None)
    }
    heap.main_arena_addr().map(Some)
}

/// Search the thread-local storage of `thread` for a pointer to an
/// arena in the arena ring.
pub(super) fn scan_thread_arena(heap: &Heap<'_>, thread: ThreadId) -> Result<Option<Addr>> {
    let region = heap.target().thread_local_region(thread).ok_or_else(|| {
        Error::with_not_found(format!("no thread-local storage known for thread {thread}"))
    })?;
    let arenas = heap
        .arenas()?
        .iter()
        .map(Arena::addr)
        .collect::<Vec<_>>();

    let ptr_size = heap.target().ptr_size();
    let data = heap
        .target()
        .read_bytes(region.start, (region.end - region.start) as usize)?;
    let found = words(&data, region.start, ptr_size).find_map(|(addr, value)| {
        arenas.contains(&value).then(|| {
            debug!("found `thread_arena` of thread {thread} at {addr:#x}");
            value
        })
    });
    Ok(found)
}
