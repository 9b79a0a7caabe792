//! Location of a thread's `tcache_perthread_struct` without symbols.
//!
//! The structure is the first allocation a thread makes, so it usually
//! occupies the first chunk of the heap of the thread's arena. If the
//! arena is shared between threads that is no longer conclusive, and
//! the thread's thread-local storage can be searched for a pointer to a
//! plausible structure instead.

use super::arena::Arena;
use super::Heap;
use super::PREV_INUSE;
use super::SIZE_BITS;
use crate::log::debug;
use crate::util::words;
use crate::Addr;
use crate::Error;
use crate::Result;
use crate::ThreadId;


/// The size of the chunk holding a `tcache_perthread_struct`.
fn tcache_chunk_size(heap: &Heap<'_>) -> Result<u64> {
    let layout = heap.layout("tcache_perthread_struct")?;
    Ok(heap.geometry().request2size(layout.size() as u64))
}

/// The address of the first chunk in the heap of `arena`.
fn first_chunk(heap: &Heap<'_>, arena: &Arena) -> Result<Addr> {
    let geometry = heap.geometry();
    let main_arena = heap.main_arena_addr()?;

    let start = if arena.addr() == main_arena {
        heap.mp()?.sbrk_base()?
    } else {
        // The arena of a thread is placed directly behind the
        // `heap_info` header of its first heap.
        arena.addr() + heap.layout("malloc_state")?.size() as Addr
    };
    Ok(geometry.first_chunk(start))
}

/// Infer the cache of `thread` from the first chunk of its arena's
/// heap.
///
/// The arena itself is searched for only if `brute_force` is set.
pub(super) fn from_first_chunk(
    heap: &Heap<'_>,
    thread: ThreadId,
    brute_force: bool,
) -> Result<Option<Addr>> {
    let arena = heap.arena(heap.thread_arena_addr(thread, brute_force)?)?;
    let attached = arena.attached_threads()?;
    if attached != 1 {
        debug!(
            "arena at {:#x} is used by {attached} threads; its first chunk is inconclusive",
            arena.addr()
        );
        return Ok(None)
    }

    let addr = first_chunk(heap, &arena)?;
    let chunk = heap.chunk(addr)?;
    let expected = tcache_chunk_size(heap)?;
    if chunk.real_size() != expected {
        debug!(
            "first chunk at {addr:#x} has size {:#x}, not {expected:#x}",
            chunk.real_size()
        );
        return Ok(None)
    }
    Ok(Some(heap.geometry().chunk2mem(addr)))
}


/// Check whether `addr` holds something that looks like a thread cache.
fn plausible(heap: &Heap<'_>, addr: Addr, chunk_size: u64) -> Result<bool> {
    let geometry = heap.geometry();
    if addr == 0 || addr % geometry.align != 0 {
        return Ok(false)
    }

    let size = heap.target().read_pointer(addr - geometry.size_sz)?;
    if size & !SIZE_BITS != chunk_size || size & PREV_INUSE == 0 {
        return Ok(false)
    }

    let cache = heap.thread_cache_at(addr)?;
    for idx in 0..cache.bin_count()? {
        let count = cache.count(idx)?;
        let entry = cache.entry(idx)?;
        if (count == 0) != (entry == 0) || entry % geometry.align != 0 {
            return Ok(false)
        }
    }
    Ok(true)
}

/// Search the thread-local storage of `thread` for a pointer to its
/// cache.
pub(super) fn scan(heap: &Heap<'_>, thread: ThreadId) -> Result<Option<Addr>> {
    let region = heap.target().thread_local_region(thread).ok_or_else(|| {
        Error::with_not_found(format!("no thread-local storage known for thread {thread}"))
    })?;
    let chunk_size = tcache_chunk_size(heap)?;
    let ptr_size = heap.target().ptr_size();
    let data = heap
        .target()
        .read_bytes(region.start, (region.end - region.start) as usize)?;

    for (addr, value) in words(&data, region.start, ptr_size) {
        // Most values are not pointers at all; failing reads simply
        // disqualify a candidate.
        if let Ok(true) = plausible(heap, value, chunk_size) {
            debug!("found `tcache` of thread {thread} at {addr:#x}");
            return Ok(Some(value))
        }
    }
    Ok(None)
}
