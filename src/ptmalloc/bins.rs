//! Bin index computations and free list traversal.
//!
//! Free lists live in memory the target may be modifying (or may have
//! corrupted), so every traversal is bounded and a list that does not
//! terminate within the bound is reported as corrupted.

use super::Geometry;
use super::NSMALLBINS;
use crate::log::warn;
use crate::Addr;
use crate::Memory;


/// The outcome of searching a free list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Search {
    Found,
    NotFound,
    /// The list did not terminate within the traversal bound.
    Corrupted,
}

impl Search {
    #[inline]
    pub fn found(&self) -> bool {
        matches!(self, Self::Found)
    }
}


/// Undo glibc's pointer mangling of single linked lists (`REVEAL_PTR`).
///
/// `pos` is the address the mangled pointer is stored at.
#[inline]
pub(crate) fn reveal_ptr(geometry: &Geometry, pos: Addr, ptr: Addr) -> Addr {
    if geometry.safe_linking() {
        (pos >> 12) ^ ptr
    } else {
        ptr
    }
}

/// The fast bin a chunk of `size` bytes belongs into.
pub(crate) fn fastbin_index(geometry: &Geometry, size: u64) -> Option<usize> {
    let shift = if geometry.size_sz == 8 { 4 } else { 3 };
    (size >> shift).checked_sub(2).map(|idx| idx as usize)
}

/// The tcache bin a chunk of `size` bytes belongs into.
pub(crate) fn tcache_index(geometry: &Geometry, size: u64) -> Option<usize> {
    let idx = size.checked_sub(geometry.min_size())? + geometry.align - 1;
    Some((idx / geometry.align) as usize)
}

fn smallbin_correction(geometry: &Geometry) -> u64 {
    u64::from(geometry.align > 2 * geometry.size_sz)
}

/// `MIN_LARGE_SIZE`, the smallest size stored in large bins.
pub(crate) fn min_large_size(geometry: &Geometry) -> u64 {
    (NSMALLBINS as u64 - smallbin_correction(geometry)) * geometry.align
}

pub(crate) fn in_smallbin_range(geometry: &Geometry, size: u64) -> bool {
    size < min_large_size(geometry)
}

pub(crate) fn smallbin_index(geometry: &Geometry, size: u64) -> usize {
    let idx = if geometry.align == 16 {
        size >> 4
    } else {
        size >> 3
    };
    (idx + smallbin_correction(geometry)) as usize
}

pub(crate) fn largebin_index(geometry: &Geometry, size: u64) -> usize {
    let first = if geometry.size_sz == 8 {
        (size >> 6 <= 48).then(|| 48 + (size >> 6))
    } else if geometry.align == 16 {
        (size >> 6 <= 45).then(|| 49 + (size >> 6))
    } else {
        (size >> 6 <= 38).then(|| 56 + (size >> 6))
    };

    let idx = first.unwrap_or_else(|| {
        if size >> 9 <= 20 {
            91 + (size >> 9)
        } else if size >> 12 <= 10 {
            110 + (size >> 12)
        } else if size >> 15 <= 4 {
            119 + (size >> 15)
        } else if size >> 18 <= 2 {
            124 + (size >> 18)
        } else {
            126
        }
    });
    idx as usize
}


/// Read the link stored `link_offset` bytes into the list element at
/// `cur`.
///
/// Links sit at the start of a chunk's user data, which is aligned to
/// `MALLOC_ALIGNMENT`. Returns the position of the link along with its
/// value, or `None` if the element is corrupted.
fn read_link<M>(
    memory: &M,
    geometry: &Geometry,
    cur: Addr,
    link_offset: u64,
) -> Option<(Addr, Addr)>
where
    M: Memory + ?Sized,
{
    let Some(pos) = cur.checked_add(link_offset) else {
        warn!("list element {cur:#x} lies at the end of the address space; assuming corruption");
        return None
    };
    if pos % geometry.align != 0 {
        warn!("list element {cur:#x} is misaligned; assuming corruption");
        return None
    }

    match memory.read_pointer(pos) {
        Ok(link) => Some((pos, link)),
        Err(err) => {
            warn!("failed to read link of list element {cur:#x}: {err}; assuming corruption");
            None
        }
    }
}

/// Search a single linked list for `needle`.
///
/// `head` is the first element; the link to the next element is
/// stored at offset `link_offset` into each element. Lists are
/// terminated by NULL.
pub(crate) fn search_single<M>(
    memory: &M,
    geometry: &Geometry,
    head: Addr,
    link_offset: u64,
    needle: Addr,
    max_len: usize,
) -> Search
where
    M: Memory + ?Sized,
{
    let mut cur = head;
    for _ in 0..max_len {
        if cur == 0 {
            return Search::NotFound
        }
        if cur == needle {
            return Search::Found
        }
        let Some((pos, link)) = read_link(memory, geometry, cur, link_offset) else {
            return Search::Corrupted
        };
        cur = reveal_ptr(geometry, pos, link);
    }

    if cur == 0 {
        return Search::NotFound
    }
    warn!("single linked list starting at {head:#x} exceeds {max_len} elements; assuming corruption");
    Search::Corrupted
}

/// Search the circular double linked list headed by the bin at `bin`
/// for the chunk `needle`, following `fd` links.
pub(crate) fn search_double<M>(
    memory: &M,
    geometry: &Geometry,
    bin: Addr,
    needle: Addr,
    max_len: usize,
) -> Search
where
    M: Memory + ?Sized,
{
    let fd_offset = 2 * geometry.size_sz;
    // Bin headers are not chunks and need not be aligned.
    let head = bin
        .checked_add(fd_offset)
        .and_then(|pos| memory.read_pointer(pos).ok());
    let Some(mut cur) = head else {
        warn!("failed to read head of bin at {bin:#x}; assuming corruption");
        return Search::Corrupted
    };

    for _ in 0..max_len {
        if cur == bin {
            return Search::NotFound
        }
        if cur == needle {
            return Search::Found
        }
        if cur == 0 {
            warn!("bin at {bin:#x} contains a NULL link; assuming corruption");
            return Search::Corrupted
        }
        let Some((_pos, fd)) = read_link(memory, geometry, cur, fd_offset) else {
            return Search::Corrupted
        };
        cur = fd;
    }

    warn!("bin at {bin:#x} exceeds {max_len} elements; assuming corruption");
    Search::Corrupted
}
