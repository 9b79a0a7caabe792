//! Interfaces through which the library observes the target process.
//!
//! The reconstruction logic never touches a process directly. Rather,
//! everything it learns is obtained via the [`Memory`], [`Symbols`],
//! and [`Threads`] traits, and operator consent for expensive scans
//! is requested through [`Confirm`]. [`Process`][crate::Process]
//! implements the first three for live Linux processes.

use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::ops::Range;

use crate::util::decode_uint;
use crate::Addr;
use crate::Error;
use crate::Result;


/// The identifier of a thread in the target process.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ThreadId(pub u32);

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ThreadId {
    fn from(tid: u32) -> Self {
        Self(tid)
    }
}


/// Byte addressable access to the target's memory.
pub trait Memory {
    /// The width of a pointer on the target, in bytes.
    fn ptr_size(&self) -> usize;

    /// Read `len` bytes starting at `addr`.
    ///
    /// Implementations report an [`ErrorKind::MemoryUnreadable`][crate::ErrorKind::MemoryUnreadable]
    /// error if any part of the range is not readable. Short reads are
    /// not permitted.
    fn read_bytes(&self, addr: Addr, len: usize) -> Result<Vec<u8>>;

    /// Read a little endian unsigned integer of `width` bytes.
    fn read_uint(&self, addr: Addr, width: usize) -> Result<u64> {
        let data = self.read_bytes(addr, width)?;
        decode_uint(&data).ok_or_else(|| Error::memory_unreadable(addr, width))
    }

    /// Read a pointer sized value.
    fn read_pointer(&self, addr: Addr) -> Result<Addr> {
        self.read_uint(addr, self.ptr_size())
    }
}


/// Symbol and section lookup in the objects loaded by the target.
pub trait Symbols {
    /// Look up `name` in the dynamic symbol tables of loaded objects,
    /// returning its relocated address.
    ///
    /// For thread-local variables, the address is that of the variable
    /// in `thread`'s thread-local storage.
    fn dynamic_symbol_address(&self, name: &str, thread: ThreadId) -> Option<Addr>;

    /// Look up `name` among the static linkage (non-exported) symbols
    /// of loaded objects, returning its relocated address.
    fn static_linkage_symbol_address(&self, name: &str, thread: ThreadId) -> Option<Addr>;

    /// Retrieve the relocated address range of `section` in the loaded
    /// object whose file name starts with `object` (e.g., `libc`).
    fn section_range(&self, object: &str, section: &str) -> Option<Range<Addr>> {
        let _unused = (object, section);
        None
    }
}


/// Enumeration of the target's threads.
pub trait Threads {
    /// The thread currently selected by the operator.
    fn selected_thread(&self) -> ThreadId;

    /// All live threads, in ascending order.
    fn threads(&self) -> Vec<ThreadId>;

    /// The memory region holding `thread`'s thread-local storage, if
    /// known. Brute force scans are confined to this region.
    fn thread_local_region(&self, thread: ThreadId) -> Option<Range<Addr>>;
}


/// The combination of capabilities required to inspect a heap.
pub trait Target: Memory + Symbols + Threads {}

impl<T> Target for T where T: Memory + Symbols + Threads + ?Sized {}


/// A yes/no prompt asking the operator for permission to perform a
/// potentially slow or speculative operation.
pub trait Confirm {
    /// Ask the operator `prompt`, returning `true` if permission was
    /// granted.
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}


/// A [`Confirm`] implementation declining every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deny;

impl Confirm for Deny {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    struct Flat(Vec<u8>);

    impl Memory for Flat {
        fn ptr_size(&self) -> usize {
            4
        }

        fn read_bytes(&self, addr: Addr, len: usize) -> Result<Vec<u8>> {
            let start = addr as usize;
            self.0
                .get(start..start + len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::memory_unreadable(addr, len))
        }
    }


    /// Check that pointer reads honor the target's pointer width.
    #[test]
    fn pointer_reading() {
        let memory = Flat(vec![0x78, 0x56, 0x34, 0x12, 0xff, 0xff]);
        assert_eq!(memory.read_pointer(0).unwrap(), 0x12345678);

        let err = memory.read_pointer(4).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MemoryUnreadable);
    }

    /// Check that closures and `Deny` work as confirmation prompts.
    #[test]
    fn confirmation() {
        let yes = |_prompt: &str| true;
        assert!(yes.confirm("scan?"));
        assert!(!Deny.confirm("scan?"));
        assert_eq!(ThreadId::from(1001).to_string(), "1001");
    }
}
