//! **heapsym** is a library for reconstructing the heap metadata of
//! C memory allocators in a running process.
//!
//! It supports glibc's `ptmalloc` (with and without per-thread caches)
//! and jemalloc 5.3.0. Allocator state is read through the
//! [`Memory`], [`Symbols`], and [`Threads`] traits, which
//! [`Process`] implements for live Linux processes. Control structures
//! that are not exported are located through a chain of increasingly
//! speculative strategies, see [`resolve`].
//!
//! ```no_run
//! use heapsym::ptmalloc::ChunkOpts;
//! use heapsym::ptmalloc::Heap;
//! use heapsym::Pid;
//! use heapsym::Process;
//!
//! # fn main() -> heapsym::Result<()> {
//! let process = Process::open(Pid::from(1234))?;
//! let heap = Heap::new(&process);
//! let out = heap.malloc_chunk(0x5555555592a0, &ChunkOpts::default())?;
//! print!("{out}");
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::collapsible_else_if,
    clippy::collapsible_if,
    clippy::let_and_return,
    clippy::let_unit_value
)]

mod elf;
mod error;
pub mod hex;
pub mod jemalloc;
pub mod layout;
mod log;
mod maps;
mod mmap;
mod process;
pub mod ptmalloc;
pub mod resolve;
mod session;
mod target;
#[cfg(any(test, feature = "test"))]
mod test_helper;
mod util;


pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::IntoError;
pub use crate::error::Result;
pub use crate::maps::Pid;
pub use crate::process::Builder as ProcessBuilder;
pub use crate::process::Process;
pub use crate::session::ResolutionState;
pub use crate::target::Confirm;
pub use crate::target::Deny;
pub use crate::target::Memory;
pub use crate::target::Symbols;
pub use crate::target::Target;
pub use crate::target::ThreadId;
pub use crate::target::Threads;


/// A type representing addresses in the target process.
pub type Addr = u64;


#[cfg(feature = "test")]
#[doc(hidden)]
pub mod __private {
    pub use crate::test_helper::FakeProcess;
    pub use crate::test_helper::GlibcFixture;
    pub use crate::test_helper::JemallocFixture;
    pub use crate::test_helper::MaskedSymbols;
}
