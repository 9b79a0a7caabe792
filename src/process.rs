//! Access to live Linux processes through `procfs`.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::fs::File;
use std::ops::Range;
use std::os::unix::fs::FileExt as _;
use std::path::PathBuf;

use crate::elf::ElfParser;
use crate::elf::SymbolTable;
use crate::log::debug;
use crate::maps;
use crate::maps::MapsEntry;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::Memory;
use crate::Pid;
use crate::Result;
use crate::Symbols;
use crate::ThreadId;
use crate::Threads;


/// The number of bytes below a thread pointer considered to be the
/// thread's static thread-local storage.
const TLS_SCAN_LEN: u64 = 0x4000;


/// An ELF object loaded by the process.
struct LoadedObject {
    path: PathBuf,
    parser: ElfParser,
    /// The difference between run time addresses and the addresses
    /// recorded in the file.
    bias: Addr,
}

impl LoadedObject {
    fn load(path: PathBuf, first: &MapsEntry) -> Result<Self> {
        let parser = ElfParser::open(&path)?;
        let vaddr = parser
            .file_offset_to_vaddr(first.offset)?
            .ok_or_else(|| {
                Error::with_invalid_data(format!(
                    "file offset {:#x} of mapping at {:#x} is not covered by any segment",
                    first.offset, first.range.start
                ))
            })?;
        let bias = first.range.start.wrapping_sub(vaddr);
        Ok(Self { path, parser, bias })
    }

    fn file_name(&self) -> Option<&str> {
        self.path.file_name()?.to_str()
    }

    fn symbol(&self, name: &str, table: SymbolTable) -> Option<Addr> {
        match self.parser.find_symbol(name, table) {
            Ok(addr) => addr.map(|addr| addr.wrapping_add(self.bias)),
            Err(err) => {
                debug!("failed to look up `{name}` in {}: {err:#}", self.path.display());
                None
            }
        }
    }
}

impl Debug for LoadedObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LoadedObject")
            .field("path", &self.path)
            .field("bias", &format_args!("{:#x}", self.bias))
            .finish()
    }
}


/// A builder for configurable construction of [`Process`] objects.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    selected: Option<ThreadId>,
    thread_pointers: HashMap<ThreadId, Addr>,
}

impl Builder {
    /// Set the thread considered selected by the operator.
    ///
    /// By default the main thread is selected.
    pub fn set_selected_thread(mut self, thread: Option<ThreadId>) -> Self {
        self.selected = thread;
        self
    }

    /// Register the thread pointer (the `fs` base on x86-64) of
    /// `thread`, enabling scans of its thread-local storage.
    pub fn set_thread_pointer(mut self, thread: ThreadId, tp: Addr) -> Self {
        let _prev = self.thread_pointers.insert(thread, tp);
        self
    }

    /// Attach to the process identified by `pid`.
    ///
    /// The caller needs permission to read the process's memory (that
    /// is, `ptrace` access).
    pub fn open(self, pid: Pid) -> Result<Process> {
        let Builder {
            selected,
            thread_pointers,
        } = self;

        let path = format!("/proc/{pid}/mem");
        let mem = File::open(&path).with_context(|| format!("failed to open {path}"))?;
        let maps = maps::parse(pid)?;
        let threads = maps::threads(pid)?
            .into_iter()
            .map(ThreadId)
            .collect::<Vec<_>>();
        let selected = selected.unwrap_or(ThreadId(pid.resolve()));
        if !threads.contains(&selected) {
            return Err(Error::with_not_found(format!(
                "thread {selected} does not exist in process {pid}"
            )))
        }

        Ok(Process {
            pid,
            mem,
            maps,
            threads,
            selected,
            thread_pointers,
            objects: OnceCell::new(),
        })
    }
}


/// A live process on the local system, inspected through `procfs`.
///
/// Only 64 bit processes are supported. Thread-local variables are not
/// resolved through symbols; rather, a thread's thread-local storage is
/// searched when its thread pointer was provided.
pub struct Process {
    pid: Pid,
    mem: File,
    maps: Vec<MapsEntry>,
    threads: Vec<ThreadId>,
    selected: ThreadId,
    thread_pointers: HashMap<ThreadId, Addr>,
    objects: OnceCell<Vec<LoadedObject>>,
}

impl Process {
    /// Attach to the process identified by `pid` with the default
    /// configuration.
    pub fn open(pid: Pid) -> Result<Self> {
        Builder::default().open(pid)
    }

    /// Retrieve a [`Builder`] object for configurable construction of
    /// a [`Process`].
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The process's ID.
    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn load_objects(&self) -> Vec<LoadedObject> {
        let mut objects = Vec::<LoadedObject>::new();
        for entry in self.maps.iter().filter(|entry| entry.is_file_backed()) {
            // The first mapping of a file is the one at the lowest
            // address, which is what we base relocation on.
            if objects.iter().any(|object| object.path == entry.path) {
                continue
            }
            match LoadedObject::load(entry.path.clone(), entry) {
                Ok(object) => {
                    debug!("loaded {} with bias {:#x}", object.path.display(), object.bias);
                    let () = objects.push(object);
                }
                Err(err) => debug!("ignoring {}: {err:#}", entry.path.display()),
            }
        }
        objects
    }

    fn objects(&self) -> &[LoadedObject] {
        self.objects.get_or_init(|| self.load_objects())
    }

    fn find_symbol(&self, name: &str, table: SymbolTable) -> Option<Addr> {
        self.objects()
            .iter()
            .find_map(|object| object.symbol(name, table))
    }
}

impl Memory for Process {
    fn ptr_size(&self) -> usize {
        8
    }

    fn read_bytes(&self, addr: Addr, len: usize) -> Result<Vec<u8>> {
        let mut data = vec![0; len];
        let () = self
            .mem
            .read_exact_at(&mut data, addr)
            .map_err(|err| {
                debug!("failed to read {len} bytes at {addr:#x}: {err}");
                Error::memory_unreadable(addr, len)
            })?;
        Ok(data)
    }
}

impl Symbols for Process {
    fn dynamic_symbol_address(&self, name: &str, _thread: ThreadId) -> Option<Addr> {
        self.find_symbol(name, SymbolTable::Dynamic)
    }

    fn static_linkage_symbol_address(&self, name: &str, _thread: ThreadId) -> Option<Addr> {
        self.find_symbol(name, SymbolTable::Static)
    }

    fn section_range(&self, object: &str, section: &str) -> Option<Range<Addr>> {
        let object = self.objects().iter().find(|loaded| {
            loaded
                .file_name()
                .map(|name| name.starts_with(object))
                .unwrap_or(false)
        })?;
        let range = object.parser.section_range(section).ok().flatten()?;
        Some(range.start.wrapping_add(object.bias)..range.end.wrapping_add(object.bias))
    }
}

impl Threads for Process {
    fn selected_thread(&self) -> ThreadId {
        self.selected
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.threads.clone()
    }

    fn thread_local_region(&self, thread: ThreadId) -> Option<Range<Addr>> {
        let tp = *self.thread_pointers.get(&thread)?;
        Some(tp.saturating_sub(TLS_SCAN_LEN)..tp)
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("selected", &self.selected)
            .finish()
    }
}
