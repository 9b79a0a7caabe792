use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::rc::Rc;

use super::arena::Arena;
use super::arena::HeapInfo;
use super::arena::MallocPar;
use super::arena::ThreadCache;
use super::bins;
use super::chunk::BinKind;
use super::chunk::BinQuery;
use super::chunk::Chunk;
use super::chunk::ChunkOpts;
use super::chunk::Classification;
use super::chunk::DecodedChunk;
use super::chunk::RenderMode;
use super::heuristic;
use super::layouts::glibc_layout;
use super::render;
use super::tcache;
use super::Geometry;
use super::GlibcVersion;
use crate::layout::Layout;
use crate::layout::LayoutSource;
use crate::layout::Overlay;
use crate::log::debug;
use crate::log::warn;
use crate::resolve::Request;
use crate::resolve::Resolver;
use crate::session::ResolutionState;
use crate::session::Slot;
use crate::session::ThreadSlots;
use crate::util::align_down;
use crate::Addr;
use crate::Confirm;
use crate::Deny;
use crate::Error;
use crate::ErrorExt as _;
use crate::ErrorKind;
use crate::IntoError as _;
use crate::Result;
use crate::Target;
use crate::ThreadId;


/// The maximum number of arenas we follow along the arena ring.
const MAX_ARENAS: usize = 64;
/// The maximum number of bytes dumped for a single chunk.
const MAX_DUMP_LEN: u64 = 64 << 20;


/// Where structure layouts are taken from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LayoutPolicy {
    /// Consult the configured [`LayoutSource`] and fall back to the
    /// built-in tables.
    #[default]
    Auto,
    /// Use the built-in tables only.
    Builtin,
    /// Use the configured [`LayoutSource`] only.
    DebugInfo,
}


/// Configuration of a [`Heap`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The glibc release of the target. Detected from the allocator
    /// object if not set, with 2.35 assumed if detection fails.
    pub glibc_version: Option<GlibcVersion>,
    /// Where structure layouts are taken from.
    pub layout_policy: LayoutPolicy,
    /// Whether to use heuristics (and brute force scans) when symbol
    /// lookup fails.
    pub heuristics: bool,
    /// The prefix of the file name of the object containing the
    /// allocator.
    pub allocator_object: String,
    /// The maximum number of elements to follow when walking a free
    /// list.
    pub max_list_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            glibc_version: None,
            layout_policy: LayoutPolicy::default(),
            heuristics: true,
            allocator_object: "libc".to_string(),
            max_list_len: 1024,
        }
    }
}


/// A builder for configurable construction of [`Heap`] objects.
///
/// By default the glibc release is detected, layouts are looked up in
/// the layout source (if any) before falling back to the built-in
/// ones, heuristics are enabled, and brute force scans are declined.
#[derive(Default)]
pub struct Builder<'t> {
    config: Config,
    layouts: Option<&'t dyn LayoutSource>,
    confirm: Option<&'t dyn Confirm>,
}

impl<'t> Builder<'t> {
    /// Set the glibc release of the target, disabling detection.
    pub fn set_glibc_version(mut self, version: Option<GlibcVersion>) -> Self {
        self.config.glibc_version = version;
        self
    }

    /// Set where structure layouts are taken from.
    pub fn set_layout_policy(mut self, policy: LayoutPolicy) -> Self {
        self.config.layout_policy = policy;
        self
    }

    /// Set the source of structure layouts, typically backed by debug
    /// information.
    pub fn set_layout_source(mut self, layouts: &'t dyn LayoutSource) -> Self {
        self.layouts = Some(layouts);
        self
    }

    /// Set the prompt asked before brute force scans.
    pub fn set_confirm(mut self, confirm: &'t dyn Confirm) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Enable/disable heuristics and brute force scans.
    pub fn enable_heuristics(mut self, enable: bool) -> Self {
        self.config.heuristics = enable;
        self
    }

    /// Set the file name prefix of the object containing the allocator.
    pub fn set_allocator_object(mut self, object: impl Into<String>) -> Self {
        self.config.allocator_object = object.into();
        self
    }

    /// Set the maximum number of elements followed in a free list.
    pub fn set_max_list_len(mut self, len: usize) -> Self {
        self.config.max_list_len = len;
        self
    }

    /// Create the [`Heap`] object for `target`.
    pub fn build(self, target: &'t dyn Target) -> Heap<'t> {
        let Builder {
            config,
            layouts,
            confirm,
        } = self;

        Heap {
            target,
            layouts,
            confirm: confirm.unwrap_or(&Deny),
            config,
            session: Session::new(),
        }
    }
}

impl Debug for Builder<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .finish()
    }
}


/// The lazily resolved fields of a [`Heap`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeapField {
    /// The address of `main_arena`.
    MainArena,
    /// The address of `mp_`.
    Mp,
    /// The address of `global_max_fast`.
    GlobalMaxFast,
    /// The arena used by a thread.
    ThreadArena(ThreadId),
    /// The cache of a thread.
    ThreadCache(ThreadId),
}


/// State memoized for one resolution session.
struct Session {
    /// The detected glibc release; `None` if detection failed.
    version: Slot<Option<GlibcVersion>>,
    layouts: RefCell<HashMap<String, Rc<Layout>>>,
    main_arena: Slot<Addr>,
    mp: Slot<Addr>,
    global_max_fast: Slot<Addr>,
    thread_arena: ThreadSlots<Addr>,
    thread_cache: ThreadSlots<Addr>,
}

impl Session {
    fn new() -> Self {
        Self {
            version: Slot::new("glibc version"),
            layouts: RefCell::new(HashMap::new()),
            main_arena: Slot::new("main_arena"),
            mp: Slot::new("mp_"),
            global_max_fast: Slot::new("global_max_fast"),
            thread_arena: ThreadSlots::new("thread_arena"),
            thread_cache: ThreadSlots::new("tcache"),
        }
    }

    fn reset(&self) {
        let () = self.version.reset();
        let () = self.layouts.borrow_mut().clear();
        let () = self.main_arena.reset();
        let () = self.mp.reset();
        let () = self.global_max_fast.reset();
        let () = self.thread_arena.reset();
        let () = self.thread_cache.reset();
    }
}


/// A model of the glibc heap of a target.
///
/// All control structures are located lazily and their addresses are
/// memoized until [`Heap::reset`] is called, which should happen
/// whenever the target ran and may have changed its allocator state.
/// The structures themselves are read afresh on every access.
///
/// None of the operations change the target's selected thread.
pub struct Heap<'t> {
    target: &'t dyn Target,
    layouts: Option<&'t dyn LayoutSource>,
    confirm: &'t dyn Confirm,
    config: Config,
    session: Session,
}

impl<'t> Heap<'t> {
    /// Create a new [`Heap`] for `target` with the default
    /// configuration.
    pub fn new(target: &'t dyn Target) -> Self {
        Builder::default().build(target)
    }

    /// Retrieve a [`Builder`] object for configurable construction of
    /// a [`Heap`].
    pub fn builder() -> Builder<'t> {
        Builder::default()
    }

    /// The heap's configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub(crate) fn target(&self) -> &'t dyn Target {
        self.target
    }

    fn resolver(&self) -> Resolver<'t> {
        Resolver::new(self.target, self.confirm, self.config.heuristics)
    }

    /// Invalidate all memoized state.
    pub fn reset(&self) {
        debug!("resetting heap resolution session");
        self.session.reset()
    }

    /// Report the resolution state of `field`.
    pub fn state(&self, field: HeapField) -> ResolutionState {
        match field {
            HeapField::MainArena => self.session.main_arena.state(),
            HeapField::Mp => self.session.mp.state(),
            HeapField::GlobalMaxFast => self.session.global_max_fast.state(),
            HeapField::ThreadArena(thread) => self.session.thread_arena.state(thread),
            HeapField::ThreadCache(thread) => self.session.thread_cache.state(thread),
        }
    }

    fn detected_version(&self) -> Option<GlibcVersion> {
        let object = &self.config.allocator_object;
        self.session
            .version
            .get_or_try_resolve(|| match GlibcVersion::detect(self.target, object) {
                Ok(version) => Ok(Some(version)),
                Err(err) => {
                    warn!("failed to detect glibc version: {err:#}");
                    Ok(None)
                }
            })
            .ok()
            .flatten()
    }

    /// The glibc release assumed for the target.
    pub fn glibc_version(&self) -> GlibcVersion {
        self.config
            .glibc_version
            .or_else(|| self.detected_version())
            .unwrap_or_default()
    }

    /// Whether the release is known rather than assumed.
    fn version_known(&self) -> bool {
        self.config.glibc_version.is_some() || self.detected_version().is_some()
    }

    pub(crate) fn geometry(&self) -> Geometry {
        Geometry::new(self.target.ptr_size(), self.glibc_version())
    }

    /// Whether the allocator has a per-thread cache.
    #[inline]
    pub fn has_tcache(&self) -> bool {
        self.geometry().has_tcache()
    }

    /// Retrieve the layout of the structure `name`, according to the
    /// configured [`LayoutPolicy`].
    pub fn layout(&self, name: &str) -> Result<Rc<Layout>> {
        if let Some(layout) = self.session.layouts.borrow().get(name) {
            return Ok(Rc::clone(layout))
        }

        let builtin = || glibc_layout(name, self.target.ptr_size(), self.glibc_version());
        let source = || self.layouts.and_then(|layouts| layouts.lookup_layout(name));
        let layout = match self.config.layout_policy {
            LayoutPolicy::Auto => source().or_else(builtin),
            LayoutPolicy::Builtin => builtin(),
            LayoutPolicy::DebugInfo => source(),
        }
        .ok_or_else(|| Error::with_not_found(format!("no layout for `{name}` available")))?;

        let layout = Rc::new(layout);
        let _prev = self
            .session
            .layouts
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&layout));
        Ok(layout)
    }

    /// The size a structure is expected to have on the target, if
    /// known independently of the layout used.
    fn expected_size(&self, name: &str) -> Option<usize> {
        let ptr_size = self.target.ptr_size();
        if name == "malloc_chunk" {
            return Some(6 * ptr_size)
        }
        if !self.version_known() {
            return None
        }
        glibc_layout(name, ptr_size, self.glibc_version()).map(|layout| layout.size())
    }

    /// Overlay the layout of `name` on the memory at `addr`.
    pub(crate) fn overlay(&self, name: &str, addr: Addr) -> Result<Overlay> {
        let layout = self.layout(name)?;
        Overlay::new(self.target, addr, layout, self.expected_size(name))
    }

    /// Read an arena at `addr`.
    pub fn arena(&self, addr: Addr) -> Result<Arena> {
        let overlay = self.overlay("malloc_state", addr)?;
        Ok(Arena::new(overlay, self.target.ptr_size() as u64))
    }

    /// The address of `main_arena`.
    pub fn main_arena_addr(&self) -> Result<Addr> {
        self.session.main_arena.get_or_try_resolve(|| {
            let request = Request::new("main_arena", self.target.selected_thread())
                .heuristic(|| heuristic::find_main_arena(self));
            let resolved = self.resolver().resolve(request)?;
            Ok(resolved.addr)
        })
    }

    /// The main arena.
    pub fn main_arena(&self) -> Result<Arena> {
        let addr = self.main_arena_addr()?;
        self.arena(addr)
    }

    /// The address of `mp_`.
    pub fn mp_addr(&self) -> Result<Addr> {
        self.session.mp.get_or_try_resolve(|| {
            let request = Request::new("mp_", self.target.selected_thread())
                .heuristic(|| heuristic::find_mp(self));
            let resolved = self.resolver().resolve(request)?;
            Ok(resolved.addr)
        })
    }

    /// The allocator's parameters, `mp_`.
    pub fn mp(&self) -> Result<MallocPar> {
        let addr = self.mp_addr()?;
        let overlay = self.overlay("malloc_par", addr)?;
        Ok(MallocPar::new(overlay))
    }

    /// The address of `global_max_fast`.
    pub fn global_max_fast_addr(&self) -> Result<Addr> {
        self.session.global_max_fast.get_or_try_resolve(|| {
            let request = Request::new("global_max_fast", self.target.selected_thread());
            let resolved = self.resolver().resolve(request)?;
            Ok(resolved.addr)
        })
    }

    /// The current value of `global_max_fast`, the largest chunk size
    /// kept in fast bins.
    ///
    /// If the variable cannot be located, the allocator's compile time
    /// default is reported.
    pub fn global_max_fast(&self) -> Result<u64> {
        match self.global_max_fast_addr() {
            Ok(addr) => self.target.read_pointer(addr),
            Err(err) if err.kind() == ErrorKind::SymbolUnresolvable => {
                let default = self.geometry().default_global_max_fast();
                warn!("{err}; assuming default of {default:#x}");
                Ok(default)
            }
            Err(err) => Err(err),
        }
    }

    /// The arena used by the selected thread.
    pub fn thread_arena(&self) -> Result<Arena> {
        self.thread_arena_for(self.target.selected_thread())
    }

    /// Locate the arena of `thread`, falling back to a search of its
    /// thread-local storage only if `brute_force` is set.
    pub(super) fn thread_arena_addr(&self, thread: ThreadId, brute_force: bool) -> Result<Addr> {
        let slot = self.session.thread_arena.get(thread);
        slot.get_or_try_resolve(|| {
            let mut request = Request::new("thread_arena", thread)
                .deref(true)
                .heuristic(|| heuristic::single_thread_arena(self));
            if brute_force {
                let prompt = format!(
                    "Failed to locate `thread_arena` of thread {thread}. \
                     Search its thread-local storage for it (may be slow)?"
                );
                request =
                    request.brute_force(prompt, || heuristic::scan_thread_arena(self, thread));
            }
            let resolved = self.resolver().resolve(request)?;
            Ok(resolved.addr)
        })
    }

    /// The address of the arena used by `thread`.
    pub fn thread_arena_addr_for(&self, thread: ThreadId) -> Result<Addr> {
        self.thread_arena_addr(thread, true)
    }

    /// The arena used by `thread`.
    pub fn thread_arena_for(&self, thread: ThreadId) -> Result<Arena> {
        let addr = self.thread_arena_addr_for(thread)?;
        self.arena(addr)
    }

    fn thread_cache_addr(&self, thread: ThreadId, brute_force: bool) -> Result<Addr> {
        if !self.has_tcache() {
            return Err(Error::symbol_unresolvable("tcache")
                .context("the allocator does not use a thread cache"))
        }

        let slot = self.session.thread_cache.get(thread);
        slot.get_or_try_resolve(|| {
            let mut request = Request::new("tcache", thread)
                .deref(true)
                .heuristic(|| tcache::from_first_chunk(self, thread, brute_force));
            if brute_force {
                let prompt = format!(
                    "Failed to locate the `tcache` of thread {thread}. \
                     Search its thread-local storage for it (may be slow)?"
                );
                request = request.brute_force(prompt, || tcache::scan(self, thread));
            }
            let resolved = self.resolver().resolve(request)?;
            Ok(resolved.addr)
        })
    }

    /// The address of the cache of `thread`.
    pub fn thread_cache_addr_for(&self, thread: ThreadId) -> Result<Addr> {
        self.thread_cache_addr(thread, true)
    }

    /// Read a thread cache at `addr`.
    pub(crate) fn thread_cache_at(&self, addr: Addr) -> Result<ThreadCache> {
        let overlay = self.overlay("tcache_perthread_struct", addr)?;
        Ok(ThreadCache::new(overlay))
    }

    /// The cache of the selected thread.
    pub fn thread_cache(&self) -> Result<ThreadCache> {
        self.thread_cache_for(self.target.selected_thread())
    }

    /// The cache of `thread`.
    pub fn thread_cache_for(&self, thread: ThreadId) -> Result<ThreadCache> {
        let addr = self.thread_cache_addr_for(thread)?;
        self.thread_cache_at(addr)
    }

    /// All arenas, starting with the main arena and following the ring
    /// of arenas.
    pub fn arenas(&self) -> Result<Vec<Arena>> {
        let main_arena = self.main_arena()?;
        let main_addr = main_arena.addr();
        let mut next = main_arena.next()?;
        let mut arenas = vec![main_arena];

        while next != main_addr {
            if arenas.len() >= MAX_ARENAS {
                return Err(Error::with_invalid_data(format!(
                    "arena ring starting at {main_addr:#x} does not close within {MAX_ARENAS} arenas"
                )))
            }
            let arena = self.arena(next)?;
            next = arena.next()?;
            let () = arenas.push(arena);
        }
        Ok(arenas)
    }

    /// The `heap_info` header of the non-main heap containing `addr`.
    pub fn heap_info_for(&self, addr: Addr) -> Result<HeapInfo> {
        let heap = align_down(addr, self.geometry().heap_max_size());
        let overlay = self.overlay("heap_info", heap)?;
        Ok(HeapInfo::new(overlay))
    }

    /// Read the chunk at `addr`.
    pub fn chunk(&self, addr: Addr) -> Result<Chunk> {
        let overlay = self
            .overlay("malloc_chunk", addr)
            .with_context(|| format!("failed to read chunk at {addr:#x}"))?;
        Chunk::from_overlay(&overlay)
    }

    /// The arena owning `chunk`.
    pub fn arena_for_chunk(&self, chunk: &Chunk) -> Result<Arena> {
        if chunk.non_main_arena() {
            let ar_ptr = self.heap_info_for(chunk.addr)?.ar_ptr()?;
            self.arena(ar_ptr)
        } else {
            self.main_arena()
        }
    }

    /// The threads to consult for tcache membership, the selected one
    /// first.
    fn threads_by_preference(&self) -> Vec<ThreadId> {
        let selected = self.target.selected_thread();
        let mut threads = self.target.threads();
        let () = threads.retain(|thread| *thread != selected);
        let () = threads.insert(0, selected);
        threads
    }

    fn in_tcache(&self, chunk: &Chunk) -> Result<bool> {
        let geometry = self.geometry();
        if !geometry.has_tcache() {
            return Ok(false)
        }
        let Some(idx) = bins::tcache_index(&geometry, chunk.real_size()) else {
            return Ok(false)
        };
        let selected = self.target.selected_thread();
        let needle = geometry.chunk2mem(chunk.addr);

        for thread in self.threads_by_preference() {
            let cache = match self
                .thread_cache_addr(thread, thread == selected)
                .and_then(|addr| self.thread_cache_at(addr))
            {
                Ok(cache) => cache,
                Err(err) => {
                    debug!("skipping tcache of thread {thread}: {err:#}");
                    continue
                }
            };
            if idx >= cache.bin_count()? {
                return Ok(false)
            }

            let head = cache.entry(idx)?;
            let search = bins::search_single(
                self.target,
                &geometry,
                head,
                0,
                needle,
                self.config.max_list_len,
            );
            if search.found() {
                return Ok(true)
            }
        }
        Ok(false)
    }

    fn in_fastbin(&self, arena: &Arena, chunk: &Chunk) -> Result<bool> {
        let geometry = self.geometry();
        let size = chunk.real_size();
        if size > self.global_max_fast()? {
            return Ok(false)
        }
        let Some(idx) = bins::fastbin_index(&geometry, size) else {
            return Ok(false)
        };
        if idx >= arena.fastbin_count()? {
            return Ok(false)
        }

        let search = bins::search_single(
            self.target,
            &geometry,
            arena.fastbin(idx)?,
            2 * geometry.size_sz,
            chunk.addr,
            self.config.max_list_len,
        );
        Ok(search.found())
    }

    fn in_bin(&self, arena: &Arena, idx: usize, chunk: &Chunk) -> Result<bool> {
        if idx == 0 || idx >= arena.bin_count()? {
            return Ok(false)
        }
        let search = bins::search_double(
            self.target,
            &self.geometry(),
            arena.bin_at(idx)?,
            chunk.addr,
            self.config.max_list_len,
        );
        Ok(search.found())
    }

    fn classify(&self, chunk: &Chunk) -> Result<Classification> {
        if chunk.is_mmapped() {
            return Ok(Classification::Allocated)
        }

        let arena = self.arena_for_chunk(chunk)?;
        if arena.top()? == chunk.addr {
            return Ok(Classification::Top)
        }
        if self.in_tcache(chunk)? {
            return Ok(Classification::Free(BinKind::Tcache))
        }
        if self.in_fastbin(&arena, chunk)? {
            return Ok(Classification::Free(BinKind::Fast))
        }
        if self.in_bin(&arena, 1, chunk)? {
            return Ok(Classification::Free(BinKind::Unsorted))
        }

        let geometry = self.geometry();
        let size = chunk.real_size();
        let class = if bins::in_smallbin_range(&geometry, size) {
            let idx = bins::smallbin_index(&geometry, size);
            self.in_bin(&arena, idx, chunk)?
                .then_some(Classification::Free(BinKind::Small))
        } else {
            let idx = bins::largebin_index(&geometry, size);
            self.in_bin(&arena, idx, chunk)?
                .then_some(Classification::Free(BinKind::Large))
        };
        Ok(class.unwrap_or(Classification::Allocated))
    }

    /// Decode the chunk at `addr` and determine its classification.
    pub fn decode_chunk(&self, addr: Addr, query: BinQuery) -> Result<DecodedChunk> {
        let chunk = self.chunk(addr)?;
        let class = match query {
            BinQuery::Explicit(kind) => Classification::Free(kind),
            BinQuery::Infer => self.classify(&chunk)?,
        };
        Ok(DecodedChunk { chunk, class })
    }

    /// Render a decoded chunk.
    pub fn render_chunk(&self, decoded: &DecodedChunk, mode: RenderMode) -> Result<String> {
        let mut out = render::summary(decoded, self.has_tcache());
        if mode == RenderMode::Dump {
            let addr = decoded.chunk.addr;
            let len = decoded
                .chunk
                .real_size()
                .checked_add(self.target.ptr_size() as u64)
                .filter(|len| *len <= MAX_DUMP_LEN && addr.checked_add(*len).is_some())
                .ok_or_invalid_data(|| {
                    format!(
                        "chunk at {addr:#x} has implausible size {:#x}",
                        decoded.chunk.size
                    )
                })?;
            let data = self
                .target
                .read_bytes(decoded.chunk.addr, len as usize)
                .context("failed to read chunk contents")?;
            let () = out.push_str(&render::dump(decoded.chunk.addr, &data));
        }
        Ok(out)
    }

    /// Decode, classify, and render the chunk at `addr`.
    pub fn malloc_chunk(&self, addr: Addr, opts: &ChunkOpts) -> Result<String> {
        let decoded = self.decode_chunk(addr, opts.bin)?;
        self.render_chunk(&decoded, opts.mode)
    }
}

impl Debug for Heap<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::layout::Field;
    use crate::layout::LayoutTable;
    use crate::test_helper::GlibcFixture;
    use crate::Threads as _;


    /// Check the defaults of the builder.
    #[test]
    fn builder_defaults() {
        let fixture = GlibcFixture::new();
        let heap = Heap::new(&fixture.process);
        assert_eq!(heap.config(), &Config::default());
        assert!(format!("{heap:?}").contains("Heap"));

        let heap = Heap::builder()
            .enable_heuristics(false)
            .set_max_list_len(8)
            .set_allocator_object("libc.so")
            .build(&fixture.process);
        assert!(!heap.config().heuristics);
        assert_eq!(heap.config().max_list_len, 8);
        assert_eq!(heap.config().allocator_object, "libc.so");
    }

    /// Make sure that the glibc release is detected from the banner.
    #[test]
    fn version_detection() {
        let fixture = GlibcFixture::new();
        let heap = Heap::new(&fixture.process);
        assert_eq!(heap.glibc_version(), GlibcVersion::new(2, 35));
        assert!(heap.has_tcache());

        let heap = Heap::builder()
            .set_glibc_version(Some(GlibcVersion::new(2, 24)))
            .build(&fixture.process);
        assert!(!heap.has_tcache());
    }

    /// Check that layouts are taken from where the policy says.
    #[test]
    fn layout_policy() {
        let fixture = GlibcFixture::new();
        let table = [Layout::new("heap_info", 0x30).with_field(Field::new("ar_ptr", 0, 8))]
            .into_iter()
            .collect::<LayoutTable>();

        let heap = Heap::builder()
            .set_layout_source(&table)
            .build(&fixture.process);
        assert_eq!(heap.layout("heap_info").unwrap().fields().len(), 1);
        assert_eq!(heap.layout("malloc_state").unwrap().size(), 0x898);

        let heap = Heap::builder()
            .set_layout_source(&table)
            .set_layout_policy(LayoutPolicy::Builtin)
            .build(&fixture.process);
        assert!(heap.layout("heap_info").unwrap().fields().len() > 1);

        let heap = Heap::builder()
            .set_layout_source(&table)
            .set_layout_policy(LayoutPolicy::DebugInfo)
            .build(&fixture.process);
        let err = heap.layout("malloc_state").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    /// A layout disagreeing with the release's structure size is
    /// rejected.
    #[test]
    fn layout_size_mismatch() {
        let fixture = GlibcFixture::new();
        let table = [Layout::new("malloc_state", 0x890).with_field(Field::new("top", 0x60, 8))]
            .into_iter()
            .collect::<LayoutTable>();
        let heap = Heap::builder()
            .set_layout_source(&table)
            .build(&fixture.process);
        let err = heap.main_arena().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);
    }

    /// Check that resolution states are tracked and reset.
    #[test]
    fn session_reset() {
        let fixture = GlibcFixture::new();
        let heap = Heap::new(&fixture.process);
        assert_eq!(heap.state(HeapField::MainArena), ResolutionState::Unresolved);

        let _arena = heap.main_arena().unwrap();
        let _cache = heap.thread_cache().unwrap();
        assert_eq!(heap.state(HeapField::MainArena), ResolutionState::Resolved);
        let thread = fixture.process.selected_thread();
        assert_eq!(heap.state(HeapField::ThreadCache(thread)), ResolutionState::Resolved);
        assert_eq!(heap.state(HeapField::Mp), ResolutionState::Unresolved);

        let () = heap.reset();
        assert_eq!(heap.state(HeapField::MainArena), ResolutionState::Unresolved);
        assert_eq!(heap.state(HeapField::ThreadCache(thread)), ResolutionState::Unresolved);
    }

    /// Make sure that the arena ring is enumerated.
    #[test]
    fn arena_ring() {
        let fixture = GlibcFixture::new();
        let heap = Heap::new(&fixture.process);
        let arenas = heap.arenas().unwrap();
        let addrs = arenas.iter().map(Arena::addr).collect::<Vec<_>>();
        assert_eq!(addrs, vec![GlibcFixture::MAIN_ARENA, GlibcFixture::THREAD_ARENA]);
    }
}
