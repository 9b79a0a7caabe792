//! Extent inspection for jemalloc 5.3.0.
//!
//! jemalloc keeps track of the extents it manages in a radix tree keyed
//! by page address, the root of which is embedded in the global
//! `arena_emap_global`. Only 64 bit targets with 48 bit virtual
//! addresses and 4 KiB pages are supported.

mod extent;
mod rtree;

use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::layout::Layout;
use crate::layout::LayoutSource;
use crate::log::debug;
use crate::resolve::Request;
use crate::resolve::Resolver;
use crate::session::ResolutionState;
use crate::session::Slot;
use crate::Addr;
use crate::Deny;
use crate::Error;
use crate::ErrorExt as _;
use crate::Result;
use crate::Target;

pub use extent::Extent;
pub use extent::ExtentBits;
pub use extent::Pai;

use extent::edata_layout;
use rtree::RTree;


/// The number of significant virtual address bits.
const LG_VADDR: u32 = 48;
/// The base 2 logarithm of the page size.
const LG_PAGE: u32 = 12;
/// The offset of the radix tree root in `arena_emap_global`, unless
/// debug information says otherwise.
pub const DEFAULT_RTREE_ROOT_OFFSET: u64 = 0x78;
/// The symbol holding the global extent map.
const EMAP_SYMBOL: &str = "je_arena_emap_global";

const WARNING: &str =
    "This command was tested only for jemalloc 5.3.0 and does not support lower versions";


/// A builder for configurable construction of [`Jemalloc`] objects.
#[derive(Default)]
pub struct Builder<'t> {
    root_offset: Option<u64>,
    layouts: Option<&'t dyn LayoutSource>,
}

impl<'t> Builder<'t> {
    /// Set the offset of the radix tree root within
    /// `arena_emap_global`.
    ///
    /// If not set, the offset of `root` in the `rtree_s` layout from
    /// the layout source is used, falling back to
    /// [`DEFAULT_RTREE_ROOT_OFFSET`].
    pub fn set_rtree_root_offset(mut self, offset: Option<u64>) -> Self {
        self.root_offset = offset;
        self
    }

    /// Set the source of structure layouts.
    pub fn set_layout_source(mut self, layouts: &'t dyn LayoutSource) -> Self {
        self.layouts = Some(layouts);
        self
    }

    /// Create the [`Jemalloc`] object for `target`.
    pub fn build(self, target: &'t dyn Target) -> Jemalloc<'t> {
        let Builder {
            root_offset,
            layouts,
        } = self;

        Jemalloc {
            target,
            layouts,
            root_offset,
            rtree_root: Slot::new("rtree root"),
        }
    }
}

impl Debug for Builder<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Builder")
            .field("root_offset", &self.root_offset)
            .finish()
    }
}


/// Render the description of a single extent.
fn render_extent(out: &mut String, extent: &Extent) {
    let small = if extent.is_small_class() {
        "True"
    } else {
        "False"
    };
    let _ok = writeln!(out, "Allocated Address: {:#x}", extent.allocated_address);
    let _ok = writeln!(out, "Extent Address: {:#x}", extent.extent_address);
    let _ok = writeln!(out, "Size: {:#x}", extent.size);
    let _ok = writeln!(out, "Small class: {small}");
}

fn header(title: &str) -> String {
    format!("{title}\n{WARNING}\n\n")
}


/// A model of the jemalloc state of a target.
pub struct Jemalloc<'t> {
    target: &'t dyn Target,
    layouts: Option<&'t dyn LayoutSource>,
    root_offset: Option<u64>,
    rtree_root: Slot<Addr>,
}

impl<'t> Jemalloc<'t> {
    /// Create a new [`Jemalloc`] for `target` with the default
    /// configuration.
    pub fn new(target: &'t dyn Target) -> Self {
        Builder::default().build(target)
    }

    /// Retrieve a [`Builder`] object for configurable construction of
    /// a [`Jemalloc`].
    pub fn builder() -> Builder<'t> {
        Builder::default()
    }

    /// Invalidate all memoized state.
    pub fn reset(&self) {
        self.rtree_root.reset()
    }

    /// Report the resolution state of the radix tree root.
    pub fn state(&self) -> ResolutionState {
        self.rtree_root.state()
    }

    fn check_target(&self) -> Result<()> {
        let ptr_size = self.target.ptr_size();
        if ptr_size != 8 {
            return Err(Error::with_unsupported(format!(
                "jemalloc inspection requires a 64 bit target, not {} bit",
                ptr_size * 8
            )))
        }
        Ok(())
    }

    fn root_offset(&self) -> u64 {
        self.root_offset
            .or_else(|| {
                let layout = self.layouts?.lookup_layout("rtree_s")?;
                let root = layout.literal_field("root")?;
                Some(root.offset as u64)
            })
            .unwrap_or(DEFAULT_RTREE_ROOT_OFFSET)
    }

    /// The address of the radix tree's root node array.
    pub fn rtree_root(&self) -> Result<Addr> {
        let () = self.check_target()?;
        self.rtree_root.get_or_try_resolve(|| {
            // The extent map is located through symbols only.
            let request = Request::new(EMAP_SYMBOL, self.target.selected_thread());
            let resolved = Resolver::new(self.target, &Deny, false).resolve(request)?;
            let root = resolved.addr + self.root_offset();
            debug!("radix tree root at {root:#x} ({})", resolved.strategy);
            Ok(root)
        })
    }

    fn edata_layout(&self) -> Rc<Layout> {
        let layout = self
            .layouts
            .and_then(|layouts| layouts.lookup_layout("edata_s"))
            .unwrap_or_else(edata_layout);
        Rc::new(layout)
    }

    /// Read the extent record at `addr`.
    pub fn extent_info(&self, addr: Addr) -> Result<Extent> {
        let () = self.check_target()?;
        Extent::read(self.target, addr, self.edata_layout())
            .with_context(|| format!("failed to read extent at {addr:#x}"))
    }

    /// Find the extent containing `ptr`.
    pub fn find_extent(&self, ptr: Addr) -> Result<Extent> {
        let root = self.rtree_root()?;
        let addr = RTree::new(self.target, root)
            .lookup(ptr)?
            .ok_or_else(|| Error::with_not_found(format!("no extent found for {ptr:#x}")))?;
        self.extent_info(addr)
    }

    /// All extents known to the radix tree, in ascending address
    /// order.
    pub fn extents(&self) -> Result<Vec<Extent>> {
        let root = self.rtree_root()?;
        let layout = self.edata_layout();
        RTree::new(self.target, root)
            .extents()?
            .into_iter()
            .map(|addr| Extent::read(self.target, addr, Rc::clone(&layout)))
            .collect()
    }

    /// Render the extent containing `ptr`.
    pub fn render_find_extent(&self, ptr: Addr) -> Result<String> {
        let extent = self.find_extent(ptr)?;
        let mut out = header("Jemalloc find extent");
        let _ok = writeln!(out, "Pointer Address: {ptr:#x}");
        let _ok = writeln!(out, "Extent Address: {:#x}", extent.extent_address);
        let () = out.push('\n');
        let () = render_extent(&mut out, &extent);
        Ok(out)
    }

    /// Render the extent record at `addr`.
    pub fn render_extent_info(&self, addr: Addr) -> Result<String> {
        let extent = self.extent_info(addr)?;
        let mut out = header("Jemalloc extent info");
        let () = render_extent(&mut out, &extent);
        Ok(out)
    }

    /// Render all extents.
    pub fn render_heap(&self) -> Result<String> {
        let extents = self.extents()?;
        let mut out = header("Jemalloc heap");
        for extent in extents {
            let () = out.push('\n');
            let () = render_extent(&mut out, &extent);
        }
        Ok(out)
    }
}

impl Debug for Jemalloc<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Jemalloc")
            .field("root_offset", &self.root_offset)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::layout::Field;
    use crate::layout::LayoutTable;
    use crate::test_helper::FakeProcess;
    use crate::test_helper::JemallocFixture;
    use crate::ErrorKind;


    /// Check the rendering of a found extent.
    #[test]
    fn find_extent_rendering() {
        let fixture = JemallocFixture::new();
        let jemalloc = Jemalloc::new(&fixture.process);
        let out = jemalloc
            .render_find_extent(JemallocFixture::SMALL_ALLOC + 0x10)
            .unwrap();
        let expected = format!(
            "\
Jemalloc find extent
{WARNING}

Pointer Address: {:#x}
Extent Address: {:#x}

Allocated Address: {:#x}
Extent Address: {:#x}
Size: 0x1000
Small class: True
",
            JemallocFixture::SMALL_ALLOC + 0x10,
            JemallocFixture::SMALL_EDATA,
            JemallocFixture::SMALL_PAGE,
            JemallocFixture::SMALL_EDATA,
        );
        assert_eq!(out, expected);
        assert_eq!(jemalloc.state(), ResolutionState::Resolved);

        let () = jemalloc.reset();
        assert_eq!(jemalloc.state(), ResolutionState::Unresolved);
    }

    /// Make sure that the reported extent contains the pointer.
    #[test]
    fn extent_contains_pointer() {
        let fixture = JemallocFixture::new();
        let jemalloc = Jemalloc::new(&fixture.process);
        for ptr in [
            JemallocFixture::SMALL_ALLOC,
            JemallocFixture::LARGE_ALLOC,
            JemallocFixture::LARGE_ALLOC + 0x1800,
        ] {
            let extent = jemalloc.find_extent(ptr).unwrap();
            assert!(extent.contains(ptr), "{extent:x?} does not contain {ptr:#x}");
        }

        let extent = jemalloc.find_extent(JemallocFixture::LARGE_ALLOC).unwrap();
        assert!(!extent.is_small_class());
        assert_eq!(extent.size, 0x4000);
        assert_eq!(extent.bits().pai, Pai::Pac);
    }

    /// Check that a pointer outside of any extent is reported as such.
    #[test]
    fn unknown_pointer() {
        let fixture = JemallocFixture::new();
        let jemalloc = Jemalloc::new(&fixture.process);
        let err = jemalloc.find_extent(0x555555559000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    /// Check the rendering of all extents.
    #[test]
    fn heap_rendering() {
        let fixture = JemallocFixture::new();
        let jemalloc = Jemalloc::new(&fixture.process);
        let out = jemalloc.render_heap().unwrap();
        assert!(out.starts_with(&format!("Jemalloc heap\n{WARNING}\n\n")));
        assert_eq!(out.matches("Allocated Address: ").count(), 2);
        assert!(out.contains("\n\nAllocated Address: "));

        let out = jemalloc
            .render_extent_info(JemallocFixture::LARGE_EDATA)
            .unwrap();
        assert!(out.starts_with("Jemalloc extent info\n"));
        assert!(out.ends_with("Size: 0x4000\nSmall class: False\n"));
    }

    /// Check that the root offset is taken from layouts, if available,
    /// and that an explicit offset takes precedence.
    #[test]
    fn root_offset_selection() {
        let fixture = JemallocFixture::new();
        let table = [Layout::new("rtree_s", 0x80).with_field(Field::new("root", 0x70, 8))]
            .into_iter()
            .collect::<LayoutTable>();

        let jemalloc = Jemalloc::builder()
            .set_layout_source(&table)
            .build(&fixture.process);
        assert_eq!(jemalloc.root_offset(), 0x70);

        let jemalloc = Jemalloc::builder()
            .set_layout_source(&table)
            .set_rtree_root_offset(Some(0x78))
            .build(&fixture.process);
        assert_eq!(jemalloc.root_offset(), 0x78);
        assert_eq!(
            jemalloc.rtree_root().unwrap(),
            JemallocFixture::EMAP + DEFAULT_RTREE_ROOT_OFFSET
        );
    }

    /// Make sure that 32 bit targets and missing symbols are reported.
    #[test]
    fn unsupported_targets() {
        let process = FakeProcess::new(4);
        let err = Jemalloc::new(&process).find_extent(0x1000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let process = FakeProcess::new(8);
        let err = Jemalloc::new(&process).extents().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolUnresolvable);
    }
}
