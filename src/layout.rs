//! Typed views on raw memory.
//!
//! A [`Layout`] describes a record as a set of named fields at fixed
//! offsets. An [`Overlay`] applies a layout to a snapshot of target
//! memory and allows for field-by-field reads. Because field names of
//! allocator structures changed across releases, fields are looked up
//! by *logical* name and mapped to the literal names known for it.

use std::collections::HashMap;
use std::rc::Rc;

use crate::util::decode_uint;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Memory;
use crate::Result;


/// Literal field names known for each logical field, in order of
/// preference.
static ALIASES: &[(&str, &[&str])] = &[
    ("size", &["mchunk_size", "size"]),
    ("prev_size", &["mchunk_prev_size", "prev_size"]),
    ("e_size_esn", &["e_size_esn", "e_bsize"]),
    ("e_bits", &["e_bits", "bits"]),
    ("child", &["child", "repr"]),
    ("le_bits", &["le_bits", "repr"]),
];

/// Retrieve the literal names a logical field may be present under.
fn literal_names(logical: &str) -> &[&str] {
    ALIASES
        .iter()
        .find_map(|(name, literals)| (*name == logical).then_some(*literals))
        .unwrap_or(&[])
}


/// A single field of a [`Layout`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Field {
    /// The literal name of the field.
    pub name: String,
    /// The offset of the field from the start of the record.
    pub offset: usize,
    /// The width of a single element, in bytes.
    pub width: usize,
    /// The number of elements; `1` for scalars.
    pub count: usize,
}

impl Field {
    /// Create a scalar field.
    pub fn new(name: impl Into<String>, offset: usize, width: usize) -> Self {
        Self::array(name, offset, width, 1)
    }

    /// Create an array field of `count` elements `width` bytes each.
    pub fn array(name: impl Into<String>, offset: usize, width: usize, count: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            width,
            count,
        }
    }

    /// The total number of bytes covered by the field.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.count
    }

    /// Check whether the field covers no bytes at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


/// A description of a record in target memory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    name: String,
    size: usize,
    fields: Vec<Field>,
}

impl Layout {
    /// Create a layout named `name` of `size` bytes, without fields.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            fields: Vec::new(),
        }
    }

    /// Add a field to the layout.
    pub fn with_field(mut self, field: Field) -> Self {
        let () = self.fields.push(field);
        self
    }

    /// The layout's name, e.g., `malloc_state`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared size of the record, in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// All fields, in declaration order.
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by its literal name.
    pub fn literal_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Look up a field by its logical name, consulting the alias table.
    pub fn field(&self, logical: &str) -> Option<&Field> {
        literal_names(logical)
            .iter()
            .find_map(|literal| self.literal_field(literal))
            .or_else(|| self.literal_field(logical))
    }
}


/// A provider of record layouts, typically backed by debug
/// information.
pub trait LayoutSource {
    /// Look up the layout of the record called `name`.
    ///
    /// Names are given without a `struct` prefix (e.g.,
    /// `malloc_state`).
    fn lookup_layout(&self, name: &str) -> Option<Layout>;
}


/// A [`LayoutSource`] backed by an in-memory table.
#[derive(Clone, Debug, Default)]
pub struct LayoutTable {
    layouts: HashMap<String, Layout>,
}

impl LayoutTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `layout` under its own name, replacing any previous
    /// layout of the same name.
    pub fn insert(&mut self, layout: Layout) {
        let _prev = self.layouts.insert(layout.name().to_string(), layout);
    }
}

impl LayoutSource for LayoutTable {
    fn lookup_layout(&self, name: &str) -> Option<Layout> {
        self.layouts.get(name).cloned()
    }
}

impl FromIterator<Layout> for LayoutTable {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Layout>,
    {
        let mut table = Self::new();
        let () = iter.into_iter().for_each(|layout| table.insert(layout));
        table
    }
}


/// A typed view on a snapshot of target memory.
///
/// The snapshot is taken at construction time; later changes to the
/// target's memory are not reflected.
#[derive(Clone, Debug)]
pub struct Overlay {
    addr: Addr,
    layout: Rc<Layout>,
    data: Vec<u8>,
}

impl Overlay {
    fn check_size(layout: &Layout, expected: Option<usize>) -> Result<()> {
        match expected {
            Some(expected) if expected != layout.size() => Err(Error::layout_mismatch(format!(
                "layout `{}` declares {:#x} bytes but {expected:#x} bytes are expected",
                layout.name(),
                layout.size()
            ))),
            _ => Ok(()),
        }
    }

    /// Overlay `layout` on the memory at `addr`.
    ///
    /// If `expected` is provided, the layout's declared size has to
    /// match it, or a [`ErrorKind::LayoutMismatch`][crate::ErrorKind::LayoutMismatch]
    /// error is reported.
    pub fn new<M>(memory: &M, addr: Addr, layout: Rc<Layout>, expected: Option<usize>) -> Result<Self>
    where
        M: Memory + ?Sized,
    {
        let () = Self::check_size(&layout, expected)?;
        let data = memory
            .read_bytes(addr, layout.size())
            .with_context(|| format!("failed to read `{}` at {addr:#x}", layout.name()))?;
        Ok(Self { addr, layout, data })
    }

    /// Overlay `layout` on already retrieved `data` that resides at
    /// `addr` in the target.
    pub fn from_bytes(addr: Addr, layout: Rc<Layout>, data: &[u8]) -> Result<Self> {
        let data = data
            .get(..layout.size())
            .ok_or_unexpected_eof(|| {
                format!(
                    "{:#x} bytes are insufficient for `{}` ({:#x} bytes)",
                    data.len(),
                    layout.name(),
                    layout.size()
                )
            })?
            .to_vec();
        Ok(Self { addr, layout, data })
    }

    /// The address the overlay was applied at.
    #[inline]
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// The underlying layout.
    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The raw snapshot.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Check whether the layout has a field with the given logical name.
    pub fn has_field(&self, logical: &str) -> bool {
        self.layout.field(logical).is_some()
    }

    /// Look up a field by its logical name.
    pub fn field(&self, logical: &str) -> Result<&Field> {
        self.layout.field(logical).ok_or_else(|| {
            Error::layout_mismatch(format!(
                "layout `{}` has no field `{logical}`",
                self.layout.name()
            ))
        })
    }

    /// The target address of the field `logical`.
    pub fn field_addr(&self, logical: &str) -> Result<Addr> {
        self.element_addr(logical, 0)
    }

    /// The target address of element `idx` of the array field `logical`.
    pub fn element_addr(&self, logical: &str, idx: usize) -> Result<Addr> {
        let field = self.field(logical)?;
        if idx >= field.count {
            return Err(Error::with_invalid_input(format!(
                "index {idx} is out of bounds for `{}.{}` ({} elements)",
                self.layout.name(),
                field.name,
                field.count
            )))
        }
        Ok(self.addr + (field.offset + idx * field.width) as Addr)
    }

    /// Read the value of the scalar field `logical`.
    pub fn read(&self, logical: &str) -> Result<u64> {
        self.read_element(logical, 0)
    }

    /// Read element `idx` of the array field `logical`.
    pub fn read_element(&self, logical: &str, idx: usize) -> Result<u64> {
        let addr = self.element_addr(logical, idx)?;
        let field = self.field(logical)?;
        let start = (addr - self.addr) as usize;
        self.data
            .get(start..start + field.width)
            .and_then(decode_uint)
            .ok_or_else(|| {
                Error::layout_mismatch(format!(
                    "field `{}.{}` at offset {:#x} ({} bytes) lies outside of the record",
                    self.layout.name(),
                    field.name,
                    start,
                    field.width
                ))
            })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::ErrorKind;


    fn chunk_layout(size_name: &str) -> Rc<Layout> {
        let layout = Layout::new("malloc_chunk", 0x30)
            .with_field(Field::new("mchunk_prev_size", 0, 8))
            .with_field(Field::new(size_name, 8, 8))
            .with_field(Field::new("fd", 0x10, 8))
            .with_field(Field::new("bk", 0x18, 8))
            .with_field(Field::new("fd_nextsize", 0x20, 8))
            .with_field(Field::new("bk_nextsize", 0x28, 8));
        Rc::new(layout)
    }

    fn chunk_bytes() -> Vec<u8> {
        let mut data = vec![0; 0x30];
        let () = data[8..16].copy_from_slice(&0x31u64.to_le_bytes());
        let () = data[16..24].copy_from_slice(&0xdeadbeefu64.to_le_bytes());
        data
    }


    /// Check that the logical `size` field is found under either of its
    /// literal names.
    #[test]
    fn size_alias_lookup() {
        for name in ["mchunk_size", "size"] {
            let overlay = Overlay::from_bytes(0x1000, chunk_layout(name), &chunk_bytes()).unwrap();
            assert_eq!(overlay.read("size").unwrap(), 0x31);
            assert_eq!(overlay.field("size").unwrap().name, name);
            assert_eq!(overlay.read("prev_size").unwrap(), 0);
            assert_eq!(overlay.read("fd").unwrap(), 0xdeadbeef);
        }
    }

    /// Make sure that a missing field is reported as a layout mismatch.
    #[test]
    fn missing_field() {
        let overlay = Overlay::from_bytes(0x1000, chunk_layout("size"), &chunk_bytes()).unwrap();
        let err = overlay.read("e_size_esn").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);
        assert!(!overlay.has_field("tcache_bins"));
    }

    /// Check that a declared size differing from the expected one is
    /// rejected.
    #[test]
    fn size_mismatch() {
        struct Zeroes;

        impl Memory for Zeroes {
            fn ptr_size(&self) -> usize {
                8
            }

            fn read_bytes(&self, _addr: Addr, len: usize) -> Result<Vec<u8>> {
                Ok(vec![0; len])
            }
        }

        let layout = chunk_layout("size");
        let err = Overlay::new(&Zeroes, 0x1000, layout.clone(), Some(0x18)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);

        let overlay = Overlay::new(&Zeroes, 0x1000, layout, Some(0x30)).unwrap();
        assert_eq!(overlay.bytes().len(), 0x30);
    }

    /// Test element access of array fields.
    #[test]
    fn array_elements() {
        let layout = Rc::new(
            Layout::new("tcache_perthread_struct", 0x10)
                .with_field(Field::array("counts", 0, 2, 4))
                .with_field(Field::array("entries", 8, 8, 1)),
        );
        let data = [1, 0, 2, 0, 3, 0, 4, 0, 0x10, 0, 0, 0, 0, 0, 0, 0];
        let overlay = Overlay::from_bytes(0x2000, layout, &data).unwrap();
        assert_eq!(overlay.read_element("counts", 3).unwrap(), 4);
        assert_eq!(overlay.element_addr("counts", 2).unwrap(), 0x2004);
        assert_eq!(overlay.read_element("entries", 0).unwrap(), 0x10);

        let err = overlay.read_element("counts", 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    /// Check that a `LayoutTable` hands out what was inserted.
    #[test]
    fn layout_table() {
        let table = [Layout::new("heap_info", 0x20), Layout::new("malloc_par", 0x70)]
            .into_iter()
            .collect::<LayoutTable>();
        assert_eq!(table.lookup_layout("malloc_par").unwrap().size(), 0x70);
        assert_eq!(table.lookup_layout("malloc_state"), None);
    }

    /// A snapshot too small for the layout is rejected.
    #[test]
    fn short_snapshot() {
        let err = Overlay::from_bytes(0x1000, chunk_layout("size"), &[0; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
