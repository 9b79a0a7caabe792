use std::fs::File;
use std::ops::Deref;

use memmap2::Mmap as Mapping;
use memmap2::MmapOptions;

use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// A read-only memory mapping of an entire file.
#[derive(Debug)]
pub(crate) struct Mmap {
    /// The actual memory mapping; `None` for empty files, which the
    /// kernel refuses to map.
    mapping: Option<Mapping>,
}

impl Mmap {
    /// Map the provided file into memory, in its entirety.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = libc::size_t::try_from(file.metadata()?.len())
            .map_err(Error::with_invalid_data)
            .context("file is too large to mmap")?;

        let mapping = if len == 0 {
            None
        } else {
            // SAFETY: Object files are not expected to change while
            //         mapped; if they do, we may read garbage but
            //         never access memory outside of the mapping.
            let mapping = unsafe { MmapOptions::new().len(len).map(file) }?;
            Some(mapping)
        };
        Ok(Self { mapping })
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.mapping.as_deref().unwrap_or(&[])
    }
}
