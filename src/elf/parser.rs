use std::cell::OnceCell;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::fs::File;
use std::mem;
use std::ops::Deref as _;
use std::ops::Range;
use std::path::Path;

use crate::mmap::Mmap;
use crate::util::get_or_try_init;
use crate::util::ReadRaw as _;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;

use super::types::Elf64_Ehdr;
use super::types::Elf64_Phdr;
use super::types::Elf64_Shdr;
use super::types::Elf64_Sym;
use super::types::ELFCLASS64;
use super::types::PN_XNUM;
use super::types::PT_LOAD;
use super::types::SHN_XINDEX;
use super::types::SHT_NOBITS;


/// The symbol tables an ELF file may carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SymbolTable {
    /// `.dynsym`, the symbols exported for dynamic linking.
    Dynamic,
    /// `.symtab`, which includes static linkage symbols but is often
    /// stripped.
    Static,
}


fn read_name<'mmap>(strtab: &'mmap [u8], idx: u32, what: &str) -> Result<&'mmap str> {
    let name = strtab
        .get(idx as usize..)
        .ok_or_invalid_input(|| "string table index out of bounds")?
        .read_cstr()
        .ok_or_invalid_input(|| "no valid string found in string table")?
        .to_str()
        .map_err(Error::with_invalid_data)
        .with_context(|| format!("invalid {what} name"))?;
    Ok(name)
}


#[derive(Clone, Copy, Debug)]
struct EhdrExt<'mmap> {
    /// The ELF header.
    ehdr: &'mmap Elf64_Ehdr,
    /// Override of `ehdr.e_shnum`, handling of which is special-cased by
    /// the ELF standard.
    shnum: usize,
    /// Override of `ehdr.e_phnum`, handling of which is special-cased by
    /// the ELF standard.
    phnum: usize,
}


/// Addressable symbols of a symbol table, ordered by name.
#[derive(Debug)]
struct SymbolCache<'mmap> {
    by_name: Box<[(&'mmap str, &'mmap Elf64_Sym)]>,
}

impl<'mmap> SymbolCache<'mmap> {
    fn find(&self, name: &str) -> Option<&'mmap Elf64_Sym> {
        let idx = self.by_name.partition_point(|(sym_name, _sym)| *sym_name < name);
        self.by_name
            .get(idx)
            .and_then(|(sym_name, sym)| (*sym_name == name).then_some(*sym))
    }
}


struct Cache<'mmap> {
    /// A slice of the raw ELF data that we are about to parse.
    elf_data: &'mmap [u8],
    /// The cached ELF header.
    ehdr: OnceCell<EhdrExt<'mmap>>,
    /// The cached ELF section headers.
    shdrs: OnceCell<&'mmap [Elf64_Shdr]>,
    shstrtab: OnceCell<&'mmap [u8]>,
    /// The cached ELF program headers.
    phdrs: OnceCell<&'mmap [Elf64_Phdr]>,
    /// The cached symbol table.
    symtab: OnceCell<SymbolCache<'mmap>>,
    /// The cached dynamic symbol table.
    dynsym: OnceCell<SymbolCache<'mmap>>,
}

impl<'mmap> Cache<'mmap> {
    /// Create a new `Cache` using the provided raw ELF object data.
    fn new(elf_data: &'mmap [u8]) -> Self {
        Self {
            elf_data,
            ehdr: OnceCell::new(),
            shdrs: OnceCell::new(),
            shstrtab: OnceCell::new(),
            phdrs: OnceCell::new(),
            symtab: OnceCell::new(),
            dynsym: OnceCell::new(),
        }
    }

    /// Retrieve the raw section data for the ELF section at index
    /// `idx`.
    ///
    /// Sections occupying no file space, such as `.bss`, have no data.
    fn section_data(&self, idx: usize) -> Result<&'mmap [u8]> {
        let section = self.section_header(idx)?;
        if section.sh_type == SHT_NOBITS {
            return Ok(&[])
        }

        let data = self
            .elf_data
            .get(section.sh_offset as usize..)
            .ok_or_invalid_data(|| "failed to read section data: invalid offset")?
            .read_slice(section.sh_size as usize)
            .ok_or_invalid_data(|| "failed to read section data: invalid size")?;
        Ok(data)
    }

    fn section_header(&self, idx: usize) -> Result<&'mmap Elf64_Shdr> {
        let shdrs = self.ensure_shdrs()?;
        shdrs
            .get(idx)
            .ok_or_invalid_input(|| format!("ELF section index ({idx}) out of bounds"))
    }

    /// Read the very first section header.
    ///
    /// ELF contains a couple of clauses that special case data ranges
    /// of certain member variables to reference data from this header,
    /// which otherwise is zeroed out.
    #[inline]
    fn read_first_shdr(&self, ehdr: &Elf64_Ehdr) -> Result<&'mmap Elf64_Shdr> {
        let shdr = self
            .elf_data
            .get(ehdr.e_shoff as usize..)
            .ok_or_invalid_data(|| "Elf64_Ehdr::e_shoff is invalid")?
            .read_pod_ref::<Elf64_Shdr>()
            .ok_or_invalid_data(|| "failed to read Elf64_Shdr")?;
        Ok(shdr)
    }

    fn parse_ehdr(&self) -> Result<EhdrExt<'mmap>> {
        let mut elf_data = self.elf_data;
        let ehdr = elf_data
            .read_pod_ref::<Elf64_Ehdr>()
            .ok_or_invalid_data(|| "failed to read Elf64_Ehdr")?;
        if !(ehdr.e_ident[0] == 0x7f
            && ehdr.e_ident[1] == b'E'
            && ehdr.e_ident[2] == b'L'
            && ehdr.e_ident[3] == b'F')
        {
            return Err(Error::with_invalid_data(format!(
                "encountered unexpected e_ident: {:x?}",
                &ehdr.e_ident[0..4]
            )))
        }
        if ehdr.e_ident[4] != ELFCLASS64 {
            return Err(Error::with_unsupported(format!(
                "ELF class {} is not supported",
                ehdr.e_ident[4]
            )))
        }

        // "If the number of entries in the section header table is larger than
        // or equal to SHN_LORESERVE, e_shnum holds the value zero and the real
        // number of entries in the section header table is held in the sh_size
        // member of the initial entry in section header table."
        let shnum = if ehdr.e_shnum == 0 {
            let shdr = self.read_first_shdr(ehdr)?;
            usize::try_from(shdr.sh_size).ok().ok_or_invalid_data(|| {
                format!(
                    "ELF file contains unsupported number of sections ({})",
                    shdr.sh_size
                )
            })?
        } else {
            ehdr.e_shnum.into()
        };

        // "If the number of entries in the program header table is
        // larger than or equal to PN_XNUM (0xffff), this member holds
        // PN_XNUM (0xffff) and the real number of entries in the
        // program header table is held in the sh_info member of the
        // initial entry in section header table."
        let phnum = if ehdr.e_phnum == PN_XNUM {
            let shdr = self.read_first_shdr(ehdr)?;
            usize::try_from(shdr.sh_info).ok().ok_or_invalid_data(|| {
                format!(
                    "ELF file contains unsupported number of program headers ({})",
                    shdr.sh_info
                )
            })?
        } else {
            ehdr.e_phnum.into()
        };

        let ehdr = EhdrExt { ehdr, shnum, phnum };
        Ok(ehdr)
    }

    fn ensure_ehdr(&self) -> Result<&EhdrExt<'mmap>> {
        get_or_try_init(&self.ehdr, || self.parse_ehdr())
    }

    fn parse_shdrs(&self) -> Result<&'mmap [Elf64_Shdr]> {
        let ehdr = self.ensure_ehdr()?;
        let shdrs = self
            .elf_data
            .get(ehdr.ehdr.e_shoff as usize..)
            .ok_or_invalid_data(|| "Elf64_Ehdr::e_shoff is invalid")?
            .read_pod_slice_ref::<Elf64_Shdr>(ehdr.shnum)
            .ok_or_invalid_data(|| "failed to read Elf64_Shdr")?;
        Ok(shdrs)
    }

    fn ensure_shdrs(&self) -> Result<&'mmap [Elf64_Shdr]> {
        get_or_try_init(&self.shdrs, || self.parse_shdrs()).copied()
    }

    fn parse_phdrs(&self) -> Result<&'mmap [Elf64_Phdr]> {
        let ehdr = self.ensure_ehdr()?;
        let phdrs = self
            .elf_data
            .get(ehdr.ehdr.e_phoff as usize..)
            .ok_or_invalid_data(|| "Elf64_Ehdr::e_phoff is invalid")?
            .read_pod_slice_ref::<Elf64_Phdr>(ehdr.phnum)
            .ok_or_invalid_data(|| "failed to read Elf64_Phdr")?;
        Ok(phdrs)
    }

    fn ensure_phdrs(&self) -> Result<&'mmap [Elf64_Phdr]> {
        get_or_try_init(&self.phdrs, || self.parse_phdrs()).copied()
    }

    fn shstrndx(&self, ehdr: &Elf64_Ehdr) -> Result<usize> {
        // "If the index of section name string table section is larger
        // than or equal to SHN_LORESERVE (0xff00), this member holds
        // SHN_XINDEX (0xffff) and  the real index of the section name
        // string table section is held in the sh_link member of the
        // initial entry in section header table."
        let shstrndx = if ehdr.e_shstrndx == SHN_XINDEX {
            let shdr = self.read_first_shdr(ehdr)?;
            shdr.sh_link
        } else {
            u32::from(ehdr.e_shstrndx)
        };

        let shstrndx = usize::try_from(shstrndx).ok().ok_or_invalid_data(|| {
            format!("ELF file contains unsupported section name string table index ({shstrndx})")
        })?;
        Ok(shstrndx)
    }

    fn ensure_shstrtab(&self) -> Result<&'mmap [u8]> {
        get_or_try_init(&self.shstrtab, || {
            let ehdr = self.ensure_ehdr()?;
            let shstrndx = self.shstrndx(ehdr.ehdr)?;
            self.section_data(shstrndx)
        })
        .copied()
    }

    /// Get the name of the section at a given index.
    fn section_name(&self, idx: usize) -> Result<&'mmap str> {
        let section = self.section_header(idx)?;
        let shstrtab = self.ensure_shstrtab()?;
        read_name(shstrtab, section.sh_name, "section")
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    fn find_section(&self, name: &str) -> Result<Option<usize>> {
        let ehdr = self.ensure_ehdr()?;
        for i in 1..ehdr.shnum {
            if self.section_name(i)? == name {
                return Ok(Some(i))
            }
        }
        Ok(None)
    }

    fn parse_strs(&self, section: &str) -> Result<&'mmap [u8]> {
        let strs = if let Some(idx) = self.find_section(section)? {
            self.section_data(idx)?
        } else {
            &[]
        };
        Ok(strs)
    }

    fn parse_syms(&self, section: &str, strs: &str) -> Result<SymbolCache<'mmap>> {
        let idx = if let Some(idx) = self.find_section(section)? {
            idx
        } else {
            // The symbol table does not exists. Fake an empty one.
            return Ok(SymbolCache {
                by_name: Box::default(),
            })
        };
        let mut syms = self.section_data(idx)?;
        let strtab = self.parse_strs(strs)?;

        if syms.len() % mem::size_of::<Elf64_Sym>() != 0 {
            return Err(Error::with_invalid_data(
                "size of symbol table section is invalid",
            ))
        }

        let count = syms.len() / mem::size_of::<Elf64_Sym>();
        let mut by_name = syms
            .read_pod_slice_ref::<Elf64_Sym>(count)
            .ok_or_invalid_data(|| "failed to read symbol table contents")?
            .iter()
            .filter(|sym| sym.is_addressable())
            .map(|sym| Ok((read_name(strtab, sym.st_name, "symbol")?, sym)))
            .collect::<Result<Vec<_>>>()?;
        // Stable, so that the first definition of a name wins.
        let () = by_name.sort_by_key(|(name, _sym)| *name);

        Ok(SymbolCache {
            by_name: by_name.into_boxed_slice(),
        })
    }

    fn ensure_symbols(&self, table: SymbolTable) -> Result<&SymbolCache<'mmap>> {
        match table {
            SymbolTable::Dynamic => {
                get_or_try_init(&self.dynsym, || self.parse_syms(".dynsym", ".dynstr"))
            }
            SymbolTable::Static => {
                get_or_try_init(&self.symtab, || self.parse_syms(".symtab", ".strtab"))
            }
        }
    }
}

impl Debug for Cache<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Cache")
    }
}


/// A parser for ELF64 files.
#[derive(Debug)]
pub(crate) struct ElfParser {
    /// A cache for relevant parts of the ELF file.
    // SAFETY: We must not hand out references with a 'static lifetime to
    //         this member. Rather, they should never outlive `self`.
    //         Furthermore, this member has to be listed before `_mmap`
    //         to make sure we never end up with a dangling reference.
    cache: Cache<'static>,
    /// The memory mapped file.
    _mmap: Mmap,
}

impl ElfParser {
    /// Create an `ElfParser` from an open file.
    pub fn open_file(file: &File) -> Result<ElfParser> {
        Mmap::map(file)
            .map(Self::from_mmap)
            .context("failed to memory map file")
    }

    /// Create an `ElfParser` from mmap'ed data.
    pub fn from_mmap(mmap: Mmap) -> ElfParser {
        // We transmute the mmap's lifetime to static here as that is a
        // necessity for self-referentiality.
        // SAFETY: We never hand out any 'static references to cache
        //         data.
        let elf_data = unsafe { mem::transmute::<&[u8], &'static [u8]>(mmap.deref()) };

        ElfParser {
            _mmap: mmap,
            cache: Cache::new(elf_data),
        }
    }

    /// Create an `ElfParser` for a path.
    pub fn open(filename: &Path) -> Result<ElfParser> {
        let file = File::open(filename)
            .with_context(|| format!("failed to open {}", filename.display()))?;
        Self::open_file(&file)
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    pub fn find_section(&self, name: &str) -> Result<Option<usize>> {
        self.cache.find_section(name)
    }

    /// Retrieve the (unrelocated) address range the section `name`
    /// occupies at run time.
    pub fn section_range(&self, name: &str) -> Result<Option<Range<Addr>>> {
        let Some(idx) = self.find_section(name)? else {
            return Ok(None)
        };
        let section = self.cache.section_header(idx)?;
        Ok(Some(section.sh_addr..section.sh_addr + section.sh_size))
    }

    /// Look up the (unrelocated) address of the symbol `name` in
    /// `table`.
    ///
    /// Only symbols defined in the file and not thread-local are
    /// considered.
    pub fn find_symbol(&self, name: &str, table: SymbolTable) -> Result<Option<Addr>> {
        let symbols = self.cache.ensure_symbols(table)?;
        Ok(symbols.find(name).map(|sym| sym.st_value))
    }

    /// Translate a file offset into the virtual address it is loaded
    /// at, before relocation.
    pub fn file_offset_to_vaddr(&self, offset: u64) -> Result<Option<Addr>> {
        let phdrs = self.program_headers()?;
        let vaddr = phdrs.iter().find_map(|phdr| {
            if phdr.p_type == PT_LOAD {
                // Mappings start at page boundaries, which may precede the
                // segment's actual start in the file.
                let start = phdr.p_offset & !(phdr.p_align.max(1) - 1);
                if (start..phdr.p_offset + phdr.p_filesz).contains(&offset) {
                    return Some(
                        phdr.p_vaddr
                            .wrapping_sub(phdr.p_offset)
                            .wrapping_add(offset),
                    )
                }
            }
            None
        });
        Ok(vaddr)
    }

    fn program_headers(&self) -> Result<&[Elf64_Phdr]> {
        let phdrs = self.cache.ensure_phdrs()?;
        Ok(phdrs)
    }
}
