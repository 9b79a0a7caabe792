use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::num::NonZeroU32;
use std::ops::Range;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::process;

use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;


/// An enumeration identifying a process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pid {
    /// The current process.
    Slf,
    /// The process identified by the provided ID.
    Pid(NonZeroU32),
}

impl Pid {
    /// Resolve this [`Pid`] into an actual number, if it is the symbolic
    /// [`Pid::Slf`] variant.
    pub fn resolve(&self) -> u32 {
        match self {
            Self::Slf => process::id(),
            Self::Pid(pid) => pid.get(),
        }
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Slf => write!(f, "self"),
            Self::Pid(pid) => write!(f, "{pid}"),
        }
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        NonZeroU32::new(pid).map(Pid::Pid).unwrap_or(Pid::Slf)
    }
}


/// A single mapping of a process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MapsEntry {
    /// The virtual address range covered by this entry.
    pub range: Range<Addr>,
    /// The `rwxp` permissions, one bit each, `r` being the most
    /// significant.
    pub mode: u8,
    /// The offset into the mapped file.
    pub offset: u64,
    /// The path of the mapped file or the kind of anonymous mapping
    /// (e.g., `[heap]`), if any.
    pub path: PathBuf,
}

impl MapsEntry {
    /// Check whether the entry maps a regular file, as opposed to being
    /// an anonymous or special mapping.
    pub fn is_file_backed(&self) -> bool {
        self.path.components().next() == Some(Component::RootDir)
    }

    /// The file name of the mapped file, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.is_file_backed()
            .then(|| self.path.file_name()?.to_str())
            .flatten()
    }
}


/// Parse a line of a proc maps file.
fn parse_maps_line<'line>(line: &'line str, pid: Pid) -> Result<MapsEntry> {
    let full_line = line;

    let split_once = |line: &'line str, component: &str| -> Result<(&'line str, &'line str)> {
        line.split_once(|c: char| c.is_ascii_whitespace())
            .ok_or_invalid_data(|| {
                format!("failed to find {component} in proc maps line: {full_line}")
            })
    };

    // Lines have the following format:
    // address           perms offset  dev   inode      pathname
    // 08048000-08049000 r-xp 00000000 03:00 8312       /opt/test
    // 0804a000-0806b000 rw-p 00000000 00:00 0          [heap]
    // a7cb1000-a7cb2000 ---p 00000000 00:00 0
    // a7ed5000-a8008000 r-xp 00000000 03:00 4222       /lib/libc.so.6
    let (address_str, line) = split_once(line, "address range")?;
    let (start_str, end_str) = address_str.split_once('-').ok_or_invalid_data(|| {
        format!("encountered malformed address range in proc maps line: {full_line}")
    })?;
    let parse_hex = |s: &str, component: &str| {
        u64::from_str_radix(s, 16)
            .map_err(Error::with_invalid_data)
            .with_context(|| format!("encountered malformed {component} in proc maps line: {full_line}"))
    };
    let start = parse_hex(start_str, "start address")?;
    let end = parse_hex(end_str, "end address")?;

    let (mode_str, line) = split_once(line, "permissions component")?;
    let mode = mode_str
        .chars()
        .fold(0, |mode, c| (mode << 1) | u8::from(c != '-'));

    let (offset_str, line) = split_once(line, "offset component")?;
    let offset = parse_hex(offset_str, "offset component")?;

    let (_dev, line) = split_once(line, "device component")?;
    // Anonymous mappings have no path and so we may not be able to
    // successfully split.
    let path_str = split_once(line, "inode component")
        .map(|(_inode, line)| line.trim())
        .unwrap_or("");
    let path = if path_str.ends_with(" (deleted)") {
        PathBuf::from(format!("/proc/{pid}/map_files/{address_str}"))
    } else {
        PathBuf::from(path_str)
    };

    let entry = MapsEntry {
        range: start..end,
        mode,
        offset,
        path,
    };
    Ok(entry)
}


/// Parse a proc maps file from the provided reader.
fn parse_file<R>(reader: R, pid: Pid) -> Result<Vec<MapsEntry>>
where
    R: Read,
{
    BufReader::new(reader)
        .lines()
        .filter_map(|line| match line {
            Ok(line) => {
                let line = line.trim();
                // There shouldn't be any empty lines, but we'd just
                // ignore them.
                (!line.is_empty()).then(|| parse_maps_line(line, pid))
            }
            Err(err) => Some(Err(Error::from(err))),
        })
        .collect()
}

/// Parse the maps file for the process with the given PID.
pub(crate) fn parse(pid: Pid) -> Result<Vec<MapsEntry>> {
    let path = format!("/proc/{pid}/maps");
    let file = File::open(&path).with_context(|| format!("failed to open {path}"))?;
    parse_file(file, pid)
}

/// Enumerate the threads of the process with the given PID.
pub(crate) fn threads(pid: Pid) -> Result<Vec<u32>> {
    let path = format!("/proc/{pid}/task");
    let mut tids = Path::new(&path)
        .read_dir()
        .with_context(|| format!("failed to read {path}"))?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            entry.file_name().to_str()?.parse::<u32>().ok()
        })
        .collect::<Vec<_>>();
    let () = tids.sort_unstable();
    Ok(tids)
}
