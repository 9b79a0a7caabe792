use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::str::FromStr;

use memchr::memmem;

use crate::log::debug;
use crate::Error;
use crate::Memory;
use crate::Result;
use crate::Symbols;


/// The marker preceding the version number in glibc's banner, e.g.,
/// `GNU C Library (GNU libc) stable release version 2.35.`
const RELEASE_MARKER: &[u8] = b"release version ";


/// A glibc release, as far as structure layouts are concerned.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GlibcVersion {
    /// The major version.
    pub major: u16,
    /// The minor version.
    pub minor: u16,
}

impl GlibcVersion {
    /// Create a version object.
    #[inline]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Check whether the release is at least `major.minor`.
    #[inline]
    pub fn at_least(&self, major: u16, minor: u16) -> bool {
        *self >= Self::new(major, minor)
    }

    /// Parse the version number out of glibc's banner string.
    fn from_banner(data: &[u8]) -> Option<Self> {
        let start = memmem::find(data, RELEASE_MARKER)? + RELEASE_MARKER.len();
        let rest = data.get(start..)?;
        let end = rest
            .iter()
            .position(|b| !(b.is_ascii_digit() || *b == b'.'))
            .unwrap_or(rest.len());
        let version = std::str::from_utf8(&rest[..end]).ok()?;
        version.trim_end_matches('.').parse().ok()
    }

    /// Detect the release of the glibc loaded as `object` by searching
    /// its read-only data for the version banner.
    pub fn detect<T>(target: &T, object: &str) -> Result<Self>
    where
        T: Memory + Symbols + ?Sized,
    {
        let range = target
            .section_range(object, ".rodata")
            .ok_or_else(|| Error::with_not_found(format!("no `.rodata` section found in `{object}`")))?;
        let len = (range.end - range.start) as usize;
        let data = target.read_bytes(range.start, len)?;
        let version = Self::from_banner(&data).ok_or_else(|| {
            Error::with_not_found(format!("no glibc release banner found in `{object}`"))
        })?;
        debug!("detected glibc {version}");
        Ok(version)
    }
}

impl Default for GlibcVersion {
    fn default() -> Self {
        Self::new(2, 35)
    }
}

impl Display for GlibcVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for GlibcVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::with_invalid_input(format!("`{s}` is not a valid glibc version"));
        let mut parts = s.split('.');
        let major = parts.next().ok_or_else(invalid)?;
        let minor = parts.next().ok_or_else(invalid)?;
        let major = major.parse().map_err(|_| invalid())?;
        let minor = minor.parse().map_err(|_| invalid())?;
        // Patch levels do not influence layouts.
        let _patch = parts.next();
        if parts.next().is_some() {
            return Err(invalid())
        }
        Ok(Self::new(major, minor))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::ErrorKind;


    /// Test parsing of version strings.
    #[test]
    fn version_parsing() {
        assert_eq!("2.35".parse::<GlibcVersion>().unwrap(), GlibcVersion::new(2, 35));
        assert_eq!("2.31.9".parse::<GlibcVersion>().unwrap(), GlibcVersion::new(2, 31));
        for s in ["2", "2.x", "", "1.2.3.4"] {
            let err = s.parse::<GlibcVersion>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    /// Check version ordering.
    #[test]
    fn version_ordering() {
        let version = GlibcVersion::new(2, 31);
        assert!(version.at_least(2, 26));
        assert!(version.at_least(2, 31));
        assert!(!version.at_least(2, 32));
        assert!(GlibcVersion::new(2, 9) < GlibcVersion::new(2, 10));
        assert_eq!(version.to_string(), "2.31");
    }

    /// Make sure that we can extract the version from a banner.
    #[test]
    fn banner_parsing() {
        let data = b"\0\0GNU C Library (Ubuntu GLIBC 2.35-0ubuntu3.1) stable release version 2.35.\n\0";
        assert_eq!(GlibcVersion::from_banner(data), Some(GlibcVersion::new(2, 35)));
        assert_eq!(GlibcVersion::from_banner(b"no banner"), None);
    }
}
