use std::fmt::Write as _;

use super::chunk::DecodedChunk;
use super::chunk::IS_MMAPPED;
use super::chunk::NON_MAIN_ARENA;
use super::chunk::PREV_INUSE;
use crate::hex;
use crate::Addr;


/// Flag bits and their names, in the order they are rendered.
static FLAG_NAMES: [(u64, &str); 3] = [
    (PREV_INUSE, "PREV_INUSE"),
    (IS_MMAPPED, "IS_MMAPPED"),
    (NON_MAIN_ARENA, "NON_MAIN_ARENA"),
];


/// Render the summary of a chunk, terminated by an empty line.
pub(super) fn summary(decoded: &DecodedChunk, has_tcache: bool) -> String {
    let chunk = &decoded.chunk;
    let mut out = decoded.class.label(has_tcache);

    for (bit, name) in FLAG_NAMES {
        if chunk.size & bit != 0 {
            let _ok = write!(out, " | {name}");
        }
    }
    let () = out.push('\n');

    let _ok = writeln!(out, "Addr: {:#x}", chunk.addr);
    let _ok = writeln!(
        out,
        "Size: 0x{:02x} (with flag bits: 0x{:02x})",
        chunk.real_size(),
        chunk.size
    );
    for name in decoded.class.link_fields() {
        if let Some(value) = decoded.link(name) {
            let _ok = writeln!(out, "{name}: 0x{value:02x}");
        }
    }
    let () = out.push('\n');
    out
}

/// Render the raw contents of a chunk, terminated by an empty line.
pub(super) fn dump(addr: Addr, data: &[u8]) -> String {
    let mut out = String::from("hexdump\n");
    let () = out.push_str(&hex::dump(addr, data));
    let () = out.push('\n');
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::ptmalloc::BinKind;
    use crate::ptmalloc::Chunk;
    use crate::ptmalloc::Classification;


    fn decoded(size: u64, class: Classification) -> DecodedChunk {
        DecodedChunk {
            chunk: Chunk {
                addr: 0x5555555593c0,
                prev_size: 0,
                size,
                fd: 0x7ffff7fa1090,
                bk: 0x7ffff7fa1090,
                fd_nextsize: 0x5555555593c0,
                bk_nextsize: 0x5555555593c0,
            },
            class,
        }
    }


    /// Check the summary of a large bin chunk.
    #[test]
    fn large_summary() {
        let text = summary(&decoded(0x411, Classification::Free(BinKind::Large)), true);
        let expected = "\
Free chunk (largebins) | PREV_INUSE
Addr: 0x5555555593c0
Size: 0x410 (with flag bits: 0x411)
fd: 0x7ffff7fa1090
bk: 0x7ffff7fa1090
fd_nextsize: 0x5555555593c0
bk_nextsize: 0x5555555593c0

";
        assert_eq!(text, expected);
    }

    /// Check that flags are listed in order and that allocated chunks
    /// show no links.
    #[test]
    fn flag_suffixes() {
        let text = summary(&decoded(0x27, Classification::Allocated), true);
        let expected = "\
Allocated chunk | PREV_INUSE | IS_MMAPPED | NON_MAIN_ARENA
Addr: 0x5555555593c0
Size: 0x20 (with flag bits: 0x27)

";
        assert_eq!(text, expected);

        let text = summary(&decoded(0x20, Classification::Free(BinKind::Tcache)), false);
        assert!(text.starts_with("Free chunk (fastbins)\n"));
        assert!(text.contains("fd: 0x7ffff7fa1090\n"));
        assert!(!text.contains("bk:"));
    }

    /// Make sure that a dump is terminated by an empty line.
    #[test]
    fn dump_termination() {
        let text = dump(0x555555559290, &[0x31, 0, 0, 0, 0, 0, 0, 0]);
        assert!(text.starts_with("hexdump\n+0000 0x555555559290  31 00"));
        assert!(text.ends_with("│\n\n"));
        assert_eq!(text.lines().count(), 3);
    }
}
