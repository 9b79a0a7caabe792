//! Hexadecimal rendering helpers.

use std::fmt::Write as _;

use crate::Addr;
use crate::Error;
use crate::Result;


const ROW_LEN: usize = 16;
const GROUP_LEN: usize = 8;
/// The width of the hex column: three characters per byte plus one
/// separating space per group.
const HEX_WIDTH: usize = ROW_LEN * 3 + ROW_LEN / GROUP_LEN;


#[inline]
fn printable(byte: u8) -> char {
    if (0x21..=0x7e).contains(&byte) {
        char::from(byte)
    } else {
        '.'
    }
}


/// Render `data`, which resides at `addr`, as a hexdump of sixteen
/// bytes per row.
///
/// Every row looks like
/// ```text
/// +0010 0x5555555592a0  54 68 69 73 20 69 73 20  61 20 74 65 73 74 20 73  │This.is.│a.test.s│
/// ```
/// and is terminated by a newline. A trailing partial row is padded
/// to full width.
pub fn dump(addr: Addr, data: &[u8]) -> String {
    let mut out = String::new();

    for (idx, row) in data.chunks(ROW_LEN).enumerate() {
        let offset = idx * ROW_LEN;
        let mut hex = String::with_capacity(HEX_WIDTH);
        let mut ascii = String::from("│");

        for group in row.chunks(GROUP_LEN) {
            for byte in group {
                let _ok = write!(hex, "{byte:02x} ");
                let () = ascii.push(printable(*byte));
            }
            let () = hex.push(' ');
            let () = (group.len()..GROUP_LEN).for_each(|_| ascii.push(' '));
            let () = ascii.push('│');
        }
        // A row with at most eight bytes lacks the second ASCII group.
        if row.len() <= GROUP_LEN {
            let () = (0..GROUP_LEN).for_each(|_| ascii.push(' '));
            let () = ascii.push('│');
        }

        let _ok = writeln!(
            out,
            "+{offset:04x} {:#x}  {hex:<HEX_WIDTH$}{ascii}",
            addr + offset as Addr
        );
    }
    out
}


/// Reinterpret a whitespace separated string of hexadecimal bytes as a
/// little endian integer and render it as a zero padded pointer
/// literal.
///
/// ```
/// assert_eq!(
///     heapsym::hex::unhexify("00 70 75 c1 cd ef 59 00").unwrap(),
///     "0x0059efcdc1757000"
/// );
/// ```
pub fn unhexify(input: &str) -> Result<String> {
    let digits = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();

    if digits.len() % 2 != 0 {
        return Err(Error::with_invalid_input(format!(
            "`{input}` does not consist of whole bytes"
        )))
    }

    let bytes = digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            // The pair consists of ASCII only, if it is valid at all.
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| Error::with_invalid_input(format!("`{input}` is not a hex string")))?;

    if bytes.len() > 8 {
        return Err(Error::with_invalid_input(format!(
            "`{input}` holds {} bytes, but a pointer holds at most eight",
            bytes.len()
        )))
    }

    let value = bytes
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    Ok(format!("{value:#018x}"))
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::ErrorKind;


    /// Check that a chunk holding a string dumps as expected.
    #[test]
    fn string_chunk_dump() {
        let mut data = vec![0u8; 0x38];
        let () = data[8] = 0x31;
        let () = data[0x10..0x10 + 21].copy_from_slice(b"This is a test string");

        let dump = dump(0x5555555592a0, &data);
        let expected = "\
+0000 0x5555555592a0  00 00 00 00 00 00 00 00  31 00 00 00 00 00 00 00  │........│1.......│
+0010 0x5555555592b0  54 68 69 73 20 69 73 20  61 20 74 65 73 74 20 73  │This.is.│a.test.s│
+0020 0x5555555592c0  74 72 69 6e 67 00 00 00  00 00 00 00 00 00 00 00  │tring...│........│
+0030 0x5555555592d0  00 00 00 00 00 00 00 00                           │........│        │
";
        assert_eq!(dump, expected);
    }

    /// Check padding of a row that ends within its second group.
    #[test]
    fn partial_second_group() {
        let dump = dump(0x1000, b"ABCDEFGHIJ");
        assert_eq!(
            dump,
            "+0000 0x1000  41 42 43 44 45 46 47 48  49 4a                    │ABCDEFGH│IJ      │\n"
        );
        assert_eq!(super::dump(0x1000, &[]), "");
    }

    /// Test the conversion of hex strings into pointer literals.
    #[test]
    fn unhexify_pointer() {
        assert_eq!(unhexify("00 70 75 c1 cd ef 59 00").unwrap(), "0x0059efcdc1757000");
        assert_eq!(unhexify("ff").unwrap(), "0x00000000000000ff");
        assert_eq!(unhexify("0070").unwrap(), "0x0000000000007000");
    }

    /// Make sure that malformed input is rejected.
    #[test]
    fn unhexify_invalid() {
        for input in ["0", "zz", "00 11 22 33 44 55 66 77 88", "é0"] {
            let err = unhexify(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{input}");
        }
    }
}
