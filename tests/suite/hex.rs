use heapsym::hex::dump;
use heapsym::hex::unhexify;
use heapsym::ErrorKind;

use test_log::test;


/// Check the conversion of byte strings as copied from a debugger.
#[test]
fn unhexify_debugger_output() {
    assert_eq!(
        unhexify("00 70 75 c1 cd ef 59 00").unwrap(),
        "0x0059efcdc1757000"
    );
    assert_eq!(unhexify(" 10\t92 55 55 55 55 ").unwrap(), "0x0000555555559210");
    assert_eq!(unhexify("").unwrap(), "0x0000000000000000");

    let err = unhexify("00 70 75 c1 cd ef 59 00 01").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

/// Check that the dump of a full row has the expected shape.
#[test]
fn dump_row() {
    let dump = dump(0x7ffff7c00000, &(0x30..0x40).collect::<Vec<u8>>());
    assert_eq!(
        dump,
        "+0000 0x7ffff7c00000  30 31 32 33 34 35 36 37  38 39 3a 3b 3c 3d 3e 3f  │01234567│89:;<=>?│\n"
    );
}
