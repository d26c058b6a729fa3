//! Whole-file decompilation from raw .pyc bytes.
//!
//! The fixture is a hand-marshalled Python 2.7 module so the header, the
//! marshal reader, the decoder and the printer are all exercised in one
//! pass without any test-only shortcuts.

mod common;

use common::Asm;
use unpyc::{decompile, parse_pyc, LoadError, Opcode as Op, Version};

/// Marshals a Python 2.7 module code object around the given bytecode.
fn pyc_27(bytecode: &[u8], consts: &[u8], names: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&0x0A0D_F303u32.to_le_bytes()); // 2.7 magic
    data.extend_from_slice(&0u32.to_le_bytes()); // mtime

    data.push(b'c');
    data.extend_from_slice(&0u32.to_le_bytes()); // argcount
    data.extend_from_slice(&0u32.to_le_bytes()); // nlocals
    data.extend_from_slice(&2u32.to_le_bytes()); // stacksize
    data.extend_from_slice(&64u32.to_le_bytes()); // flags

    data.push(b's'); // code bytes
    data.extend_from_slice(&(bytecode.len() as u32).to_le_bytes());
    data.extend_from_slice(bytecode);

    data.extend_from_slice(consts);
    data.extend_from_slice(names);

    // varnames, freevars, cellvars: empty tuples.
    for _ in 0..3 {
        data.push(b'(');
        data.extend_from_slice(&0u32.to_le_bytes());
    }

    data.push(b's'); // filename
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(b"m.py");
    data.push(b's'); // name
    data.extend_from_slice(&8u32.to_le_bytes());
    data.extend_from_slice(b"<module>");
    data.extend_from_slice(&1u32.to_le_bytes()); // firstlineno
    data.push(b's'); // lnotab
    data.extend_from_slice(&0u32.to_le_bytes());

    data
}

fn str_object(text: &[u8]) -> Vec<u8> {
    let mut out = vec![b's'];
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text);
    out
}

#[test]
fn decompiles_a_python2_print_module() {
    // print 'hi'
    let mut a = Asm::new(Version::new(2, 7));
    a.op(Op::LoadConst, 1);
    a.op(Op::PrintItem, 0);
    a.op(Op::PrintNewline, 0);
    a.op(Op::LoadConst, 0);
    a.op(Op::ReturnValue, 0);
    let bytecode = a.finish();

    // consts: (None, 'hi')
    let mut consts = vec![b'('];
    consts.extend_from_slice(&2u32.to_le_bytes());
    consts.push(b'N');
    consts.extend_from_slice(&str_object(b"hi"));

    // names: ()
    let mut names = vec![b'('];
    names.extend_from_slice(&0u32.to_le_bytes());

    let data = pyc_27(&bytecode, &consts, &names);

    let parsed = parse_pyc(&data).expect("valid pyc");
    assert_eq!(parsed.version, Version::new(2, 7));
    assert_eq!(parsed.code.name, "<module>");
    assert_eq!(parsed.code.consts.len(), 2);

    let result = decompile(&data).expect("decompiles");
    assert_eq!(result.source, "print 'hi'\n");
}

#[test]
fn truncated_header_is_fatal() {
    let data = 0x0A0D_F303u32.to_le_bytes();
    assert!(matches!(decompile(&data), Err(LoadError::UnexpectedEof { .. })));
}

#[test]
fn unknown_magic_is_fatal() {
    let mut data = Vec::new();
    data.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    data.extend_from_slice(&[0; 12]);
    assert!(matches!(decompile(&data), Err(LoadError::UnsupportedVersion(_))));
}
