//! Code objects and the constants they carry.
//!
//! A `CodeObject` is the unit of compilation: raw bytecode plus the
//! constant pool, name tables, and (3.11+) the exception table. It is the
//! output of the marshal reader and the read-only input to every later
//! stage; the simulator and printer borrow from it but never mutate it.

use std::fmt;
use std::sync::Arc;

use crate::bigint::BigInt;
use crate::version::Version;

/// Code object flag bits, matching CPython's `CO_*` constants.
///
/// Future-feature bits (0x2000 and up) are preserved but uninterpreted.
pub mod flags {
    pub const OPTIMIZED: u32 = 0x1;
    pub const NEWLOCALS: u32 = 0x2;
    pub const VARARGS: u32 = 0x4;
    pub const VARKEYWORDS: u32 = 0x8;
    pub const NESTED: u32 = 0x10;
    pub const GENERATOR: u32 = 0x20;
    pub const NOFREE: u32 = 0x40;
    pub const COROUTINE: u32 = 0x80;
    pub const ITERABLE_COROUTINE: u32 = 0x100;
    pub const ASYNC_GENERATOR: u32 = 0x200;
}

/// A marshalled constant.
///
/// Strings and bytes are raw byte sequences; no encoding is imposed at this
/// layer. The printer escapes whatever is not printable ASCII.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Ellipsis,
    StopIteration,
    Int(i64),
    Long(BigInt),
    Float(f64),
    Complex { real: f64, imag: f64 },
    Str(Vec<u8>),
    Bytes(Vec<u8>),
    Tuple(Vec<Constant>),
    List(Vec<Constant>),
    Dict(Vec<(Constant, Constant)>),
    Set(Vec<Constant>),
    FrozenSet(Vec<Constant>),
    Code(Arc<CodeObject>),
}

impl Constant {
    /// The code object inside, if this constant is one.
    #[must_use]
    pub fn as_code(&self) -> Option<&Arc<CodeObject>> {
        match self {
            Self::Code(code) => Some(code),
            _ => None,
        }
    }

    /// String contents decoded leniently, if this constant is a string.
    #[must_use]
    pub fn as_str_lossy(&self) -> Option<String> {
        match self {
            Self::Str(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// One entry of a 3.11+ exception table: a protected instruction range,
/// its handler, and the stack state on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExceptionTableEntry {
    /// Start of the protected range, in byte offsets (inclusive).
    pub start: u32,
    /// End of the protected range, in byte offsets (exclusive).
    pub end: u32,
    /// Byte offset of the handler.
    pub target: u32,
    /// Stack depth to unwind to before entering the handler.
    pub depth: u32,
    /// Whether the offset of the raising instruction is pushed too.
    pub push_lasti: bool,
}

impl ExceptionTableEntry {
    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// A compiled function, class body, comprehension, or module.
///
/// Field availability varies by source version (posonly is 3.8+, qualname
/// 3.11+, and so on); absent fields parse as zero or empty. The marshal
/// reader is the only producer.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    /// Version of the interpreter that compiled this object. Copied onto
    /// every nested code object so each stage is self-contained.
    pub version: Version,

    pub argcount: u32,
    /// Positional-only parameter count (3.8+).
    pub posonlyargcount: u32,
    /// Keyword-only parameter count (3.0+).
    pub kwonlyargcount: u32,
    /// Local variable count. 3.11+ derives it from `varnames` instead of
    /// marshalling it.
    pub nlocals: u32,
    pub stacksize: u32,
    /// `CO_*` flag bits; see [`flags`].
    pub flags: u32,

    /// Raw bytecode.
    pub code: Vec<u8>,
    /// Constant pool, recursively containing nested code objects.
    pub consts: Vec<Constant>,

    /// Global/attribute names referenced by the bytecode.
    pub names: Vec<String>,
    /// Local variable names. For 3.11+ this is the locals-plus table with
    /// cell and free names appended (the kinds blob is discarded).
    pub varnames: Vec<String>,
    /// Names of variables captured from enclosing scopes.
    pub freevars: Vec<String>,
    /// Names of variables captured by nested scopes.
    pub cellvars: Vec<String>,

    pub filename: String,
    /// Short name (`foo`, `<module>`, `<listcomp>`, ...).
    pub name: String,
    /// Dotted name within the module (3.11+); falls back to `name`.
    pub qualname: Option<String>,

    pub firstlineno: u32,
    /// Raw line table (`lnotab` before 3.10, `linetable` after); kept
    /// opaque since the decompiler only needs statement order, which the
    /// instruction stream already provides.
    pub linetable: Vec<u8>,
    /// Parsed exception table (3.11+; empty otherwise).
    pub exception_table: Vec<ExceptionTableEntry>,
}

impl CodeObject {
    /// Local variable name for a slot, if in range.
    #[must_use]
    pub fn varname(&self, slot: u32) -> Option<&str> {
        self.varnames.get(slot as usize).map(String::as_str)
    }

    /// Global/attribute name for an index, if in range.
    #[must_use]
    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    /// Cell or free variable name for a `LOAD_DEREF`-style slot.
    ///
    /// Pre-3.11 numbers cells first then frees; 3.11+ indexes straight
    /// into the locals-plus table.
    #[must_use]
    pub fn derefname(&self, slot: u32) -> Option<&str> {
        if self.version >= Version::new(3, 11) {
            return self.varname(slot);
        }
        let slot = slot as usize;
        if slot < self.cellvars.len() {
            self.cellvars.get(slot).map(String::as_str)
        } else {
            self.freevars.get(slot - self.cellvars.len()).map(String::as_str)
        }
    }

    #[must_use]
    pub fn constant(&self, index: u32) -> Option<&Constant> {
        self.consts.get(index as usize)
    }

    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags & flags::GENERATOR != 0
    }

    #[must_use]
    pub fn is_coroutine(&self) -> bool {
        self.flags & (flags::COROUTINE | flags::ITERABLE_COROUTINE | flags::ASYNC_GENERATOR) != 0
    }

    #[must_use]
    pub fn has_varargs(&self) -> bool {
        self.flags & flags::VARARGS != 0
    }

    #[must_use]
    pub fn has_varkeywords(&self) -> bool {
        self.flags & flags::VARKEYWORDS != 0
    }

    /// True for `<listcomp>`, `<setcomp>`, `<dictcomp>` and `<genexpr>`
    /// code objects produced for comprehension bodies.
    #[must_use]
    pub fn is_comprehension(&self) -> bool {
        matches!(self.name.as_str(), "<listcomp>" | "<setcomp>" | "<dictcomp>" | "<genexpr>")
    }

    #[must_use]
    pub fn is_lambda(&self) -> bool {
        self.name == "<lambda>"
    }

    /// Innermost exception-table entry covering `offset`, if any.
    ///
    /// Entries are ordered by start offset with inner ranges following
    /// outer ones, so the last match is the innermost.
    #[must_use]
    pub fn exception_entry_at(&self, offset: u32) -> Option<&ExceptionTableEntry> {
        self.exception_table.iter().rev().find(|e| e.contains(offset))
    }
}

impl fmt::Display for CodeObject {
    /// Short `<code foo at file.py:12>` rendering for logs and diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<code {} at {}:{}>", self.name, self.filename, self.firstlineno)
    }
}

/// Parses a 3.11+ exception table blob into entries.
///
/// Values are varint-encoded in 6-bit chunks, high-to-low, with bit 6 as
/// the continuation flag; bit 7 marks the first byte of an entry. Start,
/// length and target are in code units (halved words), so they scale by 2
/// to byte offsets. A truncated trailing entry is dropped.
#[must_use]
pub fn parse_exception_table(data: &[u8]) -> Vec<ExceptionTableEntry> {
    fn varint(data: &[u8], pos: &mut usize) -> Option<u32> {
        let mut byte = *data.get(*pos)?;
        *pos += 1;
        let mut value = u32::from(byte & 0x3F);
        while byte & 0x40 != 0 {
            byte = *data.get(*pos)?;
            *pos += 1;
            value = (value << 6) | u32::from(byte & 0x3F);
        }
        Some(value)
    }

    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let parsed = (|| {
            let start = varint(data, &mut pos)? * 2;
            let length = varint(data, &mut pos)? * 2;
            let target = varint(data, &mut pos)? * 2;
            let depth_lasti = varint(data, &mut pos)?;
            Some(ExceptionTableEntry {
                start,
                end: start + length,
                target,
                depth: depth_lasti >> 1,
                push_lasti: depth_lasti & 1 != 0,
            })
        })();
        match parsed {
            Some(entry) => entries.push(entry),
            None => break,
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_code(version: Version) -> CodeObject {
        CodeObject {
            version,
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 0,
            flags: 0,
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            filename: "test.py".to_owned(),
            name: "<module>".to_owned(),
            qualname: None,
            firstlineno: 1,
            linetable: Vec::new(),
            exception_table: Vec::new(),
        }
    }

    #[test]
    fn deref_names_pre_and_post_311() {
        let mut code = empty_code(Version::new(3, 10));
        code.cellvars = vec!["c".to_owned()];
        code.freevars = vec!["f".to_owned()];
        assert_eq!(code.derefname(0), Some("c"));
        assert_eq!(code.derefname(1), Some("f"));
        assert_eq!(code.derefname(2), None);

        let mut code = empty_code(Version::new(3, 11));
        code.varnames = vec!["x".to_owned(), "c".to_owned()];
        assert_eq!(code.derefname(1), Some("c"));
    }

    #[test]
    fn comprehension_names() {
        let mut code = empty_code(Version::new(3, 14));
        for name in ["<listcomp>", "<setcomp>", "<dictcomp>", "<genexpr>"] {
            code.name = name.to_owned();
            assert!(code.is_comprehension(), "{name}");
        }
        code.name = "<lambda>".to_owned();
        assert!(!code.is_comprehension());
        assert!(code.is_lambda());
    }

    #[test]
    fn exception_table_round_trip() {
        // One entry: start unit 2, length 3, target 10, depth 1, lasti set.
        // Values small enough for single bytes: first byte of the entry
        // carries 0x80 in real tables; the parser only needs 6-bit chunks.
        let blob = [2u8, 3, 10, (1 << 1) | 1];
        let entries = parse_exception_table(&blob);
        assert_eq!(
            entries,
            vec![ExceptionTableEntry {
                start: 4,
                end: 10,
                target: 20,
                depth: 1,
                push_lasti: true,
            }]
        );
    }

    #[test]
    fn exception_table_varint_continuation() {
        // start = (1 << 6) | 5 = 69 units via continuation bit 0x40.
        let blob = [0x40 | 1, 5, 0, 0, 0];
        let entries = parse_exception_table(&blob);
        assert_eq!(entries[0].start, 138);
    }

    #[test]
    fn truncated_exception_table_is_dropped() {
        let blob = [2u8, 3];
        assert!(parse_exception_table(&blob).is_empty());
    }
}
