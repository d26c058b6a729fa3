//! Shared test helpers: a small assembler over the version tables.
//!
//! Tests build bytecode through `opcode_to_byte` and the per-version
//! cache counts, so they cannot drift from the tables the decoder uses.
#![allow(dead_code)] // each test binary uses a subset

use std::sync::Arc;

use unpyc::{opcode_to_byte, table, CodeObject, Constant, Opcode, Version};

/// Emits instructions for one version, tracking offsets and jumps.
pub struct Asm {
    version: Version,
    code: Vec<u8>,
}

/// A forward jump awaiting its target.
#[derive(Debug, Clone, Copy)]
pub struct Label {
    /// Byte position of the opcode.
    pos: usize,
    opcode: Opcode,
}

impl Asm {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            code: Vec::new(),
        }
    }

    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    fn byte_of(&self, op: Opcode) -> u8 {
        opcode_to_byte(self.version, op).unwrap_or_else(|| panic!("{op} not in {} table", self.version))
    }

    fn cache_bytes(&self, op: Opcode) -> usize {
        table(self.version).map_or(0, |t| usize::from(t.cache_words(op)) * 2)
    }

    /// Emits an instruction; `arg` is ignored for no-argument opcodes in
    /// the pre-3.6 encoding.
    pub fn op(&mut self, op: Opcode, arg: u32) -> &mut Self {
        let byte = self.byte_of(op);
        if self.version.is_wordcode() {
            assert!(arg <= 0xFF, "test assembler does not emit EXTENDED_ARG ({op} {arg})");
            self.code.push(byte);
            self.code.push(arg as u8);
            self.code.extend(std::iter::repeat(0).take(self.cache_bytes(op)));
        } else {
            self.code.push(byte);
            if byte >= table(self.version).expect("table").have_argument() {
                assert!(arg <= 0xFFFF);
                self.code.extend_from_slice(&(arg as u16).to_le_bytes());
            }
        }
        self
    }

    /// Emits a jump with a placeholder operand; patch it later.
    pub fn jump(&mut self, op: Opcode) -> Label {
        let pos = self.code.len();
        self.op(op, 0);
        Label { pos, opcode: op }
    }

    /// Patches `label` to jump to the current offset.
    pub fn patch(&mut self, label: Label) {
        let target = self.offset();
        self.patch_to(label, target);
    }

    /// Patches `label` to jump to `target`.
    pub fn patch_to(&mut self, label: Label, target: u32) {
        let arg = self.encode_jump(label, target);
        if self.version.is_wordcode() {
            assert!(arg <= 0xFF, "jump operand too wide for the test assembler");
            self.code[label.pos + 1] = arg as u8;
        } else {
            let bytes = (arg as u16).to_le_bytes();
            self.code[label.pos + 1] = bytes[0];
            self.code[label.pos + 2] = bytes[1];
        }
    }

    /// Emits a backward jump to a known earlier offset.
    pub fn jump_back(&mut self, op: Opcode, target: u32) -> &mut Self {
        let label = self.jump(op);
        self.patch_to(label, target);
        self
    }

    fn encode_jump(&self, label: Label, target: u32) -> u32 {
        let size = if self.version.is_wordcode() { 2 } else { 3 };
        let next = label.pos as u32 + size + self.cache_bytes(label.opcode) as u32;
        if label.opcode.is_backward_jump() {
            assert!(target <= next, "backward jump must go backward");
            return (next - target) / 2;
        }
        if label.opcode.is_relative_jump(self.version)
            || matches!(
                label.opcode,
                Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith | Opcode::SetupAsyncWith
            )
        {
            assert!(target >= next, "relative jump must go forward");
            let delta = target - next;
            return if self.version.is_wordcode() { delta / 2 } else { delta };
        }
        // Absolute: word-scaled from 3.6 through 3.10.
        if self.version.is_wordcode() {
            target / 2
        } else {
            target
        }
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.code)
    }
}

/// Builds a code object with test defaults; fields of interest get set
/// directly afterwards (all public).
pub fn code_object(
    version: Version,
    name: &str,
    code: Vec<u8>,
    consts: Vec<Constant>,
    names: Vec<&str>,
    varnames: Vec<&str>,
) -> CodeObject {
    CodeObject {
        version,
        argcount: 0,
        posonlyargcount: 0,
        kwonlyargcount: 0,
        nlocals: varnames.len() as u32,
        stacksize: 8,
        flags: 0,
        code,
        consts,
        names: names.into_iter().map(str::to_owned).collect(),
        varnames: varnames.into_iter().map(str::to_owned).collect(),
        freevars: Vec::new(),
        cellvars: Vec::new(),
        filename: "test.py".to_owned(),
        name: name.to_owned(),
        qualname: Some(name.to_owned()),
        firstlineno: 1,
        linetable: Vec::new(),
        exception_table: Vec::new(),
    }
}

/// Shorthand for a nested code constant.
pub fn code_const(code: CodeObject) -> Constant {
    Constant::Code(Arc::new(code))
}

/// Decompiles a hand-assembled module and returns the source text.
pub fn decompiled(module: &CodeObject) -> String {
    unpyc::decompile_code(module.version, module).source
}
