//! Instruction decoding: raw bytecode to `(opcode, arg, offset, size)`.
//!
//! Two encodings exist. Before 3.6 an opcode is one byte, followed by a
//! little-endian 16-bit operand when the byte is at or above HAVE_ARGUMENT.
//! From 3.6 on every instruction is a two-byte word with an 8-bit operand,
//! and from 3.11 on some opcodes are followed by inline cache words that
//! must be skipped. EXTENDED_ARG prefixes widen the next operand in both
//! eras and are absorbed here, never yielded.
//!
//! The decoder is the sole authority for instruction size and cache count;
//! nothing downstream recomputes them.

use crate::errors::{LoadError, LoadResult};
use crate::opcodes::{self, Opcode, Table};
use crate::version::Version;

/// One decoded instruction.
///
/// `offset` points at the first byte of the instruction including any
/// EXTENDED_ARG prefixes; `size` covers the prefixes and the operand, so
/// `offset + size + cache_bytes` is the next instruction's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub arg: u32,
    pub offset: u32,
    pub size: u8,
    pub cache_bytes: u8,
}

impl Instruction {
    /// Offset of the instruction that follows this one.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + u32::from(self.size) + u32::from(self.cache_bytes)
    }

    /// Resolves this instruction's jump target to a byte offset.
    ///
    /// Encodings differ by era: pre-3.6 relative operands count bytes from
    /// the next instruction and absolute operands are byte offsets; 3.6+
    /// operands count words. Backward jumps (3.11+) count words back.
    #[must_use]
    pub fn jump_target(&self, version: Version) -> Option<u32> {
        if !(self.opcode.is_jump()
            || matches!(
                self.opcode,
                Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith | Opcode::SetupAsyncWith
            ))
        {
            return None;
        }
        let base = self.next_offset();
        if self.opcode.is_backward_jump() {
            return base.checked_sub(self.arg * 2);
        }
        if self.opcode.is_relative_jump(version) {
            let delta = if version.is_wordcode() { self.arg * 2 } else { self.arg };
            Some(base + delta)
        } else {
            // Absolute: word-scaled from 3.6 through 3.10, bytes before.
            let scale = if version.is_wordcode() { 2 } else { 1 };
            Some(self.arg * scale)
        }
    }
}

/// Restartable forward iterator over one code object's bytecode.
///
/// Yields until the buffer ends; a truncated trailing instruction is
/// reported once through `log` and ends the stream.
pub struct Decoder<'a> {
    table: &'static Table,
    version: Version,
    code: &'a [u8],
    pos: usize,
    truncated: bool,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder for `version`.
    ///
    /// # Errors
    ///
    /// `LoadError::UnsupportedTable` when no opcode table exists for the
    /// version (the only fatal decoding error; unknown bytes merely decode
    /// as `INVALID`).
    pub fn new(version: Version, code: &'a [u8]) -> LoadResult<Self> {
        let table = opcodes::table(version).ok_or(LoadError::UnsupportedTable(version))?;
        Ok(Self {
            table,
            version,
            code,
            pos: 0,
            truncated: false,
        })
    }

    fn truncate(&mut self) -> Option<Instruction> {
        if !self.truncated {
            self.truncated = true;
            log::warn!("bytecode truncated at offset {} of {}", self.pos, self.code.len());
        }
        self.pos = self.code.len();
        None
    }

    fn next_wordcode(&mut self) -> Option<Instruction> {
        let start = self.pos;
        let mut arg: u32 = 0;
        loop {
            let byte = *self.code.get(self.pos)?;
            let Some(&operand) = self.code.get(self.pos + 1) else {
                return self.truncate();
            };
            self.pos += 2;
            match self.table.opcode(byte) {
                Some(Opcode::ExtendedArg) => {
                    arg = (arg | u32::from(operand)).wrapping_shl(8);
                    // A prefix with nothing after it is a truncated stream.
                    if self.pos >= self.code.len() {
                        return self.truncate();
                    }
                }
                Some(op) => {
                    arg |= u32::from(operand);
                    let cache_bytes = self.table.cache_words(op) * 2;
                    let available = self.code.len() - self.pos;
                    let cache_bytes = if usize::from(cache_bytes) <= available {
                        cache_bytes
                    } else {
                        // Caches past the end: consume what exists.
                        log::warn!("inline caches truncated at offset {}", self.pos);
                        available as u8
                    };
                    self.pos += usize::from(cache_bytes);
                    return Some(Instruction {
                        opcode: op,
                        arg,
                        offset: start as u32,
                        size: (self.pos - start - usize::from(cache_bytes)) as u8,
                        cache_bytes,
                    });
                }
                None => {
                    return Some(Instruction {
                        opcode: Opcode::Invalid,
                        arg: u32::from(operand),
                        offset: start as u32,
                        size: 2,
                        cache_bytes: 0,
                    });
                }
            }
        }
    }

    fn next_bytecode(&mut self) -> Option<Instruction> {
        let start = self.pos;
        let mut arg: u32 = 0;
        loop {
            let byte = *self.code.get(self.pos)?;
            self.pos += 1;
            let Some(op) = self.table.opcode(byte) else {
                return Some(Instruction {
                    opcode: Opcode::Invalid,
                    arg: 0,
                    offset: start as u32,
                    size: 1,
                    cache_bytes: 0,
                });
            };
            if byte < self.table.have_argument() {
                return Some(Instruction {
                    opcode: op,
                    arg: 0,
                    offset: start as u32,
                    size: (self.pos - start) as u8,
                    cache_bytes: 0,
                });
            }
            let Some(bytes) = self.code.get(self.pos..self.pos + 2) else {
                return self.truncate();
            };
            let operand = u32::from(u16::from_le_bytes([bytes[0], bytes[1]]));
            self.pos += 2;
            if op == Opcode::ExtendedArg {
                arg = (arg | operand).wrapping_shl(16);
                if self.pos >= self.code.len() {
                    return self.truncate();
                }
                continue;
            }
            return Some(Instruction {
                opcode: op,
                arg: arg | operand,
                offset: start as u32,
                size: (self.pos - start) as u8,
                cache_bytes: 0,
            });
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        if self.version.is_wordcode() {
            self.next_wordcode()
        } else {
            self.next_bytecode()
        }
    }
}

/// Decodes a whole buffer into a vector.
pub fn decode_all(version: Version, code: &[u8]) -> LoadResult<Vec<Instruction>> {
    Ok(Decoder::new(version, code)?.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::opcode_to_byte;

    const V27: Version = Version::new(2, 7);
    const V310: Version = Version::new(3, 10);
    const V312: Version = Version::new(3, 12);

    fn byte(version: Version, op: Opcode) -> u8 {
        opcode_to_byte(version, op).unwrap_or_else(|| panic!("{op} missing in {version}"))
    }

    #[test]
    fn pre36_widths() {
        // POP_TOP (no arg), LOAD_CONST 7 (3 bytes).
        let code = [byte(V27, Opcode::PopTop), byte(V27, Opcode::LoadConst), 7, 0];
        let decoded = decode_all(V27, &code).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], Instruction { opcode: Opcode::PopTop, arg: 0, offset: 0, size: 1, cache_bytes: 0 });
        assert_eq!(decoded[1], Instruction { opcode: Opcode::LoadConst, arg: 7, offset: 1, size: 3, cache_bytes: 0 });
    }

    #[test]
    fn pre36_extended_arg_widens_operand() {
        let ext = byte(V27, Opcode::ExtendedArg);
        let load = byte(V27, Opcode::LoadConst);
        let code = [ext, 1, 0, load, 3, 0];
        let decoded = decode_all(V27, &code).unwrap();
        assert_eq!(decoded.len(), 1);
        let insn = decoded[0];
        assert_eq!(insn.opcode, Opcode::LoadConst);
        assert_eq!(insn.arg, (1 << 16) | 3);
        assert_eq!(insn.offset, 0);
        assert_eq!(insn.size, 6);
    }

    #[test]
    fn wordcode_extended_arg_chains() {
        let ext = byte(V310, Opcode::ExtendedArg);
        let load = byte(V310, Opcode::LoadConst);
        let code = [ext, 1, ext, 2, load, 3];
        let decoded = decode_all(V310, &code).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].arg, 0x0001_0203);
        assert_eq!(decoded[0].size, 6);
    }

    #[test]
    fn wordcode_widths_and_extended_arg() {
        let ext = byte(V310, Opcode::ExtendedArg);
        let load = byte(V310, Opcode::LoadConst);
        let code = [ext, 0x01, load, 0x02];
        let decoded = decode_all(V310, &code).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].arg, 0x102);
        assert_eq!(decoded[0].size, 4);
        assert_eq!(decoded[0].next_offset(), 4);
    }

    #[test]
    fn inline_caches_are_skipped() {
        // 3.12: BINARY_OP carries one cache word.
        let binop = byte(V312, Opcode::BinaryOp);
        let pop = byte(V312, Opcode::PopTop);
        let code = [binop, 0, 0xFF, 0xFF, pop, 0];
        let decoded = decode_all(V312, &code).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].opcode, Opcode::BinaryOp);
        assert_eq!(decoded[0].cache_bytes, 2);
        assert_eq!(decoded[0].next_offset(), 4);
        assert_eq!(decoded[1].opcode, Opcode::PopTop);
        assert_eq!(decoded[1].offset, 4);
    }

    #[test]
    fn unknown_byte_is_invalid_and_advances() {
        // Byte 6 is a gap in 3.0.
        let v30 = Version::new(3, 0);
        let code = [6, byte(v30, Opcode::PopTop)];
        let decoded = decode_all(v30, &code).unwrap();
        assert_eq!(decoded[0].opcode, Opcode::Invalid);
        assert_eq!(decoded[0].size, 1);
        assert_eq!(decoded[1].opcode, Opcode::PopTop);
    }

    #[test]
    fn truncated_operand_ends_stream() {
        let code = [byte(V27, Opcode::LoadConst), 7];
        let decoded = decode_all(V27, &code).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn jump_target_resolution() {
        // 3.10 absolute jump: operand counts words.
        let insn = Instruction { opcode: Opcode::JumpAbsolute, arg: 5, offset: 20, size: 2, cache_bytes: 0 };
        assert_eq!(insn.jump_target(V310), Some(10));
        // 3.10 forward relative.
        let insn = Instruction { opcode: Opcode::JumpForward, arg: 3, offset: 10, size: 2, cache_bytes: 0 };
        assert_eq!(insn.jump_target(V310), Some(18));
        // 3.12 backward.
        let insn = Instruction { opcode: Opcode::JumpBackward, arg: 4, offset: 30, size: 2, cache_bytes: 2 };
        assert_eq!(insn.jump_target(V312), Some(26));
        // 2.7 relative in byte units.
        let insn = Instruction { opcode: Opcode::JumpForward, arg: 6, offset: 0, size: 3, cache_bytes: 0 };
        assert_eq!(insn.jump_target(V27), Some(9));
        // Non-jumps resolve to nothing.
        let insn = Instruction { opcode: Opcode::PopTop, arg: 0, offset: 0, size: 2, cache_bytes: 0 };
        assert_eq!(insn.jump_target(V310), None);
    }
}
