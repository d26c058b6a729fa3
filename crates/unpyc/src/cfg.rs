//! Basic-block graph construction.
//!
//! Splits a decoded instruction stream at jump targets, post-branch
//! positions and exception-region boundaries, then annotates blocks with
//! loop-header and handler flags plus typed edges. Control-flow recovery
//! consults the graph for loop extents; the CLI dumps it as JSON.

use ahash::AHashMap;

use crate::code::CodeObject;
use crate::decode::{decode_all, Instruction};
use crate::errors::LoadResult;
use crate::opcodes::Opcode;
use crate::version::Version;

/// How control reaches a successor block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    FallThrough,
    Taken,
    NotTaken,
    Exception,
}

/// A maximal straight-line instruction run with at most one terminator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BasicBlock {
    /// Byte offset of the first instruction (inclusive).
    pub start: u32,
    /// Byte offset just past the last instruction (exclusive).
    pub end: u32,
    /// Target of at least one backward jump.
    pub is_loop_header: bool,
    /// Entry point of an exception-table handler (3.11+) or a SETUP_*
    /// handler target (earlier).
    pub is_exception_handler: bool,
    /// Successor start offsets with their edge kinds.
    pub successors: Vec<(u32, EdgeKind)>,
}

/// The per-code-object graph.
#[derive(Debug, serde::Serialize)]
pub struct BlockGraph {
    pub blocks: Vec<BasicBlock>,
    /// Loop header offset -> end offset (just past the latest backward
    /// jump that targets the header).
    #[serde(skip)]
    pub loop_ends: AHashMap<u32, u32>,
}

impl BlockGraph {
    #[must_use]
    pub fn block_at(&self, offset: u32) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.start == offset)
    }

    #[must_use]
    pub fn is_loop_header(&self, offset: u32) -> bool {
        self.loop_ends.contains_key(&offset)
    }

    /// End offset of the loop headed at `offset`.
    #[must_use]
    pub fn loop_end(&self, offset: u32) -> Option<u32> {
        self.loop_ends.get(&offset).copied()
    }
}

/// Builds the graph for one code object.
pub fn build_graph(version: Version, code: &CodeObject) -> LoadResult<BlockGraph> {
    let instructions = decode_all(version, &code.code)?;
    Ok(build_graph_from(version, code, &instructions))
}

/// Graph construction over pre-decoded instructions.
#[must_use]
pub fn build_graph_from(version: Version, code: &CodeObject, instructions: &[Instruction]) -> BlockGraph {
    let mut boundaries: Vec<u32> = vec![0];
    let mut loop_ends: AHashMap<u32, u32> = AHashMap::new();
    let mut handler_offsets: Vec<u32> = Vec::new();

    for insn in instructions {
        if let Some(target) = insn.jump_target(version) {
            boundaries.push(target);
            boundaries.push(insn.next_offset());
            if target <= insn.offset {
                // Backward edge: the target heads a loop that extends to
                // just past this jump.
                let end = loop_ends.entry(target).or_insert(0);
                *end = (*end).max(insn.next_offset());
            }
        }
        if insn.opcode.is_terminal() {
            boundaries.push(insn.next_offset());
        }
    }
    for entry in &code.exception_table {
        boundaries.push(entry.start);
        boundaries.push(entry.end);
        boundaries.push(entry.target);
        handler_offsets.push(entry.target);
    }

    let code_end = instructions.last().map_or(0, Instruction::next_offset);
    boundaries.retain(|&offset| offset < code_end);
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut blocks = Vec::with_capacity(boundaries.len());
    for (index, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(index + 1).copied().unwrap_or(code_end);
        let last = instructions
            .iter()
            .take_while(|insn| insn.offset < end)
            .last()
            .filter(|insn| insn.offset >= start);

        let mut successors = Vec::new();
        if let Some(last) = last {
            if let Some(target) = last.jump_target(version) {
                if last.opcode.is_conditional_jump() || matches!(last.opcode, Opcode::ForIter | Opcode::ForLoop | Opcode::Send)
                {
                    successors.push((target, EdgeKind::Taken));
                    successors.push((last.next_offset(), EdgeKind::NotTaken));
                } else if last.opcode.is_unconditional_jump() {
                    successors.push((target, EdgeKind::Taken));
                } else {
                    // SETUP_* region openers fall through.
                    successors.push((last.next_offset(), EdgeKind::FallThrough));
                }
            } else if !last.opcode.is_terminal() && last.next_offset() < code_end {
                successors.push((last.next_offset(), EdgeKind::FallThrough));
            }
        }
        for entry in &code.exception_table {
            if entry.start < end && entry.end > start {
                successors.push((entry.target, EdgeKind::Exception));
            }
        }

        blocks.push(BasicBlock {
            start,
            end,
            is_loop_header: loop_ends.contains_key(&start),
            is_exception_handler: handler_offsets.contains(&start),
            successors,
        });
    }

    BlockGraph { blocks, loop_ends }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::opcode_to_byte;
    use crate::version::Version;

    const V310: Version = Version::new(3, 10);

    fn code_with(bytes: Vec<u8>) -> CodeObject {
        CodeObject {
            version: V310,
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 0,
            flags: 0,
            code: bytes,
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

    fn byte(op: Opcode) -> u8 {
        opcode_to_byte(V310, op).unwrap()
    }

    #[test]
    fn branch_splits_blocks_with_edge_kinds() {
        // 0: LOAD_NAME 0; 2: POP_JUMP_IF_FALSE -> 8; 4: LOAD_CONST 0;
        // 6: POP_TOP; 8: LOAD_CONST 1; 10: RETURN_VALUE
        let code = code_with(vec![
            byte(Opcode::LoadName), 0,
            byte(Opcode::PopJumpIfFalse), 4, // absolute, word-scaled: 8
            byte(Opcode::LoadConst), 0,
            byte(Opcode::PopTop), 0,
            byte(Opcode::LoadConst), 1,
            byte(Opcode::ReturnValue), 0,
        ]);
        let graph = build_graph(V310, &code).unwrap();
        assert_eq!(graph.blocks.len(), 3);
        let first = &graph.blocks[0];
        assert_eq!((first.start, first.end), (0, 4));
        assert!(first.successors.contains(&(8, EdgeKind::Taken)));
        assert!(first.successors.contains(&(4, EdgeKind::NotTaken)));
        // The return block has no successors.
        assert!(graph.blocks[2].successors.is_empty());
    }

    #[test]
    fn backward_jump_marks_loop_header() {
        // 0: NOP; 2: JUMP_ABSOLUTE -> 0
        let code = code_with(vec![
            byte(Opcode::Nop), 0,
            byte(Opcode::JumpAbsolute), 0,
        ]);
        let graph = build_graph(V310, &code).unwrap();
        assert!(graph.is_loop_header(0));
        assert_eq!(graph.loop_end(0), Some(4));
        assert!(graph.block_at(0).unwrap().is_loop_header);
    }
}
