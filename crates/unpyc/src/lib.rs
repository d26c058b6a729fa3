//! unpyc reconstructs Python source text from compiled bytecode.
//!
//! The pipeline: a marshal reader lifts a .pyc buffer into typed code
//! objects, a decoder streams version-correct instructions, a stack
//! simulator folds them back into expression trees, control-flow recovery
//! lifts jumps into statements, and a deterministic printer emits source.
//! Every released interpreter from 1.0 through 3.14 has an opcode table.
//!
//! ```no_run
//! let data = std::fs::read("module.pyc").unwrap();
//! let result = unpyc::decompile(&data).unwrap();
//! print!("{}", result.source);
//! ```

mod ast;
mod bigint;
mod cfg;
mod code;
mod codegen;
mod decode;
mod decompile;
mod disasm;
mod errors;
mod marshal;
mod opcodes;
mod operators;
mod recover;
mod simulate;
mod version;

pub use crate::{
    ast::{Arg, Arguments, Comprehension, ExceptHandler, Expr, ExprContext, Keyword, Pattern, Stmt, WithItem},
    bigint::BigInt,
    cfg::{build_graph, BasicBlock, BlockGraph, EdgeKind},
    code::{flags, CodeObject, Constant, ExceptionTableEntry},
    codegen::{generate_expr, generate_module},
    decode::{decode_all, Decoder, Instruction},
    decompile::{all_code_objects, decompile, decompile_code, Decompilation},
    disasm::disassemble,
    errors::{DecompileError, Diagnostic, LoadError, LoadResult},
    marshal::{parse_marshal, parse_pyc, PycFile},
    opcodes::{byte_to_opcode, opcode_to_byte, table, Opcode, Table},
    operators::{binary_op_kind, compare_op, compare_op_arg, BinOp, BinaryOpKind, BoolOp, CmpOp, UnaryOp},
    version::{magic_to_version, Version, SUPPORTED},
};
