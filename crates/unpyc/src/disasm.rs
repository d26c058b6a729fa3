//! Disassembly listing, the `--disasm` collaborator.
//!
//! One line per instruction: offset, canonical opcode name, raw operand,
//! and a resolved operand (constant repr, name, jump target) where that
//! is cheap to compute. Nested code objects list after their parent.

use std::fmt::Write;

use crate::code::{CodeObject, Constant};
use crate::codegen::generate_expr;
use crate::ast::Expr;
use crate::decode::Decoder;
use crate::errors::LoadResult;
use crate::opcodes::Opcode;
use crate::version::Version;

/// Disassembles a code object and everything nested inside it.
pub fn disassemble(version: Version, code: &CodeObject) -> LoadResult<String> {
    let mut out = String::new();
    disassemble_into(version, code, &mut out)?;
    Ok(out)
}

fn disassemble_into(version: Version, code: &CodeObject, out: &mut String) -> LoadResult<()> {
    let _ = writeln!(out, "-- {} ({}:{})", code.name, code.filename, code.firstlineno);
    for insn in Decoder::new(version, &code.code)? {
        let _ = write!(out, "{:>6}  {:<24}", insn.offset, insn.opcode.to_string());
        if insn.opcode == Opcode::Invalid {
            let _ = writeln!(out, "(invalid byte)");
            continue;
        }
        let has_arg = crate::opcodes::table(version)
            .and_then(|table| table.has_arg(insn.opcode))
            .unwrap_or(false);
        if has_arg {
            let _ = write!(out, "{:>6}", insn.arg);
            if let Some(resolved) = resolve_operand(version, code, insn.opcode, insn.arg, insn.jump_target(version)) {
                let _ = write!(out, "  ({resolved})");
            }
        }
        let _ = writeln!(out);
    }
    for constant in &code.consts {
        if let Constant::Code(nested) = constant {
            let _ = writeln!(out);
            disassemble_into(version, nested, out)?;
        }
    }
    Ok(())
}

fn resolve_operand(
    version: Version,
    code: &CodeObject,
    opcode: Opcode,
    arg: u32,
    jump_target: Option<u32>,
) -> Option<String> {
    use Opcode as Op;
    if let Some(target) = jump_target {
        return Some(format!("to {target}"));
    }
    match opcode {
        Op::LoadConst | Op::ReturnConst => {
            let constant = code.constant(arg)?;
            Some(constant_repr(constant))
        }
        Op::LoadName | Op::StoreName | Op::DeleteName | Op::ImportName | Op::ImportFrom | Op::LoadAttr
        | Op::StoreAttr | Op::DeleteAttr | Op::LoadMethod | Op::StoreGlobal | Op::DeleteGlobal => {
            let index = if opcode == Op::LoadAttr && version >= Version::new(3, 12) {
                arg >> 1
            } else {
                arg
            };
            code.name(index).map(str::to_owned)
        }
        Op::LoadGlobal => {
            let index = if version >= Version::new(3, 11) { arg >> 1 } else { arg };
            code.name(index).map(str::to_owned)
        }
        Op::LoadFast | Op::StoreFast | Op::DeleteFast | Op::LoadFastAndClear | Op::LoadFastCheck | Op::LoadFastBorrow => {
            code.varname(arg).map(str::to_owned)
        }
        Op::LoadDeref | Op::StoreDeref | Op::DeleteDeref | Op::LoadClosure => code.derefname(arg).map(str::to_owned),
        _ => None,
    }
}

fn constant_repr(constant: &Constant) -> String {
    match constant {
        Constant::Code(code) => format!("{code}"),
        other => generate_expr(&Expr::Constant(other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::opcode_to_byte;

    #[test]
    fn listing_shows_names_and_targets() {
        let version = Version::new(3, 10);
        let code = CodeObject {
            version,
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 1,
            flags: 0,
            code: vec![
                opcode_to_byte(version, Opcode::LoadName).unwrap(), 0,
                opcode_to_byte(version, Opcode::PopJumpIfFalse).unwrap(), 3,
                opcode_to_byte(version, Opcode::LoadConst).unwrap(), 0,
                opcode_to_byte(version, Opcode::ReturnValue).unwrap(), 0,
            ],
            consts: vec![Constant::Int(7)],
            names: vec!["flag".to_owned()],
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            filename: "demo.py".to_owned(),
            name: "<module>".to_owned(),
            qualname: None,
            firstlineno: 1,
            linetable: Vec::new(),
            exception_table: Vec::new(),
        };
        let listing = disassemble(version, &code).unwrap();
        assert!(listing.contains("LOAD_NAME"), "{listing}");
        assert!(listing.contains("(flag)"), "{listing}");
        assert!(listing.contains("(to 6)"), "{listing}");
        assert!(listing.contains("(7)"), "{listing}");
    }
}
