//! The value-stack simulator.
//!
//! Replays straight-line instruction runs against an abstract stack whose
//! cells hold expression subtrees instead of values, so each instruction
//! folds its operands into a larger tree. Statement-producing opcodes
//! (stores, prints, returns) append to a statement list as they retire.
//!
//! Control flow never reaches this module: jumps, loops and exception
//! regions belong to control-flow recovery, which drives the simulator
//! over one basic-block run at a time and owns everything between runs.

use std::sync::Arc;

use crate::ast::{Alias, Arg, Arguments, Expr, ExprContext, Keyword, Stmt};
use crate::code::{CodeObject, Constant};
use crate::decode::Instruction;
use crate::errors::{DecompileError, DecompileResult, Diagnostic};
use crate::opcodes::Opcode;
use crate::operators::{binary_op_kind, compare_op, BinOp, BinaryOpKind, CmpOp, UnaryOp};
use crate::version::Version;

/// Everything a simulation needs to know about its surroundings.
pub(crate) struct Ctx<'a> {
    pub version: Version,
    pub code: &'a CodeObject,
}

impl Ctx<'_> {
    fn v(&self) -> Version {
        self.version
    }
}

/// One abstract stack cell.
///
/// Most cells are plain expressions; the rest model interpreter artifacts
/// (the PUSH_NULL marker, saved locals around inlined comprehensions) or
/// deferred constructions (functions and classes accumulate decorators
/// before their STORE retires them).
#[derive(Debug, Clone)]
pub(crate) enum Cell {
    Expr(Expr),
    /// PUSH_NULL marker consumed by CALL.
    Null,
    /// LOAD_FAST_AND_CLEAR's stashed previous binding; restored by the
    /// STORE at the end of an inlined comprehension.
    SavedLocal(String),
    /// A raw code constant, before MAKE_FUNCTION claims it.
    Code(Arc<CodeObject>),
    /// A made function that has not been stored or called yet.
    Function(Box<FunctionCell>),
    /// A `__build_class__` result awaiting its STORE.
    Class(Box<ClassCell>),
    /// LOAD_BUILD_CLASS marker.
    BuildClass,
    /// An in-place binary result; STORE turns it into an AugAssign.
    Inplace { op: BinOp, left: Expr, right: Expr },
    /// IMPORT_NAME result; STORE or IMPORT_FROM decide the statement.
    Import(Box<ImportCell>),
    /// One name pulled out of a module by IMPORT_FROM.
    ImportedName { name: String },
    /// A slot of an UNPACK_SEQUENCE/UNPACK_EX in progress.
    Unpack { group: usize, slot: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionCell {
    pub code: Arc<CodeObject>,
    pub defaults: Vec<Expr>,
    pub kw_defaults: Vec<(String, Expr)>,
    pub annotations: Vec<(String, Expr)>,
    pub decorators: Vec<Expr>,
    /// Reconstructed body; filled lazily by recovery when the cell
    /// retires into a def statement.
    pub body: Option<Vec<Stmt>>,
}

#[derive(Debug, Clone)]
pub(crate) struct ClassCell {
    pub name: String,
    pub body_code: Arc<CodeObject>,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub decorators: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub(crate) struct ImportCell {
    pub module: String,
    pub level: u32,
    pub fromlist: Vec<String>,
    /// Aliases collected by IMPORT_FROM stores before the module is
    /// popped.
    pub collected: Vec<Alias>,
}

/// A pending tuple-unpacking assignment.
#[derive(Debug, Clone)]
struct UnpackGroup {
    value: Expr,
    targets: Vec<Option<Expr>>,
    /// Index of the `*rest` slot for UNPACK_EX, if any.
    star: Option<usize>,
    filled: usize,
}

pub(crate) struct Simulator<'a> {
    ctx: &'a Ctx<'a>,
    pub stack: Vec<Cell>,
    pub stmts: Vec<Stmt>,
    pub diags: Vec<Diagnostic>,
    unpacks: Vec<UnpackGroup>,
    /// KW_NAMES payload awaiting the next CALL (3.11/3.12).
    pending_kwnames: Vec<String>,
    /// Names assigned through STORE_GLOBAL, for `global` declarations.
    pub global_names: Vec<String>,
    /// Names assigned through STORE_DEREF into free slots (`nonlocal`).
    pub nonlocal_names: Vec<String>,
    /// Expression substituted for the hidden `.0` argument of a
    /// comprehension code object.
    pub substitute_first_local: Option<Expr>,
}

impl<'a> Simulator<'a> {
    pub fn new(ctx: &'a Ctx<'a>) -> Self {
        Self {
            ctx,
            stack: Vec::new(),
            stmts: Vec::new(),
            diags: Vec::new(),
            unpacks: Vec::new(),
            pending_kwnames: Vec::new(),
            global_names: Vec::new(),
            nonlocal_names: Vec::new(),
            substitute_first_local: None,
        }
    }

    /// A speculative copy sharing the stack but with a clean statement
    /// list; used to test whether a range is a pure expression run.
    pub fn fork(&self) -> Simulator<'a> {
        Simulator {
            ctx: self.ctx,
            stack: self.stack.clone(),
            stmts: Vec::new(),
            diags: Vec::new(),
            unpacks: self.unpacks.clone(),
            pending_kwnames: self.pending_kwnames.clone(),
            global_names: self.global_names.clone(),
            nonlocal_names: self.nonlocal_names.clone(),
            substitute_first_local: self.substitute_first_local.clone(),
        }
    }

    /// Adopts a committed fork's state after a speculative run succeeds.
    pub fn adopt(&mut self, fork: Simulator<'a>) {
        self.stack = fork.stack;
        self.unpacks = fork.unpacks;
        self.pending_kwnames = fork.pending_kwnames;
        self.global_names = fork.global_names;
        self.nonlocal_names = fork.nonlocal_names;
        self.diags.extend(fork.diags);
    }

    fn diag(&mut self, offset: u32, message: impl Into<String>) {
        self.diags.push(Diagnostic::new(offset, message));
    }

    pub fn push(&mut self, cell: Cell) {
        self.stack.push(cell);
    }

    pub fn push_expr(&mut self, expr: Expr) {
        self.stack.push(Cell::Expr(expr));
    }

    pub fn pop(&mut self, offset: u32) -> DecompileResult<Cell> {
        self.stack.pop().ok_or(DecompileError::StackUnderflow { offset })
    }

    /// Pops a cell that must be usable as an expression.
    pub fn pop_expr(&mut self, offset: u32) -> DecompileResult<Expr> {
        let cell = self.pop(offset)?;
        self.cell_to_expr(cell, offset)
    }

    /// Converts a retiring cell to an expression where a meaning exists.
    fn cell_to_expr(&mut self, cell: Cell, offset: u32) -> DecompileResult<Expr> {
        match cell {
            Cell::Expr(expr) => Ok(expr),
            Cell::Inplace { op, left, right } => Ok(Expr::binary(op, left, right)),
            Cell::Function(function) => Ok(self.function_to_expr(*function, offset)),
            Cell::ImportedName { name } => Ok(Expr::name(name)),
            Cell::Import(import) => Ok(Expr::name(import.module)),
            Cell::Null | Cell::SavedLocal(_) | Cell::Code(_) | Cell::Class(_) | Cell::BuildClass | Cell::Unpack { .. } => {
                Err(DecompileError::NotAnExpression { offset })
            }
        }
    }

    /// A function cell consumed in expression position: lambdas print
    /// inline, anything else degrades to its short name.
    fn function_to_expr(&mut self, function: FunctionCell, offset: u32) -> Expr {
        if function.code.is_lambda() {
            return self.lambda_expr(function, offset);
        }
        Expr::name(function.code.name.clone())
    }

    /// Name-table lookups degrade to placeholders instead of failing;
    /// out-of-range operands are surfaced as diagnostics, not errors.
    fn name(&mut self, insn: &Instruction) -> String {
        match self.ctx.code.name(insn.arg) {
            Some(name) => name.to_owned(),
            None => {
                self.diag(insn.offset, format!("name index {} out of range", insn.arg));
                format!("<name_{}>", insn.arg)
            }
        }
    }

    fn varname(&mut self, insn: &Instruction, slot: u32) -> String {
        match self.ctx.code.varname(slot) {
            Some(name) => name.to_owned(),
            None => {
                self.diag(insn.offset, format!("local slot {slot} out of range"));
                format!("<local_{slot}>")
            }
        }
    }

    fn derefname(&mut self, insn: &Instruction) -> String {
        match self.ctx.code.derefname(insn.arg) {
            Some(name) => name.to_owned(),
            None => {
                self.diag(insn.offset, format!("deref slot {} out of range", insn.arg));
                format!("<deref_{}>", insn.arg)
            }
        }
    }

    fn constant(&mut self, insn: &Instruction) -> Cell {
        match self.ctx.code.constant(insn.arg) {
            Some(Constant::Code(code)) => Cell::Code(Arc::clone(code)),
            Some(constant) => Cell::Expr(Expr::Constant(constant.clone())),
            None => {
                self.diag(insn.offset, format!("constant index {} out of range", insn.arg));
                Cell::Expr(Expr::Placeholder(format!("const_{}", insn.arg)))
            }
        }
    }

    fn pop_many(&mut self, count: usize, offset: u32) -> DecompileResult<Vec<Expr>> {
        let mut exprs = Vec::with_capacity(count);
        for _ in 0..count {
            exprs.push(self.pop_expr(offset)?);
        }
        exprs.reverse();
        Ok(exprs)
    }

    /// Pops `count` raw cells, preserving function/class cells that a
    /// CALL may need to inspect (class bodies, decorator application).
    fn pop_cells(&mut self, count: usize, offset: u32) -> DecompileResult<Vec<Cell>> {
        let mut cells = Vec::with_capacity(count);
        for _ in 0..count {
            cells.push(self.pop(offset)?);
        }
        cells.reverse();
        Ok(cells)
    }

    fn emit(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    /// Retires a store of `value_cell` into `target`.
    fn store(&mut self, target: Expr, offset: u32) -> DecompileResult<()> {
        let cell = self.pop(offset)?;
        match cell {
            Cell::SavedLocal(_) => {
                // Restoring the stashed binding after an inlined
                // comprehension; invisible in source.
                Ok(())
            }
            Cell::Function(function) => {
                // Lambdas and comprehension bodies assign as expressions;
                // named functions become def statements.
                if function.code.is_lambda() || function.code.is_comprehension() {
                    let value = self.function_to_expr(*function, offset);
                    self.emit(Stmt::assign(target, value));
                    return Ok(());
                }
                let name = match &target {
                    Expr::Name { id, .. } => id.clone(),
                    _ => function.code.name.clone(),
                };
                let stmt = self.function_def(name, *function);
                self.emit(stmt);
                Ok(())
            }
            Cell::Class(class) => {
                let name = match &target {
                    Expr::Name { id, .. } => id.clone(),
                    _ => class.name.clone(),
                };
                let stmt = self.class_def(name, *class);
                self.emit(stmt);
                Ok(())
            }
            Cell::Inplace { op, left, right } => {
                // `x += y` stores back into the same target it loaded.
                if left == target.clone_as_load() {
                    self.emit(Stmt::AugAssign { target, op, value: right });
                } else {
                    self.emit(Stmt::assign(target, Expr::binary(op, left, right)));
                }
                Ok(())
            }
            Cell::Import(import) => {
                let import = *import;
                if import.collected.is_empty() {
                    let asname = match &target {
                        Expr::Name { id, .. } if *id != import.module && !import.module.starts_with(&format!("{id}.")) => {
                            // `import a.b as c` binds c; plain `import a.b`
                            // binds the root name a.
                            if import.module.split('.').next() == Some(id.as_str()) {
                                None
                            } else {
                                Some(id.clone())
                            }
                        }
                        _ => None,
                    };
                    self.emit(Stmt::Import(vec![Alias {
                        name: import.module,
                        asname,
                    }]));
                } else {
                    self.emit(Stmt::ImportFrom {
                        module: if import.module.is_empty() { None } else { Some(import.module) },
                        names: import.collected,
                        level: import.level,
                    });
                }
                Ok(())
            }
            Cell::ImportedName { name } => {
                // `from m import name [as target]`: record on the module
                // cell still sitting underneath.
                let asname = match &target {
                    Expr::Name { id, .. } if *id != name => Some(id.clone()),
                    _ => None,
                };
                if let Some(Cell::Import(import)) = self.stack.last_mut() {
                    import.collected.push(Alias { name, asname });
                    Ok(())
                } else {
                    self.emit(Stmt::assign(target, Expr::name(name)));
                    Ok(())
                }
            }
            Cell::Unpack { group, slot } => self.fill_unpack(group, slot, target),
            other => {
                let value = self.cell_to_expr(other, offset)?;
                self.emit(Stmt::assign(target, value));
                Ok(())
            }
        }
    }

    fn fill_unpack(&mut self, group: usize, slot: usize, target: Expr) -> DecompileResult<()> {
        let Some(unpack) = self.unpacks.get_mut(group) else {
            self.emit(Stmt::assign(target, Expr::Placeholder("unpack".to_owned())));
            return Ok(());
        };
        let target = match unpack.star {
            Some(star) if star == slot => Expr::Starred(Box::new(target), ExprContext::Store),
            _ => target,
        };
        unpack.targets[slot] = Some(target);
        unpack.filled += 1;
        if unpack.filled == unpack.targets.len() {
            let unpack = self.unpacks[group].clone();
            let targets: Vec<Expr> = unpack
                .targets
                .into_iter()
                .map(|t| t.unwrap_or(Expr::Placeholder("target".to_owned())))
                .collect();
            self.emit(Stmt::Assign {
                targets: vec![Expr::Tuple(targets)],
                value: unpack.value,
            });
        }
        Ok(())
    }

    pub fn function_def(&mut self, name: String, function: FunctionCell) -> Stmt {
        let returns = function
            .annotations
            .iter()
            .find(|(key, _)| key == "return")
            .map(|(_, expr)| expr.clone());
        let is_async = function.code.is_coroutine();
        let body = function
            .body
            .unwrap_or_else(|| crate::recover::reconstruct_body(self.ctx.version, &function.code));
        let args = build_arguments(&function.code, function.defaults, function.kw_defaults, &function.annotations);
        Stmt::FunctionDef {
            name,
            args: Box::new(args),
            body,
            decorator_list: function.decorators,
            returns,
            is_async,
        }
    }

    fn class_def(&mut self, name: String, class: ClassCell) -> Stmt {
        let body = crate::recover::reconstruct_class_body(self.ctx.version, &class.body_code);
        Stmt::ClassDef {
            name,
            bases: class.bases,
            keywords: class.keywords,
            body,
            decorator_list: class.decorators,
        }
    }

    /// Executes one straight-line instruction.
    ///
    /// Control-flow opcodes must not reach this function; recovery owns
    /// them. Unknown straight-line opcodes degrade to a diagnostic.
    #[allow(clippy::too_many_lines)]
    pub fn step(&mut self, insn: &Instruction) -> DecompileResult<()> {
        use Opcode as Op;
        let off = insn.offset;
        let version = self.ctx.v();
        match insn.opcode {
            // No-ops of every era. GEN_START's pop applies to the send
            // protocol's value, which the abstract stack never holds.
            Op::Nop | Op::Cache | Op::Resume | Op::NotTaken | Op::StopCode | Op::SetLineno | Op::SetupAnnotations
            | Op::PushExcInfo | Op::MakeCell | Op::CopyFreeVars | Op::InterpreterExit | Op::EnterExecutor
            | Op::GenStart => {}

            // Pushes the generator object in the interpreter; the
            // following POP_TOP discards it, so a None stands in.
            Op::ReturnGenerator => self.push_expr(Expr::none()),

            // Loads.
            Op::LoadConst => {
                let cell = self.constant(insn);
                self.push(cell);
            }
            // RETURN_CONST (3.12/3.13) fuses the load and the return.
            Op::ReturnConst => {
                let cell = self.constant(insn);
                let value = self.cell_to_expr(cell, off)?;
                let value = if value.is_none_constant() { None } else { Some(value) };
                self.emit(Stmt::Return(value));
            }
            Op::LoadSmallInt => self.push_expr(Expr::Constant(Constant::Int(i64::from(insn.arg as i32)))),
            Op::LoadCommonConstant => {
                let name = if insn.arg == 0 { "AssertionError" } else { "NotImplementedError" };
                self.push_expr(Expr::name(name));
            }
            Op::LoadName | Op::LoadLocals => {
                let expr = if insn.opcode == Op::LoadLocals {
                    Expr::call(Expr::name("locals"), Vec::new(), Vec::new())
                } else {
                    let name = self.name(insn);
                    Expr::name(name)
                };
                self.push_expr(expr);
            }
            Op::LoadGlobal => {
                // 3.11+ hides a PUSH_NULL in the low bit.
                let arg = insn.arg;
                let (index, with_null) = if version >= Version::new(3, 11) {
                    (arg >> 1, arg & 1 != 0)
                } else {
                    (arg, false)
                };
                let name = match self.ctx.code.name(index) {
                    Some(name) => name.to_owned(),
                    None => {
                        self.diag(off, format!("global index {index} out of range"));
                        format!("<global_{index}>")
                    }
                };
                // The null marker sits below the value through 3.12 and
                // above it from 3.13 on.
                if with_null && version < Version::new(3, 13) {
                    self.push(Cell::Null);
                }
                if name == "__build_class__" {
                    self.push(Cell::BuildClass);
                } else {
                    self.push_expr(Expr::name(name));
                }
                if with_null && version >= Version::new(3, 13) {
                    self.push(Cell::Null);
                }
            }
            Op::LoadFast | Op::LoadFastCheck | Op::LoadFastBorrow | Op::LoadLocal => {
                let name = self.varname(insn, insn.arg);
                // A comprehension's `.0` argument stands for the caller's
                // iterator expression.
                if name.starts_with('.') {
                    if let Some(iter) = self.substitute_first_local.clone() {
                        self.push_expr(iter);
                        return Ok(());
                    }
                }
                self.push_expr(Expr::name(name));
            }
            Op::LoadFastLoadFast | Op::LoadFastBorrowLoadFastBorrow => {
                let first = self.varname(insn, insn.arg >> 4);
                let second = self.varname(insn, insn.arg & 0xF);
                self.push_expr(Expr::name(first));
                self.push_expr(Expr::name(second));
            }
            Op::LoadFastAndClear => {
                let name = self.varname(insn, insn.arg);
                self.push(Cell::SavedLocal(name));
            }
            Op::LoadDeref | Op::LoadClassderef | Op::LoadFromDictOrDeref | Op::LoadClosure => {
                let name = self.derefname(insn);
                self.push_expr(Expr::name(name));
            }
            Op::LoadFromDictOrGlobals => {
                let name = self.name(insn);
                self.push_expr(Expr::name(name));
            }
            Op::LoadBuildClass => self.push(Cell::BuildClass),
            Op::LoadAssertionError => self.push_expr(Expr::name("AssertionError")),
            Op::LoadGlobals => self.push_expr(Expr::call(Expr::name("globals"), Vec::new(), Vec::new())),

            Op::LoadAttr | Op::LoadMethod => {
                // 3.12 folded LOAD_METHOD into LOAD_ATTR's low bit.
                let (index, method_form) = if insn.opcode == Op::LoadAttr && version >= Version::new(3, 12) {
                    (insn.arg >> 1, insn.arg & 1 != 0)
                } else {
                    (insn.arg, insn.opcode == Op::LoadMethod)
                };
                let attr = match self.ctx.code.name(index) {
                    Some(name) => name.to_owned(),
                    None => {
                        self.diag(off, format!("attribute index {index} out of range"));
                        format!("<attr_{index}>")
                    }
                };
                let object = self.pop_expr(off)?;
                if method_form && version < Version::new(3, 13) {
                    self.push(Cell::Null);
                }
                self.push_expr(Expr::attribute(object, attr));
                if method_form && version >= Version::new(3, 13) {
                    self.push(Cell::Null);
                }
            }
            Op::LoadSuperAttr => {
                // Stack: [super, class, self]; operand packs the name.
                let this = self.pop_expr(off)?;
                let _class = self.pop_expr(off)?;
                let _super = self.pop(off)?;
                let index = insn.arg >> 2;
                let attr = match self.ctx.code.name(index) {
                    Some(name) => name.to_owned(),
                    None => format!("<attr_{index}>"),
                };
                if insn.arg & 1 != 0 {
                    self.push(Cell::Null);
                }
                let _ = this;
                self.push_expr(Expr::attribute(
                    Expr::call(Expr::name("super"), Vec::new(), Vec::new()),
                    attr,
                ));
            }

            Op::PushNull => self.push(Cell::Null),

            // Stack shuffling.
            Op::PopTop | Op::PopIter => self.pop_discard(off)?,
            Op::DupTop => {
                let cell = self.pop(off)?;
                self.push(cell.clone());
                self.push(cell);
            }
            Op::DupTopTwo => {
                let b = self.pop(off)?;
                let a = self.pop(off)?;
                self.push(a.clone());
                self.push(b.clone());
                self.push(a);
                self.push(b);
            }
            Op::DupTopX => {
                let n = insn.arg as usize;
                if n == 0 || n > self.stack.len() {
                    return Err(DecompileError::InvalidDupArg { arg: insn.arg, offset: off });
                }
                let copies: Vec<Cell> = self.stack[self.stack.len() - n..].to_vec();
                self.stack.extend(copies);
            }
            Op::RotTwo => self.rot(2, off)?,
            Op::RotThree => self.rot(3, off)?,
            Op::RotFour => self.rot(4, off)?,
            Op::RotN => self.rot(insn.arg as usize, off)?,
            Op::Swap => {
                // 1-based: swap TOS with the cell `arg` below it.
                let n = insn.arg as usize;
                let len = self.stack.len();
                if n == 0 || n > len {
                    return Err(DecompileError::InvalidSwapArg { arg: insn.arg, offset: off });
                }
                self.stack.swap(len - 1, len - n);
            }
            Op::Copy => {
                let n = insn.arg as usize;
                let len = self.stack.len();
                if n == 0 || n > len {
                    return Err(DecompileError::InvalidDupArg { arg: insn.arg, offset: off });
                }
                let cell = self.stack[len - n].clone();
                self.push(cell);
            }

            // Unary operators.
            Op::UnaryPositive => self.unary(UnaryOp::UAdd, off)?,
            Op::UnaryNegative => self.unary(UnaryOp::USub, off)?,
            Op::UnaryNot => self.unary(UnaryOp::Not, off)?,
            Op::UnaryInvert => self.unary(UnaryOp::Invert, off)?,
            Op::UnaryConvert => {
                let operand = self.pop_expr(off)?;
                self.push_expr(Expr::call(Expr::name("repr"), vec![operand], Vec::new()));
            }
            Op::ToBool => {
                // Specialization artifact ahead of a branch; the truth
                // test is implicit in the jump.
            }

            // Binary operators, per-operation era.
            Op::BinaryPower => self.binary(BinOp::Pow, off)?,
            Op::BinaryMultiply => self.binary(BinOp::Mult, off)?,
            Op::BinaryMatrixMultiply => self.binary(BinOp::MatMult, off)?,
            Op::BinaryDivide | Op::BinaryTrueDivide => self.binary(BinOp::Div, off)?,
            Op::BinaryFloorDivide => self.binary(BinOp::FloorDiv, off)?,
            Op::BinaryModulo => self.binary(BinOp::Mod, off)?,
            Op::BinaryAdd => self.binary(BinOp::Add, off)?,
            Op::BinarySubtract => self.binary(BinOp::Sub, off)?,
            Op::BinaryLshift => self.binary(BinOp::LShift, off)?,
            Op::BinaryRshift => self.binary(BinOp::RShift, off)?,
            Op::BinaryAnd => self.binary(BinOp::BitAnd, off)?,
            Op::BinaryXor => self.binary(BinOp::BitXor, off)?,
            Op::BinaryOr => self.binary(BinOp::BitOr, off)?,

            Op::InplaceAdd => self.inplace(BinOp::Add, off)?,
            Op::InplaceSubtract => self.inplace(BinOp::Sub, off)?,
            Op::InplaceMultiply => self.inplace(BinOp::Mult, off)?,
            Op::InplaceMatrixMultiply => self.inplace(BinOp::MatMult, off)?,
            Op::InplaceDivide | Op::InplaceTrueDivide => self.inplace(BinOp::Div, off)?,
            Op::InplaceFloorDivide => self.inplace(BinOp::FloorDiv, off)?,
            Op::InplaceModulo => self.inplace(BinOp::Mod, off)?,
            Op::InplacePower => self.inplace(BinOp::Pow, off)?,
            Op::InplaceLshift => self.inplace(BinOp::LShift, off)?,
            Op::InplaceRshift => self.inplace(BinOp::RShift, off)?,
            Op::InplaceAnd => self.inplace(BinOp::BitAnd, off)?,
            Op::InplaceXor => self.inplace(BinOp::BitXor, off)?,
            Op::InplaceOr => self.inplace(BinOp::BitOr, off)?,

            // Unified binary operation.
            Op::BinaryOp => match binary_op_kind(insn.arg) {
                Some(BinaryOpKind::Op(op)) => self.binary(op, off)?,
                Some(BinaryOpKind::Inplace(op)) => self.inplace(op, off)?,
                Some(BinaryOpKind::Subscript) => self.subscript(off)?,
                None => {
                    self.diag(off, format!("unknown BINARY_OP operand {}", insn.arg));
                    let right = self.pop_expr(off)?;
                    let left = self.pop_expr(off)?;
                    let _ = (left, right);
                    self.push_expr(Expr::Placeholder(format!("binary_op_{}", insn.arg)));
                }
            },

            Op::BinarySubscr => self.subscript(off)?,
            Op::BinarySlice => {
                let upper = self.pop_expr(off)?;
                let lower = self.pop_expr(off)?;
                let object = self.pop_expr(off)?;
                let slice = slice_expr(Some(lower), Some(upper), None);
                self.push_expr(Expr::subscript(object, slice));
            }
            Op::StoreSliceOp => {
                let upper = self.pop_expr(off)?;
                let lower = self.pop_expr(off)?;
                let object = self.pop_expr(off)?;
                let value = self.pop_expr(off)?;
                let slice = slice_expr(Some(lower), Some(upper), None);
                self.emit(Stmt::assign(store_ctx(Expr::subscript(object, slice)), value));
            }
            Op::BuildSlice => {
                let step = if insn.arg == 3 { Some(self.pop_expr(off)?) } else { None };
                let upper = self.pop_expr(off)?;
                let lower = self.pop_expr(off)?;
                self.push_expr(slice_expr(
                    none_to_missing(lower),
                    none_to_missing(upper),
                    step.and_then(none_to_missing_opt),
                ));
            }

            // Python-2 whole-object slices.
            Op::Slice0 | Op::Slice1 | Op::Slice2 | Op::Slice3 => {
                let expr = self.py2_slice(insn.opcode, off)?;
                self.push_expr(expr);
            }
            Op::StoreSlice0 | Op::StoreSlice1 | Op::StoreSlice2 | Op::StoreSlice3 => {
                let target = self.py2_slice(insn.opcode, off)?;
                let value = self.pop_expr(off)?;
                self.emit(Stmt::assign(store_ctx(target), value));
            }
            Op::DeleteSlice0 | Op::DeleteSlice1 | Op::DeleteSlice2 | Op::DeleteSlice3 => {
                let target = self.py2_slice(insn.opcode, off)?;
                self.emit(Stmt::Delete(vec![del_ctx(target)]));
            }

            // Comparison.
            Op::CompareOp => {
                let (op, flag_bits) = compare_op(version, insn.arg);
                if flag_bits != 0 {
                    self.diag(off, format!("COMPARE_OP flag bits 0x{flag_bits:x} ignored"));
                }
                let Some(op) = op else {
                    self.diag(off, format!("unknown comparison index in operand {}", insn.arg));
                    let _ = self.pop_expr(off)?;
                    let _ = self.pop_expr(off)?;
                    self.push_expr(Expr::Placeholder("compare".to_owned()));
                    return Ok(());
                };
                let right = self.pop_expr(off)?;
                let left = self.pop_expr(off)?;
                self.push_chained_compare(left, op, right);
            }
            Op::IsOp => {
                let op = if insn.arg == 0 { CmpOp::Is } else { CmpOp::IsNot };
                let right = self.pop_expr(off)?;
                let left = self.pop_expr(off)?;
                self.push_chained_compare(left, op, right);
            }
            Op::ContainsOp => {
                let op = if insn.arg == 0 { CmpOp::In } else { CmpOp::NotIn };
                let right = self.pop_expr(off)?;
                let left = self.pop_expr(off)?;
                self.push_chained_compare(left, op, right);
            }

            // Container construction.
            Op::BuildTuple => {
                let items = self.pop_many(insn.arg as usize, off)?;
                self.push_expr(Expr::Tuple(items));
            }
            Op::BuildList => {
                let items = self.pop_many(insn.arg as usize, off)?;
                self.push_expr(Expr::List(items));
            }
            Op::BuildSet => {
                let items = self.pop_many(insn.arg as usize, off)?;
                self.push_expr(Expr::Set(items));
            }
            Op::BuildMap => {
                if version >= Version::new(3, 5) {
                    let mut keys = Vec::with_capacity(insn.arg as usize);
                    let mut values = Vec::with_capacity(insn.arg as usize);
                    let mut flat = self.pop_many(insn.arg as usize * 2, off)?;
                    while flat.len() >= 2 {
                        let key = flat.remove(0);
                        let value = flat.remove(0);
                        keys.push(Some(key));
                        values.push(value);
                    }
                    self.push_expr(Expr::Dict { keys, values });
                } else {
                    // Pre-3.5 BUILD_MAP pre-sizes an empty dict; entries
                    // arrive via STORE_MAP.
                    self.push_expr(Expr::Dict {
                        keys: Vec::new(),
                        values: Vec::new(),
                    });
                }
            }
            Op::BuildConstKeyMap => {
                let keys = self.pop_expr(off)?;
                let values = self.pop_many(insn.arg as usize, off)?;
                let keys = match keys {
                    Expr::Constant(Constant::Tuple(items)) => {
                        items.into_iter().map(|item| Some(Expr::Constant(item))).collect()
                    }
                    other => {
                        self.diag(off, "BUILD_CONST_KEY_MAP keys are not a constant tuple");
                        vec![Some(other)]
                    }
                };
                self.push_expr(Expr::Dict { keys, values });
            }
            Op::StoreMap => {
                let key = self.pop_expr(off)?;
                let value = self.pop_expr(off)?;
                if let Some(Cell::Expr(Expr::Dict { keys, values })) = self.stack.last_mut() {
                    keys.push(Some(key));
                    values.push(value);
                } else {
                    self.diag(off, "STORE_MAP without a dict under construction");
                }
            }
            Op::ListAppend | Op::SetAdd => {
                // Outside a comprehension these mutate a builder `arg`
                // cells down; recovery intercepts the comprehension case.
                let item = self.pop_expr(off)?;
                let depth = insn.arg.max(1) as usize;
                let len = self.stack.len();
                if depth <= len {
                    if let Cell::Expr(Expr::List(items) | Expr::Set(items)) = &mut self.stack[len - depth] {
                        items.push(item);
                        return Ok(());
                    }
                }
                self.diag(off, "LIST_APPEND/SET_ADD without a builder");
            }
            Op::MapAdd => {
                // 3.8+ pushes key then value; earlier value then key.
                let (key, value) = if version >= Version::new(3, 8) {
                    let value = self.pop_expr(off)?;
                    let key = self.pop_expr(off)?;
                    (key, value)
                } else {
                    let key = self.pop_expr(off)?;
                    let value = self.pop_expr(off)?;
                    (key, value)
                };
                let depth = insn.arg.max(1) as usize;
                let len = self.stack.len();
                if depth <= len {
                    if let Cell::Expr(Expr::Dict { keys, values }) = &mut self.stack[len - depth] {
                        keys.push(Some(key));
                        values.push(value);
                        return Ok(());
                    }
                }
                self.diag(off, "MAP_ADD without a dict builder");
            }
            Op::ListExtend => {
                let iterable = self.pop_expr(off)?;
                let len = self.stack.len();
                let depth = insn.arg.max(1) as usize;
                if depth <= len {
                    if let Cell::Expr(Expr::List(items)) = &mut self.stack[len - depth] {
                        match iterable {
                            // Constant-folded argument tuples unpack back
                            // into elements.
                            Expr::Constant(Constant::Tuple(constants)) => {
                                items.extend(constants.into_iter().map(Expr::Constant));
                            }
                            other => items.push(Expr::Starred(Box::new(other), ExprContext::Load)),
                        }
                        return Ok(());
                    }
                }
                self.diag(off, "LIST_EXTEND without a list builder");
            }
            Op::SetUpdate => {
                let iterable = self.pop_expr(off)?;
                let len = self.stack.len();
                let depth = insn.arg.max(1) as usize;
                if depth <= len {
                    if let Cell::Expr(Expr::Set(items)) = &mut self.stack[len - depth] {
                        match iterable {
                            Expr::Constant(Constant::FrozenSet(constants) | Constant::Tuple(constants)) => {
                                items.extend(constants.into_iter().map(Expr::Constant));
                            }
                            other => items.push(Expr::Starred(Box::new(other), ExprContext::Load)),
                        }
                        return Ok(());
                    }
                }
                self.diag(off, "SET_UPDATE without a set builder");
            }
            Op::DictUpdate | Op::DictMerge => {
                let mapping = self.pop_expr(off)?;
                let len = self.stack.len();
                let depth = insn.arg.max(1) as usize;
                if depth <= len {
                    if let Cell::Expr(Expr::Dict { keys, values }) = &mut self.stack[len - depth] {
                        keys.push(None);
                        values.push(mapping);
                        return Ok(());
                    }
                }
                self.diag(off, "DICT_UPDATE without a dict builder");
            }
            Op::ListToTuple => {
                let list = self.pop_expr(off)?;
                match list {
                    Expr::List(items) => self.push_expr(Expr::Tuple(items)),
                    other => self.push_expr(Expr::call(Expr::name("tuple"), vec![other], Vec::new())),
                }
            }

            // Attribute / subscript / name stores and deletes.
            Op::StoreName | Op::StoreGlobal => {
                let name = self.name(insn);
                if insn.opcode == Op::StoreGlobal && self.ctx.code.name != "<module>" && !self.global_names.contains(&name)
                {
                    self.global_names.push(name.clone());
                }
                self.store(Expr::store_name(name), off)?;
            }
            Op::StoreFast => {
                let name = self.varname(insn, insn.arg);
                self.store(Expr::store_name(name), off)?;
            }
            Op::StoreFastStoreFast => {
                let first = self.varname(insn, insn.arg >> 4);
                let second = self.varname(insn, insn.arg & 0xF);
                self.store(Expr::store_name(first), off)?;
                self.store(Expr::store_name(second), off)?;
            }
            Op::StoreFastLoadFast => {
                let store = self.varname(insn, insn.arg >> 4);
                let load = self.varname(insn, insn.arg & 0xF);
                self.store(Expr::store_name(store), off)?;
                self.push_expr(Expr::name(load));
            }
            Op::StoreDeref => {
                let name = self.derefname(insn);
                let is_free = self.ctx.code.freevars.iter().any(|free| *free == name)
                    || (self.ctx.version >= Version::new(3, 11)
                        && self.ctx.code.varname(insn.arg).is_none());
                if is_free && !self.nonlocal_names.contains(&name) {
                    self.nonlocal_names.push(name.clone());
                }
                self.store(Expr::store_name(name), off)?;
            }
            Op::StoreAttr => {
                let attr = self.name(insn);
                let object = self.pop_expr(off)?;
                let target = Expr::Attribute {
                    value: Box::new(object),
                    attr,
                    ctx: ExprContext::Store,
                };
                self.store(target, off)?;
            }
            Op::StoreSubscr => {
                let index = self.pop_expr(off)?;
                let object = self.pop_expr(off)?;
                let value = self.pop_expr(off)?;
                // Annotations route through __annotations__['name'].
                if let (Expr::Name { id, .. }, Expr::Constant(Constant::Str(key))) = (&object, &index) {
                    if id == "__annotations__" {
                        let name = String::from_utf8_lossy(key).into_owned();
                        self.emit_annotation(name, value);
                        return Ok(());
                    }
                }
                self.emit(Stmt::Assign {
                    targets: vec![Expr::Subscript {
                        value: Box::new(object),
                        index: Box::new(index),
                        ctx: ExprContext::Store,
                    }],
                    value,
                });
            }
            Op::DeleteName | Op::DeleteGlobal => {
                let name = self.name(insn);
                self.emit(Stmt::Delete(vec![Expr::Name {
                    id: name,
                    ctx: ExprContext::Del,
                }]));
            }
            Op::DeleteFast => {
                let name = self.varname(insn, insn.arg);
                self.emit(Stmt::Delete(vec![Expr::Name {
                    id: name,
                    ctx: ExprContext::Del,
                }]));
            }
            Op::DeleteDeref => {
                let name = self.derefname(insn);
                self.emit(Stmt::Delete(vec![Expr::Name {
                    id: name,
                    ctx: ExprContext::Del,
                }]));
            }
            Op::DeleteAttr => {
                let attr = self.name(insn);
                let object = self.pop_expr(off)?;
                self.emit(Stmt::Delete(vec![Expr::Attribute {
                    value: Box::new(object),
                    attr,
                    ctx: ExprContext::Del,
                }]));
            }
            Op::DeleteSubscr => {
                let index = self.pop_expr(off)?;
                let object = self.pop_expr(off)?;
                self.emit(Stmt::Delete(vec![Expr::Subscript {
                    value: Box::new(object),
                    index: Box::new(index),
                    ctx: ExprContext::Del,
                }]));
            }

            // Unpacking.
            Op::UnpackSequence | Op::UnpackTuple | Op::UnpackList => {
                let value = self.pop_expr(off)?;
                let count = insn.arg as usize;
                let group = self.unpacks.len();
                self.unpacks.push(UnpackGroup {
                    value,
                    targets: vec![None; count],
                    star: None,
                    filled: 0,
                });
                // First STORE receives the first element.
                for slot in (0..count).rev() {
                    self.push(Cell::Unpack { group, slot });
                }
            }
            Op::UnpackEx => {
                let value = self.pop_expr(off)?;
                let before = (insn.arg & 0xFF) as usize;
                let after = (insn.arg >> 8) as usize;
                let count = before + 1 + after;
                let group = self.unpacks.len();
                self.unpacks.push(UnpackGroup {
                    value,
                    targets: vec![None; count],
                    star: Some(before),
                    filled: 0,
                });
                for slot in (0..count).rev() {
                    self.push(Cell::Unpack { group, slot });
                }
            }

            // Imports.
            Op::ImportName => {
                let module = self.name(insn);
                let (level, fromlist) = if version >= Version::new(2, 5) {
                    let fromlist = self.pop_expr(off)?;
                    let level = self.pop_expr(off)?;
                    (const_level(&level), const_fromlist(&fromlist))
                } else if version.major >= 2 {
                    let fromlist = self.pop_expr(off)?;
                    (0, const_fromlist(&fromlist))
                } else {
                    (0, Vec::new())
                };
                self.push(Cell::Import(Box::new(ImportCell {
                    module,
                    level,
                    fromlist,
                    collected: Vec::new(),
                })));
            }
            Op::ImportFrom => {
                let name = self.name(insn);
                self.push(Cell::ImportedName { name });
            }
            Op::ImportStar => {
                let cell = self.pop(off)?;
                if let Cell::Import(import) = cell {
                    self.emit(Stmt::ImportFrom {
                        module: Some(import.module),
                        names: Vec::new(),
                        level: import.level,
                    });
                } else {
                    self.diag(off, "IMPORT_STAR without a module on the stack");
                }
            }

            // Calls and function construction.
            Op::MakeFunction | Op::MakeClosure => self.make_function(insn)?,
            Op::SetFunctionAttribute => self.set_function_attribute(insn)?,
            Op::KwNames => {
                let names = match self.ctx.code.constant(insn.arg) {
                    Some(Constant::Tuple(items)) => items
                        .iter()
                        .filter_map(Constant::as_str_lossy)
                        .collect(),
                    _ => Vec::new(),
                };
                self.pending_kwnames = names;
            }
            Op::Call | Op::CallFunction => {
                let kwnames = std::mem::take(&mut self.pending_kwnames);
                let (pos, kw_pairs, paired) = if insn.opcode == Op::CallFunction {
                    (insn.arg & 0xFF, (insn.arg >> 8) & 0xFF, false)
                } else {
                    (insn.arg, 0, true)
                };
                self.call(insn, pos as usize, kw_pairs as usize, kwnames, paired)?;
            }
            Op::CallKw => {
                let names = match self.pop_expr(off)? {
                    Expr::Constant(Constant::Tuple(items)) => {
                        items.iter().filter_map(Constant::as_str_lossy).collect()
                    }
                    _ => Vec::new(),
                };
                self.call(insn, insn.arg as usize, 0, names, true)?;
            }
            Op::CallFunctionKw => {
                if version >= Version::new(3, 6) {
                    let names = match self.pop_expr(off)? {
                        Expr::Constant(Constant::Tuple(items)) => {
                            items.iter().filter_map(Constant::as_str_lossy).collect()
                        }
                        _ => Vec::new(),
                    };
                    self.call(insn, insn.arg as usize, 0, names, false)?;
                } else {
                    // Python-2 form: kwargs dict plus positional count.
                    let pos = insn.arg & 0xFF;
                    let kw_pairs = (insn.arg >> 8) & 0xFF;
                    self.call(insn, pos as usize, kw_pairs as usize, Vec::new(), false)?;
                }
            }
            Op::CallMethod => {
                self.call(insn, insn.arg as usize, 0, Vec::new(), false)?;
            }
            Op::CallFunctionVar | Op::CallFunctionVarKw | Op::CallFunctionEx => self.call_ex(insn)?,
            Op::CallIntrinsic1 => self.call_intrinsic(insn)?,
            Op::CallIntrinsic2 => {
                // Both known intrinsics-2 (raise-from variants, typevar
                // bounds) are invisible in reconstructed source.
                let _ = self.pop_expr(off)?;
            }

            // Iterators and generators.
            Op::GetIter | Op::GetYieldFromIter | Op::GetAiter | Op::GetAnext => {
                // The iterator protocol is implicit in the source form.
            }
            Op::GetAwaitable => {
                let value = self.pop_expr(off)?;
                self.push_expr(Expr::Await(Box::new(value)));
            }
            Op::YieldValue => {
                let value = self.pop_expr(off)?;
                let value = if value.is_none_constant() { None } else { Some(Box::new(value)) };
                self.push_expr(Expr::Yield(value));
            }
            Op::YieldFrom | Op::Send => {
                // Pre-3.11 YIELD_FROM: [iterable, None] on the stack.
                let _sent = self.pop_expr(off)?;
                let iterable = self.pop_expr(off)?;
                let node = if self.ctx.code.is_coroutine() && !self.ctx.code.is_generator() {
                    Expr::Await(Box::new(iterable))
                } else {
                    Expr::YieldFrom(Box::new(iterable))
                };
                self.push_expr(node);
            }
            Op::EndSend => {
                // [receiver, result] -> [result]
                let result = self.pop(off)?;
                let _receiver = self.pop(off)?;
                self.push(result);
            }

            // Statements.
            Op::ReturnValue => {
                let value = self.pop_expr(off)?;
                let value = if value.is_none_constant() { None } else { Some(value) };
                self.emit(Stmt::Return(value));
            }
            Op::PrintExpr => {
                let value = self.pop_expr(off)?;
                self.emit(Stmt::Expr(value));
            }
            Op::PrintItem => {
                let value = self.pop_expr(off)?;
                self.print_item(None, value);
            }
            Op::PrintItemTo => {
                let dest = self.pop_expr(off)?;
                let value = self.pop_expr(off)?;
                self.print_item(Some(dest), value);
            }
            Op::PrintNewline => self.print_newline(None),
            Op::PrintNewlineTo => {
                let dest = self.pop_expr(off).ok();
                self.print_newline(dest);
            }
            Op::ExecStmt => {
                let locals = self.pop_expr(off)?;
                let globals = self.pop_expr(off)?;
                let source = self.pop_expr(off)?;
                let mut args = vec![source];
                if !globals.is_none_constant() {
                    args.push(globals);
                    if !locals.is_none_constant() {
                        args.push(locals);
                    }
                }
                self.emit(Stmt::Expr(Expr::call(Expr::name("exec"), args, Vec::new())));
            }
            Op::RaiseVarargs => {
                let mut exprs = self.pop_many(insn.arg as usize, off)?;
                let (exc, cause) = match exprs.len() {
                    0 => (None, None),
                    1 => (Some(exprs.remove(0)), None),
                    _ => {
                        let exc = exprs.remove(0);
                        let cause = exprs.remove(0);
                        // Python-2's three-operand raise has no `from`.
                        if version.major >= 3 {
                            (Some(exc), Some(cause))
                        } else {
                            (Some(exc), None)
                        }
                    }
                };
                self.emit(Stmt::Raise { exc, cause });
            }
            Op::RaiseException => {
                let value = self.pop_expr(off)?;
                let exc = self.pop_expr(off)?;
                let exc = if value.is_none_constant() {
                    exc
                } else {
                    Expr::call(exc, vec![value], Vec::new())
                };
                self.emit(Stmt::Raise { exc: Some(exc), cause: None });
            }

            // F-strings.
            Op::FormatValue => self.format_value(insn)?,
            Op::FormatSimple => {
                let value = self.pop_expr(off)?;
                self.push_expr(formatted(value, None, None));
            }
            Op::FormatWithSpec => {
                let spec = self.pop_expr(off)?;
                let value = self.pop_expr(off)?;
                self.push_expr(formatted(value, None, Some(spec)));
            }
            Op::ConvertValue => {
                let value = self.pop_expr(off)?;
                let conversion = match insn.arg {
                    1 => Some('s'),
                    2 => Some('r'),
                    3 => Some('a'),
                    _ => None,
                };
                self.push_expr(formatted(value, conversion, None));
            }
            Op::BuildString => {
                let parts = self.pop_many(insn.arg as usize, off)?;
                self.push_expr(Expr::JoinedStr(parts));
            }

            // Pattern-matching support opcodes; full recovery happens in
            // the control-flow layer, these just keep the stack honest.
            Op::GetLen => {
                let Some(cell) = self.stack.last().cloned() else {
                    return Err(DecompileError::StackUnderflow { offset: off });
                };
                let subject = self.cell_to_expr(cell, off)?;
                self.push_expr(Expr::call(Expr::name("len"), vec![subject], Vec::new()));
            }
            Op::MatchMapping | Op::MatchSequence => {
                self.push_expr(Expr::Placeholder("match_kind".to_owned()));
            }
            Op::MatchKeys => {
                let _keys = self.pop_expr(off)?;
                self.push_expr(Expr::Placeholder("match_keys".to_owned()));
            }
            Op::MatchClass => {
                let _names = self.pop_expr(off)?;
                let _cls = self.pop_expr(off)?;
                let _subject = self.pop_expr(off)?;
                self.push_expr(Expr::Placeholder("match_class".to_owned()));
            }
            Op::CopyDictWithoutKeys => {
                // [subject, keys] -> [subject, rest]; keep the subject.
                let _keys = self.pop_expr(off)?;
                self.push_expr(Expr::Placeholder("match_rest".to_owned()));
            }

            other => {
                self.diag(off, format!("unhandled opcode {other}"));
            }
        }
        Ok(())
    }

    fn pop_discard(&mut self, off: u32) -> DecompileResult<()> {
        let cell = self.pop(off)?;
        match cell {
            // Discarding a module cell closes a from-import.
            Cell::Import(import) => {
                let import = *import;
                if import.collected.is_empty() {
                    self.emit(Stmt::Import(vec![Alias {
                        name: import.module,
                        asname: None,
                    }]));
                } else {
                    self.emit(Stmt::ImportFrom {
                        module: if import.module.is_empty() { None } else { Some(import.module) },
                        names: import.collected,
                        level: import.level,
                    });
                }
            }
            Cell::Expr(expr) => {
                // An expression statement, unless it is interpreter
                // plumbing (the None pushed before an implicit return).
                if !expr.is_none_constant() {
                    self.emit(Stmt::Expr(expr));
                }
            }
            Cell::Function(function) => {
                let name = function.code.name.clone();
                let stmt = self.function_def(name, *function);
                self.emit(stmt);
            }
            Cell::Class(class) => {
                let name = class.name.clone();
                let stmt = self.class_def(name, *class);
                self.emit(stmt);
            }
            _ => {}
        }
        Ok(())
    }

    fn rot(&mut self, n: usize, off: u32) -> DecompileResult<()> {
        if n < 2 {
            return Err(DecompileError::InvalidSwapArg { arg: n as u32, offset: off });
        }
        let len = self.stack.len();
        if n > len {
            return Err(DecompileError::StackUnderflow { offset: off });
        }
        let top = self.stack.remove(len - 1);
        self.stack.insert(len - n, top);
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, off: u32) -> DecompileResult<()> {
        let operand = self.pop_expr(off)?;
        self.push_expr(Expr::unary(op, operand));
        Ok(())
    }

    fn binary(&mut self, op: BinOp, off: u32) -> DecompileResult<()> {
        let right = self.pop_expr(off)?;
        let left = self.pop_expr(off)?;
        self.push_expr(Expr::binary(op, left, right));
        Ok(())
    }

    fn inplace(&mut self, op: BinOp, off: u32) -> DecompileResult<()> {
        let right = self.pop_expr(off)?;
        let left = self.pop_expr(off)?;
        self.push(Cell::Inplace { op, left, right });
        Ok(())
    }

    fn subscript(&mut self, off: u32) -> DecompileResult<()> {
        let index = self.pop_expr(off)?;
        let object = self.pop_expr(off)?;
        self.push_expr(Expr::subscript(object, index));
        Ok(())
    }

    fn py2_slice(&mut self, op: Opcode, off: u32) -> DecompileResult<Expr> {
        use Opcode as O;
        let (has_lower, has_upper) = match op {
            O::Slice0 | O::StoreSlice0 | O::DeleteSlice0 => (false, false),
            O::Slice1 | O::StoreSlice1 | O::DeleteSlice1 => (true, false),
            O::Slice2 | O::StoreSlice2 | O::DeleteSlice2 => (false, true),
            _ => (true, true),
        };
        let upper = if has_upper { Some(self.pop_expr(off)?) } else { None };
        let lower = if has_lower { Some(self.pop_expr(off)?) } else { None };
        let object = self.pop_expr(off)?;
        Ok(Expr::subscript(object, slice_expr(lower, upper, None)))
    }

    fn push_chained_compare(&mut self, left: Expr, op: CmpOp, right: Expr) {
        // Chain folding (`a < b < c`) happens when recovery joins the
        // short-circuit pieces; a single comparison is pushed as-is.
        self.push_expr(Expr::compare(left, op, right));
    }

    fn emit_annotation(&mut self, name: String, value: Expr) {
        // If the preceding statement assigned the same name, merge into an
        // annotated assignment.
        if let Some(Stmt::Assign { targets, value: assigned }) = self.stmts.last() {
            if targets.len() == 1 {
                if let Expr::Name { id, .. } = &targets[0] {
                    if *id == name {
                        let assigned = assigned.clone();
                        self.stmts.pop();
                        self.emit(Stmt::AnnAssign {
                            target: Expr::store_name(name),
                            annotation: value,
                            value: Some(assigned),
                        });
                        return;
                    }
                }
            }
        }
        self.emit(Stmt::AnnAssign {
            target: Expr::store_name(name),
            annotation: value,
            value: None,
        });
    }

    fn print_item(&mut self, dest: Option<Expr>, value: Expr) {
        if let Some(Stmt::Print {
            dest: prev_dest,
            values,
            newline: false,
        }) = self.stmts.last_mut()
        {
            if *prev_dest == dest {
                values.push(value);
                return;
            }
        }
        self.emit(Stmt::Print {
            dest,
            values: vec![value],
            newline: false,
        });
    }

    fn print_newline(&mut self, dest: Option<Expr>) {
        if let Some(Stmt::Print { newline, .. }) = self.stmts.last_mut() {
            if !*newline {
                *newline = true;
                return;
            }
        }
        self.emit(Stmt::Print {
            dest,
            values: Vec::new(),
            newline: true,
        });
    }

    /// MAKE_FUNCTION / MAKE_CLOSURE across every era.
    fn make_function(&mut self, insn: &Instruction) -> DecompileResult<()> {
        let off = insn.offset;
        let version = self.ctx.v();

        // 3.11/3.12 dropped the qualname push; 3.13 dropped the flags.
        let qualname_on_stack = version >= Version::new(3, 3) && version < Version::new(3, 11);
        let flags_era = version >= Version::new(3, 6);

        let code = if qualname_on_stack {
            let _qualname = self.pop_expr(off)?;
            self.pop(off)?
        } else {
            self.pop(off)?
        };
        let Cell::Code(code) = code else {
            return Err(DecompileError::NotAnExpression { offset: off });
        };

        let mut function = FunctionCell {
            code,
            defaults: Vec::new(),
            kw_defaults: Vec::new(),
            annotations: Vec::new(),
            decorators: Vec::new(),
            body: None,
        };

        if version >= Version::new(3, 13) {
            // Attributes arrive separately via SET_FUNCTION_ATTRIBUTE.
        } else if flags_era {
            if insn.arg & 0x08 != 0 {
                let _closure = self.pop_expr(off)?;
            }
            if insn.arg & 0x04 != 0 {
                let annotations = self.pop_expr(off)?;
                function.annotations = annotation_pairs(annotations);
            }
            if insn.arg & 0x02 != 0 {
                let kw_defaults = self.pop_expr(off)?;
                function.kw_defaults = kw_default_pairs(kw_defaults);
            }
            if insn.arg & 0x01 != 0 {
                let defaults = self.pop_expr(off)?;
                if let Expr::Tuple(items) = defaults {
                    function.defaults = items;
                } else if let Expr::Constant(Constant::Tuple(items)) = defaults {
                    function.defaults = items.into_iter().map(Expr::Constant).collect();
                }
            }
        } else {
            // Pre-3.6: the operand is a default count (low byte), with
            // kw-only defaults in the next byte from 3.0.
            if insn.opcode == Opcode::MakeClosure {
                let _closure = self.pop_expr(off)?;
            }
            if version.major >= 3 {
                let num_annotations = (insn.arg >> 16) & 0x7FFF;
                if num_annotations > 0 {
                    let _names = self.pop_expr(off)?;
                    for _ in 0..num_annotations.saturating_sub(1) {
                        let _annotation = self.pop_expr(off)?;
                    }
                }
                let kw_count = (insn.arg >> 8) & 0xFF;
                for _ in 0..kw_count {
                    let value = self.pop_expr(off)?;
                    let key = self.pop_expr(off)?;
                    if let Expr::Constant(Constant::Str(name)) = key {
                        function
                            .kw_defaults
                            .insert(0, (String::from_utf8_lossy(&name).into_owned(), value));
                    }
                }
            }
            let pos_count = insn.arg & 0xFF;
            let mut defaults = self.pop_many(pos_count as usize, off)?;
            function.defaults.append(&mut defaults);
        }

        // The cell stays abstract until consumed: a later
        // SET_FUNCTION_ATTRIBUTE may still add defaults (3.13+), and the
        // consumer decides between def statement, lambda expression,
        // comprehension call and class body.
        self.push(Cell::Function(Box::new(function)));
        Ok(())
    }

    /// Runs the nested lambda simulation; the RETURN terminator supplies
    /// the body expression.
    fn lambda_expr(&mut self, function: FunctionCell, off: u32) -> Expr {
        match crate::recover::reconstruct_lambda(self.ctx.version, &function.code) {
            Ok(body) => {
                let args = build_arguments(&function.code, function.defaults, function.kw_defaults, &function.annotations);
                Expr::Lambda {
                    args: Box::new(args),
                    body: Box::new(body),
                }
            }
            Err(error) => {
                self.diag(off, format!("lambda fallback: {error}"));
                Expr::Placeholder("lambda".to_owned())
            }
        }
    }

    /// 3.13+ SET_FUNCTION_ATTRIBUTE: value below the function on the
    /// stack, attribute selected by the operand.
    fn set_function_attribute(&mut self, insn: &Instruction) -> DecompileResult<()> {
        let off = insn.offset;
        let function = self.pop(off)?;
        let value = self.pop_expr(off)?;
        let Cell::Function(mut function) = function else {
            return Err(DecompileError::NotAnExpression { offset: off });
        };
        match insn.arg {
            0x01 => {
                if let Expr::Tuple(items) = value {
                    function.defaults = items;
                } else if let Expr::Constant(Constant::Tuple(items)) = value {
                    function.defaults = items.into_iter().map(Expr::Constant).collect();
                }
            }
            0x02 => function.kw_defaults = kw_default_pairs(value),
            0x04 => function.annotations = annotation_pairs(value),
            0x08 => {} // closure tuple
            other => self.diag(off, format!("unknown function attribute flag 0x{other:x}")),
        }
        self.push(Cell::Function(function));
        Ok(())
    }

    /// Shared CALL retirement for every positional/keyword encoding.
    ///
    /// `kw_pairs` covers the Python-2 name/value pair form; `kwnames`
    /// covers the name-tuple forms (CALL_FUNCTION_KW 3.6+, KW_NAMES,
    /// CALL_KW). At most one of the two is ever nonzero.
    ///
    /// The kind of the callable cell decides the result: comprehension
    /// code builds a comprehension over its iterator argument, a lone
    /// function-object argument turns the call into decorator
    /// application, the `__build_class__` shape assembles a class cell,
    /// and everything else is an ordinary call expression.
    fn call(&mut self, insn: &Instruction, pos: usize, kw_pairs: usize, kwnames: Vec<String>, paired: bool) -> DecompileResult<()> {
        let off = insn.offset;
        let mut keywords = Vec::new();

        for _ in 0..kw_pairs {
            let value = self.pop_expr(off)?;
            let key = self.pop_expr(off)?;
            let arg = match key {
                Expr::Constant(Constant::Str(name)) => Some(String::from_utf8_lossy(&name).into_owned()),
                _ => None,
            };
            keywords.insert(0, Keyword { arg, value });
        }

        let mut arg_cells = self.pop_cells(pos, off)?;
        if !kwnames.is_empty() {
            let split = arg_cells.len().saturating_sub(kwnames.len());
            let values = arg_cells.split_off(split);
            for (name, cell) in kwnames.into_iter().zip(values) {
                let value = self.cell_to_expr(cell, off)?;
                keywords.push(Keyword { arg: Some(name), value });
            }
        }

        // 3.11+ calls pop a pair beneath the arguments: the null marker
        // and the callable in either order (the order flipped in 3.13),
        // or the callable with a value in the self slot, which then acts
        // as the leading positional argument. Earlier encodings pop the
        // callable alone, with the null already adjacent for LOAD_METHOD.
        let callee = if paired {
            let above = self.pop(off)?;
            if matches!(above, Cell::Null) {
                self.pop(off)?
            } else if matches!(self.stack.last(), Some(Cell::Null)) {
                self.stack.pop();
                above
            } else {
                let callable = self.pop(off)?;
                arg_cells.insert(0, above);
                callable
            }
        } else {
            let callee = self.pop(off)?;
            if matches!(self.stack.last(), Some(Cell::Null)) {
                self.stack.pop();
            }
            callee
        };

        match callee {
            Cell::Function(function) if function.code.is_comprehension() => {
                // One iterator argument feeds a nested simulation of the
                // comprehension's own bytecode.
                if arg_cells.len() != 1 || !keywords.is_empty() {
                    return Err(DecompileError::InvalidComprehension { offset: off });
                }
                let iter = self.cell_to_expr(arg_cells.pop().expect("length checked"), off)?;
                match crate::recover::reconstruct_comprehension(self.ctx.version, &function.code, iter) {
                    Ok(expr) => self.push_expr(expr),
                    Err(error) => {
                        self.diag(off, format!("comprehension fallback: {error}"));
                        self.push_expr(Expr::Placeholder(format!("comprehension {}", function.code.name)));
                    }
                }
            }
            Cell::BuildClass => {
                // (class body function, 'Name', *bases); any deviation
                // falls back to a plain call.
                let shape_ok = arg_cells.len() >= 2
                    && matches!(arg_cells[0], Cell::Function(_))
                    && matches!(arg_cells[1], Cell::Expr(Expr::Constant(Constant::Str(_))));
                if !shape_ok {
                    let args = self.cells_to_exprs(arg_cells, off)?;
                    self.push_expr(Expr::call(Expr::name("__build_class__"), args, keywords));
                    return Ok(());
                }
                let base_cells = arg_cells.split_off(2);
                let bases = self.cells_to_exprs(base_cells, off)?;
                let Cell::Expr(Expr::Constant(Constant::Str(name))) = arg_cells.pop().expect("length checked") else {
                    unreachable!("shape checked above");
                };
                let Cell::Function(body) = arg_cells.pop().expect("length checked") else {
                    unreachable!("shape checked above");
                };
                self.push(Cell::Class(Box::new(ClassCell {
                    name: String::from_utf8_lossy(&name).into_owned(),
                    body_code: Arc::clone(&body.code),
                    bases,
                    keywords,
                    decorators: Vec::new(),
                })));
            }
            Cell::Expr(func)
                if arg_cells.len() == 1
                    && keywords.is_empty()
                    && match &arg_cells[0] {
                        // Lambdas and comprehension bodies are ordinary
                        // argument expressions, not decoration targets.
                        Cell::Function(f) => !f.code.is_lambda() && !f.code.is_comprehension(),
                        Cell::Class(_) => true,
                        _ => false,
                    } =>
            {
                // Decorator application: the decorated object stays on
                // the stack with one more decorator attached.
                match arg_cells.pop().expect("length checked") {
                    Cell::Function(mut function) => {
                        function.decorators.insert(0, func);
                        self.push(Cell::Function(function));
                    }
                    Cell::Class(mut class) => {
                        class.decorators.insert(0, func);
                        self.push(Cell::Class(class));
                    }
                    _ => unreachable!("matched above"),
                }
            }
            other => {
                let func = self.cell_to_expr(other, off)?;
                let args = self.cells_to_exprs(arg_cells, off)?;
                self.push_expr(Expr::call(func, args, keywords));
            }
        }
        Ok(())
    }

    fn cells_to_exprs(&mut self, cells: Vec<Cell>, off: u32) -> DecompileResult<Vec<Expr>> {
        cells.into_iter().map(|cell| self.cell_to_expr(cell, off)).collect()
    }

    /// CALL_FUNCTION_EX / CALL_FUNCTION_VAR[_KW]: star-args forms.
    fn call_ex(&mut self, insn: &Instruction) -> DecompileResult<()> {
        let off = insn.offset;
        let mut keywords = Vec::new();
        let mut args = Vec::new();

        if insn.opcode == Opcode::CallFunctionEx {
            if insn.arg & 1 != 0 {
                let kwargs = self.pop_expr(off)?;
                keywords = dict_to_keywords(kwargs);
            }
            let star_args = self.pop_expr(off)?;
            args = sequence_to_args(star_args);
        } else {
            // Python-2 CALL_FUNCTION_VAR[_KW]: kwargs?, *args, pairs, pos.
            if insn.opcode == Opcode::CallFunctionVarKw {
                let kwargs = self.pop_expr(off)?;
                keywords = dict_to_keywords(kwargs);
            }
            let star = self.pop_expr(off)?;
            let kw_pairs = (insn.arg >> 8) & 0xFF;
            for _ in 0..kw_pairs {
                let value = self.pop_expr(off)?;
                let key = self.pop_expr(off)?;
                let arg = match key {
                    Expr::Constant(Constant::Str(name)) => Some(String::from_utf8_lossy(&name).into_owned()),
                    _ => None,
                };
                keywords.insert(0, Keyword { arg, value });
            }
            let pos = insn.arg & 0xFF;
            args = self.pop_many(pos as usize, off)?;
            args.push(Expr::Starred(Box::new(star), ExprContext::Load));
        }

        let callee = self.pop(off)?;
        if matches!(self.stack.last(), Some(Cell::Null)) {
            self.stack.pop();
        }
        let func = self.cell_to_expr(callee, off)?;
        self.push_expr(Expr::call(func, args, keywords));
        Ok(())
    }

    fn call_intrinsic(&mut self, insn: &Instruction) -> DecompileResult<()> {
        let off = insn.offset;
        match insn.arg {
            // INTRINSIC_IMPORT_STAR
            2 => {
                let cell = self.pop(off)?;
                if let Cell::Import(import) = cell {
                    self.emit(Stmt::ImportFrom {
                        module: Some(import.module),
                        names: Vec::new(),
                        level: import.level,
                    });
                } else {
                    self.diag(off, "IMPORT_STAR intrinsic without a module");
                }
                self.push_expr(Expr::none());
            }
            // INTRINSIC_UNARY_POSITIVE
            5 => self.unary(UnaryOp::UAdd, off)?,
            // INTRINSIC_LIST_TO_TUPLE
            6 => {
                let list = self.pop_expr(off)?;
                match list {
                    Expr::List(items) => self.push_expr(Expr::Tuple(items)),
                    other => self.push_expr(other),
                }
            }
            // INTRINSIC_PRINT (REPL only) and the typing intrinsics keep
            // their operand unchanged as far as source text goes.
            _ => {}
        }
        Ok(())
    }

    /// Pre-3.13 FORMAT_VALUE.
    fn format_value(&mut self, insn: &Instruction) -> DecompileResult<()> {
        let off = insn.offset;
        let spec = if insn.arg & 0x04 != 0 { Some(self.pop_expr(off)?) } else { None };
        let value = self.pop_expr(off)?;
        let conversion = match insn.arg & 0x03 {
            1 => Some('s'),
            2 => Some('r'),
            3 => Some('a'),
            _ => None,
        };
        self.push_expr(formatted(value, conversion, spec));
        Ok(())
    }
}

/// Wraps a formatted-value node.
fn formatted(value: Expr, conversion: Option<char>, spec: Option<Expr>) -> Expr {
    Expr::FormattedValue {
        value: Box::new(value),
        conversion,
        format_spec: spec.map(Box::new),
    }
}

fn slice_expr(lower: Option<Expr>, upper: Option<Expr>, step: Option<Expr>) -> Expr {
    Expr::Slice {
        lower: lower.map(Box::new),
        upper: upper.map(Box::new),
        step: step.map(Box::new),
    }
}

/// BUILD_SLICE encodes a missing bound as None.
fn none_to_missing(expr: Expr) -> Option<Expr> {
    if expr.is_none_constant() {
        None
    } else {
        Some(expr)
    }
}

fn none_to_missing_opt(expr: Expr) -> Option<Expr> {
    none_to_missing(expr)
}

fn store_ctx(expr: Expr) -> Expr {
    match expr {
        Expr::Name { id, .. } => Expr::Name {
            id,
            ctx: ExprContext::Store,
        },
        Expr::Attribute { value, attr, .. } => Expr::Attribute {
            value,
            attr,
            ctx: ExprContext::Store,
        },
        Expr::Subscript { value, index, .. } => Expr::Subscript {
            value,
            index,
            ctx: ExprContext::Store,
        },
        other => other,
    }
}

fn del_ctx(expr: Expr) -> Expr {
    match expr {
        Expr::Name { id, .. } => Expr::Name {
            id,
            ctx: ExprContext::Del,
        },
        Expr::Attribute { value, attr, .. } => Expr::Attribute {
            value,
            attr,
            ctx: ExprContext::Del,
        },
        Expr::Subscript { value, index, .. } => Expr::Subscript {
            value,
            index,
            ctx: ExprContext::Del,
        },
        other => other,
    }
}

impl Expr {
    /// A store-context copy of self viewed as a load, for AugAssign
    /// target matching.
    fn clone_as_load(&self) -> Expr {
        match self.clone() {
            Expr::Name { id, .. } => Expr::Name {
                id,
                ctx: ExprContext::Load,
            },
            Expr::Attribute { value, attr, .. } => Expr::Attribute {
                value,
                attr,
                ctx: ExprContext::Load,
            },
            Expr::Subscript { value, index, .. } => Expr::Subscript {
                value,
                index,
                ctx: ExprContext::Load,
            },
            other => other,
        }
    }
}

fn const_level(expr: &Expr) -> u32 {
    match expr {
        Expr::Constant(Constant::Int(level)) if *level > 0 => *level as u32,
        _ => 0,
    }
}

fn const_fromlist(expr: &Expr) -> Vec<String> {
    match expr {
        Expr::Constant(Constant::Tuple(items)) => items.iter().filter_map(Constant::as_str_lossy).collect(),
        _ => Vec::new(),
    }
}

/// Annotation tuples/dicts to (name, annotation) pairs.
fn annotation_pairs(expr: Expr) -> Vec<(String, Expr)> {
    match expr {
        Expr::Dict { keys, values } => keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| match key {
                Some(Expr::Constant(Constant::Str(name))) => {
                    Some((String::from_utf8_lossy(&name).into_owned(), value))
                }
                _ => None,
            })
            .collect(),
        Expr::Tuple(items) => {
            // 3.10+ packs annotations as a flat (name, value, ...) tuple.
            let mut pairs = Vec::new();
            let mut iter = items.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                if let Expr::Constant(Constant::Str(name)) = key {
                    pairs.push((String::from_utf8_lossy(&name).into_owned(), value));
                }
            }
            pairs
        }
        _ => Vec::new(),
    }
}

fn kw_default_pairs(expr: Expr) -> Vec<(String, Expr)> {
    match expr {
        Expr::Dict { keys, values } => keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| match key {
                Some(Expr::Constant(Constant::Str(name))) => {
                    Some((String::from_utf8_lossy(&name).into_owned(), value))
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn dict_to_keywords(expr: Expr) -> Vec<Keyword> {
    match expr {
        Expr::Dict { keys, values } => keys
            .into_iter()
            .zip(values)
            .map(|(key, value)| match key {
                Some(Expr::Constant(Constant::Str(name))) => Keyword {
                    arg: Some(String::from_utf8_lossy(&name).into_owned()),
                    value,
                },
                _ => Keyword { arg: None, value },
            })
            .collect(),
        other => vec![Keyword { arg: None, value: other }],
    }
}

fn sequence_to_args(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::Tuple(items) | Expr::List(items) => items,
        Expr::Constant(Constant::Tuple(items)) => items.into_iter().map(Expr::Constant).collect(),
        other => vec![Expr::Starred(Box::new(other), ExprContext::Load)],
    }
}

/// Builds an [`Arguments`] from a code object's parameter tables.
pub(crate) fn build_arguments(
    code: &CodeObject,
    defaults: Vec<Expr>,
    kw_defaults: Vec<(String, Expr)>,
    annotations: &[(String, Expr)],
) -> Arguments {
    let annotation_for = |name: &str| {
        annotations
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, expr)| expr.clone())
    };
    let make_arg = |name: &str| Arg {
        arg: name.to_owned(),
        annotation: annotation_for(name),
    };

    let posonly = code.posonlyargcount as usize;
    let argcount = code.argcount as usize;
    let kwonly = code.kwonlyargcount as usize;

    let name_at = |index: usize| -> String {
        code.varname(index as u32)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("arg{index}"))
    };

    let mut arguments = Arguments::default();
    for index in 0..argcount.min(posonly) {
        arguments.posonlyargs.push(make_arg(&name_at(index)));
    }
    for index in posonly..argcount {
        arguments.args.push(make_arg(&name_at(index)));
    }
    let mut next = argcount;
    for _ in 0..kwonly {
        let name = name_at(next);
        let default = kw_defaults.iter().find(|(key, _)| *key == name).map(|(_, expr)| expr.clone());
        arguments.kwonlyargs.push(make_arg(&name));
        arguments.kw_defaults.push(default);
        next += 1;
    }
    if code.has_varargs() {
        arguments.vararg = Some(make_arg(&name_at(next)));
        next += 1;
    }
    if code.has_varkeywords() {
        arguments.kwarg = Some(make_arg(&name_at(next)));
    }
    arguments.defaults = defaults;
    arguments
}
