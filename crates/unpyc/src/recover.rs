//! Control-flow recovery: from a flat instruction stream to statements.
//!
//! A recursive structurer walks instruction ranges, delegating
//! straight-line runs to the stack simulator and claiming everything that
//! transfers control: conditionals fold to `if`/`elif`/ternaries and
//! short-circuit operators, backward edges to `while`/`for` loops,
//! SETUP_* regions and exception-table entries to `try`/`with`, and
//! comprehension bytecode (both the separate-code-object form and the
//! 3.12+ inlined form) to comprehension expressions.
//!
//! Failure policy: an unrecognized region degrades to whatever statements
//! were recovered plus a diagnostic naming the offset. Nothing here
//! panics on malformed but locally skippable input.

use ahash::AHashMap;

use crate::ast::{Comprehension, ExceptHandler, Expr, Stmt, WithItem};
use crate::cfg::{build_graph_from, BlockGraph};
use crate::code::{CodeObject, Constant};
use crate::decode::{decode_all, Instruction};
use crate::errors::{DecompileError, DecompileResult, Diagnostic};
use crate::opcodes::Opcode;
use crate::operators::{BoolOp, CmpOp};
use crate::simulate::{Cell, Ctx, Simulator};
use crate::version::Version;

/// Result of recovering one code object.
#[derive(Debug)]
pub struct Recovered {
    pub body: Vec<Stmt>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Recovers a module body (the driver's entry point).
pub fn recover_module(version: Version, code: &CodeObject) -> DecompileResult<Recovered> {
    let mut recovered = recover_code(version, code)?;
    // Module docstrings arrive as a `__doc__` store.
    if let Some(Stmt::Assign { targets, value }) = recovered.body.first() {
        if let ([Expr::Name { id, .. }], Expr::Constant(Constant::Str(_))) = (targets.as_slice(), value) {
            if id == "__doc__" {
                let doc = value.clone();
                recovered.body[0] = Stmt::Expr(doc);
            }
        }
    }
    Ok(recovered)
}

/// Full recovery for one code object, fatal on simulator violations.
fn recover_code(version: Version, code: &CodeObject) -> DecompileResult<Recovered> {
    let instructions = match decode_all(version, &code.code) {
        Ok(instructions) => instructions,
        Err(error) => {
            return Ok(Recovered {
                body: vec![Stmt::Expr(Expr::Placeholder(format!("undecodable code: {error}")))],
                diagnostics: vec![Diagnostic::new(0, error.to_string())],
            })
        }
    };
    let graph = build_graph_from(version, code, &instructions);
    let ctx = Ctx { version, code };
    let mut sim = Simulator::new(&ctx);
    let mut structurer = Structurer::new(&ctx, &instructions, &graph);
    structurer.run(&mut sim, 0, instructions.len())?;

    let mut body = std::mem::take(&mut sim.stmts);
    strip_trailing_implicit_return(&mut body);
    declare_scopes(&mut body, &sim);

    let mut diagnostics = std::mem::take(&mut sim.diags);
    diagnostics.append(&mut structurer.diags);
    Ok(Recovered { body, diagnostics })
}

/// Function bodies reached through MAKE_FUNCTION; errors degrade to a
/// placeholder so an unreadable nested function cannot sink its parent.
pub(crate) fn reconstruct_body(version: Version, code: &CodeObject) -> Vec<Stmt> {
    match recover_code(version, code) {
        Ok(recovered) => {
            for diagnostic in &recovered.diagnostics {
                log::debug!("{}: {diagnostic}", code.name);
            }
            recovered.body
        }
        Err(error) => {
            log::warn!("failed to reconstruct body of {}: {error}", code.name);
            vec![Stmt::Expr(Expr::Placeholder(format!("unreconstructed: {error}")))]
        }
    }
}

/// Class bodies additionally shed the compiler's bookkeeping.
pub(crate) fn reconstruct_class_body(version: Version, code: &CodeObject) -> Vec<Stmt> {
    let mut body = reconstruct_body(version, code);
    body.retain(|stmt| !is_class_boilerplate(stmt));
    // The docstring arrives as a `__doc__` store.
    if let Some(Stmt::Assign { targets, value }) = body.first() {
        if let ([Expr::Name { id, .. }], Expr::Constant(Constant::Str(_))) = (targets.as_slice(), value) {
            if id == "__doc__" {
                body[0] = Stmt::Expr(value.clone());
            }
        }
    }
    body
}

fn is_class_boilerplate(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Assign { targets, .. } => matches!(
            targets.as_slice(),
            [Expr::Name { id, .. }] if id == "__module__" || id == "__qualname__" || id == "__firstlineno__" || id == "__static_attributes__"
        ),
        Stmt::Return(_) => true,
        _ => false,
    }
}

/// Lambda bodies must reduce to a single returned expression.
pub(crate) fn reconstruct_lambda(version: Version, code: &CodeObject) -> DecompileResult<Expr> {
    let recovered = recover_code(version, code)?;
    match recovered.body.as_slice() {
        [Stmt::Return(Some(expr))] => Ok(expr.clone()),
        [Stmt::Return(None)] | [] => Ok(Expr::none()),
        _ => Err(DecompileError::InvalidLambdaBody { offset: 0 }),
    }
}

/// Comprehensions compiled to their own code object (all of them before
/// 3.12; generator expressions still today). The caller's iterator
/// argument substitutes for the hidden `.0` parameter.
pub(crate) fn reconstruct_comprehension(version: Version, code: &CodeObject, iter: Expr) -> DecompileResult<Expr> {
    let instructions = decode_all(version, &code.code).map_err(|_| DecompileError::InvalidComprehension { offset: 0 })?;
    let graph = build_graph_from(version, code, &instructions);
    let ctx = Ctx { version, code };
    let mut sim = Simulator::new(&ctx);
    sim.substitute_first_local = Some(iter);
    let mut structurer = Structurer::new(&ctx, &instructions, &graph);

    // Step the prologue (builder push, `.0` load) up to the first
    // FOR_ITER, then hand the loop to the comprehension walker.
    let mut index = 0;
    while index < instructions.len() {
        let insn = &instructions[index];
        if matches!(insn.opcode, Opcode::ForIter | Opcode::ForLoop) {
            let mut comp = CompState::default();
            structurer.walk_comprehension(&mut sim, index, &mut comp)?;
            return comp.into_expr(code, &mut sim);
        }
        sim.step(insn)?;
        index += 1;
    }
    Err(DecompileError::InvalidComprehension { offset: 0 })
}

/// Trailing `return None` is the compiler's, not the author's.
fn strip_trailing_implicit_return(body: &mut Vec<Stmt>) {
    if matches!(body.last(), Some(Stmt::Return(None))) {
        body.pop();
    }
}

/// Prepends `global`/`nonlocal` declarations recorded by the simulator.
fn declare_scopes(body: &mut Vec<Stmt>, sim: &Simulator) {
    if !sim.nonlocal_names.is_empty() {
        body.insert(0, Stmt::Nonlocal(sim.nonlocal_names.clone()));
    }
    if !sim.global_names.is_empty() {
        body.insert(0, Stmt::Global(sim.global_names.clone()));
    }
}

/// One entry of the loop stack.
struct LoopFrame {
    header: u32,
    end: u32,
    /// True until the loop predicate has been claimed.
    awaiting_predicate: bool,
    predicate: Option<Expr>,
    predicate_exit: Option<u32>,
    /// Forward-jump targets of `break` statements.
    break_targets: Vec<u32>,
    /// Statement count at loop entry, to detect "no statements yet".
    stmt_base: usize,
}

/// Comprehension reconstruction state shared across nested clauses.
#[derive(Default)]
struct CompState {
    clauses: Vec<Comprehension>,
    kind: Option<CompKind>,
    element: Option<Expr>,
    key: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompKind {
    List,
    Set,
    Dict,
    Generator,
}

impl CompState {
    fn into_expr(self, code: &CodeObject, _sim: &mut Simulator) -> DecompileResult<Expr> {
        let kind = self.kind.or(match code.name.as_str() {
            "<listcomp>" => Some(CompKind::List),
            "<setcomp>" => Some(CompKind::Set),
            "<dictcomp>" => Some(CompKind::Dict),
            "<genexpr>" => Some(CompKind::Generator),
            _ => None,
        });
        let generators = self.clauses;
        if generators.is_empty() {
            return Err(DecompileError::InvalidComprehension { offset: 0 });
        }
        match kind {
            Some(CompKind::List) => Ok(Expr::ListComp {
                element: Box::new(self.element.ok_or(DecompileError::InvalidComprehension { offset: 0 })?),
                generators,
            }),
            Some(CompKind::Set) => Ok(Expr::SetComp {
                element: Box::new(self.element.ok_or(DecompileError::InvalidComprehension { offset: 0 })?),
                generators,
            }),
            Some(CompKind::Dict) => Ok(Expr::DictComp {
                key: Box::new(self.key.ok_or(DecompileError::InvalidComprehension { offset: 0 })?),
                value: Box::new(self.element.ok_or(DecompileError::InvalidComprehension { offset: 0 })?),
                generators,
            }),
            Some(CompKind::Generator) => Ok(Expr::GeneratorExp {
                element: Box::new(self.element.ok_or(DecompileError::InvalidComprehension { offset: 0 })?),
                generators,
            }),
            None => Err(DecompileError::InvalidComprehension { offset: 0 }),
        }
    }
}

pub(crate) struct Structurer<'a> {
    ctx: &'a Ctx<'a>,
    insns: &'a [Instruction],
    index_of: AHashMap<u32, usize>,
    graph: &'a BlockGraph,
    loops: Vec<LoopFrame>,
    /// Exception-table entry starts already consumed by a try-statement.
    claimed_regions: Vec<u32>,
    pub diags: Vec<Diagnostic>,
}

impl<'a> Structurer<'a> {
    pub fn new(ctx: &'a Ctx<'a>, insns: &'a [Instruction], graph: &'a BlockGraph) -> Self {
        let index_of = insns.iter().enumerate().map(|(index, insn)| (insn.offset, index)).collect();
        Self {
            ctx,
            insns,
            index_of,
            graph,
            loops: Vec::new(),
            claimed_regions: Vec::new(),
            diags: Vec::new(),
        }
    }

    fn diag(&mut self, offset: u32, message: impl Into<String>) {
        self.diags.push(Diagnostic::new(offset, message));
    }

    fn version(&self) -> Version {
        self.ctx.version
    }

    /// Instruction index for a byte offset; offsets always come from jump
    /// targets, so a miss means damaged bytecode.
    fn idx(&self, offset: u32) -> Option<usize> {
        self.index_of.get(&offset).copied()
    }

    /// Index for a target offset, clamped into `[0, len]`.
    fn idx_or_end(&self, offset: u32) -> usize {
        self.idx(offset).unwrap_or(self.insns.len())
    }

    /// Structures `[start, end)` into statements on `sim`.
    pub fn run(&mut self, sim: &mut Simulator, start: usize, end: usize) -> DecompileResult<()> {
        let mut index = start;
        while index < end {
            index = self.step_at(sim, index, end)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn step_at(&mut self, sim: &mut Simulator, index: usize, end: usize) -> DecompileResult<usize> {
        use Opcode as Op;
        let insn = self.insns[index];
        let off = insn.offset;

        // A 3.11+ exception region opening here becomes a try-statement;
        // with-statements own their regions via WITH_EXCEPT_START.
        if self.version().has_exception_table() && !self.claimed_regions.contains(&off) {
            if let Some(entry) = self.ctx.code.exception_table.iter().find(|entry| entry.start == off).copied() {
                if self.handler_starts_with(entry.target, Op::PushExcInfo)
                    && !self.handler_contains(entry.target, Op::WithExceptStart)
                    && !matches!(insn.opcode, Op::BeforeWith | Op::BeforeAsyncWith)
                {
                    self.claimed_regions.push(off);
                    return self.recover_try_table(sim, index, entry.end, entry.target, end);
                }
            }
        }

        // Loop headers, unless we are already iterating this very loop.
        if self.graph.is_loop_header(off) && self.loops.last().map_or(true, |frame| frame.header != off) {
            return self.recover_loop(sim, index, end);
        }

        match insn.opcode {
            Op::ForIter | Op::ForLoop => self.recover_loop(sim, index, end),

            Op::JumpIfFalseOrPop | Op::JumpIfTrueOrPop => self.recover_short_circuit(sim, index),

            op if op.is_conditional_jump() => self.recover_conditional(sim, index, end),

            op if op.is_unconditional_jump() => {
                let target = insn.jump_target(self.version()).unwrap_or(off);
                self.handle_plain_jump(sim, index, target);
                Ok(index + 1)
            }

            Op::SetupLoop => {
                // The loop itself is recognized from its backward edge;
                // the block marker carries no extra information.
                Ok(index + 1)
            }
            Op::BreakLoop => {
                if let Some(frame) = self.loops.last_mut() {
                    frame.break_targets.push(frame.end);
                }
                sim.stmts.push(Stmt::Break);
                Ok(index + 1)
            }
            Op::ContinueLoop => {
                sim.stmts.push(Stmt::Continue);
                Ok(index + 1)
            }
            Op::SetupExcept => self.recover_try_legacy(sim, index, end, true),
            Op::SetupFinally => {
                if self.version() >= Version::new(3, 8) {
                    // 3.8+ uses SETUP_FINALLY for except regions too; the
                    // handler shape decides.
                    let target = insn.jump_target(self.version()).unwrap_or(off);
                    let except_like = self.idx(target).is_some_and(|handler| {
                        matches!(self.insns.get(handler).map(|i| i.opcode), Some(Op::DupTop))
                    });
                    self.recover_try_legacy(sim, index, end, except_like)
                } else {
                    self.recover_try_legacy(sim, index, end, false)
                }
            }
            Op::SetupWith | Op::SetupAsyncWith => self.recover_with_legacy(sim, index, end),
            Op::BeforeWith | Op::BeforeAsyncWith => self.recover_with_table(sim, index, end),

            // Block-management residue that reaches the top level when a
            // surrounding construct was recovered without consuming it.
            Op::PopBlock | Op::EndFinally | Op::PopExcept | Op::BeginFinally | Op::EndFor | Op::Invalid => {
                if insn.opcode == Op::Invalid {
                    self.diag(off, "invalid instruction".to_owned());
                }
                Ok(index + 1)
            }

            _ => {
                sim.step(&insn)?;
                Ok(index + 1)
            }
        }
    }

    fn handler_starts_with(&self, target: u32, opcode: Opcode) -> bool {
        self.idx(target)
            .and_then(|index| self.insns.get(index))
            .is_some_and(|insn| insn.opcode == opcode)
    }

    /// Unconditional jumps surviving to the top level are loop exits.
    fn handle_plain_jump(&mut self, sim: &mut Simulator, index: usize, target: u32) {
        let off = self.insns[index].offset;
        let Some((header, loop_end)) = self.loops.last().map(|frame| (frame.header, frame.end)) else {
            // A forward jump with no enclosing construct: recovery of the
            // surrounding region should have consumed it.
            self.diag(off, format!("stray jump to offset {target}"));
            return;
        };
        if target <= header {
            // Jumping at the header from anywhere but the loop tail is a
            // `continue`; the tail jump is the loop edge itself.
            let is_tail = self.insns.get(index + 1).map_or(true, |next| next.offset >= loop_end);
            if !is_tail {
                sim.stmts.push(Stmt::Continue);
            }
        } else if target >= loop_end {
            if let Some(frame) = self.loops.last_mut() {
                frame.break_targets.push(target);
            }
            sim.stmts.push(Stmt::Break);
        } else {
            self.diag(off, format!("stray jump to offset {target}"));
        }
    }

    /// JUMP_IF_{FALSE,TRUE}_OR_POP: short-circuit in value position.
    fn recover_short_circuit(&mut self, sim: &mut Simulator, index: usize) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let off = insn.offset;
        let target = insn.jump_target(self.version()).unwrap_or(off);
        let join = self.idx_or_end(target);
        let lhs = sim.pop_expr(off)?;

        // Chained comparisons leave a cleanup path (ROT_TWO; POP_TOP) at
        // the jump target that only the short-circuit branch reaches; the
        // main path jumps over it. Evaluate up to that jump and resume
        // past the dead cleanup.
        let mut segment_end = join;
        let mut resume = join;
        if join > index + 1 {
            let last = &self.insns[join - 1];
            if last.opcode.is_unconditional_jump() {
                if let Some(merge) = last.jump_target(self.version()) {
                    if merge > target {
                        segment_end = join - 1;
                        resume = self.idx_or_end(merge);
                    }
                }
            }
        }

        // The right-hand side evaluates on the fall-through path.
        self.run(sim, index + 1, segment_end)?;
        let rhs = sim.pop_expr(off)?;
        let op = if insn.opcode == Opcode::JumpIfFalseOrPop {
            BoolOp::And
        } else {
            BoolOp::Or
        };
        sim.push_expr(join_bool(op, lhs, rhs));
        Ok(resume)
    }

    /// Conditional jumps: if/elif chains, ternaries, asserts, and the
    /// predicates of while loops.
    #[allow(clippy::too_many_lines)]
    fn recover_conditional(&mut self, sim: &mut Simulator, index: usize, end: usize) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let off = insn.offset;

        let (mut test, jump_true) = self.pop_test(sim, &insn)?;
        let mut else_target = insn.jump_target(self.version()).unwrap_or(off);
        let mut body_start = index + 1;

        // Value-position short circuit without *_OR_POP (3.12+): the
        // operand was COPYed, the jump keeps the copy and the fall-through
        // pops it before evaluating the right-hand side.
        if matches!(self.insns.get(body_start).map(|i| i.opcode), Some(Opcode::PopTop)) {
            let copy_on_top = match sim.stack.last() {
                Some(Cell::Expr(copy)) => {
                    *copy == test || matches!(insn.opcode, Opcode::PopJumpIfNone | Opcode::PopJumpIfNotNone)
                }
                _ => false,
            };
            if copy_on_top {
                let join = self.idx_or_end(else_target).min(end);
                sim.pop(off)?;
                self.run(sim, body_start + 1, join)?;
                let rhs = sim.pop_expr(off)?;
                let op = if jump_true { BoolOp::Or } else { BoolOp::And };
                sim.push_expr(join_bool(op, test, rhs));
                return Ok(join);
            }
        }

        // While-loop predicate: the first test inside a fresh loop whose
        // else-edge leaves the loop body.
        if let Some(frame) = self.loops.last_mut() {
            if frame.awaiting_predicate
                && sim.stmts.len() == frame.stmt_base
                && (else_target >= frame.end || else_target < frame.header)
            {
                let predicate = if jump_true { test.negated() } else { test };
                frame.predicate = Some(predicate);
                frame.predicate_exit = Some(else_target);
                frame.awaiting_predicate = false;
                return Ok(body_start);
            }
        }

        // Backward conditional edge: a loop tail test (`while` with the
        // test at the bottom). The enclosing loop recovery rewrites it.
        if else_target <= off {
            if let Some(frame) = self.loops.last_mut() {
                if else_target <= frame.header {
                    let predicate = if jump_true { test } else { test.negated() };
                    // `if pred: continue`-shaped tail; expressed as a
                    // plain conditional continue.
                    sim.stmts.push(Stmt::If {
                        test: predicate,
                        body: vec![Stmt::Continue],
                        orelse: Vec::new(),
                    });
                    return Ok(index + 1);
                }
            }
            self.diag(off, "unstructured backward branch");
            return Ok(index + 1);
        }

        // Fold and/or chains: further tests that share the else-target
        // (and), or true-jumps into the body (or). The probe inspects on
        // a fork; nothing is committed until the shape matches.
        if !jump_true {
            while let Some((jump_index, next_true, target)) = self.probe_pure_test(sim, body_start, else_target) {
                let and_shape = !next_true && target == else_target;
                let or_shape =
                    next_true && target == self.insns.get(jump_index + 1).map_or(0, |next| next.offset);
                if !(and_shape || or_shape) {
                    break;
                }
                let (expr, _) = self.commit_pure_test(sim, body_start, jump_index)?;
                let op = if and_shape { BoolOp::And } else { BoolOp::Or };
                test = join_bool(op, test, expr);
                body_start = jump_index + 1;
            }
        } else {
            // `a or b`: true-jump over the remaining tests into the body.
            let body_target = else_target;
            if let Some((jump_index, next_true, target)) = self.probe_pure_test(sim, body_start, body_target) {
                if !next_true && self.insns[jump_index].next_offset() <= body_target {
                    // test OR expr, body at fall-through, else at target.
                    let (expr, _) = self.commit_pure_test(sim, body_start, jump_index)?;
                    test = join_bool(BoolOp::Or, test, expr);
                    body_start = jump_index + 1;
                    else_target = target;
                    return self.finish_conditional(sim, off, test, body_start, else_target, end);
                }
            }
            // Lone jump-if-true: invert into a plain if.
            test = test.negated();
        }

        self.finish_conditional(sim, off, test, body_start, else_target, end)
    }

    /// Pops the tested expression, oriented so fall-through executes the
    /// body; returns the raw jump sense alongside.
    fn pop_test(&mut self, sim: &mut Simulator, insn: &Instruction) -> DecompileResult<(Expr, bool)> {
        use Opcode as Op;
        let off = insn.offset;
        let expr = sim.pop_expr(off)?;
        Ok(match insn.opcode {
            Op::PopJumpIfTrue
            | Op::PopJumpForwardIfTrue
            | Op::PopJumpBackwardIfTrue
            | Op::JumpIfTrue => (expr, true),
            Op::PopJumpIfNone | Op::PopJumpForwardIfNone | Op::PopJumpBackwardIfNone => {
                (Expr::compare(expr, CmpOp::IsNot, Expr::none()), false)
            }
            Op::PopJumpIfNotNone | Op::PopJumpForwardIfNotNone | Op::PopJumpBackwardIfNotNone => {
                (Expr::compare(expr, CmpOp::Is, Expr::none()), false)
            }
            _ => (expr, false),
        })
    }

    /// Looks for `pure-expression* cond-jump` starting at `from`,
    /// stopping before `limit_offset`, without touching `sim`. Returns
    /// the jump's index, its sense, and its target.
    fn probe_pure_test(&self, sim: &Simulator, from: usize, limit_offset: u32) -> Option<(usize, bool, u32)> {
        let mut scan = from;
        while scan < self.insns.len() && self.insns[scan].offset < limit_offset {
            let op = self.insns[scan].opcode;
            if op.is_conditional_jump() {
                break;
            }
            if op.is_jump() || op.is_terminal() || matches!(op, Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith)
            {
                return None;
            }
            scan += 1;
        }
        if scan >= self.insns.len() || scan == from || self.insns[scan].offset >= limit_offset {
            return None;
        }
        let jump = self.insns[scan];
        if !jump.opcode.is_conditional_jump() {
            return None;
        }

        // Dry run on a fork: pure means no statements and exactly one
        // new value.
        let mut fork = sim.fork();
        let base = fork.stack.len();
        for insn in &self.insns[from..scan] {
            if fork.step(insn).is_err() {
                return None;
            }
        }
        if !fork.stmts.is_empty() || fork.stack.len() != base + 1 {
            return None;
        }
        let jump_true = matches!(
            jump.opcode,
            Opcode::PopJumpIfTrue | Opcode::PopJumpForwardIfTrue | Opcode::PopJumpBackwardIfTrue | Opcode::JumpIfTrue
        );
        let target = jump.jump_target(self.version())?;
        Some((scan, jump_true, target))
    }

    /// Replays a probed pure test for real, popping its expression.
    fn commit_pure_test(&mut self, sim: &mut Simulator, from: usize, jump_index: usize) -> DecompileResult<(Expr, bool)> {
        for insn in &self.insns[from..jump_index] {
            sim.step(insn)?;
        }
        let jump = self.insns[jump_index];
        self.pop_test(sim, &jump)
    }

    /// Builds the if/ternary once the test is settled.
    fn finish_conditional(
        &mut self,
        sim: &mut Simulator,
        off: u32,
        test: Expr,
        body_start: usize,
        else_target: u32,
        end: usize,
    ) -> DecompileResult<usize> {
        let else_idx = self.idx_or_end(else_target).min(end);

        // Locate a trailing jump over the else-branch.
        let mut body_end = else_idx;
        let mut merge_idx = None;
        if body_end > body_start {
            let last = &self.insns[body_end - 1];
            if last.opcode.is_unconditional_jump() {
                if let Some(target) = last.jump_target(self.version()) {
                    if target > else_target && self.in_current_region(target) {
                        merge_idx = Some(self.idx_or_end(target).min(end));
                        body_end -= 1;
                    } else if target <= last.offset || target >= else_target {
                        // break/continue or loop-back; leave it to the
                        // body recursion.
                    }
                }
            }
        }

        // Ternary: both branches are pure single-value expression runs.
        if let Some(merge) = merge_idx {
            if let Some(result) = self.try_ternary(sim, &test, body_start, body_end, else_idx, merge)? {
                sim.push_expr(result);
                return Ok(merge);
            }
        }

        // Statement form.
        let stmt_base = sim.stmts.len();
        self.run(sim, body_start, body_end)?;
        let body: Vec<Stmt> = sim.stmts.split_off(stmt_base);

        let orelse = if let Some(merge) = merge_idx {
            let orelse_base = sim.stmts.len();
            self.run(sim, else_idx, merge)?;
            sim.stmts.split_off(orelse_base)
        } else {
            Vec::new()
        };

        let resume = merge_idx.unwrap_or(else_idx);

        // `assert` sugar: `if test: raise AssertionError(...)`.
        if orelse.is_empty() {
            if let [Stmt::Raise { exc: Some(exc), cause: None }] = body.as_slice() {
                if let Some(msg) = assertion_message(exc) {
                    sim.stmts.push(Stmt::Assert {
                        test: test.negated(),
                        msg,
                    });
                    return Ok(resume);
                }
            }
        }

        let _ = off;
        sim.stmts.push(Stmt::If { test, body, orelse });
        Ok(resume)
    }

    /// True when `target` stays strictly inside the innermost loop; a
    /// jump at or past the loop end is a `break`, not an else-skip.
    fn in_current_region(&self, target: u32) -> bool {
        match self.loops.last() {
            Some(frame) => target < frame.end,
            None => true,
        }
    }

    fn try_ternary(
        &mut self,
        sim: &mut Simulator,
        test: &Expr,
        body_start: usize,
        body_end: usize,
        else_idx: usize,
        merge: usize,
    ) -> DecompileResult<Option<Expr>> {
        let Some((_, body_expr)) = self.pure_value_run(sim, body_start, body_end) else {
            return Ok(None);
        };
        let Some((fork, else_expr)) = self.pure_value_run(sim, else_idx, merge) else {
            return Ok(None);
        };
        // Adopt the else fork's bookkeeping (it saw the same prefix).
        sim.adopt(fork);
        Ok(Some(Expr::IfExp {
            test: Box::new(test.clone()),
            body: Box::new(body_expr),
            orelse: Box::new(else_expr),
        }))
    }

    /// Runs a range on a fork and keeps it only if it is a pure
    /// single-value expression run.
    fn pure_value_run<'s>(&mut self, sim: &Simulator<'s>, start: usize, end: usize) -> Option<(Simulator<'s>, Expr)> {
        let mut fork = sim.fork();
        let base = fork.stack.len();
        let mut index = start;
        while index < end {
            match self.step_at(&mut fork, index, end) {
                Ok(next) => index = next,
                Err(_) => return None,
            }
        }
        if !fork.stmts.is_empty() || fork.stack.len() != base + 1 {
            return None;
        }
        let expr = fork.pop_expr(0).ok()?;
        Some((fork, expr))
    }

    /// Loops: FOR_ITER-headed for loops and everything else as while.
    fn recover_loop(&mut self, sim: &mut Simulator, index: usize, end: usize) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let header = insn.offset;
        let loop_end = self
            .graph
            .loop_end(header)
            .or_else(|| {
                // FOR_ITER without a seen backward edge (e.g. an empty
                // body): fall back to the exhaustion target.
                insn.jump_target(self.version())
            })
            .unwrap_or(header);
        let loop_end_idx = self.idx_or_end(loop_end).min(end);

        if matches!(insn.opcode, Opcode::ForIter | Opcode::ForLoop) {
            return self.recover_for(sim, index, loop_end, loop_end_idx, end);
        }
        self.recover_while(sim, index, loop_end, loop_end_idx, end)
    }

    #[allow(clippy::too_many_lines)]
    fn recover_for(
        &mut self,
        sim: &mut Simulator,
        index: usize,
        loop_end: u32,
        loop_end_idx: usize,
        end: usize,
    ) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let off = insn.offset;
        let iter = sim.pop_expr(off)?;

        // 3.12+ inlined comprehension: the builder and a saved local sit
        // beneath the iterator.
        let builder_below = matches!(
            sim.stack.last(),
            Some(Cell::Expr(Expr::List(_) | Expr::Set(_) | Expr::Dict { .. }))
        ) && sim.stack.iter().rev().take(3).any(|cell| matches!(cell, Cell::SavedLocal(_)));
        if builder_below {
            sim.push_expr(iter);
            let mut comp = CompState::default();
            let resume = self.walk_comprehension_inline(sim, index, &mut comp)?;
            let expr = comp.into_expr(self.ctx.code, sim)?;
            // Replace the builder with the finished comprehension.
            sim.pop(off)?;
            sim.push_expr(expr);
            return Ok(resume);
        }

        let exit_target = insn.jump_target(self.version()).unwrap_or(loop_end);

        // The loop body starts by storing the iteration item.
        sim.push_expr(Expr::Placeholder("<for_item>".to_owned()));
        let body_start = index + 1;

        self.loops.push(LoopFrame {
            header: off,
            end: loop_end,
            awaiting_predicate: false,
            predicate: None,
            predicate_exit: None,
            break_targets: Vec::new(),
            stmt_base: sim.stmts.len(),
        });
        let stmt_base = sim.stmts.len();
        let body_result = self.run(sim, body_start, self.loop_tail(body_start, loop_end_idx));
        let frame = self.loops.pop().expect("frame pushed above");
        body_result?;

        let mut body = sim.stmts.split_off(stmt_base);
        let target = extract_for_target(&mut body).unwrap_or_else(|| Expr::Placeholder("<target>".to_owned()));

        // Skip loop epilogue (END_FOR, POP_ITER) after the body.
        let mut resume = loop_end_idx;
        while resume < end && matches!(self.insns.get(resume).map(|i| i.opcode), Some(Opcode::EndFor | Opcode::PopIter)) {
            resume += 1;
        }

        // An else-suite exists when a break jumps past the exhaustion
        // path, or the exhaustion target itself lies beyond the epilogue.
        let after_cleanup = self.insns.get(resume).map_or(loop_end, |insn| insn.offset);
        let max_break = frame.break_targets.iter().max().copied();
        let orelse_end = match max_break {
            Some(brk) if brk > after_cleanup => Some(brk),
            _ if exit_target > after_cleanup && self.idx(exit_target).is_some() => Some(exit_target),
            _ => None,
        };
        let orelse = if let Some(stop) = orelse_end {
            let stop_idx = self.idx_or_end(stop).min(end);
            let orelse_base = sim.stmts.len();
            self.run(sim, resume, stop_idx)?;
            resume = stop_idx;
            sim.stmts.split_off(orelse_base)
        } else {
            Vec::new()
        };

        let is_async = false;
        sim.stmts.push(Stmt::For {
            target,
            iter,
            body,
            orelse,
            is_async,
        });
        Ok(resume)
    }

    fn recover_while(
        &mut self,
        sim: &mut Simulator,
        index: usize,
        loop_end: u32,
        loop_end_idx: usize,
        end: usize,
    ) -> DecompileResult<usize> {
        let header = self.insns[index].offset;

        self.loops.push(LoopFrame {
            header,
            end: loop_end,
            awaiting_predicate: true,
            predicate: None,
            predicate_exit: None,
            break_targets: Vec::new(),
            stmt_base: sim.stmts.len(),
        });
        let stmt_base = sim.stmts.len();
        let body_result = self.run(sim, index, self.loop_tail(index, loop_end_idx));
        let frame = self.loops.pop().expect("frame pushed above");
        body_result?;

        let body = sim.stmts.split_off(stmt_base);
        let test = frame.predicate.unwrap_or(Expr::Constant(Constant::Bool(true)));

        // The else-suite lives between the predicate exit and the first
        // break target, when a break jumps past it.
        let mut resume = loop_end_idx;
        let orelse = match (frame.predicate_exit, frame.break_targets.iter().max()) {
            (Some(exit), Some(&brk)) if brk > exit && exit >= loop_end => {
                let orelse_base = sim.stmts.len();
                let exit_idx = self.idx_or_end(exit).min(end);
                let brk_idx = self.idx_or_end(brk).min(end);
                self.run(sim, exit_idx, brk_idx)?;
                resume = brk_idx;
                sim.stmts.split_off(orelse_base)
            }
            _ => Vec::new(),
        };

        sim.stmts.push(Stmt::While { test, body, orelse });
        Ok(resume)
    }

    /// Excludes the closing backward jump from a loop body range.
    fn loop_tail(&self, _start: usize, loop_end_idx: usize) -> usize {
        if loop_end_idx == 0 {
            return loop_end_idx;
        }
        match self.insns.get(loop_end_idx - 1) {
            Some(insn) if insn.opcode.is_unconditional_jump() => loop_end_idx - 1,
            _ => loop_end_idx,
        }
    }

    /// Shared comprehension-body walker for the separate-code form.
    fn walk_comprehension(&mut self, sim: &mut Simulator, index: usize, comp: &mut CompState) -> DecompileResult<()> {
        self.walk_comprehension_inline(sim, index, comp).map(|_| ())
    }

    /// Walks one FOR_ITER-headed comprehension clause; returns the index
    /// to resume at (past the restore epilogue for the inlined form).
    #[allow(clippy::too_many_lines)]
    fn walk_comprehension_inline(&mut self, sim: &mut Simulator, index: usize, comp: &mut CompState) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let off = insn.offset;
        let header = insn.offset;
        let iter = sim.pop_expr(off)?;
        let loop_end = self
            .graph
            .loop_end(header)
            .or_else(|| insn.jump_target(self.version()))
            .ok_or(DecompileError::InvalidComprehension { offset: off })?;
        let loop_end_idx = self.idx_or_end(loop_end);
        let backjump_idx = self.loop_tail(index, loop_end_idx);

        comp.clauses.push(Comprehension {
            target: Expr::Placeholder("<target>".to_owned()),
            iter,
            ifs: Vec::new(),
            is_async: false,
        });
        let clause = comp.clauses.len() - 1;

        // The item lands on the stack; the next store names the target.
        sim.push_expr(Expr::Placeholder("<comp_item>".to_owned()));

        let mut i = index + 1;
        let mut target_taken = false;
        while i < backjump_idx {
            let insn = self.insns[i];
            match insn.opcode {
                // Clause target: the first store of the item.
                Opcode::StoreFast | Opcode::StoreName | Opcode::StoreDeref if !target_taken => {
                    let base = sim.stmts.len();
                    sim.step(&insn)?;
                    if sim.stmts.len() > base {
                        if let Some(Stmt::Assign { targets, .. }) = sim.stmts.pop() {
                            comp.clauses[clause].target = store_target(targets);
                        }
                    }
                    target_taken = true;
                    i += 1;
                }
                Opcode::StoreFastLoadFast => {
                    // Store the item, immediately reload it.
                    let store = insn.arg >> 4;
                    let load = insn.arg & 0xF;
                    let name = self.ctx.code.varname(store).unwrap_or("<target>").to_owned();
                    sim.pop(insn.offset)?;
                    if !target_taken {
                        comp.clauses[clause].target = Expr::store_name(name);
                        target_taken = true;
                    }
                    let load_name = self.ctx.code.varname(load).unwrap_or("<target>").to_owned();
                    sim.push_expr(Expr::name(load_name));
                    i += 1;
                }
                Opcode::UnpackSequence | Opcode::UnpackEx if !target_taken => {
                    // Tuple target: let the simulator assemble it, then
                    // steal the assignment.
                    let base = sim.stmts.len();
                    sim.step(&insn)?;
                    i += 1;
                    while i < backjump_idx && sim.stmts.len() == base {
                        sim.step(&self.insns[i])?;
                        i += 1;
                    }
                    if let Some(Stmt::Assign { targets, .. }) = sim.stmts.pop() {
                        comp.clauses[clause].target = store_target(targets);
                    }
                    target_taken = true;
                }
                // Guards jump to the next iteration.
                op if op.is_conditional_jump() => {
                    let target = insn.jump_target(self.version()).unwrap_or(0);
                    let continues = target == header
                        || self.idx_or_end(target) >= backjump_idx && target <= loop_end;
                    if continues {
                        let (guard, jump_true) = self.pop_test(sim, &insn)?;
                        let guard = if jump_true { guard.negated() } else { guard };
                        comp.clauses[clause].ifs.push(guard);
                        i += 1;
                    } else {
                        // A conditional element (ternary or the like).
                        i = self.step_at(sim, i, backjump_idx)?;
                    }
                }
                // Nested clause.
                Opcode::ForIter | Opcode::ForLoop => {
                    i = self.walk_comprehension_inline(sim, i, comp)?;
                }
                Opcode::ListAppend => {
                    comp.kind.get_or_insert(CompKind::List);
                    comp.element = Some(sim.pop_expr(insn.offset)?);
                    i += 1;
                }
                Opcode::SetAdd => {
                    comp.kind.get_or_insert(CompKind::Set);
                    comp.element = Some(sim.pop_expr(insn.offset)?);
                    i += 1;
                }
                Opcode::MapAdd => {
                    comp.kind.get_or_insert(CompKind::Dict);
                    // 3.8+ pushes key then value.
                    if self.version() >= Version::new(3, 8) {
                        comp.element = Some(sim.pop_expr(insn.offset)?);
                        comp.key = Some(sim.pop_expr(insn.offset)?);
                    } else {
                        comp.key = Some(sim.pop_expr(insn.offset)?);
                        comp.element = Some(sim.pop_expr(insn.offset)?);
                    }
                    i += 1;
                }
                Opcode::YieldValue => {
                    comp.kind.get_or_insert(CompKind::Generator);
                    comp.element = Some(sim.pop_expr(insn.offset)?);
                    // Keep the stack balanced for the following POP_TOP.
                    sim.push_expr(Expr::none());
                    i += 1;
                }
                _ => {
                    sim.step(&insn)?;
                    i += 1;
                }
            }
        }

        // Skip the loop-back jump and epilogue (END_FOR, POP_ITER).
        let mut resume = loop_end_idx;
        while let Some(insn) = self.insns.get(resume) {
            match insn.opcode {
                Opcode::EndFor | Opcode::PopIter => resume += 1,
                // Inlined-form restore: SWAP 2; STORE_FAST saved.
                Opcode::Swap => {
                    sim.step(insn)?;
                    resume += 1;
                }
                Opcode::StoreFast if matches!(top_below(sim), Some(Cell::SavedLocal(_)) | None)
                    || matches!(sim.stack.last(), Some(Cell::SavedLocal(_))) =>
                {
                    sim.step(insn)?;
                    resume += 1;
                }
                _ => break,
            }
        }
        Ok(resume)
    }

    /// Legacy (pre-3.11) try/except and try/finally via SETUP_* blocks.
    #[allow(clippy::too_many_lines)]
    fn recover_try_legacy(&mut self, sim: &mut Simulator, index: usize, end: usize, except_like: bool) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let off = insn.offset;
        let handler_target = insn.jump_target(self.version()).unwrap_or(off);
        let handler_idx = self.idx_or_end(handler_target).min(end);

        // Body runs to the matching POP_BLOCK.
        let mut depth = 0usize;
        let mut pop_block_idx = None;
        for (scan, insn) in self.insns.iter().enumerate().take(handler_idx).skip(index + 1) {
            match insn.opcode {
                Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith | Opcode::SetupAsyncWith | Opcode::SetupLoop => {
                    depth += 1;
                }
                Opcode::PopBlock => {
                    if depth == 0 {
                        pop_block_idx = Some(scan);
                        break;
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        let Some(pop_block_idx) = pop_block_idx else {
            self.diag(off, "SETUP block without POP_BLOCK; emitting body inline");
            return Ok(index + 1);
        };

        let stmt_base = sim.stmts.len();
        self.run(sim, index + 1, pop_block_idx)?;
        let body = sim.stmts.split_off(stmt_base);

        // Normal-path jump over the handler tells us where to resume.
        let mut after = None;
        if let Some(jump) = self.insns.get(pop_block_idx + 1) {
            if jump.opcode.is_unconditional_jump() {
                after = jump.jump_target(self.version());
            } else if matches!(jump.opcode, Opcode::BeginFinally) {
                // try/finally normal path falls into the finally suite.
            }
        }

        if except_like {
            let (handlers, resume) = self.parse_legacy_handlers(sim, handler_idx, after, end)?;
            let resume = resume.max(self.idx_or_end(after.unwrap_or(handler_target)).min(end));
            sim.stmts.push(Stmt::Try {
                body,
                handlers,
                orelse: Vec::new(),
                finalbody: Vec::new(),
                is_star: false,
            });
            Ok(resume)
        } else {
            // try/finally: the handler suite runs to END_FINALLY. The
            // BEGIN_FINALLY/LOAD_CONST None separator between POP_BLOCK
            // and the suite has no stack effect in the abstract machine.
            let mut scan = handler_idx;
            while scan < end && !matches!(self.insns[scan].opcode, Opcode::EndFinally) {
                scan += 1;
            }
            let final_base = sim.stmts.len();
            self.run(sim, handler_idx, scan)?;
            let finalbody = sim.stmts.split_off(final_base);
            let resume = (scan + 1).min(end);
            sim.stmts.push(Stmt::Try {
                body,
                handlers: Vec::new(),
                orelse: Vec::new(),
                finalbody,
                is_star: false,
            });
            Ok(resume)
        }
    }

    /// Parses `except` clauses at a legacy handler site.
    fn parse_legacy_handlers(
        &mut self,
        sim: &mut Simulator,
        handler_idx: usize,
        after: Option<u32>,
        end: usize,
    ) -> DecompileResult<(Vec<ExceptHandler>, usize)> {
        let mut handlers = Vec::new();
        let mut i = handler_idx;
        let after_idx = after.map_or(end, |offset| self.idx_or_end(offset).min(end));

        while i < after_idx {
            let insn = self.insns[i];
            match insn.opcode {
                Opcode::DupTop => {
                    // DUP_TOP; <type expr>; exc-match; jump next.
                    i += 1;
                    let match_jump = self.scan_exc_match(i, after_idx);
                    let Some((type_end, next_target)) = match_jump else {
                        self.diag(insn.offset, "unrecognized except clause");
                        break;
                    };
                    let mut fork = sim.fork();
                    for insn in &self.insns[i..type_end] {
                        fork.step(insn)?;
                    }
                    let typ = fork.pop_expr(insn.offset).ok();
                    i = self.idx_or_end(next_target).min(after_idx);
                    let clause_start = type_end + match_jump_len(self.insns, type_end);
                    let (handler, _) = self.parse_handler_body(sim, clause_start, i, typ)?;
                    handlers.push(handler);
                }
                Opcode::PopTop => {
                    // Bare except: POP_TOP x3 then the suite.
                    let mut start = i;
                    let mut pops = 0;
                    while pops < 3 && matches!(self.insns.get(start).map(|x| x.opcode), Some(Opcode::PopTop)) {
                        start += 1;
                        pops += 1;
                    }
                    let (handler, next) = self.parse_handler_body(sim, start, after_idx, None)?;
                    handlers.push(handler);
                    i = next;
                }
                Opcode::EndFinally | Opcode::Reraise => {
                    i += 1;
                    break;
                }
                _ => break,
            }
        }
        Ok((handlers, i))
    }

    /// Finds the exception-match test ending a handler's type check.
    /// Returns (index of the match jump, next-handler target).
    fn scan_exc_match(&self, from: usize, limit: usize) -> Option<(usize, u32)> {
        for scan in from..limit {
            let insn = &self.insns[scan];
            match insn.opcode {
                Opcode::JumpIfNotExcMatch => {
                    return Some((scan, insn.jump_target(self.version())?));
                }
                Opcode::CompareOp => {
                    let next = self.insns.get(scan + 1)?;
                    if next.opcode.is_conditional_jump() {
                        return Some((scan, next.jump_target(self.version())?));
                    }
                }
                op if op.is_jump() => return None,
                _ => {}
            }
        }
        None
    }

    /// Parses one handler suite: optional name binding, body, epilogue.
    fn parse_handler_body(
        &mut self,
        sim: &mut Simulator,
        start: usize,
        limit: usize,
        typ: Option<Expr>,
    ) -> DecompileResult<(ExceptHandler, usize)> {
        let mut i = start;
        let mut name = None;

        // POP_TOP / STORE name / POP_TOP prologue.
        let mut pops = 0;
        while i < limit && pops < 3 {
            match self.insns[i].opcode {
                Opcode::PopTop => {
                    i += 1;
                    pops += 1;
                }
                Opcode::StoreFast | Opcode::StoreName => {
                    let insn = self.insns[i];
                    let bound = if insn.opcode == Opcode::StoreFast {
                        self.ctx.code.varname(insn.arg).map(str::to_owned)
                    } else {
                        self.ctx.code.name(insn.arg).map(str::to_owned)
                    };
                    name = bound;
                    i += 1;
                    pops += 1;
                }
                _ => break,
            }
        }

        // Body runs until POP_EXCEPT / END_FINALLY / the jump out.
        let body_start = i;
        let mut body_end = i;
        while body_end < limit {
            match self.insns[body_end].opcode {
                Opcode::PopExcept | Opcode::EndFinally => break,
                op if op.is_unconditional_jump() => break,
                _ => body_end += 1,
            }
        }
        let stmt_base = sim.stmts.len();
        self.run(sim, body_start, body_end)?;
        let mut body = sim.stmts.split_off(stmt_base);
        // Name cleanup (`del e`) the compiler appends is not source.
        body.retain(|stmt| !is_handler_cleanup(stmt, name.as_deref()));

        // Consume the epilogue.
        let mut next = body_end;
        while next < limit {
            match self.insns[next].opcode {
                Opcode::PopExcept | Opcode::EndFinally | Opcode::PopTop | Opcode::LoadConst | Opcode::StoreFast
                | Opcode::StoreName | Opcode::DeleteFast | Opcode::DeleteName => next += 1,
                op if op.is_unconditional_jump() => {
                    next += 1;
                    break;
                }
                _ => break,
            }
        }

        Ok((ExceptHandler { typ, name, body }, next))
    }

    /// 3.11+ try/except from the exception table.
    fn recover_try_table(
        &mut self,
        sim: &mut Simulator,
        index: usize,
        body_end_off: u32,
        handler_off: u32,
        end: usize,
    ) -> DecompileResult<usize> {
        let body_end_idx = self.idx_or_end(body_end_off).min(end);
        let stmt_base = sim.stmts.len();
        self.run(sim, index, body_end_idx)?;
        let body = sim.stmts.split_off(stmt_base);

        // Normal path: a jump over the handler region.
        let mut resume_off = None;
        if let Some(jump) = self.insns.get(body_end_idx) {
            if jump.opcode.is_unconditional_jump() {
                resume_off = jump.jump_target(self.version());
            }
        }

        let handler_idx = self.idx_or_end(handler_off).min(end);
        let (handlers, finalbody, handler_end) = self.parse_table_handlers(sim, handler_idx, end)?;

        let resume = resume_off
            .map(|offset| self.idx_or_end(offset).min(end))
            .unwrap_or(handler_end)
            .max(handler_end);

        if handlers.is_empty() && finalbody.is_empty() {
            // Could not make sense of the handler; keep the body.
            self.diag(handler_off, "unrecognized exception handler");
            sim.stmts.extend(body);
            return Ok(resume);
        }

        sim.stmts.push(Stmt::Try {
            body,
            handlers,
            orelse: Vec::new(),
            finalbody,
            is_star: false,
        });
        Ok(resume)
    }

    /// Parses 3.11+ handler chains: PUSH_EXC_INFO, CHECK_EXC_MATCH tests,
    /// bodies, POP_EXCEPT / RERAISE epilogues.
    #[allow(clippy::too_many_lines)]
    fn parse_table_handlers(
        &mut self,
        sim: &mut Simulator,
        handler_idx: usize,
        end: usize,
    ) -> DecompileResult<(Vec<ExceptHandler>, Vec<Stmt>, usize)> {
        let mut handlers = Vec::new();
        let mut finalbody = Vec::new();
        let mut i = handler_idx;

        if !matches!(self.insns.get(i).map(|x| x.opcode), Some(Opcode::PushExcInfo)) {
            return Ok((handlers, finalbody, i));
        }
        i += 1;

        loop {
            // Typed clause: <type expr>; CHECK_EXC_MATCH; POP_JUMP_IF_FALSE next.
            let mut scan = i;
            let mut check = None;
            while scan < end {
                match self.insns[scan].opcode {
                    Opcode::CheckExcMatch => {
                        check = Some(scan);
                        break;
                    }
                    op if op.is_jump() || op.is_terminal() => break,
                    Opcode::PopTop | Opcode::StoreFast | Opcode::StoreName if scan == i => break,
                    _ => scan += 1,
                }
            }

            if let Some(check) = check {
                let mut fork = sim.fork();
                for insn in &self.insns[i..check] {
                    fork.step(insn)?;
                }
                let typ = fork.pop_expr(self.insns[check].offset).ok();
                let Some(jump) = self.insns.get(check + 1) else { break };
                if !jump.opcode.is_conditional_jump() {
                    break;
                }
                let next_target = jump.jump_target(self.version()).unwrap_or(0);
                let next_idx = self.idx_or_end(next_target).min(end);
                let (handler, _) = self.parse_handler_body(sim, check + 2, next_idx, typ)?;
                handlers.push(handler);
                i = next_idx;
                // The chain ends at a RERAISE for the no-match path.
                match self.insns.get(i).map(|x| x.opcode) {
                    Some(Opcode::Reraise) => {
                        i += 1;
                        break;
                    }
                    Some(Opcode::CopyFreeVars | Opcode::PushExcInfo) => {
                        i += 1;
                    }
                    _ => {}
                }
            } else {
                // Untyped clause (bare except) or a finally suite.
                let limit = self.handler_region_end(i, end);
                let (handler, next) = self.parse_handler_body(sim, i, limit, None)?;
                if handler.body.iter().all(|stmt| matches!(stmt, Stmt::Raise { .. })) && handler.body.len() <= 1 && handlers.is_empty()
                {
                    // A lone re-raise suite is a finally block shape.
                    finalbody = handler.body;
                } else {
                    handlers.push(handler);
                }
                i = next.max(limit.min(end));
                break;
            }
        }

        // Skip trailing cleanup (COPY/POP_EXCEPT/RERAISE runs).
        while i < end
            && matches!(
                self.insns[i].opcode,
                Opcode::Copy | Opcode::PopExcept | Opcode::Reraise | Opcode::PopTop | Opcode::Swap
            )
        {
            i += 1;
        }
        Ok((handlers, finalbody, i))
    }

    /// Extent of a handler region: until the next RERAISE or the end.
    fn handler_region_end(&self, from: usize, end: usize) -> usize {
        for scan in from..end {
            if matches!(self.insns[scan].opcode, Opcode::Reraise) {
                return scan;
            }
        }
        end
    }

    /// Pre-3.11 with-statement.
    fn recover_with_legacy(&mut self, sim: &mut Simulator, index: usize, end: usize) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let off = insn.offset;
        let is_async = insn.opcode == Opcode::SetupAsyncWith;
        let context = sim.pop_expr(off)?;
        let cleanup_target = insn.jump_target(self.version()).unwrap_or(off);

        // Enter value: bound by a store, or discarded by POP_TOP.
        let mut i = index + 1;
        let optional_vars = self.with_target(sim, &mut i)?;

        // Body to the matching POP_BLOCK.
        let mut depth = 0usize;
        let mut pop_block_idx = None;
        for scan in i..self.insns.len() {
            match self.insns[scan].opcode {
                Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith | Opcode::SetupAsyncWith | Opcode::SetupLoop => depth += 1,
                Opcode::PopBlock => {
                    if depth == 0 {
                        pop_block_idx = Some(scan);
                        break;
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        let Some(pop_block_idx) = pop_block_idx else {
            self.diag(off, "SETUP_WITH without POP_BLOCK");
            return Ok(i);
        };

        let stmt_base = sim.stmts.len();
        self.run(sim, i, pop_block_idx)?;
        let body = sim.stmts.split_off(stmt_base);

        // Normal path after POP_BLOCK: an exit call followed by a jump
        // over the cleanup handler, or a fall into it.
        let mut resume = self.idx_or_end(cleanup_target).min(end);
        for scan in pop_block_idx + 1..end.min(self.insns.len()) {
            let op = self.insns[scan].opcode;
            if op.is_unconditional_jump() {
                if let Some(target) = self.insns[scan].jump_target(self.version()) {
                    resume = self.idx_or_end(target).min(end);
                }
                break;
            }
            if !matches!(
                op,
                Opcode::LoadConst | Opcode::DupTop | Opcode::CallFunction | Opcode::PopTop | Opcode::BeginFinally
            ) {
                break;
            }
        }
        // Skip the cleanup block itself when we would land inside it.
        while resume < end
            && matches!(
                self.insns[resume].opcode,
                Opcode::WithCleanup
                    | Opcode::WithCleanupStart
                    | Opcode::WithCleanupFinish
                    | Opcode::EndFinally
                    | Opcode::PopTop
                    | Opcode::BeginFinally
            )
        {
            resume += 1;
        }

        sim.stmts.push(Stmt::With {
            items: vec![WithItem { context, optional_vars }],
            body,
            is_async,
        });
        Ok(resume)
    }

    /// 3.11+ with-statement (BEFORE_WITH / BEFORE_ASYNC_WITH).
    fn recover_with_table(&mut self, sim: &mut Simulator, index: usize, end: usize) -> DecompileResult<usize> {
        let insn = self.insns[index];
        let off = insn.offset;
        let is_async = insn.opcode == Opcode::BeforeAsyncWith;
        let context = sim.pop_expr(off)?;

        let mut i = index + 1;
        let optional_vars = self.with_target(sim, &mut i)?;

        // The protected body is the exception entry whose handler runs
        // WITH_EXCEPT_START.
        let body_off = self.insns.get(i).map_or(off, |insn| insn.offset);
        let entry = self
            .ctx
            .code
            .exception_table
            .iter()
            .find(|entry| entry.contains(body_off) && self.handler_contains(entry.target, Opcode::WithExceptStart))
            .copied();
        let Some(entry) = entry else {
            self.diag(off, "with-statement without a cleanup region");
            return Ok(i);
        };
        self.claimed_regions.push(entry.start);

        let body_end_idx = self.idx_or_end(entry.end).min(end);
        let stmt_base = sim.stmts.len();
        self.run(sim, i, body_end_idx)?;
        let body = sim.stmts.split_off(stmt_base);

        // Normal exit: LOAD_CONST None x2 (+ CALL 2) and a jump over the
        // handler; resume past whichever comes later.
        let mut resume = body_end_idx;
        while resume < end {
            let op = self.insns[resume].opcode;
            match op {
                Opcode::LoadConst | Opcode::PopTop | Opcode::Call | Opcode::CallFunction => resume += 1,
                op if op.is_unconditional_jump() => {
                    if let Some(target) = self.insns[resume].jump_target(self.version()) {
                        resume = self.idx_or_end(target).min(end);
                    }
                    break;
                }
                _ => break,
            }
        }
        // Skip the handler block when we land at it.
        while resume < end
            && matches!(
                self.insns[resume].opcode,
                Opcode::PushExcInfo
                    | Opcode::WithExceptStart
                    | Opcode::PopJumpIfTrue
                    | Opcode::Reraise
                    | Opcode::Copy
                    | Opcode::PopExcept
                    | Opcode::PopTop
                    | Opcode::Swap
            )
        {
            resume += 1;
        }

        sim.stmts.push(Stmt::With {
            items: vec![WithItem { context, optional_vars }],
            body,
            is_async,
        });
        Ok(resume)
    }

    fn handler_contains(&self, target: u32, opcode: Opcode) -> bool {
        let Some(start) = self.idx(target) else { return false };
        self.insns[start..]
            .iter()
            .take(4)
            .any(|insn| insn.opcode == opcode)
    }

    /// Captures a with-statement's `as` target (or its absence).
    fn with_target(&mut self, sim: &mut Simulator, i: &mut usize) -> DecompileResult<Option<Expr>> {
        sim.push_expr(Expr::Placeholder("<with_enter>".to_owned()));
        match self.insns.get(*i).map(|insn| insn.opcode) {
            Some(Opcode::PopTop) => {
                sim.pop(0)?;
                *i += 1;
                Ok(None)
            }
            Some(Opcode::StoreFast | Opcode::StoreName | Opcode::StoreGlobal | Opcode::StoreDeref) => {
                let base = sim.stmts.len();
                let insn = self.insns[*i];
                sim.step(&insn)?;
                *i += 1;
                if sim.stmts.len() > base {
                    if let Some(Stmt::Assign { targets, .. }) = sim.stmts.pop() {
                        return Ok(Some(store_target(targets)));
                    }
                }
                Ok(None)
            }
            Some(Opcode::UnpackSequence) => {
                let base = sim.stmts.len();
                while *i < self.insns.len() && sim.stmts.len() == base {
                    let insn = self.insns[*i];
                    sim.step(&insn)?;
                    *i += 1;
                }
                if let Some(Stmt::Assign { targets, .. }) = sim.stmts.pop() {
                    return Ok(Some(store_target(targets)));
                }
                Ok(None)
            }
            _ => {
                // No binding; drop the marker.
                sim.pop(0)?;
                Ok(None)
            }
        }
    }
}

/// Joins two tests into a boolean operation, flattening nested chains and
/// folding `a < b and b < c` into a chained comparison.
fn join_bool(op: BoolOp, lhs: Expr, rhs: Expr) -> Expr {
    if op == BoolOp::And {
        if let (
            Expr::Compare {
                left,
                ops: mut left_ops,
                comparators: mut left_comparators,
            },
            Expr::Compare {
                left: right_left,
                ops: right_ops,
                comparators: right_comparators,
            },
        ) = (lhs.clone(), rhs.clone())
        {
            if left_comparators.last() == Some(&*right_left) {
                left_ops.extend(right_ops);
                left_comparators.extend(right_comparators);
                return Expr::Compare {
                    left,
                    ops: left_ops,
                    comparators: left_comparators,
                };
            }
        }
    }
    match lhs {
        Expr::BoolOp { op: lhs_op, mut values } if lhs_op == op => {
            values.push(rhs);
            Expr::BoolOp { op, values }
        }
        other => Expr::BoolOp {
            op,
            values: vec![other, rhs],
        },
    }
}

/// Recognizes `raise AssertionError` / `raise AssertionError(msg)`.
fn assertion_message(exc: &Expr) -> Option<Option<Expr>> {
    match exc {
        Expr::Name { id, .. } if id == "AssertionError" => Some(None),
        Expr::Call { func, args, keywords } if keywords.is_empty() && args.len() <= 1 => match &**func {
            Expr::Name { id, .. } if id == "AssertionError" => Some(args.first().cloned()),
            _ => None,
        },
        _ => None,
    }
}

/// Handler epilogue statements that are compiler bookkeeping, not source.
fn is_handler_cleanup(stmt: &Stmt, name: Option<&str>) -> bool {
    let Some(name) = name else { return false };
    match stmt {
        Stmt::Assign { targets, value } => {
            matches!(targets.as_slice(), [Expr::Name { id, .. }] if id == name) && value.is_none_constant()
        }
        Stmt::Delete(targets) => {
            matches!(targets.as_slice(), [Expr::Name { id, .. }] if id == name)
        }
        _ => false,
    }
}

/// First assignment in a loop body binds the iteration variable.
fn extract_for_target(body: &mut Vec<Stmt>) -> Option<Expr> {
    if body.is_empty() {
        return None;
    }
    match &body[0] {
        Stmt::Assign { targets, value }
            if targets.len() == 1 && matches!(value, Expr::Placeholder(p) if p == "<for_item>") =>
        {
            let target = targets[0].clone();
            body.remove(0);
            Some(target)
        }
        _ => None,
    }
}

fn store_target(mut targets: Vec<Expr>) -> Expr {
    if targets.len() == 1 {
        targets.pop().expect("length checked")
    } else {
        Expr::Tuple(targets)
    }
}

fn top_below<'a>(sim: &'a Simulator) -> Option<&'a Cell> {
    let len = sim.stack.len();
    if len >= 2 {
        sim.stack.get(len - 2)
    } else {
        None
    }
}

/// Width in instructions of an exception-match test's jump sequence.
fn match_jump_len(insns: &[Instruction], at: usize) -> usize {
    match insns.get(at).map(|insn| insn.opcode) {
        Some(Opcode::JumpIfNotExcMatch) => 1,
        // COMPARE_OP <exception match> followed by the conditional jump.
        Some(Opcode::CompareOp) => 2,
        _ => 1,
    }
}
