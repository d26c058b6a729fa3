//! Deterministic pretty-printer from AST to Python source.
//!
//! Pure function of the tree: fixed four-space indentation, LF line
//! endings, and precedence-driven parenthesization, so output is
//! byte-identical across platforms and runs. Operator precedence comes
//! from the same table the operators declare; a child is parenthesized iff
//! its precedence is below what its position requires.

use std::fmt::Write;

use crate::ast::{Arg, Arguments, Comprehension, ExceptHandler, Expr, Keyword, MatchCase, Pattern, Stmt, WithItem};
use crate::bigint::BigInt;
use crate::code::Constant;
use crate::operators::prec;

/// Renders a module body.
#[must_use]
pub fn generate_module(body: &[Stmt]) -> String {
    let mut printer = Printer::new();
    printer.write_body(body, false);
    printer.out
}

/// Renders a single expression, mainly for tests and diagnostics.
#[must_use]
pub fn generate_expr(expr: &Expr) -> String {
    let mut printer = Printer::new();
    printer.write_expr(expr, 0);
    printer.out
}

struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    fn end_line(&mut self) {
        self.out.push('\n');
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Writes a suite, substituting `pass` for an empty one. `docstring`
    /// enables triple-quoted rendering of a leading string expression.
    fn write_body(&mut self, body: &[Stmt], docstring: bool) {
        if body.is_empty() {
            self.line_start();
            self.push("pass");
            self.end_line();
            return;
        }
        for (index, stmt) in body.iter().enumerate() {
            if docstring && index == 0 {
                if let Stmt::Expr(Expr::Constant(Constant::Str(text))) = stmt {
                    self.line_start();
                    self.write_docstring(text);
                    self.end_line();
                    continue;
                }
            }
            self.write_stmt(stmt);
        }
    }

    fn write_suite(&mut self, body: &[Stmt], docstring: bool) {
        self.indent += 1;
        self.write_body(body, docstring);
        self.indent -= 1;
    }

    #[allow(clippy::too_many_lines)]
    fn write_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef {
                name,
                args,
                body,
                decorator_list,
                returns,
                is_async,
            } => {
                self.write_decorators(decorator_list);
                self.line_start();
                if *is_async {
                    self.push("async ");
                }
                self.push("def ");
                self.push(name);
                self.push("(");
                self.write_arguments(args);
                self.push(")");
                if let Some(annotation) = returns {
                    self.push(" -> ");
                    self.write_expr(annotation, 0);
                }
                self.push(":");
                self.end_line();
                self.write_suite(body, true);
            }
            Stmt::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorator_list,
            } => {
                self.write_decorators(decorator_list);
                self.line_start();
                self.push("class ");
                self.push(name);
                if !bases.is_empty() || !keywords.is_empty() {
                    self.push("(");
                    let mut first = true;
                    for base in bases {
                        self.sep(&mut first);
                        self.write_expr(base, prec::TERNARY);
                    }
                    for keyword in keywords {
                        self.sep(&mut first);
                        self.write_keyword(keyword);
                    }
                    self.push(")");
                }
                self.push(":");
                self.end_line();
                self.write_suite(body, true);
            }
            Stmt::Return(value) => {
                self.line_start();
                match value {
                    Some(expr) => {
                        self.push("return ");
                        self.write_expr(expr, 0);
                    }
                    None => self.push("return"),
                }
                self.end_line();
            }
            Stmt::Delete(targets) => {
                self.line_start();
                self.push("del ");
                let mut first = true;
                for target in targets {
                    self.sep(&mut first);
                    self.write_expr(target, prec::TERNARY);
                }
                self.end_line();
            }
            Stmt::Assign { targets, value } => {
                self.line_start();
                for target in targets {
                    self.write_expr(target, 0);
                    self.push(" = ");
                }
                self.write_expr(value, 0);
                self.end_line();
            }
            Stmt::AugAssign { target, op, value } => {
                self.line_start();
                self.write_expr(target, 0);
                self.push(" ");
                self.push(op.token());
                self.push("= ");
                self.write_expr(value, 0);
                self.end_line();
            }
            Stmt::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.line_start();
                self.write_expr(target, 0);
                self.push(": ");
                self.write_expr(annotation, 0);
                if let Some(value) = value {
                    self.push(" = ");
                    self.write_expr(value, 0);
                }
                self.end_line();
            }
            Stmt::TypeAlias { name, value } => {
                self.line_start();
                self.push("type ");
                self.push(name);
                self.push(" = ");
                self.write_expr(value, 0);
                self.end_line();
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                self.line_start();
                if *is_async {
                    self.push("async ");
                }
                self.push("for ");
                self.write_expr(target, 0);
                self.push(" in ");
                self.write_expr(iter, 0);
                self.push(":");
                self.end_line();
                self.write_suite(body, false);
                self.write_orelse(orelse);
            }
            Stmt::While { test, body, orelse } => {
                self.line_start();
                self.push("while ");
                self.write_expr(test, 0);
                self.push(":");
                self.end_line();
                self.write_suite(body, false);
                self.write_orelse(orelse);
            }
            Stmt::If { test, body, orelse } => self.write_if("if ", test, body, orelse),
            Stmt::With { items, body, is_async } => {
                self.line_start();
                if *is_async {
                    self.push("async ");
                }
                self.push("with ");
                let mut first = true;
                for item in items {
                    self.sep(&mut first);
                    self.write_with_item(item);
                }
                self.push(":");
                self.end_line();
                self.write_suite(body, false);
            }
            Stmt::Match { subject, cases } => {
                self.line_start();
                self.push("match ");
                self.write_expr(subject, 0);
                self.push(":");
                self.end_line();
                self.indent += 1;
                for case in cases {
                    self.write_case(case);
                }
                self.indent -= 1;
            }
            Stmt::Raise { exc, cause } => {
                self.line_start();
                self.push("raise");
                if let Some(exc) = exc {
                    self.push(" ");
                    self.write_expr(exc, 0);
                    if let Some(cause) = cause {
                        self.push(" from ");
                        self.write_expr(cause, 0);
                    }
                }
                self.end_line();
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
            } => {
                self.line_start();
                self.push("try:");
                self.end_line();
                self.write_suite(body, false);
                for handler in handlers {
                    self.write_handler(handler, *is_star);
                }
                self.write_orelse(orelse);
                if !finalbody.is_empty() {
                    self.line_start();
                    self.push("finally:");
                    self.end_line();
                    self.write_suite(finalbody, false);
                }
            }
            Stmt::Assert { test, msg } => {
                self.line_start();
                self.push("assert ");
                self.write_expr(test, prec::TERNARY);
                if let Some(msg) = msg {
                    self.push(", ");
                    self.write_expr(msg, prec::TERNARY);
                }
                self.end_line();
            }
            Stmt::Import(names) => {
                self.line_start();
                self.push("import ");
                self.write_aliases(names);
                self.end_line();
            }
            Stmt::ImportFrom { module, names, level } => {
                self.line_start();
                self.push("from ");
                for _ in 0..*level {
                    self.push(".");
                }
                if let Some(module) = module {
                    self.push(module);
                }
                self.push(" import ");
                if names.is_empty() {
                    self.push("*");
                } else {
                    self.write_aliases(names);
                }
                self.end_line();
            }
            Stmt::Global(names) => {
                self.line_start();
                self.push("global ");
                self.push(&names.join(", "));
                self.end_line();
            }
            Stmt::Nonlocal(names) => {
                self.line_start();
                self.push("nonlocal ");
                self.push(&names.join(", "));
                self.end_line();
            }
            Stmt::Expr(expr) => {
                self.line_start();
                // A bare yield needs no extra parentheses as a statement.
                match expr {
                    Expr::Yield(_) | Expr::YieldFrom(_) => self.write_expr_raw(expr),
                    _ => self.write_expr(expr, 0),
                }
                self.end_line();
            }
            Stmt::Pass => {
                self.line_start();
                self.push("pass");
                self.end_line();
            }
            Stmt::Break => {
                self.line_start();
                self.push("break");
                self.end_line();
            }
            Stmt::Continue => {
                self.line_start();
                self.push("continue");
                self.end_line();
            }
            Stmt::Print { dest, values, newline } => {
                self.line_start();
                self.push("print");
                let mut first = true;
                if let Some(dest) = dest {
                    self.push(" >>");
                    self.write_expr(dest, prec::TERNARY);
                    first = false;
                }
                for value in values {
                    if first {
                        self.push(" ");
                        first = false;
                    } else {
                        self.push(", ");
                    }
                    self.write_expr(value, prec::TERNARY);
                }
                if !newline {
                    self.push(",");
                }
                self.end_line();
            }
        }
    }

    /// `elif` chains fold here: an else-branch holding exactly one `if`
    /// prints as `elif` at the same indentation.
    fn write_if(&mut self, keyword: &str, test: &Expr, body: &[Stmt], orelse: &[Stmt]) {
        self.line_start();
        self.push(keyword);
        self.write_expr(test, 0);
        self.push(":");
        self.end_line();
        self.write_suite(body, false);
        match orelse {
            [] => {}
            [Stmt::If { test, body, orelse }] => self.write_if("elif ", test, body, orelse),
            _ => {
                self.line_start();
                self.push("else:");
                self.end_line();
                self.write_suite(orelse, false);
            }
        }
    }

    fn write_orelse(&mut self, orelse: &[Stmt]) {
        if !orelse.is_empty() {
            self.line_start();
            self.push("else:");
            self.end_line();
            self.write_suite(orelse, false);
        }
    }

    fn write_handler(&mut self, handler: &ExceptHandler, is_star: bool) {
        self.line_start();
        self.push(if is_star { "except* " } else { "except" });
        if let Some(typ) = &handler.typ {
            if !is_star {
                self.push(" ");
            }
            self.write_expr(typ, prec::TERNARY);
            if let Some(name) = &handler.name {
                self.push(" as ");
                self.push(name);
            }
        }
        self.push(":");
        self.end_line();
        self.write_suite(&handler.body, false);
    }

    fn write_with_item(&mut self, item: &WithItem) {
        self.write_expr(&item.context, prec::TERNARY);
        if let Some(target) = &item.optional_vars {
            self.push(" as ");
            self.write_expr(target, prec::TERNARY);
        }
    }

    fn write_case(&mut self, case: &MatchCase) {
        self.line_start();
        self.push("case ");
        self.write_pattern(&case.pattern);
        if let Some(guard) = &case.guard {
            self.push(" if ");
            self.write_expr(guard, 0);
        }
        self.push(":");
        self.end_line();
        self.write_suite(&case.body, false);
    }

    fn write_pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Value(expr) => self.write_expr(expr, prec::TERNARY),
            Pattern::Singleton(constant) => self.write_constant(constant),
            Pattern::Sequence(patterns) => {
                self.push("[");
                let mut first = true;
                for pattern in patterns {
                    self.sep(&mut first);
                    self.write_pattern(pattern);
                }
                self.push("]");
            }
            Pattern::Mapping { keys, patterns, rest } => {
                self.push("{");
                let mut first = true;
                for (key, pattern) in keys.iter().zip(patterns) {
                    self.sep(&mut first);
                    self.write_expr(key, prec::TERNARY);
                    self.push(": ");
                    self.write_pattern(pattern);
                }
                if let Some(rest) = rest {
                    self.sep(&mut first);
                    self.push("**");
                    self.push(rest);
                }
                self.push("}");
            }
            Pattern::Class {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            } => {
                self.write_expr(cls, prec::ATOM);
                self.push("(");
                let mut first = true;
                for pattern in patterns {
                    self.sep(&mut first);
                    self.write_pattern(pattern);
                }
                for (attr, pattern) in kwd_attrs.iter().zip(kwd_patterns) {
                    self.sep(&mut first);
                    self.push(attr);
                    self.push("=");
                    self.write_pattern(pattern);
                }
                self.push(")");
            }
            Pattern::Star(name) => {
                self.push("*");
                self.push(name.as_deref().unwrap_or("_"));
            }
            Pattern::As { pattern, name } => match (pattern, name) {
                (Some(pattern), Some(name)) => {
                    self.write_pattern(pattern);
                    self.push(" as ");
                    self.push(name);
                }
                (None, Some(name)) => self.push(name),
                _ => self.push("_"),
            },
            Pattern::Or(patterns) => {
                let mut first = true;
                for pattern in patterns {
                    if !first {
                        self.push(" | ");
                    }
                    first = false;
                    self.write_pattern(pattern);
                }
            }
        }
    }

    fn write_decorators(&mut self, decorators: &[Expr]) {
        for decorator in decorators {
            self.line_start();
            self.push("@");
            self.write_expr(decorator, 0);
            self.end_line();
        }
    }

    fn write_aliases(&mut self, names: &[crate::ast::Alias]) {
        let mut first = true;
        for alias in names {
            self.sep(&mut first);
            self.push(&alias.name);
            if let Some(asname) = &alias.asname {
                self.push(" as ");
                self.push(asname);
            }
        }
    }

    fn sep(&mut self, first: &mut bool) {
        if !*first {
            self.push(", ");
        }
        *first = false;
    }

    fn write_arguments(&mut self, args: &Arguments) {
        let mut first = true;
        let positional_total = args.posonlyargs.len() + args.args.len();
        let default_base = positional_total - args.defaults.len().min(positional_total);

        let mut index = 0;
        for arg in args.posonlyargs.iter().chain(&args.args) {
            self.sep(&mut first);
            self.write_arg(arg);
            if index >= default_base {
                self.push("=");
                self.write_expr(&args.defaults[index - default_base], prec::TERNARY);
            }
            index += 1;
            if index == args.posonlyargs.len() && !args.posonlyargs.is_empty() {
                self.sep(&mut first);
                self.push("/");
            }
        }
        if let Some(vararg) = &args.vararg {
            self.sep(&mut first);
            self.push("*");
            self.write_arg(vararg);
        } else if !args.kwonlyargs.is_empty() {
            self.sep(&mut first);
            self.push("*");
        }
        for (arg, default) in args.kwonlyargs.iter().zip(&args.kw_defaults) {
            self.sep(&mut first);
            self.write_arg(arg);
            if let Some(default) = default {
                self.push("=");
                self.write_expr(default, prec::TERNARY);
            }
        }
        if let Some(kwarg) = &args.kwarg {
            self.sep(&mut first);
            self.push("**");
            self.write_arg(kwarg);
        }
    }

    fn write_arg(&mut self, arg: &Arg) {
        self.push(&arg.arg);
        if let Some(annotation) = &arg.annotation {
            self.push(": ");
            self.write_expr(annotation, 0);
        }
    }

    fn write_keyword(&mut self, keyword: &Keyword) {
        match &keyword.arg {
            Some(name) => {
                self.push(name);
                self.push("=");
            }
            None => self.push("**"),
        }
        self.write_expr(&keyword.value, prec::TERNARY);
    }

    /// Writes `expr`, parenthesizing when its precedence falls below
    /// `min_prec`.
    fn write_expr(&mut self, expr: &Expr, min_prec: u8) {
        if expr.precedence() < min_prec {
            self.push("(");
            self.write_expr_raw(expr);
            self.push(")");
        } else {
            self.write_expr_raw(expr);
        }
    }

    #[allow(clippy::too_many_lines)]
    fn write_expr_raw(&mut self, expr: &Expr) {
        match expr {
            Expr::Name { id, .. } => self.push(id),
            Expr::Constant(constant) => self.write_constant(constant),
            Expr::Attribute { value, attr, .. } => {
                // An integer receiver would swallow the dot: `1 .bit_length()`.
                if matches!(**value, Expr::Constant(Constant::Int(_) | Constant::Float(_))) {
                    self.push("(");
                    self.write_expr_raw(value);
                    self.push(")");
                } else {
                    self.write_expr(value, prec::ATOM);
                }
                self.push(".");
                self.push(attr);
            }
            Expr::Subscript { value, index, .. } => {
                self.write_expr(value, prec::ATOM);
                self.push("[");
                match &**index {
                    // Tuples in subscripts print bare: d[1, 2].
                    Expr::Tuple(items) if !items.is_empty() => self.write_exprs(items, prec::TERNARY),
                    other => self.write_expr(other, 0),
                }
                self.push("]");
            }
            Expr::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    self.write_expr(lower, prec::TERNARY);
                }
                self.push(":");
                if let Some(upper) = upper {
                    self.write_expr(upper, prec::TERNARY);
                }
                if let Some(step) = step {
                    self.push(":");
                    self.write_expr(step, prec::TERNARY);
                }
            }
            Expr::UnaryOp { op, operand } => {
                self.push(op.token());
                self.write_expr(operand, op.precedence());
            }
            Expr::BinaryOp { op, left, right } => {
                let (left_min, right_min) = if op.is_right_assoc() {
                    (op.precedence() + 1, op.precedence())
                } else {
                    (op.precedence(), op.precedence() + 1)
                };
                self.write_expr(left, left_min);
                self.push(" ");
                self.push(op.token());
                self.push(" ");
                self.write_expr(right, right_min);
            }
            Expr::BoolOp { op, values } => {
                let mut first = true;
                for value in values {
                    if !first {
                        self.push(" ");
                        self.push(op.token());
                        self.push(" ");
                    }
                    first = false;
                    self.write_expr(value, op.precedence() + 1);
                }
            }
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                self.write_expr(left, prec::COMPARISON + 1);
                for (op, comparator) in ops.iter().zip(comparators) {
                    self.push(" ");
                    self.push(op.token());
                    self.push(" ");
                    self.write_expr(comparator, prec::COMPARISON + 1);
                }
            }
            Expr::IfExp { test, body, orelse } => {
                self.write_expr(body, prec::TERNARY + 1);
                self.push(" if ");
                self.write_expr(test, prec::TERNARY + 1);
                self.push(" else ");
                self.write_expr(orelse, prec::TERNARY);
            }
            Expr::Lambda { args, body } => {
                if args.is_empty() {
                    self.push("lambda");
                } else {
                    self.push("lambda ");
                    self.write_arguments(args);
                }
                self.push(": ");
                self.write_expr(body, prec::LAMBDA);
            }
            Expr::ListComp { element, generators } => {
                self.push("[");
                self.write_expr(element, prec::TERNARY);
                self.write_generators(generators);
                self.push("]");
            }
            Expr::SetComp { element, generators } => {
                self.push("{");
                self.write_expr(element, prec::TERNARY);
                self.write_generators(generators);
                self.push("}");
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                self.push("{");
                self.write_expr(key, prec::TERNARY);
                self.push(": ");
                self.write_expr(value, prec::TERNARY);
                self.write_generators(generators);
                self.push("}");
            }
            Expr::GeneratorExp { element, generators } => {
                self.push("(");
                self.write_expr(element, prec::TERNARY);
                self.write_generators(generators);
                self.push(")");
            }
            Expr::Await(value) => {
                self.push("await ");
                self.write_expr(value, prec::AWAIT);
            }
            Expr::Yield(value) => match value {
                Some(value) => {
                    self.push("yield ");
                    self.write_expr(value, prec::TERNARY);
                }
                None => self.push("yield"),
            },
            Expr::YieldFrom(value) => {
                self.push("yield from ");
                self.write_expr(value, prec::TERNARY);
            }
            Expr::Call { func, args, keywords } => {
                self.write_expr(func, prec::ATOM);
                self.push("(");
                let mut first = true;
                // Positional (starred included, in order), then keywords.
                for arg in args {
                    self.sep(&mut first);
                    match arg {
                        // A generator as the sole argument borrows the
                        // call's parentheses: sum(y for y in b).
                        Expr::GeneratorExp { element, generators } if args.len() == 1 && keywords.is_empty() => {
                            self.write_expr(element, prec::TERNARY);
                            self.write_generators(generators);
                        }
                        _ => self.write_expr(arg, prec::TERNARY),
                    }
                }
                for keyword in keywords {
                    self.sep(&mut first);
                    self.write_keyword(keyword);
                }
                self.push(")");
            }
            Expr::FormattedValue { .. } | Expr::JoinedStr(_) => self.write_fstring(expr),
            Expr::Tuple(items) => {
                self.push("(");
                self.write_exprs(items, prec::TERNARY);
                if items.len() == 1 {
                    self.push(",");
                }
                self.push(")");
            }
            Expr::List(items) => {
                self.push("[");
                self.write_exprs(items, prec::TERNARY);
                self.push("]");
            }
            Expr::Set(items) => {
                if items.is_empty() {
                    // `{}` would be a dict.
                    self.push("set()");
                } else {
                    self.push("{");
                    self.write_exprs(items, prec::TERNARY);
                    self.push("}");
                }
            }
            Expr::Dict { keys, values } => {
                self.push("{");
                let mut first = true;
                for (key, value) in keys.iter().zip(values) {
                    self.sep(&mut first);
                    match key {
                        Some(key) => {
                            self.write_expr(key, prec::TERNARY);
                            self.push(": ");
                            self.write_expr(value, prec::TERNARY);
                        }
                        None => {
                            self.push("**");
                            self.write_expr(value, prec::TERNARY);
                        }
                    }
                }
                self.push("}");
            }
            Expr::Named { target, value } => {
                self.write_expr(target, prec::ATOM);
                self.push(" := ");
                self.write_expr(value, prec::TERNARY);
            }
            Expr::Starred(value, _) => {
                self.push("*");
                self.write_expr(value, prec::TERNARY);
            }
            Expr::Placeholder(reason) => {
                self.push("<");
                self.push(reason);
                self.push(">");
            }
        }
    }

    fn write_exprs(&mut self, items: &[Expr], min_prec: u8) {
        let mut first = true;
        for item in items {
            self.sep(&mut first);
            self.write_expr(item, min_prec);
        }
    }

    fn write_generators(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.push(if generator.is_async { " async for " } else { " for " });
            match &generator.target {
                // Comprehension targets print bare: `for k, v in ...`.
                Expr::Tuple(items) if !items.is_empty() => self.write_exprs(items, prec::TERNARY),
                other => self.write_expr(other, prec::TERNARY),
            }
            self.push(" in ");
            self.write_expr(&generator.iter, prec::OR);
            for guard in &generator.ifs {
                self.push(" if ");
                self.write_expr(guard, prec::OR);
            }
        }
    }

    fn write_fstring(&mut self, expr: &Expr) {
        self.push("f'");
        self.write_fstring_inner(expr);
        self.push("'");
    }

    fn write_fstring_inner(&mut self, expr: &Expr) {
        match expr {
            Expr::JoinedStr(parts) => {
                for part in parts {
                    self.write_fstring_inner(part);
                }
            }
            Expr::Constant(Constant::Str(bytes)) => {
                for &byte in bytes {
                    match byte {
                        b'{' => self.push("{{"),
                        b'}' => self.push("}}"),
                        _ => self.push_escaped_byte(byte, b'\''),
                    }
                }
            }
            Expr::FormattedValue {
                value,
                conversion,
                format_spec,
            } => {
                self.push("{");
                self.write_expr(value, prec::TERNARY);
                if let Some(conversion) = conversion {
                    self.push("!");
                    self.out.push(*conversion);
                }
                if let Some(spec) = format_spec {
                    self.push(":");
                    match &**spec {
                        Expr::Constant(Constant::Str(bytes)) => {
                            for &byte in bytes {
                                self.push_escaped_byte(byte, b'\'');
                            }
                        }
                        other => self.write_fstring_inner(other),
                    }
                }
                self.push("}");
            }
            other => {
                self.push("{");
                self.write_expr(other, prec::TERNARY);
                self.push("}");
            }
        }
    }

    fn write_docstring(&mut self, text: &[u8]) {
        self.push("\"\"\"");
        let mut previous = 0u8;
        for &byte in text {
            match byte {
                b'"' if previous == b'"' => {
                    // Break up runs that would close the literal early.
                    self.push("\\\"");
                }
                b'"' => self.out.push('"'),
                b'\\' => self.push("\\\\"),
                b'\n' => self.out.push('\n'),
                _ => self.push_escaped_byte(byte, 0),
            }
            previous = byte;
        }
        if previous == b'"' {
            self.push("\\");
        }
        self.push("\"\"\"");
    }

    fn write_constant(&mut self, constant: &Constant) {
        match constant {
            Constant::None => self.push("None"),
            Constant::Bool(true) => self.push("True"),
            Constant::Bool(false) => self.push("False"),
            Constant::Ellipsis => self.push("..."),
            Constant::StopIteration => self.push("StopIteration"),
            Constant::Int(value) => {
                let _ = write!(self.out, "{value}");
            }
            Constant::Long(value) => self.write_bigint(value),
            Constant::Float(value) => self.write_float(*value),
            Constant::Complex { real, imag } => {
                if *real == 0.0 {
                    self.write_float(*imag);
                    self.push("j");
                } else {
                    self.push("(");
                    self.write_float(*real);
                    if imag.is_sign_negative() {
                        self.push("-");
                        self.write_float(-imag);
                    } else {
                        self.push("+");
                        self.write_float(*imag);
                    }
                    self.push("j)");
                }
            }
            Constant::Str(bytes) => self.write_quoted(bytes, ""),
            Constant::Bytes(bytes) => self.write_quoted(bytes, "b"),
            Constant::Tuple(items) => {
                self.push("(");
                let mut first = true;
                for item in items {
                    self.sep(&mut first);
                    self.write_constant(item);
                }
                if items.len() == 1 {
                    self.push(",");
                }
                self.push(")");
            }
            Constant::List(items) => {
                self.push("[");
                let mut first = true;
                for item in items {
                    self.sep(&mut first);
                    self.write_constant(item);
                }
                self.push("]");
            }
            Constant::Dict(pairs) => {
                self.push("{");
                let mut first = true;
                for (key, value) in pairs {
                    self.sep(&mut first);
                    self.write_constant(key);
                    self.push(": ");
                    self.write_constant(value);
                }
                self.push("}");
            }
            Constant::Set(items) => {
                if items.is_empty() {
                    self.push("set()");
                } else {
                    self.push("{");
                    let mut first = true;
                    for item in items {
                        self.sep(&mut first);
                        self.write_constant(item);
                    }
                    self.push("}");
                }
            }
            Constant::FrozenSet(items) => {
                self.push("frozenset(");
                if !items.is_empty() {
                    self.push("{");
                    let mut first = true;
                    for item in items {
                        self.sep(&mut first);
                        self.write_constant(item);
                    }
                    self.push("}");
                }
                self.push(")");
            }
            Constant::Code(code) => {
                // Never reachable from well-formed recovery; make it
                // obvious rather than panicking.
                let _ = write!(self.out, "<code {}>", code.name);
            }
        }
    }

    fn write_bigint(&mut self, value: &BigInt) {
        let _ = write!(self.out, "{value}");
    }

    /// Floats print with the shortest round-trip form, normalized so a
    /// whole number keeps a trailing `.0` and specials use constructor
    /// calls (their reprs are not valid source).
    fn write_float(&mut self, value: f64) {
        if value.is_nan() {
            self.push("float('nan')");
        } else if value.is_infinite() {
            self.push(if value > 0.0 { "float('inf')" } else { "-float('inf')" });
        } else {
            let text = format!("{value}");
            let needs_dot = !text.contains('.') && !text.contains('e') && !text.contains("inf");
            self.push(&text);
            if needs_dot {
                self.push(".0");
            }
        }
    }

    fn write_quoted(&mut self, bytes: &[u8], prefix: &str) {
        self.push(prefix);
        self.out.push('\'');
        for &byte in bytes {
            self.push_escaped_byte(byte, b'\'');
        }
        self.out.push('\'');
    }

    fn push_escaped_byte(&mut self, byte: u8, quote: u8) {
        match byte {
            b'\\' => self.push("\\\\"),
            b'\n' => self.push("\\n"),
            b'\r' => self.push("\\r"),
            b'\t' => self.push("\\t"),
            _ if byte == quote && quote != 0 => {
                self.push("\\");
                self.out.push(quote as char);
            }
            0x20..=0x7E => self.out.push(byte as char),
            _ => {
                let _ = write!(self.out, "\\x{byte:02x}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprContext;
    use crate::operators::{BinOp, CmpOp};

    fn expr_text(expr: &Expr) -> String {
        generate_expr(expr)
    }

    #[test]
    fn precedence_parenthesization() {
        // (a + b) * c needs parens; a + b * c does not.
        let sum = Expr::binary(BinOp::Add, Expr::name("a"), Expr::name("b"));
        let product = Expr::binary(BinOp::Mult, sum.clone(), Expr::name("c"));
        assert_eq!(expr_text(&product), "(a + b) * c");

        let product_right = Expr::binary(BinOp::Add, Expr::name("a"), Expr::binary(BinOp::Mult, Expr::name("b"), Expr::name("c")));
        assert_eq!(expr_text(&product_right), "a + b * c");

        // Left-assoc: a - (b - c) keeps parens, (a - b) - c drops them.
        let rhs_nested = Expr::binary(BinOp::Sub, Expr::name("a"), Expr::binary(BinOp::Sub, Expr::name("b"), Expr::name("c")));
        assert_eq!(expr_text(&rhs_nested), "a - (b - c)");
        let lhs_nested = Expr::binary(BinOp::Sub, Expr::binary(BinOp::Sub, Expr::name("a"), Expr::name("b")), Expr::name("c"));
        assert_eq!(expr_text(&lhs_nested), "a - b - c");

        // Right-assoc power: (a ** b) ** c parenthesizes the left.
        let pow_left = Expr::binary(BinOp::Pow, Expr::binary(BinOp::Pow, Expr::name("a"), Expr::name("b")), Expr::name("c"));
        assert_eq!(expr_text(&pow_left), "(a ** b) ** c");
        let pow_right = Expr::binary(BinOp::Pow, Expr::name("a"), Expr::binary(BinOp::Pow, Expr::name("b"), Expr::name("c")));
        assert_eq!(expr_text(&pow_right), "a ** b ** c");
    }

    #[test]
    fn ternary_with_bool_condition() {
        let test = Expr::BoolOp {
            op: crate::operators::BoolOp::And,
            values: vec![
                Expr::compare(Expr::name("a"), CmpOp::Lt, Expr::Constant(Constant::Int(0))),
                Expr::compare(
                    Expr::binary(BinOp::Mod, Expr::name("a"), Expr::Constant(Constant::Int(2))),
                    CmpOp::Eq,
                    Expr::Constant(Constant::Int(0)),
                ),
            ],
        };
        let ternary = Expr::IfExp {
            test: Box::new(test),
            body: Box::new(Expr::str_lit("yes")),
            orelse: Box::new(Expr::str_lit("no")),
        };
        let stmt = Stmt::assign(Expr::store_name("result"), ternary);
        assert_eq!(
            generate_module(&[stmt]),
            "result = 'yes' if a < 0 and a % 2 == 0 else 'no'\n"
        );
    }

    #[test]
    fn comprehension_forms() {
        let generators = vec![Comprehension {
            target: Expr::store_name("y"),
            iter: Expr::name("b"),
            ifs: Vec::new(),
            is_async: false,
        }];
        let listcomp = Expr::ListComp {
            element: Box::new(Expr::name("y")),
            generators: generators.clone(),
        };
        assert_eq!(expr_text(&listcomp), "[y for y in b]");

        let dictcomp = Expr::DictComp {
            key: Box::new(Expr::name("y")),
            value: Box::new(Expr::name("y")),
            generators: generators.clone(),
        };
        assert_eq!(expr_text(&dictcomp), "{y: y for y in b}");

        let genexp = Expr::GeneratorExp {
            element: Box::new(Expr::name("y")),
            generators,
        };
        assert_eq!(expr_text(&genexp), "(y for y in b)");
    }

    #[test]
    fn comprehension_guard() {
        let listcomp = Expr::ListComp {
            element: Box::new(Expr::name("y")),
            generators: vec![Comprehension {
                target: Expr::store_name("y"),
                iter: Expr::name("b"),
                ifs: vec![Expr::compare(Expr::name("y"), CmpOp::Is, Expr::none())],
                is_async: false,
            }],
        };
        assert_eq!(expr_text(&listcomp), "[y for y in b if y is None]");
    }

    #[test]
    fn decorated_function_prints_above_def() {
        let stmt = Stmt::FunctionDef {
            name: "foo".to_owned(),
            args: Box::new(Arguments::default()),
            body: Vec::new(),
            decorator_list: vec![Expr::name("decorator")],
            returns: None,
            is_async: false,
        };
        assert_eq!(generate_module(&[stmt]), "@decorator\ndef foo():\n    pass\n");
    }

    #[test]
    fn lambda_identity() {
        let lambda = Expr::Lambda {
            args: Box::new(Arguments {
                args: vec![Arg::new("x")],
                ..Arguments::default()
            }),
            body: Box::new(Expr::name("x")),
        };
        assert_eq!(expr_text(&lambda), "lambda x: x");
    }

    #[test]
    fn call_argument_ordering() {
        let call = Expr::Call {
            func: Box::new(Expr::name("f")),
            args: vec![
                Expr::Constant(Constant::Int(1)),
                Expr::Starred(Box::new(Expr::name("rest")), ExprContext::Load),
            ],
            keywords: vec![
                Keyword {
                    arg: Some("k".to_owned()),
                    value: Expr::Constant(Constant::Int(2)),
                },
                Keyword {
                    arg: None,
                    value: Expr::name("extra"),
                },
            ],
        };
        assert_eq!(expr_text(&call), "f(1, *rest, k=2, **extra)");
    }

    #[test]
    fn constants_render_as_python_literals() {
        assert_eq!(expr_text(&Expr::none()), "None");
        assert_eq!(expr_text(&Expr::Constant(Constant::Bool(true))), "True");
        assert_eq!(expr_text(&Expr::Constant(Constant::Ellipsis)), "...");
        assert_eq!(expr_text(&Expr::Constant(Constant::Float(2.0))), "2.0");
        assert_eq!(expr_text(&Expr::Constant(Constant::Float(0.1))), "0.1");
        assert_eq!(
            expr_text(&Expr::Constant(Constant::Bytes(b"a\xffb".to_vec()))),
            "b'a\\xffb'"
        );
        assert_eq!(
            expr_text(&Expr::Constant(Constant::Complex { real: 1.0, imag: 2.0 })),
            "(1.0+2.0j)"
        );
        assert_eq!(
            expr_text(&Expr::Constant(Constant::Complex { real: 0.0, imag: 2.0 })),
            "2.0j"
        );
        assert_eq!(
            expr_text(&Expr::Constant(Constant::Tuple(vec![Constant::Int(1)]))),
            "(1,)"
        );
    }

    #[test]
    fn docstring_renders_triple_quoted() {
        let stmt = Stmt::FunctionDef {
            name: "f".to_owned(),
            args: Box::new(Arguments::default()),
            body: vec![
                Stmt::Expr(Expr::str_lit("Summary line.")),
                Stmt::Return(None),
            ],
            decorator_list: Vec::new(),
            returns: None,
            is_async: false,
        };
        assert_eq!(
            generate_module(&[stmt]),
            "def f():\n    \"\"\"Summary line.\"\"\"\n    return\n"
        );
    }

    #[test]
    fn empty_set_and_dict_disambiguate() {
        assert_eq!(expr_text(&Expr::Set(Vec::new())), "set()");
        assert_eq!(
            expr_text(&Expr::Dict {
                keys: Vec::new(),
                values: Vec::new()
            }),
            "{}"
        );
    }
}
