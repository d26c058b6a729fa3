//! The abstract syntax tree the decompiler reconstructs.
//!
//! An owned tree: every node owns its children, clones are deep, and
//! equality is structural so tests can compare trees without going through
//! the printer. Shapes follow Python's own `ast` module closely enough
//! that anyone who has walked one will recognize the other, with two
//! decompiler-specific additions: `Expr::Placeholder` for best-effort
//! degradation and `Stmt::Print` for Python-2 print statements.

use crate::code::Constant;
use crate::operators::{prec, BinOp, BoolOp, CmpOp, UnaryOp};

/// How a name-like expression is being used.
///
/// Mostly implied by position (assignment targets store, `del` targets
/// delete), but carried on the node so consumers need no context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExprContext {
    #[default]
    Load,
    Store,
    Del,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A plain name.
    Name { id: String, ctx: ExprContext },
    /// A literal lifted from the constant pool.
    Constant(Constant),
    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: ExprContext,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        ctx: ExprContext,
    },
    /// `lower:upper:step` inside a subscript.
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `a and b and c` / `a or b`; values in source order.
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    /// A (possibly chained) comparison: `left op0 c0 op1 c1 ...`.
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    /// Conditional expression `body if test else orelse`.
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        args: Box<Arguments>,
        body: Box<Expr>,
    },
    ListComp {
        element: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        element: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        element: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    /// One interpolated piece of an f-string.
    FormattedValue {
        value: Box<Expr>,
        /// `!s`, `!r` or `!a`.
        conversion: Option<char>,
        format_spec: Option<Box<Expr>>,
    },
    /// The f-string itself: literal and formatted pieces in order.
    JoinedStr(Vec<Expr>),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    /// Keys align with values; a `None` key is a `**mapping` spread.
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    /// Assignment expression `target := value`.
    Named {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Starred(Box<Expr>, ExprContext),
    /// Best-effort stand-in for something the simulator could not
    /// reconstruct; prints as a commented marker.
    Placeholder(String),
}

impl Expr {
    #[must_use]
    pub fn name(id: impl Into<String>) -> Self {
        Self::Name {
            id: id.into(),
            ctx: ExprContext::Load,
        }
    }

    #[must_use]
    pub fn store_name(id: impl Into<String>) -> Self {
        Self::Name {
            id: id.into(),
            ctx: ExprContext::Store,
        }
    }

    #[must_use]
    pub fn constant(value: Constant) -> Self {
        Self::Constant(value)
    }

    #[must_use]
    pub fn none() -> Self {
        Self::Constant(Constant::None)
    }

    #[must_use]
    pub fn str_lit(text: &str) -> Self {
        Self::Constant(Constant::Str(text.as_bytes().to_vec()))
    }

    #[must_use]
    pub fn attribute(value: Expr, attr: impl Into<String>) -> Self {
        Self::Attribute {
            value: Box::new(value),
            attr: attr.into(),
            ctx: ExprContext::Load,
        }
    }

    #[must_use]
    pub fn subscript(value: Expr, index: Expr) -> Self {
        Self::Subscript {
            value: Box::new(value),
            index: Box::new(index),
            ctx: ExprContext::Load,
        }
    }

    #[must_use]
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Self::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    #[must_use]
    pub fn compare(left: Expr, op: CmpOp, right: Expr) -> Self {
        Self::Compare {
            left: Box::new(left),
            ops: vec![op],
            comparators: vec![right],
        }
    }

    #[must_use]
    pub fn call(func: Expr, args: Vec<Expr>, keywords: Vec<Keyword>) -> Self {
        Self::Call {
            func: Box::new(func),
            args,
            keywords,
        }
    }

    /// `not expr`, folding double negation and comparison operators.
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            Self::UnaryOp {
                op: UnaryOp::Not,
                operand,
            } => *operand,
            Self::Compare { left, ops, comparators } if ops.len() == 1 => match ops[0].negated() {
                Some(op) => Self::Compare {
                    left,
                    ops: vec![op],
                    comparators,
                },
                None => Self::unary(
                    UnaryOp::Not,
                    Self::Compare { left, ops, comparators },
                ),
            },
            other => Self::unary(UnaryOp::Not, other),
        }
    }

    /// Printer precedence; children with lower values need parentheses.
    #[must_use]
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Lambda { .. } => prec::LAMBDA,
            Self::IfExp { .. } => prec::TERNARY,
            Self::BoolOp { op, .. } => op.precedence(),
            Self::UnaryOp { op, .. } => op.precedence(),
            Self::BinaryOp { op, .. } => op.precedence(),
            Self::Compare { .. } => prec::COMPARISON,
            Self::Await(_) => prec::AWAIT,
            // Yield and walrus forms are almost always parenthesized by
            // position; give them the lowest slot so the printer does.
            Self::Yield(_) | Self::YieldFrom(_) | Self::Named { .. } => 0,
            Self::GeneratorExp { .. } => prec::TERNARY,
            _ => prec::ATOM,
        }
    }

    #[must_use]
    pub fn is_none_constant(&self) -> bool {
        matches!(self, Self::Constant(Constant::None))
    }

    /// True for string constants, the docstring test.
    #[must_use]
    pub fn is_str_constant(&self) -> bool {
        matches!(self, Self::Constant(Constant::Str(_)))
    }
}

/// A keyword argument; `arg: None` spreads a `**mapping`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
}

/// One `for target in iter` clause of a comprehension, with its guards.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

/// One formal parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub arg: String,
    pub annotation: Option<Expr>,
}

impl Arg {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            arg: name.into(),
            annotation: None,
        }
    }
}

/// A full parameter list.
///
/// `defaults` right-aligns with `posonlyargs + args`; `kw_defaults` aligns
/// one-to-one with `kwonlyargs`, each entry optional.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    pub posonlyargs: Vec<Arg>,
    pub args: Vec<Arg>,
    pub vararg: Option<Arg>,
    pub kwonlyargs: Vec<Arg>,
    pub kw_defaults: Vec<Option<Expr>>,
    pub kwarg: Option<Arg>,
    pub defaults: Vec<Expr>,
}

impl Arguments {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posonlyargs.is_empty()
            && self.args.is_empty()
            && self.vararg.is_none()
            && self.kwonlyargs.is_empty()
            && self.kwarg.is_none()
    }
}

/// `with` item: context expression plus optional `as` target.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub optional_vars: Option<Expr>,
}

/// One `except` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub typ: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

/// Import alias `name as asname`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

/// One `case` of a `match` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// Structural patterns for `match`.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Value(Expr),
    Singleton(Constant),
    Sequence(Vec<Pattern>),
    Mapping {
        keys: Vec<Expr>,
        patterns: Vec<Pattern>,
        rest: Option<String>,
    },
    Class {
        cls: Expr,
        patterns: Vec<Pattern>,
        kwd_attrs: Vec<String>,
        kwd_patterns: Vec<Pattern>,
    },
    Star(Option<String>),
    As {
        pattern: Option<Box<Pattern>>,
        name: Option<String>,
    },
    Or(Vec<Pattern>),
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    FunctionDef {
        name: String,
        args: Box<Arguments>,
        body: Vec<Stmt>,
        decorator_list: Vec<Expr>,
        returns: Option<Expr>,
        is_async: bool,
    },
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        keywords: Vec<Keyword>,
        body: Vec<Stmt>,
        decorator_list: Vec<Expr>,
    },
    Return(Option<Expr>),
    Delete(Vec<Expr>),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    /// `type X = ...` (3.12+).
    TypeAlias {
        name: String,
        value: Expr,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        is_async: bool,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
        is_async: bool,
    },
    Match {
        subject: Expr,
        cases: Vec<MatchCase>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
        /// True for `except*` groups.
        is_star: bool,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
        level: u32,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Expr(Expr),
    Pass,
    Break,
    Continue,
    /// Python-2 `print` statement, chevron form included.
    Print {
        dest: Option<Expr>,
        values: Vec<Expr>,
        newline: bool,
    },
}

impl Stmt {
    /// Expression-statement wrapper, dropping redundant constants the
    /// compiler materializes (like a bare `None` before an implicit
    /// return).
    #[must_use]
    pub fn expr(expr: Expr) -> Self {
        Self::Expr(expr)
    }

    #[must_use]
    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::Assign {
            targets: vec![target],
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_expr() -> Expr {
        Expr::binary(
            BinOp::Add,
            Expr::name("a"),
            Expr::call(
                Expr::name("f"),
                vec![Expr::Constant(Constant::Int(1))],
                vec![Keyword {
                    arg: Some("k".to_owned()),
                    value: Expr::List(vec![Expr::name("b")]),
                }],
            ),
        )
    }

    #[test]
    fn clone_is_deep_and_structural_equality_holds() {
        let original = sample_expr();
        let mut copy = original.clone();
        assert_eq!(copy, original);

        // Mutating the clone must not touch the original.
        if let Expr::BinaryOp { left, .. } = &mut copy {
            **left = Expr::name("changed");
        }
        assert_ne!(copy, original);
        assert_eq!(original, sample_expr());
    }

    #[test]
    fn negation_folds() {
        let cmp = Expr::compare(Expr::name("x"), CmpOp::Lt, Expr::name("y"));
        assert_eq!(
            cmp.negated(),
            Expr::compare(Expr::name("x"), CmpOp::GtE, Expr::name("y"))
        );

        let not_x = Expr::unary(UnaryOp::Not, Expr::name("x"));
        assert_eq!(not_x.negated(), Expr::name("x"));

        // Chained comparisons wrap instead of distributing.
        let chained = Expr::Compare {
            left: Box::new(Expr::name("a")),
            ops: vec![CmpOp::Lt, CmpOp::Lt],
            comparators: vec![Expr::name("b"), Expr::name("c")],
        };
        assert!(matches!(chained.negated(), Expr::UnaryOp { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn precedence_ordering() {
        let lambda = Expr::Lambda {
            args: Box::new(Arguments::default()),
            body: Box::new(Expr::none()),
        };
        let or = Expr::BoolOp {
            op: BoolOp::Or,
            values: vec![Expr::name("a"), Expr::name("b")],
        };
        assert!(lambda.precedence() < or.precedence());
        assert!(or.precedence() < Expr::name("x").precedence());
    }
}
