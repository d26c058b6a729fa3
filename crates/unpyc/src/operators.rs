//! Operators with the precedence the printer parenthesizes by.
//!
//! Precedence values follow Python's grammar, low binding to high. A child
//! expression is parenthesized iff its precedence is lower than its
//! parent's, or equal where associativity demands it (the left operand of
//! the right-associative `**`, for instance).
//!
//! This module also owns the two operand decodings that changed across
//! releases: the unified BINARY_OP operand (3.11+) and the COMPARE_OP
//! comparison index, which gained flag bits in 3.12.

use std::fmt;

use crate::version::Version;

/// Precedence of non-operator expression forms, shared with the printer.
pub mod prec {
    pub const LAMBDA: u8 = 1;
    pub const TERNARY: u8 = 2;
    pub const OR: u8 = 3;
    pub const AND: u8 = 4;
    pub const NOT: u8 = 5;
    pub const COMPARISON: u8 = 6;
    pub const BIT_OR: u8 = 7;
    pub const BIT_XOR: u8 = 8;
    pub const BIT_AND: u8 = 9;
    pub const SHIFT: u8 = 10;
    pub const ARITH: u8 = 11;
    pub const TERM: u8 = 12;
    pub const UNARY: u8 = 13;
    pub const POWER: u8 = 14;
    pub const AWAIT: u8 = 15;
    pub const ATOM: u8 = 17;
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl BinOp {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::MatMult => "@",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::FloorDiv => "//",
        }
    }

    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::BitOr => prec::BIT_OR,
            Self::BitXor => prec::BIT_XOR,
            Self::BitAnd => prec::BIT_AND,
            Self::LShift | Self::RShift => prec::SHIFT,
            Self::Add | Self::Sub => prec::ARITH,
            Self::Mult | Self::MatMult | Self::Div | Self::Mod | Self::FloorDiv => prec::TERM,
            Self::Pow => prec::POWER,
        }
    }

    /// Only `**` groups to the right.
    #[must_use]
    pub fn is_right_assoc(self) -> bool {
        matches!(self, Self::Pow)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Decoded form of a 3.11+ BINARY_OP operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOpKind {
    Op(BinOp),
    Inplace(BinOp),
    /// 3.14 folded BINARY_SUBSCR into BINARY_OP as operand 26.
    Subscript,
}

/// Decodes the BINARY_OP operand: 0–12 plain, 13–25 in-place, 26 subscript.
#[must_use]
pub fn binary_op_kind(arg: u32) -> Option<BinaryOpKind> {
    const TABLE: [BinOp; 13] = [
        BinOp::Add,
        BinOp::BitAnd,
        BinOp::FloorDiv,
        BinOp::LShift,
        BinOp::MatMult,
        BinOp::Mult,
        BinOp::Mod,
        BinOp::BitOr,
        BinOp::Pow,
        BinOp::RShift,
        BinOp::Sub,
        BinOp::Div,
        BinOp::BitXor,
    ];
    match arg {
        0..=12 => Some(BinaryOpKind::Op(TABLE[arg as usize])),
        13..=25 => Some(BinaryOpKind::Inplace(TABLE[arg as usize - 13])),
        26 => Some(BinaryOpKind::Subscript),
        _ => None,
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    UAdd,
    USub,
    Invert,
}

impl UnaryOp {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Not => "not ",
            Self::UAdd => "+",
            Self::USub => "-",
            Self::Invert => "~",
        }
    }

    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::Not => prec::NOT,
            Self::UAdd | Self::USub | Self::Invert => prec::UNARY,
        }
    }
}

/// Short-circuit boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }

    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::And => prec::AND,
            Self::Or => prec::OR,
        }
    }
}

/// Comparison operators, including the identity and membership forms that
/// moved to IS_OP/CONTAINS_OP in 3.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    LtE,
    Eq,
    NotEq,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
    /// `exception match` from a pre-3.11 except-clause dispatch; never
    /// printed, consumed by control-flow recovery.
    ExcMatch,
}

impl CmpOp {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::ExcMatch => "<exception match>",
        }
    }

    /// Negation for `POP_JUMP_IF_FALSE`-style folding.
    #[must_use]
    pub fn negated(self) -> Option<Self> {
        Some(match self {
            Self::Lt => Self::GtE,
            Self::LtE => Self::Gt,
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Gt => Self::LtE,
            Self::GtE => Self::Lt,
            Self::In => Self::NotIn,
            Self::NotIn => Self::In,
            Self::Is => Self::IsNot,
            Self::IsNot => Self::Is,
            Self::ExcMatch => return None,
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Decodes a COMPARE_OP operand for `version`.
///
/// The comparison index moved into the high bits as specialization flags
/// grew underneath: raw through 3.11, `>> 4` for 3.12, `>> 5` for 3.13+.
/// Returns the operator plus any unrecognized low flag bits so the caller
/// can surface them as a diagnostic instead of failing.
#[must_use]
pub fn compare_op(version: Version, arg: u32) -> (Option<CmpOp>, u32) {
    let (index, flags) = if version >= Version::new(3, 13) {
        (arg >> 5, arg & 0x1F)
    } else if version >= Version::new(3, 12) {
        (arg >> 4, arg & 0x0F)
    } else {
        (arg, 0)
    };
    let op = match index {
        0 => Some(CmpOp::Lt),
        1 => Some(CmpOp::LtE),
        2 => Some(CmpOp::Eq),
        3 => Some(CmpOp::NotEq),
        4 => Some(CmpOp::Gt),
        5 => Some(CmpOp::GtE),
        6 => Some(CmpOp::In),
        7 => Some(CmpOp::NotIn),
        8 => Some(CmpOp::Is),
        9 => Some(CmpOp::IsNot),
        10 => Some(CmpOp::ExcMatch),
        _ => None,
    };
    (op, flags)
}

/// Encodes a comparison index for `version`; the inverse of [`compare_op`]
/// with zeroed flag bits. Used by tests and the disassembly printer.
#[must_use]
pub fn compare_op_arg(version: Version, op: CmpOp) -> u32 {
    let index = match op {
        CmpOp::Lt => 0,
        CmpOp::LtE => 1,
        CmpOp::Eq => 2,
        CmpOp::NotEq => 3,
        CmpOp::Gt => 4,
        CmpOp::GtE => 5,
        CmpOp::In => 6,
        CmpOp::NotIn => 7,
        CmpOp::Is => 8,
        CmpOp::IsNot => 9,
        CmpOp::ExcMatch => 10,
    };
    if version >= Version::new(3, 13) {
        index << 5
    } else if version >= Version::new(3, 12) {
        index << 4
    } else {
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_op_operand_space() {
        assert_eq!(binary_op_kind(0), Some(BinaryOpKind::Op(BinOp::Add)));
        assert_eq!(binary_op_kind(11), Some(BinaryOpKind::Op(BinOp::Div)));
        assert_eq!(binary_op_kind(13), Some(BinaryOpKind::Inplace(BinOp::Add)));
        assert_eq!(binary_op_kind(25), Some(BinaryOpKind::Inplace(BinOp::BitXor)));
        assert_eq!(binary_op_kind(26), Some(BinaryOpKind::Subscript));
        assert_eq!(binary_op_kind(27), None);
    }

    #[test]
    fn compare_op_shift_widths() {
        let eq = CmpOp::Eq;
        assert_eq!(compare_op(Version::new(3, 10), 2), (Some(eq), 0));
        assert_eq!(compare_op(Version::new(3, 12), 2 << 4), (Some(eq), 0));
        assert_eq!(compare_op(Version::new(3, 13), 2 << 5), (Some(eq), 0));
        // Flag bits come back separately instead of failing.
        let (op, flags) = compare_op(Version::new(3, 13), (4 << 5) | 3);
        assert_eq!(op, Some(CmpOp::Gt));
        assert_eq!(flags, 3);
    }

    #[test]
    fn compare_round_trip() {
        for version in [Version::new(2, 7), Version::new(3, 12), Version::new(3, 14)] {
            for op in [CmpOp::Lt, CmpOp::Eq, CmpOp::IsNot, CmpOp::NotIn] {
                assert_eq!(compare_op(version, compare_op_arg(version, op)).0, Some(op));
            }
        }
    }

    #[test]
    fn negation_pairs() {
        assert_eq!(CmpOp::Lt.negated(), Some(CmpOp::GtE));
        assert_eq!(CmpOp::In.negated(), Some(CmpOp::NotIn));
        assert_eq!(CmpOp::ExcMatch.negated(), None);
    }

    #[test]
    fn power_binds_tighter_than_unary_and_right() {
        assert!(BinOp::Pow.precedence() > UnaryOp::USub.precedence());
        assert!(BinOp::Pow.is_right_assoc());
        assert!(!BinOp::Add.is_right_assoc());
    }
}
