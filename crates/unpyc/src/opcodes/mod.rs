//! Canonical opcodes and per-version byte tables.
//!
//! Opcode identity is carried by one enum shared across every supported
//! release; the byte value an operation sits at is a per-version concern
//! confined to this module and the decoder. The same semantic operation
//! (say `LOAD_CONST`) lives at different bytes in different releases, and
//! operations removed long ago (`JUMP_ABSOLUTE`, `SETUP_LOOP`) still occupy
//! the canonical name space so old tables can refer to them.
//!
//! Tables are built once per release and cached. Each release's builder in
//! [`tables`] starts from its predecessor's table and applies that release's
//! changes, so the whole byte-assignment history reads like a changelog.

mod tables;

use std::sync::OnceLock;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::version::{Version, SUPPORTED};

/// Canonical operation names across Python 1.0–3.14.
///
/// Display renders the conventional `SCREAMING_SNAKE_CASE` spelling used by
/// `dis` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::enum_variant_names)]
pub enum Opcode {
    // Housekeeping. `Invalid` never appears in a table; the decoder emits
    // it for bytes a release leaves unassigned.
    Invalid,
    Cache,
    Nop,
    NotTaken,
    StopCode,
    ExtendedArg,
    Resume,
    InterpreterExit,
    EnterExecutor,
    SetLineno,

    // Stack shuffling
    PopTop,
    PopIter,
    RotTwo,
    RotThree,
    RotFour,
    RotN,
    DupTop,
    DupTopTwo,
    #[strum(serialize = "DUP_TOPX")]
    DupTopX,
    Swap,
    Copy,
    PushNull,
    EndFor,
    EndSend,

    // Unary operations
    UnaryPositive,
    UnaryNegative,
    UnaryNot,
    UnaryConvert,
    UnaryCall,
    UnaryInvert,
    ToBool,

    // Per-operation binary opcodes (pre-3.11)
    BinaryPower,
    BinaryMultiply,
    BinaryMatrixMultiply,
    BinaryDivide,
    BinaryModulo,
    BinaryAdd,
    BinarySubtract,
    BinarySubscr,
    BinaryCall,
    BinaryLshift,
    BinaryRshift,
    BinaryAnd,
    BinaryXor,
    BinaryOr,
    BinaryFloorDivide,
    BinaryTrueDivide,

    // Per-operation in-place opcodes (pre-3.11)
    InplaceAdd,
    InplaceSubtract,
    InplaceMultiply,
    InplaceMatrixMultiply,
    InplaceDivide,
    InplaceModulo,
    InplacePower,
    InplaceLshift,
    InplaceRshift,
    InplaceAnd,
    InplaceXor,
    InplaceOr,
    InplaceFloorDivide,
    InplaceTrueDivide,

    // Unified binary operation (3.11+), operation in the operand
    BinaryOp,
    BinarySlice,
    #[strum(serialize = "STORE_SLICE")]
    StoreSliceOp,

    // Python-2 whole-object slicing
    #[strum(serialize = "SLICE_0")]
    Slice0,
    #[strum(serialize = "SLICE_1")]
    Slice1,
    #[strum(serialize = "SLICE_2")]
    Slice2,
    #[strum(serialize = "SLICE_3")]
    Slice3,
    #[strum(serialize = "STORE_SLICE_0")]
    StoreSlice0,
    #[strum(serialize = "STORE_SLICE_1")]
    StoreSlice1,
    #[strum(serialize = "STORE_SLICE_2")]
    StoreSlice2,
    #[strum(serialize = "STORE_SLICE_3")]
    StoreSlice3,
    #[strum(serialize = "DELETE_SLICE_0")]
    DeleteSlice0,
    #[strum(serialize = "DELETE_SLICE_1")]
    DeleteSlice1,
    #[strum(serialize = "DELETE_SLICE_2")]
    DeleteSlice2,
    #[strum(serialize = "DELETE_SLICE_3")]
    DeleteSlice3,
    BuildSlice,

    // Subscripting
    StoreSubscr,
    DeleteSubscr,

    // Python-2 print / exec statements
    PrintExpr,
    PrintItem,
    PrintNewline,
    PrintItemTo,
    PrintNewlineTo,
    ExecStmt,

    // Iteration and loops
    GetIter,
    GetYieldFromIter,
    ForLoop,
    ForIter,
    BreakLoop,
    ContinueLoop,
    SetupLoop,
    GetAiter,
    GetAnext,
    EndAsyncFor,

    // Returns and generators
    ReturnValue,
    ReturnConst,
    ReturnGenerator,
    YieldValue,
    YieldFrom,
    Send,
    CleanupThrow,
    GenStart,
    AsyncGenWrap,
    GetAwaitable,

    // Imports
    ImportName,
    ImportFrom,
    ImportStar,

    // Exception handling
    PopBlock,
    PopExcept,
    EndFinally,
    SetupExcept,
    SetupFinally,
    SetupWith,
    SetupAsyncWith,
    RaiseException,
    RaiseVarargs,
    Reraise,
    WithCleanup,
    WithCleanupStart,
    WithCleanupFinish,
    WithExceptStart,
    BeginFinally,
    CallFinally,
    PopFinally,
    JumpIfNotExcMatch,
    PushExcInfo,
    CheckExcMatch,
    CheckEgMatch,
    PrepReraiseStar,
    BeforeWith,
    BeforeAsyncWith,
    ExitInitCheck,
    LoadAssertionError,

    // Container construction
    BuildTuple,
    BuildList,
    BuildMap,
    BuildSet,
    BuildString,
    BuildConstKeyMap,
    BuildFunction,
    BuildClass,
    LoadBuildClass,
    BuildListUnpack,
    BuildMapUnpack,
    BuildMapUnpackWithCall,
    BuildTupleUnpack,
    BuildTupleUnpackWithCall,
    BuildSetUnpack,
    ListAppend,
    SetAdd,
    MapAdd,
    ListExtend,
    SetUpdate,
    DictMerge,
    DictUpdate,
    ListToTuple,
    StoreMap,
    CopyDictWithoutKeys,

    // Structural pattern matching
    GetLen,
    MatchMapping,
    MatchSequence,
    MatchKeys,
    MatchClass,

    // Name access
    StoreName,
    DeleteName,
    LoadName,
    StoreAttr,
    DeleteAttr,
    LoadAttr,
    StoreGlobal,
    DeleteGlobal,
    LoadGlobal,
    LoadGlobals,
    LoadLocal,
    LoadLocals,
    StoreLocals,
    LoadConst,
    LoadSmallInt,
    LoadCommonConstant,
    LoadFast,
    StoreFast,
    DeleteFast,
    LoadFastCheck,
    LoadFastAndClear,
    LoadFastLoadFast,
    StoreFastLoadFast,
    StoreFastStoreFast,
    LoadFastBorrow,
    LoadFastBorrowLoadFastBorrow,
    LoadClosure,
    LoadDeref,
    StoreDeref,
    DeleteDeref,
    LoadClassderef,
    MakeCell,
    CopyFreeVars,
    LoadSuperAttr,
    LoadMethod,
    LoadFromDictOrDeref,
    LoadFromDictOrGlobals,
    ReserveFast,
    SetFuncArgs,
    SetupAnnotations,
    StoreAnnotation,

    // Unpacking
    UnpackTuple,
    UnpackList,
    UnpackArg,
    UnpackVararg,
    UnpackSequence,
    UnpackEx,

    // Comparison
    CompareOp,
    IsOp,
    ContainsOp,

    // Jumps
    JumpForward,
    JumpAbsolute,
    JumpBackward,
    JumpBackwardNoInterrupt,
    JumpIfFalse,
    JumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    PopJumpIfFalse,
    PopJumpIfTrue,
    PopJumpIfNone,
    PopJumpIfNotNone,
    PopJumpForwardIfFalse,
    PopJumpForwardIfTrue,
    PopJumpForwardIfNone,
    PopJumpForwardIfNotNone,
    PopJumpBackwardIfFalse,
    PopJumpBackwardIfTrue,
    PopJumpBackwardIfNone,
    PopJumpBackwardIfNotNone,

    // Calls and function construction
    CallFunction,
    CallFunctionVar,
    CallFunctionKw,
    CallFunctionVarKw,
    CallFunctionEx,
    CallMethod,
    Call,
    CallKw,
    #[strum(serialize = "CALL_INTRINSIC_1")]
    CallIntrinsic1,
    #[strum(serialize = "CALL_INTRINSIC_2")]
    CallIntrinsic2,
    Precall,
    KwNames,
    MakeFunction,
    MakeClosure,
    SetFunctionAttribute,

    // F-string formatting
    FormatValue,
    FormatSimple,
    FormatWithSpec,
    ConvertValue,
}

/// One release's byte table.
///
/// Sparse in both directions: `opcode(byte)` answers decoding, `byte(op)`
/// answers the simulator's "what would this version call it" queries, and
/// `cache_words(op)` gives the number of inline cache units following an
/// instruction (always 0 before 3.11).
#[derive(Debug)]
pub struct Table {
    version: Version,
    have_argument: u8,
    to_opcode: [Option<Opcode>; 256],
    from_opcode: AHashMap<Opcode, u8>,
    caches: AHashMap<Opcode, u8>,
}

impl Table {
    fn new(version: Version, have_argument: u8) -> Self {
        Self {
            version,
            have_argument,
            to_opcode: [None; 256],
            from_opcode: AHashMap::new(),
            caches: AHashMap::new(),
        }
    }

    /// Assigns `op` to `byte`, displacing whatever either side pointed at.
    ///
    /// Displacement keeps chained version diffs honest: moving an opcode to
    /// a new byte clears its old slot, and reusing a byte clears the old
    /// occupant's reverse entry.
    fn set(&mut self, byte: u8, op: Opcode) {
        if let Some(old_byte) = self.from_opcode.remove(&op) {
            self.to_opcode[old_byte as usize] = None;
        }
        if let Some(old_op) = self.to_opcode[byte as usize] {
            self.from_opcode.remove(&old_op);
        }
        self.to_opcode[byte as usize] = Some(op);
        self.from_opcode.insert(op, byte);
    }

    /// Removes an operation from this release entirely.
    fn remove(&mut self, op: Opcode) {
        if let Some(byte) = self.from_opcode.remove(&op) {
            self.to_opcode[byte as usize] = None;
        }
        self.caches.remove(&op);
    }

    fn set_cache(&mut self, op: Opcode, words: u8) {
        self.caches.insert(op, words);
    }

    fn clear_caches(&mut self) {
        self.caches.clear();
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Byte value at or above which an opcode carries an operand.
    #[must_use]
    pub fn have_argument(&self) -> u8 {
        self.have_argument
    }

    /// Canonical opcode at `byte`, or `None` for a gap in this release.
    #[must_use]
    pub fn opcode(&self, byte: u8) -> Option<Opcode> {
        self.to_opcode[byte as usize]
    }

    /// Byte this release assigns to `op`, or `None` if the release lacks it.
    #[must_use]
    pub fn byte(&self, op: Opcode) -> Option<u8> {
        self.from_opcode.get(&op).copied()
    }

    /// Whether `op` takes an operand in this release.
    #[must_use]
    pub fn has_arg(&self, op: Opcode) -> Option<bool> {
        self.byte(op).map(|b| b >= self.have_argument)
    }

    /// Inline cache units following `op` in this release (0 before 3.11).
    #[must_use]
    pub fn cache_words(&self, op: Opcode) -> u8 {
        self.caches.get(&op).copied().unwrap_or(0)
    }

    /// Number of distinct opcodes this release defines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.from_opcode.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.from_opcode.is_empty()
    }
}

/// The registry, built once, ordered oldest release first.
fn registry() -> &'static IndexMap<Version, Table> {
    static TABLES: OnceLock<IndexMap<Version, Table>> = OnceLock::new();
    TABLES.get_or_init(|| SUPPORTED.iter().map(|&v| (v, tables::build(v))).collect())
}

/// Returns the cached table for `version`, or `None` for a release that
/// never shipped (1.2 maps to 1.1's magic before reaching here).
pub fn table(version: Version) -> Option<&'static Table> {
    registry().get(&version)
}

/// Convenience wrapper over [`table`] + [`Table::opcode`].
#[must_use]
pub fn byte_to_opcode(version: Version, byte: u8) -> Option<Opcode> {
    table(version)?.opcode(byte)
}

/// Convenience wrapper over [`table`] + [`Table::byte`].
#[must_use]
pub fn opcode_to_byte(version: Version, op: Opcode) -> Option<u8> {
    table(version)?.byte(op)
}

impl Opcode {
    /// True for operations that transfer control (the decoder and block
    /// builder treat these as terminators or block splits).
    #[must_use]
    pub fn is_jump(self) -> bool {
        self.is_conditional_jump() || self.is_unconditional_jump() || matches!(self, Self::ForIter | Self::ForLoop | Self::Send)
    }

    #[must_use]
    pub fn is_unconditional_jump(self) -> bool {
        matches!(
            self,
            Self::JumpForward | Self::JumpAbsolute | Self::JumpBackward | Self::JumpBackwardNoInterrupt
        )
    }

    #[must_use]
    pub fn is_conditional_jump(self) -> bool {
        matches!(
            self,
            Self::JumpIfFalse
                | Self::JumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::PopJumpIfNone
                | Self::PopJumpIfNotNone
                | Self::PopJumpForwardIfFalse
                | Self::PopJumpForwardIfTrue
                | Self::PopJumpForwardIfNone
                | Self::PopJumpForwardIfNotNone
                | Self::PopJumpBackwardIfFalse
                | Self::PopJumpBackwardIfTrue
                | Self::PopJumpBackwardIfNone
                | Self::PopJumpBackwardIfNotNone
                | Self::JumpIfNotExcMatch
        )
    }

    /// True when the jump operand is relative to the next instruction
    /// rather than an absolute offset, for the given release.
    #[must_use]
    pub fn is_relative_jump(self, version: Version) -> bool {
        if version >= Version::new(3, 12) {
            // Everything is relative from 3.12 on.
            return self.is_jump() || matches!(self, Self::SetupFinally);
        }
        match self {
            Self::JumpForward
            | Self::JumpBackward
            | Self::JumpBackwardNoInterrupt
            | Self::ForIter
            | Self::ForLoop
            | Self::Send
            | Self::SetupLoop
            | Self::SetupExcept
            | Self::SetupFinally
            | Self::SetupWith
            | Self::SetupAsyncWith
            | Self::BeginFinally
            | Self::CallFinally => true,
            Self::PopJumpForwardIfFalse
            | Self::PopJumpForwardIfTrue
            | Self::PopJumpForwardIfNone
            | Self::PopJumpForwardIfNotNone
            | Self::PopJumpBackwardIfFalse
            | Self::PopJumpBackwardIfTrue
            | Self::PopJumpBackwardIfNone
            | Self::PopJumpBackwardIfNotNone => true,
            Self::JumpIfFalseOrPop | Self::JumpIfTrueOrPop => version >= Version::new(3, 11),
            // The pre-2.7/3.1 keep-value conditionals were relative.
            Self::JumpIfFalse | Self::JumpIfTrue => true,
            _ => false,
        }
    }

    /// True for jumps whose target lies backwards from the next
    /// instruction (operand counts words back instead of forward).
    #[must_use]
    pub fn is_backward_jump(self) -> bool {
        matches!(
            self,
            Self::JumpBackward
                | Self::JumpBackwardNoInterrupt
                | Self::PopJumpBackwardIfFalse
                | Self::PopJumpBackwardIfTrue
                | Self::PopJumpBackwardIfNone
                | Self::PopJumpBackwardIfNotNone
        )
    }

    /// True for operations that end a basic block without a successor.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ReturnValue
                | Self::ReturnConst
                | Self::RaiseException
                | Self::RaiseVarargs
                | Self::Reraise
                | Self::BreakLoop
                | Self::ContinueLoop
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SUPPORTED;

    #[test]
    fn every_supported_version_has_a_nonempty_table() {
        for &version in SUPPORTED {
            let table = table(version).unwrap_or_else(|| panic!("no table for {version}"));
            assert!(!table.is_empty(), "empty table for {version}");
            assert!(table.len() > 60, "{version} table suspiciously small: {}", table.len());
        }
    }

    #[test]
    fn round_trip_byte_opcode_byte() {
        for &version in SUPPORTED {
            let table = table(version).unwrap();
            for byte in 0..=255u8 {
                if let Some(op) = table.opcode(byte) {
                    assert_eq!(table.byte(op), Some(byte), "{version} byte {byte} op {op}");
                }
            }
        }
    }

    #[test]
    fn has_arg_matches_have_argument_threshold() {
        for &version in SUPPORTED {
            let table = table(version).unwrap();
            for byte in 0..=255u8 {
                if let Some(op) = table.opcode(byte) {
                    assert_eq!(
                        table.has_arg(op),
                        Some(byte >= table.have_argument()),
                        "{version} byte {byte} op {op}"
                    );
                }
            }
        }
    }

    #[test]
    fn have_argument_thresholds() {
        assert_eq!(table(Version::new(2, 7)).unwrap().have_argument(), 90);
        assert_eq!(table(Version::new(3, 12)).unwrap().have_argument(), 90);
        assert_eq!(table(Version::new(3, 13)).unwrap().have_argument(), 44);
        assert_eq!(table(Version::new(3, 14)).unwrap().have_argument(), 43);
    }

    #[test]
    fn caches_only_from_3_11() {
        for &version in SUPPORTED {
            let table = table(version).unwrap();
            let cached: u32 = (0..=255u8)
                .filter_map(|b| table.opcode(b))
                .map(|op| u32::from(table.cache_words(op)))
                .sum();
            if version.has_inline_caches() {
                assert!(cached > 0, "{version} should declare inline caches");
            } else {
                assert_eq!(cached, 0, "{version} must not declare inline caches");
            }
        }
    }

    #[test]
    fn key_opcodes_present_per_era() {
        let t27 = table(Version::new(2, 7)).unwrap();
        assert_eq!(t27.opcode(t27.byte(Opcode::PrintItem).unwrap()), Some(Opcode::PrintItem));
        assert!(t27.byte(Opcode::BinaryOp).is_none());

        let t310 = table(Version::new(3, 10)).unwrap();
        assert!(t310.byte(Opcode::MatchClass).is_some());
        assert!(t310.byte(Opcode::PrintItem).is_none());

        let t314 = table(Version::new(3, 14)).unwrap();
        for op in [
            Opcode::LoadFastBorrow,
            Opcode::StoreFastLoadFast,
            Opcode::PopIter,
            Opcode::EndFor,
            Opcode::PopJumpIfNotNone,
            Opcode::LoadFastAndClear,
            Opcode::BinaryOp,
            Opcode::LoadSmallInt,
        ] {
            assert!(t314.byte(op).is_some(), "3.14 missing {op}");
        }
    }

    #[test]
    fn display_uses_dis_spelling() {
        assert_eq!(Opcode::LoadConst.to_string(), "LOAD_CONST");
        assert_eq!(Opcode::PopJumpIfNotNone.to_string(), "POP_JUMP_IF_NOT_NONE");
        assert_eq!(Opcode::Slice0.to_string(), "SLICE_0");
    }
}
