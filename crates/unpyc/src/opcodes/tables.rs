//! Per-release byte tables, written as a changelog.
//!
//! Each builder starts from the previous release's table and applies the
//! byte-level changes that release shipped, mirroring how the numbering
//! actually evolved. 3.13 and 3.14 renumbered the whole space and moved
//! the HAVE_ARGUMENT threshold, so those two are laid out from scratch.
//!
//! Gaps are deliberate: a byte with no entry decodes as INVALID for that
//! release. Some historical interpreters reused gap bytes as NOP; we do
//! not guess.

use super::{Opcode, Opcode as Op, Table};
use crate::version::Version;

/// Builds the table for one supported release.
///
/// # Panics
///
/// Panics if `version` is not in [`crate::version::SUPPORTED`]; callers go
/// through the cached registry which only iterates that list.
pub(super) fn build(version: Version) -> Table {
    match (version.major, version.minor) {
        (1, 0) => v1_0(),
        (1, 1) => v1_1(),
        (1, 3) => v1_3(),
        (1, 4) => v1_4(),
        (1, 5) => v1_5(),
        (1, 6) => v1_6(),
        (2, 0) => v2_0(),
        (2, 1) => v2_1(),
        (2, 2) => v2_2(),
        (2, 3) => v2_3(),
        (2, 4) => v2_4(),
        (2, 5) => v2_5(),
        (2, 6) => v2_6(),
        (2, 7) => v2_7(),
        (3, 0) => v3_0(),
        (3, 1) => v3_1(),
        (3, 2) => v3_2(),
        (3, 3) => v3_3(),
        (3, 4) => v3_4(),
        (3, 5) => v3_5(),
        (3, 6) => v3_6(),
        (3, 7) => v3_7(),
        (3, 8) => v3_8(),
        (3, 9) => v3_9(),
        (3, 10) => v3_10(),
        (3, 11) => v3_11(),
        (3, 12) => v3_12(),
        (3, 13) => v3_13(),
        (3, 14) => v3_14(),
        _ => panic!("no opcode table for Python {version}"),
    }
}

fn with_version(mut table: Table, version: Version) -> Table {
    table.version = version;
    table
}

fn v1_0() -> Table {
    let mut t = Table::new(Version::new(1, 0), 90);
    for (byte, op) in [
        (0, Op::StopCode),
        (1, Op::PopTop),
        (2, Op::RotTwo),
        (3, Op::RotThree),
        (4, Op::DupTop),
        (10, Op::UnaryPositive),
        (11, Op::UnaryNegative),
        (12, Op::UnaryNot),
        (13, Op::UnaryConvert),
        (14, Op::UnaryCall),
        (15, Op::UnaryInvert),
        (20, Op::BinaryMultiply),
        (21, Op::BinaryDivide),
        (22, Op::BinaryModulo),
        (23, Op::BinaryAdd),
        (24, Op::BinarySubtract),
        (25, Op::BinarySubscr),
        (26, Op::BinaryCall),
        (30, Op::Slice0),
        (31, Op::Slice1),
        (32, Op::Slice2),
        (33, Op::Slice3),
        (40, Op::StoreSlice0),
        (41, Op::StoreSlice1),
        (42, Op::StoreSlice2),
        (43, Op::StoreSlice3),
        (50, Op::DeleteSlice0),
        (51, Op::DeleteSlice1),
        (52, Op::DeleteSlice2),
        (53, Op::DeleteSlice3),
        (60, Op::StoreSubscr),
        (61, Op::DeleteSubscr),
        (62, Op::BinaryLshift),
        (63, Op::BinaryRshift),
        (64, Op::BinaryAnd),
        (65, Op::BinaryXor),
        (66, Op::BinaryOr),
        (70, Op::PrintExpr),
        (71, Op::PrintItem),
        (72, Op::PrintNewline),
        (80, Op::BreakLoop),
        (81, Op::RaiseException),
        (82, Op::LoadLocals),
        (83, Op::ReturnValue),
        (84, Op::LoadGlobals),
        (85, Op::ExecStmt),
        (86, Op::BuildFunction),
        (87, Op::PopBlock),
        (88, Op::EndFinally),
        (89, Op::BuildClass),
        (90, Op::StoreName),
        (91, Op::DeleteName),
        (92, Op::UnpackTuple),
        (93, Op::UnpackList),
        (94, Op::UnpackArg),
        (95, Op::StoreAttr),
        (96, Op::DeleteAttr),
        (97, Op::StoreGlobal),
        (98, Op::DeleteGlobal),
        (99, Op::UnpackVararg),
        (100, Op::LoadConst),
        (101, Op::LoadName),
        (102, Op::BuildTuple),
        (103, Op::BuildList),
        (104, Op::BuildMap),
        (105, Op::LoadAttr),
        (106, Op::CompareOp),
        (107, Op::ImportName),
        (108, Op::ImportFrom),
        (110, Op::JumpForward),
        (111, Op::JumpIfFalse),
        (112, Op::JumpIfTrue),
        (113, Op::JumpAbsolute),
        (114, Op::ForLoop),
        (115, Op::LoadLocal),
        (116, Op::LoadGlobal),
        (117, Op::SetFuncArgs),
        (120, Op::SetupLoop),
        (121, Op::SetupExcept),
        (122, Op::SetupFinally),
        (123, Op::ReserveFast),
        (124, Op::LoadFast),
        (125, Op::StoreFast),
        (126, Op::DeleteFast),
        (127, Op::SetLineno),
    ] {
        t.set(byte, op);
    }
    t
}

// 1.1 and 1.2 share a magic and a table; nothing moved.
fn v1_1() -> Table {
    with_version(v1_0(), Version::new(1, 1))
}

// 1.3 replaced the call/raise protocol: UNARY_CALL/BINARY_CALL/
// BUILD_FUNCTION/RAISE_EXCEPTION gave way to CALL_FUNCTION/MAKE_FUNCTION/
// RAISE_VARARGS, and the old frame-setup helpers went away.
fn v1_3() -> Table {
    let mut t = with_version(v1_1(), Version::new(1, 3));
    for op in [
        Op::UnaryCall,
        Op::BinaryCall,
        Op::BuildFunction,
        Op::RaiseException,
        Op::SetFuncArgs,
        Op::ReserveFast,
        Op::LoadLocal,
        Op::LoadGlobals,
    ] {
        t.remove(op);
    }
    t.set(130, Op::RaiseVarargs);
    t.set(131, Op::CallFunction);
    t.set(132, Op::MakeFunction);
    t
}

fn v1_4() -> Table {
    let mut t = with_version(v1_3(), Version::new(1, 4));
    t.set(19, Op::BinaryPower);
    t.set(133, Op::BuildSlice);
    t
}

fn v1_5() -> Table {
    with_version(v1_4(), Version::new(1, 5))
}

fn v1_6() -> Table {
    let mut t = with_version(v1_5(), Version::new(1, 6));
    t.set(140, Op::CallFunctionVar);
    t.set(141, Op::CallFunctionKw);
    t.set(142, Op::CallFunctionVarKw);
    t
}

// 2.0: augmented assignment, UNPACK_SEQUENCE unification, print >> chevron
// forms, import *, and EXTENDED_ARG.
fn v2_0() -> Table {
    let mut t = with_version(v1_6(), Version::new(2, 0));
    for op in [Op::UnpackTuple, Op::UnpackList, Op::UnpackArg, Op::UnpackVararg] {
        t.remove(op);
    }
    t.set(5, Op::RotFour);
    t.set(55, Op::InplaceAdd);
    t.set(56, Op::InplaceSubtract);
    t.set(57, Op::InplaceMultiply);
    t.set(58, Op::InplaceDivide);
    t.set(59, Op::InplaceModulo);
    t.set(67, Op::InplacePower);
    t.set(73, Op::PrintItemTo);
    t.set(74, Op::PrintNewlineTo);
    t.set(75, Op::InplaceLshift);
    t.set(76, Op::InplaceRshift);
    t.set(77, Op::InplaceAnd);
    t.set(78, Op::InplaceXor);
    t.set(79, Op::InplaceOr);
    t.set(84, Op::ImportStar);
    t.set(92, Op::UnpackSequence);
    t.set(99, Op::DupTopX);
    t.set(143, Op::ExtendedArg);
    t
}

// 2.1: nested scopes (cells and frees).
fn v2_1() -> Table {
    let mut t = with_version(v2_0(), Version::new(2, 1));
    t.set(119, Op::ContinueLoop);
    t.set(134, Op::MakeClosure);
    t.set(135, Op::LoadClosure);
    t.set(136, Op::LoadDeref);
    t.set(137, Op::StoreDeref);
    t
}

// 2.2: generators and the iterator protocol, plus true/floor division.
fn v2_2() -> Table {
    let mut t = with_version(v2_1(), Version::new(2, 2));
    t.set(26, Op::BinaryFloorDivide);
    t.set(27, Op::BinaryTrueDivide);
    t.set(28, Op::InplaceFloorDivide);
    t.set(29, Op::InplaceTrueDivide);
    t.set(68, Op::GetIter);
    t.set(86, Op::YieldValue);
    t.set(93, Op::ForIter);
    t.remove(Op::ForLoop);
    t
}

fn v2_3() -> Table {
    with_version(v2_2(), Version::new(2, 3))
}

fn v2_4() -> Table {
    let mut t = with_version(v2_3(), Version::new(2, 4));
    t.set(9, Op::Nop);
    t.set(18, Op::ListAppend);
    t
}

fn v2_5() -> Table {
    let mut t = with_version(v2_4(), Version::new(2, 5));
    t.set(81, Op::WithCleanup);
    t
}

fn v2_6() -> Table {
    let mut t = with_version(v2_5(), Version::new(2, 6));
    t.set(54, Op::StoreMap);
    t
}

// 2.7: set literals shift the build/attr/compare block up by one, and the
// four modern conditional jumps replace JUMP_IF_FALSE/TRUE.
fn v2_7() -> Table {
    let mut t = with_version(v2_6(), Version::new(2, 7));
    t.set(104, Op::BuildSet);
    t.set(105, Op::BuildMap);
    t.set(106, Op::LoadAttr);
    t.set(107, Op::CompareOp);
    t.set(108, Op::ImportName);
    t.set(109, Op::ImportFrom);
    t.remove(Op::JumpIfFalse);
    t.remove(Op::JumpIfTrue);
    t.set(111, Op::JumpIfFalseOrPop);
    t.set(112, Op::JumpIfTrueOrPop);
    t.set(114, Op::PopJumpIfFalse);
    t.set(115, Op::PopJumpIfTrue);
    t.set(94, Op::ListAppend);
    t.set(143, Op::SetupWith);
    t.set(145, Op::ExtendedArg);
    t.set(146, Op::SetAdd);
    t.set(147, Op::MapAdd);
    t
}

// 3.0 branches from 2.6, not 2.7: the py3k line forked before the 2.7
// additions, then removed the statement forms that became functions.
fn v3_0() -> Table {
    let mut t = with_version(v2_6(), Version::new(3, 0));
    for op in [
        Op::UnaryConvert,
        Op::BinaryDivide,
        Op::InplaceDivide,
        Op::Slice0,
        Op::Slice1,
        Op::Slice2,
        Op::Slice3,
        Op::StoreSlice0,
        Op::StoreSlice1,
        Op::StoreSlice2,
        Op::StoreSlice3,
        Op::DeleteSlice0,
        Op::DeleteSlice1,
        Op::DeleteSlice2,
        Op::DeleteSlice3,
        Op::PrintItem,
        Op::PrintNewline,
        Op::PrintItemTo,
        Op::PrintNewlineTo,
        Op::ExecStmt,
        Op::BuildClass,
        Op::LoadLocals,
        Op::SetLineno,
    ] {
        t.remove(op);
    }
    t.set(17, Op::SetAdd);
    t.set(69, Op::StoreLocals);
    t.set(71, Op::LoadBuildClass);
    t.set(94, Op::UnpackEx);
    t.set(104, Op::BuildSet);
    t.set(105, Op::BuildMap);
    t.set(106, Op::LoadAttr);
    t.set(107, Op::CompareOp);
    t.set(108, Op::ImportName);
    t.set(109, Op::ImportFrom);
    t
}

// 3.1: the 2.7 jump quartet lands, and the comprehension helpers move to
// the 145+ range to make room for UNPACK_EX.
fn v3_1() -> Table {
    let mut t = with_version(v3_0(), Version::new(3, 1));
    t.set(89, Op::PopExcept);
    t.remove(Op::JumpIfFalse);
    t.remove(Op::JumpIfTrue);
    t.set(111, Op::JumpIfFalseOrPop);
    t.set(112, Op::JumpIfTrueOrPop);
    t.set(114, Op::PopJumpIfFalse);
    t.set(115, Op::PopJumpIfTrue);
    t.set(144, Op::ExtendedArg);
    t.set(145, Op::ListAppend);
    t.set(146, Op::SetAdd);
    t.set(147, Op::MapAdd);
    t
}

fn v3_2() -> Table {
    let mut t = with_version(v3_1(), Version::new(3, 2));
    t.remove(Op::StopCode);
    t.remove(Op::DupTopX);
    t.remove(Op::RotFour);
    t.set(5, Op::DupTopTwo);
    t.set(138, Op::DeleteDeref);
    t.set(143, Op::SetupWith);
    t
}

fn v3_3() -> Table {
    let mut t = with_version(v3_2(), Version::new(3, 3));
    t.set(72, Op::YieldFrom);
    t
}

fn v3_4() -> Table {
    let mut t = with_version(v3_3(), Version::new(3, 4));
    t.remove(Op::StoreLocals);
    t.set(148, Op::LoadClassderef);
    t
}

// 3.5: async/await, matrix multiply, and the *-unpacking builders.
fn v3_5() -> Table {
    let mut t = with_version(v3_4(), Version::new(3, 5));
    t.remove(Op::StoreMap);
    t.set(16, Op::BinaryMatrixMultiply);
    t.set(17, Op::InplaceMatrixMultiply);
    t.set(50, Op::GetAiter);
    t.set(51, Op::GetAnext);
    t.set(52, Op::BeforeAsyncWith);
    t.set(69, Op::GetYieldFromIter);
    t.set(73, Op::GetAwaitable);
    t.set(81, Op::WithCleanupStart);
    t.set(82, Op::WithCleanupFinish);
    t.set(146, Op::SetAdd);
    t.set(149, Op::BuildListUnpack);
    t.set(150, Op::BuildMapUnpack);
    t.set(151, Op::BuildMapUnpackWithCall);
    t.set(152, Op::BuildTupleUnpack);
    t.set(153, Op::BuildSetUnpack);
    t.set(154, Op::SetupAsyncWith);
    t
}

// 3.6: wordcode (a decoder concern), f-strings, and CALL_FUNCTION_EX.
fn v3_6() -> Table {
    let mut t = with_version(v3_5(), Version::new(3, 6));
    t.remove(Op::CallFunctionVar);
    t.remove(Op::CallFunctionVarKw);
    t.remove(Op::MakeClosure);
    t.set(85, Op::SetupAnnotations);
    t.set(127, Op::StoreAnnotation);
    t.set(142, Op::CallFunctionEx);
    t.set(155, Op::FormatValue);
    t.set(156, Op::BuildConstKeyMap);
    t.set(157, Op::BuildString);
    t.set(158, Op::BuildTupleUnpackWithCall);
    t
}

fn v3_7() -> Table {
    let mut t = with_version(v3_6(), Version::new(3, 7));
    t.remove(Op::StoreAnnotation);
    t.set(160, Op::LoadMethod);
    t.set(161, Op::CallMethod);
    t
}

// 3.8: loop blocks dissolve into plain jumps plus finally-call plumbing.
fn v3_8() -> Table {
    let mut t = with_version(v3_7(), Version::new(3, 8));
    for op in [Op::BreakLoop, Op::ContinueLoop, Op::SetupLoop, Op::SetupExcept] {
        t.remove(op);
    }
    t.set(6, Op::RotFour);
    t.set(53, Op::BeginFinally);
    t.set(54, Op::EndAsyncFor);
    t.set(162, Op::CallFinally);
    t.set(163, Op::PopFinally);
    t
}

// 3.9: the finally/with cleanup zoo and the *-unpack builders give way to
// RERAISE/WITH_EXCEPT_START and LIST_EXTEND-style update opcodes.
fn v3_9() -> Table {
    let mut t = with_version(v3_8(), Version::new(3, 9));
    for op in [
        Op::BeginFinally,
        Op::CallFinally,
        Op::PopFinally,
        Op::EndFinally,
        Op::WithCleanupStart,
        Op::WithCleanupFinish,
        Op::BuildListUnpack,
        Op::BuildMapUnpack,
        Op::BuildMapUnpackWithCall,
        Op::BuildTupleUnpack,
        Op::BuildTupleUnpackWithCall,
        Op::BuildSetUnpack,
    ] {
        t.remove(op);
    }
    t.set(48, Op::Reraise);
    t.set(49, Op::WithExceptStart);
    t.set(74, Op::LoadAssertionError);
    t.set(82, Op::ListToTuple);
    t.set(117, Op::IsOp);
    t.set(118, Op::ContainsOp);
    t.set(121, Op::JumpIfNotExcMatch);
    t.set(162, Op::ListExtend);
    t.set(163, Op::SetUpdate);
    t.set(164, Op::DictMerge);
    t.set(165, Op::DictUpdate);
    t
}

// 3.10: structural pattern matching.
fn v3_10() -> Table {
    let mut t = with_version(v3_9(), Version::new(3, 10));
    t.set(30, Op::GetLen);
    t.set(31, Op::MatchMapping);
    t.set(32, Op::MatchSequence);
    t.set(33, Op::MatchKeys);
    t.set(34, Op::CopyDictWithoutKeys);
    t.set(99, Op::RotN);
    t.set(119, Op::Reraise);
    t.set(129, Op::GenStart);
    t.set(152, Op::MatchClass);
    t
}

// 3.11: the specializing interpreter. Arithmetic collapses into BINARY_OP,
// calls into PRECALL/CALL, rotations into SWAP/COPY, and exception regions
// move from SETUP_* blocks to the exception table. Inline caches appear.
fn v3_11() -> Table {
    let mut t = with_version(v3_10(), Version::new(3, 11));
    for op in [
        Op::RotTwo,
        Op::RotThree,
        Op::RotFour,
        Op::RotN,
        Op::DupTop,
        Op::DupTopTwo,
        Op::BinaryPower,
        Op::BinaryMultiply,
        Op::BinaryMatrixMultiply,
        Op::BinaryModulo,
        Op::BinaryAdd,
        Op::BinarySubtract,
        Op::BinaryLshift,
        Op::BinaryRshift,
        Op::BinaryAnd,
        Op::BinaryXor,
        Op::BinaryOr,
        Op::BinaryFloorDivide,
        Op::BinaryTrueDivide,
        Op::InplaceAdd,
        Op::InplaceSubtract,
        Op::InplaceMultiply,
        Op::InplaceMatrixMultiply,
        Op::InplaceModulo,
        Op::InplacePower,
        Op::InplaceLshift,
        Op::InplaceRshift,
        Op::InplaceAnd,
        Op::InplaceXor,
        Op::InplaceOr,
        Op::InplaceFloorDivide,
        Op::InplaceTrueDivide,
        Op::JumpAbsolute,
        Op::JumpIfNotExcMatch,
        Op::CallFunction,
        Op::CallFunctionKw,
        Op::CallMethod,
        Op::GenStart,
        Op::CopyDictWithoutKeys,
        Op::SetupFinally,
        Op::SetupWith,
        Op::SetupAsyncWith,
        Op::YieldFrom,
        Op::PopBlock,
        Op::PopJumpIfFalse,
        Op::PopJumpIfTrue,
    ] {
        t.remove(op);
    }
    t.set(0, Op::Cache);
    t.set(2, Op::PushNull);
    t.set(35, Op::PushExcInfo);
    t.set(36, Op::CheckExcMatch);
    t.set(37, Op::CheckEgMatch);
    t.set(53, Op::BeforeWith);
    t.set(75, Op::ReturnGenerator);
    t.set(87, Op::AsyncGenWrap);
    t.set(88, Op::PrepReraiseStar);
    t.set(99, Op::Swap);
    t.set(114, Op::PopJumpForwardIfFalse);
    t.set(115, Op::PopJumpForwardIfTrue);
    t.set(120, Op::Copy);
    t.set(122, Op::BinaryOp);
    t.set(123, Op::Send);
    t.set(128, Op::PopJumpForwardIfNotNone);
    t.set(129, Op::PopJumpForwardIfNone);
    t.set(134, Op::JumpBackwardNoInterrupt);
    t.set(135, Op::MakeCell);
    t.set(136, Op::LoadClosure);
    t.set(137, Op::LoadDeref);
    t.set(138, Op::StoreDeref);
    t.set(139, Op::DeleteDeref);
    t.set(140, Op::JumpBackward);
    t.set(149, Op::CopyFreeVars);
    t.set(151, Op::Resume);
    t.set(166, Op::Precall);
    t.set(171, Op::Call);
    t.set(172, Op::KwNames);
    t.set(173, Op::PopJumpBackwardIfNotNone);
    t.set(174, Op::PopJumpBackwardIfNone);
    t.set(175, Op::PopJumpBackwardIfFalse);
    t.set(176, Op::PopJumpBackwardIfTrue);
    for (op, words) in [
        (Op::BinaryOp, 1),
        (Op::BinarySubscr, 4),
        (Op::Call, 4),
        (Op::CompareOp, 2),
        (Op::LoadAttr, 4),
        (Op::LoadGlobal, 5),
        (Op::LoadMethod, 10),
        (Op::Precall, 1),
        (Op::StoreAttr, 4),
        (Op::StoreSubscr, 1),
        (Op::UnpackSequence, 1),
    ] {
        t.set_cache(op, words);
    }
    t
}

// 3.12: comprehension inlining (LOAD_FAST_AND_CLEAR), RETURN_CONST,
// slice opcodes, intrinsics replacing several one-off operations.
fn v3_12() -> Table {
    let mut t = with_version(v3_11(), Version::new(3, 12));
    for op in [
        Op::Precall,
        Op::LoadMethod,
        Op::AsyncGenWrap,
        Op::UnaryPositive,
        Op::ListToTuple,
        Op::ImportStar,
        Op::PrintExpr,
        Op::LoadClassderef,
        Op::PrepReraiseStar,
        Op::PopJumpForwardIfFalse,
        Op::PopJumpForwardIfTrue,
        Op::PopJumpForwardIfNone,
        Op::PopJumpForwardIfNotNone,
        Op::PopJumpBackwardIfFalse,
        Op::PopJumpBackwardIfTrue,
        Op::PopJumpBackwardIfNone,
        Op::PopJumpBackwardIfNotNone,
        Op::JumpIfFalseOrPop,
        Op::JumpIfTrueOrPop,
    ] {
        t.remove(op);
    }
    t.set(4, Op::EndFor);
    t.set(5, Op::EndSend);
    t.set(8, Op::CleanupThrow);
    t.set(26, Op::BinarySlice);
    t.set(27, Op::StoreSliceOp);
    t.set(87, Op::LoadLocals);
    t.set(114, Op::PopJumpIfFalse);
    t.set(115, Op::PopJumpIfTrue);
    t.set(121, Op::ReturnConst);
    t.set(127, Op::LoadFastCheck);
    t.set(128, Op::PopJumpIfNotNone);
    t.set(129, Op::PopJumpIfNone);
    t.set(141, Op::LoadSuperAttr);
    t.set(143, Op::LoadFastAndClear);
    t.set(148, Op::LoadFromDictOrDeref);
    t.set(166, Op::LoadFromDictOrGlobals);
    t.set(173, Op::CallIntrinsic1);
    t.set(174, Op::CallIntrinsic2);
    t.clear_caches();
    for (op, words) in [
        (Op::BinaryOp, 1),
        (Op::BinarySubscr, 1),
        (Op::Call, 3),
        (Op::CompareOp, 1),
        (Op::ForIter, 1),
        (Op::LoadAttr, 9),
        (Op::LoadGlobal, 4),
        (Op::LoadSuperAttr, 1),
        (Op::Send, 1),
        (Op::StoreAttr, 4),
        (Op::StoreSubscr, 1),
        (Op::UnpackSequence, 1),
    ] {
        t.set_cache(op, words);
    }
    t
}

// 3.13 renumbered the entire space: no-argument opcodes pack below the new
// HAVE_ARGUMENT threshold of 44. Laid out from scratch.
fn v3_13() -> Table {
    let mut t = Table::new(Version::new(3, 13), 44);
    for (byte, op) in [
        (0, Op::Cache),
        (1, Op::BeforeAsyncWith),
        (2, Op::BeforeWith),
        (4, Op::BinarySlice),
        (5, Op::BinarySubscr),
        (6, Op::CheckEgMatch),
        (7, Op::CheckExcMatch),
        (8, Op::CleanupThrow),
        (9, Op::DeleteSubscr),
        (10, Op::EndAsyncFor),
        (11, Op::EndFor),
        (12, Op::EndSend),
        (13, Op::ExitInitCheck),
        (14, Op::FormatSimple),
        (15, Op::FormatWithSpec),
        (16, Op::GetAiter),
        (17, Op::GetAnext),
        (18, Op::GetIter),
        (19, Op::GetLen),
        (20, Op::GetYieldFromIter),
        (21, Op::InterpreterExit),
        (22, Op::LoadAssertionError),
        (23, Op::LoadBuildClass),
        (24, Op::LoadLocals),
        (25, Op::MakeFunction),
        (26, Op::MatchKeys),
        (27, Op::MatchMapping),
        (28, Op::MatchSequence),
        (29, Op::Nop),
        (30, Op::PopExcept),
        (31, Op::PopTop),
        (32, Op::PushExcInfo),
        (33, Op::PushNull),
        (34, Op::ReturnGenerator),
        (35, Op::ReturnValue),
        (36, Op::SetupAnnotations),
        (37, Op::StoreSliceOp),
        (38, Op::StoreSubscr),
        (39, Op::ToBool),
        (40, Op::UnaryInvert),
        (41, Op::UnaryNegative),
        (42, Op::UnaryNot),
        (43, Op::WithExceptStart),
        (44, Op::BinaryOp),
        (45, Op::BuildConstKeyMap),
        (46, Op::BuildList),
        (47, Op::BuildMap),
        (48, Op::BuildSet),
        (49, Op::BuildSlice),
        (50, Op::BuildString),
        (51, Op::BuildTuple),
        (52, Op::Call),
        (53, Op::CallFunctionEx),
        (54, Op::CallIntrinsic1),
        (55, Op::CallIntrinsic2),
        (56, Op::CallKw),
        (57, Op::CompareOp),
        (58, Op::ContainsOp),
        (59, Op::ConvertValue),
        (60, Op::Copy),
        (61, Op::CopyFreeVars),
        (62, Op::DeleteAttr),
        (63, Op::DeleteDeref),
        (64, Op::DeleteFast),
        (65, Op::DeleteGlobal),
        (66, Op::DeleteName),
        (67, Op::DictMerge),
        (68, Op::DictUpdate),
        (69, Op::EnterExecutor),
        (70, Op::ExtendedArg),
        (71, Op::ForIter),
        (72, Op::GetAwaitable),
        (73, Op::ImportFrom),
        (74, Op::ImportName),
        (75, Op::IsOp),
        (76, Op::JumpBackward),
        (77, Op::JumpBackwardNoInterrupt),
        (78, Op::JumpForward),
        (79, Op::ListAppend),
        (80, Op::ListExtend),
        (81, Op::LoadAttr),
        (82, Op::LoadConst),
        (83, Op::LoadDeref),
        (84, Op::LoadFast),
        (85, Op::LoadFastAndClear),
        (86, Op::LoadFastCheck),
        (87, Op::LoadFastLoadFast),
        (88, Op::LoadFromDictOrDeref),
        (89, Op::LoadFromDictOrGlobals),
        (90, Op::LoadGlobal),
        (91, Op::LoadName),
        (92, Op::LoadSuperAttr),
        (93, Op::MakeCell),
        (94, Op::MapAdd),
        (95, Op::MatchClass),
        (96, Op::PopJumpIfFalse),
        (97, Op::PopJumpIfNone),
        (98, Op::PopJumpIfNotNone),
        (99, Op::PopJumpIfTrue),
        (100, Op::RaiseVarargs),
        (101, Op::Reraise),
        (102, Op::ReturnConst),
        (103, Op::Send),
        (104, Op::SetAdd),
        (105, Op::SetFunctionAttribute),
        (106, Op::SetUpdate),
        (107, Op::StoreAttr),
        (108, Op::StoreDeref),
        (109, Op::StoreFast),
        (110, Op::StoreFastLoadFast),
        (111, Op::StoreFastStoreFast),
        (112, Op::StoreGlobal),
        (113, Op::StoreName),
        (114, Op::Swap),
        (115, Op::UnpackEx),
        (116, Op::UnpackSequence),
        (117, Op::YieldValue),
        (149, Op::Resume),
    ] {
        t.set(byte, op);
    }
    for (op, words) in [
        (Op::BinaryOp, 1),
        (Op::BinarySubscr, 1),
        (Op::Call, 3),
        (Op::CallKw, 3),
        (Op::CompareOp, 1),
        (Op::ContainsOp, 1),
        (Op::ForIter, 1),
        (Op::JumpBackward, 1),
        (Op::LoadAttr, 9),
        (Op::LoadGlobal, 4),
        (Op::LoadSuperAttr, 1),
        (Op::PopJumpIfFalse, 1),
        (Op::PopJumpIfTrue, 1),
        (Op::PopJumpIfNone, 1),
        (Op::PopJumpIfNotNone, 1),
        (Op::Send, 1),
        (Op::StoreAttr, 4),
        (Op::StoreSubscr, 1),
        (Op::ToBool, 3),
        (Op::UnpackSequence, 1),
    ] {
        t.set_cache(op, words);
    }
    t
}

// 3.14 renumbered once more (HAVE_ARGUMENT drops to 43): BINARY_SUBSCR and
// RETURN_CONST dissolve into BINARY_OP and LOAD_CONST+RETURN_VALUE, and the
// borrowed-reference fast-local family arrives with LOAD_SMALL_INT and
// POP_ITER. Laid out from scratch.
fn v3_14() -> Table {
    let mut t = Table::new(Version::new(3, 14), 43);
    for (byte, op) in [
        (0, Op::Cache),
        (1, Op::BinarySlice),
        (2, Op::CheckEgMatch),
        (3, Op::CheckExcMatch),
        (4, Op::CleanupThrow),
        (5, Op::DeleteSubscr),
        (6, Op::EndAsyncFor),
        (7, Op::EndFor),
        (8, Op::EndSend),
        (9, Op::ExitInitCheck),
        (10, Op::FormatSimple),
        (11, Op::FormatWithSpec),
        (12, Op::GetAiter),
        (13, Op::GetAnext),
        (14, Op::GetIter),
        (15, Op::GetLen),
        (16, Op::GetYieldFromIter),
        (17, Op::InterpreterExit),
        (18, Op::LoadBuildClass),
        (19, Op::LoadLocals),
        (20, Op::MakeFunction),
        (21, Op::MatchKeys),
        (22, Op::MatchMapping),
        (23, Op::MatchSequence),
        (24, Op::Nop),
        (25, Op::NotTaken),
        (26, Op::PopExcept),
        (27, Op::PopIter),
        (28, Op::PopTop),
        (29, Op::PushExcInfo),
        (30, Op::PushNull),
        (31, Op::ReturnGenerator),
        (32, Op::ReturnValue),
        (33, Op::SetupAnnotations),
        (34, Op::StoreSliceOp),
        (35, Op::StoreSubscr),
        (36, Op::ToBool),
        (37, Op::UnaryInvert),
        (38, Op::UnaryNegative),
        (39, Op::UnaryNot),
        (40, Op::WithExceptStart),
        (43, Op::BinaryOp),
        (44, Op::BuildList),
        (45, Op::BuildMap),
        (46, Op::BuildSet),
        (47, Op::BuildSlice),
        (48, Op::BuildString),
        (49, Op::BuildTuple),
        (50, Op::Call),
        (51, Op::CallFunctionEx),
        (52, Op::CallIntrinsic1),
        (53, Op::CallIntrinsic2),
        (54, Op::CallKw),
        (55, Op::CompareOp),
        (56, Op::ContainsOp),
        (57, Op::ConvertValue),
        (58, Op::Copy),
        (59, Op::CopyFreeVars),
        (60, Op::DeleteAttr),
        (61, Op::DeleteDeref),
        (62, Op::DeleteFast),
        (63, Op::DeleteGlobal),
        (64, Op::DeleteName),
        (65, Op::DictMerge),
        (66, Op::DictUpdate),
        (67, Op::EnterExecutor),
        (68, Op::ExtendedArg),
        (69, Op::ForIter),
        (70, Op::GetAwaitable),
        (71, Op::ImportFrom),
        (72, Op::ImportName),
        (73, Op::IsOp),
        (74, Op::JumpBackward),
        (75, Op::JumpBackwardNoInterrupt),
        (76, Op::JumpForward),
        (77, Op::ListAppend),
        (78, Op::ListExtend),
        (79, Op::LoadAttr),
        (80, Op::LoadCommonConstant),
        (81, Op::LoadConst),
        (82, Op::LoadDeref),
        (83, Op::LoadFast),
        (84, Op::LoadFastAndClear),
        (85, Op::LoadFastBorrow),
        (86, Op::LoadFastBorrowLoadFastBorrow),
        (87, Op::LoadFastCheck),
        (88, Op::LoadFastLoadFast),
        (89, Op::LoadFromDictOrDeref),
        (90, Op::LoadFromDictOrGlobals),
        (91, Op::LoadGlobal),
        (92, Op::LoadName),
        (93, Op::LoadSmallInt),
        (94, Op::LoadSuperAttr),
        (95, Op::MakeCell),
        (96, Op::MapAdd),
        (97, Op::MatchClass),
        (98, Op::PopJumpIfFalse),
        (99, Op::PopJumpIfNone),
        (100, Op::PopJumpIfNotNone),
        (101, Op::PopJumpIfTrue),
        (102, Op::RaiseVarargs),
        (103, Op::Reraise),
        (104, Op::Send),
        (105, Op::SetAdd),
        (106, Op::SetFunctionAttribute),
        (107, Op::SetUpdate),
        (108, Op::StoreAttr),
        (109, Op::StoreDeref),
        (110, Op::StoreFast),
        (111, Op::StoreFastLoadFast),
        (112, Op::StoreFastStoreFast),
        (113, Op::StoreGlobal),
        (114, Op::StoreName),
        (115, Op::Swap),
        (116, Op::UnpackEx),
        (117, Op::UnpackSequence),
        (118, Op::YieldValue),
        (149, Op::Resume),
    ] {
        t.set(byte, op);
    }
    for (op, words) in [
        (Op::BinaryOp, 5),
        (Op::Call, 3),
        (Op::CallKw, 3),
        (Op::CompareOp, 1),
        (Op::ContainsOp, 1),
        (Op::ForIter, 1),
        (Op::JumpBackward, 1),
        (Op::LoadAttr, 9),
        (Op::LoadGlobal, 4),
        (Op::LoadSuperAttr, 1),
        (Op::PopJumpIfFalse, 1),
        (Op::PopJumpIfTrue, 1),
        (Op::PopJumpIfNone, 1),
        (Op::PopJumpIfNotNone, 1),
        (Op::Send, 1),
        (Op::StoreAttr, 4),
        (Op::StoreSubscr, 1),
        (Op::ToBool, 3),
        (Op::UnpackSequence, 1),
    ] {
        t.set_cache(op, words);
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_7_shifted_block() {
        let t = v2_7();
        assert_eq!(t.opcode(104), Some(Opcode::BuildSet));
        assert_eq!(t.opcode(105), Some(Opcode::BuildMap));
        assert_eq!(t.opcode(106), Some(Opcode::LoadAttr));
        // The 2.6 slots were displaced, not duplicated.
        assert_eq!(t.byte(Opcode::LoadAttr), Some(106));
        assert_eq!(t.byte(Opcode::BuildMap), Some(105));
    }

    #[test]
    fn v3_11_drops_per_op_arithmetic() {
        let t = v3_11();
        assert_eq!(t.byte(Opcode::BinaryAdd), None);
        assert_eq!(t.byte(Opcode::BinaryOp), Some(122));
        assert_eq!(t.opcode(0), Some(Opcode::Cache));
        assert_eq!(t.cache_words(Opcode::LoadMethod), 10);
    }

    #[test]
    fn v3_13_threshold_split() {
        let t = v3_13();
        assert_eq!(t.have_argument(), 44);
        assert_eq!(t.opcode(35), Some(Opcode::ReturnValue));
        assert_eq!(t.opcode(44), Some(Opcode::BinaryOp));
        assert_eq!(t.has_arg(Opcode::ReturnValue), Some(false));
        assert_eq!(t.has_arg(Opcode::BinaryOp), Some(true));
    }

    #[test]
    fn v1_0_has_no_argumentless_call() {
        let t = v1_0();
        assert_eq!(t.byte(Opcode::CallFunction), None);
        assert_eq!(t.byte(Opcode::BinaryCall), Some(26));
        assert_eq!(t.byte(Opcode::ForLoop), Some(114));
    }
}
