//! End-to-end decompilation: hand-assembled bytecode in, source out.
//!
//! Bytecode is assembled through the same version tables the decoder
//! reads, so byte values and cache counts cannot drift apart.

mod common;

use common::{code_const, code_object, decompiled, Asm};
use unpyc::{BigInt, Constant, Opcode as Op, Version};

const V27: Version = Version::new(2, 7);
const V310: Version = Version::new(3, 10);
const V314: Version = Version::new(3, 14);

#[test]
fn inlined_list_comprehension() {
    // [y for y in b] on 3.14: the LOAD_FAST_AND_CLEAR / SWAP prologue
    // and STORE_FAST restore epilogue around an in-line loop.
    let mut a = Asm::new(V314);
    a.op(Op::LoadFastBorrow, 0); // b
    a.op(Op::GetIter, 0);
    a.op(Op::LoadFastAndClear, 1); // y
    a.op(Op::Swap, 2);
    a.op(Op::BuildList, 0);
    a.op(Op::Swap, 2);
    let head = a.offset();
    let exhausted = a.jump(Op::ForIter);
    a.op(Op::StoreFastLoadFast, 0x11);
    a.op(Op::ListAppend, 2);
    a.jump_back(Op::JumpBackward, head);
    a.patch(exhausted);
    a.op(Op::EndFor, 0);
    a.op(Op::PopIter, 0);
    a.op(Op::Swap, 2);
    a.op(Op::StoreFast, 1);
    a.op(Op::PopTop, 0);
    a.op(Op::LoadConst, 0);
    a.op(Op::ReturnValue, 0);

    let module = code_object(V314, "<module>", a.finish(), vec![Constant::None], vec![], vec!["b", "y"]);
    assert_eq!(decompiled(&module), "[y for y in b]\n");
}

#[test]
fn inlined_comprehension_with_none_guard() {
    // [y for y in b if y is None]: POP_JUMP_IF_NOT_NONE back to the
    // iteration skips the append.
    let mut a = Asm::new(V314);
    a.op(Op::LoadFastBorrow, 0);
    a.op(Op::GetIter, 0);
    a.op(Op::LoadFastAndClear, 1);
    a.op(Op::Swap, 2);
    a.op(Op::BuildList, 0);
    a.op(Op::Swap, 2);
    let head = a.offset();
    let exhausted = a.jump(Op::ForIter);
    a.op(Op::StoreFastLoadFast, 0x11);
    let guard = a.jump(Op::PopJumpIfNotNone);
    a.op(Op::LoadFastBorrow, 1);
    a.op(Op::ListAppend, 2);
    let continue_at = a.offset();
    a.jump_back(Op::JumpBackward, head);
    a.patch_to(guard, continue_at);
    a.patch(exhausted);
    a.op(Op::EndFor, 0);
    a.op(Op::PopIter, 0);
    a.op(Op::Swap, 2);
    a.op(Op::StoreFast, 1);
    a.op(Op::PopTop, 0);
    a.op(Op::LoadConst, 0);
    a.op(Op::ReturnValue, 0);

    let module = code_object(V314, "<module>", a.finish(), vec![Constant::None], vec![], vec!["b", "y"]);
    assert_eq!(decompiled(&module), "[y for y in b if y is None]\n");
}

#[test]
fn inlined_dict_comprehension() {
    // {y: y for y in b}: BUILD_MAP builder fed by MAP_ADD.
    let mut a = Asm::new(V314);
    a.op(Op::LoadFastBorrow, 0);
    a.op(Op::GetIter, 0);
    a.op(Op::LoadFastAndClear, 1);
    a.op(Op::Swap, 2);
    a.op(Op::BuildMap, 0);
    a.op(Op::Swap, 2);
    let head = a.offset();
    let exhausted = a.jump(Op::ForIter);
    a.op(Op::StoreFastLoadFast, 0x11);
    a.op(Op::LoadFastBorrow, 1);
    a.op(Op::MapAdd, 2);
    a.jump_back(Op::JumpBackward, head);
    a.patch(exhausted);
    a.op(Op::EndFor, 0);
    a.op(Op::PopIter, 0);
    a.op(Op::Swap, 2);
    a.op(Op::StoreFast, 1);
    a.op(Op::PopTop, 0);
    a.op(Op::LoadConst, 0);
    a.op(Op::ReturnValue, 0);

    let module = code_object(V314, "<module>", a.finish(), vec![Constant::None], vec![], vec!["b", "y"]);
    assert_eq!(decompiled(&module), "{y: y for y in b}\n");
}

#[test]
fn generator_expression() {
    // (y for y in b): the generator body stays a separate code object
    // called with the iterator.
    let mut g = Asm::new(V314);
    g.op(Op::ReturnGenerator, 0);
    g.op(Op::PopTop, 0);
    g.op(Op::LoadFast, 0); // .0
    let head = g.offset();
    let exhausted = g.jump(Op::ForIter);
    g.op(Op::StoreFast, 1);
    g.op(Op::LoadFast, 1);
    g.op(Op::YieldValue, 0);
    g.op(Op::PopTop, 0);
    g.jump_back(Op::JumpBackward, head);
    g.patch(exhausted);
    g.op(Op::EndFor, 0);
    g.op(Op::PopIter, 0);
    g.op(Op::LoadConst, 0);
    g.op(Op::ReturnValue, 0);
    let mut genexpr = code_object(V314, "<genexpr>", g.finish(), vec![Constant::None], vec![], vec![".0", "y"]);
    genexpr.argcount = 1;
    genexpr.flags = unpyc::flags::GENERATOR;

    let mut a = Asm::new(V314);
    a.op(Op::LoadConst, 0); // <genexpr>
    a.op(Op::MakeFunction, 0);
    a.op(Op::LoadName, 0); // b
    a.op(Op::GetIter, 0);
    a.op(Op::Call, 0);
    a.op(Op::StoreName, 1); // x
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V314,
        "<module>",
        a.finish(),
        vec![code_const(genexpr), Constant::None],
        vec!["b", "x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "x = (y for y in b)\n");
}

#[test]
fn lambda_identity() {
    let mut l = Asm::new(V314);
    l.op(Op::LoadFast, 0);
    l.op(Op::ReturnValue, 0);
    let mut lambda = code_object(V314, "<lambda>", l.finish(), vec![], vec![], vec!["x"]);
    lambda.argcount = 1;

    let mut a = Asm::new(V314);
    a.op(Op::LoadConst, 0);
    a.op(Op::MakeFunction, 0);
    a.op(Op::StoreName, 0); // f
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V314,
        "<module>",
        a.finish(),
        vec![code_const(lambda), Constant::None],
        vec!["f"],
        vec![],
    );
    assert_eq!(decompiled(&module), "f = lambda x: x\n");
}

#[test]
fn decorated_function() {
    // @decorator / def foo(): pass on 3.10.
    let mut f = Asm::new(V310);
    f.op(Op::LoadConst, 0);
    f.op(Op::ReturnValue, 0);
    let foo = code_object(V310, "foo", f.finish(), vec![Constant::None], vec![], vec![]);

    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0); // decorator
    a.op(Op::LoadConst, 0); // <code foo>
    a.op(Op::LoadConst, 1); // 'foo'
    a.op(Op::MakeFunction, 0);
    a.op(Op::CallFunction, 1);
    a.op(Op::StoreName, 1); // foo
    a.op(Op::LoadConst, 2);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![code_const(foo), Constant::Str(b"foo".to_vec()), Constant::None],
        vec!["decorator", "foo"],
        vec![],
    );
    assert_eq!(decompiled(&module), "@decorator\ndef foo():\n    pass\n");
}

#[test]
fn ternary_with_boolean_condition() {
    // result = 'yes' if a < 0 and a % 2 == 0 else 'no' (3.10).
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0);
    a.op(Op::LoadConst, 0); // 0
    a.op(Op::CompareOp, 0); // <
    let to_else_1 = a.jump(Op::PopJumpIfFalse);
    a.op(Op::LoadName, 0);
    a.op(Op::LoadConst, 1); // 2
    a.op(Op::BinaryModulo, 0);
    a.op(Op::LoadConst, 0); // 0
    a.op(Op::CompareOp, 2); // ==
    let to_else_2 = a.jump(Op::PopJumpIfFalse);
    a.op(Op::LoadConst, 2); // 'yes'
    let to_end = a.jump(Op::JumpForward);
    a.patch(to_else_1);
    a.patch(to_else_2);
    a.op(Op::LoadConst, 3); // 'no'
    a.patch(to_end);
    a.op(Op::StoreName, 1); // result
    a.op(Op::LoadConst, 4);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![
            Constant::Int(0),
            Constant::Int(2),
            Constant::Str(b"yes".to_vec()),
            Constant::Str(b"no".to_vec()),
            Constant::None,
        ],
        vec!["a", "result"],
        vec![],
    );
    assert_eq!(
        decompiled(&module),
        "result = 'yes' if a < 0 and a % 2 == 0 else 'no'\n"
    );
}

#[test]
fn if_elif_else_chain() {
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0); // a
    let to_elif = a.jump(Op::PopJumpIfFalse);
    a.op(Op::LoadConst, 0); // 1
    a.op(Op::StoreName, 2); // x
    let end_1 = a.jump(Op::JumpForward);
    a.patch(to_elif);
    a.op(Op::LoadName, 1); // b
    let to_else = a.jump(Op::PopJumpIfFalse);
    a.op(Op::LoadConst, 1); // 2
    a.op(Op::StoreName, 2);
    let end_2 = a.jump(Op::JumpForward);
    a.patch(to_else);
    a.op(Op::LoadConst, 2); // 3
    a.op(Op::StoreName, 2);
    a.patch(end_1);
    a.patch(end_2);
    a.op(Op::LoadConst, 3);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Int(1), Constant::Int(2), Constant::Int(3), Constant::None],
        vec!["a", "b", "x"],
        vec![],
    );
    assert_eq!(
        decompiled(&module),
        "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n"
    );
}

#[test]
fn while_loop_with_predicate() {
    let mut a = Asm::new(V310);
    let head = a.offset();
    a.op(Op::LoadName, 0); // a
    let exit = a.jump(Op::PopJumpIfFalse);
    a.op(Op::LoadConst, 0);
    a.op(Op::StoreName, 1); // x
    a.jump_back(Op::JumpAbsolute, head);
    a.patch(exit);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Int(1), Constant::None],
        vec!["a", "x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "while a:\n    x = 1\n");
}

#[test]
fn while_loop_with_break() {
    let mut a = Asm::new(V310);
    let head = a.offset();
    a.op(Op::LoadName, 0); // a
    let exit = a.jump(Op::PopJumpIfFalse);
    a.op(Op::LoadName, 1); // b
    let skip = a.jump(Op::PopJumpIfFalse);
    let brk = a.jump(Op::JumpAbsolute); // break
    a.patch(skip);
    a.op(Op::LoadConst, 0);
    a.op(Op::StoreName, 2); // x
    a.jump_back(Op::JumpAbsolute, head);
    a.patch(exit);
    a.patch(brk);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Int(1), Constant::None],
        vec!["a", "b", "x"],
        vec![],
    );
    assert_eq!(
        decompiled(&module),
        "while a:\n    if b:\n        break\n    x = 1\n"
    );
}

#[test]
fn for_loop_over_iterable() {
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0); // seq
    a.op(Op::GetIter, 0);
    let head = a.offset();
    let exhausted = a.jump(Op::ForIter);
    a.op(Op::StoreName, 1); // i
    a.op(Op::LoadName, 1);
    a.op(Op::StoreName, 2); // x
    a.jump_back(Op::JumpAbsolute, head);
    a.patch(exhausted);
    a.op(Op::LoadConst, 0);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::None],
        vec!["seq", "i", "x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "for i in seq:\n    x = i\n");
}

#[test]
fn separate_code_list_comprehension() {
    // Pre-3.12 style: the comprehension body lives in its own code
    // object, called over GET_ITER of the iterable.
    let mut c = Asm::new(V310);
    c.op(Op::BuildList, 0);
    c.op(Op::LoadFast, 0); // .0
    let head = c.offset();
    let exhausted = c.jump(Op::ForIter);
    c.op(Op::StoreFast, 1); // y
    c.op(Op::LoadFast, 1);
    c.op(Op::ListAppend, 2);
    c.jump_back(Op::JumpAbsolute, head);
    c.patch(exhausted);
    c.op(Op::ReturnValue, 0);
    let mut comp = code_object(V310, "<listcomp>", c.finish(), vec![], vec![], vec![".0", "y"]);
    comp.argcount = 1;

    let mut a = Asm::new(V310);
    a.op(Op::LoadConst, 0); // <listcomp>
    a.op(Op::LoadConst, 1); // qualname
    a.op(Op::MakeFunction, 0);
    a.op(Op::LoadName, 0); // b
    a.op(Op::GetIter, 0);
    a.op(Op::CallFunction, 1);
    a.op(Op::StoreName, 1); // x
    a.op(Op::LoadConst, 2);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![code_const(comp), Constant::Str(b"<listcomp>".to_vec()), Constant::None],
        vec!["b", "x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "x = [y for y in b]\n");
}

#[test]
fn try_except_with_type() {
    let mut a = Asm::new(V310);
    let handler = a.jump(Op::SetupFinally);
    a.op(Op::LoadName, 0); // f
    a.op(Op::CallFunction, 0);
    a.op(Op::StoreName, 1); // x
    a.op(Op::PopBlock, 0);
    let done = a.jump(Op::JumpForward);
    a.patch(handler);
    a.op(Op::DupTop, 0);
    a.op(Op::LoadName, 2); // ValueError
    let no_match = a.jump(Op::JumpIfNotExcMatch);
    a.op(Op::PopTop, 0);
    a.op(Op::PopTop, 0);
    a.op(Op::PopTop, 0);
    a.op(Op::LoadConst, 0); // 1
    a.op(Op::StoreName, 3); // y
    a.op(Op::PopExcept, 0);
    let done_2 = a.jump(Op::JumpForward);
    a.patch(no_match);
    a.op(Op::Reraise, 0);
    a.patch(done);
    a.patch(done_2);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Int(1), Constant::None],
        vec!["f", "x", "ValueError", "y"],
        vec![],
    );
    assert_eq!(
        decompiled(&module),
        "try:\n    x = f()\nexcept ValueError:\n    y = 1\n"
    );
}

#[test]
fn with_statement_binds_target() {
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0); // open
    a.op(Op::LoadName, 1); // p
    a.op(Op::CallFunction, 1);
    let cleanup = a.jump(Op::SetupWith);
    a.op(Op::StoreName, 2); // f
    a.op(Op::LoadConst, 0); // 1
    a.op(Op::StoreName, 3); // x
    a.op(Op::PopBlock, 0);
    a.op(Op::LoadConst, 1); // None
    a.op(Op::DupTop, 0);
    a.op(Op::DupTop, 0);
    a.op(Op::CallFunction, 3);
    a.op(Op::PopTop, 0);
    let done = a.jump(Op::JumpForward);
    a.patch(cleanup);
    a.op(Op::WithExceptStart, 0);
    let swallowed = a.jump(Op::PopJumpIfTrue);
    a.op(Op::Reraise, 1);
    a.patch(swallowed);
    a.op(Op::PopTop, 0);
    a.op(Op::PopTop, 0);
    a.op(Op::PopTop, 0);
    a.op(Op::PopExcept, 0);
    a.op(Op::PopTop, 0);
    a.patch(done);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Int(1), Constant::None],
        vec!["open", "p", "f", "x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "with open(p) as f:\n    x = 1\n");
}

#[test]
fn python2_print_statement() {
    let mut a = Asm::new(V27);
    a.op(Op::LoadConst, 0); // 'hi'
    a.op(Op::PrintItem, 0);
    a.op(Op::LoadName, 0); // x
    a.op(Op::PrintItem, 0);
    a.op(Op::PrintNewline, 0);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V27,
        "<module>",
        a.finish(),
        vec![Constant::Str(b"hi".to_vec()), Constant::None],
        vec!["x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "print 'hi', x\n");
}

#[test]
fn chained_comparison() {
    // x = a < b < c via DUP_TOP / ROT_THREE / JUMP_IF_FALSE_OR_POP.
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0);
    a.op(Op::LoadName, 1);
    a.op(Op::DupTop, 0);
    a.op(Op::RotThree, 0);
    a.op(Op::CompareOp, 0); // <
    let short = a.jump(Op::JumpIfFalseOrPop);
    a.op(Op::LoadName, 2);
    a.op(Op::CompareOp, 0); // <
    let over = a.jump(Op::JumpForward);
    a.patch(short);
    a.op(Op::RotTwo, 0);
    a.op(Op::PopTop, 0);
    a.patch(over);
    a.op(Op::StoreName, 3); // x
    a.op(Op::LoadConst, 0);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::None],
        vec!["a", "b", "c", "x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "x = a < b < c\n");
}

#[test]
fn function_with_defaults() {
    let mut f = Asm::new(V310);
    f.op(Op::LoadFast, 0);
    f.op(Op::ReturnValue, 0);
    let mut body = code_object(V310, "f", f.finish(), vec![], vec![], vec!["a", "b"]);
    body.argcount = 2;

    let mut a = Asm::new(V310);
    a.op(Op::LoadConst, 0); // (2,)
    a.op(Op::LoadConst, 1); // <code f>
    a.op(Op::LoadConst, 2); // 'f'
    a.op(Op::MakeFunction, 1);
    a.op(Op::StoreName, 0);
    a.op(Op::LoadConst, 3);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![
            Constant::Tuple(vec![Constant::Int(2)]),
            code_const(body),
            Constant::Str(b"f".to_vec()),
            Constant::None,
        ],
        vec!["f"],
        vec![],
    );
    assert_eq!(decompiled(&module), "def f(a, b=2):\n    return a\n");
}

#[test]
fn class_with_base_and_method() {
    let mut m = Asm::new(V310);
    m.op(Op::LoadConst, 0); // 1
    m.op(Op::ReturnValue, 0);
    let mut method = code_object(V310, "method", m.finish(), vec![Constant::Int(1)], vec![], vec!["self"]);
    method.argcount = 1;

    let mut c = Asm::new(V310);
    c.op(Op::LoadName, 0); // __name__
    c.op(Op::StoreName, 1); // __module__
    c.op(Op::LoadConst, 0); // 'Foo'
    c.op(Op::StoreName, 2); // __qualname__
    c.op(Op::LoadConst, 1); // <code method>
    c.op(Op::LoadConst, 2); // 'Foo.method'
    c.op(Op::MakeFunction, 0);
    c.op(Op::StoreName, 3); // method
    c.op(Op::LoadConst, 3); // None
    c.op(Op::ReturnValue, 0);
    let class_body = code_object(
        V310,
        "Foo",
        c.finish(),
        vec![
            Constant::Str(b"Foo".to_vec()),
            code_const(method),
            Constant::Str(b"Foo.method".to_vec()),
            Constant::None,
        ],
        vec!["__name__", "__module__", "__qualname__", "method"],
        vec![],
    );

    let mut a = Asm::new(V310);
    a.op(Op::LoadBuildClass, 0);
    a.op(Op::LoadConst, 0); // <code Foo>
    a.op(Op::LoadConst, 1); // 'Foo'
    a.op(Op::MakeFunction, 0);
    a.op(Op::LoadConst, 1); // 'Foo'
    a.op(Op::LoadName, 0); // Base
    a.op(Op::CallFunction, 3);
    a.op(Op::StoreName, 1); // Foo
    a.op(Op::LoadConst, 2);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![code_const(class_body), Constant::Str(b"Foo".to_vec()), Constant::None],
        vec!["Base", "Foo"],
        vec![],
    );
    assert_eq!(
        decompiled(&module),
        "class Foo(Base):\n    def method(self):\n        return 1\n"
    );
}

#[test]
fn augmented_assignment() {
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0);
    a.op(Op::LoadConst, 0);
    a.op(Op::InplaceAdd, 0);
    a.op(Op::StoreName, 0);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Int(1), Constant::None],
        vec!["x"],
        vec![],
    );
    assert_eq!(decompiled(&module), "x += 1\n");
}

#[test]
fn tuple_unpacking_assignment() {
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0); // t
    a.op(Op::UnpackSequence, 2);
    a.op(Op::StoreName, 1); // a
    a.op(Op::StoreName, 2); // b
    a.op(Op::LoadConst, 0);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::None],
        vec!["t", "a", "b"],
        vec![],
    );
    assert_eq!(decompiled(&module), "(a, b) = t\n");
}

#[test]
fn imports() {
    // import os / from os import path
    let mut a = Asm::new(V310);
    a.op(Op::LoadConst, 0); // 0
    a.op(Op::LoadConst, 1); // None
    a.op(Op::ImportName, 0); // os
    a.op(Op::StoreName, 0);
    a.op(Op::LoadConst, 0); // 0
    a.op(Op::LoadConst, 2); // ('path',)
    a.op(Op::ImportName, 0);
    a.op(Op::ImportFrom, 1); // path
    a.op(Op::StoreName, 1);
    a.op(Op::PopTop, 0);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![
            Constant::Int(0),
            Constant::None,
            Constant::Tuple(vec![Constant::Str(b"path".to_vec())]),
        ],
        vec!["os", "path"],
        vec![],
    );
    assert_eq!(decompiled(&module), "import os\nfrom os import path\n");
}

#[test]
fn fstring_interpolation() {
    let mut a = Asm::new(V310);
    a.op(Op::LoadConst, 0); // 'v='
    a.op(Op::LoadName, 0); // x
    a.op(Op::FormatValue, 0);
    a.op(Op::BuildString, 2);
    a.op(Op::StoreName, 1); // s
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Str(b"v=".to_vec()), Constant::None],
        vec!["x", "s"],
        vec![],
    );
    assert_eq!(decompiled(&module), "s = f'v={x}'\n");
}

#[test]
fn big_integer_constants() {
    // Decimal within 128 bits, hexadecimal beyond.
    let decimal = BigInt::new(vec![0, 0, 0, 0, 1], false); // 2^60
    let huge = BigInt::new(vec![0x7FFF; 10], false); // 2^150 - 1

    let mut a = Asm::new(V310);
    a.op(Op::LoadConst, 0);
    a.op(Op::StoreName, 0);
    a.op(Op::LoadConst, 1);
    a.op(Op::StoreName, 1);
    a.op(Op::LoadConst, 2);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Long(decimal), Constant::Long(huge), Constant::None],
        vec!["small", "big"],
        vec![],
    );
    let source = decompiled(&module);
    assert!(source.starts_with(&format!("small = {}\n", 1u128 << 60)), "{source}");
    assert!(source.contains("big = 0x"), "{source}");
}

#[test]
fn output_is_deterministic() {
    let mut a = Asm::new(V310);
    a.op(Op::LoadName, 0);
    let exit = a.jump(Op::PopJumpIfFalse);
    a.op(Op::LoadConst, 0);
    a.op(Op::StoreName, 1);
    a.patch(exit);
    a.op(Op::LoadConst, 1);
    a.op(Op::ReturnValue, 0);

    let module = code_object(
        V310,
        "<module>",
        a.finish(),
        vec![Constant::Int(1), Constant::None],
        vec!["a", "x"],
        vec![],
    );
    let first = decompiled(&module);
    let second = decompiled(&module);
    let diff = similar::TextDiff::from_lines(first.as_str(), second.as_str());
    assert!(
        (diff.ratio() - 1.0).abs() < f32::EPSILON,
        "nondeterministic output:\n{}",
        diff.unified_diff()
    );
    assert_eq!(first, "if a:\n    x = 1\n");
}
