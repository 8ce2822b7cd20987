//! Tests for the bytecode compiler.

use super::*;
use crate::ast::*;
use crate::compiler::bytecode::OpCode;

fn compile_ok(names: &Interner, program: &[Statement]) -> Unit {
    let unit = Compiler::new(names)
        .compile(program)
        .expect("compilation should succeed");
    unit.code.verify_labels().expect("labels should be consistent");
    unit
}

fn mnemonics(code: &Bytecode) -> Vec<&'static str> {
    code.ops().map(OpCode::mnemonic).collect()
}

#[test]
fn test_compile_empty_program() {
    let names = Interner::new();
    let unit = compile_ok(&names, &[]);
    assert!(unit.code.is_empty());
    assert_eq!(unit.label_count, 0);
}

#[test]
fn test_compile_number_literal_is_cast_at_runtime() {
    let names = Interner::new();
    let unit = compile_ok(&names, &[Statement::expr(Expression::number("42"))]);
    assert_eq!(mnemonics(&unit.code), vec!["LOAD", "CASTNUM"]);
}

#[test]
fn test_compile_if_elseif_else_shape() {
    let names = Interner::new();
    let x = names.intern("x");
    let stmt = Statement::new(StatementKind::If(IfStatement {
        condition: Expression::ident(x),
        then: vec![Statement::set(x, Expression::int(1))],
        else_ifs: vec![ElseIf {
            condition: Expression::bool(true),
            body: vec![Statement::set(x, Expression::int(2))],
            pos: Position::default(),
        }],
        otherwise: vec![Statement::set(x, Expression::int(3))],
    }));
    let unit = compile_ok(&names, &[stmt]);
    assert_eq!(
        mnemonics(&unit.code),
        vec![
            "GET", "JFALSE", "LOAD", "SET", "JMP", "LABEL", // if
            "LOAD", "JFALSE", "LOAD", "SET", "JMP", "LABEL", // elseif
            "LOAD", "SET", "LABEL", "FREE", // else, end
        ]
    );
    // every arm jumps to the same end label
    let ends: Vec<usize> = unit
        .code
        .ops()
        .filter_map(|op| match op {
            OpCode::Jmp { label } => Some(*label),
            _ => None,
        })
        .collect();
    assert_eq!(ends.len(), 2);
    assert_eq!(ends[0], ends[1]);
    assert_eq!(unit.code.instructions.last().map(|i| &i.op), Some(&OpCode::Free { reg: 1 }));
}

#[test]
fn test_compile_try_catch_shape() {
    let names = Interner::new();
    let e = names.intern("e");
    let stmt = Statement::try_catch(
        vec![Statement::throw(Expression::string("boom"))],
        Some(e),
        vec![],
    );
    let unit = compile_ok(&names, &[stmt]);
    let ops: Vec<&OpCode> = unit.code.ops().collect();

    let OpCode::Try { reg: 0, label: catch } = ops[0] else {
        panic!("expected TRY r0, got {:?}", ops[0]);
    };
    // the body runs one register above the error register
    assert_eq!(ops[2], &OpCode::Throw { reg: 1 });
    assert_eq!(ops[3], &OpCode::Label { label: *catch });
    assert!(matches!(ops[4], OpCode::Catch { reg: 0, .. }));
    assert_eq!(ops[5], &OpCode::Set { reg: 0, id: e });
    assert_eq!(ops[7], &OpCode::PopTry { label: *catch });
    assert_eq!(ops[8], &OpCode::Free { reg: 1 });
}

#[test]
fn test_compile_numeric_for_uses_loop_frame() {
    let names = Interner::new();
    let i = names.intern("i");
    let stmt = Statement::numeric_for(
        i,
        Expression::int(1),
        Expression::int(5),
        vec![Statement::continue_loop()],
    );
    let unit = compile_ok(&names, &[stmt]);
    assert_eq!(
        mnemonics(&unit.code),
        vec![
            "LOAD", "LOAD", "FORNUM", "LABEL", "NEXTNUM", "SET", "CONTINUE", "JMP", "LABEL",
            "POPFOR", "FREE"
        ]
    );
    let Some(OpCode::ForNum { continue_label, .. }) = unit.code.ops().nth(2) else {
        panic!("expected FORNUM");
    };
    assert!(unit
        .code
        .ops()
        .any(|op| op == &OpCode::PopFor { label: *continue_label }));
}

#[test]
fn test_compile_for_each_binds_loop_variable() {
    let names = Interner::new();
    let item = names.intern("item");
    let list = names.intern("list");
    let stmt = Statement::for_each(item, Expression::ident(list), vec![]);
    let unit = compile_ok(&names, &[stmt]);
    assert!(unit.code.ops().any(|op| op == &OpCode::Set { reg: 2, id: item }));
    assert!(matches!(
        unit.code.ops().nth(1),
        Some(OpCode::ForEach { reg: 0, iter: 1, .. })
    ));
}

#[test]
fn test_compile_swap_evaluates_before_storing() {
    let names = Interner::new();
    let a = names.intern("a");
    let b = names.intern("b");
    let stmt = Statement::assign(
        vec![Expression::ident(a), Expression::ident(b)],
        vec![Expression::ident(b), Expression::ident(a)],
    );
    let unit = compile_ok(&names, &[stmt]);
    let ops: Vec<&OpCode> = unit.code.ops().collect();
    assert_eq!(
        ops,
        vec![
            &OpCode::Get { reg: 0, id: b },
            &OpCode::Get { reg: 1, id: a },
            &OpCode::Set { reg: 0, id: a },
            &OpCode::Set { reg: 1, id: b },
        ]
    );
}

#[test]
fn test_compile_destructure_checks_for_slice() {
    let names = Interner::new();
    let a = names.intern("a");
    let b = names.intern("b");
    let f = names.intern("f");
    let stmt = Statement::assign(
        vec![Expression::ident(a), Expression::ident(b)],
        vec![Expression::call(f, vec![])],
    );
    let unit = compile_ok(&names, &[stmt]);
    let names_seen = mnemonics(&unit.code);
    assert!(names_seen.contains(&"ISSLICE"));
    assert_eq!(names_seen.iter().filter(|m| **m == "GETIDX").count(), 2);
    // two sets from the slice, two sets of the scalar
    assert_eq!(names_seen.iter().filter(|m| **m == "SET").count(), 4);
}

#[test]
fn test_compile_assignment_count_mismatch() {
    let names = Interner::new();
    let a = names.intern("a");
    let stmt = Statement::assign(
        vec![Expression::ident(a)],
        vec![Expression::int(1), Expression::int(2)],
    )
    .at(3, 7);
    let err = Compiler::new(&names).compile(&[stmt]).unwrap_err();
    assert_eq!(err.pos, Position::new(3, 7));
    assert!(err.message.contains("2 values to 1 targets"));
}

#[test]
fn test_compile_var_count_mismatch() {
    let names = Interner::new();
    let a = names.intern("a");
    let b = names.intern("b");
    let c = names.intern("c");
    let stmt = Statement::var(
        vec![a, b, c],
        vec![Expression::int(1), Expression::int(2)],
    );
    assert!(Compiler::new(&names).compile(&[stmt]).is_err());
}

#[test]
fn test_compile_select_rejects_non_channel_case() {
    let names = Interner::new();
    let stmt = Statement::select(vec![Clause::case(Expression::int(1), vec![])]);
    let err = Compiler::new(&names).compile(&[stmt]).unwrap_err();
    assert!(err.message.contains("channel"));
}

#[test]
fn test_compile_select_without_default_yields() {
    let names = Interner::new();
    let ch = names.intern("ch");
    let stmt = Statement::select(vec![Clause::case(
        Expression::receive(Expression::ident(ch)),
        vec![],
    )]);
    let unit = compile_ok(&names, &[stmt]);
    let ops = mnemonics(&unit.code);
    assert_eq!(ops[0], "LABEL");
    assert!(ops.contains(&"TRYRECV"));
    let yield_at = ops.iter().position(|m| *m == "YIELD").expect("YIELD");
    assert_eq!(ops[yield_at + 1], "JMP");
}

#[test]
fn test_compile_select_with_default_never_yields() {
    let names = Interner::new();
    let ch = names.intern("ch");
    let stmt = Statement::select(vec![
        Clause::case(Expression::receive(Expression::ident(ch)), vec![]),
        Clause::default_case(vec![]),
    ]);
    let unit = compile_ok(&names, &[stmt]);
    assert!(!mnemonics(&unit.code).contains(&"YIELD"));
}

#[test]
fn test_compile_switch_rejects_two_defaults() {
    let names = Interner::new();
    let stmt = Statement::switch(
        Expression::int(1),
        vec![Clause::default_case(vec![]), Clause::default_case(vec![])],
    );
    assert!(Compiler::new(&names).compile(&[stmt]).is_err());
}

#[test]
fn test_compile_address_of_literal_fails() {
    let names = Interner::new();
    let stmt = Statement::expr(Expression::new(ExpressionKind::AddressOf(Box::new(
        Expression::int(1),
    ))));
    assert!(Compiler::new(&names).compile(&[stmt]).is_err());
}

#[test]
fn test_compile_invalid_assignment_target() {
    let names = Interner::new();
    let stmt = Statement::assign(vec![Expression::int(1)], vec![Expression::int(2)]);
    let err = Compiler::new(&names).compile(&[stmt]).unwrap_err();
    assert!(err.message.contains("assignment target"));
}

#[test]
fn test_compile_return_forms() {
    let names = Interner::new();
    let unit = compile_ok(&names, &[Statement::ret(vec![])]);
    assert_eq!(mnemonics(&unit.code), vec!["LOAD", "FREE", "RET"]);

    let unit = compile_ok(
        &names,
        &[Statement::ret(vec![Expression::int(1), Expression::int(2)])],
    );
    assert_eq!(
        mnemonics(&unit.code),
        vec!["MAKESLICE", "LOAD", "SETIDX", "LOAD", "SETIDX", "FREE", "RET"]
    );
}

#[test]
fn test_compile_function_body_is_nested() {
    let names = Interner::new();
    let f = names.intern("f");
    let x = names.intern("x");
    let body = vec![Statement::if_then(
        Expression::ident(x),
        vec![Statement::ret(vec![Expression::int(1)])],
        vec![],
    )];
    let program = vec![
        Statement::if_then(Expression::bool(true), vec![], vec![]),
        Statement::expr(Expression::named_function(f, vec![x], body)),
    ];
    let unit = compile_ok(&names, &program);

    let Some(OpCode::Func { code, params, .. }) = unit.code.ops().find(|op| op.body().is_some())
    else {
        panic!("expected FUNC");
    };
    assert_eq!(params, &vec![x]);

    // labels keep counting across the nesting
    let outer = unit.code.label_positions().unwrap();
    let inner = code.label_positions().unwrap();
    assert!(outer.keys().all(|label| !inner.contains_key(label)));
    assert_eq!(unit.label_count, 4);
}

#[test]
fn test_compile_inline_module() {
    let names = Interner::new();
    let x = names.intern("x");
    let underscore = names.intern("_");
    let inlined = Statement::module(underscore, vec![Statement::set(x, Expression::int(1))]);
    let unit = compile_ok(&names, &[inlined]);
    assert_eq!(mnemonics(&unit.code), vec!["LOAD", "SET"]);

    let m = names.intern("m");
    let named = Statement::module(m, vec![Statement::set(x, Expression::int(1))]);
    let unit = compile_ok(&names, &[named]);
    assert_eq!(mnemonics(&unit.code), vec!["MODULE"]);
}

#[test]
fn test_compile_short_circuit() {
    let names = Interner::new();
    let a = names.intern("a");
    let b = names.intern("b");
    let expr = Expression::logical(LogicalOp::And, Expression::ident(a), Expression::ident(b));
    let unit = compile_ok(&names, &[Statement::expr(expr)]);
    assert_eq!(mnemonics(&unit.code), vec!["GET", "JFALSE", "GET", "LABEL"]);
}

#[test]
fn test_compile_call_by_value_packs_after_callee() {
    let names = Interner::new();
    let f = names.intern("f");
    let expr = Expression::call_value(Expression::ident(f), vec![Expression::int(1)]);
    let unit = compile_ok(&names, &[Statement::expr(expr)]);
    assert_eq!(
        unit.code.ops().last(),
        Some(&OpCode::Call {
            name: None,
            reg: 0,
            args: 1,
            argc: 1,
            variadic: false,
            launch: false,
        })
    );
}

#[test]
fn test_compile_item_store_writes_container_back() {
    let names = Interner::new();
    let s = names.intern("s");
    let stmt = Statement::assign(
        vec![Expression::item(Expression::ident(s), Expression::int(0))],
        vec![Expression::string("x")],
    );
    let unit = compile_ok(&names, &[stmt]);
    assert_eq!(
        mnemonics(&unit.code),
        vec!["LOAD", "GET", "LOAD", "SETITEM", "JFALSE", "SET", "LABEL"]
    );
}

#[test]
fn test_compile_compound_item_reads_container_once() {
    let names = Interner::new();
    let xs = names.intern("xs");
    let expr = Expression::compound(
        CompoundOp::Apply(BinaryOp::Add),
        Expression::item(Expression::ident(xs), Expression::int(0)),
        Some(Expression::int(1)),
    );
    let unit = compile_ok(&names, &[Statement::expr(expr)]);
    assert_eq!(
        mnemonics(&unit.code),
        vec!["GET", "LOAD", "MV", "GETIDX", "LOAD", "OPER", "SETITEM", "JFALSE", "SET", "LABEL"]
    );
}

#[test]
fn test_compile_compound_member_reuses_object_register() {
    let names = Interner::new();
    let (m, a) = (names.intern("m"), names.intern("a"));
    let expr = Expression::compound(
        CompoundOp::Increment,
        Expression::member(Expression::ident(m), a),
        None,
    );
    let unit = compile_ok(&names, &[Statement::expr(expr)]);
    assert_eq!(
        mnemonics(&unit.code),
        vec!["GET", "MV", "GETMEMBER", "INC", "SETMEMBER"]
    );
    assert_eq!(
        unit.code.ops().last(),
        Some(&OpCode::SetMember { reg: 1, id: a, val: 0 })
    );
}

#[test]
fn test_compile_with_base_register() {
    let names = Interner::new();
    let x = names.intern("x");
    let unit = Compiler::new(&names)
        .compile_with(&[Statement::set(x, Expression::int(1))], 4)
        .unwrap();
    assert_eq!(
        unit.code.ops().next(),
        Some(&OpCode::Load {
            reg: 4,
            value: Constant::Int(1)
        })
    );
}
