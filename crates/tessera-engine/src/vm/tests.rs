//! Interpreter tests: programs built with the tree constructors, compiled
//! and executed.

use super::*;
use crate::ast::*;
use crate::compiler::Compiler;
use crate::compiler::bytecode::{Bytecode, OpCode};
use crate::runtime::environment::Environment;
use crate::runtime::interner::{Ident, Interner};
use crate::runtime::value::{Native, TypeInfo, ValueKind};
use std::sync::Arc;

struct Harness {
    names: Arc<Interner>,
    env: Environment,
    vm: Vm,
}

impl Harness {
    fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    fn with_options(options: VmOptions) -> Self {
        let names = Arc::new(Interner::new());
        let env = Environment::new_root(names.clone());
        Self {
            names,
            env,
            vm: Vm::with_options(options),
        }
    }

    fn id(&self, name: &str) -> Ident {
        self.names.intern(name)
    }

    fn run(&self, program: Vec<Statement>) -> Result<Value, RuntimeError> {
        let unit = Compiler::new(&self.names)
            .compile(&program)
            .expect("program compiles");
        self.vm.run_unit(&unit, &self.env)
    }

    fn get(&self, name: &str) -> Value {
        self.env.get(self.id(name)).expect("name is bound")
    }
}

fn ident(id: Ident) -> Expression {
    Expression::ident(id)
}

fn int(n: i64) -> Expression {
    Expression::int(n)
}

#[test]
fn test_return_value() {
    let h = Harness::new();
    let result = h
        .run(vec![Statement::ret(vec![Expression::binary(
            BinaryOp::Add,
            int(2),
            Expression::binary(BinaryOp::Mul, int(3), Expression::number("4")),
        )])])
        .unwrap();
    assert_eq!(result, Value::Int(14));
}

#[test]
fn test_string_item_store_writes_back() {
    let h = Harness::new();
    let s = h.id("s");
    h.run(vec![
        Statement::set(s, Expression::string("abc")),
        Statement::assign(
            vec![Expression::item(ident(s), int(1))],
            vec![Expression::string("X")],
        ),
    ])
    .unwrap();
    assert_eq!(h.get("s"), Value::from("aXc"));
}

#[test]
fn test_slice_store_and_sub_slice() {
    let h = Harness::new();
    let xs = h.id("xs");
    let tail = h.id("tail");
    h.run(vec![
        Statement::set(xs, Expression::array(vec![int(1), int(2), int(3)])),
        Statement::assign(vec![Expression::item(ident(xs), int(0))], vec![int(9)]),
        Statement::set(tail, Expression::slice(ident(xs), Some(int(1)), None)),
    ])
    .unwrap();
    assert_eq!(h.get("xs").to_string(), "[9, 2, 3]");
    assert_eq!(h.get("tail").to_string(), "[2, 3]");
}

#[test]
fn test_closure_keeps_its_scope() {
    let h = Harness::new();
    let (make, n, c) = (h.id("make"), h.id("n"), h.id("c"));
    let result = h
        .run(vec![
            Statement::expr(Expression::named_function(
                make,
                vec![],
                vec![
                    Statement::set(n, int(0)),
                    Statement::ret(vec![Expression::function(
                        vec![],
                        vec![
                            Statement::set(n, Expression::binary(BinaryOp::Add, ident(n), int(1))),
                            Statement::ret(vec![ident(n)]),
                        ],
                    )]),
                ],
            )),
            Statement::set(c, Expression::call(make, vec![])),
            Statement::expr(Expression::call(c, vec![])),
            Statement::ret(vec![Expression::call(c, vec![])]),
        ])
        .unwrap();
    assert_eq!(result, Value::Int(2));
    // the counter lives in the call scope, not the root
    assert!(h.env.get(n).is_err());
}

#[test]
fn test_call_depth_limit() {
    let h = Harness::with_options(VmOptions::default().with_max_call_depth(10));
    let f = h.id("f");
    let err = h
        .run(vec![
            Statement::expr(Expression::named_function(
                f,
                vec![],
                vec![Statement::ret(vec![Expression::call(f, vec![])])],
            )),
            Statement::expr(Expression::call(f, vec![])),
        ])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::CallDepth { limit: 10 }));
}

#[test]
fn test_uncaught_throw() {
    let h = Harness::new();
    let err = h
        .run(vec![Statement::throw(Expression::string("boom")).at(4, 2)])
        .unwrap_err();
    assert_eq!(err.to_string(), "4:2: uncaught error: boom");
}

#[test]
fn test_runtime_failure_is_catchable() {
    let h = Harness::new();
    let (x, e, msg) = (h.id("x"), h.id("e"), h.id("msg"));
    h.run(vec![Statement::try_catch(
        vec![Statement::set(x, Expression::binary(BinaryOp::Div, int(1), int(0)))],
        Some(e),
        vec![Statement::set(msg, Expression::member(ident(e), h.id("message")))],
    )])
    .unwrap();
    assert_eq!(h.get("msg"), Value::from("division by zero"));
    assert!(h.env.get(x).is_err());
}

#[test]
fn test_break_and_continue() {
    let h = Harness::new();
    let (sum, i) = (h.id("sum"), h.id("i"));
    let is = |n| Expression::binary(BinaryOp::Eq, ident(i), int(n));
    h.run(vec![
        Statement::set(sum, int(0)),
        Statement::numeric_for(
            i,
            int(1),
            int(10),
            vec![
                Statement::if_then(is(3), vec![Statement::continue_loop()], vec![]),
                Statement::if_then(is(5), vec![Statement::break_loop()], vec![]),
                Statement::expr(Expression::compound(
                    CompoundOp::Apply(BinaryOp::Add),
                    ident(sum),
                    Some(ident(i)),
                )),
            ],
        ),
    ])
    .unwrap();
    assert_eq!(h.get("sum"), Value::Int(7));
}

#[test]
fn test_interrupt_stops_loop() {
    let h = Harness::new();
    h.env.interrupt();
    let err = h
        .run(vec![Statement::while_loop(Expression::bool(true), vec![])])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Interrupted));
    // the flag is consumed by the check
    assert!(!h.env.check_interrupt());
}

#[test]
fn test_switch_picks_matching_case() {
    let h = Harness::new();
    let r = h.id("r");
    h.run(vec![Statement::switch(
        int(2),
        vec![
            Clause::case(int(1), vec![Statement::set(r, Expression::string("one"))]),
            Clause::default_case(vec![Statement::set(r, Expression::string("other"))]),
            Clause::case(int(2), vec![Statement::set(r, Expression::string("two"))]),
        ],
    )])
    .unwrap();
    assert_eq!(h.get("r"), Value::from("two"));
}

#[test]
fn test_module_members() {
    let h = Harness::new();
    let (m, x) = (h.id("m"), h.id("x"));
    let result = h
        .run(vec![
            Statement::module(m, vec![Statement::set(x, int(5))]),
            Statement::ret(vec![Expression::member(ident(m), x)]),
        ])
        .unwrap();
    assert_eq!(result, Value::Int(5));
    assert!(h.env.get(x).is_err());
}

#[test]
fn test_launch_and_channel() {
    let h = Harness::new();
    let (worker, c, ch, v) = (h.id("worker"), h.id("c"), h.id("ch"), h.id("v"));
    h.run(vec![
        Statement::expr(Expression::named_function(
            worker,
            vec![c],
            vec![Statement::expr(Expression::send(ident(c), int(42)))],
        )),
        Statement::set(ch, Expression::make_chan(None)),
        Statement::expr(Expression::launch(worker, vec![ident(ch)])),
        Statement::set(v, Expression::receive(ident(ch))),
    ])
    .unwrap();
    assert_eq!(h.vm.wait(), 1);
    assert_eq!(h.get("v"), Value::Int(42));
    assert!(h.env.is_shared());
}

#[test]
fn test_native_call_with_spread() {
    let h = Harness::new();
    h.env.define_str(
        "sum",
        Native::value("sum", |args| {
            let mut total = 0;
            for arg in args {
                total += arg.as_int().ok_or("not an int")?;
            }
            Ok(Value::Int(total))
        }),
    );
    let call = Expression::new(ExpressionKind::Call {
        name: h.id("sum"),
        call: CallArgs {
            args: vec![int(1), Expression::array(vec![int(2), int(3)])],
            variadic: true,
            launch: false,
        },
    });
    assert_eq!(h.run(vec![Statement::ret(vec![call])]).unwrap(), Value::Int(6));
}

#[test]
fn test_variadic_parameters() {
    let h = Harness::new();
    let (f, first, rest) = (h.id("f"), h.id("first"), h.id("rest"));
    let func = Expression::new(ExpressionKind::Function(FunctionLiteral {
        name: Some(f),
        params: vec![first, rest],
        variadic: true,
        body: vec![Statement::ret(vec![ident(rest)])],
    }));
    let result = h
        .run(vec![
            Statement::expr(func),
            Statement::ret(vec![Expression::call(f, vec![int(1), int(2), int(3)])]),
        ])
        .unwrap();
    assert_eq!(result.to_string(), "[2, 3]");
}

#[test]
fn test_reference_follows_binding() {
    let h = Harness::new();
    let (x, r) = (h.id("x"), h.id("r"));
    let result = h
        .run(vec![
            Statement::set(x, int(1)),
            Statement::set(r, Expression::new(ExpressionKind::AddressOf(Box::new(ident(x))))),
            Statement::set(x, int(2)),
            Statement::ret(vec![Expression::new(ExpressionKind::Deref(Box::new(ident(r))))]),
        ])
        .unwrap();
    assert_eq!(result, Value::Int(2));
}

#[test]
fn test_cast_and_make_by_type() {
    let h = Harness::new();
    let (int_type, map_type, m) = (h.id("int"), h.id("map"), h.id("m"));
    h.env.define_type(
        int_type,
        TypeInfo {
            name: "int".into(),
            kind: ValueKind::Int,
        },
    );
    h.env.define_type(
        map_type,
        TypeInfo {
            name: "map".into(),
            kind: ValueKind::Map,
        },
    );
    let cast = Expression::new(ExpressionKind::Cast {
        value: Box::new(Expression::string("42")),
        ty: TypeRef::Named(int_type),
    });
    h.run(vec![Statement::set(
        m,
        Expression::new(ExpressionKind::Make(TypeRef::Dynamic(Box::new(Expression::string(
            "map",
        ))))),
    )])
    .unwrap();
    assert_eq!(h.get("m").kind(), ValueKind::Map);
    assert_eq!(h.run(vec![Statement::ret(vec![cast])]).unwrap(), Value::Int(42));
}

#[test]
fn test_map_iteration_is_ordered() {
    let h = Harness::new();
    let (s, k) = (h.id("s"), h.id("k"));
    h.run(vec![
        Statement::set(s, Expression::string("")),
        Statement::for_each(
            k,
            Expression::map(vec![("b", int(1)), ("a", int(2)), ("c", int(3))]),
            vec![Statement::set(s, Expression::binary(BinaryOp::Add, ident(s), ident(k)))],
        ),
    ])
    .unwrap();
    assert_eq!(h.get("s"), Value::from("abc"));
}

#[test]
fn test_missing_label_is_reported() {
    let h = Harness::new();
    let mut code = Bytecode::new();
    code.emit(OpCode::Jmp { label: 7 }, Position::default());
    let err = h.vm.run(&code, &h.env).unwrap_err();
    assert!(matches!(err, RuntimeError::Label(LabelError::Missing(7))));
}

/// `try { target = expr } catch e { caught = e.message }`
fn catching(h: &Harness, expr: Expression) -> Value {
    let (target, e, caught) = (h.id("target"), h.id("e"), h.id("caught"));
    h.run(vec![Statement::try_catch(
        vec![Statement::set(target, expr)],
        Some(e),
        vec![Statement::set(caught, Expression::member(ident(e), h.id("message")))],
    )])
    .unwrap();
    assert!(h.env.get(target).is_err());
    h.get("caught")
}

#[test]
fn test_oversized_make_array_is_catchable() {
    let h = Harness::new();
    let caught = catching(&h, Expression::make_array(int(i64::MAX), None));
    assert!(caught.to_string().contains("exceeds the limit"));

    let caught = catching(&h, Expression::make_array(int(1), Some(int(i64::MAX))));
    assert!(caught.to_string().contains("exceeds the limit"));
}

#[test]
fn test_oversized_channel_is_catchable() {
    let h = Harness::with_options(VmOptions::default().with_max_len(8));
    let caught = catching(&h, Expression::make_chan(Some(int(9))));
    assert_eq!(caught, Value::from("size 9 exceeds the limit of 8"));

    let ch = h.id("ch");
    h.run(vec![Statement::set(ch, Expression::make_chan(Some(int(8))))])
        .unwrap();
    assert_eq!(h.get("ch").to_string(), "chan(8)");
}

#[test]
fn test_make_array_within_limit() {
    let h = Harness::new();
    let xs = h.id("xs");
    h.run(vec![Statement::set(xs, Expression::make_array(int(3), Some(int(10))))])
        .unwrap();
    assert_eq!(h.get("xs").to_string(), "[nil, nil, nil]");
}

#[test]
fn test_huge_integer_range_is_iterated_lazily() {
    let h = Harness::new();
    let (i, last) = (h.id("i"), h.id("last"));
    h.run(vec![
        Statement::set(last, int(-1)),
        Statement::for_each(
            i,
            int(i64::MAX),
            vec![
                Statement::set(last, ident(i)),
                Statement::if_then(
                    Expression::binary(BinaryOp::Eq, ident(i), int(3)),
                    vec![Statement::break_loop()],
                    vec![],
                ),
            ],
        ),
    ])
    .unwrap();
    assert_eq!(h.get("last"), Value::Int(3));
}

/// `next()` bumps `calls` and returns `result`.
fn counted(h: &Harness, result: Expression) -> Statement {
    let calls = h.id("calls");
    Statement::expr(Expression::named_function(
        h.id("next"),
        vec![],
        vec![
            Statement::set(calls, Expression::binary(BinaryOp::Add, ident(calls), int(1))),
            Statement::ret(vec![result]),
        ],
    ))
}

#[test]
fn test_compound_item_evaluates_index_once() {
    let h = Harness::new();
    let (xs, calls) = (h.id("xs"), h.id("calls"));
    let next = h.id("next");
    h.run(vec![
        Statement::set(calls, int(0)),
        Statement::set(xs, Expression::array(vec![int(1), int(2)])),
        counted(&h, int(0)),
        Statement::expr(Expression::compound(
            CompoundOp::Apply(BinaryOp::Add),
            Expression::item(ident(xs), Expression::call(next, vec![])),
            Some(int(5)),
        )),
    ])
    .unwrap();
    assert_eq!(h.get("xs").to_string(), "[6, 2]");
    assert_eq!(h.get("calls"), Value::Int(1));
}

#[test]
fn test_compound_member_evaluates_object_once() {
    let h = Harness::new();
    let (m, calls, a) = (h.id("m"), h.id("calls"), h.id("a"));
    let next = h.id("next");
    h.run(vec![
        Statement::set(calls, int(0)),
        Statement::set(m, Expression::map(vec![("a", int(1))])),
        counted(&h, ident(m)),
        Statement::expr(Expression::compound(
            CompoundOp::Increment,
            Expression::member(Expression::call(next, vec![]), a),
            None,
        )),
    ])
    .unwrap();
    assert_eq!(h.get("m").to_string(), "{\"a\": 2}");
    assert_eq!(h.get("calls"), Value::Int(1));
}

#[test]
fn test_compound_on_string_item_writes_back() {
    let h = Harness::new();
    let s = h.id("s");
    h.run(vec![
        Statement::set(s, Expression::string("ab")),
        Statement::expr(Expression::compound(
            CompoundOp::Apply(BinaryOp::Add),
            Expression::item(ident(s), int(0)),
            Some(Expression::string("!")),
        )),
    ])
    .unwrap();
    assert_eq!(h.get("s"), Value::from("a!b"));
}
