//! End-to-end behaviour of lowered programs.
//!
//! Each test builds a tree, compiles it with the engine, runs it and checks
//! the bindings left in the root scope.

use std::sync::Arc;
use std::time::Duration;

use tessera_engine::ast::*;
use tessera_engine::compiler::OpCode;
use tessera_engine::runtime::Native;
use tessera_engine::{Engine, Ident, Interner, Value, link};

struct Script {
    engine: Engine,
}

impl Script {
    fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    fn id(&self, name: &str) -> Ident {
        self.engine.names().intern(name)
    }

    fn run(&self, program: Vec<Statement>) -> Value {
        self.engine.run(&program).expect("program runs")
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.engine.env().get(self.id(name)).ok()
    }
}

fn ident(id: Ident) -> Expression {
    Expression::ident(id)
}

fn int(n: i64) -> Expression {
    Expression::int(n)
}

fn eq(id: Ident, n: i64) -> Expression {
    Expression::binary(BinaryOp::Eq, ident(id), int(n))
}

/// `if x == 1 {r = "a"} elseif x == 2 {r = "b"} elseif x >= 2 {r = "c"} [else {r = "d"}]`
fn if_chain(x: i64, with_else: bool) -> Option<Value> {
    let s = Script::new();
    let (xid, r) = (s.id("x"), s.id("r"));
    let arm = |text: &str| vec![Statement::set(r, Expression::string(text))];
    let chain = Statement::new(StatementKind::If(IfStatement {
        condition: eq(xid, 1),
        then: arm("a"),
        else_ifs: vec![
            ElseIf {
                condition: eq(xid, 2),
                body: arm("b"),
                pos: Position::default(),
            },
            ElseIf {
                condition: Expression::binary(BinaryOp::Ge, ident(xid), int(2)),
                body: arm("c"),
                pos: Position::default(),
            },
        ],
        otherwise: if with_else { arm("d") } else { vec![] },
    }));
    s.run(vec![Statement::set(xid, int(x)), chain]);
    s.get("r")
}

#[test]
fn test_if_chain_runs_first_true_arm_only() {
    assert_eq!(if_chain(1, true), Some(Value::from("a")));
    // both later arms hold; only the first one runs
    assert_eq!(if_chain(2, true), Some(Value::from("b")));
    assert_eq!(if_chain(3, true), Some(Value::from("c")));
    assert_eq!(if_chain(0, true), Some(Value::from("d")));
    assert_eq!(if_chain(0, false), None);
}

#[test]
fn test_error_in_nested_call_reaches_catch() {
    let s = Script::new();
    let (inner, outer, caught, after, reached) =
        (s.id("inner"), s.id("outer"), s.id("caught"), s.id("after"), s.id("reached"));
    let e = s.id("e");
    let program = |fail: bool| {
        let body = if fail {
            vec![Statement::throw(Expression::string("deep"))]
        } else {
            vec![Statement::ret(vec![int(1)])]
        };
        vec![
            Statement::set(after, int(0)),
            Statement::expr(Expression::named_function(inner, vec![], body)),
            Statement::expr(Expression::named_function(
                outer,
                vec![],
                vec![Statement::ret(vec![Expression::call(inner, vec![])])],
            )),
            Statement::try_catch(
                vec![
                    Statement::expr(Expression::call(outer, vec![])),
                    Statement::set(reached, Expression::bool(true)),
                ],
                Some(e),
                vec![Statement::set(caught, ident(e))],
            ),
            Statement::set(after, Expression::binary(BinaryOp::Add, ident(after), int(1))),
        ]
    };

    s.run(program(true));
    assert_eq!(s.get("caught").map(|v| v.to_string()), Some("deep".to_string()));
    assert_eq!(s.get("reached"), None);
    assert_eq!(s.get("after"), Some(Value::Int(1)));

    let clean = Script::new();
    clean.run(program(false));
    assert_eq!(clean.get("caught"), None);
    assert_eq!(clean.get("reached"), Some(Value::Bool(true)));
    assert_eq!(clean.get("after"), Some(Value::Int(1)));
}

#[test]
fn test_swap() {
    let s = Script::new();
    let (a, b) = (s.id("a"), s.id("b"));
    s.run(vec![
        Statement::set(a, int(1)),
        Statement::set(b, int(2)),
        Statement::assign(vec![ident(a), ident(b)], vec![ident(b), ident(a)]),
    ]);
    assert_eq!(s.get("a"), Some(Value::Int(2)));
    assert_eq!(s.get("b"), Some(Value::Int(1)));
}

#[test]
fn test_destructuring() {
    let s = Script::new();
    let (f, g, a, b, c, d) = (s.id("f"), s.id("g"), s.id("a"), s.id("b"), s.id("c"), s.id("d"));
    s.run(vec![
        Statement::expr(Expression::named_function(
            f,
            vec![],
            vec![Statement::ret(vec![int(10), int(20)])],
        )),
        Statement::expr(Expression::named_function(
            g,
            vec![],
            vec![Statement::ret(vec![int(5)])],
        )),
        Statement::assign(vec![ident(a), ident(b)], vec![Expression::call(f, vec![])]),
        Statement::assign(vec![ident(c), ident(d)], vec![Expression::call(g, vec![])]),
    ]);
    assert_eq!(s.get("a"), Some(Value::Int(10)));
    assert_eq!(s.get("b"), Some(Value::Int(20)));
    assert_eq!(s.get("c"), Some(Value::Int(5)));
    assert_eq!(s.get("d"), Some(Value::Int(5)));
}

#[test]
fn test_loop_break_and_continue_visit_one_and_three() {
    let s = Script::new();
    let (i, seen) = (s.id("i"), s.id("seen"));
    s.run(vec![
        Statement::set(seen, Expression::string("")),
        Statement::numeric_for(
            i,
            int(1),
            int(5),
            vec![
                Statement::if_then(eq(i, 4), vec![Statement::break_loop()], vec![]),
                Statement::if_then(
                    Expression::binary(
                        BinaryOp::Eq,
                        Expression::binary(BinaryOp::Rem, ident(i), int(2)),
                        int(0),
                    ),
                    vec![Statement::continue_loop()],
                    vec![],
                ),
                Statement::set(seen, Expression::binary(BinaryOp::Add, ident(seen), ident(i))),
            ],
        ),
    ]);
    assert_eq!(s.get("seen"), Some(Value::from("13")));
}

#[test]
fn test_select_yields_until_ready_then_runs_once() {
    let s = Script::new();
    s.engine.env().define_str(
        "pause",
        Native::value("pause", |_| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(Value::Nil)
        }),
    );
    let (worker, c, ch, hits, got) = (s.id("worker"), s.id("c"), s.id("ch"), s.id("hits"), s.id("got"));
    s.run(vec![
        Statement::expr(Expression::named_function(
            worker,
            vec![c],
            vec![
                Statement::expr(Expression::call(s.id("pause"), vec![])),
                Statement::expr(Expression::send(ident(c), int(7))),
            ],
        )),
        Statement::set(ch, Expression::make_chan(Some(int(1)))),
        Statement::set(hits, int(0)),
        Statement::set(got, Expression::nil()),
        Statement::expr(Expression::launch(worker, vec![ident(ch)])),
        Statement::select(vec![Clause::case(
            Expression::receive_into(ident(got), ident(ch)),
            vec![Statement::set(hits, Expression::binary(BinaryOp::Add, ident(hits), int(1)))],
        )]),
    ]);
    s.engine.vm().wait();
    assert!(s.engine.vm().yield_count() >= 1);
    assert_eq!(s.get("hits"), Some(Value::Int(1)));
    assert_eq!(s.get("got"), Some(Value::Int(7)));
}

#[test]
fn test_persisted_unit_resolves_same_names() {
    let s = Script::new();
    let (total, add, n) = (s.id("Total"), s.id("add"), s.id("n"));
    let program = vec![
        Statement::set(total, int(1)),
        Statement::expr(Expression::named_function(
            add,
            vec![n],
            vec![Statement::set(
                total,
                Expression::binary(BinaryOp::Add, ident(total), ident(n)),
            )],
        )),
        Statement::expr(Expression::call(add, vec![int(41)])),
    ];
    let unit = s.engine.compile(&program).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("total.tsb");
    s.engine.save_file(&path, &unit).unwrap();

    let other = Script::new();
    let loaded = other.engine.load_file(&path).unwrap();
    assert_eq!(
        loaded.code.disassemble(other.engine.names()),
        unit.code.disassemble(s.engine.names())
    );
    other.engine.run_unit(&loaded).unwrap();
    assert_eq!(other.get("total"), Some(Value::Int(42)));
}

#[test]
fn test_merge_collision_remaps_into_function_bodies() {
    let source = Interner::new();
    let (f, x) = (source.intern("f"), source.intern("x"));
    let unit = tessera_engine::Compiler::new(&source)
        .compile(&[Statement::expr(Expression::named_function(
            f,
            vec![],
            vec![Statement::set(x, int(1))],
        ))])
        .unwrap();
    let bytes = link::encode(&unit, &source).unwrap();

    let live = Arc::new(Interner::new());
    let taken = live.intern("already_here");
    assert_eq!(taken, f);
    let loaded = link::load(&bytes, &live).unwrap();

    let live_f = live.lookup("f").unwrap();
    assert_ne!(live_f, taken);
    let body = loaded
        .code
        .ops()
        .find_map(|op| op.body())
        .expect("function body");
    let live_x = live.lookup("x").unwrap();
    assert!(body.all_identifiers().contains(&live_x));
    assert!(loaded.code.ops().all(|op| !op.identifiers().contains(&taken)));
    assert!(matches!(
        loaded.code.ops().next(),
        Some(OpCode::Func { .. })
    ));
}

fn message(id: Ident, s: &Script) -> Expression {
    Expression::member(ident(id), s.id("message"))
}

fn append(log: Ident, part: Expression) -> Statement {
    Statement::set(log, Expression::binary(BinaryOp::Add, ident(log), part))
}

#[test]
fn test_nested_try_inner_handler_runs_first() {
    let s = Script::new();
    let (log, e) = (s.id("log"), s.id("e"));
    s.run(vec![
        Statement::set(log, Expression::string("")),
        Statement::try_catch(
            vec![
                Statement::try_catch(
                    vec![Statement::throw(Expression::string("inner"))],
                    Some(e),
                    vec![append(log, message(e, &s))],
                ),
                append(log, Expression::string("|after|")),
                Statement::throw(Expression::string("outer")),
            ],
            Some(e),
            vec![append(log, message(e, &s))],
        ),
    ]);
    assert_eq!(s.get("log"), Some(Value::from("inner|after|outer")));
}

#[test]
fn test_break_inside_try_drops_its_handler() {
    let s = Script::new();
    let (n, i, e, caught) = (s.id("n"), s.id("i"), s.id("e"), s.id("caught"));
    s.run(vec![
        Statement::set(n, int(0)),
        Statement::try_catch(
            vec![
                Statement::numeric_for(
                    i,
                    int(1),
                    int(5),
                    vec![Statement::try_catch(
                        vec![
                            Statement::set(n, Expression::binary(BinaryOp::Add, ident(n), int(1))),
                            Statement::break_loop(),
                        ],
                        Some(e),
                        vec![Statement::set(caught, Expression::string("inner"))],
                    )],
                ),
                Statement::throw(Expression::string("outer")),
            ],
            Some(e),
            vec![Statement::set(caught, message(e, &s))],
        ),
    ]);
    assert_eq!(s.get("caught"), Some(Value::from("outer")));
    assert_eq!(s.get("n"), Some(Value::Int(1)));
}

#[test]
fn test_continue_inside_try_drops_its_handler() {
    let s = Script::new();
    let (n, i, e, caught) = (s.id("n"), s.id("i"), s.id("e"), s.id("caught"));
    s.run(vec![
        Statement::set(n, int(0)),
        Statement::set(caught, Expression::string("none")),
        Statement::try_catch(
            vec![
                Statement::numeric_for(
                    i,
                    int(1),
                    int(3),
                    vec![Statement::try_catch(
                        vec![
                            Statement::set(n, Expression::binary(BinaryOp::Add, ident(n), int(1))),
                            Statement::continue_loop(),
                        ],
                        Some(e),
                        vec![Statement::set(caught, Expression::string("inner"))],
                    )],
                ),
                Statement::throw(Expression::string("outer")),
            ],
            Some(e),
            vec![Statement::set(caught, message(e, &s))],
        ),
    ]);
    assert_eq!(s.get("n"), Some(Value::Int(3)));
    assert_eq!(s.get("caught"), Some(Value::from("outer")));
}

#[test]
fn test_error_in_loop_unwinds_loop_frames() {
    let s = Script::new();
    let (i, j, e, hits, rounds) = (s.id("i"), s.id("j"), s.id("e"), s.id("hits"), s.id("rounds"));
    let bump = |id: Ident| Statement::set(id, Expression::binary(BinaryOp::Add, ident(id), int(1)));
    s.run(vec![
        Statement::set(hits, int(0)),
        Statement::set(rounds, int(0)),
        Statement::numeric_for(
            i,
            int(1),
            int(3),
            vec![
                Statement::try_catch(
                    vec![Statement::numeric_for(
                        j,
                        int(1),
                        int(5),
                        vec![Statement::throw(Expression::string("stop"))],
                    )],
                    Some(e),
                    vec![bump(hits)],
                ),
                bump(rounds),
                // must continue the outer loop, not the abandoned inner one
                Statement::continue_loop(),
            ],
        ),
    ]);
    assert_eq!(s.get("hits"), Some(Value::Int(3)));
    assert_eq!(s.get("rounds"), Some(Value::Int(3)));
}

#[test]
fn test_throw_from_catch_reaches_outer_handler() {
    let s = Script::new();
    let (e, caught) = (s.id("e"), s.id("caught"));
    let rethrow = Statement::try_catch(
        vec![Statement::throw(Expression::string("first"))],
        Some(e),
        vec![Statement::throw(Expression::string("second"))],
    );
    s.run(vec![Statement::try_catch(
        vec![rethrow.clone()],
        Some(e),
        vec![Statement::set(caught, message(e, &s))],
    )]);
    assert_eq!(s.get("caught"), Some(Value::from("second")));

    // without an outer handler the error leaves the program
    let err = s.engine.run(&[rethrow]).unwrap_err();
    assert!(err.to_string().contains("second"));
}

#[test]
fn test_oversized_make_is_catchable() {
    let s = Script::new();
    let (xs, e, caught) = (s.id("xs"), s.id("e"), s.id("caught"));
    s.run(vec![Statement::try_catch(
        vec![Statement::set(xs, Expression::make_array(int(i64::MAX), None))],
        Some(e),
        vec![Statement::set(caught, Expression::bool(true))],
    )]);
    assert_eq!(s.get("caught"), Some(Value::Bool(true)));
    assert_eq!(s.get("xs"), None);
}
