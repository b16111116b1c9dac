//! Integration tests for closure capture
//!
//! A variable that is captured and assigned anywhere lives in a shared
//! array; one that is only read gets copied into each closure.

use trompe_foundation::{ClosureKind, Value};
use trompe_language::opcode::decode_all;
use trompe_language::typed_tree::{BinaryOp, TypedNode};
use trompe_language::{Analyzer, ModuleRegistry, Opcode, compile, compile_and_run};

fn add(a: TypedNode, b: TypedNode) -> TypedNode {
    TypedNode::binary(BinaryOp::Add, a, b)
}

fn call0(name: &str) -> TypedNode {
    TypedNode::app(TypedNode::ident(name), Vec::new())
}

fn eval(tree: &TypedNode) -> Value {
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    compile_and_run(tree, &registry, &module).unwrap()
}

#[test]
fn sibling_closures_see_each_others_writes() {
    // let x = 0 in
    // let set = fun () -> x := 10 in
    // let get = fun () -> x in
    // set (); get ()
    let tree = TypedNode::let_in(
        "x",
        TypedNode::int(0),
        TypedNode::let_in(
            "set",
            TypedNode::fun(&[], TypedNode::assign("x", TypedNode::int(10))),
            TypedNode::let_in(
                "get",
                TypedNode::fun(&[], TypedNode::ident("x")),
                TypedNode::seq(vec![call0("set"), call0("get")]),
            ),
        ),
    );
    assert_eq!(eval(&tree), Value::Int(10));
}

#[test]
fn writes_by_the_owner_reach_captures() {
    // let x = 1 in let f = fun () -> x in x := 2; f ()
    let tree = TypedNode::let_in(
        "x",
        TypedNode::int(1),
        TypedNode::let_in(
            "f",
            TypedNode::fun(&[], TypedNode::ident("x")),
            TypedNode::seq(vec![TypedNode::assign("x", TypedNode::int(2)), call0("f")]),
        ),
    );
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    let analysis = Analyzer::analyze(&tree, &module, &registry).unwrap();
    let x = analysis.vars().iter().find(|v| v.name == "x").unwrap();
    assert!(x.is_fully_shared());
    assert_eq!(eval(&tree), Value::Int(2));
}

#[test]
fn read_only_capture_builds_a_copying_closure() {
    let tree = TypedNode::let_in(
        "y",
        TypedNode::int(5),
        TypedNode::fun(&["x"], add(TypedNode::ident("x"), TypedNode::ident("y"))),
    );
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    let code = compile(&tree, &registry, &module).unwrap();
    let ops: Vec<Opcode> = decode_all(&code.bytes)
        .unwrap()
        .into_iter()
        .map(|(_, op)| op)
        .collect();
    assert!(ops.iter().any(|op| matches!(op, Opcode::CopyingBlock { count: 1, .. })));

    let Value::Closure(f) = compile_and_run(&tree, &registry, &module).unwrap() else {
        panic!("expected a closure");
    };
    assert_eq!(f.kind(), ClosureKind::Copying);
    assert_eq!(f.copied, vec![Value::Int(5)]);
}

#[test]
fn counters_keep_independent_state() {
    // let make = fun start -> (fun () -> start := start + 1; start) in
    // let a = make 10 in let b = make 20 in (a (); a (); b ())
    let make = TypedNode::fun(
        &["start"],
        TypedNode::fun(
            &[],
            TypedNode::seq(vec![
                TypedNode::assign("start", add(TypedNode::ident("start"), TypedNode::int(1))),
                TypedNode::ident("start"),
            ]),
        ),
    );
    let tree = TypedNode::let_in(
        "make",
        make,
        TypedNode::let_in(
            "a",
            TypedNode::app(TypedNode::ident("make"), vec![TypedNode::int(10)]),
            TypedNode::let_in(
                "b",
                TypedNode::app(TypedNode::ident("make"), vec![TypedNode::int(20)]),
                TypedNode::tuple(vec![call0("a"), call0("a"), call0("b")]),
            ),
        ),
    );
    assert_eq!(
        eval(&tree),
        Value::tuple(vec![Value::Int(11), Value::Int(12), Value::Int(21)])
    );
}

#[test]
fn closure_over_loop_variable() {
    // let fs = [| (); (); () |] in
    // for i = 0 to 2 do array_set fs i (fun () -> i) done;
    // (array_get fs 2) ()
    let tree = TypedNode::let_in(
        "fs",
        TypedNode::array(vec![TypedNode::unit(), TypedNode::unit(), TypedNode::unit()]),
        TypedNode::seq(vec![
            TypedNode::for_loop(
                "i",
                TypedNode::int(0),
                TypedNode::int(2),
                TypedNode::primitive(
                    "array_set",
                    vec![
                        TypedNode::ident("fs"),
                        TypedNode::int_ident("i"),
                        TypedNode::fun(&[], TypedNode::ident("i")),
                    ],
                ),
            ),
            TypedNode::app(
                TypedNode::primitive("array_get", vec![TypedNode::ident("fs"), TypedNode::int(2)]),
                Vec::new(),
            ),
        ]),
    );
    assert_eq!(eval(&tree), Value::Int(2));
}

fn loop_of_recursive_closures() -> TypedNode {
    // let fs = [| (); (); () |] in
    // for i = 0 to 2 do
    //   let rec f = fun n -> if n = 0 then i else f (n - 1) in array_set fs i f
    // done;
    // (array_get fs 0) 1
    let n = || TypedNode::int_ident("n");
    let f = TypedNode::fun(
        &["n"],
        TypedNode::if_else(
            TypedNode::binary(BinaryOp::Eq, n(), TypedNode::int(0)),
            TypedNode::ident("i"),
            TypedNode::app(
                TypedNode::ident("f"),
                vec![TypedNode::binary(BinaryOp::Sub, n(), TypedNode::int(1))],
            ),
        ),
    );
    let body = TypedNode::let_rec_in(
        vec![("f", f)],
        TypedNode::primitive(
            "array_set",
            vec![TypedNode::ident("fs"), TypedNode::int_ident("i"), TypedNode::ident("f")],
        ),
    );
    TypedNode::let_in(
        "fs",
        TypedNode::array(vec![TypedNode::unit(), TypedNode::unit(), TypedNode::unit()]),
        TypedNode::seq(vec![
            TypedNode::for_loop("i", TypedNode::int(0), TypedNode::int(2), body),
            TypedNode::app(
                TypedNode::primitive("array_get", vec![TypedNode::ident("fs"), TypedNode::int(0)]),
                vec![TypedNode::int(1)],
            ),
        ]),
    )
}

#[test]
fn recursive_bindings_are_fresh_per_iteration() {
    let wrapped = TypedNode::app(TypedNode::fun(&[], loop_of_recursive_closures()), Vec::new());
    assert_eq!(eval(&wrapped), Value::Int(0));
    assert_eq!(eval(&loop_of_recursive_closures()), Value::Int(0));
}

#[test]
fn assigned_captures_are_fresh_per_iteration() {
    // let fs = [| (); () |] in let k = 0 in
    // while k < 2 do
    //   let c = k in let get = fun () -> c in
    //   c := c * 10; array_set fs k get; k := k + 1
    // done;
    // ((array_get fs 0) (), (array_get fs 1) ())
    let k = || TypedNode::int_ident("k");
    let body = TypedNode::let_in(
        "c",
        k(),
        TypedNode::let_in(
            "get",
            TypedNode::fun(&[], TypedNode::ident("c")),
            TypedNode::seq(vec![
                TypedNode::assign(
                    "c",
                    TypedNode::binary(BinaryOp::Mul, TypedNode::ident("c"), TypedNode::int(10)),
                ),
                TypedNode::primitive(
                    "array_set",
                    vec![TypedNode::ident("fs"), k(), TypedNode::ident("get")],
                ),
                TypedNode::assign("k", add(k(), TypedNode::int(1))),
            ]),
        ),
    );
    let get = |i: i64| {
        TypedNode::app(
            TypedNode::primitive("array_get", vec![TypedNode::ident("fs"), TypedNode::int(i)]),
            Vec::new(),
        )
    };
    let tree = TypedNode::let_in(
        "fs",
        TypedNode::array(vec![TypedNode::unit(), TypedNode::unit()]),
        TypedNode::let_in(
            "k",
            TypedNode::int(0),
            TypedNode::seq(vec![
                TypedNode::while_loop(
                    TypedNode::binary(BinaryOp::Lt, k(), TypedNode::int(2)),
                    body,
                ),
                TypedNode::tuple(vec![get(0), get(1)]),
            ]),
        ),
    );
    assert_eq!(eval(&tree), Value::tuple(vec![Value::Int(0), Value::Int(10)]));
}
