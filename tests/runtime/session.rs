//! Session integration tests

use trompe_foundation::{ErrorKind, Value};
use trompe_language::TypedNode;
use trompe_language::typed_tree::BinaryOp;
use trompe_runtime::{Session, SessionConfig};

fn add(a: TypedNode, b: TypedNode) -> TypedNode {
    TypedNode::binary(BinaryOp::Add, a, b)
}

fn incr_decl() -> TypedNode {
    TypedNode::program(vec![TypedNode::decl(
        "f",
        TypedNode::fun(&["x"], add(TypedNode::int_ident("x"), TypedNode::int(1))),
    )])
}

#[test]
fn declared_function_is_callable_from_the_next_unit() {
    let mut session = Session::with_config(SessionConfig::checked());
    session.eval(&incr_decl()).unwrap();
    let value = session
        .eval(&TypedNode::app(TypedNode::ident("f"), vec![TypedNode::int(5)]))
        .unwrap();
    assert_eq!(value, Value::Int(6));
}

#[test]
fn declared_function_can_be_applied_directly() {
    let mut session = Session::new();
    session.eval(&incr_decl()).unwrap();
    let f = session.global("f").unwrap();
    assert_eq!(session.apply(&f, vec![Value::Int(41)]).unwrap(), Value::Int(42));
    let err = session.apply(&f, Vec::new()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ArityMismatch { expected: 1, actual: 0 }));
}

#[test]
fn redeclaring_a_global_replaces_it() {
    let mut session = Session::new();
    session
        .eval(&TypedNode::program(vec![TypedNode::decl("limit", TypedNode::int(3))]))
        .unwrap();
    session
        .eval(&TypedNode::program(vec![TypedNode::decl("limit", TypedNode::int(8))]))
        .unwrap();
    assert_eq!(session.global("limit"), Some(Value::Int(8)));
}

#[test]
fn counters_from_one_factory_are_isolated() {
    // let make () = let n = ref-like 0 in fun () -> n := n + 1; n
    let mut session = Session::with_config(SessionConfig::checked());
    let make = TypedNode::fun(
        &[],
        TypedNode::let_in(
            "n",
            TypedNode::int(0),
            TypedNode::fun(
                &[],
                TypedNode::seq(vec![
                    TypedNode::assign("n", add(TypedNode::ident("n"), TypedNode::int(1))),
                    TypedNode::ident("n"),
                ]),
            ),
        ),
    );
    session
        .eval(&TypedNode::program(vec![TypedNode::decl("make", make)]))
        .unwrap();
    let make = session.global("make").unwrap();
    let a = session.apply(&make, Vec::new()).unwrap();
    let b = session.apply(&make, Vec::new()).unwrap();

    assert_eq!(session.apply(&a, Vec::new()).unwrap(), Value::Int(1));
    assert_eq!(session.apply(&a, Vec::new()).unwrap(), Value::Int(2));
    assert_eq!(session.apply(&b, Vec::new()).unwrap(), Value::Int(1));
    assert_eq!(session.apply(&a, Vec::new()).unwrap(), Value::Int(3));
}

#[test]
fn sessions_do_not_share_globals() {
    let mut first = Session::new();
    first.eval(&incr_decl()).unwrap();
    let second = Session::new();
    assert!(second.global("f").is_none());
    assert!(second.compile(&TypedNode::ident("f")).is_err());
}

#[test]
fn runtime_errors_name_the_failing_function() {
    let mut session = Session::new();
    session
        .eval(&TypedNode::program(vec![TypedNode::decl(
            "explode",
            TypedNode::named_fun(
                "explode",
                &["x"],
                TypedNode::binary(BinaryOp::Div, TypedNode::int_ident("x"), TypedNode::int(0)),
            ),
        )]))
        .unwrap();
    let err = session
        .eval(&TypedNode::app(TypedNode::ident("explode"), vec![TypedNode::int(1)]))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DivisionByZero));
    let stack = err.context.unwrap().stack;
    assert_eq!(stack.first().map(String::as_str), Some("explode"));
}
