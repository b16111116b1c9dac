//! Integration tests for the VM
//!
//! Runs compiled units end to end, including units that share one module.

use std::rc::Rc;

use trompe_foundation::{ErrorKind, Value};
use trompe_language::typed_tree::{BinaryOp, Pattern, UnaryOp};
use trompe_language::{
    Compiler, CompilerConfig, ModuleContext, ModuleRef, ModuleRegistry, TypedNode, Vm, VmConfig,
};

struct Unit {
    registry: ModuleRegistry,
    module: ModuleRef,
    vm: Vm,
}

impl Unit {
    fn new() -> Self {
        let registry = ModuleRegistry::with_pervasives();
        let module = registry.define_module(&["Main"]);
        Self {
            registry,
            module,
            vm: Vm::with_config(VmConfig::checked()),
        }
    }

    fn run(&mut self, tree: &TypedNode) -> trompe_foundation::Result<Value> {
        let code = Compiler::new(&self.registry, &self.module, CompilerConfig::default())
            .compile(tree)?;
        let result = self.vm.execute(
            Rc::new(code),
            &ModuleContext::new(&self.registry, &self.module),
        );
        self.vm.reset();
        result
    }
}

fn run(tree: &TypedNode) -> trompe_foundation::Result<Value> {
    Unit::new().run(tree)
}

fn bin(op: BinaryOp, left: TypedNode, right: TypedNode) -> TypedNode {
    TypedNode::binary(op, left, right)
}

fn n() -> TypedNode {
    TypedNode::int_ident("n")
}

fn call(name: &str, args: Vec<TypedNode>) -> TypedNode {
    TypedNode::app(TypedNode::ident(name), args)
}

// =============================================================================
// Arithmetic
// =============================================================================

#[test]
fn integer_arithmetic() {
    let tree = bin(
        BinaryOp::Sub,
        bin(BinaryOp::Mul, TypedNode::int(6), TypedNode::int(7)),
        bin(BinaryOp::Mod, TypedNode::int(17), TypedNode::int(5)),
    );
    assert_eq!(run(&tree).unwrap(), Value::Int(40));
}

#[test]
fn mixed_arithmetic_widens_to_float() {
    let tree = bin(BinaryOp::Div, TypedNode::float(3.0), TypedNode::int(2));
    assert_eq!(run(&tree).unwrap(), Value::Float(1.5));
}

#[test]
fn negation_and_comparison() {
    let tree = bin(
        BinaryOp::Lt,
        TypedNode::unary(UnaryOp::Neg, TypedNode::int(3)),
        TypedNode::int(0),
    );
    assert_eq!(run(&tree).unwrap(), Value::Bool(true));
}

#[test]
fn overflow_is_an_error() {
    let tree = bin(BinaryOp::Add, TypedNode::int(i64::MAX), TypedNode::int(1));
    let err = run(&tree).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Primitive { .. }));
}

#[test]
fn division_by_zero_reports_the_unit() {
    let tree = bin(BinaryOp::Div, TypedNode::int(1), TypedNode::int(0));
    let err = run(&tree).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DivisionByZero));
    let context = err.context.unwrap();
    assert_eq!(context.stack, vec!["<main>".to_string()]);
}

// =============================================================================
// Functions
// =============================================================================

#[test]
fn increment_function() {
    // let f = fun x -> x + 1 in f 5
    let tree = TypedNode::let_in(
        "f",
        TypedNode::fun(&["x"], bin(BinaryOp::Add, TypedNode::int_ident("x"), TypedNode::int(1))),
        call("f", vec![TypedNode::int(5)]),
    );
    assert_eq!(run(&tree).unwrap(), Value::Int(6));
}

#[test]
fn higher_order_functions() {
    // let twice = fun f x -> f (f x) in twice (fun y -> y * 3) 2
    let twice = TypedNode::fun(
        &["f", "x"],
        call("f", vec![call("f", vec![TypedNode::ident("x")])]),
    );
    let triple =
        TypedNode::fun(&["y"], bin(BinaryOp::Mul, TypedNode::int_ident("y"), TypedNode::int(3)));
    let tree = TypedNode::let_in("twice", twice, call("twice", vec![triple, TypedNode::int(2)]));
    assert_eq!(run(&tree).unwrap(), Value::Int(18));
}

#[test]
fn wrong_argument_count_is_an_arity_mismatch() {
    let tree = TypedNode::let_in(
        "f",
        TypedNode::fun(&["a", "b"], TypedNode::ident("a")),
        call("f", vec![TypedNode::int(1)]),
    );
    let err = run(&tree).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ArityMismatch { expected: 2, actual: 1 }));
}

#[test]
fn list_length_by_recursion() {
    // let rec len = fun l -> match l with [] -> 0 | _ :: t -> 1 + len t
    let len = TypedNode::named_fun(
        "len",
        &["l"],
        TypedNode::case(
            TypedNode::ident("l"),
            vec![
                (Pattern::nil(), TypedNode::int(0)),
                (
                    Pattern::cons(Pattern::wildcard(), Pattern::ident("t")),
                    bin(BinaryOp::Add, TypedNode::int(1), call("len", vec![TypedNode::ident("t")])),
                ),
            ],
        ),
    );
    let list = TypedNode::list(vec![TypedNode::int(1), TypedNode::int(2), TypedNode::int(3)]);
    let tree = TypedNode::let_rec_in(vec![("len", len)], call("len", vec![list]));
    assert_eq!(run(&tree).unwrap(), Value::Int(3));
}

// =============================================================================
// Primitives
// =============================================================================

#[test]
fn string_primitives() {
    let tree = TypedNode::primitive(
        "string_concat",
        vec![
            TypedNode::string("n="),
            TypedNode::primitive("string_of_int", vec![TypedNode::int(7)]),
        ],
    );
    assert_eq!(run(&tree).unwrap(), Value::String("n=7".into()));
}

#[test]
fn array_index_out_of_bounds() {
    let tree = TypedNode::primitive(
        "array_get",
        vec![TypedNode::array(vec![TypedNode::int(1)]), TypedNode::int(3)],
    );
    let err = run(&tree).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IndexOutOfBounds { index: 3, length: 1 }));
}

#[test]
fn failwith_carries_its_message() {
    let tree = TypedNode::primitive("failwith", vec![TypedNode::string("gave up")]);
    let err = run(&tree).unwrap_err();
    assert!(err.to_string().contains("gave up"));
}

// =============================================================================
// Globals Across Units
// =============================================================================

fn even_odd() -> TypedNode {
    // let rec even n = if n = 0 then true else odd (n - 1)
    // and odd n = if n = 0 then false else even (n - 1)
    let body = |base: bool, other: &str| {
        TypedNode::if_else(
            bin(BinaryOp::Eq, n(), TypedNode::int(0)),
            TypedNode::bool(base),
            call(other, vec![bin(BinaryOp::Sub, n(), TypedNode::int(1))]),
        )
    };
    TypedNode::program(vec![TypedNode::decl_rec(vec![
        ("even", TypedNode::named_fun("even", &["n"], body(true, "odd"))),
        ("odd", TypedNode::named_fun("odd", &["n"], body(false, "even"))),
    ])])
}

#[test]
fn later_units_call_earlier_globals() {
    let mut unit = Unit::new();
    unit.run(&even_odd()).unwrap();
    assert_eq!(unit.run(&call("even", vec![TypedNode::int(7)])).unwrap(), Value::Bool(false));
    assert_eq!(unit.run(&call("odd", vec![TypedNode::int(7)])).unwrap(), Value::Bool(true));
}

#[test]
fn redefining_a_global_is_seen_by_its_callers() {
    let mut unit = Unit::new();
    unit.run(&even_odd()).unwrap();
    unit.run(&TypedNode::program(vec![TypedNode::decl(
        "odd",
        TypedNode::fun(&["n"], TypedNode::bool(true)),
    )]))
    .unwrap();
    assert_eq!(unit.run(&call("even", vec![TypedNode::int(3)])).unwrap(), Value::Bool(true));
}

#[test]
fn a_failed_unit_does_not_poison_the_next() {
    let mut unit = Unit::new();
    assert!(unit.run(&TypedNode::primitive("failwith", vec![TypedNode::string("x")])).is_err());
    assert_eq!(unit.vm.stack_depth(), 0);
    assert_eq!(unit.run(&TypedNode::int(9)).unwrap(), Value::Int(9));
}
