//! Tests for the scope analyzer and local scopes.

use trompe_foundation::{ClosureKind, ErrorKind, NamePath, Result, Value};

use super::*;
use crate::module::ModuleRegistry;
use crate::span::Span;
use crate::typed_tree::{BinaryOp, TypedNode};

fn analyze(tree: &TypedNode) -> Result<Analysis> {
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    Analyzer::analyze(tree, &module, &registry)
}

fn block_named(analysis: &Analysis, name: &str) -> BlockId {
    analysis
        .blocks()
        .iter()
        .find(|b| b.name() == name)
        .map(|b| b.id)
        .unwrap_or_else(|| panic!("no block named {name}"))
}

fn var_named(analysis: &Analysis, name: &str) -> VarId {
    let idx = analysis
        .vars()
        .iter()
        .position(|v| v.name == name)
        .unwrap_or_else(|| panic!("no var named {name}"));
    VarId(idx)
}

fn add(a: TypedNode, b: TypedNode) -> TypedNode {
    TypedNode::binary(BinaryOp::Add, a, b)
}

// =============================================================================
// Analysis
// =============================================================================

#[test]
fn increment_closure_is_clean() {
    // let f = fun x -> x + 1 in f 5
    let tree = TypedNode::let_in(
        "f",
        TypedNode::fun(&["x"], add(TypedNode::int_ident("x"), TypedNode::int(1))),
        TypedNode::app(TypedNode::ident("f"), vec![TypedNode::int(5)]),
    );
    let analysis = analyze(&tree).unwrap();
    let f = block_named(&analysis, "f");
    let scope = analysis.finish(f).unwrap();
    assert_eq!(scope.kind(), ClosureKind::Clean);
    assert_eq!(scope.num_args(), 1);
    assert_eq!(scope.location(var_named(&analysis, "x")).unwrap(), &VarLocation::Local(0));

    let x = analysis.var(var_named(&analysis, "x")).unwrap();
    assert!(x.is_argument());
    assert!(!x.captured);
}

#[test]
fn unbound_identifier_carries_location() {
    let tree = add(TypedNode::int(1), TypedNode::ident("nope").at(Span::new(3, 7)));
    let err = analyze(&tree).unwrap_err();
    match err.kind {
        ErrorKind::UnboundIdentifier { name, line, column } => {
            assert_eq!(name, "nope");
            assert_eq!((line, column), (3, 7));
        }
        other => panic!("expected UnboundIdentifier, got {other:?}"),
    }
}

#[test]
fn read_only_capture_is_copied() {
    // let y = 1 in let g = fun x -> x + y in g 2
    let tree = TypedNode::let_in(
        "y",
        TypedNode::int(1),
        TypedNode::let_in(
            "g",
            TypedNode::fun(&["x"], add(TypedNode::ident("x"), TypedNode::ident("y"))),
            TypedNode::app(TypedNode::ident("g"), vec![TypedNode::int(2)]),
        ),
    );
    let analysis = analyze(&tree).unwrap();
    let y = var_named(&analysis, "y");
    assert!(analysis.var(y).unwrap().roles.contains(Role::Copy));
    assert!(!analysis.var(y).unwrap().is_fully_shared());

    let g = analysis.finish(block_named(&analysis, "g")).unwrap();
    assert_eq!(g.kind(), ClosureKind::Copying);
    assert_eq!(g.copied, vec![y]);
    assert_eq!(g.location(y).unwrap(), &VarLocation::Local(1));

    let program = analysis.finish(analysis.program()).unwrap();
    assert!(program.shared.is_none());
    assert_eq!(analysis.block(analysis.program()).unwrap().shared, vec![y]);
}

#[test]
fn assigned_capture_is_fully_shared() {
    // let n = 0 in let inc = fun () -> n := n + 1 in inc (); n
    let tree = TypedNode::let_in(
        "n",
        TypedNode::int(0),
        TypedNode::let_in(
            "inc",
            TypedNode::fun(
                &[],
                TypedNode::assign("n", add(TypedNode::ident("n"), TypedNode::int(1))),
            ),
            TypedNode::seq(vec![
                TypedNode::app(TypedNode::ident("inc"), vec![]),
                TypedNode::ident("n"),
            ]),
        ),
    );
    let analysis = analyze(&tree).unwrap();
    let n = var_named(&analysis, "n");
    assert!(analysis.var(n).unwrap().is_fully_shared());
    assert!(analysis.var(n).unwrap().assigned);

    let program = analysis.finish(analysis.program()).unwrap();
    let group = program.shared.as_ref().unwrap();
    assert_eq!(group.members, vec![n]);
    assert_eq!(program.num_shared_slots(), 1);
    assert_eq!(
        program.location(n).unwrap(),
        &VarLocation::Shared {
            array: group.slot,
            elt: 0
        }
    );

    let inc = analysis.finish(block_named(&analysis, "inc")).unwrap();
    assert_eq!(inc.kind(), ClosureKind::Full);
    assert_eq!(inc.context, vec![GroupKey::block(analysis.program())]);
    assert_eq!(inc.group_slot(GroupKey::block(analysis.program())), Some(0));
    assert_eq!(inc.location(n).unwrap(), &VarLocation::Shared { array: 0, elt: 0 });
}

#[test]
fn intermediate_blocks_pass_arrays_down() {
    // let n = 0 in let outer = fun a -> (fun b -> n := b) in outer
    let tree = TypedNode::let_in(
        "n",
        TypedNode::int(0),
        TypedNode::let_in(
            "outer",
            TypedNode::fun(
                &["a"],
                TypedNode::named_fun(
                    "inner",
                    &["b"],
                    TypedNode::assign("n", TypedNode::ident("b")),
                ),
            ),
            TypedNode::ident("outer"),
        ),
    );
    let analysis = analyze(&tree).unwrap();
    let n = var_named(&analysis, "n");
    let outer = block_named(&analysis, "outer");
    let inner = block_named(&analysis, "inner");

    assert_eq!(analysis.block(outer).unwrap().refs, vec![n]);
    assert_eq!(analysis.block(outer).unwrap().shared, vec![n]);
    assert_eq!(analysis.block(inner).unwrap().refs, vec![n]);

    let outer_scope = analysis.finish(outer).unwrap();
    assert_eq!(outer_scope.kind(), ClosureKind::Full);
    assert_eq!(outer_scope.group_slot(GroupKey::block(analysis.program())), Some(1));

    let inner_scope = analysis.finish(inner).unwrap();
    assert_eq!(inner_scope.context, vec![GroupKey::block(analysis.program())]);
}

#[test]
fn top_level_rec_pair_is_global() {
    // let rec even = fun n -> ... odd ... and odd = fun n -> ... even ...
    let tree = TypedNode::program(vec![TypedNode::decl_rec(vec![
        (
            "even",
            TypedNode::fun(
                &["n"],
                TypedNode::app(TypedNode::ident("odd"), vec![TypedNode::ident("n")]),
            ),
        ),
        (
            "odd",
            TypedNode::fun(
                &["n"],
                TypedNode::app(TypedNode::ident("even"), vec![TypedNode::ident("n")]),
            ),
        ),
    ])]);
    let analysis = analyze(&tree).unwrap();
    for name in ["even", "odd"] {
        let var = analysis.var(var_named(&analysis, name)).unwrap();
        assert!(var.is_perm(), "{name} should be global");
        assert!(var.is_fully_shared(), "{name} should be fully shared");
        assert!(var.rec);
    }
    let even = analysis.finish(block_named(&analysis, "even")).unwrap();
    assert_eq!(even.kind(), ClosureKind::Clean);
    assert_eq!(even.globals, vec!["odd".to_string()]);
    assert_eq!(
        even.location(var_named(&analysis, "odd")).unwrap(),
        &VarLocation::Global("odd".to_string())
    );
    let program = analysis.finish(analysis.program()).unwrap();
    assert!(program.shared.is_none());
}

#[test]
fn local_rec_lives_in_own_array() {
    // fun x -> let rec loop = fun i -> loop i in loop x
    let tree = TypedNode::named_fun(
        "wrapper",
        &["x"],
        TypedNode::let_rec_in(
            vec![(
                "loop",
                TypedNode::fun(
                    &["i"],
                    TypedNode::app(TypedNode::ident("loop"), vec![TypedNode::ident("i")]),
                ),
            )],
            TypedNode::app(TypedNode::ident("loop"), vec![TypedNode::ident("x")]),
        ),
    );
    let analysis = analyze(&tree).unwrap();
    let wrapper = analysis.finish(block_named(&analysis, "wrapper")).unwrap();
    let lp = var_named(&analysis, "loop");
    assert!(analysis.var(lp).unwrap().is_fully_shared());
    assert!(!analysis.var(lp).unwrap().is_perm());
    assert_eq!(wrapper.shared.as_ref().unwrap().members, vec![lp]);
    assert_eq!(wrapper.kind(), ClosureKind::Full);

    let inner = analysis.finish(block_named(&analysis, "loop")).unwrap();
    assert_eq!(inner.kind(), ClosureKind::Full);
    assert_eq!(inner.context, vec![GroupKey::block(block_named(&analysis, "wrapper"))]);
}

#[test]
fn shared_arguments_are_mirrored() {
    // fun x -> fun () -> x := 1
    let tree = TypedNode::named_fun(
        "f",
        &["x"],
        TypedNode::fun(&[], TypedNode::assign("x", TypedNode::int(1))),
    );
    let analysis = analyze(&tree).unwrap();
    let f = analysis.finish(block_named(&analysis, "f")).unwrap();
    assert_eq!(f.shared_args(), vec![(0, 0)]);
    assert_eq!(f.num_temps(), 1);
}

#[test]
fn imported_names_become_bindings() {
    let tree = TypedNode::app(TypedNode::ident("string_of_int"), vec![TypedNode::int(3)]);
    let analysis = analyze(&tree).unwrap();
    let program = analysis.finish(analysis.program()).unwrap();
    let path = NamePath::new(vec!["Pervasives".to_string()], "string_of_int");
    assert_eq!(program.bindings, vec![("string_of_int".to_string(), path.clone())]);
    assert_eq!(program.find("string_of_int").unwrap(), VarLocation::Binding(path));
}

#[test]
fn own_module_attributes_are_globals() {
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    module.set_field_value("limit", Value::Int(10));
    let tree = TypedNode::ident("limit");
    let analysis = Analyzer::analyze(&tree, &module, &registry).unwrap();
    assert_eq!(
        analysis.resolution(&tree).unwrap(),
        &Resolution::Global("limit".to_string())
    );
}

#[test]
fn find_prefers_own_slots_over_globals() {
    let tree = TypedNode::program(vec![
        TypedNode::decl("x", TypedNode::int(1)),
        TypedNode::named_fun("f", &["x"], TypedNode::ident("x")),
    ]);
    let analysis = analyze(&tree).unwrap();
    let f = analysis.finish(block_named(&analysis, "f")).unwrap();
    assert_eq!(f.find("x").unwrap(), VarLocation::Local(0));
    assert!(f.find("missing").is_err());
}

#[test]
fn shadowing_resolves_to_innermost() {
    // let x = 1 in let x = 2 in x
    let tree = TypedNode::let_in(
        "x",
        TypedNode::int(1),
        TypedNode::let_in("x", TypedNode::int(2), TypedNode::ident("x")),
    );
    let analysis = analyze(&tree).unwrap();
    let Resolution::Var(v) = analysis.resolution(innermost_body(&tree)).unwrap() else {
        panic!("expected a variable");
    };
    assert_eq!(*v, VarId(1));
}

fn innermost_body(tree: &TypedNode) -> &TypedNode {
    use crate::typed_tree::NodeKind;
    let mut node = tree;
    while let NodeKind::Let(group) = &node.kind {
        node = group.body.as_ref().unwrap();
    }
    node
}

#[test]
fn empty_shared_group_is_rejected() {
    let err = SharedGroup::new(GroupKey::block(BlockId(0)), 0, Vec::new()).unwrap_err();
    assert!(err.is_internal());
}

#[test]
fn finish_is_idempotent() {
    let tree = TypedNode::let_in(
        "n",
        TypedNode::int(0),
        TypedNode::fun(&[], TypedNode::assign("n", TypedNode::int(1))),
    );
    let analysis = analyze(&tree).unwrap();
    let first = analysis.finish_all().unwrap();
    let second = analysis.finish_all().unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.stack, b.stack);
        assert_eq!(a.kind(), b.kind());
    }
}

#[test]
fn foreign_ids_are_errors() {
    let analysis = analyze(&TypedNode::int(1)).unwrap();
    assert!(analysis.block(BlockId(7)).unwrap_err().is_internal());
    assert!(analysis.var(VarId(7)).unwrap_err().is_internal());
    assert!(analysis.finish(BlockId(7)).is_err());
}

// =============================================================================
// Loops
// =============================================================================

fn rec_in_loop() -> TypedNode {
    // fun () -> for i = 0 to 2 do let rec f = fun n -> f n in f 0 done
    TypedNode::named_fun(
        "outer",
        &[],
        TypedNode::for_loop(
            "i",
            TypedNode::int(0),
            TypedNode::int(2),
            TypedNode::let_rec_in(
                vec![(
                    "f",
                    TypedNode::fun(
                        &["n"],
                        TypedNode::app(TypedNode::ident("f"), vec![TypedNode::ident("n")]),
                    ),
                )],
                TypedNode::app(TypedNode::ident("f"), vec![TypedNode::int(0)]),
            ),
        ),
    )
}

#[test]
fn loop_bodies_get_their_own_group() {
    let tree = rec_in_loop();
    let analysis = analyze(&tree).unwrap();
    let outer = block_named(&analysis, "outer");
    let f = var_named(&analysis, "f");
    let i = var_named(&analysis, "i");

    let lp = analysis.block(outer).unwrap().loops[0];
    assert_eq!(analysis.var(f).unwrap().group(), GroupKey::iteration(outer, lp));
    assert_eq!(analysis.var(i).unwrap().within, None);

    let scope = analysis.finish(outer).unwrap();
    assert!(scope.shared.is_none());
    let group = scope.loop_group(lp).unwrap();
    assert_eq!(group.members, vec![f]);
    assert_eq!(scope.stack.last(), Some(&SlotKind::LoopArray(lp)));
    assert_eq!(scope.group_slot(GroupKey::iteration(outer, lp)), Some(group.slot));

    let inner = analysis.finish(block_named(&analysis, "f")).unwrap();
    assert_eq!(inner.context, vec![GroupKey::iteration(outer, lp)]);
}

#[test]
fn rec_inside_a_top_level_loop_stays_local() {
    let tree = TypedNode::program(vec![TypedNode::while_loop(
        TypedNode::bool(false),
        TypedNode::let_rec_in(
            vec![("g", TypedNode::fun(&[], TypedNode::ident("g")))],
            TypedNode::unit(),
        ),
    )]);
    let analysis = analyze(&tree).unwrap();
    let g = analysis.var(var_named(&analysis, "g")).unwrap();
    assert!(!g.is_perm());
    assert!(g.is_fully_shared());
    assert!(g.within.is_some());
}
