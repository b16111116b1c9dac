//! Integration tests for the emitter and compiler

use trompe_foundation::{CompiledCode, ErrorKind, Value};
use trompe_language::emitter::Emitter;
use trompe_language::opcode::decode_all;
use trompe_language::typed_tree::{BinaryOp, TypedNode};
use trompe_language::{CompilerConfig, ModuleRegistry, Opcode, compile, disassemble};

fn compile_main(tree: &TypedNode) -> CompiledCode {
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    compile(tree, &registry, &module).unwrap()
}

fn ops(code: &CompiledCode) -> Vec<Opcode> {
    decode_all(&code.bytes)
        .unwrap()
        .into_iter()
        .map(|(_, op)| op)
        .collect()
}

// =============================================================================
// Emitter
// =============================================================================

#[test]
fn backward_branch_must_target_a_loop_head() {
    let mut emitter = Emitter::new(CompilerConfig::default());
    let top = emitter.new_label();
    emitter.place(top);
    emitter.emit(Opcode::LoadBool(true));
    emitter.branch_true(top);
    emitter.emit(Opcode::ReturnUnit);
    let err = emitter.finish(CompiledCode::default()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalBackwardBranch { .. }));
}

#[test]
fn loop_head_accepts_backward_branches() {
    let mut emitter = Emitter::new(CompilerConfig::default());
    let top = emitter.new_label();
    emitter.place(top);
    emitter.emit(Opcode::LoopHead);
    emitter.emit(Opcode::LoadBool(false));
    emitter.branch_true(top);
    emitter.emit(Opcode::ReturnUnit);
    let code = emitter.finish(CompiledCode::default()).unwrap();
    assert_eq!(ops(&code)[0], Opcode::LoopHead);
    assert_eq!(code.frame_size, 1);
}

#[test]
fn unplaced_label_is_rejected() {
    let mut emitter = Emitter::new(CompilerConfig::default());
    let nowhere = emitter.new_label();
    emitter.jump(nowhere);
    let err = emitter.finish(CompiledCode::default()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnresolvedLabel(_)));
}

#[test]
fn long_jumps_widen() {
    let mut emitter = Emitter::new(CompilerConfig::default());
    let end = emitter.new_label();
    emitter.emit(Opcode::LoadBool(true));
    emitter.branch_false(end);
    for _ in 0..600 {
        emitter.emit(Opcode::Nop);
    }
    emitter.place(end);
    emitter.emit(Opcode::ReturnUnit);
    let code = emitter.finish(CompiledCode::default()).unwrap();
    let decoded = decode_all(&code.bytes).unwrap();
    let (pc, branch) = decoded[1];
    let Opcode::BranchFalse(dist) = branch else {
        panic!("expected a branch, got {branch}");
    };
    assert_eq!(dist, 600);
    let next = decoded[2].0;
    assert!(next - pc > 1);
}

// =============================================================================
// Compiler
// =============================================================================

#[test]
fn function_increment() {
    let tree = TypedNode::let_in(
        "f",
        TypedNode::fun(
            &["x"],
            TypedNode::binary(BinaryOp::Add, TypedNode::int_ident("x"), TypedNode::int(1)),
        ),
        TypedNode::app(TypedNode::ident("f"), vec![TypedNode::int(5)]),
    );
    let code = compile_main(&tree);
    let Value::Closure(f) = &code.consts[0] else {
        panic!("expected a clean closure constant");
    };
    assert_eq!(
        ops(&f.code),
        vec![Opcode::LoadLocal(0), Opcode::Add1, Opcode::Return]
    );
    assert_eq!(f.code.num_args, 1);
}

#[test]
fn globals_are_addressed_by_name() {
    let tree = TypedNode::program(vec![
        TypedNode::decl("g", TypedNode::int(1)),
        TypedNode::ident("g"),
    ]);
    let code = compile_main(&tree);
    assert!(ops(&code).contains(&Opcode::StorePopGlobal(0)));
    assert!(ops(&code).contains(&Opcode::LoadGlobal(0)));
    assert_eq!(code.consts[0], Value::from("g"));
}

#[test]
fn pervasives_compile_to_value_loads() {
    let tree = TypedNode::app(TypedNode::ident("string_of_int"), vec![TypedNode::int(1)]);
    let code = compile_main(&tree);
    assert!(matches!(ops(&code)[0], Opcode::LoadValue(_)));
    assert!(ops(&code).contains(&Opcode::Apply(1)));
}

#[test]
fn unbound_identifier_carries_its_position() {
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    let tree = TypedNode::ident("missing").at(trompe_language::Span::new(4, 9));
    let err = compile(&tree, &registry, &module).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::UnboundIdentifier { ref name, line: 4, column: 9 } if name == "missing"
    ));
}

#[test]
fn disassembly_lists_nested_functions() {
    let tree = TypedNode::let_in(
        "f",
        TypedNode::named_fun("f", &["x"], TypedNode::ident("x")),
        TypedNode::app(TypedNode::ident("f"), vec![TypedNode::int(1)]),
    );
    let text = disassemble(&compile_main(&tree));
    assert!(text.starts_with("code <main>"));
    assert!(text.contains("  code f (args 1"));
}
