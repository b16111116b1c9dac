//! Property tests for the bytecode encoding and the VM

use proptest::prelude::*;
use trompe_foundation::{ErrorKind, Value};
use trompe_language::opcode::decode_all;
use trompe_language::typed_tree::{BinaryOp, Pattern};
use trompe_language::{
    Compiler, CompilerConfig, ModuleContext, ModuleRegistry, Opcode, TypedNode, Vm, VmConfig,
};

// =============================================================================
// Encoding
// =============================================================================

fn opcode_strategy() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Nop),
        Just(Opcode::LoadUnit),
        any::<bool>().prop_map(Opcode::LoadBool),
        any::<i64>().prop_map(Opcode::LoadInt),
        any::<u16>().prop_map(Opcode::LoadLocal),
        any::<u16>().prop_map(Opcode::LoadGlobal),
        any::<u16>().prop_map(Opcode::LoadConst),
        any::<u16>().prop_map(Opcode::StorePopLocal),
        (any::<u8>(), any::<u8>())
            .prop_map(|(array, elt)| Opcode::LoadLocalIndirect { array, elt }),
        (any::<u8>(), any::<u8>())
            .prop_map(|(array, elt)| Opcode::StorePopLocalIndirect { array, elt }),
        any::<i32>().prop_map(Opcode::Jump),
        any::<i32>().prop_map(Opcode::BranchFalse),
        any::<i32>().prop_map(Opcode::BranchNe),
        any::<u8>().prop_map(Opcode::Apply),
        (any::<u8>(), any::<u8>())
            .prop_map(|(local, arity)| Opcode::ApplyDirect { local, arity }),
        (any::<u8>(), any::<u8>())
            .prop_map(|(index, count)| Opcode::CopyingBlock { index, count }),
        (any::<u8>(), any::<u8>()).prop_map(|(index, arity)| Opcode::Primitive { index, arity }),
        any::<u8>().prop_map(Opcode::ConsTuple),
        Just(Opcode::Add),
        Just(Opcode::Return),
    ]
}

proptest! {
    #[test]
    fn encoded_opcodes_decode_to_themselves(
        ops in prop::collection::vec(opcode_strategy(), 1..40)
    ) {
        let mut bytes = Vec::new();
        let mut expected = Vec::new();
        for op in ops {
            let Ok(encoding) = op.encode() else { continue };
            expected.push((bytes.len(), op));
            bytes.extend_from_slice(encoding.as_slice());
        }
        prop_assume!(!expected.is_empty());

        let decoded = decode_all(&bytes).unwrap();
        prop_assert_eq!(&decoded, &expected);

        let mut again = Vec::new();
        for (_, op) in &decoded {
            again.extend_from_slice(op.encode().unwrap().as_slice());
        }
        prop_assert_eq!(again, bytes);
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// A small integer expression with a direct evaluator to compare against.
#[derive(Clone, Debug)]
enum Expr {
    Lit(i64),
    Bin(BinaryOp, Box<Expr>, Box<Expr>),
    IfLt(Box<Expr>, Box<Expr>, Box<Expr>, Box<Expr>),
    Let(Box<Expr>, Box<Expr>),
    Apply(Box<Expr>),
    First(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self) -> Option<i64> {
        match self {
            Self::Lit(n) => Some(*n),
            Self::Bin(op, a, b) => {
                let (a, b) = (a.eval()?, b.eval()?);
                match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    _ => a.checked_mul(b),
                }
            }
            Self::IfLt(a, b, then, otherwise) => {
                if a.eval()? < b.eval()? {
                    then.eval()
                } else {
                    otherwise.eval()
                }
            }
            Self::Let(value, body) => value.eval()?.checked_add(body.eval()?),
            Self::Apply(arg) => arg.eval(),
            Self::First(a, b) => {
                let first = a.eval()?;
                b.eval()?;
                Some(first)
            }
        }
    }

    fn tree(&self) -> TypedNode {
        match self {
            Self::Lit(n) => TypedNode::int(*n),
            Self::Bin(op, a, b) => TypedNode::binary(*op, a.tree(), b.tree()),
            Self::IfLt(a, b, then, otherwise) => TypedNode::if_else(
                TypedNode::binary(BinaryOp::Lt, a.tree(), b.tree()),
                then.tree(),
                otherwise.tree(),
            ),
            Self::Let(value, body) => TypedNode::let_in(
                "v",
                value.tree(),
                TypedNode::binary(BinaryOp::Add, TypedNode::int_ident("v"), body.tree()),
            ),
            Self::Apply(arg) => TypedNode::app(
                TypedNode::fun(&["x"], TypedNode::ident("x")),
                vec![arg.tree()],
            ),
            Self::First(a, b) => TypedNode::case(
                TypedNode::tuple(vec![a.tree(), b.tree()]),
                vec![(
                    Pattern::tuple(vec![Pattern::ident("x"), Pattern::wildcard()]),
                    TypedNode::ident("x"),
                )],
            ),
        }
    }
}

fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = (-1000i64..1000).prop_map(Expr::Lit);
    leaf.prop_recursive(5, 48, 4, |inner| {
        let op = prop_oneof![Just(BinaryOp::Add), Just(BinaryOp::Sub), Just(BinaryOp::Mul)];
        prop_oneof![
            (op, inner.clone(), inner.clone())
                .prop_map(|(op, a, b)| Expr::Bin(op, Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone(), inner.clone(), inner.clone()).prop_map(
                |(a, b, t, e)| Expr::IfLt(Box::new(a), Box::new(b), Box::new(t), Box::new(e))
            ),
            (inner.clone(), inner.clone()).prop_map(|(v, b)| Expr::Let(Box::new(v), Box::new(b))),
            inner.clone().prop_map(|a| Expr::Apply(Box::new(a))),
            (inner.clone(), inner).prop_map(|(a, b)| Expr::First(Box::new(a), Box::new(b))),
        ]
    })
}

fn run_checked(tree: &TypedNode) -> (trompe_foundation::Result<Value>, usize) {
    let registry = ModuleRegistry::with_pervasives();
    let module = registry.define_module(&["Main"]);
    let code = Compiler::new(&registry, &module, CompilerConfig::default())
        .compile(tree)
        .unwrap();
    let mut vm = Vm::with_config(VmConfig::checked());
    let result = vm.execute(std::rc::Rc::new(code), &ModuleContext::new(&registry, &module));
    (result, vm.stack_depth())
}

proptest! {
    #[test]
    fn compiled_expressions_agree_with_direct_evaluation(expr in expr_strategy()) {
        let (result, depth) = run_checked(&expr.tree());
        match expr.eval() {
            Some(n) => {
                prop_assert_eq!(result.unwrap(), Value::Int(n));
                prop_assert_eq!(depth, 0);
            }
            None => {
                let err = result.unwrap_err();
                let is_primitive = matches!(err.kind, ErrorKind::Primitive { .. });
                prop_assert!(is_primitive);
                prop_assert!(!err.is_internal());
            }
        }
    }

    #[test]
    fn unoptimized_code_computes_the_same(expr in expr_strategy()) {
        prop_assume!(expr.eval().is_some());
        let registry = ModuleRegistry::with_pervasives();
        let module = registry.define_module(&["Main"]);
        let code = Compiler::new(&registry, &module, CompilerConfig::unoptimized())
            .compile(&expr.tree())
            .unwrap();
        let value = Vm::with_config(VmConfig::checked())
            .execute(std::rc::Rc::new(code), &ModuleContext::new(&registry, &module))
            .unwrap();
        prop_assert_eq!(value, Value::Int(expr.eval().unwrap()));
    }

    #[test]
    fn closure_increments_are_all_visible(count in 0usize..40) {
        // let x = 0 in let incr = fun () -> x := x + 1 in incr (); ...; x
        let incr = TypedNode::fun(
            &[],
            TypedNode::assign(
                "x",
                TypedNode::binary(BinaryOp::Add, TypedNode::ident("x"), TypedNode::int(1)),
            ),
        );
        let mut body: Vec<TypedNode> = (0..count)
            .map(|_| TypedNode::app(TypedNode::ident("incr"), Vec::new()))
            .collect();
        body.push(TypedNode::ident("x"));
        let tree = TypedNode::let_in(
            "x",
            TypedNode::int(0),
            TypedNode::let_in("incr", incr, TypedNode::seq(body)),
        );
        let (result, _) = run_checked(&tree);
        prop_assert_eq!(result.unwrap(), Value::Int(i64::try_from(count).unwrap()));
    }
}
