//! Integration tests for Value types
//!
//! Tests construction, equality, display, and closure classification.

use std::rc::Rc;

use trompe_foundation::{BlockClosure, ClosureKind, CompiledCode, NamePath, Type, Value};

// =============================================================================
// Value Construction
// =============================================================================

#[test]
fn scalar_accessors() {
    assert_eq!(Value::Bool(true).as_bool(), Some(true));
    assert_eq!(Value::Int(42).as_int(), Some(42));
    assert_eq!(Value::Int(42).as_bool(), None);
    assert_eq!(Value::from("hello").as_str(), Some("hello"));
    assert!(Value::Unit.is_unit());
}

#[test]
fn from_conversions() {
    assert_eq!(Value::from(7_i32), Value::Int(7));
    assert_eq!(Value::from(1.5), Value::Float(1.5));
    assert_eq!(Value::from('x'), Value::Char('x'));
    assert_eq!(Value::from(String::from("s")), Value::from("s"));
    assert!(matches!(
        Value::from(NamePath::bare("f")),
        Value::Path(p) if p.name == "f"
    ));
}

#[test]
fn arrays_are_shared_by_reference() {
    let array = Value::array(vec![Value::Int(1)]);
    let alias = array.clone();
    alias.as_array().unwrap().borrow_mut()[0] = Value::Int(2);
    assert_eq!(array.as_array().unwrap().borrow()[0], Value::Int(2));
}

#[test]
fn structural_equality() {
    assert_eq!(
        Value::tuple(vec![Value::Int(1), Value::list(vec![Value::Unit])]),
        Value::tuple(vec![Value::Int(1), Value::list(vec![Value::Unit])])
    );
    assert_ne!(Value::Int(1), Value::Float(1.0));
}

// =============================================================================
// Display and Types
// =============================================================================

#[test]
fn display() {
    assert_eq!(Value::Unit.to_string(), "()");
    assert_eq!(Value::from("a").to_string(), "\"a\"");
    assert_eq!(
        Value::list(vec![Value::Int(1), Value::Int(2)]).to_string(),
        "[1; 2]"
    );
    assert_eq!(
        Value::tuple(vec![Value::Int(1), Value::Bool(false)]).to_string(),
        "(1, false)"
    );
}

#[test]
fn value_types() {
    assert_eq!(Value::Int(1).value_type(), Type::Int);
    assert_eq!(
        Value::list(Vec::new()).value_type(),
        Type::list(Type::Any)
    );
    let code = Rc::new(CompiledCode {
        num_args: 2,
        ..CompiledCode::default()
    });
    let closure = Value::Closure(Rc::new(BlockClosure::clean(code)));
    assert_eq!(
        closure.value_type(),
        Type::func(vec![Type::Any, Type::Any], Type::Any)
    );
}

// =============================================================================
// Closures
// =============================================================================

#[test]
fn closure_kinds() {
    let code = Rc::new(CompiledCode::default());
    assert_eq!(BlockClosure::clean(Rc::clone(&code)).kind(), ClosureKind::Clean);

    let copying = BlockClosure {
        code: Rc::clone(&code),
        copied: vec![Value::Int(1)],
        context: None,
    };
    assert_eq!(copying.kind(), ClosureKind::Copying);

    let full_copying = BlockClosure {
        code,
        copied: vec![Value::Int(1)],
        context: Some(Vec::new()),
    };
    assert_eq!(full_copying.kind(), ClosureKind::FullCopying);
    assert!(full_copying.kind().is_full());
    assert!(full_copying.kind().is_copying());
    assert!(!ClosureKind::Full.is_copying());
}
