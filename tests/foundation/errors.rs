//! Integration tests for Error types
//!
//! Tests error construction, display, context, and error kinds.

use trompe_foundation::{Error, ErrorContext, ErrorKind, Type};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_type_mismatch() {
    let err = Error::type_mismatch(Type::Int, Type::String);
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    let msg = format!("{err}");
    assert!(msg.contains("int") && msg.contains("string"));
}

#[test]
fn error_unbound_identifier() {
    let err = Error::unbound_identifier("foo", 2, 5);
    assert!(matches!(err.kind, ErrorKind::UnboundIdentifier { .. }));
    assert!(format!("{err}").contains("`foo` at 2:5"));
}

#[test]
fn error_attribute_not_found() {
    let err = Error::attribute_not_found("Main", "x");
    assert_eq!(format!("{err}"), "attribute not found: x in module Main");
}

#[test]
fn encoding_errors_are_internal() {
    assert!(Error::illegal_backward_branch(10, 2).is_internal());
    assert!(Error::operand_out_of_range("local slot", 70_000).is_internal());
    assert!(!Error::arity_mismatch(1, 2).is_internal());
    assert!(!Error::primitive("failwith", "boom").is_internal());
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn context_keeps_the_innermost_location() {
    let err = Error::new(ErrorKind::DivisionByZero)
        .or_context(|| ErrorContext::new().with_source("inner").with_line(3))
        .or_context(|| ErrorContext::new().with_source("outer"));
    let context = err.context.unwrap();
    assert_eq!(context.source.as_deref(), Some("inner"));
    assert_eq!(context.line, Some(3));
}

#[test]
fn context_display_lists_frames() {
    let context = ErrorContext::new()
        .with_source("f")
        .with_position(4, 2)
        .with_frame("f")
        .with_frame("<main>");
    let text = context.to_string();
    assert!(text.starts_with("at f:4:2"));
    assert!(text.contains("  in f\n"));
    assert!(text.contains("  in <main>\n"));
}
