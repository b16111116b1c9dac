//! Object file integration tests

use std::rc::Rc;

use trompe_foundation::{ErrorKind, Value};
use trompe_language::TypedNode;
use trompe_language::typed_tree::BinaryOp;
use trompe_runtime::{ObjectFile, Session, SessionConfig};

fn library() -> TypedNode {
    TypedNode::program(vec![
        TypedNode::decl("base", TypedNode::int(100)),
        TypedNode::decl(
            "offset",
            TypedNode::fun(
                &["x"],
                TypedNode::binary(
                    BinaryOp::Add,
                    TypedNode::int_ident("x"),
                    TypedNode::ident("base"),
                ),
            ),
        ),
        TypedNode::decl("greeting", TypedNode::string("hello")),
    ])
}

fn compiled_library(module: &str) -> ObjectFile {
    let mut session = Session::with_config(SessionConfig::default().with_module_name(module));
    let code = Rc::new(session.compile(&library()).unwrap());
    session.execute(Rc::clone(&code)).unwrap();
    ObjectFile::from_unit(&code, session.module()).unwrap()
}

#[test]
fn object_records_module_and_sorted_attributes() {
    let object = compiled_library("Lib");
    assert_eq!(object.module, vec!["Lib".to_string()]);
    let names: Vec<&str> = object.attributes.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["base", "greeting", "offset"]);
    assert!(!object.codes.is_empty());
}

#[test]
fn loading_an_object_defines_its_module() {
    let object = compiled_library("Lib");
    let bytes = object.to_bytes().unwrap();

    let mut session = Session::new();
    session.load_object(&ObjectFile::from_bytes(&bytes).unwrap()).unwrap();
    let lib = session.registry().module(&["Lib".to_string()]).unwrap();
    assert_eq!(lib.find_field_value("base"), Some(Value::Int(100)));
    assert!(session.global("base").is_none());
}

#[test]
fn later_units_call_loaded_functions() {
    let object = compiled_library("Lib");
    let mut session = Session::with_config(SessionConfig::checked().with_module_name("Lib"));
    session.load_object(&object).unwrap();

    let value = session
        .eval(&TypedNode::app(TypedNode::ident("offset"), vec![TypedNode::int(5)]))
        .unwrap();
    assert_eq!(value, Value::Int(105));
}

#[test]
fn compile_to_file_then_load() {
    let path = std::env::temp_dir().join("trompe_runtime_integration.tro");
    let mut writer = Session::with_config(SessionConfig::default().with_module_name("Saved"));
    writer.compile_to_file(&library(), &path).unwrap();

    let object = ObjectFile::load_from_file(&path).unwrap();
    let mut reader = Session::new();
    reader.load_object(&object).unwrap();
    let saved = reader.registry().module(&["Saved".to_string()]).unwrap();
    assert_eq!(saved.find_field_value("greeting"), Some(Value::String("hello".into())));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("trompe_no_such_object.tro");
    let err = ObjectFile::load_from_file(&path).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IoError(_)));
}

#[test]
fn truncated_bytes_are_rejected() {
    let bytes = compiled_library("Lib").to_bytes().unwrap();
    let err = ObjectFile::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SerializationError(_)));
}
