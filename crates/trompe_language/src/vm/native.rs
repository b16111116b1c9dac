//! Native operations for the VM.
//!
//! Arithmetic and comparison helpers used by the dispatch loop, and the
//! pervasive primitives registered by [`pervasives`].

#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::cmp::Ordering;

use trompe_foundation::{Error, ErrorKind, Primitive, Result, Type, Value};

use crate::compiler::MATCH_FAILURE;

fn mismatch(expected: Type, actual: &Value) -> Error {
    Error::type_mismatch(expected, actual.value_type())
}

// =============================================================================
// Arithmetic and Comparison Helpers
// =============================================================================

/// Extracts an integer operand.
pub(crate) fn expect_int(value: &Value) -> Result<i64> {
    value.as_int().ok_or_else(|| mismatch(Type::Int, value))
}

/// Extracts a boolean operand.
pub(crate) fn expect_bool(value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| mismatch(Type::Bool, value))
}

fn overflow(op: &str) -> Error {
    Error::primitive(op, "integer overflow")
}

/// Adds two values.
pub(crate) fn add_values(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            x.checked_add(*y).map(Value::Int).ok_or_else(|| overflow("+"))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 + y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x + *y as f64)),
        _ => Err(mismatch(Type::Int, a)),
    }
}

/// Subtracts two values.
pub(crate) fn sub_values(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            x.checked_sub(*y).map(Value::Int).ok_or_else(|| overflow("-"))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x - y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 - y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x - *y as f64)),
        _ => Err(mismatch(Type::Int, a)),
    }
}

/// Multiplies two values.
pub(crate) fn mul_values(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            x.checked_mul(*y).map(Value::Int).ok_or_else(|| overflow("*"))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x * y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 * y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x * *y as f64)),
        _ => Err(mismatch(Type::Int, a)),
    }
}

/// Divides two values; integer division truncates.
pub(crate) fn div_values(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => Err(Error::new(ErrorKind::DivisionByZero)),
        (Value::Int(x), Value::Int(y)) => {
            x.checked_div(*y).map(Value::Int).ok_or_else(|| overflow("/"))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x / y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 / y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x / *y as f64)),
        _ => Err(mismatch(Type::Int, a)),
    }
}

/// Integer remainder.
pub(crate) fn mod_values(a: &Value, b: &Value) -> Result<Value> {
    let (x, y) = (expect_int(a)?, expect_int(b)?);
    if y == 0 {
        return Err(Error::new(ErrorKind::DivisionByZero));
    }
    x.checked_rem(y).map(Value::Int).ok_or_else(|| overflow("mod"))
}

/// Exponentiation; a negative integer exponent is an error.
pub(crate) fn pow_values(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let exp = u32::try_from(*y).map_err(|_| Error::primitive("**", "negative exponent"))?;
            x.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow("**"))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x.powf(*y))),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x.powi(*y as i32))),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float((*x as f64).powf(*y))),
        _ => Err(mismatch(Type::Int, a)),
    }
}

/// Negates a number.
pub(crate) fn neg_value(a: &Value) -> Result<Value> {
    match a {
        Value::Int(x) => x.checked_neg().map(Value::Int).ok_or_else(|| overflow("~-")),
        Value::Float(x) => Ok(Value::Float(-x)),
        _ => Err(mismatch(Type::Int, a)),
    }
}

/// Applies an integer bit operation.
pub(crate) fn int_op(a: &Value, b: &Value, op: fn(i64, i64) -> i64) -> Result<Value> {
    Ok(Value::Int(op(expect_int(a)?, expect_int(b)?)))
}

/// Logical shift right.
pub(crate) fn lsr(x: i64, y: i64) -> i64 {
    ((x as u64).wrapping_shr(y as u32)) as i64
}

/// Shift left.
pub(crate) fn lsl(x: i64, y: i64) -> i64 {
    x.wrapping_shl(y as u32)
}

/// Orders two values of the same scalar or string type.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Result<Ordering> {
    let ord = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Char(x), Value::Char(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => return Err(mismatch(a.value_type(), b)),
    };
    Ok(ord)
}

// =============================================================================
// Pervasives
// =============================================================================

fn array_arg(name: &str, value: &Value) -> Result<trompe_foundation::ArrayRef> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| Error::primitive(name, format!("expected an array, got {value}")))
}

fn index_arg(len: usize, value: &Value) -> Result<usize> {
    let index = expect_int(value)?;
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or(Error::new(ErrorKind::IndexOutOfBounds { index, length: len }))
}

fn array_make(args: &[Value]) -> Result<Value> {
    let len = expect_int(&args[0])?;
    let len = usize::try_from(len)
        .map_err(|_| Error::primitive("array_make", format!("negative length {len}")))?;
    Ok(Value::array(vec![args[1].clone(); len]))
}

fn array_get(args: &[Value]) -> Result<Value> {
    let array = array_arg("array_get", &args[0])?;
    let items = array.borrow();
    let index = index_arg(items.len(), &args[1])?;
    Ok(items[index].clone())
}

fn array_set(args: &[Value]) -> Result<Value> {
    let array = array_arg("array_set", &args[0])?;
    let mut items = array.borrow_mut();
    let index = index_arg(items.len(), &args[1])?;
    items[index] = args[2].clone();
    Ok(Value::Unit)
}

fn array_length(args: &[Value]) -> Result<Value> {
    let array = array_arg("array_length", &args[0])?;
    let len = array.borrow().len();
    Ok(Value::Int(len as i64))
}

fn list_length(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::List(list) => Ok(Value::Int(list.len() as i64)),
        other => Err(mismatch(Type::list(Type::Any), other)),
    }
}

fn string_of_int(args: &[Value]) -> Result<Value> {
    Ok(Value::from(expect_int(&args[0])?.to_string()))
}

fn string_concat(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::String(a), Value::String(b)) => Ok(Value::from(format!("{a}{b}"))),
        (Value::String(_), other) | (other, _) => Err(mismatch(Type::String, other)),
    }
}

fn failwith(args: &[Value]) -> Result<Value> {
    let message = args[0].as_str().map_or_else(|| args[0].to_string(), str::to_string);
    Err(Error::primitive("failwith", message))
}

fn match_failure(args: &[Value]) -> Result<Value> {
    Err(Error::new(ErrorKind::MatchFailure(args[0].to_string())))
}

/// The builtin primitives.
#[must_use]
pub fn pervasives() -> Vec<Primitive> {
    vec![
        Primitive {
            name: "array_make",
            arity: 2,
            func: array_make,
        },
        Primitive {
            name: "array_get",
            arity: 2,
            func: array_get,
        },
        Primitive {
            name: "array_set",
            arity: 3,
            func: array_set,
        },
        Primitive {
            name: "array_length",
            arity: 1,
            func: array_length,
        },
        Primitive {
            name: "list_length",
            arity: 1,
            func: list_length,
        },
        Primitive {
            name: "string_of_int",
            arity: 1,
            func: string_of_int,
        },
        Primitive {
            name: "string_concat",
            arity: 2,
            func: string_concat,
        },
        Primitive {
            name: "failwith",
            arity: 1,
            func: failwith,
        },
        Primitive {
            name: MATCH_FAILURE,
            arity: 1,
            func: match_failure,
        },
    ]
}
