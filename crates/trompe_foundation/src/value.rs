//! Runtime values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::code::CompiledCode;
use crate::collections::LtList;
use crate::name_path::NamePath;
use crate::types::Type;

/// A mutable heap array, shared by reference.
///
/// Backs both language arrays and the per-scope arrays holding shared
/// variables.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Native function signature.
pub type NativeFn = fn(&[Value]) -> crate::Result<Value>;

/// Core value type.
///
/// Cloning is O(1): composite variants are reference counted.
#[derive(Clone)]
pub enum Value {
    /// The unit value.
    Unit,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Unicode scalar.
    Char(char),
    /// Immutable string.
    String(Arc<str>),
    /// Persistent list.
    List(LtList<Value>),
    /// Immutable tuple.
    Tuple(Rc<[Value]>),
    /// Mutable array.
    Array(ArrayRef),
    /// Bytecode closure.
    Closure(Rc<BlockClosure>),
    /// Native function.
    Primitive(Primitive),
    /// Compiled code (constant pool entry of a closure literal).
    Code(Rc<CompiledCode>),
    /// Module field path (constant pool entry of a module reference).
    Path(NamePath),
}

/// How a closure reaches the variables of its enclosing scopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClosureKind {
    /// No outer dependency; a single closure value can live in the constant pool.
    Clean,
    /// Captures immutable outer values only.
    Copying,
    /// Owns a shared array or reaches outer shared arrays.
    Full,
    /// Both copied values and shared arrays.
    FullCopying,
}

impl ClosureKind {
    /// Classifies a scope by its two kinds of outer dependency.
    #[must_use]
    pub const fn classify(copying: bool, full: bool) -> Self {
        match (copying, full) {
            (false, false) => Self::Clean,
            (true, false) => Self::Copying,
            (false, true) => Self::Full,
            (true, true) => Self::FullCopying,
        }
    }

    /// Returns true for closures that carry a context.
    #[must_use]
    pub const fn is_full(self) -> bool {
        matches!(self, Self::Full | Self::FullCopying)
    }

    /// Returns true for closures that carry copied values.
    #[must_use]
    pub const fn is_copying(self) -> bool {
        matches!(self, Self::Copying | Self::FullCopying)
    }
}

impl fmt::Display for ClosureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Clean => "clean",
            Self::Copying => "copying",
            Self::Full => "full",
            Self::FullCopying => "full-copying",
        };
        write!(f, "{name}")
    }
}

/// A closure: code plus whatever it captured at creation.
pub struct BlockClosure {
    /// The function body.
    pub code: Rc<CompiledCode>,
    /// Values copied in at creation, in capture order.
    pub copied: Vec<Value>,
    /// Shared arrays of enclosing scopes, present for full closures.
    pub context: Option<Vec<ArrayRef>>,
}

impl BlockClosure {
    /// Creates a closure with no captures.
    #[must_use]
    pub fn clean(code: Rc<CompiledCode>) -> Self {
        Self {
            code,
            copied: Vec::new(),
            context: None,
        }
    }

    /// Returns the construction class of this closure.
    #[must_use]
    pub fn kind(&self) -> ClosureKind {
        ClosureKind::classify(!self.copied.is_empty(), self.context.is_some())
    }
}

/// A native function with its declared arity.
#[derive(Clone)]
pub struct Primitive {
    /// Name, as registered in the primitive table.
    pub name: &'static str,
    /// Declared arity.
    pub arity: usize,
    /// Function pointer.
    pub func: NativeFn,
}

impl Primitive {
    /// Invokes the native function.
    ///
    /// # Errors
    ///
    /// Returns an arity mismatch if `args` has the wrong length, or whatever
    /// the native function raises.
    pub fn call(&self, args: &[Value]) -> crate::Result<Value> {
        if args.len() != self.arity {
            return Err(crate::Error::arity_mismatch(self.arity, args.len()));
        }
        (self.func)(args)
    }
}

impl Value {
    /// Creates a list from values.
    #[must_use]
    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Self::List(values.into_iter().collect())
    }

    /// Creates a tuple from values.
    #[must_use]
    pub fn tuple(values: Vec<Value>) -> Self {
        Self::Tuple(values.into())
    }

    /// Creates a fresh mutable array.
    #[must_use]
    pub fn array(values: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(values)))
    }

    /// Returns the type of this value.
    #[must_use]
    pub fn value_type(&self) -> Type {
        match self {
            Self::Unit => Type::Unit,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Char(_) => Type::Char,
            Self::String(_) => Type::String,
            Self::List(_) => Type::list(Type::Any),
            Self::Tuple(items) => Type::Tuple(items.iter().map(Self::value_type).collect()),
            Self::Array(_) => Type::array(Type::Any),
            Self::Closure(c) => {
                Type::func(vec![Type::Any; c.code.num_args], Type::Any)
            }
            Self::Primitive(p) => Type::func(vec![Type::Any; p.arity], Type::Any),
            Self::Code(_) | Self::Path(_) => Type::Any,
        }
    }

    /// Returns true if this value is unit.
    #[must_use]
    pub const fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    /// Attempts to extract a boolean value.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract a closure.
    #[must_use]
    pub const fn as_closure(&self) -> Option<&Rc<BlockClosure>> {
        match self {
            Self::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// Attempts to extract an array.
    #[must_use]
    pub const fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Primitive(a), Self::Primitive(b)) => a.name == b.name,
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            (Self::Path(a), Self::Path(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "Unit"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Float(n) => write!(f, "Float({n})"),
            Self::Char(c) => write!(f, "Char({c:?})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::List(l) => write!(f, "List({l:?})"),
            Self::Tuple(t) => write!(f, "Tuple({:?})", &t[..]),
            Self::Array(a) => write!(f, "Array({:?})", a.borrow()),
            Self::Closure(c) => write!(f, "Closure({}, {})", c.code.name, c.kind()),
            Self::Primitive(p) => write!(f, "Primitive({})", p.name),
            Self::Code(c) => write!(f, "Code({})", c.name),
            Self::Path(p) => write!(f, "Path({p})"),
        }
    }
}

fn write_seq(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = Value>,
    sep: &str,
    close: &str,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "{close}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{n:.1}")
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Char(c) => write!(f, "{c:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(l) => write_seq(f, "[", l.iter().cloned(), "; ", "]"),
            Self::Tuple(t) => write_seq(f, "(", t.iter().cloned(), ", ", ")"),
            Self::Array(a) => write_seq(f, "[|", a.borrow().iter().cloned(), "; ", "|]"),
            Self::Closure(c) => write!(f, "<fun {}>", c.code.name),
            Self::Primitive(p) => write!(f, "<primitive {}>", p.name),
            Self::Code(c) => write!(f, "<code {}>", c.name),
            Self::Path(p) => write!(f, "{p}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Self::Char(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<NamePath> for Value {
    fn from(path: NamePath) -> Self {
        Self::Path(path)
    }
}
