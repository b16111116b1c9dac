//! The typed tree consumed by the back end.
//!
//! The type checker hands over a tree in which every node carries its
//! resolved [`Type`]. The analyzer and compiler never re-check types; they only
//! consult them to pick specialized instructions.
//!
//! The constructor helpers at the bottom of this file build nodes with an
//! unknown span; front ends attach real positions with [`TypedNode::at`].

use trompe_foundation::{NamePath, Type};

use crate::span::Span;

/// A typed tree node.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedNode {
    /// What the node is.
    pub kind: NodeKind,
    /// Where it came from.
    pub span: Span,
    /// Its resolved type.
    pub ty: Type,
}

/// Literal constants.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// `()`
    Unit,
    /// `true` or `false`
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Character literal.
    Char(char),
    /// String literal.
    String(String),
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Integer negation.
    Neg,
    /// Boolean negation.
    Not,
    /// Bitwise complement.
    Bnot,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `mod`
    Mod,
    /// `**`
    Pow,
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `lsl`
    Lshift,
    /// `lsr`
    Rshift,
    /// `land`
    Band,
    /// `lor`
    Bor,
    /// `lxor`
    Bxor,
    /// Short-circuit `&&`
    And,
    /// Short-circuit `||`
    Or,
}

impl BinaryOp {
    /// Returns true for the six comparison operators.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }
}

/// Node kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// A literal constant.
    Literal(Literal),
    /// A variable reference.
    Ident(String),
    /// A qualified module field such as `List.length`.
    ValuePath(NamePath),
    /// `(a, b, ...)`
    Tuple(Vec<TypedNode>),
    /// `[a; b; ...]`
    List(Vec<TypedNode>),
    /// `[|a; b; ...|]`
    Array(Vec<TypedNode>),
    /// `head :: tail`
    Cons(Box<TypedNode>, Box<TypedNode>),
    /// Unary operator application.
    Unary(UnaryOp, Box<TypedNode>),
    /// Binary operator application.
    Binary(BinaryOp, Box<TypedNode>, Box<TypedNode>),
    /// Function application.
    App {
        /// The callee.
        callee: Box<TypedNode>,
        /// Arguments, in order.
        args: Vec<TypedNode>,
    },
    /// Direct call of a registered primitive.
    Primitive {
        /// Primitive table name.
        name: String,
        /// Arguments, in order.
        args: Vec<TypedNode>,
    },
    /// Function literal.
    Fun(FunDef),
    /// Binding group, `let [rec] p = e and ... [in body]`.
    Let(LetGroup),
    /// Conditional.
    If {
        /// Condition.
        cond: Box<TypedNode>,
        /// Taken when the condition holds.
        then: Box<TypedNode>,
        /// Taken otherwise; unit when absent.
        otherwise: Option<Box<TypedNode>>,
    },
    /// Pattern match.
    Case {
        /// Value being matched.
        scrutinee: Box<TypedNode>,
        /// Arms, tried in order.
        arms: Vec<CaseArm>,
    },
    /// `a; b; ...`, evaluating to the last expression.
    Seq(Vec<TypedNode>),
    /// `x := e`
    Assign {
        /// Target variable.
        name: String,
        /// New value.
        value: Box<TypedNode>,
    },
    /// `for var = start to|downto end do body done`
    For {
        /// Loop variable.
        var: String,
        /// Initial value.
        start: Box<TypedNode>,
        /// Final value (inclusive).
        end: Box<TypedNode>,
        /// Counts down when true.
        down: bool,
        /// Loop body.
        body: Box<TypedNode>,
    },
    /// `while cond do body done`
    While {
        /// Loop condition.
        cond: Box<TypedNode>,
        /// Loop body.
        body: Box<TypedNode>,
    },
    /// A compilation unit.
    Program(Vec<TypedNode>),
}

/// A function literal.
#[derive(Clone, Debug, PartialEq)]
pub struct FunDef {
    /// Name for diagnostics, if the function was bound to one.
    pub name: Option<String>,
    /// Parameter names.
    pub params: Vec<String>,
    /// Body.
    pub body: Box<TypedNode>,
}

/// A binding group.
#[derive(Clone, Debug, PartialEq)]
pub struct LetGroup {
    /// `let rec` when true.
    pub rec: bool,
    /// The bindings, in source order.
    pub bindings: Vec<Binding>,
    /// The `in` body; a top-level declaration has none.
    pub body: Option<Box<TypedNode>>,
}

/// One `pattern = value` binding.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    /// What the value is destructured into.
    pub pattern: Pattern,
    /// Bound value.
    pub value: TypedNode,
}

/// One arm of a pattern match.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseArm {
    /// Pattern.
    pub pattern: Pattern,
    /// Optional `when` guard.
    pub guard: Option<TypedNode>,
    /// Arm body.
    pub body: TypedNode,
}

/// A pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    /// What the pattern matches.
    pub kind: PatternKind,
    /// Where it came from.
    pub span: Span,
}

/// Pattern kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum PatternKind {
    /// `_`
    Wildcard,
    /// Binds the matched value to a name.
    Ident(String),
    /// Matches an equal constant.
    Literal(Literal),
    /// Matches a tuple of the same size.
    Tuple(Vec<Pattern>),
    /// Matches the empty list.
    Nil,
    /// Matches a non-empty list.
    Cons(Box<Pattern>, Box<Pattern>),
}

impl Pattern {
    /// Creates a pattern with an unknown span.
    #[must_use]
    pub fn new(kind: PatternKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }

    /// `_`
    #[must_use]
    pub fn wildcard() -> Self {
        Self::new(PatternKind::Wildcard)
    }

    /// A name pattern.
    #[must_use]
    pub fn ident(name: &str) -> Self {
        Self::new(PatternKind::Ident(name.to_string()))
    }

    /// An integer constant pattern.
    #[must_use]
    pub fn int(n: i64) -> Self {
        Self::new(PatternKind::Literal(Literal::Int(n)))
    }

    /// A tuple pattern.
    #[must_use]
    pub fn tuple(items: Vec<Pattern>) -> Self {
        Self::new(PatternKind::Tuple(items))
    }

    /// `[]`
    #[must_use]
    pub fn nil() -> Self {
        Self::new(PatternKind::Nil)
    }

    /// `head :: tail`
    #[must_use]
    pub fn cons(head: Pattern, tail: Pattern) -> Self {
        Self::new(PatternKind::Cons(Box::new(head), Box::new(tail)))
    }

    /// Returns the pattern with the given span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Names bound by this pattern, left to right.
    #[must_use]
    pub fn bound_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.kind {
            PatternKind::Ident(name) => out.push(name),
            PatternKind::Tuple(items) => {
                for item in items {
                    item.collect_names(out);
                }
            }
            PatternKind::Cons(head, tail) => {
                head.collect_names(out);
                tail.collect_names(out);
            }
            PatternKind::Wildcard | PatternKind::Literal(_) | PatternKind::Nil => {}
        }
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl TypedNode {
    /// Creates a node.
    #[must_use]
    pub fn new(kind: NodeKind, ty: Type) -> Self {
        Self {
            kind,
            span: Span::default(),
            ty,
        }
    }

    /// Returns the node with the given span.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the node with the given type.
    #[must_use]
    pub fn typed(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    /// `()`
    #[must_use]
    pub fn unit() -> Self {
        Self::new(NodeKind::Literal(Literal::Unit), Type::Unit)
    }

    /// A boolean literal.
    #[must_use]
    pub fn bool(b: bool) -> Self {
        Self::new(NodeKind::Literal(Literal::Bool(b)), Type::Bool)
    }

    /// An integer literal.
    #[must_use]
    pub fn int(n: i64) -> Self {
        Self::new(NodeKind::Literal(Literal::Int(n)), Type::Int)
    }

    /// A float literal.
    #[must_use]
    pub fn float(n: f64) -> Self {
        Self::new(NodeKind::Literal(Literal::Float(n)), Type::Float)
    }

    /// A string literal.
    #[must_use]
    pub fn string(s: &str) -> Self {
        Self::new(NodeKind::Literal(Literal::String(s.to_string())), Type::String)
    }

    /// A variable of unknown type.
    #[must_use]
    pub fn ident(name: &str) -> Self {
        Self::new(NodeKind::Ident(name.to_string()), Type::Any)
    }

    /// An integer-typed variable.
    #[must_use]
    pub fn int_ident(name: &str) -> Self {
        Self::ident(name).typed(Type::Int)
    }

    /// A qualified module field.
    #[must_use]
    pub fn path(path: NamePath) -> Self {
        Self::new(NodeKind::ValuePath(path), Type::Any)
    }

    /// A tuple.
    #[must_use]
    pub fn tuple(items: Vec<TypedNode>) -> Self {
        let ty = Type::Tuple(items.iter().map(|n| n.ty.clone()).collect());
        Self::new(NodeKind::Tuple(items), ty)
    }

    /// A list literal.
    #[must_use]
    pub fn list(items: Vec<TypedNode>) -> Self {
        Self::new(NodeKind::List(items), Type::list(Type::Any))
    }

    /// An array literal.
    #[must_use]
    pub fn array(items: Vec<TypedNode>) -> Self {
        Self::new(NodeKind::Array(items), Type::array(Type::Any))
    }

    /// `head :: tail`
    #[must_use]
    pub fn cons(head: TypedNode, tail: TypedNode) -> Self {
        Self::new(
            NodeKind::Cons(Box::new(head), Box::new(tail)),
            Type::list(Type::Any),
        )
    }

    /// A unary operation.
    #[must_use]
    pub fn unary(op: UnaryOp, operand: TypedNode) -> Self {
        let ty = match op {
            UnaryOp::Not => Type::Bool,
            UnaryOp::Neg | UnaryOp::Bnot => Type::Int,
        };
        Self::new(NodeKind::Unary(op, Box::new(operand)), ty)
    }

    /// A binary operation; comparisons and logic are bool-typed, the rest take
    /// the left operand's type.
    #[must_use]
    pub fn binary(op: BinaryOp, left: TypedNode, right: TypedNode) -> Self {
        let ty = if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
            Type::Bool
        } else {
            left.ty.clone()
        };
        Self::new(NodeKind::Binary(op, Box::new(left), Box::new(right)), ty)
    }

    /// Function application.
    #[must_use]
    pub fn app(callee: TypedNode, args: Vec<TypedNode>) -> Self {
        Self::new(
            NodeKind::App {
                callee: Box::new(callee),
                args,
            },
            Type::Any,
        )
    }

    /// Direct primitive call.
    #[must_use]
    pub fn primitive(name: &str, args: Vec<TypedNode>) -> Self {
        Self::new(
            NodeKind::Primitive {
                name: name.to_string(),
                args,
            },
            Type::Any,
        )
    }

    /// An anonymous function.
    #[must_use]
    pub fn fun(params: &[&str], body: TypedNode) -> Self {
        let ty = Type::func(vec![Type::Any; params.len()], body.ty.clone());
        Self::new(
            NodeKind::Fun(FunDef {
                name: None,
                params: params.iter().map(|p| (*p).to_string()).collect(),
                body: Box::new(body),
            }),
            ty,
        )
    }

    /// A named function.
    #[must_use]
    pub fn named_fun(name: &str, params: &[&str], body: TypedNode) -> Self {
        let mut node = Self::fun(params, body);
        if let NodeKind::Fun(def) = &mut node.kind {
            def.name = Some(name.to_string());
        }
        node
    }

    /// `let name = value in body`
    #[must_use]
    pub fn let_in(name: &str, value: TypedNode, body: TypedNode) -> Self {
        Self::let_group(
            false,
            vec![Binding {
                pattern: Pattern::ident(name),
                value,
            }],
            Some(body),
        )
    }

    /// `let rec name = value in body`
    #[must_use]
    pub fn let_rec_in(bindings: Vec<(&str, TypedNode)>, body: TypedNode) -> Self {
        Self::let_group(true, Self::named_bindings(bindings), Some(body))
    }

    /// Top-level `let name = value`
    #[must_use]
    pub fn decl(name: &str, value: TypedNode) -> Self {
        Self::let_group(
            false,
            vec![Binding {
                pattern: Pattern::ident(name),
                value,
            }],
            None,
        )
    }

    /// Top-level `let rec name = value and ...`
    #[must_use]
    pub fn decl_rec(bindings: Vec<(&str, TypedNode)>) -> Self {
        Self::let_group(true, Self::named_bindings(bindings), None)
    }

    /// A general binding group.
    #[must_use]
    pub fn let_group(rec: bool, bindings: Vec<Binding>, body: Option<TypedNode>) -> Self {
        let ty = body.as_ref().map_or(Type::Unit, |b| b.ty.clone());
        Self::new(
            NodeKind::Let(LetGroup {
                rec,
                bindings,
                body: body.map(Box::new),
            }),
            ty,
        )
    }

    fn named_bindings(bindings: Vec<(&str, TypedNode)>) -> Vec<Binding> {
        bindings
            .into_iter()
            .map(|(name, value)| Binding {
                pattern: Pattern::ident(name),
                value,
            })
            .collect()
    }

    /// `if cond then a else b`
    #[must_use]
    pub fn if_else(cond: TypedNode, then: TypedNode, otherwise: TypedNode) -> Self {
        let ty = then.ty.clone();
        Self::new(
            NodeKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Some(Box::new(otherwise)),
            },
            ty,
        )
    }

    /// `if cond then a`
    #[must_use]
    pub fn if_then(cond: TypedNode, then: TypedNode) -> Self {
        Self::new(
            NodeKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: None,
            },
            Type::Unit,
        )
    }

    /// `match scrutinee with arms`
    #[must_use]
    pub fn case(scrutinee: TypedNode, arms: Vec<(Pattern, TypedNode)>) -> Self {
        let ty = arms.first().map_or(Type::Any, |(_, body)| body.ty.clone());
        Self::new(
            NodeKind::Case {
                scrutinee: Box::new(scrutinee),
                arms: arms
                    .into_iter()
                    .map(|(pattern, body)| CaseArm {
                        pattern,
                        guard: None,
                        body,
                    })
                    .collect(),
            },
            ty,
        )
    }

    /// `a; b; ...`
    #[must_use]
    pub fn seq(items: Vec<TypedNode>) -> Self {
        let ty = items.last().map_or(Type::Unit, |n| n.ty.clone());
        Self::new(NodeKind::Seq(items), ty)
    }

    /// `name := value`
    #[must_use]
    pub fn assign(name: &str, value: TypedNode) -> Self {
        Self::new(
            NodeKind::Assign {
                name: name.to_string(),
                value: Box::new(value),
            },
            Type::Unit,
        )
    }

    /// `for var = start to end do body done`
    #[must_use]
    pub fn for_loop(var: &str, start: TypedNode, end: TypedNode, body: TypedNode) -> Self {
        Self::new(
            NodeKind::For {
                var: var.to_string(),
                start: Box::new(start),
                end: Box::new(end),
                down: false,
                body: Box::new(body),
            },
            Type::Unit,
        )
    }

    /// `while cond do body done`
    #[must_use]
    pub fn while_loop(cond: TypedNode, body: TypedNode) -> Self {
        Self::new(
            NodeKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
            },
            Type::Unit,
        )
    }

    /// A compilation unit.
    #[must_use]
    pub fn program(items: Vec<TypedNode>) -> Self {
        let ty = items.last().map_or(Type::Unit, |n| n.ty.clone());
        Self::new(NodeKind::Program(items), ty)
    }
}
