//! Compiler from typed trees to bytecode.
//!
//! Compilation runs in two phases. The [`Analyzer`] walks the whole unit once
//! and decides where every variable lives; the compiler then walks the tree
//! again and emits code for each function into its own [`FunctionBuilder`],
//! recursing into nested function literals and turning each finished one into
//! a closure-construction sequence in its parent.

#![allow(clippy::too_many_lines)]

use tracing::{Level, debug, trace};
use trompe_foundation::{CompiledCode, Error, Result, Type, Value};

use crate::builder::FunctionBuilder;
use crate::config::CompilerConfig;
use crate::disasm::disassemble;
use crate::instr::LabelId;
use crate::module::{Module, ModuleRegistry};
use crate::opcode::Opcode;
use crate::scope::{Analysis, Analyzer, BlockId, Resolution};
use crate::typed_tree::{
    BinaryOp, CaseArm, FunDef, LetGroup, Literal, NodeKind, Pattern, PatternKind, TypedNode,
    UnaryOp,
};

/// Name of the primitive a non-exhaustive match calls when no arm matches.
pub const MATCH_FAILURE: &str = "match_failure";

/// Compiles units for one module.
pub struct Compiler<'a> {
    registry: &'a ModuleRegistry,
    module: &'a Module,
    config: CompilerConfig,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler for code that will run in `module`.
    #[must_use]
    pub fn new(registry: &'a ModuleRegistry, module: &'a Module, config: CompilerConfig) -> Self {
        Self {
            registry,
            module,
            config,
        }
    }

    /// Compiles a unit: a `Program` node, or any expression.
    ///
    /// # Errors
    ///
    /// Returns `UnboundIdentifier` for names that resolve nowhere, and
    /// encoding errors for functions that exceed operand limits.
    pub fn compile(&self, tree: &TypedNode) -> Result<CompiledCode> {
        let analysis = Analyzer::analyze(tree, self.module, self.registry)?;
        let unit = UnitCompiler {
            analysis: &analysis,
            registry: self.registry,
            config: &self.config,
        };
        let program = analysis.program();
        let mut f = unit.start(program)?;
        match &tree.kind {
            NodeKind::Program(items) => unit.compile_items(items, &mut f)?,
            _ => unit.compile_node(tree, &mut f)?,
        }
        unit.end(f)
    }
}

// =============================================================================
// Unit compilation
// =============================================================================

struct UnitCompiler<'u> {
    analysis: &'u Analysis,
    registry: &'u ModuleRegistry,
    config: &'u CompilerConfig,
}

/// Labels a failed pattern test jumps to, one per extra stack depth.
///
/// `fail[d]` is reached with `d` values above the scrutinee; its stub pops
/// them and falls into `fail[d - 1]`.
#[derive(Default)]
struct FailLabels {
    labels: Vec<Option<LabelId>>,
}

impl FailLabels {
    fn at(&mut self, depth: usize, f: &mut FunctionBuilder) -> LabelId {
        if self.labels.len() <= depth {
            self.labels.resize(depth + 1, None);
        }
        *self.labels[depth].get_or_insert_with(|| f.emitter.new_label())
    }

    fn emit_stubs(self, f: &mut FunctionBuilder) {
        for (depth, label) in self.labels.iter().enumerate().rev() {
            if let Some(label) = label {
                f.emitter.place(*label);
            }
            if depth > 0 {
                f.emit(Opcode::Pop);
            }
        }
    }
}

impl UnitCompiler<'_> {
    fn start(&self, block: BlockId) -> Result<FunctionBuilder> {
        let scope = self.analysis.finish(block)?;
        let mut f = FunctionBuilder::new(scope, self.config);
        f.prologue()?;
        Ok(f)
    }

    fn end(&self, mut f: FunctionBuilder) -> Result<CompiledCode> {
        f.epilogue();
        let code = f.finish()?;
        debug!(
            name = %code.name,
            bytes = code.bytes.len(),
            frame_size = code.frame_size,
            consts = code.consts.len(),
            "compiled code"
        );
        if tracing::enabled!(Level::TRACE) {
            trace!("\n{}", disassemble(&code));
        }
        Ok(code)
    }

    fn compile_items(&self, items: &[TypedNode], f: &mut FunctionBuilder) -> Result<()> {
        if items.is_empty() {
            f.emit(Opcode::LoadUnit);
            return Ok(());
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                f.emit(Opcode::Pop);
            }
            self.compile_node(item, f)?;
        }
        Ok(())
    }

    fn compile_node(&self, node: &TypedNode, f: &mut FunctionBuilder) -> Result<()> {
        f.emitter.set_span(node.span);
        match &node.kind {
            NodeKind::Literal(lit) => self.compile_literal(lit, f),
            NodeKind::Ident(_) => {
                match self.analysis.resolution(node)? {
                    Resolution::Var(var) => f.push_var(*var)?,
                    Resolution::Global(name) => {
                        let idx = f.emitter.add_const(Value::from(name.as_str()))?;
                        f.emit(Opcode::LoadGlobal(idx));
                    }
                    Resolution::Binding(path) => {
                        let idx = f.emitter.add_const(Value::Path(path.clone()))?;
                        f.emit(Opcode::LoadValue(idx));
                    }
                }
                Ok(())
            }
            NodeKind::ValuePath(path) => {
                let idx = f.emitter.add_const(Value::Path(path.clone()))?;
                f.emit(Opcode::LoadValue(idx));
                Ok(())
            }
            NodeKind::Tuple(items) => {
                self.compile_all(items, f)?;
                f.emit(Opcode::ConsTuple(count("tuple size", items.len())?));
                Ok(())
            }
            NodeKind::List(items) => {
                if items.is_empty() {
                    f.emit(Opcode::LoadNil);
                } else {
                    self.compile_all(items, f)?;
                    f.emit(Opcode::ConsList(count("list size", items.len())?));
                }
                Ok(())
            }
            NodeKind::Array(items) => {
                self.compile_all(items, f)?;
                f.emit(Opcode::ConsArray(count("array size", items.len())?));
                Ok(())
            }
            NodeKind::Cons(head, tail) => {
                self.compile_node(head, f)?;
                self.compile_node(tail, f)?;
                f.emit(Opcode::Cons);
                Ok(())
            }
            NodeKind::Unary(op, operand) => {
                self.compile_node(operand, f)?;
                f.emit(match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::Bnot => Opcode::Bnot,
                });
                Ok(())
            }
            NodeKind::Binary(op, left, right) => self.compile_binary(*op, left, right, f),
            NodeKind::App { callee, args } => self.compile_app(callee, args, f),
            NodeKind::Primitive { name, args } => self.compile_primitive(name, args, f),
            NodeKind::Fun(def) => self.compile_fun(node, def, f),
            NodeKind::Let(group) => self.compile_let(group, f),
            NodeKind::If {
                cond,
                then,
                otherwise,
            } => {
                let else_label = f.emitter.new_label();
                let end = f.emitter.new_label();
                self.compile_node(cond, f)?;
                f.emitter.branch_false(else_label);
                self.compile_node(then, f)?;
                f.emitter.jump(end);
                f.emitter.place(else_label);
                match otherwise {
                    Some(otherwise) => self.compile_node(otherwise, f)?,
                    None => f.emit(Opcode::LoadUnit),
                }
                f.emitter.place(end);
                Ok(())
            }
            NodeKind::Case { scrutinee, arms } => self.compile_case(scrutinee, arms, f),
            NodeKind::Seq(items) | NodeKind::Program(items) => self.compile_items(items, f),
            NodeKind::Assign { value, .. } => {
                self.compile_node(value, f)?;
                match self.analysis.resolution(node)? {
                    Resolution::Var(var) => f.store_pop_var(*var)?,
                    Resolution::Global(name) => {
                        let idx = f.emitter.add_const(Value::from(name.as_str()))?;
                        f.emit(Opcode::StorePopGlobal(idx));
                    }
                    Resolution::Binding(path) => {
                        return Err(Error::internal(format!("assignment to binding {path}")));
                    }
                }
                f.emit(Opcode::LoadUnit);
                Ok(())
            }
            NodeKind::For {
                start,
                end,
                down,
                body,
                ..
            } => self.compile_for(node, start, end, *down, body, f),
            NodeKind::While { cond, body } => {
                let lp = self.analysis.loop_of(node)?;
                let head = f.emitter.new_label();
                let exit = f.emitter.new_label();
                f.emitter.place(head);
                f.emit(Opcode::LoopHead);
                f.fresh_iteration(lp)?;
                self.compile_node(cond, f)?;
                f.emitter.branch_false(exit);
                self.compile_node(body, f)?;
                f.emit(Opcode::Pop);
                f.emitter.jump(head);
                f.emitter.place(exit);
                f.emit(Opcode::LoadUnit);
                Ok(())
            }
        }
    }

    fn compile_all(&self, items: &[TypedNode], f: &mut FunctionBuilder) -> Result<()> {
        for item in items {
            self.compile_node(item, f)?;
        }
        Ok(())
    }

    fn compile_literal(&self, lit: &Literal, f: &mut FunctionBuilder) -> Result<()> {
        match lit {
            Literal::Unit => f.emit(Opcode::LoadUnit),
            Literal::Bool(b) => f.emit(Opcode::LoadBool(*b)),
            Literal::Int(n) => f.push_int(*n)?,
            Literal::Float(n) => f.push_const(Value::Float(*n))?,
            Literal::Char(c) => f.push_const(Value::Char(*c))?,
            Literal::String(s) => f.push_const(Value::from(s.as_str()))?,
        }
        Ok(())
    }

    // =========================================================================
    // Operators and calls
    // =========================================================================

    fn compile_binary(
        &self,
        op: BinaryOp,
        left: &TypedNode,
        right: &TypedNode,
        f: &mut FunctionBuilder,
    ) -> Result<()> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let short = f.emitter.new_label();
                let end = f.emitter.new_label();
                self.compile_node(left, f)?;
                if op == BinaryOp::And {
                    f.emitter.branch_false(short);
                } else {
                    f.emitter.branch_true(short);
                }
                self.compile_node(right, f)?;
                f.emitter.jump(end);
                f.emitter.place(short);
                f.emit(Opcode::LoadBool(op == BinaryOp::Or));
                f.emitter.place(end);
                return Ok(());
            }
            BinaryOp::Add | BinaryOp::Sub if is_int_literal(right, 1) => {
                self.compile_node(left, f)?;
                f.emit(if op == BinaryOp::Add {
                    Opcode::Add1
                } else {
                    Opcode::Sub1
                });
                return Ok(());
            }
            _ => {}
        }
        self.compile_node(left, f)?;
        self.compile_node(right, f)?;
        let ints = left.ty == Type::Int && right.ty == Type::Int;
        let code = match op {
            BinaryOp::Eq if ints => Opcode::EqInts,
            BinaryOp::Ne if ints => Opcode::NeInts,
            BinaryOp::Lt if ints => Opcode::LtInts,
            BinaryOp::Le if ints => Opcode::LeInts,
            BinaryOp::Gt if ints => Opcode::GtInts,
            BinaryOp::Ge if ints => Opcode::GeInts,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Ne => Opcode::Ne,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Le => Opcode::Le,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Ge => Opcode::Ge,
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Pow => Opcode::Pow,
            BinaryOp::Lshift => Opcode::Lshift,
            BinaryOp::Rshift => Opcode::Rshift,
            BinaryOp::Band => Opcode::Band,
            BinaryOp::Bor => Opcode::Bor,
            BinaryOp::Bxor => Opcode::Bxor,
            BinaryOp::And | BinaryOp::Or => {
                return Err(Error::internal("short-circuit operator reached strict path"));
            }
        };
        f.emit(code);
        Ok(())
    }

    fn compile_app(
        &self,
        callee: &TypedNode,
        args: &[TypedNode],
        f: &mut FunctionBuilder,
    ) -> Result<()> {
        let arity = count("argument count", args.len())?;
        if let Some(local) = self.direct_callee(callee, f) {
            self.compile_all(args, f)?;
            f.emit(Opcode::ApplyDirect { local, arity });
            return Ok(());
        }
        self.compile_node(callee, f)?;
        self.compile_all(args, f)?;
        f.emit(Opcode::Apply(arity));
        Ok(())
    }

    /// Frame slot of a callee that can be applied without pushing it.
    fn direct_callee(&self, callee: &TypedNode, f: &FunctionBuilder) -> Option<u8> {
        if !matches!(callee.kind, NodeKind::Ident(_)) {
            return None;
        }
        let Ok(Resolution::Var(var)) = self.analysis.resolution(callee) else {
            return None;
        };
        match f.scope.location(*var) {
            Ok(crate::scope::VarLocation::Local(slot)) => u8::try_from(*slot).ok(),
            _ => None,
        }
    }

    fn compile_primitive(
        &self,
        name: &str,
        args: &[TypedNode],
        f: &mut FunctionBuilder,
    ) -> Result<()> {
        let primitive = self
            .registry
            .primitives()
            .get(name)
            .ok_or_else(|| Error::not_found(format!("primitive {name}")))?;
        if primitive.arity != args.len() {
            return Err(Error::arity_mismatch(primitive.arity, args.len()));
        }
        self.compile_all(args, f)?;
        let index = f.emitter.add_const(Value::from(name))?;
        f.emitter.push(crate::instr::InstrDesc::Primitive {
            index,
            arity: args.len(),
        });
        Ok(())
    }

    // =========================================================================
    // Functions and bindings
    // =========================================================================

    fn compile_fun(&self, node: &TypedNode, def: &FunDef, f: &mut FunctionBuilder) -> Result<()> {
        let block = self.analysis.block_of(node)?;
        let mut inner = self.start(block)?;
        self.compile_node(&def.body, &mut inner)?;
        let scope = inner.scope.clone();
        let code = self.end(inner)?;
        f.emitter.set_span(node.span);
        f.push_closure(code, &scope)
    }

    fn compile_let(&self, group: &LetGroup, f: &mut FunctionBuilder) -> Result<()> {
        for binding in &group.bindings {
            self.compile_node(&binding.value, f)?;
            self.bind_pattern(&binding.pattern, f)?;
        }
        match &group.body {
            Some(body) => self.compile_node(body, f),
            None => {
                f.emit(Opcode::LoadUnit);
                Ok(())
            }
        }
    }

    /// Destructures the value on top into the pattern's variables.
    ///
    /// Binding patterns are irrefutable; literal and `[]` parts are not
    /// tested.
    fn bind_pattern(&self, pattern: &Pattern, f: &mut FunctionBuilder) -> Result<()> {
        match &pattern.kind {
            PatternKind::Ident(_) => {
                let var = self.analysis.def(pattern)?;
                f.store_pop_var(var)
            }
            PatternKind::Wildcard | PatternKind::Literal(_) | PatternKind::Nil => {
                f.emit(Opcode::Pop);
                Ok(())
            }
            PatternKind::Tuple(items) => {
                for (i, item) in items.iter().enumerate() {
                    f.emit(Opcode::LoadIndirect(count("tuple index", i)?));
                    self.bind_pattern(item, f)?;
                }
                f.emit(Opcode::Pop);
                Ok(())
            }
            PatternKind::Cons(head, tail) => {
                f.emit(Opcode::LoadHead);
                self.bind_pattern(head, f)?;
                f.emit(Opcode::PopLoadTail);
                self.bind_pattern(tail, f)
            }
        }
    }

    // =========================================================================
    // Pattern matching
    // =========================================================================

    fn compile_case(
        &self,
        scrutinee: &TypedNode,
        arms: &[CaseArm],
        f: &mut FunctionBuilder,
    ) -> Result<()> {
        let end = f.emitter.new_label();
        self.compile_node(scrutinee, f)?;
        for arm in arms {
            let mut fails = FailLabels::default();
            f.emitter.set_span(arm.pattern.span);
            f.emit(Opcode::Dup);
            self.match_pattern(&arm.pattern, 1, &mut fails, f)?;
            if let Some(guard) = &arm.guard {
                self.compile_node(guard, f)?;
                let fail = fails.at(0, f);
                f.emitter.branch_false(fail);
            }
            self.compile_node(&arm.body, f)?;
            f.emit(Opcode::SwapPop);
            f.emitter.jump(end);
            fails.emit_stubs(f);
        }
        let index = f.emitter.add_const(Value::from(MATCH_FAILURE))?;
        f.emitter
            .push(crate::instr::InstrDesc::Primitive { index, arity: 1 });
        f.emitter.place(end);
        Ok(())
    }

    /// Tests the value on top, `depth` values above the scrutinee, against a
    /// pattern. The value is consumed on both outcomes; on failure control
    /// reaches the fail label of the depth left behind.
    fn match_pattern(
        &self,
        pattern: &Pattern,
        depth: usize,
        fails: &mut FailLabels,
        f: &mut FunctionBuilder,
    ) -> Result<()> {
        match &pattern.kind {
            PatternKind::Wildcard => f.emit(Opcode::Pop),
            PatternKind::Ident(_) => {
                let var = self.analysis.def(pattern)?;
                f.store_pop_var(var)?;
            }
            PatternKind::Literal(lit) => {
                self.compile_literal(lit, f)?;
                let fail = fails.at(depth - 1, f);
                f.emit(Opcode::Eq);
                f.emitter.branch_false(fail);
            }
            PatternKind::Nil => {
                f.emit(Opcode::LoadNil);
                let fail = fails.at(depth - 1, f);
                f.emit(Opcode::Eq);
                f.emitter.branch_false(fail);
            }
            PatternKind::Tuple(items) => {
                f.emit(Opcode::CountValues);
                f.push_int(i64::try_from(items.len()).unwrap_or(i64::MAX))?;
                let fail = fails.at(depth, f);
                f.emitter.branch_ne(fail);
                for (i, item) in items.iter().enumerate() {
                    f.emit(Opcode::LoadIndirect(count("tuple index", i)?));
                    self.match_pattern(item, depth + 1, fails, f)?;
                }
                f.emit(Opcode::Pop);
            }
            PatternKind::Cons(head, tail) => {
                f.emit(Opcode::Dup);
                f.emit(Opcode::LoadNil);
                f.emit(Opcode::Eq);
                let fail = fails.at(depth, f);
                f.emitter.branch_true(fail);
                f.emit(Opcode::LoadHead);
                self.match_pattern(head, depth + 1, fails, f)?;
                f.emit(Opcode::PopLoadTail);
                self.match_pattern(tail, depth, fails, f)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Loops
    // =========================================================================

    /// `for` keeps the bound on the stack for the whole loop. Variables the
    /// body shares get a fresh array on every iteration.
    fn compile_for(
        &self,
        node: &TypedNode,
        start: &TypedNode,
        end: &TypedNode,
        down: bool,
        body: &TypedNode,
        f: &mut FunctionBuilder,
    ) -> Result<()> {
        let var = self.analysis.def(node)?;
        let lp = self.analysis.loop_of(node)?;
        let head = f.emitter.new_label();
        let exit = f.emitter.new_label();
        self.compile_node(start, f)?;
        f.store_pop_var(var)?;
        self.compile_node(end, f)?;
        f.emitter.set_span(node.span);
        f.emitter.place(head);
        f.emit(Opcode::LoopHead);
        f.emit(Opcode::Dup);
        f.push_var(var)?;
        f.emit(if down { Opcode::LeInts } else { Opcode::GeInts });
        f.emitter.branch_false(exit);
        f.fresh_iteration(lp)?;
        self.compile_node(body, f)?;
        f.emit(Opcode::Pop);
        f.emitter.set_span(node.span);
        f.push_var(var)?;
        f.emit(if down { Opcode::Sub1 } else { Opcode::Add1 });
        f.store_pop_var(var)?;
        f.emitter.jump(head);
        f.emitter.place(exit);
        f.emit(Opcode::Pop);
        f.emit(Opcode::LoadUnit);
        Ok(())
    }
}

fn is_int_literal(node: &TypedNode, n: i64) -> bool {
    matches!(node.kind, NodeKind::Literal(Literal::Int(m)) if m == n)
}

fn count(what: &'static str, n: usize) -> Result<u8> {
    u8::try_from(n)
        .map_err(|_| Error::operand_out_of_range(what, i64::try_from(n).unwrap_or(i64::MAX)))
}
