//! Stack-based virtual machine for Trompe bytecode.
//!
//! Every frame of a call chain lives on one [`ValueStack`]. A frame's locals
//! start at its base pointer and are laid out as
//! `[args][copied][context arrays][temps]`, with the working values above
//! them. Calls push the callee's frame directly on top of its arguments;
//! returns truncate the stack to where the callee sat and push the result.
//!
//! Module attributes and primitives are reached through [`VmContext`].

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]

mod context;
mod native;
mod stack;

pub use context::{ModuleContext, VmContext};
pub use native::pervasives;

use std::rc::Rc;

use tracing::{debug, trace};
use trompe_foundation::{
    ArrayRef, BlockClosure, CompiledCode, Error, ErrorContext, ErrorKind, LtList, Result, Type,
    Value,
};

use crate::config::VmConfig;
use crate::opcode::Opcode;
use context::Frame;
use native::{
    add_values, compare_values, div_values, expect_bool, expect_int, int_op, lsl, lsr,
    mod_values, mul_values, neg_value, pow_values, sub_values,
};
use stack::ValueStack;

/// The virtual machine.
pub struct Vm {
    config: VmConfig,
    stack: ValueStack,
    frames: Vec<Frame>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Creates a VM with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Creates a VM with the given configuration.
    #[must_use]
    pub fn with_config(config: VmConfig) -> Self {
        Self {
            stack: ValueStack::new(config.initial_stack_capacity, config.extra_frame_slots),
            frames: Vec::new(),
            config,
        }
    }

    /// The VM configuration.
    #[must_use]
    pub const fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Number of values on the stack; zero between units.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Drops every frame and value.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }

    /// Runs a unit of code taking no arguments.
    ///
    /// # Errors
    ///
    /// Returns `ArityMismatch` if the code expects arguments, or any runtime
    /// error raised while running it.
    pub fn execute<C: VmContext>(&mut self, code: Rc<CompiledCode>, ctx: &C) -> Result<Value> {
        if code.num_args != 0 {
            return Err(Error::arity_mismatch(code.num_args, 0));
        }
        debug!(code = %code.name, "executing unit");
        self.apply(&Value::Closure(Rc::new(BlockClosure::clean(code))), Vec::new(), ctx)
    }

    /// Applies a callable to arguments.
    ///
    /// # Errors
    ///
    /// Returns `NotCallable`, `ArityMismatch`, or any runtime error raised
    /// by the callee.
    pub fn apply<C: VmContext>(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        ctx: &C,
    ) -> Result<Value> {
        let stop = self.frames.len();
        let height = self.stack.len();
        self.stack.reserve(args.len());
        let arity = args.len();
        for arg in args {
            self.stack.push(arg);
        }
        let result = match self.call(callee.clone(), arity, height) {
            Ok(true) => self.run(ctx, stop),
            Ok(false) => self.stack.pop(),
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.frames.truncate(stop);
            self.stack.truncate(height);
        }
        result
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Calls `callee` on the `arity` values on top of the stack.
    ///
    /// Returns true if a frame was pushed; otherwise the result of a
    /// primitive is already on the stack.
    fn call(&mut self, callee: Value, arity: usize, return_to: usize) -> Result<bool> {
        match callee {
            Value::Closure(closure) => {
                if closure.code.num_args != arity {
                    return Err(Error::arity_mismatch(closure.code.num_args, arity));
                }
                let base = self.stack.len() - arity;
                self.enter(closure, base, return_to)?;
                Ok(true)
            }
            Value::Primitive(primitive) => {
                let args = self.stack.pop_n(arity)?;
                let result = primitive.call(&args)?;
                self.stack.truncate(return_to);
                self.stack.push(result);
                Ok(false)
            }
            other => Err(Error::new(ErrorKind::NotCallable(other.to_string()))),
        }
    }

    /// Pushes a frame whose arguments already sit at `base`.
    fn enter(&mut self, closure: Rc<BlockClosure>, base: usize, return_to: usize) -> Result<()> {
        let code = &closure.code;
        let context = closure.context.as_deref().unwrap_or_default();
        if closure.copied.len() != code.num_copied || context.len() != code.num_context {
            return Err(Error::internal(format!(
                "closure over {} carries {} copied and {} context values, expected {} and {}",
                code.name,
                closure.copied.len(),
                context.len(),
                code.num_copied,
                code.num_context
            )));
        }
        let needed = code.num_locals() - code.num_args + code.frame_size;
        self.stack.reserve(needed);
        for value in &closure.copied {
            self.stack.push(value.clone());
        }
        for array in context {
            self.stack.push(Value::Array(Rc::clone(array)));
        }
        for _ in 0..code.num_temps {
            self.stack.push(Value::Unit);
        }
        trace!(code = %code.name, base, depth = self.frames.len() + 1, "enter frame");
        self.frames.push(Frame::new(closure, base, return_to));
        Ok(())
    }

    fn frame(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| Error::internal("no active frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| Error::internal("no active frame"))
    }

    /// Pops the current frame and splices `value` onto the caller's stack.
    ///
    /// Returns the value instead when the frame was the one `run` started.
    fn leave(&mut self, value: Value, stop: usize) -> Result<Option<Value>> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::internal("return without a frame"))?;
        trace!(code = %frame.name(), depth = self.frames.len(), "leave frame");
        self.stack.truncate(frame.return_to);
        if self.frames.len() == stop {
            return Ok(Some(value));
        }
        self.stack.push(value);
        Ok(None)
    }

    fn error_context(&self, code: &CompiledCode, pc: usize) -> ErrorContext {
        let mut context = ErrorContext::new().with_source(code.name.clone());
        if let Some(line) = code.line_at(pc) {
            context = context.with_line(line as usize);
        }
        self.frames
            .iter()
            .rev()
            .fold(context, |context, frame| context.with_frame(frame.name()))
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn run<C: VmContext>(&mut self, ctx: &C, stop: usize) -> Result<Value> {
        loop {
            if let Some(value) = self.step(ctx, stop)? {
                return Ok(value);
            }
        }
    }

    fn step<C: VmContext>(&mut self, ctx: &C, stop: usize) -> Result<Option<Value>> {
        let frame = self.frame_mut()?;
        let code = Rc::clone(&frame.closure.code);
        let pc = frame.pc;
        let base = frame.base;
        let result = match Opcode::decode(&code.bytes, pc) {
            Ok((op, size)) => {
                frame.pc = pc + size;
                if self.config.trace_execution {
                    trace!(code = %code.name, pc, %op, height = self.stack.len(), "dispatch");
                }
                self.dispatch(ctx, op, &code, base, stop)
            }
            Err(err) => Err(err),
        };
        match result {
            Ok(None) if self.config.check_frame_size => {
                self.check_frame_size()?;
                Ok(None)
            }
            Ok(done) => Ok(done),
            Err(err) => Err(err.or_context(|| self.error_context(&code, pc))),
        }
    }

    fn check_frame_size(&self) -> Result<()> {
        let frame = self.frame()?;
        let depth = self.stack.len().saturating_sub(frame.working_base());
        let code = &frame.closure.code;
        if depth > code.frame_size {
            return Err(Error::new(ErrorKind::FrameSizeExceeded {
                code: code.name.clone(),
                frame_size: code.frame_size,
                depth,
            }));
        }
        Ok(())
    }

    fn dispatch<C: VmContext>(
        &mut self,
        ctx: &C,
        op: Opcode,
        code: &CompiledCode,
        base: usize,
        stop: usize,
    ) -> Result<Option<Value>> {
        match op {
            Opcode::Nop | Opcode::LoopHead => {}

            // Loads and stores
            Opcode::LoadUnit => self.stack.push(Value::Unit),
            Opcode::LoadBool(b) => self.stack.push(Value::Bool(b)),
            Opcode::LoadNil => self.stack.push(Value::List(LtList::new())),
            Opcode::LoadInt(n) => self.stack.push(Value::Int(n)),
            Opcode::LoadLocal(slot) => {
                let value = self.stack.get(base + usize::from(slot))?.clone();
                self.stack.push(value);
            }
            Opcode::StorePopLocal(slot) => {
                let value = self.stack.pop()?;
                self.stack.set(base + usize::from(slot), value)?;
            }
            Opcode::LoadConst(index) => {
                let value = constant(code, usize::from(index))?.clone();
                self.stack.push(value);
            }
            Opcode::LoadGlobal(index) => {
                let value = ctx.load_global(constant_name(code, usize::from(index))?)?;
                self.stack.push(value);
            }
            Opcode::StorePopGlobal(index) => {
                let value = self.stack.pop()?;
                ctx.store_global(constant_name(code, usize::from(index))?, value);
            }
            Opcode::LoadValue(index) => {
                let value = match constant(code, usize::from(index))? {
                    Value::Path(path) => ctx.load_path(path)?,
                    other => {
                        return Err(Error::internal(format!("path constant expected, got {other}")));
                    }
                };
                self.stack.push(value);
            }
            Opcode::LoadLocalIndirect { array, elt } => {
                let array = self.local_array(base, array)?;
                let value = element(&array.borrow(), usize::from(elt))?;
                self.stack.push(value);
            }
            Opcode::StorePopLocalIndirect { array, elt } => {
                let value = self.stack.pop()?;
                let array = self.local_array(base, array)?;
                let mut items = array.borrow_mut();
                let length = items.len();
                let slot = items.get_mut(usize::from(elt)).ok_or(Error::new(
                    ErrorKind::IndexOutOfBounds {
                        index: i64::from(elt),
                        length,
                    },
                ))?;
                *slot = value;
            }
            Opcode::LoadIndirect(n) => {
                let value = match self.stack.peek()? {
                    Value::Tuple(items) => element(items, usize::from(n))?,
                    Value::Array(array) => element(&array.borrow(), usize::from(n))?,
                    other => return Err(Error::type_mismatch(Type::Any, other.value_type())),
                };
                self.stack.push(value);
            }
            Opcode::CountValues => {
                let count = match self.stack.peek()? {
                    Value::Tuple(items) => items.len(),
                    Value::Array(array) => array.borrow().len(),
                    other => return Err(Error::type_mismatch(Type::Any, other.value_type())),
                };
                self.stack.push(Value::Int(count as i64));
            }
            Opcode::LoadHead => {
                let head = match self.stack.peek()? {
                    Value::List(list) => list
                        .head()
                        .cloned()
                        .ok_or_else(|| Error::new(ErrorKind::MatchFailure("[]".to_string())))?,
                    other => return Err(list_expected(other)),
                };
                self.stack.push(head);
            }
            Opcode::PopLoadTail => {
                let tail = match self.stack.pop()? {
                    Value::List(list) => list
                        .tail()
                        .ok_or_else(|| Error::new(ErrorKind::MatchFailure("[]".to_string())))?,
                    other => return Err(list_expected(&other)),
                };
                self.stack.push(Value::List(tail));
            }

            // Stack shuffling
            Opcode::Pop => {
                self.stack.pop()?;
            }
            Opcode::SwapPop => {
                let top = self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push(top);
            }
            Opcode::Dup => {
                let top = self.stack.peek()?.clone();
                self.stack.push(top);
            }

            // Control flow
            Opcode::Return => {
                let value = if self.stack.len() > self.frame()?.working_base() {
                    self.stack.pop()?
                } else {
                    Value::Unit
                };
                return self.leave(value, stop);
            }
            Opcode::ReturnUnit => return self.leave(Value::Unit, stop),
            Opcode::ReturnBool(b) => return self.leave(Value::Bool(b), stop),
            Opcode::Jump(dist) => self.jump(dist)?,
            Opcode::BranchFalse(dist) => {
                if !expect_bool(&self.stack.pop()?)? {
                    self.jump(dist)?;
                }
            }
            Opcode::BranchTrue(dist) => {
                if expect_bool(&self.stack.pop()?)? {
                    self.jump(dist)?;
                }
            }
            Opcode::BranchNe(dist) => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                if a != b {
                    self.jump(dist)?;
                }
            }
            Opcode::Apply(arity) => {
                let arity = usize::from(arity);
                let at = self
                    .stack
                    .len()
                    .checked_sub(arity + 1)
                    .ok_or_else(|| Error::internal("apply below the stack"))?;
                let callee = self.stack.get(at)?.clone();
                self.call(callee, arity, at)?;
            }
            Opcode::ApplyDirect { local, arity } => {
                let callee = self.stack.get(base + usize::from(local))?.clone();
                let arity = usize::from(arity);
                let at = self
                    .stack
                    .len()
                    .checked_sub(arity)
                    .ok_or_else(|| Error::internal("apply below the stack"))?;
                self.call(callee, arity, at)?;
            }
            Opcode::Primitive { index, arity } => {
                let name = constant_name(code, usize::from(index))?;
                let primitive = ctx
                    .primitive(name)
                    .ok_or_else(|| Error::not_found(format!("primitive {name}")))?;
                let args = self.stack.pop_n(usize::from(arity))?;
                let result = primitive.call(&args)?;
                self.stack.push(result);
            }

            // Comparison
            Opcode::Eq => self.binary(|a, b| Ok(Value::Bool(a == b)))?,
            Opcode::Ne => self.binary(|a, b| Ok(Value::Bool(a != b)))?,
            Opcode::Lt => self.binary(|a, b| Ok(Value::Bool(compare_values(a, b)?.is_lt())))?,
            Opcode::Le => self.binary(|a, b| Ok(Value::Bool(compare_values(a, b)?.is_le())))?,
            Opcode::Gt => self.binary(|a, b| Ok(Value::Bool(compare_values(a, b)?.is_gt())))?,
            Opcode::Ge => self.binary(|a, b| Ok(Value::Bool(compare_values(a, b)?.is_ge())))?,
            Opcode::EqInts => self.compare_ints(|a, b| a == b)?,
            Opcode::NeInts => self.compare_ints(|a, b| a != b)?,
            Opcode::LtInts => self.compare_ints(|a, b| a < b)?,
            Opcode::LeInts => self.compare_ints(|a, b| a <= b)?,
            Opcode::GtInts => self.compare_ints(|a, b| a > b)?,
            Opcode::GeInts => self.compare_ints(|a, b| a >= b)?,

            // Arithmetic
            Opcode::Add => self.binary(add_values)?,
            Opcode::Sub => self.binary(sub_values)?,
            Opcode::Mul => self.binary(mul_values)?,
            Opcode::Div => self.binary(div_values)?,
            Opcode::Mod => self.binary(mod_values)?,
            Opcode::Pow => self.binary(pow_values)?,
            Opcode::Add1 => self.unary(|a| add_values(a, &Value::Int(1)))?,
            Opcode::Sub1 => self.unary(|a| sub_values(a, &Value::Int(1)))?,
            Opcode::Neg => self.unary(neg_value)?,
            Opcode::Not => self.unary(|a| Ok(Value::Bool(!expect_bool(a)?)))?,
            Opcode::Bnot => self.unary(|a| Ok(Value::Int(!expect_int(a)?)))?,
            Opcode::Lshift => self.binary(|a, b| int_op(a, b, lsl))?,
            Opcode::Rshift => self.binary(|a, b| int_op(a, b, lsr))?,
            Opcode::Band => self.binary(|a, b| int_op(a, b, |x, y| x & y))?,
            Opcode::Bor => self.binary(|a, b| int_op(a, b, |x, y| x | y))?,
            Opcode::Bxor => self.binary(|a, b| int_op(a, b, |x, y| x ^ y))?,

            // Construction
            Opcode::Cons => {
                let tail = self.stack.pop()?;
                let head = self.stack.pop()?;
                match tail {
                    Value::List(list) => self.stack.push(Value::List(list.cons(head))),
                    other => return Err(list_expected(&other)),
                }
            }
            Opcode::ConsList(n) => {
                let items = self.stack.pop_n(usize::from(n))?;
                self.stack.push(Value::list(items));
            }
            Opcode::ConsTuple(n) => {
                let items = self.stack.pop_n(usize::from(n))?;
                self.stack.push(Value::tuple(items));
            }
            Opcode::ConsArray(n) => {
                let items = self.stack.pop_n(usize::from(n))?;
                self.stack.push(Value::array(items));
            }
            Opcode::CreateArray(n) => {
                self.stack.push(Value::array(vec![Value::Unit; usize::from(n)]));
            }
            Opcode::FullBlock(index) => {
                let code = code_constant(code, usize::from(index))?;
                let context = self.pop_arrays(code.num_context)?;
                self.push_closure(code, Vec::new(), Some(context));
            }
            Opcode::CopyingBlock { index, count } => {
                let code = code_constant(code, usize::from(index))?;
                let copied = self.stack.pop_n(usize::from(count))?;
                self.push_closure(code, copied, None);
            }
            Opcode::FullCopyingBlock { index, count } => {
                let code = code_constant(code, usize::from(index))?;
                let context = self.pop_arrays(code.num_context)?;
                let copied = self.stack.pop_n(usize::from(count))?;
                self.push_closure(code, copied, Some(context));
            }
        }
        Ok(None)
    }

    fn jump(&mut self, dist: i32) -> Result<()> {
        let frame = self.frame_mut()?;
        let next = frame.pc;
        frame.pc = next
            .checked_add_signed(dist as isize)
            .ok_or_else(|| Error::malformed(next, format!("jump by {dist} leaves the code")))?;
        Ok(())
    }

    fn unary(&mut self, f: impl FnOnce(&Value) -> Result<Value>) -> Result<()> {
        let a = self.stack.pop()?;
        let result = f(&a)?;
        self.stack.push(result);
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(&Value, &Value) -> Result<Value>) -> Result<()> {
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let result = f(&a, &b)?;
        self.stack.push(result);
        Ok(())
    }

    fn compare_ints(&mut self, f: impl FnOnce(i64, i64) -> bool) -> Result<()> {
        self.binary(|a, b| Ok(Value::Bool(f(expect_int(a)?, expect_int(b)?))))
    }

    fn local_array(&self, base: usize, slot: u8) -> Result<ArrayRef> {
        match self.stack.get(base + usize::from(slot))? {
            Value::Array(array) => Ok(Rc::clone(array)),
            other => Err(Error::internal(format!(
                "local {slot} holds {other}, not a shared array"
            ))),
        }
    }

    fn pop_arrays(&mut self, n: usize) -> Result<Vec<ArrayRef>> {
        self.stack
            .pop_n(n)?
            .into_iter()
            .map(|value| match value {
                Value::Array(array) => Ok(array),
                other => Err(Error::internal(format!("context array expected, got {other}"))),
            })
            .collect()
    }

    fn push_closure(
        &mut self,
        code: Rc<CompiledCode>,
        copied: Vec<Value>,
        context: Option<Vec<ArrayRef>>,
    ) {
        self.stack.push(Value::Closure(Rc::new(BlockClosure {
            code,
            copied,
            context,
        })));
    }
}

// =============================================================================
// Operand Helpers
// =============================================================================

fn constant(code: &CompiledCode, index: usize) -> Result<&Value> {
    code.consts
        .get(index)
        .ok_or_else(|| Error::internal(format!("constant #{index} missing from {}", code.name)))
}

fn constant_name(code: &CompiledCode, index: usize) -> Result<&str> {
    match constant(code, index)? {
        Value::String(name) => Ok(name),
        other => Err(Error::internal(format!("name constant expected, got {other}"))),
    }
}

fn code_constant(code: &CompiledCode, index: usize) -> Result<Rc<CompiledCode>> {
    match constant(code, index)? {
        Value::Code(code) => Ok(Rc::clone(code)),
        other => Err(Error::internal(format!("code constant expected, got {other}"))),
    }
}

fn element(items: &[Value], index: usize) -> Result<Value> {
    items.get(index).cloned().ok_or(Error::new(ErrorKind::IndexOutOfBounds {
        index: index as i64,
        length: items.len(),
    }))
}

fn list_expected(value: &Value) -> Error {
    Error::type_mismatch(
        Type::list(Type::Any),
        value.value_type(),
    )
}
