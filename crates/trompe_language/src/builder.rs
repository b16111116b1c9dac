//! Scope-aware emission helpers.
//!
//! A [`FunctionBuilder`] pairs the [`Emitter`] of one function with the
//! [`LocalScope`] it was compiled against, so the compiler can say "push this
//! variable" and get the right load for wherever the variable lives.

use std::rc::Rc;

use trompe_foundation::{BlockClosure, ClosureKind, CompiledCode, Error, Result, Value};

use crate::config::CompilerConfig;
use crate::emitter::Emitter;
use crate::instr::InstrDesc;
use crate::opcode::Opcode;
use crate::scope::{LocalScope, LoopId, SharedGroup, VarId, VarLocation};

fn byte(what: &'static str, n: u16) -> Result<u8> {
    u8::try_from(n).map_err(|_| Error::operand_out_of_range(what, i64::from(n)))
}

/// Emission state for one function or unit.
pub struct FunctionBuilder {
    /// Instruction buffer.
    pub emitter: Emitter,
    /// Resolved scope of the function.
    pub scope: LocalScope,
    file: String,
}

impl FunctionBuilder {
    /// Starts a function.
    #[must_use]
    pub fn new(scope: LocalScope, config: &CompilerConfig) -> Self {
        Self {
            emitter: Emitter::new(config.clone()),
            scope,
            file: config.file.clone(),
        }
    }

    /// Emits a plain opcode.
    pub fn emit(&mut self, op: Opcode) {
        self.emitter.emit(op);
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Pushes the value at a location.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` for shared slots beyond a byte, or when the
    /// constant pool is full.
    pub fn push_location(&mut self, location: &VarLocation) -> Result<()> {
        let op = match location {
            VarLocation::Local(slot) => Opcode::LoadLocal(*slot),
            VarLocation::Shared { array, elt } => Opcode::LoadLocalIndirect {
                array: byte("shared array slot", *array)?,
                elt: byte("shared element", *elt)?,
            },
            VarLocation::Global(name) => {
                Opcode::LoadGlobal(self.emitter.add_const(Value::from(name.as_str()))?)
            }
            VarLocation::Binding(path) => {
                Opcode::LoadValue(self.emitter.add_const(Value::Path(path.clone()))?)
            }
        };
        self.emit(op);
        Ok(())
    }

    /// Pops the top value into a location.
    ///
    /// # Errors
    ///
    /// Returns an internal error for imported bindings, which are read-only.
    pub fn store_pop_location(&mut self, location: &VarLocation) -> Result<()> {
        let op = match location {
            VarLocation::Local(slot) => Opcode::StorePopLocal(*slot),
            VarLocation::Shared { array, elt } => Opcode::StorePopLocalIndirect {
                array: byte("shared array slot", *array)?,
                elt: byte("shared element", *elt)?,
            },
            VarLocation::Global(name) => {
                Opcode::StorePopGlobal(self.emitter.add_const(Value::from(name.as_str()))?)
            }
            VarLocation::Binding(path) => {
                return Err(Error::internal(format!("store to imported binding {path}")));
            }
        };
        self.emit(op);
        Ok(())
    }

    /// Pushes a variable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the variable is not visible from this scope.
    pub fn push_var(&mut self, var: VarId) -> Result<()> {
        let location = self.scope.location(var)?.clone();
        self.push_location(&location)
    }

    /// Pops the top value into a variable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the variable is not visible from this scope.
    pub fn store_pop_var(&mut self, var: VarId) -> Result<()> {
        let location = self.scope.location(var)?.clone();
        self.store_pop_location(&location)
    }

    /// Pushes an integer, inline when it fits 16 bits.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` when the constant pool is full.
    pub fn push_int(&mut self, n: i64) -> Result<()> {
        if i16::try_from(n).is_ok() {
            self.emit(Opcode::LoadInt(n));
        } else {
            let idx = self.emitter.add_const(Value::Int(n))?;
            self.emit(Opcode::LoadConst(idx));
        }
        Ok(())
    }

    /// Pushes a constant.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` when the constant pool is full.
    pub fn push_const(&mut self, value: Value) -> Result<()> {
        let idx = self.emitter.add_const(value)?;
        self.emit(Opcode::LoadConst(idx));
        Ok(())
    }

    // =========================================================================
    // Frames and closures
    // =========================================================================

    /// Emits `CreateArray` for a group and stores the array in its slot.
    fn create_group(&mut self, group: &SharedGroup) -> Result<()> {
        let len = u8::try_from(group.len())
            .map_err(|_| Error::operand_out_of_range("shared array size", i64::MAX))?;
        self.emit(Opcode::CreateArray(len));
        self.emit(Opcode::StorePopLocal(group.slot));
        Ok(())
    }

    /// Creates the scope's own shared array and mirrors shared parameters
    /// into it.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` for arrays or slots beyond encodable
    /// limits.
    pub fn prologue(&mut self) -> Result<()> {
        let Some(group) = self.scope.shared.clone() else {
            return Ok(());
        };
        self.create_group(&group)?;
        for (arg, elt) in self.scope.shared_args() {
            self.emit(Opcode::LoadLocal(arg));
            self.store_pop_location(&VarLocation::Shared {
                array: group.slot,
                elt,
            })?;
        }
        Ok(())
    }

    /// Replaces the array of loop `lp` at the top of each iteration. Loops
    /// whose bodies bind no shared variables emit nothing.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` for arrays beyond a byte.
    pub fn fresh_iteration(&mut self, lp: LoopId) -> Result<()> {
        match self.scope.loop_group(lp).cloned() {
            Some(group) => self.create_group(&group),
            None => Ok(()),
        }
    }

    /// Pushes a closure over `code`, whose scope is `inner`, capturing from
    /// this scope.
    ///
    /// # Errors
    ///
    /// Returns an internal error if this scope cannot reach an array the
    /// closure needs.
    pub fn push_closure(&mut self, code: CompiledCode, inner: &LocalScope) -> Result<()> {
        let code = Rc::new(code);
        if inner.kind() == ClosureKind::Clean {
            return self.push_const(Value::Closure(Rc::new(BlockClosure::clean(code))));
        }
        let index = self.emitter.add_const(Value::Code(code))?;
        for var in &inner.copied {
            self.push_var(*var)?;
        }
        for key in &inner.context {
            let slot = self.scope.group_slot(*key).ok_or_else(|| {
                Error::internal(format!(
                    "scope {} cannot pass the array {key} to {}",
                    self.scope.name, inner.name
                ))
            })?;
            self.emit(Opcode::LoadLocal(slot));
        }
        let count = inner.num_copied();
        let context = inner.num_context();
        let desc = match inner.kind() {
            ClosureKind::Copying => InstrDesc::CopyingBlock { index, count },
            ClosureKind::Full => InstrDesc::FullBlock { index, context },
            _ => InstrDesc::FullCopyingBlock {
                index,
                count,
                context,
            },
        };
        self.emitter.push(desc);
        Ok(())
    }

    /// Ends the body: folds a trailing constant load into its return form.
    pub fn epilogue(&mut self) {
        let ret = match self.emitter.last() {
            Some(InstrDesc::Op(Opcode::LoadUnit)) => Some(Opcode::ReturnUnit),
            Some(InstrDesc::Op(Opcode::LoadBool(b))) => Some(Opcode::ReturnBool(b)),
            _ => None,
        };
        match ret {
            Some(op) => self.emitter.replace_last(InstrDesc::Op(op)),
            None => self.emit(Opcode::Return),
        }
    }

    /// Assembles the function.
    ///
    /// # Errors
    ///
    /// Propagates encoder errors.
    pub fn finish(self) -> Result<CompiledCode> {
        let header = CompiledCode {
            file: self.file,
            name: self.scope.name.clone(),
            num_args: self.scope.num_args(),
            num_copied: self.scope.num_copied(),
            num_context: self.scope.num_context(),
            num_temps: self.scope.num_temps(),
            ..CompiledCode::default()
        };
        self.emitter.finish(header)
    }
}
