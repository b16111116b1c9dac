//! Instruction buffer and bytecode encoder.
//!
//! The compiler appends [`Instr`]s to an [`Emitter`] in program order. When a
//! function body is complete, [`Emitter::finish`] runs the pipeline:
//!
//! 1. **Optimize**: merge `Eq`/`EqInts` followed by `BranchFalse` into a single
//!    `BranchNe`.
//! 2. **Validate**: every backward branch must target a `LoopHead`.
//! 3. **Assign addresses**: start every jump at its largest encoding, then
//!    repeatedly recompute program counters and re-encode until no size
//!    changes. Sizes only ever shrink, so the loop terminates.
//! 4. **Serialize**: concatenate encodings, build the line table, and compute
//!    the frame size by propagating stack effects along control flow.

use std::collections::HashMap;

use tracing::{debug, trace};
use trompe_foundation::{CompiledCode, Error, ErrorKind, NamePath, Result, Value};

use crate::config::CompilerConfig;
use crate::instr::{Instr, InstrDesc, LabelId};
use crate::opcode::Opcode;
use crate::span::Span;

/// Key for constant deduplication.
///
/// Floats key on their bits so NaN constants still dedupe.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ConstKey {
    Unit,
    Bool(bool),
    Int(i64),
    Float(u64),
    Char(char),
    String(String),
    Path(NamePath),
}

impl ConstKey {
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Unit => Some(Self::Unit),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(n) => Some(Self::Int(*n)),
            Value::Float(f) => Some(Self::Float(f.to_bits())),
            Value::Char(c) => Some(Self::Char(*c)),
            Value::String(s) => Some(Self::String(s.to_string())),
            Value::Path(p) => Some(Self::Path(p.clone())),
            // Code, closures and collections are not deduplicated
            _ => None,
        }
    }
}

/// Builds one function's instruction stream and constant pool.
pub struct Emitter {
    instrs: Vec<Instr>,
    consts: Vec<Value>,
    const_map: HashMap<ConstKey, u16>,
    next_label: u32,
    span: Span,
    config: CompilerConfig,
}

impl Emitter {
    /// Creates an empty emitter.
    #[must_use]
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            instrs: Vec::new(),
            consts: Vec::new(),
            const_map: HashMap::new(),
            next_label: 0,
            span: Span::default(),
            config,
        }
    }

    /// Sets the source position attached to subsequent instructions.
    pub fn set_span(&mut self, span: Span) {
        if !span.is_unknown() {
            self.span = span;
        }
    }

    /// Current source position.
    #[must_use]
    pub const fn span(&self) -> Span {
        self.span
    }

    /// Instructions emitted so far.
    #[must_use]
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// The constant pool.
    #[must_use]
    pub fn consts(&self) -> &[Value] {
        &self.consts
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Allocates a fresh label.
    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    /// Places a label before the next instruction.
    pub fn place(&mut self, label: LabelId) {
        self.push(InstrDesc::Label(label));
    }

    /// Appends an instruction descriptor.
    pub fn push(&mut self, desc: InstrDesc) {
        self.instrs.push(Instr::new(desc, self.span));
    }

    /// Appends a plain opcode.
    pub fn emit(&mut self, op: Opcode) {
        self.push(InstrDesc::Op(op));
    }

    /// Appends an unconditional jump.
    pub fn jump(&mut self, label: LabelId) {
        self.push(InstrDesc::Jump(label));
    }

    /// Appends a pop-and-branch-if-false.
    pub fn branch_false(&mut self, label: LabelId) {
        self.push(InstrDesc::BranchFalse(label));
    }

    /// Appends a pop-and-branch-if-true.
    pub fn branch_true(&mut self, label: LabelId) {
        self.push(InstrDesc::BranchTrue(label));
    }

    /// Appends a pop-two-and-branch-if-different.
    pub fn branch_ne(&mut self, label: LabelId) {
        self.push(InstrDesc::BranchNe(label));
    }

    /// Returns true if the last emitted instruction never falls through.
    #[must_use]
    pub fn ends_with_terminator(&self) -> bool {
        self.instrs
            .last()
            .is_some_and(|i| i.desc.is_terminator())
    }

    /// The last emitted descriptor, labels included.
    #[must_use]
    pub fn last(&self) -> Option<InstrDesc> {
        self.instrs.last().map(|i| i.desc)
    }

    /// Replaces the last emitted descriptor, keeping its span.
    pub fn replace_last(&mut self, desc: InstrDesc) {
        match self.instrs.last_mut() {
            Some(last) => *last = Instr::new(desc, last.span),
            None => self.push(desc),
        }
    }

    /// Adds a constant, reusing an equal scalar already in the pool.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` when the pool is full.
    pub fn add_const(&mut self, value: Value) -> Result<u16> {
        let key = ConstKey::from_value(&value);
        if let Some(idx) = key.as_ref().and_then(|k| self.const_map.get(k)) {
            return Ok(*idx);
        }
        let idx = u16::try_from(self.consts.len())
            .map_err(|_| Error::operand_out_of_range("constant pool", i64::from(u16::MAX) + 1))?;
        self.consts.push(value);
        if let Some(key) = key {
            self.const_map.insert(key, idx);
        }
        Ok(idx)
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Runs the pipeline and fills in `code`'s bytes, lines, frame size and
    /// constants. Counts and names already set on `code` are kept.
    ///
    /// # Errors
    ///
    /// Returns `IllegalBackwardBranch`, `UnresolvedLabel`,
    /// `OperandOutOfRange` or `AddressesUnsettled`.
    pub fn finish(mut self, mut code: CompiledCode) -> Result<CompiledCode> {
        if self.config.optimize {
            self.optimize();
        }
        let labels = self.label_positions()?;
        self.check_backward_branches(&labels)?;
        let passes = self.assign_addresses(&labels)?;
        let frame_size = self.frame_size(&labels)?;
        let (bytes, lines) = self.serialize();
        debug!(
            name = %code.name,
            bytes = bytes.len(),
            frame_size,
            passes,
            "assembled code"
        );
        code.bytes = bytes;
        code.lines = lines;
        code.frame_size = frame_size;
        code.consts = self.consts;
        Ok(code)
    }

    /// Merges `Eq` + `BranchFalse` pairs into `BranchNe`.
    ///
    /// Returns the number of merged pairs.
    pub fn optimize(&mut self) -> usize {
        let mut out = Vec::with_capacity(self.instrs.len());
        let mut merged = 0;
        let mut iter = std::mem::take(&mut self.instrs).into_iter().peekable();
        while let Some(instr) = iter.next() {
            let is_eq = matches!(instr.desc, InstrDesc::Op(Opcode::Eq | Opcode::EqInts));
            if is_eq {
                if let Some(InstrDesc::BranchFalse(label)) = iter.peek().map(|next| next.desc) {
                    iter.next();
                    out.push(Instr::new(InstrDesc::BranchNe(label), instr.span));
                    merged += 1;
                    continue;
                }
            }
            out.push(instr);
        }
        self.instrs = out;
        trace!(merged, "optimize pass");
        merged
    }

    fn label_positions(&self) -> Result<HashMap<LabelId, usize>> {
        let mut labels = HashMap::new();
        for (idx, instr) in self.instrs.iter().enumerate() {
            if let InstrDesc::Label(label) = instr.desc {
                labels.insert(label, idx);
            }
        }
        for instr in &self.instrs {
            if let Some(target) = instr.desc.target() {
                if !labels.contains_key(&target) {
                    return Err(Error::new(ErrorKind::UnresolvedLabel(target.0)));
                }
            }
        }
        Ok(labels)
    }

    /// Index of the first real instruction at or after `idx`.
    fn landing(&self, idx: usize) -> usize {
        let mut i = idx;
        while i < self.instrs.len() && self.instrs[i].is_label() {
            i += 1;
        }
        i
    }

    fn check_backward_branches(&self, labels: &HashMap<LabelId, usize>) -> Result<()> {
        for (idx, instr) in self.instrs.iter().enumerate() {
            let Some(target) = instr.desc.target() else {
                continue;
            };
            let label_idx = labels[&target];
            if label_idx > idx {
                continue;
            }
            let landing = self.landing(label_idx);
            let lands_on_loop_head = self
                .instrs
                .get(landing)
                .is_some_and(|i| matches!(i.desc, InstrDesc::Op(Opcode::LoopHead)));
            if !lands_on_loop_head {
                // Addresses are not assigned yet; report instruction indices
                // converted to a conservative pc estimate.
                let pc = self.estimate_pc(idx);
                let target_pc = self.estimate_pc(label_idx);
                return Err(Error::illegal_backward_branch(pc, target_pc));
            }
        }
        Ok(())
    }

    fn estimate_pc(&self, idx: usize) -> usize {
        self.instrs[..idx]
            .iter()
            .map(|i| i.desc.max_size().unwrap_or(3))
            .sum()
    }

    /// Assigns program counters and final encodings; returns the pass count.
    ///
    /// # Errors
    ///
    /// Returns `AddressesUnsettled` if sizes keep changing after the
    /// configured number of passes.
    fn assign_addresses(&mut self, labels: &HashMap<LabelId, usize>) -> Result<usize> {
        for instr in &mut self.instrs {
            instr.size = instr.desc.max_size()?;
        }
        let max_passes = self.config.max_address_passes.max(1);
        for pass in 1..=max_passes {
            let mut pc = 0;
            for instr in &mut self.instrs {
                instr.pc = pc;
                pc += instr.size;
            }
            let mut changed = false;
            for idx in 0..self.instrs.len() {
                let instr = &self.instrs[idx];
                let distance = match instr.desc.target() {
                    Some(label) => {
                        let target = &self.instrs[labels[&label]];
                        let next = instr.pc + instr.size;
                        i32::try_from(target.pc as i64 - next as i64)
                            .map_err(|_| Error::operand_out_of_range("jump distance", i64::MAX))?
                    }
                    None => 0,
                };
                let encoding = match instr.desc.lower(distance)? {
                    Some(op) => op.encode()?,
                    None => crate::opcode::Encoding::default(),
                };
                let instr = &mut self.instrs[idx];
                if encoding.len() != instr.size {
                    changed = true;
                    instr.size = encoding.len();
                }
                instr.encoding = encoding;
            }
            trace!(pass, changed, "address assignment pass");
            if !changed {
                return Ok(pass);
            }
        }
        Err(Error::new(ErrorKind::AddressesUnsettled {
            passes: max_passes,
        }))
    }

    /// Maximum working-stack depth over every control-flow path.
    fn frame_size(&self, labels: &HashMap<LabelId, usize>) -> Result<usize> {
        let len = self.instrs.len();
        let mut depth_in: Vec<Option<i32>> = vec![None; len];
        let mut work = Vec::new();
        let mut max = 0_i32;
        if len > 0 {
            depth_in[0] = Some(0);
            work.push(0);
        }
        while let Some(idx) = work.pop() {
            let Some(depth) = depth_in[idx] else {
                continue;
            };
            let instr = &self.instrs[idx];
            let after = depth + instr.desc.stack_effect();
            if after < 0 {
                return Err(Error::internal(format!(
                    "stack underflow at instruction {idx} ({:?})",
                    instr.desc
                )));
            }
            if after > i32::from(u16::MAX) {
                return Err(Error::internal("unbounded stack growth in loop"));
            }
            max = max.max(depth).max(after);

            let mut successors = Vec::with_capacity(2);
            if let Some(label) = instr.desc.target() {
                successors.push(labels[&label]);
            }
            if !instr.desc.is_terminator() && idx + 1 < len {
                successors.push(idx + 1);
            }
            for succ in successors {
                if depth_in[succ].is_none_or(|d| after > d) {
                    depth_in[succ] = Some(after);
                    work.push(succ);
                }
            }
        }
        Ok(usize::try_from(max).unwrap_or(0))
    }

    fn serialize(&self) -> (Vec<u8>, Vec<(u32, u32)>) {
        let mut bytes = Vec::new();
        let mut lines: Vec<(u32, u32)> = Vec::new();
        for instr in &self.instrs {
            if instr.size == 0 {
                continue;
            }
            if !instr.span.is_unknown() && lines.last().is_none_or(|&(_, l)| l != instr.span.line) {
                let pc = u32::try_from(instr.pc).unwrap_or(u32::MAX);
                lines.push((pc, instr.span.line));
            }
            bytes.extend_from_slice(instr.encoding.as_slice());
        }
        (bytes, lines)
    }
}
