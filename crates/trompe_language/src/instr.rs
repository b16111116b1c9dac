//! Pre-encoding instructions.
//!
//! The compiler emits [`Instr`]s whose jump operands are [`LabelId`]s rather
//! than byte distances. The emitter assigns addresses, resolves labels, and
//! lowers each descriptor to an [`Opcode`].

use std::fmt;

use trompe_foundation::{Error, Result};

use crate::opcode::{Encoding, Opcode};
use crate::span::Span;

/// A jump target, placed with [`InstrDesc::Label`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// What an instruction does, before encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrDesc {
    /// Zero-size marker naming the next instruction's address.
    Label(LabelId),
    /// Unconditional jump.
    Jump(LabelId),
    /// Pop; jump if false.
    BranchFalse(LabelId),
    /// Pop; jump if true.
    BranchTrue(LabelId),
    /// Pop two; jump if not equal.
    BranchNe(LabelId),
    /// Build a full closure from `context` shared arrays on the stack.
    FullBlock {
        /// Code constant.
        index: u16,
        /// Shared arrays popped.
        context: usize,
    },
    /// Build a copying closure from `count` values on the stack.
    CopyingBlock {
        /// Code constant.
        index: u16,
        /// Copied values popped.
        count: usize,
    },
    /// Build a full-copying closure: copied values, then shared arrays.
    FullCopyingBlock {
        /// Code constant.
        index: u16,
        /// Copied values popped.
        count: usize,
        /// Shared arrays popped.
        context: usize,
    },
    /// Call a primitive by name constant.
    Primitive {
        /// Constant holding the name.
        index: u16,
        /// Arguments popped.
        arity: usize,
    },
    /// Any instruction without label or block operands.
    Op(Opcode),
}

fn narrow(what: &'static str, n: impl TryInto<u8> + Copy + Into<i64>) -> Result<u8> {
    n.try_into()
        .map_err(|_| Error::operand_out_of_range(what, n.into()))
}

fn narrow_count(what: &'static str, n: usize) -> Result<u8> {
    u8::try_from(n)
        .map_err(|_| Error::operand_out_of_range(what, i64::try_from(n).unwrap_or(i64::MAX)))
}

impl InstrDesc {
    /// Net change of stack depth when this instruction runs.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    pub fn stack_effect(&self) -> i32 {
        match *self {
            Self::Label(_) | Self::Jump(_) => 0,
            Self::BranchFalse(_) | Self::BranchTrue(_) => -1,
            Self::BranchNe(_) => -2,
            Self::FullBlock { context, .. } => 1 - context as i32,
            Self::CopyingBlock { count, .. } | Self::Primitive { arity: count, .. } => {
                1 - count as i32
            }
            Self::FullCopyingBlock { count, context, .. } => 1 - count as i32 - context as i32,
            Self::Op(op) => opcode_effect(op),
        }
    }

    /// Label this instruction may transfer control to.
    #[must_use]
    pub const fn target(&self) -> Option<LabelId> {
        match *self {
            Self::Jump(l) | Self::BranchFalse(l) | Self::BranchTrue(l) | Self::BranchNe(l) => {
                Some(l)
            }
            _ => None,
        }
    }

    /// Returns true if control never falls through to the next instruction.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump(_)
                | Self::Op(
                    Opcode::Return
                        | Opcode::ReturnUnit
                        | Opcode::ReturnBool(_)
                        | Opcode::Jump(_)
                )
        )
    }

    /// Largest encoding this instruction may need.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` if an operand fits no encoding.
    pub fn max_size(&self) -> Result<usize> {
        match self {
            Self::Label(_) => Ok(0),
            Self::Jump(_) | Self::BranchFalse(_) | Self::BranchTrue(_) | Self::BranchNe(_) => Ok(3),
            _ => match self.lower(0)? {
                Some(op) => Ok(op.encode()?.len()),
                None => Ok(0),
            },
        }
    }

    /// Lowers to a concrete opcode, given the jump distance for jumps.
    ///
    /// Returns `None` for labels.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` when a block or primitive operand exceeds a
    /// byte.
    pub fn lower(&self, distance: i32) -> Result<Option<Opcode>> {
        let op = match *self {
            Self::Label(_) => return Ok(None),
            Self::Jump(_) => Opcode::Jump(distance),
            Self::BranchFalse(_) => Opcode::BranchFalse(distance),
            Self::BranchTrue(_) => Opcode::BranchTrue(distance),
            Self::BranchNe(_) => Opcode::BranchNe(distance),
            Self::FullBlock { index, .. } => Opcode::FullBlock(narrow("code constant", index)?),
            Self::CopyingBlock { index, count } => Opcode::CopyingBlock {
                index: narrow("code constant", index)?,
                count: narrow_count("copied count", count)?,
            },
            Self::FullCopyingBlock { index, count, .. } => Opcode::FullCopyingBlock {
                index: narrow("code constant", index)?,
                count: narrow_count("copied count", count)?,
            },
            Self::Primitive { index, arity } => Opcode::Primitive {
                index: narrow("primitive name", index)?,
                arity: narrow_count("primitive arity", arity)?,
            },
            Self::Op(op) => op,
        };
        Ok(Some(op))
    }
}

fn opcode_effect(op: Opcode) -> i32 {
    match op {
        Opcode::Nop
        | Opcode::LoopHead
        | Opcode::PopLoadTail
        | Opcode::Jump(_)
        | Opcode::ReturnUnit
        | Opcode::ReturnBool(_)
        | Opcode::Add1
        | Opcode::Sub1
        | Opcode::Neg
        | Opcode::Not
        | Opcode::Bnot => 0,
        Opcode::LoadUnit
        | Opcode::LoadBool(_)
        | Opcode::LoadNil
        | Opcode::LoadInt(_)
        | Opcode::LoadLocal(_)
        | Opcode::LoadGlobal(_)
        | Opcode::LoadConst(_)
        | Opcode::LoadValue(_)
        | Opcode::LoadIndirect(_)
        | Opcode::LoadLocalIndirect { .. }
        | Opcode::LoadHead
        | Opcode::CountValues
        | Opcode::Dup
        | Opcode::CreateArray(_) => 1,
        Opcode::StorePopLocal(_)
        | Opcode::StorePopGlobal(_)
        | Opcode::StorePopLocalIndirect { .. }
        | Opcode::Return
        | Opcode::BranchFalse(_)
        | Opcode::BranchTrue(_)
        | Opcode::Pop
        | Opcode::SwapPop
        | Opcode::Eq
        | Opcode::Ne
        | Opcode::Lt
        | Opcode::Le
        | Opcode::Gt
        | Opcode::Ge
        | Opcode::EqInts
        | Opcode::NeInts
        | Opcode::LtInts
        | Opcode::LeInts
        | Opcode::GtInts
        | Opcode::GeInts
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Pow
        | Opcode::Mod
        | Opcode::Lshift
        | Opcode::Rshift
        | Opcode::Band
        | Opcode::Bor
        | Opcode::Bxor
        | Opcode::Cons => -1,
        Opcode::BranchNe(_) => -2,
        Opcode::Apply(n) => -i32::from(n),
        Opcode::ApplyDirect { arity, .. } | Opcode::Primitive { arity, .. } => {
            1 - i32::from(arity)
        }
        Opcode::ConsArray(n) | Opcode::ConsList(n) | Opcode::ConsTuple(n) => 1 - i32::from(n),
        Opcode::CopyingBlock { count, .. } => 1 - i32::from(count),
        // Context counts are not encoded; the emitter sees these as descriptors.
        Opcode::FullBlock(_) | Opcode::FullCopyingBlock { .. } => 1,
    }
}

/// One instruction in the emitter's buffer.
#[derive(Clone, Debug)]
pub struct Instr {
    /// What it does.
    pub desc: InstrDesc,
    /// Source position it was emitted for.
    pub span: Span,
    /// Assigned program counter.
    pub pc: usize,
    /// Current byte size; zero for labels.
    pub size: usize,
    /// Final encoding, filled in by address assignment.
    pub encoding: Encoding,
}

impl Instr {
    /// Creates an unplaced instruction.
    #[must_use]
    pub fn new(desc: InstrDesc, span: Span) -> Self {
        Self {
            desc,
            span,
            pc: 0,
            size: 0,
            encoding: Encoding::default(),
        }
    }

    /// Returns true for a pure label.
    #[must_use]
    pub const fn is_label(&self) -> bool {
        matches!(self.desc, InstrDesc::Label(_))
    }
}
