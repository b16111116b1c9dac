//! Bytecode opcodes and their encodings.
//!
//! Opcodes fall into three width classes decided by the opcode byte alone:
//! codes up to [`op::LAST_ONE_BYTE`] are a single byte (small operands are
//! folded into the opcode value), codes up to [`op::LAST_TWO_BYTE`] carry one
//! operand byte, and the remaining codes carry two.
//!
//! [`Opcode`] is the decoded form of one instruction. Encoding always picks the
//! shortest form that can express the operands, so decoding a stream produced
//! by the emitter and re-encoding it yields the same bytes.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_lossless)]

use std::fmt;

use trompe_foundation::{Error, Result};

/// Opcode byte values.
pub mod op {
    // =========================================================================
    // One-byte codes with folded operands
    // =========================================================================

    /// `LoadLocal n` for n in 0..=10.
    pub const LOAD_LOCAL_0: u8 = 0;
    /// Last folded `LoadLocal`.
    pub const LOAD_LOCAL_LAST: u8 = LOAD_LOCAL_0 + 10;
    /// `LoadGlobal n` for n in 0..=10.
    pub const LOAD_GLOBAL_0: u8 = LOAD_LOCAL_LAST + 1;
    /// Last folded `LoadGlobal`.
    pub const LOAD_GLOBAL_LAST: u8 = LOAD_GLOBAL_0 + 10;
    /// `LoadConst n` for n in 0..=14.
    pub const LOAD_CONST_0: u8 = LOAD_GLOBAL_LAST + 1;
    /// Last folded `LoadConst`.
    pub const LOAD_CONST_LAST: u8 = LOAD_CONST_0 + 14;
    /// `LoadValue n` for n in 0..=10.
    pub const LOAD_VALUE_0: u8 = LOAD_CONST_LAST + 1;
    /// Last folded `LoadValue`.
    pub const LOAD_VALUE_LAST: u8 = LOAD_VALUE_0 + 10;
    /// `StorePopLocal n` for n in 0..=7.
    pub const STORE_POP_LOCAL_0: u8 = LOAD_VALUE_LAST + 1;
    /// Last folded `StorePopLocal`.
    pub const STORE_POP_LOCAL_LAST: u8 = STORE_POP_LOCAL_0 + 7;
    /// `StorePopGlobal n` for n in 0..=6.
    pub const STORE_POP_GLOBAL_0: u8 = STORE_POP_LOCAL_LAST + 1;
    /// Last folded `StorePopGlobal`.
    pub const STORE_POP_GLOBAL_LAST: u8 = STORE_POP_GLOBAL_0 + 6;
    /// `LoadIndirect n` for n in 0..=2.
    pub const LOAD_INDIRECT_0: u8 = STORE_POP_GLOBAL_LAST + 1;
    /// Last folded `LoadIndirect`.
    pub const LOAD_INDIRECT_LAST: u8 = LOAD_INDIRECT_0 + 2;
    /// `LoadInt n` for n in 0..=7.
    pub const LOAD_INT_0: u8 = LOAD_INDIRECT_LAST + 1;
    /// Last folded `LoadInt`.
    pub const LOAD_INT_LAST: u8 = LOAD_INT_0 + 7;
    /// Forward jump of 1..=5 bytes.
    pub const SHORT_JUMP_0: u8 = LOAD_INT_LAST + 1;
    /// Last short jump.
    pub const SHORT_JUMP_LAST: u8 = SHORT_JUMP_0 + 4;
    /// Forward branch-if-false of 1..=8 bytes.
    pub const SHORT_BRANCH_FALSE_0: u8 = SHORT_JUMP_LAST + 1;
    /// Last short branch.
    pub const SHORT_BRANCH_FALSE_LAST: u8 = SHORT_BRANCH_FALSE_0 + 7;
    /// `Apply n` for n in 0..=3.
    pub const APPLY_0: u8 = SHORT_BRANCH_FALSE_LAST + 1;
    /// Last folded `Apply`.
    pub const APPLY_LAST: u8 = APPLY_0 + 3;
    /// One-argument `ApplyDirect` of local 0..=9.
    pub const APPLY_DIRECT_1_0: u8 = APPLY_LAST + 1;
    /// Last folded one-argument `ApplyDirect`.
    pub const APPLY_DIRECT_1_LAST: u8 = APPLY_DIRECT_1_0 + 9;
    /// Two-argument `ApplyDirect` of local 0..=9.
    pub const APPLY_DIRECT_2_0: u8 = APPLY_DIRECT_1_LAST + 1;
    /// Last folded two-argument `ApplyDirect`.
    pub const APPLY_DIRECT_2_LAST: u8 = APPLY_DIRECT_2_0 + 9;
    /// Three-argument `ApplyDirect` of local 0..=6.
    pub const APPLY_DIRECT_3_0: u8 = APPLY_DIRECT_2_LAST + 1;
    /// Last folded three-argument `ApplyDirect`.
    pub const APPLY_DIRECT_3_LAST: u8 = APPLY_DIRECT_3_0 + 6;

    // =========================================================================
    // One-byte codes without operands
    // =========================================================================

    /// No operation.
    pub const NOP: u8 = APPLY_DIRECT_3_LAST + 1;
    /// Push unit.
    pub const LOAD_UNIT: u8 = NOP + 1;
    /// Push `true`.
    pub const LOAD_TRUE: u8 = LOAD_UNIT + 1;
    /// Push `false`.
    pub const LOAD_FALSE: u8 = LOAD_TRUE + 1;
    /// Push the empty list.
    pub const LOAD_NIL: u8 = LOAD_FALSE + 1;
    /// Push the head of the list on top, keeping the list.
    pub const LOAD_HEAD: u8 = LOAD_NIL + 1;
    /// Replace the list on top with its tail.
    pub const POP_LOAD_TAIL: u8 = LOAD_HEAD + 1;
    /// Return the value on top.
    pub const RETURN: u8 = POP_LOAD_TAIL + 1;
    /// Return unit.
    pub const RETURN_UNIT: u8 = RETURN + 1;
    /// Return `true`.
    pub const RETURN_TRUE: u8 = RETURN_UNIT + 1;
    /// Return `false`.
    pub const RETURN_FALSE: u8 = RETURN_TRUE + 1;
    /// Marks the only legal target of a backward branch.
    pub const LOOP_HEAD: u8 = RETURN_FALSE + 1;
    /// Structural equality.
    pub const EQ: u8 = LOOP_HEAD + 1;
    /// Structural inequality.
    pub const NE: u8 = EQ + 1;
    /// Less than.
    pub const LT: u8 = NE + 1;
    /// Less or equal.
    pub const LE: u8 = LT + 1;
    /// Greater than.
    pub const GT: u8 = LE + 1;
    /// Greater or equal.
    pub const GE: u8 = GT + 1;
    /// Integer equality.
    pub const EQ_INTS: u8 = GE + 1;
    /// Integer inequality.
    pub const NE_INTS: u8 = EQ_INTS + 1;
    /// Integer less than.
    pub const LT_INTS: u8 = NE_INTS + 1;
    /// Integer less or equal.
    pub const LE_INTS: u8 = LT_INTS + 1;
    /// Integer greater than.
    pub const GT_INTS: u8 = LE_INTS + 1;
    /// Integer greater or equal.
    pub const GE_INTS: u8 = GT_INTS + 1;
    /// Addition.
    pub const ADD: u8 = GE_INTS + 1;
    /// Increment.
    pub const ADD1: u8 = ADD + 1;
    /// Subtraction.
    pub const SUB: u8 = ADD1 + 1;
    /// Decrement.
    pub const SUB1: u8 = SUB + 1;
    /// Multiplication.
    pub const MUL: u8 = SUB1 + 1;
    /// Division.
    pub const DIV: u8 = MUL + 1;
    /// Exponentiation.
    pub const POW: u8 = DIV + 1;
    /// Remainder.
    pub const MOD: u8 = POW + 1;
    /// Negation.
    pub const NEG: u8 = MOD + 1;
    /// Boolean not.
    pub const NOT: u8 = NEG + 1;
    /// Bitwise not.
    pub const BNOT: u8 = NOT + 1;
    /// Shift left.
    pub const LSHIFT: u8 = BNOT + 1;
    /// Logical shift right.
    pub const RSHIFT: u8 = LSHIFT + 1;
    /// Bitwise and.
    pub const BAND: u8 = RSHIFT + 1;
    /// Bitwise or.
    pub const BOR: u8 = BAND + 1;
    /// Bitwise xor.
    pub const BXOR: u8 = BOR + 1;
    /// Push the element count of the tuple or array on top, keeping it.
    pub const COUNT_VALUES: u8 = BXOR + 1;
    /// Drop the top value.
    pub const POP: u8 = COUNT_VALUES + 1;
    /// Drop the value under the top.
    pub const SWAP_POP: u8 = POP + 1;
    /// Duplicate the top value.
    pub const DUP: u8 = SWAP_POP + 1;
    /// `head :: tail`
    pub const CONS: u8 = DUP + 1;
    /// Last one-byte code.
    pub const LAST_ONE_BYTE: u8 = CONS;

    // =========================================================================
    // Two-byte codes
    // =========================================================================

    /// `LoadLocal` with a byte operand.
    pub const X_LOAD_LOCAL: u8 = LAST_ONE_BYTE + 1;
    /// `LoadGlobal` with a byte operand.
    pub const X_LOAD_GLOBAL: u8 = X_LOAD_LOCAL + 1;
    /// `LoadConst` with a byte operand.
    pub const X_LOAD_CONST: u8 = X_LOAD_GLOBAL + 1;
    /// `LoadValue` with a byte operand.
    pub const X_LOAD_VALUE: u8 = X_LOAD_CONST + 1;
    /// `LoadInt` of 0..=255.
    pub const X_LOAD_INT: u8 = X_LOAD_VALUE + 1;
    /// `LoadInt` of -256..=-1, operand is `-(n + 1)`.
    pub const X_LOAD_NEG_INT: u8 = X_LOAD_INT + 1;
    /// `LoadIndirect` with a byte operand.
    pub const X_LOAD_INDIRECT: u8 = X_LOAD_NEG_INT + 1;
    /// Indirect load with array slot and element packed in one byte.
    pub const LOAD_LOCAL_INDIRECT: u8 = X_LOAD_INDIRECT + 1;
    /// `StorePopLocal` with a byte operand.
    pub const X_STORE_POP_LOCAL: u8 = LOAD_LOCAL_INDIRECT + 1;
    /// `StorePopGlobal` with a byte operand.
    pub const X_STORE_POP_GLOBAL: u8 = X_STORE_POP_LOCAL + 1;
    /// Indirect store with array slot and element packed in one byte.
    pub const STORE_POP_LOCAL_INDIRECT: u8 = X_STORE_POP_GLOBAL + 1;
    /// Long jumps; the code selects the high byte of a signed distance.
    pub const LONG_JUMP_0: u8 = STORE_POP_LOCAL_INDIRECT + 1;
    /// Last long jump.
    pub const LONG_JUMP_LAST: u8 = LONG_JUMP_0 + 7;
    /// Long branch-if-false.
    pub const LONG_BRANCH_FALSE_0: u8 = LONG_JUMP_LAST + 1;
    /// Last long branch-if-false.
    pub const LONG_BRANCH_FALSE_LAST: u8 = LONG_BRANCH_FALSE_0 + 7;
    /// Long branch-if-true.
    pub const LONG_BRANCH_TRUE_0: u8 = LONG_BRANCH_FALSE_LAST + 1;
    /// Last long branch-if-true.
    pub const LONG_BRANCH_TRUE_LAST: u8 = LONG_BRANCH_TRUE_0 + 7;
    /// Pop two values and branch forward 1..=256 bytes if they differ.
    pub const BRANCH_NE: u8 = LONG_BRANCH_TRUE_LAST + 1;
    /// `Apply` with a byte arity.
    pub const X_APPLY: u8 = BRANCH_NE + 1;
    /// One-argument `ApplyDirect` with a byte local.
    pub const X_APPLY_DIRECT_1: u8 = X_APPLY + 1;
    /// Two-argument `ApplyDirect` with a byte local.
    pub const X_APPLY_DIRECT_2: u8 = X_APPLY_DIRECT_1 + 1;
    /// Three-argument `ApplyDirect` with a byte local.
    pub const X_APPLY_DIRECT_3: u8 = X_APPLY_DIRECT_2 + 1;
    /// Push a fresh array of n unit values.
    pub const CREATE_ARRAY: u8 = X_APPLY_DIRECT_3 + 1;
    /// Pop n values into a new array.
    pub const CONS_ARRAY: u8 = CREATE_ARRAY + 1;
    /// Pop n values into a new list.
    pub const CONS_LIST: u8 = CONS_ARRAY + 1;
    /// Pop n values into a new tuple.
    pub const CONS_TUPLE: u8 = CONS_LIST + 1;
    /// Build a full closure from a code constant and its context arrays.
    pub const FULL_BLOCK: u8 = CONS_TUPLE + 1;
    /// Last two-byte code.
    pub const LAST_TWO_BYTE: u8 = FULL_BLOCK;

    // =========================================================================
    // Three-byte codes
    // =========================================================================

    /// `LoadLocal` with a 16-bit operand.
    pub const XX_LOAD_LOCAL: u8 = LAST_TWO_BYTE + 1;
    /// `LoadGlobal` with a 16-bit operand.
    pub const XX_LOAD_GLOBAL: u8 = XX_LOAD_LOCAL + 1;
    /// `LoadConst` with a 16-bit operand.
    pub const XX_LOAD_CONST: u8 = XX_LOAD_GLOBAL + 1;
    /// `LoadInt` of a signed 16-bit value.
    pub const XX_LOAD_INT: u8 = XX_LOAD_CONST + 1;
    /// Indirect load with separate array slot and element bytes.
    pub const X_LOAD_LOCAL_INDIRECT: u8 = XX_LOAD_INT + 1;
    /// `StorePopLocal` with a 16-bit operand.
    pub const XX_STORE_POP_LOCAL: u8 = X_LOAD_LOCAL_INDIRECT + 1;
    /// `StorePopGlobal` with a 16-bit operand.
    pub const XX_STORE_POP_GLOBAL: u8 = XX_STORE_POP_LOCAL + 1;
    /// Indirect store with separate array slot and element bytes.
    pub const X_STORE_POP_LOCAL_INDIRECT: u8 = XX_STORE_POP_GLOBAL + 1;
    /// `ApplyDirect` with local and arity bytes.
    pub const XX_APPLY_DIRECT: u8 = X_STORE_POP_LOCAL_INDIRECT + 1;
    /// Build a copying closure: code constant, copied count.
    pub const COPYING_BLOCK: u8 = XX_APPLY_DIRECT + 1;
    /// Build a full-copying closure: code constant, copied count.
    pub const FULL_COPYING_BLOCK: u8 = COPYING_BLOCK + 1;
    /// Call a primitive: name constant, arity.
    pub const PRIMITIVE: u8 = FULL_COPYING_BLOCK + 1;
    /// `BranchNe` with a 16-bit forward distance.
    pub const LONG_BRANCH_NE: u8 = PRIMITIVE + 1;
    /// Jump with a signed 16-bit distance.
    pub const XX_JUMP: u8 = LONG_BRANCH_NE + 1;
    /// Branch-if-false with a signed 16-bit distance.
    pub const XX_BRANCH_FALSE: u8 = XX_JUMP + 1;
    /// Branch-if-true with a signed 16-bit distance.
    pub const XX_BRANCH_TRUE: u8 = XX_BRANCH_FALSE + 1;
    /// Last valid code.
    pub const LAST_CODE: u8 = XX_BRANCH_TRUE;

    /// Index of the zero-distance code inside each long jump/branch range.
    pub const LONG_BASE: i32 = 4;
}

/// Encoded size of the instruction starting with `code`, or `None` for a byte
/// that is not an opcode.
#[must_use]
pub const fn width(code: u8) -> Option<usize> {
    if code <= op::LAST_ONE_BYTE {
        Some(1)
    } else if code <= op::LAST_TWO_BYTE {
        Some(2)
    } else if code <= op::LAST_CODE {
        Some(3)
    } else {
        None
    }
}

/// Signed distance range of the two-byte jump/branch forms.
pub const LONG_RANGE: std::ops::RangeInclusive<i32> = -1024..=1023;
/// Largest distance of a short jump.
pub const MAX_SHORT_JUMP: i32 = (op::SHORT_JUMP_LAST - op::SHORT_JUMP_0) as i32 + 1;
/// Largest distance of a short branch-if-false.
pub const MAX_SHORT_BRANCH: i32 =
    (op::SHORT_BRANCH_FALSE_LAST - op::SHORT_BRANCH_FALSE_0) as i32 + 1;

// =============================================================================
// Encoding
// =============================================================================

/// Up to three encoded bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Encoding {
    bytes: [u8; 3],
    len: u8,
}

impl Encoding {
    const fn one(a: u8) -> Self {
        Self {
            bytes: [a, 0, 0],
            len: 1,
        }
    }

    const fn two(a: u8, b: u8) -> Self {
        Self {
            bytes: [a, b, 0],
            len: 2,
        }
    }

    const fn three(a: u8, b: u8, c: u8) -> Self {
        Self {
            bytes: [a, b, c],
            len: 3,
        }
    }

    const fn wide(a: u8, n: u16) -> Self {
        Self::three(a, (n >> 8) as u8, n as u8)
    }

    /// The encoded bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Number of bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true for the empty encoding of a label.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// No operation.
    Nop,
    /// Push unit.
    LoadUnit,
    /// Push a boolean.
    LoadBool(bool),
    /// Push the empty list.
    LoadNil,
    /// Push a small integer.
    LoadInt(i64),
    /// Push a local slot.
    LoadLocal(u16),
    /// Push a module attribute; operand is the constant holding its name.
    LoadGlobal(u16),
    /// Push a constant.
    LoadConst(u16),
    /// Push the value at a module path; operand is the path constant.
    LoadValue(u16),
    /// Push element n of the tuple or array on top, keeping it.
    LoadIndirect(u8),
    /// Push element `elt` of the array in local slot `array`.
    LoadLocalIndirect {
        /// Slot holding the array.
        array: u8,
        /// Element index.
        elt: u8,
    },
    /// Push the head of the list on top, keeping the list.
    LoadHead,
    /// Replace the list on top with its tail.
    PopLoadTail,
    /// Pop into a local slot.
    StorePopLocal(u16),
    /// Pop into a module attribute of the current module.
    StorePopGlobal(u16),
    /// Pop into element `elt` of the array in local slot `array`.
    StorePopLocalIndirect {
        /// Slot holding the array.
        array: u8,
        /// Element index.
        elt: u8,
    },
    /// Return the top value.
    Return,
    /// Return unit.
    ReturnUnit,
    /// Return a boolean.
    ReturnBool(bool),
    /// Backward-branch target marker.
    LoopHead,
    /// Jump by a signed distance from the next instruction.
    Jump(i32),
    /// Pop; jump if false.
    BranchFalse(i32),
    /// Pop; jump if true.
    BranchTrue(i32),
    /// Pop two; jump if not equal.
    BranchNe(i32),
    /// Apply the callable under n arguments.
    Apply(u8),
    /// Apply the callable in a local slot.
    ApplyDirect {
        /// Slot of the callee.
        local: u8,
        /// Argument count.
        arity: u8,
    },
    /// `a = b`
    Eq,
    /// `a <> b`
    Ne,
    /// `a < b`
    Lt,
    /// `a <= b`
    Le,
    /// `a > b`
    Gt,
    /// `a >= b`
    Ge,
    /// Integer `=`
    EqInts,
    /// Integer `<>`
    NeInts,
    /// Integer `<`
    LtInts,
    /// Integer `<=`
    LeInts,
    /// Integer `>`
    GtInts,
    /// Integer `>=`
    GeInts,
    /// `a + b`
    Add,
    /// `a + 1`
    Add1,
    /// `a - b`
    Sub,
    /// `a - 1`
    Sub1,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a ** b`
    Pow,
    /// `a mod b`
    Mod,
    /// `-a`
    Neg,
    /// `not a`
    Not,
    /// `lnot a`
    Bnot,
    /// `a lsl b`
    Lshift,
    /// `a lsr b`
    Rshift,
    /// `a land b`
    Band,
    /// `a lor b`
    Bor,
    /// `a lxor b`
    Bxor,
    /// Push the element count of the tuple or array on top.
    CountValues,
    /// Drop the top value.
    Pop,
    /// Drop the value under the top.
    SwapPop,
    /// Duplicate the top value.
    Dup,
    /// `head :: tail`
    Cons,
    /// Push a fresh array of n unit values.
    CreateArray(u8),
    /// Pop n values into an array.
    ConsArray(u8),
    /// Pop n values into a list.
    ConsList(u8),
    /// Pop n values into a tuple.
    ConsTuple(u8),
    /// Build a full closure.
    FullBlock(u8),
    /// Build a copying closure.
    CopyingBlock {
        /// Code constant.
        index: u8,
        /// Copied values on the stack.
        count: u8,
    },
    /// Build a full-copying closure.
    FullCopyingBlock {
        /// Code constant.
        index: u8,
        /// Copied values on the stack.
        count: u8,
    },
    /// Call a primitive.
    Primitive {
        /// Constant holding the primitive name.
        index: u8,
        /// Argument count.
        arity: u8,
    },
}

fn folded(
    what: &'static str,
    n: u16,
    first: u8,
    last: u8,
    x: u8,
    xx: Option<u8>,
) -> Result<Encoding> {
    if n <= u16::from(last - first) {
        Ok(Encoding::one(first + n as u8))
    } else if n <= 255 {
        Ok(Encoding::two(x, n as u8))
    } else if let Some(xx) = xx {
        Ok(Encoding::wide(xx, n))
    } else {
        Err(Error::operand_out_of_range(what, i64::from(n)))
    }
}

fn indirect(array: u8, elt: u8, packed: u8, wide: u8) -> Encoding {
    if array < 16 && elt < 16 {
        Encoding::two(packed, (array << 4) | elt)
    } else {
        Encoding::three(wide, array, elt)
    }
}

fn long_form(what: &'static str, first: u8, wide: u8, dist: i32) -> Result<Encoding> {
    if !LONG_RANGE.contains(&dist) {
        return match i16::try_from(dist) {
            Ok(d) => Ok(Encoding::wide(wide, d as u16)),
            Err(_) => Err(Error::operand_out_of_range(what, i64::from(dist))),
        };
    }
    let hi = dist.div_euclid(256) + op::LONG_BASE;
    let lo = dist.rem_euclid(256);
    Ok(Encoding::two(first + hi as u8, lo as u8))
}

impl Opcode {
    /// Encodes this instruction in its shortest form.
    ///
    /// # Errors
    ///
    /// Returns `OperandOutOfRange` when no form can hold an operand.
    pub fn encode(&self) -> Result<Encoding> {
        use op::*;
        let enc = match *self {
            Self::Nop => Encoding::one(NOP),
            Self::LoadUnit => Encoding::one(LOAD_UNIT),
            Self::LoadBool(true) => Encoding::one(LOAD_TRUE),
            Self::LoadBool(false) => Encoding::one(LOAD_FALSE),
            Self::LoadNil => Encoding::one(LOAD_NIL),
            Self::LoadInt(n) => match n {
                0..=7 => Encoding::one(LOAD_INT_0 + n as u8),
                8..=255 => Encoding::two(X_LOAD_INT, n as u8),
                -256..=-1 => Encoding::two(X_LOAD_NEG_INT, (-(n + 1)) as u8),
                _ => {
                    let Ok(short) = i16::try_from(n) else {
                        return Err(Error::operand_out_of_range("int literal", n));
                    };
                    Encoding::wide(XX_LOAD_INT, short as u16)
                }
            },
            Self::LoadLocal(n) => folded(
                "local",
                n,
                LOAD_LOCAL_0,
                LOAD_LOCAL_LAST,
                X_LOAD_LOCAL,
                Some(XX_LOAD_LOCAL),
            )?,
            Self::LoadGlobal(n) => folded(
                "global",
                n,
                LOAD_GLOBAL_0,
                LOAD_GLOBAL_LAST,
                X_LOAD_GLOBAL,
                Some(XX_LOAD_GLOBAL),
            )?,
            Self::LoadConst(n) => folded(
                "constant",
                n,
                LOAD_CONST_0,
                LOAD_CONST_LAST,
                X_LOAD_CONST,
                Some(XX_LOAD_CONST),
            )?,
            Self::LoadValue(n) => folded(
                "value path",
                n,
                LOAD_VALUE_0,
                LOAD_VALUE_LAST,
                X_LOAD_VALUE,
                None,
            )?,
            Self::LoadIndirect(n) => {
                if n <= LOAD_INDIRECT_LAST - LOAD_INDIRECT_0 {
                    Encoding::one(LOAD_INDIRECT_0 + n)
                } else {
                    Encoding::two(X_LOAD_INDIRECT, n)
                }
            }
            Self::LoadLocalIndirect { array, elt } => {
                indirect(array, elt, LOAD_LOCAL_INDIRECT, X_LOAD_LOCAL_INDIRECT)
            }
            Self::LoadHead => Encoding::one(LOAD_HEAD),
            Self::PopLoadTail => Encoding::one(POP_LOAD_TAIL),
            Self::StorePopLocal(n) => folded(
                "local",
                n,
                STORE_POP_LOCAL_0,
                STORE_POP_LOCAL_LAST,
                X_STORE_POP_LOCAL,
                Some(XX_STORE_POP_LOCAL),
            )?,
            Self::StorePopGlobal(n) => folded(
                "global",
                n,
                STORE_POP_GLOBAL_0,
                STORE_POP_GLOBAL_LAST,
                X_STORE_POP_GLOBAL,
                Some(XX_STORE_POP_GLOBAL),
            )?,
            Self::StorePopLocalIndirect { array, elt } => indirect(
                array,
                elt,
                STORE_POP_LOCAL_INDIRECT,
                X_STORE_POP_LOCAL_INDIRECT,
            ),
            Self::Return => Encoding::one(RETURN),
            Self::ReturnUnit => Encoding::one(RETURN_UNIT),
            Self::ReturnBool(true) => Encoding::one(RETURN_TRUE),
            Self::ReturnBool(false) => Encoding::one(RETURN_FALSE),
            Self::LoopHead => Encoding::one(LOOP_HEAD),
            Self::Jump(dist) => {
                if (1..=MAX_SHORT_JUMP).contains(&dist) {
                    Encoding::one(SHORT_JUMP_0 + (dist - 1) as u8)
                } else {
                    long_form("jump distance", LONG_JUMP_0, XX_JUMP, dist)?
                }
            }
            Self::BranchFalse(dist) => {
                if (1..=MAX_SHORT_BRANCH).contains(&dist) {
                    Encoding::one(SHORT_BRANCH_FALSE_0 + (dist - 1) as u8)
                } else {
                    long_form("branch distance", LONG_BRANCH_FALSE_0, XX_BRANCH_FALSE, dist)?
                }
            }
            Self::BranchTrue(dist) => {
                long_form("branch distance", LONG_BRANCH_TRUE_0, XX_BRANCH_TRUE, dist)?
            }
            Self::BranchNe(dist) => match dist {
                1..=256 => Encoding::two(BRANCH_NE, (dist - 1) as u8),
                257..=65_535 => Encoding::wide(LONG_BRANCH_NE, dist as u16),
                _ => return Err(Error::operand_out_of_range("branch distance", i64::from(dist))),
            },
            Self::Apply(n) => {
                if n <= APPLY_LAST - APPLY_0 {
                    Encoding::one(APPLY_0 + n)
                } else {
                    Encoding::two(X_APPLY, n)
                }
            }
            Self::ApplyDirect { local, arity } => match arity {
                1 if local <= APPLY_DIRECT_1_LAST - APPLY_DIRECT_1_0 => {
                    Encoding::one(APPLY_DIRECT_1_0 + local)
                }
                2 if local <= APPLY_DIRECT_2_LAST - APPLY_DIRECT_2_0 => {
                    Encoding::one(APPLY_DIRECT_2_0 + local)
                }
                3 if local <= APPLY_DIRECT_3_LAST - APPLY_DIRECT_3_0 => {
                    Encoding::one(APPLY_DIRECT_3_0 + local)
                }
                1 => Encoding::two(X_APPLY_DIRECT_1, local),
                2 => Encoding::two(X_APPLY_DIRECT_2, local),
                3 => Encoding::two(X_APPLY_DIRECT_3, local),
                _ => Encoding::three(XX_APPLY_DIRECT, local, arity),
            },
            Self::Eq => Encoding::one(EQ),
            Self::Ne => Encoding::one(NE),
            Self::Lt => Encoding::one(LT),
            Self::Le => Encoding::one(LE),
            Self::Gt => Encoding::one(GT),
            Self::Ge => Encoding::one(GE),
            Self::EqInts => Encoding::one(EQ_INTS),
            Self::NeInts => Encoding::one(NE_INTS),
            Self::LtInts => Encoding::one(LT_INTS),
            Self::LeInts => Encoding::one(LE_INTS),
            Self::GtInts => Encoding::one(GT_INTS),
            Self::GeInts => Encoding::one(GE_INTS),
            Self::Add => Encoding::one(ADD),
            Self::Add1 => Encoding::one(ADD1),
            Self::Sub => Encoding::one(SUB),
            Self::Sub1 => Encoding::one(SUB1),
            Self::Mul => Encoding::one(MUL),
            Self::Div => Encoding::one(DIV),
            Self::Pow => Encoding::one(POW),
            Self::Mod => Encoding::one(MOD),
            Self::Neg => Encoding::one(NEG),
            Self::Not => Encoding::one(NOT),
            Self::Bnot => Encoding::one(BNOT),
            Self::Lshift => Encoding::one(LSHIFT),
            Self::Rshift => Encoding::one(RSHIFT),
            Self::Band => Encoding::one(BAND),
            Self::Bor => Encoding::one(BOR),
            Self::Bxor => Encoding::one(BXOR),
            Self::CountValues => Encoding::one(COUNT_VALUES),
            Self::Pop => Encoding::one(POP),
            Self::SwapPop => Encoding::one(SWAP_POP),
            Self::Dup => Encoding::one(DUP),
            Self::Cons => Encoding::one(CONS),
            Self::CreateArray(n) => Encoding::two(CREATE_ARRAY, n),
            Self::ConsArray(n) => Encoding::two(CONS_ARRAY, n),
            Self::ConsList(n) => Encoding::two(CONS_LIST, n),
            Self::ConsTuple(n) => Encoding::two(CONS_TUPLE, n),
            Self::FullBlock(index) => Encoding::two(FULL_BLOCK, index),
            Self::CopyingBlock { index, count } => Encoding::three(COPYING_BLOCK, index, count),
            Self::FullCopyingBlock { index, count } => {
                Encoding::three(FULL_COPYING_BLOCK, index, count)
            }
            Self::Primitive { index, arity } => Encoding::three(PRIMITIVE, index, arity),
        };
        Ok(enc)
    }

    /// Decodes the instruction at `pc`, returning it with its size.
    ///
    /// # Errors
    ///
    /// Returns `MalformedBytecode` for an unknown opcode or an instruction
    /// running past the end of `bytes`.
    pub fn decode(bytes: &[u8], pc: usize) -> Result<(Self, usize)> {
        use op::*;
        let code = *bytes
            .get(pc)
            .ok_or_else(|| Error::malformed(pc, "pc past end of code"))?;
        let size = width(code).ok_or_else(|| Error::malformed(pc, format!("bad opcode {code}")))?;
        if pc + size > bytes.len() {
            return Err(Error::malformed(pc, "truncated instruction"));
        }
        let b1 = if size > 1 { bytes[pc + 1] } else { 0 };
        let b2 = if size > 2 { bytes[pc + 2] } else { 0 };
        let wide = u16::from_be_bytes([b1, b2]);
        let long = |first: u8| (i32::from(code - first) - LONG_BASE) * 256 + i32::from(b1);

        let decoded = match code {
            LOAD_LOCAL_0..=LOAD_LOCAL_LAST => Self::LoadLocal(u16::from(code - LOAD_LOCAL_0)),
            LOAD_GLOBAL_0..=LOAD_GLOBAL_LAST => Self::LoadGlobal(u16::from(code - LOAD_GLOBAL_0)),
            LOAD_CONST_0..=LOAD_CONST_LAST => Self::LoadConst(u16::from(code - LOAD_CONST_0)),
            LOAD_VALUE_0..=LOAD_VALUE_LAST => Self::LoadValue(u16::from(code - LOAD_VALUE_0)),
            STORE_POP_LOCAL_0..=STORE_POP_LOCAL_LAST => {
                Self::StorePopLocal(u16::from(code - STORE_POP_LOCAL_0))
            }
            STORE_POP_GLOBAL_0..=STORE_POP_GLOBAL_LAST => {
                Self::StorePopGlobal(u16::from(code - STORE_POP_GLOBAL_0))
            }
            LOAD_INDIRECT_0..=LOAD_INDIRECT_LAST => Self::LoadIndirect(code - LOAD_INDIRECT_0),
            LOAD_INT_0..=LOAD_INT_LAST => Self::LoadInt(i64::from(code - LOAD_INT_0)),
            SHORT_JUMP_0..=SHORT_JUMP_LAST => Self::Jump(i32::from(code - SHORT_JUMP_0) + 1),
            SHORT_BRANCH_FALSE_0..=SHORT_BRANCH_FALSE_LAST => {
                Self::BranchFalse(i32::from(code - SHORT_BRANCH_FALSE_0) + 1)
            }
            APPLY_0..=APPLY_LAST => Self::Apply(code - APPLY_0),
            APPLY_DIRECT_1_0..=APPLY_DIRECT_1_LAST => Self::ApplyDirect {
                local: code - APPLY_DIRECT_1_0,
                arity: 1,
            },
            APPLY_DIRECT_2_0..=APPLY_DIRECT_2_LAST => Self::ApplyDirect {
                local: code - APPLY_DIRECT_2_0,
                arity: 2,
            },
            APPLY_DIRECT_3_0..=APPLY_DIRECT_3_LAST => Self::ApplyDirect {
                local: code - APPLY_DIRECT_3_0,
                arity: 3,
            },
            NOP => Self::Nop,
            LOAD_UNIT => Self::LoadUnit,
            LOAD_TRUE => Self::LoadBool(true),
            LOAD_FALSE => Self::LoadBool(false),
            LOAD_NIL => Self::LoadNil,
            LOAD_HEAD => Self::LoadHead,
            POP_LOAD_TAIL => Self::PopLoadTail,
            RETURN => Self::Return,
            RETURN_UNIT => Self::ReturnUnit,
            RETURN_TRUE => Self::ReturnBool(true),
            RETURN_FALSE => Self::ReturnBool(false),
            LOOP_HEAD => Self::LoopHead,
            EQ => Self::Eq,
            NE => Self::Ne,
            LT => Self::Lt,
            LE => Self::Le,
            GT => Self::Gt,
            GE => Self::Ge,
            EQ_INTS => Self::EqInts,
            NE_INTS => Self::NeInts,
            LT_INTS => Self::LtInts,
            LE_INTS => Self::LeInts,
            GT_INTS => Self::GtInts,
            GE_INTS => Self::GeInts,
            ADD => Self::Add,
            ADD1 => Self::Add1,
            SUB => Self::Sub,
            SUB1 => Self::Sub1,
            MUL => Self::Mul,
            DIV => Self::Div,
            POW => Self::Pow,
            MOD => Self::Mod,
            NEG => Self::Neg,
            NOT => Self::Not,
            BNOT => Self::Bnot,
            LSHIFT => Self::Lshift,
            RSHIFT => Self::Rshift,
            BAND => Self::Band,
            BOR => Self::Bor,
            BXOR => Self::Bxor,
            COUNT_VALUES => Self::CountValues,
            POP => Self::Pop,
            SWAP_POP => Self::SwapPop,
            DUP => Self::Dup,
            CONS => Self::Cons,

            X_LOAD_LOCAL => Self::LoadLocal(u16::from(b1)),
            X_LOAD_GLOBAL => Self::LoadGlobal(u16::from(b1)),
            X_LOAD_CONST => Self::LoadConst(u16::from(b1)),
            X_LOAD_VALUE => Self::LoadValue(u16::from(b1)),
            X_LOAD_INT => Self::LoadInt(i64::from(b1)),
            X_LOAD_NEG_INT => Self::LoadInt(-i64::from(b1) - 1),
            X_LOAD_INDIRECT => Self::LoadIndirect(b1),
            LOAD_LOCAL_INDIRECT => Self::LoadLocalIndirect {
                array: b1 >> 4,
                elt: b1 & 0x0f,
            },
            X_STORE_POP_LOCAL => Self::StorePopLocal(u16::from(b1)),
            X_STORE_POP_GLOBAL => Self::StorePopGlobal(u16::from(b1)),
            STORE_POP_LOCAL_INDIRECT => Self::StorePopLocalIndirect {
                array: b1 >> 4,
                elt: b1 & 0x0f,
            },
            LONG_JUMP_0..=LONG_JUMP_LAST => Self::Jump(long(LONG_JUMP_0)),
            LONG_BRANCH_FALSE_0..=LONG_BRANCH_FALSE_LAST => {
                Self::BranchFalse(long(LONG_BRANCH_FALSE_0))
            }
            LONG_BRANCH_TRUE_0..=LONG_BRANCH_TRUE_LAST => {
                Self::BranchTrue(long(LONG_BRANCH_TRUE_0))
            }
            BRANCH_NE => Self::BranchNe(i32::from(b1) + 1),
            X_APPLY => Self::Apply(b1),
            X_APPLY_DIRECT_1 => Self::ApplyDirect {
                local: b1,
                arity: 1,
            },
            X_APPLY_DIRECT_2 => Self::ApplyDirect {
                local: b1,
                arity: 2,
            },
            X_APPLY_DIRECT_3 => Self::ApplyDirect {
                local: b1,
                arity: 3,
            },
            CREATE_ARRAY => Self::CreateArray(b1),
            CONS_ARRAY => Self::ConsArray(b1),
            CONS_LIST => Self::ConsList(b1),
            CONS_TUPLE => Self::ConsTuple(b1),
            FULL_BLOCK => Self::FullBlock(b1),

            XX_LOAD_LOCAL => Self::LoadLocal(wide),
            XX_LOAD_GLOBAL => Self::LoadGlobal(wide),
            XX_LOAD_CONST => Self::LoadConst(wide),
            XX_LOAD_INT => Self::LoadInt(i64::from(wide as i16)),
            X_LOAD_LOCAL_INDIRECT => Self::LoadLocalIndirect { array: b1, elt: b2 },
            XX_STORE_POP_LOCAL => Self::StorePopLocal(wide),
            XX_STORE_POP_GLOBAL => Self::StorePopGlobal(wide),
            X_STORE_POP_LOCAL_INDIRECT => Self::StorePopLocalIndirect { array: b1, elt: b2 },
            XX_APPLY_DIRECT => Self::ApplyDirect {
                local: b1,
                arity: b2,
            },
            COPYING_BLOCK => Self::CopyingBlock {
                index: b1,
                count: b2,
            },
            FULL_COPYING_BLOCK => Self::FullCopyingBlock {
                index: b1,
                count: b2,
            },
            PRIMITIVE => Self::Primitive {
                index: b1,
                arity: b2,
            },
            LONG_BRANCH_NE => Self::BranchNe(i32::from(wide)),
            XX_JUMP => Self::Jump(i32::from(wide as i16)),
            XX_BRANCH_FALSE => Self::BranchFalse(i32::from(wide as i16)),
            XX_BRANCH_TRUE => Self::BranchTrue(i32::from(wide as i16)),
            _ => return Err(Error::malformed(pc, format!("bad opcode {code}"))),
        };
        Ok((decoded, size))
    }

    /// Returns the signed distance of a jump or branch.
    #[must_use]
    pub const fn jump_distance(&self) -> Option<i32> {
        match *self {
            Self::Jump(d) | Self::BranchFalse(d) | Self::BranchTrue(d) | Self::BranchNe(d) => {
                Some(d)
            }
            _ => None,
        }
    }
}

/// Decodes a whole stream into `(pc, instruction)` pairs.
///
/// # Errors
///
/// Returns `MalformedBytecode` if any instruction fails to decode or a jump
/// lands outside the stream or in the middle of an instruction.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<(usize, Opcode)>> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < bytes.len() {
        let (opcode, size) = Opcode::decode(bytes, pc)?;
        out.push((pc, opcode));
        pc += size;
    }
    let starts: Vec<usize> = out.iter().map(|(pc, _)| *pc).collect();
    for (i, (pc, opcode)) in out.iter().enumerate() {
        if let Some(dist) = opcode.jump_distance() {
            let next = starts.get(i + 1).copied().unwrap_or(bytes.len());
            let target = next as i64 + i64::from(dist);
            let lands = usize::try_from(target)
                .is_ok_and(|t| t == bytes.len() || starts.binary_search(&t).is_ok());
            if !lands {
                let msg = format!("jump target {target} is not an instruction");
                return Err(Error::malformed(*pc, msg));
            }
        }
    }
    Ok(out)
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LoadInt(n) => write!(f, "push int {n}"),
            Self::LoadBool(b) => write!(f, "push {b}"),
            Self::LoadLocal(n) => write!(f, "push local {n}"),
            Self::LoadGlobal(n) => write!(f, "push global #{n}"),
            Self::LoadConst(n) => write!(f, "push const #{n}"),
            Self::LoadValue(n) => write!(f, "push value #{n}"),
            Self::LoadIndirect(n) => write!(f, "push indirect {n}"),
            Self::LoadLocalIndirect { array, elt } => write!(f, "push local {array}[{elt}]"),
            Self::StorePopLocal(n) => write!(f, "pop local {n}"),
            Self::StorePopGlobal(n) => write!(f, "pop global #{n}"),
            Self::StorePopLocalIndirect { array, elt } => write!(f, "pop local {array}[{elt}]"),
            Self::ReturnBool(b) => write!(f, "return {b}"),
            Self::Jump(d) => write!(f, "jump {d:+}"),
            Self::BranchFalse(d) => write!(f, "jump false {d:+}"),
            Self::BranchTrue(d) => write!(f, "jump true {d:+}"),
            Self::BranchNe(d) => write!(f, "jump <> {d:+}"),
            Self::Apply(n) => write!(f, "apply {n}"),
            Self::ApplyDirect { local, arity } => write!(f, "apply local {local} {arity}"),
            Self::CreateArray(n) => write!(f, "create array {n}"),
            Self::ConsArray(n) => write!(f, "cons array {n}"),
            Self::ConsList(n) => write!(f, "cons list {n}"),
            Self::ConsTuple(n) => write!(f, "cons tuple {n}"),
            Self::FullBlock(i) => write!(f, "full block #{i}"),
            Self::CopyingBlock { index, count } => write!(f, "copying block #{index} {count}"),
            Self::FullCopyingBlock { index, count } => {
                write!(f, "full copying block #{index} {count}")
            }
            Self::Primitive { index, arity } => write!(f, "primitive #{index} {arity}"),
            other => {
                let text = format!("{other:?}");
                write!(f, "{}", text.to_lowercase())
            }
        }
    }
}
