//! # ALU primitives
//!
//! Shared arithmetic for the data-processing executors: the 16 ALU opcodes,
//! barrel-shifter semantics, modified-immediate expansion and the carry/overflow
//! aware adder every arithmetic opcode is built on.
//!
//! ```text
//! ┌────────┬──────┬────────────────────┬────────────┐
//! │ Opcode │ Mnem │ Operation          │ Kind       │
//! ├────────┼──────┼────────────────────┼────────────┤
//! │ 0b0000 │ and  │ Rd = Rn AND Op2    │ Logical    │
//! │ 0b0001 │ eor  │ Rd = Rn XOR Op2    │ Logical    │
//! │ 0b0010 │ sub  │ Rd = Rn - Op2      │ Arithmetic │
//! │ 0b0011 │ rsb  │ Rd = Op2 - Rn      │ Arithmetic │
//! │ 0b0100 │ add  │ Rd = Rn + Op2      │ Arithmetic │
//! │ 0b0101 │ adc  │ Rd = Rn + Op2 + C  │ Arithmetic │
//! │ 0b0110 │ sbc  │ Rd = Rn - Op2 + C-1│ Arithmetic │
//! │ 0b0111 │ rsc  │ Rd = Op2 - Rn + C-1│ Arithmetic │
//! │ 0b1000 │ tst  │ Rn AND Op2 (flags) │ Logical    │
//! │ 0b1001 │ teq  │ Rn XOR Op2 (flags) │ Logical    │
//! │ 0b1010 │ cmp  │ Rn - Op2 (flags)   │ Arithmetic │
//! │ 0b1011 │ cmn  │ Rn + Op2 (flags)   │ Arithmetic │
//! │ 0b1100 │ orr  │ Rd = Rn OR Op2     │ Logical    │
//! │ 0b1101 │ mov  │ Rd = Op2           │ Logical    │
//! │ 0b1110 │ bic  │ Rd = Rn AND NOT Op2│ Logical    │
//! │ 0b1111 │ mvn  │ Rd = NOT Op2       │ Logical    │
//! └────────┴──────┴────────────────────┴────────────┘
//! ```
//!
//! Opcodes `0b1000..=0b1011` only exist with S=1; with S=0 those encodings
//! belong to the miscellaneous space.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// ARM ALU opcode, bits 21-24 of a data-processing instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum AluInstruction {
    /// AND (logical AND)
    And = 0x0,
    /// EOR (logical exclusive OR)
    Eor = 0x1,
    /// SUB (subtract)
    Sub = 0x2,
    /// RSB (reverse subtract)
    Rsb = 0x3,
    /// ADD (addition)
    Add = 0x4,
    /// ADC (add with carry)
    Adc = 0x5,
    /// SBC (subtract with carry)
    Sbc = 0x6,
    /// RSC (reverse subtract with carry)
    Rsc = 0x7,
    /// TST (test bits, flags only)
    Tst = 0x8,
    /// TEQ (test equality, flags only)
    Teq = 0x9,
    /// CMP (compare, flags only)
    Cmp = 0xA,
    /// CMN (compare negated, flags only)
    Cmn = 0xB,
    /// ORR (logical OR)
    Orr = 0xC,
    /// MOV (move)
    Mov = 0xD,
    /// BIC (bit clear)
    Bic = 0xE,
    /// MVN (move negated)
    Mvn = 0xF,
}

impl AluInstruction {
    /// Whether the opcode sets flags from the shifter (logical) or from the
    /// adder (arithmetic).
    #[must_use]
    pub const fn kind(self) -> AluInstructionKind {
        use AluInstruction::{
            Adc, Add, And, Bic, Cmn, Cmp, Eor, Mov, Mvn, Orr, Rsb, Rsc, Sbc, Sub, Teq, Tst,
        };
        match self {
            And | Eor | Tst | Teq | Orr | Mov | Bic | Mvn => AluInstructionKind::Logical,
            Sub | Rsb | Add | Adc | Sbc | Rsc | Cmp | Cmn => AluInstructionKind::Arithmetic,
        }
    }

    /// Whether the opcode discards its result and only updates flags.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        use AluInstruction::{Cmn, Cmp, Teq, Tst};
        matches!(self, Tst | Teq | Cmp | Cmn)
    }
}

impl From<u32> for AluInstruction {
    fn from(opcode: u32) -> Self {
        use AluInstruction::{
            Adc, Add, And, Bic, Cmn, Cmp, Eor, Mov, Mvn, Orr, Rsb, Rsc, Sbc, Sub, Teq, Tst,
        };
        match opcode {
            0x0 => And,
            0x1 => Eor,
            0x2 => Sub,
            0x3 => Rsb,
            0x4 => Add,
            0x5 => Adc,
            0x6 => Sbc,
            0x7 => Rsc,
            0x8 => Tst,
            0x9 => Teq,
            0xA => Cmp,
            0xB => Cmn,
            0xC => Orr,
            0xD => Mov,
            0xE => Bic,
            0xF => Mvn,
            _ => unreachable!(),
        }
    }
}

impl Display for AluInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use AluInstruction::{
            Adc, Add, And, Bic, Cmn, Cmp, Eor, Mov, Mvn, Orr, Rsb, Rsc, Sbc, Sub, Teq, Tst,
        };
        match self {
            And => f.write_str("and"),
            Eor => f.write_str("eor"),
            Sub => f.write_str("sub"),
            Rsb => f.write_str("rsb"),
            Add => f.write_str("add"),
            Adc => f.write_str("adc"),
            Sbc => f.write_str("sbc"),
            Rsc => f.write_str("rsc"),
            Tst => f.write_str("tst"),
            Teq => f.write_str("teq"),
            Cmp => f.write_str("cmp"),
            Cmn => f.write_str("cmn"),
            Orr => f.write_str("orr"),
            Mov => f.write_str("mov"),
            Bic => f.write_str("bic"),
            Mvn => f.write_str("mvn"),
        }
    }
}

/// Categorization of ALU instructions for flag handling.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AluInstructionKind {
    /// Sets N and Z from the result, C from the shifter, leaves V alone.
    Logical,
    /// Sets all of N, Z, C, V from the adder.
    Arithmetic,
}

/// Result of an arithmetic or shift operation with all flag outputs.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub struct ArithmeticOpResult {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
    pub sign: bool,
    pub zero: bool,
}

/// Barrel-shifter operation, bits 5-6 of a register operand plus the
/// RRX special case.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum ShiftKind {
    /// Logical shift left
    Lsl,
    /// Logical shift right
    Lsr,
    /// Arithmetic shift right
    Asr,
    /// Rotate right
    Ror,
    /// Rotate right with extend, encoded as ROR #0
    Rrx,
}

impl From<u32> for ShiftKind {
    fn from(shift_type: u32) -> Self {
        use ShiftKind::{Asr, Lsl, Lsr, Ror};
        match shift_type {
            0b00 => Lsl,
            0b01 => Lsr,
            0b10 => Asr,
            0b11 => Ror,
            _ => unreachable!(),
        }
    }
}

/// Decodes a `(type, imm5)` pair into a shift kind and amount.
///
/// An imm5 of 0 means 32 for LSR and ASR and turns ROR into RRX with an
/// amount of 1.
#[must_use]
pub fn decode_imm_shift(shift_type: u32, imm5: u32) -> (ShiftKind, u32) {
    match shift_type & 0b11 {
        0b00 => (ShiftKind::Lsl, imm5),
        0b01 => (ShiftKind::Lsr, if imm5 == 0 { 32 } else { imm5 }),
        0b10 => (ShiftKind::Asr, if imm5 == 0 { 32 } else { imm5 }),
        _ => {
            if imm5 == 0 {
                (ShiftKind::Rrx, 1)
            } else {
                (ShiftKind::Ror, imm5)
            }
        }
    }
}

/// Applies a barrel-shifter operation, producing the shifted value and the
/// shifter carry-out.
///
/// An amount of 0 is the identity for every kind and passes `carry` through
/// unchanged; [`decode_imm_shift`] has already mapped the encodings where
/// imm5 = 0 means something else.
#[must_use]
pub fn shift(kind: ShiftKind, shift_amount: u32, value: u32, carry: bool) -> ArithmeticOpResult {
    if shift_amount == 0 {
        return ArithmeticOpResult {
            result: value,
            carry,
            ..ArithmeticOpResult::default()
        };
    }
    match kind {
        ShiftKind::Lsl => shift_lsl(shift_amount, value),
        ShiftKind::Lsr => shift_lsr(shift_amount, value),
        ShiftKind::Asr => shift_asr(shift_amount, value),
        ShiftKind::Ror => shift_ror(shift_amount, value),
        ShiftKind::Rrx => ArithmeticOpResult {
            result: (u32::from(carry) << 31) | (value >> 1),
            carry: value.get_bit(0),
            ..ArithmeticOpResult::default()
        },
    }
}

fn shift_lsl(shift_amount: u32, value: u32) -> ArithmeticOpResult {
    match shift_amount {
        1..=31 => ArithmeticOpResult {
            result: value << shift_amount,
            carry: value.get_bit((32 - shift_amount) as u8),
            ..ArithmeticOpResult::default()
        },
        32 => ArithmeticOpResult {
            result: 0,
            carry: value.get_bit(0),
            ..ArithmeticOpResult::default()
        },
        _ => ArithmeticOpResult::default(),
    }
}

fn shift_lsr(shift_amount: u32, value: u32) -> ArithmeticOpResult {
    match shift_amount {
        1..=31 => ArithmeticOpResult {
            result: value >> shift_amount,
            carry: value.get_bit((shift_amount - 1) as u8),
            ..ArithmeticOpResult::default()
        },
        32 => ArithmeticOpResult {
            result: 0,
            carry: value.get_bit(31),
            ..ArithmeticOpResult::default()
        },
        _ => ArithmeticOpResult::default(),
    }
}

fn shift_asr(shift_amount: u32, value: u32) -> ArithmeticOpResult {
    match shift_amount {
        1..=31 => ArithmeticOpResult {
            result: ((value as i32) >> shift_amount) as u32,
            carry: value.get_bit((shift_amount - 1) as u8),
            ..ArithmeticOpResult::default()
        },
        // 32 and beyond saturate to the sign bit.
        _ => ArithmeticOpResult {
            result: ((value as i32) >> 31) as u32,
            carry: value.get_bit(31),
            ..ArithmeticOpResult::default()
        },
    }
}

fn shift_ror(shift_amount: u32, value: u32) -> ArithmeticOpResult {
    let amount = shift_amount % 32;
    if amount == 0 {
        ArithmeticOpResult {
            result: value,
            carry: value.get_bit(31),
            ..ArithmeticOpResult::default()
        }
    } else {
        ArithmeticOpResult {
            result: value.rotate_right(amount),
            carry: value.get_bit((amount - 1) as u8),
            ..ArithmeticOpResult::default()
        }
    }
}

/// Expands a 12-bit modified immediate (8-bit value rotated right by twice
/// the 4-bit rotate field), tracking the shifter carry-out.
#[must_use]
pub fn expand_imm_c(imm12: u32, carry: bool) -> ArithmeticOpResult {
    let imm8 = imm12.get_bits(0..=7);
    let rotate = imm12.get_bits(8..=11);
    shift(ShiftKind::Ror, 2 * rotate, imm8, carry)
}

/// Expands a 12-bit modified immediate when the carry-out is not needed.
#[must_use]
pub fn expand_imm(imm12: u32) -> u32 {
    expand_imm_c(imm12, false).result
}

/// 33-bit addition with full flag outputs.
///
/// Subtractions go through here as `a + NOT(b) + 1` so carry means
/// "no borrow" exactly like the hardware adder.
#[must_use]
pub fn add_with_carry(first: u32, second: u32, carry: bool) -> ArithmeticOpResult {
    let unsigned_sum = u64::from(first) + u64::from(second) + u64::from(carry);
    let signed_sum = i64::from(first as i32) + i64::from(second as i32) + i64::from(carry);
    let result = unsigned_sum as u32;

    ArithmeticOpResult {
        result,
        carry: u64::from(result) != unsigned_sum,
        overflow: i64::from(result as i32) != signed_sum,
        sign: result.get_bit(31),
        zero: result == 0,
    }
}
