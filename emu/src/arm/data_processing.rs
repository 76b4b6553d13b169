//! # Data processing and miscellaneous instructions
//!
//! Second-level decode for the 00x class: the ALU proper, the wide moves
//! MOVW/MOVT, the exclusive monitor pair LDREX/STREX and the extra
//! load/store space carrying halfword, signed and doubleword transfers
//! together with their unprivileged T variants.
//!
//! With the immediate bit (25) set, bits 24:20 split the wide moves off
//! the ALU:
//!
//! ```text
//! ┌───────────┬─────────────────────────────────────────────┐
//! │ op1 24:20 │ Instruction                                 │
//! ├───────────┼─────────────────────────────────────────────┤
//! │ 10000     │ MOVW                                        │
//! │ 10100     │ MOVT                                        │
//! │ 10x10     │ MSR immediate and hints (arrive as          │
//! │           │ hypercalls, so trapping one is an error)    │
//! │ other     │ ALU with a rotated immediate                │
//! └───────────┴─────────────────────────────────────────────┘
//! ```
//!
//! With it clear, bits 7:4 separate the extra load/store space from the
//! register-operand ALU:
//!
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┐
//! │ op2 7:4  │ Instruction                                  │
//! ├──────────┼──────────────────────────────────────────────┤
//! │ 1001     │ LDREX/STREX (multiplies and swaps never      │
//! │          │ trap)                                        │
//! │ 1011     │ LDRH/STRH and LDRHT/STRHT                    │
//! │ 1101     │ LDRSB/LDRD and LDRSBT                        │
//! │ 1111     │ LDRSH/STRD and LDRSHT                        │
//! │ xxx0     │ ALU with an immediate-shifted register       │
//! │ 0xx1     │ Register-shifted ALU (never trapped)         │
//! └──────────┴──────────────────────────────────────────────┘
//! ```
//!
//! The T variants live in the post-indexed encodings with the W bit set
//! and always access guest memory with user-mode permissions.

use crate::arm::addressing::{AddressingMode, Offsetting, align, has_writeback};
use crate::arm::alu::{
    AluInstruction, AluInstructionKind, ArithmeticOpResult, ShiftKind, add_with_carry,
    decode_imm_shift, expand_imm_c, shift,
};
use crate::arm::emulate::{EmulateError, SIZE_OF_INSTRUCTION, condition_passed, unpredictable};
use crate::arm::psr::{PSR_NZC, PSR_NZCV};
use crate::bitwise::Bits;
use crate::vcpu::{GuestFault, REG_LR, REG_PROGRAM_COUNTER, Vcpu};

/// The second operand of an ALU instruction.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum AluOperand {
    Immediate { imm12: u32 },
    Register { rm: u32, kind: ShiftKind, amount: u32 },
}

impl From<u32> for AluOperand {
    fn from(instruction: u32) -> Self {
        if instruction.is_bit_on(25) {
            Self::Immediate {
                imm12: instruction.get_bits(0..=11),
            }
        } else {
            let (kind, amount) =
                decode_imm_shift(instruction.get_bits(5..=6), instruction.get_bits(7..=11));
            Self::Register {
                rm: instruction.get_bits(0..=3),
                kind,
                amount,
            }
        }
    }
}

impl AluOperand {
    /// The shifter runs at execution time because the carry-in comes from
    /// the live CPSR.
    fn compute(self, vcpu: &impl Vcpu) -> ArithmeticOpResult {
        let carry = vcpu.cpsr().carry_flag();
        match self {
            Self::Immediate { imm12 } => expand_imm_c(imm12, carry),
            Self::Register { rm, kind, amount } => {
                shift(kind, amount, operand_register(vcpu, rm), carry)
            }
        }
    }
}

/// The offset operand of the extra load/store space: an 8-bit immediate
/// split across bits 11:8 and 3:0, or a plain register.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum ExtraOffset {
    Immediate { offset: u32 },
    Register { rm: u32 },
}

impl From<u32> for ExtraOffset {
    fn from(instruction: u32) -> Self {
        if instruction.is_bit_on(22) {
            Self::Immediate {
                offset: (instruction.get_bits(8..=11) << 4) | instruction.get_bits(0..=3),
            }
        } else {
            Self::Register {
                rm: instruction.get_bits(0..=3),
            }
        }
    }
}

impl ExtraOffset {
    fn is_register(self) -> bool {
        matches!(self, Self::Register { .. })
    }

    /// Whether the offset is read out of `register`.
    fn uses(self, register: u32) -> bool {
        matches!(self, Self::Register { rm } if rm == register)
    }

    fn value(self, vcpu: &impl Vcpu) -> u32 {
        match self {
            Self::Immediate { offset } => offset,
            Self::Register { rm } => vcpu.register_at(rm),
        }
    }
}

/// A decoded 00x-class instruction, one variant per form.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum DataProcessing {
    Alu {
        opcode: AluInstruction,
        set_flags: bool,
        rn: u32,
        rd: u32,
        operand: AluOperand,
    },
    MoveWide {
        rd: u32,
        imm: u32,
    },
    MoveWideTop {
        rd: u32,
        imm: u32,
    },
    LoadExclusive {
        rn: u32,
        rt: u32,
    },
    StoreExclusive {
        rn: u32,
        rd: u32,
        rt: u32,
    },
    ExtraLoad {
        kind: ExtraLoadKind,
        rn: u32,
        rt: u32,
        offset: ExtraOffset,
        mode: AddressingMode,
        wback: bool,
    },
    ExtraLoadLiteral {
        kind: ExtraLoadKind,
        rt: u32,
        offset: u32,
        offsetting: Offsetting,
    },
    ExtraLoadTranslated {
        kind: ExtraLoadKind,
        rn: u32,
        rt: u32,
        offset: ExtraOffset,
        offsetting: Offsetting,
    },
    StoreHalf {
        rn: u32,
        rt: u32,
        offset: ExtraOffset,
        mode: AddressingMode,
        wback: bool,
    },
    StoreHalfTranslated {
        rn: u32,
        rt: u32,
        offset: ExtraOffset,
        offsetting: Offsetting,
    },
    LoadDual {
        rn: u32,
        rt: u32,
        offset: ExtraOffset,
        mode: AddressingMode,
        wback: bool,
    },
    LoadDualLiteral {
        rt: u32,
        offset: u32,
        offsetting: Offsetting,
    },
    StoreDual {
        rn: u32,
        rt: u32,
        offset: ExtraOffset,
        mode: AddressingMode,
        wback: bool,
    },
    Unpredictable {
        what: &'static str,
    },
}

impl From<u32> for DataProcessing {
    fn from(instruction: u32) -> Self {
        if instruction.is_bit_on(25) {
            return match instruction.get_bits(20..=24) {
                0b1_0000 => Self::MoveWide {
                    rd: instruction.get_bits(12..=15),
                    imm: wide_immediate(instruction),
                },
                0b1_0100 => Self::MoveWideTop {
                    rd: instruction.get_bits(12..=15),
                    imm: wide_immediate(instruction),
                },
                0b1_0010 | 0b1_0110 => Self::Unpredictable {
                    what: "immediate status move",
                },
                _ => Self::alu_form(instruction),
            };
        }

        match instruction.get_bits(4..=7) {
            0b1001 => match instruction.get_bits(20..=24) {
                0b1_1000 => Self::StoreExclusive {
                    rn: instruction.get_bits(16..=19),
                    rd: instruction.get_bits(12..=15),
                    rt: instruction.get_bits(0..=3),
                },
                0b1_1001 => Self::LoadExclusive {
                    rn: instruction.get_bits(16..=19),
                    rt: instruction.get_bits(12..=15),
                },
                _ => Self::Unpredictable {
                    what: "multiply or swap",
                },
            },
            op2 @ (0b1011 | 0b1101 | 0b1111) => Self::extra_form(instruction, op2),
            _ if instruction.is_bit_on(4) => Self::Unpredictable {
                what: "register-shifted operand",
            },
            _ if instruction.get_bits(20..=24) & 0b1_1001 == 0b1_0000 => Self::Unpredictable {
                what: "miscellaneous encoding",
            },
            _ => Self::alu_form(instruction),
        }
    }
}

impl DataProcessing {
    fn alu_form(instruction: u32) -> Self {
        Self::Alu {
            opcode: AluInstruction::from(instruction.get_bits(21..=24)),
            set_flags: instruction.is_bit_on(20),
            rn: instruction.get_bits(16..=19),
            rd: instruction.get_bits(12..=15),
            operand: AluOperand::from(instruction),
        }
    }

    /// Second-level decode of the extra load/store columns.
    fn extra_form(instruction: u32, op2: u32) -> Self {
        let load = instruction.is_bit_on(20);
        let translated = instruction.is_bit_off(24) && instruction.is_bit_on(21);
        let rn = instruction.get_bits(16..=19);
        let rt = instruction.get_bits(12..=15);
        let offset = ExtraOffset::from(instruction);
        let mode = AddressingMode::from_instruction(instruction);

        use ExtraLoadKind::*;
        if translated {
            return match (op2, load) {
                (0b1011, true) => Self::ExtraLoadTranslated {
                    kind: UnsignedHalf,
                    rn,
                    rt,
                    offset,
                    offsetting: mode.offsetting,
                },
                (0b1011, false) => Self::StoreHalfTranslated {
                    rn,
                    rt,
                    offset,
                    offsetting: mode.offsetting,
                },
                (0b1101, true) => Self::ExtraLoadTranslated {
                    kind: SignedByte,
                    rn,
                    rt,
                    offset,
                    offsetting: mode.offsetting,
                },
                (0b1111, true) => Self::ExtraLoadTranslated {
                    kind: SignedHalf,
                    rn,
                    rt,
                    offset,
                    offsetting: mode.offsetting,
                },
                _ => Self::Unpredictable {
                    what: "post-indexed doubleword with write-back",
                },
            };
        }

        let wback = has_writeback(instruction);
        match (op2, load) {
            (0b1011, true) => Self::extra_load_form(UnsignedHalf, rn, rt, offset, mode, wback),
            (0b1011, false) => Self::StoreHalf {
                rn,
                rt,
                offset,
                mode,
                wback,
            },
            (0b1101, true) => Self::extra_load_form(SignedByte, rn, rt, offset, mode, wback),
            (0b1101, false) => match offset {
                ExtraOffset::Immediate { offset } if rn == REG_PROGRAM_COUNTER => {
                    Self::LoadDualLiteral {
                        rt,
                        offset,
                        offsetting: mode.offsetting,
                    }
                }
                _ => Self::LoadDual {
                    rn,
                    rt,
                    offset,
                    mode,
                    wback,
                },
            },
            (0b1111, true) => Self::extra_load_form(SignedHalf, rn, rt, offset, mode, wback),
            (0b1111, false) => Self::StoreDual {
                rn,
                rt,
                offset,
                mode,
                wback,
            },
            _ => Self::Unpredictable {
                what: "extra load/store encoding",
            },
        }
    }

    /// The halfword and signed loads share the literal carve-out for an
    /// immediate offset against the program counter.
    fn extra_load_form(
        kind: ExtraLoadKind,
        rn: u32,
        rt: u32,
        offset: ExtraOffset,
        mode: AddressingMode,
        wback: bool,
    ) -> Self {
        match offset {
            ExtraOffset::Immediate { offset } if rn == REG_PROGRAM_COUNTER => {
                Self::ExtraLoadLiteral {
                    kind,
                    rt,
                    offset,
                    offsetting: mode.offsetting,
                }
            }
            _ => Self::ExtraLoad {
                kind,
                rn,
                rt,
                offset,
                mode,
                wback,
            },
        }
    }
}

/// Decodes one 00x-class instruction and routes it to its executor.
pub(crate) fn emulate(
    vcpu: &mut impl Vcpu,
    instruction: u32,
) -> Result<Option<u32>, EmulateError> {
    use DataProcessing::*;
    match DataProcessing::from(instruction) {
        Alu {
            opcode,
            set_flags,
            rn,
            rd,
            operand,
        } => alu(vcpu, instruction, opcode, set_flags, rn, rd, operand),
        MoveWide { rd, imm } => move_wide(vcpu, instruction, rd, imm),
        MoveWideTop { rd, imm } => move_wide_top(vcpu, instruction, rd, imm),
        LoadExclusive { rn, rt } => load_exclusive(vcpu, instruction, rn, rt),
        StoreExclusive { rn, rd, rt } => store_exclusive(vcpu, instruction, rn, rd, rt),
        ExtraLoad {
            kind,
            rn,
            rt,
            offset,
            mode,
            wback,
        } => extra_load(vcpu, instruction, kind, rn, rt, offset, mode, wback),
        ExtraLoadLiteral {
            kind,
            rt,
            offset,
            offsetting,
        } => extra_load_literal(vcpu, instruction, kind, rt, offset, offsetting),
        ExtraLoadTranslated {
            kind,
            rn,
            rt,
            offset,
            offsetting,
        } => extra_load_translated(vcpu, instruction, kind, rn, rt, offset, offsetting),
        StoreHalf {
            rn,
            rt,
            offset,
            mode,
            wback,
        } => store_half(vcpu, instruction, rn, rt, offset, mode, wback),
        StoreHalfTranslated {
            rn,
            rt,
            offset,
            offsetting,
        } => store_half_translated(vcpu, instruction, rn, rt, offset, offsetting),
        LoadDual {
            rn,
            rt,
            offset,
            mode,
            wback,
        } => load_dual(vcpu, instruction, rn, rt, offset, mode, wback),
        LoadDualLiteral {
            rt,
            offset,
            offsetting,
        } => load_dual_literal(vcpu, instruction, rt, offset, offsetting),
        StoreDual {
            rn,
            rt,
            offset,
            mode,
            wback,
        } => store_dual(vcpu, instruction, rn, rt, offset, mode, wback),
        Unpredictable { what } => Err(unpredictable(vcpu, instruction, what)),
    }
}

/// Runs one ALU operation with the second operand decoded.
///
/// A program counter destination is refused; guests change the program
/// counter through the dedicated hypercall forms instead.
fn alu(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    opcode: AluInstruction,
    set_flags: bool,
    rn: u32,
    rd: u32,
    operand: AluOperand,
) -> Result<Option<u32>, EmulateError> {
    if rd == REG_PROGRAM_COUNTER && !opcode.is_comparison() {
        return Err(unpredictable(vcpu, instruction, "program counter destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let carry = vcpu.cpsr().carry_flag();
    let operand2 = operand.compute(vcpu);
    let first = operand_register(vcpu, rn);
    let second = operand2.result;

    use AluInstruction::*;
    let outcome = match opcode {
        And | Tst => logical_result(first & second, operand2.carry),
        Eor | Teq => logical_result(first ^ second, operand2.carry),
        Sub | Cmp => add_with_carry(first, !second, true),
        Rsb => add_with_carry(!first, second, true),
        Add | Cmn => add_with_carry(first, second, false),
        Adc => add_with_carry(first, second, carry),
        Sbc => add_with_carry(first, !second, carry),
        Rsc => add_with_carry(!first, second, carry),
        Orr => logical_result(first | second, operand2.carry),
        Mov => logical_result(second, operand2.carry),
        Bic => logical_result(first & !second, operand2.carry),
        Mvn => logical_result(!second, operand2.carry),
    };

    if set_flags {
        let mask = match opcode.kind() {
            AluInstructionKind::Logical => PSR_NZC,
            AluInstructionKind::Arithmetic => PSR_NZCV,
        };
        vcpu.set_cpsr(flags_word(&outcome), mask);
    }
    if !opcode.is_comparison() {
        vcpu.set_register_at(rd, outcome.result);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// Builds the flags view of a logical operation. Carry comes from the
/// shifter and the overflow flag is left to the caller's mask.
fn logical_result(result: u32, shifter_carry: bool) -> ArithmeticOpResult {
    ArithmeticOpResult {
        result,
        carry: shifter_carry,
        sign: result.is_bit_on(31),
        zero: result == 0,
        ..ArithmeticOpResult::default()
    }
}

/// Packs result flags into the top four status bits.
fn flags_word(outcome: &ArithmeticOpResult) -> u32 {
    (u32::from(outcome.sign) << 31)
        | (u32::from(outcome.zero) << 30)
        | (u32::from(outcome.carry) << 29)
        | (u32::from(outcome.overflow) << 28)
}

/// Reads an ALU operand register. The program counter reads as the
/// instruction address plus 8, the value the real pipeline exposes.
fn operand_register(vcpu: &impl Vcpu, index: u32) -> u32 {
    let value = vcpu.register_at(index);
    if index == REG_PROGRAM_COUNTER {
        value.wrapping_add(8)
    } else {
        value
    }
}

fn move_wide(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rd: u32,
    imm: u32,
) -> Result<Option<u32>, EmulateError> {
    if rd == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    vcpu.set_register_at(rd, imm);
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// MOVT replaces the top halfword and leaves the bottom one alone.
fn move_wide_top(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rd: u32,
    imm: u32,
) -> Result<Option<u32>, EmulateError> {
    if rd == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let low = vcpu.register_at(rd) & 0xFFFF;
    vcpu.set_register_at(rd, (imm << 16) | low);
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// The 16-bit immediate of MOVW/MOVT, split across bits 19:16 and 11:0.
fn wide_immediate(instruction: u32) -> u32 {
    (instruction.get_bits(16..=19) << 12) | instruction.get_bits(0..=11)
}

fn load_exclusive(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    rt: u32,
) -> Result<Option<u32>, EmulateError> {
    if rn == REG_PROGRAM_COUNTER || rt == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter in exclusive load"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let address = vcpu.register_at(rn);
    let value = vcpu.read_exclusive(address)?;
    vcpu.set_register_at(rt, value);
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// STREX reports the monitor outcome in `Rd`: zero when the store went
/// through, one when the reservation was lost.
fn store_exclusive(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    rd: u32,
    rt: u32,
) -> Result<Option<u32>, EmulateError> {
    if rn == REG_PROGRAM_COUNTER || rd == REG_PROGRAM_COUNTER || rt == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter in exclusive store"));
    }
    if rd == rn || rd == rt {
        return Err(unpredictable(vcpu, instruction, "status destination aliases an operand"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let address = vcpu.register_at(rn);
    let value = vcpu.register_at(rt);
    let stored = vcpu.write_exclusive(address, value)?;
    vcpu.set_register_at(rd, u32::from(!stored));
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// Width and extension of the halfword/signed load family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtraLoadKind {
    UnsignedHalf,
    SignedByte,
    SignedHalf,
}

impl ExtraLoadKind {
    fn read(
        self,
        vcpu: &mut impl Vcpu,
        address: u32,
        user_access: bool,
    ) -> Result<u32, GuestFault> {
        Ok(match self {
            Self::UnsignedHalf => u32::from(vcpu.read_half(address, user_access)?),
            Self::SignedByte => u32::from(vcpu.read_byte(address, user_access)?).sign_extended(8),
            Self::SignedHalf => u32::from(vcpu.read_half(address, user_access)?).sign_extended(16),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn extra_load(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    kind: ExtraLoadKind,
    rn: u32,
    rt: u32,
    offset: ExtraOffset,
    mode: AddressingMode,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER || offset.uses(REG_PROGRAM_COUNTER) {
        return Err(unpredictable(vcpu, instruction, "program counter operand"));
    }
    if wback && (rn == rt || (offset.is_register() && rn == REG_PROGRAM_COUNTER)) {
        return Err(unpredictable(vcpu, instruction, "write-back overlaps the destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let (offset_address, address) = mode.resolve(base, offset.value(vcpu));
    let value = kind.read(vcpu, address, false)?;
    vcpu.set_register_at(rt, value);
    if wback {
        vcpu.set_register_at(rn, offset_address);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn extra_load_literal(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    kind: ExtraLoadKind,
    rt: u32,
    offset: u32,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = align(vcpu.program_counter());
    let address = offsetting.apply(base, offset);
    let value = kind.read(vcpu, address, false)?;
    vcpu.set_register_at(rt, value);
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// The unprivileged loads: post-indexed from the unmodified base, with
/// user-mode permissions and unconditional write-back.
fn extra_load_translated(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    kind: ExtraLoadKind,
    rn: u32,
    rt: u32,
    offset: ExtraOffset,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER
        || rn == REG_PROGRAM_COUNTER
        || rn == rt
        || offset.uses(REG_PROGRAM_COUNTER)
    {
        return Err(unpredictable(vcpu, instruction, "unprivileged load operands"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let offset = offset.value(vcpu);
    let base = vcpu.register_at(rn);
    let value = kind.read(vcpu, base, true)?;
    vcpu.set_register_at(rt, value);
    vcpu.set_register_at(rn, offsetting.apply(base, offset));
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn store_half(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    rt: u32,
    offset: ExtraOffset,
    mode: AddressingMode,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER || offset.uses(REG_PROGRAM_COUNTER) {
        return Err(unpredictable(vcpu, instruction, "program counter operand"));
    }
    if wback && (rn == REG_PROGRAM_COUNTER || rn == rt) {
        return Err(unpredictable(vcpu, instruction, "write-back overlaps a source"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let (offset_address, address) = mode.resolve(base, offset.value(vcpu));
    let value = vcpu.register_at(rt) as u16;
    vcpu.write_half(address, value, false)?;
    if wback {
        vcpu.set_register_at(rn, offset_address);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn store_half_translated(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    rt: u32,
    offset: ExtraOffset,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER
        || rn == REG_PROGRAM_COUNTER
        || rn == rt
        || offset.uses(REG_PROGRAM_COUNTER)
    {
        return Err(unpredictable(vcpu, instruction, "unprivileged store operands"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let offset = offset.value(vcpu);
    let base = vcpu.register_at(rn);
    let value = vcpu.register_at(rt) as u16;
    vcpu.write_half(base, value, true)?;
    vcpu.set_register_at(rn, offsetting.apply(base, offset));
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn load_dual(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    rt: u32,
    offset: ExtraOffset,
    mode: AddressingMode,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if rt.is_bit_on(0) {
        return Err(unpredictable(vcpu, instruction, "odd doubleword register"));
    }
    if rt == REG_LR
        || offset.uses(REG_PROGRAM_COUNTER)
        || offset.uses(rt)
        || offset.uses(rt + 1)
    {
        return Err(unpredictable(vcpu, instruction, "register overlap in doubleword load"));
    }
    if wback && (rn == rt || rn == rt + 1 || (offset.is_register() && rn == REG_PROGRAM_COUNTER)) {
        return Err(unpredictable(vcpu, instruction, "write-back overlaps a destination"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let (offset_address, address) = mode.resolve(base, offset.value(vcpu));
    load_dual_words(vcpu, address, rt)?;
    if wback {
        vcpu.set_register_at(rn, offset_address);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn load_dual_literal(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rt: u32,
    offset: u32,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if rt.is_bit_on(0) {
        return Err(unpredictable(vcpu, instruction, "odd doubleword register"));
    }
    if rt == REG_LR {
        return Err(unpredictable(vcpu, instruction, "doubleword into the link register"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = align(vcpu.program_counter());
    let address = offsetting.apply(base, offset);
    load_dual_words(vcpu, address, rt)?;
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// Loads `Rt` then `Rt+1` one word at a time; a fault on the second word
/// leaves the first one already written, matching hardware restartability.
fn load_dual_words(vcpu: &mut impl Vcpu, address: u32, rt: u32) -> Result<(), GuestFault> {
    let low = vcpu.read_word(address, false)?;
    vcpu.set_register_at(rt, low);
    let high = vcpu.read_word(address.wrapping_add(4), false)?;
    vcpu.set_register_at(rt + 1, high);
    Ok(())
}

fn store_dual(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    rt: u32,
    offset: ExtraOffset,
    mode: AddressingMode,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if rt.is_bit_on(0) {
        return Err(unpredictable(vcpu, instruction, "odd doubleword register"));
    }
    if rt == REG_LR || offset.uses(REG_PROGRAM_COUNTER) {
        return Err(unpredictable(vcpu, instruction, "program counter operand"));
    }
    if wback && (rn == REG_PROGRAM_COUNTER || rn == rt || rn == rt + 1) {
        return Err(unpredictable(vcpu, instruction, "write-back overlaps a source"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(rn);
    let (offset_address, address) = mode.resolve(base, offset.value(vcpu));
    store_dual_words(vcpu, address, rt)?;
    if wback {
        vcpu.set_register_at(rn, offset_address);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn store_dual_words(vcpu: &mut impl Vcpu, address: u32, rt: u32) -> Result<(), GuestFault> {
    let low = vcpu.register_at(rt);
    vcpu.write_word(address, low, false)?;
    let high = vcpu.register_at(rt + 1);
    vcpu.write_word(address.wrapping_add(4), high, false)?;
    Ok(())
}
