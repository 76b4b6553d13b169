//! # Hypercall instructions
//!
//! The guest kernel is patched so that every instruction the hypervisor has
//! to emulate but cannot trap natively is replaced by an SVC word carrying
//! the original operands. Bits 23:20 identify the operation:
//!
//! ```text
//! ┌───────────┬──────────────────────────────────────────────┐
//! │ id 23:20  │ Operation                                    │
//! ├───────────┼──────────────────────────────────────────────┤
//! │ 0000      │ By bits 19:17: CPS, MRS, MSR (immediate),    │
//! │           │ MSR (register), RFE, SRS, WFI                │
//! │ 0001-1000 │ LDM, exception return or user registers,     │
//! │           │ with P, U and W in bits 2:0 of `id - 1`      │
//! │ 1001-1100 │ STM, user registers, with P and U in         │
//! │           │ bits 1:0 of `id - 9`                         │
//! │ 1101      │ SUBS pc, lr with a shifted register operand  │
//! │ 1110      │ SUBS pc, lr with an immediate operand        │
//! │ 1111      │ Unallocated                                  │
//! └───────────┴──────────────────────────────────────────────┘
//! ```
//!
//! The condition field is checked once here; the patched word keeps the
//! original instruction's condition.
//!
//! The exception-return forms (RFE, the LDM exception return and SUBS with
//! a program counter destination) restore the CPSR from the banked SPSR or
//! from memory and then drop the virtual interrupt lines the hypervisor
//! raised when it injected the exception being returned from.

use crate::arm::addressing::{Indexing, Offsetting, block_transfer_start, page_chunks};
use crate::arm::alu::{ShiftKind, add_with_carry, decode_imm_shift, expand_imm, shift};
use crate::arm::cpu_modes::Mode;
use crate::arm::emulate::{EmulateError, SIZE_OF_INSTRUCTION, condition_passed, unpredictable};
use crate::arm::psr::{
    PSR_ALL_BITS, PSR_ASYNC_ABORT_DISABLE, PSR_FIQ_DISABLE, PSR_IRQ_DISABLE, PSR_MODE_MASK,
};
use crate::bitwise::Bits;
use crate::vcpu::{
    DATA_ABORT_IRQ, EXTERNAL_FIQ, EXTERNAL_IRQ, PREFETCH_ABORT_IRQ, REG_LR,
    REG_PROGRAM_COUNTER, REG_SP, SOFT_IRQ, UNDEF_INST_IRQ, Vcpu,
};

/// The second operand of a SUBS return, already expanded for the
/// immediate form.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum SubsOperand {
    Register { rm: u32, kind: ShiftKind, amount: u32 },
    Immediate { value: u32 },
}

impl SubsOperand {
    fn register_form(instruction: u32) -> Self {
        let (kind, amount) =
            decode_imm_shift(instruction.get_bits(5..=6), instruction.get_bits(7..=11));
        Self::Register {
            rm: instruction.get_bits(0..=3),
            kind,
            amount,
        }
    }

    /// The register form shifts at execution time; rotation with extend
    /// takes the live carry.
    fn value(self, vcpu: &impl Vcpu) -> u32 {
        match self {
            Self::Register { rm, kind, amount } => {
                let carry = vcpu.cpsr().carry_flag();
                shift(kind, amount, vcpu.register_at(rm), carry).result
            }
            Self::Immediate { value } => value,
        }
    }
}

/// A decoded hypercall, one variant per patched operation.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum Hypercall {
    ChangeState {
        value: u32,
        mask: u32,
    },
    StatusRead {
        rd: u32,
        spsr: bool,
    },
    StatusWriteImmediate {
        value: u32,
        mask: u32,
        spsr: bool,
    },
    StatusWriteRegister {
        rn: u32,
        mask: u32,
        spsr: bool,
    },
    ReturnFromException {
        rn: u32,
        indexing: Indexing,
        offsetting: Offsetting,
        wback: bool,
    },
    StoreReturnState {
        mode_bits: u32,
        indexing: Indexing,
        offsetting: Offsetting,
        wback: bool,
    },
    WaitForInterrupt,
    LoadMultipleReturn {
        rn: u32,
        list: u32,
        indexing: Indexing,
        offsetting: Offsetting,
        wback: bool,
    },
    LoadMultipleUser {
        rn: u32,
        list: u32,
        indexing: Indexing,
        offsetting: Offsetting,
        wback: bool,
    },
    StoreMultipleUser {
        rn: u32,
        list: u32,
        indexing: Indexing,
        offsetting: Offsetting,
    },
    ReturnFromSupervisor {
        opcode: u32,
        rn: u32,
        operand: SubsOperand,
    },
    Unpredictable {
        what: &'static str,
    },
}

impl From<u32> for Hypercall {
    fn from(instruction: u32) -> Self {
        match instruction.get_bits(20..=23) {
            0 => Self::state_form(instruction),
            id @ 1..=8 => Self::load_multiple_form(instruction, id - 1),
            id @ 9..=12 => Self::store_multiple_form(instruction, id - 9),
            13 => Self::ReturnFromSupervisor {
                opcode: instruction.get_bits(16..=19),
                rn: instruction.get_bits(12..=15),
                operand: SubsOperand::register_form(instruction),
            },
            14 => Self::ReturnFromSupervisor {
                opcode: instruction.get_bits(16..=19),
                rn: instruction.get_bits(12..=15),
                operand: SubsOperand::Immediate {
                    value: expand_imm(instruction.get_bits(0..=11)),
                },
            },
            _ => Self::Unpredictable {
                what: "hypercall identifier",
            },
        }
    }
}

impl Hypercall {
    /// The id-zero group, split by bits 19:17.
    fn state_form(instruction: u32) -> Self {
        match instruction.get_bits(17..=19) {
            0 => Self::change_state_form(instruction),
            1 => Self::StatusRead {
                rd: instruction.get_bits(12..=15),
                spsr: instruction.is_bit_on(16),
            },
            2 => Self::StatusWriteImmediate {
                value: expand_imm(instruction.get_bits(0..=11)),
                mask: byte_mask(instruction.get_bits(12..=15)),
                spsr: instruction.is_bit_on(16),
            },
            3 => Self::StatusWriteRegister {
                rn: instruction.get_bits(0..=3),
                mask: byte_mask(instruction.get_bits(12..=15)),
                spsr: instruction.is_bit_on(16),
            },
            4 => Self::ReturnFromException {
                rn: instruction.get_bits(0..=3),
                indexing: Indexing::from(instruction.is_bit_on(16)),
                offsetting: Offsetting::from(instruction.is_bit_on(15)),
                wback: instruction.is_bit_on(14),
            },
            5 => Self::StoreReturnState {
                mode_bits: instruction.get_bits(0..=4),
                indexing: Indexing::from(instruction.is_bit_on(16)),
                offsetting: Offsetting::from(instruction.is_bit_on(15)),
                wback: instruction.is_bit_on(14),
            },
            // The event hints WFE and SEV have no hypervisor counterpart.
            6 if instruction.get_bits(0..=1) == 0 => Self::WaitForInterrupt,
            6 => Self::Unpredictable { what: "event hint" },
            _ => Self::Unpredictable {
                what: "secure monitor call",
            },
        }
    }

    /// CPS. Bit 14 selects a mode change to bits 4:0; bits 13:11 select
    /// the A, I and F masks, which bits 16:15 either set (0b11) or clear
    /// (0b10). Other values of bits 16:15 leave the mask bits alone.
    fn change_state_form(instruction: u32) -> Self {
        let imod = instruction.get_bits(15..=16);
        let mut value = 0;
        let mut mask = 0;
        if instruction.is_bit_on(14) {
            value |= instruction.get_bits(0..=4);
            mask |= PSR_MODE_MASK;
        }
        if imod.is_bit_on(1) {
            for (select, disable_bit) in [
                (13, PSR_ASYNC_ABORT_DISABLE),
                (12, PSR_IRQ_DISABLE),
                (11, PSR_FIQ_DISABLE),
            ] {
                if instruction.is_bit_on(select) {
                    mask |= disable_bit;
                    if imod.is_bit_on(0) {
                        value |= disable_bit;
                    }
                }
            }
        }
        Self::ChangeState { value, mask }
    }

    /// The LDM hypercalls carry P, U and W in the three low bits of the
    /// identifier minus one; a listed program counter selects the
    /// exception return.
    fn load_multiple_form(instruction: u32, encoded: u32) -> Self {
        let rn = instruction.get_bits(16..=19);
        let list = instruction.get_bits(0..=15);
        let indexing = Indexing::from(encoded.is_bit_on(2));
        let offsetting = Offsetting::from(encoded.is_bit_on(1));
        let wback = encoded.is_bit_on(0);
        if list.is_bit_on(15) {
            Self::LoadMultipleReturn {
                rn,
                list,
                indexing,
                offsetting,
                wback,
            }
        } else {
            Self::LoadMultipleUser {
                rn,
                list,
                indexing,
                offsetting,
                wback,
            }
        }
    }

    /// The STM hypercalls carry P and U in the two low bits of the
    /// identifier minus nine.
    fn store_multiple_form(instruction: u32, encoded: u32) -> Self {
        Self::StoreMultipleUser {
            rn: instruction.get_bits(16..=19),
            list: instruction.get_bits(0..=15),
            indexing: Indexing::from(encoded.is_bit_on(1)),
            offsetting: Offsetting::from(encoded.is_bit_on(0)),
        }
    }
}

/// Decodes one patched SVC word and routes it to its executor. The
/// condition is checked once here; a word whose condition fails only
/// advances, whatever its payload.
pub(crate) fn emulate(
    vcpu: &mut impl Vcpu,
    instruction: u32,
) -> Result<Option<u32>, EmulateError> {
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    use Hypercall::*;
    match Hypercall::from(instruction) {
        ChangeState { value, mask } => change_processor_state(vcpu, value, mask),
        StatusRead { rd, spsr } => status_to_register(vcpu, instruction, rd, spsr),
        StatusWriteImmediate { value, mask, spsr } => {
            immediate_to_status(vcpu, instruction, value, mask, spsr)
        }
        StatusWriteRegister { rn, mask, spsr } => {
            register_to_status(vcpu, instruction, rn, mask, spsr)
        }
        ReturnFromException {
            rn,
            indexing,
            offsetting,
            wback,
        } => return_from_exception(vcpu, instruction, rn, indexing, offsetting, wback),
        StoreReturnState {
            mode_bits,
            indexing,
            offsetting,
            wback,
        } => store_return_state(vcpu, instruction, mode_bits, indexing, offsetting, wback),
        WaitForInterrupt => wait_for_interrupt(vcpu),
        LoadMultipleReturn {
            rn,
            list,
            indexing,
            offsetting,
            wback,
        } => load_multiple_return(vcpu, instruction, rn, list, indexing, offsetting, wback),
        LoadMultipleUser {
            rn,
            list,
            indexing,
            offsetting,
            wback,
        } => load_multiple_user(vcpu, instruction, rn, list, indexing, offsetting, wback),
        StoreMultipleUser {
            rn,
            list,
            indexing,
            offsetting,
        } => store_multiple_user(vcpu, instruction, rn, list, indexing, offsetting),
        ReturnFromSupervisor { opcode, rn, operand } => {
            return_from_supervisor(vcpu, instruction, opcode, rn, operand)
        }
        Unpredictable { what } => Err(unpredictable(vcpu, instruction, what)),
    }
}

fn change_processor_state(
    vcpu: &mut impl Vcpu,
    value: u32,
    mask: u32,
) -> Result<Option<u32>, EmulateError> {
    vcpu.set_cpsr(value, mask);
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// MRS.
fn status_to_register(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rd: u32,
    spsr: bool,
) -> Result<Option<u32>, EmulateError> {
    if rd == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter destination"));
    }
    let value = if spsr {
        u32::from(vcpu.spsr())
    } else {
        u32::from(vcpu.cpsr())
    };
    vcpu.set_register_at(rd, value);
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn immediate_to_status(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    value: u32,
    mask: u32,
    spsr: bool,
) -> Result<Option<u32>, EmulateError> {
    if mask == 0 {
        return Err(unpredictable(vcpu, instruction, "status move operands"));
    }
    write_status(vcpu, value & mask, mask, spsr)
}

fn register_to_status(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    mask: u32,
    spsr: bool,
) -> Result<Option<u32>, EmulateError> {
    if mask == 0 || rn == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "status move operands"));
    }
    let value = vcpu.register_at(rn);
    write_status(vcpu, value & mask, mask, spsr)
}

/// Expands the MSR field mask, one selector bit per status byte.
fn byte_mask(selector: u32) -> u32 {
    let mut mask = 0;
    if selector.is_bit_on(0) {
        mask |= 0x0000_00FF;
    }
    if selector.is_bit_on(1) {
        mask |= 0x0000_FF00;
    }
    if selector.is_bit_on(2) {
        mask |= 0x00FF_0000;
    }
    if selector.is_bit_on(3) {
        mask |= 0xFF00_0000;
    }
    mask
}

fn write_status(
    vcpu: &mut impl Vcpu,
    value: u32,
    mask: u32,
    spsr: bool,
) -> Result<Option<u32>, EmulateError> {
    if spsr {
        vcpu.set_spsr(value, mask);
    } else {
        vcpu.set_cpsr(value, mask);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// RFE.
///
/// The base is written back before the mode change so the update lands in
/// the bank the instruction named.
fn return_from_exception(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    indexing: Indexing,
    offsetting: Offsetting,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if rn == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter base"));
    }
    let mode = vcpu.cpsr().mode();
    if mode == Mode::User {
        return Err(unpredictable(vcpu, instruction, "return in user mode"));
    }

    let base = vcpu.register_at(rn);
    let start = block_transfer_start(base, 8, indexing, offsetting);
    let new_pc = vcpu.read_word(start, false)?;
    let new_cpsr = vcpu.read_word(start.wrapping_add(4), false)?;

    if wback {
        vcpu.set_register_at(rn, offsetting.apply(base, 8));
    }
    vcpu.set_cpsr(new_cpsr, PSR_ALL_BITS);
    for &line in pending_exception_lines(mode) {
        vcpu.deassert_irq(line);
    }
    vcpu.set_program_counter(new_pc);
    Ok(None)
}

/// SRS. The stack pointer of the mode named in the low bits is used and
/// optionally written back.
fn store_return_state(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    mode_bits: u32,
    indexing: Indexing,
    offsetting: Offsetting,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    let current = vcpu.cpsr().mode();
    if current == Mode::User || current == Mode::System {
        return Err(unpredictable(
            vcpu,
            instruction,
            "store return state outside an exception mode",
        ));
    }
    let Ok(target) = Mode::try_from(mode_bits) else {
        return Err(unpredictable(vcpu, instruction, "mode field"));
    };

    let base = vcpu.register_of_mode(target, REG_SP);
    let start = block_transfer_start(base, 8, indexing, offsetting);

    let link = vcpu.register_at(REG_LR);
    let spsr = u32::from(vcpu.spsr());
    vcpu.write_word(start, link, false)?;
    vcpu.write_word(start.wrapping_add(4), spsr, false)?;

    if wback {
        vcpu.set_register_of_mode(target, REG_SP, offsetting.apply(base, 8));
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// WFI.
fn wait_for_interrupt(vcpu: &mut impl Vcpu) -> Result<Option<u32>, EmulateError> {
    vcpu.wait_for_irq();
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// LDM with the program counter in the list: loads the listed registers of
/// the current mode, restores the CPSR from the SPSR and jumps to the
/// loaded program counter.
fn load_multiple_return(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    list: u32,
    indexing: Indexing,
    offsetting: Offsetting,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if rn == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter base"));
    }
    if wback && list.is_bit_on(rn as u8) {
        return Err(unpredictable(
            vcpu,
            instruction,
            "write-back register in the load list",
        ));
    }
    let mode = vcpu.cpsr().mode();
    if mode == Mode::User || mode == Mode::System {
        return Err(unpredictable(vcpu, instruction, "return outside an exception mode"));
    }

    let base = vcpu.register_at(rn);
    let length = 4 + 4 * list.get_bits(0..=14).count_ones();
    let start = block_transfer_start(base, length, indexing, offsetting);
    let words = read_block(vcpu, start, length, false)?;

    let mut next = 0_usize;
    for index in 0..=14_u8 {
        if list.is_bit_on(index) {
            vcpu.set_register_at(u32::from(index), words[next]);
            next += 1;
        }
    }
    let new_pc = words[next];

    if wback {
        vcpu.set_register_at(rn, offsetting.apply(base, length));
    }
    let spsr = u32::from(vcpu.spsr());
    vcpu.set_cpsr(spsr, PSR_ALL_BITS);
    for &line in pending_exception_lines(mode) {
        vcpu.deassert_irq(line);
    }
    vcpu.set_program_counter(new_pc);
    Ok(None)
}

/// LDM without the program counter in the list: fills the User bank from a
/// privileged mode. Unprivileged permissions apply to the access.
fn load_multiple_user(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    list: u32,
    indexing: Indexing,
    offsetting: Offsetting,
    wback: bool,
) -> Result<Option<u32>, EmulateError> {
    if rn == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter base"));
    }
    if wback || list == 0 {
        return Err(unpredictable(vcpu, instruction, "user register transfer operands"));
    }
    let mode = vcpu.cpsr().mode();
    if mode == Mode::User || mode == Mode::System {
        return Err(unpredictable(
            vcpu,
            instruction,
            "user register transfer outside an exception mode",
        ));
    }

    let base = vcpu.register_at(rn);
    let length = 4 * list.count_ones();
    let start = block_transfer_start(base, length, indexing, offsetting);
    let words = read_block(vcpu, start, length, true)?;

    let mut next = 0_usize;
    for index in 0..=14_u8 {
        if list.is_bit_on(index) {
            vcpu.set_register_of_mode(Mode::User, u32::from(index), words[next]);
            next += 1;
        }
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// STM of the User bank from a privileged mode. A listed program counter
/// stores its raw value. Unprivileged permissions apply to the access.
fn store_multiple_user(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    rn: u32,
    list: u32,
    indexing: Indexing,
    offsetting: Offsetting,
) -> Result<Option<u32>, EmulateError> {
    if rn == REG_PROGRAM_COUNTER || list == 0 {
        return Err(unpredictable(vcpu, instruction, "user register transfer operands"));
    }
    let mode = vcpu.cpsr().mode();
    if mode == Mode::User || mode == Mode::System {
        return Err(unpredictable(
            vcpu,
            instruction,
            "user register transfer outside an exception mode",
        ));
    }

    let base = vcpu.register_at(rn);
    let length = 4 * list.count_ones();
    let start = block_transfer_start(base, length, indexing, offsetting);

    let mut words = Vec::with_capacity(list.count_ones() as usize);
    for index in 0..=15_u8 {
        if list.is_bit_on(index) {
            words.push(vcpu.register_of_mode(Mode::User, u32::from(index)));
        }
    }
    write_block(vcpu, start, &words, true)?;
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// SUBS pc, lr and friends: any data-processing operation except the
/// comparisons, with the result going to the program counter and the CPSR
/// restored from the SPSR.
fn return_from_supervisor(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    opcode: u32,
    rn: u32,
    operand: SubsOperand,
) -> Result<Option<u32>, EmulateError> {
    let mode = vcpu.cpsr().mode();
    if mode == Mode::User || mode == Mode::System {
        return Err(unpredictable(vcpu, instruction, "return outside an exception mode"));
    }
    if (0x8..=0xB).contains(&opcode) {
        return Err(unpredictable(vcpu, instruction, "comparison opcode"));
    }

    let first = vcpu.register_at(rn);
    let carry = vcpu.cpsr().carry_flag();
    let second = operand.value(vcpu);

    let result = match opcode {
        0x0 => first & second,
        0x1 => first ^ second,
        0x2 => add_with_carry(first, !second, true).result,
        0x3 => add_with_carry(!first, second, true).result,
        0x4 => add_with_carry(first, second, false).result,
        0x5 => add_with_carry(first, second, carry).result,
        0x6 => add_with_carry(first, !second, carry).result,
        0x7 => add_with_carry(!first, second, carry).result,
        0xC => first | second,
        0xD => second,
        0xE => first & !second,
        _ => !second,
    };

    let spsr = u32::from(vcpu.spsr());
    vcpu.set_cpsr(spsr, PSR_ALL_BITS);
    for &line in pending_exception_lines(mode) {
        vcpu.deassert_irq(line);
    }
    vcpu.set_program_counter(result);
    Ok(None)
}

/// The virtual interrupt lines whose injection put the guest into `mode`,
/// dropped again when the guest returns from the exception. User and
/// Monitor are never entered through an injected exception and have
/// nothing to drop.
fn pending_exception_lines(mode: Mode) -> &'static [u32] {
    match mode {
        Mode::Fiq => &[EXTERNAL_FIQ],
        Mode::Irq => &[EXTERNAL_IRQ],
        Mode::Supervisor | Mode::System => &[SOFT_IRQ],
        Mode::Abort => &[PREFETCH_ABORT_IRQ, DATA_ABORT_IRQ],
        Mode::Undefined => &[UNDEF_INST_IRQ],
        Mode::User | Mode::Monitor => &[],
    }
}

/// Reads a word block in at most two page-sized pieces, so a fault arrives
/// before any register changes.
fn read_block(
    vcpu: &mut impl Vcpu,
    start: u32,
    length: u32,
    user_access: bool,
) -> Result<Vec<u32>, EmulateError> {
    let mut buffer = vec![0_u8; length as usize];
    let mut cursor = 0_usize;
    for (address, chunk) in page_chunks(start, length) {
        vcpu.read(address, &mut buffer[cursor..cursor + chunk as usize], user_access)?;
        cursor += chunk as usize;
    }
    Ok(buffer
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

/// Writes a word block in at most two page-sized pieces.
fn write_block(
    vcpu: &mut impl Vcpu,
    start: u32,
    words: &[u32],
    user_access: bool,
) -> Result<(), EmulateError> {
    let buffer: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
    let mut cursor = 0_usize;
    for (address, chunk) in page_chunks(start, buffer.len() as u32) {
        vcpu.write(address, &buffer[cursor..cursor + chunk as usize], user_access)?;
        cursor += chunk as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::arm::addressing::LoadStoreKind;
    use crate::vcpu::testing::{MemAccess, MockVcpu};

    #[test]
    fn decode_selects_the_form() {
        // cpsid if, #0x13
        assert_eq!(
            Hypercall::from(0xEF01_D813),
            Hypercall::ChangeState { value: 0xD3, mask: 0xDF }
        );
        // mrs r1, spsr
        assert_eq!(Hypercall::from(0xEF03_1000), Hypercall::StatusRead { rd: 1, spsr: true });
        // ldmia sp!, {r0, pc}^
        assert_eq!(
            Hypercall::from(0xEF4D_8001),
            Hypercall::LoadMultipleReturn {
                rn: 13,
                list: 0x8001,
                indexing: Indexing::Post,
                offsetting: Offsetting::Up,
                wback: true,
            }
        );
        // stmia r0, {r1, pc}^
        assert_eq!(
            Hypercall::from(0xEFA0_8002),
            Hypercall::StoreMultipleUser {
                rn: 0,
                list: 0x8002,
                indexing: Indexing::Post,
                offsetting: Offsetting::Up,
            }
        );
        // subs pc, lr, #4
        assert_eq!(
            Hypercall::from(0xEFE2_E004),
            Hypercall::ReturnFromSupervisor {
                opcode: 2,
                rn: 14,
                operand: SubsOperand::Immediate { value: 4 },
            }
        );
    }

    #[test]
    fn decode_refuses_the_unallocated_ranges() {
        // sev
        assert_eq!(
            Hypercall::from(0xEF0C_0002),
            Hypercall::Unpredictable { what: "event hint" }
        );
        // smc #0
        assert_eq!(
            Hypercall::from(0xEF0E_0000),
            Hypercall::Unpredictable { what: "secure monitor call" }
        );
        assert_eq!(
            Hypercall::from(0xEFF0_0000),
            Hypercall::Unpredictable { what: "hypercall identifier" }
        );
    }

    #[test]
    fn cps_disables_interrupts_and_switches_mode() {
        // cpsid if, #0x13
        let mut vcpu = MockVcpu::new();
        assert_eq!(emulate(&mut vcpu, 0xEF01_D813), Ok(Some(4)));
        assert_eq!(vcpu.cpsr, 0xD3);
    }

    #[test]
    fn cps_enables_the_selected_interrupt() {
        // cpsie i
        let mut vcpu = MockVcpu::new();
        vcpu.cpsr = 0xD3;
        assert_eq!(emulate(&mut vcpu, 0xEF01_1000), Ok(Some(4)));
        assert_eq!(vcpu.cpsr, 0x53);
    }

    #[test]
    fn cps_mode_change_leaves_unselected_masks_alone() {
        // cps #0x1F with the I select bit set but neither ie nor id
        let mut vcpu = MockVcpu::new();
        vcpu.cpsr = 0xD3;
        assert_eq!(emulate(&mut vcpu, 0xEF00_501F), Ok(Some(4)));
        assert_eq!(vcpu.cpsr, 0xDF);
    }

    #[test]
    fn mrs_reads_the_cpsr() {
        // mrs r1, cpsr
        let mut vcpu = MockVcpu::new();
        assert_eq!(emulate(&mut vcpu, 0xEF02_1000), Ok(Some(4)));
        assert_eq!(vcpu.regs[1], 0x13);
    }

    #[test]
    fn mrs_reads_the_spsr() {
        // mrs r1, spsr
        let mut vcpu = MockVcpu::new();
        vcpu.spsr = 0x10;
        assert_eq!(emulate(&mut vcpu, 0xEF03_1000), Ok(Some(4)));
        assert_eq!(vcpu.regs[1], 0x10);
    }

    #[test]
    fn mrs_to_the_pc_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEF02_F000),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF02_F000
            })
        );
    }

    #[test]
    fn msr_immediate_only_writes_the_selected_bytes() {
        // msr cpsr_c, #0xD3 with flags set
        let mut vcpu = MockVcpu::new();
        vcpu.cpsr = 0x6000_0013;
        assert_eq!(emulate(&mut vcpu, 0xEF04_10D3), Ok(Some(4)));
        assert_eq!(vcpu.cpsr, 0x6000_00D3);
    }

    #[test]
    fn msr_register_writes_the_spsr() {
        // msr spsr_fsxc, r2
        let mut vcpu = MockVcpu::new();
        vcpu.regs[2] = 0x6000_00D3;
        assert_eq!(emulate(&mut vcpu, 0xEF07_F002), Ok(Some(4)));
        assert_eq!(vcpu.spsr, 0x6000_00D3);
    }

    #[test]
    fn msr_with_an_empty_mask_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEF06_0002),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF06_0002
            })
        );
    }

    #[test]
    fn rfe_loads_the_return_state() {
        // rfeia sp!
        let mut vcpu = MockVcpu::new();
        vcpu.regs[13] = 0x40;
        vcpu.store_word(0x40, 0x8000);
        vcpu.store_word(0x44, 0x10);
        assert_eq!(emulate(&mut vcpu, 0xEF08_C00D), Ok(None));
        assert_eq!(vcpu.regs[15], 0x8000);
        assert_eq!(vcpu.cpsr, 0x10);
        assert_eq!(vcpu.regs[13], 0x48);
        assert_eq!(vcpu.deasserted, vec![SOFT_IRQ]);
    }

    #[test]
    fn rfe_decrement_before_reads_below_the_base() {
        // rfedb sp
        let mut vcpu = MockVcpu::new();
        vcpu.regs[13] = 0x48;
        vcpu.store_word(0x40, 0x8000);
        vcpu.store_word(0x44, 0x10);
        assert_eq!(emulate(&mut vcpu, 0xEF09_000D), Ok(None));
        assert_eq!(vcpu.regs[15], 0x8000);
        assert_eq!(vcpu.regs[13], 0x48);
    }

    #[test]
    fn rfe_in_monitor_mode_deasserts_nothing() {
        // rfeia sp!
        let mut vcpu = MockVcpu::new();
        vcpu.cpsr = 0x16;
        vcpu.regs[13] = 0x40;
        vcpu.store_word(0x40, 0x8000);
        vcpu.store_word(0x44, 0x10);
        assert_eq!(emulate(&mut vcpu, 0xEF08_C00D), Ok(None));
        assert_eq!(vcpu.regs[15], 0x8000);
        assert!(vcpu.deasserted.is_empty());
    }

    #[test]
    fn rfe_in_user_mode_is_refused() {
        let mut vcpu = MockVcpu::new();
        vcpu.cpsr = 0x10;
        assert_eq!(
            emulate(&mut vcpu, 0xEF08_C00D),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF08_C00D
            })
        );
    }

    #[test]
    fn srs_stores_into_the_named_modes_stack() {
        // srsdb sp!, #0x12 from supervisor mode
        let mut vcpu = MockVcpu::new();
        vcpu.regs[14] = 0x8004;
        vcpu.spsr = 0x1D3;
        vcpu.banked.insert((Mode::Irq, 13), 0x48);
        assert_eq!(emulate(&mut vcpu, 0xEF0B_4012), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0x40), 0x8004);
        assert_eq!(vcpu.word_at(0x44), 0x1D3);
        assert_eq!(vcpu.banked[&(Mode::Irq, 13)], 0x40);
    }

    #[test]
    fn srs_with_an_invalid_mode_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEF0B_4005),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF0B_4005
            })
        );
    }

    #[test]
    fn wfi_waits_for_an_interrupt() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(emulate(&mut vcpu, 0xEF0C_0000), Ok(Some(4)));
        assert_eq!(vcpu.irq_waits, 1);
    }

    #[test]
    fn wfe_hint_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEF0C_0002),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF0C_0002
            })
        );
        assert_eq!(vcpu.irq_waits, 0);
    }

    #[test]
    fn secure_monitor_call_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEF0E_0000),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF0E_0000
            })
        );
    }

    #[test]
    fn ldm_exception_return_restores_the_spsr() {
        // ldmia sp!, {r0, pc}^
        let mut vcpu = MockVcpu::new();
        vcpu.regs[13] = 0x40;
        vcpu.spsr = 0x10;
        vcpu.store_word(0x40, 0x1234);
        vcpu.store_word(0x44, 0x8000);
        assert_eq!(emulate(&mut vcpu, 0xEF4D_8001), Ok(None));
        assert_eq!(vcpu.regs[0], 0x1234);
        assert_eq!(vcpu.regs[15], 0x8000);
        assert_eq!(vcpu.regs[13], 0x48);
        assert_eq!(vcpu.cpsr, 0x10);
        assert_eq!(vcpu.deasserted, vec![SOFT_IRQ]);
    }

    #[test]
    fn ldm_exception_return_with_the_base_listed_is_refused() {
        // write-back base inside the register list
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEF4D_A000),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF4D_A000
            })
        );
    }

    #[test]
    fn ldm_user_fills_the_user_bank() {
        // ldmia r0, {r1, r2}^ from supervisor mode
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        vcpu.store_word(0x40, 0x111);
        vcpu.store_word(0x44, 0x222);
        assert_eq!(emulate(&mut vcpu, 0xEF30_0006), Ok(Some(4)));
        assert_eq!(vcpu.banked[&(Mode::User, 1)], 0x111);
        assert_eq!(vcpu.banked[&(Mode::User, 2)], 0x222);
        assert_eq!(vcpu.regs[1], 0);
        assert_eq!(
            vcpu.accesses,
            vec![MemAccess {
                address: 0x40,
                len: 8,
                user_access: true,
                kind: LoadStoreKind::Load,
            }]
        );
    }

    #[test]
    fn ldm_user_with_writeback_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEF40_0006),
            Err(EmulateError::Unpredictable {
                instruction: 0xEF40_0006
            })
        );
    }

    #[test]
    fn stm_user_stores_the_user_bank_and_the_raw_pc() {
        // stmia r0, {r1, pc}^ from supervisor mode
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0x40;
        vcpu.regs[15] = 0x1000;
        vcpu.banked.insert((Mode::User, 1), 0x111);
        assert_eq!(emulate(&mut vcpu, 0xEFA0_8002), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0x40), 0x111);
        assert_eq!(vcpu.word_at(0x44), 0x1000);
        assert_eq!(vcpu.regs[0], 0x40);
    }

    #[test]
    fn stm_user_in_user_mode_is_refused() {
        let mut vcpu = MockVcpu::new();
        vcpu.cpsr = 0x10;
        assert_eq!(
            emulate(&mut vcpu, 0xEFA0_8002),
            Err(EmulateError::Unpredictable {
                instruction: 0xEFA0_8002
            })
        );
    }

    #[test]
    fn stm_user_splits_at_the_page_boundary() {
        // stmia r0, {r1-r4}^ straddling a 4 KiB page
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0xFF8;
        for reg in 1..=4 {
            vcpu.regs[reg] = reg as u32;
        }
        assert_eq!(emulate(&mut vcpu, 0xEFA0_001E), Ok(Some(4)));
        assert_eq!(vcpu.word_at(0xFF8), 1);
        assert_eq!(vcpu.word_at(0x1004), 4);
        assert_eq!(
            vcpu.accesses,
            vec![
                MemAccess {
                    address: 0xFF8,
                    len: 8,
                    user_access: true,
                    kind: LoadStoreKind::Store,
                },
                MemAccess {
                    address: 0x1000,
                    len: 8,
                    user_access: true,
                    kind: LoadStoreKind::Store,
                },
            ]
        );
    }

    #[test]
    fn ldm_user_splits_at_the_page_boundary() {
        // ldmia r0, {r1-r4}^ straddling a 4 KiB page
        let mut vcpu = MockVcpu::new();
        vcpu.regs[0] = 0xFF8;
        for reg in 1..=4 {
            vcpu.store_word(0xFF8 + (reg - 1) * 4, 0x100 + reg);
        }
        assert_eq!(emulate(&mut vcpu, 0xEF30_001E), Ok(Some(4)));
        assert_eq!(vcpu.banked[&(Mode::User, 1)], 0x101);
        assert_eq!(vcpu.banked[&(Mode::User, 4)], 0x104);
        assert_eq!(
            vcpu.accesses,
            vec![
                MemAccess {
                    address: 0xFF8,
                    len: 8,
                    user_access: true,
                    kind: LoadStoreKind::Load,
                },
                MemAccess {
                    address: 0x1000,
                    len: 8,
                    user_access: true,
                    kind: LoadStoreKind::Load,
                },
            ]
        );
    }

    #[test]
    fn subs_immediate_returns_from_the_exception() {
        // subs pc, lr, #4
        let mut vcpu = MockVcpu::new();
        vcpu.regs[14] = 0x8004;
        vcpu.spsr = 0x10;
        assert_eq!(emulate(&mut vcpu, 0xEFE2_E004), Ok(None));
        assert_eq!(vcpu.regs[15], 0x8000);
        assert_eq!(vcpu.cpsr, 0x10);
        assert_eq!(vcpu.deasserted, vec![SOFT_IRQ]);
    }

    #[test]
    fn subs_register_moves_the_link_register() {
        // movs pc, lr
        let mut vcpu = MockVcpu::new();
        vcpu.regs[14] = 0x8004;
        vcpu.spsr = 0x10;
        assert_eq!(emulate(&mut vcpu, 0xEFDD_000E), Ok(None));
        assert_eq!(vcpu.regs[15], 0x8004);
    }

    #[test]
    fn subs_comparison_opcode_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEFEA_E004),
            Err(EmulateError::Unpredictable {
                instruction: 0xEFEA_E004
            })
        );
        assert!(vcpu.deasserted.is_empty());
    }

    #[test]
    fn subs_in_system_mode_is_refused() {
        let mut vcpu = MockVcpu::new();
        vcpu.cpsr = 0x1F;
        assert_eq!(
            emulate(&mut vcpu, 0xEFE2_E004),
            Err(EmulateError::Unpredictable {
                instruction: 0xEFE2_E004
            })
        );
    }

    #[test]
    fn unallocated_identifier_is_refused() {
        let mut vcpu = MockVcpu::new();
        assert_eq!(
            emulate(&mut vcpu, 0xEFF0_0000),
            Err(EmulateError::Unpredictable {
                instruction: 0xEFF0_0000
            })
        );
    }

    #[test]
    fn failed_condition_skips_the_hypercall() {
        // cpsid with an EQ condition and Z clear
        let mut vcpu = MockVcpu::new();
        assert_eq!(emulate(&mut vcpu, 0x0F01_D813), Ok(Some(4)));
        assert_eq!(vcpu.cpsr, 0x13);
    }
}
