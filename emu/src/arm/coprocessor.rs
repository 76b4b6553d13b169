//! # Coprocessor and supervisor call instructions
//!
//! Second-level decode for the 11x class, keyed on bits 25:20 and the
//! coprocessor number in bits 11:8:
//!
//! ```text
//! ┌───────────┬─────────────────────────────────────────────┐
//! │ op1 25:20 │ Instruction                                 │
//! ├───────────┼─────────────────────────────────────────────┤
//! │ 00000x    │ Undefined, injected into the guest          │
//! │ 000100    │ MCRR                                        │
//! │ 000101    │ MRRC                                        │
//! │ 0xxxx0    │ STC                                         │
//! │ 0xxxx1    │ LDC (literal form when Rn is the pc)        │
//! │ 10xxxx    │ CDP, or MCR/MRC with bit 4 set              │
//! │ 11xxxx    │ SVC payload, handled as a hypercall         │
//! └───────────┴─────────────────────────────────────────────┘
//! ```
//!
//! cp10 and cp11 accesses only exist in the undefined and hypercall
//! ranges; the hardware handles the rest of the floating-point space
//! without trapping.
//!
//! Every instruction here goes through a guest coprocessor hook from
//! [`crate::vcpu::Coprocessor`]. A missing hook injects the undefined
//! exception before the condition check, a hook refusal injects it after;
//! neither advances the program counter.

use crate::arm::addressing::{AddressingMode, align};
use crate::arm::emulate::{
    EmulateError, SIZE_OF_INSTRUCTION, condition_passed, inject_undefined, unpredictable,
};
use crate::arm::hypercall;
use crate::bitwise::Bits;
use crate::vcpu::{
    CoprocBlockTransfer, CoprocDataOp, CoprocRegTransfer, CoprocRegTransfer2,
    REG_PROGRAM_COUNTER, Vcpu,
};

/// A decoded STC or LDC. The 8-bit immediate scales to words; the
/// unindexed form carries its option byte for the hook instead.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
struct CoprocTransfer {
    cp_num: u32,
    rn: u32,
    crd: u32,
    offset: u32,
    option: Option<u32>,
    mode: AddressingMode,
    wback: bool,
}

impl From<u32> for CoprocTransfer {
    fn from(instruction: u32) -> Self {
        let unindexed =
            instruction.is_bit_off(24) && instruction.is_bit_off(21) && instruction.is_bit_on(23);
        Self {
            cp_num: instruction.get_bits(8..=11),
            rn: instruction.get_bits(16..=19),
            crd: instruction.get_bits(12..=15),
            offset: instruction.get_bits(0..=7) << 2,
            option: unindexed.then(|| instruction.get_bits(0..=7)),
            mode: AddressingMode::from_instruction(instruction),
            wback: instruction.is_bit_on(21),
        }
    }
}

/// A decoded 11x-class instruction, one variant per form.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum CoprocInstruction {
    Store {
        transfer: CoprocTransfer,
    },
    Load {
        transfer: CoprocTransfer,
    },
    LoadLiteral {
        transfer: CoprocTransfer,
    },
    MovePairTo {
        cp_num: u32,
        rt2: u32,
        rt: u32,
        opcode: u32,
        crm: u32,
    },
    MovePairFrom {
        cp_num: u32,
        rt2: u32,
        rt: u32,
        opcode: u32,
        crm: u32,
    },
    DataOp {
        cp_num: u32,
        opcode1: u32,
        crn: u32,
        crd: u32,
        opcode2: u32,
        crm: u32,
    },
    MoveTo {
        cp_num: u32,
        opcode1: u32,
        crn: u32,
        rt: u32,
        opcode2: u32,
        crm: u32,
    },
    MoveFrom {
        cp_num: u32,
        opcode1: u32,
        crn: u32,
        rt: u32,
        opcode2: u32,
        crm: u32,
    },
    Hypercall,
    Undefined,
    Unpredictable {
        what: &'static str,
    },
}

impl From<u32> for CoprocInstruction {
    fn from(instruction: u32) -> Self {
        let cp_num = instruction.get_bits(8..=11);
        let op1 = instruction.get_bits(20..=25);

        if cp_num == 10 || cp_num == 11 {
            return match op1 {
                0b00_0000 | 0b00_0001 => Self::Undefined,
                _ if op1.get_bits(4..=5) == 0b11 => Self::Hypercall,
                _ => Self::Unpredictable {
                    what: "floating-point transfer",
                },
            };
        }

        match op1 {
            0b00_0000 | 0b00_0001 => Self::Undefined,
            0b00_0100 => Self::MovePairTo {
                cp_num,
                rt2: instruction.get_bits(16..=19),
                rt: instruction.get_bits(12..=15),
                opcode: instruction.get_bits(4..=7),
                crm: instruction.get_bits(0..=3),
            },
            0b00_0101 => Self::MovePairFrom {
                cp_num,
                rt2: instruction.get_bits(16..=19),
                rt: instruction.get_bits(12..=15),
                opcode: instruction.get_bits(4..=7),
                crm: instruction.get_bits(0..=3),
            },
            _ if op1.is_bit_off(5) && op1.is_bit_off(0) => Self::Store {
                transfer: CoprocTransfer::from(instruction),
            },
            _ if op1.is_bit_off(5) => {
                let transfer = CoprocTransfer::from(instruction);
                if transfer.rn == REG_PROGRAM_COUNTER {
                    Self::LoadLiteral { transfer }
                } else {
                    Self::Load { transfer }
                }
            }
            _ if op1.is_bit_on(4) => Self::Hypercall,
            _ if instruction.is_bit_off(4) => Self::DataOp {
                cp_num,
                opcode1: instruction.get_bits(20..=23),
                crn: instruction.get_bits(16..=19),
                crd: instruction.get_bits(12..=15),
                opcode2: instruction.get_bits(5..=7),
                crm: instruction.get_bits(0..=3),
            },
            _ if op1.is_bit_on(0) => Self::MoveFrom {
                cp_num,
                opcode1: instruction.get_bits(21..=23),
                crn: instruction.get_bits(16..=19),
                rt: instruction.get_bits(12..=15),
                opcode2: instruction.get_bits(5..=7),
                crm: instruction.get_bits(0..=3),
            },
            _ => Self::MoveTo {
                cp_num,
                opcode1: instruction.get_bits(21..=23),
                crn: instruction.get_bits(16..=19),
                rt: instruction.get_bits(12..=15),
                opcode2: instruction.get_bits(5..=7),
                crm: instruction.get_bits(0..=3),
            },
        }
    }
}

/// Decodes one 11x-class instruction and routes it to its executor.
pub(crate) fn emulate(
    vcpu: &mut impl Vcpu,
    instruction: u32,
) -> Result<Option<u32>, EmulateError> {
    use CoprocInstruction::*;
    match CoprocInstruction::from(instruction) {
        Store { transfer } => store_coprocessor(vcpu, instruction, transfer),
        Load { transfer } => load_coprocessor(vcpu, instruction, transfer),
        LoadLiteral { transfer } => load_coprocessor_literal(vcpu, instruction, transfer),
        MovePairTo {
            cp_num,
            rt2,
            rt,
            opcode,
            crm,
        } => move_pair_to_coprocessor(vcpu, instruction, cp_num, rt2, rt, opcode, crm),
        MovePairFrom {
            cp_num,
            rt2,
            rt,
            opcode,
            crm,
        } => move_pair_from_coprocessor(vcpu, instruction, cp_num, rt2, rt, opcode, crm),
        DataOp {
            cp_num,
            opcode1,
            crn,
            crd,
            opcode2,
            crm,
        } => coprocessor_data_op(vcpu, instruction, cp_num, opcode1, crn, crd, opcode2, crm),
        MoveTo {
            cp_num,
            opcode1,
            crn,
            rt,
            opcode2,
            crm,
        } => move_to_coprocessor(vcpu, instruction, cp_num, opcode1, crn, rt, opcode2, crm),
        MoveFrom {
            cp_num,
            opcode1,
            crn,
            rt,
            opcode2,
            crm,
        } => move_from_coprocessor(vcpu, instruction, cp_num, opcode1, crn, rt, opcode2, crm),
        Hypercall => hypercall::emulate(vcpu, instruction),
        Undefined => Err(inject_undefined(vcpu, instruction)),
        Unpredictable { what } => Err(unpredictable(vcpu, instruction, what)),
    }
}

fn reg_hook<'a>(vcpu: &'a mut impl Vcpu, cp_num: u32) -> Option<&'a mut dyn CoprocRegTransfer> {
    vcpu.coprocessor(cp_num)?.reg_transfer()
}

fn pair_hook<'a>(
    vcpu: &'a mut impl Vcpu,
    cp_num: u32,
) -> Option<&'a mut dyn CoprocRegTransfer2> {
    vcpu.coprocessor(cp_num)?.reg_transfer2()
}

fn data_hook<'a>(vcpu: &'a mut impl Vcpu, cp_num: u32) -> Option<&'a mut dyn CoprocDataOp> {
    vcpu.coprocessor(cp_num)?.data_op()
}

fn block_hook<'a>(
    vcpu: &'a mut impl Vcpu,
    cp_num: u32,
) -> Option<&'a mut dyn CoprocBlockTransfer> {
    vcpu.coprocessor(cp_num)?.block_transfer()
}

fn store_coprocessor(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    transfer: CoprocTransfer,
) -> Result<Option<u32>, EmulateError> {
    if transfer.rn == REG_PROGRAM_COUNTER && transfer.wback {
        return Err(unpredictable(vcpu, instruction, "write-back to the program counter"));
    }
    if block_hook(vcpu, transfer.cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(transfer.rn);
    let (offset_address, address) = transfer.mode.resolve(base, transfer.offset);
    if !accept_transfer(vcpu, transfer) {
        return Err(inject_undefined(vcpu, instruction));
    }

    run_store_transfer(vcpu, instruction, transfer.cp_num, address)?;
    if transfer.wback {
        vcpu.set_register_at(transfer.rn, offset_address);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn load_coprocessor(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    transfer: CoprocTransfer,
) -> Result<Option<u32>, EmulateError> {
    if block_hook(vcpu, transfer.cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = vcpu.register_at(transfer.rn);
    let (offset_address, address) = transfer.mode.resolve(base, transfer.offset);
    if !accept_transfer(vcpu, transfer) {
        return Err(inject_undefined(vcpu, instruction));
    }

    run_load_transfer(vcpu, instruction, transfer.cp_num, address)?;
    if transfer.wback {
        vcpu.set_register_at(transfer.rn, offset_address);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn load_coprocessor_literal(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    transfer: CoprocTransfer,
) -> Result<Option<u32>, EmulateError> {
    if transfer.wback {
        return Err(unpredictable(vcpu, instruction, "write-back to the program counter"));
    }
    if block_hook(vcpu, transfer.cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let base = align(vcpu.program_counter());
    let address = transfer.mode.offsetting.apply(base, transfer.offset);
    if !accept_transfer(vcpu, transfer) {
        return Err(inject_undefined(vcpu, instruction));
    }

    run_load_transfer(vcpu, instruction, transfer.cp_num, address)?;
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// Runs the accept query on the block-transfer hook.
fn accept_transfer(vcpu: &mut impl Vcpu, transfer: CoprocTransfer) -> bool {
    match block_hook(vcpu, transfer.cp_num) {
        Some(hook) => hook.accept(transfer.crd, transfer.option),
        None => false,
    }
}

/// Feeds words out of the coprocessor into memory until the hook reports
/// the transfer done.
fn run_store_transfer(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    cp_num: u32,
    mut address: u32,
) -> Result<(), EmulateError> {
    let mut index = 0;
    loop {
        let Some(hook) = block_hook(vcpu, cp_num) else {
            return Err(inject_undefined(vcpu, instruction));
        };
        if hook.done(index) {
            return Ok(());
        }
        let value = hook.read(index);
        vcpu.write_word(address, value, false)?;
        address = address.wrapping_add(4);
        index += 1;
    }
}

/// Feeds words out of memory into the coprocessor until the hook reports
/// the transfer done.
fn run_load_transfer(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    cp_num: u32,
    mut address: u32,
) -> Result<(), EmulateError> {
    let mut index = 0;
    loop {
        let Some(hook) = block_hook(vcpu, cp_num) else {
            return Err(inject_undefined(vcpu, instruction));
        };
        if hook.done(index) {
            return Ok(());
        }
        let value = vcpu.read_word(address, false)?;
        let Some(hook) = block_hook(vcpu, cp_num) else {
            return Err(inject_undefined(vcpu, instruction));
        };
        hook.write(index, value);
        address = address.wrapping_add(4);
        index += 1;
    }
}

fn move_pair_to_coprocessor(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    cp_num: u32,
    rt2: u32,
    rt: u32,
    opcode: u32,
    crm: u32,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER || rt2 == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter operand"));
    }
    if pair_hook(vcpu, cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let first = vcpu.register_at(rt);
    let second = vcpu.register_at(rt2);
    let accepted = match pair_hook(vcpu, cp_num) {
        Some(hook) => hook.write2(opcode, crm, first, second),
        None => false,
    };
    if !accepted {
        return Err(inject_undefined(vcpu, instruction));
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

fn move_pair_from_coprocessor(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    cp_num: u32,
    rt2: u32,
    rt: u32,
    opcode: u32,
    crm: u32,
) -> Result<Option<u32>, EmulateError> {
    if rt == REG_PROGRAM_COUNTER || rt2 == REG_PROGRAM_COUNTER {
        return Err(unpredictable(vcpu, instruction, "program counter operand"));
    }
    if pair_hook(vcpu, cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let Some((first, second)) =
        pair_hook(vcpu, cp_num).and_then(|hook| hook.read2(opcode, crm))
    else {
        return Err(inject_undefined(vcpu, instruction));
    };
    vcpu.set_register_at(rt, first);
    vcpu.set_register_at(rt2, second);
    Ok(Some(SIZE_OF_INSTRUCTION))
}

#[allow(clippy::too_many_arguments)]
fn coprocessor_data_op(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    cp_num: u32,
    opcode1: u32,
    crn: u32,
    crd: u32,
    opcode2: u32,
    crm: u32,
) -> Result<Option<u32>, EmulateError> {
    if data_hook(vcpu, cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let accepted = match data_hook(vcpu, cp_num) {
        Some(hook) => hook.data_op(opcode1, crd, crn, crm, opcode2),
        None => false,
    };
    if !accepted {
        return Err(inject_undefined(vcpu, instruction));
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// MCR; a program counter source sends the trapped instruction's own
/// address.
#[allow(clippy::too_many_arguments)]
fn move_to_coprocessor(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    cp_num: u32,
    opcode1: u32,
    crn: u32,
    rt: u32,
    opcode2: u32,
    crm: u32,
) -> Result<Option<u32>, EmulateError> {
    if reg_hook(vcpu, cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let value = vcpu.register_at(rt);
    let accepted = match reg_hook(vcpu, cp_num) {
        Some(hook) => hook.write(opcode1, crn, crm, opcode2, value),
        None => false,
    };
    if !accepted {
        return Err(inject_undefined(vcpu, instruction));
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// MRC; a program counter destination throws the value away.
#[allow(clippy::too_many_arguments)]
fn move_from_coprocessor(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    cp_num: u32,
    opcode1: u32,
    crn: u32,
    rt: u32,
    opcode2: u32,
    crm: u32,
) -> Result<Option<u32>, EmulateError> {
    if reg_hook(vcpu, cp_num).is_none() {
        return Err(inject_undefined(vcpu, instruction));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    let Some(value) =
        reg_hook(vcpu, cp_num).and_then(|hook| hook.read(opcode1, crn, crm, opcode2))
    else {
        return Err(inject_undefined(vcpu, instruction));
    };
    if rt != REG_PROGRAM_COUNTER {
        vcpu.set_register_at(rt, value);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}
