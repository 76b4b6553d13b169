//! # Block data transfer
//!
//! LDM and STM over a 16-bit register list. The four addressing modes
//! place the transfer window around the base so that the lowest-numbered
//! register always lands at the lowest address:
//!
//! ```text
//! ┌──────┬─────┬──────────────────┬────────────────────────┐
//! │ P U  │ Name│ First address    │ Write-back             │
//! ├──────┼─────┼──────────────────┼────────────────────────┤
//! │ 0 1  │ IA  │ base             │ base + 4n              │
//! │ 1 1  │ IB  │ base + 4         │ base + 4n              │
//! │ 0 0  │ DA  │ base - 4n + 4    │ base - 4n              │
//! │ 1 0  │ DB  │ base - 4n        │ base - 4n              │
//! └──────┴─────┴──────────────────┴────────────────────────┘
//! ```
//!
//! The S-bit variants (user-bank transfer and exception return) arrive as
//! hypercalls after the guest kernel rewrites them, so bit 22 is ignored
//! here. Transfers go one word at a time: device emulation wants every
//! word to be its own access, and a fault in the middle leaves the base
//! register untouched for a replay.

use crate::arm::addressing::{AddressingMode, LoadStoreKind, block_transfer_start};
use crate::arm::emulate::{EmulateError, SIZE_OF_INSTRUCTION, condition_passed, unpredictable};
use crate::bitwise::Bits;
use crate::vcpu::{REG_PROGRAM_COUNTER, Vcpu};

/// A decoded LDM or STM, carrying every field the executors consume.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
struct BlockTransfer {
    kind: LoadStoreKind,
    mode: AddressingMode,
    wback: bool,
    rn: u32,
    list: u32,
}

impl From<u32> for BlockTransfer {
    fn from(instruction: u32) -> Self {
        Self {
            kind: LoadStoreKind::from(instruction.is_bit_on(20)),
            mode: AddressingMode::from_instruction(instruction),
            wback: instruction.is_bit_on(21),
            rn: instruction.get_bits(16..=19),
            list: instruction.get_bits(0..=15),
        }
    }
}

/// Decodes one block transfer and routes it to its executor.
pub(crate) fn emulate(
    vcpu: &mut impl Vcpu,
    instruction: u32,
) -> Result<Option<u32>, EmulateError> {
    let transfer = BlockTransfer::from(instruction);

    if transfer.rn == REG_PROGRAM_COUNTER || transfer.list == 0 {
        return Err(unpredictable(vcpu, instruction, "block transfer operands"));
    }
    if transfer.kind == LoadStoreKind::Load
        && transfer.wback
        && transfer.list.is_bit_on(transfer.rn as u8)
    {
        return Err(unpredictable(vcpu, instruction, "write-back register in the load list"));
    }
    if !condition_passed(vcpu, instruction) {
        return Ok(Some(SIZE_OF_INSTRUCTION));
    }

    match transfer.kind {
        LoadStoreKind::Load => load_multiple(vcpu, transfer),
        LoadStoreKind::Store => store_multiple(vcpu, transfer),
    }
}

fn load_multiple(
    vcpu: &mut impl Vcpu,
    transfer: BlockTransfer,
) -> Result<Option<u32>, EmulateError> {
    let base = vcpu.register_at(transfer.rn);
    let length = 4 * transfer.list.count_ones();
    let mut address =
        block_transfer_start(base, length, transfer.mode.indexing, transfer.mode.offsetting);

    for index in 0..=14_u8 {
        if transfer.list.is_bit_on(index) {
            let value = vcpu.read_word(address, false)?;
            vcpu.set_register_at(u32::from(index), value);
            address = address.wrapping_add(4);
        }
    }
    let new_pc = if transfer.list.is_bit_on(15) {
        Some(vcpu.read_word(address, false)?)
    } else {
        None
    };

    if transfer.wback {
        vcpu.set_register_at(transfer.rn, transfer.mode.offsetting.apply(base, length));
    }
    if let Some(target) = new_pc {
        vcpu.set_program_counter(target);
        return Ok(None);
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}

/// A program counter in the store list goes out as the instruction
/// address plus 8, the value the pipeline would store.
fn store_multiple(
    vcpu: &mut impl Vcpu,
    transfer: BlockTransfer,
) -> Result<Option<u32>, EmulateError> {
    let base = vcpu.register_at(transfer.rn);
    let length = 4 * transfer.list.count_ones();
    let mut address =
        block_transfer_start(base, length, transfer.mode.indexing, transfer.mode.offsetting);

    for index in 0..=14_u8 {
        if transfer.list.is_bit_on(index) {
            let value = vcpu.register_at(u32::from(index));
            vcpu.write_word(address, value, false)?;
            address = address.wrapping_add(4);
        }
    }
    if transfer.list.is_bit_on(15) {
        let value = vcpu.program_counter().wrapping_add(8);
        vcpu.write_word(address, value, false)?;
    }

    if transfer.wback {
        vcpu.set_register_at(transfer.rn, transfer.mode.offsetting.apply(base, length));
    }
    Ok(Some(SIZE_OF_INSTRUCTION))
}
