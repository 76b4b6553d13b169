//! # Trapped instruction dispatch
//!
//! Entry points for emulating one guest instruction and the top-level
//! decode that routes it to a category executor. Routing keys off bits
//! 27:25:
//!
//! ```text
//! ┌───────────┬───────────────────────────────────────┐
//! │ op1 27:25 │ Category                              │
//! ├───────────┼───────────────────────────────────────┤
//! │ 00x       │ Data processing and miscellaneous     │
//! │ 01x       │ Load/store word and unsigned byte     │
//! │ 100       │ Block data transfer                   │
//! │ 101       │ Branch (never trapped)                │
//! │ 11x       │ Coprocessor and supervisor call       │
//! └───────────┴───────────────────────────────────────┘
//! ```
//!
//! Each executor evaluates its own condition field so the coprocessor
//! family can order its hook lookup ahead of the condition check. An
//! executor reports how far the program counter advances; `None` means it
//! wrote the program counter itself and no advance happens.
//!
//! Hypercalls usually come in through [`emulate_hypercall`]: the guest
//! kernel runs with its privileged instructions rewritten into SVC words
//! whose payload encodes the original operation, and those trap without a
//! decode. A patched word found during ordinary decode still ends up in
//! [`hypercall`] through the coprocessor category.

use thiserror::Error;

use crate::arm::condition::Condition;
use crate::arm::{
    block_data_transfer, coprocessor, data_processing, hypercall, single_data_transfer,
};
use crate::bitwise::Bits;
use crate::vcpu::{GuestFault, UNDEF_INST_IRQ, Vcpu};

/// Every ARM instruction is four bytes.
pub const SIZE_OF_INSTRUCTION: u32 = 4;

/// Why a trapped instruction could not be emulated to completion.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum EmulateError {
    /// A guest memory access faulted. The base register and the program
    /// counter keep their pre-fault values, so the instruction can be
    /// replayed once the fault is repaired.
    #[error(transparent)]
    GuestFault(#[from] GuestFault),

    /// The encoding is architecturally unpredictable or malformed beyond
    /// what a well-behaved guest emits. The vCPU has been halted.
    #[error("unpredictable instruction {instruction:#010X}")]
    Unpredictable { instruction: u32 },

    /// The instruction is not implemented by any handler or coprocessor;
    /// an undefined-instruction exception has been injected and the guest
    /// will run its own undef vector.
    #[error("undefined instruction {instruction:#010X} injected")]
    UndefinedInstructionInjected { instruction: u32 },
}

/// Halts the vCPU over an unpredictable encoding and builds the error.
pub(crate) fn unpredictable(
    vcpu: &mut impl Vcpu,
    instruction: u32,
    what: &str,
) -> EmulateError {
    tracing::warn!("unpredictable {what} in instruction {instruction:#010X}, halting vCPU");
    vcpu.halt();
    EmulateError::Unpredictable { instruction }
}

/// Raises the undefined-instruction line and builds the error. The program
/// counter is left on the instruction so the guest exception sees it.
pub(crate) fn inject_undefined(vcpu: &mut impl Vcpu, instruction: u32) -> EmulateError {
    tracing::debug!("injecting undefined exception for instruction {instruction:#010X}");
    vcpu.assert_irq(UNDEF_INST_IRQ, instruction);
    EmulateError::UndefinedInstructionInjected { instruction }
}

/// Evaluates the condition field in bits 31:28 against the guest flags.
pub(crate) fn condition_passed(vcpu: &impl Vcpu, instruction: u32) -> bool {
    vcpu.cpsr()
        .can_execute(Condition::from(instruction.get_bits(28..=31)))
}

/// Fetches the instruction at the guest program counter and emulates it.
pub fn emulate(vcpu: &mut impl Vcpu) -> Result<(), EmulateError> {
    let pc = vcpu.program_counter();
    let instruction = vcpu.read_word(pc, false)?;
    emulate_instruction(vcpu, instruction)
}

/// Emulates one trapped ARM instruction and advances the guest program
/// counter past it, unless the instruction wrote the program counter
/// itself.
pub fn emulate_instruction(vcpu: &mut impl Vcpu, instruction: u32) -> Result<(), EmulateError> {
    tracing::trace!("emulating instruction {instruction:#010X}");
    let advance = dispatch(vcpu, instruction)?;
    vcpu.advance_program_counter(advance.unwrap_or(0));
    Ok(())
}

/// Emulates a trapped hypercall, an SVC word whose 24-bit payload encodes
/// one of the privileged operations the guest kernel was patched for.
pub fn emulate_hypercall(vcpu: &mut impl Vcpu, instruction: u32) -> Result<(), EmulateError> {
    tracing::trace!("emulating hypercall {instruction:#010X}");
    let advance = hypercall::emulate(vcpu, instruction)?;
    vcpu.advance_program_counter(advance.unwrap_or(0));
    Ok(())
}

fn dispatch(vcpu: &mut impl Vcpu, instruction: u32) -> Result<Option<u32>, EmulateError> {
    match instruction.get_bits(25..=27) {
        0b000 | 0b001 => data_processing::emulate(vcpu, instruction),
        0b010 | 0b011 => single_data_transfer::emulate(vcpu, instruction),
        0b100 => block_data_transfer::emulate(vcpu, instruction),
        // Branches resolve in hardware and never reach the trap handler.
        0b101 => Err(unpredictable(vcpu, instruction, "branch")),
        _ => coprocessor::emulate(vcpu, instruction),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::arm::psr::{PSR_FIQ_DISABLE, PSR_IRQ_DISABLE};
    use crate::vcpu::testing::MockVcpu;
    use crate::vcpu::{EXTERNAL_IRQ, RegFile};

    #[test]
    fn mov_immediate_end_to_end() {
        // mov r0, #0x12
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        emulate_instruction(&mut vcpu, 0xE3A0_0012).unwrap();

        assert_eq!(vcpu.regs[0], 0x12);
        assert_eq!(vcpu.program_counter(), 0x8004);
    }

    #[test]
    fn add_with_shifted_register_end_to_end() {
        // add r1, r0, r0, lsl #1
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.regs[0] = 3;
        emulate_instruction(&mut vcpu, 0xE080_1080).unwrap();

        assert_eq!(vcpu.regs[1], 9);
        assert_eq!(vcpu.program_counter(), 0x8004);
    }

    #[test]
    fn ldr_pre_indexed_writeback_end_to_end() {
        // ldr r2, [r3, #8]!
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.regs[3] = 0x1000;
        vcpu.store_word(0x1008, 0xCAFE_F00D);
        emulate_instruction(&mut vcpu, 0xE5B3_2008).unwrap();

        assert_eq!(vcpu.regs[2], 0xCAFE_F00D);
        assert_eq!(vcpu.regs[3], 0x1008);
        assert_eq!(vcpu.program_counter(), 0x8004);
    }

    #[test]
    fn stmdb_full_descending_push_end_to_end() {
        // stmdb sp!, {r0-r3, lr}
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.regs[0] = 10;
        vcpu.regs[1] = 11;
        vcpu.regs[2] = 12;
        vcpu.regs[3] = 13;
        vcpu.regs[13] = 0x2000;
        vcpu.regs[14] = 0xBEEF;
        emulate_instruction(&mut vcpu, 0xE92D_400F).unwrap();

        assert_eq!(vcpu.word_at(0x1FEC), 10);
        assert_eq!(vcpu.word_at(0x1FF0), 11);
        assert_eq!(vcpu.word_at(0x1FF4), 12);
        assert_eq!(vcpu.word_at(0x1FF8), 13);
        assert_eq!(vcpu.word_at(0x1FFC), 0xBEEF);
        assert_eq!(vcpu.regs[13], 0x1FEC);
        assert_eq!(vcpu.program_counter(), 0x8004);
    }

    #[test]
    fn hypercall_msr_control_byte_end_to_end() {
        // msr cpsr_c, #0xD3 trapped as a hypercall
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.cpsr = 0x6000_0010;
        emulate_hypercall(&mut vcpu, 0xEF04_10D3).unwrap();

        assert_eq!(vcpu.cpsr, 0x6000_00D3);
        assert_eq!(vcpu.program_counter(), 0x8004);
    }

    #[test]
    fn hypercall_rfe_end_to_end() {
        // rfeia sp! trapped as a hypercall, returning from an interrupt
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.cpsr = 0x12 | PSR_IRQ_DISABLE | PSR_FIQ_DISABLE;
        vcpu.regs[13] = 0x3000;
        vcpu.store_word(0x3000, 0x8000_0000);
        vcpu.store_word(0x3004, 0x0000_0010);
        emulate_hypercall(&mut vcpu, 0xEF08_C00D).unwrap();

        assert_eq!(vcpu.program_counter(), 0x8000_0000);
        assert_eq!(vcpu.cpsr, 0x10);
        assert_eq!(vcpu.regs[13], 0x3008);
        assert_eq!(vcpu.deasserted, vec![EXTERNAL_IRQ]);
    }

    #[test]
    fn failed_condition_only_advances() {
        // moveq r0, #0x12 with Z clear
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        emulate_instruction(&mut vcpu, 0x03A0_0012).unwrap();

        assert_eq!(vcpu.regs[0], 0);
        assert_eq!(vcpu.program_counter(), 0x8004);
        assert!(vcpu.accesses.is_empty());
    }

    #[test]
    fn writing_the_program_counter_suppresses_the_advance() {
        // ldr pc, [r0]
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.regs[0] = 0x100;
        vcpu.store_word(0x100, 0x4000);
        emulate_instruction(&mut vcpu, 0xE590_F000).unwrap();

        assert_eq!(vcpu.program_counter(), 0x4000);
    }

    #[test]
    fn fetch_uses_the_program_counter() {
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.store_word(0x8000, 0xE3A0_0012);
        emulate(&mut vcpu).unwrap();

        assert_eq!(vcpu.regs[0], 0x12);
        assert_eq!(vcpu.program_counter(), 0x8004);
    }

    #[test]
    fn trapped_branch_is_unpredictable() {
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        let result = emulate_instruction(&mut vcpu, 0xEA00_0000);

        assert_eq!(
            result,
            Err(EmulateError::Unpredictable {
                instruction: 0xEA00_0000
            })
        );
        assert!(vcpu.halted);
        assert_eq!(vcpu.program_counter(), 0x8000);
    }

    #[test]
    fn guest_fault_leaves_registers_untouched() {
        // ldr r2, [r3, #8]! against a faulting address
        let mut vcpu = MockVcpu::with_program_counter(0x8000);
        vcpu.regs[3] = 0x1000;
        vcpu.fault_address = Some(0x1008);
        let result = emulate_instruction(&mut vcpu, 0xE5B3_2008);

        assert_eq!(
            result,
            Err(EmulateError::GuestFault(crate::vcpu::GuestFault {
                address: 0x1008
            }))
        );
        assert_eq!(vcpu.regs[2], 0);
        assert_eq!(vcpu.regs[3], 0x1000);
        assert_eq!(vcpu.program_counter(), 0x8000);
    }
}
