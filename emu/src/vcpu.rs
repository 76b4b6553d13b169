//! # Guest vCPU interface
//!
//! Everything the instruction emulation needs from the hypervisor is behind
//! the [`Vcpu`] trait: the guest register file (including banked registers
//! and the status registers), guest physical memory with permission-checked
//! access, virtual interrupt lines and the coprocessor hooks.
//!
//! The emulation never touches host state directly. An executor reads its
//! operands through [`RegFile`], moves data through [`GuestMemory`] and
//! reports exceptional outcomes by raising one of the virtual interrupt
//! lines:
//!
//! ```text
//! ┌──────┬────────────────────────────┐
//! │ Line │ Guest exception            │
//! ├──────┼────────────────────────────┤
//! │  1   │ Undefined instruction      │
//! │  2   │ Software interrupt         │
//! │  3   │ Prefetch abort             │
//! │  4   │ Data abort                 │
//! │  6   │ IRQ                        │
//! │  7   │ FIQ                        │
//! └──────┴────────────────────────────┘
//! ```
//!
//! Exception-returning operations lower the line of the mode they leave
//! through [`Vcpu::deassert_irq`].

use thiserror::Error;

use crate::arm::{cpu_modes::Mode, psr::Psr};

/// Stack Pointer register index.
pub const REG_SP: u32 = 0xD;

/// Link Register index (return address for subroutines).
pub const REG_LR: u32 = 0xE;

/// Program Counter register index.
pub const REG_PROGRAM_COUNTER: u32 = 0xF;

/// Undefined-instruction exception line.
pub const UNDEF_INST_IRQ: u32 = 1;

/// Software interrupt exception line.
pub const SOFT_IRQ: u32 = 2;

/// Prefetch abort exception line.
pub const PREFETCH_ABORT_IRQ: u32 = 3;

/// Data abort exception line.
pub const DATA_ABORT_IRQ: u32 = 4;

/// External interrupt line.
pub const EXTERNAL_IRQ: u32 = 6;

/// External fast interrupt line.
pub const EXTERNAL_FIQ: u32 = 7;

/// A guest physical access that could not be completed.
///
/// The embedding hypervisor turns this into a data abort or stage-2 fault
/// handling; the emulation layer only cares that the instruction must not
/// retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest memory fault at {address:#010X}")]
pub struct GuestFault {
    /// Guest physical address of the faulting access.
    pub address: u32,
}

/// The guest register file.
///
/// R0-R15 of the current mode plus mode-banked access for the operations
/// that reach into another mode's bank (user-mode transfers, SRS). Reads of
/// R15 return the raw program counter; the executors add the pipeline
/// offset themselves where the architecture wants PC+8.
pub trait RegFile {
    fn register_at(&self, reg: u32) -> u32;

    fn set_register_at(&mut self, reg: u32, new_value: u32);

    /// Reads `reg` as banked for `mode`, regardless of the current mode.
    fn register_of_mode(&self, mode: Mode, reg: u32) -> u32;

    /// Writes `reg` as banked for `mode`, regardless of the current mode.
    fn set_register_of_mode(&mut self, mode: Mode, reg: u32, new_value: u32);

    fn cpsr(&self) -> Psr;

    /// Updates the CPSR bits selected by `mask`, leaving the rest untouched.
    fn set_cpsr(&mut self, value: u32, mask: u32);

    /// The saved status register of the current mode.
    fn spsr(&self) -> Psr;

    /// Updates the current mode's SPSR bits selected by `mask`.
    fn set_spsr(&mut self, value: u32, mask: u32);

    fn program_counter(&self) -> u32 {
        self.register_at(REG_PROGRAM_COUNTER)
    }

    fn set_program_counter(&mut self, new_value: u32) {
        self.set_register_at(REG_PROGRAM_COUNTER, new_value);
    }

    fn advance_program_counter(&mut self, bytes: u32) {
        self.set_program_counter(self.program_counter().wrapping_add(bytes));
    }
}

/// Guest physical memory as the vCPU sees it.
///
/// `user_access` asks for the access to be checked against the guest's
/// unprivileged permissions, which is what the `T` load/store variants and
/// the user-bank block transfers need.
pub trait GuestMemory {
    fn read(
        &mut self,
        address: u32,
        data: &mut [u8],
        user_access: bool,
    ) -> Result<(), GuestFault>;

    fn write(
        &mut self,
        address: u32,
        data: &[u8],
        user_access: bool,
    ) -> Result<(), GuestFault>;

    /// Word read that also takes the exclusive monitor for `address`.
    fn read_exclusive(&mut self, address: u32) -> Result<u32, GuestFault>;

    /// Word write that only lands if the exclusive monitor is still held.
    /// `Ok(true)` means the store happened.
    fn write_exclusive(&mut self, address: u32, value: u32) -> Result<bool, GuestFault>;

    fn read_word(&mut self, address: u32, user_access: bool) -> Result<u32, GuestFault> {
        let mut data = [0_u8; 4];
        self.read(address, &mut data, user_access)?;
        Ok(u32::from_le_bytes(data))
    }

    fn write_word(&mut self, address: u32, value: u32, user_access: bool) -> Result<(), GuestFault> {
        self.write(address, &value.to_le_bytes(), user_access)
    }

    fn read_half(&mut self, address: u32, user_access: bool) -> Result<u16, GuestFault> {
        let mut data = [0_u8; 2];
        self.read(address, &mut data, user_access)?;
        Ok(u16::from_le_bytes(data))
    }

    fn write_half(&mut self, address: u32, value: u16, user_access: bool) -> Result<(), GuestFault> {
        self.write(address, &value.to_le_bytes(), user_access)
    }

    fn read_byte(&mut self, address: u32, user_access: bool) -> Result<u8, GuestFault> {
        let mut data = [0_u8; 1];
        self.read(address, &mut data, user_access)?;
        Ok(data[0])
    }

    fn write_byte(&mut self, address: u32, value: u8, user_access: bool) -> Result<(), GuestFault> {
        self.write(address, &[value], user_access)
    }
}

/// One-word coprocessor register transfers (MCR and MRC).
pub trait CoprocRegTransfer {
    /// Handles MRC. `None` refuses the access.
    fn read(&mut self, opcode1: u32, crn: u32, crm: u32, opcode2: u32) -> Option<u32>;

    /// Handles MCR. `false` refuses the access.
    fn write(&mut self, opcode1: u32, crn: u32, crm: u32, opcode2: u32, value: u32) -> bool;
}

/// Two-word coprocessor register transfers (MCRR and MRRC).
pub trait CoprocRegTransfer2 {
    /// Handles MRRC, producing `(rt, rt2)`. `None` refuses the access.
    fn read2(&mut self, opcode: u32, crm: u32) -> Option<(u32, u32)>;

    /// Handles MCRR. `false` refuses the access.
    fn write2(&mut self, opcode: u32, crm: u32, rt: u32, rt2: u32) -> bool;
}

/// Coprocessor-internal data operations (CDP).
pub trait CoprocDataOp {
    /// Handles CDP. `false` refuses the operation.
    fn data_op(&mut self, opcode1: u32, crd: u32, crn: u32, crm: u32, opcode2: u32) -> bool;
}

/// Coprocessor block transfers (LDC and STC).
///
/// The transfer length is owned by the coprocessor: the executor moves one
/// word at a time until [`done`](Self::done) says the sequence is over.
pub trait CoprocBlockTransfer {
    /// Whether the coprocessor accepts a transfer targeting `crd`.
    /// `option` carries the 8-bit option field of the unindexed form.
    fn accept(&mut self, crd: u32, option: Option<u32>) -> bool;

    /// Whether the transfer is complete after `index` words.
    fn done(&mut self, index: u32) -> bool;

    /// Produces the word an STC stores at `index`.
    fn read(&mut self, index: u32) -> u32;

    /// Consumes the word an LDC loaded at `index`.
    fn write(&mut self, index: u32, value: u32);
}

/// A guest-visible coprocessor.
///
/// Each accessor exposes one instruction family; the default `None` means
/// the family is not implemented and the instruction raises an undefined
/// exception in the guest. A refusal from an individual hook does the same
/// but only after the condition check has passed.
pub trait Coprocessor {
    fn reg_transfer(&mut self) -> Option<&mut dyn CoprocRegTransfer> {
        None
    }

    fn reg_transfer2(&mut self) -> Option<&mut dyn CoprocRegTransfer2> {
        None
    }

    fn data_op(&mut self) -> Option<&mut dyn CoprocDataOp> {
        None
    }

    fn block_transfer(&mut self) -> Option<&mut dyn CoprocBlockTransfer> {
        None
    }
}

/// Host-side backing for one guest virtual CPU.
///
/// The hypervisor implements this on its per-vCPU state; the emulation
/// layer drives everything through it and stays oblivious to how registers
/// are banked, how stage-2 translation works or where interrupts go.
pub trait Vcpu: RegFile + GuestMemory {
    /// Parks the vCPU until an interrupt is pending.
    fn wait_for_irq(&mut self);

    /// Raises virtual interrupt line `irq` with an implementation-defined
    /// reason code.
    fn assert_irq(&mut self, irq: u32, reason: u32);

    /// Lowers virtual interrupt line `irq`. Exception returns use this to
    /// retire the line of the mode the guest is leaving.
    fn deassert_irq(&mut self, irq: u32);

    /// Stops the vCPU after an unrecoverable guest error.
    fn halt(&mut self);

    /// The guest-visible coprocessor with the given number, if any.
    fn coprocessor(&mut self, cp_num: u32) -> Option<&mut dyn Coprocessor>;
}
