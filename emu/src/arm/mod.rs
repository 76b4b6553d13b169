//! # Trapped ARM Instruction Emulation (32-bit)
//!
//! A guest instruction reaches this module after the hypervisor trapped it,
//! either because it touched something sensitive (device memory, a
//! coprocessor, an exclusive monitor) or because the guest kernel rewrote a
//! privileged instruction into a hypercall.
//!
//! ## Format
//!
//! ```text
//! 31-28   27-25   24-0
//! [Cond] [Class] [Instruction-specific]
//! ```
//!
//! - **Condition (bits 28-31)**: See [`condition`]
//! - **Class (bits 25-27)**: Determines the instruction category
//!
//! ## Instruction Categories
//!
//! | Bits 27-25 | Category                  | Examples                     |
//! |------------|---------------------------|------------------------------|
//! | 00x        | Data Processing / Misc    | ADD, MOVW, LDREX, LDRH       |
//! | 01x        | Load/Store Word or Byte   | LDR, STRB, LDRT              |
//! | 100        | Block Data Transfer       | LDM, STM                     |
//! | 101        | Branch                    | (never trapped)              |
//! | 11x        | Coprocessor / Supervisor  | MCR, LDC, CDP, SVC           |
//!
//! Branches are never trapped by the hypervisor so the 101 class is treated
//! as a decode failure. The privileged operations (`CPS`, `MSR`, `RFE`,
//! `SRS`, exception returns, user-bank block transfers) arrive through
//! [`emulate::emulate_hypercall`] instead and are decoded in [`hypercall`].
//!
//! ## Submodules
//!
//! - [`emulate`] - Entry points and top-level dispatch
//! - [`data_processing`] - ALU, MOVW, exclusives, extra load/stores
//! - [`single_data_transfer`] - Word and byte load/stores
//! - [`block_data_transfer`] - LDM and STM
//! - [`coprocessor`] - MCR/MRC/MCRR/MRRC/CDP/LDC/STC and SVC
//! - [`hypercall`] - Privileged operations rewritten as hypercalls
//! - [`alu`] - ALU opcodes and the barrel shifter
//! - [`addressing`] - Offset addressing and block transfer address math

#[allow(clippy::cast_possible_truncation)]
pub mod addressing;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_lossless)]
pub mod alu;

#[allow(clippy::cast_possible_truncation)]
pub mod block_data_transfer;

pub mod condition;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::similar_names)]
pub mod coprocessor;

pub mod cpu_modes;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::similar_names)]
pub mod data_processing;

pub mod emulate;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::similar_names)]
pub mod hypercall;

pub mod psr;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::similar_names)]
pub mod single_data_transfer;
