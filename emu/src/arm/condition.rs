//! # ARM Conditional Execution
//!
//! Almost every ARM instruction is conditionally executed based on the CPSR
//! flags, encoded in the top 4 bits (31-28) of the instruction word. A
//! trapped instruction whose condition fails must still retire: the emulator
//! skips its effects and advances the guest program counter.
//!
//! ## The CPU Flags (CPSR bits 28-31)
//!
//! | Flag | Bit | Name     | Set When                                    |
//! |------|-----|----------|---------------------------------------------|
//! | N    | 31  | Negative | Result has bit 31 set (is negative)         |
//! | Z    | 30  | Zero     | Result is zero                              |
//! | C    | 29  | Carry    | Addition overflowed, or subtraction didn't  |
//! | V    | 28  | Overflow | Signed arithmetic overflowed                |
//!
//! ## Condition Codes
//!
//! ```text
//! ┌───────┬────────┬─────────────────────┬─────────────────────────────────┐
//! │ Code  │ Suffix │     Meaning         │          Flags Tested           │
//! ├───────┼────────┼─────────────────────┼─────────────────────────────────┤
//! │ 0000  │   EQ   │ Equal               │ Z=1                             │
//! │ 0001  │   NE   │ Not equal           │ Z=0                             │
//! │ 0010  │   CS   │ Carry set / ≥ (uns) │ C=1                             │
//! │ 0011  │   CC   │ Carry clear / < (u) │ C=0                             │
//! │ 0100  │   MI   │ Minus / negative    │ N=1                             │
//! │ 0101  │   PL   │ Plus / non-negative │ N=0                             │
//! │ 0110  │   VS   │ Overflow set        │ V=1                             │
//! │ 0111  │   VC   │ Overflow clear      │ V=0                             │
//! │ 1000  │   HI   │ Higher (unsigned)   │ C=1 AND Z=0                     │
//! │ 1001  │   LS   │ Lower/same (unsig)  │ C=0 OR Z=1                      │
//! │ 1010  │   GE   │ ≥ (signed)          │ N=V                             │
//! │ 1011  │   LT   │ < (signed)          │ N≠V                             │
//! │ 1100  │   GT   │ > (signed)          │ Z=0 AND N=V                     │
//! │ 1101  │   LE   │ ≤ (signed)          │ Z=1 OR N≠V                      │
//! │ 1110  │   AL   │ Always              │ (unconditional)                 │
//! │ 1111  │   NV   │ Unconditional space │ (always executes on ARMv7)      │
//! └───────┴────────┴─────────────────────┴─────────────────────────────────┘
//! ```
//!
//! On ARMv7-A the 1111 encoding is not "never": it selects the unconditional
//! instruction space (LDC2, MCR2, ...), so instructions carrying it always
//! execute. Pre-v5 cores treated it as never-execute; no such guest is
//! supported here.

use serde::{Deserialize, Serialize};

/// Condition codes for ARM conditional execution.
///
/// Every trapped instruction carries one of these in its top nibble. The
/// emulator tests it against the guest CPSR flags through
/// [`Psr::can_execute`](super::psr::Psr::can_execute) before performing any
/// architectural effect.
///
/// See the [module-level documentation](self) for the full condition table.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Condition {
    /// Equal (Z=1)
    EQ = 0x0,

    /// Not equal (Z=0)
    NE = 0x1,

    /// Carry set / unsigned higher or same (C=1)
    ///
    /// Also known as HS (Higher or Same).
    CS = 0x2,

    /// Carry clear / unsigned lower (C=0)
    ///
    /// Also known as LO (Lower).
    CC = 0x3,

    /// Minus / negative (N=1)
    MI = 0x4,

    /// Plus / positive or zero (N=0)
    PL = 0x5,

    /// Overflow (V=1)
    VS = 0x6,

    /// No overflow (V=0)
    VC = 0x7,

    /// Unsigned higher (C=1 and Z=0)
    HI = 0x8,

    /// Unsigned lower or same (C=0 or Z=1)
    LS = 0x9,

    /// Signed greater than or equal (N=V)
    GE = 0xA,

    /// Signed less than (N≠V)
    LT = 0xB,

    /// Signed greater than (Z=0 and N=V)
    GT = 0xC,

    /// Signed less than or equal (Z=1 or N≠V)
    LE = 0xD,

    /// Always (the "AL" suffix can be omitted)
    AL = 0xE,

    /// The ARMv7 unconditional instruction space, always executed.
    NV = 0xF,
}

impl From<u32> for Condition {
    fn from(condition: u32) -> Self {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match condition {
            0x0 => EQ,
            0x1 => NE,
            0x2 => CS,
            0x3 => CC,
            0x4 => MI,
            0x5 => PL,
            0x6 => VS,
            0x7 => VC,
            0x8 => HI,
            0x9 => LS,
            0xA => GE,
            0xB => LT,
            0xC => GT,
            0xD => LE,
            0xE => AL,
            0xF => NV,
            _ => unreachable!(),
        }
    }
}
