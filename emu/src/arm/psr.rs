//! # Program Status Registers (CPSR and SPSR)
//!
//! The PSR contains condition flags (N, Z, C, V) and control bits (mode,
//! state, interrupt masks). The guest's CPSR decides whether a trapped
//! instruction executes at all, and the hypercall operations read and write
//! it through byte masks.
//!
//! ```text
//! 31 30 29 28 27      9 8 7 6 5 4   0
//! ┌──┬──┬──┬──┬────────┬─┬─┬─┬─┬─────┐
//! │N │Z │C │V │Reserved│A│I│F│T│Mode │
//! └──┴──┴──┴──┴────────┴─┴─┴─┴─┴─────┘
//! ```
//!
//! - **Flags (28-31)**: See [`condition`](super::condition) for how these are tested
//! - **Mode (0-4)**: See [`cpu_modes`](super::cpu_modes) for operating modes
//! - **T bit (5)**: ARM (0) or Thumb (1) state
//! - **A/I/F bits (6-8)**: Asynchronous abort, IRQ and FIQ disable
//!
//! Each exception mode has a **SPSR** that saved the CPSR on exception
//! entry; exception returns restore it wholesale through
//! [`PSR_ALL_BITS`].

use serde::{Deserialize, Serialize};

use crate::arm::alu::ArithmeticOpResult;
use crate::arm::{condition::Condition, cpu_modes::Mode};
use crate::bitwise::Bits;

/// Mask selecting every PSR bit; exception returns restore the whole register.
pub const PSR_ALL_BITS: u32 = 0xFFFF_FFFF;

/// Mask selecting the N, Z, C and V flags.
pub const PSR_NZCV: u32 = 0xF000_0000;

/// Mask selecting N, Z and C; logical operations leave V untouched.
pub const PSR_NZC: u32 = 0xE000_0000;

/// Mask selecting the mode field.
pub const PSR_MODE_MASK: u32 = 0x0000_001F;

/// Asynchronous abort disable bit.
pub const PSR_ASYNC_ABORT_DISABLE: u32 = 1 << 8;

/// IRQ disable bit.
pub const PSR_IRQ_DISABLE: u32 = 1 << 7;

/// FIQ disable bit.
pub const PSR_FIQ_DISABLE: u32 = 1 << 6;

/// Program Status Register (CPSR or SPSR).
///
/// The `Psr` struct wraps a raw `u32` and provides type-safe accessors for
/// each field. It's used for both CPSR (current) and SPSR (saved) registers
/// of the guest.
///
/// See the [module-level documentation](self) for a complete description
/// of all fields and their meanings.
///
/// # Example
///
/// ```
/// use emu::arm::psr::Psr;
///
/// let mut cpsr = Psr::default();
///
/// cpsr.set_zero_flag(true);
/// assert!(cpsr.zero_flag());
///
/// cpsr.set_carry_flag(true);
/// assert!(cpsr.carry_flag());
/// ```
#[derive(Default, Clone, Copy, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    pub(crate) fn can_execute(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),                         // Equal (Z=1)
            NE => !self.zero_flag(),                        // Not equal (Z=0)
            CS => self.carry_flag(),                        // Unsigned higher or same (C=1)
            CC => !self.carry_flag(),                       // Unsigned lower (C=0)
            MI => self.sign_flag(),                         // Negative (N=1)
            PL => !self.sign_flag(),                        // Positive or zero (N=0)
            VS => self.overflow_flag(),                     // Overflow (V=1)
            VC => !self.overflow_flag(),                    // No overflow (V=0)
            HI => self.carry_flag() && !self.zero_flag(),   // Unsigned higher (C=1 and Z=0)
            LS => !self.carry_flag() || self.zero_flag(),   // Unsigned lower or same (C=0 or Z=1)
            GE => self.sign_flag() == self.overflow_flag(), // Greater or equal (N=V)
            LT => self.sign_flag() != self.overflow_flag(), // Less than (N<>V)
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()), // Greater than (Z=0 and N=V)
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()), // Less or equal (Z=1 or N<>V)
            AL => true, // Always (the "AL" suffix can be omitted)
            NV => true, // ARMv7 unconditional space
        }
    }

    /// N => Bit 31, (0=Not Signed, 1=Signed)
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z => Bit 30, (0=Not Zero, 1=Zero)
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C => Bit 29, (0=Borrow/No Carry, 1=Carry/No Borrow)
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V => Bit 28, (0=No Overflow, 1=Overflow)
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// A => Bit 8, (0=Enable, 1=Disable)
    #[must_use]
    pub fn async_abort_disable(self) -> bool {
        self.0.get_bit(8)
    }

    /// I => Bit 7, (0=Enable, 1=Disable)
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F => Bit 6, (0=Enable, 1=Disable)
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    /// Applies all four condition flags from an ALU result.
    pub fn set_flags(&mut self, op_result: &ArithmeticOpResult) {
        self.set_sign_flag(op_result.sign);
        self.set_zero_flag(op_result.zero);
        self.set_carry_flag(op_result.carry);
        self.set_overflow_flag(op_result.overflow);
    }

    /// The current operating mode, from the low 5 bits.
    ///
    /// A guest should never hold an illegal mode encoding; if it somehow
    /// does, fall back to Supervisor.
    #[must_use]
    pub fn mode(self) -> Mode {
        let mode_bits = self.0.get_bits(0..=4);
        Mode::try_from(mode_bits).unwrap_or_else(|_| {
            tracing::debug!("invalid PSR mode bits {mode_bits:#07b}, assuming Supervisor");
            Mode::Supervisor
        })
    }

    pub const fn set_mode(&mut self, mode: Mode) {
        self.set_mode_raw(mode as u32);
    }

    pub const fn set_mode_raw(&mut self, mode_bits: u32) {
        self.0 = (self.0 & !PSR_MODE_MASK) | (mode_bits & PSR_MODE_MASK);
    }
}

impl From<u32> for Psr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Psr> for u32 {
    fn from(psr: Psr) -> Self {
        psr.0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn check_flags() {
        let mut cpsr = Psr::default();

        cpsr.set_sign_flag(true);
        assert!(cpsr.sign_flag());
        assert_eq!(u32::from(cpsr), 1 << 31);

        cpsr.set_zero_flag(true);
        cpsr.set_carry_flag(true);
        cpsr.set_overflow_flag(true);
        assert_eq!(u32::from(cpsr) & PSR_NZCV, PSR_NZCV);

        cpsr.set_carry_flag(false);
        assert!(!cpsr.carry_flag());
        assert!(cpsr.overflow_flag());
    }

    #[test]
    fn check_interrupt_disable_bits() {
        let psr = Psr::from(PSR_IRQ_DISABLE | PSR_FIQ_DISABLE);
        assert!(psr.irq_disable());
        assert!(psr.fiq_disable());
        assert!(!psr.async_abort_disable());

        let psr = Psr::from(PSR_ASYNC_ABORT_DISABLE);
        assert!(psr.async_abort_disable());
    }

    #[test]
    fn check_modes() {
        let mut cpsr = Psr::default();
        cpsr.set_mode(Mode::Irq);
        assert_eq!(u32::from(cpsr) & 0b11111, 0b10010);
        assert_eq!(cpsr.mode(), Mode::Irq);

        cpsr.set_mode(Mode::Supervisor);
        assert_eq!(u32::from(cpsr) & 0b11111, 0b10011);
        assert_eq!(cpsr.mode(), Mode::Supervisor);

        cpsr.set_mode(Mode::Monitor);
        assert_eq!(u32::from(cpsr) & 0b11111, 0b10110);
        assert_eq!(cpsr.mode(), Mode::Monitor);

        cpsr.set_mode_raw(0b11111);
        assert_eq!(cpsr.mode(), Mode::System);
    }

    #[test]
    fn invalid_mode_defaults_to_supervisor() {
        let mut cpsr = Psr::default();
        cpsr.set_mode_raw(0b00110);
        assert_eq!(cpsr.mode(), Mode::Supervisor);
    }

    #[test]
    fn check_can_execute() {
        use Condition::*;

        let mut cpsr = Psr::default();
        cpsr.set_zero_flag(true);
        assert!(cpsr.can_execute(EQ));
        assert!(!cpsr.can_execute(NE));
        assert!(cpsr.can_execute(LS));
        assert!(!cpsr.can_execute(HI));

        let mut cpsr = Psr::default();
        cpsr.set_sign_flag(true);
        assert!(cpsr.can_execute(MI));
        assert!(cpsr.can_execute(LT));
        assert!(!cpsr.can_execute(GE));

        cpsr.set_overflow_flag(true);
        assert!(cpsr.can_execute(GE));
        assert!(cpsr.can_execute(GT));

        let cpsr = Psr::default();
        assert!(cpsr.can_execute(AL));
        assert!(cpsr.can_execute(NV));
    }
}
