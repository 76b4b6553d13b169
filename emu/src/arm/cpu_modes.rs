use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// The normal ARM program execution state.
    User = 0b10000,

    /// Designed to support a data transfer or channel process.
    Fiq = 0b10001,

    /// Used for general-purpose interrupt handling.
    Irq = 0b10010,

    /// Protected mode for the operating system.
    Supervisor = 0b10011,

    /// Security extensions gateway between the two worlds.
    Monitor = 0b10110,

    /// Entered after a data or instruction prefetch abort.
    Abort = 0b10111,

    /// Entered when an undefined instruction is executed.
    Undefined = 0b11011,

    /// A privileged user mode for the operating system.
    System = 0b11111,
}

impl Mode {
    pub const fn is_privileged(self) -> bool {
        !matches!(self, Self::User)
    }
}

impl From<Mode> for u32 {
    fn from(m: Mode) -> Self {
        m as Self
    }
}

impl TryFrom<u32> for Mode {
    type Error = String;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10110 => Ok(Self::Monitor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(String::from("Unexpected value for Mode")),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn mode_roundtrip() {
        for raw in [
            0b10000_u32,
            0b10001,
            0b10010,
            0b10011,
            0b10110,
            0b10111,
            0b11011,
            0b11111,
        ] {
            let mode = Mode::try_from(raw).unwrap();
            assert_eq!(u32::from(mode), raw);
        }
    }

    #[test]
    fn invalid_mode_bits() {
        assert!(Mode::try_from(0b00000).is_err());
        assert!(Mode::try_from(0b10100).is_err());
        assert!(Mode::try_from(0b11110).is_err());
    }

    #[test]
    fn privilege() {
        assert!(!Mode::User.is_privileged());
        assert!(Mode::System.is_privileged());
        assert!(Mode::Supervisor.is_privileged());
        assert!(Mode::Monitor.is_privileged());
    }
}
