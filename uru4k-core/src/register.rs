//! U.are.U 4000 register map

use std::fmt;

use crate::error::{Error, Result};

/// Device registers reachable through vendor control transfers
///
/// The address travels in the `wValue` field of the control transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Register {
    /// Hardware status (read-only, diagnostic)
    HwStat = 0x07,

    /// Scramble table index
    ScrambleDataIndex = 0x33,

    /// Scramble table key
    ScrambleDataKey = 0x34,

    /// Sensor acquisition / LED mode
    Mode = 0x4E,
}

impl Register {
    /// Address as carried in `wValue`
    pub fn address(self) -> u16 {
        self as u16
    }

    /// Get register name
    pub fn name(self) -> &'static str {
        match self {
            Self::HwStat => "REG_HWSTAT",
            Self::ScrambleDataIndex => "REG_SCRAMBLE_DATA_INDEX",
            Self::ScrambleDataKey => "REG_SCRAMBLE_DATA_KEY",
            Self::Mode => "REG_MODE",
        }
    }
}

impl From<Register> for u16 {
    fn from(reg: Register) -> u16 {
        reg as u16
    }
}

impl TryFrom<u16> for Register {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x07 => Ok(Self::HwStat),
            0x33 => Ok(Self::ScrambleDataIndex),
            0x34 => Ok(Self::ScrambleDataKey),
            0x4E => Ok(Self::Mode),
            _ => Err(Error::UnknownRegister(value)),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_conversion() {
        assert_eq!(u16::from(Register::Mode), 0x4E);
        assert_eq!(Register::try_from(0x07).unwrap(), Register::HwStat);
    }

    #[test]
    fn test_register_display() {
        assert_eq!(Register::Mode.to_string(), "REG_MODE(0x4E)");
    }

    #[test]
    fn test_unknown_register() {
        assert_eq!(Register::try_from(0x99), Err(Error::UnknownRegister(0x99)));
    }
}
