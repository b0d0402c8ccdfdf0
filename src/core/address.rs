//! A Bluetooth device address

use std::fmt::{Debug, Display, Formatter, Result};
use std::str::FromStr;

/// A classic / LE public device address, as reported by the platform
/// (e.g. `"00:11:22:AA:BB:CC"`).
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// An empty/invalid address
    pub const EMPTY: Self = Self([0; 6]);
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

// Only the last two octets go to the logs.
impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "xx:xx:xx:xx:{:02X}:{:02X}", self.0[4], self.0[5])
    }
}

/// Returned when a string is not a colon-separated six octet address
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidAddress(pub String);

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let octets = s.split(':').collect::<Vec<_>>();
        if octets.len() != 6 {
            return Err(InvalidAddress(s.to_string()));
        }

        let mut raw = [0u8; 6];
        for (byte, octet) in raw.iter_mut().zip(octets) {
            if octet.len() != 2 {
                return Err(InvalidAddress(s.to_string()));
            }
            *byte = u8::from_str_radix(octet, 16).map_err(|_| InvalidAddress(s.to_string()))?;
        }
        Ok(Address(raw))
    }
}
