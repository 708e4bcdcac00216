//! Ethernet link-layer constants and MAC addresses

use core::fmt;
use core::str::FromStr;

/// Ethernet header size: dest MAC (6) + src MAC (6) + ethertype (2)
pub const HEADER_SIZE: usize = 14;

/// Largest payload carried by one frame
pub const MTU: usize = 1500;

/// Largest frame handed to the MAC, header included, CRC excluded
pub const MAX_FRAME_SIZE: usize = MTU + HEADER_SIZE;

/// Frame check sequence appended by the MAC
pub const CRC_SIZE: usize = 4;

/// 48-bit MAC address, displayed as XX:XX:XX:XX:XX:XX
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// FF:FF:FF:FF:FF:FF
    pub const fn broadcast() -> Self {
        Self([0xFF; 6])
    }

    /// 00:00:00:00:00:00
    pub const fn zero() -> Self {
        Self([0x00; 6])
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// Group bit (bit 0 of the first octet)
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0x01) != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Locally administered bit (bit 1 of the first octet)
    pub fn is_local(&self) -> bool {
        (self.0[0] & 0x02) != 0
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl Default for MacAddress {
    /// Locally administered 02:00:00:00:00:00
    fn default() -> Self {
        Self([0x02, 0x00, 0x00, 0x00, 0x00, 0x00])
    }
}

/// Error returned when parsing a MAC address string fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseMacError;

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid MAC address")
    }
}

/// Parse "B8:27:EB:12:34:56" (`-` separators accepted too)
impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(ParseMacError)?;
            if part.len() != 2 {
                return Err(ParseMacError);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseMacError)?;
        }

        if parts.next().is_some() {
            return Err(ParseMacError);
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}
