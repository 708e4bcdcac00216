//! Ethernet PHY access
//!
//! PHYs are managed over SMI (MDC/MDIO). The bus itself is provided by the
//! MAC (`SmiBus`); the PHY driver turns register reads into the three facts
//! the Link Monitor needs (`PhyControl`).

pub mod lan8720;

pub use lan8720::Lan8720;

use crate::drivers::net::netdev::{DuplexMode, LinkParams, LinkSpeed};
use core::fmt;

/// Errors reported by the PHY or the management bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyError {
    /// SMI transaction did not complete
    Timeout,

    /// Bus-level failure reported by the MAC
    Bus,

    /// Soft reset bit did not self-clear
    ResetFailed,

    /// Reset GPIO could not be driven
    Gpio,

    /// Address outside 0..=31
    InvalidAddress,

    /// Field value does not fit the register field
    InvalidValue,

    /// Driver used before `init()`
    NotInitialized,
}

impl fmt::Display for PhyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhyError::Timeout => write!(f, "SMI timeout"),
            PhyError::Bus => write!(f, "SMI bus error"),
            PhyError::ResetFailed => write!(f, "PHY reset failed"),
            PhyError::Gpio => write!(f, "Reset GPIO error"),
            PhyError::InvalidAddress => write!(f, "Invalid PHY address"),
            PhyError::InvalidValue => write!(f, "Invalid field value"),
            PhyError::NotInitialized => write!(f, "PHY not initialized"),
        }
    }
}

/// Serial management interface (MDC/MDIO) transactions
pub trait SmiBus {
    fn read(&mut self, phy: u8, reg: u8) -> Result<u16, PhyError>;
    fn write(&mut self, phy: u8, reg: u8, value: u16) -> Result<(), PhyError>;
}

/// Decoded speed indication of a 10/100 PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedIndication {
    Half10,
    Full10,
    Half100,
    Full100,
    /// Reserved / negotiation still running
    Unknown(u8),
}

impl SpeedIndication {
    /// Decode the 3-bit HCDSPEED field
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0b001 => SpeedIndication::Half10,
            0b101 => SpeedIndication::Full10,
            0b010 => SpeedIndication::Half100,
            0b110 => SpeedIndication::Full100,
            other => SpeedIndication::Unknown(other),
        }
    }

    /// MAC settings for this indication; `None` for anything but the four
    /// valid combinations
    pub fn link_params(&self) -> Option<LinkParams> {
        let (speed, duplex) = match self {
            SpeedIndication::Half10 => (LinkSpeed::Speed10, DuplexMode::Half),
            SpeedIndication::Full10 => (LinkSpeed::Speed10, DuplexMode::Full),
            SpeedIndication::Half100 => (LinkSpeed::Speed100, DuplexMode::Half),
            SpeedIndication::Full100 => (LinkSpeed::Speed100, DuplexMode::Full),
            SpeedIndication::Unknown(_) => return None,
        };
        Some(LinkParams { speed, duplex })
    }
}

/// Raw link-status bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Down,
    Up,
}

/// What the Link Monitor needs from a PHY
pub trait PhyControl {
    fn auto_negotiation_done(&mut self) -> Result<bool, PhyError>;
    fn speed_indication(&mut self) -> Result<SpeedIndication, PhyError>;
    fn link_status(&mut self) -> Result<LinkStatus, PhyError>;
}
