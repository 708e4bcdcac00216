//! MAC/DMA Device Abstraction
//!
//! This module defines the contract between the datapath core (`crate::net`)
//! and the Ethernet MAC + DMA engine that moves frames between the wire and
//! pool memory.
//!
//! ## Design Philosophy
//!
//! The core never touches registers. Everything hardware-facing goes through
//! `MacDma`, which allows:
//!
//! - **Hardware portability**: the STM32 ETH block today, other MACs later
//! - **Testing**: a memory-only fake drives the whole datapath on the host
//! - **Zero copy**: receive descriptors are armed with pool slots, transmit
//!   descriptors point straight at chain payload
//!
//! ## Buffer Ownership
//!
//! ```text
//!   PacketPool --allocate--> RxBuffer --rx_provide--> hardware
//!   hardware --rx_poll--> RxCompletion(slot) --reclaim--> PacketBuf (software)
//!   PacketChain --tx_submit (pinned)--> hardware --tx_reclaim--> TxCompletion (dropped)
//! ```
//!
//! ## Current Implementations
//!
//! - `Stm32Eth` - STM32F4 Ethernet MAC with chained DMA descriptors

use crate::drivers::net::phy::PhyError;
use crate::net::chain::PacketChain;
use crate::net::ethernet::MacAddress;
use crate::net::packet_pool::{RxBuffer, SlotId};
use crate::net::tx::TxFragmentList;
use core::fmt;

/// Errors that can occur during network device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Device is not initialized
    NotInitialized,

    /// `init()` called twice without `deinit()`
    AlreadyInitialized,

    /// Receive buffer pool has no free slot
    PoolExhausted,

    /// Hardware error during operation
    HardwareError,

    /// Timeout waiting for a register handshake
    Timeout,

    /// No link; frames cannot leave the interface
    LinkDown,

    /// MAC/DMA engine is stopped
    NotRunning,

    /// Hardware did not accept the frame within the bounded wait
    TransmitTimeout,

    /// All transmit descriptors are owned by the DMA engine (try again later)
    TxBusy,

    /// Outbound chain has more fragments than the transmit ring holds
    TooManyFragments { fragments: usize, capacity: usize },

    /// Frame is too large for device
    FrameTooLarge,

    /// Outbound chain carries no bytes
    EmptyFrame,

    /// Invalid configuration or parameter
    InvalidConfiguration,

    /// PHY management access failed
    Phy(PhyError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::NotInitialized => write!(f, "Device not initialized"),
            NetworkError::AlreadyInitialized => write!(f, "Device already initialized"),
            NetworkError::PoolExhausted => write!(f, "Buffer pool exhausted"),
            NetworkError::HardwareError => write!(f, "Hardware error"),
            NetworkError::Timeout => write!(f, "Operation timeout"),
            NetworkError::LinkDown => write!(f, "Link down"),
            NetworkError::NotRunning => write!(f, "MAC/DMA engine stopped"),
            NetworkError::TransmitTimeout => write!(f, "Transmit timeout"),
            NetworkError::TxBusy => write!(f, "Transmit ring busy"),
            NetworkError::TooManyFragments {
                fragments,
                capacity,
            } => write!(
                f,
                "Too many fragments: {} (ring holds {})",
                fragments, capacity
            ),
            NetworkError::FrameTooLarge => write!(f, "Frame too large"),
            NetworkError::EmptyFrame => write!(f, "Empty frame"),
            NetworkError::InvalidConfiguration => write!(f, "Invalid configuration"),
            NetworkError::Phy(e) => write!(f, "PHY error: {}", e),
        }
    }
}

impl From<PhyError> for NetworkError {
    fn from(e: PhyError) -> Self {
        NetworkError::Phy(e)
    }
}

/// Negotiated line rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Speed10,
    Speed100,
}

impl LinkSpeed {
    pub fn mbps(&self) -> u32 {
        match self {
            LinkSpeed::Speed10 => 10,
            LinkSpeed::Speed100 => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexMode {
    Half,
    Full,
}

/// Speed/duplex pair the MAC must be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub speed: LinkSpeed,
    pub duplex: DuplexMode,
}

impl fmt::Display for LinkParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Mbps, {} duplex",
            self.speed.mbps(),
            match self.duplex {
                DuplexMode::Full => "full",
                DuplexMode::Half => "half",
            }
        )
    }
}

/// One receive descriptor handed back by the DMA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxCompletion {
    /// Pool slot the hardware wrote into
    pub slot: SlotId,

    /// Bytes of frame data in this slot
    pub length: usize,

    /// Last descriptor of the frame
    pub last: bool,

    /// Hardware flagged the frame as bad (CRC, overrun, ...)
    pub error: bool,
}

/// Rejected transmit submission; hands the pinned frame back to the caller
#[derive(Debug)]
pub struct TxSubmitError {
    pub error: NetworkError,
    pub frame: PacketChain,
}

/// Transmission handed back by `tx_reclaim()`
#[derive(Debug)]
pub struct TxCompletion {
    pub frame: PacketChain,

    /// False if the engine was stopped before sending the frame or flagged
    /// a transmit error
    pub sent: bool,
}

/// Ethernet MAC + DMA engine abstraction
///
/// # Thread Safety
///
/// Implementations are not required to be thread-safe. The facade owns the
/// device and calls it only from the poll loop.
pub trait MacDma {
    /// Reset the MAC/DMA, program `mac` into the address filter and set up
    /// the descriptor rings. The engine stays stopped until `start()`.
    #[must_use = "init() failure must be handled - device may not be operational"]
    fn init(&mut self, mac: MacAddress) -> Result<(), NetworkError>;

    /// Stop the engine and release the hardware. Armed receive slots stay
    /// recorded until drained with `rx_revoke()`.
    fn deinit(&mut self) -> Result<(), NetworkError>;

    /// Program speed/duplex into the MAC configuration register
    fn set_link_params(&mut self, params: LinkParams) -> Result<(), NetworkError>;

    /// Enable the MAC transmitter/receiver and the DMA engines
    fn start(&mut self) -> Result<(), NetworkError>;

    /// Disable the MAC transmitter/receiver and the DMA engines
    fn stop(&mut self) -> Result<(), NetworkError>;

    /// True when the next receive descriptor has no buffer attached
    fn rx_wants_buffer(&self) -> bool;

    /// Attach `buffer` to the next empty receive descriptor and give it to
    /// the hardware. Returns the buffer if no descriptor is free.
    fn rx_provide(&mut self, buffer: RxBuffer) -> Result<(), RxBuffer>;

    /// Next completed receive descriptor, in hardware completion order
    fn rx_poll(&mut self) -> Option<RxCompletion>;

    /// Detach one armed receive slot from a stopped engine
    fn rx_revoke(&mut self) -> Option<SlotId>;

    /// Number of transmit descriptors, i.e. maximum fragments per frame
    fn tx_ring_depth(&self) -> usize;

    /// Queue one frame. `fragments` points into `frame`, which the driver
    /// keeps alive until the hardware is done with it. Fails with
    /// `NotRunning` while the engine is stopped.
    fn tx_submit(
        &mut self,
        fragments: &TxFragmentList<'_>,
        frame: PacketChain,
    ) -> Result<(), TxSubmitError>;

    /// Hand back the pinned frame of the oldest finished transmission. Once
    /// the engine is stopped, queued frames come back with `sent == false`.
    fn tx_reclaim(&mut self) -> Option<TxCompletion>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        assert_eq!(
            NetworkError::TooManyFragments {
                fragments: 6,
                capacity: 4
            }
            .to_string(),
            "Too many fragments: 6 (ring holds 4)"
        );
        assert_eq!(
            NetworkError::from(PhyError::Timeout).to_string(),
            "PHY error: SMI timeout"
        );
    }

    #[test]
    fn test_transmit_state_errors_display() {
        assert_eq!(NetworkError::LinkDown.to_string(), "Link down");
        assert_eq!(NetworkError::NotRunning.to_string(), "MAC/DMA engine stopped");
    }

    #[test]
    fn test_link_params_display() {
        let params = LinkParams {
            speed: LinkSpeed::Speed100,
            duplex: DuplexMode::Full,
        };
        assert_eq!(params.to_string(), "100 Mbps, full duplex");
    }
}
