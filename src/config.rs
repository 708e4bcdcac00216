//! Interface configuration
//!
//! Compile-time sizes for the DMA rings and pool slots, plus the runtime
//! `NetConfig` handed to `NetInterface::new()`.

use crate::drivers::net::NetworkError;
use crate::net::ethernet::MacAddress;
use core::fmt;
use core::net::Ipv4Addr;

/// Bytes per receive pool slot (one full frame plus CRC, 32-byte multiple)
pub const RX_BUFFER_SIZE: usize = 1536;

/// Default number of receive pool slots
pub const DEFAULT_RX_BUFFER_COUNT: usize = 10;

/// Receive descriptors in the DMA ring
pub const RX_DESC_COUNT: usize = 4;

/// Transmit descriptors in the DMA ring, i.e. the fragment limit per frame
pub const TX_DESC_COUNT: usize = 4;

/// Link Monitor cadence
pub const LINK_POLL_INTERVAL_MS: u32 = 100;

/// Address acquisition cadence
pub const DHCP_POLL_INTERVAL_MS: u32 = 500;

/// Address acquisition polls before falling back to the static address
pub const MAX_DHCP_TRIES: u8 = 4;

/// LAN8720 strap default (PHYAD0 pulled high)
pub const DEFAULT_PHY_ADDRESS: u8 = 1;

/// Highest address on the SMI bus
pub const MAX_PHY_ADDRESS: u8 = 31;

/// Submission attempts (with transmit reclaim in between) before a send
/// is reported as timed out
pub const TX_ACCEPT_ATTEMPTS: u32 = 1000;

/// IPv4 address, netmask and gateway of the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Config {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
}

impl Ipv4Config {
    /// Fixed address used when no DHCP server answers
    pub const FALLBACK: Self = Self {
        address: Ipv4Addr::new(192, 168, 1, 10),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
    };

    /// Build from an address and a CIDR prefix length
    pub fn from_prefix(address: Ipv4Addr, prefix_len: u8, gateway: Option<Ipv4Addr>) -> Self {
        let mask = match prefix_len {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => u32::MAX << (32 - n),
        };
        Self {
            address,
            netmask: Ipv4Addr::from(mask),
            gateway,
        }
    }

    /// Number of leading one bits in the netmask
    pub fn prefix_len(&self) -> u8 {
        u32::from(self.netmask).leading_ones() as u8
    }
}

impl fmt::Display for Ipv4Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len())?;
        if let Some(gateway) = self.gateway {
            write!(f, " via {}", gateway)?;
        }
        Ok(())
    }
}

/// Runtime configuration of the network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    pub mac_address: MacAddress,
    pub phy_address: u8,
    pub rx_buffer_count: usize,
    /// Run address acquisition; when off the static address is applied at init
    pub dhcp_enabled: bool,
    pub max_dhcp_tries: u8,
    pub static_address: Ipv4Config,
    pub link_poll_interval_ms: u32,
    pub dhcp_poll_interval_ms: u32,
    pub tx_accept_attempts: u32,
}

/// Station address from a "XX:XX:XX:XX:XX:XX" string, or the locally
/// administered default when absent or malformed
fn mac_address_or_default(text: Option<&str>) -> MacAddress {
    match text.map(str::parse::<MacAddress>) {
        Some(Ok(mac)) => mac,
        Some(Err(e)) => {
            log::warn!("[config] NETIF_MAC ignored: {}", e);
            MacAddress::default()
        }
        None => MacAddress::default(),
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            mac_address: mac_address_or_default(option_env!("NETIF_MAC")),
            phy_address: DEFAULT_PHY_ADDRESS,
            rx_buffer_count: DEFAULT_RX_BUFFER_COUNT,
            dhcp_enabled: true,
            max_dhcp_tries: MAX_DHCP_TRIES,
            static_address: Ipv4Config::FALLBACK,
            link_poll_interval_ms: LINK_POLL_INTERVAL_MS,
            dhcp_poll_interval_ms: DHCP_POLL_INTERVAL_MS,
            tx_accept_attempts: TX_ACCEPT_ATTEMPTS,
        }
    }
}

impl NetConfig {
    pub fn with_mac_address(mut self, mac: MacAddress) -> Self {
        self.mac_address = mac;
        self
    }

    /// SMI address the PHY driver binds to (`Lan8720::from_config`)
    pub fn with_phy_address(mut self, address: u8) -> Self {
        self.phy_address = address;
        self
    }

    pub fn with_static_address(mut self, address: Ipv4Config) -> Self {
        self.static_address = address;
        self
    }

    pub fn with_dhcp(mut self, enabled: bool) -> Self {
        self.dhcp_enabled = enabled;
        self
    }

    pub fn with_rx_buffer_count(mut self, count: usize) -> Self {
        self.rx_buffer_count = count;
        self
    }

    /// Reject values the datapath cannot run with
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.rx_buffer_count == 0
            || self.rx_buffer_count > u16::MAX as usize
            || self.max_dhcp_tries == 0
            || self.link_poll_interval_ms == 0
            || self.dhcp_poll_interval_ms == 0
            || self.tx_accept_attempts == 0
            || self.phy_address > MAX_PHY_ADDRESS
            || self.mac_address.is_multicast()
        {
            return Err(NetworkError::InvalidConfiguration);
        }
        Ok(())
    }
}
