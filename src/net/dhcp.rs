//! Address Acquisition state machine
//!
//! Drives DHCP-style address acquisition from link events. Invoked once per
//! coarse tick; the protocol exchange itself (and its own retransmit timer)
//! lives behind `AddressProtocol`.
//!
//! ```text
//!   Off --link up--> Start --> WaitAddress --address--> Assigned
//!                      ^           |                        |
//!                      |           +--max retries--> Timeout (static address)
//!                      +------------------lease lost--------+
//!
//!   any --link down--> LinkDown --link up--> Start
//! ```

use crate::config::Ipv4Config;
use crate::drivers::net::NetworkError;
use crate::net::link::LinkEvent;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    Off,
    Start,
    WaitAddress,
    Assigned,
    Timeout,
    LinkDown,
}

impl fmt::Display for DhcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DhcpState::Off => "off",
            DhcpState::Start => "start",
            DhcpState::WaitAddress => "wait address",
            DhcpState::Assigned => "assigned",
            DhcpState::Timeout => "timeout",
            DhcpState::LinkDown => "link down",
        };
        f.write_str(name)
    }
}

/// Address change published by `tick()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressEvent {
    /// Server handed out an address
    Assigned(Ipv4Config),
    /// No answer in time, static address applied
    Fallback(Ipv4Config),
    /// Lease withdrawn, address cleared and acquisition restarted
    Lost,
}

/// The protocol stack's side of address acquisition
pub trait AddressProtocol {
    /// Begin (or restart) the exchange
    fn start(&mut self) -> Result<(), NetworkError>;

    /// Abandon the exchange
    fn stop(&mut self);

    /// Address confirmed by the server, if any yet
    fn supplied_address(&mut self) -> Option<Ipv4Config>;

    /// Configure the interface address; `None` clears it
    fn apply_address(&mut self, address: Option<Ipv4Config>);
}

#[derive(Debug)]
pub struct AddressAcquisition {
    state: DhcpState,
    retries: u8,
    max_retries: u8,
    fallback: Ipv4Config,
    address: Option<Ipv4Config>,
}

impl AddressAcquisition {
    pub fn new(max_retries: u8, fallback: Ipv4Config) -> Self {
        Self {
            state: DhcpState::Off,
            retries: 0,
            max_retries,
            fallback,
            address: None,
        }
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    /// WaitAddress polls without an answer so far
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Address currently in force
    pub fn address(&self) -> Option<Ipv4Config> {
        self.address
    }

    /// React to a Link Monitor transition
    pub fn on_link_event<A: AddressProtocol>(&mut self, event: LinkEvent, proto: &mut A) {
        match event {
            LinkEvent::Up(_) => {
                if matches!(self.state, DhcpState::Off | DhcpState::LinkDown) {
                    self.retries = 0;
                    self.state = DhcpState::Start;
                }
            }
            LinkEvent::Down => {
                if self.state != DhcpState::LinkDown {
                    proto.stop();
                    proto.apply_address(None);
                    self.address = None;
                    self.retries = 0;
                    self.state = DhcpState::LinkDown;
                    log::info!("[dhcp] the network cable is not connected");
                }
            }
        }
    }

    /// Advance by one coarse tick
    pub fn tick<A: AddressProtocol>(&mut self, proto: &mut A) -> Option<AddressEvent> {
        match self.state {
            DhcpState::Start => {
                self.address = None;
                self.retries = 0;
                proto.apply_address(None);
                log::info!("[dhcp] state: looking for dhcp server ...");
                if let Err(e) = proto.start() {
                    log::warn!("[dhcp] failed to start exchange: {}", e);
                }
                self.state = DhcpState::WaitAddress;
                None
            }
            DhcpState::WaitAddress => {
                if let Some(address) = proto.supplied_address() {
                    proto.apply_address(Some(address));
                    self.address = Some(address);
                    self.state = DhcpState::Assigned;
                    log::info!(
                        "[dhcp] ip address assigned by a dhcp server: {}",
                        address.address
                    );
                    return Some(AddressEvent::Assigned(address));
                }

                self.retries += 1;
                if self.retries < self.max_retries {
                    return None;
                }

                proto.stop();
                proto.apply_address(Some(self.fallback));
                self.address = Some(self.fallback);
                self.state = DhcpState::Timeout;
                log::warn!("[dhcp] dhcp timeout !!");
                log::info!("[dhcp] static ip address: {}", self.fallback.address);
                Some(AddressEvent::Fallback(self.fallback))
            }
            DhcpState::Assigned => match proto.supplied_address() {
                None => {
                    proto.apply_address(None);
                    self.address = None;
                    self.state = DhcpState::Start;
                    log::warn!("[dhcp] lease lost, restarting");
                    Some(AddressEvent::Lost)
                }
                Some(address) if Some(address) != self.address => {
                    proto.apply_address(Some(address));
                    self.address = Some(address);
                    log::info!("[dhcp] lease renewed with new ip address: {}", address.address);
                    Some(AddressEvent::Assigned(address))
                }
                Some(_) => None,
            },
            DhcpState::Off | DhcpState::Timeout | DhcpState::LinkDown => None,
        }
    }
}
