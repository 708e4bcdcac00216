//! smoltcp integration
//!
//! `NetInterface` is a `smoltcp::phy::Device`: received chains are handed to
//! the stack in place when they occupy a single unshared pool slot, and
//! outbound frames go through `NetInterface::output()`.
//!
//! Address acquisition is split in two. `AddressAcquisition` decides *when*
//! to run DHCP and *which* address is in force; smoltcp's DHCPv4 socket does
//! the exchange. They meet in a mailbox: `DhcpClient` (the
//! `AddressProtocol` half) posts start/stop commands and address changes,
//! `NetStack::poll()` carries them out on the interface and posts leases
//! back.

use crate::config::Ipv4Config;
use crate::drivers::net::phy::PhyControl;
use crate::drivers::net::{MacDma, NetworkError};
use crate::net::chain::PacketChain;
use crate::net::dhcp::AddressProtocol;
use crate::net::ethernet::MAX_FRAME_SIZE;
use crate::net::netif::{NetInterface, TickEvents};
use crate::sync::Mutex;
use alloc::sync::Arc;
use alloc::vec;
use core::net::Ipv4Addr;
use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::socket::AnySocket;
use smoltcp::socket::dhcpv4::{Event as DhcpEvent, Socket as Dhcpv4Socket};
use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpCidr, Ipv4Address, Ipv4Cidr};

// ============================================================================
// Device
// ============================================================================

/// Received frame on its way into the stack
pub struct NetifRxToken {
    frame: PacketChain,
}

impl RxToken for NetifRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        if let Some(bytes) = self.frame.single_slot_mut() {
            return f(bytes);
        }
        let mut bytes = self.frame.to_vec();
        f(&mut bytes)
    }
}

pub struct NetifTxToken<'a, M, P, A> {
    netif: &'a mut NetInterface<M, P, A>,
}

impl<M: MacDma, P: PhyControl, A: AddressProtocol> TxToken for NetifTxToken<'_, M, P, A> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buffer = vec![0u8; len];
        let result = f(&mut buffer);

        let frame = PacketChain::from_shared(Arc::from(buffer));
        if let Err(e) = self.netif.output(&frame) {
            log::debug!("[stack] dropped outbound frame: {}", e);
        }
        result
    }
}

impl<M: MacDma, P: PhyControl, A: AddressProtocol> Device for NetInterface<M, P, A> {
    type RxToken<'a>
        = NetifRxToken
    where
        Self: 'a;
    type TxToken<'a>
        = NetifTxToken<'a, M, P, A>
    where
        Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let frame = self.receive()?;
        Some((NetifRxToken { frame }, NetifTxToken { netif: self }))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if !self.is_initialized() || !self.link_state().is_up() {
            return None;
        }
        Some(NetifTxToken { netif: self })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = MAX_FRAME_SIZE;
        caps.max_burst_size = Some(self.mac().tx_ring_depth());
        caps
    }
}

// ============================================================================
// DHCP mailbox
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DhcpCommand {
    Restart,
    Stop,
}

#[derive(Debug, Default)]
struct LeaseMailbox {
    command: Option<DhcpCommand>,
    /// Last lease reported by the DHCP socket
    lease: Option<Ipv4Config>,
    /// Address change not yet applied to the interface
    pending_address: Option<Option<Ipv4Config>>,
}

/// `AddressProtocol` backed by smoltcp's DHCPv4 socket
///
/// Clones share one mailbox; hand one to `NetInterface::new` and let
/// `NetStack` keep the other.
#[derive(Clone)]
pub struct DhcpClient {
    mailbox: Arc<Mutex<LeaseMailbox>>,
}

impl Default for DhcpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DhcpClient {
    pub fn new() -> Self {
        Self {
            mailbox: Arc::new(Mutex::new(LeaseMailbox::default())),
        }
    }

    fn take_command(&self) -> Option<DhcpCommand> {
        self.mailbox.lock().command.take()
    }

    fn take_pending_address(&self) -> Option<Option<Ipv4Config>> {
        self.mailbox.lock().pending_address.take()
    }

    fn set_lease(&self, lease: Option<Ipv4Config>) {
        self.mailbox.lock().lease = lease;
    }
}

impl AddressProtocol for DhcpClient {
    fn start(&mut self) -> Result<(), NetworkError> {
        let mut mailbox = self.mailbox.lock();
        mailbox.command = Some(DhcpCommand::Restart);
        mailbox.lease = None;
        Ok(())
    }

    fn stop(&mut self) {
        let mut mailbox = self.mailbox.lock();
        mailbox.command = Some(DhcpCommand::Stop);
        mailbox.lease = None;
    }

    fn supplied_address(&mut self) -> Option<Ipv4Config> {
        self.mailbox.lock().lease
    }

    fn apply_address(&mut self, address: Option<Ipv4Config>) {
        self.mailbox.lock().pending_address = Some(address);
    }
}

// ============================================================================
// Stack
// ============================================================================

fn to_wire(address: Ipv4Addr) -> Ipv4Address {
    Ipv4Address::from_bytes(&address.octets())
}

fn from_wire(address: Ipv4Address) -> Ipv4Addr {
    Ipv4Addr::from(address.0)
}

/// Network interface plus smoltcp's IP layer and sockets
pub struct NetStack<M, P> {
    netif: NetInterface<M, P, DhcpClient>,
    iface: Interface,
    sockets: SocketSet<'static>,
    dhcp: DhcpClient,
    dhcp_handle: Option<SocketHandle>,
}

impl<M: MacDma, P: PhyControl> NetStack<M, P> {
    /// Wrap an interface whose address protocol is a `DhcpClient`
    pub fn new(mut netif: NetInterface<M, P, DhcpClient>, now_ms: u64) -> Self {
        let dhcp = netif.protocol().clone();
        let mac = netif.mac_address();

        let config = Config::new(HardwareAddress::Ethernet(EthernetAddress(mac.0)));
        let iface = Interface::new(config, &mut netif, Instant::from_millis(now_ms as i64));

        Self {
            netif,
            iface,
            sockets: SocketSet::new(vec![]),
            dhcp,
            dhcp_handle: None,
        }
    }

    /// Run housekeeping and the IP stack once
    ///
    /// `now_ms` must be monotonic; the link/DHCP pacing uses its low 32 bits.
    pub fn poll(&mut self, now_ms: u64) -> TickEvents {
        let events = self.netif.service_tick(now_ms as u32);
        self.run_mailbox();

        let timestamp = Instant::from_millis(now_ms as i64);
        self.iface.poll(timestamp, &mut self.netif, &mut self.sockets);

        self.poll_dhcp_socket();
        self.run_mailbox();
        events
    }

    fn run_mailbox(&mut self) {
        match self.dhcp.take_command() {
            Some(DhcpCommand::Restart) => {
                if let Some(handle) = self.dhcp_handle.take() {
                    self.sockets.remove(handle);
                }
                self.dhcp_handle = Some(self.sockets.add(Dhcpv4Socket::new()));
                log::debug!("[stack] dhcp socket started");
            }
            Some(DhcpCommand::Stop) => {
                if let Some(handle) = self.dhcp_handle.take() {
                    self.sockets.remove(handle);
                    log::debug!("[stack] dhcp socket stopped");
                }
            }
            None => {}
        }

        if let Some(address) = self.dhcp.take_pending_address() {
            self.set_address(address);
        }
    }

    fn poll_dhcp_socket(&mut self) {
        let Some(handle) = self.dhcp_handle else {
            return;
        };

        match self.sockets.get_mut::<Dhcpv4Socket>(handle).poll() {
            Some(DhcpEvent::Configured(config)) => {
                let lease = Ipv4Config::from_prefix(
                    from_wire(config.address.address()),
                    config.address.prefix_len(),
                    config.router.map(from_wire),
                );
                log::debug!("[stack] dhcp lease {}", lease);
                self.dhcp.set_lease(Some(lease));
            }
            Some(DhcpEvent::Deconfigured) => {
                log::debug!("[stack] dhcp lease lost");
                self.dhcp.set_lease(None);
            }
            None => {}
        }
    }

    fn set_address(&mut self, address: Option<Ipv4Config>) {
        self.iface.update_ip_addrs(|addrs| {
            addrs.clear();
            if let Some(address) = address {
                let cidr = Ipv4Cidr::new(to_wire(address.address), address.prefix_len());
                if addrs.push(IpCidr::Ipv4(cidr)).is_err() {
                    log::warn!("[stack] interface address table full");
                }
            }
        });

        self.iface.routes_mut().remove_default_ipv4_route();
        if let Some(gateway) = address.and_then(|a| a.gateway)
            && self
                .iface
                .routes_mut()
                .add_default_ipv4_route(to_wire(gateway))
                .is_err()
        {
            log::warn!("[stack] route table full");
        }
    }

    /// IPv4 address currently on the interface
    pub fn ipv4_cidr(&self) -> Option<Ipv4Cidr> {
        self.iface.ip_addrs().iter().find_map(|cidr| match cidr {
            IpCidr::Ipv4(cidr) => Some(*cidr),
            #[allow(unreachable_patterns)]
            _ => None,
        })
    }

    pub fn add_socket<T: AnySocket<'static>>(&mut self, socket: T) -> SocketHandle {
        self.sockets.add(socket)
    }

    pub fn get_socket_mut<T: AnySocket<'static>>(&mut self, handle: SocketHandle) -> &mut T {
        self.sockets.get_mut::<T>(handle)
    }

    pub fn is_dhcp_running(&self) -> bool {
        self.dhcp_handle.is_some()
    }

    pub fn interface(&self) -> &Interface {
        &self.iface
    }

    pub fn interface_mut(&mut self) -> &mut Interface {
        &mut self.iface
    }

    pub fn netif(&self) -> &NetInterface<M, P, DhcpClient> {
        &self.netif
    }

    pub fn netif_mut(&mut self) -> &mut NetInterface<M, P, DhcpClient> {
        &mut self.netif
    }
}
