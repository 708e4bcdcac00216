//! Network I/O facade
//!
//! Binds the pool, the receive/transmit builders, the Link Monitor and
//! Address Acquisition to one MAC/DMA engine and one PHY. Everything runs from
//! the caller's poll loop:
//!
//! ```text
//!   init()            once, after the PHY has been reset
//!   loop {
//!       poll_input()  drain completed receive descriptors into frames
//!       output()      queue frames for transmission (zero copy)
//!       service_tick  link polling every 100 ms, address acquisition every 500 ms
//!   }
//! ```
//!
//! Receive buffers are re-armed from the pool as descriptors complete. While
//! the pool is exhausted refill pauses; the first slot released by the
//! consumer lifts the pause and the next poll resumes arming.

use crate::config::{Ipv4Config, NetConfig};
use crate::drivers::net::phy::PhyControl;
use crate::drivers::net::{MacDma, NetworkError, TxSubmitError};
use crate::net::chain::{PacketChain, RxChainBuilder};
use crate::net::dhcp::{AddressAcquisition, AddressEvent, AddressProtocol, DhcpState};
use crate::net::ethernet::MacAddress;
use crate::net::link::{LinkEvent, LinkMonitor, LinkState};
use crate::net::packet_pool::PacketPool;
use crate::net::tx::TxFragmentList;
use alloc::sync::Arc;

/// Receives assembled frames from `poll_input()`
pub trait PacketConsumer {
    fn deliver(&mut self, frame: PacketChain);
}

impl<F: FnMut(PacketChain)> PacketConsumer for F {
    fn deliver(&mut self, frame: PacketChain) {
        self(frame)
    }
}

/// Interface counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    /// Frames handed to the protocol stack
    pub rx_frames: usize,

    /// Frames thrown away (hardware error or pool exhaustion)
    pub rx_dropped: usize,

    /// Frames accepted by the transmit ring
    pub tx_frames: usize,

    /// Transmissions the hardware finished
    pub tx_completed: usize,

    /// Queued frames handed back unsent (engine stopped or transmit error)
    pub tx_aborted: usize,

    /// Frames refused by `output()`
    pub tx_errors: usize,
}

/// What a service tick changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickEvents {
    pub link: Option<LinkEvent>,
    pub address: Option<AddressEvent>,
}

impl TickEvents {
    pub fn is_empty(&self) -> bool {
        self.link.is_none() && self.address.is_none()
    }
}

pub struct NetInterface<M, P, A> {
    config: NetConfig,
    mac: M,
    phy: P,
    proto: A,
    pool: Arc<PacketPool>,
    rx: RxChainBuilder,
    link: LinkMonitor,
    dhcp: AddressAcquisition,
    last_link_poll: Option<u32>,
    last_dhcp_poll: Option<u32>,
    initialized: bool,
    stats: InterfaceStats,
}

impl<M: MacDma, P: PhyControl, A: AddressProtocol> NetInterface<M, P, A> {
    /// Create an interface; allocates the receive pool
    pub fn new(config: NetConfig, mac: M, phy: P, proto: A) -> Result<Self, NetworkError> {
        config.validate()?;

        let pool = PacketPool::new(config.rx_buffer_count);
        let dhcp = AddressAcquisition::new(config.max_dhcp_tries, config.static_address);

        Ok(Self {
            config,
            mac,
            phy,
            proto,
            pool,
            rx: RxChainBuilder::new(),
            link: LinkMonitor::new(),
            dhcp,
            last_link_poll: None,
            last_dhcp_poll: None,
            initialized: false,
            stats: InterfaceStats::default(),
        })
    }

    /// Bring the interface up
    ///
    /// Programs the MAC, arms every receive descriptor from the pool and runs
    /// one link check so an already negotiated cable comes up immediately.
    /// With address acquisition disabled the static address is applied here.
    pub fn init(&mut self) -> Result<(), NetworkError> {
        if self.initialized {
            return Err(NetworkError::AlreadyInitialized);
        }

        self.mac.init(self.config.mac_address)?;
        self.link.reset();
        self.dhcp = AddressAcquisition::new(self.config.max_dhcp_tries, self.config.static_address);
        self.last_link_poll = None;
        self.last_dhcp_poll = None;
        self.initialized = true;

        self.refill_rx();
        log::info!(
            "[netif] initialized, MAC {} ({}), {} receive buffers armed",
            self.config.mac_address,
            if self.config.mac_address.is_local() { "local" } else { "global" },
            self.pool.census().hardware
        );

        if !self.config.dhcp_enabled {
            self.proto.apply_address(Some(self.config.static_address));
            log::info!("[netif] static ip address: {}", self.config.static_address);
        }

        self.poll_link();
        Ok(())
    }

    /// Bring the interface down and return every buffer to the pool
    ///
    /// Frames already handed to the consumer stay valid.
    pub fn deinit(&mut self) -> Result<(), NetworkError> {
        if !self.initialized {
            return Err(NetworkError::NotInitialized);
        }

        if let Err(e) = self.mac.stop() {
            log::warn!("[netif] failed to stop MAC: {}", e);
        }
        self.mac.deinit()?;

        while let Some(completion) = self.mac.rx_poll() {
            self.pool.abandon(completion.slot);
        }
        while let Some(slot) = self.mac.rx_revoke() {
            self.pool.abandon(slot);
        }
        self.reclaim_tx();

        self.stats.rx_frames += self.rx.frames();
        self.stats.rx_dropped += self.rx.dropped();
        self.rx = RxChainBuilder::new();
        if self.link.state().is_up() && self.config.dhcp_enabled {
            self.dhcp.on_link_event(LinkEvent::Down, &mut self.proto);
        }
        self.link.reset();
        self.initialized = false;

        log::info!("[netif] down");
        Ok(())
    }

    /// Queue one frame for transmission without copying it
    ///
    /// The chain's segments become transmit descriptors directly; the chain
    /// is pinned until the hardware has sent it. While the ring is full the
    /// call reclaims finished transmissions and retries, up to
    /// `tx_accept_attempts` times. Fails with `LinkDown` while there is no
    /// link.
    pub fn output(&mut self, frame: &PacketChain) -> Result<(), NetworkError> {
        if !self.initialized {
            return Err(NetworkError::NotInitialized);
        }
        if !self.link.state().is_up() {
            self.stats.tx_errors += 1;
            log::debug!("[netif] link down, {} byte frame dropped", frame.total_len());
            return Err(NetworkError::LinkDown);
        }

        self.reclaim_tx();

        let fragments = match TxFragmentList::build(frame, self.mac.tx_ring_depth()) {
            Ok(fragments) => fragments,
            Err(e) => {
                self.stats.tx_errors += 1;
                log::warn!("[netif] frame refused: {}", e);
                return Err(e);
            }
        };

        let mut pinned = frame.clone();
        for _ in 0..self.config.tx_accept_attempts {
            match self.mac.tx_submit(&fragments, pinned) {
                Ok(()) => {
                    self.stats.tx_frames += 1;
                    return Ok(());
                }
                Err(TxSubmitError {
                    error: NetworkError::TxBusy,
                    frame,
                }) => {
                    pinned = frame;
                    self.reclaim_tx();
                }
                Err(TxSubmitError { error, .. }) => {
                    self.stats.tx_errors += 1;
                    log::warn!("[netif] transmit failed: {}", error);
                    return Err(error);
                }
            }
        }

        self.stats.tx_errors += 1;
        log::warn!("[netif] transmit ring did not accept frame");
        Err(NetworkError::TransmitTimeout)
    }

    /// Drop the pinned chains of finished transmissions; returns how many
    /// were released
    pub fn reclaim_tx(&mut self) -> usize {
        let mut reclaimed = 0;
        while let Some(completion) = self.mac.tx_reclaim() {
            if completion.sent {
                self.stats.tx_completed += 1;
            } else {
                self.stats.tx_aborted += 1;
            }
            drop(completion.frame);
            reclaimed += 1;
        }
        reclaimed
    }

    /// Next complete received frame, if one is ready
    pub fn receive(&mut self) -> Option<PacketChain> {
        if !self.initialized {
            return None;
        }

        loop {
            let starved = self.refill_rx();
            if starved && self.rx.is_assembling() {
                // The rest of this frame may have no buffer to land in
                self.rx.discard();
            }

            let completion = self.mac.rx_poll()?;
            let buf = self.pool.reclaim(completion.slot, completion.length);

            if completion.error {
                log::debug!("[netif] receive error on {}", completion.slot);
                self.rx.reject(buf, completion.last);
                continue;
            }

            if let Some(frame) = self.rx.push(buf, completion.length, completion.last) {
                return Some(frame);
            }
        }
    }

    /// Hand every frame that has arrived to `consumer`; returns the count
    pub fn poll_input<C: PacketConsumer>(&mut self, consumer: &mut C) -> usize {
        let mut delivered = 0;
        while let Some(frame) = self.receive() {
            consumer.deliver(frame);
            delivered += 1;
        }
        delivered
    }

    /// Periodic housekeeping; call at least every 100 ms
    ///
    /// `now_ms` is a free-running millisecond counter and may wrap.
    pub fn service_tick(&mut self, now_ms: u32) -> TickEvents {
        let mut events = TickEvents::default();
        if !self.initialized {
            return events;
        }

        self.reclaim_tx();

        if Self::due(self.last_link_poll, now_ms, self.config.link_poll_interval_ms) {
            self.last_link_poll = Some(now_ms);
            events.link = self.poll_link();
        }

        if self.config.dhcp_enabled
            && Self::due(self.last_dhcp_poll, now_ms, self.config.dhcp_poll_interval_ms)
        {
            self.last_dhcp_poll = Some(now_ms);
            events.address = self.dhcp.tick(&mut self.proto);
        }

        events
    }

    fn due(last: Option<u32>, now_ms: u32, interval_ms: u32) -> bool {
        match last {
            Some(last) => now_ms.wrapping_sub(last) >= interval_ms,
            None => true,
        }
    }

    fn poll_link(&mut self) -> Option<LinkEvent> {
        let event = match self.link.poll(&mut self.phy, &mut self.mac) {
            Ok(event) => event?,
            Err(e) => {
                log::warn!("[netif] link poll failed: {}", e);
                return None;
            }
        };

        if self.config.dhcp_enabled {
            self.dhcp.on_link_event(event, &mut self.proto);
        }
        Some(event)
    }

    /// Arm empty receive descriptors from the pool
    ///
    /// Returns true if a descriptor is left without a buffer.
    fn refill_rx(&mut self) -> bool {
        while self.mac.rx_wants_buffer() {
            if self.pool.is_exhausted() {
                return true;
            }
            let buffer = match self.pool.allocate() {
                Ok(buffer) => buffer,
                Err(_) => return true,
            };
            if let Err(buffer) = self.mac.rx_provide(buffer) {
                self.pool.abandon(buffer.slot());
                break;
            }
        }
        false
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn mac_address(&self) -> MacAddress {
        self.config.mac_address
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn address_state(&self) -> DhcpState {
        self.dhcp.state()
    }

    /// Address currently configured on the interface
    pub fn ip_config(&self) -> Option<Ipv4Config> {
        if !self.initialized {
            return None;
        }
        if self.config.dhcp_enabled {
            self.dhcp.address()
        } else {
            Some(self.config.static_address)
        }
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    pub fn stats(&self) -> InterfaceStats {
        InterfaceStats {
            rx_frames: self.stats.rx_frames + self.rx.frames(),
            rx_dropped: self.stats.rx_dropped + self.rx.dropped(),
            ..self.stats
        }
    }

    pub fn mac(&self) -> &M {
        &self.mac
    }

    pub fn mac_mut(&mut self) -> &mut M {
        &mut self.mac
    }

    pub fn phy_mut(&mut self) -> &mut P {
        &mut self.phy
    }

    pub fn protocol(&self) -> &A {
        &self.proto
    }

    pub fn protocol_mut(&mut self) -> &mut A {
        &mut self.proto
    }
}
