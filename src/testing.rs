//! Memory-only doubles for the hardware and protocol collaborators

use crate::config::Ipv4Config;
use crate::drivers::net::phy::{LinkStatus, PhyControl, PhyError, SmiBus, SpeedIndication};
use crate::drivers::net::{
    LinkParams, MacDma, NetworkError, RxCompletion, TxCompletion, TxSubmitError,
};
use crate::net::chain::PacketChain;
use crate::net::dhcp::AddressProtocol;
use crate::net::ethernet::MacAddress;
use crate::net::packet_pool::{RxBuffer, SlotId};
use crate::net::tx::TxFragmentList;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::convert::Infallible;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;

// ============================================================================
// SMI / GPIO / delay
// ============================================================================

/// Register file of one PHY behind an SMI bus
pub struct FakeSmi {
    pub address: u8,
    pub regs: [u16; 32],
    pub writes: Vec<(u8, u16)>,
    pub reset_self_clears: bool,
    pub fail: bool,
}

impl FakeSmi {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            regs: [0; 32],
            writes: Vec::new(),
            reset_self_clears: true,
            fail: false,
        }
    }
}

impl SmiBus for FakeSmi {
    fn read(&mut self, phy: u8, reg: u8) -> Result<u16, PhyError> {
        if self.fail {
            return Err(PhyError::Bus);
        }
        if phy != self.address {
            return Ok(0xFFFF);
        }
        Ok(self.regs[reg as usize & 0x1F])
    }

    fn write(&mut self, phy: u8, reg: u8, value: u16) -> Result<(), PhyError> {
        if self.fail {
            return Err(PhyError::Bus);
        }
        if phy != self.address {
            return Ok(());
        }
        self.writes.push((reg, value));
        let stored = if reg == 0 && self.reset_self_clears {
            value & !(1 << 15)
        } else {
            value
        };
        self.regs[reg as usize & 0x1F] = stored;
        Ok(())
    }
}

/// Output pin recording every level driven
#[derive(Default)]
pub struct FakePin {
    pub levels: Vec<bool>,
}

impl OutputPin for FakePin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.push(true);
        Ok(())
    }
}

/// Delay that only adds up the requested time
#[derive(Default)]
pub struct FakeDelay {
    pub total_ms: u32,
}

impl DelayMs<u32> for FakeDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms;
    }
}

// ============================================================================
// PHY
// ============================================================================

pub struct FakePhy {
    pub negotiation_done: bool,
    pub indication: SpeedIndication,
    pub link: LinkStatus,
    pub fail: bool,
}

impl Default for FakePhy {
    fn default() -> Self {
        Self {
            negotiation_done: false,
            indication: SpeedIndication::Unknown(0),
            link: LinkStatus::Down,
            fail: false,
        }
    }
}

impl FakePhy {
    pub fn negotiated(indication: SpeedIndication) -> Self {
        Self {
            negotiation_done: true,
            indication,
            link: LinkStatus::Up,
            fail: false,
        }
    }

    pub fn plug(&mut self, indication: SpeedIndication) {
        self.negotiation_done = true;
        self.indication = indication;
        self.link = LinkStatus::Up;
    }

    pub fn unplug(&mut self) {
        self.negotiation_done = false;
        self.indication = SpeedIndication::Unknown(0);
        self.link = LinkStatus::Down;
    }

    fn check(&self) -> Result<(), PhyError> {
        if self.fail { Err(PhyError::Bus) } else { Ok(()) }
    }
}

impl PhyControl for FakePhy {
    fn auto_negotiation_done(&mut self) -> Result<bool, PhyError> {
        self.check()?;
        Ok(self.negotiation_done)
    }

    fn speed_indication(&mut self) -> Result<SpeedIndication, PhyError> {
        self.check()?;
        Ok(self.indication)
    }

    fn link_status(&mut self) -> Result<LinkStatus, PhyError> {
        self.check()?;
        Ok(self.link)
    }
}

// ============================================================================
// MAC / DMA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacCall {
    Init(MacAddress),
    Deinit,
    SetLinkParams(LinkParams),
    Start,
    Stop,
}

/// MAC/DMA engine whose "wire" is a pair of queues
pub struct FakeMac {
    pub calls: Vec<MacCall>,
    pub link_params: Option<LinkParams>,
    pub started: bool,
    pub fail_init: bool,
    pub fail_set_link: bool,
    pub fail_tx: Option<NetworkError>,
    rx_ring: usize,
    pub armed: VecDeque<RxBuffer>,
    pub completions: VecDeque<RxCompletion>,
    pub tx_depth: usize,
    pub tx_slots: usize,
    pub auto_complete_tx: bool,
    pub in_flight: VecDeque<PacketChain>,
    pub done: VecDeque<TxCompletion>,
    pub sent: Vec<Vec<u8>>,
    pub sent_fragments: Vec<usize>,
}

impl FakeMac {
    pub fn new(rx_ring: usize) -> Self {
        Self {
            calls: Vec::new(),
            link_params: None,
            started: false,
            fail_init: false,
            fail_set_link: false,
            fail_tx: None,
            rx_ring,
            armed: VecDeque::new(),
            completions: VecDeque::new(),
            tx_depth: 4,
            tx_slots: 4,
            auto_complete_tx: true,
            in_flight: VecDeque::new(),
            done: VecDeque::new(),
            sent: Vec::new(),
            sent_fragments: Vec::new(),
        }
    }

    /// DMA writes `data` into the oldest armed buffer
    pub fn inject(&mut self, data: &[u8], last: bool) -> bool {
        self.inject_with(data, last, false)
    }

    /// Same as `inject`, with the error summary bit set
    pub fn inject_error(&mut self, data: &[u8], last: bool) -> bool {
        self.inject_with(data, last, true)
    }

    fn inject_with(&mut self, data: &[u8], last: bool, error: bool) -> bool {
        let Some(mut buffer) = self.armed.pop_front() else {
            return false;
        };
        // SAFETY: the fake is the only "hardware" touching the slot
        unsafe { buffer.dma_mut()[..data.len()].copy_from_slice(data) };
        self.completions.push_back(RxCompletion {
            slot: buffer.slot(),
            length: data.len(),
            last,
            error,
        });
        true
    }

    /// Hardware finishes every queued transmission
    pub fn finish_tx(&mut self) {
        while let Some(frame) = self.in_flight.pop_front() {
            self.done.push_back(TxCompletion { frame, sent: true });
        }
    }

    /// Engine halted; queued transmissions come back unsent
    fn abort_tx(&mut self) {
        self.started = false;
        while let Some(frame) = self.in_flight.pop_front() {
            self.done.push_back(TxCompletion { frame, sent: false });
        }
    }
}

impl MacDma for FakeMac {
    fn init(&mut self, mac: MacAddress) -> Result<(), NetworkError> {
        if self.fail_init {
            return Err(NetworkError::HardwareError);
        }
        self.calls.push(MacCall::Init(mac));
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), NetworkError> {
        self.calls.push(MacCall::Deinit);
        self.abort_tx();
        Ok(())
    }

    fn set_link_params(&mut self, params: LinkParams) -> Result<(), NetworkError> {
        if self.fail_set_link {
            return Err(NetworkError::HardwareError);
        }
        self.calls.push(MacCall::SetLinkParams(params));
        self.link_params = Some(params);
        Ok(())
    }

    fn start(&mut self) -> Result<(), NetworkError> {
        self.calls.push(MacCall::Start);
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NetworkError> {
        self.calls.push(MacCall::Stop);
        self.abort_tx();
        Ok(())
    }

    fn rx_wants_buffer(&self) -> bool {
        self.armed.len() + self.completions.len() < self.rx_ring
    }

    fn rx_provide(&mut self, buffer: RxBuffer) -> Result<(), RxBuffer> {
        if !self.rx_wants_buffer() {
            return Err(buffer);
        }
        self.armed.push_back(buffer);
        Ok(())
    }

    fn rx_poll(&mut self) -> Option<RxCompletion> {
        self.completions.pop_front()
    }

    fn rx_revoke(&mut self) -> Option<SlotId> {
        self.armed.pop_front().map(|buffer| buffer.slot())
    }

    fn tx_ring_depth(&self) -> usize {
        self.tx_depth
    }

    fn tx_submit(
        &mut self,
        fragments: &TxFragmentList<'_>,
        frame: PacketChain,
    ) -> Result<(), TxSubmitError> {
        if let Some(error) = self.fail_tx {
            return Err(TxSubmitError { error, frame });
        }
        if !self.started {
            return Err(TxSubmitError {
                error: NetworkError::NotRunning,
                frame,
            });
        }
        if self.in_flight.len() >= self.tx_slots {
            return Err(TxSubmitError {
                error: NetworkError::TxBusy,
                frame,
            });
        }

        let mut bytes = Vec::new();
        for fragment in fragments.walk() {
            bytes.extend_from_slice(fragment.data);
        }
        self.sent.push(bytes);
        self.sent_fragments.push(fragments.len());

        if self.auto_complete_tx {
            self.done.push_back(TxCompletion { frame, sent: true });
        } else {
            self.in_flight.push_back(frame);
        }
        Ok(())
    }

    fn tx_reclaim(&mut self) -> Option<TxCompletion> {
        self.done.pop_front()
    }
}

// ============================================================================
// Address protocol
// ============================================================================

#[derive(Default)]
pub struct FakeDhcp {
    pub starts: usize,
    pub stops: usize,
    pub fail_start: bool,
    pub offer: Option<Ipv4Config>,
    pub applied: Vec<Option<Ipv4Config>>,
}

impl AddressProtocol for FakeDhcp {
    fn start(&mut self) -> Result<(), NetworkError> {
        self.starts += 1;
        if self.fail_start {
            return Err(NetworkError::HardwareError);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stops += 1;
    }

    fn supplied_address(&mut self) -> Option<Ipv4Config> {
        self.offer
    }

    fn apply_address(&mut self, address: Option<Ipv4Config>) {
        self.applied.push(address);
    }
}
