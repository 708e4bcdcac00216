//! STM32F4 Ethernet MAC + DMA driver
//!
//! Drives the on-chip 10/100 MAC in RMII mode with chained normal DMA
//! descriptors. Receive descriptors are armed with pool slots one at a time,
//! transmit descriptors point straight at the outbound chain's segments.
//!
//! # Implementation Notes
//!
//! - Polling mode (DMA interrupts left masked)
//! - Store-and-forward in both directions, checksum insertion on transmit
//! - Ownership handover is OWN-bit only; a fence orders descriptor words
//!   before the OWN write and the poll-demand register write
//! - SMI (MDC/MDIO) is exposed separately as `Stm32Smi` so the PHY driver can
//!   own it
//!
//! # References
//!
//! - RM0090 (STM32F405/407 reference manual), section 33 "Ethernet"

pub mod descriptor;

use crate::config::{RX_DESC_COUNT, TX_DESC_COUNT};
use crate::drivers::net::phy::{PhyError, SmiBus};
use crate::drivers::net::{
    DuplexMode, LinkParams, LinkSpeed, MacDma, NetworkError, RxCompletion, TxCompletion,
    TxSubmitError,
};
use crate::net::chain::PacketChain;
use crate::net::ethernet::{CRC_SIZE, MacAddress};
use crate::net::packet_pool::{RxBuffer, SlotId};
use crate::net::tx::TxFragmentList;
use alloc::boxed::Box;
use core::sync::atomic::{Ordering, fence};
use descriptor::*;

// ============================================================================
// Hardware Constants
// ============================================================================

/// ETH peripheral base address (AHB1)
pub const ETH_BASE: usize = 0x4002_8000;

/// Polls of a self-clearing bit before giving up
const RESET_TIMEOUT: u32 = 100_000;
const SMI_TIMEOUT: u32 = 10_000;

// ============================================================================
// MAC Registers
// ============================================================================

const MACCR: usize = 0x0000;
const MACFFR: usize = 0x0004;
const MACMIIAR: usize = 0x0010;
const MACMIIDR: usize = 0x0014;
const MACA0HR: usize = 0x0040;
const MACA0LR: usize = 0x0044;

// MACCR bits
const MACCR_RE: u32 = 1 << 2;
const MACCR_TE: u32 = 1 << 3;
const MACCR_IPCO: u32 = 1 << 10;
const MACCR_DM: u32 = 1 << 11;
const MACCR_ROD: u32 = 1 << 13;
const MACCR_FES: u32 = 1 << 14;

// MACMIIAR bits
const MACMIIAR_MB: u32 = 1 << 0;
const MACMIIAR_MW: u32 = 1 << 1;
const MACMIIAR_CR_SHIFT: u32 = 2;
const MACMIIAR_CR_MASK: u32 = 0x7 << MACMIIAR_CR_SHIFT;
const MACMIIAR_MR_SHIFT: u32 = 6;
const MACMIIAR_PA_SHIFT: u32 = 11;

// MACA0HR: bit 31 reads as one
const MACA0HR_MO: u32 = 1 << 31;

// ============================================================================
// DMA Registers
// ============================================================================

const DMABMR: usize = 0x1000;
const DMATPDR: usize = 0x1004;
const DMARPDR: usize = 0x1008;
const DMARDLAR: usize = 0x100C;
const DMATDLAR: usize = 0x1010;
const DMASR: usize = 0x1014;
const DMAOMR: usize = 0x1018;
const DMAIER: usize = 0x101C;

// DMABMR bits
const DMABMR_SR: u32 = 1 << 0;
const DMABMR_PBL_32: u32 = 32 << 8;
const DMABMR_FB: u32 = 1 << 16;
const DMABMR_RDP_32: u32 = 32 << 17;
const DMABMR_USP: u32 = 1 << 23;
const DMABMR_AAB: u32 = 1 << 25;

// DMASR bits (write one to clear)
const DMASR_TBUS: u32 = 1 << 2;
const DMASR_RBUS: u32 = 1 << 7;

// DMAOMR bits
const DMAOMR_SR: u32 = 1 << 1;
const DMAOMR_OSF: u32 = 1 << 2;
const DMAOMR_ST: u32 = 1 << 13;
const DMAOMR_FTF: u32 = 1 << 20;
const DMAOMR_TSF: u32 = 1 << 21;
const DMAOMR_RSF: u32 = 1 << 25;

// ============================================================================
// Register Access
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Registers {
    base_addr: usize,
}

impl Registers {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        let addr = (self.base_addr + offset) as *const u32;
        // SAFETY: base_addr maps the ETH register block (checked at construction)
        unsafe { core::ptr::read_volatile(addr) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        // Descriptor updates must be visible before the register write
        fence(Ordering::SeqCst);
        let addr = (self.base_addr + offset) as *mut u32;
        // SAFETY: base_addr maps the ETH register block (checked at construction)
        unsafe { core::ptr::write_volatile(addr, value) }
    }

    #[inline]
    fn modify(&self, offset: usize, clear: u32, set: u32) {
        let value = self.read(offset);
        self.write(offset, (value & !clear) | set);
    }

    /// Spin until `mask` reads back as zero
    fn wait_clear(&self, offset: usize, mask: u32, attempts: u32) -> bool {
        for _ in 0..attempts {
            if self.read(offset) & mask == 0 {
                return true;
            }
            core::hint::spin_loop();
        }
        false
    }
}

// ============================================================================
// SMI
// ============================================================================

/// MDC clock divider selected from the AHB clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmiClockRange {
    /// HCLK 60-100 MHz, MDC = HCLK/42
    Div42,
    /// HCLK 100-150 MHz, MDC = HCLK/62
    Div62,
    /// HCLK 20-35 MHz, MDC = HCLK/16
    Div16,
    /// HCLK 35-60 MHz, MDC = HCLK/26
    Div26,
    /// HCLK 150-168 MHz, MDC = HCLK/102
    Div102,
}

impl SmiClockRange {
    pub fn from_hclk(hclk_hz: u32) -> Self {
        match hclk_hz {
            0..35_000_000 => SmiClockRange::Div16,
            35_000_000..60_000_000 => SmiClockRange::Div26,
            60_000_000..100_000_000 => SmiClockRange::Div42,
            100_000_000..150_000_000 => SmiClockRange::Div62,
            _ => SmiClockRange::Div102,
        }
    }

    fn bits(self) -> u32 {
        let cr = match self {
            SmiClockRange::Div42 => 0b000,
            SmiClockRange::Div62 => 0b001,
            SmiClockRange::Div16 => 0b010,
            SmiClockRange::Div26 => 0b011,
            SmiClockRange::Div102 => 0b100,
        };
        cr << MACMIIAR_CR_SHIFT
    }
}

/// Station management interface of the ETH block
pub struct Stm32Smi {
    regs: Registers,
    clock_range: SmiClockRange,
}

impl Stm32Smi {
    /// # Safety
    /// `base_addr` must map the ETH register block, and the ETH clocks must
    /// be enabled.
    pub unsafe fn new(base_addr: usize, clock_range: SmiClockRange) -> Self {
        Self {
            regs: Registers { base_addr },
            clock_range,
        }
    }

    fn command(&self, phy: u8, reg: u8) -> u32 {
        ((phy as u32 & 0x1F) << MACMIIAR_PA_SHIFT)
            | ((reg as u32 & 0x1F) << MACMIIAR_MR_SHIFT)
            | (self.clock_range.bits() & MACMIIAR_CR_MASK)
            | MACMIIAR_MB
    }

    fn wait_idle(&self) -> Result<(), PhyError> {
        if self.regs.wait_clear(MACMIIAR, MACMIIAR_MB, SMI_TIMEOUT) {
            Ok(())
        } else {
            Err(PhyError::Timeout)
        }
    }
}

impl SmiBus for Stm32Smi {
    fn read(&mut self, phy: u8, reg: u8) -> Result<u16, PhyError> {
        self.wait_idle()?;
        self.regs.write(MACMIIAR, self.command(phy, reg));
        self.wait_idle()?;
        Ok((self.regs.read(MACMIIDR) & 0xFFFF) as u16)
    }

    fn write(&mut self, phy: u8, reg: u8, value: u16) -> Result<(), PhyError> {
        self.wait_idle()?;
        self.regs.write(MACMIIDR, value as u32);
        self.regs.write(MACMIIAR, self.command(phy, reg) | MACMIIAR_MW);
        self.wait_idle()
    }
}

// ============================================================================
// Driver State
// ============================================================================

/// Frame queued on the transmit ring: its chain and descriptor span
struct TxInFlight {
    frame: PacketChain,
    first: usize,
    count: usize,
}

pub struct Stm32Eth {
    regs: Registers,
    rx_ring: Box<[DmaDescriptor]>,
    tx_ring: Box<[DmaDescriptor]>,

    /// Pool slot attached to each receive descriptor
    rx_slots: [Option<SlotId>; RX_DESC_COUNT],
    /// Next descriptor to arm
    rx_fill: usize,
    /// Next descriptor to inspect for completion
    rx_next: usize,
    /// Bytes already reported for the frame in progress
    rx_frame_bytes: usize,

    /// Frames queued, oldest first, indexed by submission order
    tx_frames: [Option<TxInFlight>; TX_DESC_COUNT],
    tx_frame_head: usize,
    tx_frame_tail: usize,
    /// Next free transmit descriptor
    tx_head: usize,
    tx_in_use: usize,

    initialized: bool,
    running: bool,
}

#[allow(clippy::new_without_default)] // Hardware controllers shouldn't have Default
impl Stm32Eth {
    /// Driver for the ETH block at its fixed address
    pub fn new() -> Self {
        // SAFETY: ETH_BASE is the ETH register block on every STM32F4 part
        unsafe { Self::with_base(ETH_BASE) }
    }

    /// # Safety
    /// `base_addr` must map the ETH register block (or memory standing in for
    /// it) for the lifetime of the driver.
    pub unsafe fn with_base(base_addr: usize) -> Self {
        Self {
            regs: Registers { base_addr },
            rx_ring: chained_ring(RX_DESC_COUNT),
            tx_ring: chained_ring(TX_DESC_COUNT),
            rx_slots: [None; RX_DESC_COUNT],
            rx_fill: 0,
            rx_next: 0,
            rx_frame_bytes: 0,
            tx_frames: [const { None }; TX_DESC_COUNT],
            tx_frame_head: 0,
            tx_frame_tail: 0,
            tx_head: 0,
            tx_in_use: 0,
            initialized: false,
            running: false,
        }
    }

    /// SMI handle sharing this controller's register block
    pub fn smi(&self, clock_range: SmiClockRange) -> Stm32Smi {
        // SAFETY: same register block this driver was built on
        unsafe { Stm32Smi::new(self.regs.base_addr, clock_range) }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Program MAC, filter and DMA once the software reset completed
    fn configure(&mut self, mac: MacAddress) {
        let bytes = mac.as_bytes();

        self.regs.write(MACCR, MACCR_IPCO | MACCR_ROD);
        self.regs.write(MACFFR, 0);
        self.regs.write(
            MACA0HR,
            MACA0HR_MO | ((bytes[5] as u32) << 8) | bytes[4] as u32,
        );
        self.regs.write(
            MACA0LR,
            ((bytes[3] as u32) << 24)
                | ((bytes[2] as u32) << 16)
                | ((bytes[1] as u32) << 8)
                | bytes[0] as u32,
        );

        self.regs.write(DMAOMR, DMAOMR_RSF | DMAOMR_TSF | DMAOMR_OSF);
        self.regs.write(
            DMABMR,
            DMABMR_AAB | DMABMR_USP | DMABMR_RDP_32 | DMABMR_FB | DMABMR_PBL_32,
        );
        self.regs.write(DMAIER, 0);

        self.init_rings();
        self.initialized = true;
    }

    fn init_rings(&mut self) {
        for desc in self.tx_ring.iter_mut() {
            desc.set_status(TDES0_TCH);
            desc.set_control(0);
            desc.set_buffer(0);
        }
        for desc in self.rx_ring.iter_mut() {
            desc.set_status(0);
            desc.set_control(RDES1_RCH);
            desc.set_buffer(0);
        }

        self.rx_slots = [None; RX_DESC_COUNT];
        self.rx_fill = 0;
        self.rx_next = 0;
        self.rx_frame_bytes = 0;
        self.tx_frames = [const { None }; TX_DESC_COUNT];
        self.tx_frame_head = 0;
        self.tx_frame_tail = 0;
        self.tx_head = 0;
        self.tx_in_use = 0;

        self.regs
            .write(DMATDLAR, self.tx_ring.as_ptr() as usize as u32);
        self.regs
            .write(DMARDLAR, self.rx_ring.as_ptr() as usize as u32);
    }

    fn require_init(&self) -> Result<(), NetworkError> {
        if self.initialized {
            Ok(())
        } else {
            Err(NetworkError::NotInitialized)
        }
    }
}

impl MacDma for Stm32Eth {
    fn init(&mut self, mac: MacAddress) -> Result<(), NetworkError> {
        if self.initialized {
            return Err(NetworkError::AlreadyInitialized);
        }

        self.regs.modify(DMABMR, 0, DMABMR_SR);
        if !self.regs.wait_clear(DMABMR, DMABMR_SR, RESET_TIMEOUT) {
            log::error!("[eth] DMA software reset did not complete");
            return Err(NetworkError::Timeout);
        }

        self.configure(mac);
        log::info!("[eth] MAC {} configured, rings {}/{}", mac, RX_DESC_COUNT, TX_DESC_COUNT);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), NetworkError> {
        self.require_init()?;
        self.stop()?;
        self.regs.write(MACCR, 0);
        self.initialized = false;
        Ok(())
    }

    fn set_link_params(&mut self, params: LinkParams) -> Result<(), NetworkError> {
        self.require_init()?;

        let mut set = 0;
        if params.speed == LinkSpeed::Speed100 {
            set |= MACCR_FES;
        }
        if params.duplex == DuplexMode::Full {
            set |= MACCR_DM;
        }
        self.regs.modify(MACCR, MACCR_FES | MACCR_DM, set);
        log::debug!("[eth] MACCR = {:#010x}", self.regs.read(MACCR));
        Ok(())
    }

    fn start(&mut self) -> Result<(), NetworkError> {
        self.require_init()?;

        self.regs.modify(MACCR, 0, MACCR_TE | MACCR_RE);
        self.regs.modify(DMAOMR, 0, DMAOMR_FTF);
        if !self.regs.wait_clear(DMAOMR, DMAOMR_FTF, RESET_TIMEOUT) {
            log::warn!("[eth] transmit FIFO flush did not complete");
        }
        self.regs.modify(DMAOMR, 0, DMAOMR_ST | DMAOMR_SR);
        self.regs.write(DMARPDR, 0);

        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NetworkError> {
        self.require_init()?;

        self.regs.modify(DMAOMR, DMAOMR_ST, 0);
        self.regs.modify(MACCR, MACCR_RE, 0);
        self.regs.modify(DMAOMR, 0, DMAOMR_FTF);
        self.regs.modify(DMAOMR, DMAOMR_SR, 0);
        self.regs.modify(MACCR, MACCR_TE, 0);

        self.running = false;
        Ok(())
    }

    fn rx_wants_buffer(&self) -> bool {
        self.initialized && self.rx_slots[self.rx_fill].is_none()
    }

    fn rx_provide(&mut self, buffer: RxBuffer) -> Result<(), RxBuffer> {
        if !self.rx_wants_buffer() {
            return Err(buffer);
        }

        let index = self.rx_fill;
        let desc = &mut self.rx_ring[index];
        desc.set_buffer(buffer.addr() as usize as u32);
        desc.set_control(RDES1_RCH | (buffer.capacity() as u32 & RDES1_RBS1_MASK));
        fence(Ordering::SeqCst);
        desc.set_status(RDES0_OWN);

        self.rx_slots[index] = Some(buffer.slot());
        self.rx_fill = (index + 1) % RX_DESC_COUNT;

        if self.running {
            // Resume reception if the engine suspended on an empty ring
            if self.regs.read(DMASR) & DMASR_RBUS != 0 {
                self.regs.write(DMASR, DMASR_RBUS);
            }
            self.regs.write(DMARPDR, 0);
        }
        Ok(())
    }

    fn rx_poll(&mut self) -> Option<RxCompletion> {
        let index = self.rx_next;
        let slot = self.rx_slots[index]?;
        let desc = &self.rx_ring[index];
        if desc.is_dma_owned() {
            return None;
        }
        fence(Ordering::SeqCst);

        let status = desc.status();
        let capacity = (desc.control() & RDES1_RBS1_MASK) as usize;
        let last = status & RDES0_LS != 0;
        if status & RDES0_FS != 0 {
            self.rx_frame_bytes = 0;
        }

        let (length, error) = if last {
            let frame_len = desc.rx_frame_length().saturating_sub(CRC_SIZE);
            let length = frame_len.saturating_sub(self.rx_frame_bytes).min(capacity);
            self.rx_frame_bytes = 0;
            (length, status & RDES0_ES != 0)
        } else {
            self.rx_frame_bytes += capacity;
            (capacity, false)
        };

        self.rx_slots[index] = None;
        self.rx_next = (index + 1) % RX_DESC_COUNT;

        Some(RxCompletion {
            slot,
            length,
            last,
            error,
        })
    }

    fn rx_revoke(&mut self) -> Option<SlotId> {
        if self.running {
            return None;
        }

        let index = (0..RX_DESC_COUNT)
            .map(|i| (self.rx_next + i) % RX_DESC_COUNT)
            .find(|&i| self.rx_slots[i].is_some())?;

        self.rx_ring[index].set_status(0);
        self.rx_ring[index].set_buffer(0);
        let slot = self.rx_slots[index].take();

        if self.rx_slots.iter().all(Option::is_none) {
            self.rx_fill = 0;
            self.rx_next = 0;
            self.rx_frame_bytes = 0;
        }
        slot
    }

    fn tx_ring_depth(&self) -> usize {
        TX_DESC_COUNT
    }

    fn tx_submit(
        &mut self,
        fragments: &TxFragmentList<'_>,
        frame: PacketChain,
    ) -> Result<(), TxSubmitError> {
        if !self.initialized {
            return Err(TxSubmitError {
                error: NetworkError::NotInitialized,
                frame,
            });
        }
        if !self.running {
            return Err(TxSubmitError {
                error: NetworkError::NotRunning,
                frame,
            });
        }

        let count = fragments.len();
        if count > TX_DESC_COUNT - self.tx_in_use || self.tx_frames[self.tx_frame_head].is_some() {
            return Err(TxSubmitError {
                error: NetworkError::TxBusy,
                frame,
            });
        }

        let first = self.tx_head;
        for (i, fragment) in fragments.walk().enumerate() {
            let desc = &mut self.tx_ring[(first + i) % TX_DESC_COUNT];
            let mut status = TDES0_TCH | TDES0_CIC_FULL;
            if i == 0 {
                status |= TDES0_FS;
            }
            if i + 1 == count {
                status |= TDES0_LS | TDES0_IC;
            }
            desc.set_buffer(fragment.addr() as usize as u32);
            desc.set_control(fragment.len() as u32 & TDES1_TBS1_MASK);
            desc.set_status(status);
        }

        // Hand over back to front so the engine never sees half a frame
        fence(Ordering::SeqCst);
        for i in (0..count).rev() {
            let desc = &mut self.tx_ring[(first + i) % TX_DESC_COUNT];
            let status = desc.status();
            desc.set_status(status | TDES0_OWN);
        }

        self.tx_frames[self.tx_frame_head] = Some(TxInFlight {
            frame,
            first,
            count,
        });
        self.tx_frame_head = (self.tx_frame_head + 1) % TX_DESC_COUNT;
        self.tx_head = (first + count) % TX_DESC_COUNT;
        self.tx_in_use += count;

        if self.regs.read(DMASR) & DMASR_TBUS != 0 {
            self.regs.write(DMASR, DMASR_TBUS);
        }
        self.regs.write(DMATPDR, 0);
        Ok(())
    }

    fn tx_reclaim(&mut self) -> Option<TxCompletion> {
        let oldest = self.tx_frames[self.tx_frame_tail].as_ref()?;
        let busy = (0..oldest.count)
            .any(|i| self.tx_ring[(oldest.first + i) % TX_DESC_COUNT].is_dma_owned());
        if busy && self.running {
            return None;
        }

        let done = self.tx_frames[self.tx_frame_tail].take()?;
        let mut failed = false;
        for i in 0..done.count {
            let desc = &mut self.tx_ring[(done.first + i) % TX_DESC_COUNT];
            failed |= desc.status() & TDES0_ES != 0;
            desc.set_status(TDES0_TCH);
            desc.set_buffer(0);
        }
        if failed {
            log::debug!("[eth] transmit error, {} bytes", done.frame.total_len());
        } else if busy {
            log::debug!("[eth] engine stopped, {} byte frame not sent", done.frame.total_len());
        }

        self.tx_frame_tail = (self.tx_frame_tail + 1) % TX_DESC_COUNT;
        self.tx_in_use -= done.count;
        Some(TxCompletion {
            frame: done.frame,
            sent: !busy && !failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::chain::Segment;
    use crate::net::packet_pool::PacketPool;
    use alloc::sync::Arc;
    use alloc::vec;

    /// Zeroed memory standing in for the register block
    fn fake_block() -> usize {
        let block = vec![0u32; (DMAIER + 4) / 4].into_boxed_slice();
        Box::leak(block).as_mut_ptr() as usize
    }

    fn configured() -> (Stm32Eth, usize) {
        let base = fake_block();
        // SAFETY: base is a leaked allocation covering every register offset
        let mut eth = unsafe { Stm32Eth::with_base(base) };
        eth.configure(MacAddress::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]));
        (eth, base)
    }

    fn reg(base: usize, offset: usize) -> u32 {
        // SAFETY: test block covers offset
        unsafe { core::ptr::read_volatile((base + offset) as *const u32) }
    }

    /// Complete receive descriptor `index` as the DMA engine would
    fn dma_receive(eth: &mut Stm32Eth, index: usize, status: u32) {
        eth.rx_ring[index].set_status(status);
    }

    #[test]
    fn test_init_reports_stuck_reset() {
        // SAFETY: leaked block covers every register offset
        let mut eth = unsafe { Stm32Eth::with_base(fake_block()) };
        assert_eq!(eth.init(MacAddress::default()), Err(NetworkError::Timeout));
        assert!(!eth.rx_wants_buffer());
    }

    #[test]
    fn test_configure_programs_address_filter() {
        let (_eth, base) = configured();
        assert_eq!(reg(base, MACA0HR), MACA0HR_MO | 0x5544);
        assert_eq!(reg(base, MACA0LR), 0x3322_1102);
        assert_ne!(reg(base, DMAOMR) & DMAOMR_RSF, 0);
        assert_ne!(reg(base, DMAOMR) & DMAOMR_TSF, 0);
    }

    #[test]
    fn test_link_params_set_speed_and_duplex() {
        let (mut eth, base) = configured();

        eth.set_link_params(LinkParams {
            speed: LinkSpeed::Speed100,
            duplex: DuplexMode::Full,
        })
        .unwrap();
        assert_eq!(reg(base, MACCR) & (MACCR_FES | MACCR_DM), MACCR_FES | MACCR_DM);

        eth.set_link_params(LinkParams {
            speed: LinkSpeed::Speed10,
            duplex: DuplexMode::Half,
        })
        .unwrap();
        assert_eq!(reg(base, MACCR) & (MACCR_FES | MACCR_DM), 0);
        assert_ne!(reg(base, MACCR) & MACCR_IPCO, 0);
    }

    #[test]
    fn test_start_stop_toggle_engines() {
        let (mut eth, base) = configured();
        eth.start().unwrap();
        assert!(eth.is_running());
        assert_eq!(reg(base, MACCR) & (MACCR_TE | MACCR_RE), MACCR_TE | MACCR_RE);
        assert_eq!(
            reg(base, DMAOMR) & (DMAOMR_ST | DMAOMR_SR),
            DMAOMR_ST | DMAOMR_SR
        );

        eth.stop().unwrap();
        assert!(!eth.is_running());
        assert_eq!(reg(base, MACCR) & (MACCR_TE | MACCR_RE), 0);
        assert_eq!(reg(base, DMAOMR) & (DMAOMR_ST | DMAOMR_SR), 0);
    }

    #[test]
    fn test_uninitialized_calls_rejected() {
        // SAFETY: leaked block covers every register offset
        let mut eth = unsafe { Stm32Eth::with_base(fake_block()) };
        assert_eq!(eth.start(), Err(NetworkError::NotInitialized));
        let chain = PacketChain::from_slice(&[0; 60]);
        let fragments = TxFragmentList::build(&chain, TX_DESC_COUNT).unwrap();
        let err = eth.tx_submit(&fragments, chain.clone()).unwrap_err();
        assert_eq!(err.error, NetworkError::NotInitialized);
    }

    #[test]
    fn test_rx_arm_and_complete() {
        let (mut eth, _) = configured();
        let pool = PacketPool::new(6);

        let mut armed = vec![];
        while eth.rx_wants_buffer() {
            let buffer = pool.allocate().unwrap();
            armed.push(buffer.slot());
            eth.rx_provide(buffer).unwrap();
        }
        assert_eq!(armed.len(), RX_DESC_COUNT);
        assert!(eth.rx_ring.iter().all(|d| d.is_dma_owned()));
        assert_eq!(
            eth.rx_ring[0].control() & RDES1_RBS1_MASK,
            crate::config::RX_BUFFER_SIZE as u32
        );
        assert!(eth.rx_poll().is_none());

        let spare = pool.allocate().unwrap();
        let spare = eth.rx_provide(spare).unwrap_err();
        pool.abandon(spare.slot());

        // Single-descriptor frame: 64 bytes + CRC
        dma_receive(&mut eth, 0, RDES0_FS | RDES0_LS | (68 << RDES0_FL_SHIFT));
        assert_eq!(
            eth.rx_poll(),
            Some(RxCompletion {
                slot: armed[0],
                length: 64,
                last: true,
                error: false
            })
        );

        // Frame spanning two descriptors
        let first = crate::config::RX_BUFFER_SIZE;
        dma_receive(&mut eth, 1, RDES0_FS);
        dma_receive(
            &mut eth,
            2,
            RDES0_LS | RDES0_ES | (((first + 100 + 4) as u32) << RDES0_FL_SHIFT),
        );
        let head = eth.rx_poll().unwrap();
        assert_eq!((head.length, head.last, head.error), (first, false, false));
        let tail = eth.rx_poll().unwrap();
        assert_eq!((tail.slot, tail.length, tail.last, tail.error), (armed[2], 100, true, true));

        assert!(eth.rx_poll().is_none());
        assert!(eth.rx_wants_buffer());
    }

    #[test]
    fn test_rx_revoke_only_when_stopped() {
        let (mut eth, _) = configured();
        let pool = PacketPool::new(4);
        while eth.rx_wants_buffer() {
            eth.rx_provide(pool.allocate().unwrap()).unwrap();
        }

        eth.start().unwrap();
        assert_eq!(eth.rx_revoke(), None);
        eth.stop().unwrap();

        let mut revoked = 0;
        while let Some(slot) = eth.rx_revoke() {
            pool.abandon(slot);
            revoked += 1;
        }
        assert_eq!(revoked, RX_DESC_COUNT);
        assert_eq!(pool.free_count(), 4);
        assert!(eth.rx_ring.iter().all(|d| !d.is_dma_owned()));
    }

    #[test]
    fn test_tx_descriptors_follow_fragments() {
        let (mut eth, _) = configured();
        eth.start().unwrap();

        let head: Arc<[u8]> = Arc::from(&[0xAAu8; 14][..]);
        let body: Arc<[u8]> = Arc::from(&[0xBBu8; 200][..]);
        let mut chain = PacketChain::from_shared(head.clone());
        chain.push(Segment::Shared(body.clone()));

        let fragments = TxFragmentList::build(&chain, eth.tx_ring_depth()).unwrap();
        eth.tx_submit(&fragments, chain.clone()).unwrap();

        let d0 = &eth.tx_ring[0];
        assert_eq!(d0.status() & (TDES0_OWN | TDES0_FS | TDES0_LS), TDES0_OWN | TDES0_FS);
        assert_eq!(d0.control(), 14);
        assert_eq!(d0.buffer(), head.as_ptr() as usize as u32);

        let d1 = &eth.tx_ring[1];
        assert_eq!(
            d1.status() & (TDES0_OWN | TDES0_FS | TDES0_LS | TDES0_IC),
            TDES0_OWN | TDES0_LS | TDES0_IC
        );
        assert_eq!(d1.control(), 200);
        assert_eq!(d1.buffer(), body.as_ptr() as usize as u32);

        // Hardware still owns the frame
        assert!(eth.tx_reclaim().is_none());

        eth.tx_ring[0].set_status(TDES0_TCH);
        eth.tx_ring[1].set_status(TDES0_TCH);
        let returned = eth.tx_reclaim().unwrap();
        assert_eq!(returned.frame.total_len(), 214);
        assert!(returned.sent);
        assert!(eth.tx_reclaim().is_none());
    }

    #[test]
    fn test_tx_ring_full_returns_frame() {
        let (mut eth, _) = configured();
        eth.start().unwrap();

        let chain = PacketChain::from_slice(&[1; 60]);
        for _ in 0..TX_DESC_COUNT {
            let fragments = TxFragmentList::build(&chain, TX_DESC_COUNT).unwrap();
            eth.tx_submit(&fragments, chain.clone()).unwrap();
        }

        let fragments = TxFragmentList::build(&chain, TX_DESC_COUNT).unwrap();
        let err = eth.tx_submit(&fragments, chain.clone()).unwrap_err();
        assert_eq!(err.error, NetworkError::TxBusy);
        assert_eq!(err.frame.total_len(), 60);

        eth.tx_ring[0].set_status(TDES0_TCH);
        assert!(eth.tx_reclaim().is_some());
        let fragments = TxFragmentList::build(&chain, TX_DESC_COUNT).unwrap();
        assert!(eth.tx_submit(&fragments, chain.clone()).is_ok());
    }

    #[test]
    fn test_submit_refused_while_stopped() {
        let (mut eth, _) = configured();
        let chain = PacketChain::from_slice(&[1; 60]);
        let fragments = TxFragmentList::build(&chain, TX_DESC_COUNT).unwrap();

        let err = eth.tx_submit(&fragments, chain.clone()).unwrap_err();
        assert_eq!(err.error, NetworkError::NotRunning);
        assert_eq!(err.frame.total_len(), 60);
        assert!(eth.tx_ring.iter().all(|d| !d.is_dma_owned()));
        assert!(eth.tx_reclaim().is_none());
    }

    #[test]
    fn test_stop_returns_queued_frames_unsent() {
        let (mut eth, _) = configured();
        eth.start().unwrap();
        let chain = PacketChain::from_slice(&[1; 60]);
        let fragments = TxFragmentList::build(&chain, TX_DESC_COUNT).unwrap();
        eth.tx_submit(&fragments, chain.clone()).unwrap();
        assert!(eth.tx_reclaim().is_none());

        eth.stop().unwrap();
        let aborted = eth.tx_reclaim().unwrap();
        assert!(!aborted.sent);
        assert_eq!(aborted.frame.total_len(), 60);
        assert!(!eth.tx_ring[0].is_dma_owned());
        assert!(eth.tx_reclaim().is_none());
    }

    #[test]
    fn test_transmit_error_reported_unsent() {
        let (mut eth, _) = configured();
        eth.start().unwrap();
        let chain = PacketChain::from_slice(&[1; 60]);
        let fragments = TxFragmentList::build(&chain, TX_DESC_COUNT).unwrap();
        eth.tx_submit(&fragments, chain.clone()).unwrap();

        eth.tx_ring[0].set_status(TDES0_TCH | TDES0_ES);
        assert!(!eth.tx_reclaim().unwrap().sent);
    }

    #[test]
    fn test_smi_timeout_and_command_encoding() {
        let base = fake_block();
        // SAFETY: leaked block covers every register offset
        let mut smi = unsafe { Stm32Smi::new(base, SmiClockRange::Div102) };

        assert_eq!(smi.read(1, 31), Err(PhyError::Timeout));
        let command = reg(base, MACMIIAR);
        assert_eq!(command & MACMIIAR_CR_MASK, 0b100 << MACMIIAR_CR_SHIFT);
        assert_eq!((command >> MACMIIAR_PA_SHIFT) & 0x1F, 1);
        assert_eq!((command >> MACMIIAR_MR_SHIFT) & 0x1F, 31);
        assert_ne!(command & MACMIIAR_MB, 0);
    }

    #[test]
    fn test_smi_read_when_idle() {
        let base = fake_block();
        // SAFETY: leaked block covers every register offset
        let smi = unsafe { Stm32Smi::new(base, SmiClockRange::Div42) };
        // SAFETY: test block covers MACMIIDR
        unsafe { core::ptr::write_volatile((base + MACMIIDR) as *mut u32, 0x0007_C0F1) };

        // A completed transaction leaves MB clear
        assert_eq!(smi.wait_idle(), Ok(()));
        assert_eq!(smi.regs.read(MACMIIDR) & 0xFFFF, 0xC0F1);
    }

    #[test]
    fn test_clock_range_from_hclk() {
        assert_eq!(SmiClockRange::from_hclk(168_000_000), SmiClockRange::Div102);
        assert_eq!(SmiClockRange::from_hclk(120_000_000), SmiClockRange::Div62);
        assert_eq!(SmiClockRange::from_hclk(84_000_000), SmiClockRange::Div42);
        assert_eq!(SmiClockRange::from_hclk(25_000_000), SmiClockRange::Div16);
    }
}
