//! Microchip LAN8720A 10/100 Ethernet PHY (RMII)
//!
//! The PHY sits on the MAC's SMI bus at a strap-selected address and has a
//! dedicated reset line. The Link Monitor only needs `PhyControl`; the rest
//! of the register map is decoded for board bring-up and diagnostics, and
//! `read_register`/`write_register` reach anything left over.
//!
//! # References
//!
//! - LAN8720A/LAN8720Ai datasheet, section 4 (register map)

use super::{LinkStatus, PhyControl, PhyError, SmiBus, SpeedIndication};
use crate::config::{MAX_PHY_ADDRESS, NetConfig};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;

// ============================================================================
// Register Map
// ============================================================================

pub const REG_BASIC_CONTROL: u8 = 0x00;
pub const REG_BASIC_STATUS: u8 = 0x01;
pub const REG_PHY_IDENTIFIER_1: u8 = 0x02;
pub const REG_PHY_IDENTIFIER_2: u8 = 0x03;
pub const REG_AUTO_NEGOTIATION_ADVERTISEMENT: u8 = 0x04;
pub const REG_LINK_PARTNER_ABILITY: u8 = 0x05;
pub const REG_AUTO_NEGOTIATION_EXPANSION: u8 = 0x06;
pub const REG_MODE_CONTROL_STATUS: u8 = 0x11;
pub const REG_SPECIAL_MODES: u8 = 0x12;
pub const REG_SYMBOL_ERROR_COUNTER: u8 = 0x1A;
pub const REG_SPECIAL_CONTROL_STATUS_INDICATIONS: u8 = 0x1B;
pub const REG_INTERRUPT_SOURCE: u8 = 0x1D;
pub const REG_INTERRUPT_MASK: u8 = 0x1E;
pub const REG_PHY_SPECIAL_CONTROL_STATUS: u8 = 0x1F;

// BASIC_CONTROL bits
const BCR_SOFT_RESET: u16 = 1 << 15;
const BCR_LOOPBACK: u16 = 1 << 14;
const BCR_SPEED_100: u16 = 1 << 13;
const BCR_AUTO_NEGOTIATION: u16 = 1 << 12;
const BCR_POWER_DOWN: u16 = 1 << 11;
const BCR_ISOLATE: u16 = 1 << 10;
const BCR_RESTART_AUTO_NEGOTIATION: u16 = 1 << 9;
const BCR_FULL_DUPLEX: u16 = 1 << 8;

// BASIC_STATUS bits
const BSR_AUTO_NEGOTIATION_COMPLETE: u16 = 1 << 5;
const BSR_LINK_STATUS: u16 = 1 << 2;

// BASIC_STATUS capability bits
const BSR_100BASE_TX_FULL_DUPLEX: u16 = 1 << 14;
const BSR_100BASE_TX_HALF_DUPLEX: u16 = 1 << 13;
const BSR_10BASE_T_FULL_DUPLEX: u16 = 1 << 12;
const BSR_10BASE_T_HALF_DUPLEX: u16 = 1 << 11;
const BSR_REMOTE_FAULT: u16 = 1 << 4;
const BSR_JABBER_DETECT: u16 = 1 << 1;

// AUTO_NEGOTIATION_ADVERTISEMENT / LINK_PARTNER_ABILITY bits
const ANAR_NEXT_PAGE: u16 = 1 << 15;
const ANLPAR_ACKNOWLEDGE: u16 = 1 << 14;
const ANAR_REMOTE_FAULT: u16 = 1 << 13;
const ANAR_PAUSE_SHIFT: u16 = 10;
const ANAR_PAUSE_MASK: u16 = 0x3;
const ANAR_100BASE_TX_FULL_DUPLEX: u16 = 1 << 8;
const ANAR_100BASE_TX: u16 = 1 << 7;
const ANAR_10BASE_T_FULL_DUPLEX: u16 = 1 << 6;
const ANAR_10BASE_T: u16 = 1 << 5;
const ANAR_SELECTOR_MASK: u16 = 0x1F;
const ANLPAR_100BASE_T4: u16 = 1 << 9;

/// IEEE 802.3 selector field value
pub const SELECTOR_IEEE_802_3: u8 = 0b00001;

// AUTO_NEGOTIATION_EXPANSION bits
const ANER_PARALLEL_DETECTION_FAULT: u16 = 1 << 4;
const ANER_LINK_PARTNER_AUTO_NEGOTIATION_ABLE: u16 = 1 << 0;

// MODE_CONTROL_STATUS bits
const MCSR_EDPWRDOWN: u16 = 1 << 13;
const MCSR_FARLOOPBACK: u16 = 1 << 9;
const MCSR_ALTINT: u16 = 1 << 6;
const MCSR_ENERGYON: u16 = 1 << 1;

// SPECIAL_MODES bits
const SMR_MODE_SHIFT: u16 = 5;
const SMR_MODE_MASK: u16 = 0x7;
const SMR_PHYAD_MASK: u16 = 0x1F;

// SPECIAL_CONTROL_STATUS_INDICATIONS bits
const SCSIR_AMDIXCTRL: u16 = 1 << 15;
const SCSIR_CH_SELECT: u16 = 1 << 13;
const SCSIR_SQEOFF: u16 = 1 << 11;
const SCSIR_XPOL: u16 = 1 << 4;

// PHY_SPECIAL_CONTROL_STATUS bits
const PSCSR_AUTO_DONE: u16 = 1 << 12;
const PSCSR_SPEED_SHIFT: u16 = 2;
const PSCSR_SPEED_MASK: u16 = 0x7;

// ============================================================================
// Reset Timing
// ============================================================================

/// nRST held low
const RESET_PULSE_MS: u32 = 50;
/// Settle time after nRST release before the first SMI access
const RESET_RECOVERY_MS: u32 = 10;
/// Soft reset completion
const SOFT_RESET_MS: u32 = 50;

/// PHY identification read from registers 2 and 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyIdentifier {
    /// OUI bits 3..24
    pub oui: u32,
    pub model: u8,
    pub revision: u8,
}

/// Pause capability advertised during auto-negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    None,
    Symmetric,
    /// Asymmetric pause toward the link partner
    Asymmetric,
    Both,
}

impl Pause {
    fn bits(self) -> u16 {
        match self {
            Pause::None => 0b00,
            Pause::Symmetric => 0b01,
            Pause::Asymmetric => 0b10,
            Pause::Both => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & ANAR_PAUSE_MASK {
            0b00 => Pause::None,
            0b01 => Pause::Symmetric,
            0b10 => Pause::Asymmetric,
            _ => Pause::Both,
        }
    }
}

/// Abilities read from the basic status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyCapabilities {
    pub base100_tx_full_duplex: bool,
    pub base100_tx_half_duplex: bool,
    pub base10_t_full_duplex: bool,
    pub base10_t_half_duplex: bool,
    pub remote_fault: bool,
    pub jabber_detect: bool,
}

/// Base page received from the link partner (register 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPartnerAbility {
    pub next_page: bool,
    pub acknowledge: bool,
    pub remote_fault: bool,
    pub pause: bool,
    pub base100_t4: bool,
    pub base100_tx_full_duplex: bool,
    pub base100_tx: bool,
    pub base10_t_full_duplex: bool,
    pub base10_t: bool,
    pub selector: u8,
}

impl LinkPartnerAbility {
    fn from_bits(anlpar: u16) -> Self {
        Self {
            next_page: anlpar & ANAR_NEXT_PAGE != 0,
            acknowledge: anlpar & ANLPAR_ACKNOWLEDGE != 0,
            remote_fault: anlpar & ANAR_REMOTE_FAULT != 0,
            pause: anlpar & (1 << ANAR_PAUSE_SHIFT) != 0,
            base100_t4: anlpar & ANLPAR_100BASE_T4 != 0,
            base100_tx_full_duplex: anlpar & ANAR_100BASE_TX_FULL_DUPLEX != 0,
            base100_tx: anlpar & ANAR_100BASE_TX != 0,
            base10_t_full_duplex: anlpar & ANAR_10BASE_T_FULL_DUPLEX != 0,
            base10_t: anlpar & ANAR_10BASE_T != 0,
            selector: (anlpar & ANAR_SELECTOR_MASK) as u8,
        }
    }
}

/// MODE field of the special modes register, latched from straps at reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyMode {
    Half10,
    Full10,
    Half100,
    Full100,
    /// 100BASE-TX half duplex advertised, auto-negotiation on
    Half100Advertised,
    Repeater,
    PowerDown,
    /// All capable, auto-negotiation on
    AllCapable,
}

impl PhyMode {
    fn bits(self) -> u16 {
        match self {
            PhyMode::Half10 => 0,
            PhyMode::Full10 => 1,
            PhyMode::Half100 => 2,
            PhyMode::Full100 => 3,
            PhyMode::Half100Advertised => 4,
            PhyMode::Repeater => 5,
            PhyMode::PowerDown => 6,
            PhyMode::AllCapable => 7,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & SMR_MODE_MASK {
            0 => PhyMode::Half10,
            1 => PhyMode::Full10,
            2 => PhyMode::Half100,
            3 => PhyMode::Full100,
            4 => PhyMode::Half100Advertised,
            5 => PhyMode::Repeater,
            6 => PhyMode::PowerDown,
            _ => PhyMode::AllCapable,
        }
    }
}

/// Manual pair assignment when auto-MDIX is off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelect {
    /// TX transmits, RX receives
    Mdi,
    /// TX receives, RX transmits
    Mdix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Normal,
    Reversed,
}

/// Interrupt sources shared by the source and mask registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyInterrupt {
    AutoNegotiationPageReceived = 1,
    ParallelDetectionFault = 2,
    AutoNegotiationLpAcknowledge = 3,
    LinkDown = 4,
    RemoteFault = 5,
    AutoNegotiationComplete = 6,
    EnergyOn = 7,
}

impl PhyInterrupt {
    fn mask(self) -> u16 {
        1 << self as u16
    }
}

/// LAN8720 driver over an SMI bus, a reset pin and a millisecond delay
pub struct Lan8720<B, R, D> {
    bus: B,
    reset: R,
    delay: D,
    address: u8,
    initialized: bool,
}

impl<B, R, D> Lan8720<B, R, D>
where
    B: SmiBus,
    R: OutputPin,
    D: DelayMs<u32>,
{
    /// Bind the driver to a PHY at `address` (0..=31)
    pub fn new(bus: B, reset: R, delay: D, address: u8) -> Result<Self, PhyError> {
        if address > MAX_PHY_ADDRESS {
            return Err(PhyError::InvalidAddress);
        }
        Ok(Self {
            bus,
            reset,
            delay,
            address,
            initialized: false,
        })
    }

    /// Bind the driver to the PHY address configured for the interface
    pub fn from_config(bus: B, reset: R, delay: D, config: &NetConfig) -> Result<Self, PhyError> {
        Self::new(bus, reset, delay, config.phy_address)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Give back the bus, reset pin and delay
    pub fn release(self) -> (B, R, D) {
        (self.bus, self.reset, self.delay)
    }

    /// Hardware reset pulse followed by a soft reset
    ///
    /// Fails with `ResetFailed` if the soft reset bit is still set afterwards.
    pub fn init(&mut self) -> Result<(), PhyError> {
        self.reset.set_low().map_err(|_| PhyError::Gpio)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.reset.set_high().map_err(|_| PhyError::Gpio)?;
        self.delay.delay_ms(RESET_RECOVERY_MS);

        let bcr = self.bus.read(self.address, REG_BASIC_CONTROL)?;
        self.bus
            .write(self.address, REG_BASIC_CONTROL, bcr | BCR_SOFT_RESET)?;
        self.delay.delay_ms(SOFT_RESET_MS);

        let bcr = self.bus.read(self.address, REG_BASIC_CONTROL)?;
        if bcr & BCR_SOFT_RESET != 0 {
            log::error!("[lan8720] soft reset did not complete");
            return Err(PhyError::ResetFailed);
        }

        self.initialized = true;
        log::debug!("[lan8720] reset complete at address {}", self.address);
        Ok(())
    }

    /// Put the PHY into power-down mode
    pub fn deinit(&mut self) -> Result<(), PhyError> {
        self.modify(REG_BASIC_CONTROL, BCR_POWER_DOWN, true)?;
        self.initialized = false;
        Ok(())
    }

    /// Known-good baseline: 100M full duplex, no loopback, no power-down,
    /// no isolation, auto-negotiation off, PHYAD programmed
    pub fn configure_defaults(&mut self) -> Result<(), PhyError> {
        self.set_loopback(false)?;
        self.set_speed_100(true)?;
        self.set_auto_negotiation(false)?;
        self.set_power_down(false)?;
        self.set_isolate(false)?;
        self.modify(REG_BASIC_CONTROL, BCR_RESTART_AUTO_NEGOTIATION, false)?;
        self.set_full_duplex(true)?;
        self.set_phy_address(self.address)
    }

    /// Enable auto-negotiation and kick off a new round
    pub fn start_auto_negotiation(&mut self) -> Result<(), PhyError> {
        self.ensure_initialized()?;
        let bcr = self.bus.read(self.address, REG_BASIC_CONTROL)?;
        self.bus.write(
            self.address,
            REG_BASIC_CONTROL,
            bcr | BCR_AUTO_NEGOTIATION | BCR_RESTART_AUTO_NEGOTIATION,
        )
    }

    // ========================================================================
    // Control Bits
    // ========================================================================

    pub fn set_loopback(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_BASIC_CONTROL, BCR_LOOPBACK, enable)
    }

    pub fn loopback(&mut self) -> Result<bool, PhyError> {
        self.test(REG_BASIC_CONTROL, BCR_LOOPBACK)
    }

    /// Forced speed when auto-negotiation is off: 100M if set, 10M otherwise
    pub fn set_speed_100(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_BASIC_CONTROL, BCR_SPEED_100, enable)
    }

    pub fn speed_100(&mut self) -> Result<bool, PhyError> {
        self.test(REG_BASIC_CONTROL, BCR_SPEED_100)
    }

    pub fn set_auto_negotiation(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_BASIC_CONTROL, BCR_AUTO_NEGOTIATION, enable)
    }

    pub fn auto_negotiation(&mut self) -> Result<bool, PhyError> {
        self.test(REG_BASIC_CONTROL, BCR_AUTO_NEGOTIATION)
    }

    pub fn set_power_down(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_BASIC_CONTROL, BCR_POWER_DOWN, enable)
    }

    pub fn power_down(&mut self) -> Result<bool, PhyError> {
        self.test(REG_BASIC_CONTROL, BCR_POWER_DOWN)
    }

    pub fn set_isolate(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_BASIC_CONTROL, BCR_ISOLATE, enable)
    }

    pub fn isolate(&mut self) -> Result<bool, PhyError> {
        self.test(REG_BASIC_CONTROL, BCR_ISOLATE)
    }

    /// Forced duplex when auto-negotiation is off
    pub fn set_full_duplex(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_BASIC_CONTROL, BCR_FULL_DUPLEX, enable)
    }

    pub fn full_duplex(&mut self) -> Result<bool, PhyError> {
        self.test(REG_BASIC_CONTROL, BCR_FULL_DUPLEX)
    }

    /// Program PHYAD in the special modes register
    pub fn set_phy_address(&mut self, address: u8) -> Result<(), PhyError> {
        if address > MAX_PHY_ADDRESS {
            return Err(PhyError::InvalidAddress);
        }
        self.ensure_initialized()?;
        let smr = self.bus.read(self.address, REG_SPECIAL_MODES)?;
        self.bus.write(
            self.address,
            REG_SPECIAL_MODES,
            (smr & !SMR_PHYAD_MASK) | address as u16,
        )
    }

    pub fn phy_address(&mut self) -> Result<u8, PhyError> {
        self.ensure_initialized()?;
        Ok((self.bus.read(self.address, REG_SPECIAL_MODES)? & SMR_PHYAD_MASK) as u8)
    }

    pub fn identifier(&mut self) -> Result<PhyIdentifier, PhyError> {
        self.ensure_initialized()?;
        let id1 = self.bus.read(self.address, REG_PHY_IDENTIFIER_1)?;
        let id2 = self.bus.read(self.address, REG_PHY_IDENTIFIER_2)?;
        Ok(PhyIdentifier {
            oui: (id1 as u32) | (((id2 >> 10) & 0x3F) as u32) << 16,
            model: ((id2 >> 4) & 0x3F) as u8,
            revision: (id2 & 0xF) as u8,
        })
    }

    pub fn capabilities(&mut self) -> Result<PhyCapabilities, PhyError> {
        self.ensure_initialized()?;
        let bsr = self.bus.read(self.address, REG_BASIC_STATUS)?;
        Ok(PhyCapabilities {
            base100_tx_full_duplex: bsr & BSR_100BASE_TX_FULL_DUPLEX != 0,
            base100_tx_half_duplex: bsr & BSR_100BASE_TX_HALF_DUPLEX != 0,
            base10_t_full_duplex: bsr & BSR_10BASE_T_FULL_DUPLEX != 0,
            base10_t_half_duplex: bsr & BSR_10BASE_T_HALF_DUPLEX != 0,
            remote_fault: bsr & BSR_REMOTE_FAULT != 0,
            jabber_detect: bsr & BSR_JABBER_DETECT != 0,
        })
    }

    // ========================================================================
    // Auto-Negotiation Advertisement / Link Partner
    // ========================================================================

    pub fn set_advertise_remote_fault(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_REMOTE_FAULT, enable)
    }

    pub fn advertise_remote_fault(&mut self) -> Result<bool, PhyError> {
        self.test(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_REMOTE_FAULT)
    }

    pub fn set_advertise_pause(&mut self, pause: Pause) -> Result<(), PhyError> {
        self.modify_field(
            REG_AUTO_NEGOTIATION_ADVERTISEMENT,
            ANAR_PAUSE_SHIFT,
            ANAR_PAUSE_MASK,
            pause.bits(),
        )
    }

    pub fn advertise_pause(&mut self) -> Result<Pause, PhyError> {
        let bits = self.field(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_PAUSE_SHIFT, ANAR_PAUSE_MASK)?;
        Ok(Pause::from_bits(bits))
    }

    pub fn set_advertise_100base_tx_full_duplex(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_100BASE_TX_FULL_DUPLEX, enable)
    }

    pub fn advertise_100base_tx_full_duplex(&mut self) -> Result<bool, PhyError> {
        self.test(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_100BASE_TX_FULL_DUPLEX)
    }

    pub fn set_advertise_100base_tx(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_100BASE_TX, enable)
    }

    pub fn advertise_100base_tx(&mut self) -> Result<bool, PhyError> {
        self.test(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_100BASE_TX)
    }

    pub fn set_advertise_10base_t_full_duplex(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_10BASE_T_FULL_DUPLEX, enable)
    }

    pub fn advertise_10base_t_full_duplex(&mut self) -> Result<bool, PhyError> {
        self.test(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_10BASE_T_FULL_DUPLEX)
    }

    pub fn set_advertise_10base_t(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_10BASE_T, enable)
    }

    pub fn advertise_10base_t(&mut self) -> Result<bool, PhyError> {
        self.test(REG_AUTO_NEGOTIATION_ADVERTISEMENT, ANAR_10BASE_T)
    }

    /// Selector field (5 bits, `SELECTOR_IEEE_802_3` for Ethernet)
    pub fn set_advertise_selector(&mut self, selector: u8) -> Result<(), PhyError> {
        if selector as u16 > ANAR_SELECTOR_MASK {
            return Err(PhyError::InvalidValue);
        }
        self.modify_field(REG_AUTO_NEGOTIATION_ADVERTISEMENT, 0, ANAR_SELECTOR_MASK, selector as u16)
    }

    pub fn advertise_selector(&mut self) -> Result<u8, PhyError> {
        Ok(self.field(REG_AUTO_NEGOTIATION_ADVERTISEMENT, 0, ANAR_SELECTOR_MASK)? as u8)
    }

    pub fn link_partner_ability(&mut self) -> Result<LinkPartnerAbility, PhyError> {
        self.ensure_initialized()?;
        let anlpar = self.bus.read(self.address, REG_LINK_PARTNER_ABILITY)?;
        Ok(LinkPartnerAbility::from_bits(anlpar))
    }

    pub fn link_partner_auto_negotiation_able(&mut self) -> Result<bool, PhyError> {
        self.test(REG_AUTO_NEGOTIATION_EXPANSION, ANER_LINK_PARTNER_AUTO_NEGOTIATION_ABLE)
    }

    pub fn parallel_detection_fault(&mut self) -> Result<bool, PhyError> {
        self.test(REG_AUTO_NEGOTIATION_EXPANSION, ANER_PARALLEL_DETECTION_FAULT)
    }

    // ========================================================================
    // Mode Control / Special Modes
    // ========================================================================

    /// Energy detect power-down: the analog front end sleeps with no cable
    pub fn set_energy_detect_power_down(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_MODE_CONTROL_STATUS, MCSR_EDPWRDOWN, enable)
    }

    pub fn energy_detect_power_down(&mut self) -> Result<bool, PhyError> {
        self.test(REG_MODE_CONTROL_STATUS, MCSR_EDPWRDOWN)
    }

    pub fn set_far_loopback(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_MODE_CONTROL_STATUS, MCSR_FARLOOPBACK, enable)
    }

    pub fn far_loopback(&mut self) -> Result<bool, PhyError> {
        self.test(REG_MODE_CONTROL_STATUS, MCSR_FARLOOPBACK)
    }

    pub fn set_alternate_interrupt_mode(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_MODE_CONTROL_STATUS, MCSR_ALTINT, enable)
    }

    pub fn alternate_interrupt_mode(&mut self) -> Result<bool, PhyError> {
        self.test(REG_MODE_CONTROL_STATUS, MCSR_ALTINT)
    }

    /// Energy detected on the line (read-only)
    pub fn energy_on(&mut self) -> Result<bool, PhyError> {
        self.test(REG_MODE_CONTROL_STATUS, MCSR_ENERGYON)
    }

    pub fn set_mode(&mut self, mode: PhyMode) -> Result<(), PhyError> {
        self.modify_field(REG_SPECIAL_MODES, SMR_MODE_SHIFT, SMR_MODE_MASK, mode.bits())
    }

    pub fn mode(&mut self) -> Result<PhyMode, PhyError> {
        Ok(PhyMode::from_bits(self.field(REG_SPECIAL_MODES, SMR_MODE_SHIFT, SMR_MODE_MASK)?))
    }

    /// Symbol errors seen in 100BASE-TX mode; wraps at 0xFFFF
    pub fn symbol_error_count(&mut self) -> Result<u16, PhyError> {
        self.ensure_initialized()?;
        self.bus.read(self.address, REG_SYMBOL_ERROR_COUNTER)
    }

    // ========================================================================
    // Special Control / Status Indications
    // ========================================================================

    /// Auto-MDIX on or off; AMDIXCTRL set hands pair selection to
    /// `set_channel_select`
    pub fn set_auto_mdix(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_SPECIAL_CONTROL_STATUS_INDICATIONS, SCSIR_AMDIXCTRL, !enable)
    }

    pub fn auto_mdix(&mut self) -> Result<bool, PhyError> {
        Ok(!self.test(REG_SPECIAL_CONTROL_STATUS_INDICATIONS, SCSIR_AMDIXCTRL)?)
    }

    pub fn set_channel_select(&mut self, select: ChannelSelect) -> Result<(), PhyError> {
        self.modify(
            REG_SPECIAL_CONTROL_STATUS_INDICATIONS,
            SCSIR_CH_SELECT,
            select == ChannelSelect::Mdix,
        )
    }

    pub fn channel_select(&mut self) -> Result<ChannelSelect, PhyError> {
        if self.test(REG_SPECIAL_CONTROL_STATUS_INDICATIONS, SCSIR_CH_SELECT)? {
            Ok(ChannelSelect::Mdix)
        } else {
            Ok(ChannelSelect::Mdi)
        }
    }

    /// Disable the SQE (heartbeat) test in 10BASE-T
    pub fn set_sqe_test_off(&mut self, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_SPECIAL_CONTROL_STATUS_INDICATIONS, SCSIR_SQEOFF, enable)
    }

    pub fn sqe_test_off(&mut self) -> Result<bool, PhyError> {
        self.test(REG_SPECIAL_CONTROL_STATUS_INDICATIONS, SCSIR_SQEOFF)
    }

    /// 10BASE-T receive polarity
    pub fn polarity(&mut self) -> Result<Polarity, PhyError> {
        if self.test(REG_SPECIAL_CONTROL_STATUS_INDICATIONS, SCSIR_XPOL)? {
            Ok(Polarity::Reversed)
        } else {
            Ok(Polarity::Normal)
        }
    }

    // ========================================================================
    // Interrupts
    // ========================================================================

    /// Source flag of `irq`; the hardware clears the source register on read
    pub fn interrupt_pending(&mut self, irq: PhyInterrupt) -> Result<bool, PhyError> {
        self.test(REG_INTERRUPT_SOURCE, irq.mask())
    }

    pub fn set_interrupt_enabled(&mut self, irq: PhyInterrupt, enable: bool) -> Result<(), PhyError> {
        self.modify(REG_INTERRUPT_MASK, irq.mask(), enable)
    }

    pub fn interrupt_enabled(&mut self, irq: PhyInterrupt) -> Result<bool, PhyError> {
        self.test(REG_INTERRUPT_MASK, irq.mask())
    }

    pub fn read_register(&mut self, reg: u8) -> Result<u16, PhyError> {
        self.ensure_initialized()?;
        self.bus.read(self.address, reg)
    }

    pub fn write_register(&mut self, reg: u8, value: u16) -> Result<(), PhyError> {
        self.ensure_initialized()?;
        self.bus.write(self.address, reg, value)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn ensure_initialized(&self) -> Result<(), PhyError> {
        if self.initialized {
            Ok(())
        } else {
            Err(PhyError::NotInitialized)
        }
    }

    fn modify(&mut self, reg: u8, mask: u16, set: bool) -> Result<(), PhyError> {
        self.ensure_initialized()?;
        let value = self.bus.read(self.address, reg)?;
        let value = if set { value | mask } else { value & !mask };
        self.bus.write(self.address, reg, value)
    }

    fn test(&mut self, reg: u8, mask: u16) -> Result<bool, PhyError> {
        self.ensure_initialized()?;
        Ok(self.bus.read(self.address, reg)? & mask != 0)
    }

    fn modify_field(&mut self, reg: u8, shift: u16, mask: u16, value: u16) -> Result<(), PhyError> {
        self.ensure_initialized()?;
        let current = self.bus.read(self.address, reg)?;
        let updated = (current & !(mask << shift)) | ((value & mask) << shift);
        self.bus.write(self.address, reg, updated)
    }

    fn field(&mut self, reg: u8, shift: u16, mask: u16) -> Result<u16, PhyError> {
        self.ensure_initialized()?;
        Ok((self.bus.read(self.address, reg)? >> shift) & mask)
    }
}

impl<B, R, D> PhyControl for Lan8720<B, R, D>
where
    B: SmiBus,
    R: OutputPin,
    D: DelayMs<u32>,
{
    fn auto_negotiation_done(&mut self) -> Result<bool, PhyError> {
        self.test(REG_PHY_SPECIAL_CONTROL_STATUS, PSCSR_AUTO_DONE)
    }

    fn speed_indication(&mut self) -> Result<SpeedIndication, PhyError> {
        self.ensure_initialized()?;
        let pscsr = self.bus.read(self.address, REG_PHY_SPECIAL_CONTROL_STATUS)?;
        Ok(SpeedIndication::from_bits(
            ((pscsr >> PSCSR_SPEED_SHIFT) & PSCSR_SPEED_MASK) as u8,
        ))
    }

    fn link_status(&mut self) -> Result<LinkStatus, PhyError> {
        if self.test(REG_BASIC_STATUS, BSR_LINK_STATUS)? {
            Ok(LinkStatus::Up)
        } else {
            Ok(LinkStatus::Down)
        }
    }
}

impl<B, R, D> Lan8720<B, R, D>
where
    B: SmiBus,
    R: OutputPin,
    D: DelayMs<u32>,
{
    /// Auto-negotiation complete as reported by the basic status register
    pub fn auto_negotiation_complete(&mut self) -> Result<bool, PhyError> {
        self.test(REG_BASIC_STATUS, BSR_AUTO_NEGOTIATION_COMPLETE)
    }
}
