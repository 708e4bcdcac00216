//! Link Monitor
//!
//! Polled at a short fixed interval by the facade. While the link is down it
//! waits for auto-negotiation to finish and the link-status bit to report a
//! link, programs the MAC with the decoded speed/duplex and only then starts
//! the DMA engine and publishes `Up`.
//! While up, it watches the raw link-status bit and publishes `Down` when it
//! drops.

use crate::drivers::net::phy::{LinkStatus, PhyControl};
use crate::drivers::net::{LinkParams, MacDma, NetworkError};

/// Current link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up(LinkParams),
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up(_))
    }
}

/// Published link transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up(LinkParams),
    Down,
}

#[derive(Debug)]
pub struct LinkMonitor {
    state: LinkState,
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMonitor {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Down,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Force the monitor back to `Down` without touching hardware
    pub fn reset(&mut self) {
        self.state = LinkState::Down;
    }

    /// Inspect the PHY once and return the transition, if any
    ///
    /// PHY or MAC failures leave the state unchanged and are returned.
    pub fn poll<P, M>(&mut self, phy: &mut P, mac: &mut M) -> Result<Option<LinkEvent>, NetworkError>
    where
        P: PhyControl,
        M: MacDma,
    {
        match self.state {
            LinkState::Down => {
                if !phy.auto_negotiation_done()? {
                    return Ok(None);
                }
                if phy.link_status()? != LinkStatus::Up {
                    log::debug!("[link] negotiation done, no link yet");
                    return Ok(None);
                }

                let indication = phy.speed_indication()?;
                let params = match indication.link_params() {
                    Some(params) => params,
                    None => {
                        log::debug!("[link] negotiation done, indication {:?}", indication);
                        return Ok(None);
                    }
                };

                mac.set_link_params(params)?;
                mac.start()?;

                self.state = LinkState::Up(params);
                log::info!("[link] up: {}", params);
                Ok(Some(LinkEvent::Up(params)))
            }
            LinkState::Up(_) => {
                if phy.link_status()? == LinkStatus::Up {
                    return Ok(None);
                }

                if let Err(e) = mac.stop() {
                    log::warn!("[link] failed to stop MAC: {}", e);
                }

                self.state = LinkState::Down;
                log::info!("[link] down");
                Ok(Some(LinkEvent::Down))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::net::phy::{PhyError, SpeedIndication};
    use crate::drivers::net::{DuplexMode, LinkSpeed};
    use crate::testing::{FakeMac, FakePhy, MacCall};

    #[test]
    fn test_waits_for_negotiation() {
        let mut monitor = LinkMonitor::new();
        let mut phy = FakePhy::default();
        let mut mac = FakeMac::new(4);

        assert_eq!(monitor.poll(&mut phy, &mut mac), Ok(None));
        assert_eq!(monitor.state(), LinkState::Down);
        assert!(mac.calls.is_empty());
    }

    #[test]
    fn test_negotiated_without_link_bit_stays_down() {
        let mut monitor = LinkMonitor::new();
        let mut phy = FakePhy::negotiated(SpeedIndication::Full100);
        phy.link = LinkStatus::Down;
        let mut mac = FakeMac::new(4);

        assert_eq!(monitor.poll(&mut phy, &mut mac), Ok(None));
        assert_eq!(monitor.state(), LinkState::Down);
        assert!(mac.calls.is_empty());

        phy.link = LinkStatus::Up;
        assert!(matches!(
            monitor.poll(&mut phy, &mut mac),
            Ok(Some(LinkEvent::Up(_)))
        ));
    }

    #[test]
    fn test_up_reconfigures_mac_before_start() {
        let mut monitor = LinkMonitor::new();
        let mut phy = FakePhy::negotiated(SpeedIndication::Full100);
        let mut mac = FakeMac::new(4);

        let params = LinkParams {
            speed: LinkSpeed::Speed100,
            duplex: DuplexMode::Full,
        };
        assert_eq!(
            monitor.poll(&mut phy, &mut mac),
            Ok(Some(LinkEvent::Up(params)))
        );
        assert_eq!(monitor.state(), LinkState::Up(params));
        assert_eq!(mac.calls, [MacCall::SetLinkParams(params), MacCall::Start]);

        assert_eq!(monitor.poll(&mut phy, &mut mac), Ok(None));
        assert_eq!(mac.calls.len(), 2);
    }

    #[test]
    fn test_all_valid_indications_map_to_table() {
        let table = [
            (SpeedIndication::Half10, LinkSpeed::Speed10, DuplexMode::Half),
            (SpeedIndication::Full10, LinkSpeed::Speed10, DuplexMode::Full),
            (SpeedIndication::Half100, LinkSpeed::Speed100, DuplexMode::Half),
            (SpeedIndication::Full100, LinkSpeed::Speed100, DuplexMode::Full),
        ];
        for (indication, speed, duplex) in table {
            let mut monitor = LinkMonitor::new();
            let mut phy = FakePhy::negotiated(indication);
            let mut mac = FakeMac::new(4);
            monitor.poll(&mut phy, &mut mac).unwrap();
            assert_eq!(monitor.state(), LinkState::Up(LinkParams { speed, duplex }));
            assert_eq!(mac.link_params, Some(LinkParams { speed, duplex }));
        }
    }

    #[test]
    fn test_invalid_indication_stays_down() {
        for bits in [0, 3, 4, 7] {
            let mut monitor = LinkMonitor::new();
            let mut phy = FakePhy::negotiated(SpeedIndication::Unknown(bits));
            let mut mac = FakeMac::new(4);
            assert_eq!(monitor.poll(&mut phy, &mut mac), Ok(None));
            assert_eq!(monitor.state(), LinkState::Down);
            assert!(mac.calls.is_empty());
        }
    }

    #[test]
    fn test_mac_failure_keeps_link_down() {
        let mut monitor = LinkMonitor::new();
        let mut phy = FakePhy::negotiated(SpeedIndication::Full10);
        let mut mac = FakeMac::new(4);
        mac.fail_set_link = true;

        assert_eq!(
            monitor.poll(&mut phy, &mut mac),
            Err(NetworkError::HardwareError)
        );
        assert_eq!(monitor.state(), LinkState::Down);
        assert!(!mac.started);
    }

    #[test]
    fn test_phy_error_reported_without_transition() {
        let mut monitor = LinkMonitor::new();
        let mut phy = FakePhy::negotiated(SpeedIndication::Full100);
        phy.fail = true;
        let mut mac = FakeMac::new(4);

        assert_eq!(
            monitor.poll(&mut phy, &mut mac),
            Err(NetworkError::Phy(PhyError::Bus))
        );
        assert_eq!(monitor.state(), LinkState::Down);
    }

    #[test]
    fn test_link_loss_publishes_down_and_stops_mac() {
        let mut monitor = LinkMonitor::new();
        let mut phy = FakePhy::negotiated(SpeedIndication::Half100);
        let mut mac = FakeMac::new(4);
        monitor.poll(&mut phy, &mut mac).unwrap();

        phy.unplug();
        assert_eq!(monitor.poll(&mut phy, &mut mac), Ok(Some(LinkEvent::Down)));
        assert_eq!(monitor.state(), LinkState::Down);
        assert_eq!(mac.calls.last(), Some(&MacCall::Stop));
        assert!(!mac.started);

        assert_eq!(monitor.poll(&mut phy, &mut mac), Ok(None));
    }
}
