//! Device drivers subsystem
//!
//! Organized by device class:
//! - `net`: Ethernet MAC/DMA engines and PHYs

pub mod net;
