//! Network device drivers and abstractions

pub mod ethernet;
pub mod netdev;
pub mod phy;

// Re-export the MacDma contract and its types for convenience
pub use netdev::*;
