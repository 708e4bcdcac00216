//! Datapath core
//!
//! Hardware-independent half of the interface: buffer pool, receive chain
//! assembly, transmit fragment lists, link monitoring, address acquisition and
//! the facade tying them to a `MacDma` engine and a PHY.

pub mod chain;
pub mod dhcp;
pub mod ethernet;
pub mod link;
pub mod netif;
pub mod packet_pool;
pub mod stack;
pub mod tx;

// Re-export commonly used types
pub use chain::{PacketChain, RxChainBuilder, Segment};
pub use dhcp::{AddressAcquisition, AddressEvent, AddressProtocol, DhcpState};
pub use ethernet::MacAddress;
pub use link::{LinkEvent, LinkMonitor, LinkState};
pub use netif::{InterfaceStats, NetInterface, PacketConsumer, TickEvents};
pub use packet_pool::{PacketBuf, PacketPool, RxBuffer, SlotId};
pub use stack::{DhcpClient, NetStack};
pub use tx::{TxFragment, TxFragmentList};
