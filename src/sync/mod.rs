//! Synchronization primitives
//!
//! The datapath runs in a single cooperative poll loop. State that may also be
//! reached from interrupt context (the buffer pool, the DHCP mailbox) sits
//! behind the interrupt-masking `Mutex` below.

pub mod mutex;

pub use mutex::Mutex;
