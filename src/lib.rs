//! Zero-copy Ethernet datapath for a LAN8720 PHY behind an STM32 MAC/DMA
//!
//! ```text
//!   protocol stack (smoltcp)          net::stack
//!          |
//!   network I/O facade                net::netif
//!     |        |         |
//!   pool    rx/tx      link monitor + address acquisition
//!          builders       |
//!          |              |
//!   MAC/DMA engine     PHY over SMI   drivers::net
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod drivers;
pub mod net;
pub mod sync;

#[cfg(test)]
pub mod testing;

use core::fmt::{self, Write};

pub use config::{Ipv4Config, NetConfig};
pub use drivers::net::NetworkError;
pub use net::netif::NetInterface;

/// Print implementation that acquires the console lock
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // The console never fails; a missing sink just drops the text
    let _ = console::CONSOLE.lock().write_fmt(args);
}

/// Print macro for console output
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::_print(format_args!($($arg)*)));
}

/// Println macro for console output
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
