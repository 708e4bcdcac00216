//! Ethernet MAC controllers, grouped by vendor

pub mod stm;
