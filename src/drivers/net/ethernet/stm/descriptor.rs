//! Normal (4-word) DMA descriptors of the STM32F4 Ethernet block
//!
//! Both rings use chained mode: word 3 holds the address of the next
//! descriptor, so the rings can be any length and live anywhere in SRAM.

use volatile::Volatile;

// TDES0
pub const TDES0_OWN: u32 = 1 << 31;
pub const TDES0_IC: u32 = 1 << 30;
pub const TDES0_LS: u32 = 1 << 29;
pub const TDES0_FS: u32 = 1 << 28;
/// IP header and payload checksum insertion with pseudo-header
pub const TDES0_CIC_FULL: u32 = 0b11 << 22;
pub const TDES0_TCH: u32 = 1 << 20;
pub const TDES0_ES: u32 = 1 << 15;

// TDES1
pub const TDES1_TBS1_MASK: u32 = 0x1FFF;

// RDES0
pub const RDES0_OWN: u32 = 1 << 31;
pub const RDES0_FL_SHIFT: u32 = 16;
pub const RDES0_FL_MASK: u32 = 0x3FFF;
pub const RDES0_ES: u32 = 1 << 15;
pub const RDES0_FS: u32 = 1 << 9;
pub const RDES0_LS: u32 = 1 << 8;

// RDES1
pub const RDES1_RCH: u32 = 1 << 14;
pub const RDES1_RBS1_MASK: u32 = 0x1FFF;

#[repr(C, align(16))]
pub struct DmaDescriptor {
    /// Status / ownership
    des0: Volatile<u32>,
    /// Control / buffer size
    des1: Volatile<u32>,
    /// Buffer address
    des2: Volatile<u32>,
    /// Next descriptor address (chained mode)
    des3: Volatile<u32>,
}

impl Default for DmaDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaDescriptor {
    pub fn new() -> Self {
        Self {
            des0: Volatile::new(0),
            des1: Volatile::new(0),
            des2: Volatile::new(0),
            des3: Volatile::new(0),
        }
    }

    #[inline]
    pub fn status(&self) -> u32 {
        self.des0.read()
    }

    #[inline]
    pub fn set_status(&mut self, value: u32) {
        self.des0.write(value);
    }

    #[inline]
    pub fn control(&self) -> u32 {
        self.des1.read()
    }

    #[inline]
    pub fn set_control(&mut self, value: u32) {
        self.des1.write(value);
    }

    #[inline]
    pub fn buffer(&self) -> u32 {
        self.des2.read()
    }

    #[inline]
    pub fn set_buffer(&mut self, addr: u32) {
        self.des2.write(addr);
    }

    #[inline]
    pub fn next(&self) -> u32 {
        self.des3.read()
    }

    #[inline]
    pub fn set_next(&mut self, addr: u32) {
        self.des3.write(addr);
    }

    /// True while the DMA engine owns the descriptor (same bit on both rings)
    #[inline]
    pub fn is_dma_owned(&self) -> bool {
        self.status() & TDES0_OWN != 0
    }

    /// Frame length reported in RDES0, CRC included
    #[inline]
    pub fn rx_frame_length(&self) -> usize {
        ((self.status() >> RDES0_FL_SHIFT) & RDES0_FL_MASK) as usize
    }
}

/// Allocate `count` descriptors and link them into a circle
pub fn chained_ring(count: usize) -> alloc::boxed::Box<[DmaDescriptor]> {
    let mut ring: alloc::boxed::Box<[DmaDescriptor]> =
        (0..count).map(|_| DmaDescriptor::new()).collect();

    for i in 0..count {
        let next = &ring[(i + 1) % count] as *const DmaDescriptor as usize as u32;
        ring[i].set_next(next);
    }
    ring
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_descriptor_is_cleared() {
        let desc = DmaDescriptor::default();
        assert_eq!(desc.status(), 0);
        assert_eq!(desc.control(), 0);
        assert_eq!(desc.buffer(), 0);
        assert_eq!(desc.next(), 0);
        assert!(!desc.is_dma_owned());
    }

    #[test]
    fn test_ring_is_circular() {
        let ring = chained_ring(4);
        for i in 0..4 {
            let expected = &ring[(i + 1) % 4] as *const DmaDescriptor as usize as u32;
            assert_eq!(ring[i].next(), expected);
        }
    }

    #[test]
    fn test_rx_frame_length_field() {
        let mut desc = DmaDescriptor::new();
        desc.set_status(RDES0_FS | RDES0_LS | (68 << RDES0_FL_SHIFT));
        assert_eq!(desc.rx_frame_length(), 68);
        assert!(!desc.is_dma_owned());

        desc.set_status(RDES0_OWN);
        assert!(desc.is_dma_owned());
    }
}
