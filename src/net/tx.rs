//! Transmit fragment mapping
//!
//! Maps an outbound `PacketChain` onto the transmit descriptor ring: one
//! descriptor per non-empty segment, linked in chain order, last link empty.
//! The list only borrows the chain; the caller pins the chain (clones it)
//! for as long as the hardware reads from it.

use crate::config::TX_DESC_COUNT;
use crate::drivers::net::NetworkError;
use crate::net::chain::PacketChain;
use crate::net::ethernet::MAX_FRAME_SIZE;

/// One transmit descriptor's worth of payload
#[derive(Debug, Clone, Copy)]
pub struct TxFragment<'a> {
    pub data: &'a [u8],
    /// Index of the following fragment, `None` on the last
    pub next: Option<usize>,
}

impl TxFragment<'_> {
    pub fn addr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Bounded descriptor list for one outbound frame
#[derive(Debug)]
pub struct TxFragmentList<'a> {
    entries: [Option<TxFragment<'a>>; TX_DESC_COUNT],
    count: usize,
    total_len: usize,
}

impl<'a> TxFragmentList<'a> {
    /// Map `chain` onto at most `ring_depth` descriptors
    ///
    /// Fails without partial output if the chain is empty, longer than a
    /// frame, or split into more fragments than the ring holds.
    pub fn build(chain: &'a PacketChain, ring_depth: usize) -> Result<Self, NetworkError> {
        let capacity = ring_depth.min(TX_DESC_COUNT);

        if chain.is_empty() {
            return Err(NetworkError::EmptyFrame);
        }
        if chain.total_len() > MAX_FRAME_SIZE {
            return Err(NetworkError::FrameTooLarge);
        }

        let fragments = chain.segments().filter(|s| !s.is_empty()).count();
        if fragments > capacity {
            return Err(NetworkError::TooManyFragments {
                fragments,
                capacity,
            });
        }

        let mut entries: [Option<TxFragment<'a>>; TX_DESC_COUNT] = [None; TX_DESC_COUNT];
        let mut count = 0;
        for segment in chain.segments().filter(|s| !s.is_empty()) {
            if count > 0
                && let Some(prev) = entries[count - 1].as_mut()
            {
                prev.next = Some(count);
            }
            entries[count] = Some(TxFragment {
                data: segment.bytes(),
                next: None,
            });
            count += 1;
        }

        Ok(Self {
            entries,
            count,
            total_len: chain.total_len(),
        })
    }

    /// Number of descriptors needed
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn get(&self, index: usize) -> Option<&TxFragment<'a>> {
        self.entries.get(index).and_then(|e| e.as_ref())
    }

    /// Fragments in descriptor order
    pub fn iter(&self) -> impl Iterator<Item = &TxFragment<'a>> {
        self.entries[..self.count].iter().flatten()
    }

    /// Follow the `next` links from the first fragment
    pub fn walk(&self) -> impl Iterator<Item = &TxFragment<'a>> {
        let mut cursor = if self.count > 0 { Some(0) } else { None };
        core::iter::from_fn(move || {
            let fragment = self.get(cursor?)?;
            cursor = fragment.next;
            Some(fragment)
        })
    }
}
