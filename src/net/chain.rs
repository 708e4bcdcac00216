//! Packet chains and receive-side chain assembly
//!
//! A frame larger than one pool slot arrives as several receive descriptors.
//! `RxChainBuilder` turns the per-descriptor completions into one
//! `PacketChain` per frame, in hardware completion order, and never lets a
//! half-built chain escape.

use crate::net::packet_pool::PacketBuf;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// One piece of a frame
#[derive(Debug, Clone)]
pub enum Segment {
    /// Zero-copy pool slot
    Pooled(PacketBuf),
    /// Caller-owned memory (shared, so pinning is a refcount bump)
    Shared(Arc<[u8]>),
}

impl Segment {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Segment::Pooled(buf) => buf.payload(),
            Segment::Shared(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Segment::Pooled(buf) => buf.len(),
            Segment::Shared(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered segments making up one logical frame
///
/// Cloning a chain pins every segment; the clone keeps pool slots and shared
/// buffers alive independently of the original.
#[derive(Debug, Clone, Default)]
pub struct PacketChain {
    segments: Vec<Segment>,
    tot_len: usize,
}

impl PacketChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-segment chain over a copy of `data`
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_shared(Arc::from(data))
    }

    /// Single-segment chain over caller memory
    pub fn from_shared(data: Arc<[u8]>) -> Self {
        let mut chain = Self::new();
        chain.push(Segment::Shared(data));
        chain
    }

    /// Append a segment at the tail
    pub fn push(&mut self, segment: Segment) {
        self.tot_len += segment.len();
        self.segments.push(segment);
    }

    /// Sum of all segment lengths
    pub fn total_len(&self) -> usize {
        self.tot_len
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tot_len == 0
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Sole segment as a mutable pool slot, if the frame is exactly one
    /// unshared slot
    pub fn single_slot_mut(&mut self) -> Option<&mut [u8]> {
        match self.segments.as_mut_slice() {
            [Segment::Pooled(buf)] => buf.payload_mut(),
            _ => None,
        }
    }

    /// Copy the whole frame into `out`, returning the bytes written
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let mut written = 0;
        for segment in &self.segments {
            let bytes = segment.bytes();
            let n = bytes.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&bytes[..n]);
            written += n;
            if written == out.len() {
                break;
            }
        }
        written
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tot_len);
        for segment in &self.segments {
            out.extend_from_slice(segment.bytes());
        }
        out
    }
}

/// Assembles receive completions into frames
#[derive(Debug, Default)]
pub struct RxChainBuilder {
    in_progress: Option<PacketChain>,
    /// Rest of the current frame must be dropped
    discarding: bool,
    frames: usize,
    dropped: usize,
}

impl RxChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one completed descriptor
    ///
    /// `buf` carries `length` bytes. Earlier slots of the frame get `length`
    /// added to their running total, so the head always carries the frame
    /// length. Returns the finished chain on the frame's last descriptor.
    pub fn push(&mut self, buf: PacketBuf, length: usize, last: bool) -> Option<PacketChain> {
        if self.discarding {
            drop(buf);
            if last {
                self.discarding = false;
                self.dropped += 1;
                log::debug!("[rx] dropped remainder of discarded frame");
            }
            return None;
        }

        let chain = self.in_progress.get_or_insert_with(PacketChain::new);
        for segment in chain.segments.iter() {
            if let Segment::Pooled(earlier) = segment {
                earlier.add_total_len(length);
            }
        }
        chain.push(Segment::Pooled(buf));

        if !last {
            return None;
        }

        self.frames += 1;
        self.in_progress.take()
    }

    /// Throw away the frame being assembled, including descriptors of it
    /// that have not completed yet
    ///
    /// Used when the pool ran dry mid-frame or the hardware flagged the frame.
    /// Releases every slot already collected.
    pub fn discard(&mut self) {
        if let Some(partial) = self.in_progress.take() {
            log::warn!(
                "[rx] discarding partial frame ({} bytes in {} slots)",
                partial.total_len(),
                partial.segment_count()
            );
            self.discarding = true;
        }
    }

    /// Feed a descriptor the hardware flagged as bad
    ///
    /// The whole frame it belongs to is dropped: slots collected so far,
    /// this one, and any later descriptors up to the frame's last.
    pub fn reject(&mut self, buf: PacketBuf, last: bool) {
        drop(buf);
        self.in_progress = None;
        if last {
            self.discarding = false;
            self.dropped += 1;
        } else {
            self.discarding = true;
        }
    }

    /// A frame has started but its last descriptor has not arrived
    pub fn is_assembling(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Frames handed out so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Frames thrown away so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packet_pool::{PacketPool, SlotOwner};

    fn complete(pool: &Arc<PacketPool>, len: usize, byte: u8) -> PacketBuf {
        let mut rx = pool.allocate().unwrap();
        // SAFETY: test stands in for the DMA engine
        unsafe { rx.dma_mut()[..len].fill(byte) };
        pool.reclaim(rx.slot(), len)
    }

    #[test]
    fn test_three_slot_frame_scenario() {
        let pool = PacketPool::new(4);
        let mut builder = RxChainBuilder::new();
        assert_eq!(pool.free_count(), 4);

        let first = complete(&pool, 120, 1);
        let second = complete(&pool, 300, 2);
        let third = complete(&pool, 64, 3);
        let slots = [first.slot(), second.slot(), third.slot()];

        assert!(builder.push(first, 120, false).is_none());
        assert!(builder.is_assembling());
        assert!(builder.push(second, 300, false).is_none());
        let chain = builder.push(third, 64, true).unwrap();

        assert!(!builder.is_assembling());
        assert_eq!(chain.total_len(), 484);
        assert_eq!(chain.segment_count(), 3);
        assert_eq!(pool.free_count(), 1);

        let order: Vec<_> = chain
            .segments()
            .map(|s| match s {
                Segment::Pooled(buf) => buf.slot(),
                Segment::Shared(_) => panic!("unexpected shared segment"),
            })
            .collect();
        assert_eq!(order, slots);

        drop(chain);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_running_total_lengths() {
        let pool = PacketPool::new(4);
        let mut builder = RxChainBuilder::new();

        builder.push(complete(&pool, 100, 0), 100, false);
        builder.push(complete(&pool, 200, 0), 200, false);
        let chain = builder.push(complete(&pool, 50, 0), 50, true).unwrap();

        let totals: Vec<_> = chain
            .segments()
            .map(|s| match s {
                Segment::Pooled(buf) => buf.total_len(),
                Segment::Shared(_) => 0,
            })
            .collect();
        assert_eq!(totals, [350, 250, 50]);
    }

    #[test]
    fn test_frame_bytes_in_order() {
        let pool = PacketPool::new(2);
        let mut builder = RxChainBuilder::new();

        builder.push(complete(&pool, 3, 0xA), 3, false);
        let chain = builder.push(complete(&pool, 2, 0xB), 2, true).unwrap();

        assert_eq!(chain.to_vec(), [0xA, 0xA, 0xA, 0xB, 0xB]);
        let mut short = [0u8; 4];
        assert_eq!(chain.copy_to(&mut short), 4);
        assert_eq!(short, [0xA, 0xA, 0xA, 0xB]);
    }

    #[test]
    fn test_discard_mid_frame_never_delivers() {
        let pool = PacketPool::new(3);
        let mut builder = RxChainBuilder::new();

        let first = complete(&pool, 500, 0);
        let first_slot = first.slot();
        assert!(builder.push(first, 500, false).is_none());

        builder.discard();
        assert_eq!(pool.owner(first_slot), SlotOwner::Free);

        assert!(builder.push(complete(&pool, 500, 0), 500, false).is_none());
        assert!(builder.push(complete(&pool, 10, 0), 10, true).is_none());
        assert_eq!(builder.dropped(), 1);
        assert_eq!(pool.free_count(), 3);

        let next = builder.push(complete(&pool, 60, 0), 60, true).unwrap();
        assert_eq!(next.total_len(), 60);
        assert_eq!(builder.frames(), 1);
    }

    #[test]
    fn test_reject_drops_whole_frame() {
        let pool = PacketPool::new(4);
        let mut builder = RxChainBuilder::new();

        builder.push(complete(&pool, 100, 0), 100, false);
        builder.reject(complete(&pool, 100, 0), false);
        assert!(!builder.is_assembling());
        assert!(builder.push(complete(&pool, 30, 0), 30, true).is_none());
        assert_eq!(builder.dropped(), 1);

        builder.reject(complete(&pool, 64, 0), true);
        assert_eq!(builder.dropped(), 2);
        assert_eq!(pool.free_count(), 4);
        assert!(builder.push(complete(&pool, 64, 0), 64, true).is_some());
    }

    #[test]
    fn test_discard_when_idle_is_noop() {
        let pool = PacketPool::new(1);
        let mut builder = RxChainBuilder::new();
        builder.discard();
        assert!(builder.push(complete(&pool, 42, 0), 42, true).is_some());
    }

    #[test]
    fn test_single_slot_mut_needs_unshared_slot() {
        let pool = PacketPool::new(1);
        let mut chain = PacketChain::new();
        chain.push(Segment::Pooled(complete(&pool, 8, 7)));
        assert_eq!(chain.single_slot_mut().map(|b| b.len()), Some(8));

        let pin = chain.clone();
        assert!(chain.single_slot_mut().is_none());
        drop(pin);

        let mut shared = PacketChain::from_slice(&[1, 2, 3]);
        assert!(shared.single_slot_mut().is_none());
        assert_eq!(shared.total_len(), 3);
    }
}
