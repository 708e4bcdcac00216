//! Zero-copy Receive Buffer Pool
//!
//! This module provides the fixed-capacity pool of DMA receive buffers shared
//! between the Ethernet DMA engine and the packet consumer. The DMA engine
//! writes frames straight into pool slots; the same memory is then handed to
//! the consumer as a `PacketBuf` without copying.
//!
//! ## Architecture
//!
//! - **Arena of slots**: slots are addressed by `SlotId` (an index), never by
//!   pointer arithmetic on the payload address
//! - **Ownership protocol**: every slot is exactly one of `Free`, `Hardware`
//!   (armed in a receive descriptor) or `Software` (held by one or more
//!   `PacketBuf` handles)
//! - **Reference counting**: cloning a `PacketBuf` pins the slot (e.g. while a
//!   transmit descriptor points at it); the last drop returns it to the pool
//! - **Critical section**: the free list and exhaustion flag are updated under
//!   the interrupt-masking `Mutex`, so a DMA completion handler may release
//!   slots concurrently with the poll loop
//!
//! ## Exhaustion
//!
//! `allocate()` never blocks. When the free list is empty it fails and raises
//! the exhaustion flag; the receive path then stops arming descriptors. The
//! next successful release clears the flag, which is the facade's cue to
//! re-arm hardware refill.

use crate::config::RX_BUFFER_SIZE;
use crate::drivers::net::NetworkError;
use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;

/// DMA buffer alignment (cache line / burst size)
pub const RX_BUFFER_ALIGN: usize = 32;

#[repr(C, align(32))]
struct SlotStorage([u8; RX_BUFFER_SIZE]);

const _: () = assert!(core::mem::align_of::<SlotStorage>() == RX_BUFFER_ALIGN);

/// Handle of one pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u16);

impl SlotId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Who currently owns a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    Free,
    Hardware,
    Software,
}

#[derive(Clone, Copy)]
struct SlotHeader {
    owner: SlotOwner,
    refcount: u16,
    /// Bytes of frame data in this slot
    len: u16,
    /// This slot's length plus the lengths of all later slots in its chain
    tot_len: u32,
}

impl SlotHeader {
    const FREE: Self = Self {
        owner: SlotOwner::Free,
        refcount: 0,
        len: 0,
        tot_len: 0,
    };
}

struct PoolState {
    headers: Vec<SlotHeader>,
    free_list: Vec<SlotId>,
    exhausted: bool,
    alloc_count: usize,
    free_count: usize,
    alloc_failures: usize,
}

/// Snapshot of slot ownership; the three counts always sum to capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCensus {
    pub free: usize,
    pub hardware: usize,
    pub software: usize,
}

impl PoolCensus {
    pub fn total(&self) -> usize {
        self.free + self.hardware + self.software
    }
}

/// Packet pool statistics
#[derive(Debug, Clone, Copy)]
pub struct PacketPoolStats {
    /// Total allocations
    pub alloc_count: usize,

    /// Total releases back to the free list
    pub free_count: usize,

    /// Allocation failures (pool exhausted)
    pub alloc_failures: usize,
}

/// Fixed-capacity pool of aligned receive buffers
pub struct PacketPool {
    storage: Box<[UnsafeCell<SlotStorage>]>,
    state: Mutex<PoolState>,
}

// SAFETY: slot memory is only written by the DMA engine while the slot is
// Hardware-owned, and only through a unique `PacketBuf` (refcount 1) while it
// is Software-owned. All bookkeeping goes through `state`.
unsafe impl Sync for PacketPool {}

impl PacketPool {
    /// Create a pool of `capacity` slots, all free
    ///
    /// # Panics
    /// Panics if `capacity` is zero or does not fit a `SlotId`.
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(
            capacity > 0 && capacity <= u16::MAX as usize,
            "Invalid pool capacity: {}",
            capacity
        );

        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(SlotStorage([0u8; RX_BUFFER_SIZE])))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        // Reversed so the first allocation hands out slot 0
        let free_list = (0..capacity as u16).rev().map(SlotId).collect();

        Arc::new(Self {
            storage,
            state: Mutex::new(PoolState {
                headers: alloc::vec![SlotHeader::FREE; capacity],
                free_list,
                exhausted: false,
                alloc_count: 0,
                free_count: 0,
                alloc_failures: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Size of every slot in bytes
    pub const fn buffer_size(&self) -> usize {
        RX_BUFFER_SIZE
    }

    /// Take a free slot for the DMA engine
    ///
    /// The slot becomes Hardware-owned. On an empty free list this fails with
    /// `PoolExhausted` and raises the exhaustion flag.
    pub fn allocate(&self) -> Result<RxBuffer, NetworkError> {
        let mut state = self.state.lock();

        let slot = match state.free_list.pop() {
            Some(slot) => slot,
            None => {
                state.alloc_failures += 1;
                if !state.exhausted {
                    state.exhausted = true;
                    log::warn!("[pool] exhausted, receive refill paused");
                }
                return Err(NetworkError::PoolExhausted);
            }
        };

        let header = &mut state.headers[slot.index()];
        assert_eq!(header.owner, SlotOwner::Free, "Free list holds busy {}", slot);
        header.owner = SlotOwner::Hardware;
        state.alloc_count += 1;
        drop(state);

        Ok(RxBuffer {
            slot,
            addr: self.slot_ptr(slot),
            capacity: RX_BUFFER_SIZE,
        })
    }

    /// Take a Hardware-owned slot back after DMA completion
    ///
    /// The slot becomes Software-owned with one reference and `len` bytes of
    /// data.
    ///
    /// # Panics
    /// Panics if the slot is not Hardware-owned.
    pub fn reclaim(self: &Arc<Self>, slot: SlotId, len: usize) -> PacketBuf {
        let len = len.min(RX_BUFFER_SIZE);
        {
            let mut state = self.state.lock();
            let header = &mut state.headers[slot.index()];
            assert_eq!(
                header.owner,
                SlotOwner::Hardware,
                "Reclaim of {} not owned by hardware",
                slot
            );
            *header = SlotHeader {
                owner: SlotOwner::Software,
                refcount: 1,
                len: len as u16,
                tot_len: len as u32,
            };
        }

        PacketBuf {
            pool: Arc::clone(self),
            slot,
        }
    }

    /// Return a Hardware-owned slot that never carried a frame (descriptor
    /// torn down, or the driver refused the buffer)
    ///
    /// # Panics
    /// Panics if the slot is not Hardware-owned.
    pub fn abandon(&self, slot: SlotId) {
        let mut state = self.state.lock();
        assert_eq!(
            state.headers[slot.index()].owner,
            SlotOwner::Hardware,
            "Abandon of {} not owned by hardware",
            slot
        );
        Self::push_free(&mut state, slot);
    }

    /// True while allocation has failed and no slot has been released since
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().exhausted
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Count slots per owner
    pub fn census(&self) -> PoolCensus {
        let state = self.state.lock();
        let mut census = PoolCensus {
            free: 0,
            hardware: 0,
            software: 0,
        };
        for header in state.headers.iter() {
            match header.owner {
                SlotOwner::Free => census.free += 1,
                SlotOwner::Hardware => census.hardware += 1,
                SlotOwner::Software => census.software += 1,
            }
        }
        census
    }

    pub fn owner(&self, slot: SlotId) -> SlotOwner {
        self.state.lock().headers[slot.index()].owner
    }

    /// Get pool statistics
    pub fn stats(&self) -> PacketPoolStats {
        let state = self.state.lock();
        PacketPoolStats {
            alloc_count: state.alloc_count,
            free_count: state.free_count,
            alloc_failures: state.alloc_failures,
        }
    }

    fn slot_ptr(&self, slot: SlotId) -> *mut u8 {
        self.storage[slot.index()].get() as *mut u8
    }

    fn header(&self, slot: SlotId) -> SlotHeader {
        self.state.lock().headers[slot.index()]
    }

    fn update_header(&self, slot: SlotId, f: impl FnOnce(&mut SlotHeader)) {
        let mut state = self.state.lock();
        let header = &mut state.headers[slot.index()];
        assert_eq!(header.owner, SlotOwner::Software);
        f(header);
    }

    fn retain(&self, slot: SlotId) {
        self.update_header(slot, |header| {
            header.refcount = header
                .refcount
                .checked_add(1)
                .unwrap_or_else(|| panic!("Refcount overflow on {}", slot));
        });
    }

    fn release(&self, slot: SlotId) {
        let mut state = self.state.lock();
        let header = &mut state.headers[slot.index()];
        assert!(
            header.owner == SlotOwner::Software && header.refcount > 0,
            "Double release of {}",
            slot
        );

        header.refcount -= 1;
        if header.refcount == 0 {
            Self::push_free(&mut state, slot);
        }
    }

    fn push_free(state: &mut PoolState, slot: SlotId) {
        state.headers[slot.index()] = SlotHeader::FREE;
        state.free_list.push(slot);
        state.free_count += 1;
        if state.exhausted {
            state.exhausted = false;
            log::info!("[pool] {} released, receive refill re-armed", slot);
        }
    }
}

/// A free slot on its way to a receive descriptor
///
/// Holding an `RxBuffer` means the slot is Hardware-owned. Hand it to
/// `MacDma::rx_provide()`, or give it back with `PacketPool::abandon()`.
#[derive(Debug)]
pub struct RxBuffer {
    slot: SlotId,
    addr: *mut u8,
    capacity: usize,
}

impl RxBuffer {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Start address for the descriptor's buffer pointer
    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// View the slot memory the way the DMA engine sees it
    ///
    /// # Safety
    /// No descriptor may be using this buffer, and the slot must still be
    /// Hardware-owned (not yet reclaimed).
    pub unsafe fn dma_mut(&mut self) -> &mut [u8] {
        // SAFETY: caller guarantees exclusive access to the slot memory
        unsafe { core::slice::from_raw_parts_mut(self.addr, self.capacity) }
    }
}

/// Software handle on a received slot
///
/// Clones share the slot (reference count); the last drop releases it.
pub struct PacketBuf {
    pool: Arc<PacketPool>,
    slot: SlotId,
}

impl PacketBuf {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Bytes of frame data in this slot
    pub fn len(&self) -> usize {
        self.pool.header(self.slot).len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// This slot's length plus the lengths of all later slots in its chain
    pub fn total_len(&self) -> usize {
        self.pool.header(self.slot).tot_len as usize
    }

    pub(crate) fn add_total_len(&self, len: usize) {
        self.pool
            .update_header(self.slot, |header| header.tot_len += len as u32);
    }

    /// Number of live handles on this slot
    pub fn ref_count(&self) -> usize {
        self.pool.header(self.slot).refcount as usize
    }

    pub fn payload(&self) -> &[u8] {
        let len = self.len();
        // SAFETY: the slot is Software-owned for as long as this handle lives;
        // nobody writes it except through a unique handle (`payload_mut`).
        unsafe { core::slice::from_raw_parts(self.pool.slot_ptr(self.slot), len) }
    }

    /// Mutable payload, only while this is the sole handle
    pub fn payload_mut(&mut self) -> Option<&mut [u8]> {
        let header = self.pool.header(self.slot);
        if header.refcount != 1 {
            return None;
        }
        // SAFETY: refcount 1 and `&mut self` make this the only access path
        Some(unsafe {
            core::slice::from_raw_parts_mut(self.pool.slot_ptr(self.slot), header.len as usize)
        })
    }
}

impl Clone for PacketBuf {
    fn clone(&self) -> Self {
        self.pool.retain(self.slot);
        Self {
            pool: Arc::clone(&self.pool),
            slot: self.slot,
        }
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.pool.header(self.slot);
        f.debug_struct("PacketBuf")
            .field("slot", &self.slot)
            .field("len", &header.len)
            .field("tot_len", &header.tot_len)
            .field("refcount", &header.refcount)
            .finish()
    }
}
