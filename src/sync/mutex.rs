//! Interrupt-masking mutex
//!
//! `Mutex` is a spinlock that masks interrupts while the lock is held. The
//! receive path may touch the buffer pool from a DMA completion interrupt as
//! well as from the main poll loop, so every read-modify-write of the pool's
//! free list runs inside one of these.
//!
//! ```text
//! 1. Poll loop takes the pool lock
//! 2. DMA RX interrupt fires and wants the same lock
//! 3. Handler spins forever, poll loop never resumes
//! ```
//!
//! Masking interrupts for the (short) lifetime of the guard rules this out.
//!
//! ## Targets
//!
//! - Cortex-M: PRIMASK is saved, `cpsid i` masks, restore re-enables only if
//!   interrupts were enabled on entry (nesting-safe).
//! - AArch64: DAIF is saved and the IRQ bit set.
//! - Anything else (host tests): interrupt masking is a no-op.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Mutex that masks interrupts while locked
///
/// # Example
/// ```ignore
/// let state = Mutex::new(PoolState::new(10));
///
/// let mut state = state.lock();
/// state.free_list.push(slot);
/// // Interrupts restored when guard is dropped
/// ```
pub struct Mutex<T> {
    inner: UnsafeCell<T>,
    locked: AtomicBool,
}

// SAFETY: access to `inner` is serialised by the `locked` flag, and interrupts
// are masked for as long as the flag is held.
unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new mutex
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock (masks interrupts)
    ///
    /// Returns a guard that restores the interrupt state when dropped.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let irq_state = IrqState::disable();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        MutexGuard {
            mutex: self,
            irq_state,
        }
    }

    /// Try to acquire the lock without spinning
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let irq_state = IrqState::disable();
        match self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Some(MutexGuard {
                mutex: self,
                irq_state,
            }),
            Err(_) => {
                irq_state.restore();
                None
            }
        }
    }

    /// Consume the mutex, returning the protected value
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Guard returned by `Mutex::lock()`
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    irq_state: IrqState,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: lock is held, so we have exclusive access
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: lock is held, so we have exclusive access
        unsafe { &mut *self.mutex.inner.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.irq_state.restore();
    }
}

/// Saved interrupt mask state
struct IrqState {
    saved: u64,
}

impl IrqState {
    /// Mask interrupts and return the previous state
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    fn disable() -> Self {
        let primask: u32;

        // SAFETY: reading PRIMASK and executing `cpsid i` are always permitted in
        // privileged thread/handler mode and only affect interrupt delivery.
        unsafe {
            core::arch::asm!("mrs {}, PRIMASK", out(reg) primask, options(nomem, nostack, preserves_flags));
            core::arch::asm!("cpsid i", options(nomem, nostack, preserves_flags));
        }

        Self {
            saved: primask as u64,
        }
    }

    /// Restore the interrupt state saved by `disable`
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    fn restore(&self) {
        // PRIMASK bit 0 set means interrupts were already masked on entry
        if self.saved & 1 == 0 {
            // SAFETY: re-enabling interrupts that were enabled before `disable`
            unsafe {
                core::arch::asm!("cpsie i", options(nomem, nostack, preserves_flags));
            }
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn disable() -> Self {
        let daif: u64;

        // SAFETY: DAIF is accessible at EL1; the old value is saved for restore.
        unsafe {
            core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
            core::arch::asm!("msr daifset, #2", options(nomem, nostack));
        }

        Self { saved: daif }
    }

    #[cfg(target_arch = "aarch64")]
    fn restore(&self) {
        // SAFETY: writing back a DAIF value previously read from the register
        unsafe {
            core::arch::asm!("msr daif, {}", in(reg) self.saved, options(nomem, nostack));
        }
    }

    #[cfg(not(any(all(target_arch = "arm", target_os = "none"), target_arch = "aarch64")))]
    fn disable() -> Self {
        Self { saved: 0 }
    }

    #[cfg(not(any(all(target_arch = "arm", target_os = "none"), target_arch = "aarch64")))]
    fn restore(&self) {
        let _ = self.saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_gives_exclusive_access() {
        let mutex = Mutex::new(5u32);
        {
            let mut guard = mutex.lock();
            *guard += 1;
            assert!(mutex.try_lock().is_none());
        }
        assert_eq!(*mutex.lock(), 6);
    }

    #[test]
    fn test_try_lock_after_release() {
        let mutex = Mutex::new(());
        let guard = mutex.lock();
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn test_into_inner() {
        let mutex = Mutex::new([1u8, 2, 3]);
        assert_eq!(mutex.into_inner(), [1, 2, 3]);
    }
}
