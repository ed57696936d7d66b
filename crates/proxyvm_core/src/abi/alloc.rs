//! Guest allocator used for host-to-guest data transfer.
//!
//! # Responsibility
//! - Hand out guest memory when the host needs to return bytes.
//! - Reclaim that memory exactly once, through `ReturnData` or `OwnedBuffer`.
//!
//! # Invariants
//! - Every block comes from a boxed slice of exactly the requested length.
//! - The live counter is per thread; one VM instance runs on one thread.

use std::cell::Cell;
use std::ptr;

thread_local! {
    static LIVE_ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

/// Allocates `size` zeroed bytes for the host to fill.
///
/// This backs the `proxy_on_memory_allocate` export. The returned block stays
/// live until a `ReturnData` slot or an `OwnedBuffer` reclaims it.
pub fn allocate(size: usize) -> *mut u8 {
    let block = vec![0u8; size].into_boxed_slice();
    LIVE_ALLOCATIONS.with(|live| live.set(live.get() + 1));
    Box::into_raw(block).cast::<u8>()
}

/// Allocates a block and copies `bytes` into it.
///
/// Used by in-process hosts that play the role of the proxy.
pub fn allocate_copy(bytes: &[u8]) -> (*mut u8, usize) {
    let ptr = allocate(bytes.len());
    // SAFETY: `allocate` returned a fresh block of exactly `bytes.len()` bytes.
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
    (ptr, bytes.len())
}

/// Number of host-sourced blocks not yet released on this thread.
pub fn live_allocations() -> usize {
    LIVE_ALLOCATIONS.with(Cell::get)
}

/// Takes ownership of a block produced by [`allocate`].
///
/// # Safety
/// `ptr` must come from one earlier `allocate(len)` call on this thread and
/// must not have been reclaimed before.
pub(crate) unsafe fn reclaim(ptr: *mut u8, len: usize) -> Box<[u8]> {
    Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len))
}

pub(crate) fn note_released() {
    LIVE_ALLOCATIONS.with(|live| live.set(live.get().saturating_sub(1)));
}

/// Out-parameter slot for host-allocated guest memory.
///
/// The host writes a pointer/length pair here. Whatever is left in the slot
/// when it drops is released, so a status failure that still returned data
/// cannot leak.
#[derive(Debug)]
pub struct ReturnData {
    ptr: *mut u8,
    len: usize,
}

impl ReturnData {
    pub fn new() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    /// Stores a block previously obtained from [`allocate`].
    ///
    /// # Safety
    /// Same contract as [`reclaim`]; the slot becomes the block's owner.
    pub unsafe fn fill(&mut self, ptr: *mut u8, len: usize) {
        self.release_current();
        self.ptr = ptr;
        self.len = len;
    }

    /// Copies `bytes` into a fresh guest block owned by this slot.
    pub fn fill_copy(&mut self, bytes: &[u8]) {
        let (ptr, len) = allocate_copy(bytes);
        // SAFETY: the block was allocated just above and is owned by nobody else.
        unsafe { self.fill(ptr, len) };
    }

    /// Pointer and length out-parameters for ABI imports.
    ///
    /// Any block still held is released first; the host overwrites both.
    pub fn out_params(&mut self) -> (*mut *mut u8, *mut usize) {
        self.release_current();
        (&mut self.ptr, &mut self.len)
    }

    pub fn is_filled(&self) -> bool {
        !self.ptr.is_null()
    }

    pub(crate) fn take(&mut self) -> Option<(*mut u8, usize)> {
        if self.ptr.is_null() {
            return None;
        }
        let taken = (self.ptr, self.len);
        self.ptr = ptr::null_mut();
        self.len = 0;
        Some(taken)
    }

    fn release_current(&mut self) {
        if let Some((ptr, len)) = self.take() {
            // SAFETY: the slot owned this block exclusively.
            drop(unsafe { reclaim(ptr, len) });
            note_released();
        }
    }
}

impl Default for ReturnData {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReturnData {
    fn drop(&mut self) {
        self.release_current();
    }
}

#[cfg(test)]
mod tests {
    use super::{live_allocations, ReturnData};

    #[test]
    fn unadopted_return_data_is_released_on_drop() {
        let baseline = live_allocations();
        {
            let mut slot = ReturnData::new();
            slot.fill_copy(b"orphan");
            assert!(slot.is_filled());
            assert_eq!(live_allocations(), baseline + 1);
        }
        assert_eq!(live_allocations(), baseline);
    }

    #[test]
    fn refilling_a_slot_releases_the_previous_block() {
        let baseline = live_allocations();
        let mut slot = ReturnData::new();
        slot.fill_copy(b"first");
        slot.fill_copy(b"second");
        assert_eq!(live_allocations(), baseline + 1);
        drop(slot);
        assert_eq!(live_allocations(), baseline);
    }

    #[test]
    fn out_params_accept_a_host_written_block() {
        let baseline = live_allocations();
        let mut slot = ReturnData::new();
        let (ptr_out, len_out) = slot.out_params();
        let (block, len) = super::allocate_copy(b"host bytes");
        // SAFETY: both out-parameters point into `slot`, which outlives the writes.
        unsafe {
            *ptr_out = block;
            *len_out = len;
        }
        assert!(slot.is_filled());
        assert_eq!(live_allocations(), baseline + 1);
        drop(slot);
        assert_eq!(live_allocations(), baseline);
    }
}
