//! Owned host bytes.

use crate::abi::alloc::{self, ReturnData};
use crate::error::{HostError, HostResult};
use std::fmt::{Debug, Formatter};
use std::ops::Deref;

/// Byte sequence obtained from the host and exclusively owned by its holder.
///
/// # Invariants
/// - Not `Clone`: exactly one owner exists.
/// - Release happens once, in `Drop`; `into_vec` hands the bytes over and
///   still counts as that release.
pub struct OwnedBuffer {
    bytes: Box<[u8]>,
    host_sourced: bool,
}

impl OwnedBuffer {
    /// Empty buffer for calls where the host returned no data.
    pub fn empty() -> Self {
        Self {
            bytes: Box::default(),
            host_sourced: false,
        }
    }

    /// Adopts whatever the host left in `slot`.
    pub(crate) fn adopt(slot: &mut ReturnData) -> Self {
        match slot.take() {
            Some((ptr, len)) => Self {
                // SAFETY: the slot held the only reference to a block made by
                // `alloc::allocate`, and `take` cleared it.
                bytes: unsafe { alloc::reclaim(ptr, len) },
                host_sourced: true,
            },
            None => Self::empty(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads the bytes as UTF-8 text.
    pub fn as_str(&self) -> HostResult<&str> {
        std::str::from_utf8(&self.bytes).map_err(|_| HostError::SerializationError)
    }

    /// Moves the bytes out of the buffer.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes).into_vec()
    }
}

impl Deref for OwnedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for OwnedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Debug for OwnedBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedBuffer")
            .field("len", &self.bytes.len())
            .field("host_sourced", &self.host_sourced)
            .finish()
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        if self.host_sourced {
            alloc::note_released();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OwnedBuffer;
    use crate::abi::alloc::live_allocations;
    use crate::abi::ReturnData;
    use crate::error::HostError;

    #[test]
    fn adopting_an_empty_slot_yields_an_untracked_buffer() {
        let baseline = live_allocations();
        let mut slot = ReturnData::new();
        let buffer = OwnedBuffer::adopt(&mut slot);
        assert!(buffer.is_empty());
        drop(buffer);
        assert_eq!(live_allocations(), baseline);
    }

    #[test]
    fn adopted_buffer_releases_once_whether_dropped_or_consumed() {
        let baseline = live_allocations();

        let mut slot = ReturnData::new();
        slot.fill_copy(b"hello");
        let buffer = OwnedBuffer::adopt(&mut slot);
        drop(slot);
        assert_eq!(live_allocations(), baseline + 1);
        assert_eq!(buffer.as_str(), Ok("hello"));
        drop(buffer);
        assert_eq!(live_allocations(), baseline);

        let mut slot = ReturnData::new();
        slot.fill_copy(b"world");
        let bytes = OwnedBuffer::adopt(&mut slot).into_vec();
        assert_eq!(bytes, b"world");
        assert_eq!(live_allocations(), baseline);
    }

    #[test]
    fn rejects_non_utf8_text() {
        let mut slot = ReturnData::new();
        slot.fill_copy(&[0xff, 0xfe]);
        let buffer = OwnedBuffer::adopt(&mut slot);
        assert_eq!(buffer.as_str(), Err(HostError::SerializationError));
    }
}
