//! Raw host memory regions handed to collective primitives.
//!
//! A `MemoryRegion` is a `u64` address plus a byte length. Creating one from
//! a slice is safe; every read or write through the address is not, and the
//! caller of the primitive that dereferences it carries the obligation.

/// A sized region of host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    ptr: u64,
    len_bytes: usize,
}

impl MemoryRegion {
    /// Wrap a raw address and length.
    ///
    /// # Safety
    /// `ptr` must point to at least `len_bytes` of valid memory for as long as
    /// the region (or any subregion) is used to access it.
    pub unsafe fn new(ptr: u64, len_bytes: usize) -> Self {
        Self { ptr, len_bytes }
    }

    /// Capture the address and length of a mutable byte slice.
    ///
    /// The region does not borrow the slice. The owner must keep the memory
    /// alive, and must not touch it while a collective writes into it.
    pub fn from_slice(buf: &mut [u8]) -> Self {
        Self {
            ptr: buf.as_mut_ptr() as u64,
            len_bytes: buf.len(),
        }
    }

    /// Get the raw `u64` address.
    pub fn as_u64(&self) -> u64 {
        self.ptr
    }

    /// Size of the region in bytes.
    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    /// Returns true if the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len_bytes == 0
    }

    /// The `size`-byte region starting `offset` bytes into this one, or
    /// `None` if it would extend past the end.
    pub fn subregion(&self, offset: usize, size: usize) -> Option<MemoryRegion> {
        let end = offset.checked_add(size)?;
        if end > self.len_bytes {
            return None;
        }
        Some(MemoryRegion {
            ptr: self.ptr + offset as u64,
            len_bytes: size,
        })
    }
}

impl std::fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryRegion(0x{:x}, {}B)", self.ptr, self.len_bytes)
    }
}
