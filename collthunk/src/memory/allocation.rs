use crate::error::{Result, ThunkError};
use crate::memory::MemoryRegion;

/// Index of a buffer allocation in the execution-time allocation table.
pub type AllocationIndex = usize;

/// A byte range within one buffer allocation, assigned at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferAllocationSlice {
    index: AllocationIndex,
    offset: usize,
    size: usize,
}

impl BufferAllocationSlice {
    pub fn new(index: AllocationIndex, offset: usize, size: usize) -> Self {
        Self {
            index,
            offset,
            size,
        }
    }

    pub fn index(&self) -> AllocationIndex {
        self.index
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Display for BufferAllocationSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:[{}, {})",
            self.index,
            self.offset,
            self.offset + self.size
        )
    }
}

/// Maps buffer slices to live memory for one execution.
pub trait BufferResolver: Send + Sync {
    fn resolve(&self, slice: &BufferAllocationSlice) -> Result<MemoryRegion>;
}

/// Allocation table for one execution: the base region of every allocation,
/// or `None` for allocations that were not materialized.
#[derive(Debug, Clone, Default)]
pub struct BufferAllocations {
    buffers: Vec<Option<MemoryRegion>>,
}

impl BufferAllocations {
    pub fn new(buffers: Vec<MemoryRegion>) -> Self {
        Self {
            buffers: buffers.into_iter().map(Some).collect(),
        }
    }

    /// Build a table where some allocations are left unassigned.
    pub fn with_unassigned(buffers: Vec<Option<MemoryRegion>>) -> Self {
        Self { buffers }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl BufferResolver for BufferAllocations {
    fn resolve(&self, slice: &BufferAllocationSlice) -> Result<MemoryRegion> {
        let base = match self.buffers.get(slice.index) {
            Some(Some(base)) => base,
            Some(None) => {
                return Err(ThunkError::BufferResolution {
                    slice: *slice,
                    reason: "allocation not assigned".into(),
                });
            }
            None => {
                return Err(ThunkError::BufferResolution {
                    slice: *slice,
                    reason: format!(
                        "allocation index out of range ({} allocations)",
                        self.buffers.len()
                    ),
                });
            }
        };

        base.subregion(slice.offset, slice.size)
            .ok_or_else(|| ThunkError::BufferResolution {
                slice: *slice,
                reason: format!("slice exceeds allocation of {} bytes", base.len_bytes()),
            })
    }
}
