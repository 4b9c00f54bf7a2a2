mod allocation;
mod region;

pub use allocation::{AllocationIndex, BufferAllocationSlice, BufferAllocations, BufferResolver};
pub use region::MemoryRegion;
