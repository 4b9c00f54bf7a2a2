pub mod collectives;
pub mod config;
pub mod error;
pub mod memory;
pub mod rendezvous;
pub mod thunk;
pub mod types;

pub use collectives::{
    CollectivesCommunicator, CollectivesInterface, ExchangeRegistry, InProcessCollectives,
};
pub use config::ThunkConfig;
pub use error::{Result, ThunkError};
pub use memory::{BufferAllocationSlice, BufferAllocations, BufferResolver, MemoryRegion};
pub use rendezvous::{
    CollectiveOpGroupMode, CollectiveOpKind, DeviceAssignment, RendezvousKey, ReplicaGroup,
};
pub use thunk::{
    AllGatherThunk, AllToAllThunk, CollectiveExecuteParams, EventPromise, ExecuteEvent,
    ExecuteParams, OpBuffers, OpParams, Thunk, ThunkInfo, ThunkKind,
};
pub use types::{DataType, GlobalDeviceId, RunId, Shape};
