//! Executable collective thunks.
//!
//! A thunk is created once from compile-time metadata and executed by the
//! scheduler once per run. `execute` never blocks: it returns an
//! [`ExecuteEvent`] that resolves when the collective finishes.

mod all_gather;
mod all_to_all;
mod collective;
mod event;

pub use all_gather::AllGatherThunk;
pub use all_to_all::AllToAllThunk;
pub use collective::{
    CollectiveExecuteParams, CollectiveThunk, OpBuffers, OpDeviceMemory, OpParams,
};
pub use event::{EventPromise, ExecuteEvent};

use crate::memory::BufferResolver;

/// The collective a thunk performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThunkKind {
    AllGather,
    AllToAll,
}

impl ThunkKind {
    pub const fn name(self) -> &'static str {
        match self {
            ThunkKind::AllGather => "all-gather",
            ThunkKind::AllToAll => "all-to-all",
        }
    }
}

impl std::fmt::Display for ThunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Human-readable identity of a thunk, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThunkInfo {
    pub op_name: String,
    pub module_name: String,
    pub module_id: i64,
}

impl ThunkInfo {
    pub fn new(op_name: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
            ..Self::default()
        }
    }
}

/// Per-execution inputs handed to `execute`.
#[derive(Clone, Copy)]
pub struct ExecuteParams<'a> {
    pub buffer_allocations: &'a dyn BufferResolver,
    pub collective_params: Option<&'a CollectiveExecuteParams>,
}

/// A collective thunk of any supported kind.
#[derive(Debug, Clone)]
pub enum Thunk {
    AllGather(AllGatherThunk),
    AllToAll(AllToAllThunk),
}

impl Thunk {
    pub fn kind(&self) -> ThunkKind {
        self.collective().kind()
    }

    pub fn info(&self) -> &ThunkInfo {
        self.collective().info()
    }

    /// Shared collective state of the underlying thunk.
    pub fn collective(&self) -> &CollectiveThunk {
        match self {
            Thunk::AllGather(t) => t.collective(),
            Thunk::AllToAll(t) => t.collective(),
        }
    }

    /// Start the collective. Must be called from within a Tokio runtime.
    pub fn execute(&self, params: &ExecuteParams<'_>) -> ExecuteEvent {
        match self {
            Thunk::AllGather(t) => t.execute(params),
            Thunk::AllToAll(t) => t.execute(params),
        }
    }
}

impl From<AllGatherThunk> for Thunk {
    fn from(t: AllGatherThunk) -> Self {
        Thunk::AllGather(t)
    }
}

impl From<AllToAllThunk> for Thunk {
    fn from(t: AllToAllThunk) -> Self {
        Thunk::AllToAll(t)
    }
}
