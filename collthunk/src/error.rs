use crate::memory::BufferAllocationSlice;

pub type Result<T> = std::result::Result<T, ThunkError>;

#[derive(Debug, thiserror::Error)]
pub enum ThunkError {
    #[error("failed to resolve buffer slice {slice}: {reason}")]
    BufferResolution {
        slice: BufferAllocationSlice,
        reason: String,
    },

    #[error("invalid operand buffers for {op}: {reason}")]
    InvalidOpBuffers { op: &'static str, reason: String },

    #[error("collective group formation failed: {reason}")]
    GroupFormation { reason: String },

    #[error("collective parameters are not set for {op}")]
    MissingCollectiveParams { op: &'static str },

    #[error(
        "{op} timed out after {timeout_ms}ms at rank {rank}: {arrived}/{world} participants arrived"
    )]
    CommunicationTimeout {
        op: &'static str,
        rank: usize,
        arrived: usize,
        world: usize,
        timeout_ms: u64,
    },

    #[error("collective transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("execute event abandoned before completion")]
    EventAbandoned,
}

impl ThunkError {
    /// Create a `GroupFormation` error.
    pub fn group_formation(reason: impl Into<String>) -> Self {
        Self::GroupFormation {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidOpBuffers` error for the given operation.
    pub fn invalid_op_buffers(op: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOpBuffers {
            op,
            reason: reason.into(),
        }
    }

    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for errors raised by the communicator's deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommunicationTimeout { .. })
    }
}
