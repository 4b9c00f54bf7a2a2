use crate::error::{Result, ThunkError};
use crate::thunk::{
    CollectiveThunk, ExecuteEvent, ExecuteParams, OpBuffers, OpParams, ThunkInfo, ThunkKind,
};

const OP: &str = ThunkKind::AllToAll.name();

/// Multi-buffer all-to-all exchange.
///
/// Each participant contributes one source buffer per peer and receives
/// one destination buffer per peer: destination `i` of participant `p`
/// receives source `p` of participant `i`.
#[derive(Debug, Clone)]
pub struct AllToAllThunk {
    base: CollectiveThunk,
}

impl AllToAllThunk {
    pub fn create(info: ThunkInfo, op_params: OpParams, op_buffers: OpBuffers) -> Result<Self> {
        op_buffers.validate(OP)?;
        if op_buffers.source_buffers.len() != op_buffers.destination_buffers.len() {
            return Err(ThunkError::invalid_op_buffers(
                OP,
                format!(
                    "{} source buffers but {} destination buffers",
                    op_buffers.source_buffers.len(),
                    op_buffers.destination_buffers.len()
                ),
            ));
        }
        let chunk_bytes = op_buffers.destination_shapes[0].byte_size();
        let uniform = op_buffers
            .source_shapes
            .iter()
            .chain(&op_buffers.destination_shapes)
            .all(|s| s.byte_size() == chunk_bytes);
        if !uniform {
            return Err(ThunkError::invalid_op_buffers(
                OP,
                "buffers must all have the same byte size",
            ));
        }

        Ok(Self {
            base: CollectiveThunk::new(ThunkKind::AllToAll, info, op_params, op_buffers),
        })
    }

    pub fn collective(&self) -> &CollectiveThunk {
        &self.base
    }

    pub fn execute(&self, params: &ExecuteParams<'_>) -> ExecuteEvent {
        let data = match self.base.op_device_memory(params) {
            Ok(data) => data,
            Err(e) => return ExecuteEvent::failed(e),
        };

        tracing::trace!(
            "AllToAll: #source_buffers={}, #destination_buffers={}",
            data.source.len(),
            data.destination.len()
        );
        for (i, region) in data.source.iter().enumerate() {
            tracing::trace!(
                "  src: {} in slice {} ({region})",
                self.base.source_shape(i),
                self.base.source_buffer(i)
            );
        }
        for (i, region) in data.destination.iter().enumerate() {
            tracing::trace!(
                "  dst: {} in slice {} ({region})",
                self.base.destination_shape(i),
                self.base.destination_buffer(i)
            );
        }

        let chunk_bytes = self.base.destination_shape(0).byte_size();
        let sources: Vec<u64> = data.source.iter().map(|r| r.as_u64()).collect();
        let destinations: Vec<u64> = data.destination.iter().map(|r| r.as_u64()).collect();

        self.base
            .execute_with_communicator(params, move |key, comm, timeout| async move {
                // SAFETY: the regions were resolved from this execution's
                // allocations, which the caller keeps alive and untouched
                // until the returned event resolves.
                unsafe { comm.all_to_all(&key, chunk_bytes, &sources, &destinations, timeout) }
                    .await
            })
    }
}
