use crate::error::{Result, ThunkError};
use crate::thunk::{
    CollectiveThunk, ExecuteEvent, ExecuteParams, OpBuffers, OpParams, ThunkInfo, ThunkKind,
};

const OP: &str = ThunkKind::AllGather.name();

/// Gathers one buffer from every participant into each participant's
/// destination, in group-rank order.
#[derive(Debug, Clone)]
pub struct AllGatherThunk {
    base: CollectiveThunk,
}

impl AllGatherThunk {
    pub fn create(info: ThunkInfo, op_params: OpParams, op_buffers: OpBuffers) -> Result<Self> {
        op_buffers.validate(OP)?;
        if op_buffers.source_buffers.len() != 1 || op_buffers.destination_buffers.len() != 1 {
            return Err(ThunkError::invalid_op_buffers(
                OP,
                "expected exactly one source and one destination buffer",
            ));
        }
        let src = op_buffers.source_shapes[0].byte_size();
        let dst = op_buffers.destination_shapes[0].byte_size();
        if src == 0 || dst % src != 0 {
            return Err(ThunkError::invalid_op_buffers(
                OP,
                format!("destination of {dst} bytes is not a multiple of source of {src} bytes"),
            ));
        }

        Ok(Self {
            base: CollectiveThunk::new(ThunkKind::AllGather, info, op_params, op_buffers),
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
            "AllGather: src: {} ({}), dst: {} ({})",
            self.base.source_shape(0),
            data.source[0],
            self.base.destination_shape(0),
            data.destination[0]
        );

        let chunk_bytes = self.base.source_shape(0).byte_size();
        let capacity = data.destination[0].len_bytes();
        let source = data.source[0].as_u64();
        let destination = data.destination[0].as_u64();

        self.base
            .execute_with_communicator(params, move |key, comm, timeout| async move {
                if chunk_bytes * key.world_size() != capacity {
                    return Err(ThunkError::invalid_op_buffers(
                        OP,
                        format!(
                            "destination of {capacity} bytes cannot hold {} x {chunk_bytes} bytes",
                            key.world_size()
                        ),
                    ));
                }
                // SAFETY: see `AllToAllThunk::execute`; the destination was
                // checked to hold one chunk per participant.
                unsafe { comm.all_gather(&key, chunk_bytes, source, destination, timeout) }.await
            })
    }
}
