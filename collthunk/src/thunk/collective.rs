//! Shared machinery of collective thunks: operand resolution, rendezvous key
//! derivation and communicator acquisition.

use crate::collectives::{CollectivesCommunicator, CollectivesInterface};
use crate::config::ThunkConfig;
use crate::error::{Result, ThunkError};
use crate::memory::{BufferAllocationSlice, MemoryRegion};
use crate::rendezvous::{
    CollectiveOpGroupMode, CollectiveOpKind, DeviceAssignment, RendezvousKey, ReplicaGroup,
    participating_devices,
};
use crate::thunk::{ExecuteEvent, ExecuteParams, ThunkInfo, ThunkKind};
use crate::types::{GlobalDeviceId, RunId, Shape};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Group configuration of a collective op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpParams {
    /// Channel id when one is present, otherwise the module-unique op id.
    pub op_id: i64,
    pub has_channel_id: bool,
    pub use_global_device_ids: Option<bool>,
    pub group: Vec<ReplicaGroup>,
}

/// Source and destination operands of a collective, parallel in index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpBuffers {
    pub source_buffers: Vec<BufferAllocationSlice>,
    pub source_shapes: Vec<Shape>,
    pub destination_buffers: Vec<BufferAllocationSlice>,
    pub destination_shapes: Vec<Shape>,
}

impl OpBuffers {
    /// Check the invariants every collective relies on: non-empty operand
    /// lists, one shape per slice, and slices sized to their shapes.
    pub(crate) fn validate(&self, op: &'static str) -> Result<()> {
        if self.source_buffers.is_empty() {
            return Err(ThunkError::invalid_op_buffers(op, "no source buffers"));
        }
        if self.destination_buffers.is_empty() {
            return Err(ThunkError::invalid_op_buffers(op, "no destination buffers"));
        }
        check_operands(op, "source", &self.source_buffers, &self.source_shapes)?;
        check_operands(
            op,
            "destination",
            &self.destination_buffers,
            &self.destination_shapes,
        )
    }
}

fn check_operands(
    op: &'static str,
    what: &str,
    slices: &[BufferAllocationSlice],
    shapes: &[Shape],
) -> Result<()> {
    if slices.len() != shapes.len() {
        return Err(ThunkError::invalid_op_buffers(
            op,
            format!(
                "{} {what} buffers but {} {what} shapes",
                slices.len(),
                shapes.len()
            ),
        ));
    }
    for (i, (slice, shape)) in slices.iter().zip(shapes).enumerate() {
        if slice.size() != shape.byte_size() {
            return Err(ThunkError::invalid_op_buffers(
                op,
                format!(
                    "{what} {i}: slice {slice} holds {} bytes, shape {shape} needs {}",
                    slice.size(),
                    shape.byte_size()
                ),
            ));
        }
    }
    Ok(())
}

/// Operand memory resolved for one execution.
#[derive(Debug, Clone)]
pub struct OpDeviceMemory {
    pub source: Vec<MemoryRegion>,
    pub destination: Vec<MemoryRegion>,
}

/// Execution-time context every collective needs.
#[derive(Clone)]
pub struct CollectiveExecuteParams {
    pub run_id: RunId,
    pub local_device_ordinal: usize,
    pub global_device_id: GlobalDeviceId,
    pub device_assignment: Arc<DeviceAssignment>,
    pub collectives: Arc<dyn CollectivesInterface>,
    pub collective_timeout: Duration,
}

impl CollectiveExecuteParams {
    pub fn new(
        run_id: RunId,
        local_device_ordinal: usize,
        global_device_id: GlobalDeviceId,
        device_assignment: Arc<DeviceAssignment>,
        collectives: Arc<dyn CollectivesInterface>,
        config: &ThunkConfig,
    ) -> Self {
        Self {
            run_id,
            local_device_ordinal,
            global_device_id,
            device_assignment,
            collectives,
            collective_timeout: config.collective_timeout,
        }
    }
}

impl std::fmt::Debug for CollectiveExecuteParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectiveExecuteParams")
            .field("run_id", &self.run_id)
            .field("local_device_ordinal", &self.local_device_ordinal)
            .field("global_device_id", &self.global_device_id)
            .field("collective_timeout", &self.collective_timeout)
            .finish_non_exhaustive()
    }
}

/// State and behavior shared by all collective thunks.
#[derive(Debug, Clone)]
pub struct CollectiveThunk {
    kind: ThunkKind,
    info: ThunkInfo,
    op_params: OpParams,
    op_buffers: OpBuffers,
}

impl CollectiveThunk {
    pub(crate) fn new(
        kind: ThunkKind,
        info: ThunkInfo,
        op_params: OpParams,
        op_buffers: OpBuffers,
    ) -> Self {
        Self {
            kind,
            info,
            op_params,
            op_buffers,
        }
    }

    pub fn kind(&self) -> ThunkKind {
        self.kind
    }

    pub fn info(&self) -> &ThunkInfo {
        &self.info
    }

    pub fn op_params(&self) -> &OpParams {
        &self.op_params
    }

    pub fn op_buffers(&self) -> &OpBuffers {
        &self.op_buffers
    }

    pub fn source_buffer(&self, i: usize) -> &BufferAllocationSlice {
        &self.op_buffers.source_buffers[i]
    }

    pub fn source_shape(&self, i: usize) -> &Shape {
        &self.op_buffers.source_shapes[i]
    }

    pub fn destination_buffer(&self, i: usize) -> &BufferAllocationSlice {
        &self.op_buffers.destination_buffers[i]
    }

    pub fn destination_shape(&self, i: usize) -> &Shape {
        &self.op_buffers.destination_shapes[i]
    }

    /// Resolve every source and destination slice for this execution.
    pub fn op_device_memory(&self, params: &ExecuteParams<'_>) -> Result<OpDeviceMemory> {
        let resolve = |slices: &[BufferAllocationSlice]| -> Result<Vec<MemoryRegion>> {
            slices
                .iter()
                .map(|s| params.buffer_allocations.resolve(s))
                .collect()
        };
        Ok(OpDeviceMemory {
            source: resolve(&self.op_buffers.source_buffers)?,
            destination: resolve(&self.op_buffers.destination_buffers)?,
        })
    }

    /// Key shared by every participant of this op within the current run.
    pub fn rendezvous_key(&self, params: &CollectiveExecuteParams) -> Result<RendezvousKey> {
        let mode = CollectiveOpGroupMode::from_op(
            self.op_params.has_channel_id,
            self.op_params.use_global_device_ids,
        )?;
        let global_devices = participating_devices(
            params.global_device_id,
            &params.device_assignment,
            &self.op_params.group,
            mode,
        )?;
        let num_local_participants = global_devices.len();
        Ok(RendezvousKey {
            run_id: params.run_id,
            global_devices,
            num_local_participants,
            op_kind: if self.op_params.has_channel_id {
                CollectiveOpKind::CrossModule
            } else {
                CollectiveOpKind::CrossReplica
            },
            op_id: self.op_params.op_id,
        })
    }

    /// Acquire the communicator for this op's group and run `body` with it
    /// on the Tokio runtime. Failures before the body starts produce an
    /// already-failed event.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn execute_with_communicator<F, Fut>(
        &self,
        params: &ExecuteParams<'_>,
        body: F,
    ) -> ExecuteEvent
    where
        F: FnOnce(RendezvousKey, Arc<dyn CollectivesCommunicator>, Duration) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let op = self.kind.name();
        let Some(collective_params) = params.collective_params else {
            return ExecuteEvent::failed(ThunkError::MissingCollectiveParams { op });
        };

        let (key, comm) = match self.acquire(collective_params) {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(op, name = %self.info.op_name, "collective setup failed: {e}");
                return ExecuteEvent::failed(e);
            }
        };

        let span = tracing::info_span!(
            "collective",
            kind = op,
            name = %self.info.op_name,
            run_id = key.run_id,
        );
        let fut = body(key, comm, collective_params.collective_timeout);
        let (promise, event) = ExecuteEvent::pending();
        tokio::spawn(
            async move {
                let outcome = fut.await;
                if let Err(e) = &outcome {
                    tracing::warn!("collective failed: {e}");
                }
                promise.set(outcome);
            }
            .instrument(span),
        );
        event
    }

    fn acquire(
        &self,
        params: &CollectiveExecuteParams,
    ) -> Result<(RendezvousKey, Arc<dyn CollectivesCommunicator>)> {
        let key = self.rendezvous_key(params)?;
        let rank = key.rank_of(params.global_device_id).ok_or_else(|| {
            ThunkError::group_formation(format!(
                "device {} is not a participant of {key}",
                params.global_device_id
            ))
        })?;
        let comm = params
            .collectives
            .get_communicator(&key.global_devices, rank)?;
        tracing::debug!(%key, rank, "acquired communicator");
        Ok((key, comm))
    }
}
