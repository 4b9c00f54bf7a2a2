//! Participant-group computation for collectives.
//!
//! A program runs as `replica_count × computation_count` instances, laid out
//! in a `DeviceAssignment`. A collective's replica groups, read according to
//! its `CollectiveOpGroupMode`, select which of those devices take part in
//! the call issued by a given device.

use crate::error::{Result, ThunkError};
use crate::types::GlobalDeviceId;

/// Row-major `replica × computation` table of devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    replica_count: usize,
    computation_count: usize,
    devices: Vec<GlobalDeviceId>,
}

impl DeviceAssignment {
    pub fn new(
        replica_count: usize,
        computation_count: usize,
        devices: Vec<GlobalDeviceId>,
    ) -> Result<Self> {
        if replica_count * computation_count != devices.len() {
            return Err(ThunkError::group_formation(format!(
                "device assignment {replica_count}x{computation_count} given {} devices",
                devices.len()
            )));
        }
        Ok(Self {
            replica_count,
            computation_count,
            devices,
        })
    }

    /// Assignment with device id `replica * computation_count + computation`.
    pub fn sequential(replica_count: usize, computation_count: usize) -> Self {
        Self {
            replica_count,
            computation_count,
            devices: (0..(replica_count * computation_count) as u64)
                .map(GlobalDeviceId)
                .collect(),
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    pub fn computation_count(&self) -> usize {
        self.computation_count
    }

    /// Device running `replica` of `computation`.
    pub fn device(&self, replica: usize, computation: usize) -> GlobalDeviceId {
        self.devices[replica * self.computation_count + computation]
    }

    /// `(replica, computation)` coordinates of `device`.
    pub fn logical_id(&self, device: GlobalDeviceId) -> Result<(usize, usize)> {
        let idx = self
            .devices
            .iter()
            .position(|&d| d == device)
            .ok_or_else(|| {
                ThunkError::group_formation(format!(
                    "device {device} not found in device assignment"
                ))
            })?;
        Ok((idx / self.computation_count, idx % self.computation_count))
    }
}

/// One group of ids that communicate with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ReplicaGroup {
    pub replica_ids: Vec<usize>,
}

impl ReplicaGroup {
    pub fn new(replica_ids: impl Into<Vec<usize>>) -> Self {
        Self {
            replica_ids: replica_ids.into(),
        }
    }
}

/// How the ids in a collective's replica groups are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveOpGroupMode {
    /// Ids are replica ids; the group spans replicas of the current partition.
    CrossReplica,
    /// Ids are partition ids; the group spans partitions of the current replica.
    CrossPartition,
    /// Ids are replica ids; the group spans those replicas across all partitions.
    CrossReplicaAndPartition,
    /// Ids are `replica * partition_count + partition`.
    FlattenedId,
}

impl CollectiveOpGroupMode {
    /// Resolve the group mode from an op's channel id presence and its
    /// `use_global_device_ids` attribute.
    pub fn from_op(has_channel_id: bool, use_global_device_ids: Option<bool>) -> Result<Self> {
        match (has_channel_id, use_global_device_ids) {
            (false, None | Some(false)) => Ok(Self::CrossReplica),
            (false, Some(true)) => Err(ThunkError::group_formation(
                "use_global_device_ids requires a channel id",
            )),
            (true, None) => Ok(Self::CrossPartition),
            (true, Some(false)) => Ok(Self::CrossReplicaAndPartition),
            (true, Some(true)) => Ok(Self::FlattenedId),
        }
    }
}

/// Ids in the group that contains `current_id`. An empty group list means a
/// single group of `0..total` (not allowed in flattened-id mode).
fn participating_ids(
    mode: CollectiveOpGroupMode,
    current_id: usize,
    total: usize,
    groups: &[ReplicaGroup],
) -> Result<Vec<usize>> {
    if groups.is_empty() {
        if mode == CollectiveOpGroupMode::FlattenedId {
            return Err(ThunkError::group_formation(
                "replica groups must be explicit in flattened-id mode",
            ));
        }
        return Ok((0..total).collect());
    }

    groups
        .iter()
        .find(|g| g.replica_ids.contains(&current_id))
        .map(|g| g.replica_ids.clone())
        .ok_or_else(|| {
            ThunkError::group_formation(format!("id {current_id} is not in any replica group"))
        })
}

/// Devices participating alongside `device`, in group order.
pub fn participating_devices(
    device: GlobalDeviceId,
    assignment: &DeviceAssignment,
    groups: &[ReplicaGroup],
    mode: CollectiveOpGroupMode,
) -> Result<Vec<GlobalDeviceId>> {
    let replica_count = assignment.replica_count();
    let partition_count = assignment.computation_count();
    let (current_replica, current_partition) = assignment.logical_id(device)?;

    let check = |id: usize, bound: usize, what: &str| -> Result<usize> {
        if id < bound {
            Ok(id)
        } else {
            Err(ThunkError::group_formation(format!(
                "{what} id {id} out of range (count {bound})"
            )))
        }
    };

    match mode {
        CollectiveOpGroupMode::CrossReplica => {
            participating_ids(mode, current_replica, replica_count, groups)?
                .into_iter()
                .map(|r| -> Result<GlobalDeviceId> {
                    Ok(assignment.device(check(r, replica_count, "replica")?, current_partition))
                })
                .collect()
        }
        CollectiveOpGroupMode::CrossPartition => {
            participating_ids(mode, current_partition, partition_count, groups)?
                .into_iter()
                .map(|p| -> Result<GlobalDeviceId> {
                    Ok(assignment.device(current_replica, check(p, partition_count, "partition")?))
                })
                .collect()
        }
        CollectiveOpGroupMode::CrossReplicaAndPartition => {
            let replicas = participating_ids(mode, current_replica, replica_count, groups)?;
            let mut devices = Vec::with_capacity(replicas.len() * partition_count);
            for r in replicas {
                let r = check(r, replica_count, "replica")?;
                for p in 0..partition_count {
                    devices.push(assignment.device(r, p));
                }
            }
            Ok(devices)
        }
        CollectiveOpGroupMode::FlattenedId => {
            let total = replica_count * partition_count;
            let current = current_replica * partition_count + current_partition;
            participating_ids(mode, current, total, groups)?
                .into_iter()
                .map(|id| -> Result<GlobalDeviceId> {
                    let id = check(id, total, "flattened")?;
                    Ok(assignment.device(id / partition_count, id % partition_count))
                })
                .collect()
        }
    }
}
