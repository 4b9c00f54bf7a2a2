use crate::types::{GlobalDeviceId, RunId};

/// Whether a collective crosses replicas of one module or partitions of
/// different modules. Calls of different kinds never rendezvous together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveOpKind {
    CrossModule,
    CrossReplica,
}

impl std::fmt::Display for CollectiveOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectiveOpKind::CrossModule => f.write_str("cross_module"),
            CollectiveOpKind::CrossReplica => f.write_str("cross_replica"),
        }
    }
}

/// Identifies one collective call instance and the group joining it.
///
/// Every participant of the call derives an equal key. `global_devices` is
/// ordered, and a participant's rank is its position in that list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RendezvousKey {
    pub run_id: RunId,
    pub global_devices: Vec<GlobalDeviceId>,
    pub num_local_participants: usize,
    pub op_kind: CollectiveOpKind,
    pub op_id: i64,
}

impl RendezvousKey {
    /// Number of participants in the group.
    pub fn world_size(&self) -> usize {
        self.global_devices.len()
    }

    /// Position of `device` in the group.
    pub fn rank_of(&self, device: GlobalDeviceId) -> Option<usize> {
        self.global_devices.iter().position(|&d| d == device)
    }
}

impl std::fmt::Display for RendezvousKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RendezvousKey{{run_id={}, global_devices=[", self.run_id)?;
        for (i, d) in self.global_devices.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(
            f,
            "], num_local_participants={}, op_kind={}, op_id={}}}",
            self.num_local_participants, self.op_kind, self.op_id
        )
    }
}
