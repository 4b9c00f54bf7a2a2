mod group;
mod key;

pub use group::{CollectiveOpGroupMode, DeviceAssignment, ReplicaGroup, participating_devices};
pub use key::{CollectiveOpKind, RendezvousKey};
