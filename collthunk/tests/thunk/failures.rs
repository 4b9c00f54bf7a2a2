use collthunk::{
    AllToAllThunk, BufferAllocations, CollectiveExecuteParams, DeviceAssignment, ExecuteParams,
    GlobalDeviceId, InProcessCollectives, MemoryRegion, OpBuffers, OpParams, Thunk, ThunkConfig,
    ThunkError, ThunkInfo,
};
use std::sync::Arc;
use std::time::Duration;

use super::helpers::{CountingCollectives, Harness, Script, ScriptedCollectives, chunked_buffers};

fn thunk(world: usize, chunk: usize) -> Thunk {
    AllToAllThunk::create(
        ThunkInfo::new("all-to-all.9"),
        OpParams {
            op_id: 9,
            ..OpParams::default()
        },
        chunked_buffers(world, chunk),
    )
    .unwrap()
    .into()
}

#[test]
fn test_create_rejects_zero_destinations() {
    let mut buffers = chunked_buffers(2, 4);
    buffers.destination_buffers.clear();
    buffers.destination_shapes.clear();
    let err = AllToAllThunk::create(ThunkInfo::new("a2a"), OpParams::default(), buffers)
        .unwrap_err();
    assert!(matches!(err, ThunkError::InvalidOpBuffers { .. }));
    assert!(err.to_string().contains("no destination buffers"));
}

#[test]
fn test_create_rejects_count_mismatch() {
    let mut buffers = chunked_buffers(2, 4);
    buffers.destination_buffers.pop();
    buffers.destination_shapes.pop();
    assert!(AllToAllThunk::create(ThunkInfo::new("a2a"), OpParams::default(), buffers).is_err());
}

#[test]
fn test_create_rejects_non_uniform_sizes() {
    let buffers = OpBuffers {
        source_buffers: vec![
            collthunk::BufferAllocationSlice::new(0, 0, 4),
            collthunk::BufferAllocationSlice::new(0, 4, 8),
        ],
        source_shapes: vec![
            collthunk::Shape::new(collthunk::DataType::U8, [4]),
            collthunk::Shape::new(collthunk::DataType::U8, [8]),
        ],
        ..chunked_buffers(2, 4)
    };
    let err = AllToAllThunk::create(ThunkInfo::new("a2a"), OpParams::default(), buffers)
        .unwrap_err();
    assert!(err.to_string().contains("same byte size"));
}

#[tokio::test]
async fn test_resolution_failure_skips_communicator() {
    let collectives = Arc::new(CountingCollectives::new());
    let params = CollectiveExecuteParams::new(
        1,
        0,
        GlobalDeviceId(0),
        Arc::new(DeviceAssignment::sequential(2, 1)),
        collectives.clone(),
        &ThunkConfig::default(),
    );
    let mut sources = vec![0u8; 8];
    // Destination allocation never materialized.
    let allocations =
        BufferAllocations::with_unassigned(vec![Some(MemoryRegion::from_slice(&mut sources)), None]);

    let mut event = thunk(2, 4).execute(&ExecuteParams {
        buffer_allocations: &allocations,
        collective_params: Some(&params),
    });

    // Already resolved; no task was spawned.
    assert!(matches!(
        event.try_result(),
        Some(Err(ThunkError::BufferResolution { .. }))
    ));
    assert_eq!(collectives.acquired(), 0);
}

#[tokio::test]
async fn test_missing_collective_params() {
    let mut sources = vec![0u8; 8];
    let mut destinations = vec![0u8; 8];
    let allocations = BufferAllocations::new(vec![
        MemoryRegion::from_slice(&mut sources),
        MemoryRegion::from_slice(&mut destinations),
    ]);
    let err = thunk(2, 4)
        .execute(&ExecuteParams {
            buffer_allocations: &allocations,
            collective_params: None,
        })
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, ThunkError::MissingCollectiveParams { op: "all-to-all" }));
}

#[tokio::test(start_paused = true)]
async fn test_missing_participant_times_out() {
    let collectives = Arc::new(InProcessCollectives::new());
    let config = ThunkConfig {
        collective_timeout: Duration::from_secs(10),
    };
    let mut harness = Harness::with_collectives(2, 1, 8, 8, collectives.clone(), &config);
    // Participant 1 never shows up.
    harness.participants.truncate(1);

    let results = harness.execute_all(&[thunk(2, 4)]).await;
    match &results[0] {
        Err(ThunkError::CommunicationTimeout {
            op,
            rank,
            arrived,
            world,
            timeout_ms,
        }) => {
            assert_eq!(*op, "all-to-all");
            assert_eq!((*rank, *arrived, *world, *timeout_ms), (0, 1, 2, 10_000));
        }
        other => panic!("expected CommunicationTimeout, got {other:?}"),
    }
    assert_eq!(collectives.registry().pending(), 0);
}

#[tokio::test]
async fn test_transport_error_is_distinct() {
    let mut harness = Harness::with_collectives(
        2,
        1,
        8,
        8,
        Arc::new(ScriptedCollectives(Script::TransportError)),
        &ThunkConfig::default(),
    );
    let results = harness.execute_all(&[thunk(2, 4), thunk(2, 4)]).await;
    for r in results {
        let err = r.unwrap_err();
        assert!(matches!(err, ThunkError::Transport { .. }), "{err:?}");
        assert!(!err.is_timeout());
    }
}

#[tokio::test]
async fn test_unknown_device_is_group_formation() {
    let collectives = Arc::new(CountingCollectives::new());
    let params = CollectiveExecuteParams::new(
        1,
        0,
        GlobalDeviceId(99),
        Arc::new(DeviceAssignment::sequential(2, 1)),
        collectives.clone(),
        &ThunkConfig::default(),
    );
    let mut sources = vec![0u8; 8];
    let mut destinations = vec![0u8; 8];
    let allocations = BufferAllocations::new(vec![
        MemoryRegion::from_slice(&mut sources),
        MemoryRegion::from_slice(&mut destinations),
    ]);

    let mut event = thunk(2, 4).execute(&ExecuteParams {
        buffer_allocations: &allocations,
        collective_params: Some(&params),
    });
    assert!(matches!(
        event.try_result(),
        Some(Err(ThunkError::GroupFormation { .. }))
    ));
    assert_eq!(collectives.acquired(), 0);
}

#[tokio::test]
async fn test_buffer_count_must_match_group() {
    // Thunks built for 2 peers executed by a group of 3.
    let mut harness = Harness::new(3, 1, 8, 8);
    let results = harness
        .execute_all(&[thunk(2, 4), thunk(2, 4), thunk(2, 4)])
        .await;
    for r in results {
        assert!(matches!(r, Err(ThunkError::InvalidOpBuffers { .. })), "{r:?}");
    }
}

#[tokio::test]
async fn test_panicking_communicator_abandons_event() {
    let mut harness = Harness::with_collectives(
        1,
        1,
        4,
        4,
        Arc::new(ScriptedCollectives(Script::Panic)),
        &ThunkConfig::default(),
    );
    let results = harness.execute_all(&[thunk(1, 4)]).await;
    assert!(matches!(results[0], Err(ThunkError::EventAbandoned)));
}
