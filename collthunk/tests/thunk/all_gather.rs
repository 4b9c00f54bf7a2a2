use collthunk::{
    AllGatherThunk, BufferAllocationSlice, DataType, OpBuffers, OpParams, Shape, Thunk,
    ThunkError, ThunkInfo, ThunkKind,
};

use super::helpers::Harness;

fn gather_buffers(src_elems: usize, dst_elems: usize) -> OpBuffers {
    OpBuffers {
        source_buffers: vec![BufferAllocationSlice::new(0, 0, src_elems * 4)],
        source_shapes: vec![Shape::new(DataType::F32, [src_elems])],
        destination_buffers: vec![BufferAllocationSlice::new(1, 0, dst_elems * 4)],
        destination_shapes: vec![Shape::new(DataType::F32, [dst_elems])],
    }
}

fn gather_thunks(world: usize, src_elems: usize, dst_elems: usize) -> Vec<Thunk> {
    (0..world)
        .map(|_| {
            AllGatherThunk::create(
                ThunkInfo::new("all-gather.3"),
                OpParams {
                    op_id: 3,
                    ..OpParams::default()
                },
                gather_buffers(src_elems, dst_elems),
            )
            .unwrap()
            .into()
        })
        .collect()
}

fn as_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[tokio::test]
async fn test_all_gather_3_participants() {
    let mut harness = Harness::new(3, 5, 8, 24);
    for (p, part) in harness.participants.iter_mut().enumerate() {
        let v = (p + 1) as f32;
        part.sources[..4].copy_from_slice(&v.to_le_bytes());
        part.sources[4..].copy_from_slice(&(v * 10.0).to_le_bytes());
    }

    let thunks = gather_thunks(3, 2, 6);
    assert_eq!(thunks[0].kind(), ThunkKind::AllGather);
    let results = harness.execute_all(&thunks).await;
    assert!(results.iter().all(|r| r.is_ok()), "{results:?}");

    for part in &harness.participants {
        assert_eq!(
            as_f32(&part.destinations),
            vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]
        );
    }
}

#[tokio::test]
async fn test_all_gather_destination_too_small_for_group() {
    // A destination sized for 2 participants while 3 take part.
    let mut harness = Harness::new(3, 6, 4, 8);
    let results = harness.execute_all(&gather_thunks(3, 1, 2)).await;
    for r in results {
        assert!(matches!(r, Err(ThunkError::InvalidOpBuffers { .. })), "{r:?}");
    }
}

#[test]
fn test_all_gather_create_validation() {
    let err = AllGatherThunk::create(ThunkInfo::new("ag"), OpParams::default(), gather_buffers(3, 4))
        .unwrap_err();
    assert!(err.to_string().contains("not a multiple"), "{err}");

    let mut two_sources = gather_buffers(1, 2);
    two_sources.source_buffers.push(BufferAllocationSlice::new(0, 4, 4));
    two_sources.source_shapes.push(Shape::new(DataType::F32, [1]));
    assert!(AllGatherThunk::create(ThunkInfo::new("ag"), OpParams::default(), two_sources).is_err());
}
