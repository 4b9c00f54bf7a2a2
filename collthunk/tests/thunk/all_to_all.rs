use collthunk::{AllToAllThunk, InProcessCollectives, OpParams, Thunk, ThunkConfig, ThunkInfo};
use std::sync::Arc;

use super::helpers::{Harness, chunked_buffers};

fn all_to_all_thunks(world: usize, chunk: usize) -> Vec<Thunk> {
    (0..world)
        .map(|_| {
            AllToAllThunk::create(
                ThunkInfo::new("all-to-all.1"),
                OpParams {
                    op_id: 1,
                    ..OpParams::default()
                },
                chunked_buffers(world, chunk),
            )
            .unwrap()
            .into()
        })
        .collect()
}

#[tokio::test]
async fn test_all_to_all_2_participants_8_byte_buffers() {
    let mut harness = Harness::new(2, 1, 16, 16);
    // Participant p's buffer addressed to peer j holds 8 bytes of (p * 16 + j).
    for (p, part) in harness.participants.iter_mut().enumerate() {
        for j in 0..2 {
            part.sources[j * 8..(j + 1) * 8].fill((p * 16 + j) as u8);
        }
    }
    let original: Vec<Vec<u8>> = harness
        .participants
        .iter()
        .map(|p| p.sources.clone())
        .collect();

    let results = harness.execute_all(&all_to_all_thunks(2, 8)).await;
    assert!(results.iter().all(|r| r.is_ok()), "{results:?}");

    let p0 = &harness.participants[0];
    let p1 = &harness.participants[1];
    // Each side received the peer's buffer addressed to it.
    assert_eq!(p0.destination_chunk(1, 8), &original[1][0..8]);
    assert_eq!(p1.destination_chunk(0, 8), &original[0][8..16]);
    // And kept its own self-addressed buffer.
    assert_eq!(p0.destination_chunk(0, 8), &original[0][0..8]);
    assert_eq!(p1.destination_chunk(1, 8), &original[1][8..16]);
}

#[tokio::test]
async fn test_all_to_all_transpose_4_participants() {
    let world = 4;
    let chunk = 8;
    let mut harness = Harness::new(world, 7, world * chunk, world * chunk);
    for (p, part) in harness.participants.iter_mut().enumerate() {
        for j in 0..world {
            let v = (p * 100 + j) as u32;
            part.sources[j * chunk..j * chunk + 4].copy_from_slice(&v.to_le_bytes());
            part.sources[j * chunk + 4..(j + 1) * chunk].copy_from_slice(&(!v).to_le_bytes());
        }
    }

    let results = harness.execute_all(&all_to_all_thunks(world, chunk)).await;
    assert!(results.iter().all(|r| r.is_ok()), "{results:?}");

    for (p, part) in harness.participants.iter().enumerate() {
        for i in 0..world {
            let got = part.destination_chunk(i, chunk);
            let v = (i * 100 + p) as u32;
            let mut expected = v.to_le_bytes().to_vec();
            expected.extend_from_slice(&(!v).to_le_bytes());
            assert_eq!(got, expected.as_slice(), "participant {p} slot {i}");
        }
    }
}

#[tokio::test]
async fn test_all_to_all_single_participant() {
    let mut harness = Harness::new(1, 1, 4, 4);
    harness.participants[0].sources.copy_from_slice(&[9, 8, 7, 6]);

    let results = harness.execute_all(&all_to_all_thunks(1, 4)).await;
    assert!(results[0].is_ok());
    assert_eq!(harness.participants[0].destinations, vec![9, 8, 7, 6]);
}

#[tokio::test]
async fn test_identical_thunks_behave_identically() {
    let world = 3;
    let fill = |harness: &mut Harness| {
        for (p, part) in harness.participants.iter_mut().enumerate() {
            for (b, byte) in part.sources.iter_mut().enumerate() {
                *byte = (p * 31 + b) as u8;
            }
        }
    };

    let mut first = Harness::new(world, 1, world * 4, world * 4);
    fill(&mut first);
    let r1 = first.execute_all(&all_to_all_thunks(world, 4)).await;

    let mut second = Harness::new(world, 2, world * 4, world * 4);
    fill(&mut second);
    let r2 = second.execute_all(&all_to_all_thunks(world, 4)).await;

    assert!(r1.iter().chain(&r2).all(|r| r.is_ok()));
    for (a, b) in first.participants.iter().zip(&second.participants) {
        assert_eq!(a.destinations, b.destinations);
    }
}

#[tokio::test]
async fn test_thunks_reused_across_runs() {
    let world = 2;
    let collectives = Arc::new(InProcessCollectives::new());
    let mut harness = Harness::with_collectives(
        world,
        0,
        world * 2,
        world * 2,
        collectives.clone(),
        &ThunkConfig::default(),
    );
    let thunks = all_to_all_thunks(world, 2);

    for run_id in 1..=3u64 {
        harness.set_run_id(run_id);
        for (p, part) in harness.participants.iter_mut().enumerate() {
            part.sources.fill((run_id * 10 + p as u64) as u8);
        }
        let results = harness.execute_all(&thunks).await;
        assert!(results.iter().all(|r| r.is_ok()), "run {run_id}: {results:?}");
        let base = (run_id * 10) as u8;
        assert_eq!(harness.participants[0].destinations, vec![base, base, base + 1, base + 1]);
        assert_eq!(collectives.registry().pending(), 0);
    }
}

#[tokio::test]
async fn test_dropped_event_does_not_cancel_exchange() {
    let mut harness = Harness::new(2, 4, 8, 8);
    for (p, part) in harness.participants.iter_mut().enumerate() {
        part.sources.fill(p as u8 + 1);
    }

    let mut events = harness.start_all(&all_to_all_thunks(2, 4));
    drop(events.remove(0));
    for event in events {
        assert!(event.wait().await.is_ok());
    }

    // The peer only resolves once participant 0 has copied too.
    assert_eq!(harness.participants[0].destinations, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    assert_eq!(harness.participants[1].destinations, vec![1, 1, 1, 1, 2, 2, 2, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_to_all_8_participants_multi_thread() {
    let world = 8;
    let chunk = 16;
    let mut harness = Harness::new(world, 42, world * chunk, world * chunk);
    for (p, part) in harness.participants.iter_mut().enumerate() {
        for j in 0..world {
            part.sources[j * chunk..(j + 1) * chunk].fill((p * world + j) as u8);
        }
    }

    let results = harness.execute_all(&all_to_all_thunks(world, chunk)).await;
    assert!(results.iter().all(|r| r.is_ok()), "{results:?}");

    for (p, part) in harness.participants.iter().enumerate() {
        for i in 0..world {
            assert!(
                part.destination_chunk(i, chunk)
                    .iter()
                    .all(|&b| b == (i * world + p) as u8),
                "participant {p} slot {i}"
            );
        }
    }
}

#[test]
fn test_thunk_enum_dispatch() {
    let thunk: Thunk = AllToAllThunk::create(
        ThunkInfo::new("a2a"),
        OpParams::default(),
        chunked_buffers(2, 4),
    )
    .unwrap()
    .into();
    assert_eq!(thunk.kind(), collthunk::ThunkKind::AllToAll);
    assert_eq!(thunk.kind().to_string(), "all-to-all");
    assert_eq!(thunk.info().op_name, "a2a");
    assert_eq!(thunk.collective().op_buffers().destination_buffers.len(), 2);
}
