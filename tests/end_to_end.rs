use assert_matches::assert_matches;
use web_time::Duration;

use voxel_sandbox::{
    config::{EngineConfig, QualityPreset, SessionConfig},
    engine_state::{
        interaction::{VoxelCoord, VoxelEdit},
        physics::InputState,
        snapshot::{compress_snapshot, decompress_snapshot, deserialize_snapshot, serialize_snapshot},
        voxels::{
            block::BlockType,
            chunk::{ChunkCoord, ChunkDiff, DiffEntry},
            chunk_manager::ChunkManager,
            generation::Theme,
        },
        EngineState,
    },
    error::SessionPlanError,
    realtime::{
        protocol::RoomEvent,
        session_plan::{create_session_plan, IceServer},
        RealtimeSession, SessionCommand, SessionEvent, SessionNotification, SessionStatus,
    },
};

const ROOM: &str = "room-1";

fn engine_config() -> EngineConfig {
    EngineConfig {
        seed: "abc".to_owned(),
        theme: Theme::Forest,
        quality: QualityPreset::Low,
        worker_threads: 0,
    }
}

fn settled_engine() -> EngineState {
    let mut engine = EngineState::new(engine_config());
    engine.update(Duration::from_millis(16), &InputState::default());
    engine.flush();
    engine
}

fn connected_session(peer_id: &str) -> RealtimeSession {
    let mut session = RealtimeSession::new(SessionConfig {
        room_id: ROOM.to_owned(),
        local_peer_id: peer_id.to_owned(),
        user_id: format!("user-{}", peer_id),
        display_name: peer_id.to_owned(),
        ..Default::default()
    });
    session.start(0);
    let epoch = session.epoch();
    session.handle_event(
        SessionEvent::IceServersFetched {
            epoch,
            result: Ok(vec![IceServer::new("turns:turn.example:5349")]),
        },
        0,
    );
    session.handle_event(SessionEvent::ChannelsSubscribed { epoch, result: Ok(()) }, 0);
    assert_eq!(session.status(), SessionStatus::Connected);
    session.drain_commands();
    session.drain_notifications();
    session
}

#[test]
fn edited_voxel_becomes_a_single_entry_diff() {
    let mut manager = ChunkManager::new(0);
    manager.update_chunks_around_player(8.0, 8.0, 0, "abc", Theme::Forest);
    manager.flush();
    assert!(manager.is_chunk_loaded(ChunkCoord::new(0, 0)));

    assert!(manager.set_block(3, 20, 3, BlockType::Stone));
    manager.flush();
    assert_eq!(manager.get_block(3, 20, 3), BlockType::Stone);

    let diffs = manager.get_modified_chunk_diffs();
    assert_eq!(
        diffs,
        vec![ChunkDiff {
            cx: 0,
            cz: 0,
            entries: vec![DiffEntry {
                local_index: 5171,
                block_type: 3,
            }],
        }]
    );

    let snapshot = EngineState::new(engine_config()).snapshot(0);
    assert!(snapshot.chunks.is_empty());

    let mut engine = EngineState::new(engine_config());
    engine.resume(voxel_sandbox::engine_state::snapshot::WorldSnapshot::new(
        Theme::Forest,
        "abc",
        0.0,
        1,
        diffs.clone(),
    ));
    let bytes = serialize_snapshot(&engine.snapshot(1)).unwrap();
    let restored = deserialize_snapshot(&bytes).unwrap();
    assert_eq!(restored.chunks, diffs);
    assert_eq!(restored.seed, "abc");
    assert_eq!(restored.sequence, 1);

    manager.dispose();
    assert!(manager.loaded_chunks().is_empty());
}

#[test]
fn saved_world_resumes_on_a_fresh_engine() {
    let mut original = settled_engine();
    assert!(original
        .chunk_manager_mut()
        .set_block(5, 62, 5, BlockType::Planks));
    original.flush();

    let bytes = compress_snapshot(&original.snapshot(7)).unwrap();
    let restored = decompress_snapshot(&bytes).unwrap();
    assert_eq!(restored.sequence, 7);

    let mut resumed = EngineState::new(engine_config());
    resumed.resume(restored);
    // Nothing is loaded yet, so the edit waits.
    assert_eq!(resumed.pending_diff_count(), 1);

    resumed.update(Duration::from_millis(16), &InputState::default());
    resumed.flush();
    assert_eq!(resumed.pending_diff_count(), 0);
    assert_eq!(resumed.chunk_manager().get_block(5, 62, 5), BlockType::Planks);
    assert_eq!(
        resumed.get_modified_chunk_diffs(),
        original.get_modified_chunk_diffs()
    );
}

#[test]
fn block_edit_travels_between_two_clients() {
    let mut engine_a = settled_engine();
    let mut engine_b = settled_engine();
    let mut session_a = connected_session("peer-a");
    let mut session_b = connected_session("peer-b");

    assert!(engine_a
        .chunk_manager_mut()
        .set_block(4, 61, 6, BlockType::Cobblestone));
    let edit = VoxelEdit {
        position: VoxelCoord::new(4, 61, 6),
        block: BlockType::Cobblestone,
    };
    let event = session_a.broadcast_block_edit(&edit, 100);
    assert_eq!(event.sequence, 1);

    let commands = session_a.drain_commands();
    let wire = assert_matches!(
        commands.as_slice(),
        [SessionCommand::BroadcastEvent(room_event @ RoomEvent::BlockEdit(_))] => serde_json::to_value(room_event).unwrap()
    );

    session_b.handle_event(SessionEvent::EventReceived(wire.clone()), 120);
    let notifications = session_b.drain_notifications();
    let (position, block) = assert_matches!(
        notifications.as_slice(),
        [SessionNotification::ApplyBlockEdit { position, block }] => (*position, *block)
    );
    engine_b.apply_remote_block_edit(VoxelCoord::new(position.x, position.y, position.z), block);
    engine_b.flush();

    assert_eq!(engine_b.chunk_manager().get_block(4, 61, 6), BlockType::Cobblestone);
    assert_eq!(engine_b.get_modified_chunk_diffs(), engine_a.get_modified_chunk_diffs());

    // A duplicate delivery is not applied twice.
    session_b.handle_event(SessionEvent::EventReceived(wire), 130);
    assert!(session_b.drain_notifications().is_empty());

    session_a.stop();
    session_b.stop();
    assert_eq!(session_a.status(), SessionStatus::Idle);
}

#[test]
fn every_pair_agrees_on_who_offers() {
    let roster = ["peer-c", "peer-a", "peer-b", "peer-a"];
    let plans: Vec<_> = ["peer-a", "peer-b", "peer-c"]
        .iter()
        .map(|local| create_session_plan(ROOM, local, &roster).unwrap())
        .collect();

    for plan in &plans {
        assert_eq!(plan.peers.len(), 2);
        for peer in &plan.peers {
            let other = plans
                .iter()
                .find(|candidate| candidate.local_peer_id == peer.peer_id)
                .unwrap();
            let back = other.peer(&plan.local_peer_id).unwrap();
            assert_ne!(peer.initiator, back.initiator);
        }
    }

    let crowded = ["p1", "p2", "p3", "p4", "p5"];
    assert_matches!(
        create_session_plan(ROOM, "p0", &crowded),
        Err(SessionPlanError::TooManyPeers { max: 4, got: 5 })
    );
    assert!(create_session_plan(ROOM, "p1", &crowded).is_ok());
}
