//! Black-box tests driving the movement, chunk, and lease modules together
//! the way a tick's integration phase would, without spinning up the async
//! scheduler loop.

use std::sync::Arc;

use gridworld::chunk::ChunkIndex;
use gridworld::geometry::{Direction, Position};
use gridworld::lease::LeaseManager;
use gridworld::movement::process_movement_phase;
use gridworld::tick::FakeClock;
use gridworld::{Entity, World};

fn setup_world(width: i32, height: i32) -> (World, ChunkIndex) {
    (World::new(width, height), ChunkIndex::new(width, height))
}

#[test]
fn a_full_tick_moves_entities_and_bumps_chunk_versions() {
    let (mut world, mut chunk_index) = setup_world(64, 64);
    world.add_entity(Entity::new("scout", Position::new(10, 10))).unwrap();
    chunk_index.add_entity("scout", Position::new(10, 10));

    let version_before = chunk_index.get_chunk(0, 0).unwrap().version;

    let results = process_movement_phase(&mut world, &[("scout".to_string(), Direction::East)]);
    assert!(results[0].success);
    for result in &results {
        if result.success {
            chunk_index.update_entity_position(&result.entity_id, result.to_pos);
        }
    }

    assert_eq!(world.get_entity("scout").unwrap().position, Position::new(11, 10));
    assert!(chunk_index.get_chunk(0, 0).unwrap().version > version_before);
}

#[test]
fn two_entities_racing_for_one_cell_only_one_moves() {
    let (mut world, _chunk_index) = setup_world(64, 64);
    world.add_entity(Entity::new("bravo", Position::new(0, 1))).unwrap();
    world.add_entity(Entity::new("alpha", Position::new(2, 1))).unwrap();

    let results = process_movement_phase(
        &mut world,
        &[
            ("bravo".to_string(), Direction::East),
            ("alpha".to_string(), Direction::West),
        ],
    );

    let successes: Vec<_> = results.iter().filter(|r| r.success).collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].entity_id, "alpha"); // lexicographically smaller wins
    assert_eq!(world.get_entity("alpha").unwrap().position, Position::new(1, 1));
    assert_eq!(world.get_entity("bravo").unwrap().position, Position::new(0, 1));
}

#[test]
fn lease_must_be_reacquired_by_a_different_controller_after_expiry() {
    let clock = Arc::new(FakeClock::new(0));
    let mut leases = LeaseManager::new(1000, clock.clone());

    let original = leases.acquire("scout", "player-1").unwrap();
    assert!(leases.is_valid_lease(&original.lease_id, "scout"));

    let err = leases.acquire("scout", "player-2").unwrap_err();
    assert!(err.to_string().contains("player-1"));

    clock.advance(1001);
    let reacquired = leases.acquire("scout", "player-2").unwrap();
    assert_eq!(reacquired.controller_id, "player-2");
    assert!(!leases.is_valid_lease(&original.lease_id, "scout"));
}

#[test]
fn chained_moves_through_vacated_cells_all_succeed() {
    let (mut world, _chunk_index) = setup_world(64, 64);
    world.add_entity(Entity::new("a", Position::new(0, 0))).unwrap();
    world.add_entity(Entity::new("b", Position::new(1, 0))).unwrap();
    world.add_entity(Entity::new("c", Position::new(2, 0))).unwrap();

    let results = process_movement_phase(
        &mut world,
        &[
            ("a".to_string(), Direction::East),
            ("b".to_string(), Direction::East),
            ("c".to_string(), Direction::East),
        ],
    );

    assert!(results.iter().all(|r| r.success));
    assert_eq!(world.get_entity("a").unwrap().position, Position::new(1, 0));
    assert_eq!(world.get_entity("b").unwrap().position, Position::new(2, 0));
    assert_eq!(world.get_entity("c").unwrap().position, Position::new(3, 0));
}
