//! Movement conflict resolution.
//!
//! Claims are resolved in a fixed order: swap detection, cycle detection
//! (chains longer than a simple swap), same-destination races, then
//! non-mover occupancy. Each phase only looks at claims still standing
//! after the previous one.

use std::collections::HashMap;

use crate::geometry::{Direction, Position};
use crate::state::World;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveClaim {
    pub entity_id: String,
    pub from_pos: Position,
    pub to_pos: Position,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub entity_id: String,
    pub success: bool,
    pub from_pos: Position,
    pub to_pos: Position,
    pub failure_reason: Option<&'static str>,
}

/// Validate a single entity's move intent against world geometry.
///
/// Returns `None` (silently invalid, no claim produced) when the target is
/// out of bounds, unwalkable, or cuts a diagonal corner between two
/// unwalkable cardinal neighbors.
pub fn validate_move(world: &World, entity_id: &str, direction: Direction) -> Option<MoveClaim> {
    let entity = world.get_entity(entity_id).ok()?;
    let from_pos = entity.position;
    let to_pos = from_pos.offset(direction);

    if !world.in_bounds(to_pos) || !world.is_walkable(to_pos) {
        return None;
    }

    if let Some((c1, c2)) = direction.diagonal_components() {
        let corner1 = from_pos.offset(c1);
        let corner2 = from_pos.offset(c2);
        if !world.is_walkable(corner1) || !world.is_walkable(corner2) {
            return None;
        }
    }

    Some(MoveClaim {
        entity_id: entity_id.to_string(),
        from_pos,
        to_pos,
        direction,
    })
}

struct Resolution {
    failed: Vec<Option<&'static str>>,
}

/// Resolve a batch of move claims into winners and losers.
///
/// Order: swap conflicts, then chain cycles longer than a swap (> 2
/// entities), then same-destination races (lexicographically smallest
/// `entity_id` wins), then occupancy by a non-moving entity.
pub fn resolve_conflicts(world: &World, claims: &[MoveClaim]) -> Vec<MoveResult> {
    let mut resolution = Resolution {
        failed: vec![None; claims.len()],
    };

    let entity_to_claim: HashMap<&str, usize> = claims
        .iter()
        .enumerate()
        .map(|(i, c)| (c.entity_id.as_str(), i))
        .collect();

    detect_swaps(claims, &mut resolution);
    detect_cycles(claims, &entity_to_claim, &mut resolution);
    resolve_same_destination_races(claims, &mut resolution);
    resolve_non_mover_occupancy(world, claims, &entity_to_claim, &mut resolution);

    claims
        .iter()
        .enumerate()
        .map(|(i, claim)| {
            let success = resolution.failed[i].is_none();
            MoveResult {
                entity_id: claim.entity_id.clone(),
                success,
                from_pos: claim.from_pos,
                // Losers never move: to_pos reports the unchanged position,
                // not the attempted destination (spec.md §8: "if not
                // success, from == to and the entity's stored position is
                // unchanged").
                to_pos: if success { claim.to_pos } else { claim.from_pos },
                failure_reason: resolution.failed[i],
            }
        })
        .collect()
}

fn detect_swaps(claims: &[MoveClaim], resolution: &mut Resolution) {
    let from_index: HashMap<Position, usize> = claims
        .iter()
        .enumerate()
        .map(|(i, c)| (c.from_pos, i))
        .collect();

    for i in 0..claims.len() {
        if let Some(&j) = from_index.get(&claims[i].to_pos) {
            if j != i && claims[j].to_pos == claims[i].from_pos {
                resolution.failed[i] = Some("swap_conflict");
                resolution.failed[j] = Some("swap_conflict");
            }
        }
    }
}

/// Walk the chain of claims rooted at each unvisited entity, following
/// `to_pos -> occupant's claim` links. A chain that loops back on itself
/// with more than two participants is a cycle; a two-participant loop is a
/// swap and was already handled in the prior phase.
fn detect_cycles(claims: &[MoveClaim], entity_to_claim: &HashMap<&str, usize>, resolution: &mut Resolution) {
    let pos_to_entity: HashMap<Position, &str> = claims
        .iter()
        .enumerate()
        .filter(|(i, _)| resolution.failed[*i].is_none())
        .map(|(_, c)| (c.from_pos, c.entity_id.as_str()))
        .collect();

    let mut visited_global: HashMap<&str, bool> = HashMap::new();

    for claim in claims.iter().filter(|c| resolution.failed[entity_to_claim[c.entity_id.as_str()]].is_none()) {
        if *visited_global.get(claim.entity_id.as_str()).unwrap_or(&false) {
            continue;
        }

        let mut chain: Vec<&str> = Vec::new();
        let mut current_id: &str = claim.entity_id.as_str();

        loop {
            if let Some(pos) = chain.iter().position(|id| *id == current_id) {
                let cycle_members = &chain[pos..];
                if cycle_members.len() > 2 {
                    for &id in cycle_members {
                        resolution.failed[entity_to_claim[id]] = Some("cycle_conflict");
                    }
                }
                break;
            }

            chain.push(current_id);
            visited_global.insert(current_id, true);

            let idx = entity_to_claim[current_id];
            if resolution.failed[idx].is_some() {
                break;
            }
            let next_pos = claims[idx].to_pos;
            match pos_to_entity.get(&next_pos) {
                Some(&next_id) => current_id = next_id,
                None => break,
            }
        }
    }
}

fn resolve_same_destination_races(claims: &[MoveClaim], resolution: &mut Resolution) {
    let mut dest_to_claims: HashMap<Position, Vec<usize>> = HashMap::new();
    for (i, claim) in claims.iter().enumerate() {
        if resolution.failed[i].is_none() {
            dest_to_claims.entry(claim.to_pos).or_default().push(i);
        }
    }

    for (_, mut contenders) in dest_to_claims {
        if contenders.len() <= 1 {
            continue;
        }
        contenders.sort_by(|&a, &b| claims[a].entity_id.cmp(&claims[b].entity_id));
        for &loser in &contenders[1..] {
            resolution.failed[loser] = Some("same_destination_conflict");
        }
    }
}

fn resolve_non_mover_occupancy(
    world: &World,
    claims: &[MoveClaim],
    entity_to_claim: &HashMap<&str, usize>,
    resolution: &mut Resolution,
) {
    for i in 0..claims.len() {
        if resolution.failed[i].is_some() {
            continue;
        }
        if let Some(occupant) = world.get_entity_at(claims[i].to_pos) {
            if !entity_to_claim.contains_key(occupant.entity_id.as_str()) {
                resolution.failed[i] = Some("destination_occupied");
            }
        }
    }
}

/// Apply every successful result's move to the world.
pub fn enact_moves(world: &mut World, results: &[MoveResult]) {
    for result in results {
        if result.success {
            world
                .update_entity_position(&result.entity_id, result.to_pos)
                .expect("winning claim's entity must still exist");
        }
    }
}

/// Validate intents, resolve conflicts, and enact the winners in one pass.
pub fn process_movement_phase(
    world: &mut World,
    intents: &[(String, Direction)],
) -> Vec<MoveResult> {
    let claims: Vec<MoveClaim> = intents
        .iter()
        .filter_map(|(entity_id, direction)| validate_move(world, entity_id, *direction))
        .collect();

    let results = resolve_conflicts(world, &claims);
    enact_moves(world, &results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Entity;

    fn world_with_entities(positions: &[(&str, i32, i32)]) -> World {
        let mut world = World::new(20, 20);
        for (id, x, y) in positions {
            world.add_entity(Entity::new(*id, Position::new(*x, *y))).unwrap();
        }
        world
    }

    #[test]
    fn simple_move_succeeds() {
        let mut world = world_with_entities(&[("a", 5, 5)]);
        let results = process_movement_phase(&mut world, &[("a".to_string(), Direction::East)]);
        assert!(results[0].success);
        assert_eq!(world.get_entity("a").unwrap().position, Position::new(6, 5));
    }

    #[test]
    fn swap_conflict_fails_both() {
        let mut world = world_with_entities(&[("a", 5, 5), ("b", 6, 5)]);
        let results = process_movement_phase(
            &mut world,
            &[
                ("a".to_string(), Direction::East),
                ("b".to_string(), Direction::West),
            ],
        );
        assert!(results.iter().all(|r| !r.success));
        assert!(results.iter().all(|r| r.failure_reason == Some("swap_conflict")));
    }

    #[test]
    fn cycle_of_three_all_fail() {
        // a -> b's cell, b -> c's cell, c -> a's cell: a closed 3-cycle.
        let mut world = world_with_entities(&[("a", 0, 0), ("b", 1, 0), ("c", 0, 1)]);
        let results = process_movement_phase(
            &mut world,
            &[
                ("a".to_string(), Direction::East),     // (0,0) -> (1,0) = b
                ("b".to_string(), Direction::Southwest), // (1,0) -> (0,1) = c
                ("c".to_string(), Direction::North),     // (0,1) -> (0,0) = a
            ],
        );
        assert!(results.iter().all(|r| !r.success));
        assert!(results.iter().all(|r| r.failure_reason == Some("cycle_conflict")));
    }

    #[test]
    fn chain_follow_succeeds_when_not_closed() {
        // a moves into b's cell, b moves out of the way: not a cycle, just a chain.
        let mut world = world_with_entities(&[("a", 0, 0), ("b", 1, 0)]);
        let results = process_movement_phase(
            &mut world,
            &[
                ("a".to_string(), Direction::East), // a -> (1,0), b's old cell
                ("b".to_string(), Direction::East), // b -> (2,0), empty
            ],
        );
        assert!(results.iter().all(|r| r.success));
        assert_eq!(world.get_entity("a").unwrap().position, Position::new(1, 0));
        assert_eq!(world.get_entity("b").unwrap().position, Position::new(2, 0));
    }

    #[test]
    fn same_destination_race_lexicographic_winner() {
        let mut world = world_with_entities(&[("zz", 0, 1), ("aa", 2, 1)]);
        let results = process_movement_phase(
            &mut world,
            &[
                ("zz".to_string(), Direction::East), // -> (1,1)
                ("aa".to_string(), Direction::West), // -> (1,1)
            ],
        );
        let winner = results.iter().find(|r| r.entity_id == "aa").unwrap();
        let loser = results.iter().find(|r| r.entity_id == "zz").unwrap();
        assert!(winner.success);
        assert!(!loser.success);
        assert_eq!(loser.failure_reason, Some("same_destination_conflict"));
    }

    #[test]
    fn destination_occupied_by_stationary_entity_fails() {
        let mut world = world_with_entities(&[("a", 0, 0), ("stationary", 1, 0)]);
        let results = process_movement_phase(&mut world, &[("a".to_string(), Direction::East)]);
        assert!(!results[0].success);
        assert_eq!(results[0].failure_reason, Some("destination_occupied"));
    }

    #[test]
    fn failed_result_reports_from_equal_to_and_leaves_entity_unmoved() {
        let mut world = world_with_entities(&[("a", 5, 5), ("b", 6, 5)]);
        let results = process_movement_phase(
            &mut world,
            &[
                ("a".to_string(), Direction::East),
                ("b".to_string(), Direction::West),
            ],
        );
        for r in &results {
            assert!(!r.success);
            assert_eq!(r.from_pos, r.to_pos);
        }
        assert_eq!(world.get_entity("a").unwrap().position, Position::new(5, 5));
        assert_eq!(world.get_entity("b").unwrap().position, Position::new(6, 5));
    }

    #[test]
    fn diagonal_corner_cutting_is_rejected() {
        let mut world = world_with_entities(&[("a", 1, 1)]);
        world.set_tile(Position::new(0, 1), crate::state::Tile::from_floor_code(0)); // unwalkable west
        let claim = validate_move(&world, "a", Direction::Northwest);
        assert!(claim.is_none());
    }
}
