//! Per-entity observation fan-out.
//!
//! Each controller holding a valid lease on an entity gets a bounded mailbox
//! of [`Observation`] snapshots, one per tick. Visibility is global — no
//! line-of-sight filtering (see module docs on why this is out of scope).

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::geometry::Position;
use crate::lease::LeaseManager;
use crate::state::{Tile, World};

/// Mailbox depth per subscriber. A full mailbox means the subscriber isn't
/// draining fast enough; the newest observation is dropped rather than
/// blocking the tick that produced it.
const OBSERVATION_MAILBOX_CAPACITY: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedEntity {
    pub entity_id: String,
    pub position: Position,
    pub entity_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedTile {
    pub position: Position,
    pub floor_type: &'static str,
    pub walkable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tick_id: u64,
    pub deadline_ms: u64,
    pub self_entity: ObservedEntity,
    pub visible_entities: Vec<ObservedEntity>,
    pub visible_tiles: Vec<ObservedTile>,
    /// Empty at tick start: there is nothing from the tick in progress to
    /// report yet. Reserved for a future pass that attaches the previous
    /// tick's movement/action results.
    pub events: Vec<String>,
}

const NEARBY_TILE_RADIUS: i32 = 5;

fn to_observed(entity: &crate::state::Entity) -> ObservedEntity {
    ObservedEntity {
        entity_id: entity.entity_id.clone(),
        position: entity.position,
        entity_type: entity.entity_type.clone(),
    }
}

fn nearby_tiles(world: &World, center: Position) -> Vec<ObservedTile> {
    let mut tiles = Vec::new();
    for dy in -NEARBY_TILE_RADIUS..=NEARBY_TILE_RADIUS {
        for dx in -NEARBY_TILE_RADIUS..=NEARBY_TILE_RADIUS {
            let pos = Position::new(center.x + dx, center.y + dy);
            if !world.in_bounds(pos) {
                continue;
            }
            let tile: Tile = world.get_tile(pos);
            tiles.push(ObservedTile {
                position: pos,
                floor_type: tile.floor_type,
                walkable: tile.walkable,
            });
        }
    }
    tiles
}

/// Build the observation for `entity_id` as of `tick_id`. Visibility is
/// global: every other entity in the world is visible, regardless of
/// distance or intervening terrain.
pub fn generate_observation(world: &World, entity_id: &str, tick_id: u64, deadline_ms: u64) -> Option<Observation> {
    let entity = world.get_entity(entity_id).ok()?;
    let visible_entities = world
        .all_entities()
        .filter(|e| e.entity_id != entity_id)
        .map(to_observed)
        .collect();
    let visible_tiles = nearby_tiles(world, entity.position);

    Some(Observation {
        tick_id,
        deadline_ms,
        self_entity: to_observed(entity),
        visible_entities,
        visible_tiles,
        events: Vec::new(),
    })
}

struct Subscriber {
    lease_id: String,
    sender: mpsc::Sender<Observation>,
}

/// Registry of per-entity observation subscribers, validated against active
/// leases before every broadcast.
#[derive(Default)]
pub struct ObservationHub {
    subscribers: HashMap<String, Subscriber>,
}

impl ObservationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for `entity_id`, returning the receiving end
    /// of its mailbox. Replaces any existing subscription for the entity.
    pub fn subscribe(&mut self, entity_id: &str, lease_id: &str) -> mpsc::Receiver<Observation> {
        let (tx, rx) = mpsc::channel(OBSERVATION_MAILBOX_CAPACITY);
        self.subscribers.insert(
            entity_id.to_string(),
            Subscriber {
                lease_id: lease_id.to_string(),
                sender: tx,
            },
        );
        rx
    }

    pub fn unsubscribe(&mut self, entity_id: &str) {
        self.subscribers.remove(entity_id);
    }

    /// Generate and push an observation to every subscriber whose lease is
    /// still valid, for the tick that just opened. A subscriber whose lease
    /// has expired or been released is dropped here, closing its mailbox —
    /// the receiving end observes that as the stream ending, the equivalent
    /// of the original's permission-denied stream termination.
    pub fn broadcast(&mut self, world: &World, lease_manager: &mut LeaseManager, tick_id: u64, deadline_ms: u64) {
        self.subscribers.retain(|entity_id, subscriber| {
            if !lease_manager.is_valid_lease(&subscriber.lease_id, entity_id) {
                return false;
            }
            let Some(observation) = generate_observation(world, entity_id, tick_id, deadline_ms) else {
                return false;
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.sender.try_send(observation) {
                warn!("observation mailbox full for entity {entity_id}, dropping tick {tick_id}");
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Entity;

    #[test]
    fn observation_sees_all_other_entities_globally() {
        let mut world = World::new(50, 50);
        world.add_entity(Entity::new("a", Position::new(0, 0))).unwrap();
        world.add_entity(Entity::new("b", Position::new(40, 40))).unwrap();

        let obs = generate_observation(&world, "a", 1, 500).unwrap();
        assert_eq!(obs.visible_entities.len(), 1);
        assert_eq!(obs.visible_entities[0].entity_id, "b");
    }

    #[test]
    fn nearby_tiles_excludes_out_of_bounds() {
        let world = World::new(3, 3);
        let tiles = nearby_tiles(&world, Position::new(0, 0));
        assert!(tiles.iter().all(|t| world.in_bounds(t.position)));
    }
}
