//! World state store: entities, objects, terrain, and the invariants that
//! bind their position indices together.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Position;

/// Errors raised at the store boundary. These indicate programmer error in
/// callers (an invariant the caller was supposed to uphold was violated) and
/// are surfaced to the RPC layer as internal errors, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {0} already exists")]
    EntityAlreadyExists(String),
    #[error("entity {0} not found")]
    EntityNotFound(String),
    #[error("position {0} already occupied by {1}")]
    PositionOccupied(Position, String),
    #[error("object {0} already exists")]
    ObjectAlreadyExists(String),
    #[error("object {0} not found")]
    ObjectNotFound(String),
}

/// Immutable mapping from item type to a positive count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    items: Vec<(String, u32)>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, item_type: &str) -> u32 {
        self.items
            .iter()
            .find(|(k, _)| k == item_type)
            .map_or(0, |(_, v)| *v)
    }

    pub fn has(&self, item_type: &str, amount: u32) -> bool {
        self.count(item_type) >= amount
    }

    /// Return a new inventory with `amount` more of `item_type`.
    #[must_use]
    pub fn add(&self, item_type: &str, amount: u32) -> Self {
        let mut items = self.items.clone();
        match items.iter_mut().find(|(k, _)| k == item_type) {
            Some((_, v)) => *v += amount,
            None => items.push((item_type.to_string(), amount)),
        }
        Self { items }
    }

    /// Return a new inventory with `amount` less of `item_type`.
    ///
    /// # Errors
    /// Fails if the inventory holds less than `amount` of `item_type`,
    /// leaving the original inventory unaffected.
    pub fn remove(&self, item_type: &str, amount: u32) -> Result<Self, InsufficientItemsError> {
        let current = self.count(item_type);
        if current < amount {
            return Err(InsufficientItemsError {
                item_type: item_type.to_string(),
                requested: amount,
                available: current,
            });
        }
        let mut items = self.items.clone();
        let remaining = current - amount;
        items.retain(|(k, _)| k != item_type);
        if remaining > 0 {
            items.push((item_type.to_string(), remaining));
        }
        Ok(Self { items })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot remove {requested} {item_type}, only have {available}")]
pub struct InsufficientItemsError {
    pub item_type: String,
    pub requested: u32,
    pub available: u32,
}

/// Wire-visible floor code -> (walkable, opaque, floor_type) table.
///
/// This mapping must not be renumbered; it is part of the wire contract
/// between terrain generation (external) and every consumer of chunk data.
pub const FLOOR_CODE_TABLE: [(bool, bool, &str); 7] = [
    (false, false, "deep_water"),  // 0
    (true, false, "shallow_water"), // 1
    (true, false, "sand"),          // 2
    (true, false, "grass"),         // 3
    (true, false, "dirt"),          // 4
    (false, true, "mountain"),      // 5
    (true, false, "stone"),         // 6 - default
];

/// Floor code used to pad terrain chunks that extend past world bounds, and
/// the default for cells with no dense terrain and no sparse override.
pub const DEFAULT_FLOOR_CODE: u8 = 6;

fn floor_code_properties(code: u8) -> (bool, bool, &'static str) {
    FLOOR_CODE_TABLE
        .get(code as usize)
        .copied()
        .unwrap_or(FLOOR_CODE_TABLE[DEFAULT_FLOOR_CODE as usize])
}

/// Derived tile properties at a position. Never owned directly by `World`
/// except via the sparse override map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub walkable: bool,
    pub opaque: bool,
    pub floor_type: &'static str,
}

impl Tile {
    pub const fn from_floor_code(code: u8) -> Self {
        match code as usize {
            0..=6 => {
                let (w, o, f) = FLOOR_CODE_TABLE[code as usize];
                Self {
                    walkable: w,
                    opaque: o,
                    floor_type: f,
                }
            }
            _ => Self {
                walkable: true,
                opaque: false,
                floor_type: "stone",
            },
        }
    }

    /// The non-walkable, opaque tile used for out-of-bounds positions.
    pub const fn out_of_bounds() -> Self {
        Self {
            walkable: false,
            opaque: true,
            floor_type: "out_of_bounds",
        }
    }

    pub const DEFAULT: Self = Self {
        walkable: true,
        opaque: false,
        floor_type: "stone",
    };
}

/// Immutable entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub position: Position,
    pub entity_type: String,
    pub tags: Vec<String>,
    pub status_bits: u32,
    pub inventory: Inventory,
}

impl Entity {
    pub fn new(entity_id: impl Into<String>, position: Position) -> Self {
        Self {
            entity_id: entity_id.into(),
            position,
            entity_type: "default".to_string(),
            tags: Vec::new(),
            status_bits: 0,
            inventory: Inventory::new(),
        }
    }

    #[must_use]
    pub fn with_position(&self, new_position: Position) -> Self {
        Self {
            position: new_position,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_inventory(&self, new_inventory: Inventory) -> Self {
        Self {
            inventory: new_inventory,
            ..self.clone()
        }
    }
}

/// Immutable world object record. Many objects may share a position;
/// objects never block entity movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    pub object_id: String,
    pub position: Position,
    pub object_type: String,
    state: Vec<(String, String)>,
}

impl WorldObject {
    pub fn new(object_id: impl Into<String>, position: Position, object_type: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            position,
            object_type: object_type.into(),
            state: Vec::new(),
        }
    }

    pub fn get_state(&self, key: &str) -> Option<&str> {
        self.state
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_state_or(&self, key: &str, default: &str) -> String {
        self.get_state(key).unwrap_or(default).to_string()
    }

    #[must_use]
    pub fn with_state(&self, key: &str, value: impl Into<String>) -> Self {
        let mut state = self.state.clone();
        match state.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.into(),
            None => state.push((key.to_string(), value.into())),
        }
        Self {
            state,
            ..self.clone()
        }
    }
}

/// Mutable world state: entities, objects, and terrain.
///
/// Grid is sparse: only overridden tiles are stored. An optional dense
/// terrain array provides bulk storage (row-major, `height * width`
/// floor codes) for efficient chunk extraction.
pub struct World {
    pub width: i32,
    pub height: i32,
    pub tick: u64,

    floor_array: Option<Vec<u8>>,
    tiles: HashMap<Position, Tile>,

    entities: HashMap<String, Entity>,
    entity_positions: HashMap<Position, String>,

    objects: HashMap<String, WorldObject>,
    object_positions: HashMap<Position, Vec<String>>,
}

impl World {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            tick: 0,
            floor_array: None,
            tiles: HashMap::new(),
            entities: HashMap::new(),
            entity_positions: HashMap::new(),
            objects: HashMap::new(),
            object_positions: HashMap::new(),
        }
    }

    /// Install a dense terrain array. `floor_array.len()` must equal
    /// `width * height`, row-major (`[y * width + x]`).
    ///
    /// # Panics
    /// Panics if the array length doesn't match `width * height` — this is a
    /// caller invariant, not a runtime condition.
    pub fn set_floor_array(&mut self, floor_array: Vec<u8>) {
        assert_eq!(
            floor_array.len(),
            (self.width * self.height) as usize,
            "floor array length must equal width * height"
        );
        self.floor_array = Some(floor_array);
    }

    // --- Tile operations -----------------------------------------------

    pub fn in_bounds(&self, position: Position) -> bool {
        position.x >= 0 && position.x < self.width && position.y >= 0 && position.y < self.height
    }

    pub fn get_tile(&self, position: Position) -> Tile {
        if !self.in_bounds(position) {
            return Tile::out_of_bounds();
        }
        if let Some(tile) = self.tiles.get(&position) {
            return *tile;
        }
        if let Some(floor) = &self.floor_array {
            let idx = (position.y * self.width + position.x) as usize;
            return Tile::from_floor_code(floor[idx]);
        }
        Tile::DEFAULT
    }

    pub fn set_tile(&mut self, position: Position, tile: Tile) {
        self.tiles.insert(position, tile);
    }

    pub fn is_walkable(&self, position: Position) -> bool {
        if !self.in_bounds(position) {
            return false;
        }
        if let Some(tile) = self.tiles.get(&position) {
            return tile.walkable;
        }
        if let Some(floor) = &self.floor_array {
            let idx = (position.y * self.width + position.x) as usize;
            return floor_code_properties(floor[idx]).0;
        }
        true
    }

    /// Extract an `S x S` terrain chunk. Cells beyond world bounds are
    /// padded with [`DEFAULT_FLOOR_CODE`]; sparse overrides apply on top.
    pub fn get_terrain_chunk(&self, chunk_x: i32, chunk_y: i32, chunk_size: i32) -> Vec<u8> {
        let x_start = chunk_x * chunk_size;
        let y_start = chunk_y * chunk_size;
        let mut chunk = vec![DEFAULT_FLOOR_CODE; (chunk_size * chunk_size) as usize];

        if let Some(floor) = &self.floor_array {
            for local_y in 0..chunk_size {
                let wy = y_start + local_y;
                if wy < 0 || wy >= self.height {
                    continue;
                }
                for local_x in 0..chunk_size {
                    let wx = x_start + local_x;
                    if wx < 0 || wx >= self.width {
                        continue;
                    }
                    let src = (wy * self.width + wx) as usize;
                    let dst = (local_y * chunk_size + local_x) as usize;
                    chunk[dst] = floor[src];
                }
            }
        }

        for (pos, tile) in &self.tiles {
            let local_x = pos.x - x_start;
            let local_y = pos.y - y_start;
            if local_x >= 0 && local_x < chunk_size && local_y >= 0 && local_y < chunk_size {
                let code = FLOOR_CODE_TABLE
                    .iter()
                    .position(|(_, _, name)| *name == tile.floor_type)
                    .map_or(DEFAULT_FLOOR_CODE, |i| i as u8);
                chunk[(local_y * chunk_size + local_x) as usize] = code;
            }
        }

        chunk
    }

    // --- Entity operations -----------------------------------------------

    pub fn add_entity(&mut self, entity: Entity) -> Result<(), WorldError> {
        if self.entities.contains_key(&entity.entity_id) {
            return Err(WorldError::EntityAlreadyExists(entity.entity_id));
        }
        if let Some(occupant) = self.entity_positions.get(&entity.position) {
            return Err(WorldError::PositionOccupied(entity.position, occupant.clone()));
        }
        self.entity_positions.insert(entity.position, entity.entity_id.clone());
        self.entities.insert(entity.entity_id.clone(), entity);
        Ok(())
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<&Entity, WorldError> {
        self.entities
            .get(entity_id)
            .ok_or_else(|| WorldError::EntityNotFound(entity_id.to_string()))
    }

    pub fn get_entity_at(&self, position: Position) -> Option<&Entity> {
        self.entity_positions
            .get(&position)
            .and_then(|id| self.entities.get(id))
    }

    pub fn remove_entity(&mut self, entity_id: &str) -> Result<Entity, WorldError> {
        let entity = self
            .entities
            .remove(entity_id)
            .ok_or_else(|| WorldError::EntityNotFound(entity_id.to_string()))?;
        self.entity_positions.remove(&entity.position);
        Ok(entity)
    }

    /// Atomically move an entity: remove its old position-index entry and
    /// insert the new one before anything else can observe an inconsistent
    /// state. Critical for the movement resolver's chain-following property
    /// (see `movement.rs` tests).
    pub fn update_entity_position(
        &mut self,
        entity_id: &str,
        new_position: Position,
    ) -> Result<(), WorldError> {
        let entity = self
            .entities
            .get(entity_id)
            .ok_or_else(|| WorldError::EntityNotFound(entity_id.to_string()))?;
        let old_position = entity.position;

        self.entity_positions.remove(&old_position);
        self.entity_positions.insert(new_position, entity_id.to_string());

        let updated = entity.with_position(new_position);
        self.entities.insert(entity_id.to_string(), updated);
        Ok(())
    }

    pub fn update_entity_inventory(
        &mut self,
        entity_id: &str,
        new_inventory: Inventory,
    ) -> Result<(), WorldError> {
        let entity = self
            .entities
            .get(entity_id)
            .ok_or_else(|| WorldError::EntityNotFound(entity_id.to_string()))?;
        let updated = entity.with_inventory(new_inventory);
        self.entities.insert(entity_id.to_string(), updated);
        Ok(())
    }

    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // --- Object operations -----------------------------------------------

    pub fn add_object(&mut self, object: WorldObject) -> Result<(), WorldError> {
        if self.objects.contains_key(&object.object_id) {
            return Err(WorldError::ObjectAlreadyExists(object.object_id));
        }
        self.object_positions
            .entry(object.position)
            .or_default()
            .push(object.object_id.clone());
        self.objects.insert(object.object_id.clone(), object);
        Ok(())
    }

    pub fn get_object(&self, object_id: &str) -> Result<&WorldObject, WorldError> {
        self.objects
            .get(object_id)
            .ok_or_else(|| WorldError::ObjectNotFound(object_id.to_string()))
    }

    /// Objects at a position, in deterministic registry-insertion order.
    pub fn get_objects_at(&self, position: Position) -> Vec<&WorldObject> {
        self.object_positions
            .get(&position)
            .into_iter()
            .flatten()
            .filter_map(|id| self.objects.get(id))
            .collect()
    }

    pub fn update_object(&mut self, object: WorldObject) -> Result<(), WorldError> {
        if !self.objects.contains_key(&object.object_id) {
            return Err(WorldError::ObjectNotFound(object.object_id));
        }
        self.objects.insert(object.object_id.clone(), object);
        Ok(())
    }

    pub fn all_objects(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects.values()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Increment the tick counter. Called exactly once per scheduler cycle.
    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_add_remove_round_trips() {
        let inv = Inventory::new().add("berry", 3);
        assert_eq!(inv.count("berry"), 3);
        let inv2 = inv.remove("berry", 3).unwrap();
        assert_eq!(inv2.count("berry"), 0);
    }

    #[test]
    fn inventory_remove_insufficient_fails_and_preserves() {
        let inv = Inventory::new().add("berry", 1);
        let err = inv.remove("berry", 2).unwrap_err();
        assert_eq!(err.available, 1);
        assert_eq!(inv.count("berry"), 1); // unaffected
    }

    #[test]
    fn add_entity_rejects_duplicate_id_and_position() {
        let mut world = World::new(10, 10);
        world.add_entity(Entity::new("a", Position::new(1, 1))).unwrap();

        let err = world
            .add_entity(Entity::new("a", Position::new(2, 2)))
            .unwrap_err();
        assert_eq!(err, WorldError::EntityAlreadyExists("a".to_string()));

        let err = world
            .add_entity(Entity::new("b", Position::new(1, 1)))
            .unwrap_err();
        assert_eq!(
            err,
            WorldError::PositionOccupied(Position::new(1, 1), "a".to_string())
        );
    }

    #[test]
    fn update_entity_position_is_atomic_in_index() {
        let mut world = World::new(10, 10);
        world.add_entity(Entity::new("a", Position::new(3, 3))).unwrap();
        world.update_entity_position("a", Position::new(4, 3)).unwrap();

        assert!(world.get_entity_at(Position::new(3, 3)).is_none());
        assert_eq!(world.get_entity_at(Position::new(4, 3)).unwrap().entity_id, "a");
    }

    #[test]
    fn out_of_bounds_is_unwalkable_and_opaque() {
        let world = World::new(5, 5);
        let tile = world.get_tile(Position::new(-1, 0));
        assert!(!tile.walkable);
        assert!(tile.opaque);
        assert!(!world.is_walkable(Position::new(5, 5)));
    }

    #[test]
    fn terrain_chunk_pads_out_of_bounds_with_default_code() {
        let mut world = World::new(4, 4);
        world.set_floor_array(vec![3; 16]); // all grass
        let chunk = world.get_terrain_chunk(0, 0, 8);
        // (6,6) is outside the 4x4 world -> padded with default stone (6)
        assert_eq!(chunk[6 * 8 + 6], DEFAULT_FLOOR_CODE);
        // (1,1) is inside the world -> grass (3)
        assert_eq!(chunk[1 * 8 + 1], 3);
    }

    #[test]
    fn collectible_object_order_is_registry_order() {
        let mut world = World::new(10, 10);
        world
            .add_object(WorldObject::new("bush-2", Position::new(1, 1), "bush"))
            .unwrap();
        world
            .add_object(WorldObject::new("bush-1", Position::new(1, 1), "bush"))
            .unwrap();
        let ids: Vec<_> = world
            .get_objects_at(Position::new(1, 1))
            .into_iter()
            .map(|o| o.object_id.as_str())
            .collect();
        assert_eq!(ids, vec!["bush-2", "bush-1"]);
    }
}
