//! Chunked spatial index over entities and objects.
//!
//! Chunks are materialized lazily as entities/objects move into them and
//! carry a version counter viewers use to detect staleness without
//! re-fetching unchanged chunk data.

use std::collections::{HashMap, HashSet};

use crate::geometry::Position;

/// Fixed chunk side length. Wire-visible: viewers compute chunk ids from it.
pub const CHUNK_SIZE: i32 = 32;

/// The chunk coordinate containing `position`.
pub fn chunk_coords(position: Position) -> (i32, i32) {
    (position.x.div_euclid(CHUNK_SIZE), position.y.div_euclid(CHUNK_SIZE))
}

/// The world-space origin (top-left cell) of chunk `(chunk_x, chunk_y)`.
pub fn world_coords(chunk_x: i32, chunk_y: i32) -> Position {
    Position::new(chunk_x * CHUNK_SIZE, chunk_y * CHUNK_SIZE)
}

/// A chunk's membership snapshot and its version counter.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub chunk_x: i32,
    pub chunk_y: i32,
    pub entities: HashSet<String>,
    pub objects: HashSet<String>,
    pub version: u64,
}

impl Chunk {
    fn new(chunk_x: i32, chunk_y: i32) -> Self {
        Self {
            chunk_x,
            chunk_y,
            entities: HashSet::new(),
            objects: HashSet::new(),
            version: 0,
        }
    }

    fn increment_version(&mut self) {
        self.version += 1;
    }
}

/// Tracks which chunk each entity/object currently belongs to, and bumps a
/// chunk's version on every membership change — including a same-chunk move,
/// since viewers rely on the version to know "this chunk's contents moved"
/// even when the moving entity never crossed a chunk boundary.
pub struct ChunkIndex {
    world_width: i32,
    world_height: i32,
    chunks: HashMap<(i32, i32), Chunk>,
    entity_chunks: HashMap<String, (i32, i32)>,
    object_chunks: HashMap<String, (i32, i32)>,
}

impl ChunkIndex {
    pub fn new(world_width: i32, world_height: i32) -> Self {
        Self {
            world_width,
            world_height,
            chunks: HashMap::new(),
            entity_chunks: HashMap::new(),
            object_chunks: HashMap::new(),
        }
    }

    pub fn chunk_count_x(&self) -> i32 {
        (self.world_width + CHUNK_SIZE - 1) / CHUNK_SIZE
    }

    pub fn chunk_count_y(&self) -> i32 {
        (self.world_height + CHUNK_SIZE - 1) / CHUNK_SIZE
    }

    fn get_or_create_chunk(&mut self, chunk_x: i32, chunk_y: i32) -> &mut Chunk {
        self.chunks
            .entry((chunk_x, chunk_y))
            .or_insert_with(|| Chunk::new(chunk_x, chunk_y))
    }

    /// Look up a materialized chunk. Returns `None` for chunks outside world
    /// bounds or never materialized (no entity/object has ever occupied it).
    pub fn get_chunk(&self, chunk_x: i32, chunk_y: i32) -> Option<&Chunk> {
        if chunk_x < 0 || chunk_y < 0 || chunk_x >= self.chunk_count_x() || chunk_y >= self.chunk_count_y()
        {
            return None;
        }
        self.chunks.get(&(chunk_x, chunk_y))
    }

    /// Chunk coordinates covering a viewport, clipped to world bounds and
    /// expanded by `padding` chunks on every side.
    pub fn get_chunks_for_viewport(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        padding: i32,
    ) -> Vec<(i32, i32)> {
        let (min_cx, min_cy) = chunk_coords(Position::new(x, y));
        let (max_cx, max_cy) = chunk_coords(Position::new(x + width - 1, y + height - 1));

        let min_cx = (min_cx - padding).max(0);
        let min_cy = (min_cy - padding).max(0);
        let max_cx = (max_cx + padding).min(self.chunk_count_x() - 1);
        let max_cy = (max_cy + padding).min(self.chunk_count_y() - 1);

        let mut out = Vec::new();
        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                out.push((cx, cy));
            }
        }
        out
    }

    pub fn add_entity(&mut self, entity_id: &str, position: Position) {
        let (cx, cy) = chunk_coords(position);
        let chunk = self.get_or_create_chunk(cx, cy);
        chunk.entities.insert(entity_id.to_string());
        chunk.increment_version();
        self.entity_chunks.insert(entity_id.to_string(), (cx, cy));
    }

    pub fn remove_entity(&mut self, entity_id: &str) {
        if let Some(coord) = self.entity_chunks.remove(entity_id) {
            if let Some(chunk) = self.chunks.get_mut(&coord) {
                chunk.entities.remove(entity_id);
                chunk.increment_version();
            }
        }
    }

    /// Move an entity to a new position, updating chunk membership.
    ///
    /// Always bumps the destination chunk's version, even when the entity
    /// stays within the same chunk — the chunk's rendered contents still
    /// changed. Returns `(old_chunk, new_chunk)` when chunk membership
    /// actually changed, or `(None, None)` for a same-chunk move.
    pub fn update_entity_position(
        &mut self,
        entity_id: &str,
        new_position: Position,
    ) -> (Option<(i32, i32)>, Option<(i32, i32)>) {
        let new_coord = chunk_coords(new_position);
        let old_coord = self.entity_chunks.get(entity_id).copied();

        match old_coord {
            Some(old) if old == new_coord => {
                self.get_or_create_chunk(new_coord.0, new_coord.1).increment_version();
                (None, None)
            }
            Some(old) => {
                if let Some(chunk) = self.chunks.get_mut(&old) {
                    chunk.entities.remove(entity_id);
                    chunk.increment_version();
                }
                let chunk = self.get_or_create_chunk(new_coord.0, new_coord.1);
                chunk.entities.insert(entity_id.to_string());
                chunk.increment_version();
                self.entity_chunks.insert(entity_id.to_string(), new_coord);
                (Some(old), Some(new_coord))
            }
            None => {
                let chunk = self.get_or_create_chunk(new_coord.0, new_coord.1);
                chunk.entities.insert(entity_id.to_string());
                chunk.increment_version();
                self.entity_chunks.insert(entity_id.to_string(), new_coord);
                (None, Some(new_coord))
            }
        }
    }

    pub fn add_object(&mut self, object_id: &str, position: Position) {
        let (cx, cy) = chunk_coords(position);
        let chunk = self.get_or_create_chunk(cx, cy);
        chunk.objects.insert(object_id.to_string());
        chunk.increment_version();
        self.object_chunks.insert(object_id.to_string(), (cx, cy));
    }

    pub fn remove_object(&mut self, object_id: &str) {
        if let Some(coord) = self.object_chunks.remove(object_id) {
            if let Some(chunk) = self.chunks.get_mut(&coord) {
                chunk.objects.remove(object_id);
                chunk.increment_version();
            }
        }
    }

    pub fn get_entity_chunk(&self, entity_id: &str) -> Option<(i32, i32)> {
        self.entity_chunks.get(entity_id).copied()
    }

    pub fn get_object_chunk(&self, object_id: &str) -> Option<(i32, i32)> {
        self.object_chunks.get(object_id).copied()
    }

    /// Union of entity ids across the given chunks.
    pub fn get_entities_in_chunks(&self, chunks: &[(i32, i32)]) -> HashSet<String> {
        let mut out = HashSet::new();
        for coord in chunks {
            if let Some(chunk) = self.chunks.get(coord) {
                out.extend(chunk.entities.iter().cloned());
            }
        }
        out
    }

    pub fn get_objects_in_chunks(&self, chunks: &[(i32, i32)]) -> HashSet<String> {
        let mut out = HashSet::new();
        for coord in chunks {
            if let Some(chunk) = self.chunks.get(coord) {
                out.extend(chunk.objects.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_chunk_move_still_bumps_version() {
        let mut index = ChunkIndex::new(256, 256);
        index.add_entity("a", Position::new(1, 1));
        let before = index.get_chunk(0, 0).unwrap().version;

        let (old, new) = index.update_entity_position("a", Position::new(2, 2));
        assert!(old.is_none());
        assert!(new.is_none());
        assert_eq!(index.get_chunk(0, 0).unwrap().version, before + 1);
    }

    #[test]
    fn cross_chunk_move_updates_membership_and_versions() {
        let mut index = ChunkIndex::new(256, 256);
        index.add_entity("a", Position::new(1, 1));
        let old_version_before = index.get_chunk(0, 0).unwrap().version;

        let (old, new) = index.update_entity_position("a", Position::new(40, 1));
        assert_eq!(old, Some((0, 0)));
        assert_eq!(new, Some((1, 0)));

        assert!(!index.get_chunk(0, 0).unwrap().entities.contains("a"));
        assert!(index.get_chunk(1, 0).unwrap().entities.contains("a"));
        assert_eq!(index.get_entity_chunk("a"), Some((1, 0)));

        // Both chunks' versions increment (spec.md §8 scenario 9).
        assert_eq!(index.get_chunk(0, 0).unwrap().version, old_version_before + 1);
        assert!(index.get_chunk(1, 0).unwrap().version >= 1);
    }

    #[test]
    fn viewport_query_is_clipped_to_world_bounds() {
        let index = ChunkIndex::new(64, 64); // 2x2 chunks
        let chunks = index.get_chunks_for_viewport(0, 0, 32, 32, 1);
        // padding pushes one chunk left/up, clipped to 0; one right/down, clipped to 1
        assert!(chunks.contains(&(0, 0)));
        assert!(chunks.contains(&(1, 1)));
        assert!(chunks.iter().all(|&(x, y)| (0..2).contains(&x) && (0..2).contains(&y)));
    }

    #[test]
    fn get_chunk_out_of_bounds_is_none() {
        let index = ChunkIndex::new(32, 32);
        assert!(index.get_chunk(5, 5).is_none());
    }
}
