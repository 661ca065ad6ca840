//! Viewer fan-out: chunk-subscription diffing and tick event broadcast for
//! read-only observers (map viewers, spectators, debugging tools).

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chunk::{ChunkIndex, CHUNK_SIZE};
use crate::codec::encode_terrain_base64;
use crate::movement::MoveResult;
use crate::actions::ObjectChange;
use crate::state::World;

const VIEWER_MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub x: i32,
    pub y: i32,
    pub entity_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub object_id: String,
    pub x: i32,
    pub y: i32,
    pub object_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveSummary {
    pub entity_id: String,
    pub from: (i32, i32),
    pub to: (i32, i32),
    pub success: bool,
}

impl From<&MoveResult> for MoveSummary {
    fn from(result: &MoveResult) -> Self {
        Self {
            entity_id: result.entity_id.clone(),
            from: (result.from_pos.x, result.from_pos.y),
            to: (result.to_pos.x, result.to_pos.y),
            success: result.success,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    Snapshot {
        tick_id: u64,
        entities: Vec<EntitySummary>,
        objects: Vec<ObjectSummary>,
        world_width: i32,
        world_height: i32,
        tick_duration_ms: u64,
        chunk_size: i32,
    },
    TickStarted {
        tick_id: u64,
        start_time_ms: u64,
        deadline_ms: u64,
    },
    TickCompleted {
        tick_id: u64,
        moves: Vec<MoveSummary>,
        object_changes: Vec<ObjectChange>,
        duration_ms: u64,
    },
    ChunkData {
        chunk_x: i32,
        chunk_y: i32,
        version: u64,
        terrain_base64: String,
        entities: Vec<EntitySummary>,
        objects: Vec<ObjectSummary>,
    },
    ChunkUnload {
        chunk_x: i32,
        chunk_y: i32,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// What a subscriber wants to see: either a rectangular viewport (padded by
/// one chunk and re-derived into chunk coordinates each diff) or an explicit
/// chunk coordinate list, for clients that already know which chunks they
/// want without deriving them from a screen rectangle.
enum ViewerInterest {
    Viewport(Viewport),
    Chunks(Vec<(i32, i32)>),
}

struct ViewerSubscriber {
    sender: mpsc::Sender<ViewerMessage>,
    interest: ViewerInterest,
    known_chunk_versions: HashMap<(i32, i32), u64>,
}

/// Registry of viewer subscribers, each watching either a rectangular
/// viewport or an explicit chunk coordinate list.
#[derive(Default)]
pub struct ViewerHub {
    subscribers: HashMap<String, ViewerSubscriber>,
}

impl ViewerHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, viewer_id: &str, viewport: Viewport) -> mpsc::Receiver<ViewerMessage> {
        let (tx, rx) = mpsc::channel(VIEWER_MAILBOX_CAPACITY);
        self.subscribers.insert(
            viewer_id.to_string(),
            ViewerSubscriber {
                sender: tx,
                interest: ViewerInterest::Viewport(viewport),
                known_chunk_versions: HashMap::new(),
            },
        );
        rx
    }

    /// Subscribe to an explicit set of chunk coordinates instead of a
    /// viewport — for clients that already track which chunks they hold and
    /// want a direct `(cx, cy)` list rather than one derived from a screen
    /// rectangle.
    pub fn subscribe_chunks(&mut self, viewer_id: &str, chunks: Vec<(i32, i32)>) -> mpsc::Receiver<ViewerMessage> {
        let (tx, rx) = mpsc::channel(VIEWER_MAILBOX_CAPACITY);
        self.subscribers.insert(
            viewer_id.to_string(),
            ViewerSubscriber {
                sender: tx,
                interest: ViewerInterest::Chunks(chunks),
                known_chunk_versions: HashMap::new(),
            },
        );
        rx
    }

    pub fn unsubscribe(&mut self, viewer_id: &str) {
        self.subscribers.remove(viewer_id);
    }

    pub fn set_viewport(&mut self, viewer_id: &str, viewport: Viewport) {
        if let Some(sub) = self.subscribers.get_mut(viewer_id) {
            sub.interest = ViewerInterest::Viewport(viewport);
        }
    }

    /// Replace a subscriber's interest with an explicit chunk list, switching
    /// it off viewport-derived tracking if it was on one.
    pub fn set_chunks(&mut self, viewer_id: &str, chunks: Vec<(i32, i32)>) {
        if let Some(sub) = self.subscribers.get_mut(viewer_id) {
            sub.interest = ViewerInterest::Chunks(chunks);
        }
    }

    fn send(&self, viewer_id: &str, sub: &ViewerSubscriber, message: ViewerMessage) {
        if let Err(mpsc::error::TrySendError::Full(_)) = sub.sender.try_send(message) {
            warn!("viewer mailbox full for {viewer_id}, dropping message");
        }
    }

    pub fn broadcast_tick_started(&self, tick_id: u64, start_time_ms: u64, deadline_ms: u64) {
        for (id, sub) in &self.subscribers {
            self.send(
                id,
                sub,
                ViewerMessage::TickStarted {
                    tick_id,
                    start_time_ms,
                    deadline_ms,
                },
            );
        }
    }

    pub fn broadcast_tick_completed(
        &self,
        tick_id: u64,
        moves: &[MoveResult],
        object_changes: &[ObjectChange],
        duration_ms: u64,
    ) {
        let moves: Vec<MoveSummary> = moves.iter().map(MoveSummary::from).collect();
        for (id, sub) in &self.subscribers {
            self.send(
                id,
                sub,
                ViewerMessage::TickCompleted {
                    tick_id,
                    moves: moves.clone(),
                    object_changes: object_changes.to_vec(),
                    duration_ms,
                },
            );
        }
    }

    pub fn send_snapshot(&self, viewer_id: &str, world: &World, tick_duration_ms: u64) {
        let Some(sub) = self.subscribers.get(viewer_id) else {
            return;
        };
        let entities = world
            .all_entities()
            .map(|e| EntitySummary {
                entity_id: e.entity_id.clone(),
                x: e.position.x,
                y: e.position.y,
                entity_type: e.entity_type.clone(),
            })
            .collect();
        let objects = world
            .all_objects()
            .map(|o| ObjectSummary {
                object_id: o.object_id.clone(),
                x: o.position.x,
                y: o.position.y,
                object_type: o.object_type.clone(),
            })
            .collect();
        self.send(
            viewer_id,
            sub,
            ViewerMessage::Snapshot {
                tick_id: world.tick,
                entities,
                objects,
                world_width: world.width,
                world_height: world.height,
                tick_duration_ms,
                chunk_size: CHUNK_SIZE,
            },
        );
    }

    /// Diff each subscriber's visible chunk set (derived from its viewport,
    /// or its explicit chunk list) against `chunk_index`, sending
    /// `ChunkData` for new/changed chunks and `ChunkUnload` for chunks that
    /// dropped out of view since the last diff.
    pub fn diff_chunks(&mut self, world: &World, chunk_index: &ChunkIndex) {
        for (viewer_id, sub) in &mut self.subscribers {
            let visible = match &sub.interest {
                ViewerInterest::Viewport(viewport) => chunk_index.get_chunks_for_viewport(
                    viewport.x,
                    viewport.y,
                    viewport.width,
                    viewport.height,
                    1,
                ),
                ViewerInterest::Chunks(chunks) => chunks.clone(),
            };
            let visible_set: std::collections::HashSet<(i32, i32)> = visible.iter().copied().collect();

            let stale: Vec<(i32, i32)> = sub
                .known_chunk_versions
                .keys()
                .filter(|coord| !visible_set.contains(coord))
                .copied()
                .collect();
            for coord in stale {
                sub.known_chunk_versions.remove(&coord);
                if let Err(mpsc::error::TrySendError::Full(_)) = sub.sender.try_send(ViewerMessage::ChunkUnload {
                    chunk_x: coord.0,
                    chunk_y: coord.1,
                }) {
                    warn!("viewer mailbox full for {viewer_id}, dropping chunk_unload");
                }
            }

            for coord in visible {
                let version = chunk_index.get_chunk(coord.0, coord.1).map_or(0, |c| c.version);
                let known = sub.known_chunk_versions.get(&coord).copied();
                if known == Some(version) {
                    continue;
                }
                let terrain = world.get_terrain_chunk(coord.0, coord.1, CHUNK_SIZE);
                let entities = chunk_index
                    .get_entities_in_chunks(&[coord])
                    .iter()
                    .filter_map(|id| world.get_entity(id).ok())
                    .map(|e| EntitySummary {
                        entity_id: e.entity_id.clone(),
                        x: e.position.x,
                        y: e.position.y,
                        entity_type: e.entity_type.clone(),
                    })
                    .collect();
                let objects = chunk_index
                    .get_objects_in_chunks(&[coord])
                    .iter()
                    .filter_map(|id| world.get_object(id).ok())
                    .map(|o| ObjectSummary {
                        object_id: o.object_id.clone(),
                        x: o.position.x,
                        y: o.position.y,
                        object_type: o.object_type.clone(),
                    })
                    .collect();
                let message = ViewerMessage::ChunkData {
                    chunk_x: coord.0,
                    chunk_y: coord.1,
                    version,
                    terrain_base64: encode_terrain_base64(&terrain),
                    entities,
                    objects,
                };
                sub.known_chunk_versions.insert(coord, version);
                if let Err(mpsc::error::TrySendError::Full(_)) = sub.sender.try_send(message) {
                    warn!("viewer mailbox full for {viewer_id}, dropping chunk_data");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_chunks_sends_data_once_until_version_changes() {
        let world = World::new(64, 64);
        let mut chunk_index = ChunkIndex::new(64, 64);
        let mut hub = ViewerHub::new();
        let mut rx = hub.subscribe(
            "viewer-1",
            Viewport {
                x: 0,
                y: 0,
                width: 32,
                height: 32,
            },
        );

        hub.diff_chunks(&world, &chunk_index);
        assert!(rx.try_recv().is_ok());

        hub.diff_chunks(&world, &chunk_index);
        assert!(rx.try_recv().is_err(), "no version change, nothing new to send");

        chunk_index.add_entity("e1", crate::geometry::Position::new(1, 1));
        hub.diff_chunks(&world, &chunk_index);
        assert!(rx.try_recv().is_ok(), "version bumped, chunk resent");
    }

    #[test]
    fn subscribe_chunks_tracks_explicit_list_not_a_viewport() {
        let world = World::new(256, 256);
        let mut chunk_index = ChunkIndex::new(256, 256);
        let mut hub = ViewerHub::new();
        let mut rx = hub.subscribe_chunks("viewer-2", vec![(3, 3)]);

        hub.diff_chunks(&world, &chunk_index);
        let message = rx.try_recv().expect("explicit chunk sent on first diff");
        match message {
            ViewerMessage::ChunkData { chunk_x, chunk_y, .. } => {
                assert_eq!((chunk_x, chunk_y), (3, 3));
            }
            other => panic!("expected ChunkData, got {other:?}"),
        }
        assert!(
            rx.try_recv().is_err(),
            "only the subscribed chunk should be sent, not padding neighbors"
        );

        chunk_index.add_entity("e1", crate::geometry::Position::new(3 * CHUNK_SIZE, 3 * CHUNK_SIZE));
        hub.diff_chunks(&world, &chunk_index);
        assert!(rx.try_recv().is_ok(), "version bumped, chunk resent");

        hub.set_chunks("viewer-2", vec![(4, 4)]);
        hub.diff_chunks(&world, &chunk_index);
        let unload = rx.try_recv().expect("old chunk unloaded after interest changes");
        assert!(matches!(
            unload,
            ViewerMessage::ChunkUnload { chunk_x: 3, chunk_y: 3 }
        ));
    }
}
