//! Orchestration facade: owns the world, chunk index, lease manager, and
//! tick scheduler, and wires their outputs to observation/viewer fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::actions::{self, CollectIntent, EatIntent};
use crate::chunk::ChunkIndex;
use crate::lease::{LeaseError, LeaseManager};
use crate::movement;
use crate::observation::{Observation, ObservationHub};
use crate::rpc::{
    AcquireLeaseRequest, ControllableEntity, IntentAction, LeaseResponse, ReleaseLeaseRequest,
    RenewLeaseRequest, SubmitIntentRequest, SubmitIntentResponse, TickEvent, WorldServerApi,
};
use crate::state::{Entity, World, WorldError, WorldObject};
use crate::tick::{Clock, TickConfig, TickContext, TickResult, TickScheduler};
use crate::viewer::{ViewerHub, ViewerMessage, Viewport};

const TICK_EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WorldServerConfig {
    pub world_width: i32,
    pub world_height: i32,
    pub tick: TickConfig,
    pub lease_duration_ms: u64,
    pub regen_rate_ticks: u64,
}

impl Default for WorldServerConfig {
    fn default() -> Self {
        Self {
            world_width: 256,
            world_height: 256,
            tick: TickConfig::default(),
            lease_duration_ms: crate::lease::DEFAULT_LEASE_DURATION_MS,
            regen_rate_ticks: 10,
        }
    }
}

pub struct WorldServer<C: Clock + 'static> {
    config: WorldServerConfig,
    world: Mutex<World>,
    chunk_index: Mutex<ChunkIndex>,
    lease_manager: Mutex<LeaseManager>,
    scheduler: TickScheduler<C>,
    observation_hub: Mutex<ObservationHub>,
    viewer_hub: Mutex<ViewerHub>,
    tick_tx: broadcast::Sender<TickEvent>,
    /// Tick each entity was spawned at, for `ListControllableEntities`.
    spawn_ticks: Mutex<HashMap<String, u64>>,
}

impl<C: Clock + 'static> WorldServer<C> {
    pub fn new(config: WorldServerConfig, clock: Arc<C>) -> Self {
        let world = World::new(config.world_width, config.world_height);
        let chunk_index = ChunkIndex::new(config.world_width, config.world_height);
        let lease_manager = LeaseManager::new(config.lease_duration_ms, clock.clone());
        let scheduler = TickScheduler::new(config.tick, clock);
        let (tick_tx, _) = broadcast::channel(TICK_EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            world: Mutex::new(world),
            chunk_index: Mutex::new(chunk_index),
            lease_manager: Mutex::new(lease_manager),
            scheduler,
            observation_hub: Mutex::new(ObservationHub::new()),
            viewer_hub: Mutex::new(ViewerHub::new()),
            tick_tx,
            spawn_ticks: Mutex::new(HashMap::new()),
        }
    }

    /// Install the dense terrain array before serving any traffic.
    pub fn set_floor_array(&self, floor_array: Vec<u8>) {
        self.world.lock().set_floor_array(floor_array);
    }

    /// Place an entity in the world and index it, for initial world setup.
    pub fn spawn_entity(&self, entity: Entity) -> Result<(), WorldError> {
        let mut world = self.world.lock();
        let position = entity.position;
        let entity_id = entity.entity_id.clone();
        let spawn_tick = world.tick;
        world.add_entity(entity)?;
        self.chunk_index.lock().add_entity(&entity_id, position);
        self.spawn_ticks.lock().insert(entity_id, spawn_tick);
        Ok(())
    }

    pub fn spawn_object(&self, object: WorldObject) -> Result<(), WorldError> {
        let mut world = self.world.lock();
        let position = object.position;
        let object_id = object.object_id.clone();
        world.add_object(object)?;
        self.chunk_index.lock().add_object(&object_id, position);
        Ok(())
    }

    fn lease_response_from(result: Result<crate::lease::Lease, LeaseError>) -> LeaseResponse {
        match result {
            Ok(lease) => LeaseResponse {
                success: true,
                lease_id: Some(lease.lease_id),
                expires_at_ms: Some(lease.expires_at_ms),
                reason: None,
            },
            Err(e) => LeaseResponse {
                success: false,
                lease_id: None,
                expires_at_ms: None,
                reason: Some(e.to_string()),
            },
        }
    }

    /// Fires once the intent window opens, before any intent is admitted:
    /// broadcasts the tick-started event to tick/viewer subscribers and
    /// queues this tick's observation to every entity with a live lease.
    fn on_tick_start(&self, context: &TickContext) {
        if self.tick_tx.receiver_count() > 0 {
            let _ = self.tick_tx.send(TickEvent::Started {
                tick_id: context.tick_id,
                start_time_ms: context.start_time_ms,
                deadline_ms: context.deadline_ms,
            });
        }

        let world = self.world.lock();
        let mut lease_manager = self.lease_manager.lock();
        self.observation_hub
            .lock()
            .broadcast(&world, &mut lease_manager, context.tick_id, context.deadline_ms);

        self.viewer_hub
            .lock()
            .broadcast_tick_started(context.tick_id, context.start_time_ms, context.deadline_ms);
    }

    fn integrate_tick(&self, context: &TickContext) -> TickResult {
        let mut world = self.world.lock();
        let mut chunk_index = self.chunk_index.lock();

        let move_results = movement::process_movement_phase(&mut world, &context.move_intents());
        for result in &move_results {
            if result.success {
                chunk_index.update_entity_position(&result.entity_id, result.to_pos);
            }
        }

        let collect_intents: Vec<CollectIntent> = context
            .collect_intents()
            .iter()
            .map(|i| CollectIntent {
                entity_id: i.entity_id.clone(),
                object_id: i.object_id.clone(),
                item_type: i.item_type.clone(),
                amount: i.amount,
            })
            .collect();
        let (collect_results, mut object_changes) = actions::process_collect_phase(&mut world, &collect_intents);

        let eat_intents: Vec<EatIntent> = context
            .eat_intents()
            .iter()
            .map(|i| EatIntent {
                entity_id: i.entity_id.clone(),
                item_type: i.item_type.clone(),
                amount: i.amount,
            })
            .collect();
        let eat_results = actions::process_eat_phase(&mut world, &eat_intents);

        let regen_changes = actions::process_regeneration(&mut world, world.tick, self.config.regen_rate_ticks);
        object_changes.extend(regen_changes);

        world.advance_tick();

        TickResult {
            tick_id: context.tick_id,
            move_results,
            collect_results,
            eat_results,
            object_changes,
            duration_ms: 0, // filled in by the scheduler
        }
    }

    fn broadcast_tick(&self, result: &TickResult) {
        if self.tick_tx.receiver_count() > 0 {
            let _ = self.tick_tx.send(TickEvent::Completed {
                tick_id: result.tick_id,
                duration_ms: result.duration_ms,
            });
        }

        let expired = self.lease_manager.lock().cleanup_expired();
        if expired > 0 {
            debug!("swept {expired} expired lease(s) after tick {}", result.tick_id);
        }

        let world = self.world.lock();
        let chunk_index = self.chunk_index.lock();
        let mut viewer_hub = self.viewer_hub.lock();
        viewer_hub.broadcast_tick_completed(
            result.tick_id,
            &result.move_results,
            &result.object_changes,
            result.duration_ms,
        );
        viewer_hub.diff_chunks(&world, &chunk_index);

        debug!(
            "tick {} integrated in {}ms: {} moves, {} collects, {} eats",
            result.tick_id,
            result.duration_ms,
            result.move_results.len(),
            result.collect_results.len(),
            result.eat_results.len()
        );
    }

    /// Run the tick scheduler until [`TickScheduler::request_stop`] is
    /// called on `self.scheduler()`.
    pub async fn run(&self) {
        info!(
            "world server running: {}x{} world, {}ms ticks",
            self.config.world_width, self.config.world_height, self.config.tick.tick_duration_ms
        );
        self.scheduler
            .run(
                |ctx| self.on_tick_start(ctx),
                |ctx| self.integrate_tick(ctx),
                |result| self.broadcast_tick(result),
            )
            .await;
    }

    pub fn scheduler(&self) -> &TickScheduler<C> {
        &self.scheduler
    }
}

impl<C: Clock + 'static> WorldServerApi for WorldServer<C> {
    fn list_controllable_entities(&self) -> Vec<ControllableEntity> {
        let world = self.world.lock();
        let spawn_ticks = self.spawn_ticks.lock();
        let mut lease_manager = self.lease_manager.lock();
        world
            .all_entities()
            .map(|e| ControllableEntity {
                entity_id: e.entity_id.clone(),
                entity_type: e.entity_type.clone(),
                tags: e.tags.clone(),
                spawn_tick: spawn_ticks.get(&e.entity_id).copied().unwrap_or(0),
                has_active_lease: lease_manager.get_lease_for_entity(&e.entity_id).is_some(),
            })
            .collect()
    }

    fn acquire_lease(&self, request: AcquireLeaseRequest) -> LeaseResponse {
        let result = self
            .lease_manager
            .lock()
            .acquire(&request.entity_id, &request.controller_id);
        Self::lease_response_from(result)
    }

    fn renew_lease(&self, request: RenewLeaseRequest) -> LeaseResponse {
        let result = self.lease_manager.lock().renew(&request.lease_id);
        Self::lease_response_from(result)
    }

    fn release_lease(&self, request: ReleaseLeaseRequest) -> LeaseResponse {
        let released = self.lease_manager.lock().release(&request.lease_id);
        LeaseResponse {
            success: released,
            lease_id: Some(request.lease_id),
            expires_at_ms: None,
            reason: if released { None } else { Some("not found".to_string()) },
        }
    }

    fn submit_intent(&self, request: SubmitIntentRequest) -> SubmitIntentResponse {
        let lease_valid = self
            .lease_manager
            .lock()
            .is_valid_lease(&request.lease_id, &request.entity_id);
        if !lease_valid {
            return SubmitIntentResponse {
                accepted: false,
                reason: Some("invalid_lease"),
            };
        }

        if !self.scheduler.is_running() {
            return SubmitIntentResponse {
                accepted: false,
                reason: Some("no_tick_in_progress"),
            };
        }
        if request.tick_id != self.scheduler.current_tick() {
            return SubmitIntentResponse {
                accepted: false,
                reason: Some("wrong_tick"),
            };
        }

        let accepted = match request.action {
            IntentAction::Move { direction } => {
                self.scheduler.submit_move_intent(&request.entity_id, direction)
            }
            IntentAction::Collect { object_id, item_type, amount } => {
                if item_type.is_empty() {
                    return SubmitIntentResponse {
                        accepted: false,
                        reason: Some("missing_item_type"),
                    };
                }
                self.scheduler.submit_collect_intent(CollectIntent {
                    entity_id: request.entity_id.clone(),
                    object_id,
                    item_type,
                    amount,
                })
            }
            IntentAction::Eat { item_type, amount } => {
                if item_type.is_empty() {
                    return SubmitIntentResponse {
                        accepted: false,
                        reason: Some("missing_item_type"),
                    };
                }
                self.scheduler.submit_eat_intent(EatIntent {
                    entity_id: request.entity_id.clone(),
                    item_type,
                    amount,
                })
            }
            IntentAction::Wait => true,
            IntentAction::Pickup | IntentAction::Use | IntentAction::Say { .. } => {
                return SubmitIntentResponse {
                    accepted: false,
                    reason: Some("action_not_implemented"),
                };
            }
        };

        if accepted {
            SubmitIntentResponse { accepted: true, reason: None }
        } else {
            SubmitIntentResponse {
                accepted: false,
                reason: Some("late_or_duplicate"),
            }
        }
    }

    fn stream_observations(&self, entity_id: &str, lease_id: &str) -> Option<mpsc::Receiver<Observation>> {
        if !self.lease_manager.lock().is_valid_lease(lease_id, entity_id) {
            warn!("observation stream denied for {entity_id}: invalid lease");
            return None;
        }
        Some(self.observation_hub.lock().subscribe(entity_id, lease_id))
    }

    fn stream_ticks(&self) -> broadcast::Receiver<TickEvent> {
        self.tick_tx.subscribe()
    }

    fn stream_viewer(&self, viewer_id: &str, viewport: Viewport) -> mpsc::Receiver<ViewerMessage> {
        let mut hub = self.viewer_hub.lock();
        let rx = hub.subscribe(viewer_id, viewport);
        hub.send_snapshot(viewer_id, &self.world.lock(), self.config.tick.tick_duration_ms);
        rx
    }

    fn stream_viewer_chunks(&self, viewer_id: &str, chunks: Vec<(i32, i32)>) -> mpsc::Receiver<ViewerMessage> {
        let mut hub = self.viewer_hub.lock();
        let rx = hub.subscribe_chunks(viewer_id, chunks);
        hub.send_snapshot(viewer_id, &self.world.lock(), self.config.tick.tick_duration_ms);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Position;
    use crate::tick::FakeClock;

    fn server() -> WorldServer<FakeClock> {
        let clock = Arc::new(FakeClock::new(0));
        WorldServer::new(WorldServerConfig::default(), clock)
    }

    #[test]
    fn acquire_then_submit_intent_without_open_tick_is_rejected() {
        let server = server();
        server.spawn_entity(Entity::new("a", Position::new(1, 1))).unwrap();

        let lease = server.acquire_lease(AcquireLeaseRequest {
            entity_id: "a".to_string(),
            controller_id: "c1".to_string(),
        });
        assert!(lease.success);

        let response = server.submit_intent(SubmitIntentRequest {
            lease_id: lease.lease_id.unwrap(),
            entity_id: "a".to_string(),
            tick_id: 1,
            action: IntentAction::Wait,
        });
        assert!(!response.accepted);
        assert_eq!(response.reason, Some("no_tick_in_progress"));
    }

    #[test]
    fn submit_intent_with_invalid_lease_is_rejected() {
        let server = server();
        server.spawn_entity(Entity::new("a", Position::new(1, 1))).unwrap();

        let response = server.submit_intent(SubmitIntentRequest {
            lease_id: "nonexistent".to_string(),
            entity_id: "a".to_string(),
            tick_id: 1,
            action: IntentAction::Wait,
        });
        assert!(!response.accepted);
        assert_eq!(response.reason, Some("invalid_lease"));
    }

    #[test]
    fn stream_viewer_chunks_sends_initial_snapshot() {
        let server = server();
        let mut rx = server.stream_viewer_chunks("viewer-1", vec![(0, 0)]);
        assert!(matches!(
            rx.try_recv(),
            Ok(crate::viewer::ViewerMessage::Snapshot { .. })
        ));
    }
}
