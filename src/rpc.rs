//! External interface contracts.
//!
//! These are the operations an RPC transport (gRPC, WebSocket, whatever a
//! caller wires up) would expose. Modeled here as plain request/response
//! types and a synchronous facade trait — no protobuf, no transport.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::geometry::Direction;
use crate::observation::Observation;
use crate::viewer::ViewerMessage;

/// One entry of `ListControllableEntities`'s response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllableEntity {
    pub entity_id: String,
    pub entity_type: String,
    pub tags: Vec<String>,
    pub spawn_tick: u64,
    pub has_active_lease: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireLeaseRequest {
    pub entity_id: String,
    pub controller_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewLeaseRequest {
    pub lease_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseLeaseRequest {
    pub lease_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub success: bool,
    pub lease_id: Option<String>,
    pub expires_at_ms: Option<u64>,
    pub reason: Option<String>,
}

/// The action half of a submitted intent. Mirrors the `oneof` the original
/// service dispatched on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IntentAction {
    Move { direction: Direction },
    Collect { object_id: Option<String>, item_type: String, amount: Option<u32> },
    Eat { item_type: String, amount: u32 },
    Wait,
    Pickup,
    Use,
    Say { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitIntentRequest {
    pub lease_id: String,
    pub entity_id: String,
    pub tick_id: u64,
    pub action: IntentAction,
}

/// `reason` carries the same short machine-readable tags the original
/// service used (`invalid_lease`, `wrong_tick`, `late_or_duplicate`, ...),
/// `None` on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitIntentResponse {
    pub accepted: bool,
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TickEvent {
    Started {
        tick_id: u64,
        start_time_ms: u64,
        deadline_ms: u64,
    },
    Completed {
        tick_id: u64,
        duration_ms: u64,
    },
}

/// The facade every transport adapter wraps. Implemented by
/// [`crate::world_server::WorldServer`].
pub trait WorldServerApi {
    fn list_controllable_entities(&self) -> Vec<ControllableEntity>;
    fn acquire_lease(&self, request: AcquireLeaseRequest) -> LeaseResponse;
    fn renew_lease(&self, request: RenewLeaseRequest) -> LeaseResponse;
    fn release_lease(&self, request: ReleaseLeaseRequest) -> LeaseResponse;
    fn submit_intent(&self, request: SubmitIntentRequest) -> SubmitIntentResponse;

    /// `None` if the lease is invalid for the entity at subscribe time.
    fn stream_observations(&self, entity_id: &str, lease_id: &str) -> Option<mpsc::Receiver<Observation>>;
    fn stream_ticks(&self) -> broadcast::Receiver<TickEvent>;
    fn stream_viewer(&self, viewer_id: &str, viewport: crate::viewer::Viewport) -> mpsc::Receiver<ViewerMessage>;

    /// Same fan-out as [`Self::stream_viewer`], but subscribed to an explicit
    /// `(chunk_x, chunk_y)` list rather than a viewport rectangle.
    fn stream_viewer_chunks(&self, viewer_id: &str, chunks: Vec<(i32, i32)>) -> mpsc::Receiver<ViewerMessage>;
}
