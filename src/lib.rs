//! Grid World Engine
//!
//! A tick-driven authoritative server for a 2-D grid world.
//!
//! ## Architecture
//!
//! ```text
//! WorldServer  (world_server.rs)           ← orchestration facade
//!   ├── TickScheduler      (tick.rs)        ← Idle/Open/Closed/Integrating/Broadcast
//!   ├── World              (state.rs)       ← entities, objects, terrain
//!   ├── ChunkIndex         (chunk.rs)        ← spatial index, versioned chunks
//!   ├── LeaseManager       (lease.rs)        ← exclusive entity control
//!   ├── ObservationHub     (observation.rs)  ← per-entity observation mailboxes
//!   └── ViewerHub          (viewer.rs)       ← read-only map viewer fan-out
//! ```
//!
//! Each tick, `TickScheduler` opens an intent window, collects move/collect/
//! eat intents from whoever holds a valid lease, then closes the window and
//! hands the batch to [`movement::process_movement_phase`] and
//! [`actions`]'s integrators. Results broadcast to observation and viewer
//! subscribers; nothing persists across process restarts.

pub mod actions;
pub mod chunk;
pub mod codec;
pub mod geometry;
pub mod lease;
pub mod movement;
pub mod observation;
pub mod rpc;
pub mod state;
pub mod tick;
pub mod viewer;
pub mod world_server;

pub use geometry::{Direction, Position};
pub use lease::{Lease, LeaseError, LeaseManager};
pub use movement::{MoveClaim, MoveResult};
pub use rpc::WorldServerApi;
pub use state::{Entity, World, WorldError, WorldObject};
pub use tick::{Clock, SystemClock, TickConfig, TickScheduler};
pub use world_server::{WorldServer, WorldServerConfig};
