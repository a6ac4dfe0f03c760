//! Vigil control plane
//!
//! Command-driven orchestrator for the vigil video-analytics platform.
//!
//! ## Architecture (8 Components)
//!
//! 1. ControlChannel - authenticated command/result rendezvous
//! 2. Orchestrator - start/stop state machine and serving loop
//! 3. Distributor - source sharding across worker processes
//! 4. Engine - worker process spawn/stop supervision
//! 5. AreaSupervisor - per-area task arena with crash restart
//! 6. AreaEngine - occupancy aggregation loop per area
//! 7. Scheduler - cooperative recurring jobs (violations, reports)
//! 8. Loggers/Notifications - collaborator interfaces
//!
//! ## Design Principles
//!
//! - Single consumer: all orchestrator state is owned by one serving loop
//! - Bounded waits: no worker may block the control plane indefinitely
//! - Collaborators are fire-and-forget: their failures degrade, never stop
//!   the loop

pub mod area_engine;
pub mod area_supervisor;
pub mod camera_log;
pub mod config;
pub mod control_channel;
pub mod distributor;
pub mod engine;
pub mod loggers;
pub mod notifications;
pub mod orchestrator;
pub mod scheduler;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppConfig;
