//! # rtserver
//!
//! Concurrent ray-trace job server.
//!
//! Clients submit batches of probe rays ("jobs") against one of several
//! independently transformable geometry snapshots ("sessions"). A fixed pool
//! of worker threads drains prioritized input bands, shoots every ray against
//! every geometry instance of the session and posts per-ray hit lists to the
//! matching output band. Results are collected either by blocking on a
//! specific job or by polling for any finished job of a session.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math types
//! - [`core`] - Job/result records and the record pool
//! - [`geom`] - Solids, spatial index, instances, intersection kernel
//! - [`loader`] - Model loading (JSON model database)
//! - [`components`] - Component name table
//! - [`session`] - Session registry
//! - [`queue`] - Banded input/output queues
//! - [`worker`] - Worker threads and counters
//! - [`server`] - [`RtServer`], the client-facing API
//! - [`config`] - [`ServerConfig`]
//!
//! ## Example
//!
//! ```ignore
//! use rtserver::prelude::*;
//!
//! let server = RtServer::new(ServerConfig::default())?;
//! server.load("model.json")?;
//! let session = server.open_session()?;
//!
//! let mut job = server.new_job(session, 1);
//! job.push_ray(server.new_ray(DVec3::new(-20.0, 0.0, 0.0), DVec3::X, 0));
//! let result = server.submit_and_wait(job, 0)?;
//! for ray in result.ray_results() {
//!     for hit in ray.hits() {
//!         println!("{} at {}", hit.comp_id, hit.hit_dist);
//!     }
//! }
//! server.release(result);
//! ```

pub mod util;
pub mod core;
pub mod geom;
pub mod loader;
pub mod components;
pub mod session;
pub mod queue;
pub mod worker;
pub mod server;
pub mod config;

// Re-export commonly used types
pub use util::{Error, Result};
pub use components::{ComponentTable, NO_COMPONENT_NAME};
pub use config::ServerConfig;
pub use server::RtServer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::core::{Hit, Job, JobResult, Ray, RayResult, SessionId};
    pub use crate::loader::{GeometryLoader, JsonModelLoader, LoadOptions};
    pub use crate::server::RtServer;
    pub use crate::util::{BBox3d, DMat4, DVec3, Error, Result};
    pub use crate::worker::StatsSnapshot;
}
