//! Core layer - records and their recycler.
//!
//! This module provides:
//! - [`Ray`], [`Job`], [`Hit`], [`RayResult`], [`JobResult`] - the records
//!   that move between clients, queues and workers
//! - [`ResourcePool`] - free-list recycler for those records

mod pool;
mod record;

pub use pool::{FreeList, FreeLists, PoolStats, PoolSummary, RecordKind, Recycle, ResourcePool};
pub use record::{Hit, Job, JobResult, Ray, RayResult, SessionId};
