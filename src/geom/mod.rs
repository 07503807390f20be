//! Geometry kernel used by the server.
//!
//! This module provides:
//! - [`Shape`] - box and sphere solids with ray intersection
//! - [`SpatialIndex`] / [`Region`] - prepared, immutable BVH over regions
//! - [`GeometryInstance`] / [`Xform`] - shared index plus per-session transform
//! - [`Intersector`] / [`BvhIntersector`] - the shoot-one-ray interface

pub mod bvh;
mod index;
mod instance;
mod shape;
mod shoot;

pub use index::{Region, SpatialIndex};
pub use instance::{GeometryInstance, Xform};
pub use shape::{Segment, Shape};
pub use shoot::{BvhIntersector, Intersector, Partition, ThreadSlot};
