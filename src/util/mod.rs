//! Utility types shared by every rtserver module.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam plus [`BBox3d`]

mod error;
mod math;

pub use error::*;
pub use math::*;
