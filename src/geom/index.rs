//! Prepared, immutable spatial index over the regions of one instance.

use std::sync::Arc;

use super::bvh::{build_bvh, Bvh};
use super::shape::Shape;
use crate::util::BBox3d;

/// A region: one solid tagged with its identifiers.
#[derive(Clone, Debug)]
pub struct Region {
    /// Full path name of the region.
    pub name: Arc<str>,
    /// Region identifier (solid regions).
    pub region_id: i32,
    /// Air code; non-zero marks an air region.
    pub aircode: i32,
    /// Component name attribute, if any.
    pub component: Option<String>,
    pub shape: Shape,
}

impl Region {
    /// True for air regions.
    #[inline]
    pub fn is_air(&self) -> bool {
        self.aircode > 0
    }
}

/// Regions plus the BVH built over them. Shared by reference between all
/// sessions duplicated from the master.
#[derive(Debug)]
pub struct SpatialIndex {
    regions: Vec<Region>,
    bvh: Bvh,
}

impl SpatialIndex {
    /// Build the index. Degenerate solids are kept but never hit.
    #[tracing::instrument(skip_all, fields(regions = regions.len()))]
    pub fn build(regions: Vec<Region>) -> Self {
        let bounds: Vec<BBox3d> = regions.iter().map(|r| r.shape.bounds()).collect();
        let bvh = build_bvh(&bounds);
        tracing::debug!(nodes = bvh.nodes.len(), "spatial index built");
        Self { regions, bvh }
    }

    /// All regions, in load order.
    #[inline]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Region by index.
    #[inline]
    pub fn region(&self, idx: u32) -> &Region {
        &self.regions[idx as usize]
    }

    /// The BVH.
    #[inline]
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Model extents (instance space).
    #[inline]
    pub fn bounds(&self) -> BBox3d {
        self.bvh.bounds()
    }

    /// True if the index holds no regions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
