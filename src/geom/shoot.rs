//! Ray intersection interface and the BVH kernel behind it.

use smallvec::SmallVec;

use super::index::SpatialIndex;
use crate::core::Ray;
use crate::util::{recip_dir, DVec3};

/// One in/out interval of a ray through a region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Partition {
    pub in_dist: f64,
    pub out_dist: f64,
    pub in_normal: DVec3,
    pub out_normal: DVec3,
    /// Index of the region in the spatial index.
    pub region: u32,
}

/// Per-worker scratch space. Allocated once per thread at pool creation;
/// an [`Intersector`] may use it freely between calls.
#[derive(Debug)]
pub struct ThreadSlot {
    thread_no: usize,
    /// BVH traversal stack.
    pub stack: SmallVec<[u32; 64]>,
    /// Partitions produced by the last shot.
    pub partitions: Vec<Partition>,
}

impl ThreadSlot {
    /// Create the slot for worker `thread_no`.
    pub fn new(thread_no: usize) -> Self {
        Self {
            thread_no,
            stack: SmallVec::new(),
            partitions: Vec::with_capacity(16),
        }
    }

    /// Owning worker index.
    #[inline]
    pub fn thread_no(&self) -> usize {
        self.thread_no
    }
}

/// Shoots a single ray through a single spatial index.
///
/// Implementations must be reentrant across threads given distinct
/// [`ThreadSlot`]s. Misses and grazing hits are ordinary outcomes.
pub trait Intersector: Send + Sync {
    /// Shoot `ray` (already in instance space) and leave the partitions it
    /// crosses in `slot.partitions`, sorted by entry distance.
    /// Returns true if anything was hit.
    fn shoot(&self, ray: &Ray, index: &SpatialIndex, slot: &mut ThreadSlot) -> bool;
}

/// Default kernel: BVH traversal over box and sphere solids.
#[derive(Clone, Copy, Debug, Default)]
pub struct BvhIntersector;

impl Intersector for BvhIntersector {
    fn shoot(&self, ray: &Ray, index: &SpatialIndex, slot: &mut ThreadSlot) -> bool {
        slot.partitions.clear();
        slot.stack.clear();

        let bvh = index.bvh();
        if index.is_empty() {
            return false;
        }

        let inv_dir = recip_dir(ray.dir);
        slot.stack.push(0);

        while let Some(node_idx) = slot.stack.pop() {
            let node = &bvh.nodes[node_idx as usize];
            if node.bounds.ray_interval(ray.origin, inv_dir).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &prim in &bvh.prim_indices[first..first + node.count as usize] {
                    if let Some(seg) = index.region(prim).shape.intersect(ray.origin, ray.dir) {
                        slot.partitions.push(Partition {
                            in_dist: seg.t_in,
                            out_dist: seg.t_out,
                            in_normal: seg.n_in,
                            out_normal: seg.n_out,
                            region: prim,
                        });
                    }
                }
            } else {
                slot.stack.push(node.left_or_first + 1);
                slot.stack.push(node.left_or_first);
            }
        }

        slot.partitions
            .sort_by(|a, b| a.in_dist.total_cmp(&b.in_dist));
        !slot.partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Region, Shape};
    use std::sync::Arc;

    fn cube_region(name: &str, x: f64, id: i32) -> Region {
        Region {
            name: Arc::from(name),
            region_id: id,
            aircode: 0,
            component: None,
            shape: Shape::Rpp {
                min: [x - 1.0, -1.0, -1.0],
                max: [x + 1.0, 1.0, 1.0],
            },
        }
    }

    #[test]
    fn test_shoot_row_of_cubes() {
        // 20 cubes along X, spaced 4 apart: large enough to force internal nodes
        let regions: Vec<Region> = (0..20)
            .map(|i| cube_region(&format!("c{i}.r"), i as f64 * 4.0, i))
            .collect();
        let index = SpatialIndex::build(regions);
        assert!(index.bvh().nodes.len() > 1);

        let mut slot = ThreadSlot::new(0);
        let ray = Ray::new(DVec3::new(-10.0, 0.0, 0.0), DVec3::X, 0);
        assert!(BvhIntersector.shoot(&ray, &index, &mut slot));
        assert_eq!(slot.partitions.len(), 20);

        // Sorted by entry distance, region order follows
        for (i, p) in slot.partitions.iter().enumerate() {
            assert_eq!(p.region as usize, i);
            assert!((p.in_dist - (9.0 + 4.0 * i as f64)).abs() < 1e-9);
            assert!((p.out_dist - p.in_dist - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_shoot_miss_clears_previous() {
        let index = SpatialIndex::build(vec![cube_region("a.r", 0.0, 1)]);
        let mut slot = ThreadSlot::new(3);
        let hit = Ray::new(DVec3::new(-5.0, 0.0, 0.0), DVec3::X, 0);
        assert!(BvhIntersector.shoot(&hit, &index, &mut slot));
        let miss = Ray::new(DVec3::new(-5.0, 5.0, 0.0), DVec3::X, 0);
        assert!(!BvhIntersector.shoot(&miss, &index, &mut slot));
        assert!(slot.partitions.is_empty());
        assert_eq!(slot.thread_no(), 3);
    }

    #[test]
    fn test_shoot_empty_index() {
        let index = SpatialIndex::build(vec![]);
        let mut slot = ThreadSlot::new(0);
        let ray = Ray::new(DVec3::ZERO, DVec3::X, 0);
        assert!(!BvhIntersector.shoot(&ray, &index, &mut slot));
    }
}
