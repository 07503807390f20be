//! SAH-based BVH over solid bounding boxes.
//!
//! Constructs a flat node array from a list of primitive bounds.
//! Uses the Surface Area Heuristic for split decisions.

use crate::util::{BBox3d, DVec3};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f64 = 1.0;
const INTERSECT_COST: f64 = 1.0;

/// Maximum primitives per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// Flat BVH node.
///
/// Internal node: left_or_first = left child index (right = left + 1), count = 0
/// Leaf node: left_or_first = first primitive slot, count > 0
#[derive(Clone, Copy, Debug)]
pub struct BvhNode {
    pub bounds: BBox3d,
    pub left_or_first: u32,
    pub count: u32,
}

impl BvhNode {
    const PLACEHOLDER: Self = Self {
        bounds: BBox3d::EMPTY,
        left_or_first: 0,
        count: 0,
    };

    /// True for leaf nodes.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Built BVH.
#[derive(Clone, Debug)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices (leaves reference into this).
    pub prim_indices: Vec<u32>,
}

impl Bvh {
    /// Bounds of the whole tree.
    pub fn bounds(&self) -> BBox3d {
        self.nodes[0].bounds
    }
}

/// SAH bin for evaluating split candidates.
struct Bin {
    bounds: BBox3d,
    count: usize,
}

fn area(b: &BBox3d) -> f64 {
    if b.is_empty() {
        return 0.0;
    }
    let d = b.size();
    2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
}

/// Build a BVH from primitive bounds using SAH.
///
/// Returns a flat node array + reordered primitive index list.
/// Indices map into the original slice.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[BBox3d]) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::PLACEHOLDER],
            prim_indices: vec![],
        };
    }

    let centroids: Vec<DVec3> = bounds.iter().map(|b| b.center()).collect();

    // Working index array (reordered by partitioning)
    let mut indices: Vec<u32> = (0..n as u32).collect();

    // Worst case: 2*n - 1 nodes for a full binary tree
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::PLACEHOLDER);

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let start = task.start;
        let end = task.end;
        let count = end - start;

        let mut node_bounds = BBox3d::EMPTY;
        for &idx in &indices[start..end] {
            node_bounds.expand_by_box(&bounds[idx as usize]);
        }

        let leaf = BvhNode {
            bounds: node_bounds,
            left_or_first: start as u32,
            count: count as u32,
        };

        if count <= MAX_LEAF_SIZE {
            nodes[task.node_idx] = leaf;
            continue;
        }

        let mut centroid_bounds = BBox3d::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.expand_by_point(centroids[idx as usize]);
        }

        let (best_axis, best_split_pos, best_cost) =
            find_best_split(&indices[start..end], bounds, &centroids, &centroid_bounds);

        let leaf_cost = count as f64 * INTERSECT_COST * area(&node_bounds);
        if best_cost >= leaf_cost || best_axis == usize::MAX {
            nodes[task.node_idx] = leaf;
            continue;
        }

        let mid = partition(&mut indices[start..end], |&idx| {
            centroids[idx as usize][best_axis] < best_split_pos
        }) + start;

        // Fallback: if partition is degenerate, split in middle
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };

        let left_idx = nodes.len();
        nodes.push(BvhNode::PLACEHOLDER);
        nodes.push(BvhNode::PLACEHOLDER);

        nodes[task.node_idx] = BvhNode {
            bounds: node_bounds,
            left_or_first: left_idx as u32,
            count: 0,
        };

        // Right first so left is processed first
        stack.push(Task {
            node_idx: left_idx + 1,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        prim_indices: indices,
    }
}

/// SAH binned split search across all 3 axes.
/// Returns (best_axis, split_position, cost). axis=usize::MAX if no valid split.
fn find_best_split(
    indices: &[u32],
    bounds: &[BBox3d],
    centroids: &[DVec3],
    centroid_bounds: &BBox3d,
) -> (usize, f64, f64) {
    let mut best_axis = usize::MAX;
    let mut best_pos = 0.0f64;
    let mut best_cost = f64::INFINITY;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-12 {
            continue;
        }

        let mut bins: Vec<Bin> = (0..NUM_BINS)
            .map(|_| Bin {
                bounds: BBox3d::EMPTY,
                count: 0,
            })
            .collect();

        let inv_extent = NUM_BINS as f64 / extent;

        for &idx in indices {
            let idx = idx as usize;
            let bin_id = ((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin_id = bin_id.min(NUM_BINS - 1);
            bins[bin_id].bounds.expand_by_box(&bounds[idx]);
            bins[bin_id].count += 1;
        }

        // Sweep from left: prefix areas and counts
        let mut left_area = [0.0f64; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = BBox3d::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = area(&sweep);
            left_count[i] = sweep_count;
        }

        // Sweep from right and evaluate SAH cost
        sweep = BBox3d::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f64 * left_area[i - 1]
                        + sweep_count as f64 * area(&sweep));

            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = centroid_bounds.min[axis] + (i as f64 / NUM_BINS as f64) * extent;
            }
        }
    }

    (best_axis, best_pos, best_cost)
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_at(x: f64) -> BBox3d {
        BBox3d::new(DVec3::new(x - 0.5, -0.5, -0.5), DVec3::new(x + 0.5, 0.5, 0.5))
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.prim_indices.is_empty());
        assert!(bvh.bounds().is_empty());
    }

    #[test]
    fn test_small_set_is_single_leaf() {
        let prims = vec![cube_at(0.0), cube_at(1.0), cube_at(2.0)];
        let bvh = build_bvh(&prims);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_many_prims_builds_tree() {
        let prims: Vec<BBox3d> = (0..100).map(|i| cube_at(i as f64 * 2.0)).collect();
        let bvh = build_bvh(&prims);

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");

        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<u32>>());

        let root = bvh.bounds();
        assert!(root.min.x < 0.0);
        assert!(root.max.x > 198.0);

        // Every leaf's primitives lie inside the leaf bounds
        for node in bvh.nodes.iter().filter(|n| n.is_leaf()) {
            let first = node.left_or_first as usize;
            for &p in &bvh.prim_indices[first..first + node.count as usize] {
                let b = prims[p as usize];
                assert!(b.min.cmpge(node.bounds.min).all());
                assert!(b.max.cmple(node.bounds.max).all());
            }
        }
    }
}
