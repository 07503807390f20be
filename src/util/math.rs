//! Math type re-exports and bounding box utilities.
//!
//! Geometry is carried in double precision throughout; this module re-exports
//! the `glam` types in use and adds the model bounding box.

pub use glam::{DMat3, DMat4, DVec3};

use std::fmt;

/// 3D bounding box with double precision.
#[derive(Clone, Copy, PartialEq)]
pub struct BBox3d {
    pub min: DVec3,
    pub max: DVec3,
}

impl BBox3d {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Bounds of this box after an affine transform (all 8 corners).
    pub fn transformed(&self, m: &DMat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for i in 0..8 {
            let corner = DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.expand_by_point(m.transform_point3(corner));
        }
        out
    }

    /// Slab test. Returns the parametric entry/exit interval of
    /// `origin + t * dir` through the box, clipped to `t >= 0`.
    #[inline]
    pub fn ray_interval(&self, origin: DVec3, inv_dir: DVec3) -> Option<(f64, f64)> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(0.0);
        let far = t0.max(t1).min_element();
        if near <= far {
            Some((near, far))
        } else {
            None
        }
    }
}

impl Default for BBox3d {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BBox3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BBox3d({:?} - {:?})", self.min, self.max)
    }
}

/// Componentwise reciprocal of a direction. Zero components become infinite,
/// which the slab test handles.
#[inline]
pub fn recip_dir(dir: DVec3) -> DVec3 {
    DVec3::ONE / dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox3d() {
        let mut b = BBox3d::EMPTY;
        assert!(b.is_empty());

        b.expand_by_point(DVec3::new(-1.0, -1.0, -1.0));
        b.expand_by_point(DVec3::new(1.0, 1.0, 1.0));

        assert_eq!(b.center(), DVec3::ZERO);
        assert_eq!(b.size(), DVec3::splat(2.0));
    }

    #[test]
    fn test_ray_interval() {
        let b = BBox3d::new(DVec3::splat(-10.0), DVec3::splat(10.0));
        let origin = DVec3::new(-20.0, 0.0, 0.0);
        let dir = DVec3::X;
        let (near, far) = b.ray_interval(origin, recip_dir(dir)).unwrap();
        assert!((near - 10.0).abs() < 1e-12);
        assert!((far - 30.0).abs() < 1e-12);

        // Parallel to the slab and outside it
        let miss = b.ray_interval(DVec3::new(-20.0, 15.0, 0.0), recip_dir(dir));
        assert!(miss.is_none());
    }

    #[test]
    fn test_transformed_bounds() {
        let b = BBox3d::new(DVec3::ZERO, DVec3::ONE);
        let m = DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0));
        let t = b.transformed(&m);
        assert_eq!(t.min, DVec3::new(5.0, 0.0, 0.0));
        assert_eq!(t.max, DVec3::new(6.0, 1.0, 1.0));
    }
}
