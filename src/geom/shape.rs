//! Solid primitives and their ray intersection.
//!
//! Each solid reports a single in/out interval along the ray with outward
//! surface normals at both ends. Distances are ray parameters: for a unit
//! direction they are model units.

use serde::{Deserialize, Serialize};

use crate::util::{BBox3d, DVec3};

/// Directions with a smaller component are treated as parallel to a slab.
const PARALLEL_EPS: f64 = 1e-12;

/// A solid primitive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Axis-aligned rectangular parallelepiped.
    Rpp { min: [f64; 3], max: [f64; 3] },
    /// Sphere.
    Sph { center: [f64; 3], radius: f64 },
}

/// Entry/exit interval of a ray through one solid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub t_in: f64,
    pub t_out: f64,
    pub n_in: DVec3,
    pub n_out: DVec3,
}

impl Shape {
    /// Axis-aligned bounds of the solid.
    pub fn bounds(&self) -> BBox3d {
        match self {
            Self::Rpp { min, max } => BBox3d::new(DVec3::from(*min), DVec3::from(*max)),
            Self::Sph { center, radius } => {
                let c = DVec3::from(*center);
                let r = DVec3::splat(radius.abs());
                BBox3d::new(c - r, c + r)
            }
        }
    }

    /// True if the solid encloses no volume.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Self::Rpp { min, max } => (0..3).any(|i| min[i] >= max[i]),
            Self::Sph { radius, .. } => *radius <= 0.0,
        }
    }

    /// Intersect `origin + t * dir`. The segment may start behind the origin
    /// (ray starts inside the solid) but never ends behind it.
    pub fn intersect(&self, origin: DVec3, dir: DVec3) -> Option<Segment> {
        match self {
            Self::Rpp { min, max } => intersect_rpp(DVec3::from(*min), DVec3::from(*max), origin, dir),
            Self::Sph { center, radius } => intersect_sph(DVec3::from(*center), *radius, origin, dir),
        }
    }
}

fn axis_normal(axis: usize, sign: f64) -> DVec3 {
    let mut n = DVec3::ZERO;
    n[axis] = sign;
    n
}

fn intersect_rpp(min: DVec3, max: DVec3, origin: DVec3, dir: DVec3) -> Option<Segment> {
    let mut t_in = f64::NEG_INFINITY;
    let mut t_out = f64::INFINITY;
    let mut n_in = DVec3::ZERO;
    let mut n_out = DVec3::ZERO;

    for axis in 0..3 {
        let d = dir[axis];
        let o = origin[axis];
        if d.abs() < PARALLEL_EPS {
            if o < min[axis] || o > max[axis] {
                return None;
            }
            continue;
        }
        let (near, far, sign) = if d > 0.0 {
            ((min[axis] - o) / d, (max[axis] - o) / d, 1.0)
        } else {
            ((max[axis] - o) / d, (min[axis] - o) / d, -1.0)
        };
        if near > t_in {
            t_in = near;
            n_in = axis_normal(axis, -sign);
        }
        if far < t_out {
            t_out = far;
            n_out = axis_normal(axis, sign);
        }
    }

    if t_in > t_out || t_out < 0.0 || !t_in.is_finite() || !t_out.is_finite() {
        return None;
    }
    Some(Segment { t_in, t_out, n_in, n_out })
}

fn intersect_sph(center: DVec3, radius: f64, origin: DVec3, dir: DVec3) -> Option<Segment> {
    let a = dir.length_squared();
    if a == 0.0 || radius <= 0.0 {
        return None;
    }
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - a * c;
    if disc <= 0.0 {
        // Miss or tangent graze: no volume is crossed
        return None;
    }
    let sq = disc.sqrt();
    let t_in = (-b - sq) / a;
    let t_out = (-b + sq) / a;
    if t_out < 0.0 {
        return None;
    }
    let n_in = (origin + dir * t_in - center) / radius;
    let n_out = (origin + dir * t_out - center) / radius;
    Some(Segment { t_in, t_out, n_in, n_out })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Shape {
        Shape::Rpp {
            min: [-10.0; 3],
            max: [10.0; 3],
        }
    }

    #[test]
    fn test_rpp_through() {
        let seg = unit_box()
            .intersect(DVec3::new(-20.0, 0.0, 0.0), DVec3::X)
            .expect("ray should hit box");
        assert!((seg.t_in - 10.0).abs() < 1e-12);
        assert!((seg.t_out - 30.0).abs() < 1e-12);
        assert_eq!(seg.n_in, DVec3::NEG_X);
        assert_eq!(seg.n_out, DVec3::X);
    }

    #[test]
    fn test_rpp_negative_direction() {
        let seg = unit_box()
            .intersect(DVec3::new(0.0, 0.0, 50.0), DVec3::NEG_Z)
            .unwrap();
        assert!((seg.t_in - 40.0).abs() < 1e-12);
        assert!((seg.t_out - 60.0).abs() < 1e-12);
        assert_eq!(seg.n_in, DVec3::Z);
        assert_eq!(seg.n_out, DVec3::NEG_Z);
    }

    #[test]
    fn test_rpp_miss_and_behind() {
        let b = unit_box();
        assert!(b.intersect(DVec3::new(-20.0, 11.0, 0.0), DVec3::X).is_none());
        assert!(b.intersect(DVec3::new(20.0, 0.0, 0.0), DVec3::X).is_none());
    }

    #[test]
    fn test_rpp_origin_inside() {
        let seg = unit_box().intersect(DVec3::ZERO, DVec3::Y).unwrap();
        assert!((seg.t_in + 10.0).abs() < 1e-12);
        assert!((seg.t_out - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_sph_through() {
        let s = Shape::Sph {
            center: [0.0, 0.0, 0.0],
            radius: 5.0,
        };
        let seg = s.intersect(DVec3::new(0.0, -10.0, 0.0), DVec3::Y).unwrap();
        assert!((seg.t_in - 5.0).abs() < 1e-12);
        assert!((seg.t_out - 15.0).abs() < 1e-12);
        assert!((seg.n_in - DVec3::NEG_Y).length() < 1e-12);
        assert!((seg.n_out - DVec3::Y).length() < 1e-12);
        assert!(s.intersect(DVec3::new(0.0, -10.0, 6.0), DVec3::Y).is_none());
    }

    #[test]
    fn test_bounds_and_degenerate() {
        let s = Shape::Sph {
            center: [1.0, 2.0, 3.0],
            radius: 1.0,
        };
        assert_eq!(s.bounds().min, DVec3::new(0.0, 1.0, 2.0));
        assert!(!s.is_degenerate());
        let flat = Shape::Rpp {
            min: [0.0; 3],
            max: [1.0, 0.0, 1.0],
        };
        assert!(flat.is_degenerate());
    }

    #[test]
    fn test_shape_json() {
        let s: Shape = serde_json::from_str(r#"{"rpp": {"min": [0,0,0], "max": [1,1,1]}}"#).unwrap();
        assert_eq!(
            s,
            Shape::Rpp {
                min: [0.0; 3],
                max: [1.0; 3]
            }
        );
    }
}
