//! Geometry instances: a shared spatial index plus a per-session transform.

use std::sync::Arc;

use super::index::SpatialIndex;
use crate::core::Ray;
use crate::util::{BBox3d, DMat4, DVec3};

/// Session-to-instance transform and its inverse.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Xform {
    /// Maps session-space rays into instance space.
    pub matrix: DMat4,
    /// Maps instance space back to session space.
    pub inverse: DMat4,
}

impl Xform {
    /// Create from the session-to-instance matrix.
    pub fn new(matrix: DMat4) -> Self {
        Self {
            matrix,
            inverse: matrix.inverse(),
        }
    }

    /// Move a session-space ray into instance space. The direction is not
    /// renormalized, so ray parameters stay in session units.
    #[inline]
    pub fn apply_ray(&self, ray: &Ray) -> Ray {
        Ray {
            origin: self.matrix.transform_point3(ray.origin),
            dir: self.matrix.transform_vector3(ray.dir),
            index: ray.index,
        }
    }

    /// Bring an instance-space surface normal back to session space.
    #[inline]
    pub fn normal_to_session(&self, n: DVec3) -> DVec3 {
        self.matrix.transpose().transform_vector3(n).normalize_or_zero()
    }
}

/// One prepared spatial index as seen by one session.
#[derive(Clone, Debug)]
pub struct GeometryInstance {
    index: Arc<SpatialIndex>,
    xform: Option<Xform>,
    name: Option<String>,
    trees: Vec<String>,
}

impl GeometryInstance {
    /// Wrap a freshly prepared index.
    pub fn new(index: Arc<SpatialIndex>, name: Option<String>, trees: Vec<String>) -> Self {
        Self {
            index,
            xform: None,
            name,
            trees,
        }
    }

    /// Duplicate for a new session: the spatial index is shared, the
    /// transform is dropped, names are copied.
    pub fn duplicate(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
            xform: None,
            name: self.name.clone(),
            trees: self.trees.clone(),
        }
    }

    /// The shared spatial index.
    #[inline]
    pub fn index(&self) -> &Arc<SpatialIndex> {
        &self.index
    }

    /// Current transform, if any.
    #[inline]
    pub fn xform(&self) -> Option<&Xform> {
        self.xform.as_ref()
    }

    /// Set or clear the transform.
    pub fn set_xform(&mut self, xform: Option<Xform>) {
        self.xform = xform;
    }

    /// Assembly name (named instances only).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Top-level object names the index was built from.
    pub fn trees(&self) -> &[String] {
        &self.trees
    }

    /// Extents in session space.
    pub fn bounds(&self) -> BBox3d {
        let b = self.index.bounds();
        match &self.xform {
            Some(x) => b.transformed(&x.inverse),
            None => b,
        }
    }
}
