//! Job and result records exchanged between clients and workers.
//!
//! Every record is handed around as a `Box` so it can be recycled through
//! the [`ResourcePool`](super::ResourcePool). Ownership moves with the box:
//! client → input band → worker → output band → client → pool.

use std::sync::Arc;

use crate::util::DVec3;

/// Index of a session in the registry. Session 0 is the master snapshot.
pub type SessionId = usize;

/// A single probe ray.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Ray {
    /// Start point.
    pub origin: DVec3,
    /// Unit direction.
    pub dir: DVec3,
    /// Opaque caller-supplied index, carried through to the result.
    pub index: i64,
}

impl Ray {
    /// Create a ray. The direction is normalized so hit distances are in
    /// model units.
    pub fn new(origin: DVec3, dir: DVec3, index: i64) -> Self {
        Self {
            origin,
            dir: dir.normalize_or_zero(),
            index,
        }
    }

    /// Point at distance `t` along the ray.
    #[inline]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.dir * t
    }
}

/// A batch of rays submitted together against one session.
#[derive(Debug, Default)]
pub struct Job {
    /// Session the rays are shot against.
    pub session_id: SessionId,
    /// Caller-chosen id used to correlate the result.
    pub id: i64,
    pub(crate) rays: Vec<Box<Ray>>,
}

impl Job {
    /// Append a ray; the job takes ownership of it.
    pub fn push_ray(&mut self, ray: Box<Ray>) {
        self.rays.push(ray);
    }

    /// Rays in submission order.
    pub fn rays(&self) -> impl Iterator<Item = &Ray> {
        self.rays.iter().map(|r| r.as_ref())
    }

    /// Number of rays in the job.
    #[inline]
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    /// True if the job carries no rays.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }
}

/// One in/out interval of a ray through a region.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hit {
    /// Distance from the ray origin to the entry point.
    pub hit_dist: f64,
    /// Line-of-sight thickness (exit distance minus entry distance).
    pub los: f64,
    /// Surface normal at entry.
    pub enter_normal: DVec3,
    /// Surface normal at exit.
    pub exit_normal: DVec3,
    /// Component index from the session's component table (0 if unknown).
    pub comp_id: u32,
    /// Name of the region that was hit.
    pub region: Option<Arc<str>>,
}

impl Hit {
    /// Distance from the ray origin to the exit point.
    #[inline]
    pub fn exit_dist(&self) -> f64 {
        self.hit_dist + self.los
    }
}

/// Outcome of one ray.
#[derive(Debug, Default)]
pub struct RayResult {
    /// The ray as submitted (session space).
    pub ray: Ray,
    pub(crate) hits: Vec<Box<Hit>>,
}

impl RayResult {
    /// Hits in entry-distance order.
    pub fn hits(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter().map(|h| h.as_ref())
    }

    /// Number of hits.
    #[inline]
    pub fn num_hits(&self) -> usize {
        self.hits.len()
    }

    /// True if the ray missed everything.
    #[inline]
    pub fn is_miss(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Aggregated outcome of one job.
#[derive(Debug, Default)]
pub struct JobResult {
    pub(crate) session_id: SessionId,
    pub(crate) job_id: i64,
    /// True if at least one ray hit something.
    pub got_some_hits: bool,
    pub(crate) job: Option<Box<Job>>,
    pub(crate) ray_results: Vec<Box<RayResult>>,
}

impl JobResult {
    /// Session of the originating job.
    #[inline]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Id of the originating job.
    #[inline]
    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// The originating job.
    pub fn job(&self) -> Option<&Job> {
        self.job.as_deref()
    }

    /// Per-ray results, same order as the job's rays.
    pub fn ray_results(&self) -> impl Iterator<Item = &RayResult> {
        self.ray_results.iter().map(|r| r.as_ref())
    }

    /// Number of per-ray results.
    #[inline]
    pub fn len(&self) -> usize {
        self.ray_results.len()
    }

    /// True if there are no per-ray results.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ray_results.is_empty()
    }

    /// Check whether this result belongs to the given job.
    #[inline]
    pub fn matches(&self, job_id: i64, session_id: SessionId) -> bool {
        self.job_id == job_id && self.session_id == session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_normalizes_direction() {
        let ray = Ray::new(DVec3::ZERO, DVec3::new(0.0, 3.0, 0.0), 7);
        assert_eq!(ray.dir, DVec3::Y);
        assert_eq!(ray.at(2.0), DVec3::new(0.0, 2.0, 0.0));
        assert_eq!(ray.index, 7);
    }

    #[test]
    fn test_hit_exit_dist() {
        let hit = Hit {
            hit_dist: 10.0,
            los: 20.0,
            ..Default::default()
        };
        assert_eq!(hit.exit_dist(), 30.0);
    }

    #[test]
    fn test_job_result_matches() {
        let result = JobResult {
            session_id: 2,
            job_id: 17,
            ..Default::default()
        };
        assert!(result.matches(17, 2));
        assert!(!result.matches(17, 0));
        assert!(!result.matches(16, 2));
    }
}
