//! Worker threads that drain the input bands.
//!
//! Every worker owns a [`ThreadSlot`] for its whole life and loops:
//! dequeue from the lowest non-empty band, shoot every ray of the job against
//! every instance of the job's session, push the result to the output band
//! the job came from. Idle workers sleep on the queue set's input signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::core::{Hit, Job, JobResult, RayResult, ResourcePool};
use crate::geom::{Intersector, ThreadSlot};
use crate::queue::QueueSet;
use crate::session::SessionRegistry;
use crate::util::Result;

/// Live server counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    rays_shot: AtomicU64,
}

impl ServerStats {
    pub(crate) fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo [`job_submitted`](Self::job_submitted) for a job the queues refused.
    pub(crate) fn submission_withdrawn(&self) {
        self.jobs_submitted.fetch_sub(1, Ordering::Relaxed);
    }

    /// Copy of the counters at this instant.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            rays_shot: self.rays_shot.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub rays_shot: u64,
}

impl StatsSnapshot {
    /// Jobs submitted but neither completed nor failed yet.
    pub fn in_flight(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_completed + self.jobs_failed)
    }
}

/// Everything a worker needs, shared with the server front end.
pub(crate) struct WorkerContext {
    pub queues: Arc<QueueSet>,
    pub sessions: Arc<SessionRegistry>,
    pub pool: Arc<ResourcePool>,
    pub intersector: Arc<dyn Intersector>,
    pub stats: Arc<ServerStats>,
}

/// Fixed set of worker threads.
pub(crate) struct WorkerPool {
    ctx: Arc<WorkerContext>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `num_threads` workers.
    pub fn spawn(num_threads: usize, ctx: Arc<WorkerContext>) -> Result<Self> {
        let mut pool = Self {
            ctx,
            handles: Vec::with_capacity(num_threads),
        };
        for thread_no in 0..num_threads {
            let ctx = Arc::clone(&pool.ctx);
            let slot = ThreadSlot::new(thread_no);
            // On failure `pool` is dropped, which stops the threads started so far
            let handle = thread::Builder::new()
                .name(format!("rtserver-worker-{thread_no}"))
                .spawn(move || worker_loop(ctx, slot))?;
            pool.handles.push(handle);
        }
        tracing::debug!(threads = num_threads, "workers started");
        Ok(pool)
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Close the queues and join every worker. Idempotent.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.ctx.queues.close();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        tracing::debug!("workers stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(ctx: Arc<WorkerContext>, mut slot: ThreadSlot) {
    let _span = tracing::debug_span!("worker", thread = slot.thread_no()).entered();

    while let Some((band, job)) = ctx.queues.wait_input() {
        let Some(result) = process_job(&ctx, job, &mut slot) else {
            continue;
        };
        // Counted before the result becomes visible to clients
        ctx.stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = ctx.queues.push_output(result, band) {
            tracing::error!(band, "failed to queue result: {e}");
            ctx.stats.jobs_completed.fetch_sub(1, Ordering::Relaxed);
            ctx.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Shoot one job. Returns `None` if the job's session is not open; the job
/// is then recycled and counted as failed.
pub(crate) fn process_job(ctx: &WorkerContext, job: Box<Job>, slot: &mut ThreadSlot) -> Option<Box<JobResult>> {
    let Some(session) = ctx.sessions.get(job.session_id) else {
        tracing::error!(session = job.session_id, job = job.id, "job references a session that is not open");
        ctx.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
        ctx.pool.release(job);
        return None;
    };

    let mut result = ctx.pool.acquire::<JobResult>();
    result.session_id = job.session_id;
    result.job_id = job.id;

    let weave = session.instances().len() > 1;
    for ray in job.rays() {
        let mut ray_result = ctx.pool.acquire::<RayResult>();
        ray_result.ray = *ray;

        for instance in session.instances() {
            let local = match instance.xform() {
                Some(x) => x.apply_ray(ray),
                None => *ray,
            };
            if !ctx.intersector.shoot(&local, instance.index(), slot) {
                continue;
            }
            for part in &slot.partitions {
                let region = instance.index().region(part.region);
                let (enter_normal, exit_normal) = match instance.xform() {
                    Some(x) => (x.normal_to_session(part.in_normal), x.normal_to_session(part.out_normal)),
                    None => (part.in_normal, part.out_normal),
                };
                let mut hit = ctx.pool.acquire::<Hit>();
                hit.hit_dist = part.in_dist;
                hit.los = part.out_dist - part.in_dist;
                hit.enter_normal = enter_normal;
                hit.exit_normal = exit_normal;
                hit.comp_id = session.components().resolve(region);
                hit.region = Some(Arc::clone(&region.name));
                ray_result.hits.push(hit);
            }
        }

        // Each instance reports in order; merge them
        if weave {
            ray_result.hits.sort_by(|a, b| a.hit_dist.total_cmp(&b.hit_dist));
        }
        result.got_some_hits |= !ray_result.hits.is_empty();
        result.ray_results.push(ray_result);
    }

    ctx.stats
        .rays_shot
        .fetch_add(job.len() as u64, Ordering::Relaxed);
    tracing::trace!(
        job = job.id,
        session = job.session_id,
        thread = slot.thread_no(),
        hits = result.got_some_hits,
        "job done"
    );
    result.job = Some(job);
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{BvhIntersector, GeometryInstance, Region, Shape, SpatialIndex};
    use crate::loader::{GeometryLoader, LoadOptions, LoadedModel};
    use crate::util::{DMat4, DVec3};
    use std::path::Path;

    /// Two unit boxes along X, each as its own instance.
    struct TwoInstances;

    impl GeometryLoader for TwoInstances {
        fn load(&self, _source: &Path, _options: &LoadOptions) -> Result<LoadedModel> {
            let make = |name: &str, id: i32, comp: &str, x: f64| {
                let region = Region {
                    name: Arc::from(name),
                    region_id: id,
                    aircode: 0,
                    component: Some(comp.to_string()),
                    shape: Shape::Rpp {
                        min: [x - 1.0, -1.0, -1.0],
                        max: [x + 1.0, 1.0, 1.0],
                    },
                };
                GeometryInstance::new(Arc::new(SpatialIndex::build(vec![region])), Some(comp.to_lowercase()), vec![])
            };
            // Far box loaded first so weaving is observable
            Ok(LoadedModel::new(
                "two".into(),
                vec![make("/far.r", 2, "FAR", 10.0), make("/near.r", 1, "NEAR", 0.0)],
            ))
        }
    }

    fn context() -> WorkerContext {
        let sessions = Arc::new(SessionRegistry::new());
        sessions
            .load(&TwoInstances, Path::new("two"), &LoadOptions::default())
            .unwrap();
        WorkerContext {
            queues: Arc::new(QueueSet::new(2)),
            sessions,
            pool: Arc::new(ResourcePool::new()),
            intersector: Arc::new(BvhIntersector),
            stats: Arc::new(ServerStats::default()),
        }
    }

    fn x_ray_job(ctx: &WorkerContext, session: usize, id: i64) -> Box<Job> {
        let mut job = ctx.pool.job(session, id);
        job.push_ray(ctx.pool.ray(DVec3::new(-5.0, 0.0, 0.0), DVec3::X, 0));
        job.push_ray(ctx.pool.ray(DVec3::new(-5.0, 5.0, 0.0), DVec3::X, 1));
        job
    }

    #[test]
    fn test_process_weaves_instances() {
        let ctx = context();
        let mut slot = ThreadSlot::new(0);
        let result = process_job(&ctx, x_ray_job(&ctx, 0, 42), &mut slot).unwrap();

        assert!(result.matches(42, 0));
        assert!(result.got_some_hits);
        assert_eq!(result.len(), 2);

        let rays: Vec<_> = result.ray_results().collect();
        let hits: Vec<_> = rays[0].hits().collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].hit_dist, 4.0);
        assert_eq!(hits[0].los, 2.0);
        assert_eq!(hits[0].region.as_deref(), Some("/near.r"));
        assert_eq!(hits[0].enter_normal, DVec3::NEG_X);
        assert_eq!(hits[1].hit_dist, 14.0);
        let names = ctx.sessions.components();
        assert_eq!(names.name(hits[0].comp_id), Some("NEAR"));
        assert_eq!(names.name(hits[1].comp_id), Some("FAR"));

        assert!(rays[1].is_miss());
        assert_eq!(rays[1].ray.index, 1);
        assert_eq!(result.job().unwrap().len(), 2);
        assert_eq!(ctx.stats.snapshot().rays_shot, 2);
    }

    #[test]
    fn test_process_applies_transform() {
        let ctx = context();
        ctx.sessions.open_session().unwrap();
        let id = ctx.sessions.open_session().unwrap();
        // Shift the near box 20 units along +X in session space
        ctx.sessions
            .set_transform(id, 1, DMat4::from_translation(DVec3::new(-20.0, 0.0, 0.0)))
            .unwrap();

        let mut slot = ThreadSlot::new(0);
        let result = process_job(&ctx, x_ray_job(&ctx, id, 1), &mut slot).unwrap();
        let first = result.ray_results().next().unwrap();
        let dists: Vec<_> = first.hits().map(|h| h.hit_dist).collect();
        assert_eq!(dists, vec![14.0, 24.0]);
        let near = first.hits().nth(1).unwrap();
        assert!((near.enter_normal - DVec3::NEG_X).length() < 1e-12);

        // Session 0 is untouched
        let result = process_job(&ctx, x_ray_job(&ctx, 0, 2), &mut slot).unwrap();
        let first = result.ray_results().next().unwrap();
        assert_eq!(first.hits().next().unwrap().hit_dist, 4.0);
    }

    #[test]
    fn test_missing_session_fails_job() {
        let ctx = context();
        let mut slot = ThreadSlot::new(0);
        assert!(process_job(&ctx, x_ray_job(&ctx, 3, 7), &mut slot).is_none());
        assert_eq!(ctx.stats.snapshot().jobs_failed, 1);
        // The job and its rays went back to the pool
        let stats = ctx.pool.stats();
        assert_eq!(stats.jobs.free, 1);
        assert_eq!(stats.rays.free, 2);
    }

    #[test]
    fn test_pool_runs_jobs_to_output_band() {
        let ctx = Arc::new(context());
        let mut workers = WorkerPool::spawn(3, Arc::clone(&ctx)).unwrap();
        assert_eq!(workers.num_threads(), 3);

        for id in 0..10 {
            ctx.stats.job_submitted();
            ctx.queues.push_input(x_ray_job(&ctx, 0, id), 1).unwrap();
        }
        for id in 0..10 {
            let r = ctx
                .queues
                .wait_output(1, |r| r.matches(id, 0), None)
                .unwrap()
                .unwrap();
            ctx.pool.release(r);
        }
        workers.shutdown();
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.jobs_completed, 10);
        assert_eq!(stats.in_flight(), 0);
        assert!(ctx.queues.is_closed());
        // Second call is a no-op
        workers.shutdown();
    }
}
