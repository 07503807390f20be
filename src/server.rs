//! Client-facing ray-trace server.
//!
//! [`RtServer`] ties the session registry, the banded queues, the worker
//! threads and the record pool together. Control calls (load, open/close
//! session, transforms) are expected from a single thread; submission and
//! retrieval may come from any number of threads.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::components::ComponentTable;
use crate::config::ServerConfig;
use crate::core::{Job, JobResult, PoolSummary, Ray, ResourcePool, SessionId};
use crate::geom::{BvhIntersector, Intersector};
use crate::loader::{GeometryLoader, ItemNode, JsonModelLoader, LoadOptions};
use crate::queue::{QueueSet, Rejected};
use crate::session::SessionRegistry;
use crate::util::{BBox3d, DMat4, DVec3, Error, Result};
use crate::worker::{ServerStats, StatsSnapshot, WorkerContext, WorkerPool};

/// Job id used by [`RtServer::shoot_ray`].
pub const SINGLE_SHOT_JOB_ID: i64 = -1;

/// Concurrent ray-trace job server.
pub struct RtServer {
    config: ServerConfig,
    loader: Arc<dyn GeometryLoader>,
    sessions: Arc<SessionRegistry>,
    queues: Arc<QueueSet>,
    pool: Arc<ResourcePool>,
    stats: Arc<ServerStats>,
    workers: Mutex<WorkerPool>,
}

impl RtServer {
    /// Start a server reading JSON model databases with the BVH kernel.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_collaborators(config, Arc::new(JsonModelLoader), Arc::new(BvhIntersector))
    }

    /// Start a server with a custom geometry loader and intersection kernel.
    pub fn with_collaborators(
        config: ServerConfig,
        loader: Arc<dyn GeometryLoader>,
        intersector: Arc<dyn Intersector>,
    ) -> Result<Self> {
        config.validate()?;

        let ctx = Arc::new(WorkerContext {
            queues: Arc::new(QueueSet::new(config.num_queues)),
            sessions: Arc::new(SessionRegistry::new()),
            pool: Arc::new(ResourcePool::new()),
            intersector,
            stats: Arc::new(ServerStats::default()),
        });
        let workers = WorkerPool::spawn(config.num_threads, Arc::clone(&ctx))?;
        tracing::info!(
            threads = config.num_threads,
            queues = config.num_queues,
            "rtserver started"
        );

        Ok(Self {
            loader,
            sessions: Arc::clone(&ctx.sessions),
            queues: Arc::clone(&ctx.queues),
            pool: Arc::clone(&ctx.pool),
            stats: Arc::clone(&ctx.stats),
            workers: Mutex::new(workers),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.config.num_threads
    }

    #[inline]
    pub fn num_queues(&self) -> usize {
        self.queues.num_bands()
    }

    // ---- Geometry and sessions ----

    /// Load a model with the configured options and make it session 0.
    /// Every previously opened session is discarded.
    pub fn load(&self, source: impl AsRef<Path>) -> Result<SessionId> {
        self.load_with(source, &self.config.load_options())
    }

    /// Load a model with explicit options.
    pub fn load_with(&self, source: impl AsRef<Path>, options: &LoadOptions) -> Result<SessionId> {
        self.sessions.load(self.loader.as_ref(), source.as_ref(), options)
    }

    /// See [`SessionRegistry::open_session`].
    pub fn open_session(&self) -> Result<SessionId> {
        self.sessions.open_session()
    }

    /// See [`SessionRegistry::close_session`]. Jobs for this session that
    /// are already running finish against the snapshot they resolved.
    pub fn close_session(&self, id: SessionId) {
        self.sessions.close_session(id);
    }

    pub fn set_transform(&self, id: SessionId, instance: usize, matrix: DMat4) -> Result<()> {
        self.sessions.set_transform(id, instance, matrix)
    }

    pub fn reset_transforms(&self, id: SessionId) -> Result<()> {
        self.sessions.reset_transforms(id)
    }

    /// Extents of a session, or `None` if it is not open.
    pub fn session_bounds(&self, id: SessionId) -> Option<BBox3d> {
        self.sessions.bounds(id)
    }

    /// Instance index for an assembly name.
    pub fn instance_by_name(&self, id: SessionId, name: &str) -> Result<usize> {
        let session = self.sessions.get(id).ok_or(Error::SessionNotFound(id))?;
        session
            .instance_by_name(name)
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))
    }

    /// Object hierarchy behind a session's geometry.
    pub fn item_tree(&self, id: SessionId) -> Result<Arc<ItemNode>> {
        self.sessions.item_tree(id).ok_or(Error::SessionNotFound(id))
    }

    /// Title of the loaded model.
    pub fn title(&self) -> String {
        self.sessions.title()
    }

    /// Component names, indexed by the `comp_id` reported in hits.
    pub fn component_names(&self) -> Vec<String> {
        self.sessions.components().names().to_vec()
    }

    pub fn components(&self) -> Arc<ComponentTable> {
        self.sessions.components()
    }

    // ---- Records ----

    /// The shared record pool.
    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Pooled empty job.
    pub fn new_job(&self, session_id: SessionId, id: i64) -> Box<Job> {
        self.pool.job(session_id, id)
    }

    /// Pooled ray.
    pub fn new_ray(&self, origin: DVec3, dir: DVec3, index: i64) -> Box<Ray> {
        self.pool.ray(origin, dir, index)
    }

    /// Return a result, its job, rays and hits to the pool.
    pub fn release(&self, result: Box<JobResult>) {
        self.pool.release(result);
    }

    /// Return an unsubmitted job and its rays to the pool.
    pub fn release_job(&self, job: Box<Job>) {
        self.pool.release(job);
    }

    // ---- Submission and retrieval ----

    /// Queue a job on `band` and return immediately. A rejected job is
    /// recycled.
    pub fn submit(&self, job: Box<Job>, band: usize) -> Result<()> {
        // Counted before a worker can see the job
        self.stats.job_submitted();
        match self.queues.push_input(job, band) {
            Ok(()) => Ok(()),
            Err(Rejected { error, job }) => {
                self.stats.submission_withdrawn();
                self.pool.release(job);
                Err(error)
            }
        }
    }

    /// Queue a job and block until its result appears on `band`.
    ///
    /// Blocks for ever if no worker produces the result, for instance when
    /// the session is not open. Use
    /// [`submit_and_wait_timeout`](Self::submit_and_wait_timeout) for a
    /// bounded wait.
    pub fn submit_and_wait(&self, job: Box<Job>, band: usize) -> Result<Box<JobResult>> {
        self.submit_and_wait_inner(job, band, None)
    }

    /// Like [`submit_and_wait`](Self::submit_and_wait), failing with
    /// [`Error::Timeout`] after `timeout`. A result arriving later stays on
    /// its band for [`poll_any`](Self::poll_any).
    pub fn submit_and_wait_timeout(&self, job: Box<Job>, band: usize, timeout: Duration) -> Result<Box<JobResult>> {
        self.submit_and_wait_inner(job, band, Some(Instant::now() + timeout))
    }

    fn submit_and_wait_inner(&self, job: Box<Job>, band: usize, deadline: Option<Instant>) -> Result<Box<JobResult>> {
        let (job_id, session_id) = (job.id, job.session_id);
        self.submit(job, band)?;
        self.queues
            .wait_output(band, |r| r.matches(job_id, session_id), deadline)?
            .ok_or(Error::Timeout { job_id, session_id })
    }

    /// Shoot a single ray on band 0 and block for its result.
    pub fn shoot_ray(&self, origin: DVec3, dir: DVec3, session: SessionId) -> Result<Box<JobResult>> {
        let mut job = self.new_job(session, SINGLE_SHOT_JOB_ID);
        job.push_ray(self.new_ray(origin, dir, 0));
        self.submit_and_wait(job, 0)
    }

    /// Take the first finished result for `session`, scanning bands in
    /// order. Never blocks.
    pub fn poll_any(&self, session: SessionId) -> Option<Box<JobResult>> {
        self.queues.take_any_output(|r| r.session_id() == session)
    }

    /// Jobs waiting for a worker.
    pub fn pending_jobs(&self) -> usize {
        self.queues.pending_input()
    }

    /// Results waiting for a client.
    pub fn pending_results(&self) -> usize {
        self.queues.pending_output()
    }

    // ---- Lifecycle ----

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn pool_stats(&self) -> PoolSummary {
        self.pool.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.queues.is_closed()
    }

    /// Stop every worker, recycle whatever is still queued and empty the
    /// pool. Later submissions fail with [`Error::ShutDown`].
    pub fn shutdown(&self) {
        let mut workers = self.workers.lock();
        if workers.num_threads() == 0 {
            return;
        }
        workers.shutdown();

        let (jobs, results) = self.queues.drain();
        if !jobs.is_empty() || !results.is_empty() {
            tracing::debug!(jobs = jobs.len(), results = results.len(), "dropping queued work");
        }
        for job in jobs {
            self.pool.release(job);
        }
        for result in results {
            self.pool.release(result);
        }
        tracing::debug!("{}", self.pool.stats());
        self.pool.purge();
        tracing::info!("rtserver stopped");
    }
}

impl Drop for RtServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
