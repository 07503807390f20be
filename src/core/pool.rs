//! Free-list recycler for the short-lived server records.
//!
//! Rays, jobs, hits, per-ray results and job results churn at a steady rate
//! while the server is busy. Released records go back onto a per-kind free
//! list and are handed out again, cleared, by the next acquire.
//!
//! All free lists sit behind one `parking_lot::Mutex`. Releasing a record
//! first strips its children into a local staging bin with no lock held, then
//! splices the whole bin into the free lists in one short critical section.
//! The pool is a pure cache with no upper bound.

use std::fmt;

use parking_lot::Mutex;

use super::record::{Hit, Job, JobResult, Ray, RayResult, SessionId};
use crate::util::DVec3;

/// Record kinds managed by the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Ray,
    Job,
    Hit,
    RayResult,
    JobResult,
}

impl RecordKind {
    /// Name used in summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ray => "ray",
            Self::Job => "job",
            Self::Hit => "hit",
            Self::RayResult => "ray_result",
            Self::JobResult => "job_result",
        }
    }
}

/// A record type that can live on a free list.
pub trait Recycle: Default + Send + 'static {
    /// Kind tag, used for statistics.
    const KIND: RecordKind;

    /// The free list holding records of this type.
    fn free_list(lists: &mut FreeLists) -> &mut FreeList<Self>;

    /// Clear this record, moving any owned child records into `bin`.
    fn strip(&mut self, bin: &mut FreeLists);
}

/// Free list and counters for one record kind.
pub struct FreeList<T> {
    free: Vec<Box<T>>,
    allocated: u64,
    acquired: u64,
    released: u64,
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self {
            free: Vec::new(),
            allocated: 0,
            acquired: 0,
            released: 0,
        }
    }
}

impl<T> FreeList<T> {
    fn pop(&mut self) -> Option<Box<T>> {
        self.acquired += 1;
        let record = self.free.pop();
        if record.is_none() {
            self.allocated += 1;
        }
        record
    }

    fn absorb(&mut self, other: &mut FreeList<T>) {
        self.released += other.free.len() as u64;
        self.free.append(&mut other.free);
    }

    fn stats(&self, kind: RecordKind) -> PoolStats {
        PoolStats {
            kind,
            allocated: self.allocated,
            acquired: self.acquired,
            released: self.released,
            free: self.free.len(),
        }
    }
}

/// One free list per record kind.
#[derive(Default)]
pub struct FreeLists {
    rays: FreeList<Ray>,
    jobs: FreeList<Job>,
    hits: FreeList<Hit>,
    ray_results: FreeList<RayResult>,
    job_results: FreeList<JobResult>,
}

impl FreeLists {
    fn absorb(&mut self, bin: &mut FreeLists) {
        self.rays.absorb(&mut bin.rays);
        self.jobs.absorb(&mut bin.jobs);
        self.hits.absorb(&mut bin.hits);
        self.ray_results.absorb(&mut bin.ray_results);
        self.job_results.absorb(&mut bin.job_results);
    }
}

/// Push a record and everything it owns onto the staging bin.
fn stage<T: Recycle>(mut record: Box<T>, bin: &mut FreeLists) {
    record.strip(bin);
    T::free_list(bin).free.push(record);
}

impl Recycle for Ray {
    const KIND: RecordKind = RecordKind::Ray;

    fn free_list(lists: &mut FreeLists) -> &mut FreeList<Self> {
        &mut lists.rays
    }

    fn strip(&mut self, _bin: &mut FreeLists) {
        *self = Ray::default();
    }
}

impl Recycle for Job {
    const KIND: RecordKind = RecordKind::Job;

    fn free_list(lists: &mut FreeLists) -> &mut FreeList<Self> {
        &mut lists.jobs
    }

    fn strip(&mut self, bin: &mut FreeLists) {
        for ray in self.rays.drain(..) {
            stage(ray, bin);
        }
        self.session_id = 0;
        self.id = 0;
    }
}

impl Recycle for Hit {
    const KIND: RecordKind = RecordKind::Hit;

    fn free_list(lists: &mut FreeLists) -> &mut FreeList<Self> {
        &mut lists.hits
    }

    fn strip(&mut self, _bin: &mut FreeLists) {
        *self = Hit::default();
    }
}

impl Recycle for RayResult {
    const KIND: RecordKind = RecordKind::RayResult;

    fn free_list(lists: &mut FreeLists) -> &mut FreeList<Self> {
        &mut lists.ray_results
    }

    fn strip(&mut self, bin: &mut FreeLists) {
        for hit in self.hits.drain(..) {
            stage(hit, bin);
        }
        self.ray = Ray::default();
    }
}

impl Recycle for JobResult {
    const KIND: RecordKind = RecordKind::JobResult;

    fn free_list(lists: &mut FreeLists) -> &mut FreeList<Self> {
        &mut lists.job_results
    }

    fn strip(&mut self, bin: &mut FreeLists) {
        if let Some(job) = self.job.take() {
            stage(job, bin);
        }
        for ray_result in self.ray_results.drain(..) {
            stage(ray_result, bin);
        }
        self.session_id = 0;
        self.job_id = 0;
        self.got_some_hits = false;
    }
}

/// Counter snapshot for one record kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub kind: RecordKind,
    /// Records created because the free list was empty.
    pub allocated: u64,
    /// Total acquire calls.
    pub acquired: u64,
    /// Total records returned (including recursively released children).
    pub released: u64,
    /// Records currently cached on the free list.
    pub free: usize,
}

impl PoolStats {
    /// Records handed out and not yet returned.
    #[inline]
    pub fn live(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Counter snapshot for every record kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSummary {
    pub rays: PoolStats,
    pub jobs: PoolStats,
    pub hits: PoolStats,
    pub ray_results: PoolStats,
    pub job_results: PoolStats,
}

impl PoolSummary {
    /// All kinds, in summary order.
    pub fn all(&self) -> [PoolStats; 5] {
        [self.jobs, self.job_results, self.ray_results, self.hits, self.rays]
    }
}

impl fmt::Display for PoolSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Resource Summary:")?;
        for s in self.all() {
            writeln!(
                f,
                "\t{:>6} {} structures free ({} live, {} allocated)",
                s.free,
                s.kind.name(),
                s.live(),
                s.allocated
            )?;
        }
        Ok(())
    }
}

/// Thread-safe recycler for server records.
#[derive(Default)]
pub struct ResourcePool {
    lists: Mutex<FreeLists>,
}

impl ResourcePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cleared record, reusing a cached one when available.
    pub fn acquire<T: Recycle>(&self) -> Box<T> {
        let recycled = {
            let mut lists = self.lists.lock();
            T::free_list(&mut lists).pop()
        };
        recycled.unwrap_or_default()
    }

    /// Return a record and everything it owns to the pool.
    pub fn release<T: Recycle>(&self, record: Box<T>) {
        let mut bin = FreeLists::default();
        stage(record, &mut bin);
        self.lists.lock().absorb(&mut bin);
    }

    /// Acquire a ray and fill it in.
    pub fn ray(&self, origin: DVec3, dir: DVec3, index: i64) -> Box<Ray> {
        let mut ray = self.acquire::<Ray>();
        *ray = Ray::new(origin, dir, index);
        ray
    }

    /// Acquire an empty job for the given session.
    pub fn job(&self, session_id: SessionId, id: i64) -> Box<Job> {
        let mut job = self.acquire::<Job>();
        job.session_id = session_id;
        job.id = id;
        job
    }

    /// Counter snapshot for one kind.
    pub fn stats_for<T: Recycle>(&self) -> PoolStats {
        let mut lists = self.lists.lock();
        T::free_list(&mut lists).stats(T::KIND)
    }

    /// Counter snapshot for every kind.
    pub fn stats(&self) -> PoolSummary {
        let lists = self.lists.lock();
        PoolSummary {
            rays: lists.rays.stats(RecordKind::Ray),
            jobs: lists.jobs.stats(RecordKind::Job),
            hits: lists.hits.stats(RecordKind::Hit),
            ray_results: lists.ray_results.stats(RecordKind::RayResult),
            job_results: lists.job_results.stats(RecordKind::JobResult),
        }
    }

    /// Drop every cached record. Counters are kept.
    pub fn purge(&self) {
        let mut lists = self.lists.lock();
        lists.rays.free.clear();
        lists.jobs.free.clear();
        lists.hits.free.clear();
        lists.ray_results.free.clear();
        lists.job_results.free.clear();
    }
}
