//! Banded input/output queues.
//!
//! Each band owns one input and one output deque, each behind its own mutex.
//! Band 0 is scanned first. Two shared signals announce "input available"
//! and "output available" to every waiter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::core::{Job, JobResult};
use crate::util::{Error, Result};

/// Broadcast signal backed by a generation counter.
///
/// A waiter records the generation, checks its condition, then waits for the
/// generation to move. A notify that lands between the check and the wait
/// bumps the counter, so the wait returns at once.
#[derive(Default)]
pub(crate) struct Signal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    pub(crate) fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Block until the generation differs from `seen`.
    /// Returns false if `deadline` passed first.
    pub(crate) fn wait_past(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut generation = self.generation.lock();
        while *generation == seen {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut generation, deadline).timed_out() {
                        return *generation != seen;
                    }
                }
                None => self.cond.wait(&mut generation),
            }
        }
        true
    }
}

/// A job the queue set refused, handed back with the reason.
#[derive(Debug)]
pub struct Rejected {
    pub error: Error,
    pub job: Box<Job>,
}

/// Input and output bands shared by clients and workers.
pub struct QueueSet {
    input: Vec<Mutex<VecDeque<Box<Job>>>>,
    output: Vec<Mutex<VecDeque<Box<JobResult>>>>,
    input_ready: Signal,
    output_ready: Signal,
    closed: AtomicBool,
}

impl QueueSet {
    /// Create `num_bands` input bands and as many output bands (at least one).
    pub fn new(num_bands: usize) -> Self {
        let num_bands = num_bands.max(1);
        Self {
            input: (0..num_bands).map(|_| Mutex::new(VecDeque::new())).collect(),
            output: (0..num_bands).map(|_| Mutex::new(VecDeque::new())).collect(),
            input_ready: Signal::default(),
            output_ready: Signal::default(),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn num_bands(&self) -> usize {
        self.input.len()
    }

    /// Reject band indices outside `0..num_bands`.
    pub fn check_band(&self, band: usize) -> Result<()> {
        if band < self.num_bands() {
            Ok(())
        } else {
            Err(Error::InvalidBand {
                band,
                count: self.num_bands(),
            })
        }
    }

    /// Append a job to an input band and wake every idle worker.
    ///
    /// An invalid band or a closed set hands the job back untouched.
    pub fn push_input(&self, job: Box<Job>, band: usize) -> std::result::Result<(), Rejected> {
        if let Err(error) = self.check_band(band) {
            return Err(Rejected { error, job });
        }
        {
            let mut queue = self.input[band].lock();
            // Checked under the band lock: a close followed by drain either
            // sees this job or makes this push fail
            if self.is_closed() {
                return Err(Rejected {
                    error: Error::ShutDown,
                    job,
                });
            }
            queue.push_back(job);
        }
        self.input_ready.notify();
        Ok(())
    }

    /// Dequeue the oldest job of the lowest non-empty band.
    pub fn pop_input(&self) -> Option<(usize, Box<Job>)> {
        self.input
            .iter()
            .enumerate()
            .find_map(|(band, queue)| queue.lock().pop_front().map(|job| (band, job)))
    }

    /// Dequeue a job, blocking while every band is empty.
    /// Returns `None` once the set is closed.
    pub fn wait_input(&self) -> Option<(usize, Box<Job>)> {
        loop {
            let seen = self.input_ready.generation();
            if self.is_closed() {
                return None;
            }
            if let Some(found) = self.pop_input() {
                return Some(found);
            }
            self.input_ready.wait_past(seen, None);
        }
    }

    /// Append a result to an output band and wake every waiter.
    pub fn push_output(&self, result: Box<JobResult>, band: usize) -> Result<()> {
        self.check_band(band)?;
        self.output[band].lock().push_back(result);
        self.output_ready.notify();
        Ok(())
    }

    /// Remove the first result in `band` accepted by `pred`. The whole band
    /// is scanned.
    pub fn take_output(&self, band: usize, pred: impl Fn(&JobResult) -> bool) -> Option<Box<JobResult>> {
        let mut queue = self.output.get(band)?.lock();
        let pos = queue.iter().position(|r| pred(&**r))?;
        queue.remove(pos)
    }

    /// Remove the first result accepted by `pred`, scanning bands in order.
    pub fn take_any_output(&self, pred: impl Fn(&JobResult) -> bool) -> Option<Box<JobResult>> {
        (0..self.num_bands()).find_map(|band| self.take_output(band, &pred))
    }

    /// Block until `band` holds a result accepted by `pred`.
    ///
    /// `Ok(None)` means `deadline` passed first. Fails with
    /// [`Error::ShutDown`] once the set is closed.
    pub fn wait_output(
        &self,
        band: usize,
        pred: impl Fn(&JobResult) -> bool,
        deadline: Option<Instant>,
    ) -> Result<Option<Box<JobResult>>> {
        self.check_band(band)?;
        loop {
            let seen = self.output_ready.generation();
            if let Some(result) = self.take_output(band, &pred) {
                return Ok(Some(result));
            }
            if self.is_closed() {
                return Err(Error::ShutDown);
            }
            if !self.output_ready.wait_past(seen, deadline) {
                return Ok(self.take_output(band, &pred));
            }
        }
    }

    /// Jobs waiting across all input bands.
    pub fn pending_input(&self) -> usize {
        self.input.iter().map(|q| q.lock().len()).sum()
    }

    /// Results waiting across all output bands.
    pub fn pending_output(&self) -> usize {
        self.output.iter().map(|q| q.lock().len()).sum()
    }

    /// Refuse further input and wake every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.input_ready.notify();
        self.output_ready.notify();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Empty every band, returning what was left.
    pub fn drain(&self) -> (Vec<Box<Job>>, Vec<Box<JobResult>>) {
        let jobs = self.input.iter().flat_map(|q| q.lock().drain(..).collect::<Vec<_>>()).collect();
        let results = self
            .output
            .iter()
            .flat_map(|q| q.lock().drain(..).collect::<Vec<_>>())
            .collect();
        (jobs, results)
    }
}
