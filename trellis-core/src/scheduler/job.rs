//! Scheduler Jobs
//!
//! This module defines the unit of work the scheduler queues: component
//! updates, pre-flush watcher callbacks and post-flush hooks.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;

/// Ordering key of a job. Jobs without an id sort after every job with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

struct JobInner {
    id: Option<JobId>,
    func: Box<dyn Fn() -> Result<()>>,
    active: Cell<bool>,
    allow_recurse: Cell<bool>,
}

/// A schedulable unit of work. Cloning yields another handle to the same
/// job; the queue deduplicates by handle identity.
#[derive(Clone)]
pub struct Job(Rc<JobInner>);

impl Job {
    /// A job without an id, ordered after all jobs that have one.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<()> + 'static,
    {
        Self::build(None, Box::new(f))
    }

    /// A job ordered by `id`. Component updates use the instance uid so
    /// parents flush before children.
    pub fn with_id<F>(id: impl Into<JobId>, f: F) -> Self
    where
        F: Fn() -> Result<()> + 'static,
    {
        Self::build(Some(id.into()), Box::new(f))
    }

    fn build(id: Option<JobId>, func: Box<dyn Fn() -> Result<()>>) -> Self {
        Self(Rc::new(JobInner {
            id,
            func,
            active: Cell::new(true),
            allow_recurse: Cell::new(false),
        }))
    }

    pub fn id(&self) -> Option<JobId> {
        self.0.id
    }

    pub(crate) fn sort_key(&self) -> (bool, u64) {
        match self.0.id {
            Some(id) => (false, id.raw()),
            None => (true, 0),
        }
    }

    pub(crate) fn call(&self) -> Result<()> {
        (self.0.func)()
    }

    /// Whether the job will still run when reached in the queue.
    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Inactive jobs stay queued but are skipped.
    pub fn set_active(&self, active: bool) {
        self.0.active.set(active);
    }

    pub fn allows_recurse(&self) -> bool {
        self.0.allow_recurse.get()
    }

    /// Allow the job to queue itself again while it is running.
    pub fn set_allow_recurse(&self, allow: bool) {
        self.0.allow_recurse.set(allow);
    }

    pub fn ptr_eq(&self, other: &Job) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.0.id)
            .field("active", &self.is_active())
            .field("allow_recurse", &self.allows_recurse())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_without_id_sort_last() {
        let a = Job::with_id(5u64, || Ok(()));
        let b = Job::new(|| Ok(()));
        let c = Job::with_id(1u64, || Ok(()));
        let mut jobs = [a.clone(), b.clone(), c.clone()];
        jobs.sort_by_key(Job::sort_key);
        assert!(jobs[0].ptr_eq(&c));
        assert!(jobs[1].ptr_eq(&a));
        assert!(jobs[2].ptr_eq(&b));
    }

    #[test]
    fn clones_share_state() {
        let job = Job::new(|| Ok(()));
        let other = job.clone();
        other.set_active(false);
        assert!(!job.is_active());
        assert!(job.ptr_eq(&other));
    }
}
