//! Job Queue
//!
//! Three queues drive an update cycle:
//!
//! 1. **Pre-flush callbacks**: watchers with `flush: Pre`. They run before
//!    any component update so renders see their side effects.
//!
//! 2. **Jobs**: component updates, sorted by id ascending. Component ids
//!    increase from parent to child, so parents update first and a child
//!    already updated by its parent's re-render can be invalidated.
//!
//! 3. **Post-flush callbacks**: mounted/updated hooks, `flush: Post`
//!    watchers and directive post hooks. Deduplicated and sorted by id.
//!
//! `flush_jobs` drains all three, repeating until none has pending work.
//! Queuing never runs anything; the host calls [`flush_jobs`] or awaits
//! [`next_tick`].
//!
//! # Recursion
//!
//! A job may run at most `RECURSION_LIMIT` times in one flush. The next
//! attempt is skipped and reported as [`Error::RecursionLimit`].

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::job::Job;
use crate::error::{catch_panic, Error, ErrorSource, Result};

/// Maximum runs of one job within a single flush.
pub const RECURSION_LIMIT: usize = 100;

#[derive(Default)]
struct QueueState {
    queue: Vec<Job>,
    flush_index: usize,
    flushing: bool,
    flush_pending: bool,

    pending_pre: Vec<Job>,
    active_pre: Vec<Job>,
    pre_index: usize,
    pre_parent: Option<Job>,

    pending_post: Vec<Job>,
    active_post: Option<Vec<Job>>,
    post_index: usize,
}

thread_local! {
    static QUEUE: RefCell<QueueState> = RefCell::new(QueueState::default());
}

type Seen = HashMap<usize, usize>;

/// Queue a job for the next flush.
///
/// A job already waiting in the queue is not queued twice. While the job
/// itself is running it may only re-queue itself if it allows recursion.
pub fn queue_job(job: Job) {
    let queued = QUEUE.with(|state| {
        let mut state = state.borrow_mut();
        let start = if state.flushing {
            state.flush_index + usize::from(job.allows_recurse())
        } else {
            0
        };
        let duplicate = state.queue.iter().skip(start).any(|j| j.ptr_eq(&job));
        let is_pre_parent = state.pre_parent.as_ref().is_some_and(|p| p.ptr_eq(&job));
        if duplicate || is_pre_parent {
            return false;
        }

        let lower = if state.flushing { state.flush_index + 1 } else { 0 };
        let lower = lower.min(state.queue.len());
        let key = job.sort_key();
        let position = state.queue[lower..]
            .iter()
            .position(|j| j.sort_key() > key)
            .map_or(state.queue.len(), |offset| lower + offset);
        state.queue.insert(position, job);
        state.flush_pending = true;
        true
    });
    if queued {
        trace!("job queued");
    }
}

/// Remove a job that has not run yet in the current flush.
pub fn invalidate_job(job: &Job) {
    let removed = QUEUE.with(|state| {
        let mut state = state.borrow_mut();
        let position = state.queue.iter().position(|j| j.ptr_eq(job))?;
        if state.flushing && position <= state.flush_index {
            return None;
        }
        Some(state.queue.remove(position))
    });
    drop(removed);
}

fn queue_cb(job: Job, pre: bool) {
    QUEUE.with(|state| {
        let mut state = state.borrow_mut();
        let state = &mut *state;
        let (active, index) = if pre {
            (Some(&state.active_pre), state.pre_index)
        } else {
            (state.active_post.as_ref(), state.post_index)
        };
        let start = index + usize::from(job.allows_recurse());
        let running = active.is_some_and(|active| active.iter().skip(start).any(|j| j.ptr_eq(&job)));
        if running {
            return;
        }
        if pre {
            state.pending_pre.push(job);
        } else {
            state.pending_post.push(job);
        }
        state.flush_pending = true;
    });
}

/// Queue a callback to run before the next batch of jobs.
pub fn queue_pre_flush_cb(job: Job) {
    queue_cb(job, true);
}

/// Queue a callback to run after the next batch of jobs.
pub fn queue_post_flush_cb(job: Job) {
    queue_cb(job, false);
}

/// Queue several post-flush callbacks at once.
pub fn queue_post_flush_cbs(jobs: impl IntoIterator<Item = Job>) {
    for job in jobs {
        queue_cb(job, false);
    }
}

/// Mark a flush as pending. The flush happens on [`next_tick`] or an
/// explicit [`flush_jobs`].
pub fn queue_flush() {
    QUEUE.with(|state| state.borrow_mut().flush_pending = true);
}

/// Whether any queue has work waiting.
pub fn has_pending_work() -> bool {
    QUEUE.with(|state| {
        let state = state.borrow();
        !state.queue.is_empty() || !state.pending_pre.is_empty() || !state.pending_post.is_empty()
    })
}

pub fn is_flushing() -> bool {
    QUEUE.with(|state| state.borrow().flushing)
}

fn dedupe(jobs: Vec<Job>) -> Vec<Job> {
    let mut unique: Vec<Job> = Vec::with_capacity(jobs.len());
    for job in jobs {
        if !unique.iter().any(|j| j.ptr_eq(&job)) {
            unique.push(job);
        }
    }
    unique
}

fn check_recursion(seen: &mut Seen, job: &Job) -> Result<()> {
    let count = seen.entry(job.addr()).or_insert(0);
    *count += 1;
    if *count > RECURSION_LIMIT {
        let id = job.id().map_or(u64::MAX, |id| id.raw());
        warn!(job = id, limit = RECURSION_LIMIT, "maximum recursive updates exceeded");
        return Err(Error::RecursionLimit { job: id });
    }
    Ok(())
}

fn run(seen: &mut Seen, job: &Job) -> Result<()> {
    check_recursion(seen, job)?;
    catch_panic(ErrorSource::Scheduler, || job.call())
}

fn keep_first(first: &mut Option<Error>, result: Result<()>) {
    if let Err(err) = result {
        if first.is_none() {
            *first = Some(err);
        } else {
            debug!(error = %err, "additional error during flush");
        }
    }
}

fn run_pre_flush_cbs(seen: &mut Seen, parent: Option<&Job>) -> Result<()> {
    let mut first = None;
    loop {
        let batch = QUEUE.with(|state| {
            let mut state = state.borrow_mut();
            if state.pending_pre.is_empty() {
                return false;
            }
            state.pre_parent = parent.cloned();
            let pending = std::mem::take(&mut state.pending_pre);
            state.active_pre = dedupe(pending);
            true
        });
        if !batch {
            break;
        }

        let mut index = 0;
        loop {
            let job = QUEUE.with(|state| {
                let mut state = state.borrow_mut();
                state.pre_index = index;
                state.active_pre.get(index).cloned()
            });
            let Some(job) = job else {
                break;
            };
            keep_first(&mut first, run(seen, &job));
            index += 1;
        }

        let finished = QUEUE.with(|state| {
            let mut state = state.borrow_mut();
            state.pre_index = 0;
            state.pre_parent = None;
            std::mem::take(&mut state.active_pre)
        });
        drop(finished);
    }
    first.map_or(Ok(()), Err)
}

/// Run pending pre-flush callbacks now.
///
/// `parent` is the job about to run (a component update); it cannot be
/// queued by the callbacks since it is running next anyway.
pub fn flush_pre_flush_cbs(parent: Option<&Job>) -> Result<()> {
    let mut seen = Seen::new();
    run_pre_flush_cbs(&mut seen, parent)
}

fn run_post_flush_cbs(seen: &mut Seen) -> Result<()> {
    let batch = QUEUE.with(|state| {
        let mut state = state.borrow_mut();
        if state.pending_post.is_empty() || state.active_post.is_some() {
            return false;
        }
        let pending = std::mem::take(&mut state.pending_post);
        let mut unique = dedupe(pending);
        unique.sort_by_key(Job::sort_key);
        state.active_post = Some(unique);
        true
    });
    if !batch {
        return Ok(());
    }

    let mut first = None;
    let mut index = 0;
    loop {
        let job = QUEUE.with(|state| {
            let mut state = state.borrow_mut();
            state.post_index = index;
            state.active_post.as_ref().and_then(|jobs| jobs.get(index).cloned())
        });
        let Some(job) = job else {
            break;
        };
        keep_first(&mut first, run(seen, &job));
        index += 1;
    }

    let finished = QUEUE.with(|state| {
        let mut state = state.borrow_mut();
        state.post_index = 0;
        state.active_post.take()
    });
    drop(finished);
    first.map_or(Ok(()), Err)
}

/// Run pending post-flush callbacks now.
///
/// Callbacks queued while these run wait for the next flush. A nested call
/// while post callbacks are already running is a no-op.
pub fn flush_post_flush_cbs() -> Result<()> {
    let mut seen = Seen::new();
    run_post_flush_cbs(&mut seen)
}

/// Drain the pre-flush callbacks, the job queue and the post-flush
/// callbacks, repeating until all are empty.
///
/// Every job runs even if an earlier one failed; the first error is
/// returned. Calling this while a flush is running is a no-op.
pub fn flush_jobs() -> Result<()> {
    let already = QUEUE.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing {
            return true;
        }
        state.flushing = true;
        false
    });
    if already {
        return Ok(());
    }

    let mut seen = Seen::new();
    let mut first = None;
    loop {
        let job_count = QUEUE.with(|state| {
            let mut state = state.borrow_mut();
            state.flush_pending = false;
            state.flushing = true;
            state.queue.len()
        });
        debug!(jobs = job_count, "flushing scheduler queues");

        keep_first(&mut first, run_pre_flush_cbs(&mut seen, None));
        QUEUE.with(|state| state.borrow_mut().queue.sort_by_key(Job::sort_key));

        let mut index = 0;
        loop {
            let job = QUEUE.with(|state| {
                let mut state = state.borrow_mut();
                state.flush_index = index;
                state.queue.get(index).cloned()
            });
            let Some(job) = job else {
                break;
            };
            if job.is_active() {
                trace!(job = ?job.id(), "running job");
                keep_first(&mut first, run(&mut seen, &job));
            }
            index += 1;
        }

        let finished = QUEUE.with(|state| {
            let mut state = state.borrow_mut();
            state.flush_index = 0;
            std::mem::take(&mut state.queue)
        });
        drop(finished);

        keep_first(&mut first, run_post_flush_cbs(&mut seen));

        let more = QUEUE.with(|state| {
            let mut state = state.borrow_mut();
            let more = !state.queue.is_empty()
                || !state.pending_pre.is_empty()
                || !state.pending_post.is_empty();
            if !more {
                state.flushing = false;
            }
            more
        });
        if !more {
            break;
        }
    }
    first.map_or(Ok(()), Err)
}

/// Yield once to the executor, then flush any pending work.
///
/// Must be awaited on the thread that owns the reactive state, e.g. inside a
/// `tokio::task::LocalSet`.
pub async fn next_tick() -> Result<()> {
    tokio::task::yield_now().await;
    if has_pending_work() {
        flush_jobs()
    } else {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    type Log = Rc<StdRefCell<Vec<&'static str>>>;

    fn logging_job(id: Option<u64>, log: &Log, name: &'static str) -> Job {
        let log = log.clone();
        let f = move || {
            log.borrow_mut().push(name);
            Ok(())
        };
        match id {
            Some(id) => Job::with_id(id, f),
            None => Job::new(f),
        }
    }

    #[test]
    fn jobs_are_deduplicated_and_sorted() {
        let log = Log::default();
        let parent = logging_job(Some(1), &log, "parent");
        let child = logging_job(Some(2), &log, "child");
        let anonymous = logging_job(None, &log, "anonymous");

        queue_job(anonymous.clone());
        queue_job(child.clone());
        queue_job(parent.clone());
        queue_job(child.clone());

        flush_jobs().unwrap();
        assert_eq!(*log.borrow(), vec!["parent", "child", "anonymous"]);
        assert!(!has_pending_work());
    }

    #[test]
    fn pre_and_post_callbacks_bracket_jobs() {
        let log = Log::default();
        queue_post_flush_cb(logging_job(None, &log, "post"));
        queue_job(logging_job(Some(1), &log, "job"));
        queue_pre_flush_cb(logging_job(None, &log, "pre"));

        flush_jobs().unwrap();
        assert_eq!(*log.borrow(), vec!["pre", "job", "post"]);
    }

    #[test]
    fn post_callbacks_sorted_and_deduplicated() {
        let log = Log::default();
        let late = logging_job(Some(9), &log, "late");
        let early = logging_job(Some(3), &log, "early");
        queue_post_flush_cbs([late.clone(), early.clone(), late]);

        flush_post_flush_cbs().unwrap();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
    }

    #[test]
    fn inactive_jobs_are_skipped() {
        let log = Log::default();
        let job = logging_job(Some(1), &log, "job");
        queue_job(job.clone());
        job.set_active(false);
        flush_jobs().unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn invalidated_jobs_do_not_run() {
        let log = Log::default();
        let job = logging_job(Some(1), &log, "job");
        queue_job(job.clone());
        invalidate_job(&job);
        flush_jobs().unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn job_queued_during_flush_runs_in_same_flush() {
        let log = Log::default();
        let second = logging_job(Some(5), &log, "second");
        let first = {
            let log = log.clone();
            let second = second.clone();
            Job::with_id(1u64, move || {
                log.borrow_mut().push("first");
                queue_job(second.clone());
                Ok(())
            })
        };
        queue_job(first);
        flush_jobs().unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn errors_do_not_stop_other_jobs() {
        let log = Log::default();
        queue_job(Job::with_id(1u64, || Err(Error::user("first failed"))));
        queue_job(Job::with_id(2u64, || panic!("second panicked")));
        queue_job(logging_job(Some(3), &log, "third"));

        let err = flush_jobs().unwrap_err();
        assert!(matches!(err, Error::User(ref m) if m == "first failed"));
        assert_eq!(*log.borrow(), vec!["third"]);
        assert!(!is_flushing());
    }

    #[test]
    fn self_requeue_hits_recursion_limit() {
        let runs = Rc::new(std::cell::Cell::new(0usize));
        let slot: Rc<StdRefCell<Option<Job>>> = Rc::default();
        let job = {
            let runs = runs.clone();
            let slot = slot.clone();
            Job::with_id(1u64, move || {
                runs.set(runs.get() + 1);
                if let Some(me) = slot.borrow().clone() {
                    queue_job(me);
                }
                Ok(())
            })
        };
        job.set_allow_recurse(true);
        *slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        let err = flush_jobs().unwrap_err();
        assert!(matches!(err, Error::RecursionLimit { job: 1 }));
        assert_eq!(runs.get(), RECURSION_LIMIT);
        slot.borrow_mut().take();
    }

    #[test]
    fn self_requeue_without_recursion_is_ignored() {
        let runs = Rc::new(std::cell::Cell::new(0usize));
        let slot: Rc<StdRefCell<Option<Job>>> = Rc::default();
        let job = {
            let runs = runs.clone();
            let slot = slot.clone();
            Job::with_id(1u64, move || {
                runs.set(runs.get() + 1);
                if let Some(me) = slot.borrow().clone() {
                    queue_job(me);
                }
                Ok(())
            })
        };
        *slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        flush_jobs().unwrap();
        assert_eq!(runs.get(), 1);
        slot.borrow_mut().take();
    }

    #[tokio::test]
    async fn next_tick_flushes_pending_jobs() {
        let log = Log::default();
        queue_job(logging_job(Some(1), &log, "job"));
        assert!(log.borrow().is_empty());
        next_tick().await.unwrap();
        assert_eq!(*log.borrow(), vec!["job"]);
    }
}
