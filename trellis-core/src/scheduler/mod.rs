//! Update Scheduler
//!
//! The scheduler batches component updates and watcher callbacks so that
//! many synchronous state changes produce a single re-render.
//!
//! # Overview
//!
//! Effects whose scheduler is [`queue_job`] do not re-run when a dependency
//! changes. Instead their job is queued, and the whole batch is flushed
//! later, in a deterministic order:
//!
//! - pre-flush callbacks first,
//! - then jobs sorted by id (parents before children),
//! - then post-flush callbacks sorted by id.
//!
//! The "later" is cooperative: the host drives flushing either by calling
//! [`flush_jobs`] from its own loop or by awaiting [`next_tick`], which
//! yields once to the tokio executor and then flushes.

mod job;
mod queue;

pub use job::{Job, JobId};
pub use queue::{
    flush_jobs, flush_post_flush_cbs, flush_pre_flush_cbs, has_pending_work, invalidate_job,
    is_flushing, next_tick, queue_flush, queue_job, queue_post_flush_cb, queue_post_flush_cbs,
    queue_pre_flush_cb, RECURSION_LIMIT,
};
