//! Error types shared by the reactive core, the scheduler and the renderer.
//!
//! Errors raised by user code (render functions, lifecycle hooks, watcher
//! callbacks, event handlers) are caught at well-defined boundaries and
//! tagged with the [`ErrorSource`] they were caught at before being routed
//! through the component error-capture chain.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;

use crate::reactive::TargetKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by Trellis or by user code running inside it.
#[derive(Debug, Error)]
pub enum Error {
    /// A failure reported by user code.
    #[error("{0}")]
    User(String),

    /// User code panicked inside a guarded call.
    #[error("panic in {origin}: {message}")]
    Panicked { origin: ErrorSource, message: String },

    /// A component with an async setup was mounted outside any suspense boundary.
    #[error("component `{component}` has an async setup but no enclosing suspense boundary")]
    AsyncSetupWithoutSuspense { component: String },

    /// A job re-queued itself more times than the scheduler allows in one flush.
    #[error("maximum recursive updates exceeded in job {job}")]
    RecursionLimit { job: u64 },

    /// An operation was dispatched to a target kind that does not support it.
    #[error("`{op}` is not supported on {kind:?} targets")]
    UnsupportedTarget { op: &'static str, kind: TargetKind },

    #[error("failed to encode host operations: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode host operations: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl Error {
    /// Build a user error from any message.
    pub fn user(message: impl Into<String>) -> Self {
        Error::User(message.into())
    }
}

/// The boundary at which an error was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    SetupFunction,
    RenderFunction,
    WatchGetter,
    WatchCallback,
    WatchCleanup,
    NativeEventHandler,
    ComponentEventHandler,
    BeforeMountHook,
    MountedHook,
    BeforeUpdateHook,
    UpdatedHook,
    BeforeUnmountHook,
    UnmountedHook,
    DirectiveHook,
    TransitionHook,
    AppErrorHandler,
    AppWarnHandler,
    Scheduler,
    AsyncSetup,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSource::SetupFunction => "setup function",
            ErrorSource::RenderFunction => "render function",
            ErrorSource::WatchGetter => "watcher getter",
            ErrorSource::WatchCallback => "watcher callback",
            ErrorSource::WatchCleanup => "watcher cleanup function",
            ErrorSource::NativeEventHandler => "native event handler",
            ErrorSource::ComponentEventHandler => "component event handler",
            ErrorSource::BeforeMountHook => "beforeMount hook",
            ErrorSource::MountedHook => "mounted hook",
            ErrorSource::BeforeUpdateHook => "beforeUpdate hook",
            ErrorSource::UpdatedHook => "updated hook",
            ErrorSource::BeforeUnmountHook => "beforeUnmount hook",
            ErrorSource::UnmountedHook => "unmounted hook",
            ErrorSource::DirectiveHook => "directive hook",
            ErrorSource::TransitionHook => "transition hook",
            ErrorSource::AppErrorHandler => "app error handler",
            ErrorSource::AppWarnHandler => "app warn handler",
            ErrorSource::Scheduler => "scheduler flush",
            ErrorSource::AsyncSetup => "async setup",
        };
        f.write_str(name)
    }
}

/// Run `f`, converting a panic into [`Error::Panicked`].
pub(crate) fn catch_panic<R>(origin: ErrorSource, f: impl FnOnce() -> Result<R>) -> Result<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::Panicked {
            origin,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_panic_passes_results_through() {
        let ok = catch_panic(ErrorSource::Scheduler, || Ok(3));
        assert_eq!(ok.unwrap(), 3);

        let err = catch_panic::<()>(ErrorSource::Scheduler, || Err(Error::user("boom")));
        assert!(matches!(err, Err(Error::User(ref m)) if m == "boom"));
    }

    #[test]
    fn catch_panic_converts_panics() {
        let err = catch_panic::<()>(ErrorSource::RenderFunction, || panic!("render exploded"));
        match err {
            Err(Error::Panicked { origin, message }) => {
                assert_eq!(origin, ErrorSource::RenderFunction);
                assert_eq!(message, "render exploded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
