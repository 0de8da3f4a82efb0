//! Components
//!
//! A component is a reusable piece of UI with its own reactive state. This
//! module holds the definition side ([`Component`], [`SetupContext`]), the
//! per-mount [`ComponentInstance`], the [`App`] entry point, and the error
//! and warning plumbing every piece of user code runs through.
//!
//! The renderer drives instances through their lifecycle:
//!
//! 1. `setup` runs once, with the instance current, and returns the render
//!    function (or a future of it, for async setup under a suspense
//!    boundary).
//! 2. A render effect runs the render function and patches the result into
//!    the host. Its scheduler queues the instance's update job, so state
//!    changes re-render in batches, parents before children.
//! 3. On unmount the instance's effect scope is stopped, which tears down
//!    the render effect and every watcher created during setup.

mod app;
mod context;
mod definition;
mod emit;
mod error_handling;
mod instance;
mod props;
mod warning;

pub use app::{App, AppConfig, AppContext, AppErrorHandler, AppWarnHandler, MountedApp};
pub use context::{
    on_before_mount, on_before_unmount, on_before_update, on_mounted, on_unmounted, on_updated,
    RenderContext, SetupContext,
};
pub use definition::{render_fn, AsyncRender, Component, PropDef, RenderFn, SetupFn, SetupOutcome};
pub use emit::{camelize, emit, handler_key};
pub use error_handling::{call_with_async_error_handling, call_with_error_handling, handle_error};
pub use instance::{
    current_instance, ComponentInstance, ErrorCapturedHook, HookFn, InstanceId, LifecycleHook,
};
pub use props::should_update_component;
pub use warning::{clear_warn_handler, set_warn_handler, warn, WarnSink};

pub(crate) use context::{finish_async_setup, setup_component, SetupState};
pub(crate) use instance::InstanceGuard;
pub(crate) use props::{update_props, update_slots};
