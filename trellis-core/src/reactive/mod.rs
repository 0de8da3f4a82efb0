//! Reactive Primitives
//!
//! This module implements the core reactive system: observable stores,
//! signals, computed values, effects and watchers. These primitives form the
//! foundation of Trellis's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Stores
//!
//! A [`Target`] is raw data: a record, a sequence, a keyed collection or a
//! set. Wrapping it with [`reactive`] yields a [`Proxy`] whose reads are
//! tracked per key and whose writes notify exactly the effects that read
//! the written key.
//!
//! ## Signals
//!
//! A [`Signal`] is a boxed reactive cell holding one value.
//!
//! ## Computed Values
//!
//! A [`Computed`] is a derived value that caches its result and
//! re-evaluates lazily, only after one of its dependencies changed.
//!
//! ## Effects
//!
//! A [`ReactiveEffect`] is a computation that re-runs whenever a value it
//! read changes, either directly or through a custom scheduler. Component
//! rendering and [`watch`] are both built on effects.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local effect stack to detect
//! dependencies automatically. When a store key is read, we check whether an
//! effect is running and, if so, record the `(target, key)` pair in the
//! dependency graph kept by [`Runtime`].
//!
//! Everything here is single-threaded: handles are `Rc` based and the graph
//! lives in thread-local storage.

mod collections;
mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod store;
mod subscriber;
mod value;
mod watch;

pub use computed::{computed, Computed};
pub use context::{
    enable_tracking, pause_tracking, reset_tracking, should_track, untracked, ReactiveContext,
    TrackingGuard,
};
pub use effect::{
    effect, on_scope_dispose, stop, EffectOptions, EffectScheduler, EffectScope, ReactiveEffect,
    WeakEffect,
};
pub use runtime::{track, trigger, Key, Runtime, TrackOp, TriggerOp};
pub use signal::{is_signal, trigger_signal, unref, Signal};
pub use store::{
    is_proxy, is_reactive, is_readonly, is_shallow, mark_raw, reactive, readonly,
    shallow_reactive, shallow_readonly, to_raw, ObservableStore, Proxy, ProxyMode,
};
pub use subscriber::{SubscriberId, TargetId};
pub use value::{has_changed, Callback, Target, TargetData, TargetKind, Value, ValueKey};
pub use watch::{
    traverse, watch, watch_effect, FlushTiming, OnCleanup, WatchCallback, WatchHandle,
    WatchOptions, WatchSource,
};

