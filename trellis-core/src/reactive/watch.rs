//! Watchers
//!
//! A watcher runs a callback when a reactive source changes, with the new
//! and previous values. Unlike a plain effect, the callback itself is not
//! tracked and its timing is configurable:
//!
//! - `Sync`: the callback runs inside the trigger.
//! - `Pre` (default): queued as a pre-flush callback, so it runs before
//!   component updates in the next flush. Before its component has mounted,
//!   a pre watcher runs synchronously.
//! - `Post`: queued as a post-flush callback, after component updates.
//!
//! Watchers created during component setup are collected by the component's
//! effect scope and stopped when it unmounts. Outside a scope, the returned
//! [`WatchHandle`] owns the watcher; dropping it ends the subscription.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::computed::Computed;
use super::effect::{EffectOptions, ReactiveEffect, WeakEffect};
use super::signal::Signal;
use super::subscriber::TargetId;
use super::value::{has_changed, TargetData, TargetKind, Value};
use crate::component::{current_instance, handle_error, ComponentInstance};
use crate::error::{catch_panic, ErrorSource, Result};
use crate::scheduler::{queue_post_flush_cb, queue_pre_flush_cb, Job};

/// When a watcher callback runs relative to component updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushTiming {
    #[default]
    Pre,
    Post,
    Sync,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Run the callback once right away, with `Null` as the old value.
    pub immediate: bool,
    /// Traverse the source so nested mutations trigger too.
    pub deep: bool,
    pub flush: FlushTiming,
}

/// Something a watcher can observe.
#[derive(Clone)]
pub enum WatchSource {
    Signal(Signal),
    /// A reactive handle; watched deeply.
    Store(Value),
    Computed(Computed<Value>),
    Getter(Rc<dyn Fn() -> Value>),
    /// Several sources; the callback receives a sequence of their values.
    Many(Vec<WatchSource>),
}

impl WatchSource {
    pub fn getter(f: impl Fn() -> Value + 'static) -> Self {
        WatchSource::Getter(Rc::new(f))
    }
}

impl From<Signal> for WatchSource {
    fn from(signal: Signal) -> Self {
        WatchSource::Signal(signal)
    }
}

impl From<Computed<Value>> for WatchSource {
    fn from(computed: Computed<Value>) -> Self {
        WatchSource::Computed(computed)
    }
}

impl From<Value> for WatchSource {
    fn from(value: Value) -> Self {
        match value {
            Value::Signal(signal) => WatchSource::Signal(signal),
            other => WatchSource::Store(other),
        }
    }
}

impl From<Vec<WatchSource>> for WatchSource {
    fn from(sources: Vec<WatchSource>) -> Self {
        WatchSource::Many(sources)
    }
}

type CleanupSlot = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

/// Registration point for a cleanup that runs before the next callback
/// invocation and when the watcher stops.
pub struct OnCleanup {
    slot: CleanupSlot,
}

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() + 'static) {
        self.slot.replace(Some(Box::new(f)));
    }
}

/// Callback invoked with `(new, old, on_cleanup)`.
pub type WatchCallback = Box<dyn FnMut(&Value, &Value, &OnCleanup) -> Result<()>>;

struct WatchState {
    effect: RefCell<Option<WeakEffect>>,
    latest: RefCell<Value>,
    old: RefCell<Option<Value>>,
    callback: Option<RefCell<WatchCallback>>,
    cleanup: CleanupSlot,
    instance: Option<Weak<ComponentInstance>>,
    deep: bool,
    multi: bool,
    force: bool,
}

impl WatchState {
    fn instance(&self) -> Option<Rc<ComponentInstance>> {
        self.instance.as_ref().and_then(Weak::upgrade)
    }

    fn report(&self, err: crate::Error, source: ErrorSource) -> Result<()> {
        handle_error(err, self.instance().as_ref(), source)
    }

    fn run_cleanup(&self) -> Result<()> {
        let pending = self.cleanup.borrow_mut().take();
        match pending {
            Some(cleanup) => match catch_panic(ErrorSource::WatchCleanup, || {
                cleanup();
                Ok(())
            }) {
                Ok(()) => Ok(()),
                Err(err) => self.report(err, ErrorSource::WatchCleanup),
            },
            None => Ok(()),
        }
    }

    fn effect(&self) -> Option<ReactiveEffect> {
        self.effect.borrow().as_ref().and_then(WeakEffect::upgrade)
    }

    fn changed(&self, new: &Value) -> bool {
        let old = self.old.borrow();
        let Some(old) = old.as_ref() else {
            return true;
        };
        if self.deep || self.force {
            return true;
        }
        if self.multi {
            return multi_changed(new, old);
        }
        has_changed(new, old)
    }

    /// The job the scheduler runs when a source changed.
    fn job(&self) -> Result<()> {
        let Some(effect) = self.effect() else {
            return Ok(());
        };
        if !effect.is_active() {
            return Ok(());
        }
        let Some(callback) = &self.callback else {
            effect.run();
            return Ok(());
        };

        effect.run();
        let new = self.latest.borrow().clone();
        if !self.changed(&new) {
            return Ok(());
        }
        self.run_cleanup()?;

        let old = self.old.borrow().clone().unwrap_or_default();
        let on_cleanup = OnCleanup { slot: self.cleanup.clone() };
        let result = match callback.try_borrow_mut() {
            Ok(mut cb) => catch_panic(ErrorSource::WatchCallback, || cb(&new, &old, &on_cleanup)),
            Err(_) => {
                trace!("watch callback re-entered; skipped");
                Ok(())
            }
        };
        self.old.replace(Some(new));
        match result {
            Ok(()) => Ok(()),
            Err(err) => self.report(err, ErrorSource::WatchCallback),
        }
    }
}

fn multi_changed(new: &Value, old: &Value) -> bool {
    let (Some(new), Some(old)) = (new.as_target(), old.as_target()) else {
        return has_changed(new, old);
    };
    let (new_data, old_data) = (new.data(), old.data());
    match (&*new_data, &*old_data) {
        (TargetData::Sequence(a), TargetData::Sequence(b)) => {
            a.len() != b.len() || a.iter().zip(b).any(|(x, y)| has_changed(x, y))
        }
        _ => true,
    }
}

/// Read every nested key so the running effect subscribes to all of them.
pub fn traverse(value: &Value) -> Value {
    let mut seen = HashSet::new();
    traverse_into(value, &mut seen);
    value.clone()
}

fn traverse_into(value: &Value, seen: &mut HashSet<TargetId>) {
    match value {
        Value::Signal(signal) => {
            if seen.insert(signal.id()) {
                traverse_into(&signal.get(), seen);
            }
        }
        Value::Proxy(proxy) => {
            if !seen.insert(proxy.id()) {
                return;
            }
            for (key, nested) in proxy.iterate() {
                let nested = match proxy.kind() {
                    TargetKind::Record => proxy.get(&key),
                    _ => nested,
                };
                traverse_into(&key, seen);
                traverse_into(&nested, seen);
            }
        }
        _ => {}
    }
}

fn source_getter(source: WatchSource) -> (Rc<dyn Fn() -> Value>, bool, bool) {
    match source {
        WatchSource::Signal(signal) => {
            let force = signal.is_shallow();
            (Rc::new(move || signal.get()), false, force)
        }
        WatchSource::Store(value) => (Rc::new(move || value.clone()), true, false),
        WatchSource::Computed(computed) => (Rc::new(move || computed.get()), false, false),
        WatchSource::Getter(getter) => (getter, false, false),
        WatchSource::Many(sources) => {
            let getters: Vec<_> = sources
                .into_iter()
                .map(|source| {
                    let deep = matches!(source, WatchSource::Store(_));
                    let (getter, _, _) = source_getter(source);
                    (getter, deep)
                })
                .collect();
            (
                Rc::new(move || {
                    Value::sequence(getters.iter().map(|(getter, deep)| {
                        let value = getter();
                        if *deep {
                            traverse(&value)
                        } else {
                            value
                        }
                    }))
                }),
                false,
                false,
            )
        }
    }
}

/// Handle to a running watcher.
#[derive(Clone)]
pub struct WatchHandle {
    effect: ReactiveEffect,
}

impl WatchHandle {
    /// Stop the watcher and run its pending cleanup. Idempotent.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    pub fn effect(&self) -> &ReactiveEffect {
        &self.effect
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle").field("effect", &self.effect).finish()
    }
}


fn do_watch(
    getter: Rc<dyn Fn() -> Value>,
    callback: Option<WatchCallback>,
    cleanup: CleanupSlot,
    options: WatchOptions,
    multi: bool,
    force: bool,
) -> WatchHandle {
    let is_effect = callback.is_none();
    let state = Rc::new(WatchState {
        effect: RefCell::new(None),
        latest: RefCell::new(Value::Null),
        old: RefCell::new(None),
        callback: callback.map(RefCell::new),
        cleanup,
        instance: current_instance().as_ref().map(Rc::downgrade),
        deep: options.deep,
        multi,
        force,
    });

    let job = {
        let state = state.clone();
        Job::new(move || state.job())
    };
    job.set_allow_recurse(!is_effect);

    let scheduler: Rc<dyn Fn(&ReactiveEffect)> = {
        let job = job.clone();
        let weak = Rc::downgrade(&state);
        match options.flush {
            FlushTiming::Sync => Rc::new(move |_: &ReactiveEffect| {
                let _ = job.call();
            }),
            FlushTiming::Post => Rc::new(move |_: &ReactiveEffect| queue_post_flush_cb(job.clone())),
            FlushTiming::Pre => Rc::new(move |_: &ReactiveEffect| {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let mounted = state.instance().map_or(true, |i| i.is_mounted());
                if mounted {
                    queue_pre_flush_cb(job.clone());
                } else {
                    let _ = state.job();
                }
            }),
        }
    };

    let run_getter = {
        let weak = Rc::downgrade(&state);
        let deep = options.deep;
        move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            if is_effect {
                let _ = state.run_cleanup();
            }
            let value = match catch_panic(ErrorSource::WatchGetter, || Ok(getter())) {
                Ok(value) if deep => traverse(&value),
                Ok(value) => value,
                Err(err) => {
                    let _ = state.report(err, ErrorSource::WatchGetter);
                    Value::Null
                }
            };
            state.latest.replace(value);
        }
    };

    let on_stop = {
        let weak = Rc::downgrade(&state);
        Rc::new(move || {
            if let Some(state) = weak.upgrade() {
                let _ = state.run_cleanup();
            }
        })
    };

    let effect = ReactiveEffect::new(
        run_getter,
        EffectOptions {
            lazy: true,
            scheduler: Some(scheduler),
            on_stop: Some(on_stop),
            ..Default::default()
        },
    );
    state.effect.replace(Some(effect.downgrade()));
    trace!(effect = effect.id().raw(), flush = ?options.flush, "watcher created");

    if !is_effect {
        if options.immediate {
            let _ = state.job();
        } else {
            effect.run();
            let initial = state.latest.borrow().clone();
            state.old.replace(Some(initial));
        }
    } else if options.flush == FlushTiming::Post {
        queue_post_flush_cb(job);
    } else {
        effect.run();
    }

    WatchHandle { effect }
}

/// Watch `source` and call `callback(new, old, on_cleanup)` when it changes.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let handle = watch(count.clone(), |new, old, _| {
///     println!("{old:?} -> {new:?}");
///     Ok(())
/// }, WatchOptions { flush: FlushTiming::Sync, ..Default::default() });
/// count.set(1); // prints "Number(0) -> Number(1)"
/// handle.stop();
/// ```
pub fn watch<F>(source: impl Into<WatchSource>, callback: F, options: WatchOptions) -> WatchHandle
where
    F: FnMut(&Value, &Value, &OnCleanup) -> Result<()> + 'static,
{
    let source = source.into();
    let multi = matches!(source, WatchSource::Many(_));
    let (getter, implicit_deep, force) = source_getter(source);
    let options = WatchOptions {
        deep: options.deep || implicit_deep,
        ..options
    };
    let cleanup: CleanupSlot = Rc::new(RefCell::new(None));
    do_watch(getter, Some(Box::new(callback)), cleanup, options, multi, force)
}

/// Run `f` now and again whenever anything it read changes.
///
/// `f` receives an [`OnCleanup`] whose callback runs before the next run and
/// when the watcher stops.
pub fn watch_effect<F>(f: F, flush: FlushTiming) -> WatchHandle
where
    F: Fn(&OnCleanup) + 'static,
{
    let cleanup: CleanupSlot = Rc::new(RefCell::new(None));
    let on_cleanup = OnCleanup { slot: cleanup.clone() };
    let getter: Rc<dyn Fn() -> Value> = Rc::new(move || {
        f(&on_cleanup);
        Value::Null
    });
    let options = WatchOptions {
        flush,
        ..Default::default()
    };
    do_watch(getter, None, cleanup, options, false, false)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{reactive, ObservableStore};
    use crate::scheduler::flush_jobs;
    use std::cell::Cell;

    type Calls = Rc<RefCell<Vec<(Value, Value)>>>;

    fn recorder(calls: &Calls) -> impl FnMut(&Value, &Value, &OnCleanup) -> Result<()> + 'static {
        let calls = calls.clone();
        move |new, old, _| {
            calls.borrow_mut().push((new.clone(), old.clone()));
            Ok(())
        }
    }

    fn sync() -> WatchOptions {
        WatchOptions {
            flush: FlushTiming::Sync,
            ..Default::default()
        }
    }

    #[test]
    fn watch_signal_sync() {
        let count = Signal::new(0);
        let calls = Calls::default();
        let _handle = watch(count.clone(), recorder(&calls), sync());

        count.set(1);
        count.set(1);
        count.set(2);
        assert_eq!(
            *calls.borrow(),
            vec![
                (Value::from(1), Value::from(0)),
                (Value::from(2), Value::from(1)),
            ]
        );
    }

    #[test]
    fn immediate_passes_null_old_value() {
        let count = Signal::new(7);
        let calls = Calls::default();
        let _handle = watch(
            count,
            recorder(&calls),
            WatchOptions {
                immediate: true,
                ..sync()
            },
        );
        assert_eq!(*calls.borrow(), vec![(Value::from(7), Value::Null)]);
    }

    #[test]
    fn pre_flush_watchers_batch_until_flush() {
        let count = Signal::new(0);
        let calls = Calls::default();
        let _handle = watch(count.clone(), recorder(&calls), WatchOptions::default());

        count.set(1);
        count.set(2);
        assert!(calls.borrow().is_empty());

        flush_jobs().unwrap();
        assert_eq!(*calls.borrow(), vec![(Value::from(2), Value::from(0))]);
    }

    #[test]
    fn stores_are_watched_deeply() {
        let state = reactive(Value::record([("nested", Value::record([("n", 1)]))]));
        let calls = Calls::default();
        let _handle = watch(state.clone(), recorder(&calls), sync());

        state.get_prop("nested").set("n".into(), 2.into());
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn getter_sources_compare_values() {
        let state = reactive(Value::record([("a", 1), ("b", 1)]));
        let calls = Calls::default();
        let _handle = watch(
            WatchSource::getter({
                let state = state.clone();
                move || state.get_prop("a")
            }),
            recorder(&calls),
            sync(),
        );
        state.set("b".into(), 2.into());
        assert!(calls.borrow().is_empty());
        state.set("a".into(), 3.into());
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn multiple_sources_compare_elementwise() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let calls = Calls::default();
        let _handle = watch(
            vec![WatchSource::from(a.clone()), WatchSource::from(b.clone())],
            recorder(&calls),
            sync(),
        );
        b.set(3);
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.to_json(), serde_json::json!([1, 3]));
        assert_eq!(calls[0].1.to_json(), serde_json::json!([1, 2]));
    }

    #[test]
    fn cleanup_runs_before_next_callback_and_on_stop() {
        let count = Signal::new(0);
        let cleanups = Rc::new(Cell::new(0));
        let handle = watch(
            count.clone(),
            {
                let cleanups = cleanups.clone();
                move |_, _, on_cleanup| {
                    let cleanups = cleanups.clone();
                    on_cleanup.register(move || cleanups.set(cleanups.get() + 1));
                    Ok(())
                }
            },
            sync(),
        );
        count.set(1);
        assert_eq!(cleanups.get(), 0);
        count.set(2);
        assert_eq!(cleanups.get(), 1);

        handle.stop();
        handle.stop();
        assert_eq!(cleanups.get(), 2);
        count.set(3);
        assert_eq!(cleanups.get(), 2);
    }

    #[test]
    fn watch_effect_reruns_and_cleans_up() {
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let cleanups = Rc::new(Cell::new(0));
        let handle = watch_effect(
            {
                let count = count.clone();
                let runs = runs.clone();
                let cleanups = cleanups.clone();
                move |on_cleanup| {
                    count.get();
                    runs.set(runs.get() + 1);
                    let cleanups = cleanups.clone();
                    on_cleanup.register(move || cleanups.set(cleanups.get() + 1));
                }
            },
            FlushTiming::Sync,
        );
        assert_eq!(runs.get(), 1);

        count.set(1);
        assert_eq!(runs.get(), 2);
        assert_eq!(cleanups.get(), 1);

        handle.stop();
        assert_eq!(cleanups.get(), 2);
        count.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn callback_errors_surface_from_flush() {
        let count = Signal::new(0);
        let _handle = watch(
            count.clone(),
            |_, _, _| Err(crate::Error::user("watcher failed")),
            WatchOptions::default(),
        );
        count.set(1);
        let err = flush_jobs().unwrap_err();
        assert!(matches!(err, crate::Error::User(ref m) if m == "watcher failed"));
    }
}
