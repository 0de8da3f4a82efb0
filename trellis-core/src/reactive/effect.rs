//! Effect Implementation
//!
//! An effect is a side-effecting computation that re-runs whenever a value it
//! read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately (unless `lazy`)
//!    to establish initial dependencies.
//!
//! 2. When any dependency changes, the effect either re-runs synchronously or
//!    is handed to its `scheduler`, which decides when to call [`ReactiveEffect::run`].
//!
//! 3. Before re-running, the effect clears its old dependencies and tracks
//!    new ones during execution.
//!
//! # Lifetime
//!
//! Effects are reference counted. The dependency graph holds only weak
//! references, so an effect dies when its last handle is dropped. Effects
//! created inside an [`EffectScope`] are kept alive by the scope until it is
//! stopped. Stopping an effect is permanent.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::trace;

use super::context::{self, ReactiveContext, ScopeGuard, TrackingGuard};
use super::runtime::{Key, Runtime};
use super::subscriber::{SubscriberId, TargetId};

/// Custom scheduler invoked instead of re-running the effect on trigger.
pub type EffectScheduler = Rc<dyn Fn(&ReactiveEffect)>;

/// Options for creating an effect.
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation.
    pub lazy: bool,
    /// The effect backs a computed value; it is notified before plain effects.
    pub computed: bool,
    /// The effect may re-trigger itself while running.
    pub allow_recurse: bool,
    pub scheduler: Option<EffectScheduler>,
    /// Called once when the effect is stopped.
    pub on_stop: Option<Rc<dyn Fn()>>,
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("computed", &self.computed)
            .field("allow_recurse", &self.allow_recurse)
            .field("scheduler", &self.scheduler.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

pub(crate) struct EffectInner {
    id: SubscriberId,
    func: Box<dyn Fn()>,
    deps: RefCell<SmallVec<[(TargetId, Key); 4]>>,
    active: Cell<bool>,
    computed: bool,
    allow_recurse: bool,
    scheduler: Option<EffectScheduler>,
    on_stop: Option<Rc<dyn Fn()>>,
    run_count: Cell<usize>,
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id, self.deps.get_mut());
    }
}

/// Handle to a reactive effect.
#[derive(Clone)]
pub struct ReactiveEffect(Rc<EffectInner>);

impl ReactiveEffect {
    /// Create an effect without running it.
    ///
    /// The effect is registered with the runtime and recorded in the active
    /// [`EffectScope`], if any.
    pub fn new<F>(f: F, options: EffectOptions) -> Self
    where
        F: Fn() + 'static,
    {
        let effect = Self(Rc::new(EffectInner {
            id: SubscriberId::new(),
            func: Box::new(f),
            deps: RefCell::new(SmallVec::new()),
            active: Cell::new(true),
            computed: options.computed,
            allow_recurse: options.allow_recurse,
            scheduler: options.scheduler,
            on_stop: options.on_stop,
            run_count: Cell::new(0),
        }));
        Runtime::register(&effect);
        if let Some(scope) = context::active_scope() {
            scope.record(effect.clone());
        }
        effect
    }

    pub(crate) fn from_inner(inner: Rc<EffectInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade_inner(&self) -> Weak<EffectInner> {
        Rc::downgrade(&self.0)
    }

    pub fn id(&self) -> SubscriberId {
        self.0.id
    }

    /// Run the effect, re-collecting its dependencies.
    ///
    /// A stopped effect without a scheduler still runs its function, but
    /// untracked. An effect that is already running is not re-entered.
    pub fn run(&self) {
        if !self.is_active() {
            if self.0.scheduler.is_none() {
                let _guard = TrackingGuard::pause();
                (self.0.func)();
            }
            return;
        }
        if ReactiveContext::contains(self.id()) {
            return;
        }

        Runtime::cleanup(self);
        self.0.run_count.set(self.0.run_count.get() + 1);
        trace!(effect = self.id().raw(), run = self.0.run_count.get(), "running effect");

        let _ctx = ReactiveContext::enter(self.clone());
        (self.0.func)();
    }

    /// Deactivate the effect permanently. Idempotent.
    pub fn stop(&self) {
        if !self.0.active.replace(false) {
            return;
        }
        Runtime::cleanup(self);
        if let Some(on_stop) = &self.0.on_stop {
            on_stop();
        }
        trace!(effect = self.id().raw(), "effect stopped");
    }

    /// Called by the runtime when a dependency changed.
    pub(crate) fn trigger(&self) {
        match &self.0.scheduler {
            Some(scheduler) => scheduler(self),
            None => self.run(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.0.computed
    }

    pub(crate) fn allows_recurse(&self) -> bool {
        self.0.allow_recurse
    }

    /// How many times the effect function has run with tracking.
    pub fn run_count(&self) -> usize {
        self.0.run_count.get()
    }

    /// Number of `(target, key)` pairs the effect currently depends on.
    pub fn dep_count(&self) -> usize {
        self.0.deps.borrow().len()
    }

    pub fn downgrade(&self) -> WeakEffect {
        WeakEffect(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ReactiveEffect) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn push_dep(&self, target: TargetId, key: Key) {
        self.0.deps.borrow_mut().push((target, key));
    }

    pub(crate) fn take_deps(&self) -> SmallVec<[(TargetId, Key); 4]> {
        std::mem::take(&mut *self.0.deps.borrow_mut())
    }

    pub(crate) fn forget_target(&self, target: TargetId) {
        self.0.deps.borrow_mut().retain(|(t, _)| *t != target);
    }
}

impl fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("deps", &self.dep_count())
            .finish()
    }
}

/// Non-owning handle to an effect.
#[derive(Clone)]
pub struct WeakEffect(Weak<EffectInner>);

impl WeakEffect {
    pub fn upgrade(&self) -> Option<ReactiveEffect> {
        self.0.upgrade().map(ReactiveEffect)
    }
}

/// Create an effect and run it immediately unless `options.lazy` is set.
///
/// The returned handle keeps the effect alive; drop it (outside any scope)
/// or call [`stop`] to end the subscription.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let runner = effect({
///     let count = count.clone();
///     move || println!("count is {:?}", count.get())
/// }, EffectOptions::default());
///
/// count.set(5); // prints "count is Number(5)"
/// stop(&runner);
/// ```
pub fn effect<F>(f: F, options: EffectOptions) -> ReactiveEffect
where
    F: Fn() + 'static,
{
    let lazy = options.lazy;
    let effect = ReactiveEffect::new(f, options);
    if !lazy {
        effect.run();
    }
    effect
}

/// Stop an effect. Idempotent.
pub fn stop(effect: &ReactiveEffect) {
    effect.stop();
}

struct ScopeInner {
    effects: RefCell<Vec<ReactiveEffect>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    active: Cell<bool>,
}

/// Collects effects created while it runs so they can be stopped together.
///
/// Components own one scope each; stopping it tears down the render effect,
/// every watcher and every computed value created during setup.
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeInner>);

impl EffectScope {
    pub fn new() -> Self {
        Self(Rc::new(ScopeInner {
            effects: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            active: Cell::new(true),
        }))
    }

    /// Run `f` with this scope active. Returns `None` once the scope is stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            return None;
        }
        let _guard = ScopeGuard::enter(self.clone());
        Some(f())
    }

    pub(crate) fn record(&self, effect: ReactiveEffect) {
        if self.is_active() {
            self.0.effects.borrow_mut().push(effect);
        }
    }

    /// Register a callback to run when the scope stops.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        self.0.cleanups.borrow_mut().push(Box::new(f));
    }

    /// Stop every collected effect and run dispose callbacks. Idempotent.
    pub fn stop(&self) {
        if !self.0.active.replace(false) {
            return;
        }
        let effects = std::mem::take(&mut *self.0.effects.borrow_mut());
        for effect in &effects {
            effect.stop();
        }
        let cleanups = std::mem::take(&mut *self.0.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }
        drop(effects);
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn effect_count(&self) -> usize {
        self.0.effects.borrow().len()
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a callback on the active scope. Returns `false` outside any scope.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) -> bool {
    match context::active_scope() {
        Some(scope) => {
            scope.on_dispose(f);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{reactive, ObservableStore, Signal};
    use crate::reactive::Value;

    #[test]
    fn effect_runs_immediately_unless_lazy() {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let _eager = effect(move || r.set(r.get() + 1), EffectOptions::default());
        assert_eq!(runs.get(), 1);

        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let lazy = effect(
            move || r.set(r.get() + 1),
            EffectOptions { lazy: true, ..Default::default() },
        );
        assert_eq!(runs.get(), 0);
        lazy.run();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_reruns_on_change() {
        let count = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _e = effect(
            {
                let count = count.clone();
                let seen = seen.clone();
                move || seen.borrow_mut().push(count.get())
            },
            EffectOptions::default(),
        );

        count.set(1);
        count.set(2);
        assert_eq!(*seen.borrow(), vec![Value::from(0), Value::from(1), Value::from(2)]);
    }

    #[test]
    fn stale_branch_dependencies_are_dropped() {
        let state = reactive(Value::record([("ok", Value::from(true)), ("msg", Value::from("hi"))]));
        let runs = Rc::new(Cell::new(0));

        let e = effect(
            {
                let state = state.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    if state.get(&"ok".into()).is_truthy() {
                        state.get(&"msg".into());
                    }
                }
            },
            EffectOptions::default(),
        );
        assert_eq!(e.dep_count(), 2);

        state.set("ok".into(), false.into());
        assert_eq!(runs.get(), 2);
        assert_eq!(e.dep_count(), 1);

        state.set("msg".into(), "changed".into());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn stop_is_idempotent_and_final() {
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let stops = Rc::new(Cell::new(0));

        let e = effect(
            {
                let count = count.clone();
                let runs = runs.clone();
                move || {
                    count.get();
                    runs.set(runs.get() + 1);
                }
            },
            EffectOptions {
                on_stop: Some(Rc::new({
                    let stops = stops.clone();
                    move || stops.set(stops.get() + 1)
                })),
                ..Default::default()
            },
        );

        stop(&e);
        stop(&e);
        assert_eq!(stops.get(), 1);
        assert_eq!(e.dep_count(), 0);

        count.set(1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn scheduler_replaces_rerun() {
        let count = Signal::new(0);
        let scheduled = Rc::new(Cell::new(0));
        let runs = Rc::new(Cell::new(0));

        let _e = effect(
            {
                let count = count.clone();
                let runs = runs.clone();
                move || {
                    count.get();
                    runs.set(runs.get() + 1);
                }
            },
            EffectOptions {
                scheduler: Some(Rc::new({
                    let scheduled = scheduled.clone();
                    move |_: &ReactiveEffect| scheduled.set(scheduled.get() + 1)
                })),
                ..Default::default()
            },
        );

        count.set(1);
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduled.get(), 1);
    }

    #[test]
    fn self_mutation_does_not_recurse() {
        let count = Signal::new(0);
        let _e = effect(
            {
                let count = count.clone();
                move || {
                    let n = count.get().as_number().unwrap_or(0.0);
                    if n < 10.0 {
                        count.set(n + 1.0);
                    }
                }
            },
            EffectOptions::default(),
        );
        assert_eq!(count.get_untracked(), Value::from(1));
    }

    #[test]
    fn scope_stops_collected_effects() {
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let scope = EffectScope::new();
        let disposed = Rc::new(Cell::new(false));

        scope.run(|| {
            let count = count.clone();
            let runs = runs.clone();
            effect(
                move || {
                    count.get();
                    runs.set(runs.get() + 1);
                },
                EffectOptions::default(),
            );
            let disposed = disposed.clone();
            assert!(on_scope_dispose(move || disposed.set(true)));
        });
        assert_eq!(scope.effect_count(), 1);

        count.set(1);
        assert_eq!(runs.get(), 2);

        scope.stop();
        assert!(disposed.get());
        count.set(2);
        assert_eq!(runs.get(), 2);
        assert!(scope.run(|| ()).is_none());
    }
}
