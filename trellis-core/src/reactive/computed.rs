//! Computed Implementation
//!
//! A computed value is a cached derivation that re-evaluates only when one
//! of its dependencies changes, and only when it is read again.
//!
//! # How Computed Values Work
//!
//! 1. The getter runs inside a lazy effect marked `computed`. Nothing runs
//!    until the first read.
//!
//! 2. When a dependency changes, the effect's scheduler does not re-run the
//!    getter. It marks the cache dirty and triggers the computed's own value
//!    key, so readers of the computed are notified.
//!
//! 3. The next read re-runs the getter and caches the result.
//!
//! Because the runtime notifies computed effects before plain ones, an
//! effect that reads both a signal and a computed derived from it never
//! observes a stale cache.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::TrackingGuard;
use super::effect::{EffectOptions, ReactiveEffect};
use super::runtime::{track, trigger, Key, Runtime, TrackOp, TriggerOp};
use super::subscriber::TargetId;
use crate::component::warn;

struct ComputedInner<T> {
    id: TargetId,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    getter: Box<dyn Fn() -> T>,
    setter: Option<Box<dyn Fn(T)>>,
    effect: ReactiveEffect,
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.effect.stop();
        Runtime::dispose_target(self.id);
    }
}

/// A lazily evaluated, cached derived value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
/// let doubled = Computed::new({
///     let count = count.clone();
///     move || count.get().as_number().unwrap_or(0.0) * 2.0
/// });
///
/// assert_eq!(doubled.get(), 4.0);
/// count.set(5);
/// assert_eq!(doubled.get(), 10.0);
/// ```
pub struct Computed<T: Clone + 'static>(Rc<ComputedInner<T>>);

impl<T: Clone + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a read-only computed value.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(Box::new(getter), None)
    }

    /// Create a writable computed value. Writes are forwarded to `setter`.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)))
    }

    fn build(getter: Box<dyn Fn() -> T>, setter: Option<Box<dyn Fn(T)>>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let run_weak = weak.clone();
            let schedule_weak = weak.clone();
            let effect = ReactiveEffect::new(
                move || {
                    if let Some(inner) = run_weak.upgrade() {
                        let value = (inner.getter)();
                        inner.value.replace(Some(value));
                    }
                },
                EffectOptions {
                    lazy: true,
                    computed: true,
                    scheduler: Some(Rc::new(move |_: &ReactiveEffect| {
                        if let Some(inner) = schedule_weak.upgrade() {
                            if !inner.dirty.replace(true) {
                                trigger(inner.id, None, TriggerOp::Set, Some(Key::Value), None, None);
                            }
                        }
                    })),
                    ..Default::default()
                },
            );
            ComputedInner {
                id: TargetId::new(),
                value: RefCell::new(None),
                dirty: Cell::new(true),
                getter,
                setter,
                effect,
            }
        });
        Self(inner)
    }

    pub fn id(&self) -> TargetId {
        self.0.id
    }

    /// Read the value, re-evaluating if dirty, and subscribe the running effect.
    pub fn get(&self) -> T {
        let inner = &self.0;
        if inner.dirty.get() {
            inner.dirty.set(false);
            if inner.effect.is_active() {
                inner.effect.run();
            } else {
                let _guard = TrackingGuard::pause();
                let value = (inner.getter)();
                inner.value.replace(Some(value));
            }
        }
        track(inner.id, TrackOp::Get, Key::Value);

        let cached = inner.value.borrow().clone();
        match cached {
            Some(value) => value,
            // Only reachable when the getter reads its own computed.
            None => (inner.getter)(),
        }
    }

    /// Write through the setter. Read-only computed values warn instead.
    pub fn set(&self, value: T) {
        match &self.0.setter {
            Some(setter) => setter(value),
            None => warn("Write operation failed: computed value is readonly"),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get()
    }

    pub fn is_writable(&self) -> bool {
        self.0.setter.is_some()
    }

    /// The effect backing this computed value.
    pub fn effect(&self) -> &ReactiveEffect {
        &self.0.effect
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.0.id)
            .field("value", &*self.0.value.borrow())
            .field("dirty", &self.0.dirty.get())
            .finish()
    }
}

/// Shorthand for [`Computed::new`].
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(getter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect, Signal, Value};

    fn number(value: Value) -> f64 {
        value.as_number().unwrap_or(f64::NAN)
    }

    #[test]
    fn computed_is_lazy_and_cached() {
        let count = Signal::new(1);
        let evaluations = Rc::new(Cell::new(0));
        let doubled = Computed::new({
            let count = count.clone();
            let evaluations = evaluations.clone();
            move || {
                evaluations.set(evaluations.get() + 1);
                number(count.get()) * 2.0
            }
        });
        assert_eq!(evaluations.get(), 0);

        assert_eq!(doubled.get(), 2.0);
        assert_eq!(doubled.get(), 2.0);
        assert_eq!(evaluations.get(), 1);

        count.set(5);
        assert!(doubled.is_dirty());
        assert_eq!(evaluations.get(), 1);
        assert_eq!(doubled.get(), 10.0);
        assert_eq!(evaluations.get(), 2);
    }

    #[test]
    fn effects_never_observe_stale_computed() {
        let count = Signal::new(1);
        let doubled = Computed::new({
            let count = count.clone();
            move || number(count.get()) * 2.0
        });
        let observed = Rc::new(RefCell::new(Vec::new()));

        let _e = effect(
            {
                let count = count.clone();
                let doubled = doubled.clone();
                let observed = observed.clone();
                move || {
                    let c = number(count.get());
                    let d = doubled.get();
                    observed.borrow_mut().push((c, d));
                }
            },
            EffectOptions::default(),
        );

        count.set(2);
        count.set(3);
        let observed = observed.borrow();
        assert!(observed.len() >= 3);
        for (c, d) in observed.iter() {
            assert_eq!(*d, c * 2.0);
        }
        assert_eq!(observed.last(), Some(&(3.0, 6.0)));
    }

    #[test]
    fn chained_computed_values() {
        let base = Signal::new(1);
        let plus_one = Computed::new({
            let base = base.clone();
            move || number(base.get()) + 1.0
        });
        let times_ten = Computed::new({
            let plus_one = plus_one.clone();
            move || plus_one.get() * 10.0
        });

        assert_eq!(times_ten.get(), 20.0);
        base.set(4);
        assert_eq!(times_ten.get(), 50.0);
    }

    #[test]
    fn writable_computed_forwards_to_setter() {
        let first = Signal::new("Ada");
        let name = Computed::with_setter(
            {
                let first = first.clone();
                move || first.get().to_display_string()
            },
            {
                let first = first.clone();
                move |value: String| first.set(value)
            },
        );
        assert!(name.is_writable());
        name.set("Grace".to_string());
        assert_eq!(name.get(), "Grace");
    }

    #[test]
    fn readonly_computed_ignores_writes() {
        let constant = computed(|| 7);
        constant.set(8);
        assert_eq!(constant.get(), 7);
    }

    #[test]
    fn stopped_computed_still_evaluates() {
        let count = Signal::new(1);
        let doubled = Computed::new({
            let count = count.clone();
            move || number(count.get()) * 2.0
        });
        doubled.effect().stop();
        count.set(3);
        assert_eq!(doubled.get(), 6.0);
    }
}
