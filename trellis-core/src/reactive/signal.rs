//! Signal Implementation
//!
//! A signal is a boxed reactive cell holding a single [`Value`]. Reading it
//! inside an effect subscribes the effect; writing a changed value notifies
//! every subscriber.
//!
//! # Deep and Shallow Signals
//!
//! A deep signal stores object values raw and hands them back wrapped in a
//! reactive proxy, so nested mutations are observable too. A shallow signal
//! stores and returns exactly what it was given; only replacing the whole
//! value triggers.
//!
//! # Unwrapping
//!
//! Signals stored inside reactive records are unwrapped on read, and writing
//! a plain value to such a property writes through into the signal. See
//! [`Proxy`](super::Proxy).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{track, trigger, Key, Runtime, TrackOp, TriggerOp};
use super::store::to_reactive;
use super::subscriber::TargetId;
use super::value::{has_changed, Value};

struct SignalInner {
    id: TargetId,
    /// The value as stored, with proxies stripped unless shallow.
    raw: RefCell<Value>,
    /// The value as handed out to readers.
    value: RefCell<Value>,
    shallow: bool,
}

impl Drop for SignalInner {
    fn drop(&mut self) {
        Runtime::dispose_target(self.id);
    }
}

/// A reactive cell.
///
/// Cloning a `Signal` yields another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// assert_eq!(count.get(), Value::from(0));
///
/// count.set(5);
/// assert_eq!(count.get(), Value::from(5));
/// ```
#[derive(Clone)]
pub struct Signal(Rc<SignalInner>);

impl Signal {
    /// Create a deep signal.
    pub fn new(value: impl Into<Value>) -> Self {
        Self::create(value.into(), false)
    }

    /// Create a shallow signal: object values are not made reactive.
    pub fn shallow(value: impl Into<Value>) -> Self {
        Self::create(value.into(), true)
    }

    fn create(value: Value, shallow: bool) -> Self {
        let (raw, value) = Self::convert(value, shallow);
        Self(Rc::new(SignalInner {
            id: TargetId::new(),
            raw: RefCell::new(raw),
            value: RefCell::new(value),
            shallow,
        }))
    }

    fn convert(value: Value, shallow: bool) -> (Value, Value) {
        if shallow {
            (value.clone(), value)
        } else {
            let raw = value.to_raw();
            let wrapped = to_reactive(&value);
            (raw, wrapped)
        }
    }

    pub fn id(&self) -> TargetId {
        self.0.id
    }

    pub fn is_shallow(&self) -> bool {
        self.0.shallow
    }

    /// Read the value, subscribing the running effect.
    pub fn get(&self) -> Value {
        track(self.0.id, TrackOp::Get, Key::Value);
        self.0.value.borrow().clone()
    }

    /// Read the value without subscribing.
    pub fn get_untracked(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Replace the value. Triggers only when it changed (NaN-aware).
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        let incoming_raw = if self.0.shallow { value.clone() } else { value.to_raw() };
        let changed = has_changed(&incoming_raw, &self.0.raw.borrow());
        if !changed {
            return;
        }

        let (raw, wrapped) = Self::convert(value, self.0.shallow);
        let old = self.0.raw.replace(raw);
        self.0.value.replace(wrapped.clone());
        trigger(
            self.0.id,
            None,
            TriggerOp::Set,
            Some(Key::Value),
            Some(&wrapped),
            Some(&old),
        );
    }

    /// Replace the value with `f(current)`, reading it untracked.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let next = f(&self.get_untracked());
        self.set(next);
    }

    /// Notify subscribers even though the value did not change.
    ///
    /// Useful after mutating the contents of a shallow signal in place.
    pub fn trigger(&self) {
        let value = self.get_untracked();
        trigger(self.0.id, None, TriggerOp::Set, Some(Key::Value), Some(&value), None);
    }

    pub fn ptr_eq(&self, other: &Signal) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.0.id)
            .field("value", &*self.0.value.borrow())
            .field("shallow", &self.0.shallow)
            .finish()
    }
}

/// Force-notify the subscribers of a signal.
pub fn trigger_signal(signal: &Signal) {
    signal.trigger();
}

pub fn is_signal(value: &Value) -> bool {
    matches!(value, Value::Signal(_))
}

/// The value inside a signal, or the value itself.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Signal(signal) => signal.get(),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect, is_reactive, EffectOptions, ObservableStore};
    use std::cell::Cell;

    fn count_runs(signal: &Signal) -> (crate::reactive::ReactiveEffect, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let e = effect(
            {
                let signal = signal.clone();
                let runs = runs.clone();
                move || {
                    signal.get();
                    runs.set(runs.get() + 1);
                }
            },
            EffectOptions::default(),
        );
        (e, runs)
    }

    #[test]
    fn signal_get_set() {
        let sig = Signal::new(42);
        assert_eq!(sig.get(), Value::from(42));

        sig.set(100);
        assert_eq!(sig.get(), Value::from(100));
    }

    #[test]
    fn signal_update() {
        let sig = Signal::new(10);
        sig.update(|v| Value::from(v.as_number().unwrap_or(0.0) * 2.0));
        assert_eq!(sig.get(), Value::from(20));
    }

    #[test]
    fn unchanged_writes_do_not_trigger() {
        let sig = Signal::new(f64::NAN);
        let (_e, runs) = count_runs(&sig);

        sig.set(f64::NAN);
        assert_eq!(runs.get(), 1);

        sig.set(1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn trigger_forces_notification() {
        let sig = Signal::new(1);
        let (_e, runs) = count_runs(&sig);
        trigger_signal(&sig);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn deep_signal_wraps_objects() {
        let sig = Signal::new(Value::record([("n", 1)]));
        let inner = sig.get();
        assert!(is_reactive(&inner));

        let runs = Rc::new(Cell::new(0));
        let _e = effect(
            {
                let sig = sig.clone();
                let runs = runs.clone();
                move || {
                    if let Some(proxy) = sig.get().as_proxy() {
                        proxy.get(&"n".into());
                    }
                    runs.set(runs.get() + 1);
                }
            },
            EffectOptions::default(),
        );

        let proxy = inner.as_proxy().expect("deep signal hands out a proxy");
        assert!(proxy.set("n".into(), 2.into()));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn shallow_signal_keeps_raw_objects() {
        let raw = Value::record([("n", 1)]);
        let sig = Signal::shallow(raw.clone());
        assert!(!is_reactive(&sig.get()));
        assert_eq!(sig.get(), raw);
        assert!(sig.is_shallow());
    }

    #[test]
    fn unref_and_is_signal() {
        let sig = Signal::new("x");
        let value = Value::from(sig.clone());
        assert!(is_signal(&value));
        assert_eq!(unref(&value), Value::from("x"));
        assert_eq!(unref(&Value::from(3)), Value::from(3));
    }
}
