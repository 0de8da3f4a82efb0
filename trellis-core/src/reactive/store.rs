//! Observable Stores
//!
//! A [`Proxy`] is a reactive handle over a raw [`Target`]. Reads through the
//! handle are tracked and writes trigger, according to the handle's
//! [`ProxyMode`]:
//!
//! | mode              | tracks | writes  | nested objects       |
//! |-------------------|--------|---------|----------------------|
//! | `Reactive`        | yes    | trigger | wrapped reactive     |
//! | `ShallowReactive` | yes    | trigger | returned as stored   |
//! | `Readonly`        | *      | warn    | wrapped readonly     |
//! | `ShallowReadonly` | *      | warn    | returned as stored   |
//!
//! (*) A readonly handle tracks only when it was derived from a reactive one,
//! i.e. `readonly(reactive(x))`.
//!
//! # Identity
//!
//! Handles are memoized per `(target, mode)`: wrapping the same target twice
//! yields the identical handle for as long as one is alive. Values are always
//! stored raw, so a target never contains a handle to itself.
//!
//! # Dispatch
//!
//! Operations dispatch statically on the target's declared [`TargetKind`].
//! Records and sequences live here; keyed and set collections live in
//! [`collections`](super::collections). An operation the kind does not
//! support fails with [`Error::UnsupportedTarget`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::TrackingGuard;
use super::runtime::{track, trigger, Key, TrackOp, TriggerOp};
use super::subscriber::TargetId;
use super::value::{has_changed, Target, TargetData, TargetKind, Value};
use crate::component::warn;
use crate::error::{Error, Result};

/// How a proxy treats reads, writes and nested objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyMode {
    Reactive,
    ShallowReactive,
    Readonly,
    ShallowReadonly,
}

impl ProxyMode {
    pub fn is_readonly(self) -> bool {
        matches!(self, ProxyMode::Readonly | ProxyMode::ShallowReadonly)
    }

    pub fn is_shallow(self) -> bool {
        matches!(self, ProxyMode::ShallowReactive | ProxyMode::ShallowReadonly)
    }
}

type ProxyKey = (TargetId, ProxyMode, bool);

thread_local! {
    static PROXIES: RefCell<HashMap<ProxyKey, Weak<ProxyInner>>> = RefCell::new(HashMap::new());
}

pub(crate) struct ProxyInner {
    target: Target,
    mode: ProxyMode,
    tracked: bool,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        let key = (self.target.id(), self.mode, self.tracked);
        let _ = PROXIES.try_with(|proxies| {
            if let Ok(mut proxies) = proxies.try_borrow_mut() {
                if proxies.get(&key).is_some_and(|w| w.strong_count() == 0) {
                    proxies.remove(&key);
                }
            }
        });
    }
}

/// A reactive or readonly handle over a raw target.
#[derive(Clone)]
pub struct Proxy(Rc<ProxyInner>);

impl Proxy {
    /// The memoized handle for `(target, mode)`.
    pub(crate) fn wrap(target: Target, mode: ProxyMode, tracked: bool) -> Proxy {
        let tracked = tracked || !mode.is_readonly();
        let key = (target.id(), mode, tracked);
        let existing = PROXIES.with(|proxies| proxies.borrow().get(&key).and_then(Weak::upgrade));
        if let Some(inner) = existing {
            return Proxy(inner);
        }
        let proxy = Proxy(Rc::new(ProxyInner { target, mode, tracked }));
        PROXIES.with(|proxies| {
            proxies.borrow_mut().insert(key, Rc::downgrade(&proxy.0));
        });
        proxy
    }

    pub fn target(&self) -> &Target {
        &self.0.target
    }

    pub fn id(&self) -> TargetId {
        self.0.target.id()
    }

    pub fn kind(&self) -> TargetKind {
        self.0.target.kind()
    }

    pub fn mode(&self) -> ProxyMode {
        self.0.mode
    }

    /// Whether reads through this handle subscribe the running effect.
    pub fn is_tracked(&self) -> bool {
        self.0.tracked
    }

    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(super) fn track(&self, op: TrackOp, key: Key) {
        if self.0.tracked {
            track(self.id(), op, key);
        }
    }

    pub(super) fn trigger(&self, op: TriggerOp, key: Option<Key>, new: Option<&Value>, old: Option<&Value>) {
        trigger(self.id(), Some(self.kind()), op, key, new, old);
    }

    /// Refuse a write on a readonly handle. Returns `true` if refused.
    pub(super) fn refuse_readonly(&self, op: &str, key: &Value) -> bool {
        if self.0.mode.is_readonly() {
            warn(format!(
                "{op} operation on key \"{}\" failed: target is readonly.",
                key.to_display_string()
            ));
            true
        } else {
            false
        }
    }

    /// Apply the handle's mode to a value read out of the target.
    pub(super) fn wrap_nested(&self, value: Value) -> Value {
        if self.0.mode.is_shallow() {
            return value;
        }
        let readonly = self.0.mode.is_readonly();
        match value {
            Value::Object(target) if !target.is_marked_raw() => {
                let mode = if readonly { ProxyMode::Readonly } else { ProxyMode::Reactive };
                Value::Proxy(Proxy::wrap(target, mode, self.0.tracked))
            }
            Value::Proxy(proxy) if readonly && !proxy.mode().is_readonly() => Value::Proxy(
                Proxy::wrap(proxy.target().clone(), ProxyMode::Readonly, true),
            ),
            other => other,
        }
    }

    /// Prepare a value for storage: deep handles store raw values.
    pub(super) fn to_stored(&self, value: Value) -> Value {
        if self.0.mode.is_shallow() {
            value
        } else {
            value.to_raw()
        }
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    fn record_get(&self, key: &Value) -> Value {
        let prop = record_key(key);
        self.track(TrackOp::Get, Key::Prop(prop.clone()));
        let stored = match &*self.0.target.data() {
            TargetData::Record(map) => map.get(&prop).cloned().unwrap_or_default(),
            _ => Value::Null,
        };
        if self.0.mode.is_shallow() {
            return stored;
        }
        match stored {
            Value::Signal(signal) => signal.get(),
            other => self.wrap_nested(other),
        }
    }

    fn record_set(&self, key: Value, value: Value) -> bool {
        if self.refuse_readonly("Set", &key) {
            return false;
        }
        let prop = record_key(&key);
        let value = self.to_stored(value);

        let old = match &*self.0.target.data() {
            TargetData::Record(map) => map.get(&prop).cloned(),
            _ => None,
        };
        if !self.0.mode.is_shallow() {
            if let (Some(Value::Signal(signal)), false) = (&old, matches!(value, Value::Signal(_))) {
                signal.set(value);
                return true;
            }
        }

        if let TargetData::Record(map) = &mut *self.0.target.data_mut() {
            map.insert(prop.clone(), value.clone());
        }
        match old {
            None => self.trigger(TriggerOp::Add, Some(Key::Prop(prop)), Some(&value), None),
            Some(old) if has_changed(&value, &old) => {
                self.trigger(TriggerOp::Set, Some(Key::Prop(prop)), Some(&value), Some(&old))
            }
            Some(_) => {}
        }
        true
    }

    fn record_has(&self, key: &Value) -> bool {
        let prop = record_key(key);
        self.track(TrackOp::Has, Key::Prop(prop.clone()));
        matches!(&*self.0.target.data(), TargetData::Record(map) if map.contains_key(&prop))
    }

    fn record_delete(&self, key: &Value) -> bool {
        if self.refuse_readonly("Delete", key) {
            return false;
        }
        let prop = record_key(key);
        let old = match &mut *self.0.target.data_mut() {
            TargetData::Record(map) => map.shift_remove(&prop),
            _ => None,
        };
        match old {
            Some(old) => {
                self.trigger(TriggerOp::Delete, Some(Key::Prop(prop)), None, Some(&old));
                true
            }
            None => false,
        }
    }

    fn record_iterate(&self) -> Vec<(Value, Value)> {
        self.track(TrackOp::Iterate, Key::Iterate);
        let entries: Vec<(Rc<str>, Value)> = match &*self.0.target.data() {
            TargetData::Record(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };
        entries
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::Signal(signal) if !self.0.mode.is_shallow() => signal.get(),
                    other => self.wrap_nested(other),
                };
                (Value::Str(k), v)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Sequences
    // ------------------------------------------------------------------

    fn items_snapshot(&self) -> Vec<Value> {
        match &*self.0.target.data() {
            TargetData::Sequence(items) => items.clone(),
            _ => Vec::new(),
        }
    }

    fn raw_len(&self) -> usize {
        self.0.target.data().len()
    }

    fn sequence_get(&self, key: &Value) -> Value {
        if is_length_key(key) {
            return Value::from(self.len());
        }
        let Some(index) = sequence_index(key) else {
            return Value::Null;
        };
        self.track(TrackOp::Get, Key::Index(index));
        let stored = match &*self.0.target.data() {
            TargetData::Sequence(items) => items.get(index).cloned().unwrap_or_default(),
            _ => Value::Null,
        };
        self.wrap_nested(stored)
    }

    fn sequence_set(&self, key: Value, value: Value) -> bool {
        if self.refuse_readonly("Set", &key) {
            return false;
        }
        if is_length_key(&key) {
            let len = value.as_number().map_or(0, |n| n.max(0.0) as usize);
            return self.set_len(len).is_ok();
        }
        let Some(index) = sequence_index(&key) else {
            warn(format!(
                "cannot set non-index key \"{}\" on a sequence",
                key.to_display_string()
            ));
            return false;
        };
        let value = self.to_stored(value);

        let old = {
            let mut data = self.0.target.data_mut();
            let TargetData::Sequence(items) = &mut *data else {
                return false;
            };
            if index < items.len() {
                Some(std::mem::replace(&mut items[index], value.clone()))
            } else {
                items.resize(index, Value::Null);
                items.push(value.clone());
                None
            }
        };
        match old {
            None => self.trigger(TriggerOp::Add, Some(Key::Index(index)), Some(&value), None),
            Some(old) if has_changed(&value, &old) => {
                self.trigger(TriggerOp::Set, Some(Key::Index(index)), Some(&value), Some(&old))
            }
            Some(_) => {}
        }
        true
    }

    fn sequence_has(&self, key: &Value) -> bool {
        let Some(index) = sequence_index(key) else {
            return is_length_key(key);
        };
        self.track(TrackOp::Has, Key::Index(index));
        index < self.raw_len()
    }

    fn sequence_delete(&self, key: &Value) -> bool {
        if self.refuse_readonly("Delete", key) {
            return false;
        }
        let Some(index) = sequence_index(key) else {
            return false;
        };
        let old = match &mut *self.0.target.data_mut() {
            TargetData::Sequence(items) if index < items.len() => {
                Some(std::mem::take(&mut items[index]))
            }
            _ => None,
        };
        match old {
            Some(old) => {
                self.trigger(TriggerOp::Delete, Some(Key::Index(index)), None, Some(&old));
                true
            }
            None => false,
        }
    }

    fn track_all_indices(&self) -> Vec<Value> {
        self.track(TrackOp::Iterate, Key::Length);
        let items = self.items_snapshot();
        for index in 0..items.len() {
            self.track(TrackOp::Get, Key::Index(index));
        }
        items
    }

    fn sequence_iterate(&self) -> Vec<(Value, Value)> {
        self.track_all_indices()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), self.wrap_nested(v)))
            .collect()
    }

    /// Length of a sequence (or size of any other target). Tracks `length`.
    pub fn len(&self) -> usize {
        match self.kind() {
            TargetKind::Sequence => {
                self.track(TrackOp::Get, Key::Length);
                self.raw_len()
            }
            TargetKind::Record => {
                self.track(TrackOp::Iterate, Key::Iterate);
                self.raw_len()
            }
            TargetKind::Map | TargetKind::Set => self.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncate or extend a sequence. Extension fills with `Null`.
    pub fn set_len(&self, len: usize) -> Result<()> {
        self.expect_kind("set_len", TargetKind::Sequence)?;
        if self.refuse_readonly("Set", &Value::from("length")) {
            return Ok(());
        }
        let old_len = {
            let mut data = self.0.target.data_mut();
            let TargetData::Sequence(items) = &mut *data else {
                return Ok(());
            };
            let old_len = items.len();
            items.resize(len, Value::Null);
            old_len
        };
        if old_len != len {
            self.trigger(
                TriggerOp::Set,
                Some(Key::Length),
                Some(&Value::from(len)),
                Some(&Value::from(old_len)),
            );
        }
        Ok(())
    }

    /// Append to a sequence and return the new length.
    ///
    /// Tracking is paused so a mutator inside an effect does not subscribe
    /// the effect to `length`.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let _guard = TrackingGuard::pause();
        let index = self.raw_len();
        self.sequence_set(Value::from(index), value.into());
        self.raw_len()
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Value {
        let _guard = TrackingGuard::pause();
        if self.refuse_readonly("Delete", &Value::from("length")) {
            return Value::Null;
        }
        let len = self.raw_len();
        if len == 0 {
            return Value::Null;
        }
        let last = self.items_snapshot().pop().unwrap_or_default();
        if self.set_len(len - 1).is_err() {
            return Value::Null;
        }
        self.wrap_nested(last)
    }

    /// Insert at `index`, shifting later elements.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let _guard = TrackingGuard::pause();
        let value = value.into();
        if self.refuse_readonly("Set", &Value::from(index)) {
            return;
        }
        let value = self.to_stored(value);
        let before = self.items_snapshot();
        let index = index.min(before.len());
        if let TargetData::Sequence(items) = &mut *self.0.target.data_mut() {
            items.insert(index, value);
        }
        let after = self.items_snapshot();
        for (i, old) in before.iter().enumerate().skip(index) {
            if has_changed(&after[i], old) {
                self.trigger(TriggerOp::Set, Some(Key::Index(i)), Some(&after[i]), Some(old));
            }
        }
        let last = before.len();
        self.trigger(TriggerOp::Add, Some(Key::Index(last)), Some(&after[last]), None);
    }

    /// Remove and return the element at `index`, shifting later elements.
    pub fn remove(&self, index: usize) -> Value {
        let _guard = TrackingGuard::pause();
        if self.refuse_readonly("Delete", &Value::from(index)) {
            return Value::Null;
        }
        let before = self.items_snapshot();
        if index >= before.len() {
            return Value::Null;
        }
        let removed = match &mut *self.0.target.data_mut() {
            TargetData::Sequence(items) => items.remove(index),
            _ => return Value::Null,
        };
        let after = self.items_snapshot();
        for (i, new) in after.iter().enumerate().skip(index) {
            if has_changed(new, &before[i]) {
                self.trigger(TriggerOp::Set, Some(Key::Index(i)), Some(new), Some(&before[i]));
            }
        }
        self.trigger(
            TriggerOp::Set,
            Some(Key::Length),
            Some(&Value::from(after.len())),
            Some(&Value::from(before.len())),
        );
        self.wrap_nested(removed)
    }

    /// Identity search. Tries the argument as given, then its raw form.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        let items = self.track_all_indices();
        items
            .iter()
            .position(|item| item == needle)
            .or_else(|| {
                let raw = needle.to_raw();
                items.iter().position(|item| *item == raw)
            })
    }

    pub fn includes(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }

    /// Convenience read of a string-keyed property.
    pub fn get_prop(&self, key: &str) -> Value {
        self.get(&Value::from(key))
    }

    /// Convenience write of a string-keyed property.
    pub fn set_prop(&self, key: &str, value: impl Into<Value>) -> bool {
        self.set(Value::from(key), value.into())
    }

    /// Read an element of a sequence.
    pub fn at(&self, index: usize) -> Value {
        self.get(&Value::from(index))
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Read `key`. Set collections have no keyed reads and fail with
    /// [`Error::UnsupportedTarget`].
    pub fn try_get(&self, key: &Value) -> Result<Value> {
        match self.kind() {
            TargetKind::Record => Ok(self.record_get(key)),
            TargetKind::Sequence => Ok(self.sequence_get(key)),
            TargetKind::Map => Ok(self.collection_get(key)),
            kind @ TargetKind::Set => Err(Error::UnsupportedTarget { op: "get", kind }),
        }
    }

    /// Write `key`, returning whether the write was applied.
    pub fn try_set(&self, key: Value, value: Value) -> Result<bool> {
        match self.kind() {
            TargetKind::Record => Ok(self.record_set(key, value)),
            TargetKind::Sequence => Ok(self.sequence_set(key, value)),
            TargetKind::Map => Ok(self.collection_set(key, value)),
            kind @ TargetKind::Set => Err(Error::UnsupportedTarget { op: "set", kind }),
        }
    }

    /// [`try_get`](Self::try_get) for call sites that treat a missing value
    /// as `Null`. Unsupported kinds are reported through the warning sink.
    pub fn get(&self, key: &Value) -> Value {
        self.try_get(key).unwrap_or_else(|err| {
            warn(err.to_string());
            Value::Null
        })
    }

    /// [`try_set`](Self::try_set), reporting unsupported kinds through the
    /// warning sink.
    pub fn set(&self, key: Value, value: Value) -> bool {
        self.try_set(key, value).unwrap_or_else(|err| {
            warn(err.to_string());
            false
        })
    }

    pub(super) fn expect_kind(&self, op: &'static str, expected: TargetKind) -> Result<()> {
        match self.kind() {
            kind if kind == expected => Ok(()),
            kind => Err(Error::UnsupportedTarget { op, kind }),
        }
    }

    pub fn has(&self, key: &Value) -> bool {
        match self.kind() {
            TargetKind::Record => self.record_has(key),
            TargetKind::Sequence => self.sequence_has(key),
            TargetKind::Map | TargetKind::Set => self.collection_has(key),
        }
    }

    pub fn delete(&self, key: &Value) -> bool {
        match self.kind() {
            TargetKind::Record => self.record_delete(key),
            TargetKind::Sequence => self.sequence_delete(key),
            TargetKind::Map | TargetKind::Set => self.collection_delete(key),
        }
    }

    pub fn iterate(&self) -> Vec<(Value, Value)> {
        match self.kind() {
            TargetKind::Record => self.record_iterate(),
            TargetKind::Sequence => self.sequence_iterate(),
            TargetKind::Map | TargetKind::Set => self.entries(),
        }
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Proxy {}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("target", self.target())
            .field("mode", &self.mode())
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

fn record_key(key: &Value) -> Rc<str> {
    match key {
        Value::Str(s) => s.clone(),
        other => Rc::from(other.to_display_string()),
    }
}

fn is_length_key(key: &Value) -> bool {
    key.as_str() == Some("length")
}

fn sequence_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}

/// Uniform access to observable containers.
///
/// Implemented by [`Proxy`] (tracking, triggering, mode-aware) and by
/// [`Value`] (dispatching to the proxy, or reading raw targets untracked).
pub trait ObservableStore {
    fn get(&self, key: &Value) -> Value;
    fn set(&self, key: Value, value: Value) -> bool;
    fn has(&self, key: &Value) -> bool;
    fn delete(&self, key: &Value) -> bool;
    fn iterate(&self) -> Vec<(Value, Value)>;

    fn get_prop(&self, key: &str) -> Value {
        self.get(&Value::from(key))
    }
}

impl ObservableStore for Proxy {
    fn get(&self, key: &Value) -> Value {
        Proxy::get(self, key)
    }

    fn set(&self, key: Value, value: Value) -> bool {
        Proxy::set(self, key, value)
    }

    fn has(&self, key: &Value) -> bool {
        Proxy::has(self, key)
    }

    fn delete(&self, key: &Value) -> bool {
        Proxy::delete(self, key)
    }

    fn iterate(&self) -> Vec<(Value, Value)> {
        Proxy::iterate(self)
    }
}

impl ObservableStore for Value {
    fn get(&self, key: &Value) -> Value {
        match self {
            Value::Proxy(proxy) => proxy.get(key),
            Value::Object(target) => raw_get(target, key),
            _ => Value::Null,
        }
    }

    fn set(&self, key: Value, value: Value) -> bool {
        match self {
            Value::Proxy(proxy) => proxy.set(key, value),
            Value::Object(target) => raw_set(target, key, value),
            _ => false,
        }
    }

    fn has(&self, key: &Value) -> bool {
        match self {
            Value::Proxy(proxy) => proxy.has(key),
            Value::Object(target) => match &*target.data() {
                TargetData::Record(map) => map.contains_key(&record_key(key)),
                TargetData::Sequence(items) => sequence_index(key).is_some_and(|i| i < items.len()),
                TargetData::Map(map) => map.contains_key(&key.to_raw()),
                TargetData::Set(set) => set.contains(&key.to_raw()),
            },
            _ => false,
        }
    }

    fn delete(&self, key: &Value) -> bool {
        match self {
            Value::Proxy(proxy) => proxy.delete(key),
            Value::Object(target) => match &mut *target.data_mut() {
                TargetData::Record(map) => map.shift_remove(&record_key(key)).is_some(),
                TargetData::Map(map) => map.shift_remove(&key.to_raw()).is_some(),
                TargetData::Set(set) => set.shift_remove(&key.to_raw()),
                TargetData::Sequence(items) => match sequence_index(key) {
                    Some(i) if i < items.len() => {
                        items[i] = Value::Null;
                        true
                    }
                    _ => false,
                },
            },
            _ => false,
        }
    }

    fn iterate(&self) -> Vec<(Value, Value)> {
        match self {
            Value::Proxy(proxy) => proxy.iterate(),
            Value::Object(target) => match &*target.data() {
                TargetData::Record(map) => {
                    map.iter().map(|(k, v)| (Value::Str(k.clone()), v.clone())).collect()
                }
                TargetData::Sequence(items) => items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (Value::from(i), v.clone()))
                    .collect(),
                TargetData::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                TargetData::Set(set) => set.iter().map(|v| (v.clone(), v.clone())).collect(),
            },
            _ => Vec::new(),
        }
    }
}

fn raw_get(target: &Target, key: &Value) -> Value {
    match &*target.data() {
        TargetData::Record(map) => map.get(&record_key(key)).cloned().unwrap_or_default(),
        TargetData::Sequence(items) => {
            if is_length_key(key) {
                return Value::from(items.len());
            }
            sequence_index(key)
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default()
        }
        TargetData::Map(map) => map.get(&key.to_raw()).cloned().unwrap_or_default(),
        TargetData::Set(_) => Value::Null,
    }
}

fn raw_set(target: &Target, key: Value, value: Value) -> bool {
    match &mut *target.data_mut() {
        TargetData::Record(map) => {
            map.insert(record_key(&key), value);
            true
        }
        TargetData::Sequence(items) => match sequence_index(&key) {
            Some(i) => {
                if i >= items.len() {
                    items.resize(i + 1, Value::Null);
                }
                items[i] = value;
                true
            }
            None => false,
        },
        TargetData::Map(map) => {
            map.insert(key.to_raw(), value);
            true
        }
        TargetData::Set(_) => false,
    }
}

/// Wrap an object value in the reactive handle, leaving anything else as is.
pub(crate) fn to_reactive(value: &Value) -> Value {
    match value {
        Value::Object(target) if !target.is_marked_raw() => {
            Value::Proxy(Proxy::wrap(target.clone(), ProxyMode::Reactive, true))
        }
        other => other.clone(),
    }
}

fn wrap_with(value: Value, mode: ProxyMode) -> Value {
    match value {
        Value::Object(target) if target.is_marked_raw() => Value::Object(target),
        Value::Object(target) => Value::Proxy(Proxy::wrap(target, mode, false)),
        Value::Proxy(proxy) => {
            if mode.is_readonly() && !proxy.mode().is_readonly() {
                Value::Proxy(Proxy::wrap(proxy.target().clone(), mode, true))
            } else {
                Value::Proxy(proxy)
            }
        }
        other => {
            warn(format!("value cannot be made {mode:?}: {other:?}"));
            other
        }
    }
}

/// Deep reactive handle over an object value.
///
/// Returns handles unchanged (including readonly ones), returns targets
/// marked raw unchanged, and warns on non-object values.
///
/// # Example
///
/// ```rust,ignore
/// let state = reactive(Value::record([("count", 0)]));
/// effect(move || println!("{:?}", state.get_prop("count")), EffectOptions::default());
/// ```
pub fn reactive(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::Reactive)
}

/// Reactive handle that tracks only top-level keys.
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::ShallowReactive)
}

/// Deep readonly handle. Over a reactive handle, reads still track.
pub fn readonly(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::Readonly)
}

pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::ShallowReadonly)
}

/// Whether reads through the value are tracked.
pub fn is_reactive(value: &Value) -> bool {
    value.as_proxy().is_some_and(Proxy::is_tracked)
}

pub fn is_readonly(value: &Value) -> bool {
    value.as_proxy().is_some_and(|p| p.mode().is_readonly())
}

pub fn is_shallow(value: &Value) -> bool {
    value.as_proxy().is_some_and(|p| p.mode().is_shallow())
}

pub fn is_proxy(value: &Value) -> bool {
    value.as_proxy().is_some()
}

/// Strip any handle. Never tracks.
pub fn to_raw(value: &Value) -> Value {
    value.to_raw()
}

/// Flag a target so it is never wrapped. Returns the value unchanged.
pub fn mark_raw(value: Value) -> Value {
    if let Value::Object(target) = &value {
        target.mark_raw();
    }
    value
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect, EffectOptions, ReactiveEffect, Signal};
    use std::cell::Cell;

    fn watch_runs(f: impl Fn() + 'static) -> (ReactiveEffect, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let e = effect(
            {
                let runs = runs.clone();
                move || {
                    f();
                    runs.set(runs.get() + 1);
                }
            },
            EffectOptions::default(),
        );
        (e, runs)
    }

    fn proxy(value: Value) -> Proxy {
        value.as_proxy().cloned().expect("object value")
    }

    #[test]
    fn wrapping_is_idempotent() {
        let raw = Value::record([("a", 1)]);
        let p1 = reactive(raw.clone());
        let p2 = reactive(raw.clone());
        assert!(proxy(p1.clone()).ptr_eq(&proxy(p2)));
        assert!(proxy(reactive(p1.clone())).ptr_eq(&proxy(p1.clone())));
        assert_eq!(to_raw(&p1), raw);
    }

    #[test]
    fn readonly_over_reactive_is_distinct_and_tracks() {
        let state = reactive(Value::record([("a", 1)]));
        let ro = readonly(state.clone());
        assert_ne!(ro, state);
        assert!(is_readonly(&ro));
        assert!(is_reactive(&ro));
        assert_eq!(reactive(ro.clone()), ro);

        let (_e, runs) = watch_runs({
            let ro = ro.clone();
            move || {
                ro.get_prop("a");
            }
        });
        state.set("a".into(), 2.into());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn readonly_writes_are_refused() {
        let ro = readonly(Value::record([("a", 1)]));
        assert!(!is_reactive(&ro));
        assert!(!ro.set("a".into(), 2.into()));
        assert!(!ro.delete(&"a".into()));
        assert_eq!(ro.get_prop("a"), Value::from(1));
    }

    #[test]
    fn mark_raw_prevents_wrapping() {
        let raw = mark_raw(Value::record([("a", 1)]));
        let wrapped = reactive(raw.clone());
        assert!(!is_proxy(&wrapped));
        assert_eq!(wrapped, raw);
    }

    #[test]
    fn unrelated_keys_do_not_trigger() {
        let state = reactive(Value::record([("a", 1), ("b", 2)]));
        let (_e, runs) = watch_runs({
            let state = state.clone();
            move || {
                state.get_prop("a");
            }
        });
        state.set("b".into(), 3.into());
        assert_eq!(runs.get(), 1);
        state.set("a".into(), 1.into());
        assert_eq!(runs.get(), 1);
        state.set("a".into(), 5.into());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn adding_and_deleting_keys_trigger_iteration() {
        let state = reactive(Value::record([("a", 1)]));
        let (_e, runs) = watch_runs({
            let state = state.clone();
            move || {
                state.iterate();
            }
        });
        state.set("b".into(), 2.into());
        assert_eq!(runs.get(), 2);
        assert!(state.delete(&"b".into()));
        assert_eq!(runs.get(), 3);
        assert!(!state.delete(&"missing".into()));
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn nested_objects_are_wrapped() {
        let state = reactive(Value::record([("inner", Value::record([("n", 1)]))]));
        let inner = state.get_prop("inner");
        assert!(is_reactive(&inner));

        let (_e, runs) = watch_runs({
            let state = state.clone();
            move || {
                state.get_prop("inner").get_prop("n");
            }
        });
        inner.set("n".into(), 2.into());
        assert_eq!(runs.get(), 2);

        let shallow = shallow_reactive(Value::record([("inner", Value::record([("n", 1)]))]));
        assert!(!is_proxy(&shallow.get_prop("inner")));
    }

    #[test]
    fn signals_in_records_unwrap_and_write_through() {
        let count = Signal::new(1);
        let state = reactive(Value::record([("count", Value::from(count.clone()))]));
        assert_eq!(state.get_prop("count"), Value::from(1));

        state.set("count".into(), 5.into());
        assert_eq!(count.get_untracked(), Value::from(5));

        let list = reactive(Value::sequence([Value::from(count.clone())]));
        assert!(list.get(&Value::from(0)).as_signal().is_some());
    }

    #[test]
    fn sequence_length_truncation_and_extension() {
        let list = reactive(Value::sequence([1, 2, 3, 4]));
        let p = proxy(list.clone());

        let (_low, low_runs) = watch_runs({
            let p = p.clone();
            move || {
                p.at(1);
            }
        });
        let (_high, high_runs) = watch_runs({
            let p = p.clone();
            move || {
                p.at(3);
            }
        });
        let (_len, len_runs) = watch_runs({
            let p = p.clone();
            move || {
                p.len();
            }
        });

        p.set_len(2).unwrap();
        assert_eq!(low_runs.get(), 1);
        assert_eq!(high_runs.get(), 2);
        assert_eq!(len_runs.get(), 2);

        p.set(Value::from(5), Value::from(9));
        assert_eq!(p.len(), 6);
        assert_eq!(p.at(4), Value::Null);
        assert_eq!(len_runs.get(), 3);
    }

    #[test]
    fn set_len_requires_a_sequence() {
        let p = proxy(reactive(Value::record([("a", 1)])));
        assert!(matches!(
            p.set_len(0),
            Err(Error::UnsupportedTarget { op: "set_len", kind: TargetKind::Record })
        ));
        assert_eq!(p.get_prop("a"), Value::from(1));
    }

    #[test]
    fn mutators_do_not_subscribe() {
        let list = proxy(reactive(Value::sequence([1])));
        let e = effect(
            {
                let list = list.clone();
                move || {
                    list.push(2);
                }
            },
            EffectOptions::default(),
        );
        assert_eq!(e.dep_count(), 0);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn sequence_insert_remove_pop() {
        let list = proxy(reactive(Value::sequence(["a", "c"])));
        list.insert(1, "b");
        assert_eq!(list.iterate().len(), 3);
        assert_eq!(list.at(1), Value::from("b"));

        assert_eq!(list.remove(0), Value::from("a"));
        assert_eq!(list.pop(), Value::from("c"));
        assert_eq!(list.len(), 1);
        assert_eq!(list.at(0), Value::from("b"));
    }

    #[test]
    fn identity_search_tries_raw_argument() {
        let item = Value::record([("id", 1)]);
        let list = proxy(reactive(Value::sequence([item.clone()])));
        let wrapped = list.at(0);
        assert!(is_proxy(&wrapped));
        assert!(list.includes(&wrapped));
        assert_eq!(list.index_of(&item), Some(0));
        assert_eq!(list.index_of(&Value::from(1)), None);
    }
}
