//! Dynamic values and observable targets.
//!
//! A [`Target`] is the raw, identity-bearing container the application wants
//! to observe: a record, a sequence, a keyed collection or a set collection.
//! Targets are plain data; reading or writing them directly never tracks or
//! triggers. Reactivity comes from wrapping a target in a
//! [`Proxy`](super::Proxy).
//!
//! [`Value`] is the dynamic value stored inside targets and passed through
//! props. Equality and hashing follow SameValueZero: numbers compare by value
//! with `NaN == NaN` and `+0 == -0`, strings by content, and targets, proxies,
//! signals and callbacks by identity.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::runtime::Runtime;
use super::signal::Signal;
use super::store::{Proxy, ProxyMode};
use super::subscriber::TargetId;
use crate::error::Result;

/// The declared shape of a target. Operations dispatch on it statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Record,
    Sequence,
    Map,
    Set,
}

/// Raw storage of a target.
#[derive(Debug)]
pub enum TargetData {
    Record(IndexMap<Rc<str>, Value>),
    Sequence(Vec<Value>),
    Map(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
}

impl TargetData {
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetData::Record(_) => TargetKind::Record,
            TargetData::Sequence(_) => TargetKind::Sequence,
            TargetData::Map(_) => TargetKind::Map,
            TargetData::Set(_) => TargetKind::Set,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TargetData::Record(m) => m.len(),
            TargetData::Sequence(v) => v.len(),
            TargetData::Map(m) => m.len(),
            TargetData::Set(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct TargetInner {
    id: TargetId,
    kind: TargetKind,
    skip: Cell<bool>,
    data: RefCell<TargetData>,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        Runtime::dispose_target(self.id);
    }
}

/// A shared observable target.
///
/// Cloning a `Target` yields another handle to the same storage.
#[derive(Clone)]
pub struct Target(Rc<TargetInner>);

impl Target {
    pub fn new(data: TargetData) -> Self {
        Self(Rc::new(TargetInner {
            id: TargetId::new(),
            kind: data.kind(),
            skip: Cell::new(false),
            data: RefCell::new(data),
        }))
    }

    pub fn empty(kind: TargetKind) -> Self {
        Self::new(match kind {
            TargetKind::Record => TargetData::Record(IndexMap::new()),
            TargetKind::Sequence => TargetData::Sequence(Vec::new()),
            TargetKind::Map => TargetData::Map(IndexMap::new()),
            TargetKind::Set => TargetData::Set(IndexSet::new()),
        })
    }

    pub fn id(&self) -> TargetId {
        self.0.id
    }

    pub fn kind(&self) -> TargetKind {
        self.0.kind
    }

    /// Borrow the raw storage. Never tracks.
    pub fn data(&self) -> Ref<'_, TargetData> {
        self.0.data.borrow()
    }

    /// Mutably borrow the raw storage. Never triggers.
    pub fn data_mut(&self) -> RefMut<'_, TargetData> {
        self.0.data.borrow_mut()
    }

    /// Mark the target so that it is never wrapped in a proxy.
    pub fn mark_raw(&self) {
        self.0.skip.set(true);
    }

    pub fn is_marked_raw(&self) -> bool {
        self.0.skip.get()
    }

    pub fn ptr_eq(&self, other: &Target) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Target {}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind(), self.id().raw())
    }
}

/// A callable value: event handlers and other functions stored in props.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(&[Value]) -> Result<Value>>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0)(args)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Hashable identity of a [`Value`] under SameValueZero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Number(u64),
    Str(Rc<str>),
    Object(TargetId),
    Proxy(TargetId, ProxyMode, bool),
    Signal(TargetId),
    Func(usize),
}

/// A dynamic value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    /// A raw target.
    Object(Target),
    /// A reactive or readonly handle over a target.
    Proxy(Proxy),
    /// A boxed reactive cell.
    Signal(Signal),
    Func(Callback),
}

fn number_bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0
    } else {
        n.to_bits()
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl Value {
    /// Build a raw record target from key/value pairs.
    pub fn record<K, V, I>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Value::Object(Target::new(TargetData::Record(map)))
    }

    /// Build a raw sequence target.
    pub fn sequence<V, I>(items: I) -> Value
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = items.into_iter().map(Into::into).collect();
        Value::Object(Target::new(TargetData::Sequence(items)))
    }

    /// Build a raw keyed collection.
    pub fn map<K, V, I>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into().to_raw(), v.into()))
            .collect();
        Value::Object(Target::new(TargetData::Map(map)))
    }

    /// Build a raw set collection.
    pub fn set<V, I>(items: I) -> Value
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let set = items.into_iter().map(|v| v.into().to_raw()).collect();
        Value::Object(Target::new(TargetData::Set(set)))
    }

    pub fn identity_key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Number(n) => ValueKey::Number(number_bits(*n)),
            Value::Str(s) => ValueKey::Str(Rc::clone(s)),
            Value::Object(t) => ValueKey::Object(t.id()),
            Value::Proxy(p) => ValueKey::Proxy(p.target().id(), p.mode(), p.is_tracked()),
            Value::Signal(s) => ValueKey::Signal(s.id()),
            Value::Func(f) => ValueKey::Func(f.addr()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// True for raw targets and proxies.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Proxy(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Value::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<&Signal> {
        match self {
            Value::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }

    /// The raw target behind a raw object or a proxy.
    pub fn as_target(&self) -> Option<Target> {
        match self {
            Value::Object(t) => Some(t.clone()),
            Value::Proxy(p) => Some(p.target().clone()),
            _ => None,
        }
    }

    /// Strip any proxy wrapper.
    pub fn to_raw(&self) -> Value {
        match self {
            Value::Proxy(p) => Value::Object(p.target().clone()),
            other => other.clone(),
        }
    }

    /// Render the value as text, the way a host would display it.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Func(_) => "[function]".to_string(),
            Value::Signal(s) => s.get_untracked().to_display_string(),
            Value::Object(_) | Value::Proxy(_) => self.to_json().to_string(),
        }
    }

    /// Snapshot the value as JSON without tracking. Callbacks become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null | Value::Func(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
                    Json::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Json::Number)
                        .unwrap_or(Json::Null)
                }
            }
            Value::Str(s) => Json::String(s.to_string()),
            Value::Signal(s) => s.get_untracked().to_json(),
            Value::Object(_) | Value::Proxy(_) => {
                let Some(target) = self.as_target() else {
                    return Json::Null;
                };
                let data = target.data();
                match &*data {
                    TargetData::Record(map) => Json::Object(
                        map.iter()
                            .map(|(k, v)| (k.to_string(), v.to_json()))
                            .collect(),
                    ),
                    TargetData::Sequence(items) => {
                        Json::Array(items.iter().map(Value::to_json).collect())
                    }
                    TargetData::Map(map) => Json::Array(
                        map.iter()
                            .map(|(k, v)| Json::Array(vec![k.to_json(), v.to_json()]))
                            .collect(),
                    ),
                    TargetData::Set(set) => Json::Array(set.iter().map(Value::to_json).collect()),
                }
            }
        }
    }

    /// Build raw targets from a JSON document.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::Str(Rc::from(s.as_str())),
            Json::Array(items) => Value::sequence(items.iter().map(Value::from_json)),
            Json::Object(map) => Value::record(
                map.iter()
                    .map(|(k, v)| (Rc::<str>::from(k.as_str()), Value::from_json(v))),
            ),
        }
    }
}

/// NaN-aware inequality: `value !== old && !(both are NaN)`.
pub fn has_changed(value: &Value, old: &Value) -> bool {
    value.identity_key() != old.identity_key()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.identity_key() == other.identity_key()
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_key().hash(state);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({})", format_number(*n)),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(t) => write!(f, "Object({t:?})"),
            Value::Proxy(p) => write!(f, "Proxy({:?}, {:?})", p.mode(), p.target()),
            Value::Signal(s) => write!(f, "Signal#{}", s.id().raw()),
            Value::Func(_) => f.write_str("Func"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Target> for Value {
    fn from(t: Target) -> Self {
        Value::Object(t)
    }
}

impl From<Proxy> for Value {
    fn from(p: Proxy) -> Self {
        Value::Proxy(p)
    }
}

impl From<Signal> for Value {
    fn from(s: Signal) -> Self {
        Value::Signal(s)
    }
}

impl From<Callback> for Value {
    fn from(f: Callback) -> Self {
        Value::Func(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_zero_equality() {
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_eq!(Value::from(0.0), Value::from(-0.0));
        assert_eq!(Value::from("a"), Value::from(String::from("a")));
        assert_ne!(Value::from(1), Value::from("1"));
    }

    #[test]
    fn has_changed_is_nan_aware() {
        assert!(!has_changed(&Value::from(f64::NAN), &Value::from(f64::NAN)));
        assert!(has_changed(&Value::from(1), &Value::from(2)));
        assert!(!has_changed(&Value::from(3), &Value::from(3.0)));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Value::record([("x", 1)]);
        let b = Value::record([("x", 1)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::record(Vec::<(&str, Value)>::new()).is_truthy());
    }

    #[test]
    fn json_round_trip() {
        let json = serde_json::json!({ "name": "trellis", "tags": ["a", "b"], "count": 3 });
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn display_formats_integers_without_fraction() {
        assert_eq!(Value::from(3).to_display_string(), "3");
        assert_eq!(Value::from(1.5).to_display_string(), "1.5");
        assert_eq!(Value::Null.to_display_string(), "");
    }
}
