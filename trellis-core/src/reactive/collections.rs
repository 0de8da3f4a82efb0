//! Keyed and set collections.
//!
//! Collection handles operate on raw keys: a handle passed as a key is
//! stripped before lookup, so `map.get(reactive(k))` and `map.get(k)` find
//! the same entry. Each entry is tracked under its own key; enumeration
//! tracks the iterate key, and `keys()` on a keyed collection tracks only
//! key membership so value updates do not re-run it.

use super::runtime::{Key, TrackOp, TriggerOp};
use super::store::Proxy;
use super::value::{has_changed, TargetData, TargetKind, Value};
use crate::error::Result;

impl Proxy {
    fn entry_key(key: &Value) -> (Value, Key) {
        let raw = key.to_raw();
        let tracked = Key::Entry(raw.identity_key());
        (raw, tracked)
    }

    pub(super) fn collection_get(&self, key: &Value) -> Value {
        let (raw, tracked) = Self::entry_key(key);
        self.track(TrackOp::Get, tracked);
        let stored = match &*self.target().data() {
            TargetData::Map(map) => map.get(&raw).cloned().unwrap_or_default(),
            _ => Value::Null,
        };
        self.wrap_nested(stored)
    }

    pub(super) fn collection_set(&self, key: Value, value: Value) -> bool {
        if self.refuse_readonly("Set", &key) {
            return false;
        }
        let (raw, tracked) = Self::entry_key(&key);
        let value = value.to_raw();
        let old = match &mut *self.target().data_mut() {
            TargetData::Map(map) => map.insert(raw, value.clone()),
            _ => return false,
        };
        match old {
            None => self.trigger(TriggerOp::Add, Some(tracked), Some(&value), None),
            Some(old) if has_changed(&value, &old) => {
                self.trigger(TriggerOp::Set, Some(tracked), Some(&value), Some(&old))
            }
            Some(_) => {}
        }
        true
    }

    pub(super) fn collection_has(&self, key: &Value) -> bool {
        let (raw, tracked) = Self::entry_key(key);
        self.track(TrackOp::Has, tracked);
        match &*self.target().data() {
            TargetData::Map(map) => map.contains_key(&raw),
            TargetData::Set(set) => set.contains(&raw),
            _ => false,
        }
    }

    pub(super) fn collection_delete(&self, key: &Value) -> bool {
        if self.refuse_readonly("Delete", key) {
            return false;
        }
        let (raw, tracked) = Self::entry_key(key);
        let old = match &mut *self.target().data_mut() {
            TargetData::Map(map) => map.shift_remove(&raw),
            TargetData::Set(set) => set.shift_take(&raw),
            _ => None,
        };
        match old {
            Some(old) => {
                self.trigger(TriggerOp::Delete, Some(tracked), None, Some(&old));
                true
            }
            None => false,
        }
    }

    /// Insert into a set collection. Returns `true` if the value was new.
    pub fn add(&self, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.expect_kind("add", TargetKind::Set)?;
        if self.refuse_readonly("Add", &value) {
            return Ok(false);
        }
        let (raw, tracked) = Self::entry_key(&value);
        let inserted = match &mut *self.target().data_mut() {
            TargetData::Set(set) => set.insert(raw.clone()),
            _ => false,
        };
        if inserted {
            self.trigger(TriggerOp::Add, Some(tracked), Some(&raw), None);
        }
        Ok(inserted)
    }

    /// Remove every entry. Triggers every subscriber of the target if it was
    /// non-empty.
    pub fn clear(&self) {
        if self.refuse_readonly("Clear", &Value::Null) {
            return;
        }
        let had_items = {
            let mut data = self.target().data_mut();
            let had_items = !data.is_empty();
            match &mut *data {
                TargetData::Record(map) => map.clear(),
                TargetData::Sequence(items) => items.clear(),
                TargetData::Map(map) => map.clear(),
                TargetData::Set(set) => set.clear(),
            }
            had_items
        };
        if had_items {
            self.trigger(TriggerOp::Clear, None, None, None);
        }
    }

    /// Number of entries. Tracks the iterate key.
    pub fn size(&self) -> usize {
        self.track(TrackOp::Iterate, Key::Iterate);
        self.target().data().len()
    }

    /// Enumerate `(key, value)` pairs; for sets both halves are the element.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.track(TrackOp::Iterate, Key::Iterate);
        let pairs: Vec<(Value, Value)> = match &*self.target().data() {
            TargetData::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            TargetData::Set(set) => set.iter().map(|v| (v.clone(), v.clone())).collect(),
            TargetData::Record(map) => map
                .iter()
                .map(|(k, v)| (Value::Str(k.clone()), v.clone()))
                .collect(),
            TargetData::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v.clone()))
                .collect(),
        };
        pairs
            .into_iter()
            .map(|(k, v)| (self.wrap_nested(k), self.wrap_nested(v)))
            .collect()
    }

    /// Enumerate keys. On keyed collections this tracks key membership only.
    pub fn keys(&self) -> Vec<Value> {
        if self.kind() == TargetKind::Map {
            self.track(TrackOp::Iterate, Key::MapKeyIterate);
            let keys: Vec<Value> = match &*self.target().data() {
                TargetData::Map(map) => map.keys().cloned().collect(),
                _ => Vec::new(),
            };
            return keys.into_iter().map(|k| self.wrap_nested(k)).collect();
        }
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Call `f(value, key)` for every entry, in insertion order.
    pub fn for_each(&self, mut f: impl FnMut(&Value, &Value)) {
        for (key, value) in self.entries() {
            f(&value, &key);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::reactive::{effect, reactive, readonly, EffectOptions, ReactiveEffect, Value};
    use crate::reactive::TargetKind;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counted(f: impl Fn() + 'static) -> (ReactiveEffect, Rc<Cell<usize>>) {
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

    #[test]
    fn map_entries_are_tracked_individually() {
        let map = reactive(Value::map([("a", 1), ("b", 2)]));
        let map = map.as_proxy().cloned().expect("map proxy");

        let (_e, runs) = counted({
            let map = map.clone();
            move || {
                map.get(&"a".into());
            }
        });
        map.set("b".into(), 3.into());
        assert_eq!(runs.get(), 1);
        map.set("a".into(), 4.into());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn keys_ignore_value_updates() {
        let map = reactive(Value::map([("a", 1)]));
        let map = map.as_proxy().cloned().expect("map proxy");

        let (_keys, key_runs) = counted({
            let map = map.clone();
            move || {
                map.keys();
            }
        });
        let (_values, value_runs) = counted({
            let map = map.clone();
            move || {
                map.values();
            }
        });

        map.set("a".into(), 2.into());
        assert_eq!(key_runs.get(), 1);
        assert_eq!(value_runs.get(), 2);

        map.set("b".into(), 1.into());
        assert_eq!(key_runs.get(), 2);
        assert_eq!(value_runs.get(), 3);
    }

    #[test]
    fn set_add_delete_clear() {
        let set = reactive(Value::set([1, 2]));
        let set = set.as_proxy().cloned().expect("set proxy");

        let (_e, runs) = counted({
            let set = set.clone();
            move || {
                set.size();
            }
        });
        assert!(set.add(3).unwrap());
        assert!(!set.add(3).unwrap());
        assert_eq!(runs.get(), 2);

        assert!(set.delete(&Value::from(1)));
        assert_eq!(runs.get(), 3);

        set.clear();
        assert_eq!(runs.get(), 4);
        set.clear();
        assert_eq!(runs.get(), 4);
        assert_eq!(set.size(), 0);
    }

    #[test]
    fn proxy_keys_are_stripped() {
        let key = Value::record([("id", 1)]);
        let wrapped_key = reactive(key.clone());
        let map = reactive(Value::map(Vec::<(Value, Value)>::new()));
        let map = map.as_proxy().cloned().expect("map proxy");

        map.set(wrapped_key.clone(), "x".into());
        assert!(map.has(&key));
        assert_eq!(map.get(&wrapped_key), Value::from("x"));
    }

    #[test]
    fn readonly_collection_refuses_mutation() {
        let map = readonly(Value::map([("a", 1)]));
        let map = map.as_proxy().cloned().expect("map proxy");
        assert!(!map.set("a".into(), 2.into()));
        map.clear();
        assert_eq!(map.size(), 1);
        assert_eq!(map.get(&"a".into()), Value::from(1));
    }

    #[test]
    fn set_collections_reject_keyed_access() {
        let set = reactive(Value::set([1]));
        let set = set.as_proxy().cloned().expect("set proxy");
        assert!(matches!(
            set.try_get(&1.into()),
            Err(Error::UnsupportedTarget { op: "get", kind: TargetKind::Set })
        ));
        assert!(matches!(
            set.try_set(1.into(), 2.into()),
            Err(Error::UnsupportedTarget { op: "set", kind: TargetKind::Set })
        ));
        assert!(!set.set(1.into(), 2.into()));
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn add_requires_a_set() {
        let map = reactive(Value::map([("a", 1)]));
        let map = map.as_proxy().cloned().expect("map proxy");
        assert!(matches!(
            map.add("b"),
            Err(Error::UnsupportedTarget { op: "add", kind: TargetKind::Map })
        ));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn for_each_visits_in_order() {
        let map = reactive(Value::map([("x", 1), ("y", 2)]));
        let map = map.as_proxy().cloned().expect("map proxy");
        let mut seen = Vec::new();
        map.for_each(|value, key| seen.push((key.clone(), value.clone())));
        assert_eq!(
            seen,
            vec![(Value::from("x"), Value::from(1)), (Value::from("y"), Value::from(2))]
        );
    }
}
