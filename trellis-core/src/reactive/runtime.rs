//! Reactive Runtime
//!
//! The runtime owns the dependency graph: a map from `(target, key)` pairs to
//! the set of effects subscribed to them. It is the central coordinator that
//! connects observable stores, signals, computed values and effects.
//!
//! # How It Works
//!
//! 1. When an effect reads a store key, the runtime records the pair as a
//!    dependency of the effect (`track`). The effect remembers the pair too,
//!    so the edge is always recorded on both sides.
//!
//! 2. When a store key changes, the runtime collects the subscribed effects
//!    (`trigger`), computed effects first, and either runs them or hands them
//!    to their custom scheduler.
//!
//! 3. Before an effect re-runs, all of its edges are removed (`cleanup`), so
//!    dependencies from stale conditional branches disappear.
//!
//! # Ownership
//!
//! The registry holds weak references to effects: dropping the last handle to
//! an effect unregisters it. Dependency sets of a target are disposed when
//! the target is dropped. All state is thread-local; the reactive system is
//! single-threaded.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::{debug, trace};

use super::context::{self, ReactiveContext};
use super::effect::{EffectInner, ReactiveEffect};
use super::subscriber::{SubscriberId, TargetId};
use super::value::{TargetKind, Value, ValueKey};

/// A key inside a target's dependency map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A named record property.
    Prop(Rc<str>),
    /// A sequence element.
    Index(usize),
    /// A sequence's length.
    Length,
    /// Enumeration of a record, set or map.
    Iterate,
    /// Enumeration of a map's keys only.
    MapKeyIterate,
    /// An entry of a map or set collection.
    Entry(ValueKey),
    /// The single value held by a signal or computed.
    Value,
}

/// The kind of read being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// The kind of change being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

type DepSet = IndexSet<SubscriberId>;

#[derive(Default)]
struct DepGraph {
    targets: HashMap<TargetId, HashMap<Key, DepSet>>,
    effects: HashMap<SubscriberId, Weak<EffectInner>>,
}

thread_local! {
    static GRAPH: RefCell<DepGraph> = RefCell::new(DepGraph::default());
}

/// The thread-local reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Register an effect so that triggers can find it by ID.
    pub(crate) fn register(effect: &ReactiveEffect) {
        let id = effect.id();
        let weak = effect.downgrade_inner();
        GRAPH.with(|graph| {
            graph.borrow_mut().effects.insert(id, weak);
        });
    }

    /// Remove an effect from the registry and from every dependency set.
    pub(crate) fn unregister(id: SubscriberId, deps: &[(TargetId, Key)]) {
        let _ = GRAPH.try_with(|graph| {
            if let Ok(mut graph) = graph.try_borrow_mut() {
                graph.effects.remove(&id);
                for (target, key) in deps {
                    graph.remove_edge(*target, key, id);
                }
            }
        });
    }

    /// Remove every edge of the effect, on both sides.
    pub(crate) fn cleanup(effect: &ReactiveEffect) {
        let deps = effect.take_deps();
        if deps.is_empty() {
            return;
        }
        let id = effect.id();
        GRAPH.with(|graph| {
            let mut graph = graph.borrow_mut();
            for (target, key) in &deps {
                graph.remove_edge(*target, key, id);
            }
        });
    }

    /// Drop all dependency sets of a target that no longer exists.
    pub(crate) fn dispose_target(target: TargetId) {
        let removed = GRAPH.try_with(|graph| {
            graph
                .try_borrow_mut()
                .ok()
                .and_then(|mut graph| graph.targets.remove(&target))
        });
        let Ok(Some(deps)) = removed else {
            return;
        };

        let subscribers: IndexSet<SubscriberId> =
            deps.values().flat_map(|set| set.iter().copied()).collect();
        for id in subscribers {
            if let Some(effect) = Runtime::effect(id) {
                effect.forget_target(target);
            }
        }
        trace!(target = target.raw(), "disposed dependency sets");
    }

    fn effect(id: SubscriberId) -> Option<ReactiveEffect> {
        GRAPH
            .try_with(|graph| {
                graph
                    .try_borrow()
                    .ok()
                    .and_then(|graph| graph.effects.get(&id).and_then(Weak::upgrade))
            })
            .ok()
            .flatten()
            .map(ReactiveEffect::from_inner)
    }

    /// Number of effects subscribed to `(target, key)`.
    pub fn dep_count(target: TargetId, key: &Key) -> usize {
        GRAPH.with(|graph| {
            graph
                .borrow()
                .targets
                .get(&target)
                .and_then(|deps| deps.get(key))
                .map_or(0, IndexSet::len)
        })
    }

    /// Whether `effect` is subscribed to `(target, key)`.
    pub fn is_subscribed(target: TargetId, key: &Key, effect: SubscriberId) -> bool {
        GRAPH.with(|graph| {
            graph
                .borrow()
                .targets
                .get(&target)
                .and_then(|deps| deps.get(key))
                .is_some_and(|set| set.contains(&effect))
        })
    }

    /// Whether there is a running effect and tracking is enabled.
    pub fn is_tracking() -> bool {
        context::should_track() && ReactiveContext::is_active()
    }
}

impl DepGraph {
    fn remove_edge(&mut self, target: TargetId, key: &Key, id: SubscriberId) {
        let Some(deps) = self.targets.get_mut(&target) else {
            return;
        };
        if let Some(set) = deps.get_mut(key) {
            set.shift_remove(&id);
            if set.is_empty() {
                deps.remove(key);
            }
        }
        if deps.is_empty() {
            self.targets.remove(&target);
        }
    }
}

/// Record that the running effect read `(target, key)`.
///
/// No-op when no effect is running or tracking is paused. An edge is
/// recorded at most once per `(target, key, effect)` triple.
pub fn track(target: TargetId, op: TrackOp, key: Key) {
    if !context::should_track() {
        return;
    }
    let Some(effect) = ReactiveContext::current() else {
        return;
    };
    let id = effect.id();
    let inserted = GRAPH.with(|graph| {
        graph
            .borrow_mut()
            .targets
            .entry(target)
            .or_default()
            .entry(key.clone())
            .or_default()
            .insert(id)
    });
    if inserted {
        trace!(target = target.raw(), ?op, ?key, effect = id.raw(), "track");
        effect.push_dep(target, key);
    }
}

/// Notify the effects subscribed to a change of `(target, key)`.
///
/// `kind` is the declared kind of the target, or `None` for single-value
/// cells (signals and computed values). `new_value` carries the new length
/// when a sequence's length is set.
pub fn trigger(
    target: TargetId,
    kind: Option<TargetKind>,
    op: TriggerOp,
    key: Option<Key>,
    new_value: Option<&Value>,
    old_value: Option<&Value>,
) {
    let ids = collect_subscribers(target, kind, op, key.as_ref(), new_value);
    if ids.is_empty() {
        return;
    }
    debug!(
        target = target.raw(),
        ?op,
        ?key,
        new = ?new_value,
        old = ?old_value,
        subscribers = ids.len(),
        "trigger"
    );

    let effects: Vec<ReactiveEffect> = ids.into_iter().filter_map(Runtime::effect).collect();
    let running = ReactiveContext::current_subscriber();

    // Computed effects are invalidated before anything that might read them.
    let (computed, plain): (Vec<_>, Vec<_>) =
        effects.into_iter().partition(ReactiveEffect::is_computed);
    for effect in computed.iter().chain(plain.iter()) {
        if !effect.is_active() {
            continue;
        }
        if Some(effect.id()) == running && !effect.allows_recurse() {
            continue;
        }
        effect.trigger();
    }
}

fn collect_subscribers(
    target: TargetId,
    kind: Option<TargetKind>,
    op: TriggerOp,
    key: Option<&Key>,
    new_value: Option<&Value>,
) -> IndexSet<SubscriberId> {
    GRAPH.with(|graph| {
        let graph = graph.borrow();
        let mut ids = IndexSet::new();
        let Some(deps) = graph.targets.get(&target) else {
            return ids;
        };
        let mut add = |set: Option<&DepSet>| {
            if let Some(set) = set {
                ids.extend(set.iter().copied());
            }
        };

        if op == TriggerOp::Clear {
            for set in deps.values() {
                add(Some(set));
            }
        } else if key == Some(&Key::Length) && kind == Some(TargetKind::Sequence) {
            let new_len = new_value
                .and_then(Value::as_number)
                .map_or(0, |n| n.max(0.0) as usize);
            for (k, set) in deps {
                match k {
                    Key::Length => add(Some(set)),
                    Key::Index(i) if *i >= new_len => add(Some(set)),
                    _ => {}
                }
            }
        } else {
            if let Some(k) = key {
                add(deps.get(k));
            }
            match (op, kind) {
                (TriggerOp::Add, Some(TargetKind::Sequence)) => {
                    if matches!(key, Some(Key::Index(_))) {
                        add(deps.get(&Key::Length));
                    }
                }
                (TriggerOp::Add | TriggerOp::Delete, Some(TargetKind::Map)) => {
                    add(deps.get(&Key::Iterate));
                    add(deps.get(&Key::MapKeyIterate));
                }
                (TriggerOp::Add | TriggerOp::Delete, Some(TargetKind::Record | TargetKind::Set)) => {
                    add(deps.get(&Key::Iterate));
                }
                (TriggerOp::Set, Some(TargetKind::Map)) => {
                    add(deps.get(&Key::Iterate));
                }
                _ => {}
            }
        }
        ids
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{EffectOptions, ReactiveEffect};
    use std::cell::Cell;

    fn counting_effect(target: TargetId, key: Key) -> (ReactiveEffect, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let effect = ReactiveEffect::new(
            move || {
                runs_clone.set(runs_clone.get() + 1);
                track(target, TrackOp::Get, key.clone());
            },
            EffectOptions::default(),
        );
        effect.run();
        (effect, runs)
    }

    #[test]
    fn track_is_noop_without_active_effect() {
        let target = TargetId::new();
        track(target, TrackOp::Get, Key::Value);
        assert_eq!(Runtime::dep_count(target, &Key::Value), 0);
    }

    #[test]
    fn track_deduplicates_edges() {
        let target = TargetId::new();
        let effect = ReactiveEffect::new(
            move || {
                track(target, TrackOp::Get, Key::Value);
                track(target, TrackOp::Get, Key::Value);
            },
            EffectOptions::default(),
        );
        effect.run();
        assert_eq!(Runtime::dep_count(target, &Key::Value), 1);
        assert_eq!(effect.dep_count(), 1);
    }

    #[test]
    fn trigger_runs_subscribers() {
        let target = TargetId::new();
        let (_effect, runs) = counting_effect(target, Key::Prop("a".into()));
        assert_eq!(runs.get(), 1);

        trigger(target, Some(TargetKind::Record), TriggerOp::Set, Some(Key::Prop("a".into())), None, None);
        assert_eq!(runs.get(), 2);

        trigger(target, Some(TargetKind::Record), TriggerOp::Set, Some(Key::Prop("b".into())), None, None);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn clear_fires_every_key() {
        let target = TargetId::new();
        let (_a, runs_a) = counting_effect(target, Key::Entry(ValueKey::Null));
        let (_b, runs_b) = counting_effect(target, Key::Iterate);

        trigger(target, Some(TargetKind::Map), TriggerOp::Clear, None, None, None);
        assert_eq!(runs_a.get(), 2);
        assert_eq!(runs_b.get(), 2);
    }

    #[test]
    fn length_change_fires_truncated_indices() {
        let target = TargetId::new();
        let (_low, runs_low) = counting_effect(target, Key::Index(0));
        let (_high, runs_high) = counting_effect(target, Key::Index(3));
        let (_len, runs_len) = counting_effect(target, Key::Length);

        let new_len = Value::from(2);
        trigger(
            target,
            Some(TargetKind::Sequence),
            TriggerOp::Set,
            Some(Key::Length),
            Some(&new_len),
            None,
        );
        assert_eq!(runs_low.get(), 1);
        assert_eq!(runs_high.get(), 2);
        assert_eq!(runs_len.get(), 2);
    }

    #[test]
    fn add_fires_iteration_subscribers() {
        let target = TargetId::new();
        let (_iter, runs) = counting_effect(target, Key::Iterate);

        trigger(target, Some(TargetKind::Record), TriggerOp::Add, Some(Key::Prop("new".into())), None, None);
        assert_eq!(runs.get(), 2);

        trigger(target, Some(TargetKind::Record), TriggerOp::Set, Some(Key::Prop("new".into())), None, None);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn cleanup_removes_both_sides() {
        let target = TargetId::new();
        let (effect, _) = counting_effect(target, Key::Value);
        assert!(Runtime::is_subscribed(target, &Key::Value, effect.id()));

        Runtime::cleanup(&effect);
        assert!(!Runtime::is_subscribed(target, &Key::Value, effect.id()));
        assert_eq!(effect.dep_count(), 0);
    }

    #[test]
    fn dropping_effect_unregisters_it() {
        let target = TargetId::new();
        let (effect, _) = counting_effect(target, Key::Value);
        assert_eq!(Runtime::dep_count(target, &Key::Value), 1);
        drop(effect);
        assert_eq!(Runtime::dep_count(target, &Key::Value), 0);
    }
}
