//! Component instances.
//!
//! An instance is created once per mounted occurrence of a component. It owns
//! the component's reactive state: the props record, the render effect and
//! its scheduler job, the effect scope that collects every watcher and
//! computed created during setup, and the lifecycle hook lists.
//!
//! Instances live in the renderer's instance table. Vnodes refer to them by
//! [`InstanceId`]; children refer to their parent through a weak handle.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::app::AppContext;
use super::definition::{Component, RenderFn};
use crate::error::{Error, ErrorSource, Result};
use crate::reactive::{shallow_reactive, EffectScope, Proxy, ReactiveEffect, Value};
use crate::render::{BlockBuilder, Props, Slots, SuspenseBoundary, VNode};
use crate::scheduler::Job;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonically increasing instance id.
///
/// A child is always created after its parent, so it always has a larger
/// id. The scheduler relies on this to update parents first. Ids are never
/// reused; a `u64` counter does not wrap in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
}

impl LifecycleHook {
    pub fn error_source(self) -> ErrorSource {
        match self {
            LifecycleHook::BeforeMount => ErrorSource::BeforeMountHook,
            LifecycleHook::Mounted => ErrorSource::MountedHook,
            LifecycleHook::BeforeUpdate => ErrorSource::BeforeUpdateHook,
            LifecycleHook::Updated => ErrorSource::UpdatedHook,
            LifecycleHook::BeforeUnmount => ErrorSource::BeforeUnmountHook,
            LifecycleHook::Unmounted => ErrorSource::UnmountedHook,
        }
    }
}

pub type HookFn = Rc<dyn Fn() -> Result<()>>;

/// Called with errors raised by descendants. Returning `true` marks the
/// error handled and stops propagation.
pub type ErrorCapturedHook = Rc<dyn Fn(&Error, Option<InstanceId>, ErrorSource) -> bool>;

pub struct ComponentInstance {
    uid: InstanceId,
    component: Rc<Component>,
    parent: Option<Weak<ComponentInstance>>,
    app: Rc<AppContext>,

    pub(crate) vnode: RefCell<VNode>,
    /// Vnode from a parent re-render, applied before the next render.
    pub(crate) next: RefCell<Option<VNode>>,
    pub(crate) subtree: RefCell<Option<VNode>>,
    pub(crate) effect: RefCell<Option<ReactiveEffect>>,
    pub(crate) update: RefCell<Option<Job>>,
    pub(crate) render: RefCell<Option<RenderFn>>,
    pub(crate) builder: BlockBuilder,
    scope: EffectScope,

    props: Value,
    attrs: RefCell<Props>,
    slots: RefCell<Slots>,
    provides: RefCell<Rc<IndexMap<Rc<str>, Value>>>,
    owns_provides: Cell<bool>,

    hooks: RefCell<HashMap<LifecycleHook, Vec<HookFn>>>,
    error_captured: RefCell<Vec<ErrorCapturedHook>>,
    pub(crate) emitted_once: RefCell<HashSet<Rc<str>>>,

    pub(crate) suspense: Option<Rc<SuspenseBoundary>>,
    pub(crate) suspense_id: u64,
    pub(crate) async_dep: Cell<bool>,
    pub(crate) async_resolved: Cell<bool>,

    is_mounted: Cell<bool>,
    is_unmounted: Cell<bool>,
}

impl ComponentInstance {
    pub(crate) fn new(
        vnode: VNode,
        component: Rc<Component>,
        parent: Option<&Rc<ComponentInstance>>,
        app: Rc<AppContext>,
        suspense: Option<Rc<SuspenseBoundary>>,
    ) -> Rc<Self> {
        let provides = match parent {
            Some(p) => Rc::clone(&p.provides.borrow()),
            None => app.provides(),
        };
        let suspense_id = suspense.as_ref().map_or(0, |s| s.pending_id());
        Rc::new(Self {
            uid: InstanceId::next(),
            component,
            parent: parent.map(Rc::downgrade),
            app,
            vnode: RefCell::new(vnode),
            next: RefCell::new(None),
            subtree: RefCell::new(None),
            effect: RefCell::new(None),
            update: RefCell::new(None),
            render: RefCell::new(None),
            builder: BlockBuilder::new(),
            scope: EffectScope::new(),
            props: shallow_reactive(Value::record(Vec::<(Rc<str>, Value)>::new())),
            attrs: RefCell::new(Props::new()),
            slots: RefCell::new(Slots::new()),
            provides: RefCell::new(provides),
            owns_provides: Cell::new(false),
            hooks: RefCell::new(HashMap::new()),
            error_captured: RefCell::new(Vec::new()),
            emitted_once: RefCell::new(HashSet::new()),
            suspense,
            suspense_id,
            async_dep: Cell::new(false),
            async_resolved: Cell::new(false),
            is_mounted: Cell::new(false),
            is_unmounted: Cell::new(false),
        })
    }

    pub fn uid(&self) -> InstanceId {
        self.uid
    }

    pub fn component(&self) -> &Rc<Component> {
        &self.component
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    pub fn parent(&self) -> Option<Rc<ComponentInstance>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn app(&self) -> &Rc<AppContext> {
        &self.app
    }

    pub fn scope(&self) -> &EffectScope {
        &self.scope
    }

    /// The reactive props record.
    pub fn props(&self) -> &Value {
        &self.props
    }

    pub(crate) fn props_proxy(&self) -> Option<&Proxy> {
        self.props.as_proxy()
    }

    /// Props passed by the parent that the component does not declare.
    pub fn attrs(&self) -> Ref<'_, Props> {
        self.attrs.borrow()
    }

    pub(crate) fn set_attrs(&self, attrs: Props) {
        *self.attrs.borrow_mut() = attrs;
    }

    pub fn slots(&self) -> Slots {
        self.slots.borrow().clone()
    }

    pub(crate) fn set_slots(&self, slots: Slots) {
        *self.slots.borrow_mut() = slots;
    }

    pub fn vnode(&self) -> VNode {
        self.vnode.borrow().clone()
    }

    pub fn subtree(&self) -> Option<VNode> {
        self.subtree.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.is_mounted.get()
    }

    pub(crate) fn set_mounted(&self) {
        self.is_mounted.set(true);
    }

    pub fn is_unmounted(&self) -> bool {
        self.is_unmounted.get()
    }

    pub(crate) fn set_unmounted(&self) {
        self.is_unmounted.set(true);
    }

    pub fn update_job(&self) -> Option<Job> {
        self.update.borrow().clone()
    }

    /// Number of times the render effect has run.
    pub fn render_count(&self) -> usize {
        self.effect.borrow().as_ref().map_or(0, ReactiveEffect::run_count)
    }

    pub(crate) fn add_hook(&self, kind: LifecycleHook, hook: HookFn) {
        self.hooks.borrow_mut().entry(kind).or_default().push(hook);
    }

    pub(crate) fn hooks(&self, kind: LifecycleHook) -> Vec<HookFn> {
        self.hooks.borrow().get(&kind).cloned().unwrap_or_default()
    }

    pub(crate) fn add_error_captured(&self, hook: ErrorCapturedHook) {
        self.error_captured.borrow_mut().push(hook);
    }

    pub(crate) fn error_captured_hooks(&self) -> Vec<ErrorCapturedHook> {
        self.error_captured.borrow().clone()
    }

    /// Provide a value to descendants. The first call copies the inherited
    /// table so siblings of this instance do not see the value.
    pub(crate) fn provide(&self, key: &str, value: Value) {
        let mut provides = self.provides.borrow_mut();
        if !self.owns_provides.replace(true) {
            *provides = Rc::new((**provides).clone());
        }
        Rc::make_mut(&mut *provides).insert(Rc::from(key), value);
    }

    /// Look up a value provided by an ancestor or the app.
    pub(crate) fn inject(&self, key: &str) -> Option<Value> {
        let table = match self.parent() {
            Some(parent) => Rc::clone(&parent.provides.borrow()),
            None => self.app.provides(),
        };
        table.get(key).cloned()
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("uid", &self.uid.0)
            .field("name", &self.name())
            .field("mounted", &self.is_mounted.get())
            .field("unmounted", &self.is_unmounted.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Current instance
// ----------------------------------------------------------------------------

thread_local! {
    static INSTANCE_STACK: RefCell<Vec<Rc<ComponentInstance>>> = const { RefCell::new(Vec::new()) };
}

/// The instance whose setup or render is running.
pub fn current_instance() -> Option<Rc<ComponentInstance>> {
    INSTANCE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Names of the instances being set up or rendered, innermost first.
pub(crate) fn instance_trace() -> Vec<String> {
    let top = INSTANCE_STACK
        .try_with(|stack| stack.try_borrow().ok().and_then(|s| s.last().cloned()))
        .ok()
        .flatten();
    let mut trace = Vec::new();
    let mut cur = top;
    while let Some(instance) = cur {
        trace.push(instance.name().to_string());
        cur = instance.parent();
    }
    trace
}

/// Makes an instance current for as long as the guard lives.
pub(crate) struct InstanceGuard(());

impl InstanceGuard {
    pub(crate) fn enter(instance: &Rc<ComponentInstance>) -> Self {
        INSTANCE_STACK.with(|stack| stack.borrow_mut().push(Rc::clone(instance)));
        Self(())
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let popped = INSTANCE_STACK
            .try_with(|stack| stack.try_borrow_mut().ok().and_then(|mut s| s.pop()))
            .ok()
            .flatten();
        drop(popped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically() {
        let a = InstanceId::next();
        let b = InstanceId::next();
        assert!(b > a);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn hooks_map_to_error_sources() {
        assert_eq!(LifecycleHook::Mounted.error_source(), ErrorSource::MountedHook);
        assert_eq!(LifecycleHook::BeforeUnmount.error_source(), ErrorSource::BeforeUnmountHook);
    }
}
