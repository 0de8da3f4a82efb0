//! Setup and render contexts.
//!
//! [`SetupContext`] is what a component's `setup` receives: its props,
//! attrs, slots, `emit`, lifecycle registration and provide/inject.
//! [`RenderContext`] is what a render function receives on every render.

use std::rc::Rc;

use super::definition::{AsyncRender, RenderFn, SetupOutcome};
use super::emit;
use super::error_handling::call_with_error_handling;
use super::instance::{
    current_instance, ComponentInstance, ErrorCapturedHook, InstanceGuard, InstanceId,
    LifecycleHook,
};
use super::props::init_props;
use super::warning::warn;
use crate::error::{Error, ErrorSource, Result};
use crate::reactive::{shallow_readonly, TrackingGuard, Value};
use crate::render::{BlockBuilder, Props, Slots, VNode};

/// Handed to `setup`, once per instance.
pub struct SetupContext {
    instance: Rc<ComponentInstance>,
}

impl SetupContext {
    pub(crate) fn new(instance: &Rc<ComponentInstance>) -> Self {
        Self {
            instance: Rc::clone(instance),
        }
    }

    pub fn instance(&self) -> &Rc<ComponentInstance> {
        &self.instance
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance.uid()
    }

    /// Readonly view of the props record. Reads through it are tracked.
    pub fn props(&self) -> Value {
        shallow_readonly(self.instance.props().clone())
    }

    /// Tracked read of a single prop.
    pub fn prop(&self, key: &str) -> Value {
        read_prop(&self.instance, key)
    }

    pub fn attrs(&self) -> Props {
        self.instance.attrs().clone()
    }

    pub fn slots(&self) -> Slots {
        self.instance.slots()
    }

    pub fn emit(&self, event: &str, args: &[Value]) -> Result<()> {
        emit::emit(&self.instance, event, args)
    }

    pub fn on_before_mount(&self, f: impl Fn() -> Result<()> + 'static) {
        self.instance.add_hook(LifecycleHook::BeforeMount, Rc::new(f));
    }

    pub fn on_mounted(&self, f: impl Fn() -> Result<()> + 'static) {
        self.instance.add_hook(LifecycleHook::Mounted, Rc::new(f));
    }

    pub fn on_before_update(&self, f: impl Fn() -> Result<()> + 'static) {
        self.instance.add_hook(LifecycleHook::BeforeUpdate, Rc::new(f));
    }

    pub fn on_updated(&self, f: impl Fn() -> Result<()> + 'static) {
        self.instance.add_hook(LifecycleHook::Updated, Rc::new(f));
    }

    pub fn on_before_unmount(&self, f: impl Fn() -> Result<()> + 'static) {
        self.instance.add_hook(LifecycleHook::BeforeUnmount, Rc::new(f));
    }

    pub fn on_unmounted(&self, f: impl Fn() -> Result<()> + 'static) {
        self.instance.add_hook(LifecycleHook::Unmounted, Rc::new(f));
    }

    /// Receive errors from descendants. Return `true` to stop propagation.
    pub fn on_error_captured<F>(&self, f: F)
    where
        F: Fn(&Error, Option<InstanceId>, ErrorSource) -> bool + 'static,
    {
        let hook: ErrorCapturedHook = Rc::new(f);
        self.instance.add_error_captured(hook);
    }

    pub fn provide(&self, key: &str, value: impl Into<Value>) {
        self.instance.provide(key, value.into());
    }

    pub fn inject(&self, key: &str) -> Option<Value> {
        let found = self.instance.inject(key);
        if found.is_none() {
            warn(format!("injection \"{key}\" not found."));
        }
        found
    }

    /// Like [`inject`](Self::inject), without the warning.
    pub fn inject_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.instance.inject(key).unwrap_or_else(|| default.into())
    }

    pub fn global_properties(&self) -> Value {
        self.instance.app().config().global_properties.clone()
    }
}

/// Handed to the render function on every render.
pub struct RenderContext<'a> {
    instance: &'a Rc<ComponentInstance>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(instance: &'a Rc<ComponentInstance>) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &Rc<ComponentInstance> {
        self.instance
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance.uid()
    }

    pub fn props(&self) -> Value {
        shallow_readonly(self.instance.props().clone())
    }

    pub fn prop(&self, key: &str) -> Value {
        read_prop(self.instance, key)
    }

    pub fn attrs(&self) -> Props {
        self.instance.attrs().clone()
    }

    pub fn slots(&self) -> Slots {
        self.instance.slots()
    }

    /// Render slot `name`. Missing slots render nothing.
    pub fn slot(&self, name: &str, props: &Value) -> Vec<VNode> {
        self.instance.slots().render(name, props)
    }

    pub fn emit(&self, event: &str, args: &[Value]) -> Result<()> {
        emit::emit(self.instance, event, args)
    }

    /// Block builder for compiled-style render functions.
    pub fn builder(&self) -> &BlockBuilder {
        &self.instance.builder
    }

    pub fn global_properties(&self) -> Value {
        self.instance.app().config().global_properties.clone()
    }
}

fn read_prop(instance: &ComponentInstance, key: &str) -> Value {
    instance
        .props_proxy()
        .map_or(Value::Null, |proxy| proxy.get_prop(key))
}

// ----------------------------------------------------------------------------
// Hook registration on the current instance
// ----------------------------------------------------------------------------

fn register(kind: LifecycleHook, hook: Rc<dyn Fn() -> Result<()>>) {
    match current_instance() {
        Some(instance) => instance.add_hook(kind, hook),
        None => warn(format!(
            "{kind:?} hook registered outside of a component setup; it will never run."
        )),
    }
}

pub fn on_before_mount(f: impl Fn() -> Result<()> + 'static) {
    register(LifecycleHook::BeforeMount, Rc::new(f));
}

pub fn on_mounted(f: impl Fn() -> Result<()> + 'static) {
    register(LifecycleHook::Mounted, Rc::new(f));
}

pub fn on_before_update(f: impl Fn() -> Result<()> + 'static) {
    register(LifecycleHook::BeforeUpdate, Rc::new(f));
}

pub fn on_updated(f: impl Fn() -> Result<()> + 'static) {
    register(LifecycleHook::Updated, Rc::new(f));
}

pub fn on_before_unmount(f: impl Fn() -> Result<()> + 'static) {
    register(LifecycleHook::BeforeUnmount, Rc::new(f));
}

pub fn on_unmounted(f: impl Fn() -> Result<()> + 'static) {
    register(LifecycleHook::Unmounted, Rc::new(f));
}

// ----------------------------------------------------------------------------
// Setup
// ----------------------------------------------------------------------------

pub(crate) enum SetupState {
    Ready,
    /// Setup returned a future; the render function arrives later.
    Pending(AsyncRender),
}

/// Initialize props and slots, then run setup.
///
/// A failing setup is routed through the error chain; if handled, the
/// component renders nothing.
pub(crate) fn setup_component(instance: &Rc<ComponentInstance>) -> Result<SetupState> {
    let vnode = instance.vnode();
    init_props(instance, &vnode);

    let component = Rc::clone(instance.component());
    let setup = match component.setup_fn() {
        Some(setup) if !component.is_functional() => Rc::clone(setup),
        _ => {
            *instance.render.borrow_mut() = component.render_fn().cloned();
            if instance.render.borrow().is_none() {
                warn(format!("Component \"{}\" is missing a render function.", component.name()));
            }
            return Ok(SetupState::Ready);
        }
    };

    let ctx = SetupContext::new(instance);
    let outcome = {
        let _current = InstanceGuard::enter(instance);
        let _paused = TrackingGuard::pause();
        instance
            .scope()
            .run(|| call_with_error_handling(|| setup(&ctx), Some(instance), ErrorSource::SetupFunction))
            .unwrap_or(Ok(None))?
    };

    match outcome {
        Some(SetupOutcome::Render(render)) => {
            *instance.render.borrow_mut() = Some(render);
            Ok(SetupState::Ready)
        }
        Some(SetupOutcome::Pending(fut)) => {
            instance.async_dep.set(true);
            Ok(SetupState::Pending(fut))
        }
        None => {
            *instance.render.borrow_mut() = component.render_fn().cloned();
            Ok(SetupState::Ready)
        }
    }
}

/// Install the render function produced by an async setup.
pub(crate) fn finish_async_setup(instance: &ComponentInstance, render: RenderFn) {
    instance.async_resolved.set(true);
    *instance.render.borrow_mut() = Some(render);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{App, Component};
    use crate::render::{h, TestHost};
    use std::cell::Cell;

    #[test]
    fn hooks_outside_setup_are_ignored() {
        assert!(current_instance().is_none());
        on_mounted(|| panic!("never runs"));
    }

    #[test]
    fn setup_context_reads_props_and_injections() {
        let seen = Rc::new(Cell::new(0.0));
        let sink = Rc::clone(&seen);
        let child = Component::new("Child")
            .prop("count")
            .setup(move |ctx| {
                let base = ctx.inject_or("base", 0).as_number().unwrap_or_default();
                sink.set(base + ctx.prop("count").as_number().unwrap_or_default());
                Ok(SetupOutcome::render(|_| Ok(h("i", None, ()))))
            })
            .build();
        let parent = Component::new("Parent")
            .setup(move |ctx| {
                ctx.provide("base", 10);
                let child = Rc::clone(&child);
                Ok(SetupOutcome::render(move |_| {
                    Ok(h(&child, Some(crate::props! { "count" => 2 }), ()))
                }))
            })
            .build();
        let host = TestHost::new();
        let root = host.root();
        let _app = App::new(parent).mount(host, root).unwrap();
        assert_eq!(seen.get(), 12.0);
    }
}
