//! Component mounting and updates.
//!
//! Each mounted component gets a render effect. Its first run mounts the
//! rendered subtree; later runs, scheduled through the instance's update
//! job, re-render and patch the previous subtree.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, debug_span, trace};

use super::flags::ShapeFlags;
use super::host::{HostNode, HostOps};
use super::renderer::{PatchScope, Renderer};
use super::suspense::SuspenseBoundary;
use super::vnode::{clone_if_mounted, clone_vnode, comment, is_event_key, Props, VNode, VNodeType};
use crate::component::{
    call_with_error_handling, setup_component, should_update_component, update_props,
    update_slots, warn, ComponentInstance, InstanceGuard, LifecycleHook, RenderContext,
    SetupState,
};
use crate::error::{Error, ErrorSource, Result};
use crate::reactive::{EffectOptions, ReactiveEffect, TrackingGuard};
use crate::scheduler::{flush_pre_flush_cbs, invalidate_job, queue_job, Job};

/// Where a component's first render goes. Taken by the first run of the
/// render effect.
type MountTarget = Cell<Option<(HostNode, Option<HostNode>)>>;

impl<H: HostOps + 'static> Renderer<H> {
    pub(crate) fn process_component(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        match n1 {
            None => self.mount_component(n2, container, anchor, scope),
            Some(n1) => self.update_component(n1, n2, optimized),
        }
    }

    fn mount_component(
        &self,
        vnode: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
    ) {
        let Some(component) = vnode.as_component().cloned() else {
            return;
        };
        let app = match scope.parent {
            Some(parent) => Rc::clone(parent.app()),
            None => Rc::clone(&self.0.app),
        };
        let instance = ComponentInstance::new(
            vnode.clone(),
            component,
            scope.parent,
            app,
            scope.suspense.cloned(),
        );
        vnode.set_component(Some(instance.uid()));
        self.0
            .instances
            .borrow_mut()
            .insert(instance.uid(), Rc::clone(&instance));
        debug!(component = instance.name(), uid = instance.uid().raw(), "mounting component");

        let state = match setup_component(&instance) {
            Ok(state) => state,
            Err(err) => {
                self.report(Err(err));
                SetupState::Ready
            }
        };

        match state {
            SetupState::Ready => self.setup_render_effect(&instance, container, anchor),
            SetupState::Pending(pending) => {
                // Hold the component's place until setup resolves.
                let placeholder = comment("");
                let el = self.0.host.create_comment("");
                placeholder.set_el(Some(el));
                self.0.host.insert(el, container, anchor);
                vnode.set_el(Some(el));
                *instance.subtree.borrow_mut() = Some(placeholder);

                match scope.suspense {
                    Some(boundary) => self.register_dep(boundary, &instance, pending),
                    None => self.report(Err(Error::AsyncSetupWithoutSuspense {
                        component: instance.name().to_string(),
                    })),
                }
            }
        }
    }

    /// Create the instance's render effect and update job, then run the
    /// effect once to mount the component before `anchor` in `container`.
    pub(crate) fn setup_render_effect(
        &self,
        instance: &Rc<ComponentInstance>,
        container: HostNode,
        anchor: Option<HostNode>,
    ) {
        let renderer = self.downgrade();
        let owner = Rc::downgrade(instance);
        let scheduled = Rc::downgrade(instance);
        let target: MountTarget = Cell::new(Some((container, anchor)));

        let effect = instance.scope().run(|| {
            ReactiveEffect::new(
                move || {
                    let (Some(renderer), Some(instance)) =
                        (Renderer::upgrade(&renderer), owner.upgrade())
                    else {
                        return;
                    };
                    renderer.component_effect(&instance, &target);
                },
                EffectOptions {
                    allow_recurse: true,
                    scheduler: Some(Rc::new(move |_: &ReactiveEffect| {
                        if let Some(job) = scheduled.upgrade().and_then(|i| i.update_job()) {
                            queue_job(job);
                        }
                    })),
                    ..Default::default()
                },
            )
        });
        let Some(effect) = effect else {
            trace!(component = instance.name(), "scope already stopped, not rendering");
            return;
        };

        let weak_effect = effect.downgrade();
        let renderer = self.downgrade();
        let job = Job::with_id(instance.uid().raw(), move || {
            if let Some(effect) = weak_effect.upgrade() {
                effect.run();
            }
            match Renderer::upgrade(&renderer).and_then(|r| r.take_error()) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        });
        job.set_allow_recurse(true);

        *instance.effect.borrow_mut() = Some(effect.clone());
        *instance.update.borrow_mut() = Some(job);
        effect.run();
    }

    /// Body of a component's render effect.
    fn component_effect(&self, instance: &Rc<ComponentInstance>, target: &MountTarget) {
        let _span = instance
            .app()
            .config()
            .performance
            .then(|| debug_span!("render", component = instance.name(), uid = instance.uid().raw()).entered());
        let suspense = instance.suspense.clone();
        let scope = PatchScope::new(Some(instance), suspense.as_ref());

        if !instance.is_mounted() {
            let Some((container, anchor)) = target.take() else {
                return;
            };
            self.call_hooks(instance, LifecycleHook::BeforeMount);
            let tree = self.render_component_root(instance);
            self.patch(None, &tree, container, anchor, scope, false);
            instance.vnode().set_el(tree.el());
            *instance.subtree.borrow_mut() = Some(tree);
            self.queue_hooks(instance, LifecycleHook::Mounted);
            instance.set_mounted();
            return;
        }

        let next = instance.next.borrow_mut().take();
        let vnode = match next.as_ref() {
            Some(next) => {
                next.set_el(instance.vnode().el());
                self.update_component_pre_render(instance, next);
                next.clone()
            }
            None => instance.vnode(),
        };

        self.call_hooks(instance, LifecycleHook::BeforeUpdate);
        let next_tree = self.render_component_root(instance);
        let prev_tree = instance.subtree();

        let container = prev_tree
            .as_ref()
            .and_then(VNode::el)
            .and_then(|el| self.0.host.parent_node(el));
        let Some(container) = container else {
            debug!(component = instance.name(), "previous tree is detached, skipping update");
            return;
        };
        let anchor = prev_tree.as_ref().and_then(|tree| self.next_host_node(tree));
        self.patch(prev_tree.as_ref(), &next_tree, container, anchor, scope, false);

        vnode.set_el(next_tree.el());
        let el = next_tree.el();
        *instance.subtree.borrow_mut() = Some(next_tree);
        if next.is_none() {
            // Self-triggered update: the root element may have changed.
            self.update_hoc_host_el(instance, el);
        }
        self.queue_hooks(instance, LifecycleHook::Updated);
    }

    fn update_component_pre_render(&self, instance: &Rc<ComponentInstance>, next: &VNode) {
        next.set_component(Some(instance.uid()));
        *instance.vnode.borrow_mut() = next.clone();
        instance.next.borrow_mut().take();
        update_props(instance, next);
        update_slots(instance, next);

        let job = instance.update_job();
        // Prop writes above re-queue this very update; it is running now.
        if let Some(job) = &job {
            invalidate_job(job);
        }
        self.report(flush_pre_flush_cbs(job.as_ref()));
    }

    fn update_component(&self, n1: &VNode, n2: &VNode, optimized: bool) {
        let Some(instance) = n1.component().and_then(|id| self.instance(id)) else {
            return;
        };
        n2.set_component(Some(instance.uid()));

        if !should_update_component(n1, n2, optimized) {
            trace!(component = instance.name(), "props unchanged, reusing subtree");
            n2.set_el(n1.el());
            *instance.vnode.borrow_mut() = n2.clone();
            return;
        }

        if instance.async_dep.get() && !instance.async_resolved.get() {
            // Still waiting on setup: only record the new props.
            self.update_component_pre_render(&instance, n2);
            return;
        }

        *instance.next.borrow_mut() = Some(n2.clone());
        if let Some(job) = instance.update_job() {
            // The child may already be queued; it is updated right here.
            invalidate_job(&job);
        }
        let effect = instance.effect.borrow().clone();
        if let Some(effect) = effect {
            effect.run();
        }
    }

    /// Propagate a new root element up through parents whose whole subtree
    /// is this component.
    pub(crate) fn update_hoc_host_el(&self, instance: &Rc<ComponentInstance>, el: Option<HostNode>) {
        let mut vnode = instance.vnode();
        let mut parent = instance.parent();
        while let Some(p) = parent {
            let is_root = p.subtree().is_some_and(|tree| tree.ptr_eq(&vnode));
            if !is_root {
                break;
            }
            vnode = p.vnode();
            vnode.set_el(el);
            parent = p.parent();
        }
    }

    /// Run the render function and apply fallthrough attrs, directives and
    /// transition of the component vnode to the root.
    fn render_component_root(&self, instance: &Rc<ComponentInstance>) -> VNode {
        let _current = InstanceGuard::enter(instance);
        let render = instance.render.borrow().clone();
        let rendered = match render {
            Some(render) => {
                let ctx = RenderContext::new(instance);
                call_with_error_handling(|| render(&ctx), Some(instance), ErrorSource::RenderFunction)
            }
            None => Ok(None),
        };
        let mut root = match rendered {
            Ok(Some(root)) => clone_if_mounted(&root),
            Ok(None) => comment(""),
            Err(err) => {
                self.report(Err(err));
                comment("")
            }
        };

        let component = instance.component();
        let attrs = instance.attrs().clone();
        if component.inherits_attrs() && !attrs.is_empty() {
            let fallthrough: Props = if component.is_functional() && component.declared_props().is_empty() {
                attrs
                    .into_iter()
                    .filter(|(key, _)| &**key == "class" || &**key == "style" || is_event_key(key))
                    .collect()
            } else {
                attrs
            };
            if !fallthrough.is_empty() {
                if root.shape().intersects(ShapeFlags::ELEMENT | ShapeFlags::COMPONENT) {
                    root = clone_vnode(&root, Some(&fallthrough));
                } else if !matches!(root.ty(), VNodeType::Comment) {
                    let keys = fallthrough.keys().map(|k| &**k).collect::<Vec<_>>().join(", ");
                    warn(format!(
                        "Extraneous non-props attributes ({keys}) were passed to component but could not be automatically inherited because component renders fragment or text root nodes."
                    ));
                }
            }
        }

        let vnode = instance.vnode();
        if !vnode.dirs().is_empty() {
            let inherited = vnode.dirs().clone();
            root.dirs_mut().extend(inherited);
        }
        if let Some(transition) = vnode.transition() {
            root = root.with_transition(transition);
        }
        root
    }

    pub(crate) fn call_hooks(&self, instance: &Rc<ComponentInstance>, kind: LifecycleHook) {
        self.report(run_hooks(instance, kind));
    }

    fn queue_hooks(&self, instance: &Rc<ComponentInstance>, kind: LifecycleHook) {
        if instance.hooks(kind).is_empty() {
            return;
        }
        let owner = Rc::clone(instance);
        self.queue_post_render(Job::new(move || run_hooks(&owner, kind)), instance.suspense.as_ref());
    }

    /// Tear a component down: hooks, effects, then its subtree.
    pub(crate) fn unmount_component(
        &self,
        instance: &Rc<ComponentInstance>,
        parent_suspense: Option<&Rc<SuspenseBoundary>>,
        do_remove: bool,
    ) {
        debug!(component = instance.name(), uid = instance.uid().raw(), "unmounting component");
        self.call_hooks(instance, LifecycleHook::BeforeUnmount);

        instance.scope().stop();
        if let Some(job) = instance.update_job() {
            job.set_active(false);
        }
        if let Some(tree) = instance.subtree() {
            self.unmount(&tree, PatchScope::new(Some(instance), parent_suspense), do_remove, false);
        }

        let owner = Rc::clone(instance);
        self.queue_post_render(
            Job::new(move || {
                let result = run_hooks(&owner, LifecycleHook::Unmounted);
                owner.set_unmounted();
                result
            }),
            parent_suspense,
        );
        self.0.instances.borrow_mut().remove(&instance.uid());

        // An unresolved async child no longer holds up its boundary.
        if let Some(boundary) = parent_suspense {
            let waiting = boundary.is_pending()
                && !boundary.is_unmounted()
                && instance.async_dep.get()
                && !instance.async_resolved.get()
                && instance.suspense_id == boundary.pending_id();
            if waiting && boundary.release_dep() {
                self.resolve_suspense(boundary, false);
            }
        }
    }
}

/// Run every `kind` hook of `instance`; a failing hook does not stop the
/// others.
fn run_hooks(instance: &Rc<ComponentInstance>, kind: LifecycleHook) -> Result<()> {
    let hooks = instance.hooks(kind);
    let mut first = None;
    for hook in hooks {
        let _current = InstanceGuard::enter(instance);
        let _paused = TrackingGuard::pause();
        if let Err(err) = call_with_error_handling(|| hook(), Some(instance), kind.error_source()) {
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{App, Component, SetupOutcome};
    use crate::props;
    use crate::reactive::{Signal, Value};
    use crate::render::{h, TestHost};
    use crate::scheduler::flush_jobs;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logged(name: &'static str, log: &Log, child: Option<Rc<Component>>) -> Rc<Component> {
        let log = Rc::clone(log);
        Component::new(name)
            .setup(move |ctx| {
                for (kind, label) in [
                    (LifecycleHook::BeforeMount, "before_mount"),
                    (LifecycleHook::Mounted, "mounted"),
                    (LifecycleHook::BeforeUnmount, "before_unmount"),
                    (LifecycleHook::Unmounted, "unmounted"),
                ] {
                    let log = Rc::clone(&log);
                    ctx.instance()
                        .add_hook(kind, Rc::new(move || {
                            log.borrow_mut().push(format!("{name}:{label}"));
                            Ok(())
                        }));
                }
                let child = child.clone();
                Ok(SetupOutcome::render(move |_| {
                    Ok(match &child {
                        Some(child) => h("div", None, vec![h(child, None, ())]),
                        None => h("span", None, name),
                    })
                }))
            })
            .build()
    }

    #[test]
    fn hooks_run_parent_before_child_then_child_first() {
        let log: Log = Rc::default();
        let child = logged("child", &log, None);
        let parent = logged("parent", &log, Some(child));
        let host = TestHost::new();
        let root = host.root();
        let app = App::new(parent).mount(host, root).unwrap();
        app.unmount().unwrap();
        assert_eq!(
            *log.borrow(),
            [
                "parent:before_mount",
                "child:before_mount",
                "child:mounted",
                "parent:mounted",
                "parent:before_unmount",
                "child:before_unmount",
                "child:unmounted",
                "parent:unmounted",
            ]
        );
    }

    #[test]
    fn state_change_rerenders_once_per_flush() {
        let count = Signal::new(Value::from(0));
        let source = count.clone();
        let counter = Component::new("Counter")
            .render(move |_| Ok(h("p", None, source.get().to_display_string())))
            .build();
        let host = TestHost::new();
        let root = host.root();
        let app = App::new(counter).mount(host, root).unwrap();
        let instance = app.root_instance().unwrap();
        assert_eq!(instance.render_count(), 1);

        count.set(Value::from(1));
        count.set(Value::from(2));
        assert_eq!(app.host().inner_html(root), "<p>0</p>");
        flush_jobs().unwrap();
        assert_eq!(instance.render_count(), 2);
        assert_eq!(app.host().inner_html(root), "<p>2</p>");
    }

    #[test]
    fn attrs_fall_through_to_the_root_element() {
        let button = Component::new("Button")
            .prop("label")
            .render(|ctx| Ok(h("button", Some(props! { "class" => "btn" }), ctx.prop("label").to_display_string())))
            .build();
        let parent = Component::new("Parent")
            .render(move |_| {
                Ok(h(&button, Some(props! { "label" => "ok", "class" => "wide", "id" => "b" }), ()))
            })
            .build();
        let host = TestHost::new();
        let root = host.root();
        let app = App::new(parent).mount(host, root).unwrap();
        assert_eq!(
            app.host().inner_html(root),
            "<button class=\"btn wide\" id=\"b\">ok</button>"
        );
    }

    #[test]
    fn render_errors_surface_and_leave_a_placeholder() {
        let broken = Component::new("Broken")
            .render(|_| Err(Error::user("render failed")))
            .build();
        let host = TestHost::new();
        let root = host.root();
        let result = App::new(broken).mount(host, root);
        assert!(matches!(result, Err(Error::User(m)) if m == "render failed"));
    }

    #[test]
    fn parent_rerender_with_same_props_skips_child() {
        let tick = Signal::new(Value::from(0));
        let source = tick.clone();
        let child = Component::new("Child")
            .prop("n")
            .render(|ctx| Ok(h("i", None, ctx.prop("n").to_display_string())))
            .build();
        let child_def = Rc::clone(&child);
        let parent = Component::new("Parent")
            .render(move |_| {
                let t = source.get();
                Ok(h("div", None, vec![text_of(&t), h(&child_def, Some(props! { "n" => 1 }), ())]))
            })
            .build();
        let host = TestHost::new();
        let root = host.root();
        let app = App::new(parent).mount(host, root).unwrap();
        let renderer = app.renderer();
        let child_id = app
            .root_instance()
            .and_then(|p| p.subtree())
            .and_then(|tree| tree.children().as_array().and_then(|c| c.get(1)))
            .and_then(|v| v.component())
            .unwrap();
        tick.set(Value::from(1));
        flush_jobs().unwrap();
        assert_eq!(renderer.instance(child_id).unwrap().render_count(), 1);
        assert_eq!(app.host().inner_html(root), "<div>1<i>1</i></div>");
    }

    fn text_of(value: &Value) -> VNode {
        crate::render::text(&value.to_display_string())
    }
}
