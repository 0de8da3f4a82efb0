//! Suspense boundaries.
//!
//! A suspense vnode renders its content branch into a detached container
//! first. Every component with an async setup inside the content registers
//! as a dependency of the nearest boundary. While dependencies are
//! outstanding the fallback branch is shown; once the last one resolves the
//! content is moved into place and the fallback unmounted.
//!
//! Post-render work queued by the pending content (mounted hooks, directive
//! hooks, refs) is buffered on the boundary and only released when the
//! content becomes visible.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, error, trace};

use super::host::{HostNode, HostOps};
use super::renderer::{MoveType, PatchScope, Renderer};
use super::vnode::{clone_if_mounted, is_same_vnode_type, VNode};
use crate::component::{
    call_with_async_error_handling, finish_async_setup, handle_error, AsyncRender,
    ComponentInstance,
};
use crate::error::{ErrorSource, Result};
use crate::scheduler::{flush_jobs, queue_post_flush_cbs, Job};

static NEXT_PENDING_ID: AtomicU64 = AtomicU64::new(1);

fn next_pending_id() -> u64 {
    NEXT_PENDING_ID.fetch_add(1, Ordering::Relaxed)
}

/// Mount-time state of one suspense vnode.
pub struct SuspenseBoundary {
    vnode: RefCell<VNode>,
    parent: Option<Rc<SuspenseBoundary>>,
    parent_instance: Option<Weak<ComponentInstance>>,
    container: Cell<HostNode>,
    hidden_container: Cell<HostNode>,
    anchor: Cell<Option<HostNode>>,
    active_branch: RefCell<Option<VNode>>,
    pending_branch: RefCell<Option<VNode>>,
    deps: Cell<usize>,
    pending_id: Cell<u64>,
    is_in_fallback: Cell<bool>,
    is_unmounted: Cell<bool>,
    effects: RefCell<Vec<Job>>,
}

impl SuspenseBoundary {
    /// Id of the current pending branch. Async setups started for an older
    /// branch are discarded when they resolve.
    pub fn pending_id(&self) -> u64 {
        self.pending_id.get()
    }

    /// Content is still waiting on async dependencies.
    pub fn is_pending(&self) -> bool {
        self.pending_branch.borrow().is_some()
    }

    pub fn is_in_fallback(&self) -> bool {
        self.is_in_fallback.get()
    }

    pub fn is_unmounted(&self) -> bool {
        self.is_unmounted.get()
    }

    /// Outstanding async dependencies.
    pub fn deps(&self) -> usize {
        self.deps.get()
    }

    pub(crate) fn push_effect(&self, job: Job) {
        self.effects.borrow_mut().push(job);
    }

    /// Drop one dependency. Returns `true` when none are left.
    pub(crate) fn release_dep(&self) -> bool {
        let left = self.deps.get().saturating_sub(1);
        self.deps.set(left);
        left == 0
    }

    fn vnode(&self) -> VNode {
        self.vnode.borrow().clone()
    }

    fn active_branch(&self) -> Option<VNode> {
        self.active_branch.borrow().clone()
    }

    fn pending_branch(&self) -> Option<VNode> {
        self.pending_branch.borrow().clone()
    }

    fn parent_instance(&self) -> Option<Rc<ComponentInstance>> {
        self.parent_instance.as_ref().and_then(Weak::upgrade)
    }

    /// Scope for branches patched inside this boundary.
    fn with_scope<R>(self: &Rc<Self>, f: impl FnOnce(PatchScope<'_>) -> R) -> R {
        let parent = self.parent_instance();
        f(PatchScope::new(parent.as_ref(), Some(self)))
    }
}

impl fmt::Debug for SuspenseBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspenseBoundary")
            .field("pending_id", &self.pending_id.get())
            .field("deps", &self.deps.get())
            .field("pending", &self.is_pending())
            .field("in_fallback", &self.is_in_fallback.get())
            .finish()
    }
}

/// Content and fallback children of a suspense vnode.
fn branches(vnode: &VNode) -> Option<(VNode, VNode)> {
    let children = vnode.children().as_array()?;
    let take = |index: usize| {
        let child = clone_if_mounted(&children.get(index)?);
        children.set(index, child.clone());
        Some(child)
    };
    let content = take(0)?;
    let fallback = take(1)?;
    Some((content, fallback))
}

/// Call an `onResolve`/`onPending`/`onFallback` prop of the suspense vnode.
fn trigger_event(vnode: &VNode, instance: Option<&Rc<ComponentInstance>>, name: &str) -> Result<()> {
    match vnode.prop(name) {
        Some(handler) => {
            call_with_async_error_handling(handler, &[], instance, ErrorSource::ComponentEventHandler)
        }
        None => Ok(()),
    }
}

impl<H: HostOps + 'static> Renderer<H> {
    pub(crate) fn process_suspense(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        _optimized: bool,
    ) {
        match n1 {
            None => self.mount_suspense(n2, container, anchor, scope),
            Some(n1) => self.patch_suspense(n1, n2, container, anchor, scope),
        }
    }

    fn mount_suspense(
        &self,
        vnode: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
    ) {
        let Some((content, fallback)) = branches(vnode) else {
            return;
        };
        let hidden = self.0.host.create_element("div");
        let boundary = Rc::new(SuspenseBoundary {
            vnode: RefCell::new(vnode.clone()),
            parent: scope.suspense.cloned(),
            parent_instance: scope.parent.map(Rc::downgrade),
            container: Cell::new(container),
            hidden_container: Cell::new(hidden),
            anchor: Cell::new(anchor),
            active_branch: RefCell::new(None),
            pending_branch: RefCell::new(Some(content.clone())),
            deps: Cell::new(0),
            pending_id: Cell::new(next_pending_id()),
            is_in_fallback: Cell::new(true),
            is_unmounted: Cell::new(false),
            effects: RefCell::new(Vec::new()),
        });
        vnode.set_suspense(Some(Rc::clone(&boundary)));

        // Mount the content off-screen; async setups register as deps.
        self.patch(None, &content, hidden, None, PatchScope::new(scope.parent, Some(&boundary)), false);

        if boundary.deps() > 0 {
            debug!(deps = boundary.deps(), "suspense pending, showing fallback");
            self.report(trigger_event(vnode, scope.parent, "onPending"));
            self.report(trigger_event(vnode, scope.parent, "onFallback"));
            self.patch(None, &fallback, container, anchor, scope.without_suspense(), false);
            self.set_active_branch(&boundary, &fallback);
        } else {
            self.resolve_suspense(&boundary, false);
        }
    }

    fn patch_suspense(
        &self,
        n1: &VNode,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
    ) {
        let Some(boundary) = n1.suspense() else {
            return;
        };
        n2.set_suspense(Some(Rc::clone(&boundary)));
        *boundary.vnode.borrow_mut() = n2.clone();
        n2.set_el(n1.el());

        let Some((new_branch, new_fallback)) = branches(n2) else {
            return;
        };
        let active = boundary.active_branch();
        let in_fallback = boundary.is_in_fallback();
        let inner = PatchScope::new(scope.parent, Some(&boundary));
        let outer = scope.without_suspense();

        if let Some(pending) = boundary.pending_branch() {
            *boundary.pending_branch.borrow_mut() = Some(new_branch.clone());
            if is_same_vnode_type(&new_branch, &pending) {
                // Same content root, still waiting: patch it off-screen.
                self.patch(Some(&pending), &new_branch, boundary.hidden_container.get(), None, inner, false);
                if boundary.deps() == 0 {
                    self.resolve_suspense(&boundary, false);
                } else if in_fallback {
                    self.patch(active.as_ref(), &new_fallback, container, anchor, outer, false);
                    self.set_active_branch(&boundary, &new_fallback);
                }
                return;
            }

            // Content switched before the previous branch resolved.
            boundary.pending_id.set(next_pending_id());
            self.unmount(&pending, inner, false, false);
            boundary.deps.set(0);
            boundary.effects.borrow_mut().clear();
            boundary.hidden_container.set(self.0.host.create_element("div"));

            if in_fallback {
                self.patch(None, &new_branch, boundary.hidden_container.get(), None, inner, false);
                if boundary.deps() == 0 {
                    self.resolve_suspense(&boundary, false);
                } else {
                    self.patch(active.as_ref(), &new_fallback, container, anchor, outer, false);
                    self.set_active_branch(&boundary, &new_fallback);
                }
            } else if let Some(active) = active.filter(|a| is_same_vnode_type(&new_branch, a)) {
                // Toggled back to what is on screen.
                self.patch(Some(&active), &new_branch, container, anchor, inner, false);
                self.resolve_suspense(&boundary, true);
            } else {
                self.patch(None, &new_branch, boundary.hidden_container.get(), None, inner, false);
                if boundary.deps() == 0 {
                    self.resolve_suspense(&boundary, false);
                }
            }
            return;
        }

        if let Some(active) = active.filter(|a| is_same_vnode_type(&new_branch, a)) {
            self.patch(Some(&active), &new_branch, container, anchor, inner, false);
            self.set_active_branch(&boundary, &new_branch);
            return;
        }

        // New content root: render it off-screen, keep the old one visible.
        self.report(trigger_event(n2, scope.parent, "onPending"));
        *boundary.pending_branch.borrow_mut() = Some(new_branch.clone());
        boundary.pending_id.set(next_pending_id());
        self.patch(None, &new_branch, boundary.hidden_container.get(), None, inner, false);

        if boundary.deps() == 0 {
            self.resolve_suspense(&boundary, false);
            return;
        }
        match n2.prop("timeout").and_then(|t| t.as_number()) {
            Some(timeout) if timeout <= 0.0 => self.suspense_fallback(&boundary, &new_fallback),
            Some(timeout) if timeout.is_finite() => {
                self.schedule_fallback(&boundary, new_fallback, timeout)
            }
            _ => trace!("suspense pending without timeout, keeping current branch"),
        }
    }

    /// Show the fallback after `timeout` milliseconds unless the pending
    /// branch resolved or was replaced in the meantime.
    fn schedule_fallback(&self, boundary: &Rc<SuspenseBoundary>, fallback: VNode, timeout: f64) {
        let renderer = self.downgrade();
        let boundary = Rc::clone(boundary);
        let pending_id = boundary.pending_id();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_secs_f64(timeout / 1000.0)).await;
            if boundary.pending_id() != pending_id {
                return;
            }
            if let Some(renderer) = Renderer::upgrade(&renderer) {
                renderer.suspense_fallback(&boundary, &fallback);
                if let Some(err) = renderer.take_error() {
                    error!(error = %err, "suspense fallback failed");
                }
            }
        });
    }

    /// Move the resolved content into place. With `resume`, the content is
    /// already on screen.
    pub(crate) fn resolve_suspense(&self, boundary: &Rc<SuspenseBoundary>, resume: bool) {
        let Some(pending) = boundary.pending_branch() else {
            return;
        };
        debug!(pending_id = boundary.pending_id(), resume, "suspense resolved");

        if !resume {
            let mut anchor = boundary.anchor.get();
            if let Some(active) = boundary.active_branch() {
                // The fallback may have been moved by an outer boundary.
                anchor = self.next_host_node(&active);
                boundary.with_scope(|scope| self.unmount(&active, scope, true, false));
            }
            boundary.with_scope(|scope| {
                self.move_(&pending, boundary.container.get(), anchor, MoveType::Enter, scope)
            });
        }

        self.set_active_branch(boundary, &pending);
        *boundary.pending_branch.borrow_mut() = None;
        boundary.is_in_fallback.set(false);

        let effects = std::mem::take(&mut *boundary.effects.borrow_mut());
        let mut ancestor = boundary.parent.clone();
        let mut merged = false;
        while let Some(parent) = ancestor {
            if parent.is_pending() {
                parent.effects.borrow_mut().extend(effects.iter().cloned());
                merged = true;
                break;
            }
            ancestor = parent.parent.clone();
        }
        if !merged {
            queue_post_flush_cbs(effects);
        }

        let vnode = boundary.vnode();
        let parent = boundary.parent_instance();
        self.report(trigger_event(&vnode, parent.as_ref(), "onResolve"));
    }

    /// Replace what is on screen by `fallback` while content is pending.
    fn suspense_fallback(&self, boundary: &Rc<SuspenseBoundary>, fallback: &VNode) {
        if !boundary.is_pending() {
            return;
        }
        let vnode = boundary.vnode();
        let parent = boundary.parent_instance();
        self.report(trigger_event(&vnode, parent.as_ref(), "onFallback"));

        let active = boundary.active_branch();
        let anchor = active.as_ref().and_then(|a| self.next_host_node(a));
        boundary.is_in_fallback.set(true);
        let scope = PatchScope::new(parent.as_ref(), None);
        if let Some(active) = &active {
            self.unmount(active, scope, true, false);
        }
        self.patch(None, fallback, boundary.container.get(), anchor, scope, false);
        self.set_active_branch(boundary, fallback);
    }

    fn set_active_branch(&self, boundary: &SuspenseBoundary, branch: &VNode) {
        *boundary.active_branch.borrow_mut() = Some(branch.clone());
        let el = branch.el();
        let vnode = boundary.vnode();
        vnode.set_el(el);
        if let Some(parent) = boundary.parent_instance() {
            if parent.subtree().is_some_and(|tree| tree.ptr_eq(&vnode)) {
                parent.vnode().set_el(el);
                self.update_hoc_host_el(&parent, el);
            }
        }
    }

    pub(crate) fn move_suspense(
        &self,
        boundary: &Rc<SuspenseBoundary>,
        container: HostNode,
        anchor: Option<HostNode>,
        move_type: MoveType,
    ) {
        if let Some(active) = boundary.active_branch() {
            boundary.with_scope(|scope| self.move_(&active, container, anchor, move_type, scope));
        }
        boundary.container.set(container);
    }

    pub(crate) fn suspense_next(&self, boundary: &SuspenseBoundary) -> Option<HostNode> {
        boundary.active_branch().and_then(|active| self.next_host_node(&active))
    }

    pub(crate) fn unmount_suspense(
        &self,
        boundary: &Rc<SuspenseBoundary>,
        parent_suspense: Option<&Rc<SuspenseBoundary>>,
        do_remove: bool,
    ) {
        boundary.is_unmounted.set(true);
        let parent = boundary.parent_instance();
        let scope = PatchScope::new(parent.as_ref(), parent_suspense);
        if let Some(active) = boundary.active_branch() {
            self.unmount(&active, scope, do_remove, false);
        }
        if let Some(pending) = boundary.pending_branch() {
            self.unmount(&pending, scope, do_remove, false);
        }
    }

    /// Make `instance`'s pending setup a dependency of `boundary` and finish
    /// mounting it once the setup future resolves.
    ///
    /// The future runs on the current `tokio::task::LocalSet`.
    pub(crate) fn register_dep(
        &self,
        boundary: &Rc<SuspenseBoundary>,
        instance: &Rc<ComponentInstance>,
        pending: AsyncRender,
    ) {
        let counted = boundary.is_pending();
        if counted {
            boundary.deps.set(boundary.deps() + 1);
        }
        trace!(component = instance.name(), deps = boundary.deps(), "registered async dependency");

        let renderer = self.downgrade();
        let boundary = Rc::clone(boundary);
        let instance = Rc::clone(instance);
        tokio::task::spawn_local(async move {
            let outcome = pending.await;
            let Some(renderer) = Renderer::upgrade(&renderer) else {
                return;
            };
            if instance.is_unmounted()
                || boundary.is_unmounted()
                || boundary.pending_id() != instance.suspense_id
            {
                trace!(component = instance.name(), "discarding stale async setup");
                return;
            }

            match outcome {
                Ok(render) => finish_async_setup(&instance, render),
                Err(err) => {
                    instance.async_resolved.set(true);
                    if let Err(err) = handle_error(err, Some(&instance), ErrorSource::AsyncSetup) {
                        renderer.report(Err(err));
                    }
                }
            }

            renderer.complete_async_mount(&boundary, &instance, counted);
            if let Some(err) = renderer.take_error() {
                error!(component = instance.name(), error = %err, "async component failed to mount");
            }
            if let Err(err) = flush_jobs() {
                error!(error = %err, "flush after async setup failed");
            }
        });
    }

    fn complete_async_mount(
        &self,
        boundary: &Rc<SuspenseBoundary>,
        instance: &Rc<ComponentInstance>,
        counted: bool,
    ) {
        let placeholder = instance.subtree().and_then(|tree| tree.el());
        let container = placeholder.and_then(|el| self.0.host.parent_node(el));
        if let (Some(placeholder), Some(container)) = (placeholder, container) {
            let anchor = self.0.host.next_sibling(placeholder);
            self.setup_render_effect(instance, container, anchor);
            self.0.host.remove(placeholder);
            let el = instance.vnode().el();
            self.update_hoc_host_el(instance, el);
        }
        if counted && boundary.release_dep() {
            self.resolve_suspense(boundary, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{App, Component, SetupOutcome};
    use crate::render::{h, suspense, text, TestHost};
    use tokio::sync::oneshot;

    fn async_child(rx: oneshot::Receiver<()>) -> Rc<Component> {
        let rx = RefCell::new(Some(rx));
        Component::new("AsyncChild")
            .setup(move |_| {
                let rx = rx.borrow_mut().take();
                Ok(SetupOutcome::pending(async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok(crate::component::render_fn(|_| Ok(h("p", None, "loaded"))))
                }))
            })
            .build()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fallback_until_async_setup_resolves() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, rx) = oneshot::channel();
                let child = async_child(rx);
                let root = Component::new("Root")
                    .render(move |_| Ok(suspense(h(&child, None, ()), text("loading"))))
                    .build();
                let host = TestHost::new();
                let container = host.root();
                let app = App::new(root).mount(host, container).unwrap();
                assert_eq!(app.host().inner_html(container), "loading");

                tx.send(()).unwrap();
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(app.host().inner_html(container), "<p>loaded</p>");
            })
            .await;
    }

    #[test]
    fn sync_content_resolves_immediately() {
        let root = Component::new("Root")
            .render(|_| Ok(suspense(h("b", None, "ready"), text("loading"))))
            .build();
        let host = TestHost::new();
        let container = host.root();
        let app = App::new(root).mount(host, container).unwrap();
        assert_eq!(app.host().inner_html(container), "<b>ready</b>");
        app.unmount().unwrap();
    }
}
