//! Reconciler
//!
//! The renderer turns vnode trees into host operations. Given the tree that
//! is currently mounted and a new one, [`Renderer::patch`] walks both and
//! issues the minimal set of [`HostOps`] calls that makes the host match the
//! new tree.
//!
//! # Fast paths
//!
//! - Identical vnode handles are skipped outright.
//! - Elements with patch flags only diff what the flags name.
//! - Blocks diff their flat list of dynamic descendants instead of walking
//!   the whole subtree.
//!
//! # Children
//!
//! Unkeyed lists are patched pairwise, then truncated or extended. Keyed
//! lists go through the five-step diff: sync the common prefix, sync the
//! common suffix, mount what is left of the new list or unmount what is left
//! of the old one, and otherwise match the middle sections by key, keep the
//! longest increasing subsequence of matched nodes in place and move the
//! rest.
//!
//! # Errors
//!
//! User code run during a patch (render functions, hooks, directives) is
//! guarded individually. An error nothing handled is stashed on the renderer
//! and surfaced by [`Renderer::render`] or by the update job that ran the
//! patch, so one failing component does not abort the rest of the tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::block::BlockBuilder;
use super::flags::{PatchFlags, ShapeFlags};
use super::host::{HostNode, HostOps};
use super::sequence::longest_increasing_subsequence;
use super::suspense::SuspenseBoundary;
use super::teleport::TeleportMove;
use super::vnode::{
    clone_if_mounted, is_same_vnode_type, ChildList, Children, DirectiveHookKind, LeaveHook,
    NodeRef, Props, TransitionHook, VNode, VNodeType,
};
use crate::component::{
    call_with_error_handling, warn, AppConfig, AppContext, ComponentInstance, InstanceId,
};
use crate::error::{Error, ErrorSource, Result};
use crate::reactive::{TrackingGuard, Value};
use crate::scheduler::{flush_post_flush_cbs, queue_post_flush_cb, Job};

/// How a node is being moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    /// Moved into view (suspense content resolving): runs enter transitions.
    Enter,
    /// Moved out of view: runs leave transitions.
    Leave,
    /// Moved among its siblings. No transitions.
    Reorder,
}

/// Nearest enclosing component and suspense boundary of a patch.
#[derive(Clone, Copy, Default)]
pub(crate) struct PatchScope<'a> {
    pub(crate) parent: Option<&'a Rc<ComponentInstance>>,
    pub(crate) suspense: Option<&'a Rc<SuspenseBoundary>>,
}

impl<'a> PatchScope<'a> {
    pub(crate) fn new(
        parent: Option<&'a Rc<ComponentInstance>>,
        suspense: Option<&'a Rc<SuspenseBoundary>>,
    ) -> Self {
        Self { parent, suspense }
    }

    /// Same parent component, outside any suspense boundary.
    pub(crate) fn without_suspense(self) -> Self {
        Self {
            parent: self.parent,
            suspense: None,
        }
    }
}

pub(crate) struct RendererInner<H> {
    pub(crate) host: H,
    pub(crate) app: Rc<AppContext>,
    pub(crate) instances: RefCell<HashMap<InstanceId, Rc<ComponentInstance>>>,
    roots: RefCell<HashMap<HostNode, VNode>>,
    pending_error: RefCell<Option<Error>>,
    /// Builder for blocks created outside any component render.
    builder: BlockBuilder,
}

/// Reconciles vnode trees against a host.
///
/// Cloning yields another handle to the same renderer.
pub struct Renderer<H: HostOps + 'static>(pub(crate) Rc<RendererInner<H>>);

impl<H: HostOps + 'static> Clone for Renderer<H> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<H: HostOps + 'static> fmt::Debug for Renderer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("roots", &self.0.roots.borrow().len())
            .field("instances", &self.0.instances.borrow().len())
            .finish()
    }
}

impl<H: HostOps + 'static> Renderer<H> {
    pub fn new(host: H) -> Self {
        Self::with_context(host, Rc::new(AppContext::new(AppConfig::default())))
    }

    /// A renderer whose root components belong to the app `app`.
    pub fn with_context(host: H, app: Rc<AppContext>) -> Self {
        Self(Rc::new(RendererInner {
            host,
            app,
            instances: RefCell::new(HashMap::new()),
            roots: RefCell::new(HashMap::new()),
            pending_error: RefCell::new(None),
            builder: BlockBuilder::new(),
        }))
    }

    pub fn host(&self) -> &H {
        &self.0.host
    }

    pub fn app(&self) -> &Rc<AppContext> {
        &self.0.app
    }

    /// Builder for block trees created outside of a component render.
    pub fn builder(&self) -> &BlockBuilder {
        &self.0.builder
    }

    /// Look up a mounted component instance.
    pub fn instance(&self, id: InstanceId) -> Option<Rc<ComponentInstance>> {
        self.0.instances.borrow().get(&id).cloned()
    }

    /// Number of mounted component instances.
    pub fn instance_count(&self) -> usize {
        self.0.instances.borrow().len()
    }

    /// The tree currently mounted in `container`.
    pub fn root(&self, container: HostNode) -> Option<VNode> {
        self.0.roots.borrow().get(&container).cloned()
    }

    pub(crate) fn downgrade(&self) -> Weak<RendererInner<H>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<RendererInner<H>>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    /// Keep the first unhandled error for the caller that drives the patch.
    pub(crate) fn report(&self, result: Result<()>) {
        if let Err(err) = result {
            let mut pending = self.0.pending_error.borrow_mut();
            if pending.is_none() {
                *pending = Some(err);
            } else {
                debug!(error = %err, "additional unhandled error during patch");
            }
        }
    }

    pub(crate) fn take_error(&self) -> Option<Error> {
        self.0.pending_error.borrow_mut().take()
    }

    /// Mount, patch or (with `None`) unmount the tree in `container`, then
    /// run post-flush callbacks.
    pub fn render(&self, vnode: Option<VNode>, container: HostNode) -> Result<()> {
        let prev = self.root(container);
        match vnode {
            None => {
                if let Some(prev) = prev {
                    debug!(container = container.0, "unmounting root");
                    self.unmount(&prev, PatchScope::default(), true, false);
                    self.0.roots.borrow_mut().remove(&container);
                }
            }
            Some(vnode) => {
                let vnode = clone_if_mounted(&vnode);
                self.patch(prev.as_ref(), &vnode, container, None, PatchScope::default(), false);
                self.0.roots.borrow_mut().insert(container, vnode);
            }
        }
        let flushed = flush_post_flush_cbs();
        match self.take_error() {
            Some(err) => Err(err),
            None => flushed,
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Patch `n1` (the mounted vnode, if any) into `n2`.
    pub(crate) fn patch(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        let mut n1 = n1;
        let mut anchor = anchor;
        let mut optimized = optimized;

        if let Some(old) = n1 {
            if old.ptr_eq(n2) {
                return;
            }
            if !is_same_vnode_type(old, n2) {
                trace!(from = old.ty().name(), to = n2.ty().name(), "replacing node");
                anchor = self.next_host_node(old);
                self.unmount(old, scope, true, false);
                n1 = None;
            }
        }

        if n2.patch_flag().contains(PatchFlags::BAIL) {
            optimized = false;
            n2.set_dynamic_children(None);
        }

        match n2.ty() {
            VNodeType::Text => self.process_text(n1, n2, container, anchor),
            VNodeType::Comment => self.process_comment(n1, n2, container, anchor),
            VNodeType::Static => self.process_static(n1, n2, container, anchor),
            VNodeType::Fragment => {
                self.process_fragment(n1, n2, container, anchor, scope, optimized)
            }
            VNodeType::Element(_) => {
                self.process_element(n1, n2, container, anchor, scope, optimized)
            }
            VNodeType::Component(_) => {
                self.process_component(n1, n2, container, anchor, scope, optimized)
            }
            VNodeType::Teleport => {
                self.process_teleport(n1, n2, container, anchor, scope, optimized)
            }
            VNodeType::Suspense => {
                self.process_suspense(n1, n2, container, anchor, scope, optimized)
            }
        }

        if let Some(node_ref) = n2.node_ref() {
            let old_ref = n1.and_then(VNode::node_ref);
            self.set_ref(&node_ref, old_ref.as_ref(), Some(n2), scope.suspense);
        }
    }

    // ------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------

    fn process_text(&self, n1: Option<&VNode>, n2: &VNode, container: HostNode, anchor: Option<HostNode>) {
        let content = n2.children().as_text().unwrap_or_default();
        match n1.and_then(|n1| n1.el().map(|el| (n1, el))) {
            None => {
                let el = self.0.host.create_text(content);
                n2.set_el(Some(el));
                self.0.host.insert(el, container, anchor);
            }
            Some((n1, el)) => {
                n2.set_el(Some(el));
                if n1.children().as_text() != Some(content) {
                    self.0.host.set_text(el, content);
                }
            }
        }
    }

    fn process_comment(&self, n1: Option<&VNode>, n2: &VNode, container: HostNode, anchor: Option<HostNode>) {
        match n1.and_then(VNode::el) {
            None => {
                let content = n2.children().as_text().unwrap_or_default();
                let el = self.0.host.create_comment(content);
                n2.set_el(Some(el));
                self.0.host.insert(el, container, anchor);
            }
            // Comments never change.
            Some(el) => n2.set_el(Some(el)),
        }
    }

    fn process_static(&self, n1: Option<&VNode>, n2: &VNode, container: HostNode, anchor: Option<HostNode>) {
        let content = n2.children().as_text().unwrap_or_default();
        if let Some(n1) = n1 {
            if n1.children().as_text() == Some(content) {
                n2.set_el(n1.el());
                n2.set_anchor(n1.anchor());
                return;
            }
            let anchor = self.next_host_node(n1);
            self.remove_static(n1);
            self.mount_static(n2, content, container, anchor);
        } else {
            self.mount_static(n2, content, container, anchor);
        }
    }

    fn mount_static(&self, vnode: &VNode, content: &str, container: HostNode, anchor: Option<HostNode>) {
        let (first, last) = self.0.host.insert_static_content(content, container, anchor);
        vnode.set_el(Some(first));
        vnode.set_anchor(Some(last));
    }

    /// Host nodes of a static vnode, first to last.
    fn static_nodes(&self, vnode: &VNode) -> Vec<HostNode> {
        let mut nodes = Vec::new();
        let (Some(mut cur), Some(last)) = (vnode.el(), vnode.anchor()) else {
            return nodes;
        };
        loop {
            nodes.push(cur);
            if cur == last {
                break;
            }
            match self.0.host.next_sibling(cur) {
                Some(next) => cur = next,
                None => break,
            }
        }
        nodes
    }

    fn remove_static(&self, vnode: &VNode) {
        for node in self.static_nodes(vnode) {
            self.0.host.remove(node);
        }
    }

    // ------------------------------------------------------------------
    // Fragments
    // ------------------------------------------------------------------

    fn process_fragment(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        let host = &self.0.host;
        let flag = n2.patch_flag();
        let optimized = optimized || flag.is_optimizable();

        let Some(n1) = n1 else {
            let start = host.create_text("");
            let end = host.create_text("");
            n2.set_el(Some(start));
            n2.set_anchor(Some(end));
            host.insert(start, container, anchor);
            host.insert(end, container, anchor);
            if let Some(children) = n2.children().as_array() {
                self.mount_children(children, container, Some(end), scope, optimized, 0);
            }
            return;
        };

        n2.set_el(n1.el());
        n2.set_anchor(n1.anchor());

        let stable = flag.is_optimizable() && flag.contains(PatchFlags::STABLE_FRAGMENT);
        match (stable, n1.dynamic_children(), n2.dynamic_children()) {
            (true, Some(old), Some(new)) => {
                self.patch_block_children(&old, &new, container, scope);
                inherit_static_els(n1, n2);
            }
            _ => self.patch_children(n1, n2, container, n2.anchor(), scope, optimized),
        }
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    fn process_element(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        match n1 {
            None => self.mount_element(n2, container, anchor, scope, optimized),
            Some(n1) => self.patch_element(n1, n2, scope, optimized),
        }
    }

    fn mount_element(
        &self,
        vnode: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        let host = &self.0.host;
        let has_dirs = !vnode.dirs().is_empty();

        let reused = match vnode.el() {
            Some(el) if vnode.patch_flag().contains(PatchFlags::HOISTED) => host.clone_node(el),
            _ => None,
        };
        let el = match reused {
            Some(el) => {
                vnode.set_el(Some(el));
                el
            }
            None => {
                let el = host.create_element(vnode.ty().name());
                vnode.set_el(Some(el));
                match vnode.children() {
                    Children::Text(content) => host.set_element_text(el, content),
                    Children::Array(children) => {
                        let optimized = optimized || vnode.is_block();
                        self.mount_children(children, el, None, scope, optimized, 0);
                    }
                    Children::None | Children::Slots(_) => {}
                }
                if has_dirs {
                    self.report(invoke_directive_hook(vnode, None, scope.parent, DirectiveHookKind::Created));
                }
                if let Some(props) = vnode.props() {
                    for (key, value) in props {
                        if !is_reserved_prop(key) {
                            host.patch_prop(el, key, &Value::Null, value);
                        }
                    }
                }
                el
            }
        };

        if has_dirs {
            self.report(invoke_directive_hook(vnode, None, scope.parent, DirectiveHookKind::BeforeMount));
        }
        let transition = vnode
            .transition()
            .filter(|t| !t.persisted)
            .filter(|_| scope.suspense.map_or(true, |s| !s.is_pending()));
        if let Some(hook) = transition.as_ref().and_then(|t| t.before_enter.clone()) {
            self.report(call_transition_hook(&hook, el, scope.parent));
        }
        host.insert(el, container, anchor);

        if transition.is_some() || has_dirs {
            let vnode = vnode.clone();
            let parent = scope.parent.cloned();
            let enter = transition.and_then(|t| t.enter);
            self.queue_post_render(
                Job::new(move || {
                    let mut first = None;
                    if let Some(hook) = &enter {
                        if let Err(err) = call_transition_hook(hook, el, parent.as_ref()) {
                            first = Some(err);
                        }
                    }
                    if has_dirs {
                        let result =
                            invoke_directive_hook(&vnode, None, parent.as_ref(), DirectiveHookKind::Mounted);
                        if let Err(err) = result {
                            first.get_or_insert(err);
                        }
                    }
                    first.map_or(Ok(()), Err)
                }),
                scope.suspense,
            );
        }
    }

    fn patch_element(&self, n1: &VNode, n2: &VNode, scope: PatchScope<'_>, optimized: bool) {
        let host = &self.0.host;
        let Some(el) = n1.el() else {
            return;
        };
        n2.set_el(Some(el));

        let flag = n2.patch_flag() | (n1.patch_flag() & PatchFlags::FULL_PROPS);
        let has_dirs = !n2.dirs().is_empty();
        if has_dirs {
            self.report(invoke_directive_hook(n2, Some(n1), scope.parent, DirectiveHookKind::BeforeUpdate));
        }

        let empty = Props::new();
        let old_props = n1.props().unwrap_or(&empty);
        let new_props = n2.props().unwrap_or(&empty);

        if flag.is_optimizable() {
            if flag.contains(PatchFlags::FULL_PROPS) {
                self.patch_props(el, old_props, new_props);
            } else {
                if flag.contains(PatchFlags::CLASS) {
                    patch_prop_if_changed(host, el, "class", old_props, new_props);
                }
                if flag.contains(PatchFlags::STYLE) {
                    patch_prop_if_changed(host, el, "style", old_props, new_props);
                }
                if flag.contains(PatchFlags::PROPS) {
                    for key in n2.dynamic_props().unwrap_or_default() {
                        patch_prop_if_changed(host, el, key, old_props, new_props);
                    }
                }
            }
            if flag.contains(PatchFlags::TEXT) {
                let content = n2.children().as_text().unwrap_or_default();
                if n1.children().as_text() != Some(content) {
                    host.set_element_text(el, content);
                }
            }
        } else if !optimized && !n2.is_block() {
            self.patch_props(el, old_props, new_props);
        }

        // Text children were already handled by the TEXT flag.
        let text_patched = flag.is_optimizable() && flag.contains(PatchFlags::TEXT);
        match (n1.dynamic_children(), n2.dynamic_children()) {
            (Some(old), Some(new)) => self.patch_block_children(&old, &new, el, scope),
            _ if !optimized && !text_patched => {
                self.patch_children(n1, n2, el, None, scope, false)
            }
            _ => {}
        }

        if has_dirs {
            let (n1, n2) = (n1.clone(), n2.clone());
            let parent = scope.parent.cloned();
            self.queue_post_render(
                Job::new(move || {
                    invoke_directive_hook(&n2, Some(&n1), parent.as_ref(), DirectiveHookKind::Updated)
                }),
                scope.suspense,
            );
        }
    }

    /// Full props diff: changed and added keys, then removed keys.
    fn patch_props(&self, el: HostNode, old_props: &Props, new_props: &Props) {
        let host = &self.0.host;
        for (key, next) in new_props {
            if is_reserved_prop(key) {
                continue;
            }
            let prev = old_props.get(key).cloned().unwrap_or_default();
            if &prev != next {
                host.patch_prop(el, key, &prev, next);
            }
        }
        for (key, prev) in old_props {
            if !is_reserved_prop(key) && !new_props.contains_key(key) {
                host.patch_prop(el, key, prev, &Value::Null);
            }
        }
    }

    // ------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------

    pub(crate) fn mount_children(
        &self,
        children: &ChildList,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
        start: usize,
    ) {
        for child in normalize_list(children, optimized).iter().skip(start) {
            self.patch(None, child, container, anchor, scope, optimized);
        }
    }

    /// Patch the flat dynamic descendant lists of two blocks.
    pub(crate) fn patch_block_children(
        &self,
        old: &[VNode],
        new: &[VNode],
        fallback_container: HostNode,
        scope: PatchScope<'_>,
    ) {
        for (i, n2) in new.iter().enumerate() {
            let Some(n1) = old.get(i) else {
                self.patch(None, n2, fallback_container, None, scope, true);
                continue;
            };
            // The real parent is only needed when the patch may insert or
            // move nodes next to the old ones.
            let needs_parent = matches!(n1.ty(), VNodeType::Fragment)
                || !is_same_vnode_type(n1, n2)
                || n1.shape().intersects(ShapeFlags::COMPONENT | ShapeFlags::TELEPORT);
            let container = if needs_parent {
                n1.el()
                    .and_then(|el| self.0.host.parent_node(el))
                    .unwrap_or(fallback_container)
            } else {
                fallback_container
            };
            self.patch(Some(n1), n2, container, None, scope, true);
        }
    }

    pub(crate) fn patch_children(
        &self,
        n1: &VNode,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        let flag = n2.patch_flag();
        if flag.is_optimizable() {
            let old = n1.children().as_array().map(ChildList::to_vec).unwrap_or_default();
            let empty = ChildList::default();
            let new = n2.children().as_array().unwrap_or(&empty);
            if flag.contains(PatchFlags::KEYED_FRAGMENT) {
                self.patch_keyed_children(&old, new, container, anchor, scope, optimized);
                return;
            }
            if flag.contains(PatchFlags::UNKEYED_FRAGMENT) {
                self.patch_unkeyed_children(&old, new, container, anchor, scope, optimized);
                return;
            }
        }

        match (n1.children(), n2.children()) {
            (Children::Array(a), Children::Array(b)) if a.ptr_eq(b) => {}
            (prev, Children::Text(content)) => {
                if let Children::Array(old) = prev {
                    self.unmount_children(&old.to_vec(), scope, false, false);
                }
                if prev.as_text() != Some(&**content) {
                    self.0.host.set_element_text(container, content);
                }
            }
            (Children::Array(old), Children::Array(new)) => {
                self.patch_keyed_children(&old.to_vec(), new, container, anchor, scope, optimized);
            }
            (Children::Array(old), _) => {
                self.unmount_children(&old.to_vec(), scope, true, false);
            }
            (prev, next) => {
                if prev.as_text().is_some() {
                    self.0.host.set_element_text(container, "");
                }
                if let Children::Array(new) = next {
                    self.mount_children(new, container, anchor, scope, optimized, 0);
                }
            }
        }
    }

    fn patch_unkeyed_children(
        &self,
        c1: &[VNode],
        c2: &ChildList,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        let c2 = normalize_list(c2, optimized);
        let common = c1.len().min(c2.len());
        for (n1, n2) in c1.iter().zip(&c2) {
            self.patch(Some(n1), n2, container, None, scope, optimized);
        }
        if c1.len() > c2.len() {
            self.unmount_children(&c1[common..], scope, true, false);
        } else {
            for n2 in &c2[common..] {
                self.patch(None, n2, container, anchor, scope, optimized);
            }
        }
    }

    /// Keyed children diff.
    fn patch_keyed_children(
        &self,
        c1: &[VNode],
        c2: &ChildList,
        container: HostNode,
        parent_anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        let c2 = normalize_list(c2, optimized);
        let mut i = 0;
        // Exclusive ends of the unsynced sections.
        let mut e1 = c1.len();
        let mut e2 = c2.len();

        // 1. Sync from the start.
        while i < e1 && i < e2 && is_same_vnode_type(&c1[i], &c2[i]) {
            self.patch(Some(&c1[i]), &c2[i], container, None, scope, optimized);
            i += 1;
        }

        // 2. Sync from the end.
        while i < e1 && i < e2 && is_same_vnode_type(&c1[e1 - 1], &c2[e2 - 1]) {
            self.patch(Some(&c1[e1 - 1]), &c2[e2 - 1], container, None, scope, optimized);
            e1 -= 1;
            e2 -= 1;
        }

        if i >= e1 {
            // 3. Old list exhausted: mount the rest of the new one.
            if i < e2 {
                let anchor = c2.get(e2).and_then(VNode::el).or(parent_anchor);
                for n2 in &c2[i..e2] {
                    self.patch(None, n2, container, anchor, scope, optimized);
                }
            }
            return;
        }
        if i >= e2 {
            // 4. New list exhausted: unmount the rest of the old one.
            for n1 in &c1[i..e1] {
                self.unmount(n1, scope, true, false);
            }
            return;
        }

        // 5. Unknown sequence.
        let (s1, s2) = (i, i);

        // 5.1 Index the new section by key.
        let mut key_to_new_index = HashMap::with_capacity(e2 - s2);
        for (index, n2) in c2.iter().enumerate().take(e2).skip(s2) {
            if let Some(key) = n2.key() {
                if key_to_new_index.insert(key.clone(), index).is_some() {
                    warn(format!(
                        "Duplicate keys found during update: {key:?}. Make sure keys are unique."
                    ));
                }
            }
        }

        // 5.2 Patch matching old nodes, unmount the others.
        let to_be_patched = e2 - s2;
        let mut patched = 0;
        let mut moved = false;
        let mut max_new_index_so_far = 0;
        // Old index + 1 of each new node; 0 means "new, mount it".
        let mut new_index_to_old_index = vec![0usize; to_be_patched];

        for (j, prev) in c1.iter().enumerate().take(e1).skip(s1) {
            if patched >= to_be_patched {
                self.unmount(prev, scope, true, false);
                continue;
            }
            let new_index = match prev.key() {
                Some(key) => key_to_new_index.get(key).copied(),
                None => (s2..e2).find(|&k| {
                    new_index_to_old_index[k - s2] == 0 && is_same_vnode_type(prev, &c2[k])
                }),
            };
            match new_index {
                None => self.unmount(prev, scope, true, false),
                Some(new_index) => {
                    new_index_to_old_index[new_index - s2] = j + 1;
                    if new_index >= max_new_index_so_far {
                        max_new_index_so_far = new_index;
                    } else {
                        moved = true;
                    }
                    self.patch(Some(prev), &c2[new_index], container, None, scope, optimized);
                    patched += 1;
                }
            }
        }

        // 5.3 Move and mount, back to front so each anchor is already placed.
        let stable = if moved {
            longest_increasing_subsequence(&new_index_to_old_index)
        } else {
            Vec::new()
        };
        let mut stable = stable.iter().rev().peekable();
        for k in (0..to_be_patched).rev() {
            let index = s2 + k;
            let next = &c2[index];
            let anchor = c2.get(index + 1).and_then(VNode::el).or(parent_anchor);
            if new_index_to_old_index[k] == 0 {
                self.patch(None, next, container, anchor, scope, optimized);
            } else if moved {
                if stable.peek() == Some(&&k) {
                    stable.next();
                } else {
                    self.move_(next, container, anchor, MoveType::Reorder, scope);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Moving
    // ------------------------------------------------------------------

    /// Move the host nodes of `vnode` before `anchor` in `container`.
    pub(crate) fn move_(
        &self,
        vnode: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        move_type: MoveType,
        scope: PatchScope<'_>,
    ) {
        let host = &self.0.host;
        let shape = vnode.shape();

        if shape.intersects(ShapeFlags::COMPONENT) {
            let subtree = vnode
                .component()
                .and_then(|id| self.instance(id))
                .and_then(|instance| instance.subtree());
            if let Some(subtree) = subtree {
                self.move_(&subtree, container, anchor, move_type, scope);
            }
            return;
        }
        if shape.contains(ShapeFlags::SUSPENSE) {
            if let Some(boundary) = vnode.suspense() {
                self.move_suspense(&boundary, container, anchor, move_type);
            }
            return;
        }
        if shape.contains(ShapeFlags::TELEPORT) {
            self.move_teleport(vnode, container, anchor, TeleportMove::Reorder, scope);
            return;
        }

        match vnode.ty() {
            VNodeType::Fragment => {
                if let Some(el) = vnode.el() {
                    host.insert(el, container, anchor);
                }
                if let Some(children) = vnode.children().as_array() {
                    for child in children.to_vec() {
                        self.move_(&child, container, anchor, move_type, scope);
                    }
                }
                if let Some(end) = vnode.anchor() {
                    host.insert(end, container, anchor);
                }
                return;
            }
            VNodeType::Static => {
                for node in self.static_nodes(vnode) {
                    host.insert(node, container, anchor);
                }
                return;
            }
            _ => {}
        }

        let Some(el) = vnode.el() else {
            return;
        };
        let transition = vnode
            .transition()
            .filter(|_| move_type != MoveType::Reorder && shape.contains(ShapeFlags::ELEMENT));
        match (transition, move_type) {
            (Some(t), MoveType::Enter) => {
                if let Some(hook) = &t.before_enter {
                    self.report(call_transition_hook(hook, el, scope.parent));
                }
                host.insert(el, container, anchor);
                if let Some(hook) = t.enter {
                    let parent = scope.parent.cloned();
                    self.queue_post_render(
                        Job::new(move || call_transition_hook(&hook, el, parent.as_ref())),
                        scope.suspense,
                    );
                }
            }
            (Some(t), MoveType::Leave) if t.leave.is_some() => {
                let weak = self.downgrade();
                let done: Box<dyn FnOnce()> = Box::new(move || {
                    if let Some(renderer) = Renderer::upgrade(&weak) {
                        renderer.0.host.insert(el, container, anchor);
                    }
                });
                if let Some(leave) = t.leave {
                    self.report(call_leave_hook(&leave, el, done, scope.parent));
                }
            }
            _ => host.insert(el, container, anchor),
        }
    }

    // ------------------------------------------------------------------
    // Unmounting
    // ------------------------------------------------------------------

    /// Tear down `vnode`: refs, directives, components, children. With
    /// `do_remove`, its host nodes are also detached.
    pub(crate) fn unmount(&self, vnode: &VNode, scope: PatchScope<'_>, do_remove: bool, optimized: bool) {
        if let Some(node_ref) = vnode.node_ref() {
            self.set_ref(&node_ref, None, None, scope.suspense);
        }
        let shape = vnode.shape();
        let invoke_dirs = shape.contains(ShapeFlags::ELEMENT) && !vnode.dirs().is_empty();

        if shape.intersects(ShapeFlags::COMPONENT) {
            if let Some(instance) = vnode.component().and_then(|id| self.instance(id)) {
                self.unmount_component(&instance, scope.suspense, do_remove);
            }
        } else {
            if shape.contains(ShapeFlags::SUSPENSE) {
                if let Some(boundary) = vnode.suspense() {
                    self.unmount_suspense(&boundary, scope.suspense, do_remove);
                }
                return;
            }

            if invoke_dirs {
                self.report(invoke_directive_hook(vnode, None, scope.parent, DirectiveHookKind::BeforeUnmount));
            }

            let flag = vnode.patch_flag();
            let is_fragment = matches!(vnode.ty(), VNodeType::Fragment);
            let stable_fragment =
                flag.is_optimizable() && flag.contains(PatchFlags::STABLE_FRAGMENT);
            let list_fragment = is_fragment
                && flag.is_optimizable()
                && flag.intersects(PatchFlags::KEYED_FRAGMENT | PatchFlags::UNKEYED_FRAGMENT);

            match vnode.dynamic_children() {
                Some(dynamic) if !is_fragment || stable_fragment => {
                    self.unmount_children(&dynamic, scope, false, true);
                }
                _ => {
                    if list_fragment || (!optimized && shape.contains(ShapeFlags::ARRAY_CHILDREN)) {
                        if let Some(children) = vnode.children().as_array() {
                            self.unmount_children(&children.to_vec(), scope, false, false);
                        }
                    }
                }
            }

            if shape.contains(ShapeFlags::TELEPORT) {
                self.remove_teleport(vnode, scope, do_remove);
            }
            if do_remove {
                self.remove(vnode, scope);
            }
        }

        if invoke_dirs {
            let vnode = vnode.clone();
            let parent = scope.parent.cloned();
            self.queue_post_render(
                Job::new(move || {
                    invoke_directive_hook(&vnode, None, parent.as_ref(), DirectiveHookKind::Unmounted)
                }),
                scope.suspense,
            );
        }
    }

    pub(crate) fn unmount_children(&self, children: &[VNode], scope: PatchScope<'_>, do_remove: bool, optimized: bool) {
        for child in children {
            self.unmount(child, scope, do_remove, optimized);
        }
    }

    /// Detach the host nodes of `vnode`, running its leave transition first.
    pub(crate) fn remove(&self, vnode: &VNode, scope: PatchScope<'_>) {
        match vnode.ty() {
            VNodeType::Fragment => {
                if let (Some(start), Some(end)) = (vnode.el(), vnode.anchor()) {
                    self.remove_fragment(start, end);
                }
                return;
            }
            VNodeType::Static => {
                self.remove_static(vnode);
                return;
            }
            _ => {}
        }
        let Some(el) = vnode.el() else {
            return;
        };
        let leave = vnode
            .transition()
            .filter(|t| !t.persisted && vnode.shape().contains(ShapeFlags::ELEMENT))
            .and_then(|t| t.leave);
        match leave {
            Some(leave) => {
                let weak = self.downgrade();
                let done: Box<dyn FnOnce()> = Box::new(move || {
                    if let Some(renderer) = Renderer::upgrade(&weak) {
                        renderer.0.host.remove(el);
                    }
                });
                self.report(call_leave_hook(&leave, el, done, scope.parent));
            }
            None => self.0.host.remove(el),
        }
    }

    fn remove_fragment(&self, start: HostNode, end: HostNode) {
        let host = &self.0.host;
        let mut cur = start;
        while cur != end {
            let next = host.next_sibling(cur);
            host.remove(cur);
            match next {
                Some(next) => cur = next,
                None => break,
            }
        }
        host.remove(end);
    }

    /// The host node right after everything `vnode` rendered.
    pub(crate) fn next_host_node(&self, vnode: &VNode) -> Option<HostNode> {
        let shape = vnode.shape();
        if shape.intersects(ShapeFlags::COMPONENT) {
            let subtree = vnode
                .component()
                .and_then(|id| self.instance(id))
                .and_then(|instance| instance.subtree());
            return match subtree {
                Some(subtree) => self.next_host_node(&subtree),
                None => vnode.el().and_then(|el| self.0.host.next_sibling(el)),
            };
        }
        if shape.contains(ShapeFlags::SUSPENSE) {
            return vnode.suspense().and_then(|boundary| self.suspense_next(&boundary));
        }
        vnode
            .anchor()
            .or_else(|| vnode.el())
            .and_then(|node| self.0.host.next_sibling(node))
    }

    // ------------------------------------------------------------------
    // Post-render effects and refs
    // ------------------------------------------------------------------

    /// Queue `job` after the current patch, or buffer it in the pending
    /// suspense boundary until that resolves.
    pub(crate) fn queue_post_render(&self, job: Job, suspense: Option<&Rc<SuspenseBoundary>>) {
        match suspense {
            Some(boundary) if boundary.is_pending() => boundary.push_effect(job),
            _ => queue_post_flush_cb(job),
        }
    }

    fn set_ref(
        &self,
        node_ref: &NodeRef,
        old_ref: Option<&NodeRef>,
        vnode: Option<&VNode>,
        suspense: Option<&Rc<SuspenseBoundary>>,
    ) {
        if let Some(old) = old_ref {
            if !old.ptr_eq(node_ref) {
                old.set(None);
            }
        }
        match vnode.and_then(VNode::el) {
            // Refs are set before any other post-render callback.
            Some(el) => {
                let node_ref = node_ref.clone();
                self.queue_post_render(
                    Job::with_id(0, move || {
                        node_ref.set(Some(el));
                        Ok(())
                    }),
                    suspense,
                );
            }
            None => node_ref.set(None),
        }
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn is_reserved_prop(key: &str) -> bool {
    key.is_empty() || key == "key" || key == "ref"
}

fn patch_prop_if_changed<H: HostOps>(
    host: &H,
    el: HostNode,
    key: &str,
    old_props: &Props,
    new_props: &Props,
) {
    let prev = old_props.get(key).cloned().unwrap_or_default();
    let next = new_props.get(key).cloned().unwrap_or_default();
    if prev != next {
        host.patch_prop(el, key, &prev, &next);
    }
}

/// Children ready for patching. Outside optimized mode, children that are
/// already mounted elsewhere are replaced by copies.
pub(crate) fn normalize_list(list: &ChildList, optimized: bool) -> Vec<VNode> {
    let children = list.to_vec();
    if optimized {
        return children;
    }
    children
        .into_iter()
        .enumerate()
        .map(|(i, child)| {
            let normalized = clone_if_mounted(&child);
            if !normalized.ptr_eq(&child) {
                list.set(i, normalized.clone());
            }
            normalized
        })
        .collect()
}

/// Static children of a stable fragment are skipped by the block patch;
/// carry their host nodes over so the new tree can move or remove them.
pub(crate) fn inherit_static_els(n1: &VNode, n2: &VNode) {
    let (Some(old), Some(new)) = (n1.children().as_array(), n2.children().as_array()) else {
        return;
    };
    if old.ptr_eq(new) {
        return;
    }
    for i in 0..new.len().min(old.len()) {
        let (Some(c1), Some(mut c2)) = (old.get(i), new.get(i)) else {
            continue;
        };
        if !c2.shape().contains(ShapeFlags::ELEMENT) || c2.is_block() {
            continue;
        }
        if !c2.patch_flag().is_dynamic() {
            if c2.el().is_some() && !c2.ptr_eq(&c1) {
                c2 = clone_if_mounted(&c2);
                new.set(i, c2.clone());
            }
            c2.set_el(c1.el());
        }
        inherit_static_els(&c1, &c2);
    }
}

/// Run the `kind` hook of every directive on `vnode`.
pub(crate) fn invoke_directive_hook(
    vnode: &VNode,
    prev: Option<&VNode>,
    instance: Option<&Rc<ComponentInstance>>,
    kind: DirectiveHookKind,
) -> Result<()> {
    let Some(el) = vnode.el() else {
        return Ok(());
    };
    if let Some(prev) = prev.filter(|p| !p.ptr_eq(vnode)) {
        let old = prev.dirs();
        let mut dirs = vnode.dirs_mut();
        for (binding, old) in dirs.iter_mut().zip(old.iter()) {
            binding.old_value = old.value.clone();
        }
    }
    let bindings = vnode.dirs().clone();
    let mut first = None;
    for binding in &bindings {
        let Some(hook) = binding.dir.hook(kind) else {
            continue;
        };
        let _paused = TrackingGuard::pause();
        let result = call_with_error_handling(
            || hook(el, binding, vnode, prev),
            instance,
            ErrorSource::DirectiveHook,
        );
        if let Err(err) = result {
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

fn call_transition_hook(
    hook: &TransitionHook,
    el: HostNode,
    instance: Option<&Rc<ComponentInstance>>,
) -> Result<()> {
    call_with_error_handling(|| hook(el), instance, ErrorSource::TransitionHook).map(drop)
}

fn call_leave_hook(
    hook: &LeaveHook,
    el: HostNode,
    done: Box<dyn FnOnce()>,
    instance: Option<&Rc<ComponentInstance>>,
) -> Result<()> {
    call_with_error_handling(|| hook(el, done), instance, ErrorSource::TransitionHook).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use crate::render::{
        create_vnode, fragment, h, static_content, text, Directive, DirectiveBinding, HostOp,
        TestHost, TransitionHooks,
    };
    use std::cell::Cell;

    fn keyed(keys: &[&str]) -> VNode {
        let items = keys
            .iter()
            .map(|k| h("li", Some(props! { "key" => *k }), *k))
            .collect::<Vec<_>>();
        h("ul", None, items)
    }

    fn mount(tree: VNode) -> (Renderer<Rc<TestHost>>, Rc<TestHost>) {
        let host = Rc::new(TestHost::new());
        let renderer = Renderer::new(Rc::clone(&host));
        renderer.render(Some(tree), host.root()).unwrap();
        (renderer, host)
    }

    #[test]
    fn mounts_elements_text_and_props() {
        let (_r, host) = mount(h("div", Some(props! { "id" => "app" }), vec![text("hi"), h("b", None, "x")]));
        assert_eq!(host.inner_html(host.root()), "<div id=\"app\">hi<b>x</b></div>");
    }

    #[test]
    fn keyed_reorder_moves_only_what_is_needed() {
        let (renderer, host) = mount(keyed(&["a", "b", "c", "d", "e"]));
        host.reset_ops();
        renderer.render(Some(keyed(&["a", "c", "b", "e", "d"])), host.root()).unwrap();
        let counts = host.counts();
        assert_eq!(counts.moves, 2);
        assert_eq!(counts.creates, 0);
        assert_eq!(counts.removes, 0);
        assert_eq!(
            host.inner_html(host.root()),
            "<ul><li>a</li><li>c</li><li>b</li><li>e</li><li>d</li></ul>"
        );
    }

    #[test]
    fn keyed_mount_and_unmount_in_the_middle() {
        let (renderer, host) = mount(keyed(&["a", "b", "c"]));
        renderer.render(Some(keyed(&["a", "x", "c"])), host.root()).unwrap();
        assert_eq!(host.inner_html(host.root()), "<ul><li>a</li><li>x</li><li>c</li></ul>");
        renderer.render(Some(keyed(&["c", "a"])), host.root()).unwrap();
        assert_eq!(host.inner_html(host.root()), "<ul><li>c</li><li>a</li></ul>");
    }

    #[test]
    fn unkeyed_truncation_and_extension() {
        let list = |n: usize| {
            let items = (0..n).map(|i| h("i", None, i.to_string())).collect::<Vec<_>>();
            create_vnode(VNodeType::Fragment, None, items, PatchFlags::UNKEYED_FRAGMENT, &[])
        };
        let (renderer, host) = mount(list(3));
        host.reset_ops();
        renderer.render(Some(list(5)), host.root()).unwrap();
        assert_eq!(host.counts().creates, 2);
        host.reset_ops();
        renderer.render(Some(list(1)), host.root()).unwrap();
        assert_eq!(host.counts().removes, 4);
        assert_eq!(host.inner_html(host.root()), "<i>0</i>");
    }

    #[test]
    fn text_flag_only_touches_text() {
        let view = |label: &str| {
            create_vnode("p", Some(props! { "id" => label }), label, PatchFlags::TEXT, &[])
        };
        let (renderer, host) = mount(view("a"));
        host.reset_ops();
        renderer.render(Some(view("b")), host.root()).unwrap();
        let ops = host.ops();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], HostOp::SetElementText { text, .. } if text == "b"));
    }

    #[test]
    fn full_props_diff_removes_stale_keys() {
        let (renderer, host) = mount(h("a", Some(props! { "href" => "/", "title" => "t" }), ()));
        renderer.render(Some(h("a", Some(props! { "href" => "/x" }), ())), host.root()).unwrap();
        assert_eq!(host.inner_html(host.root()), "<a href=\"/x\"></a>");
    }

    #[test]
    fn fragments_and_static_content_unmount_cleanly() {
        let tree = fragment(vec![text("a"), static_content("<hr>", 1), text("b")]);
        let (renderer, host) = mount(tree);
        assert_eq!(host.inner_html(host.root()), "a<hr>b");
        renderer.render(None, host.root()).unwrap();
        assert_eq!(host.inner_html(host.root()), "");
    }

    #[test]
    fn type_change_replaces_in_place() {
        let (renderer, host) = mount(h("div", None, vec![h("a", None, ()), h("b", None, ())]));
        renderer
            .render(Some(h("div", None, vec![h("i", None, ()), h("b", None, ())])), host.root())
            .unwrap();
        assert_eq!(host.inner_html(host.root()), "<div><i></i><b></b></div>");
    }

    #[test]
    fn directive_hooks_fire_in_order() {
        let log = Rc::new(RefCell::new(Vec::<&'static str>::new()));
        let record = |name: &'static str| {
            let log = Rc::clone(&log);
            move |_: HostNode, _: &DirectiveBinding, _: &VNode, _: Option<&VNode>| {
                log.borrow_mut().push(name);
                Ok(())
            }
        };
        let dir = Rc::new(
            Directive::new()
                .on(DirectiveHookKind::Created, record("created"))
                .on(DirectiveHookKind::BeforeMount, record("before_mount"))
                .on(DirectiveHookKind::Mounted, record("mounted"))
                .on(DirectiveHookKind::BeforeUpdate, record("before_update"))
                .on(DirectiveHookKind::Updated, record("updated"))
                .on(DirectiveHookKind::BeforeUnmount, record("before_unmount"))
                .on(DirectiveHookKind::Unmounted, record("unmounted")),
        );
        let view = |v: i32| h("input", None, ()).with_directives(vec![DirectiveBinding::new(&dir, v)]);
        let (renderer, host) = mount(view(1));
        renderer.render(Some(view(2)), host.root()).unwrap();
        renderer.render(None, host.root()).unwrap();
        assert_eq!(
            *log.borrow(),
            [
                "created",
                "before_mount",
                "mounted",
                "before_update",
                "updated",
                "before_unmount",
                "unmounted"
            ]
        );
    }

    #[test]
    fn node_refs_follow_mount_and_unmount() {
        let node_ref = NodeRef::new();
        let (renderer, host) = mount(h("canvas", None, ()).with_ref(&node_ref));
        let el = node_ref.get();
        assert!(el.is_some());
        assert_eq!(host.children(host.root()), vec![el.unwrap()]);
        renderer.render(None, host.root()).unwrap();
        assert_eq!(node_ref.get(), None);
    }

    #[test]
    fn leave_transition_defers_removal() {
        let pending: Rc<RefCell<Option<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&pending);
        let entered = Rc::new(Cell::new(false));
        let flag = Rc::clone(&entered);
        let hooks = TransitionHooks {
            enter: Some(Rc::new(move |_: HostNode| {
                flag.set(true);
                Ok(())
            })),
            leave: Some(Rc::new(move |_: HostNode, done: Box<dyn FnOnce()>| {
                *slot.borrow_mut() = Some(done);
                Ok(())
            })),
            ..Default::default()
        };
        let (renderer, host) = mount(h("p", None, "bye").with_transition(hooks));
        assert!(entered.get());
        renderer.render(None, host.root()).unwrap();
        assert_eq!(host.inner_html(host.root()), "<p>bye</p>");
        let done = pending.borrow_mut().take().unwrap();
        done();
        assert_eq!(host.inner_html(host.root()), "");
    }
}
