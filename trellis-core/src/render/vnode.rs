//! Virtual nodes.
//!
//! A [`VNode`] describes one node of the desired UI tree. The descriptor
//! part (type, props, children, flags) never changes after creation. The
//! mount-time part (host node, anchors, component id) is filled in by the
//! reconciler and carried over from the old tree to the new one on patch.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::flags::{PatchFlags, ShapeFlags};
use super::host::HostNode;
use super::suspense::SuspenseBoundary;
use crate::component::{Component, InstanceId};
use crate::error::Result;
use crate::reactive::{Signal, TargetData, Value, ValueKey};

/// Property bag of a vnode. Insertion order is preserved.
pub type Props = IndexMap<Rc<str>, Value>;

/// Build a [`Props`] bag from `key => value` pairs.
///
/// ```
/// use trellis_core::props;
/// let props = props! { "id" => "main", "tabindex" => 0 };
/// assert_eq!(props.len(), 2);
/// ```
#[macro_export]
macro_rules! props {
    () => { $crate::render::Props::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut props = $crate::render::Props::new();
        $(
            props.insert(
                ::std::rc::Rc::<str>::from($key),
                $crate::reactive::Value::from($value),
            );
        )+
        props
    }};
}

/// What a vnode renders to.
#[derive(Clone)]
pub enum VNodeType {
    Element(Rc<str>),
    Text,
    Comment,
    /// A list of siblings bounded by two anchor nodes.
    Fragment,
    /// Pre-rendered static content inserted in one go.
    Static,
    Component(Rc<Component>),
    /// Children mounted into another container.
    Teleport,
    /// Content that may wait on async setup, with a fallback.
    Suspense,
}

impl VNodeType {
    fn same(&self, other: &VNodeType) -> bool {
        match (self, other) {
            (VNodeType::Element(a), VNodeType::Element(b)) => a == b,
            (VNodeType::Component(a), VNodeType::Component(b)) => Rc::ptr_eq(a, b),
            (VNodeType::Text, VNodeType::Text)
            | (VNodeType::Comment, VNodeType::Comment)
            | (VNodeType::Fragment, VNodeType::Fragment)
            | (VNodeType::Static, VNodeType::Static)
            | (VNodeType::Teleport, VNodeType::Teleport)
            | (VNodeType::Suspense, VNodeType::Suspense) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VNodeType::Element(tag) => tag,
            VNodeType::Text => "#text",
            VNodeType::Comment => "#comment",
            VNodeType::Fragment => "#fragment",
            VNodeType::Static => "#static",
            VNodeType::Component(c) => c.name(),
            VNodeType::Teleport => "#teleport",
            VNodeType::Suspense => "#suspense",
        }
    }
}

impl fmt::Debug for VNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VNodeType::Element(tag) => write!(f, "Element({tag})"),
            VNodeType::Component(c) => write!(f, "Component({})", c.name()),
            other => f.write_str(other.name()),
        }
    }
}

impl From<&str> for VNodeType {
    fn from(tag: &str) -> Self {
        VNodeType::Element(Rc::from(tag))
    }
}

impl From<Rc<Component>> for VNodeType {
    fn from(component: Rc<Component>) -> Self {
        VNodeType::Component(component)
    }
}

impl From<&Rc<Component>> for VNodeType {
    fn from(component: &Rc<Component>) -> Self {
        VNodeType::Component(Rc::clone(component))
    }
}

/// A slot renders child content on behalf of the parent, inside the child's
/// render. Reads it performs are tracked by the child.
pub type SlotFn = Rc<dyn Fn(&Value) -> Vec<VNode>>;

/// Named slots passed to a component.
#[derive(Clone, Default)]
pub struct Slots {
    slots: Rc<IndexMap<Rc<str>, SlotFn>>,
    stable: bool,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Vec<VNode> + 'static,
    {
        Rc::make_mut(&mut self.slots).insert(Rc::from(name), Rc::new(f));
        self
    }

    /// Shorthand for a `default` slot.
    pub fn default_slot<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Vec<VNode> + 'static,
    {
        Self::new().with("default", f)
    }

    /// Declare that the slot functions only read reactive state. A parent
    /// re-render then does not force the child to re-render.
    pub fn stable(mut self) -> Self {
        self.stable = true;
        self
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn get(&self, name: &str) -> Option<SlotFn> {
        self.slots.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(|k| &**k)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Render a slot, or nothing if it is missing.
    pub fn render(&self, name: &str, props: &Value) -> Vec<VNode> {
        match self.slots.get(name) {
            Some(slot) => slot(props),
            None => Vec::new(),
        }
    }
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slots")
            .field("names", &self.slots.keys().collect::<Vec<_>>())
            .field("stable", &self.stable)
            .finish()
    }
}

/// A shared child array.
///
/// Entries may be swapped out by the reconciler when a vnode that is already
/// mounted elsewhere shows up again, so the array sits behind a `RefCell`.
#[derive(Clone, Default)]
pub struct ChildList(Rc<RefCell<Vec<VNode>>>);

impl ChildList {
    pub fn new(children: Vec<VNode>) -> Self {
        Self(Rc::new(RefCell::new(children)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<VNode> {
        self.0.borrow().get(index).cloned()
    }

    pub(crate) fn set(&self, index: usize, vnode: VNode) {
        if let Some(slot) = self.0.borrow_mut().get_mut(index) {
            *slot = vnode;
        }
    }

    pub fn to_vec(&self) -> Vec<VNode> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &ChildList) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ChildList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.borrow().iter()).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub enum Children {
    #[default]
    None,
    Text(Rc<str>),
    Array(ChildList),
    Slots(Slots),
}

impl Children {
    pub fn as_array(&self) -> Option<&ChildList> {
        match self {
            Children::Array(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Children::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<()> for Children {
    fn from(_: ()) -> Self {
        Children::None
    }
}

impl From<&str> for Children {
    fn from(text: &str) -> Self {
        Children::Text(Rc::from(text))
    }
}

impl From<String> for Children {
    fn from(text: String) -> Self {
        Children::Text(Rc::from(text))
    }
}

impl From<Vec<VNode>> for Children {
    fn from(children: Vec<VNode>) -> Self {
        Children::Array(ChildList::new(children))
    }
}

impl From<Slots> for Children {
    fn from(slots: Slots) -> Self {
        Children::Slots(slots)
    }
}

// ----------------------------------------------------------------------------
// Directives and transitions
// ----------------------------------------------------------------------------

/// Directive hook: `(host element, binding, vnode, previous vnode)`.
pub type DirectiveHook = Rc<dyn Fn(HostNode, &DirectiveBinding, &VNode, Option<&VNode>) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveHookKind {
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
}

/// A directive definition: optional callbacks at element lifecycle points.
#[derive(Clone, Default)]
pub struct Directive {
    created: Option<DirectiveHook>,
    before_mount: Option<DirectiveHook>,
    mounted: Option<DirectiveHook>,
    before_update: Option<DirectiveHook>,
    updated: Option<DirectiveHook>,
    before_unmount: Option<DirectiveHook>,
    unmounted: Option<DirectiveHook>,
}

impl Directive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, kind: DirectiveHookKind, f: F) -> Self
    where
        F: Fn(HostNode, &DirectiveBinding, &VNode, Option<&VNode>) -> Result<()> + 'static,
    {
        let hook: DirectiveHook = Rc::new(f);
        *self.slot_mut(kind) = Some(hook);
        self
    }

    pub fn hook(&self, kind: DirectiveHookKind) -> Option<DirectiveHook> {
        match kind {
            DirectiveHookKind::Created => self.created.clone(),
            DirectiveHookKind::BeforeMount => self.before_mount.clone(),
            DirectiveHookKind::Mounted => self.mounted.clone(),
            DirectiveHookKind::BeforeUpdate => self.before_update.clone(),
            DirectiveHookKind::Updated => self.updated.clone(),
            DirectiveHookKind::BeforeUnmount => self.before_unmount.clone(),
            DirectiveHookKind::Unmounted => self.unmounted.clone(),
        }
    }

    fn slot_mut(&mut self, kind: DirectiveHookKind) -> &mut Option<DirectiveHook> {
        match kind {
            DirectiveHookKind::Created => &mut self.created,
            DirectiveHookKind::BeforeMount => &mut self.before_mount,
            DirectiveHookKind::Mounted => &mut self.mounted,
            DirectiveHookKind::BeforeUpdate => &mut self.before_update,
            DirectiveHookKind::Updated => &mut self.updated,
            DirectiveHookKind::BeforeUnmount => &mut self.before_unmount,
            DirectiveHookKind::Unmounted => &mut self.unmounted,
        }
    }
}

/// A directive applied to one vnode.
#[derive(Clone)]
pub struct DirectiveBinding {
    pub dir: Rc<Directive>,
    pub value: Value,
    /// Value of the binding in the previous render.
    pub old_value: Value,
    pub arg: Option<Rc<str>>,
    pub modifiers: Vec<Rc<str>>,
}

impl DirectiveBinding {
    pub fn new(dir: &Rc<Directive>, value: impl Into<Value>) -> Self {
        Self {
            dir: Rc::clone(dir),
            value: value.into(),
            old_value: Value::Null,
            arg: None,
            modifiers: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: &str) -> Self {
        self.arg = Some(Rc::from(arg));
        self
    }

    pub fn with_modifier(mut self, modifier: &str) -> Self {
        self.modifiers.push(Rc::from(modifier));
        self
    }
}

pub type TransitionHook = Rc<dyn Fn(HostNode) -> Result<()>>;

/// Leave hook: receives the element and a callback that performs the removal
/// once the leave animation is done.
pub type LeaveHook = Rc<dyn Fn(HostNode, Box<dyn FnOnce()>) -> Result<()>>;

/// Enter/leave callbacks attached to a single-root vnode.
#[derive(Clone, Default)]
pub struct TransitionHooks {
    /// The element stays in the tree and only toggles visibility itself.
    pub persisted: bool,
    pub before_enter: Option<TransitionHook>,
    pub enter: Option<TransitionHook>,
    pub leave: Option<LeaveHook>,
}

/// A template ref: holds the host node of the vnode it is attached to.
///
/// Backed by a signal so effects reading it re-run when it is set.
#[derive(Clone, Debug)]
pub struct NodeRef(Signal);

impl NodeRef {
    pub fn new() -> Self {
        Self(Signal::new(Value::Null))
    }

    pub fn get(&self) -> Option<HostNode> {
        self.0.get().as_number().map(|n| HostNode(n as u64))
    }

    pub(crate) fn set(&self, node: Option<HostNode>) {
        self.0.set(node.map(|n| Value::Number(n.0 as f64)).unwrap_or(Value::Null));
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl Default for NodeRef {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// VNode
// ----------------------------------------------------------------------------

pub struct VNodeData {
    ty: VNodeType,
    props: Option<Props>,
    key: Option<ValueKey>,
    children: Children,
    shape: ShapeFlags,
    patch_flag: PatchFlags,
    dynamic_props: Option<Rc<[Rc<str>]>>,
    dynamic_children: RefCell<Option<Rc<Vec<VNode>>>>,
    dirs: RefCell<Vec<DirectiveBinding>>,
    transition: RefCell<Option<TransitionHooks>>,
    node_ref: RefCell<Option<NodeRef>>,
    static_count: Cell<usize>,

    // Mount state.
    el: Cell<Option<HostNode>>,
    anchor: Cell<Option<HostNode>>,
    target: Cell<Option<HostNode>>,
    target_anchor: Cell<Option<HostNode>>,
    component: Cell<Option<InstanceId>>,
    suspense: RefCell<Option<Rc<SuspenseBoundary>>>,
}

/// A shared handle to a virtual node.
#[derive(Clone)]
pub struct VNode(Rc<VNodeData>);

impl VNode {
    pub fn ty(&self) -> &VNodeType {
        &self.0.ty
    }

    pub fn props(&self) -> Option<&Props> {
        self.0.props.as_ref()
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.0.props.as_ref().and_then(|p| p.get(key))
    }

    pub fn key(&self) -> Option<&ValueKey> {
        self.0.key.as_ref()
    }

    pub fn children(&self) -> &Children {
        &self.0.children
    }

    pub fn shape(&self) -> ShapeFlags {
        self.0.shape
    }

    pub fn patch_flag(&self) -> PatchFlags {
        self.0.patch_flag
    }

    pub fn dynamic_props(&self) -> Option<&[Rc<str>]> {
        self.0.dynamic_props.as_deref()
    }

    pub fn dynamic_children(&self) -> Option<Rc<Vec<VNode>>> {
        self.0.dynamic_children.borrow().clone()
    }

    pub(crate) fn set_dynamic_children(&self, children: Option<Vec<VNode>>) {
        *self.0.dynamic_children.borrow_mut() = children.map(Rc::new);
    }

    pub fn is_block(&self) -> bool {
        self.0.dynamic_children.borrow().is_some()
    }

    pub fn dirs(&self) -> Ref<'_, Vec<DirectiveBinding>> {
        self.0.dirs.borrow()
    }

    pub(crate) fn dirs_mut(&self) -> RefMut<'_, Vec<DirectiveBinding>> {
        self.0.dirs.borrow_mut()
    }

    pub fn transition(&self) -> Option<TransitionHooks> {
        self.0.transition.borrow().clone()
    }

    pub fn node_ref(&self) -> Option<NodeRef> {
        self.0.node_ref.borrow().clone()
    }

    pub fn static_count(&self) -> usize {
        self.0.static_count.get()
    }

    pub(crate) fn set_static_count(&self, count: usize) {
        self.0.static_count.set(count);
    }

    /// Attach directives. Replaces any previously attached.
    pub fn with_directives(self, dirs: Vec<DirectiveBinding>) -> Self {
        *self.0.dirs.borrow_mut() = dirs;
        self
    }

    pub fn with_transition(self, hooks: TransitionHooks) -> Self {
        *self.0.transition.borrow_mut() = Some(hooks);
        self
    }

    pub fn with_ref(self, node_ref: &NodeRef) -> Self {
        *self.0.node_ref.borrow_mut() = Some(node_ref.clone());
        self
    }

    /// First host node produced by this vnode. For fragments, the start anchor.
    pub fn el(&self) -> Option<HostNode> {
        self.0.el.get()
    }

    pub(crate) fn set_el(&self, el: Option<HostNode>) {
        self.0.el.set(el);
    }

    /// Last host node for fragments, static content and teleports.
    pub fn anchor(&self) -> Option<HostNode> {
        self.0.anchor.get()
    }

    pub(crate) fn set_anchor(&self, anchor: Option<HostNode>) {
        self.0.anchor.set(anchor);
    }

    /// Resolved teleport target.
    pub fn target(&self) -> Option<HostNode> {
        self.0.target.get()
    }

    pub(crate) fn set_target(&self, target: Option<HostNode>) {
        self.0.target.set(target);
    }

    pub(crate) fn target_anchor(&self) -> Option<HostNode> {
        self.0.target_anchor.get()
    }

    pub(crate) fn set_target_anchor(&self, anchor: Option<HostNode>) {
        self.0.target_anchor.set(anchor);
    }

    /// Id of the component instance mounted for this vnode.
    pub fn component(&self) -> Option<InstanceId> {
        self.0.component.get()
    }

    pub(crate) fn set_component(&self, id: Option<InstanceId>) {
        self.0.component.set(id);
    }

    pub(crate) fn suspense(&self) -> Option<Rc<SuspenseBoundary>> {
        self.0.suspense.borrow().clone()
    }

    pub(crate) fn set_suspense(&self, boundary: Option<Rc<SuspenseBoundary>>) {
        *self.0.suspense.borrow_mut() = boundary;
    }

    pub fn ptr_eq(&self, other: &VNode) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_component(&self) -> bool {
        self.shape().intersects(ShapeFlags::COMPONENT)
    }

    pub fn as_component(&self) -> Option<&Rc<Component>> {
        match &self.0.ty {
            VNodeType::Component(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("VNode");
        s.field("type", &self.0.ty);
        if let Some(key) = &self.0.key {
            s.field("key", key);
        }
        if !self.0.patch_flag.is_empty() {
            s.field("patch_flag", &self.0.patch_flag);
        }
        match &self.0.children {
            Children::None => {}
            children => {
                s.field("children", children);
            }
        }
        s.finish()
    }
}

/// Same type and same key: the reconciler may patch one into the other.
pub fn is_same_vnode_type(a: &VNode, b: &VNode) -> bool {
    a.0.ty.same(&b.0.ty) && a.0.key == b.0.key
}

fn shape_of(ty: &VNodeType) -> ShapeFlags {
    match ty {
        VNodeType::Element(_) => ShapeFlags::ELEMENT,
        VNodeType::Component(c) if c.is_functional() => ShapeFlags::FUNCTIONAL_COMPONENT,
        VNodeType::Component(_) => ShapeFlags::STATEFUL_COMPONENT,
        VNodeType::Teleport => ShapeFlags::TELEPORT,
        VNodeType::Suspense => ShapeFlags::SUSPENSE,
        VNodeType::Text | VNodeType::Comment | VNodeType::Fragment | VNodeType::Static => {
            ShapeFlags::empty()
        }
    }
}

/// Components receive plain children as their default slot.
fn normalize_children(ty: &VNodeType, children: Children) -> Children {
    if !matches!(ty, VNodeType::Component(_)) {
        return children;
    }
    match children {
        Children::Array(list) => Children::Slots(Slots::default_slot(move |_| list.to_vec())),
        Children::Text(content) => {
            Children::Slots(Slots::default_slot(move |_| vec![text(&content)]))
        }
        other => other,
    }
}

pub(crate) fn build_vnode(
    ty: VNodeType,
    props: Option<Props>,
    children: Children,
    patch_flag: PatchFlags,
    dynamic_props: &[&str],
) -> VNode {
    let mut props = props.filter(|p| !p.is_empty());
    let mut key = None;
    if let Some(props) = props.as_mut() {
        if let Some(k) = props.shift_remove("key") {
            if !k.is_null() {
                key = Some(k.identity_key());
            }
        }
        if let Some(class) = props.get_mut("class") {
            if class.as_str().is_none() {
                *class = Value::from(normalize_class(class));
            }
        }
        if let Some(style) = props.get_mut("style") {
            *style = Value::from(normalize_style(style));
        }
    }

    let children = normalize_children(&ty, children);
    let mut shape = shape_of(&ty);
    shape |= match &children {
        Children::None => ShapeFlags::empty(),
        Children::Text(_) => ShapeFlags::TEXT_CHILDREN,
        Children::Array(_) => ShapeFlags::ARRAY_CHILDREN,
        Children::Slots(_) => ShapeFlags::SLOTS_CHILDREN,
    };

    let dynamic_props = if dynamic_props.is_empty() {
        None
    } else {
        Some(dynamic_props.iter().map(|k| Rc::<str>::from(*k)).collect())
    };

    VNode(Rc::new(VNodeData {
        ty,
        props: props.filter(|p| !p.is_empty()),
        key,
        children,
        shape,
        patch_flag,
        dynamic_props,
        dynamic_children: RefCell::new(None),
        dirs: RefCell::new(Vec::new()),
        transition: RefCell::new(None),
        node_ref: RefCell::new(None),
        static_count: Cell::new(0),
        el: Cell::new(None),
        anchor: Cell::new(None),
        target: Cell::new(None),
        target_anchor: Cell::new(None),
        component: Cell::new(None),
        suspense: RefCell::new(None),
    }))
}

/// Create a vnode outside of any block.
///
/// A `key` entry in `props` becomes the vnode's identity key and is not
/// passed to the host.
pub fn create_vnode(
    ty: impl Into<VNodeType>,
    props: Option<Props>,
    children: impl Into<Children>,
    patch_flag: PatchFlags,
    dynamic_props: &[&str],
) -> VNode {
    build_vnode(ty.into(), props, children.into(), patch_flag, dynamic_props)
}

/// Hand-written render helper: no patch flags, always fully diffed.
pub fn h(ty: impl Into<VNodeType>, props: Option<Props>, children: impl Into<Children>) -> VNode {
    create_vnode(ty, props, children, PatchFlags::empty(), &[])
}

pub fn text(content: &str) -> VNode {
    build_vnode(
        VNodeType::Text,
        None,
        Children::Text(Rc::from(content)),
        PatchFlags::empty(),
        &[],
    )
}

pub fn comment(content: &str) -> VNode {
    build_vnode(
        VNodeType::Comment,
        None,
        Children::Text(Rc::from(content)),
        PatchFlags::empty(),
        &[],
    )
}

pub fn fragment(children: Vec<VNode>) -> VNode {
    build_vnode(
        VNodeType::Fragment,
        None,
        children.into(),
        PatchFlags::empty(),
        &[],
    )
}

/// Pre-rendered content spanning `node_count` host nodes.
pub fn static_content(content: &str, node_count: usize) -> VNode {
    let vnode = build_vnode(
        VNodeType::Static,
        None,
        Children::Text(Rc::from(content)),
        PatchFlags::HOISTED,
        &[],
    );
    vnode.set_static_count(node_count);
    vnode
}

/// Mount `children` into `to` instead of in place. When `disabled`, the
/// children stay in place.
pub fn teleport(to: HostNode, disabled: bool, children: Vec<VNode>) -> VNode {
    let props = crate::props! { "to" => to.0 as f64, "disabled" => disabled };
    build_vnode(
        VNodeType::Teleport,
        Some(props),
        children.into(),
        PatchFlags::empty(),
        &[],
    )
}

/// Show `fallback` while async dependencies inside `content` are pending.
pub fn suspense(content: VNode, fallback: VNode) -> VNode {
    suspense_with(None, content, fallback)
}

/// Like [`suspense`], with `onResolve`/`onPending`/`onFallback` callbacks in
/// `props`.
pub fn suspense_with(props: Option<Props>, content: VNode, fallback: VNode) -> VNode {
    build_vnode(
        VNodeType::Suspense,
        props,
        vec![content, fallback].into(),
        PatchFlags::empty(),
        &[],
    )
}

// ----------------------------------------------------------------------------
// Normalization
// ----------------------------------------------------------------------------

/// Flatten a class binding: strings pass through, sequences are joined and
/// records contribute the keys whose value is truthy.
pub fn normalize_class(value: &Value) -> String {
    let mut out = String::new();
    collect_class(value, &mut out);
    out
}

fn collect_class(value: &Value, out: &mut String) {
    let push = |out: &mut String, s: &str| {
        let s = s.trim();
        if s.is_empty() {
            return;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(s);
    };
    match value {
        Value::Str(s) => push(out, s),
        Value::Signal(s) => collect_class(&s.get_untracked(), out),
        Value::Object(_) | Value::Proxy(_) => {
            let Some(target) = value.as_target() else {
                return;
            };
            let data = target.data();
            match &*data {
                TargetData::Sequence(items) => {
                    for item in items {
                        collect_class(item, out);
                    }
                }
                TargetData::Record(map) => {
                    for (name, on) in map {
                        if on.is_truthy() {
                            push(out, name);
                        }
                    }
                }
                TargetData::Map(_) | TargetData::Set(_) => {}
            }
        }
        _ => {}
    }
}

/// Canonical `name:value;name:value` form of a style binding. Later entries
/// override earlier ones.
pub fn normalize_style(value: &Value) -> String {
    let mut entries = IndexMap::new();
    collect_style(value, &mut entries);
    entries
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn collect_style(value: &Value, out: &mut IndexMap<String, String>) {
    match value {
        Value::Str(s) => {
            for decl in s.split(';') {
                if let Some((name, val)) = decl.split_once(':') {
                    let name = name.trim();
                    if !name.is_empty() {
                        out.insert(name.to_string(), val.trim().to_string());
                    }
                }
            }
        }
        Value::Signal(s) => collect_style(&s.get_untracked(), out),
        Value::Object(_) | Value::Proxy(_) => {
            let Some(target) = value.as_target() else {
                return;
            };
            let data = target.data();
            match &*data {
                TargetData::Sequence(items) => {
                    for item in items {
                        collect_style(item, out);
                    }
                }
                TargetData::Record(map) => {
                    for (name, val) in map {
                        if !val.is_null() {
                            out.insert(name.to_string(), val.to_display_string());
                        }
                    }
                }
                TargetData::Map(_) | TargetData::Set(_) => {}
            }
        }
        _ => {}
    }
}

/// `onClick`, `onUpdate:value`, ... but not `once` or `on`.
pub fn is_event_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    bytes.len() > 2 && bytes.starts_with(b"on") && !bytes[2].is_ascii_lowercase()
}

/// Flatten a handler value into its callbacks.
pub(crate) fn handler_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Func(_) => vec![value.clone()],
        Value::Object(_) | Value::Proxy(_) => {
            let Some(target) = value.as_target() else {
                return Vec::new();
            };
            let data = target.data();
            match &*data {
                TargetData::Sequence(items) => items.iter().flat_map(handler_list).collect(),
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// Merge prop bags left to right. Classes concatenate, styles merge, event
/// handlers accumulate, everything else is overridden.
pub fn merge_props(sources: &[&Props]) -> Props {
    let mut merged = Props::new();
    for source in sources {
        for (key, value) in source.iter() {
            match &**key {
                "class" => {
                    let existing = merged.get("class").cloned().unwrap_or_default();
                    let both = Value::sequence([existing, value.clone()]);
                    merged.insert(Rc::clone(key), Value::from(normalize_class(&both)));
                }
                "style" => {
                    let existing = merged.get("style").cloned().unwrap_or_default();
                    let both = Value::sequence([existing, value.clone()]);
                    merged.insert(Rc::clone(key), Value::from(normalize_style(&both)));
                }
                k if is_event_key(k) => {
                    let combined = match merged.get(k) {
                        Some(existing) if existing != value => {
                            let mut list = handler_list(existing);
                            list.extend(handler_list(value));
                            Value::sequence(list)
                        }
                        _ => value.clone(),
                    };
                    merged.insert(Rc::clone(key), combined);
                }
                _ => {
                    merged.insert(Rc::clone(key), value.clone());
                }
            }
        }
    }
    merged
}

/// Shallow copy of `vnode`, optionally with `extra` props merged in.
///
/// Merging props the render function did not declare invalidates the patch
/// flag: blocks and hoisted nodes are upgraded to a full props diff, other
/// nodes bail out of optimized mode.
pub fn clone_vnode(vnode: &VNode, extra: Option<&Props>) -> VNode {
    let src = &vnode.0;
    let props = match (extra, &src.props) {
        (Some(extra), Some(own)) => Some(merge_props(&[own, extra])),
        (Some(extra), None) => Some(merge_props(&[extra])),
        (None, own) => own.clone(),
    };

    let mut key = src.key.clone();
    let props = props.map(|mut p| {
        if let Some(k) = p.shift_remove("key") {
            key = (!k.is_null()).then(|| k.identity_key());
        }
        p
    });

    let patch_flag = match extra {
        Some(_) if !matches!(src.ty, VNodeType::Fragment) => {
            if src.patch_flag.contains(PatchFlags::HOISTED) || vnode.is_block() {
                (src.patch_flag - PatchFlags::HOISTED) | PatchFlags::FULL_PROPS
            } else {
                PatchFlags::BAIL
            }
        }
        _ => src.patch_flag,
    };

    VNode(Rc::new(VNodeData {
        ty: src.ty.clone(),
        props: props.filter(|p| !p.is_empty()),
        key,
        children: src.children.clone(),
        shape: src.shape,
        patch_flag,
        dynamic_props: src.dynamic_props.clone(),
        dynamic_children: RefCell::new(src.dynamic_children.borrow().clone()),
        dirs: RefCell::new(src.dirs.borrow().clone()),
        transition: RefCell::new(src.transition.borrow().clone()),
        node_ref: RefCell::new(src.node_ref.borrow().clone()),
        static_count: Cell::new(src.static_count.get()),
        el: Cell::new(src.el.get()),
        anchor: Cell::new(src.anchor.get()),
        target: Cell::new(src.target.get()),
        target_anchor: Cell::new(src.target_anchor.get()),
        component: Cell::new(src.component.get()),
        suspense: RefCell::new(src.suspense.borrow().clone()),
    }))
}

/// A vnode that already backs mounted host nodes cannot be mounted twice.
pub(crate) fn clone_if_mounted(vnode: &VNode) -> VNode {
    if vnode.el().is_none() {
        vnode.clone()
    } else {
        clone_vnode(vnode, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Callback, Value};

    #[test]
    fn key_is_extracted_from_props() {
        let vnode = h("li", Some(props! { "key" => "a", "id" => "x" }), ());
        assert_eq!(vnode.key(), Some(&Value::from("a").identity_key()));
        assert!(vnode.prop("key").is_none());
        assert_eq!(vnode.prop("id"), Some(&Value::from("x")));
    }

    #[test]
    fn shape_combines_type_and_children() {
        let el = h("div", None, "hi");
        assert_eq!(el.shape(), ShapeFlags::ELEMENT | ShapeFlags::TEXT_CHILDREN);
        let list = h("ul", None, vec![h("li", None, ())]);
        assert_eq!(list.shape(), ShapeFlags::ELEMENT | ShapeFlags::ARRAY_CHILDREN);
        assert_eq!(text("x").shape(), ShapeFlags::TEXT_CHILDREN);
    }

    #[test]
    fn class_forms_are_flattened() {
        let class = Value::sequence([
            Value::from("a"),
            Value::record([("b", Value::from(true)), ("c", Value::from(false))]),
            Value::sequence(["d"]),
        ]);
        assert_eq!(normalize_class(&class), "a b d");
        let vnode = h("div", Some(props! { "class" => class }), ());
        assert_eq!(vnode.prop("class"), Some(&Value::from("a b d")));
    }

    #[test]
    fn style_forms_merge_into_canonical_text() {
        let style = Value::sequence([
            Value::from("color: red; margin: 0"),
            Value::record([("color", "blue")]),
        ]);
        assert_eq!(normalize_style(&style), "color:blue;margin:0");
    }

    #[test]
    fn merge_combines_handlers_and_classes() {
        let first = Callback::new(|_| Ok(Value::Null));
        let second = Callback::new(|_| Ok(Value::Null));
        let a = props! { "class" => "a", "onClick" => first, "id" => "one" };
        let b = props! { "class" => "b", "onClick" => second, "id" => "two" };
        let merged = merge_props(&[&a, &b]);
        assert_eq!(merged.get("class"), Some(&Value::from("a b")));
        assert_eq!(merged.get("id"), Some(&Value::from("two")));
        let handlers = merged.get("onClick").cloned().unwrap_or_default();
        assert_eq!(handler_list(&handlers).len(), 2);
    }

    #[test]
    fn clone_with_extra_props_invalidates_flags() {
        let plain = create_vnode("div", None, (), PatchFlags::TEXT, &[]);
        let extra = props! { "id" => "x" };
        let cloned = clone_vnode(&plain, Some(&extra));
        assert_eq!(cloned.patch_flag(), PatchFlags::BAIL);
        assert_eq!(cloned.prop("id"), Some(&Value::from("x")));

        let block = create_vnode("div", None, (), PatchFlags::CLASS, &[]);
        block.set_dynamic_children(Some(Vec::new()));
        let cloned = clone_vnode(&block, Some(&extra));
        assert_eq!(cloned.patch_flag(), PatchFlags::CLASS | PatchFlags::FULL_PROPS);

        let untouched = clone_vnode(&plain, None);
        assert_eq!(untouched.patch_flag(), PatchFlags::TEXT);
    }

    #[test]
    fn same_type_requires_same_key() {
        let a = h("li", Some(props! { "key" => 1 }), ());
        let b = h("li", Some(props! { "key" => 1 }), ());
        let c = h("li", Some(props! { "key" => 2 }), ());
        assert!(is_same_vnode_type(&a, &b));
        assert!(!is_same_vnode_type(&a, &c));
        assert!(!is_same_vnode_type(&a, &h("p", Some(props! { "key" => 1 }), ())));
    }

    #[test]
    fn event_keys() {
        assert!(is_event_key("onClick"));
        assert!(is_event_key("onUpdate:value"));
        assert!(!is_event_key("once"));
        assert!(!is_event_key("on"));
    }
}
