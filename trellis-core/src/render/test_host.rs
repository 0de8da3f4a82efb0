//! Recording host for tests and remote rendering.
//!
//! [`TestHost`] keeps an in-memory node arena and logs every mutation as a
//! [`HostOp`]. The log can be shipped elsewhere as MessagePack and the tree
//! can be serialized to an HTML-like string for assertions.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::host::{HostNode, HostOps};
use super::vnode::is_event_key;
use crate::component::call_with_async_error_handling;
use crate::error::{ErrorSource, Result};
use crate::reactive::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Element(String),
    Text,
    Comment,
    /// Static markup inserted verbatim.
    Raw,
}

/// One recorded host mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostOp {
    Create {
        node: HostNode,
        kind: NodeKind,
    },
    Insert {
        node: HostNode,
        parent: HostNode,
        anchor: Option<HostNode>,
        /// The node already had a parent.
        moved: bool,
    },
    Remove {
        node: HostNode,
    },
    SetText {
        node: HostNode,
        text: String,
    },
    SetElementText {
        node: HostNode,
        text: String,
    },
    PatchProp {
        node: HostNode,
        key: String,
        /// `None` when the prop was removed.
        value: Option<String>,
    },
}

/// Per-kind totals of a recorded log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub creates: usize,
    pub inserts: usize,
    pub moves: usize,
    pub removes: usize,
    pub texts: usize,
    pub props: usize,
}

impl OpCounts {
    pub fn total(&self) -> usize {
        self.creates + self.inserts + self.moves + self.removes + self.texts + self.props
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    text: String,
    props: IndexMap<String, Value>,
    children: Vec<HostNode>,
    parent: Option<HostNode>,
}

impl Node {
    fn new(kind: NodeKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
            props: IndexMap::new(),
            children: Vec::new(),
            parent: None,
        }
    }
}

/// In-memory host with an operation log.
pub struct TestHost {
    nodes: RefCell<HashMap<HostNode, Node>>,
    next_id: Cell<u64>,
    ops: RefCell<Vec<HostOp>>,
    root: HostNode,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    /// A host with one detached `root` element to mount into.
    pub fn new() -> Self {
        let root = HostNode(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(NodeKind::Element("root".into()), ""));
        Self {
            nodes: RefCell::new(nodes),
            next_id: Cell::new(1),
            ops: RefCell::new(Vec::new()),
            root,
        }
    }

    pub fn root(&self) -> HostNode {
        self.root
    }

    fn alloc(&self, kind: NodeKind, text: &str) -> HostNode {
        let id = HostNode(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.nodes.borrow_mut().insert(id, Node::new(kind.clone(), text));
        self.ops.borrow_mut().push(HostOp::Create { node: id, kind });
        id
    }

    fn detach(nodes: &mut HashMap<HostNode, Node>, child: HostNode) -> bool {
        let Some(parent) = nodes.get_mut(&child).and_then(|n| n.parent.take()) else {
            return false;
        };
        if let Some(p) = nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        true
    }

    /// Snapshot of the operation log.
    pub fn ops(&self) -> Vec<HostOp> {
        self.ops.borrow().clone()
    }

    pub fn reset_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    pub fn counts(&self) -> OpCounts {
        let mut counts = OpCounts::default();
        for op in self.ops.borrow().iter() {
            match op {
                HostOp::Create { .. } => counts.creates += 1,
                HostOp::Insert { moved: true, .. } => counts.moves += 1,
                HostOp::Insert { .. } => counts.inserts += 1,
                HostOp::Remove { .. } => counts.removes += 1,
                HostOp::SetText { .. } | HostOp::SetElementText { .. } => counts.texts += 1,
                HostOp::PatchProp { .. } => counts.props += 1,
            }
        }
        counts
    }

    /// Encode the operation log as MessagePack.
    pub fn encode_ops(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&*self.ops.borrow())?)
    }

    pub fn decode_ops(bytes: &[u8]) -> Result<Vec<HostOp>> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn children(&self, node: HostNode) -> Vec<HostNode> {
        self.nodes
            .borrow()
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn prop(&self, node: HostNode, key: &str) -> Option<Value> {
        self.nodes.borrow().get(&node).and_then(|n| n.props.get(key).cloned())
    }

    pub fn text(&self, node: HostNode) -> Option<String> {
        self.nodes.borrow().get(&node).map(|n| n.text.clone())
    }

    /// Number of live nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Invoke the handlers bound to `event` on `node`, as a native event
    /// would. `"click"` looks up the `onClick` prop.
    pub fn fire(&self, node: HostNode, event: &str, args: &[Value]) -> Result<()> {
        let mut key = String::from("on");
        let mut chars = event.chars();
        if let Some(first) = chars.next() {
            key.extend(first.to_uppercase());
            key.push_str(chars.as_str());
        }
        let Some(handler) = self.prop(node, &key) else {
            return Ok(());
        };
        call_with_async_error_handling(&handler, args, None, ErrorSource::NativeEventHandler)
    }

    /// Serialize `node` and its subtree.
    pub fn serialize(&self, node: HostNode) -> String {
        let nodes = self.nodes.borrow();
        let mut out = String::new();
        Self::write_node(&nodes, node, &mut out);
        out
    }

    /// Serialize the children of `node`.
    pub fn inner_html(&self, node: HostNode) -> String {
        let nodes = self.nodes.borrow();
        let mut out = String::new();
        if let Some(n) = nodes.get(&node) {
            for child in &n.children {
                Self::write_node(&nodes, *child, &mut out);
            }
        }
        out
    }

    fn write_node(nodes: &HashMap<HostNode, Node>, id: HostNode, out: &mut String) {
        let Some(node) = nodes.get(&id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text | NodeKind::Raw => out.push_str(&node.text),
            NodeKind::Comment => {
                out.push_str("<!--");
                out.push_str(&node.text);
                out.push_str("-->");
            }
            NodeKind::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                for (key, value) in &node.props {
                    if is_event_key(key) || matches!(value, Value::Func(_)) {
                        continue;
                    }
                    match value {
                        Value::Bool(false) => {}
                        Value::Bool(true) => {
                            out.push(' ');
                            out.push_str(key);
                        }
                        other => {
                            out.push(' ');
                            out.push_str(key);
                            out.push_str("=\"");
                            out.push_str(&other.to_display_string());
                            out.push('"');
                        }
                    }
                }
                out.push('>');
                for child in &node.children {
                    Self::write_node(nodes, *child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    fn copy_subtree(&self, id: HostNode) -> Option<HostNode> {
        let (kind, text, props, children) = {
            let nodes = self.nodes.borrow();
            let node = nodes.get(&id)?;
            (node.kind.clone(), node.text.clone(), node.props.clone(), node.children.clone())
        };
        let copy = self.alloc(kind, &text);
        if let Some(n) = self.nodes.borrow_mut().get_mut(&copy) {
            n.props = props;
        }
        for child in children {
            if let Some(c) = self.copy_subtree(child) {
                let mut nodes = self.nodes.borrow_mut();
                if let Some(n) = nodes.get_mut(&c) {
                    n.parent = Some(copy);
                }
                if let Some(n) = nodes.get_mut(&copy) {
                    n.children.push(c);
                }
            }
        }
        Some(copy)
    }
}

impl HostOps for TestHost {
    fn insert(&self, child: HostNode, parent: HostNode, anchor: Option<HostNode>) {
        let mut nodes = self.nodes.borrow_mut();
        let moved = Self::detach(&mut nodes, child);
        if let Some(p) = nodes.get_mut(&parent) {
            let index = anchor
                .and_then(|a| p.children.iter().position(|c| *c == a))
                .unwrap_or(p.children.len());
            p.children.insert(index, child);
        }
        if let Some(c) = nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
        drop(nodes);
        self.ops.borrow_mut().push(HostOp::Insert {
            node: child,
            parent,
            anchor,
            moved,
        });
    }

    fn remove(&self, child: HostNode) {
        Self::detach(&mut self.nodes.borrow_mut(), child);
        self.ops.borrow_mut().push(HostOp::Remove { node: child });
    }

    fn create_element(&self, tag: &str) -> HostNode {
        self.alloc(NodeKind::Element(tag.to_string()), "")
    }

    fn create_text(&self, text: &str) -> HostNode {
        self.alloc(NodeKind::Text, text)
    }

    fn create_comment(&self, text: &str) -> HostNode {
        self.alloc(NodeKind::Comment, text)
    }

    fn set_text(&self, node: HostNode, text: &str) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(&node) {
            n.text = text.to_string();
        }
        self.ops.borrow_mut().push(HostOp::SetText {
            node,
            text: text.to_string(),
        });
    }

    fn set_element_text(&self, el: HostNode, text: &str) {
        let id = HostNode(self.next_id.get());
        {
            let mut nodes = self.nodes.borrow_mut();
            let old = nodes
                .get_mut(&el)
                .map(|n| std::mem::take(&mut n.children))
                .unwrap_or_default();
            for child in old {
                if let Some(c) = nodes.get_mut(&child) {
                    c.parent = None;
                }
            }
            if !text.is_empty() {
                self.next_id.set(id.0 + 1);
                let mut node = Node::new(NodeKind::Text, text);
                node.parent = Some(el);
                nodes.insert(id, node);
                if let Some(n) = nodes.get_mut(&el) {
                    n.children.push(id);
                }
            }
        }
        self.ops.borrow_mut().push(HostOp::SetElementText {
            node: el,
            text: text.to_string(),
        });
    }

    fn parent_node(&self, node: HostNode) -> Option<HostNode> {
        self.nodes.borrow().get(&node).and_then(|n| n.parent)
    }

    fn next_sibling(&self, node: HostNode) -> Option<HostNode> {
        let nodes = self.nodes.borrow();
        let parent = nodes.get(&node)?.parent?;
        let siblings = &nodes.get(&parent)?.children;
        let index = siblings.iter().position(|c| *c == node)?;
        siblings.get(index + 1).copied()
    }

    fn patch_prop(&self, el: HostNode, key: &str, _prev: &Value, next: &Value) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(&el) {
            if next.is_null() {
                n.props.shift_remove(key);
            } else {
                n.props.insert(key.to_string(), next.clone());
            }
        }
        let value = (!next.is_null()).then(|| match next {
            Value::Func(_) => "[function]".to_string(),
            other => other.to_display_string(),
        });
        self.ops.borrow_mut().push(HostOp::PatchProp {
            node: el,
            key: key.to_string(),
            value,
        });
    }

    fn clone_node(&self, node: HostNode) -> Option<HostNode> {
        self.copy_subtree(node)
    }

    fn insert_static_content(
        &self,
        content: &str,
        parent: HostNode,
        anchor: Option<HostNode>,
    ) -> (HostNode, HostNode) {
        let node = self.alloc(NodeKind::Raw, content);
        self.insert(node, parent, anchor);
        (node, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Callback;
    use std::rc::Rc;

    #[test]
    fn insert_before_anchor_and_move() {
        let host = TestHost::new();
        let root = host.root();
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.insert(a, root, None);
        host.insert(b, root, Some(a));
        assert_eq!(host.inner_html(root), "ba");

        host.insert(b, root, None);
        assert_eq!(host.inner_html(root), "ab");
        assert_eq!(host.counts().moves, 1);
        assert_eq!(host.next_sibling(a), Some(b));
        assert_eq!(host.parent_node(a), Some(root));
    }

    #[test]
    fn serialize_elements_with_props() {
        let host = TestHost::new();
        let div = host.create_element("div");
        host.patch_prop(div, "id", &Value::Null, &Value::from("x"));
        host.patch_prop(div, "hidden", &Value::Null, &Value::from(true));
        host.set_element_text(div, "hi");
        host.insert(div, host.root(), None);
        assert_eq!(host.inner_html(host.root()), "<div id=\"x\" hidden>hi</div>");

        host.patch_prop(div, "id", &Value::from("x"), &Value::Null);
        assert_eq!(host.serialize(div), "<div hidden>hi</div>");
    }

    #[test]
    fn ops_round_trip_through_msgpack() {
        let host = TestHost::new();
        let el = host.create_element("p");
        host.insert(el, host.root(), None);
        host.set_element_text(el, "x");
        let bytes = host.encode_ops().expect("encode");
        let decoded = TestHost::decode_ops(&bytes).expect("decode");
        assert_eq!(decoded, host.ops());
        host.reset_ops();
        assert_eq!(host.counts().total(), 0);
    }

    #[test]
    fn fire_invokes_bound_handler() {
        let host = TestHost::new();
        let el = host.create_element("button");
        let clicks = Rc::new(Cell::new(0));
        let c = Rc::clone(&clicks);
        let handler = Callback::new(move |_| {
            c.set(c.get() + 1);
            Ok(Value::Null)
        });
        host.patch_prop(el, "onClick", &Value::Null, &Value::from(handler));
        host.fire(el, "click", &[]).expect("handler");
        host.fire(el, "input", &[]).expect("no handler");
        assert_eq!(clicks.get(), 1);
    }

    #[test]
    fn clone_node_copies_subtree() {
        let host = TestHost::new();
        let ul = host.create_element("ul");
        let li = host.create_element("li");
        host.insert(li, ul, None);
        let copy = host.clone_node(ul).expect("clone");
        assert_ne!(copy, ul);
        assert_eq!(host.serialize(copy), "<ul><li></li></ul>");
    }
}
