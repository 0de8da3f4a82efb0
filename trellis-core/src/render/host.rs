//! Host Interface
//!
//! The reconciler never touches a concrete UI tree. Every mutation goes
//! through [`HostOps`], implemented by the embedding host: a DOM bridge, a
//! native widget tree, a terminal renderer, or the recording
//! [`TestHost`](super::TestHost).

use serde::{Deserialize, Serialize};

use crate::reactive::Value;

/// Opaque handle to a node owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostNode(pub u64);

impl HostNode {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Mutation and traversal operations the reconciler calls into.
///
/// Methods take `&self`; hosts use interior mutability so the reconciler can
/// call back into them while holding other borrows.
pub trait HostOps {
    /// Insert `child` into `parent` before `anchor`, or append if `None`.
    /// Inserting a node that already has a parent moves it.
    fn insert(&self, child: HostNode, parent: HostNode, anchor: Option<HostNode>);

    /// Detach `child` from its parent.
    fn remove(&self, child: HostNode);

    fn create_element(&self, tag: &str) -> HostNode;

    fn create_text(&self, text: &str) -> HostNode;

    fn create_comment(&self, text: &str) -> HostNode;

    /// Replace the content of a text or comment node.
    fn set_text(&self, node: HostNode, text: &str);

    /// Replace all children of an element with a single text.
    fn set_element_text(&self, el: HostNode, text: &str);

    fn parent_node(&self, node: HostNode) -> Option<HostNode>;

    fn next_sibling(&self, node: HostNode) -> Option<HostNode>;

    /// Apply a property change. `next` is `Null` when the prop is removed.
    fn patch_prop(&self, el: HostNode, key: &str, prev: &Value, next: &Value);

    /// Deep-copy a node. Used to reuse hoisted static elements.
    fn clone_node(&self, _node: HostNode) -> Option<HostNode> {
        None
    }

    /// Insert pre-rendered static content, returning its first and last nodes.
    fn insert_static_content(
        &self,
        content: &str,
        parent: HostNode,
        anchor: Option<HostNode>,
    ) -> (HostNode, HostNode) {
        let node = self.create_text(content);
        self.insert(node, parent, anchor);
        (node, node)
    }
}

impl<H: HostOps + ?Sized> HostOps for std::rc::Rc<H> {
    fn insert(&self, child: HostNode, parent: HostNode, anchor: Option<HostNode>) {
        (**self).insert(child, parent, anchor)
    }

    fn remove(&self, child: HostNode) {
        (**self).remove(child)
    }

    fn create_element(&self, tag: &str) -> HostNode {
        (**self).create_element(tag)
    }

    fn create_text(&self, text: &str) -> HostNode {
        (**self).create_text(text)
    }

    fn create_comment(&self, text: &str) -> HostNode {
        (**self).create_comment(text)
    }

    fn set_text(&self, node: HostNode, text: &str) {
        (**self).set_text(node, text)
    }

    fn set_element_text(&self, el: HostNode, text: &str) {
        (**self).set_element_text(el, text)
    }

    fn parent_node(&self, node: HostNode) -> Option<HostNode> {
        (**self).parent_node(node)
    }

    fn next_sibling(&self, node: HostNode) -> Option<HostNode> {
        (**self).next_sibling(node)
    }

    fn patch_prop(&self, el: HostNode, key: &str, prev: &Value, next: &Value) {
        (**self).patch_prop(el, key, prev, next)
    }

    fn clone_node(&self, node: HostNode) -> Option<HostNode> {
        (**self).clone_node(node)
    }

    fn insert_static_content(
        &self,
        content: &str,
        parent: HostNode,
        anchor: Option<HostNode>,
    ) -> (HostNode, HostNode) {
        (**self).insert_static_content(content, parent, anchor)
    }
}
