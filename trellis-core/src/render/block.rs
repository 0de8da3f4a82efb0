//! Block tree construction.
//!
//! A block is a vnode that carries a flat list of its dynamic descendants.
//! While a block is open, every vnode created through the builder with a
//! dynamic patch flag (or that is a component, teleport or suspense) is
//! collected into it. Blocks nest: closing a block pushes the block vnode
//! itself into its parent's list.
//!
//! The builder is passed explicitly to render functions through the render
//! context, so block collection has no hidden global state.

use std::cell::{Cell, RefCell};

use super::flags::{PatchFlags, ShapeFlags};
use super::vnode::{build_vnode, Children, Props, VNode, VNodeType};

#[derive(Default)]
pub struct BlockBuilder {
    /// Open blocks. `None` entries come from `open_block(true)` and collect
    /// nothing.
    stack: RefCell<Vec<Option<Vec<VNode>>>>,
    /// Collection is enabled while this is positive.
    tracking: Cell<i32>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            stack: RefCell::new(Vec::new()),
            tracking: Cell::new(1),
        }
    }

    /// Start collecting dynamic descendants. With `disable_tracking`, the
    /// block collects nothing: used for `v-for`-style fragments whose
    /// children are diffed in full.
    pub fn open_block(&self, disable_tracking: bool) {
        self.stack
            .borrow_mut()
            .push(if disable_tracking { None } else { Some(Vec::new()) });
    }

    /// Pop the innermost block and return what it collected.
    pub fn close_block(&self) -> Option<Vec<VNode>> {
        self.stack.borrow_mut().pop().flatten()
    }

    /// Adjust tracking. Used around cached subtrees that must not be
    /// collected again.
    pub fn set_block_tracking(&self, delta: i32) {
        self.tracking.set(self.tracking.get() + delta);
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    fn push_dynamic(&self, vnode: &VNode) {
        if self.tracking.get() <= 0 {
            return;
        }
        if let Some(Some(current)) = self.stack.borrow_mut().last_mut() {
            current.push(vnode.clone());
        }
    }

    /// Create a vnode and register it in the open block if it is dynamic.
    pub fn create_vnode(
        &self,
        ty: impl Into<VNodeType>,
        props: Option<Props>,
        children: impl Into<Children>,
        patch_flag: PatchFlags,
        dynamic_props: &[&str],
    ) -> VNode {
        let vnode = build_vnode(ty.into(), props, children.into(), patch_flag, dynamic_props);
        let tracked_shape = ShapeFlags::COMPONENT | ShapeFlags::TELEPORT | ShapeFlags::SUSPENSE;
        if patch_flag.is_dynamic() || vnode.shape().intersects(tracked_shape) {
            self.push_dynamic(&vnode);
        }
        vnode
    }

    /// Create a block vnode from the innermost open block and close it.
    ///
    /// Call [`open_block`](Self::open_block) before building the children.
    pub fn create_block(
        &self,
        ty: impl Into<VNodeType>,
        props: Option<Props>,
        children: impl Into<Children>,
        patch_flag: PatchFlags,
        dynamic_props: &[&str],
    ) -> VNode {
        let vnode = build_vnode(ty.into(), props, children.into(), patch_flag, dynamic_props);
        let collected = self.close_block().unwrap_or_default();
        vnode.set_dynamic_children(Some(collected));
        self.push_dynamic(&vnode);
        vnode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vnode::text;

    #[test]
    fn block_collects_only_dynamic_descendants() {
        let b = BlockBuilder::new();
        b.open_block(false);
        let stat = b.create_vnode("span", None, "static", PatchFlags::empty(), &[]);
        let hoisted = b.create_vnode("span", None, "hoisted", PatchFlags::HOISTED, &[]);
        let dynamic = b.create_vnode("span", None, "x", PatchFlags::TEXT, &[]);
        let root = b.create_block("div", None, vec![stat, hoisted, dynamic.clone()], PatchFlags::empty(), &[]);

        let collected = root.dynamic_children().unwrap_or_default();
        assert_eq!(collected.len(), 1);
        assert!(collected[0].ptr_eq(&dynamic));
        assert_eq!(b.depth(), 0);
    }

    #[test]
    fn nested_blocks_register_in_parent() {
        let b = BlockBuilder::new();
        b.open_block(false);
        b.open_block(false);
        let leaf = b.create_vnode("i", None, "x", PatchFlags::TEXT, &[]);
        let inner = b.create_block(VNodeType::Fragment, None, vec![leaf], PatchFlags::STABLE_FRAGMENT, &[]);
        let outer = b.create_block("div", None, vec![inner.clone()], PatchFlags::empty(), &[]);

        let collected = outer.dynamic_children().unwrap_or_default();
        assert_eq!(collected.len(), 1);
        assert!(collected[0].ptr_eq(&inner));
        assert_eq!(inner.dynamic_children().map(|c| c.len()), Some(1));
    }

    #[test]
    fn disabled_tracking_collects_nothing() {
        let b = BlockBuilder::new();
        b.open_block(false);
        b.set_block_tracking(-1);
        b.create_vnode("i", None, "x", PatchFlags::TEXT, &[]);
        b.set_block_tracking(1);
        let root = b.create_block("div", None, vec![text("a")], PatchFlags::empty(), &[]);
        assert_eq!(root.dynamic_children().map(|c| c.len()), Some(0));

        b.open_block(true);
        b.create_vnode("i", None, "x", PatchFlags::TEXT, &[]);
        assert!(b.close_block().is_none());
    }
}
