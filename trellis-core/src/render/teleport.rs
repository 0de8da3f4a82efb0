//! Teleport.
//!
//! A teleport vnode leaves two anchors in place and mounts its children into
//! another host container, its target. With `disabled` set, the children
//! stay between the anchors instead. Toggling `disabled` or changing the
//! target moves the already mounted children; nothing is re-created.

use super::host::{HostNode, HostOps};
use super::renderer::{inherit_static_els, MoveType, PatchScope, Renderer};
use super::vnode::VNode;
use crate::component::warn;

/// Why teleported children are being moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeleportMove {
    /// `to` now points at another container.
    TargetChange,
    /// `disabled` flipped.
    Toggle,
    /// The teleport itself moves among its siblings.
    Reorder,
}

fn is_disabled(vnode: &VNode) -> bool {
    vnode.prop("disabled").is_some_and(|d| d.is_truthy())
}

fn resolve_target(vnode: &VNode) -> Option<HostNode> {
    let to = vnode.prop("to")?.as_number()?;
    (to.is_finite() && to >= 0.0).then(|| HostNode(to as u64))
}

impl<H: HostOps + 'static> Renderer<H> {
    pub(crate) fn process_teleport(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        scope: PatchScope<'_>,
        optimized: bool,
    ) {
        let host = &self.0.host;
        let disabled = is_disabled(n2);

        let Some(n1) = n1 else {
            let start = host.create_comment("teleport start");
            let end = host.create_comment("teleport end");
            n2.set_el(Some(start));
            n2.set_anchor(Some(end));
            host.insert(start, container, anchor);
            host.insert(end, container, anchor);

            let target = resolve_target(n2);
            n2.set_target(target);
            let target_anchor = host.create_text("");
            n2.set_target_anchor(Some(target_anchor));
            match target {
                Some(target) => host.insert(target_anchor, target, None),
                None if !disabled => warn("Invalid Teleport target on mount."),
                None => {}
            }

            let Some(children) = n2.children().as_array() else {
                return;
            };
            if disabled {
                self.mount_children(children, container, Some(end), scope, optimized, 0);
            } else if let Some(target) = target {
                self.mount_children(children, target, Some(target_anchor), scope, optimized, 0);
            }
            return;
        };

        n2.set_el(n1.el());
        n2.set_anchor(n1.anchor());
        n2.set_target(n1.target());
        n2.set_target_anchor(n1.target_anchor());
        let main_anchor = n1.anchor();
        let was_disabled = is_disabled(n1);

        let (current_container, current_anchor) = if was_disabled {
            (Some(container), main_anchor)
        } else {
            (n1.target(), n1.target_anchor())
        };
        if let Some(current) = current_container {
            match (n1.dynamic_children(), n2.dynamic_children()) {
                (Some(old), Some(new)) => {
                    self.patch_block_children(&old, &new, current, scope);
                    inherit_static_els(n1, n2);
                }
                _ if !optimized => {
                    self.patch_children(n1, n2, current, current_anchor, scope, false)
                }
                _ => {}
            }
        }

        if disabled {
            if !was_disabled {
                self.move_teleport(n2, container, main_anchor, TeleportMove::Toggle, scope);
            }
            return;
        }
        if n2.prop("to") != n1.prop("to") {
            match resolve_target(n2) {
                Some(next) => {
                    n2.set_target(Some(next));
                    self.move_teleport(n2, next, None, TeleportMove::TargetChange, scope);
                }
                None => warn("Invalid Teleport target on update."),
            }
        } else if was_disabled {
            if let Some(target) = n2.target() {
                let anchor = n2.target_anchor();
                self.move_teleport(n2, target, anchor, TeleportMove::Toggle, scope);
            }
        }
    }

    pub(crate) fn move_teleport(
        &self,
        vnode: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        kind: TeleportMove,
        scope: PatchScope<'_>,
    ) {
        let host = &self.0.host;
        if kind == TeleportMove::TargetChange {
            if let Some(target_anchor) = vnode.target_anchor() {
                host.insert(target_anchor, container, anchor);
            }
        }
        let reorder = kind == TeleportMove::Reorder;
        if reorder {
            if let Some(el) = vnode.el() {
                host.insert(el, container, anchor);
            }
        }
        // Enabled teleports keep their children in the target on reorder.
        if !reorder || is_disabled(vnode) {
            if let Some(children) = vnode.children().as_array() {
                for child in children.to_vec() {
                    self.move_(&child, container, anchor, MoveType::Reorder, scope);
                }
            }
        }
        if reorder {
            if let Some(end) = vnode.anchor() {
                host.insert(end, container, anchor);
            }
        }
    }

    /// Detach the target anchor and, unless the children are parked in the
    /// main view and the teleport stays, the main anchor and the children.
    pub(crate) fn remove_teleport(&self, vnode: &VNode, scope: PatchScope<'_>, do_remove: bool) {
        let host = &self.0.host;
        if vnode.target().is_some() {
            if let Some(target_anchor) = vnode.target_anchor() {
                host.remove(target_anchor);
            }
        }
        if !do_remove && is_disabled(vnode) {
            return;
        }
        if let Some(end) = vnode.anchor() {
            host.remove(end);
        }
        if let Some(children) = vnode.children().as_array() {
            for child in children.to_vec() {
                self.remove(&child, scope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{h, teleport, TestHost};
    use std::rc::Rc;

    fn setup() -> (Renderer<Rc<TestHost>>, Rc<TestHost>, HostNode, HostNode) {
        let host = Rc::new(TestHost::new());
        let renderer = Renderer::new(Rc::clone(&host));
        let main = host.create_element("main");
        let modal = host.create_element("aside");
        host.insert(main, host.root(), None);
        host.insert(modal, host.root(), None);
        (renderer, host, main, modal)
    }

    #[test]
    fn children_mount_into_the_target() {
        let (renderer, host, main, modal) = setup();
        let tree = h("div", None, vec![teleport(modal, false, vec![h("p", None, "hi")])]);
        renderer.render(Some(tree), main).unwrap();
        assert_eq!(
            host.inner_html(main),
            "<div><!--teleport start--><!--teleport end--></div>"
        );
        assert_eq!(host.inner_html(modal), "<p>hi</p>");

        renderer.render(None, main).unwrap();
        assert_eq!(host.inner_html(main), "");
        assert_eq!(host.inner_html(modal), "");
    }

    #[test]
    fn toggling_disabled_moves_children_back_and_forth() {
        let (renderer, host, main, modal) = setup();
        let view = |disabled| h("div", None, vec![teleport(modal, disabled, vec![h("p", None, "hi")])]);
        renderer.render(Some(view(false)), main).unwrap();
        host.reset_ops();

        renderer.render(Some(view(true)), main).unwrap();
        assert_eq!(
            host.inner_html(main),
            "<div><!--teleport start--><p>hi</p><!--teleport end--></div>"
        );
        assert_eq!(host.inner_html(modal), "");
        assert_eq!(host.counts().creates, 0);

        renderer.render(Some(view(false)), main).unwrap();
        assert_eq!(host.inner_html(modal), "<p>hi</p>");
    }

    #[test]
    fn target_change_moves_children() {
        let (renderer, host, main, modal) = setup();
        let other = host.create_element("footer");
        host.insert(other, host.root(), None);
        renderer
            .render(Some(teleport(modal, false, vec![h("p", None, "hi")])), main)
            .unwrap();
        renderer
            .render(Some(teleport(other, false, vec![h("p", None, "hi")])), main)
            .unwrap();
        assert_eq!(host.inner_html(modal), "");
        assert_eq!(host.inner_html(other), "<p>hi</p>");
    }
}
