//! Shape and patch flags.
//!
//! The shape of a vnode says what it is (element, component, teleport,
//! suspense) and what kind of children it carries. The patch flags say which
//! aspects of an element can change between renders, so the reconciler can
//! check only those.

bitflags::bitflags! {
    /// What a vnode is, combined with the kind of its children.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShapeFlags: u32 {
        const ELEMENT              = 1;
        const FUNCTIONAL_COMPONENT = 1 << 1;
        const STATEFUL_COMPONENT   = 1 << 2;
        const TEXT_CHILDREN        = 1 << 3;
        const ARRAY_CHILDREN       = 1 << 4;
        const SLOTS_CHILDREN       = 1 << 5;
        const TELEPORT             = 1 << 6;
        const SUSPENSE             = 1 << 7;
        const COMPONENT = Self::FUNCTIONAL_COMPONENT.bits() | Self::STATEFUL_COMPONENT.bits();
    }
}

bitflags::bitflags! {
    /// Which parts of a vnode are dynamic.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PatchFlags: u32 {
        /// Dynamic text content.
        const TEXT             = 1;
        const CLASS            = 1 << 1;
        const STYLE            = 1 << 2;
        /// Dynamic props other than class/style, listed in `dynamic_props`.
        const PROPS            = 1 << 3;
        /// Props with dynamic keys; a full diff is needed.
        const FULL_PROPS       = 1 << 4;
        const HYDRATE_EVENTS   = 1 << 5;
        /// A fragment whose children order never changes.
        const STABLE_FRAGMENT  = 1 << 6;
        const KEYED_FRAGMENT   = 1 << 7;
        const UNKEYED_FRAGMENT = 1 << 8;
        /// Only non-prop patching is needed (refs, directives).
        const NEED_PATCH       = 1 << 9;
        const DYNAMIC_SLOTS    = 1 << 10;
        /// Static, hoisted out of the render function. Never patched.
        const HOISTED          = 1 << 30;
        /// Leave optimized mode: diff this subtree in full.
        const BAIL             = 1 << 31;
    }
}

impl PatchFlags {
    /// Whether the flag marks a vnode for collection into its block.
    pub fn is_dynamic(self) -> bool {
        !self.is_empty()
            && !self.intersects(PatchFlags::HOISTED | PatchFlags::BAIL)
            && self != PatchFlags::HYDRATE_EVENTS
    }

    /// Whether the reconciler can use the element fast path.
    pub fn is_optimizable(self) -> bool {
        !self.is_empty() && !self.intersects(PatchFlags::HOISTED | PatchFlags::BAIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_covers_both_kinds() {
        assert!(ShapeFlags::COMPONENT.contains(ShapeFlags::STATEFUL_COMPONENT));
        assert!(ShapeFlags::COMPONENT.contains(ShapeFlags::FUNCTIONAL_COMPONENT));
        assert!(!ShapeFlags::COMPONENT.contains(ShapeFlags::ELEMENT));
    }

    #[test]
    fn sentinel_flags_are_not_dynamic() {
        assert!(PatchFlags::TEXT.is_dynamic());
        assert!((PatchFlags::CLASS | PatchFlags::STYLE).is_dynamic());
        assert!(!PatchFlags::HOISTED.is_dynamic());
        assert!(!PatchFlags::BAIL.is_dynamic());
        assert!(!PatchFlags::HYDRATE_EVENTS.is_dynamic());
        assert!(!PatchFlags::empty().is_dynamic());
    }

    #[test]
    fn hoisted_and_bail_skip_the_fast_path() {
        assert!(PatchFlags::TEXT.is_optimizable());
        assert!(!PatchFlags::HOISTED.is_optimizable());
        assert!(!(PatchFlags::BAIL | PatchFlags::TEXT).is_optimizable());
    }
}
