//! Props resolution.
//!
//! Raw vnode props are split into the props a component declares, which
//! land in its shallow-reactive props record, and everything else, which
//! becomes fallthrough attrs. Declared emit listeners go to neither.

use std::rc::Rc;

use super::definition::Component;
use super::emit::is_emit_listener;
use super::instance::ComponentInstance;
use crate::reactive::{TargetData, Value};
use crate::render::{Children, PatchFlags, Props, Slots, VNode};

/// Declared props (with defaults applied) and attrs.
pub(crate) fn resolve_props(component: &Component, raw: Option<&Props>) -> (Props, Props) {
    let mut props = Props::new();
    let mut attrs = Props::new();
    let emits = component.declared_emits();

    if component.is_functional() && component.declared_props().is_empty() {
        if let Some(raw) = raw {
            for (key, value) in raw {
                props.insert(Rc::clone(key), value.clone());
                if !is_emit_listener(emits, key) {
                    attrs.insert(Rc::clone(key), value.clone());
                }
            }
        }
        return (props, attrs);
    }

    if let Some(raw) = raw {
        for (key, value) in raw {
            if component.declares_prop(key) {
                props.insert(Rc::clone(key), value.clone());
            } else if !is_emit_listener(emits, key) {
                attrs.insert(Rc::clone(key), value.clone());
            }
        }
    }
    for def in component.declared_props() {
        let missing = props.get(&def.name).map_or(true, Value::is_null);
        if missing {
            props.insert(Rc::clone(&def.name), def.default.clone().unwrap_or_default());
        }
    }
    (props, attrs)
}

/// Populate props, attrs and slots of a fresh instance. Never triggers.
pub(crate) fn init_props(instance: &ComponentInstance, vnode: &VNode) {
    let (props, attrs) = resolve_props(instance.component(), vnode.props());
    if let Some(proxy) = instance.props_proxy() {
        if let TargetData::Record(map) = &mut *proxy.target().data_mut() {
            map.extend(props);
        }
    }
    instance.set_attrs(attrs);
    instance.set_slots(slots_of(vnode));
}

/// Apply props from a parent re-render. Only changed keys trigger.
pub(crate) fn update_props(instance: &ComponentInstance, vnode: &VNode) {
    let (props, attrs) = resolve_props(instance.component(), vnode.props());
    if let Some(proxy) = instance.props_proxy() {
        let stale: Vec<Rc<str>> = match &*proxy.target().data() {
            TargetData::Record(map) => map
                .keys()
                .filter(|k| !props.contains_key(*k))
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        for key in stale {
            proxy.delete(&Value::Str(key));
        }
        for (key, value) in props {
            proxy.set(Value::Str(key), value);
        }
    }
    instance.set_attrs(attrs);
}

pub(crate) fn update_slots(instance: &ComponentInstance, vnode: &VNode) {
    instance.set_slots(slots_of(vnode));
}

fn slots_of(vnode: &VNode) -> Slots {
    match vnode.children() {
        Children::Slots(slots) => slots.clone(),
        _ => Slots::new(),
    }
}

fn has_props_changed(prev: &Props, next: &Props) -> bool {
    if prev.len() != next.len() {
        return true;
    }
    next.iter().any(|(key, value)| prev.get(key) != Some(value))
}

/// Whether a parent re-render requires the child to re-render.
pub fn should_update_component(prev: &VNode, next: &VNode, optimized: bool) -> bool {
    if !next.dirs().is_empty() || next.transition().is_some() {
        return true;
    }
    let flag = next.patch_flag();
    let emits = next.as_component().and_then(|c| c.declared_emits());

    if optimized && flag.is_optimizable() {
        if flag.contains(PatchFlags::DYNAMIC_SLOTS) {
            return true;
        }
        if flag.contains(PatchFlags::FULL_PROPS) {
            return match (prev.props(), next.props()) {
                (None, next) => next.is_some(),
                (Some(_), None) => true,
                (Some(p), Some(n)) => has_props_changed(p, n),
            };
        }
        if flag.contains(PatchFlags::PROPS) {
            let keys = next.dynamic_props().unwrap_or_default();
            return keys.iter().any(|key| {
                let prev_value = prev.prop(key);
                let next_value = next.prop(key);
                prev_value != next_value && !is_emit_listener(emits, key)
            });
        }
        return false;
    }

    let slots_stable = |vnode: &VNode| match vnode.children() {
        Children::Slots(slots) => slots.is_stable(),
        _ => false,
    };
    let has_children = |vnode: &VNode| !matches!(vnode.children(), Children::None);
    if (has_children(prev) || has_children(next)) && !slots_stable(next) {
        return true;
    }
    match (prev.props(), next.props()) {
        (None, None) => false,
        (None, Some(_)) | (Some(_), None) => true,
        (Some(p), Some(n)) => has_props_changed(p, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use crate::render::{create_vnode, h, Slots};

    fn child() -> Rc<Component> {
        Component::new("Child")
            .prop("label")
            .prop_with_default("size", 3)
            .emits(&["change"])
            .build()
    }

    #[test]
    fn split_declared_props_from_attrs() {
        let raw = props! { "label" => "x", "id" => "a", "onChange" => Value::Null, "onClick" => 1 };
        let (props, attrs) = resolve_props(&child(), Some(&raw));
        assert_eq!(props.get("label"), Some(&Value::from("x")));
        assert_eq!(props.get("size"), Some(&Value::from(3)));
        assert!(attrs.contains_key("id"));
        assert!(attrs.contains_key("onClick"));
        assert!(!attrs.contains_key("onChange"));
        assert!(!props.contains_key("onChange"));
    }

    #[test]
    fn unchanged_props_skip_update() {
        let c = child();
        let a = h(&c, Some(props! { "label" => "x" }), ());
        let b = h(&c, Some(props! { "label" => "x" }), ());
        let d = h(&c, Some(props! { "label" => "y" }), ());
        assert!(!should_update_component(&a, &b, false));
        assert!(should_update_component(&a, &d, false));
    }

    #[test]
    fn unstable_slots_force_update() {
        let c = child();
        let a = h(&c, None, Slots::default_slot(|_| Vec::new()));
        let b = h(&c, None, Slots::default_slot(|_| Vec::new()));
        assert!(should_update_component(&a, &b, false));
        let s = h(&c, None, Slots::default_slot(|_| Vec::new()).stable());
        assert!(!should_update_component(&a, &s, false));
    }

    #[test]
    fn optimized_checks_only_dynamic_props() {
        let c = child();
        let a = create_vnode(&c, Some(props! { "label" => "x", "id" => "1" }), (), PatchFlags::PROPS, &["label"]);
        let b = create_vnode(&c, Some(props! { "label" => "x", "id" => "2" }), (), PatchFlags::PROPS, &["label"]);
        assert!(!should_update_component(&a, &b, true));
        let d = create_vnode(&c, Some(props! { "label" => "z", "id" => "2" }), (), PatchFlags::PROPS, &["label"]);
        assert!(should_update_component(&a, &d, true));
    }
}
