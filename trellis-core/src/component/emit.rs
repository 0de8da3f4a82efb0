//! Component events.
//!
//! `emit("change", args)` looks up the `onChange` prop the parent passed and
//! calls it. `onChangeOnce` listeners fire on the first emit only.

use std::rc::Rc;

use super::error_handling::call_with_async_error_handling;
use super::instance::ComponentInstance;
use super::warning::warn;
use crate::error::{ErrorSource, Result};
use crate::reactive::Value;

/// `change` -> `onChange`, `update:value` -> `onUpdate:value`.
pub fn handler_key(event: &str) -> String {
    let mut key = String::with_capacity(event.len() + 2);
    key.push_str("on");
    let mut chars = event.chars();
    if let Some(first) = chars.next() {
        key.extend(first.to_uppercase());
        key.push_str(chars.as_str());
    }
    key
}

/// `item-click` -> `itemClick`.
pub fn camelize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper = false;
    for c in s.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Whether `key` is a listener for one of `emits`.
pub(crate) fn is_emit_listener(emits: Option<&[Rc<str>]>, key: &str) -> bool {
    let Some(emits) = emits else {
        return false;
    };
    let Some(rest) = key.strip_prefix("on") else {
        return false;
    };
    let rest = rest.strip_suffix("Once").unwrap_or(rest);
    emits.iter().any(|e| {
        let k = handler_key(e);
        k[2..] == *rest || handler_key(&camelize(e))[2..] == *rest
    })
}

/// Emit `event` from `instance` to the listeners bound by its parent.
pub fn emit(instance: &Rc<ComponentInstance>, event: &str, args: &[Value]) -> Result<()> {
    if instance.is_unmounted() {
        return Ok(());
    }
    let props = instance.vnode().props().cloned().unwrap_or_default();

    let mut key = handler_key(event);
    if !props.contains_key(key.as_str()) && event.contains('-') {
        key = handler_key(&camelize(event));
    }

    if let Some(emits) = instance.component().declared_emits() {
        let declared = emits.iter().any(|e| &**e == event);
        if !declared && !instance.component().declares_prop(&key) {
            warn(format!(
                "Component emitted event \"{event}\" but it is neither declared in the emits option nor as an \"{key}\" prop."
            ));
        }
    }

    let mut first = None;
    if let Some(handler) = props.get(key.as_str()) {
        if let Err(err) = call_with_async_error_handling(
            handler,
            args,
            Some(instance),
            ErrorSource::ComponentEventHandler,
        ) {
            first = Some(err);
        }
    }

    let once_key = format!("{key}Once");
    if let Some(handler) = props.get(once_key.as_str()) {
        let fresh = instance.emitted_once.borrow_mut().insert(Rc::from(key.as_str()));
        if fresh {
            if let Err(err) = call_with_async_error_handling(
                handler,
                args,
                Some(instance),
                ErrorSource::ComponentEventHandler,
            ) {
                first.get_or_insert(err);
            }
        }
    }
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_keys() {
        assert_eq!(handler_key("change"), "onChange");
        assert_eq!(handler_key("update:value"), "onUpdate:value");
        assert_eq!(camelize("item-click"), "itemClick");
        assert_eq!(handler_key(&camelize("item-click")), "onItemClick");
    }

    #[test]
    fn emit_listener_detection() {
        let emits: Vec<Rc<str>> = vec![Rc::from("change"), Rc::from("item-click")];
        assert!(is_emit_listener(Some(&emits), "onChange"));
        assert!(is_emit_listener(Some(&emits), "onChangeOnce"));
        assert!(is_emit_listener(Some(&emits), "onItemClick"));
        assert!(!is_emit_listener(Some(&emits), "onInput"));
        assert!(!is_emit_listener(None, "onChange"));
    }
}
