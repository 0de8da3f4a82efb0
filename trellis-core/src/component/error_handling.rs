//! Error boundaries.
//!
//! User code runs inside [`call_with_error_handling`]. A failure (returned
//! error or caught panic) is routed by [`handle_error`]:
//!
//! 1. to the `error_captured` hooks of each ancestor, nearest first; a hook
//!    returning `true` handles the error,
//! 2. then to the app-level error handler,
//! 3. otherwise it is logged and handed back to the caller, which surfaces
//!    it from the flush or render that triggered it.

use std::rc::Rc;

use tracing::error;

use super::instance::ComponentInstance;
use crate::error::{catch_panic, Error, ErrorSource, Result};
use crate::reactive::{untracked, Value};
use crate::render::handler_list;

/// Run `f`, routing failures through [`handle_error`].
///
/// Returns `Ok(None)` when `f` failed and the error was handled.
pub fn call_with_error_handling<R>(
    f: impl FnOnce() -> Result<R>,
    instance: Option<&Rc<ComponentInstance>>,
    source: ErrorSource,
) -> Result<Option<R>> {
    match catch_panic(source, f) {
        Ok(value) => Ok(Some(value)),
        Err(err) => handle_error(err, instance, source).map(|()| None),
    }
}

/// Invoke a handler value: a callback or a sequence of callbacks.
///
/// Each callback runs independently; one failing does not prevent the
/// others from running. The first unhandled error is returned.
pub fn call_with_async_error_handling(
    handler: &Value,
    args: &[Value],
    instance: Option<&Rc<ComponentInstance>>,
    source: ErrorSource,
) -> Result<()> {
    let mut first = None;
    for callback in handler_list(handler) {
        let Some(callback) = callback.as_callback().cloned() else {
            continue;
        };
        let result = call_with_error_handling(|| callback.call(args).map(drop), instance, source);
        if let Err(err) = result {
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Route an error caught at `source` while running code of `instance`.
///
/// Returns `Ok(())` when a hook or the app handler took care of it, and the
/// error itself otherwise.
pub fn handle_error(
    err: Error,
    instance: Option<&Rc<ComponentInstance>>,
    source: ErrorSource,
) -> Result<()> {
    if let Some(instance) = instance {
        let origin = Some(instance.uid());
        let mut cur = instance.parent();
        while let Some(ancestor) = cur {
            for hook in ancestor.error_captured_hooks() {
                if untracked(|| hook(&err, origin, source)) {
                    return Ok(());
                }
            }
            cur = ancestor.parent();
        }

        if let Some(handler) = instance.app().config().error_handler.clone() {
            let outcome = catch_panic(ErrorSource::AppErrorHandler, || {
                untracked(|| handler(&err, origin, source));
                Ok(())
            });
            if let Err(fail) = outcome {
                log_error(&fail, ErrorSource::AppErrorHandler);
            }
            return Ok(());
        }
    }
    log_error(&err, source);
    Err(err)
}

fn log_error(err: &Error, source: ErrorSource) {
    error!(%source, error = %err, "unhandled error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Callback;
    use std::cell::Cell;

    #[test]
    fn without_instance_errors_are_returned() {
        let result = call_with_error_handling(
            || -> Result<()> { Err(Error::user("boom")) },
            None,
            ErrorSource::NativeEventHandler,
        );
        assert!(matches!(result, Err(Error::User(m)) if m == "boom"));
    }

    #[test]
    fn panics_become_errors() {
        let result = call_with_error_handling(
            || -> Result<()> { panic!("exploded") },
            None,
            ErrorSource::WatchCallback,
        );
        match result {
            Err(Error::Panicked { origin, message }) => {
                assert_eq!(origin, ErrorSource::WatchCallback);
                assert!(message.contains("exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn handler_arrays_run_independently() {
        let calls = Rc::new(Cell::new(0));
        let c1 = Rc::clone(&calls);
        let c2 = Rc::clone(&calls);
        let failing = Callback::new(move |_| {
            c1.set(c1.get() + 1);
            Err(Error::user("first listener failed"))
        });
        let working = Callback::new(move |_| {
            c2.set(c2.get() + 1);
            Ok(Value::Null)
        });
        let handlers = Value::sequence([Value::from(failing), Value::from(working)]);
        let result = call_with_async_error_handling(
            &handlers,
            &[],
            None,
            ErrorSource::ComponentEventHandler,
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn successful_call_returns_value() {
        let result = call_with_error_handling(|| Ok(7), None, ErrorSource::SetupFunction);
        assert!(matches!(result, Ok(Some(7))));
    }
}
