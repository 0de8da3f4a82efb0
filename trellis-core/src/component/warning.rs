//! Framework warnings.
//!
//! Warnings report misuse (writing to a readonly store, emitting an
//! undeclared event, an invalid teleport target). They never stop
//! execution. A warning goes to the first sink available:
//!
//! 1. the warn handler of the app whose component is running,
//! 2. the process-wide handler installed with [`set_warn_handler`],
//! 3. `tracing::warn!`.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::instance::{current_instance, instance_trace};
use crate::error::ErrorSource;
use crate::reactive::TrackingGuard;

/// Process-wide warning sink: `(message, component trace)`.
pub type WarnSink = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

fn global_sink() -> &'static RwLock<Option<WarnSink>> {
    static SINK: OnceLock<RwLock<Option<WarnSink>>> = OnceLock::new();
    SINK.get_or_init(|| RwLock::new(None))
}

/// Install a process-wide warning handler, replacing any previous one.
pub fn set_warn_handler<F>(f: F)
where
    F: Fn(&str, &[String]) + Send + Sync + 'static,
{
    *global_sink().write() = Some(Arc::new(f));
}

pub fn clear_warn_handler() {
    *global_sink().write() = None;
}

/// Emit a warning with the current component trace.
pub fn warn(message: impl AsRef<str>) {
    let message = message.as_ref();
    let _guard = TrackingGuard::pause();
    let trace = instance_trace();

    if let Some(instance) = current_instance() {
        if let Some(handler) = instance.app().config().warn_handler.clone() {
            let outcome = crate::error::catch_panic(ErrorSource::AppWarnHandler, || {
                handler(message, &trace);
                Ok(())
            });
            if let Err(err) = outcome {
                tracing::error!(error = %err, "warn handler failed");
            }
            return;
        }
    }

    let sink = global_sink().read().clone();
    match sink {
        Some(sink) => sink(message, &trace),
        None if trace.is_empty() => tracing::warn!("{message}"),
        None => {
            let trace = trace
                .iter()
                .map(|name| format!("at <{name}>"))
                .collect::<Vec<_>>()
                .join("\n");
            tracing::warn!("{message}\n{trace}");
        }
    }
}
