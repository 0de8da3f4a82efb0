//! Reactive Context
//!
//! The reactive context tracks which computation is currently running, and
//! whether reads should currently be tracked at all.
//!
//! # Implementation
//!
//! We use thread-local stacks. When an effect runs it pushes itself onto the
//! effect stack and enables tracking; when it completes, the guard pops both.
//! Nested effects (a computed read inside a render effect) simply push on top.
//!
//! Tracking suppression is a second stack of saved flags. `pause_tracking`
//! and `enable_tracking` push the current flag and set a new one,
//! `reset_tracking` restores the last saved flag. The RAII [`TrackingGuard`]
//! keeps push and pop paired through panics and early returns.

use std::cell::{Cell, RefCell};

use super::effect::{EffectScope, ReactiveEffect};
use super::SubscriberId;

thread_local! {
    static EFFECT_STACK: RefCell<Vec<ReactiveEffect>> = const { RefCell::new(Vec::new()) };
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the running effect when dropped.
///
/// This ensures the context stack is properly maintained even if the
/// computation panics.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given effect.
    ///
    /// While this context is active, reads of reactive values register the
    /// effect as a subscriber. Tracking is enabled for the duration even if
    /// an outer computation paused it.
    pub fn enter(effect: ReactiveEffect) -> Self {
        let subscriber_id = effect.id();
        EFFECT_STACK.with(|stack| stack.borrow_mut().push(effect));
        enable_tracking();
        Self { subscriber_id }
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        EFFECT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The effect currently running, if any.
    pub fn current() -> Option<ReactiveEffect> {
        EFFECT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        EFFECT_STACK.with(|stack| stack.borrow().last().map(ReactiveEffect::id))
    }

    /// Whether the given effect is anywhere on the running stack.
    pub fn contains(id: SubscriberId) -> bool {
        EFFECT_STACK.with(|stack| stack.borrow().iter().any(|e| e.id() == id))
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        reset_tracking();
        let popped = EFFECT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right context.
        if let Some(effect) = &popped {
            debug_assert_eq!(
                effect.id(),
                self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id,
                effect.id()
            );
        }
        drop(popped);
    }
}

/// Suspend dependency collection until the matching [`reset_tracking`].
pub fn pause_tracking() {
    let current = SHOULD_TRACK.with(Cell::get);
    TRACK_STACK.with(|stack| stack.borrow_mut().push(current));
    SHOULD_TRACK.with(|flag| flag.set(false));
}

/// Force dependency collection on until the matching [`reset_tracking`].
pub fn enable_tracking() {
    let current = SHOULD_TRACK.with(Cell::get);
    TRACK_STACK.with(|stack| stack.borrow_mut().push(current));
    SHOULD_TRACK.with(|flag| flag.set(true));
}

/// Restore the tracking flag saved by the last pause or enable.
pub fn reset_tracking() {
    let last = TRACK_STACK.with(|stack| stack.borrow_mut().pop());
    SHOULD_TRACK.with(|flag| flag.set(last.unwrap_or(true)));
}

/// Whether a read right now would be recorded.
pub fn should_track() -> bool {
    SHOULD_TRACK.with(Cell::get)
}

/// RAII pairing for [`pause_tracking`]/[`enable_tracking`] and [`reset_tracking`].
#[must_use = "tracking is restored when the guard is dropped"]
pub struct TrackingGuard {
    _private: (),
}

impl TrackingGuard {
    pub fn pause() -> Self {
        pause_tracking();
        Self { _private: () }
    }

    pub fn enable() -> Self {
        enable_tracking();
        Self { _private: () }
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Run `f` with tracking paused.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TrackingGuard::pause();
    f()
}

/// Guard that keeps an [`EffectScope`] active for effect collection.
pub(crate) struct ScopeGuard {
    _private: (),
}

impl ScopeGuard {
    pub(crate) fn enter(scope: EffectScope) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope));
        Self { _private: () }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let popped = SCOPE_STACK.with(|stack| stack.borrow_mut().pop());
        drop(popped);
    }
}

/// The innermost active effect scope.
pub(crate) fn active_scope() -> Option<EffectScope> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{EffectOptions, ReactiveEffect};

    #[test]
    fn context_tracks_effect() {
        let effect = ReactiveEffect::new(|| {}, EffectOptions::default());
        let id = effect.id();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(effect.clone());

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn nested_contexts() {
        let outer = ReactiveEffect::new(|| {}, EffectOptions::default());
        let inner = ReactiveEffect::new(|| {}, EffectOptions::default());

        {
            let _ctx1 = ReactiveContext::enter(outer.clone());
            assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));

            {
                let _ctx2 = ReactiveContext::enter(inner.clone());
                assert_eq!(ReactiveContext::current_subscriber(), Some(inner.id()));
                assert!(ReactiveContext::contains(outer.id()));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn pause_and_reset_are_balanced() {
        assert!(should_track());
        pause_tracking();
        assert!(!should_track());
        enable_tracking();
        assert!(should_track());
        reset_tracking();
        assert!(!should_track());
        reset_tracking();
        assert!(should_track());
    }

    #[test]
    fn tracking_guard_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = TrackingGuard::pause();
            assert!(!should_track());
            panic!("inside paused section");
        });
        assert!(result.is_err());
        assert!(should_track());
    }
}
