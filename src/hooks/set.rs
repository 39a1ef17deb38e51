//! # HookSet: ordered, engine-owned interceptor registry
//!
//! [`HookSet`] holds the interceptors of one engine. There is no process-wide
//! registry: registration and teardown follow the owning engine.
//!
//! ```text
//! fire(delivery, f)
//!   ├─ snapshot Arc<dyn Intercept> list (read lock, released)
//!   ├─ for hook in registration order:
//!   │     verdict = catch_unwind(f(hook))
//!   │     ├─ panic  → logged, treated as Continue
//!   │     └─ Cancel → stop, return Cancel
//!   └─ Continue
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::primary;

use super::intercept::{Delivery, Intercept, Verdict};

/// Registration handle returned by [`HookSet::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Interceptors in registration order.
#[derive(Default)]
pub struct HookSet {
    next: AtomicU64,
    hooks: RwLock<Vec<(HookId, Arc<dyn Intercept>)>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn Intercept>) -> HookId {
        let id = HookId(self.next.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push((id, hook));
        id
    }

    /// Removes a registration; `false` if it was already gone.
    pub fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(hid, _)| *hid != id);
        hooks.len() != before
    }

    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Runs `f` against every interceptor until one cancels.
    pub(crate) fn fire<F>(&self, delivery: Delivery, what: &'static str, mut f: F) -> Verdict
    where
        F: FnMut(&dyn Intercept) -> Verdict,
    {
        if delivery == Delivery::Primary && !primary::on_primary() {
            tracing::warn!(hook = what, "primary-only notification fired off the primary context");
        }

        let hooks: Vec<Arc<dyn Intercept>> =
            self.hooks.read().iter().map(|(_, h)| Arc::clone(h)).collect();

        for hook in hooks {
            match catch_unwind(AssertUnwindSafe(|| f(hook.as_ref()))) {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::Cancel) => {
                    tracing::debug!(hook = what, interceptor = hook.name(), "transition cancelled");
                    return Verdict::Cancel;
                }
                Err(panic) => {
                    tracing::error!(
                        hook = what,
                        interceptor = hook.name(),
                        panic = ?panic,
                        "interceptor panicked"
                    );
                }
            }
        }
        Verdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::hooks::intercept::FormatLoad;
    use crate::format::Format;

    struct Counting(Arc<AtomicUsize>, Verdict);

    impl Intercept for Counting {
        fn on_format_load(&self, _ev: &FormatLoad<'_>) -> Verdict {
            self.0.fetch_add(1, Ordering::SeqCst);
            self.1
        }
    }

    struct Panicking;

    impl Intercept for Panicking {
        fn on_format_load(&self, _ev: &FormatLoad<'_>) -> Verdict {
            panic!("boom");
        }
    }

    fn format() -> Arc<Format> {
        Arc::new(
            serde_json::from_str(r#"{"id":"f","schematic":"s","rooms":[{"id":"a"}]}"#).unwrap(),
        )
    }

    fn fire_load(set: &HookSet, f: &Arc<Format>) -> Verdict {
        set.fire(Delivery::Any, "format_load", |h| {
            h.on_format_load(&FormatLoad { format: f })
        })
    }

    #[test]
    fn test_cancel_stops_later_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let set = HookSet::new();
        set.register(Arc::new(Counting(calls.clone(), Verdict::Cancel)));
        set.register(Arc::new(Counting(calls.clone(), Verdict::Continue)));

        assert_eq!(fire_load(&set, &format()), Verdict::Cancel);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second hook must not run");
    }

    #[test]
    fn test_unregister_removes_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let set = HookSet::new();
        let id = set.register(Arc::new(Counting(calls.clone(), Verdict::Cancel)));
        assert!(set.unregister(id));
        assert!(!set.unregister(id));
        assert!(set.is_empty());
        assert_eq!(fire_load(&set, &format()), Verdict::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_hook_is_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let set = HookSet::new();
        set.register(Arc::new(Panicking));
        set.register(Arc::new(Counting(calls.clone(), Verdict::Continue)));

        assert_eq!(fire_load(&set, &format()), Verdict::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
