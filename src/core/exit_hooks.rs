//! Explicit registry of process-exit callbacks.
//!
//! Rust has no runtime-level shutdown hooks, so the process owner (the binary's signal
//! handler, a test, an embedding application) decides when "exit" happens and calls
//! [`ExitHooks::run_all`]. Hooks are registered under a deterministic name so the
//! pending set stays identifiable in diagnostics. Every hook runs at most once: running
//! a hook removes it from the registry.
use std::{
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::future::{BoxFuture, FutureExt, join_all};
use once_cell::sync::Lazy;

type ExitHookFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

static GLOBAL_EXIT_HOOKS: Lazy<Arc<ExitHooks>> = Lazy::new(|| Arc::new(ExitHooks::new()));

/// Identifies one registration, returned by [`ExitHooks::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitHookHandle {
    id: u64,
    name: String,
}

impl ExitHookHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Registration {
    id: u64,
    name: String,
    hook: ExitHookFn,
}

/// Registry of named callbacks to run when the process is going away.
pub struct ExitHooks {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl ExitHooks {
    /// Create an empty registry. Most callers want [`ExitHooks::global`].
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<ExitHooks> {
        GLOBAL_EXIT_HOOKS.clone()
    }

    /// Register `hook` under `name`.
    ///
    /// Names are not required to be unique; the returned handle identifies this exact
    /// registration.
    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F) -> ExitHookHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        tracing::debug!(hook = %name, id, "Exit hook registered");

        self.lock().push(Registration {
            id,
            name: name.clone(),
            hook: Box::new(move || hook().boxed()),
        });

        ExitHookHandle { id, name }
    }

    /// Remove a registration without running it. Returns false when it already ran or
    /// was removed before.
    pub fn unregister(&self, handle: &ExitHookHandle) -> bool {
        let mut registrations = self.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != handle.id);
        let removed = registrations.len() != before;
        if removed {
            tracing::debug!(hook = %handle.name, id = handle.id, "Exit hook unregistered");
        }
        removed
    }

    /// Names of the pending hooks, in registration order
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and remove every hook registered under `name`. Returns how many ran.
    pub async fn fire(&self, name: &str) -> usize {
        let selected = self.take(|r| r.name == name);
        Self::run(selected).await
    }

    /// Run and remove every pending hook concurrently. Returns how many ran.
    pub async fn run_all(&self) -> usize {
        let selected = self.take(|_| true);
        if !selected.is_empty() {
            tracing::info!(count = selected.len(), "Running exit hooks");
        }
        Self::run(selected).await
    }

    fn take(&self, mut predicate: impl FnMut(&Registration) -> bool) -> Vec<Registration> {
        let mut registrations = self.lock();
        let mut selected = Vec::new();
        let mut kept = Vec::with_capacity(registrations.len());
        for registration in registrations.drain(..) {
            if predicate(&registration) {
                selected.push(registration);
            } else {
                kept.push(registration);
            }
        }
        *registrations = kept;
        selected
    }

    async fn run(selected: Vec<Registration>) -> usize {
        let count = selected.len();
        let futures = selected.into_iter().map(|registration| {
            tracing::debug!(hook = %registration.name, "Running exit hook");
            (registration.hook)()
        });
        join_all(futures).await;
        count
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExitHooks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_hook(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> BoxFuture<'static, ()> + Send + 'static {
        let counter = counter.clone();
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_register_and_run_all() {
        let hooks = ExitHooks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        hooks.register("shutdown-127.0.0.1-8080", counting_hook(&counter));
        hooks.register("shutdown-127.0.0.1-8081", counting_hook(&counter));
        assert_eq!(
            hooks.names(),
            vec!["shutdown-127.0.0.1-8080", "shutdown-127.0.0.1-8081"]
        );

        assert_eq!(hooks.run_all().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(hooks.is_empty());

        // Hooks run at most once
        assert_eq!(hooks.run_all().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fire_by_name() {
        let hooks = ExitHooks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        hooks.register("a", counting_hook(&counter));
        hooks.register("b", counting_hook(&counter));

        assert_eq!(hooks.fire("a").await, 1);
        assert_eq!(hooks.fire("a").await, 0);
        assert!(!hooks.contains("a"));
        assert!(hooks.contains("b"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let hooks = ExitHooks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = hooks.register("same", counting_hook(&counter));
        let second = hooks.register("same", counting_hook(&counter));
        assert_eq!(first.name(), second.name());
        assert_ne!(first, second);

        assert!(hooks.unregister(&first));
        assert!(!hooks.unregister(&first));
        assert_eq!(hooks.len(), 1);

        assert_eq!(hooks.fire("same").await, 1);
        assert!(!hooks.unregister(&second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
