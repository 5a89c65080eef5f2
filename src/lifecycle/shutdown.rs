//! Shutdown coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

type TeardownHook = Box<dyn FnOnce() + Send>;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to,
/// and the list of teardown hooks run once after they have stopped.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    hooks: Mutex<Vec<(String, TeardownHook)>>,
    torn_down: AtomicBool,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            hooks: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Register a hook for [`teardown`](Self::teardown).
    ///
    /// Hooks registered after teardown are never run.
    pub fn on_teardown<F>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        if self.is_torn_down() {
            tracing::warn!(hook = %name, "Teardown already ran, hook ignored");
            return;
        }
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, Box::new(hook)));
    }

    /// Run every hook once, in registration order. Returns how many ran.
    ///
    /// Call after request processing has stopped. Later calls do nothing.
    pub fn teardown(&self) -> usize {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        let count = hooks.len();
        for (name, hook) in hooks {
            tracing::debug!(hook = %name, "Running teardown hook");
            hook();
        }
        count
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_teardown_runs_hooks_once_in_order() {
        let shutdown = Shutdown::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let order = order.clone();
            shutdown.on_teardown(name, move || order.lock().unwrap().push(name));
        }

        assert_eq!(shutdown.teardown(), 2);
        assert_eq!(shutdown.teardown(), 0);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert!(shutdown.is_torn_down());
    }

    #[test]
    fn test_hook_after_teardown_is_ignored() {
        let shutdown = Shutdown::new();
        shutdown.teardown();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        shutdown.on_teardown("late", move || flag.store(true, Ordering::SeqCst));
        shutdown.teardown();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 1);
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
    }
}
