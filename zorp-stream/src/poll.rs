//! Thin wrapper over the event loop the rest of this crate assumes:
//! tokio's reactor already does readiness dispatch, so all this adds is
//! the bookkeeping the specification calls out by name — a registry of
//! attached sources, a quit flag, and a `wakeup` that unblocks whatever
//! is waiting on the loop right now.
//!
//! Grounded in the same `Arc<Mutex<bool>>` cancel pattern used by
//! [`crate::connector::Cancellation`] and the listener, generalized to a
//! registry since a poll loop tracks more than one source at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Opaque handle returned by [`PollLoop::attach`]. Dropping it does not
/// detach the source; call [`PollLoop::remove`] explicitly, mirroring the
/// explicit `attach_source`/`detach_source` pairing on the stream stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// A cooperative event loop handle. One per event-loop thread per the
/// concurrency model: within a loop, dispatch never runs concurrently, so
/// this struct's job is only cross-thread signalling (another thread
/// asking this loop to quit or wake up), not scheduling.
pub struct PollLoop {
    quit: Arc<AtomicBool>,
    wake: Arc<Notify>,
    next_id: AtomicU64,
    sources: Mutex<HashMap<u64, &'static str>>,
}

impl Default for PollLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl PollLoop {
    pub fn new() -> Self {
        Self {
            quit: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            next_id: AtomicU64::new(1),
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a source (a listener, connector, or stream) by a
    /// human-readable kind for diagnostics. Returns the id to pass back
    /// to [`PollLoop::remove`].
    pub fn attach(&self, kind: &'static str) -> SourceId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sources.lock().unwrap().insert(id, kind);
        SourceId(id)
    }

    pub fn remove(&self, id: SourceId) {
        self.sources.lock().unwrap().remove(&id.0);
    }

    pub fn attached_count(&self) -> usize {
        self.sources.lock().unwrap().len()
    }

    /// Sets the quit flag and wakes anyone parked in [`PollLoop::wait`].
    /// Process-wide: once set, every waiter observes it, matching the
    /// "process-wide `quit`... wakes the loop via a dedicated source"
    /// language.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn should_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Unblocks one pending [`PollLoop::wait`] call without setting quit,
    /// for a thread that just changed shared state (e.g. suspended a
    /// listener) and wants the loop to reconsider immediately.
    pub fn wakeup(&self) {
        self.wake.notify_one();
    }

    /// Parks until either `quit` or `wakeup` is called. Callers loop on
    /// this, checking `should_quit` after each return.
    pub async fn wait(&self) {
        if self.should_quit() {
            return;
        }
        self.wake.notified().await;
    }

    /// A cloneable signal a spawned task can hold to observe quit
    /// without borrowing the loop itself.
    pub fn quit_signal(&self) -> QuitSignal {
        QuitSignal {
            quit: self.quit.clone(),
            wake: self.wake.clone(),
        }
    }
}

/// A `Send + Sync + 'static` handle to just the quit/wakeup half of a
/// [`PollLoop`], for tasks spawned onto the runtime that don't need the
/// source registry.
#[derive(Clone)]
pub struct QuitSignal {
    quit: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl QuitSignal {
    pub fn should_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.should_quit() {
            return;
        }
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quit_wakes_a_parked_waiter() {
        let loop_ = Arc::new(PollLoop::new());
        let waiter = loop_.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
            waiter.should_quit()
        });
        tokio::task::yield_now().await;
        loop_.quit();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn attach_and_remove_tracks_count() {
        let loop_ = PollLoop::new();
        let a = loop_.attach("listener");
        let b = loop_.attach("connector");
        assert_eq!(loop_.attached_count(), 2);
        loop_.remove(a);
        assert_eq!(loop_.attached_count(), 1);
        loop_.remove(b);
        assert_eq!(loop_.attached_count(), 0);
    }

    #[tokio::test]
    async fn wakeup_does_not_set_quit() {
        let loop_ = PollLoop::new();
        loop_.wakeup();
        assert!(!loop_.should_quit());
    }
}
