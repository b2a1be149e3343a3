use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered set of callbacks invoked for every dispatched value.
///
/// Dispatch works on a snapshot of the handlers taken when it starts, so a
/// handler that unsubscribes itself (or another handler) mid-dispatch does
/// not disturb the current pass.
pub struct HandlerSet<T> {
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for HandlerSet<T> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: 'static> HandlerSet<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add<F>(self: &Arc<Self>, handler: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        Subscription {
            set: Arc::downgrade(self),
            id,
        }
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut guard = self.handlers.lock();
        let before = guard.len();
        guard.retain(|(existing, _)| *existing != id);
        guard.len() != before
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every handler in registration order. Returns how many ran.
    pub fn dispatch(&self, value: &T) -> usize {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in &snapshot {
            handler(value);
        }
        snapshot.len()
    }
}

/// Disposer returned by [`HandlerSet::add`]. Dropping it keeps the handler
/// registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription<T> {
    set: Weak<HandlerSet<T>>,
    id: HandlerId,
}

impl<T: 'static> Subscription<T> {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Returns `false` if the handler was already gone (e.g. cleared by a
    /// channel disconnect).
    pub fn unsubscribe(self) -> bool {
        match self.set.upgrade() {
            Some(set) => set.remove(self.id),
            None => false,
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
