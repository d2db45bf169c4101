//! Handler lists for tracer notifications
//!
//! `Event<H>` stores boxed handlers of the unsized callable type `H`. A
//! handler returns `true` to stay registered and `false` to detach after the
//! call, which gives one-shot handlers for free.
//!
//! The list lock is only held to snapshot, add or remove handlers, never
//! while a handler runs. A handler may therefore register on, remove from or
//! query the event invoking it, and may trigger a nested invocation (e.g.
//! create a tracer from inside `on_new_tracer`). A nested invocation on the
//! same thread skips the handler that is already running. Each handler runs
//! under its own lock, so concurrent invocations call it one at a time.

use crate::tracer::{FetchProxy, SharedTracer, Tracer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Handle returned on registration, used to remove a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handler invoked with a tracer being destroyed
pub type TracerHandler = dyn FnMut(&Tracer) -> bool + Send;

/// Handler invoked with a newly created tracer; may keep a clone of it
pub type NewTracerHandler = dyn FnMut(&SharedTracer) -> bool + Send;

/// Handler invoked on the producer thread when a fetch is delivered
pub type FetchHandler = dyn for<'a> FnMut(&FetchProxy<'a>) -> bool + Send;

/// Tracer destruction notification
pub type TracerEvent = Event<TracerHandler>;

/// Tracer creation notification
pub type NewTracerEvent = Event<NewTracerHandler>;

/// Fetch delivery notification
pub type FetchEvent = Event<FetchHandler>;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

struct Slot<H: ?Sized> {
    id: HandlerId,
    detached: AtomicBool,
    running_on: Mutex<Option<ThreadId>>,
    handler: Mutex<Box<H>>,
}

impl<H: ?Sized> Slot<H> {
    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    fn running_on(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.running_on.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a slot as running on the current thread until dropped
struct Running<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct Event<H: ?Sized> {
    slots: Mutex<Vec<Arc<Slot<H>>>>,
}

impl<H: ?Sized> Default for Event<H> {
    fn default() -> Self {
        Event {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> std::fmt::Debug for Event<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}

impl<H: ?Sized> Event<H> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Slot<H>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an already boxed handler
    pub fn add_boxed(&self, handler: Box<H>) -> HandlerId {
        let id = HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Arc::new(Slot {
            id,
            detached: AtomicBool::new(false),
            running_on: Mutex::new(None),
            handler: Mutex::new(handler),
        }));
        id
    }

    /// Remove a handler; returns whether it was still registered.
    ///
    /// A handler removed while an invocation is in flight is not called again.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut slots = self.lock();
        match slots.iter().position(|slot| slot.id == id) {
            Some(pos) => {
                slots.remove(pos).detach();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        for slot in self.lock().drain(..) {
            slot.detach();
        }
    }

    /// Call every handler in registration order, dropping those that return `false`.
    pub(crate) fn invoke_with(&self, mut call: impl FnMut(&mut H) -> bool) {
        let snapshot: Vec<Arc<Slot<H>>> = self.lock().clone();
        let current = thread::current().id();
        let mut finished = false;

        for slot in &snapshot {
            if slot.is_detached() {
                continue;
            }
            if *slot.running_on() == Some(current) {
                tracing::debug!(handler = slot.id.0, "nested invocation skips running handler");
                continue;
            }

            let mut handler = slot.handler.lock().unwrap_or_else(PoisonError::into_inner);
            // removed while waiting for a concurrent call
            if slot.is_detached() {
                continue;
            }

            *slot.running_on() = Some(current);
            let keep = {
                let _running = Running(&slot.running_on);
                call(&mut **handler)
            };
            if !keep {
                slot.detach();
                finished = true;
            }
        }

        if finished {
            self.lock().retain(|slot| !slot.is_detached());
        }
    }
}

impl Event<TracerHandler> {
    pub fn add<F>(&self, handler: F) -> HandlerId
    where
        F: FnMut(&Tracer) -> bool + Send + 'static,
    {
        self.add_boxed(Box::new(handler))
    }

    pub fn invoke(&self, tracer: &Tracer) {
        self.invoke_with(|handler| handler(tracer));
    }
}

impl Event<NewTracerHandler> {
    pub fn add<F>(&self, handler: F) -> HandlerId
    where
        F: FnMut(&SharedTracer) -> bool + Send + 'static,
    {
        self.add_boxed(Box::new(handler))
    }

    pub fn invoke(&self, tracer: &SharedTracer) {
        self.invoke_with(|handler| handler(tracer));
    }
}

impl Event<FetchHandler> {
    pub fn add<F>(&self, handler: F) -> HandlerId
    where
        F: for<'a> FnMut(&FetchProxy<'a>) -> bool + Send + 'static,
    {
        self.add_boxed(Box::new(handler))
    }

    pub fn invoke(&self, proxy: &FetchProxy<'_>) {
        self.invoke_with(|handler| handler(proxy));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    type CountHandler = dyn FnMut(&usize) -> bool + Send;

    #[test]
    fn test_handlers_run_in_order() {
        let event: Event<CountHandler> = Event::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let log = log.clone();
            event.add_boxed(Box::new(move |v: &usize| {
                log.lock().unwrap().push((tag, *v));
                true
            }));
        }

        event.invoke_with(|h| h(&9));
        assert_eq!(*log.lock().unwrap(), vec![(0, 9), (1, 9), (2, 9)]);
        assert_eq!(event.len(), 3);
    }

    #[test]
    fn test_false_detaches_handler() {
        let event: Event<CountHandler> = Event::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        event.add_boxed(Box::new(move |_: &usize| {
            c.fetch_add(1, Ordering::SeqCst);
            false
        }));

        event.invoke_with(|h| h(&1));
        event.invoke_with(|h| h(&2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(event.is_empty());
    }

    #[test]
    fn test_remove_by_id() {
        let event: Event<CountHandler> = Event::new();
        let id = event.add_boxed(Box::new(|_: &usize| true));
        let other = event.add_boxed(Box::new(|_: &usize| true));

        assert!(event.remove(id));
        assert!(!event.remove(id));
        assert_eq!(event.len(), 1);
        assert_ne!(id, other);

        event.clear();
        assert!(event.is_empty());
    }

    #[test]
    fn test_handler_may_touch_its_own_event() {
        let event: Arc<Event<CountHandler>> = Arc::new(Event::new());
        let seen_len = Arc::new(AtomicUsize::new(0));

        let inner = event.clone();
        let len = seen_len.clone();
        event.add_boxed(Box::new(move |_: &usize| {
            inner.add_boxed(Box::new(|_: &usize| true));
            len.store(inner.len(), Ordering::SeqCst);
            false
        }));

        event.invoke_with(|h| h(&0));
        // itself plus the one it added
        assert_eq!(seen_len.load(Ordering::SeqCst), 2);
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn test_nested_invoke_skips_running_handler() {
        let event: Arc<Event<CountHandler>> = Arc::new(Event::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner = event.clone();
        let l = log.clone();
        event.add_boxed(Box::new(move |depth: &usize| {
            l.lock().unwrap().push(("outer", *depth));
            if *depth == 0 {
                inner.invoke_with(|h| h(&1));
            }
            true
        }));
        let l = log.clone();
        event.add_boxed(Box::new(move |depth: &usize| {
            l.lock().unwrap().push(("second", *depth));
            true
        }));

        event.invoke_with(|h| h(&0));
        assert_eq!(
            *log.lock().unwrap(),
            vec![("outer", 0), ("second", 1), ("second", 0)]
        );
    }

    #[test]
    fn test_removed_during_invoke_is_not_called() {
        let event: Arc<Event<CountHandler>> = Arc::new(Event::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let victim = Arc::new(Mutex::new(None));

        let inner = event.clone();
        let target = victim.clone();
        event.add_boxed(Box::new(move |_: &usize| {
            if let Some(id) = target.lock().unwrap().take() {
                assert!(inner.remove(id));
            }
            true
        }));
        let c = calls.clone();
        let id = event.add_boxed(Box::new(move |_: &usize| {
            c.fetch_add(1, Ordering::SeqCst);
            true
        }));
        *victim.lock().unwrap() = Some(id);

        event.invoke_with(|h| h(&0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(event.len(), 1);
    }
}
