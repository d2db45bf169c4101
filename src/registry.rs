//! Registry of live tracers
//!
//! Tracers are owned by their creators (`Arc<Tracer>`); the registry only
//! keeps weak references sorted by `order`, so a dropped tracer disappears
//! from enumeration without any explicit unregister call.
//!
//! Entries carry their order and name next to the weak pointer. Upgrading
//! under the lock is avoided: releasing the last strong reference there
//! would run `Tracer::drop`, which takes the same lock.

use crate::config::TracerConfig;
use crate::error::{Result, TracerError};
use crate::event::NewTracerEvent;
use crate::tracer::{SharedTracer, Tracer};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

#[derive(Debug)]
struct Entry {
    order: i32,
    name: String,
    tracer: Weak<Tracer>,
}

impl Entry {
    fn is_alive(&self) -> bool {
        self.tracer.strong_count() > 0
    }
}

/// Ordered set of live tracers
#[derive(Debug, Default)]
pub struct TracerRegistry {
    entries: Mutex<Vec<Entry>>,
    on_new_tracer: NewTracerEvent,
}

static GLOBAL: OnceLock<Arc<TracerRegistry>> = OnceLock::new();

impl TracerRegistry {
    /// A private registry, independent of [`TracerRegistry::global`]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Process-wide registry, created on first use
    pub fn global() -> &'static Arc<TracerRegistry> {
        GLOBAL.get_or_init(TracerRegistry::new)
    }

    pub fn create(self: &Arc<Self>, order: i32, name: &str) -> Result<SharedTracer> {
        self.create_with_config(order, name, TracerConfig::default())
    }

    /// Create and register a tracer, then notify `on_new_tracer`.
    ///
    /// The new tracer is placed after existing tracers of the same order.
    ///
    /// # Errors
    /// - [`TracerError::NameCollision`] if a live tracer with the same order has `name`
    /// - [`TracerError::InvalidConfig`] if `config` does not validate
    pub fn create_with_config(
        self: &Arc<Self>,
        order: i32,
        name: &str,
        config: TracerConfig,
    ) -> Result<SharedTracer> {
        config.validate()?;

        let tracer = {
            let mut entries = self.lock();
            entries.retain(Entry::is_alive);

            if entries
                .iter()
                .any(|entry| entry.order == order && entry.name == name)
            {
                tracing::warn!(order, name, "tracer name collision");
                return Err(TracerError::NameCollision {
                    order,
                    name: name.to_string(),
                });
            }

            let tracer = Arc::new(Tracer::new(order, name, config, Arc::downgrade(self)));
            let at = entries.partition_point(|entry| entry.order <= order);
            entries.insert(
                at,
                Entry {
                    order,
                    name: name.to_string(),
                    tracer: Arc::downgrade(&tracer),
                },
            );
            tracer
        };

        tracing::debug!(order, name, "tracer created");
        self.on_new_tracer.invoke(&tracer);
        Ok(tracer)
    }

    /// Live tracers by ascending order, creation order within an order
    pub fn all(&self) -> Vec<SharedTracer> {
        let weak: Vec<Weak<Tracer>> = self
            .lock()
            .iter()
            .map(|entry| entry.tracer.clone())
            .collect();
        weak.iter().filter_map(Weak::upgrade).collect()
    }

    /// First live tracer named `name`
    pub fn find(&self, name: &str) -> Option<SharedTracer> {
        let weak: Vec<Weak<Tracer>> = self
            .lock()
            .iter()
            .filter(|entry| entry.name == name)
            .map(|entry| entry.tracer.clone())
            .collect();
        weak.iter().find_map(Weak::upgrade)
    }

    /// Number of live tracers
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|entry| entry.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notified with every tracer this registry creates
    ///
    /// Handlers get the shared handle and may keep a clone of it, e.g. to
    /// request fetches later.
    pub fn on_new_tracer(&self) -> &NewTracerEvent {
        &self.on_new_tracer
    }

    /// Called from `Tracer::drop`; also sweeps other expired entries.
    pub(crate) fn unregister(&self, tracer: *const Tracer, name: &str) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| entry.is_alive() && !std::ptr::eq(entry.tracer.as_ptr(), tracer));
        tracing::debug!(name, removed = before - entries.len(), "tracer unregistered");
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
