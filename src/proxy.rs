//! Scoped branch guard
//!
//! A [`Proxy`] binds one entity of one tracer. Creating it pushed the entity
//! onto the tracer's branch stack; dropping it pops the entity again and, for
//! timers, stores the elapsed time as the entity's value. Moving a proxy
//! moves that responsibility with it.
//!
//! Proxies are `!Send`: they must be dropped on the producer thread that
//! created them.

use crate::error::Result;
use crate::tracer::Tracer;
use crate::value::TraceValue;
use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

/// Guard for one open branch. The default proxy is inert: every operation
/// on it is a no-op.
pub struct Proxy<'t> {
    tracer: Option<&'t Tracer>,
    entity: usize,
    generation: u64,
    started: Option<Instant>,
    _not_send: PhantomData<*const ()>,
}

impl Default for Proxy<'_> {
    fn default() -> Self {
        Self::inert()
    }
}

impl fmt::Debug for Proxy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("tracer", &self.tracer.map(Tracer::name))
            .field("entity", &self.entity)
            .field("generation", &self.generation)
            .field("timer", &self.started.is_some())
            .finish()
    }
}

impl<'t> Proxy<'t> {
    pub(crate) fn new(
        tracer: &'t Tracer,
        entity: usize,
        generation: u64,
        started: Option<Instant>,
    ) -> Self {
        Proxy {
            tracer: Some(tracer),
            entity,
            generation,
            started,
            _not_send: PhantomData,
        }
    }

    pub fn inert() -> Self {
        Proxy {
            tracer: None,
            entity: 0,
            generation: 0,
            started: None,
            _not_send: PhantomData,
        }
    }

    /// False for inert proxies (sampled-out forks, misuse, default)
    pub fn is_valid(&self) -> bool {
        self.tracer.is_some()
    }

    pub fn is_timer(&self) -> bool {
        self.started.is_some()
    }

    /// Arena index (`unique_order`) of the bound entity
    pub fn unique_order(&self) -> Option<usize> {
        self.tracer.map(|_| self.entity)
    }

    /// Structural hash of the bound entity
    pub fn hash(&self) -> Option<u64> {
        self.with(|entity| entity.hash())
    }

    /// Store a value. A timer overwrites it with the elapsed time on drop.
    pub fn set(&mut self, value: impl Into<TraceValue>) -> &mut Self {
        let value = value.into();
        self.with(|entity| entity.value = value);
        self
    }

    /// Store a string, reusing the entity's previous string buffer.
    pub fn set_str(&mut self, value: &str) -> &mut Self {
        self.with(|entity| entity.value.assign_str(value));
        self
    }

    /// Format directly into the entity's string buffer.
    ///
    /// ```
    /// # use perfscope::{TracerConfig, TracerRegistry};
    /// # let registry = TracerRegistry::new();
    /// # let tracer = registry.create_with_config(0, "fmt", TracerConfig::lean())?;
    /// let root = tracer.fork("loop", 0)?;
    /// let mut state = root.branch("state")?;
    /// state.set_fmt(format_args!("{}/{}", 3, 4));
    /// # Ok::<(), perfscope::TracerError>(())
    /// ```
    pub fn set_fmt(&mut self, args: fmt::Arguments<'_>) -> &mut Self {
        self.with(|entity| entity.value.assign_fmt(args));
        self
    }

    /// Open a child of this proxy's entity.
    pub fn branch(&self, name: &str) -> Result<Proxy<'t>> {
        match self.tracer {
            Some(tracer) => tracer.open_at(Some(self.entity), name, false),
            None => Ok(Proxy::inert()),
        }
    }

    /// Open a timed child of this proxy's entity.
    pub fn timer(&self, name: &str) -> Result<Proxy<'t>> {
        match self.tracer {
            Some(tracer) => tracer.open_at(Some(self.entity), name, true),
            None => Ok(Proxy::inert()),
        }
    }

    /// Close this branch and rebind to a timed sibling `name`.
    ///
    /// The current entity is popped (committing its timer, if any), then the
    /// sibling under the same parent is pushed with a fresh clock. Chained
    /// calls measure consecutive phases:
    ///
    /// ```
    /// # use perfscope::{TracerConfig, TracerRegistry};
    /// # let registry = TracerRegistry::new();
    /// # let tracer = registry.create_with_config(0, "phases", TracerConfig::lean())?;
    /// # let _root = tracer.fork("loop", 0)?;
    /// let mut phase = tracer.timer("load")?;
    /// phase.switch_to_timer("decode")?;
    /// phase.switch_to_timer("render")?;
    /// # Ok::<(), perfscope::TracerError>(())
    /// ```
    pub fn switch_to_timer(&mut self, name: &str) -> Result<&mut Self> {
        let Some(tracer) = self.tracer else {
            return Ok(self);
        };

        let parent = tracer.with_entity(self.entity, |entity| entity.parent()).flatten();
        self.release();
        *self = tracer.open_at(parent, name, true)?;
        Ok(self)
    }

    pub fn subscribe(&self) {
        self.with(|entity| entity.flags().subscribe(true));
    }

    pub fn unsubscribe(&self) {
        self.with(|entity| entity.flags().subscribe(false));
    }

    /// Whether a consumer asked for this entity's updates
    pub fn is_subscribed(&self) -> bool {
        self.with(|entity| entity.flags().is_subscribed()).unwrap_or(false)
    }

    /// Close the branch now instead of at scope end.
    pub fn finish(self) {}

    fn release(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            tracer.close(self.entity, self.generation, self.started.take());
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut crate::entity::Entity) -> R) -> Option<R> {
        self.tracer
            .and_then(|tracer| tracer.with_entity(self.entity, f))
    }
}

impl Drop for Proxy<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
