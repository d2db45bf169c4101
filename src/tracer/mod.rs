//! Tracer: one named instrumentation point
//!
//! A producer thread calls [`Tracer::fork`] once per loop iteration and then
//! [`Tracer::branch`]/[`Tracer::timer`] to fill the tree; the returned
//! [`Proxy`] guards pop themselves off the branch stack when dropped, so the
//! scope structure of the producer code *is* the tree shape.
//!
//! ```text
//!  producer thread                         consumer thread(s)
//!  ───────────────                         ──────────────────
//!  loop {                                  tracer.request_fetch_data()
//!    let root = tracer.fork("loop", 0)?;     │ (atomic flag)
//!      └─ pending? ─► on_fetch(FetchProxy) ◄─┘
//!    let _t = tracer.timer("work")?;       handler copies fetch_tree /
//!    ...                                   fetch_diff into its own batch
//!  }
//! ```
//!
//! # Concurrency
//!
//! The entity table and branch stack belong to the producer thread, pinned
//! by the first `fork()`; every producer call from another thread fails with
//! [`TracerError::ThreadAffinityViolation`]. The state sits behind a mutex
//! that only the pinned thread ever takes, so it is never contended; a
//! producer call made from inside an `on_fetch` handler finds it held and
//! degrades to an inert proxy. Consumers only touch atomics: the pending
//! flag, the fence counters and per-entity subscribe/fold flags.

mod fetch;

pub use fetch::FetchProxy;

use crate::config::TracerConfig;
use crate::entity::{Entity, EntityTable};
use crate::error::{Result, TracerError};
use crate::event::{FetchEvent, NewTracerEvent, TracerEvent};
use crate::proxy::Proxy;
use crate::registry::TracerRegistry;
use crate::value::TraceValue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, TryLockError, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant, SystemTime};

/// Reference-counted tracer handle as handed out by the registry
pub type SharedTracer = Arc<Tracer>;

/// Name of the bookkeeping subtree created under the root on every fork
pub const INTERNALS_KEY: &str = "[[internals]]";

/// Producer-owned state
#[derive(Debug)]
pub(crate) struct TracerCore {
    pub(crate) table: EntityTable,
    stack: Vec<usize>,
    /// Bumped on every fork, sampled out or not; proxies of an older generation are not popped
    generation: u64,
    order_active: usize,
    interval_counter: usize,
    last_fork: Option<Instant>,
}

impl TracerCore {
    fn new(capacity: usize) -> Self {
        TracerCore {
            table: EntityTable::with_capacity(capacity),
            stack: Vec::with_capacity(16),
            generation: 0,
            order_active: 0,
            interval_counter: 0,
            last_fork: None,
        }
    }

    /// Find or create, then stamp as visited in this iteration.
    fn visit(&mut self, parent: Option<usize>, name: &str, fence: u64) -> usize {
        let idx = self.table.find_or_create(parent, name, false);
        let order = self.order_active;
        self.order_active += 1;
        self.table.visit(idx, fence, order);
        idx
    }

    fn enter(&mut self, parent: Option<usize>, name: &str, fence: u64) -> usize {
        let idx = self.visit(parent, name, fence);
        self.stack.push(idx);
        idx
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.generation += 1;
    }

    fn set(&mut self, idx: usize, value: TraceValue) {
        if let Some(entity) = self.table.get_mut(idx) {
            entity.value = value;
        }
    }

    /// Remove `idx` from the stack, searching from the top.
    fn try_pop(&mut self, idx: usize, tracer: &str) -> bool {
        if self.stack.is_empty() {
            tracing::warn!(tracer, entity = idx, "branch stack was empty on pop");
            return false;
        }

        match self.stack.iter().rposition(|&open| open == idx) {
            Some(pos) => {
                self.stack.remove(pos);
                true
            }
            None => {
                tracing::warn!(tracer, entity = idx, "entity not found on branch stack");
                false
            }
        }
    }
}

/// Named instrumentation point owning a persistent tree of entities
pub struct Tracer {
    name: String,
    order: i32,
    birth: Instant,
    birth_wall: SystemTime,
    config: TracerConfig,

    core: Mutex<TracerCore>,
    working_thread: OnceLock<ThreadId>,

    fence_active: AtomicU64,
    fence_latest: AtomicU64,
    pending_fetch: AtomicBool,

    /// Invoked on the producer thread inside `fork()` when a requested fetch is delivered
    pub on_fetch: FetchEvent,
    /// Invoked when the tracer is dropped
    pub on_destroy: TracerEvent,

    registry: Weak<TracerRegistry>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("fence", &self.fence())
            .field("latest_fence", &self.latest_fence())
            .finish_non_exhaustive()
    }
}

impl Tracer {
    pub(crate) fn new(
        order: i32,
        name: &str,
        config: TracerConfig,
        registry: Weak<TracerRegistry>,
    ) -> Self {
        Tracer {
            name: name.to_owned(),
            order,
            birth: Instant::now(),
            birth_wall: SystemTime::now(),
            core: Mutex::new(TracerCore::new(config.initial_capacity)),
            config,
            working_thread: OnceLock::new(),
            fence_active: AtomicU64::new(0),
            fence_latest: AtomicU64::new(0),
            pending_fetch: AtomicBool::new(false),
            on_fetch: FetchEvent::new(),
            on_destroy: TracerEvent::new(),
            registry,
        }
    }

    /// Create a tracer in the process-wide registry.
    ///
    /// # Errors
    /// [`TracerError::NameCollision`] if a live tracer at `order` already has `name`.
    pub fn create(order: i32, name: &str) -> Result<SharedTracer> {
        TracerRegistry::global().create(order, name)
    }

    pub fn create_with_config(order: i32, name: &str, config: TracerConfig) -> Result<SharedTracer> {
        TracerRegistry::global().create_with_config(order, name, config)
    }

    /// Live tracers of the process-wide registry, by ascending order
    pub fn all() -> Vec<SharedTracer> {
        TracerRegistry::global().all()
    }

    /// Creation notification of the process-wide registry
    pub fn on_new_tracer() -> &'static NewTracerEvent {
        TracerRegistry::global().on_new_tracer()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn birth(&self) -> Instant {
        self.birth
    }

    /// Wall-clock creation time
    pub fn epoch(&self) -> SystemTime {
        self.birth_wall
    }

    pub fn age(&self) -> Duration {
        self.birth.elapsed()
    }

    /// Current iteration number; 0 before the first fork
    pub fn fence(&self) -> u64 {
        self.fence_active.load(Ordering::Relaxed)
    }

    /// Fence of the last iteration delivered to `on_fetch`
    pub fn latest_fence(&self) -> u64 {
        self.fence_latest.load(Ordering::Relaxed)
    }

    /// Producer thread, once pinned by the first fork
    pub fn working_thread(&self) -> Option<ThreadId> {
        self.working_thread.get().copied()
    }

    /// Arm a snapshot for the next fork. Any thread, idempotent.
    pub fn request_fetch_data(&self) {
        self.pending_fetch.store(true, Ordering::Release);
    }

    pub fn is_fetch_pending(&self) -> bool {
        self.pending_fetch.load(Ordering::Acquire)
    }

    /// Begin a new iteration and return a timer proxy bound to the root.
    ///
    /// A pending fetch is delivered first. With `interval > 1` only every
    /// `interval`-th call starts an iteration; the others return an inert
    /// proxy and leave the fence untouched. The root name only matters on
    /// the very first fork: every root shares one structural address.
    ///
    /// # Errors
    /// [`TracerError::ThreadAffinityViolation`] when called from a thread
    /// other than the one that forked first.
    pub fn fork(&self, name: &str, interval: usize) -> Result<Proxy<'_>> {
        let current = thread::current().id();
        let pinned = *self.working_thread.get_or_init(|| current);
        if pinned != current {
            return Err(self.affinity_error(Some(pinned), current));
        }

        let Some(mut core) = self.try_core() else {
            return Ok(Proxy::inert());
        };

        let now = Instant::now();
        let last_fork = core.last_fork.replace(now).unwrap_or(self.birth);

        self.deliver_pending(&core);

        if interval > 1 {
            core.interval_counter += 1;
            if core.interval_counter < interval {
                core.reset_stack();
                tracing::trace!(tracer = %self.name, counter = core.interval_counter, interval, "fork sampled out");
                return Ok(Proxy::inert());
            }
            core.interval_counter = 0;
        }

        let fence = self.fence_active.fetch_add(1, Ordering::Relaxed) + 1;
        core.order_active = 0;
        core.reset_stack();

        let root = core.enter(None, name, fence);
        if self.config.internals {
            self.write_internals(&mut core, root, fence, now, last_fork, current);
        }

        // root timer starts after fetch delivery
        Ok(Proxy::new(self, root, core.generation, Some(Instant::now())))
    }

    /// Open a child of the innermost open branch.
    pub fn branch(&self, name: &str) -> Result<Proxy<'_>> {
        self.open_top(name, false)
    }

    /// Open a child of the innermost open branch with a value already set.
    pub fn branch_with(&self, name: &str, value: impl Into<TraceValue>) -> Result<Proxy<'_>> {
        let mut proxy = self.open_top(name, false)?;
        proxy.set(value);
        Ok(proxy)
    }

    /// Like [`Tracer::branch`], but the proxy stores the elapsed time when dropped.
    ///
    /// ```
    /// use perfscope::{TracerConfig, TracerRegistry};
    ///
    /// let registry = TracerRegistry::new();
    /// let tracer = registry.create_with_config(0, "doc", TracerConfig::lean())?;
    /// let _root = tracer.fork("loop", 0)?;
    /// {
    ///     let _t = tracer.timer("work")?;
    ///     // measured block
    /// }
    /// # Ok::<(), perfscope::TracerError>(())
    /// ```
    pub fn timer(&self, name: &str) -> Result<Proxy<'_>> {
        self.open_top(name, true)
    }

    fn open_top(&self, name: &str, timed: bool) -> Result<Proxy<'_>> {
        self.check_affinity()?;
        let Some(mut core) = self.try_core() else {
            return Ok(Proxy::inert());
        };

        let Some(&top) = core.stack.last() else {
            tracing::warn!(tracer = %self.name, branch = name, "branch with no open parent; ignored");
            return Ok(Proxy::inert());
        };

        let idx = core.enter(Some(top), name, self.fence());
        Ok(Proxy::new(self, idx, core.generation, timed.then(Instant::now)))
    }

    /// Open `name` under an explicit parent (`None` = root level).
    pub(crate) fn open_at(
        &self,
        parent: Option<usize>,
        name: &str,
        timed: bool,
    ) -> Result<Proxy<'_>> {
        self.check_affinity()?;
        let Some(mut core) = self.try_core() else {
            return Ok(Proxy::inert());
        };

        let idx = core.enter(parent, name, self.fence());
        Ok(Proxy::new(self, idx, core.generation, timed.then(Instant::now)))
    }

    /// Pop a proxy's entity and commit its timer.
    ///
    /// Proxies outliving a fork are not popped: the stack they were pushed on
    /// was reset by that fork, even a sampled-out one.
    pub(crate) fn close(&self, idx: usize, generation: u64, started: Option<Instant>) {
        let Some(mut core) = self.try_core() else {
            return;
        };

        if generation == core.generation {
            core.try_pop(idx, &self.name);
        } else {
            tracing::debug!(tracer = %self.name, entity = idx, generation, "proxy outlived its iteration");
        }

        if let Some(start) = started {
            core.set(idx, TraceValue::Duration(start.elapsed()));
        }
    }

    /// Run `f` on the live entity `idx`. `None` when the state is unavailable.
    pub(crate) fn with_entity<R>(&self, idx: usize, f: impl FnOnce(&mut Entity) -> R) -> Option<R> {
        let mut core = self.try_core()?;
        core.table.get_mut(idx).map(f)
    }

    fn write_internals(
        &self,
        core: &mut TracerCore,
        root: usize,
        fence: u64,
        now: Instant,
        last_fork: Instant,
        thread: ThreadId,
    ) {
        let internals = core.visit(Some(root), INTERNALS_KEY, fence);
        if let Some(entity) = core.table.get_mut(internals) {
            entity.value.assign_fmt(format_args!("{:?}", thread));
        }

        let age = core.visit(Some(internals), "age", fence);
        core.set(age, TraceValue::Duration(now.duration_since(self.birth)));

        let interval = core.visit(Some(internals), "interval", fence);
        core.set(interval, TraceValue::Duration(now.duration_since(last_fork)));

        let sequence = core.visit(Some(internals), "sequence", fence);
        core.set(sequence, TraceValue::from(fence));

        let branches = core.visit(Some(internals), "branches", fence);
        let count = core.table.len();
        core.set(branches, TraceValue::from(count));
    }

    /// Build and hand out a snapshot if one was requested.
    ///
    /// Runs on the producer thread with the core locked, so handlers see a
    /// consistent point-in-time view. Requires at least one completed
    /// iteration since the last delivery and at least one handler; otherwise
    /// the request stays pending.
    fn deliver_pending(&self, core: &TracerCore) -> bool {
        let fence = self.fence();
        if fence <= self.latest_fence() || self.on_fetch.is_empty() {
            return false;
        }
        if !self.pending_fetch.swap(false, Ordering::AcqRel) {
            return false;
        }

        let proxy = FetchProxy::new(self, core);
        self.on_fetch.invoke(&proxy);
        self.fence_latest.store(fence, Ordering::Relaxed);

        tracing::debug!(tracer = %self.name, fence, nodes = core.table.len(), "fetch delivered");
        true
    }

    fn check_affinity(&self) -> Result<()> {
        let current = thread::current().id();
        match self.working_thread.get() {
            Some(&pinned) if pinned == current => Ok(()),
            pinned => Err(self.affinity_error(pinned.copied(), current)),
        }
    }

    fn affinity_error(&self, pinned: Option<ThreadId>, current: ThreadId) -> TracerError {
        TracerError::ThreadAffinityViolation {
            tracer: self.name.clone(),
            pinned,
            current,
        }
    }

    fn try_core(&self) -> Option<MutexGuard<'_, TracerCore>> {
        match self.core.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!(tracer = %self.name, "producer call from inside a fetch handler; ignored");
                None
            }
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.on_destroy.invoke(self);

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self as *const Tracer, &self.name);
        }
        tracing::debug!(tracer = %self.name, "tracer destroyed");
    }
}
