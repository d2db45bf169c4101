//! Consumer helpers built on the fetch protocol
//!
//! [`TraceWatcher`] streams diff batches out of the producer thread over a
//! crossbeam channel. [`fetch_tree_blocking`] is the one-shot variant: ask
//! for the whole tree and wait for the next iteration boundary.
//!
//! Both wait on the producer's next `fork()`. Calling the blocking helper
//! from the producer thread itself can only time out.

use crate::error::{Result, TracerError};
use crate::event::HandlerId;
use crate::trace::{sort_messages_by_rule, TraceBatch};
use crate::tracer::{FetchProxy, SharedTracer, Tracer};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One delivery as seen by a watcher
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    pub fence: u64,
    /// Size of the whole tree at delivery, not just this batch
    pub num_all_nodes: usize,
    pub traces: TraceBatch,
}

/// Incremental subscription to a tracer's updates
///
/// Each delivery carries the entities visited in or after the previously
/// delivered iteration.
/// Dropping the watcher detaches its handler.
pub struct TraceWatcher {
    tracer: Weak<Tracer>,
    handler: HandlerId,
    since: Arc<AtomicU64>,
    rx: Receiver<FetchedBatch>,
}

impl TraceWatcher {
    pub fn attach(tracer: &SharedTracer) -> Self {
        let (tx, rx) = channel::unbounded();
        let since = Arc::new(AtomicU64::new(0));

        let cursor = since.clone();
        let handler = tracer.on_fetch.add(move |proxy: &FetchProxy<'_>| {
            let mut traces = Vec::new();
            proxy.fetch_diff(&mut traces, cursor.load(Ordering::Relaxed));
            cursor.store(proxy.fence(), Ordering::Relaxed);

            // receiver gone: detach
            tx.send(FetchedBatch {
                fence: proxy.fence(),
                num_all_nodes: proxy.num_all_nodes(),
                traces,
            })
            .is_ok()
        });

        TraceWatcher {
            tracer: Arc::downgrade(tracer),
            handler,
            since,
            rx,
        }
    }

    /// Ask for a delivery at the next fork. `false` if the tracer is gone.
    pub fn request_update(&self) -> bool {
        match self.tracer.upgrade() {
            Some(tracer) => {
                tracer.request_fetch_data();
                true
            }
            None => false,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<FetchedBatch> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<FetchedBatch> {
        self.rx.try_recv().ok()
    }

    pub fn receiver(&self) -> &Receiver<FetchedBatch> {
        &self.rx
    }

    /// Next delivery carries the whole tree again.
    pub fn reset(&self) {
        self.since.store(0, Ordering::Relaxed);
    }
}

impl Drop for TraceWatcher {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.upgrade() {
            tracer.on_fetch.remove(self.handler);
        }
    }
}

/// Request the full tree and wait for the producer to deliver it.
///
/// The result is sorted by [`sort_messages_by_rule`].
///
/// # Errors
/// [`TracerError::FetchTimeout`] if no delivery happens within `timeout`.
pub fn fetch_tree_blocking(tracer: &Tracer, timeout: Duration) -> Result<TraceBatch> {
    let (tx, rx) = channel::bounded(1);
    let handler = tracer.on_fetch.add(move |proxy: &FetchProxy<'_>| {
        let mut traces = Vec::with_capacity(proxy.num_all_nodes());
        proxy.fetch_tree(&mut traces);
        let _ = tx.try_send(traces);
        false
    });
    tracer.request_fetch_data();

    match rx.recv_timeout(timeout) {
        Ok(mut traces) => {
            sort_messages_by_rule(&mut traces);
            Ok(traces)
        }
        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
            tracer.on_fetch.remove(handler);
            tracing::warn!(tracer = tracer.name(), ?timeout, "fetch timed out");
            Err(TracerError::FetchTimeout {
                tracer: tracer.name().to_string(),
                waited: timeout,
            })
        }
    }
}

/// [`fetch_tree_blocking`] with the tracer's configured timeout
pub fn fetch_tree_blocking_default(tracer: &Tracer) -> Result<TraceBatch> {
    fetch_tree_blocking(tracer, tracer.config().fetch_timeout())
}
