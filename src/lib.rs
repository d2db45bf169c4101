//! Perfscope - in-process hierarchical performance tracer
//!
//! A producer thread instruments its hot loop with named, nested branches
//! and timers. Each loop iteration starts with [`Tracer::fork`]; every
//! branch is addressed by a structural hash of its path, so the tree is
//! built once and then updated in place at near-zero cost. Consumers on
//! other threads request snapshots, which the producer hands out at the
//! next iteration boundary.
//!
//! ```
//! use perfscope::{sort_messages_by_rule, FetchProxy, TracerConfig, TracerRegistry};
//! use std::sync::{Arc, Mutex};
//!
//! let registry = TracerRegistry::new();
//! let tracer = registry.create_with_config(0, "main-loop", TracerConfig::lean())?;
//!
//! let snapshot = Arc::new(Mutex::new(Vec::new()));
//! let sink = snapshot.clone();
//! tracer.on_fetch.add(move |proxy: &FetchProxy<'_>| {
//!     proxy.fetch_tree(&mut sink.lock().unwrap());
//!     false
//! });
//!
//! for frame in 0..3 {
//!     let _root = tracer.fork("frame", 0)?;
//!     let mut count = tracer.branch("count")?;
//!     count.set(frame);
//!     drop(count);
//!     let _t = tracer.timer("render")?;
//!     if frame == 1 {
//!         tracer.request_fetch_data();
//!     }
//! }
//!
//! let mut traces = snapshot.lock().unwrap().clone();
//! sort_messages_by_rule(&mut traces);
//! assert_eq!(&*traces[0].key, "frame");
//! # Ok::<(), perfscope::TracerError>(())
//! ```

pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod hash;
pub mod mirror;
pub mod proxy;
pub mod query;
pub mod registry;
pub mod trace;
pub mod tracer;
pub mod value;
pub mod watch;

pub use config::TracerConfig;
pub use error::{Result, TracerError};
pub use event::{Event, FetchEvent, HandlerId, NewTracerEvent, TracerEvent};
pub use mirror::{MirrorUpdate, TraceMirror};
pub use proxy::Proxy;
pub use query::TraceQuery;
pub use registry::TracerRegistry;
pub use trace::{compare_by_rule, sort_messages_by_rule, Trace, TraceBatch};
pub use tracer::{FetchProxy, SharedTracer, Tracer};
pub use value::TraceValue;
pub use watch::{fetch_tree_blocking, fetch_tree_blocking_default, FetchedBatch, TraceWatcher};
