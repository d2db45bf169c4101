//! Cross-thread fetch delivery: a producer thread forks continuously while
//! the test thread acts as consumer.

use perfscope::{
    fetch_tree_blocking, SharedTracer, TraceMirror, TraceWatcher, TracerConfig, TracerRegistry,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Producer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl Producer {
    /// Frame loop with a fixed shape plus one branch that appears every 4th frame
    fn spawn(tracer: SharedTracer) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut frames = 0u64;
            while !flag.load(Ordering::Relaxed) {
                let _root = tracer.fork("frame", 0).unwrap();
                {
                    let _t = tracer.timer("update").unwrap();
                    let mut n = tracer.branch("count").unwrap();
                    n.set(frames);
                }
                if frames % 4 == 0 {
                    let _rare = tracer.branch("rare").unwrap();
                }
                frames += 1;
                thread::sleep(Duration::from_millis(1));
            }
            frames
        });
        Producer {
            stop,
            handle: Some(handle),
        }
    }

    fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.take().map_or(0, |h| h.join().unwrap())
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn lean_tracer(name: &str) -> (Arc<TracerRegistry>, SharedTracer) {
    let registry = TracerRegistry::new();
    let tracer = registry
        .create_with_config(0, name, TracerConfig::lean())
        .unwrap();
    (registry, tracer)
}

#[test]
fn test_blocking_fetch_from_consumer_thread() {
    let (_registry, tracer) = lean_tracer("blocking");
    let producer = Producer::spawn(tracer.clone());

    let traces = fetch_tree_blocking(&tracer, Duration::from_secs(5)).unwrap();
    let keys: Vec<String> = traces.iter().map(|t| t.full_key(".")).collect();
    assert_eq!(keys[0], "frame");
    assert!(keys.contains(&"frame.update".to_string()));
    assert!(keys.contains(&"frame.update.count".to_string()));
    // sorted: parent before child
    let update = keys.iter().position(|k| k == "frame.update").unwrap();
    let count = keys.iter().position(|k| k == "frame.update.count").unwrap();
    assert!(update < count);

    assert!(producer.stop() > 0);
    assert!(tracer.on_fetch.is_empty());
}

#[test]
fn test_watcher_feeds_mirror() {
    let (_registry, tracer) = lean_tracer("watched");
    let watcher = TraceWatcher::attach(&tracer);
    let producer = Producer::spawn(tracer.clone());

    let mut mirror = TraceMirror::new();
    let mut fences = Vec::new();
    for _ in 0..3 {
        assert!(watcher.request_update());
        let batch = watcher
            .recv_timeout(Duration::from_secs(5))
            .expect("delivery within timeout");
        assert!(batch.num_all_nodes >= batch.traces.len());
        fences.push(batch.fence);
        mirror.apply(batch.traces, batch.fence);
    }
    producer.stop();

    assert!(fences.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(mirror.fence(), *fences.last().unwrap());

    let keys: Vec<String> = mirror.sorted().iter().map(|t| t.full_key(".")).collect();
    assert_eq!(keys[0], "frame");
    assert!(keys.contains(&"frame.rare".to_string()));
}

#[test]
fn test_subscribe_from_consumer_reaches_producer() {
    let (_registry, tracer) = lean_tracer("subscribe");
    let producer = Producer::spawn(tracer.clone());

    let traces = fetch_tree_blocking(&tracer, Duration::from_secs(5)).unwrap();
    let count = traces
        .iter()
        .find(|t| &*t.key == "count")
        .expect("count traced");
    count.subscribe(true);

    let again = fetch_tree_blocking(&tracer, Duration::from_secs(5)).unwrap();
    producer.stop();

    let live = again.iter().find(|t| &*t.key == "count").unwrap();
    assert!(live.is_subscribed());
    assert!(live.same_entity(count));
}

#[test]
fn test_fold_from_consumer_thread_hides_subtree() {
    let (_registry, tracer) = lean_tracer("fold");
    let producer = Producer::spawn(tracer.clone());

    let traces = fetch_tree_blocking(&tracer, Duration::from_secs(5)).unwrap();
    let update = traces
        .iter()
        .find(|t| &*t.key == "update")
        .expect("update traced");
    let folder = {
        let update = update.clone();
        thread::spawn(move || update.fold(true))
    };
    folder.join().unwrap();

    let folded = fetch_tree_blocking(&tracer, Duration::from_secs(5)).unwrap();
    let keys: Vec<String> = folded.iter().map(|t| t.full_key(".")).collect();
    assert!(keys.contains(&"frame.update".to_string()));
    assert!(!keys.contains(&"frame.update.count".to_string()));

    update.fold(false);
    let unfolded = fetch_tree_blocking(&tracer, Duration::from_secs(5)).unwrap();
    producer.stop();
    assert!(unfolded.iter().any(|t| t.full_key(".") == "frame.update.count"));
}

#[test]
fn test_request_dropped_with_tracer() {
    let (registry, tracer) = lean_tracer("dropped");
    tracer.request_fetch_data();
    drop(tracer);
    assert!(registry.is_empty());
}
