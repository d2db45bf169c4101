//! Process-wide registry behavior
//!
//! These tests share `TracerRegistry::global()`, so the ones observing its
//! events or contents run serially.

use perfscope::{SharedTracer, Tracer, TracerError, TracerRegistry};
use serial_test::serial;
use std::sync::{Arc, Mutex};

#[test]
#[serial]
fn test_global_create_and_enumerate() {
    let low = Tracer::create(-10, "registry-test-low").unwrap();
    let high = Tracer::create(10, "registry-test-high").unwrap();

    let names: Vec<String> = Tracer::all()
        .iter()
        .map(|t| t.name().to_string())
        .filter(|n| n.starts_with("registry-test-"))
        .collect();
    assert_eq!(names, vec!["registry-test-low", "registry-test-high"]);

    drop(low);
    drop(high);
    assert!(TracerRegistry::global().find("registry-test-low").is_none());
}

#[test]
#[serial]
fn test_global_on_new_tracer() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = Tracer::on_new_tracer().add(move |t: &SharedTracer| {
        sink.lock().unwrap().push((t.order(), t.name().to_string()));
        true
    });

    let tracer = Tracer::create(3, "registry-test-notified").unwrap();
    Tracer::on_new_tracer().remove(id);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(3, "registry-test-notified".to_string())]
    );
    drop(tracer);
}

#[test]
#[serial]
fn test_global_collision() {
    let first = Tracer::create(0, "registry-test-dup").unwrap();
    let err = Tracer::create(0, "registry-test-dup").unwrap_err();
    assert_eq!(
        err.to_string(),
        "tracer name 'registry-test-dup' already registered at order 0"
    );
    drop(first);
    assert!(Tracer::create(0, "registry-test-dup").is_ok());
}

#[test]
fn test_injected_registry_is_isolated() {
    let registry = TracerRegistry::new();
    let _local = registry.create(0, "isolated").unwrap();

    assert!(TracerRegistry::global().find("isolated").is_none());
    assert_eq!(registry.all().len(), 1);
}

#[test]
fn test_enumeration_from_other_threads() {
    let registry = TracerRegistry::new();
    let tracers: Vec<_> = (0..8)
        .map(|i| registry.create(i % 3, &format!("t{i}")).unwrap())
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let orders: Vec<i32> = registry.all().iter().map(|t| t.order()).collect();
                orders.windows(2).all(|w| w[0] <= w[1]) && orders.len() == 8
            })
        })
        .collect();

    for reader in readers {
        assert!(reader.join().unwrap());
    }
    drop(tracers);
    assert!(registry.is_empty());
}

#[test]
fn test_tracer_identity() {
    let registry = TracerRegistry::new();
    let before = std::time::SystemTime::now();
    let tracer = registry.create(7, "identity").unwrap();

    assert_eq!(tracer.name(), "identity");
    assert_eq!(tracer.order(), 7);
    assert!(tracer.epoch() >= before);
    assert!(tracer.birth() <= std::time::Instant::now());
    assert_eq!(tracer.fence(), 0);
    assert_eq!(tracer.latest_fence(), 0);
    assert!(tracer.working_thread().is_none());
}

#[test]
fn test_request_from_any_thread_never_fails() {
    let registry = TracerRegistry::new();
    let tracer = registry.create(0, "requests").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tracer = tracer.clone();
            std::thread::spawn(move || tracer.request_fetch_data())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(tracer.is_fetch_pending());

    // still a misuse error, not a panic
    assert!(matches!(
        tracer.timer("early"),
        Err(TracerError::ThreadAffinityViolation { pinned: None, .. })
    ));
}
