#![no_main]

use libfuzzer_sys::fuzz_target;
use perfscope::{sort_messages_by_rule, FetchProxy, TracerConfig, TracerRegistry};
use std::sync::{Arc, Mutex};

fuzz_target!(|data: &[u8]| {
    // Each input line is a branch name; a leading '>' nests under the previous branch
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let registry = TracerRegistry::new();
    let Ok(tracer) = registry.create_with_config(0, "fuzz", TracerConfig::lean()) else {
        return;
    };
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    tracer.on_fetch.add(move |proxy: &FetchProxy<'_>| {
        if let Ok(mut out) = sink.lock() {
            proxy.fetch_tree(&mut out);
        }
        true
    });

    {
        let Ok(_root) = tracer.fork("root", 0) else {
            return;
        };
        let mut open = Vec::new();
        for line in input.lines().take(256) {
            match line.strip_prefix('>') {
                Some(name) => {
                    if let Ok(proxy) = tracer.branch(name) {
                        open.push(proxy);
                    }
                }
                None => {
                    open.clear();
                    if let Ok(proxy) = tracer.branch(line) {
                        open.push(proxy);
                    }
                }
            }
        }
    }
    tracer.request_fetch_data();
    drop(tracer.fork("root", 0));

    let Ok(mut traces) = captured.lock().map(|g| g.clone()) else {
        return;
    };
    sort_messages_by_rule(&mut traces);
    for (i, node) in traces.iter().enumerate() {
        for after in &traces[i + 1..] {
            assert!(!after.is_ancestor_of(node));
        }
    }
});
