//! Text queries over a fetched tree
//!
//! Selects traces whose full dotted key (`root.A.B`) matches a regex in
//! full, optionally flips their subscription, and renders them as an
//! indented listing:
//!
//! ```text
//! frame = 16.0123 ms
//! frame.[[internals]] = "ThreadId(1)"
//! frame.[[internals]].age = 12.3456 ms
//!                     interval(+) = 16.0001 ms
//! frame.render = 0.8123 ms
//! ```

use crate::error::Result;
use crate::trace::Trace;
use regex::Regex;
use std::fmt::Write;

#[derive(Debug, Clone)]
pub struct TraceQuery {
    /// `None` matches everything
    pattern: Option<Regex>,
    subscribe: Option<bool>,
}

impl TraceQuery {
    /// Compile `pattern`; it must match the whole key.
    ///
    /// # Errors
    /// [`crate::TracerError::InvalidPattern`] for an invalid regex.
    pub fn new(pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{pattern})$");
        Ok(TraceQuery {
            pattern: Some(Regex::new(&anchored)?),
            subscribe: None,
        })
    }

    /// Everything
    pub fn all() -> Self {
        TraceQuery {
            pattern: None,
            subscribe: None,
        }
    }

    /// Set subscription on every trace rendered
    pub fn with_subscribe(mut self, subscribe: Option<bool>) -> Self {
        self.subscribe = subscribe;
        self
    }

    pub fn matches(&self, trace: &Trace) -> bool {
        self.pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(&trace.full_key(".")))
    }

    /// Render matching traces of a sorted batch.
    ///
    /// The dotted parent prefix is printed when it changes and replaced by
    /// spaces while consecutive traces share it.
    pub fn render(&self, traces: &[Trace]) -> String {
        let mut out = String::new();
        let mut current_prefix: Option<&[std::sync::Arc<str>]> = None;
        let mut prefix_key = String::new();

        for trace in traces {
            if !self.matches(trace) {
                continue;
            }
            if let Some(enabled) = self.subscribe {
                trace.subscribe(enabled);
            }

            let parents = &trace.hierarchy[..trace.hierarchy.len().saturating_sub(1)];
            let changed = current_prefix != Some(parents);
            if changed {
                current_prefix = Some(parents);
                prefix_key = parents.join(".");
                if !prefix_key.is_empty() {
                    prefix_key.push('.');
                }
                out.push_str(&prefix_key);
            } else {
                out.extend(std::iter::repeat(' ').take(prefix_key.len()));
            }

            let marker = if trace.is_subscribed() { "(+) " } else { " " };
            let _ = writeln!(out, "{}{}= {}", trace.key, marker, trace.value);
        }
        out
    }
}
