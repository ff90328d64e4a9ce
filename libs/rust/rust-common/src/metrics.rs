//! In-process counters rendered in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Get the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Format as Prometheus text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n",
            name = self.name,
            help = self.help,
            value = self.get()
        )
    }
}

/// Render several counters as one Prometheus exposition block.
#[must_use]
pub fn render(counters: &[&Counter]) -> String {
    counters.iter().map(|c| c.to_prometheus()).collect()
}
