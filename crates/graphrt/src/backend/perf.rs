//! Per-node performance counters exported by instrumented artifacts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceCounter {
    pub name: String,
    pub elapsed_microseconds: u64,
    pub call_count: u64,
}

impl PerformanceCounter {
    pub fn new(name: impl Into<String>, elapsed_microseconds: u64, call_count: u64) -> Self {
        PerformanceCounter {
            name: name.into(),
            elapsed_microseconds,
            call_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn microseconds(&self) -> u64 {
        self.elapsed_microseconds
    }

    pub fn call_count(&self) -> u64 {
        self.call_count
    }
}

/// The four accessors an instrumented artifact exposes.
pub trait DebugTimers {
    fn count(&self) -> usize;
    fn name(&self, index: usize) -> Option<String>;
    fn microseconds(&self, index: usize) -> u64;
    fn call_count(&self, index: usize) -> u64;
}

impl<T: DebugTimers + ?Sized> DebugTimers for &T {
    fn count(&self) -> usize {
        (**self).count()
    }

    fn name(&self, index: usize) -> Option<String> {
        (**self).name(index)
    }

    fn microseconds(&self, index: usize) -> u64 {
        (**self).microseconds(index)
    }

    fn call_count(&self, index: usize) -> u64 {
        (**self).call_count(index)
    }
}

/// Snapshots every counter. Holds no iteration state, so repeated calls restart.
pub fn collect_performance_data(timers: &dyn DebugTimers) -> Vec<PerformanceCounter> {
    (0..timers.count())
        .map(|index| PerformanceCounter {
            name: timers.name(index).unwrap_or_default(),
            elapsed_microseconds: timers.microseconds(index),
            call_count: timers.call_count(index),
        })
        .collect()
}

pub fn performance_report_json(counters: &[PerformanceCounter]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(counters)
}

/// Atomic counters for backends that execute in-process.
#[derive(Debug)]
pub struct DebugTimerTable {
    names: Vec<String>,
    elapsed_nanos: Vec<AtomicU64>,
    calls: Vec<AtomicU64>,
}

impl DebugTimerTable {
    pub fn new(names: Vec<String>) -> Self {
        let elapsed_nanos = names.iter().map(|_| AtomicU64::new(0)).collect();
        let calls = names.iter().map(|_| AtomicU64::new(0)).collect();
        DebugTimerTable {
            names,
            elapsed_nanos,
            calls,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn record(&self, index: usize, elapsed: Duration) {
        if let (Some(nanos), Some(calls)) = (self.elapsed_nanos.get(index), self.calls.get(index))
        {
            nanos.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
            calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Runs `f` and charges its wall time to counter `index`.
    pub fn time<R>(&self, index: usize, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.record(index, start.elapsed());
        result
    }
}

impl DebugTimers for DebugTimerTable {
    fn count(&self) -> usize {
        self.names.len()
    }

    fn name(&self, index: usize) -> Option<String> {
        self.names.get(index).cloned()
    }

    fn microseconds(&self, index: usize) -> u64 {
        self.elapsed_nanos
            .get(index)
            .map_or(0, |nanos| nanos.load(Ordering::Relaxed) / 1_000)
    }

    fn call_count(&self, index: usize) -> u64 {
        self.calls
            .get(index)
            .map_or(0, |calls| calls.load(Ordering::Relaxed))
    }
}
