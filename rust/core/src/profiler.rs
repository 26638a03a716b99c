//! Named-section wall-clock profiler.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    time::{Duration, Instant},
};

/// Accumulates wall-clock time per named section.
#[derive(Debug, Default, Clone)]
pub struct Profiler {
    local_rank: Option<usize>,
    sections: BTreeMap<String, Vec<Duration>>,
}

impl Profiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag the profiler with the worker's local rank.
    pub fn set_local_rank(&mut self, rank: usize) {
        self.local_rank = Some(rank);
    }

    #[must_use]
    pub fn local_rank(&self) -> Option<usize> {
        self.local_rank
    }

    /// Run `f`, recording its duration under `name`.
    pub fn time<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(name, start.elapsed());
        out
    }

    pub fn record(&mut self, name: &str, elapsed: Duration) {
        self.sections
            .entry(name.to_string())
            .or_default()
            .push(elapsed);
    }

    /// Total time spent in `name`.
    #[must_use]
    pub fn total(&self, name: &str) -> Option<Duration> {
        self.sections.get(name).map(|d| d.iter().sum())
    }

    /// Per-section summary. Empty on non-primary ranks so only one worker reports.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.local_rank.is_some_and(|rank| rank != 0) {
            return String::new();
        }

        let mut out = String::new();
        for (name, durations) in &self.sections {
            let total: Duration = durations.iter().sum();
            let mean = total / u32::try_from(durations.len()).unwrap_or(u32::MAX);
            let _ = writeln!(
                out,
                "{name:30} calls={:<6} total={:>10.3}s mean={:>10.6}s",
                durations.len(),
                total.as_secs_f64(),
                mean.as_secs_f64()
            );
        }
        out
    }
}
