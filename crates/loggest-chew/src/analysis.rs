//! Post-decode analysis passes.
//!
//! The decoder itself computes no summaries; it only provides mount points
//! (`summaries` on the permutation and on each step) that passes fill in.

use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value, json};

use crate::bundle::TestCasePermutationLogBundle;
use crate::entry::{EntryKind, LogEntry};

/// A summary computed step by step over a permutation.
pub trait AnalysisPass {
    /// Key the results are mounted under.
    fn name(&self) -> &str;

    /// Fold one step into the accumulators. `entries` holds everything any
    /// logger logged during the step, in stamp order. Both accumulators start
    /// as `Value::Null`; a pass that leaves one null mounts nothing there.
    fn analyze_step(&self, global: &mut Value, step: &mut Value, entries: &[&LogEntry]);
}

impl TestCasePermutationLogBundle {
    /// Run `pass` over every step and mount its results.
    pub fn run_analysis(&mut self, pass: &dyn AnalysisPass) {
        let name = pass.name().to_string();
        let mut global = self.summaries.remove(&name).unwrap_or(Value::Null);

        let per_step: Vec<Value> = (0..self.steps.len())
            .map(|index| {
                let entries = self.step_entries_merged(index);
                let mut step = self.steps[index]
                    .summaries
                    .get(&name)
                    .cloned()
                    .unwrap_or(Value::Null);
                pass.analyze_step(&mut global, &mut step, &entries);
                step
            })
            .collect();

        for (step, summary) in self.steps.iter_mut().zip(per_step) {
            if !summary.is_null() {
                step.summaries.insert(name.clone(), summary);
            }
        }
        if !global.is_null() {
            self.summaries.insert(name, global);
        }
        tracing::debug!(pass = pass.name(), steps = self.steps.len(), "analysis pass complete");
    }

    /// Fill `AsyncEnd::duration` for every logger and step.
    pub fn link_async_durations(&mut self) {
        for logger in &mut self.loggers {
            link_async_durations(&mut logger.entries);
        }
        for step in &mut self.steps {
            link_async_durations(&mut step.entries);
        }
    }
}

/// Pair each `_end` with the earliest unmatched `_begin` of the same job and
/// record the elapsed time on the end entry. Unmatched ends keep 0.
pub fn link_async_durations(entries: &mut [LogEntry]) {
    let mut pending: HashMap<String, VecDeque<f64>> = HashMap::new();
    for entry in entries {
        let timestamp = entry.timestamp;
        match &mut entry.kind {
            EntryKind::AsyncBegin { name, .. } => {
                pending.entry(name.clone()).or_default().push_back(timestamp);
            }
            EntryKind::AsyncEnd { name, duration, .. } => {
                if let Some(begin) = pending.get_mut(name.as_str()).and_then(VecDeque::pop_front) {
                    *duration = timestamp - begin;
                }
            }
            _ => {}
        }
    }
}

/// Counts and total duration of async jobs, by job name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncJobSummary;

impl AnalysisPass for AsyncJobSummary {
    fn name(&self) -> &str {
        "asyncJobs"
    }

    fn analyze_step(&self, global: &mut Value, step: &mut Value, entries: &[&LogEntry]) {
        for entry in entries {
            if let EntryKind::AsyncEnd { name, duration, .. } = &entry.kind {
                accumulate(step, name, *duration);
                accumulate(global, name, *duration);
            }
        }
    }
}

fn accumulate(target: &mut Value, job: &str, duration: f64) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(jobs) = target else {
        return;
    };
    let slot = jobs
        .entry(job)
        .or_insert_with(|| json!({"count": 0, "totalMs": 0.0}));
    let count = slot["count"].as_u64().unwrap_or(0) + 1;
    let total = slot["totalMs"].as_f64().unwrap_or(0.0) + duration;
    *slot = json!({"count": count, "totalMs": total});
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Args;

    fn job(kind: &str, name: &str, timestamp: f64, sequence: i64) -> LogEntry {
        let (args, test_only_args) = (Args::default(), Args::default());
        let name = name.to_string();
        let kind = match kind {
            "begin" => EntryKind::AsyncBegin {
                name,
                args,
                test_only_args,
            },
            _ => EntryKind::AsyncEnd {
                name,
                args,
                test_only_args,
                duration: 0.0,
            },
        };
        LogEntry {
            layer: None,
            timestamp,
            relstamp: timestamp,
            sequence,
            kind,
        }
    }

    fn duration(entry: &LogEntry) -> Option<f64> {
        match entry.kind {
            EntryKind::AsyncEnd { duration, .. } => Some(duration),
            _ => None,
        }
    }

    #[test]
    fn ends_pair_with_earliest_open_begin() {
        let mut entries = vec![
            job("begin", "sync", 10.0, 1),
            job("begin", "sync", 20.0, 2),
            job("begin", "fetch", 25.0, 3),
            job("end", "sync", 40.0, 4),
            job("end", "fetch", 45.0, 5),
            job("end", "sync", 50.0, 6),
            job("end", "sync", 60.0, 7),
        ];
        link_async_durations(&mut entries);
        let durations: Vec<_> = entries.iter().filter_map(duration).collect();
        assert_eq!(durations, [30.0, 20.0, 30.0, 0.0]);
    }

    #[test]
    fn summary_accumulates_counts_and_totals() {
        let entries = [job("end", "sync", 0.0, 0), job("end", "sync", 0.0, 1)];
        let mut entries = entries.to_vec();
        for (entry, ms) in entries.iter_mut().zip([5.0, 7.0]) {
            if let EntryKind::AsyncEnd { duration, .. } = &mut entry.kind {
                *duration = ms;
            }
        }
        let refs: Vec<&LogEntry> = entries.iter().collect();
        let (mut global, mut step) = (Value::Null, Value::Null);
        AsyncJobSummary.analyze_step(&mut global, &mut step, &refs);
        AsyncJobSummary.analyze_step(&mut global, &mut Value::Null, &refs[..1]);

        assert_eq!(step, json!({"sync": {"count": 2, "totalMs": 12.0}}));
        assert_eq!(global, json!({"sync": {"count": 3, "totalMs": 17.0}}));
    }
}
