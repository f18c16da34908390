//! Decoded output graph.
//!
//! A [`TestCaseLogBundle`] owns one [`TestCasePermutationLogBundle`] per
//! permutation. Everything inside a permutation refers to everything else by
//! arena index, so the graph has no cycles and serializes as plain data.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entry::LogEntry;
use crate::error::ChewWarning;
use crate::identity::{
    ActorId, ActorMeta, EntityRef, IdentToken, LoggerId, SemanticIdent, ThingMeta, UniqueName,
};
use crate::logger::LoggerMeta;
use crate::matrix::{EntryMatrix, StepSpan};

/// How deep [`TestCasePermutationLogBundle::render_ident`] follows logger
/// references before giving up.
const MAX_IDENT_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepResult {
    Pass,
    Fail,
    Skip,
}

impl StepResult {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// One explicit unit of work of a test permutation.
#[derive(Debug, Clone, Serialize)]
pub struct TestCaseStepMeta {
    pub index: usize,
    pub unique_name: Option<UniqueName>,
    pub semantic_ident: SemanticIdent,
    pub result: StepResult,
    pub boring: bool,
    pub group: Option<String>,
    /// The step's own `run`-bracketed entries, chronologically sorted.
    pub entries: Vec<LogEntry>,
    pub span: StepSpan,
    /// Per-step analysis results, keyed by pass name.
    pub summaries: Map<String, Value>,
}

impl TestCaseStepMeta {
    /// Wall time between the step's first and last entry.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => last.relstamp - first.relstamp,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCasePermutationLogBundle {
    pub index: usize,
    /// The permutation's `born` time; every `relstamp` is relative to it.
    pub base_time: f64,
    pub actors: Vec<ActorMeta>,
    pub root_actors: Vec<ActorId>,
    pub things: Vec<ThingMeta>,
    /// Every logger, pre-order; the index is the logger's matrix column.
    pub loggers: Vec<LoggerMeta>,
    pub root_loggers: Vec<LoggerId>,
    pub steps: Vec<TestCaseStepMeta>,
    pub matrix: EntryMatrix,
    /// Setup failures surfaced independently of the step matrix.
    pub notable_entries: Vec<LogEntry>,
    pub warnings: Vec<ChewWarning>,
    pub summaries: Map<String, Value>,
    #[serde(skip)]
    pub(crate) unique_names: HashMap<UniqueName, EntityRef>,
}

impl TestCasePermutationLogBundle {
    /// Matrix rows belonging to step `k`: its before and during rows, plus
    /// the leftover row for the final step.
    #[must_use]
    pub fn rows_for_step(&self, step: usize) -> Option<Range<usize>> {
        if step >= self.steps.len() {
            return None;
        }
        let start = EntryMatrix::before_row(step);
        let end = if step + 1 == self.steps.len() {
            self.matrix.row_count()
        } else {
            EntryMatrix::during_row(step) + 1
        };
        Some(start..end)
    }

    /// True if step `k` or anything logged during it failed.
    #[must_use]
    pub fn step_has_errors(&self, step: usize) -> bool {
        let Some(meta) = self.steps.get(step) else {
            return false;
        };
        if meta.entries.iter().any(LogEntry::is_failure) {
            return true;
        }
        let row = EntryMatrix::during_row(step);
        (0..self.loggers.len()).any(|column| {
            self.cell_entries(row, column)
                .is_some_and(|entries| entries.iter().any(LogEntry::is_failure))
        })
    }

    /// Entries a logger contributed to one matrix row; `None` when it logged
    /// nothing there.
    #[must_use]
    pub fn cell_entries(&self, row: usize, column: usize) -> Option<&[LogEntry]> {
        let range = self.matrix.cell(row, column)?;
        self.loggers.get(column)?.entries.get(range)
    }

    /// Entries every logger logged during step `k`, merged in stamp order.
    #[must_use]
    pub fn step_entries_merged(&self, step: usize) -> Vec<&LogEntry> {
        let row = EntryMatrix::during_row(step);
        let mut merged: Vec<&LogEntry> = (0..self.loggers.len())
            .filter_map(|column| self.cell_entries(row, column))
            .flatten()
            .collect();
        merged.sort_by_key(|entry| entry.stamp());
        merged
    }

    #[must_use]
    pub fn logger_by_unique_name(&self, unique_name: UniqueName) -> Option<&LoggerMeta> {
        match self.unique_names.get(&unique_name)? {
            EntityRef::Logger(id) => self.loggers.get(id.0),
            EntityRef::Actor(id) => self.actor_logger(*id),
            EntityRef::Thing(_) => None,
        }
    }

    #[must_use]
    pub fn entity_by_unique_name(&self, unique_name: UniqueName) -> Option<EntityRef> {
        self.unique_names.get(&unique_name).copied()
    }

    /// The logger an actor logs through, once it is known.
    #[must_use]
    pub fn actor_logger(&self, actor: ActorId) -> Option<&LoggerMeta> {
        let logger = self.actors.get(actor.0)?.logger?;
        self.loggers.get(logger.0)
    }

    pub fn root_loggers(&self) -> impl Iterator<Item = &LoggerMeta> {
        self.root_loggers
            .iter()
            .filter_map(|id| self.loggers.get(id.0))
    }

    pub fn root_actors(&self) -> impl Iterator<Item = &ActorMeta> {
        self.root_actors.iter().filter_map(|id| self.actors.get(id.0))
    }

    /// Flatten a semantic identifier into display text.
    ///
    /// Actors and things render as their names. A logger renders as its own
    /// identifier, so nesting is bounded to keep self-referencing loggers
    /// finite.
    #[must_use]
    pub fn render_ident(&self, ident: &SemanticIdent) -> String {
        let mut out = String::new();
        self.render_into(ident, 0, &mut out);
        out
    }

    fn render_into(&self, ident: &SemanticIdent, depth: usize, out: &mut String) {
        for token in ident.tokens() {
            match token {
                IdentToken::Text(text) => out.push_str(text),
                IdentToken::Actor(id) => match self.actors.get(id.0) {
                    Some(actor) if !actor.is_placeholder() => out.push_str(&actor.name),
                    Some(actor) => out.push_str(&format!("#{}", actor.unique_name)),
                    None => out.push('?'),
                },
                IdentToken::Thing(id) => match self.things.get(id.0) {
                    Some(thing) if !thing.is_placeholder() => out.push_str(&thing.name),
                    Some(thing) => out.push_str(&format!("#{}", thing.unique_name)),
                    None => out.push('?'),
                },
                IdentToken::Logger(id) => match self.loggers.get(id.0) {
                    Some(logger) if depth < MAX_IDENT_DEPTH => {
                        self.render_into(&logger.semantic_ident, depth + 1, out);
                    }
                    _ => out.push_str("..."),
                },
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCaseLogBundle {
    pub file_name: String,
    pub test_name: String,
    pub permutations: Vec<TestCasePermutationLogBundle>,
}

impl TestCaseLogBundle {
    /// Soft warnings of every permutation, in permutation order.
    pub fn warnings(&self) -> impl Iterator<Item = &ChewWarning> {
        self.permutations.iter().flat_map(|perm| perm.warnings.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_results_parse_wire_names() {
        assert_eq!(StepResult::parse("pass"), Some(StepResult::Pass));
        assert_eq!(StepResult::parse("skip"), Some(StepResult::Skip));
        assert_eq!(StepResult::parse("PASS"), None);
        assert_eq!(
            serde_json::to_value(StepResult::Fail).unwrap(),
            serde_json::json!("fail")
        );
    }

    #[test]
    fn empty_step_has_zero_duration() {
        let step = TestCaseStepMeta {
            index: 0,
            unique_name: None,
            semantic_ident: SemanticIdent::default(),
            result: StepResult::Skip,
            boring: false,
            group: None,
            entries: Vec::new(),
            span: StepSpan::Empty,
            summaries: Map::new(),
        };
        assert_eq!(step.duration_ms(), 0.0);
    }
}
