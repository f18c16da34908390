//! Test case and permutation assembly.
//!
//! [`LoggestChewer`] drives a whole decode: it validates the case and
//! permutation boundaries, sets up a fresh [`IdentityArena`] per permutation,
//! builds steps and the logger forest, slices the entry matrix and finally
//! back-links actors to their loggers. Any structural error aborts the case;
//! soft anomalies end up on the permutation's `warnings`.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::bundle::{StepResult, TestCaseLogBundle, TestCasePermutationLogBundle, TestCaseStepMeta};
use crate::config::ChewConfig;
use crate::decode::{DecodeContext, decode_entries};
use crate::entry::{EntryKind, LogEntry, sort_chronologically};
use crate::error::{ChewError, ChewWarning, Result};
use crate::identity::{ActorId, EntityRef, IdentityArena};
use crate::logger::{LoggerForestBuilder, family_name, paint_family};
use crate::matrix::{EntryMatrix, StepSpan, step_span};
use crate::raw::{RawLoggerNode, RawLoggestBundle, TEST_CASE_IDENT, TEST_CASE_PERMUTATION_IDENT};
use crate::schema::{SchemaRegistry, SchemaSoup};

/// Decodes raw test case logs against a shared, read-only schema registry.
#[derive(Debug, Clone)]
pub struct LoggestChewer<'r> {
    registry: &'r SchemaRegistry,
    config: ChewConfig,
}

impl<'r> LoggestChewer<'r> {
    #[must_use]
    pub fn new(registry: &'r SchemaRegistry, config: ChewConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn config(&self) -> &ChewConfig {
        &self.config
    }

    /// Decode one `testCase` node and all of its permutations.
    pub fn process_test_case(
        &self,
        file_name: &str,
        raw: &RawLoggerNode,
    ) -> Result<TestCaseLogBundle> {
        if raw.logger_ident != TEST_CASE_IDENT {
            return Err(ChewError::wrong_ident(TEST_CASE_IDENT, &raw.logger_ident));
        }
        let test_name = display_name(&raw.semantic_ident);
        let _span = tracing::info_span!(
            "loggest.chew",
            file = file_name,
            test = test_name.as_str()
        )
        .entered();

        let permutations = raw
            .kids
            .iter()
            .enumerate()
            .map(|(index, kid)| self.process_permutation(index, kid))
            .collect::<Result<Vec<_>>>()?;

        Ok(TestCaseLogBundle {
            file_name: file_name.to_string(),
            test_name,
            permutations,
        })
    }

    /// Decode one `testCasePermutation` node.
    pub fn process_permutation(
        &self,
        index: usize,
        raw: &RawLoggerNode,
    ) -> Result<TestCasePermutationLogBundle> {
        if raw.logger_ident != TEST_CASE_PERMUTATION_IDENT {
            return Err(ChewError::wrong_ident(
                TEST_CASE_PERMUTATION_IDENT,
                &raw.logger_ident,
            ));
        }
        let _span = tracing::debug_span!("loggest.permutation", index).entered();

        let registry = self.registry;
        let base_time = raw.born.unwrap_or(0.0);
        let mut arena = IdentityArena::default();
        let mut warnings = Vec::new();

        for named in raw.named_things()? {
            if let Some(mismatch) = named.kind_mismatch() {
                warnings.push(mismatch.report());
            }
            arena.declare(named, None);
        }

        let (step_nodes, logger_nodes): (Vec<&RawLoggerNode>, Vec<&RawLoggerNode>) = raw
            .kids
            .iter()
            .partition(|kid| kid.logger_ident == self.config.step_logger_ident);

        let mut forest = LoggerForestBuilder::new(registry, &self.config, base_time);
        let root_loggers = logger_nodes
            .iter()
            .map(|node| forest.create_logger(&mut arena, node, None))
            .collect::<Result<Vec<_>>>()?;

        let root_actors = link_actor_parents(&mut arena, &mut warnings);
        let notable_entries = self.notable_entries(raw, base_time, &arena)?;

        let steps = step_nodes
            .iter()
            .enumerate()
            .map(|(step, node)| self.build_step(step, node, base_time, &mut arena))
            .collect::<Result<Vec<_>>>()?;
        let spans: Vec<StepSpan> = steps.iter().map(|step| step.span).collect();

        let mut matrix = EntryMatrix::new(steps.len(), forest.logger_count());
        for (ordinal, &root) in root_loggers.iter().enumerate() {
            forest.resolve_and_slice(&mut arena, root, &spans, &mut matrix)?;
            paint_family(&mut arena, root, &family_name(ordinal));
        }
        warnings.extend(forest.into_warnings());

        link_actor_loggers(&mut arena, &mut warnings);
        report_placeholders(&arena, &mut warnings);
        report_unknown_expectations(&arena, &steps, registry.soup(), &mut warnings);

        tracing::debug!(
            loggers = arena.loggers.len(),
            steps = steps.len(),
            entries = arena.loggers.iter().map(|l| l.entries.len()).sum::<usize>(),
            warnings = warnings.len(),
            "permutation decoded"
        );

        let unique_names = arena.unique_names().clone();
        Ok(TestCasePermutationLogBundle {
            index,
            base_time,
            actors: arena.actors,
            root_actors,
            things: arena.things,
            loggers: arena.loggers,
            root_loggers,
            steps,
            matrix,
            notable_entries,
            warnings,
            summaries: Map::new(),
            unique_names,
        })
    }

    /// Setup calls of the permutation itself that threw.
    fn notable_entries(
        &self,
        raw: &RawLoggerNode,
        base_time: f64,
        arena: &IdentityArena,
    ) -> Result<Vec<LogEntry>> {
        let handlers = self.registry.handlers(&raw.logger_ident)?;
        let ctx = DecodeContext::new(base_time, &arena.aliases, &self.config);
        let mut entries = decode_entries(handlers, self.registry.soup(), &raw.entries, &ctx)?;
        entries.retain(|entry| match &entry.kind {
            EntryKind::Call {
                name,
                exception: Some(_),
                ..
            } => self.config.notable_kinds.iter().any(|kind| kind == name),
            _ => false,
        });
        sort_chronologically(&mut entries);
        Ok(entries)
    }

    fn build_step(
        &self,
        step: usize,
        raw: &RawLoggerNode,
        base_time: f64,
        arena: &mut IdentityArena,
    ) -> Result<TestCaseStepMeta> {
        let handlers = self.registry.handlers(&raw.logger_ident)?;
        let mut entries = {
            let ctx = DecodeContext::new(base_time, &arena.aliases, &self.config);
            decode_entries(handlers, self.registry.soup(), &raw.entries, &ctx)?
        };
        sort_chronologically(&mut entries);

        let span = step_span(
            step,
            &entries,
            &self.config.run_job_name,
            &self.config.timeout_error_name,
        )?;
        let result = raw
            .result
            .as_deref()
            .and_then(StepResult::parse)
            .unwrap_or_else(|| derive_result(span, &entries));

        Ok(TestCaseStepMeta {
            index: step,
            unique_name: raw.unique_name,
            semantic_ident: arena.resolve_semantic_ident(&raw.semantic_ident),
            result,
            boring: raw.boring,
            group: raw.group.clone(),
            entries,
            span,
            summaries: Map::new(),
        })
    }
}

/// Decode a whole `{schema, fileName, log}` input document.
pub fn chew_json(input: &str, config: &ChewConfig) -> Result<TestCaseLogBundle> {
    let bundle: RawLoggestBundle = serde_json::from_str(input)?;
    let mut registry = SchemaRegistry::with_harness_schemas()?;
    registry.register_schemas(&bundle.schema)?;
    LoggestChewer::new(&registry, config.clone()).process_test_case(&bundle.file_name, &bundle.log)
}

fn derive_result(span: StepSpan, entries: &[LogEntry]) -> StepResult {
    match span {
        StepSpan::Empty => StepResult::Skip,
        StepSpan::Closed { .. } if !entries.iter().any(LogEntry::is_failure) => StepResult::Pass,
        StepSpan::Closed { .. } | StepSpan::Open { .. } => StepResult::Fail,
    }
}

fn display_name(ident: &Value) -> String {
    let resolved = IdentityArena::default().resolve_semantic_ident(ident);
    resolved
        .as_plain_text()
        .map_or_else(|| ident.to_string(), str::to_string)
}

/// Nest declared actors under their parents; returns the root actors.
fn link_actor_parents(arena: &mut IdentityArena, warnings: &mut Vec<ChewWarning>) -> Vec<ActorId> {
    let declared = arena.actors.len();
    let mut roots = Vec::new();
    for index in 0..declared {
        let actor = ActorId(index);
        let meta = &arena.actors[index];
        let Some(raw) = &meta.raw else {
            continue;
        };
        let unique_name = meta.unique_name;
        let Some(parent) = raw.parent_unique_name else {
            roots.push(actor);
            continue;
        };
        match arena.resolve_or_create(parent) {
            EntityRef::Actor(parent_id) => {
                if arena.actors[parent_id.0].is_placeholder() {
                    warnings.push(
                        ChewWarning::UnresolvedActorParent {
                            actor: unique_name,
                            parent,
                        }
                        .report(),
                    );
                }
                arena.actors[index].parent = Some(parent_id);
                arena.actors[parent_id.0].kids.push(actor);
            }
            EntityRef::Thing(_) | EntityRef::Logger(_) => {
                warnings.push(
                    ChewWarning::ActorParentNotActor {
                        actor: unique_name,
                        parent,
                    }
                    .report(),
                );
                roots.push(actor);
            }
        }
    }
    roots
}

/// Point each declared actor at the logger named by its `loggerUniqueName`.
fn link_actor_loggers(arena: &mut IdentityArena, warnings: &mut Vec<ChewWarning>) {
    for index in 0..arena.actors.len() {
        let meta = &arena.actors[index];
        let Some(logger_name) = meta.raw.as_ref().and_then(|raw| raw.logger_unique_name) else {
            continue;
        };
        let unique_name = meta.unique_name;
        let target = match arena.lookup(logger_name) {
            Some(EntityRef::Logger(logger)) => Some(logger),
            Some(EntityRef::Actor(holder)) => arena.actors[holder.0].logger,
            _ => None,
        };
        match target {
            Some(logger) => {
                arena.actors[index].logger = Some(logger);
                let backing = &mut arena.loggers[logger.0];
                if backing.actor.is_none() {
                    backing.actor = Some(ActorId(index));
                }
            }
            None => warnings.push(
                ChewWarning::UnresolvedActorLogger {
                    actor: unique_name,
                    logger: logger_name,
                }
                .report(),
            ),
        }
    }
}

fn report_placeholders(arena: &IdentityArena, warnings: &mut Vec<ChewWarning>) {
    let actors = arena
        .actors
        .iter()
        .filter(|actor| actor.is_placeholder() && actor.logger.is_none())
        .map(|actor| actor.unique_name);
    let things = arena
        .things
        .iter()
        .filter(|thing| thing.is_placeholder())
        .map(|thing| thing.unique_name);
    for unique_name in actors.chain(things) {
        warnings.push(ChewWarning::UnfilledPlaceholder { unique_name }.report());
    }
}

fn report_unknown_expectations(
    arena: &IdentityArena,
    steps: &[TestCaseStepMeta],
    soup: &SchemaSoup,
    warnings: &mut Vec<ChewWarning>,
) {
    let mut seen = HashSet::new();
    let entries = arena
        .loggers
        .iter()
        .flat_map(|logger| logger.entries.iter())
        .chain(steps.iter().flat_map(|step| step.entries.iter()));
    for entry in entries {
        let name = match &entry.kind {
            EntryKind::FailedExpectation {
                expected_type: None,
                name,
                ..
            } => name,
            EntryKind::MismatchedExpectation { expected_name, .. }
                if !soup.contains_key(expected_name) =>
            {
                expected_name
            }
            _ => continue,
        };
        if seen.insert(name.as_str()) {
            warnings.push(ChewWarning::UnknownExpectation { name: name.clone() }.report());
        }
    }
}
