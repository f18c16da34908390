//! Logger hierarchy.
//!
//! Loggers are built in two passes. The first walks the raw tree pre-order,
//! registers every logger (so its index and unique name exist before anything
//! refers to it), declares the things each logger owns and records connection
//! endpoints. The second pass runs once the step spans are known: it decodes
//! entries, resolves semantic identifiers, pairs connections and slices each
//! logger's entries into its matrix column.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::config::ChewConfig;
use crate::decode::{DecodeContext, decode_entries};
use crate::entry::{Args, EntryKind, LogEntry, sort_chronologically};
use crate::error::{ChewWarning, Result};
use crate::identity::{ActorId, EntityRef, IdentityArena, LoggerId, SemanticIdent, ThingId, UniqueName};
use crate::matrix::{EntryMatrix, StepSpan, slice_column};
use crate::raw::RawLoggerNode;
use crate::schema::{ConnectionSide, LayerMapping, SchemaRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct LoggerMeta {
    pub unique_name: Option<UniqueName>,
    pub logger_ident: String,
    pub raw_semantic_ident: Value,
    pub semantic_ident: SemanticIdent,
    pub born: Option<f64>,
    pub died: Option<f64>,
    /// Chronologically sorted entries; matrix cells index into this.
    pub entries: Vec<LogEntry>,
    pub family: Option<String>,
    pub parent: Option<LoggerId>,
    pub kids: Vec<LoggerId>,
    /// Things declared in this logger's `named` block.
    pub things: Vec<ThingId>,
    /// Normalized `type|server|client|unique` name for connection loggers.
    pub connection: Option<String>,
    pub other_side: Option<LoggerId>,
    /// Actor this logger logs on behalf of.
    pub actor: Option<ActorId>,
    pub top_billed: bool,
}

impl LoggerMeta {
    fn from_raw(raw: &RawLoggerNode, parent: Option<LoggerId>, top_billed: bool) -> Self {
        Self {
            unique_name: raw.unique_name,
            logger_ident: raw.logger_ident.clone(),
            raw_semantic_ident: raw.semantic_ident.clone(),
            semantic_ident: SemanticIdent::default(),
            born: raw.born,
            died: raw.died,
            entries: Vec::new(),
            family: None,
            parent,
            kids: Vec::new(),
            things: Vec::new(),
            connection: None,
            other_side: None,
            actor: None,
            top_billed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ConnectionPair {
    client: Option<LoggerId>,
    server: Option<LoggerId>,
}

impl ConnectionPair {
    fn side(&self, side: ConnectionSide) -> Option<LoggerId> {
        match side {
            ConnectionSide::Client => self.client,
            ConnectionSide::Server => self.server,
        }
    }

    fn side_mut(&mut self, side: ConnectionSide) -> &mut Option<LoggerId> {
        match side {
            ConnectionSide::Client => &mut self.client,
            ConnectionSide::Server => &mut self.server,
        }
    }
}

/// Connection endpoints grouped by normalized name. Several connections may
/// share a name; endpoints are paired first-come first-served.
#[derive(Debug, Default)]
struct ConnectionPairs {
    by_name: HashMap<String, Vec<ConnectionPair>>,
}

impl ConnectionPairs {
    fn register(&mut self, name: &str, side: ConnectionSide, logger: LoggerId) {
        let pairs = self.by_name.entry(name.to_string()).or_default();
        match pairs.iter_mut().find(|pair| pair.side(side).is_none()) {
            Some(pair) => *pair.side_mut(side) = Some(logger),
            None => {
                let mut pair = ConnectionPair::default();
                *pair.side_mut(side) = Some(logger);
                pairs.push(pair);
            }
        }
    }

    fn counterpart(&self, name: &str, side: ConnectionSide, logger: LoggerId) -> Option<LoggerId> {
        self.by_name
            .get(name)?
            .iter()
            .find(|pair| pair.side(side) == Some(logger))?
            .side(side.other())
    }
}

/// Builds one permutation's logger forest into an [`IdentityArena`].
pub struct LoggerForestBuilder<'a> {
    registry: &'a SchemaRegistry,
    config: &'a ChewConfig,
    base_time: f64,
    /// Raw node of every registered logger, indexed by `LoggerId`.
    raw_nodes: Vec<&'a RawLoggerNode>,
    pairs: ConnectionPairs,
    warnings: Vec<ChewWarning>,
}

impl<'a> LoggerForestBuilder<'a> {
    #[must_use]
    pub fn new(registry: &'a SchemaRegistry, config: &'a ChewConfig, base_time: f64) -> Self {
        Self {
            registry,
            config,
            base_time,
            raw_nodes: Vec::new(),
            pairs: ConnectionPairs::default(),
            warnings: Vec::new(),
        }
    }

    /// First pass: register `raw` and its subtree, pre-order.
    pub fn create_logger(
        &mut self,
        arena: &mut IdentityArena,
        raw: &'a RawLoggerNode,
        parent: Option<LoggerId>,
    ) -> Result<LoggerId> {
        let registry = self.registry;
        let handlers = registry.handlers(&raw.logger_ident)?;
        let id = arena.register_logger(LoggerMeta::from_raw(
            raw,
            parent,
            handlers.meta.top_billing,
        ));
        self.raw_nodes.push(raw);

        for named in raw.named_things()? {
            if let Some(mismatch) = named.kind_mismatch() {
                self.warnings.push(mismatch.report());
            }
            if let Some(EntityRef::Thing(thing)) = arena.declare(named, Some(id)) {
                arena.loggers[id.0].things.push(thing);
            }
        }

        if let Some(naming) = &handlers.meta.connection {
            if let Some(name) = naming.normalized_name(&raw.semantic_ident) {
                self.pairs.register(&name, naming.side, id);
                arena.loggers[id.0].connection = Some(name);
            }
        }

        for kid in &raw.kids {
            let kid_id = self.create_logger(arena, kid, Some(id))?;
            arena.loggers[id.0].kids.push(kid_id);
        }
        Ok(id)
    }

    /// Second pass: decode, resolve and slice `id` and its subtree.
    pub fn resolve_and_slice(
        &mut self,
        arena: &mut IdentityArena,
        id: LoggerId,
        spans: &[StepSpan],
        matrix: &mut EntryMatrix,
    ) -> Result<()> {
        let registry = self.registry;
        let raw = self.raw_nodes[id.0];
        let handlers = registry.handlers(&raw.logger_ident)?;

        let mut entries = {
            let ctx = DecodeContext::new(self.base_time, &arena.aliases, self.config);
            decode_entries(handlers, registry.soup(), &raw.entries, &ctx)?
        };
        if let Some(died) = raw.died {
            let died_entry = self.died_entry(died, &entries);
            entries.push(died_entry);
        }
        sort_chronologically(&mut entries);
        if let Some(mapping) = &handlers.meta.layer_mapping {
            apply_layer_mapping(&mut entries, mapping);
        }

        let semantic_ident = arena.resolve_semantic_ident(&raw.semantic_ident);
        let other_side = handlers.meta.connection.as_ref().and_then(|naming| {
            let name = arena.loggers[id.0].connection.as_deref()?;
            let found = self.pairs.counterpart(name, naming.side, id);
            if found.is_none() {
                self.warnings.push(
                    ChewWarning::UnresolvedConnection {
                        logger: raw.unique_name,
                        connection: name.to_string(),
                    }
                    .report(),
                );
            }
            found
        });

        matrix.set_column(id.0, slice_column(&entries, spans));
        tracing::trace!(
            logger = id.0,
            ident = %raw.logger_ident,
            entries = entries.len(),
            "sliced logger column"
        );

        let logger = &mut arena.loggers[id.0];
        logger.entries = entries;
        logger.semantic_ident = semantic_ident;
        logger.other_side = other_side;

        let kids = logger.kids.clone();
        for kid in kids {
            self.resolve_and_slice(arena, kid, spans, matrix)?;
        }
        Ok(())
    }

    /// Synthetic entry marking a logger's death, sequenced after the last
    /// entry it logged.
    fn died_entry(&self, died: f64, entries: &[LogEntry]) -> LogEntry {
        let sequence = entries
            .iter()
            .map(|entry| entry.sequence)
            .max()
            .unwrap_or(self.config.died_sentinel_sequence);
        LogEntry {
            layer: None,
            timestamp: died,
            relstamp: died - self.base_time,
            sequence,
            kind: EntryKind::Event {
                name: self.config.died_event_name.clone(),
                args: Args::default(),
                test_only_args: Args::default(),
            },
        }
    }

    #[must_use]
    pub fn logger_count(&self) -> usize {
        self.raw_nodes.len()
    }

    /// Warnings gathered by both passes.
    #[must_use]
    pub fn into_warnings(self) -> Vec<ChewWarning> {
        self.warnings
    }
}

/// Stamp every entry with the layer current when it was logged. The state
/// change that triggers a transition still belongs to the old layer.
pub fn apply_layer_mapping(entries: &mut [LogEntry], mapping: &LayerMapping) {
    let mut layer = mapping.layer.clone();
    for entry in entries {
        entry.layer = Some(layer.clone());
        if let EntryKind::StateChange { name, value } = &entry.kind {
            if let Some(next) = mapping.transition_for(name, value) {
                layer = next.to_string();
            }
        }
    }
}

/// Family label for the `ordinal`-th root logger: `a`..`z`, then `aa`, `ab`..
#[must_use]
pub fn family_name(ordinal: usize) -> String {
    let mut n = ordinal + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(char::from(b'a' + (n % 26) as u8));
        n /= 26;
    }
    letters.iter().rev().collect()
}

/// Brand a root logger, its descendants and the things they own with
/// `family`. Things that declared their own family keep it.
pub fn paint_family(arena: &mut IdentityArena, root: LoggerId, family: &str) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let logger = &mut arena.loggers[id.0];
        logger.family = Some(family.to_string());
        stack.extend(logger.kids.iter().copied());
        for thing in &logger.things {
            let thing = &mut arena.things[thing.0];
            if thing.family.is_none() {
                thing.family = Some(family.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::entry::Stamp;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::with_harness_schemas().unwrap();
        let schemas = json!({
            "conn": {
                "stateVars": {"state": true},
                "events": {"send": {"bytes": "num"}},
                "LAYER_MAPPING": {
                    "layer": "handshake",
                    "transitions": [{"after": {"state": "open"}, "become": "protocol"}],
                },
            },
            "tcpClient": {
                "type": "connection",
                "subtype": "client",
                "semanticIdent": {"_core": "type", "server": "server", "client": "client"},
                "events": {"send": {"bytes": "num"}},
            },
            "tcpServer": {
                "type": "connection",
                "subtype": "server",
                "semanticIdent": {"_core": "type", "server": "server", "client": "client"},
                "events": {"recv": {"bytes": "num"}},
            },
        });
        registry
            .register_schemas(schemas.as_object().unwrap())
            .unwrap();
        registry
    }

    fn node(value: serde_json::Value) -> RawLoggerNode {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn family_names_roll_over() {
        assert_eq!(family_name(0), "a");
        assert_eq!(family_name(25), "z");
        assert_eq!(family_name(26), "aa");
        assert_eq!(family_name(27), "ab");
        assert_eq!(family_name(26 + 26 * 26), "aaa");
    }

    #[test]
    fn pre_order_registration_and_children() {
        let registry = registry();
        let config = ChewConfig::default();
        let root = node(json!({
            "loggerIdent": "conn", "uniqueName": 1,
            "kids": [
                {"loggerIdent": "conn", "uniqueName": 2,
                 "kids": [{"loggerIdent": "conn", "uniqueName": 3}]},
                {"loggerIdent": "conn", "uniqueName": 4},
            ],
        }));
        let mut arena = IdentityArena::default();
        let mut builder = LoggerForestBuilder::new(&registry, &config, 0.0);
        let id = builder.create_logger(&mut arena, &root, None).unwrap();

        assert_eq!(id, LoggerId(0));
        let names: Vec<_> = arena.loggers.iter().map(|l| l.unique_name).collect();
        assert_eq!(names, [Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(arena.loggers[0].kids, [LoggerId(1), LoggerId(3)]);
        assert_eq!(arena.loggers[2].parent, Some(LoggerId(1)));
        assert_eq!(arena.lookup(3), Some(EntityRef::Logger(LoggerId(2))));
    }

    #[test]
    fn unknown_logger_type_is_fatal() {
        let registry = registry();
        let config = ChewConfig::default();
        let root = node(json!({"loggerIdent": "mystery", "uniqueName": 1}));
        let mut arena = IdentityArena::default();
        let mut builder = LoggerForestBuilder::new(&registry, &config, 0.0);
        assert!(builder.create_logger(&mut arena, &root, None).is_err());
    }

    #[test]
    fn layers_switch_after_the_transition() {
        let registry = registry();
        let config = ChewConfig::default();
        let root = node(json!({
            "loggerIdent": "conn", "uniqueName": 1,
            "entries": [
                ["send", 10, 100, 1],
                ["state", "open", 110, 2],
                ["send", 20, 120, 3],
            ],
        }));
        let mut arena = IdentityArena::default();
        let mut builder = LoggerForestBuilder::new(&registry, &config, 100.0);
        let id = builder.create_logger(&mut arena, &root, None).unwrap();
        let mut matrix = EntryMatrix::new(0, 1);
        builder
            .resolve_and_slice(&mut arena, id, &[], &mut matrix)
            .unwrap();

        let layers: Vec<_> = arena.loggers[0]
            .entries
            .iter()
            .map(|e| e.layer.as_deref())
            .collect();
        assert_eq!(layers, [Some("handshake"), Some("handshake"), Some("protocol")]);
        assert_eq!(matrix.cell(0, 0), Some(0..3));
    }

    #[test]
    fn died_entry_follows_last_sequence() {
        let registry = registry();
        let config = ChewConfig::default();
        let root = node(json!({
            "loggerIdent": "conn", "uniqueName": 1, "died": 300,
            "entries": [["send", 10, 250, 8], ["send", 10, 200, 5]],
        }));
        let mut arena = IdentityArena::default();
        let mut builder = LoggerForestBuilder::new(&registry, &config, 100.0);
        let id = builder.create_logger(&mut arena, &root, None).unwrap();
        let mut matrix = EntryMatrix::new(0, 1);
        builder
            .resolve_and_slice(&mut arena, id, &[], &mut matrix)
            .unwrap();

        let entries = &arena.loggers[0].entries;
        let died = entries.last().unwrap();
        assert_eq!(died.name(), "(died)");
        assert_eq!(died.stamp(), Stamp::new(300.0, 8));
        assert_eq!(died.relstamp, 200.0);
        assert_eq!(entries[0].sequence, 5);
    }

    #[test]
    fn died_without_entries_uses_sentinel() {
        let registry = registry();
        let config = ChewConfig::default();
        let root = node(json!({"loggerIdent": "conn", "uniqueName": 1, "died": 5}));
        let mut arena = IdentityArena::default();
        let mut builder = LoggerForestBuilder::new(&registry, &config, 0.0);
        let id = builder.create_logger(&mut arena, &root, None).unwrap();
        let mut matrix = EntryMatrix::new(0, 1);
        builder
            .resolve_and_slice(&mut arena, id, &[], &mut matrix)
            .unwrap();
        assert_eq!(arena.loggers[0].entries[0].sequence, i64::MAX);
    }

    #[test]
    fn connections_pair_across_sides() {
        let registry = registry();
        let config = ChewConfig::default();
        let client = node(json!({
            "loggerIdent": "tcpClient", "uniqueName": 10,
            "semanticIdent": ["tcp", "S", "C"],
        }));
        let server = node(json!({
            "loggerIdent": "tcpServer", "uniqueName": 11,
            "semanticIdent": ["tcp", "S", "C"],
        }));
        let lonely = node(json!({
            "loggerIdent": "tcpServer", "uniqueName": 12,
            "semanticIdent": ["tcp", "S", "D"],
        }));
        let mut arena = IdentityArena::default();
        let mut builder = LoggerForestBuilder::new(&registry, &config, 0.0);
        let mut roots = Vec::new();
        for raw in [&client, &server, &lonely] {
            roots.push(builder.create_logger(&mut arena, raw, None).unwrap());
        }
        let mut matrix = EntryMatrix::new(0, roots.len());
        for id in roots {
            builder
                .resolve_and_slice(&mut arena, id, &[], &mut matrix)
                .unwrap();
        }

        assert_eq!(arena.loggers[0].connection.as_deref(), Some("tcp|S|C|"));
        assert_eq!(arena.loggers[0].other_side, Some(LoggerId(1)));
        assert_eq!(arena.loggers[1].other_side, Some(LoggerId(0)));
        assert_eq!(arena.loggers[2].other_side, None);
        let warnings = builder.into_warnings();
        assert_eq!(
            warnings,
            [ChewWarning::UnresolvedConnection {
                logger: Some(12),
                connection: "tcp|S|D|".to_string(),
            }]
        );
    }

    #[test]
    fn painting_brands_subtree_and_owned_things() {
        let registry = registry();
        let config = ChewConfig::default();
        let root = node(json!({
            "loggerIdent": "conn", "uniqueName": 1,
            "named": {
                "-1": {"type": "thing", "name": "key"},
                "-2": {"type": "thing", "name": "cert", "family": "q"},
            },
            "kids": [{"loggerIdent": "conn", "uniqueName": 2}],
        }));
        let mut arena = IdentityArena::default();
        let mut builder = LoggerForestBuilder::new(&registry, &config, 0.0);
        let id = builder.create_logger(&mut arena, &root, None).unwrap();
        paint_family(&mut arena, id, "b");

        assert_eq!(arena.loggers[1].family.as_deref(), Some("b"));
        assert_eq!(arena.things[0].family.as_deref(), Some("b"));
        assert_eq!(arena.things[1].family.as_deref(), Some("q"));
        assert_eq!(arena.things[0].owner, Some(LoggerId(0)));
    }
}
