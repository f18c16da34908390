//! Schema registry.
//!
//! Turns per-logger-type schema definitions into decoder tables once, so the
//! registry can be shared read-only across every test case of a log stream.
//! Registration also fills the schema soup: a registry-wide map from entry
//! name to its kind and argument labels, used to decode expectation wrappers
//! that mention events of arbitrary loggers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::decode::{ArgSpec, Decoder, DecoderKind};
use crate::entry::EntryTag;
use crate::error::{ChewError, Result};

/// Wire definition of one logger type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaDef {
    #[serde(rename = "type")]
    pub logger_type: Option<String>,
    pub subtype: Option<String>,
    #[serde(rename = "stateVars")]
    pub state_vars: Map<String, Value>,
    pub events: Map<String, Value>,
    #[serde(rename = "asyncJobs")]
    pub async_jobs: Map<String, Value>,
    pub calls: Map<String, Value>,
    pub errors: Map<String, Value>,
    #[serde(rename = "TEST_ONLY_events")]
    pub test_only_events: Map<String, Value>,
    #[serde(rename = "TEST_ONLY_asyncJobs")]
    pub test_only_async_jobs: Map<String, Value>,
    #[serde(rename = "TEST_ONLY_calls")]
    pub test_only_calls: Map<String, Value>,
    #[serde(rename = "LAYER_MAPPING")]
    pub layer_mapping: Option<LayerMapping>,
    #[serde(rename = "topBilling")]
    pub top_billing: bool,
    /// Ordered `identArg -> role` map for connection naming.
    #[serde(rename = "semanticIdent")]
    pub semantic_ident: Map<String, Value>,
}

/// State-variable triggered layer transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMapping {
    /// Layer of entries before any transition fires.
    pub layer: String,
    #[serde(default)]
    pub transitions: Vec<LayerTransition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerTransition {
    /// `{stateVar: value}` that fires the transition.
    pub after: Map<String, Value>,
    #[serde(rename = "become")]
    pub becomes: String,
}

impl LayerMapping {
    /// Layer to switch to after a state change, if any transition matches.
    #[must_use]
    pub fn transition_for(&self, name: &str, value: &Value) -> Option<&str> {
        self.transitions
            .iter()
            .find(|t| t.after.get(name) == Some(value))
            .map(|t| t.becomes.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSide {
    Client,
    Server,
}

impl ConnectionSide {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentRole {
    Server,
    Client,
    Type,
    Unique,
}

impl IdentRole {
    fn parse(value: &Value) -> Option<Self> {
        match value.as_str()? {
            "server" => Some(Self::Server),
            "client" => Some(Self::Client),
            "type" => Some(Self::Type),
            "unique" => Some(Self::Unique),
            _ => None,
        }
    }
}

/// Computes a side-independent name for a connection logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNaming {
    pub side: ConnectionSide,
    roles: Vec<Option<IdentRole>>,
}

impl ConnectionNaming {
    /// `type|server|client|unique`, read positionally from the logger's
    /// semantic identifier. `None` if the identifier is not an array.
    #[must_use]
    pub fn normalized_name(&self, semantic_ident: &Value) -> Option<String> {
        let parts = semantic_ident.as_array()?;
        let mut components: [String; 4] = Default::default();
        for (role, part) in self.roles.iter().zip(parts) {
            let slot = match role {
                Some(IdentRole::Type) => 0,
                Some(IdentRole::Server) => 1,
                Some(IdentRole::Client) => 2,
                Some(IdentRole::Unique) => 3,
                None => continue,
            };
            components[slot] = match part {
                Value::Null => String::new(),
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
        }
        Some(components.join("|"))
    }
}

#[derive(Debug, Clone)]
pub struct SchemaMeta {
    pub name: String,
    pub layer_mapping: Option<LayerMapping>,
    pub top_billing: bool,
    pub connection: Option<ConnectionNaming>,
}

/// Decoders and metadata for one logger type.
#[derive(Debug, Clone)]
pub struct SchemaHandlers {
    pub meta: SchemaMeta,
    decoders: HashMap<String, Decoder>,
}

impl SchemaHandlers {
    /// Decoder for a raw entry kind (`connect`, `login_begin`, ...).
    #[must_use]
    pub fn decoder(&self, kind: &str) -> Option<&Decoder> {
        self.decoders.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoupEntry {
    pub tag: EntryTag,
    pub args: Vec<ArgSpec>,
}

pub type SchemaSoup = HashMap<String, SoupEntry>;

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaHandlers>,
    soup: SchemaSoup,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the test harness's own logger types.
    pub fn with_harness_schemas() -> Result<Self> {
        let mut registry = Self::new();
        if let Value::Object(schemas) = harness_schemas() {
            registry.register_schemas(&schemas)?;
        }
        Ok(registry)
    }

    /// Register every schema of a `{name: definition}` map. A name that is
    /// already registered is replaced.
    pub fn register_schemas(&mut self, schemas: &Map<String, Value>) -> Result<()> {
        for (name, definition) in schemas {
            let def = SchemaDef::deserialize(definition).map_err(|err| ChewError::InvalidSchema {
                schema: name.clone(),
                message: err.to_string(),
            })?;
            self.register_schema(name, &def)?;
        }
        Ok(())
    }

    pub fn register_schema(&mut self, name: &str, def: &SchemaDef) -> Result<()> {
        let mut soup = Vec::new();
        let handlers = build_handlers(name, def, &mut soup)?;
        tracing::debug!(
            schema = name,
            kinds = handlers.decoders.len(),
            "registered loggest schema"
        );
        self.soup.extend(soup);
        self.schemas.insert(name.to_string(), handlers);
        Ok(())
    }

    /// Handlers for a logger type; an unregistered type is fatal.
    pub fn handlers(&self, name: &str) -> Result<&SchemaHandlers> {
        self.schemas.get(name).ok_or_else(|| ChewError::UnknownSchema {
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    #[must_use]
    pub fn soup(&self) -> &SchemaSoup {
        &self.soup
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn harness_schemas() -> Value {
    json!({
        "testCase": {},
        "testCasePermutation": {
            "calls": {
                "setupFunc": {},
                "actorConstructor": {"actorType": "str"},
            },
        },
        "testStep": {
            "asyncJobs": {"run": {}},
            "calls": {"stepFunc": {}},
            "errors": {"timeout": {}},
        },
    })
}

fn arg_specs(schema: &str, event: &str, spec: &Value) -> Result<Vec<ArgSpec>> {
    match spec {
        Value::Object(args) => Ok(args
            .iter()
            .map(|(name, kind)| ArgSpec::from_schema(name, kind))
            .collect()),
        Value::Null | Value::Bool(true) => Ok(Vec::new()),
        other => Err(ChewError::InvalidSchema {
            schema: schema.to_string(),
            message: format!("arguments of {event:?} must be an object, got {other}"),
        }),
    }
}

fn test_only_specs(schema: &str, table: &Map<String, Value>, event: &str) -> Result<Vec<ArgSpec>> {
    table
        .get(event)
        .map_or_else(|| Ok(Vec::new()), |spec| arg_specs(schema, event, spec))
}

fn build_handlers(
    name: &str,
    def: &SchemaDef,
    soup: &mut Vec<(String, SoupEntry)>,
) -> Result<SchemaHandlers> {
    let mut decoders = HashMap::new();
    let mut add = |key: String, decoder: Decoder| {
        soup.push((
            key.clone(),
            SoupEntry {
                tag: decoder.kind().tag(),
                args: decoder.args().to_vec(),
            },
        ));
        decoders.insert(key, decoder);
    };

    for key in def.state_vars.keys() {
        add(key.clone(), Decoder::state_var(key.as_str()));
    }
    for (key, spec) in &def.events {
        let args = arg_specs(name, key, spec)?;
        let test_only = test_only_specs(name, &def.test_only_events, key)?;
        add(
            key.clone(),
            Decoder::new(DecoderKind::Event, key.as_str(), args, test_only),
        );
    }
    for (key, spec) in &def.async_jobs {
        let args = arg_specs(name, key, spec)?;
        let test_only = test_only_specs(name, &def.test_only_async_jobs, key)?;
        add(
            format!("{key}_begin"),
            Decoder::new(
                DecoderKind::AsyncBegin,
                key.as_str(),
                args.clone(),
                test_only.clone(),
            ),
        );
        add(
            format!("{key}_end"),
            Decoder::new(DecoderKind::AsyncEnd, key.as_str(), args, test_only),
        );
    }
    for (key, spec) in &def.calls {
        let args = arg_specs(name, key, spec)?;
        let test_only = test_only_specs(name, &def.test_only_calls, key)?;
        add(
            key.clone(),
            Decoder::new(DecoderKind::Call, key.as_str(), args, test_only),
        );
    }
    for (key, spec) in &def.errors {
        let args = arg_specs(name, key, spec)?;
        add(
            key.clone(),
            Decoder::new(DecoderKind::Error, key.as_str(), args, Vec::new()),
        );
    }

    Ok(SchemaHandlers {
        meta: SchemaMeta {
            name: name.to_string(),
            layer_mapping: def.layer_mapping.clone(),
            top_billing: def.top_billing,
            connection: connection_naming(name, def)?,
        },
        decoders,
    })
}

fn connection_naming(name: &str, def: &SchemaDef) -> Result<Option<ConnectionNaming>> {
    if def.logger_type.as_deref() != Some("connection") {
        return Ok(None);
    }
    let side = match def.subtype.as_deref() {
        Some("client") => ConnectionSide::Client,
        Some("server") => ConnectionSide::Server,
        other => {
            tracing::debug!(schema = name, subtype = ?other, "connection without a side, not paired");
            return Ok(None);
        }
    };
    let roles: Vec<Option<IdentRole>> = def.semantic_ident.values().map(IdentRole::parse).collect();
    if roles.iter().all(Option::is_none) {
        return Ok(None);
    }
    Ok(Some(ConnectionNaming { side, roles }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(schemas: Value) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry.register_schemas(schemas.as_object().unwrap())?;
        Ok(registry)
    }

    #[test]
    fn async_jobs_get_begin_and_end_decoders() {
        let registry = register(json!({"imap": {"asyncJobs": {"sync": {"folder": "str"}}}})).unwrap();
        let handlers = registry.handlers("imap").unwrap();
        let mut kinds: Vec<_> = handlers.kinds().collect();
        kinds.sort_unstable();
        assert_eq!(kinds, ["sync_begin", "sync_end"]);
        assert_eq!(handlers.decoder("sync_end").unwrap().name(), "sync");
        assert_eq!(handlers.decoder("sync_begin").unwrap().required_len(), 4);
    }

    #[test]
    fn argument_order_follows_declaration() {
        let registry =
            register(json!({"s": {"events": {"e": {"zeta": "str", "alpha": "num", "mid": true}}}}))
                .unwrap();
        let decoder = registry.handlers("s").unwrap().decoder("e").unwrap();
        let names: Vec<_> = decoder.args().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn soup_spans_schemas() {
        let registry = register(json!({
            "a": {"events": {"ping": {"n": "num"}}},
            "b": {"stateVars": {"state": true}, "errors": {"oops": {}}},
        }))
        .unwrap();
        let soup = registry.soup();
        assert_eq!(soup["ping"].tag, EntryTag::Event);
        assert_eq!(soup["ping"].args, [ArgSpec::from_schema("n", &json!("num"))]);
        assert_eq!(soup["state"].tag, EntryTag::StateChange);
        assert_eq!(soup["oops"].tag, EntryTag::Error);
    }

    #[test]
    fn unregistered_schema_is_fatal() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.handlers("nope"),
            Err(ChewError::UnknownSchema { .. })
        ));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = register(json!({"s": {"events": {"e": 4}}})).unwrap_err();
        assert!(matches!(err, ChewError::InvalidSchema { .. }));
    }

    #[test]
    fn connection_names_match_across_sides() {
        let registry = register(json!({
            "clientConn": {
                "type": "connection", "subtype": "client",
                "semanticIdent": {"_l": null, "clientIdent": "client", "serverIdent": "server"},
            },
            "serverConn": {
                "type": "connection", "subtype": "server",
                "semanticIdent": {"_l": null, "serverIdent": "server", "clientIdent": "client"},
            },
        }))
        .unwrap();
        let client = registry.handlers("clientConn").unwrap().meta.connection.clone().unwrap();
        let server = registry.handlers("serverConn").unwrap().meta.connection.clone().unwrap();
        assert_eq!(client.side, ConnectionSide::Client);
        assert_eq!(server.side.other(), ConnectionSide::Client);
        assert_eq!(
            client.normalized_name(&json!(["conn", "alice", "srv"])),
            server.normalized_name(&json!(["conn", "srv", "alice"]))
        );
        assert_eq!(
            client.normalized_name(&json!(["conn", "alice", "srv"])).as_deref(),
            Some("|srv|alice|")
        );
        assert_eq!(client.normalized_name(&json!("conn")), None);
    }

    #[test]
    fn connection_without_side_registers_unpaired() {
        let registry = register(json!({
            "peer": {
                "type": "connection", "subtype": "peer",
                "semanticIdent": {"_l": null, "a": "client", "b": "server"},
            },
            "link": {"type": "connection", "events": {"up": {}}},
        }))
        .unwrap();
        assert!(registry.handlers("peer").unwrap().meta.connection.is_none());
        let link = registry.handlers("link").unwrap();
        assert!(link.meta.connection.is_none());
        assert!(link.decoder("up").is_some());
    }

    #[test]
    fn layer_mapping_transition_lookup() {
        let registry = register(json!({"c": {
            "stateVars": {"connState": true},
            "LAYER_MAPPING": {
                "layer": "protocol",
                "transitions": [{"after": {"connState": "authed"}, "become": "app"}],
            },
            "topBilling": true,
        }}))
        .unwrap();
        let meta = &registry.handlers("c").unwrap().meta;
        assert!(meta.top_billing);
        let mapping = meta.layer_mapping.as_ref().unwrap();
        assert_eq!(mapping.layer, "protocol");
        assert_eq!(mapping.transition_for("connState", &json!("authed")), Some("app"));
        assert_eq!(mapping.transition_for("connState", &json!("open")), None);
    }

    #[test]
    fn harness_schemas_cover_steps_and_permutations() {
        let registry = SchemaRegistry::with_harness_schemas().unwrap();
        assert!(registry.contains("testCase"));
        let step = registry.handlers("testStep").unwrap();
        assert!(step.decoder("run_begin").is_some());
        assert!(step.decoder("timeout").is_some());
        let perm = registry.handlers("testCasePermutation").unwrap();
        assert_eq!(perm.decoder("setupFunc").unwrap().kind(), DecoderKind::Call);
    }

    #[test]
    fn reregistering_replaces() {
        let mut registry = register(json!({"s": {"events": {"a": {}}}})).unwrap();
        registry
            .register_schemas(json!({"s": {"events": {"b": {}}}}).as_object().unwrap())
            .unwrap();
        let handlers = registry.handlers("s").unwrap();
        assert!(handlers.decoder("a").is_none());
        assert!(handlers.decoder("b").is_some());
        assert_eq!(registry.len(), 1);
    }
}
