//! Unique-name resolution for actors, things and loggers.
//!
//! All three share one namespace of integer unique names: positive names
//! belong to actors and loggers, non-positive names to things. The arena
//! hands out stable indices; a name referenced before its declaration gets a
//! placeholder slot that the declaration later fills in place, so every index
//! issued earlier keeps pointing at the right entity.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::logger::LoggerMeta;
use crate::raw::RawNamedThing;

pub type UniqueName = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ActorId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThingId(pub usize);

/// Index of a logger; doubles as its column in the entry matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LoggerId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Actor(ActorId),
    Thing(ThingId),
    Logger(LoggerId),
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorMeta {
    pub unique_name: UniqueName,
    /// `None` while the actor is a speculative placeholder.
    pub raw: Option<RawNamedThing>,
    pub name: String,
    pub parent: Option<ActorId>,
    pub kids: Vec<ActorId>,
    pub logger: Option<LoggerId>,
}

impl ActorMeta {
    fn placeholder(unique_name: UniqueName) -> Self {
        Self {
            unique_name,
            raw: None,
            name: String::new(),
            parent: None,
            kids: Vec::new(),
            logger: None,
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.raw.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThingMeta {
    pub unique_name: UniqueName,
    pub raw: Option<RawNamedThing>,
    pub name: String,
    /// Opaque value (a key, a token) this thing stands in for.
    pub alias: Option<String>,
    pub family: Option<String>,
    /// Logger whose `named` block declared this thing.
    pub owner: Option<LoggerId>,
}

impl ThingMeta {
    fn placeholder(unique_name: UniqueName) -> Self {
        Self {
            unique_name,
            raw: None,
            name: String::new(),
            alias: None,
            family: None,
            owner: None,
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.raw.is_none()
    }
}

/// Opaque-identifier aliases in declaration order.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    exact: HashMap<String, ThingId>,
    ordered: Vec<(String, ThingId)>,
}

impl AliasTable {
    pub fn insert(&mut self, alias: &str, thing: ThingId) {
        if alias.is_empty() {
            return;
        }
        self.exact.entry(alias.to_string()).or_insert(thing);
        self.ordered.push((alias.to_string(), thing));
    }

    /// Find the thing a string argument refers to.
    ///
    /// An exact match wins. Otherwise the first alias (in declaration order)
    /// embedded in `value` at an offset within `slip` bytes of a multiple of
    /// `chunk` is used.
    #[must_use]
    pub fn lookup(&self, value: &str, chunk: usize, slip: usize) -> Option<ThingId> {
        if let Some(thing) = self.exact.get(value) {
            return Some(*thing);
        }
        if chunk == 0 {
            return None;
        }
        self.ordered.iter().find_map(|(alias, thing)| {
            if alias.len() >= value.len() {
                return None;
            }
            value
                .match_indices(alias.as_str())
                .any(|(offset, _)| offset % chunk <= slip)
                .then_some(*thing)
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// One piece of a resolved semantic identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum IdentToken {
    Text(String),
    Actor(ActorId),
    Thing(ThingId),
    Logger(LoggerId),
}

impl From<EntityRef> for IdentToken {
    fn from(entity: EntityRef) -> Self {
        match entity {
            EntityRef::Actor(id) => Self::Actor(id),
            EntityRef::Thing(id) => Self::Thing(id),
            EntityRef::Logger(id) => Self::Logger(id),
        }
    }
}

/// Whitespace-normalized token stream of a semantic identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SemanticIdent(pub Vec<IdentToken>);

impl SemanticIdent {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self(vec![IdentToken::Text(text.into())])
    }

    /// The identifier as a string when it contains no references.
    #[must_use]
    pub fn as_plain_text(&self) -> Option<&str> {
        match self.0.as_slice() {
            [] => Some(""),
            [IdentToken::Text(text)] => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &[IdentToken] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Characters that let a word sit directly after the previous token.
fn opens_with_boundary(word: &str) -> bool {
    word.chars()
        .next()
        .is_some_and(|c| matches!(c, ')' | '}' | ']' | ':' | ';' | ',') || c.is_whitespace())
}

#[derive(Default)]
struct IdentBuilder {
    tokens: Vec<IdentToken>,
    need_space: bool,
    maybe_need_comma: bool,
}

impl IdentBuilder {
    fn append_text(&mut self, text: &str) {
        if let Some(IdentToken::Text(last)) = self.tokens.last_mut() {
            last.push_str(text);
        } else {
            self.tokens.push(IdentToken::Text(text.to_string()));
        }
    }

    fn push_word(&mut self, word: &str) {
        if word.is_empty() {
            return;
        }
        if self.need_space && !opens_with_boundary(word) {
            self.append_text(" ");
        }
        self.append_text(word);
        self.need_space = !word.ends_with(char::is_whitespace);
        self.maybe_need_comma = false;
    }

    fn push_ref(&mut self, token: IdentToken) {
        if self.maybe_need_comma {
            self.append_text(", ");
        } else if self.need_space {
            self.append_text(" ");
        }
        self.tokens.push(token);
        self.need_space = true;
        self.maybe_need_comma = true;
    }

    fn finish(self) -> SemanticIdent {
        SemanticIdent(self.tokens)
    }
}

/// Integer unique name carried by a JSON number, if it is one.
#[must_use]
pub fn unique_name_of(value: &Value) -> Option<UniqueName> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    (f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
}

/// Per-permutation identity store.
#[derive(Debug, Default)]
pub struct IdentityArena {
    pub actors: Vec<ActorMeta>,
    pub things: Vec<ThingMeta>,
    pub loggers: Vec<LoggerMeta>,
    pub aliases: AliasTable,
    by_name: HashMap<UniqueName, EntityRef>,
}

impl IdentityArena {
    #[must_use]
    pub fn lookup(&self, unique_name: UniqueName) -> Option<EntityRef> {
        self.by_name.get(&unique_name).copied()
    }

    /// Resolve a unique name, creating a placeholder if it is unknown.
    ///
    /// Resolving the same undeclared name twice yields the same entity.
    pub fn resolve_or_create(&mut self, unique_name: UniqueName) -> EntityRef {
        if let Some(entity) = self.lookup(unique_name) {
            return entity;
        }
        let entity = if unique_name > 0 {
            self.actors.push(ActorMeta::placeholder(unique_name));
            EntityRef::Actor(ActorId(self.actors.len() - 1))
        } else {
            self.things.push(ThingMeta::placeholder(unique_name));
            EntityRef::Thing(ThingId(self.things.len() - 1))
        };
        tracing::trace!(unique_name, ?entity, "speculative placeholder");
        self.by_name.insert(unique_name, entity);
        entity
    }

    /// Fill in (or create) the slot for a named actor or thing.
    ///
    /// Returns `None` when the name is already held by a logger.
    pub fn declare(&mut self, raw: RawNamedThing, owner: Option<LoggerId>) -> Option<EntityRef> {
        let unique_name = raw.unique_name?;
        let entity = self.resolve_or_create(unique_name);
        match entity {
            EntityRef::Actor(id) => {
                let actor = &mut self.actors[id.0];
                actor.name = raw.name.clone().unwrap_or_default();
                actor.raw = Some(raw);
            }
            EntityRef::Thing(id) => {
                let thing = &mut self.things[id.0];
                thing.name = raw.name.clone().unwrap_or_default();
                thing.alias.clone_from(&raw.alias);
                if thing.family.is_none() {
                    thing.family.clone_from(&raw.family);
                }
                thing.owner = owner;
                if let Some(alias) = &raw.alias {
                    self.aliases.insert(alias, id);
                }
                thing.raw = Some(raw);
            }
            EntityRef::Logger(_) => return None,
        }
        Some(entity)
    }

    /// Add a logger and claim its unique name.
    ///
    /// An actor already holding the name keeps it and is linked to the
    /// logger instead, so references to that name still render the actor.
    pub fn register_logger(&mut self, logger: LoggerMeta) -> LoggerId {
        let unique_name = logger.unique_name;
        self.loggers.push(logger);
        let id = LoggerId(self.loggers.len() - 1);
        let Some(unique_name) = unique_name else {
            return id;
        };
        match self.lookup(unique_name) {
            Some(EntityRef::Actor(actor)) => {
                if self.actors[actor.0].logger.is_none() {
                    self.actors[actor.0].logger = Some(id);
                    self.loggers[id.0].actor = Some(actor);
                }
            }
            _ => {
                self.by_name.insert(unique_name, EntityRef::Logger(id));
            }
        }
        id
    }

    /// Resolve a wire semantic identifier into a token stream.
    ///
    /// Adjacent words are joined by one space unless the right word opens
    /// with closing punctuation or whitespace, or the left word already ends
    /// in whitespace. Adjacent references are joined by `", "`.
    pub fn resolve_semantic_ident(&mut self, ident: &Value) -> SemanticIdent {
        match ident {
            Value::Null => SemanticIdent::default(),
            Value::String(text) => SemanticIdent::text(text.as_str()),
            Value::Array(items) if items.len() == 1 && items[0].is_null() => {
                SemanticIdent::text("[null]")
            }
            Value::Array(items) => {
                let mut builder = IdentBuilder::default();
                for item in items {
                    match item {
                        Value::String(word) => builder.push_word(word),
                        Value::Number(_) => match unique_name_of(item) {
                            Some(unique_name) => {
                                let entity = self.resolve_or_create(unique_name);
                                builder.push_ref(entity.into());
                            }
                            None => builder.push_word(&item.to_string()),
                        },
                        Value::Null => builder.push_word("null"),
                        other => builder.push_word(&other.to_string()),
                    }
                }
                builder.finish()
            }
            other => SemanticIdent::text(other.to_string()),
        }
    }

    pub(crate) fn unique_names(&self) -> &HashMap<UniqueName, EntityRef> {
        &self.by_name
    }
}
