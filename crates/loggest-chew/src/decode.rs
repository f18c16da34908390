//! Positional record decoding.
//!
//! A raw record is `[kind, arg1..argN, timestamp, sequence, ...]`. The argument
//! count comes from the schema, never from the record length, so a record
//! shorter than its schema demands is a fatal version mismatch. Slots past the
//! required length hold optional test-only arguments.

use serde_json::Value;

use crate::config::ChewConfig;
use crate::entry::{ArgValue, Args, EntryKind, EntryTag, ExceptionInfo, LabeledArg, LogEntry};
use crate::error::{ChewError, Result};
use crate::identity::{AliasTable, unique_name_of};
use crate::schema::{SchemaHandlers, SchemaSoup};

pub const FAILED_EXPECTATION_KIND: &str = "!failedexp";
pub const MISMATCHED_EXPECTATION_KIND: &str = "!mismatch";
pub const UNEXPECTED_KIND: &str = "!unexpected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    /// Decoded with the `{n, m, f}` exception transform.
    Exception,
    Plain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
}

impl ArgSpec {
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ArgKind::Plain(String::new()),
        }
    }

    /// Interpret a schema argument kind (`"exception"`, `"str"`, `true`, ...).
    #[must_use]
    pub fn from_schema(name: &str, kind: &Value) -> Self {
        let kind = match kind {
            Value::String(kind) if kind == "exception" => ArgKind::Exception,
            Value::String(kind) => ArgKind::Plain(kind.clone()),
            other => ArgKind::Plain(other.to_string()),
        };
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    StateVar,
    Event,
    AsyncBegin,
    AsyncEnd,
    Call,
    Error,
}

impl DecoderKind {
    #[must_use]
    pub fn tag(self) -> EntryTag {
        match self {
            Self::StateVar => EntryTag::StateChange,
            Self::Event => EntryTag::Event,
            Self::AsyncBegin => EntryTag::AsyncBegin,
            Self::AsyncEnd => EntryTag::AsyncEnd,
            Self::Call => EntryTag::Call,
            Self::Error => EntryTag::Error,
        }
    }
}

/// Everything a decoder needs besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    /// The permutation's `born` stamp; `relstamp = timestamp - base_time`.
    pub base_time: f64,
    pub aliases: &'a AliasTable,
    pub alias_chunk_width: usize,
    pub alias_slip: usize,
}

impl<'a> DecodeContext<'a> {
    #[must_use]
    pub fn new(base_time: f64, aliases: &'a AliasTable, config: &ChewConfig) -> Self {
        Self {
            base_time,
            aliases,
            alias_chunk_width: config.alias_chunk_width,
            alias_slip: config.alias_slip,
        }
    }

    fn entry(&self, timestamp: f64, sequence: i64, kind: EntryKind) -> LogEntry {
        LogEntry {
            layer: None,
            timestamp,
            relstamp: timestamp - self.base_time,
            sequence,
            kind,
        }
    }
}

/// Decoder for one entry kind of one schema, bound at registration time.
#[derive(Debug, Clone)]
pub struct Decoder {
    kind: DecoderKind,
    /// Event name as reported on the entry (async jobs drop the suffix).
    name: String,
    args: Vec<ArgSpec>,
    test_only: Vec<ArgSpec>,
}

impl Decoder {
    #[must_use]
    pub fn new(
        kind: DecoderKind,
        name: impl Into<String>,
        args: Vec<ArgSpec>,
        test_only: Vec<ArgSpec>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            args,
            test_only,
        }
    }

    #[must_use]
    pub fn kind(&self) -> DecoderKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    /// Decoder for `[name, value, timestamp, sequence]`.
    #[must_use]
    pub fn state_var(name: impl Into<String>) -> Self {
        Self::new(
            DecoderKind::StateVar,
            name,
            vec![ArgSpec::plain("value")],
            Vec::new(),
        )
    }

    /// Minimum record length, kind slot included.
    #[must_use]
    pub fn required_len(&self) -> usize {
        match self.kind {
            DecoderKind::Call => self.args.len() + 5,
            _ => self.args.len() + 3,
        }
    }

    pub fn decode(&self, record: &[Value], ctx: &DecodeContext<'_>) -> Result<LogEntry> {
        let kind_name = record.first().and_then(Value::as_str).unwrap_or(&self.name);
        if record.len() < self.required_len() {
            return Err(ChewError::RecordTooShort {
                kind: kind_name.to_string(),
                expected: self.required_len(),
                actual: record.len(),
            });
        }

        let n = self.args.len();
        let args = transform_args(&self.args, &record[1..n + 1], ctx);
        let timestamp = timestamp_at(record, n + 1, kind_name)?;
        let sequence = sequence_at(record, n + 2, kind_name)?;
        let name = self.name.clone();

        let kind = match self.kind {
            DecoderKind::StateVar => EntryKind::StateChange {
                name,
                value: record[1].clone(),
            },
            DecoderKind::Call => EntryKind::Call {
                name,
                args,
                test_only_args: self.test_only_args(record, n + 6, ctx),
                end_timestamp: timestamp_at(record, n + 3, kind_name)?,
                end_sequence: sequence_at(record, n + 4, kind_name)?,
                exception: record.get(n + 5).and_then(decode_exception),
            },
            DecoderKind::Error => EntryKind::Error { name, args },
            DecoderKind::Event => EntryKind::Event {
                name,
                args,
                test_only_args: self.test_only_args(record, n + 3, ctx),
            },
            DecoderKind::AsyncBegin => EntryKind::AsyncBegin {
                name,
                args,
                test_only_args: self.test_only_args(record, n + 3, ctx),
            },
            DecoderKind::AsyncEnd => EntryKind::AsyncEnd {
                name,
                args,
                test_only_args: self.test_only_args(record, n + 3, ctx),
                duration: 0.0,
            },
        };
        Ok(ctx.entry(timestamp, sequence, kind))
    }

    fn test_only_args(&self, record: &[Value], start: usize, ctx: &DecodeContext<'_>) -> Args {
        if record.len() <= start || self.test_only.is_empty() {
            return Args::default();
        }
        let count = self.test_only.len().min(record.len() - start);
        transform_args(&self.test_only[..count], &record[start..start + count], ctx)
    }
}

fn timestamp_at(record: &[Value], index: usize, kind: &str) -> Result<f64> {
    record
        .get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| ChewError::malformed(kind, format!("slot {index} is not a timestamp")))
}

fn sequence_at(record: &[Value], index: usize, kind: &str) -> Result<i64> {
    record
        .get(index)
        .and_then(unique_name_of)
        .ok_or_else(|| ChewError::malformed(kind, format!("slot {index} is not a sequence number")))
}

/// `{n, m, f}` into [`ExceptionInfo`]; a logged `null` means no exception.
#[must_use]
pub fn decode_exception(value: &Value) -> Option<ExceptionInfo> {
    let text = |v: Option<&Value>| match v {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    match value {
        Value::Null => None,
        Value::Object(map) => Some(ExceptionInfo {
            name: text(map.get("n")),
            message: text(map.get("m")),
            frames: map
                .get("f")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        }),
        other => Some(ExceptionInfo {
            name: None,
            message: text(Some(other)),
            frames: Vec::new(),
        }),
    }
}

/// Label argument values with their schema names, substituting known
/// aliases with the things they stand for.
#[must_use]
pub fn transform_args(specs: &[ArgSpec], values: &[Value], ctx: &DecodeContext<'_>) -> Args {
    Args(
        specs
            .iter()
            .zip(values)
            .map(|(spec, value)| LabeledArg {
                label: spec.name.clone(),
                value: render_arg(spec, value, ctx),
            })
            .collect(),
    )
}

fn render_arg(spec: &ArgSpec, value: &Value, ctx: &DecodeContext<'_>) -> ArgValue {
    if spec.kind == ArgKind::Exception {
        return ArgValue::Exception(decode_exception(value));
    }
    match value {
        Value::String(text) => ctx
            .aliases
            .lookup(text, ctx.alias_chunk_width, ctx.alias_slip)
            .map_or_else(|| ArgValue::Value(value.clone()), ArgValue::Thing),
        Value::Array(items) if items.is_empty() => ArgValue::Empty,
        other => ArgValue::Value(other.clone()),
    }
}

/// Decode one raw record against a logger's schema.
pub fn decode_record(
    handlers: &SchemaHandlers,
    soup: &SchemaSoup,
    raw: &Value,
    ctx: &DecodeContext<'_>,
) -> Result<LogEntry> {
    let record = raw
        .as_array()
        .ok_or_else(|| ChewError::malformed(handlers.meta.name.as_str(), "record is not an array"))?;
    let kind = record
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ChewError::malformed(handlers.meta.name.as_str(), "record has no kind"))?;

    match kind {
        FAILED_EXPECTATION_KIND => {
            if record.len() < 4 {
                return Err(ChewError::RecordTooShort {
                    kind: kind.to_string(),
                    expected: 4,
                    actual: record.len(),
                });
            }
            let (name, expected_type, args) = decode_expectation(&record[1], soup, ctx)?;
            let timestamp = timestamp_at(record, 2, kind)?;
            let sequence = sequence_at(record, 3, kind)?;
            Ok(ctx.entry(
                timestamp,
                sequence,
                EntryKind::FailedExpectation {
                    expected_type,
                    name,
                    args,
                },
            ))
        }
        MISMATCHED_EXPECTATION_KIND => {
            if record.len() < 3 {
                return Err(ChewError::RecordTooShort {
                    kind: kind.to_string(),
                    expected: 3,
                    actual: record.len(),
                });
            }
            let (expected_name, _, expected_args) = decode_expectation(&record[1], soup, ctx)?;
            let actual = decode_record(handlers, soup, &record[2], ctx)?;
            Ok(wrap(actual, |actual| EntryKind::MismatchedExpectation {
                expected_name,
                expected_args,
                actual,
            }))
        }
        UNEXPECTED_KIND => {
            let inner = record.get(1).ok_or(ChewError::RecordTooShort {
                kind: kind.to_string(),
                expected: 2,
                actual: record.len(),
            })?;
            let actual = decode_record(handlers, soup, inner, ctx)?;
            Ok(wrap(actual, |entry| EntryKind::Unexpected { entry }))
        }
        _ => handlers
            .decoder(kind)
            .ok_or_else(|| ChewError::UnknownEntryKind {
                schema: handlers.meta.name.clone(),
                kind: kind.to_string(),
            })?
            .decode(record, ctx),
    }
}

/// Decode every record of a logger, in wire order.
pub fn decode_entries(
    handlers: &SchemaHandlers,
    soup: &SchemaSoup,
    raw: &[Value],
    ctx: &DecodeContext<'_>,
) -> Result<Vec<LogEntry>> {
    raw.iter()
        .map(|record| decode_record(handlers, soup, record, ctx))
        .collect()
}

fn wrap(actual: LogEntry, make: impl FnOnce(Box<LogEntry>) -> EntryKind) -> LogEntry {
    LogEntry {
        layer: None,
        timestamp: actual.timestamp,
        relstamp: actual.relstamp,
        sequence: actual.sequence,
        kind: make(Box::new(actual)),
    }
}

/// `[name, args..]` of an expectation, labelled through the schema soup.
fn decode_expectation(
    expectation: &Value,
    soup: &SchemaSoup,
    ctx: &DecodeContext<'_>,
) -> Result<(String, Option<EntryTag>, Args)> {
    let parts = expectation
        .as_array()
        .ok_or_else(|| ChewError::malformed("expectation", "expectation is not an array"))?;
    let name = parts
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ChewError::malformed("expectation", "expectation has no name"))?;
    let values = &parts[1..];
    let known = soup.get(name);
    let specs: Vec<ArgSpec> = (0..values.len())
        .map(|i| {
            known
                .and_then(|entry| entry.args.get(i).cloned())
                .unwrap_or_else(|| ArgSpec::plain(format!("arg{i}")))
        })
        .collect();
    Ok((
        name.to_string(),
        known.map(|entry| entry.tag),
        transform_args(&specs, values, ctx),
    ))
}
