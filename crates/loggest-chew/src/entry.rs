//! Decoded log entries.
//!
//! Every record a logger emits decodes into one [`LogEntry`]: a small set of
//! common time fields plus an [`EntryKind`] payload. Entries within a
//! permutation are totally ordered by [`Stamp`], the `(timestamp, sequence)`
//! pair; timestamps alone collide routinely.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;

use crate::identity::ThingId;

/// Absolute clock value as logged by the harness (milliseconds).
pub type Timestamp = f64;

/// Monotonic tie-break counter shared by every logger of a permutation.
pub type Sequence = i64;

/// Position of an entry in the permutation's total order.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Stamp {
    pub timestamp: Timestamp,
    pub sequence: Sequence,
}

impl Stamp {
    #[must_use]
    pub const fn new(timestamp: Timestamp, sequence: Sequence) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }
}

impl PartialEq for Stamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Stamp {}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Kind tag of an entry, also used to describe schema soup members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTag {
    StateChange,
    Event,
    AsyncBegin,
    AsyncEnd,
    Call,
    Error,
    FailedExpectation,
    MismatchedExpectation,
    Unexpected,
}

/// Structured form of a logged exception (`{n, m, f}` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionInfo {
    pub name: Option<String>,
    pub message: Option<String>,
    pub frames: Vec<Value>,
}

/// A rendered argument value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    /// Plain JSON pass-through.
    Value(Value),
    /// An opaque identifier replaced by the thing it aliases.
    Thing(ThingId),
    /// An empty array; rendered as a marker rather than `[]`.
    Empty,
    /// Argument declared with the `exception` kind; `None` when null was logged.
    Exception(Option<ExceptionInfo>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledArg {
    pub label: String,
    pub value: ArgValue,
}

/// Ordered, labelled arguments of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Args(pub Vec<LabeledArg>);

impl Args {
    /// Look up an argument by its schema name.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&ArgValue> {
        self.0
            .iter()
            .find(|arg| arg.label == label)
            .map(|arg| &arg.value)
    }

    /// The raw JSON of a plain argument.
    #[must_use]
    pub fn value(&self, label: &str) -> Option<&Value> {
        match self.get(label)? {
            ArgValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabeledArg> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    StateChange {
        name: String,
        value: Value,
    },
    Event {
        name: String,
        args: Args,
        test_only_args: Args,
    },
    AsyncBegin {
        name: String,
        args: Args,
        test_only_args: Args,
    },
    AsyncEnd {
        name: String,
        args: Args,
        test_only_args: Args,
        /// Filled by analysis passes; 0 until then.
        duration: f64,
    },
    Call {
        name: String,
        args: Args,
        test_only_args: Args,
        end_timestamp: Timestamp,
        end_sequence: Sequence,
        exception: Option<ExceptionInfo>,
    },
    Error {
        name: String,
        args: Args,
    },
    FailedExpectation {
        /// `None` when the expected name is absent from the schema soup.
        expected_type: Option<EntryTag>,
        name: String,
        args: Args,
    },
    MismatchedExpectation {
        expected_name: String,
        expected_args: Args,
        actual: Box<LogEntry>,
    },
    Unexpected {
        entry: Box<LogEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub layer: Option<String>,
    pub timestamp: Timestamp,
    pub relstamp: f64,
    pub sequence: Sequence,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl LogEntry {
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.timestamp, self.sequence)
    }

    #[must_use]
    pub fn tag(&self) -> EntryTag {
        match &self.kind {
            EntryKind::StateChange { .. } => EntryTag::StateChange,
            EntryKind::Event { .. } => EntryTag::Event,
            EntryKind::AsyncBegin { .. } => EntryTag::AsyncBegin,
            EntryKind::AsyncEnd { .. } => EntryTag::AsyncEnd,
            EntryKind::Call { .. } => EntryTag::Call,
            EntryKind::Error { .. } => EntryTag::Error,
            EntryKind::FailedExpectation { .. } => EntryTag::FailedExpectation,
            EntryKind::MismatchedExpectation { .. } => EntryTag::MismatchedExpectation,
            EntryKind::Unexpected { .. } => EntryTag::Unexpected,
        }
    }

    /// The event name; for wrappers, the name the wrapper is about.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.kind {
            EntryKind::StateChange { name, .. }
            | EntryKind::Event { name, .. }
            | EntryKind::AsyncBegin { name, .. }
            | EntryKind::AsyncEnd { name, .. }
            | EntryKind::Call { name, .. }
            | EntryKind::Error { name, .. }
            | EntryKind::FailedExpectation { name, .. } => name,
            EntryKind::MismatchedExpectation { expected_name, .. } => expected_name,
            EntryKind::Unexpected { entry } => entry.name(),
        }
    }

    #[must_use]
    pub fn args(&self) -> Option<&Args> {
        match &self.kind {
            EntryKind::Event { args, .. }
            | EntryKind::AsyncBegin { args, .. }
            | EntryKind::AsyncEnd { args, .. }
            | EntryKind::Call { args, .. }
            | EntryKind::Error { args, .. }
            | EntryKind::FailedExpectation { args, .. } => Some(args),
            EntryKind::StateChange { .. }
            | EntryKind::MismatchedExpectation { .. }
            | EntryKind::Unexpected { .. } => None,
        }
    }

    /// Errors, expectation failures, and calls that threw.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        match &self.kind {
            EntryKind::Error { .. }
            | EntryKind::FailedExpectation { .. }
            | EntryKind::MismatchedExpectation { .. }
            | EntryKind::Unexpected { .. } => true,
            EntryKind::Call { exception, .. } => exception.is_some(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_async_begin(&self, job: &str) -> bool {
        matches!(&self.kind, EntryKind::AsyncBegin { name, .. } if name == job)
    }

    #[must_use]
    pub fn is_async_end(&self, job: &str) -> bool {
        matches!(&self.kind, EntryKind::AsyncEnd { name, .. } if name == job)
    }

    #[must_use]
    pub fn is_error_named(&self, error: &str) -> bool {
        matches!(&self.kind, EntryKind::Error { name, .. } if name == error)
    }
}

/// Stable sort into `(timestamp, sequence)` order; equal stamps keep
/// emission order.
pub fn sort_chronologically(entries: &mut [LogEntry]) {
    entries.sort_by_key(LogEntry::stamp);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(name: &str, timestamp: f64, sequence: i64) -> LogEntry {
        LogEntry {
            layer: None,
            timestamp,
            relstamp: timestamp,
            sequence,
            kind: EntryKind::Event {
                name: name.to_string(),
                args: Args::default(),
                test_only_args: Args::default(),
            },
        }
    }

    #[test]
    fn stamp_orders_by_timestamp_then_sequence() {
        assert!(Stamp::new(1.0, 9) < Stamp::new(2.0, 0));
        assert!(Stamp::new(1.0, 1) < Stamp::new(1.0, 2));
        assert_eq!(Stamp::new(1.0, 1), Stamp::new(1.0, 1));
    }

    #[test]
    fn sort_keeps_emission_order_for_identical_stamps() {
        let mut entries = vec![
            event("late", 5.0, 3),
            event("first", 5.0, 1),
            event("second", 5.0, 1),
            event("early", 1.0, 7),
        ];
        sort_chronologically(&mut entries);
        let names: Vec<_> = entries.iter().map(LogEntry::name).collect();
        assert_eq!(names, ["early", "first", "second", "late"]);
    }

    #[test]
    fn unexpected_wrapper_reports_wrapped_name() {
        let inner = event("connect", 1.0, 1);
        let wrapped = LogEntry {
            kind: EntryKind::Unexpected {
                entry: Box::new(inner.clone()),
            },
            ..inner
        };
        assert_eq!(wrapped.name(), "connect");
        assert_eq!(wrapped.tag(), EntryTag::Unexpected);
        assert!(wrapped.is_failure());
    }

    #[test]
    fn args_lookup_by_label() {
        let args = Args(vec![
            LabeledArg {
                label: "host".to_string(),
                value: ArgValue::Value(json!("1.2.3.4")),
            },
            LabeledArg {
                label: "peers".to_string(),
                value: ArgValue::Empty,
            },
        ]);
        assert_eq!(args.value("host"), Some(&json!("1.2.3.4")));
        assert_eq!(args.get("peers"), Some(&ArgValue::Empty));
        assert_eq!(args.value("peers"), None);
        assert_eq!(args.get("port"), None);
    }
}
