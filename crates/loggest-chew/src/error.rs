use serde::Serialize;
use thiserror::Error;

use crate::identity::UniqueName;

pub type Result<T> = std::result::Result<T, ChewError>;

/// Fatal decode failures.
///
/// Every variant means the input was not produced by a compatible harness;
/// the test case being decoded is abandoned and no partial bundle escapes.
#[derive(Debug, Error)]
pub enum ChewError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no schema registered for logger type {name:?}")]
    UnknownSchema { name: String },

    #[error("schema {schema:?} has no entry kind {kind:?}")]
    UnknownEntryKind { schema: String, kind: String },

    #[error("record {kind:?} too short: expected at least {expected} slots, got {actual}")]
    RecordTooShort {
        kind: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed record {kind:?}: {message}")]
    MalformedRecord { kind: String, message: String },

    #[error("expected loggerIdent {expected:?}, found {actual:?}")]
    WrongLoggerIdent { expected: String, actual: String },

    #[error("step {step} must open with a run begin entry, found {found:?}")]
    StepNotStartedByRun { step: usize, found: String },

    #[error("invalid schema {schema:?}: {message}")]
    InvalidSchema { schema: String, message: String },
}

impl ChewError {
    /// True for failures caused by the shape of otherwise well-formed JSON.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Json(_))
    }

    #[must_use]
    pub fn malformed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn wrong_ident(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::WrongLoggerIdent {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Recoverable anomalies.
///
/// The affected entity or link is left unresolved, the anomaly is logged at
/// `warn` level and recorded on the permutation bundle, and decoding carries
/// on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ChewWarning {
    #[error("actor {actor} names unknown parent {parent}")]
    UnresolvedActorParent {
        actor: UniqueName,
        parent: UniqueName,
    },

    #[error("actor {actor} names parent {parent}, which is not an actor")]
    ActorParentNotActor {
        actor: UniqueName,
        parent: UniqueName,
    },

    #[error("actor {actor} names logger {logger}, which is not a logger")]
    UnresolvedActorLogger {
        actor: UniqueName,
        logger: UniqueName,
    },

    #[error("connection {connection:?} of {} has no other side", logger_label(.logger))]
    UnresolvedConnection {
        logger: Option<UniqueName>,
        connection: String,
    },

    #[error("unique name {unique_name} is declared as {declared:?}, which its sign contradicts")]
    DeclaredKindMismatch {
        unique_name: UniqueName,
        declared: String,
    },

    #[error("unique name {unique_name} was referenced but never declared")]
    UnfilledPlaceholder { unique_name: UniqueName },

    #[error("expectation names {name:?}, which no schema defines")]
    UnknownExpectation { name: String },
}

fn logger_label(logger: &Option<UniqueName>) -> String {
    logger.map_or_else(|| "unnamed logger".to_string(), |name| format!("logger {name}"))
}

impl ChewWarning {
    /// Emit the warning through `tracing` and hand it back for recording.
    #[must_use]
    pub fn report(self) -> Self {
        tracing::warn!(warning = %self, "loggest anomaly");
        self
    }
}
