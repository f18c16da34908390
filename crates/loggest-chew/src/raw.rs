//! Wire shapes handed over by log producers.
//!
//! These mirror the JSON exactly; validation of `loggerIdent` and entry
//! layouts happens during decoding, not here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChewError, ChewWarning, Result};
use crate::identity::UniqueName;

pub const TEST_CASE_IDENT: &str = "testCase";
pub const TEST_CASE_PERMUTATION_IDENT: &str = "testCasePermutation";

/// Top-level input: schemas plus one test case log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawLoggestBundle {
    pub schema: Map<String, Value>,
    pub file_name: String,
    pub log: RawLoggerNode,
}

/// Any node of the logger tree: test case, permutation, step or logger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawLoggerNode {
    pub logger_ident: String,
    pub unique_name: Option<UniqueName>,
    pub semantic_ident: Value,
    pub born: Option<f64>,
    pub died: Option<f64>,
    /// Named actors and things keyed by unique name, in wire order.
    pub named: Map<String, Value>,
    pub kids: Vec<RawLoggerNode>,
    pub entries: Vec<Value>,
    /// Step-only: explicit outcome (`pass`, `fail`, `skip`).
    pub result: Option<String>,
    pub boring: bool,
    pub group: Option<String>,
}

impl RawLoggerNode {
    /// Parse the `named` block; a missing `uniqueName` falls back to the key.
    pub fn named_things(&self) -> Result<Vec<RawNamedThing>> {
        self.named
            .iter()
            .map(|(key, value)| -> Result<RawNamedThing> {
                let mut named = RawNamedThing::deserialize(value)?;
                if named.unique_name.is_none() {
                    named.unique_name = Some(key.parse().map_err(|_| {
                        ChewError::malformed("named", format!("unique name key {key:?}"))
                    })?);
                }
                Ok(named)
            })
            .collect()
    }
}

/// Declaration of an actor or thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawNamedThing {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub unique_name: Option<UniqueName>,
    pub parent_unique_name: Option<UniqueName>,
    pub logger_unique_name: Option<UniqueName>,
    pub alias: Option<String>,
    pub family: Option<String>,
}

impl RawNamedThing {
    /// Positive unique names are actors and the rest are things; a `type`
    /// saying otherwise is reported and the sign wins.
    #[must_use]
    pub fn kind_mismatch(&self) -> Option<ChewWarning> {
        let unique_name = self.unique_name?;
        let expected = if unique_name > 0 { "actor" } else { "thing" };
        (self.kind != expected).then(|| ChewWarning::DeclaredKindMismatch {
            unique_name,
            declared: self.kind.clone(),
        })
    }
}
