#![forbid(unsafe_code)]

//! Loggest log transformer
//!
//! Turns structured loggest test-run logs (compact positional-array records
//! described by per-logger schemas) into a typed, cross-referenced model of a
//! test case: loggers, actors, things, connections and steps, plus a step x
//! logger entry matrix answering "what did each logger do during step N".
//!
//! # Key Components
//!
//! - [`SchemaRegistry`] - Per-logger-type decoder tables and the schema soup
//! - [`IdentityArena`] - Unique-name resolution with speculative placeholders
//! - [`LoggerForestBuilder`] - Two-pass logger tree construction
//! - [`EntryMatrix`] - Partition of each logger's entries by step
//! - [`LoggestChewer`] - Case and permutation assembly
//! - [`AnalysisPass`] - Extension point for per-step summaries
//!
//! # Example
//!
//! ```
//! use loggest_chew::{ChewConfig, chew_json};
//!
//! let input = r#"{
//!     "schema": {"app": {"events": {"tick": {"n": "num"}}}},
//!     "fileName": "test_tick.json",
//!     "log": {
//!         "loggerIdent": "testCase",
//!         "semanticIdent": "test_tick",
//!         "kids": [{
//!             "loggerIdent": "testCasePermutation",
//!             "born": 0,
//!             "kids": [
//!                 {"loggerIdent": "testStep", "entries": [["run_begin", 10, 1], ["run_end", 20, 3]]},
//!                 {"loggerIdent": "app", "uniqueName": 1, "entries": [["tick", 1, 15, 2]]}
//!             ]
//!         }]
//!     }
//! }"#;
//! let bundle = chew_json(input, &ChewConfig::default()).unwrap();
//! let perm = &bundle.permutations[0];
//! assert_eq!(perm.matrix.row_count(), 3);
//! assert_eq!(perm.cell_entries(1, 0).map(<[_]>::len), Some(1));
//! ```

pub mod analysis;
pub mod bundle;
pub mod chew;
pub mod config;
pub mod decode;
pub mod entry;
pub mod error;
pub mod identity;
pub mod logger;
pub mod matrix;
pub mod raw;
pub mod schema;

pub use analysis::{AnalysisPass, AsyncJobSummary};
pub use bundle::{StepResult, TestCaseLogBundle, TestCasePermutationLogBundle, TestCaseStepMeta};
pub use chew::{LoggestChewer, chew_json};
pub use config::{ChewConfig, ConfigError};
pub use entry::{ArgValue, Args, EntryKind, EntryTag, LogEntry, Stamp};
pub use error::{ChewError, ChewWarning, Result};
pub use identity::{ActorId, EntityRef, IdentToken, IdentityArena, LoggerId, SemanticIdent, ThingId};
pub use logger::{LoggerForestBuilder, LoggerMeta};
pub use matrix::{EntryMatrix, StepSpan};
pub use raw::{RawLoggerNode, RawLoggestBundle, RawNamedThing};
pub use schema::SchemaRegistry;
