//! Tunables for the loggest transformer.
//!
//! Every field defaults to the behavior the harness logs are written for, so
//! `ChewConfig::default()` is what callers want unless a log producer uses
//! different step or job names.
//!
//! ```toml
//! # loggest-chew.toml
//! alias_chunk_width = 32
//! alias_slip = 4
//! notable_kinds = ["setupFunc", "actorConstructor"]
//! ```
//!
//! ```rust,ignore
//! let config = ChewConfig::from_toml_file("loggest-chew.toml")?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChewConfig {
    /// Aliases embedded in longer strings must start on a multiple of this
    /// width (plus up to `alias_slip` bytes).
    pub alias_chunk_width: usize,
    pub alias_slip: usize,
    /// Name of the synthetic entry appended for loggers with a `died` stamp.
    pub died_event_name: String,
    /// Sequence given to the died entry of a logger that logged nothing.
    pub died_sentinel_sequence: i64,
    /// Permutation-level call names whose exceptions are surfaced as notable.
    pub notable_kinds: Vec<String>,
    /// `loggerIdent` marking a permutation kid as a test step.
    pub step_logger_ident: String,
    /// Async job bracketing each step.
    pub run_job_name: String,
    /// Error name that closes a step which timed out.
    pub timeout_error_name: String,
}

impl Default for ChewConfig {
    fn default() -> Self {
        Self {
            alias_chunk_width: 32,
            alias_slip: 4,
            died_event_name: "(died)".to_string(),
            died_sentinel_sequence: i64::MAX,
            notable_kinds: vec!["setupFunc".to_string(), "actorConstructor".to_string()],
            step_logger_ident: "testStep".to_string(),
            run_job_name: "run".to_string(),
            timeout_error_name: "timeout".to_string(),
        }
    }
}

impl ChewConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.checked()
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.checked()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.alias_chunk_width == 0 {
            errors.push("alias_chunk_width must be > 0".into());
        }
        if self.alias_slip >= self.alias_chunk_width.max(1) {
            errors.push(format!(
                "alias_slip must be < alias_chunk_width ({}), got {}",
                self.alias_chunk_width, self.alias_slip
            ));
        }
        for (field, value) in [
            ("died_event_name", &self.died_event_name),
            ("step_logger_ident", &self.step_logger_ident),
            ("run_job_name", &self.run_job_name),
            ("timeout_error_name", &self.timeout_error_name),
        ] {
            if value.is_empty() {
                errors.push(format!("{field} must not be empty"));
            }
        }

        errors
    }

    fn checked(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation errors: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(ChewConfig::default().validate().is_empty());
    }

    #[test]
    fn sparse_toml_keeps_defaults() {
        let config = ChewConfig::from_toml_str("step_logger_ident = \"step\"\n").unwrap();
        assert_eq!(config.step_logger_ident, "step");
        assert_eq!(config.alias_chunk_width, 32);
        assert_eq!(config.notable_kinds, ["setupFunc", "actorConstructor"]);
    }

    #[test]
    fn slip_wider_than_chunk_is_rejected() {
        let err = ChewConfig::from_json_str(r#"{"alias_chunk_width": 4, "alias_slip": 4}"#)
            .unwrap_err();
        match err {
            ConfigError::Invalid(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].starts_with("alias_slip"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_names_are_reported_individually() {
        let config = ChewConfig {
            run_job_name: String::new(),
            timeout_error_name: String::new(),
            ..ChewConfig::default()
        };
        assert_eq!(
            config.validate(),
            [
                "run_job_name must not be empty",
                "timeout_error_name must not be empty"
            ]
        );
    }

    #[test]
    fn loads_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "died_event_name = \"(gone)\"").unwrap();
        writeln!(file, "notable_kinds = [\"setupFunc\"]").unwrap();
        let config = ChewConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.died_event_name, "(gone)");
        assert_eq!(config.notable_kinds, ["setupFunc"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChewConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
