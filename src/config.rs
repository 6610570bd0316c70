//! Run configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use rqg_runner::CheckpointCadence;

use crate::error::RunError;

/// Full configuration for one run. Loadable from YAML; every field has a
/// default so partial files work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Name of the frozen grammar to run.
    pub grammar: String,
    /// Rule to invoke; the grammar's own entry rule when unset.
    pub entry_rule: Option<String>,
    /// Total queries to attempt; unbounded when unset.
    pub count: Option<u64>,
    /// Wall-clock cap in seconds, honored at batch boundaries.
    pub duration_secs: Option<u64>,
    /// Worker thread count; CPU count when unset.
    pub workers: Option<u32>,
    /// Per-worker batch size.
    pub batch: u64,
    /// Master seed; a random seed is drawn and logged when unset.
    pub seed: Option<u64>,
    /// Recursion cap for expansion.
    pub max_depth: usize,
    /// Upper bound on Repeat draws.
    pub repeat_cap: u32,
    pub uniqueness: UniquenessSettings,
    /// Endpoint DSN; generation-only when unset.
    pub dsn: Option<String>,
    pub schema: SchemaSettings,
    pub output: OutputSettings,
    pub checkpoint: CheckpointSettings,
    /// When false, the first SQL error stops the run.
    pub continue_on_error: bool,
    /// Session statement timeout applied by the endpoint.
    pub statement_timeout_ms: Option<u64>,
    /// Metrics snapshot interval.
    pub report_interval_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grammar: String::new(),
            entry_rule: None,
            count: Some(100_000),
            duration_secs: None,
            workers: None,
            batch: 1000,
            seed: None,
            max_depth: 32,
            repeat_cap: 64,
            uniqueness: UniquenessSettings::default(),
            dsn: None,
            schema: SchemaSettings::default(),
            output: OutputSettings::default(),
            checkpoint: CheckpointSettings::default(),
            continue_on_error: true,
            statement_timeout_ms: None,
            report_interval_secs: 1,
        }
    }
}

impl RunConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, RunError> {
        serde_yaml::from_str(yaml).map_err(|e| RunError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self, RunError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Reject configurations that cannot run. Fatal problems here map to
    /// exit code 1.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.grammar.is_empty() {
            return Err(RunError::Config("no grammar named".to_string()));
        }
        if self.batch == 0 {
            return Err(RunError::Config("batch must be at least 1".to_string()));
        }
        if self.workers == Some(0) {
            return Err(RunError::Config("workers must be at least 1".to_string()));
        }
        if self.max_depth == 0 {
            return Err(RunError::Config("max_depth must be at least 1".to_string()));
        }
        if self.uniqueness.mode == UniquenessMode::Probabilistic {
            if !(self.uniqueness.fpr > 0.0 && self.uniqueness.fpr < 0.5) {
                return Err(RunError::Config(format!(
                    "uniqueness.fpr {} outside (0, 0.5)",
                    self.uniqueness.fpr
                )));
            }
            if self.uniqueness.capacity == 0 {
                return Err(RunError::Config(
                    "uniqueness.capacity must be at least 1".to_string(),
                ));
            }
        }
        match self.schema.mode {
            SchemaMode::DdlFile if self.schema.source.is_none() => {
                return Err(RunError::Config(
                    "schema.mode = ddl_file requires schema.source".to_string(),
                ));
            }
            SchemaMode::Introspect if self.schema.source.is_none() && self.dsn.is_none() => {
                return Err(RunError::Config(
                    "schema.mode = introspect requires schema.source or dsn".to_string(),
                ));
            }
            _ => {}
        }
        if self.output.sink == OutputSinkKind::File && self.output.path.is_none() {
            return Err(RunError::Config(
                "output.sink = file requires output.path".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessMode {
    Off,
    Probabilistic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UniquenessSettings {
    pub mode: UniquenessMode,
    /// Target false-positive rate.
    pub fpr: f64,
    /// Expected elements per filter generation.
    pub capacity: u64,
}

impl Default for UniquenessSettings {
    fn default() -> Self {
        Self {
            mode: UniquenessMode::Probabilistic,
            fpr: 0.01,
            capacity: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    None,
    DdlFile,
    Introspect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaSettings {
    pub mode: SchemaMode,
    /// DDL file path (ddl_file) or DSN (introspect; defaults to `dsn`).
    pub source: Option<String>,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            mode: SchemaMode::None,
            source: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSinkKind {
    None,
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    pub sink: OutputSinkKind,
    pub path: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            sink: OutputSinkKind::None,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointSettings {
    /// Checkpoint file; checkpointing is off when unset.
    pub path: Option<PathBuf>,
    pub every: CheckpointCadence,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            path: None,
            every: CheckpointCadence::Queries(100_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_with_grammar() {
        let config = RunConfig {
            grammar: "smoke".to_string(),
            ..RunConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_grammar_is_fatal() {
        assert!(RunConfig::default().validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = r#"
grammar: smoke
count: 5000
workers: 4
seed: 42
uniqueness:
  mode: probabilistic
  fpr: 0.001
  capacity: 100000
schema:
  mode: ddl_file
  source: schema.sql
output:
  sink: file
  path: out.sql
checkpoint:
  path: run.checkpoint
  every:
    queries: 1000
"#;
        let config = RunConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.grammar, "smoke");
        assert_eq!(config.count, Some(5000));
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.uniqueness.fpr, 0.001);
        assert_eq!(config.schema.mode, SchemaMode::DdlFile);
        assert_eq!(config.checkpoint.every, CheckpointCadence::Queries(1000));
        config.validate().unwrap();
    }

    #[test]
    fn test_ddl_file_requires_source() {
        let config = RunConfig {
            grammar: "smoke".to_string(),
            schema: SchemaSettings {
                mode: SchemaMode::DdlFile,
                source: None,
            },
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_fpr_is_fatal() {
        let config = RunConfig {
            grammar: "smoke".to_string(),
            uniqueness: UniquenessSettings {
                mode: UniquenessMode::Probabilistic,
                fpr: 0.9,
                capacity: 100,
            },
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
