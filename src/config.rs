//! TOML configuration.
//!
//! Everything has a default, so an empty file (or no file at all) yields the
//! restrictive out-of-the-box policy: no source-value columns, 1000-row cap,
//! postgres in, databricks out.

use std::path::Path;

use serde::Deserialize;

use crate::error::{QueryError, QueryResult};
use crate::policy::Policy;
use crate::transpiler::Dialect;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub dialect: DialectConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default)]
    pub allow_source_value_columns: bool,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_source_value_columns: false,
            exclude_tables: Vec::new(),
            exclude_columns: Vec::new(),
            row_limit: default_row_limit(),
        }
    }
}

fn default_row_limit() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DialectConfig {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_target")]
    pub target: String,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            target: default_target(),
        }
    }
}

fn default_source() -> String {
    "postgres".to_string()
}

fn default_target() -> String {
    "databricks".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    #[serde(default = "default_cdm")]
    pub cdm: String,
    #[serde(default = "default_vocab")]
    pub vocab: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            cdm: default_cdm(),
            vocab: default_vocab(),
        }
    }
}

fn default_cdm() -> String {
    "cdm".to_string()
}

fn default_vocab() -> String {
    "vocab".to_string()
}

impl Config {
    pub fn load(path: &Path) -> QueryResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            QueryError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> QueryResult<Self> {
        toml::from_str(text).map_err(|err| QueryError::Config(err.to_string()))
    }

    pub fn policy(&self) -> Policy {
        let mut policy = Policy::new(
            self.policy.allow_source_value_columns,
            &self.policy.exclude_tables,
            &self.policy.exclude_columns,
        );
        policy.row_limit = self.policy.row_limit;
        policy
    }

    pub fn source_dialect(&self) -> QueryResult<Dialect> {
        self.dialect
            .source
            .parse()
            .map_err(|err: crate::transpiler::TranspileError| {
                QueryError::Config(err.message)
            })
    }

    pub fn target_dialect(&self) -> QueryResult<Dialect> {
        self.dialect
            .target
            .parse()
            .map_err(|err: crate::transpiler::TranspileError| {
                QueryError::Config(err.message)
            })
    }
}
