//! Tracer configuration
//!
//! Supplied once at startup and immutable afterwards. Two sources are supported:
//! a compact `key=value;key=value` argument string (the form a host loader passes
//! to an attached agent) and a TOML file.
//!
//! ```
//! use rastreo::config::TracerConfig;
//!
//! let config = TracerConfig::parse_agent_args("outputDir=/tmp/traces;maxDepth=8").unwrap();
//! assert_eq!(config.max_depth, 8);
//! assert!(config.filter().should_trace("shop.OrderService"));
//! ```

use crate::filter::{NameFilter, DEFAULT_EXCLUDES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while building a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("max-depth must be at least 1")]
    ZeroDepth,
}

/// Runtime configuration for the instrumenter, recorder and artifact writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TracerConfig {
    /// Root directory for per-trace artifact directories
    pub output_dir: PathBuf,
    /// Name prefixes to instrument (empty = everything not excluded)
    pub include_prefixes: Vec<String>,
    /// Name prefixes never instrumented; always contains the defaults
    pub exclude_prefixes: Vec<String>,
    /// Maximum open call-stack depth per thread
    pub max_depth: usize,
    /// Mirror the source text of involved types into the artifact directory
    pub save_sources: bool,
    /// Write the sequence diagram artifact
    pub generate_diagram: bool,
    /// Roots probed by the filesystem source locator
    pub source_roots: Vec<PathBuf>,
    /// File extension appended to a type's namespace path when locating its source
    pub source_extension: String,
    /// Capacity of the background artifact queue
    pub queue_capacity: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./trace-output"),
            include_prefixes: Vec::new(),
            exclude_prefixes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            max_depth: 50,
            save_sources: true,
            generate_diagram: true,
            source_roots: vec![PathBuf::from("src"), PathBuf::from(".")],
            source_extension: "rs".to_string(),
            queue_capacity: 1024,
        }
    }
}

impl TracerConfig {
    /// Parse `outputDir=/tmp/trace;includePrefixes=shop.,billing.;maxDepth=20`
    ///
    /// Unknown keys and pairs without `=` are ignored with a warning. User excludes
    /// are added to the default excludes, never replacing them.
    pub fn parse_agent_args(args: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for pair in args.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                tracing::warn!(pair, "ignoring malformed agent argument");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "outputDir" => config.output_dir = PathBuf::from(value),
                "includePrefixes" => config
                    .include_prefixes
                    .extend(NameFilter::parse_prefix_list(value)),
                "excludePrefixes" => config
                    .exclude_prefixes
                    .extend(NameFilter::parse_prefix_list(value)),
                "maxDepth" => config.max_depth = parse_value(key, value)?,
                "saveSources" => config.save_sources = parse_value(key, value)?,
                "generateDiagram" => config.generate_diagram = parse_value(key, value)?,
                "sourceRoots" => {
                    config.source_roots = NameFilter::parse_prefix_list(value)
                        .into_iter()
                        .map(PathBuf::from)
                        .collect()
                }
                "sourceExtension" => config.source_extension = value.to_string(),
                "queueCapacity" => config.queue_capacity = parse_value(key, value)?,
                _ => tracing::warn!(key, "ignoring unknown agent argument"),
            }
        }

        config.validate()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        for default in DEFAULT_EXCLUDES {
            if !config.exclude_prefixes.iter().any(|p| p == default) {
                config.exclude_prefixes.push(default.to_string());
            }
        }
        config.validate()
    }

    /// Load a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// The namespace filter described by the include/exclude lists
    pub fn filter(&self) -> NameFilter {
        NameFilter::new(
            self.include_prefixes.iter().map(String::as_str),
            self.exclude_prefixes.iter().map(String::as_str),
        )
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queueCapacity".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(self)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
