use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    JsoncParseError { path: String, message: String },
    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: String,
        source: serde_json::Error,
    },
}

/// Configuration file for pyty, the type-analysis server.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(rename = "pyty configuration")]
pub struct Config {
    /// URL to the pyty config schema for self-validation.
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    #[schemars(rename = "$schema")]
    pub schema_url: Option<String>,

    /// Glob patterns for source discovery. Patterns prefixed with `!` are
    /// excludes. Order matters: later patterns override earlier ones.
    #[serde(default = "default_files")]
    pub files: Vec<String>,

    /// Root of the analyzed source tree, relative to the config file.
    /// Defaults to the config file's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,

    /// Recheck batches larger than this run on the worker pool.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Number of worker threads (1..=256).
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Shared-heap budget; the compaction gate fires above half of it.
    #[serde(default = "default_heap_capacity_bytes")]
    pub heap_capacity_bytes: usize,
}

fn default_files() -> Vec<String> {
    vec!["**/*.py".into(), "**/*.pyi".into()]
}

fn default_parallel_threshold() -> usize {
    5
}

fn default_jobs() -> usize {
    10
}

fn default_heap_capacity_bytes() -> usize {
    256 * 1024 * 1024
}

impl Config {
    pub fn default_config() -> Config {
        Config {
            schema_url: None,
            files: default_files(),
            source_root: None,
            parallel_threshold: default_parallel_threshold(),
            jobs: default_jobs(),
            heap_capacity_bytes: default_heap_capacity_bytes(),
        }
    }

    /// Load a config file. The format is JSONC: comments and trailing
    /// commas are allowed.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadError { path: display.clone(), source })?;
        let options = jsonc_parser::ParseOptions {
            allow_comments: true,
            allow_trailing_commas: true,
            ..Default::default()
        };
        let value = jsonc_parser::parse_to_serde_value(&text, &options)
            .map_err(|e| ConfigError::JsoncParseError { path: display.clone(), message: e.to_string() })?
            .unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value)
            .map_err(|source| ConfigError::ParseError { path: display, source })
    }
}

/// Find the nearest `pyty.json` by walking up the directory tree.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = if start.is_dir() { Some(start) } else { start.parent() };
    while let Some(dir) = current {
        let candidate = dir.join("pyty.json");
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

/// Resolved runtime configuration handed to every service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub source_root: PathBuf,
    pub files: Vec<String>,
    pub parallel_threshold: usize,
    pub jobs: usize,
    pub heap_capacity_bytes: usize,
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn resolve(config: &Config, config_dir: &Path, log_file: Option<PathBuf>) -> ServerConfig {
        let source_root = match &config.source_root {
            Some(root) => {
                let path = Path::new(root);
                if path.is_absolute() { path.to_path_buf() } else { config_dir.join(path) }
            }
            None => config_dir.to_path_buf(),
        };
        ServerConfig {
            source_root: std::fs::canonicalize(&source_root).unwrap_or(source_root),
            files: config.files.clone(),
            parallel_threshold: config.parallel_threshold.max(1),
            jobs: config.jobs.clamp(1, 256),
            heap_capacity_bytes: config.heap_capacity_bytes.max(1),
            log_file,
        }
    }

    /// Defaults rooted at `root`; the shape tests and one-shot mode use.
    pub fn for_root(root: impl Into<PathBuf>) -> ServerConfig {
        let root = root.into();
        ServerConfig {
            source_root: std::fs::canonicalize(&root).unwrap_or(root),
            files: default_files(),
            parallel_threshold: default_parallel_threshold(),
            jobs: 4,
            heap_capacity_bytes: default_heap_capacity_bytes(),
            log_file: None,
        }
    }
}

/// Default server log location, fed into rage reports.
pub fn default_log_file() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join("pyty").join("server.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_accepts_comments_and_trailing_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyty.json");
        std::fs::write(
            &path,
            "{\n  // analysis settings\n  \"parallel_threshold\": 2,\n  \"jobs\": 3,\n}\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.parallel_threshold, 2);
        assert_eq!(config.jobs, 3);
        assert_eq!(config.files, default_files());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyty.json");
        std::fs::write(&path, "{\"no_such_field\": true}").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn find_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyty.json"), "{}").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("pyty.json"));
    }

    #[test]
    fn resolve_roots_relative_source_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let mut config = Config::default_config();
        config.source_root = Some("src".into());
        let resolved = ServerConfig::resolve(&config, dir.path(), None);
        assert!(resolved.source_root.ends_with("src"));
    }
}
