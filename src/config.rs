//! TOML configuration.
//!
//! Every section is optional; a file containing only `[inputs]` is valid.
//! Relative paths are resolved against the working directory.

use anyhow::{Context, Result};
use chrono::Datelike;
use key_coverage_core::aggregate::{AggregatorOptions, AttachMode, DEFAULT_POPULARITY_THRESHOLD};
use key_coverage_core::policy::ConfidenceMerge;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// The fixed set of top-level inputs, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InputKind {
    BaseMappings,
    ToolMentions,
    Limitations,
    ResearchFlags,
    Cables,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::BaseMappings => "base_mappings",
            InputKind::ToolMentions => "tool_mentions",
            InputKind::Limitations => "limitations",
            InputKind::ResearchFlags => "research_flags",
            InputKind::Cables => "cables",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InputsConfig {
    pub base_mappings: Option<InputFile>,
    pub tool_mentions: Option<InputFile>,
    pub limitations: Option<InputFile>,
    pub research_flags: Option<InputFile>,
    pub cables: Option<InputFile>,
    pub evidence_dir: Option<EvidenceDirConfig>,
}

impl InputsConfig {
    /// Configured top-level files, in load order.
    pub fn files(&self) -> Vec<(InputKind, &InputFile)> {
        [
            (InputKind::BaseMappings, &self.base_mappings),
            (InputKind::ToolMentions, &self.tool_mentions),
            (InputKind::Limitations, &self.limitations),
            (InputKind::ResearchFlags, &self.research_flags),
            (InputKind::Cables, &self.cables),
        ]
        .into_iter()
        .filter_map(|(kind, file)| file.as_ref().map(|f| (kind, f)))
        .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputFile {
    pub path: PathBuf,
    /// A missing required file aborts the run; a missing optional file is
    /// logged and skipped.
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvidenceDirConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizeConfig {
    /// Last model year an open-ended span expands to.
    #[serde(default = "default_year_horizon")]
    pub year_horizon: u16,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            year_horizon: default_year_horizon(),
        }
    }
}

fn default_year_horizon() -> u16 {
    u16::try_from(chrono::Utc::now().year() + 1).unwrap_or(2100)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    #[serde(default)]
    pub attach_mode: AttachMode,
    #[serde(default = "default_popularity_threshold")]
    pub popularity_threshold: usize,
    #[serde(default)]
    pub confidence_merge: ConfidenceMerge,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            attach_mode: AttachMode::default(),
            popularity_threshold: default_popularity_threshold(),
            confidence_merge: ConfidenceMerge::default(),
        }
    }
}

fn default_popularity_threshold() -> usize {
    DEFAULT_POPULARITY_THRESHOLD
}

impl AggregationConfig {
    pub fn options(&self) -> AggregatorOptions {
        AggregatorOptions {
            attach_mode: self.attach_mode,
            popularity_threshold: self.popularity_threshold,
            confidence_merge: self.confidence_merge,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default = "default_pretty")]
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            pretty: default_pretty(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("dist/coverage.json")
}

fn default_pretty() -> bool {
    true
}

impl Config {
    /// Defaults only, for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.aggregation.popularity_threshold < 1 {
        anyhow::bail!("aggregation.popularity_threshold must be >= 1");
    }

    if !(1950..=2100).contains(&config.normalize.year_horizon) {
        anyhow::bail!(
            "normalize.year_horizon must be in [1950, 2100], got {}",
            config.normalize.year_horizon
        );
    }

    if let Some(dir) = &config.inputs.evidence_dir {
        if dir.include_globs.is_empty() {
            anyhow::bail!("inputs.evidence_dir.include_globs must not be empty");
        }
    }

    if config.output.path.as_os_str().is_empty() {
        anyhow::bail!("output.path must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kcov.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn full_config_parses() {
        let (_tmp, path) = write_config(
            r#"
[inputs]
base_mappings = { path = "data/base.csv", required = true }
tool_mentions = { path = "data/mentions.json" }

[inputs.evidence_dir]
root = "data/evidence"
exclude_globs = ["**/draft/**"]

[normalize]
year_horizon = 2026

[aggregation]
attach_mode = "strict"
popularity_threshold = 5
confidence_merge = "max"

[output]
path = "out/coverage.json"
pretty = false
"#,
        );
        let config = load_config(&path).unwrap();
        let files = config.inputs.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, InputKind::BaseMappings);
        assert!(files[0].1.required);
        assert!(!files[1].1.required);
        let dir = config.inputs.evidence_dir.unwrap();
        assert_eq!(dir.include_globs, vec!["**/*.json".to_string()]);
        assert_eq!(config.normalize.year_horizon, 2026);
        let options = config.aggregation.options();
        assert_eq!(options.attach_mode, AttachMode::Strict);
        assert_eq!(options.popularity_threshold, 5);
        assert_eq!(options.confidence_merge, ConfidenceMerge::Max);
        assert!(!config.output.pretty);
    }

    #[test]
    fn empty_config_takes_defaults() {
        let (_tmp, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert!(config.inputs.files().is_empty());
        assert_eq!(config.aggregation.attach_mode, AttachMode::Broadcast);
        assert_eq!(config.aggregation.popularity_threshold, 3);
        assert_eq!(config.output.path, PathBuf::from("dist/coverage.json"));
        assert!(config.normalize.year_horizon > 2000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let (_tmp, path) = write_config("[aggregation]\npopularity_threshold = 0\n");
        assert!(load_config(&path).is_err());

        let (_tmp, path) = write_config("[normalize]\nyear_horizon = 2300\n");
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("year_horizon"));

        let (_tmp, path) = write_config("[aggregation]\nattach_mode = \"everywhere\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Path::new("/nonexistent/kcov.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
