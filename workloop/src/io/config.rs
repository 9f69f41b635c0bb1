//! Workloop configuration stored under `.workloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::ranking::{DEFAULT_HIGH_RISK_KEYWORDS, DEFAULT_LOW_RISK_KEYWORDS, RiskPolicy};
use crate::core::types::ItemStatus;
use crate::error::ConfigurationError;

/// Workloop configuration (TOML).
///
/// Intended to be edited by humans. Every field has a default, so a partial
/// (or missing) file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkloopConfig {
    /// Iterations a single `run`/`afk` invocation may spend, across chained items.
    pub max_iterations: u32,
    pub source: SourceConfig,
    pub files: FilesConfig,
    /// Remote board settings. Presence alone makes `board` a candidate source.
    pub board: Option<BoardConfig>,
    pub agent: AgentConfig,
    pub ranking: RankingConfig,
    pub statuses: StatusLabels,
    pub vcs: VcsConfig,
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Files,
    Board,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    /// Explicit source choice. When unset the source is inferred.
    pub kind: Option<SourceKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilesConfig {
    /// Directory of work item documents, relative to the working directory.
    pub dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".workloop/specs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardConfig {
    /// Remote board or database identifier.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command; the instruction payload is written to its stdin.
    pub command: Vec<String>,
    /// Hard cutoff for one agent invocation.
    pub timeout_secs: u64,
    /// Bytes of stdout/stderr kept in memory per invocation.
    pub output_limit_bytes: usize,
    /// Mirror agent stdout to the terminal while it runs.
    pub echo_output: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            echo_output: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RankingConfig {
    pub high_risk_keywords: Vec<String>,
    pub low_risk_keywords: Vec<String>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            high_risk_keywords: to_strings(DEFAULT_HIGH_RISK_KEYWORDS),
            low_risk_keywords: to_strings(DEFAULT_LOW_RISK_KEYWORDS),
        }
    }
}

impl RankingConfig {
    pub fn policy(&self) -> RiskPolicy {
        RiskPolicy::new(&self.high_risk_keywords, &self.low_risk_keywords)
    }
}

/// Labels written to and accepted from work item headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusLabels {
    pub todo: String,
    pub in_progress: String,
    pub done: String,
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            todo: ItemStatus::Todo.as_str().to_string(),
            in_progress: ItemStatus::InProgress.as_str().to_string(),
            done: ItemStatus::Done.as_str().to_string(),
        }
    }
}

impl StatusLabels {
    pub fn label(&self, status: ItemStatus) -> &str {
        match status {
            ItemStatus::Todo => &self.todo,
            ItemStatus::InProgress => &self.in_progress,
            ItemStatus::Done => &self.done,
        }
    }

    /// Map a header label to a status. Configured labels and canonical names are
    /// both accepted, case-insensitively.
    pub fn parse(&self, label: &str) -> Option<ItemStatus> {
        let label = label.trim();
        [ItemStatus::Todo, ItemStatus::InProgress, ItemStatus::Done]
            .into_iter()
            .find(|status| {
                label.eq_ignore_ascii_case(self.label(*status))
                    || label.eq_ignore_ascii_case(status.as_str())
            })
            .or_else(|| label.eq_ignore_ascii_case("in_progress").then_some(ItemStatus::InProgress))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VcsConfig {
    pub enabled: bool,
    /// Branch name is `<branch_prefix><item-id>`.
    pub branch_prefix: String,
    pub open_pull_request: bool,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            branch_prefix: "workloop/".to_string(),
            open_pull_request: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgressConfig {
    /// Copy the progress log to `.workloop/archive/` before deleting it on completion.
    pub archive: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { archive: true }
    }
}

impl Default for WorkloopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            source: SourceConfig::default(),
            files: FilesConfig::default(),
            board: None,
            agent: AgentConfig::default(),
            ranking: RankingConfig::default(),
            statuses: StatusLabels::default(),
            vcs: VcsConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

/// Command-line overrides. `None` keeps the configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub source: Option<SourceKind>,
    pub specs_dir: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub agent_timeout_secs: Option<u64>,
}

impl WorkloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return invalid("max_iterations must be > 0");
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return invalid("agent.command must be a non-empty array");
        }
        if self.agent.timeout_secs == 0 {
            return invalid("agent.timeout_secs must be > 0");
        }
        if self.agent.output_limit_bytes == 0 {
            return invalid("agent.output_limit_bytes must be > 0");
        }
        let labels = [
            &self.statuses.todo,
            &self.statuses.in_progress,
            &self.statuses.done,
        ];
        if labels.iter().any(|l| l.trim().is_empty()) {
            return invalid("statuses labels must be non-empty");
        }
        if labels[0].eq_ignore_ascii_case(labels[1])
            || labels[0].eq_ignore_ascii_case(labels[2])
            || labels[1].eq_ignore_ascii_case(labels[2])
        {
            return invalid("statuses labels must be distinct");
        }
        if matches!(&self.board, Some(board) if board.id.trim().is_empty()) {
            return invalid("board.id must be non-empty");
        }
        Ok(())
    }

    /// Apply overrides. Every field is either taken from `overrides` or kept.
    pub fn merge(mut self, overrides: &ConfigOverrides) -> WorkloopConfig {
        if let Some(kind) = overrides.source {
            self.source.kind = Some(kind);
        }
        if let Some(dir) = &overrides.specs_dir {
            self.files.dir = dir.clone();
        }
        if let Some(max_iterations) = overrides.max_iterations {
            self.max_iterations = max_iterations;
        }
        if let Some(timeout_secs) = overrides.agent_timeout_secs {
            self.agent.timeout_secs = timeout_secs;
        }
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkloopConfig> {
    if !path.exists() {
        return Ok(WorkloopConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkloopConfig = toml::from_str(&contents)
        .map_err(|err| ConfigurationError::Invalid(format!("parse {}: {err}", path.display())))?;
    Ok(cfg)
}

/// Load config, apply overrides and validate the result.
pub fn load_merged_config(path: &Path, overrides: &ConfigOverrides) -> Result<WorkloopConfig> {
    let cfg = load_config(path)?.merge(overrides);
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

fn invalid(msg: &str) -> Result<()> {
    Err(ConfigurationError::Invalid(msg.to_string()).into())
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WorkloopConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = WorkloopConfig {
            board: Some(BoardConfig {
                id: "board-1".to_string(),
            }),
            ..WorkloopConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_iterations = 3\n\n[agent]\ntimeout_secs = 60\n\n[statuses]\ndone = \"shipped\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.agent.timeout_secs, 60);
        assert_eq!(cfg.agent.command, AgentConfig::default().command);
        assert_eq!(cfg.statuses.done, "shipped");
        assert_eq!(cfg.statuses.todo, "todo");
        assert_eq!(cfg.files, FilesConfig::default());
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = \"many\"\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.downcast_ref::<ConfigurationError>().is_some());
    }

    #[test]
    fn merge_applies_only_present_overrides() {
        let base = WorkloopConfig::default();
        let merged = base.clone().merge(&ConfigOverrides::default());
        assert_eq!(merged, base);

        let merged = base.merge(&ConfigOverrides {
            source: Some(SourceKind::Files),
            specs_dir: Some(PathBuf::from("tickets")),
            max_iterations: Some(2),
            agent_timeout_secs: None,
        });
        assert_eq!(merged.source.kind, Some(SourceKind::Files));
        assert_eq!(merged.files.dir, PathBuf::from("tickets"));
        assert_eq!(merged.max_iterations, 2);
        assert_eq!(merged.agent.timeout_secs, 30 * 60);
    }

    #[test]
    fn validate_rejects_zero_budget_and_duplicate_labels() {
        let cfg = WorkloopConfig {
            max_iterations: 0,
            ..WorkloopConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = WorkloopConfig::default();
        cfg.statuses.done = "TODO".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn status_labels_accept_custom_and_canonical_names() {
        let labels = StatusLabels {
            todo: "Backlog".to_string(),
            in_progress: "Doing".to_string(),
            done: "Shipped".to_string(),
        };
        assert_eq!(labels.parse("backlog"), Some(ItemStatus::Todo));
        assert_eq!(labels.parse("DOING"), Some(ItemStatus::InProgress));
        assert_eq!(labels.parse("in-progress"), Some(ItemStatus::InProgress));
        assert_eq!(labels.parse("in_progress"), Some(ItemStatus::InProgress));
        assert_eq!(labels.parse("done"), Some(ItemStatus::Done));
        assert_eq!(labels.parse("blocked"), None);
    }
}
