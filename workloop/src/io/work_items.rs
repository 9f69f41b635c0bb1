//! Work item sources.
//!
//! The [`WorkItemSource`] trait decouples the loop from where work items live.
//! This crate ships the file-backed source: a directory of markdown documents,
//! each with a header block (`id`, `title`, `status`, `priority?`, `created`,
//! `updated?`) followed by a free-text body holding the checklist.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::types::{ItemStatus, Priority, WorkItem};
use crate::error::{ConfigurationError, MalformedWorkItemError};
use crate::io::config::{SourceKind, StatusLabels, WorkloopConfig};
use crate::io::frontmatter::{render_frontmatter, split_frontmatter, upsert_field};
use crate::io::paths::WorkloopPaths;

/// Abstraction over work item stores.
pub trait WorkItemSource {
    /// All well-formed items. Malformed items are skipped, never fatal.
    fn list_items(&self) -> Result<Vec<WorkItem>>;

    /// Current state of one item, read fresh from the store.
    fn fetch(&self, id: &str) -> Result<Option<WorkItem>>;

    /// Advance an item's status. Regressions are rejected.
    fn set_status(&self, id: &str, status: ItemStatus) -> Result<()>;
}

/// Result of scanning a directory: parsed items plus rejected documents.
#[derive(Debug, Default)]
pub struct Scan {
    pub items: Vec<WorkItem>,
    pub rejected: Vec<MalformedWorkItemError>,
}

/// Source backed by `*.md` files in one directory.
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
    labels: StatusLabels,
}

#[derive(Debug, Deserialize)]
struct Header {
    id: String,
    title: String,
    status: String,
    #[serde(default)]
    priority: Option<String>,
    created: String,
    #[serde(default)]
    updated: Option<String>,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>, labels: StatusLabels) -> Self {
        Self {
            dir: dir.into(),
            labels,
        }
    }

    /// Parse every document in the directory, in file name order.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn scan(&self) -> Result<Scan> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("read work item dir {}", self.dir.display()))?
        {
            let path = entry.context("read dir entry")?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut scan = Scan::default();
        for path in paths {
            match self.read_item(&path) {
                Ok(item) => {
                    if scan.items.iter().any(|existing| existing.id == item.id) {
                        let rejected = MalformedWorkItemError {
                            path: path.clone(),
                            reason: format!("duplicate id '{}'", item.id),
                        };
                        warn!(err = %rejected, "skipping work item");
                        scan.rejected.push(rejected);
                        continue;
                    }
                    scan.items.push(item);
                }
                Err(rejected) => {
                    warn!(err = %rejected, "skipping work item");
                    scan.rejected.push(rejected);
                }
            }
        }
        debug!(
            items = scan.items.len(),
            rejected = scan.rejected.len(),
            "scanned work items"
        );
        Ok(scan)
    }

    fn read_item(&self, path: &Path) -> std::result::Result<WorkItem, MalformedWorkItemError> {
        let malformed = |reason: String| MalformedWorkItemError {
            path: path.to_path_buf(),
            reason,
        };
        let contents = fs::read_to_string(path).map_err(|err| malformed(err.to_string()))?;
        parse_work_item(&contents, path, &self.labels).map_err(|err| malformed(format!("{err:#}")))
    }

    fn path_for(&self, id: &str) -> Result<Option<PathBuf>> {
        let scan = self.scan()?;
        Ok(scan
            .items
            .into_iter()
            .find(|item| item.id == id)
            .map(|item| PathBuf::from(item.source_ref)))
    }
}

impl WorkItemSource for FileSource {
    fn list_items(&self) -> Result<Vec<WorkItem>> {
        Ok(self.scan()?.items)
    }

    fn fetch(&self, id: &str) -> Result<Option<WorkItem>> {
        Ok(self.scan()?.items.into_iter().find(|item| item.id == id))
    }

    #[instrument(skip_all, fields(item_id = id, status = status.as_str()))]
    fn set_status(&self, id: &str, status: ItemStatus) -> Result<()> {
        let path = self
            .path_for(id)?
            .ok_or_else(|| anyhow!("work item '{id}' not found in {}", self.dir.display()))?;
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let current = parse_work_item(&contents, &path, &self.labels)?;
        if current.status == status {
            return Ok(());
        }
        if !current.status.can_advance_to(status) {
            return Err(anyhow!(
                "refuse to move work item '{id}' from {} back to {}",
                current.status.as_str(),
                status.as_str()
            ));
        }
        let (header, body) = split_frontmatter(&contents)
            .ok_or_else(|| anyhow!("missing header block in {}", path.display()))?;
        let header = upsert_field(header, "status", self.labels.label(status));
        let header = upsert_field(&header, "updated", &Utc::now().to_rfc3339());
        fs::write(&path, render_frontmatter(&header, body))
            .with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "status updated");
        Ok(())
    }
}

/// Parse one work item document.
pub fn parse_work_item(contents: &str, path: &Path, labels: &StatusLabels) -> Result<WorkItem> {
    let (header_raw, body) =
        split_frontmatter(contents).ok_or_else(|| anyhow!("missing header block"))?;
    let header: Header = serde_yaml::from_str(header_raw).context("parse header block")?;

    let id = header.id.trim().to_string();
    validate_id(&id)?;
    let title = header.title.trim().to_string();
    if title.is_empty() {
        return Err(anyhow!("title must not be empty"));
    }
    let status = labels
        .parse(&header.status)
        .ok_or_else(|| anyhow!("unknown status '{}'", header.status))?;
    let priority = match header.priority.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(label) => {
            Some(Priority::parse(label).ok_or_else(|| anyhow!("unknown priority '{label}'"))?)
        }
    };
    let created_at = parse_timestamp(&header.created).context("parse created")?;
    let updated_at = match header.updated.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_timestamp(raw).context("parse updated")?,
        _ => created_at,
    };

    Ok(WorkItem {
        id,
        title,
        status,
        priority,
        created_at,
        updated_at,
        content: body.trim_start_matches(['\r', '\n']).to_string(),
        source_ref: path.display().to_string(),
    })
}

/// Validate that an id is safe for use in `<prefix><id>` branch names.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("id must not be empty"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}

/// Accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("expected RFC 3339 timestamp or YYYY-MM-DD, got '{raw}'"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("invalid date '{raw}'"))
}

/// Decide which source to use.
///
/// An explicit `source.kind` wins. Otherwise a configured board and an existing
/// files directory conflict; whichever one is present is used.
pub fn resolve_source_kind(config: &WorkloopConfig, paths: &WorkloopPaths) -> Result<SourceKind> {
    let dir = paths.resolve(&config.files.dir);
    match (config.source.kind, config.board.is_some(), dir.is_dir()) {
        (Some(kind), _, _) => Ok(kind),
        (None, true, true) => Err(ConfigurationError::ConflictingSources { dir }.into()),
        (None, true, false) => Ok(SourceKind::Board),
        (None, false, true) => Ok(SourceKind::Files),
        (None, false, false) => Err(ConfigurationError::NoSource { dir }.into()),
    }
}

/// Build the configured source.
pub fn build_source(
    config: &WorkloopConfig,
    paths: &WorkloopPaths,
) -> Result<Box<dyn WorkItemSource>> {
    match resolve_source_kind(config, paths)? {
        SourceKind::Files => {
            let dir = paths.resolve(&config.files.dir);
            if !dir.is_dir() {
                return Err(ConfigurationError::MissingFilesDir { dir }.into());
            }
            Ok(Box::new(FileSource::new(dir, config.statuses.clone())))
        }
        SourceKind::Board => {
            let id = config
                .board
                .as_ref()
                .map(|board| board.id.clone())
                .unwrap_or_default();
            Err(ConfigurationError::BoardUnavailable { id }.into())
        }
    }
}
