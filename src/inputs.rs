//! Input loaders.
//!
//! Turns the configured CSV and JSON files into a flat [`Evidence`] stream
//! plus seeded research flags. Failures are isolated:
//!
//! - a required file that is missing aborts the run,
//! - a file with the wrong top-level shape is skipped as a whole,
//! - a record that fails to deserialize or to normalize is skipped alone.
//!
//! Every outcome is counted in [`InputStats`].

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use key_coverage_core::export::InputStats;
use key_coverage_core::models::{
    CableEvidence, Confidence, Evidence, EvidenceContext, FccEvidence, LimitationCategory,
    LimitationEvidence, ResearchFlag, ToolMentionEvidence,
};
use key_coverage_core::normalize::{
    normalize_make, normalize_model, normalize_tool, parse_year_span, resolve_identity, YearSpan,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, EvidenceDirConfig, InputKind};
use crate::error::ReconcileError;
use crate::progress::{RunProgressEvent, RunProgressReporter};

/// Columns the base mapping CSV must carry.
pub const BASE_COLUMNS: [&str; 9] = [
    "make",
    "model",
    "years",
    "chip",
    "fcc_id",
    "tool",
    "confidence",
    "notes",
    "source",
];

/// Everything read from one input file.
#[derive(Debug, Default)]
pub struct FileLoad {
    pub evidence: Vec<Evidence>,
    pub flags: Vec<ResearchFlag>,
    pub loaded: usize,
    pub skipped: usize,
}

/// Everything read from all configured inputs.
#[derive(Debug, Default)]
pub struct LoadedInputs {
    pub evidence: Vec<Evidence>,
    pub seed_flags: Vec<ResearchFlag>,
    pub stats: InputStats,
    /// File-level failures. Record-level skips are only counted.
    pub errors: Vec<ReconcileError>,
}

impl LoadedInputs {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn absorb(&mut self, path: &Path, result: Result<FileLoad, ReconcileError>) {
        match result {
            Ok(load) => {
                info!(
                    file = %path.display(),
                    loaded = load.loaded,
                    skipped = load.skipped,
                    "input loaded"
                );
                self.stats.files_processed += 1;
                self.stats.records_loaded += load.loaded;
                self.stats.records_skipped += load.skipped;
                self.stats.seed_flags += load.flags.len();
                self.evidence.extend(load.evidence);
                self.seed_flags.extend(load.flags);
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "input file skipped");
                self.fail(err);
            }
        }
    }

    fn fail(&mut self, err: ReconcileError) {
        self.stats.files_failed += 1;
        self.errors.push(err);
    }
}

/// Load every configured input.
///
/// Returns `Err` only for a missing required input or an invalid evidence
/// directory glob; everything else is isolated and counted.
pub fn load_inputs(config: &Config, progress: &dyn RunProgressReporter) -> Result<LoadedInputs> {
    let horizon = config.normalize.year_horizon;
    let mut loaded = LoadedInputs::default();

    for (kind, input) in config.inputs.files() {
        if !input.path.exists() {
            if input.required {
                return Err(ReconcileError::MissingInputFile {
                    name: kind.to_string(),
                    path: input.path.clone(),
                }
                .into());
            }
            warn!(input = %kind, path = %input.path.display(), "optional input missing; skipped");
            continue;
        }
        progress.report(RunProgressEvent::Loading {
            input: kind.to_string(),
            path: input.path.display().to_string(),
        });
        let result = match kind {
            InputKind::BaseMappings => load_base_mappings(&input.path, horizon),
            InputKind::ToolMentions => load_tool_mentions(&input.path, horizon),
            InputKind::Limitations => load_limitations(&input.path, horizon),
            InputKind::ResearchFlags => load_research_flags(&input.path),
            InputKind::Cables => load_cables(&input.path, horizon),
        };
        loaded.absorb(&input.path, result);
    }

    if let Some(dir) = &config.inputs.evidence_dir {
        if dir.root.exists() {
            let discovered = discover_evidence_files(dir)?;
            for err in discovered.errors {
                loaded.fail(err);
            }
            for path in discovered.files {
                progress.report(RunProgressEvent::Loading {
                    input: "evidence".to_string(),
                    path: path.display().to_string(),
                });
                let result = load_tagged_evidence(&path, horizon);
                loaded.absorb(&path, result);
            }
        } else {
            warn!(root = %dir.root.display(), "evidence directory missing; skipped");
        }
    }

    Ok(loaded)
}

/// Result of walking the evidence directory.
#[derive(Debug, Default)]
pub struct EvidenceFiles {
    /// Matching files, sorted.
    pub files: Vec<PathBuf>,
    /// Entries the walk could not read (permissions, dangling links, loops).
    pub errors: Vec<ReconcileError>,
}

/// Walk the evidence directory and return matching files in sorted order.
///
/// Only an invalid glob is an `Err`; unreadable entries are logged and
/// returned in [`EvidenceFiles::errors`].
pub fn discover_evidence_files(dir: &EvidenceDirConfig) -> Result<EvidenceFiles> {
    let root = &dir.root;
    if !root.exists() {
        bail!("Evidence directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&dir.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
    default_excludes.extend(dir.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut found = EvidenceFiles::default();
    for entry in WalkDir::new(root).follow_links(dir.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root.as_path()).display().to_string();
                warn!(path = %path, error = %err, "evidence entry unreadable; skipped");
                found.errors.push(ReconcileError::schema(&path, format!("unreadable: {}", err)));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        found.files.push(path.to_path_buf());
    }

    found.files.sort();
    Ok(found)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// A year field as extractors write it: `2019` or `"2018-2022"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum YearsField {
    Year(u16),
    Text(String),
}

impl YearsField {
    fn span(&self) -> Option<YearSpan> {
        match self {
            YearsField::Year(year) => Some(YearSpan {
                start: *year,
                end: Some(*year),
            }),
            YearsField::Text(text) => parse_year_span(text),
        }
    }
}

impl fmt::Display for YearsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearsField::Year(year) => write!(f, "{}", year),
            YearsField::Text(text) => write!(f, "'{}'", text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BaseRow {
    make: String,
    model: Option<String>,
    years: String,
    chip: Option<String>,
    fcc_id: Option<String>,
    tool: Option<String>,
    confidence: Option<String>,
    notes: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MentionRecord {
    make: Option<String>,
    model: Option<String>,
    years: YearsField,
    tool: Option<String>,
    confidence: Option<String>,
    caveat: Option<String>,
    source_file: Option<String>,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct LimitationRow {
    make: String,
    model: Option<String>,
    years: YearsField,
    tool: Option<String>,
    category: Option<String>,
    source_file: Option<String>,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct CableRow {
    make: Option<String>,
    model: Option<String>,
    years: YearsField,
    tool: Option<String>,
    cable: String,
    source_file: Option<String>,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct FccRow {
    make: String,
    model: Option<String>,
    years: YearsField,
    fcc_id: Option<String>,
    chip: Option<String>,
    confidence: Option<String>,
    source_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlagRow {
    make: String,
    model: Option<String>,
    year: u16,
    tool: Option<String>,
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TaggedRecord {
    ToolMention(MentionRecord),
    Limitation(LimitationRow),
    Cable(CableRow),
    Fcc(FccRow),
}

/// `{ "by_tool": {...}, "by_make": {...} }` index files.
#[derive(Debug, Deserialize)]
struct IndexedRecords {
    by_tool: Option<BTreeMap<String, Vec<Value>>>,
    by_make: Option<BTreeMap<String, Vec<Value>>>,
}

struct RawIdentity<'r> {
    make: &'r str,
    model: Option<&'r str>,
    years: &'r YearsField,
}

/// Per-file record builder. Owns the counters for one file.
struct Loader {
    file: String,
    default_source: String,
    horizon: u16,
    out: FileLoad,
}

impl Loader {
    fn new(path: &Path, horizon: u16) -> Self {
        let default_source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            file: path.display().to_string(),
            default_source,
            horizon,
            out: FileLoad::default(),
        }
    }

    fn skip(&mut self, err: ReconcileError) {
        warn!(error = %err, "record skipped");
        self.out.skipped += 1;
    }

    fn unparseable(&self, record: &str, reason: impl ToString) -> ReconcileError {
        ReconcileError::unparseable(&self.file, record, reason)
    }

    fn accept(&mut self, record: &str, result: Result<Vec<Evidence>, ReconcileError>) {
        match result {
            Ok(evidence) => {
                debug!(file = %self.file, record, count = evidence.len(), "record loaded");
                self.out.loaded += 1;
                self.out.evidence.extend(evidence);
            }
            Err(err) => self.skip(err),
        }
    }

    /// Deserialize one JSON record and turn it into evidence.
    fn each<T: DeserializeOwned>(
        &mut self,
        record: &str,
        raw: Value,
        build: impl FnOnce(&Self, T) -> Result<Vec<Evidence>, ReconcileError>,
    ) {
        let result = match serde_json::from_value::<T>(raw) {
            Ok(row) => build(self, row),
            Err(e) => Err(self.unparseable(record, e)),
        };
        self.accept(record, result);
    }

    fn confidence(&self, record: &str, raw: Option<&str>, default: Confidence) -> Confidence {
        match raw.map(str::trim).filter(|r| !r.is_empty()) {
            None => default,
            Some(label) => Confidence::parse(label).unwrap_or_else(|| {
                warn!(file = %self.file, record, label, "unknown confidence label; using default");
                default
            }),
        }
    }

    fn context(
        &self,
        record: &str,
        identity: RawIdentity<'_>,
        confidence: Confidence,
        source: Option<&str>,
        snippet: &str,
    ) -> Result<EvidenceContext, ReconcileError> {
        let span = identity
            .years
            .span()
            .ok_or_else(|| self.unparseable(record, format!("unparseable year span {}", identity.years)))?;
        let resolved = resolve_identity(identity.make, identity.model, span, self.horizon)
            .ok_or_else(|| self.unparseable(record, "blank make or no model year within the horizon"))?;

        let source = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_source.as_str());
        let context = EvidenceContext {
            source_file: source.to_string(),
            snippet: snippet.to_string(),
            vehicles: resolved.vehicles,
            make: Some(resolved.make),
            years: resolved.years,
            confidence,
        };
        if context.is_make_level() {
            debug!(
                file = %self.file,
                record,
                make = identity.make,
                "evidence names a make without a model; applied make-wide"
            );
        }
        Ok(context)
    }

    fn base_row(&self, record: &str, row: BaseRow) -> Result<Vec<Evidence>, ReconcileError> {
        let years = YearsField::Text(row.years);
        let confidence = self.confidence(record, row.confidence.as_deref(), Confidence::High);
        let notes = row.notes.filter(|n| !n.trim().is_empty());
        let context = self.context(
            record,
            RawIdentity {
                make: &row.make,
                model: row.model.as_deref(),
                years: &years,
            },
            confidence,
            row.source.as_deref(),
            notes.as_deref().unwrap_or_default(),
        )?;

        let mut evidence = Vec::with_capacity(2);
        if row.fcc_id.is_some() || row.chip.is_some() {
            evidence.push(Evidence::Fcc(FccEvidence {
                context: context.clone(),
                fcc_id: row.fcc_id,
                chip: row.chip,
            }));
        }
        if let Some(tool) = row.tool.filter(|t| !t.trim().is_empty()) {
            evidence.push(Evidence::ToolMention(ToolMentionEvidence {
                context,
                tool,
                caveat: notes,
            }));
        }
        if evidence.is_empty() {
            return Err(self.unparseable(record, "row carries neither identity values nor a tool"));
        }
        Ok(evidence)
    }

    fn mention(
        &self,
        record: &str,
        row: MentionRecord,
        index_make: Option<&str>,
        index_tool: Option<&str>,
    ) -> Result<Vec<Evidence>, ReconcileError> {
        let make = row
            .make
            .as_deref()
            .or(index_make)
            .ok_or_else(|| self.unparseable(record, "no make"))?;
        let tool = row
            .tool
            .as_deref()
            .or(index_tool)
            .ok_or_else(|| self.unparseable(record, "no tool"))?
            .to_string();
        let confidence = self.confidence(record, row.confidence.as_deref(), Confidence::Medium);
        let snippet = if row.context.trim().is_empty() {
            row.caveat.as_deref().unwrap_or_default()
        } else {
            row.context.as_str()
        };
        let context = self.context(
            record,
            RawIdentity {
                make,
                model: row.model.as_deref(),
                years: &row.years,
            },
            confidence,
            row.source_file.as_deref(),
            snippet,
        )?;
        Ok(vec![Evidence::ToolMention(ToolMentionEvidence {
            context,
            tool,
            caveat: row.caveat.filter(|c| !c.trim().is_empty()),
        })])
    }

    fn limitation(
        &self,
        record: &str,
        row: LimitationRow,
        index_category: Option<&str>,
    ) -> Result<Vec<Evidence>, ReconcileError> {
        let categories: BTreeSet<LimitationCategory> = index_category
            .and_then(LimitationCategory::parse)
            .or_else(|| row.category.as_deref().and_then(LimitationCategory::parse))
            .into_iter()
            .collect();
        let context = self.context(
            record,
            RawIdentity {
                make: &row.make,
                model: row.model.as_deref(),
                years: &row.years,
            },
            Confidence::Medium,
            row.source_file.as_deref(),
            &row.context,
        )?;
        Ok(vec![Evidence::Limitation(LimitationEvidence {
            context,
            tool: row.tool,
            categories,
        })])
    }

    fn cable(
        &self,
        record: &str,
        row: CableRow,
        index_make: Option<&str>,
        index_tool: Option<&str>,
    ) -> Result<Vec<Evidence>, ReconcileError> {
        let make = row
            .make
            .as_deref()
            .or(index_make)
            .ok_or_else(|| self.unparseable(record, "no make"))?;
        if row.cable.trim().is_empty() {
            return Err(self.unparseable(record, "empty cable"));
        }
        let snippet = if row.context.trim().is_empty() {
            row.cable.as_str()
        } else {
            row.context.as_str()
        };
        let context = self.context(
            record,
            RawIdentity {
                make,
                model: row.model.as_deref(),
                years: &row.years,
            },
            Confidence::Medium,
            row.source_file.as_deref(),
            snippet,
        )?;
        Ok(vec![Evidence::Cable(CableEvidence {
            context,
            tool: row.tool.or_else(|| index_tool.map(str::to_string)),
            cable: row.cable,
        })])
    }

    fn fcc(&self, record: &str, row: FccRow) -> Result<Vec<Evidence>, ReconcileError> {
        if row.fcc_id.is_none() && row.chip.is_none() {
            return Err(self.unparseable(record, "no fcc_id or chip"));
        }
        let confidence = self.confidence(record, row.confidence.as_deref(), Confidence::High);
        let context = self.context(
            record,
            RawIdentity {
                make: &row.make,
                model: row.model.as_deref(),
                years: &row.years,
            },
            confidence,
            row.source_file.as_deref(),
            "",
        )?;
        Ok(vec![Evidence::Fcc(FccEvidence {
            context,
            fcc_id: row.fcc_id,
            chip: row.chip,
        })])
    }

    fn tagged(&self, record: &str, row: TaggedRecord) -> Result<Vec<Evidence>, ReconcileError> {
        match row {
            TaggedRecord::ToolMention(r) => self.mention(record, r, None, None),
            TaggedRecord::Limitation(r) => self.limitation(record, r, None),
            TaggedRecord::Cable(r) => self.cable(record, r, None, None),
            TaggedRecord::Fcc(r) => self.fcc(record, r),
        }
    }
}

fn read_json(path: &Path) -> Result<Value, ReconcileError> {
    let file = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ReconcileError::schema(&file, format!("unreadable: {}", e)))?;
    serde_json::from_str(&text).map_err(|e| ReconcileError::schema(&file, format!("invalid JSON: {}", e)))
}

fn read_indexed(path: &Path) -> Result<IndexedRecords, ReconcileError> {
    let file = path.display().to_string();
    let value = read_json(path)?;
    let indexed: IndexedRecords = serde_json::from_value(value).map_err(|e| {
        ReconcileError::schema(&file, format!("expected {{by_tool, by_make}} object: {}", e))
    })?;
    if indexed.by_tool.is_none() && indexed.by_make.is_none() {
        return Err(ReconcileError::schema(&file, "expected a `by_tool` or `by_make` index"));
    }
    Ok(indexed)
}

pub fn load_base_mappings(path: &Path, horizon: u16) -> Result<FileLoad, ReconcileError> {
    let file = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ReconcileError::schema(&file, e))?;
    let headers = reader
        .headers()
        .map_err(|e| ReconcileError::schema(&file, e))?
        .clone();
    let missing: Vec<&str> = BASE_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if !missing.is_empty() {
        return Err(ReconcileError::schema(
            &file,
            format!("missing columns: {}", missing.join(", ")),
        ));
    }

    let mut loader = Loader::new(path, horizon);
    for (i, row) in reader.deserialize::<BaseRow>().enumerate() {
        // header is line 1
        let record = format!("row {}", i + 2);
        let result = row
            .map_err(|e| loader.unparseable(&record, e))
            .and_then(|row| loader.base_row(&record, row));
        loader.accept(&record, result);
    }
    Ok(loader.out)
}

pub fn load_tool_mentions(path: &Path, horizon: u16) -> Result<FileLoad, ReconcileError> {
    let indexed = read_indexed(path)?;
    let mut loader = Loader::new(path, horizon);
    for (tool, records) in indexed.by_tool.unwrap_or_default() {
        for (i, raw) in records.into_iter().enumerate() {
            let record = format!("by_tool/{}[{}]", tool, i);
            loader.each(&record, raw, |l, row: MentionRecord| {
                l.mention(&record, row, None, Some(&tool))
            });
        }
    }
    for (make, records) in indexed.by_make.unwrap_or_default() {
        for (i, raw) in records.into_iter().enumerate() {
            let record = format!("by_make/{}[{}]", make, i);
            loader.each(&record, raw, |l, row: MentionRecord| {
                l.mention(&record, row, Some(&make), None)
            });
        }
    }
    Ok(loader.out)
}

pub fn load_limitations(path: &Path, horizon: u16) -> Result<FileLoad, ReconcileError> {
    let file = path.display().to_string();
    let by_category: BTreeMap<String, Vec<Value>> = serde_json::from_value(read_json(path)?)
        .map_err(|e| ReconcileError::schema(&file, format!("expected {{category: [records]}}: {}", e)))?;
    let mut loader = Loader::new(path, horizon);
    for (category, records) in by_category {
        if LimitationCategory::parse(&category).is_none() {
            debug!(file = %file, category, "unknown category key; records will be classified");
        }
        for (i, raw) in records.into_iter().enumerate() {
            let record = format!("{}[{}]", category, i);
            loader.each(&record, raw, |l, row: LimitationRow| {
                l.limitation(&record, row, Some(&category))
            });
        }
    }
    Ok(loader.out)
}

pub fn load_cables(path: &Path, horizon: u16) -> Result<FileLoad, ReconcileError> {
    let indexed = read_indexed(path)?;
    let mut loader = Loader::new(path, horizon);
    for (tool, records) in indexed.by_tool.unwrap_or_default() {
        for (i, raw) in records.into_iter().enumerate() {
            let record = format!("by_tool/{}[{}]", tool, i);
            loader.each(&record, raw, |l, row: CableRow| {
                l.cable(&record, row, None, Some(&tool))
            });
        }
    }
    for (make, records) in indexed.by_make.unwrap_or_default() {
        for (i, raw) in records.into_iter().enumerate() {
            let record = format!("by_make/{}[{}]", make, i);
            loader.each(&record, raw, |l, row: CableRow| {
                l.cable(&record, row, Some(&make), None)
            });
        }
    }
    Ok(loader.out)
}

pub fn load_tagged_evidence(path: &Path, horizon: u16) -> Result<FileLoad, ReconcileError> {
    let file = path.display().to_string();
    let records: Vec<Value> = serde_json::from_value(read_json(path)?)
        .map_err(|e| ReconcileError::schema(&file, format!("expected an array of tagged records: {}", e)))?;
    let mut loader = Loader::new(path, horizon);
    for (i, raw) in records.into_iter().enumerate() {
        let record = format!("[{}]", i);
        loader.each(&record, raw, |l, row: TaggedRecord| l.tagged(&record, row));
    }
    Ok(loader.out)
}

pub fn load_research_flags(path: &Path) -> Result<FileLoad, ReconcileError> {
    let file = path.display().to_string();
    let records: Vec<Value> = serde_json::from_value(read_json(path)?)
        .map_err(|e| ReconcileError::schema(&file, format!("expected an array of flags: {}", e)))?;
    let mut out = FileLoad::default();
    for (i, raw) in records.into_iter().enumerate() {
        let record = format!("[{}]", i);
        let parsed = serde_json::from_value::<FlagRow>(raw)
            .map_err(|e| ReconcileError::unparseable(&file, &record, e))
            .and_then(|row| seed_flag(&file, &record, row));
        match parsed {
            Ok(flag) => {
                out.loaded += 1;
                out.flags.push(flag);
            }
            Err(err) => {
                warn!(error = %err, "record skipped");
                out.skipped += 1;
            }
        }
    }
    Ok(out)
}

fn seed_flag(file: &str, record: &str, row: FlagRow) -> Result<ResearchFlag, ReconcileError> {
    let make = normalize_make(&row.make);
    if make.is_empty() || row.reason.trim().is_empty() {
        return Err(ReconcileError::unparseable(file, record, "flag needs a make and a reason"));
    }
    let tool = match row.tool.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        None => None,
        Some(raw) => {
            let family = normalize_tool(raw);
            if family.is_none() {
                warn!(file, record, tool = raw, "flag tool does not map to a family; applied to all tools");
            }
            family
        }
    };
    Ok(ResearchFlag {
        make,
        model: row
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(normalize_model),
        year: row.year,
        tool,
        reason: row.reason.trim().to_string(),
    })
}
