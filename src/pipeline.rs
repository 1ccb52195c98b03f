//! Reconciliation pipeline orchestration.
//!
//! Coordinates the full run: load inputs → fold evidence → detect conflicts
//! and transitions → build the document → write the artifact. The run
//! summary is printed even when some input files failed; only a missing
//! required input stops the run early.

use anyhow::Result;
use key_coverage_core::aggregate::{Aggregator, AggregatorOptions, AttachMode, CoverageTable};
use key_coverage_core::detect::{detect, DetectionReport};
use key_coverage_core::export::{build_document, CoverageDocument};
use key_coverage_core::models::{Evidence, ResearchFlag};
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::export::{write_artifact, WrittenArtifact};
use crate::inputs::{load_inputs, LoadedInputs};
use crate::progress::{RunProgressEvent, RunProgressReporter};

/// Fold progress is reported every this many records.
const FOLD_PROGRESS_EVERY: usize = 1_000;

/// Command-line overrides for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub output: Option<PathBuf>,
    pub strict: bool,
    pub dry_run: bool,
}

/// What a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub document: CoverageDocument,
    pub artifact: Option<WrittenArtifact>,
    pub files_with_errors: usize,
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        self.files_with_errors == 0
    }
}

/// Fold evidence and seeded flags into a table, then run detection.
pub fn reconcile(
    evidence: Vec<Evidence>,
    seed_flags: Vec<ResearchFlag>,
    options: AggregatorOptions,
    progress: &dyn RunProgressReporter,
) -> (CoverageTable, DetectionReport) {
    let mut aggregator = Aggregator::new(options);
    aggregator.add_seed_flags(seed_flags);

    let total = evidence.len() as u64;
    for (i, item) in evidence.into_iter().enumerate() {
        aggregator.ingest(item);
        if (i + 1) % FOLD_PROGRESS_EVERY == 0 {
            progress.report(RunProgressEvent::Folding {
                n: (i + 1) as u64,
                total,
            });
        }
    }
    progress.report(RunProgressEvent::Folding { n: total, total });

    let table = aggregator.finish();
    let report = detect(&table);
    info!(
        entries = table.entries.len(),
        conflicts = report.conflicts.len(),
        transitions = report.transitions.len(),
        flags = table.flags.len(),
        "reconciliation finished"
    );
    (table, report)
}

/// Run the full pipeline and print the run summary to stdout.
pub fn run(config: &Config, options: &RunOptions, progress: &dyn RunProgressReporter) -> Result<RunOutcome> {
    let loaded = load_inputs(config, progress)?;

    let mut aggregator_options = config.aggregation.options();
    if options.strict {
        aggregator_options.attach_mode = AttachMode::Strict;
    }

    let LoadedInputs {
        evidence,
        seed_flags,
        stats,
        errors,
    } = loaded;
    let (table, report) = reconcile(evidence, seed_flags, aggregator_options, progress);
    let document = build_document(&table, &report, stats);

    let artifact = if options.dry_run {
        None
    } else {
        let path = options.output.clone().unwrap_or_else(|| config.output.path.clone());
        progress.report(RunProgressEvent::Writing {
            path: path.display().to_string(),
        });
        Some(write_artifact(&document, &path, config.output.pretty)?)
    };

    let outcome = RunOutcome {
        document,
        artifact,
        files_with_errors: errors.len(),
    };
    print_summary(&outcome, options.dry_run);
    Ok(outcome)
}

fn print_summary(outcome: &RunOutcome, dry_run: bool) {
    let doc = &outcome.document;
    let inputs = &doc.run.inputs;
    let fold = &doc.run.fold;

    // With `--output -` the artifact already went to stdout.
    let to_stdout = outcome
        .artifact
        .as_ref()
        .is_some_and(|a| a.path.as_os_str() == "-");
    let emit = |line: String| {
        if to_stdout {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    };

    emit(if dry_run { "run (dry-run)".to_string() } else { "run".to_string() });
    emit(format!("  inputs processed: {}", inputs.files_processed));
    emit(format!("  inputs failed: {}", inputs.files_failed));
    emit(format!("  records loaded: {}", inputs.records_loaded));
    emit(format!("  records skipped: {}", inputs.records_skipped));
    emit(format!("  evidence folded: {}", fold.evidence_folded));
    emit(format!("  ambiguous evidence: {}", fold.ambiguous));
    emit(format!("  vehicles: {}", doc.summary.total_vehicles));
    emit(format!("  conflicts: {}", doc.summary.conflict_count));
    emit(format!("  transitions: {}", doc.summary.transition_count));
    emit(format!("  flags: {}", doc.summary.flag_count));
    if let Some(artifact) = &outcome.artifact {
        emit(format!("  output: {}", artifact.path.display()));
        emit(format!("  sha256: {}", artifact.sha256));
    }
    emit(if outcome.is_clean() {
        "ok".to_string()
    } else {
        "completed with errors".to_string()
    });
}
