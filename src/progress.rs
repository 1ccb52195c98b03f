//! Run progress reporting.
//!
//! Reports what `kcov run` is doing (which input is loading, how far the
//! fold has got, where the artifact is going) on **stderr**, so stdout stays
//! reserved for the run summary.

use std::io::Write;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// An input file is being read.
    Loading { input: String, path: String },
    /// `n` of `total` evidence records folded.
    Folding { n: u64, total: u64 },
    /// The artifact is being serialized to `path`.
    Writing { path: String },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: "run  folding  1,234 / 5,000 records".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Loading { input, path } => {
                format!("run  loading {}  {}\n", input, path)
            }
            RunProgressEvent::Folding { n, total } => format!(
                "run  folding  {} / {} records\n",
                format_number(*n),
                format_number(*total)
            ),
            RunProgressEvent::Writing { path } => format!("run  writing  {}\n", path),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Loading { input, path } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "input": input,
                "path": path
            }),
            RunProgressEvent::Folding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "folding",
                "n": n,
                "total": total
            }),
            RunProgressEvent::Writing { path } => serde_json::json!({
                "event": "progress",
                "phase": "writing",
                "path": path
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
