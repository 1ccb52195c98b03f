//! Error taxonomy for the reconciliation run.
//!
//! Only [`ReconcileError::MissingInputFile`] aborts a run. Every other
//! variant is isolated to one file or one record and is logged, counted,
//! and skipped.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// A required input file is absent.
    #[error("required input '{name}' not found at {}", path.display())]
    MissingInputFile { name: String, path: PathBuf },

    /// One record could not be read; the rest of the file still loads.
    #[error("unparseable record {record} in {file}: {reason}")]
    UnparseableRecord {
        file: String,
        record: String,
        reason: String,
    },

    /// Evidence names a make but no model. It is kept and applied at
    /// reduced confidence.
    #[error("ambiguous identity in {file}: {detail}")]
    IdentityAmbiguous { file: String, detail: String },

    /// The file's top-level shape is wrong; nothing from it is used.
    #[error("schema mismatch in {file}: {reason}")]
    SchemaMismatch { file: String, reason: String },
}

impl ReconcileError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::MissingInputFile { .. })
    }

    pub fn unparseable(file: &str, record: impl ToString, reason: impl ToString) -> Self {
        ReconcileError::UnparseableRecord {
            file: file.to_string(),
            record: record.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(file: &str, reason: impl ToString) -> Self {
        ReconcileError::SchemaMismatch {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}
