//! # Key Coverage Core
//!
//! Pure reconciliation logic for key-programming coverage data: identity
//! normalization, limitation classification, the coverage fold, conflict
//! and transition detection, and the export document model.
//!
//! This crate does no filesystem or network I/O. Loading inputs, writing
//! the artifact and the CLI live in the `key-coverage` crate.
//!
//! Data flows one way:
//!
//! ```text
//! Evidence ──▶ normalize / classify ──▶ Aggregator ──▶ CoverageTable
//!                                                      │
//!                                   detect ◀───────────┤
//!                                     │                ▼
//!                                     └──────▶ export::build_document
//! ```

pub mod aggregate;
pub mod classify;
pub mod detect;
pub mod export;
pub mod models;
pub mod normalize;
pub mod policy;
