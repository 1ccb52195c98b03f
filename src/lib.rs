//! # Key Coverage
//!
//! Reconciles automotive key-programming coverage from several independently
//! mined evidence sources into one JSON artifact: for every vehicle and
//! every canonical tool family, can the tool program keys for it, with what
//! confidence, under what limitations, and with which cables.
//!
//! The domain logic lives in `key-coverage-core` and is pure. This crate
//! adds the file loaders, configuration, progress reporting and the `kcov`
//! binary.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────────┐
//! │   Inputs     │──▶│ Normalize + │──▶│ Aggregator │──▶│ Detect +     │
//! │ CSV / JSON   │   │ Classify    │   │ (fold)     │   │ Export       │
//! └──────────────┘   └─────────────┘   └────────────┘   └──────┬───────┘
//!                                                             ▼
//!                                                    dist/coverage.json
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kcov inputs                   # check configured inputs
//! kcov run                      # reconcile and write the artifact
//! kcov stats dist/coverage.json # summarize an artifact
//! kcov classify "AKL not supported, bench required"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Per-file error taxonomy |
//! | [`inputs`] | Input file loaders |
//! | [`pipeline`] | Run orchestration and summary |
//! | [`export`] | Artifact writing and digests |
//! | [`progress`] | Run progress reporting |
//! | [`sources`] | `kcov inputs` listing |
//! | [`stats`] | `kcov stats` artifact summary |
//! | [`inspect`] | `kcov classify` and `kcov normalize` |

pub mod config;
pub mod error;
pub mod export;
pub mod inputs;
pub mod inspect;
pub mod pipeline;
pub mod progress;
pub mod sources;
pub mod stats;
