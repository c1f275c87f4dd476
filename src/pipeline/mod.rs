//! Whole-run orchestration: parallel extraction, aggregation, emission.
//!
//! ```text
//!  inputs ──▶ [worker pool: parse + extract, or cache hit] ──▶ fragments
//!                                                               │ (input order)
//!  imports ──▶ model ◀── merge ◀────────────────────────────────┘
//!               │
//!               ├── fixup ──▶ artifact + depfile
//!               └── emit  ──▶ .pyi files ──▶ post-formatter
//! ```

pub mod artifact;
pub mod cache;
mod runner;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::BindingModel;

pub use cache::FragmentCache;
pub use runner::{RunOptions, RunSummary, Runner};

/// What one translation unit contributes to the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub model: BindingModel,
    /// Every file the translation unit included.
    pub dependencies: Vec<PathBuf>,
}
